//! Chat session controller: the message list, the submit flow, the main
//! menu popup, image attachment, and copy actions.
//!
//! ## Submit flow
//! 1. Trim the input; empty input is ignored.
//! 2. Append the user message and clear the draft.
//! 3. Send `{message, image?}` to the reply endpoint.
//! 4. Append the reply (or the fixed fallback text on any failure) as a bot
//!    message whose rendered HTML is filled in by [`ChatSession::finish_typing`].

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

use crate::client::{image_data_url, AskRequest, ReplyEndpoint};
use crate::error::Result;
use crate::markdown::{code_blocks, format_reply, format_user};
use crate::typing::TypingAnimation;

/// Shown as a bot message when the reply endpoint cannot be reached or
/// answers with something unusable.
pub const FALLBACK_REPLY: &str = "⚠️ Error connecting to server.";

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

impl std::fmt::Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Sender::User => write!(f, "user"),
            Sender::Bot => write!(f, "bot"),
        }
    }
}

/// One entry in the message list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub sender: Sender,
    /// Raw text as typed or as returned by the endpoint.
    pub text: String,
    /// Display HTML. Bot messages stay `None` until typing completes.
    pub rendered: Option<String>,
    pub timestamp_ms: u64,
}

impl ChatMessage {
    fn new(sender: Sender, text: String) -> Self {
        let rendered = match sender {
            Sender::User => Some(format_user(&text)),
            Sender::Bot => None,
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender,
            text,
            rendered,
            timestamp_ms: now_ms(),
        }
    }

    /// Class list used by the page (`message user` / `message bot`).
    pub fn css_class(&self) -> String {
        format!("message {}", self.sender)
    }
}

/// Platform clipboard.
pub trait Clipboard {
    fn write_text(&mut self, text: &str) -> Result<()>;
}

/// Owned widget state. Replaces the page-global message box, draft input,
/// popup visibility, and current-image holder.
#[derive(Debug)]
pub struct ChatSession {
    messages: Vec<ChatMessage>,
    draft: String,
    menu_open: bool,
    current_image: Option<String>,
    fallback: String,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    pub fn new() -> Self {
        Self::with_fallback(FALLBACK_REPLY)
    }

    pub fn with_fallback(fallback: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            draft: String::new(),
            menu_open: false,
            current_image: None,
            fallback: fallback.into(),
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn message(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    // -- Submit ---------------------------------------------------------------

    /// Send `input` and append the exchange. Returns the id of the bot
    /// message, or `None` when the trimmed input is empty.
    pub async fn submit<E: ReplyEndpoint>(&mut self, endpoint: &E, input: &str) -> Option<String> {
        let text = input.trim();
        if text.is_empty() {
            return None;
        }
        self.messages.push(ChatMessage::new(Sender::User, text.to_string()));
        self.draft.clear();

        let request = AskRequest {
            message: text.to_string(),
            image: self.current_image.take(),
        };
        let reply = match endpoint.ask(&request).await {
            Ok(reply) => {
                info!(chars = reply.chars().count(), "reply received");
                reply
            }
            Err(e) => {
                warn!(error = %e, "reply endpoint failed; showing fallback");
                self.fallback.clone()
            }
        };

        let bot = ChatMessage::new(Sender::Bot, reply);
        let id = bot.id.clone();
        self.messages.push(bot);
        Some(id)
    }

    /// Submit whatever is in the draft.
    pub async fn submit_draft<E: ReplyEndpoint>(&mut self, endpoint: &E) -> Option<String> {
        let draft = std::mem::take(&mut self.draft);
        let id = self.submit(endpoint, &draft).await;
        if id.is_none() {
            self.draft = draft;
        }
        id
    }

    /// Reveal animation for a bot message's raw text.
    pub fn typing_for(&self, id: &str) -> Option<TypingAnimation> {
        self.message(id)
            .filter(|m| m.sender == Sender::Bot)
            .map(|m| TypingAnimation::new(m.text.clone()))
    }

    /// Mark a bot message's reveal as complete and render it. Formatting
    /// happens once; later calls return the stored HTML.
    pub fn finish_typing(&mut self, id: &str) -> Option<&str> {
        let message = self.messages.iter_mut().find(|m| m.id == id)?;
        if message.rendered.is_none() {
            message.rendered = Some(format_reply(&message.text));
        }
        message.rendered.as_deref()
    }

    // -- Main menu --------------------------------------------------------------

    pub fn open_menu(&mut self) {
        self.menu_open = true;
    }

    pub fn close_menu(&mut self) {
        self.menu_open = false;
    }

    /// "Continue chat": dismiss the popup, keep the history.
    pub fn continue_chat(&mut self) {
        self.close_menu();
    }

    /// "New chat": clear the history and dismiss the popup.
    pub fn new_chat(&mut self) {
        info!(cleared = self.messages.len(), "starting new chat");
        self.messages.clear();
        self.close_menu();
    }

    pub fn is_menu_open(&self) -> bool {
        self.menu_open
    }

    // -- Image attachment -------------------------------------------------------

    /// Attach an image to the next submitted message.
    pub fn attach_image(&mut self, bytes: &[u8], mime: &str) {
        self.current_image = Some(image_data_url(bytes, mime));
    }

    pub fn clear_image(&mut self) {
        self.current_image = None;
    }

    pub fn current_image(&self) -> Option<&str> {
        self.current_image.as_deref()
    }

    // -- Copy actions -------------------------------------------------------------

    /// Copy a message's raw text. Returns `false` when the id is unknown.
    pub fn copy_reply<C: Clipboard>(&self, id: &str, clipboard: &mut C) -> Result<bool> {
        let Some(message) = self.message(id) else {
            return Ok(false);
        };
        clipboard.write_text(&message.text)?;
        Ok(true)
    }

    /// Copy the body of the `index`-th fenced code block of a message.
    pub fn copy_code<C: Clipboard>(&self, id: &str, index: usize, clipboard: &mut C) -> Result<bool> {
        let Some(block) = self
            .message(id)
            .and_then(|m| code_blocks(&m.text).into_iter().nth(index))
        else {
            return Ok(false);
        };
        clipboard.write_text(&block.code)?;
        Ok(true)
    }
}
