//! Chat widget library: reply formatting, span-tagging code highlighter,
//! typing reveal, chat session controller, theme state, and voice input
//! state machine. The binary wraps these in a terminal chat and a small
//! HTTP host that serves the widget page.

pub mod chat;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod highlight;
pub mod markdown;
pub mod markup;
pub mod terminal;
pub mod theme;
pub mod typing;
pub mod voice;
pub mod web;

pub use chat::{ChatMessage, ChatSession, Clipboard, Sender, FALLBACK_REPLY};
pub use client::{AskClient, AskRequest, AskResponse, ReplyEndpoint};
pub use config::WidgetConfig;
pub use error::{Result, WidgetError};
pub use highlight::{highlight, highlight_as, Category, Language};
pub use markdown::{format_reply, format_user};
pub use theme::{Theme, ThemeState};
pub use typing::{Frame, TypingAnimation};
pub use voice::{VoiceAction, VoiceConfig, VoiceSession};
