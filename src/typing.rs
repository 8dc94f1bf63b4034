//! Character-by-character reveal of a bot reply.
//!
//! The animation yields one [`Frame::Partial`] per character of the raw
//! reply, then exactly one [`Frame::Done`] carrying the formatted HTML.
//! Formatting never runs on partially revealed text.

use std::time::Duration;

use tracing::trace;

use crate::markdown::format_reply;

/// Default delay between revealed characters.
pub const DEFAULT_TYPING_INTERVAL: Duration = Duration::from_millis(25);

/// One step of the reveal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Raw text revealed so far and the character just added.
    Partial { shown: String, latest: char },
    /// The complete reply, formatted.
    Done(String),
}

/// Iterator over reveal frames for a complete reply.
pub struct TypingAnimation<F = fn(&str) -> String> {
    text: String,
    shown: usize,
    finished: bool,
    formatter: F,
}

impl TypingAnimation {
    /// Reveal `text`, formatting it with [`format_reply`] at the end.
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_formatter(text, format_reply)
    }
}

impl<F: FnMut(&str) -> String> TypingAnimation<F> {
    pub fn with_formatter(text: impl Into<String>, formatter: F) -> Self {
        Self {
            text: text.into(),
            shown: 0,
            finished: false,
            formatter,
        }
    }

    /// Raw text revealed so far.
    pub fn shown(&self) -> &str {
        &self.text[..self.shown]
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Skip the remaining characters and jump to the final frame.
    pub fn finish_now(&mut self) -> Option<Frame> {
        if self.finished {
            return None;
        }
        self.shown = self.text.len();
        self.next()
    }
}

impl<F: FnMut(&str) -> String> Iterator for TypingAnimation<F> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if let Some(latest) = self.text[self.shown..].chars().next() {
            self.shown += latest.len_utf8();
            return Some(Frame::Partial {
                shown: self.text[..self.shown].to_string(),
                latest,
            });
        }
        if self.finished {
            return None;
        }
        self.finished = true;
        Some(Frame::Done((self.formatter)(&self.text)))
    }
}

/// Drive an animation in real time, handing every frame to `sink` and
/// sleeping `interval` between characters. Returns the formatted HTML.
pub async fn play<F, S>(mut animation: TypingAnimation<F>, interval: Duration, mut sink: S) -> String
where
    F: FnMut(&str) -> String,
    S: FnMut(&Frame),
{
    while let Some(frame) = animation.next() {
        sink(&frame);
        match frame {
            Frame::Done(html) => return html,
            Frame::Partial { .. } => {
                trace!(shown = animation.shown().len(), "typing frame");
                if !interval.is_zero() {
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }
    String::new()
}
