//! Crate-level error type.

use thiserror::Error;

/// Errors surfaced by the reply client, configuration loading, and the
/// widget host.
///
/// Highlighting and reply formatting never fail; they degrade to escaped
/// text instead.
#[derive(Debug, Error)]
pub enum WidgetError {
    /// The request never produced a response (connection refused, DNS, ...).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The reply endpoint answered with a non-2xx status.
    #[error("reply endpoint returned HTTP {0}")]
    Status(u16),

    /// A body could not be decoded as the expected JSON shape.
    #[error("malformed JSON: {0}")]
    Decode(#[from] serde_json::Error),

    /// The TOML configuration file could not be parsed.
    #[error("invalid config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// An inbound request to the widget host was malformed.
    #[error("bad request: {0}")]
    BadRequest(String),
}

pub type Result<T> = std::result::Result<T, WidgetError>;
