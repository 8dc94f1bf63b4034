//! Widget configuration: TOML file merged under command-line overrides.
//!
//! ```toml
//! endpoint = "http://127.0.0.1:5000/api/ask"
//! port = 8888
//! typing_interval_ms = 25
//! theme = "dark"
//!
//! [voice]
//! locale = "en-GB"
//! continuous = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chat::FALLBACK_REPLY;
use crate::cli::Args;
use crate::error::Result;
use crate::theme::Theme;
use crate::voice::{PermissionMemo, VoiceConfig};

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:5000/api/ask";
pub const DEFAULT_PORT: u16 = 8888;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WidgetConfig {
    /// Reply endpoint URL.
    pub endpoint: String,
    /// Widget host port.
    pub port: u16,
    /// Delay between revealed characters.
    pub typing_interval_ms: u64,
    /// Reply request timeout. Unset leaves the transport default.
    pub request_timeout_secs: Option<u64>,
    /// Bot text shown when the endpoint fails.
    pub fallback_message: String,
    pub theme: Theme,
    pub voice: VoiceConfig,
    /// Where the microphone-permission flag is persisted.
    pub permission_memo: Option<PathBuf>,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            port: DEFAULT_PORT,
            typing_interval_ms: 25,
            request_timeout_secs: None,
            fallback_message: FALLBACK_REPLY.to_string(),
            theme: Theme::Light,
            voice: VoiceConfig::default(),
            permission_memo: None,
        }
    }
}

impl WidgetConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Config file (if any) with command-line flags applied on top.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_args(args);
        Ok(config)
    }

    pub fn apply_args(&mut self, args: &Args) {
        if let Some(endpoint) = &args.endpoint {
            self.endpoint = endpoint.clone();
        }
        if let Some(port) = args.port {
            self.port = port;
        }
        if let Some(ms) = args.typing_ms {
            self.typing_interval_ms = ms;
        }
        if args.dark {
            self.theme = Theme::Dark;
        }
    }

    pub fn typing_interval(&self) -> Duration {
        Duration::from_millis(self.typing_interval_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Persisted microphone-permission flag, when a location is configured.
    pub fn memo(&self) -> Option<PermissionMemo> {
        self.permission_memo.clone().map(PermissionMemo::new)
    }
}
