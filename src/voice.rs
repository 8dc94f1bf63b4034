//! # Voice input session
//!
//! Drives a platform speech recognizer and microphone through a recording
//! session. The platform delivers `start` / `result` / `error` / `end`
//! events asynchronously; each handler returns a [`VoiceAction`] telling the
//! caller what to do next.
//!
//! ## Error taxonomy
//!
//! | recognizer code                        | handling                                   |
//! |----------------------------------------|--------------------------------------------|
//! | `no-speech`                            | restart after the short delay               |
//! | `not-allowed`, `service-not-allowed`   | terminal, permission message                |
//! | `aborted`, `network`                   | restart once after the long delay           |
//! | anything else                          | terminal                                    |
//!
//! ## Delayed restarts
//!
//! A restart is handed out as a [`RestartTicket`] stamped with the session
//! generation. [`VoiceSession::stop`] bumps the generation, so a ticket that
//! fires after the user stopped recording is ignored: the microphone stays
//! released and the session stays inactive.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::error::Result;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Recognizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub locale: String,
    /// Keep listening across utterances (restart on `end`).
    pub continuous: bool,
    /// Report interim transcripts, not only final ones.
    pub interim_results: bool,
    /// Delay before restarting after `no-speech`.
    #[serde(with = "millis")]
    pub no_speech_restart: Duration,
    /// Delay before the single retry after `aborted` / `network`.
    #[serde(with = "millis")]
    pub transient_restart: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            locale: "en-US".to_string(),
            continuous: false,
            interim_results: false,
            no_speech_restart: Duration::from_millis(300),
            transient_restart: Duration::from_millis(1000),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

// ---------------------------------------------------------------------------
// Platform seams
// ---------------------------------------------------------------------------

/// Speech-recognition engine.
pub trait SpeechRecognizer {
    fn start(&mut self, config: &VoiceConfig) -> std::result::Result<(), String>;
    fn stop(&mut self);
}

/// Microphone stream. `acquire` fails with the platform error name
/// (e.g. `NotAllowedError`).
pub trait Microphone {
    fn acquire(&mut self) -> std::result::Result<(), String>;
    fn release(&mut self);
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Classified recognizer error code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionError {
    NoSpeech,
    PermissionDenied,
    Transient,
    Other(String),
}

impl RecognitionError {
    pub fn from_code(code: &str) -> Self {
        match code {
            "no-speech" => RecognitionError::NoSpeech,
            "not-allowed" | "service-not-allowed" => RecognitionError::PermissionDenied,
            "aborted" | "network" => RecognitionError::Transient,
            other => RecognitionError::Other(other.to_string()),
        }
    }
}

pub const PERMISSION_DENIED_MESSAGE: &str =
    "Microphone permission was denied. Allow microphone access to use voice input.";
pub const UNAVAILABLE_MESSAGE: &str = "Speech recognition is unavailable right now. Please try again later.";

/// Platform error names with a dedicated microphone message.
pub const MICROPHONE_ERROR_NAMES: &[&str] = &[
    "NotAllowedError",
    "PermissionDeniedError",
    "NotFoundError",
    "DevicesNotFoundError",
    "NotReadableError",
    "TrackStartError",
    "OverconstrainedError",
    "ConstraintNotSatisfiedError",
    "SecurityError",
    "AbortError",
];

/// User-facing text for a microphone acquisition failure.
pub fn microphone_error_message(name: &str) -> &'static str {
    match name {
        "NotAllowedError" | "PermissionDeniedError" => {
            "Microphone access was denied. Please allow microphone access in your browser settings."
        }
        "NotFoundError" | "DevicesNotFoundError" => {
            "No microphone was found. Please connect a microphone and try again."
        }
        "NotReadableError" | "TrackStartError" => {
            "Your microphone is in use by another application. Close it and try again."
        }
        "OverconstrainedError" | "ConstraintNotSatisfiedError" => {
            "Your microphone does not support the requested settings."
        }
        "SecurityError" => "Microphone access requires a secure (HTTPS) page.",
        "AbortError" => "Microphone access was interrupted. Please try again.",
        _ => "Could not access the microphone.",
    }
}

/// Why a session could not start.
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("{message} ({name})")]
    Microphone { name: String, message: &'static str },
    #[error("speech recognition failed to start: {0}")]
    Recognition(String),
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A pending delayed restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartTicket {
    generation: u64,
    pub delay: Duration,
}

/// What the caller should do after an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceAction {
    /// Nothing to do.
    Idle,
    /// Put this text in the input box.
    Transcript(String),
    /// Call [`VoiceSession::restart_due`] with the ticket after its delay.
    ScheduleRestart(RestartTicket),
    /// Recognition was restarted.
    Restarted,
    /// The session ended; show the message if any.
    Ended { message: Option<String> },
}

pub struct VoiceSession<R, M> {
    recognizer: R,
    microphone: M,
    config: VoiceConfig,
    active: bool,
    mic_held: bool,
    generation: u64,
    pending: Option<u64>,
    transient_retry_used: bool,
}

impl<R: SpeechRecognizer, M: Microphone> VoiceSession<R, M> {
    pub fn new(recognizer: R, microphone: M, config: VoiceConfig) -> Self {
        Self {
            recognizer,
            microphone,
            config,
            active: false,
            mic_held: false,
            generation: 0,
            pending: None,
            transient_retry_used: false,
        }
    }

    /// The recording flag.
    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn holds_microphone(&self) -> bool {
        self.mic_held
    }

    pub fn has_pending_restart(&self) -> bool {
        self.pending.is_some()
    }

    pub fn config(&self) -> &VoiceConfig {
        &self.config
    }

    pub fn recognizer(&self) -> &R {
        &self.recognizer
    }

    pub fn microphone(&self) -> &M {
        &self.microphone
    }

    /// Acquire the microphone and start recognition.
    pub fn start(&mut self) -> std::result::Result<(), VoiceError> {
        if self.active {
            return Ok(());
        }
        if let Err(name) = self.microphone.acquire() {
            let message = microphone_error_message(&name);
            error!(error = %name, "microphone acquisition failed");
            return Err(VoiceError::Microphone { name, message });
        }
        self.mic_held = true;
        if let Err(e) = self.recognizer.start(&self.config) {
            error!(error = %e, "speech recognition failed to start");
            self.release_microphone();
            return Err(VoiceError::Recognition(e));
        }
        self.active = true;
        self.generation += 1;
        self.pending = None;
        self.transient_retry_used = false;
        info!(locale = %self.config.locale, continuous = self.config.continuous, "recording started");
        Ok(())
    }

    /// Stop recording. Invalidates any pending restart. Safe to call twice.
    pub fn stop(&mut self) {
        let was_active = self.active;
        self.active = false;
        self.generation += 1;
        self.pending = None;
        if was_active {
            self.recognizer.stop();
        }
        self.release_microphone();
        if was_active {
            info!("recording stopped");
        }
    }

    pub fn on_start(&mut self) -> VoiceAction {
        debug!(active = self.active, "recognizer started");
        VoiceAction::Idle
    }

    pub fn on_result(&mut self, transcript: &str, is_final: bool) -> VoiceAction {
        if !self.active || !(is_final || self.config.interim_results) {
            return VoiceAction::Idle;
        }
        if is_final {
            self.transient_retry_used = false;
        }
        VoiceAction::Transcript(transcript.trim().to_string())
    }

    pub fn on_error(&mut self, code: &str) -> VoiceAction {
        if !self.active {
            debug!(code, "recognizer error after stop ignored");
            return VoiceAction::Idle;
        }
        match RecognitionError::from_code(code) {
            RecognitionError::NoSpeech => {
                debug!("no speech detected; restarting");
                self.schedule(self.config.no_speech_restart)
            }
            RecognitionError::PermissionDenied => {
                error!(code, "speech recognition permission denied");
                self.end(Some(PERMISSION_DENIED_MESSAGE.to_string()))
            }
            RecognitionError::Transient if !self.transient_retry_used => {
                warn!(code, "transient recognizer error; retrying once");
                self.transient_retry_used = true;
                self.schedule(self.config.transient_restart)
            }
            RecognitionError::Transient => {
                error!(code, "transient recognizer error repeated; giving up");
                self.end(Some(UNAVAILABLE_MESSAGE.to_string()))
            }
            RecognitionError::Other(code) => {
                error!(code = %code, "speech recognition error");
                self.end(Some(format!("Speech recognition error: {code}")))
            }
        }
    }

    pub fn on_end(&mut self) -> VoiceAction {
        if !self.active || self.pending.is_some() {
            return VoiceAction::Idle;
        }
        if self.config.continuous {
            return self.schedule(Duration::ZERO);
        }
        self.end(None)
    }

    /// A scheduled restart's delay elapsed.
    pub fn restart_due(&mut self, ticket: RestartTicket) -> VoiceAction {
        if !self.active || ticket.generation != self.generation || self.pending != Some(ticket.generation) {
            debug!("stale restart ignored");
            return VoiceAction::Idle;
        }
        self.pending = None;
        match self.recognizer.start(&self.config) {
            Ok(()) => VoiceAction::Restarted,
            Err(e) => {
                error!(error = %e, "speech recognition restart failed");
                self.end(Some(UNAVAILABLE_MESSAGE.to_string()))
            }
        }
    }

    fn schedule(&mut self, delay: Duration) -> VoiceAction {
        self.pending = Some(self.generation);
        VoiceAction::ScheduleRestart(RestartTicket {
            generation: self.generation,
            delay,
        })
    }

    fn end(&mut self, message: Option<String>) -> VoiceAction {
        self.stop();
        VoiceAction::Ended { message }
    }

    fn release_microphone(&mut self) {
        if self.mic_held {
            self.microphone.release();
            self.mic_held = false;
        }
    }
}

// ---------------------------------------------------------------------------
// Permission memo
// ---------------------------------------------------------------------------

/// User agents of in-app browsers that re-prompt for the microphone on
/// every visit.
const EMBEDDED_MARKERS: &[&str] = &[
    "FBAN", "FBAV", "Instagram", "Line/", "Twitter", "MicroMessenger", "; wv)",
];

pub fn is_embedded_browser(user_agent: &str) -> bool {
    EMBEDDED_MARKERS.iter().any(|m| user_agent.contains(m))
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MemoFile {
    mic_permission_granted: bool,
}

/// Single persisted flag recording that microphone permission was granted.
#[derive(Debug, Clone)]
pub struct PermissionMemo {
    path: PathBuf,
}

impl PermissionMemo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing or unreadable memo counts as "not granted".
    pub fn granted(&self) -> bool {
        std::fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| serde_json::from_str::<MemoFile>(&s).ok())
            .is_some_and(|m| m.mic_permission_granted)
    }

    pub fn remember(&self, granted: bool) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let body = serde_json::to_string(&MemoFile {
            mic_permission_granted: granted,
        })?;
        std::fs::write(&self.path, body)?;
        Ok(())
    }

    /// Whether to show the permission explanation before acquiring the
    /// microphone. Only in-app browsers consult the memo.
    pub fn should_prompt(&self, user_agent: &str) -> bool {
        !(is_embedded_browser(user_agent) && self.granted())
    }
}
