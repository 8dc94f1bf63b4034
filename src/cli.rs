use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "ask-widget")]
#[command(version)]
#[command(about = "Chat widget for a JSON reply endpoint: terminal chat, widget host, and code highlighter")]
pub struct Args {
    /// Send this one message and exit instead of starting an interactive chat
    pub message: Option<String>,

    /// Reply endpoint URL (POST {"message"} -> {"reply"})
    #[arg(long)]
    pub endpoint: Option<String>,

    /// TOML configuration file
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Launch the widget host on localhost instead of terminal chat
    #[arg(long)]
    pub web: bool,

    /// Port for the widget host
    #[arg(long)]
    pub port: Option<u16>,

    /// Delay between revealed characters, in milliseconds (0 disables the animation)
    #[arg(long)]
    pub typing_ms: Option<u64>,

    /// Attach an image file to the one-shot message
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Highlight code read from stdin as LANG and print the tagged HTML
    #[arg(long, value_name = "LANG")]
    pub highlight: Option<String>,

    /// Print replies as HTML instead of ANSI-colored text
    #[arg(long)]
    pub html: bool,

    /// Start the widget page in dark mode
    #[arg(long)]
    pub dark: bool,
}

/// Guess an image MIME type from a file extension.
pub fn image_mime(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/png",
    }
}
