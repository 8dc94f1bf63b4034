//! Interactive terminal chat over a [`ChatSession`].
//!
//! Replies are revealed character by character, then replaced by their
//! ANSI-rendered form once typing completes. Slash commands cover the
//! widget's menu and copy actions:
//!
//! | command        | action                                   |
//! |----------------|------------------------------------------|
//! | `/new`         | clear the history                        |
//! | `/theme`       | toggle light/dark                        |
//! | `/copy`        | copy the last reply                      |
//! | `/code [N]`    | copy the Nth code block of the last reply |
//! | `/image PATH`  | attach an image to the next message      |
//! | `/quit`        | exit                                     |

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use colored::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};
use unicode_width::UnicodeWidthStr;

use crate::chat::{ChatSession, Clipboard};
use crate::cli::image_mime;
use crate::client::{AskClient, ReplyEndpoint};
use crate::config::WidgetConfig;
use crate::error::Result;
use crate::markup::to_ansi;
use crate::theme::{Theme, ThemeState};
use crate::typing::{play, Frame};

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Say(String),
    NewChat,
    ToggleTheme,
    CopyReply,
    CopyCode(usize),
    AttachImage(PathBuf),
    Help,
    Quit,
    Unknown(String),
    Empty,
}

pub fn parse_command(line: &str) -> Command {
    let line = line.trim();
    if line.is_empty() {
        return Command::Empty;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Say(line.to_string());
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    match name {
        "new" => Command::NewChat,
        "theme" => Command::ToggleTheme,
        "copy" => Command::CopyReply,
        "code" => match arg {
            "" => Command::CopyCode(0),
            n => n
                .parse::<usize>()
                .map(|n| Command::CopyCode(n.saturating_sub(1)))
                .unwrap_or_else(|_| Command::Unknown(line.to_string())),
        },
        "image" if !arg.is_empty() => Command::AttachImage(PathBuf::from(arg)),
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        _ => Command::Unknown(line.to_string()),
    }
}

/// Clipboard that writes an OSC 52 escape, which most terminal emulators
/// forward to the system clipboard.
pub struct Osc52Clipboard<W: Write> {
    out: W,
}

impl<W: Write> Osc52Clipboard<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> Clipboard for Osc52Clipboard<W> {
    fn write_text(&mut self, text: &str) -> Result<()> {
        let encoded = general_purpose::STANDARD.encode(text.as_bytes());
        write!(self.out, "\x1b]52;c;{}\x07", encoded)?;
        self.out.flush()?;
        Ok(())
    }
}

const BOT_PREFIX: &str = "bot> ";

/// Cursor movement that erases `shown` raw text so the formatted reply can
/// be printed in its place. `prefix_width` columns precede the first line.
/// Lines longer than `columns` occupy several screen rows; `columns == 0`
/// (unknown width) counts newlines only.
pub fn erase_sequence(shown: &str, prefix_width: usize, columns: usize) -> String {
    let rows: usize = if columns == 0 {
        shown.matches('\n').count() + 1
    } else {
        shown
            .split('\n')
            .enumerate()
            .map(|(i, line)| {
                let width = UnicodeWidthStr::width(line) + if i == 0 { prefix_width } else { 0 };
                width.div_ceil(columns).max(1)
            })
            .sum()
    };
    match rows - 1 {
        0 => "\r\x1b[J".to_string(),
        up => format!("\r\x1b[{}A\x1b[J", up),
    }
}

/// Current terminal width, or 0 when stdout is not a terminal.
fn terminal_columns() -> usize {
    match crossterm::terminal::size() {
        Ok((cols, _)) => cols as usize,
        Err(e) => {
            debug!(error = %e, "terminal size unavailable");
            0
        }
    }
}

pub struct Terminal<E> {
    endpoint: E,
    session: ChatSession,
    theme: ThemeState,
    dark: Arc<AtomicBool>,
    interval: Duration,
    raw_html: bool,
    last_reply: Option<String>,
}

impl<E: ReplyEndpoint> Terminal<E> {
    pub fn new(endpoint: E, config: &WidgetConfig, raw_html: bool) -> Self {
        let dark = Arc::new(AtomicBool::new(false));
        let mut theme = ThemeState::new(config.theme);
        let flag = Arc::clone(&dark);
        theme.subscribe(move |t| flag.store(t == Theme::Dark, Ordering::Relaxed));
        Self {
            endpoint,
            session: ChatSession::with_fallback(config.fallback_message.clone()),
            theme,
            dark,
            interval: config.typing_interval(),
            raw_html,
            last_reply: None,
        }
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub fn theme(&self) -> Theme {
        self.theme.current()
    }

    fn prompt(&self) -> ColoredString {
        if self.dark.load(Ordering::Relaxed) {
            "you> ".bright_cyan().bold()
        } else {
            "you> ".blue().bold()
        }
    }

    fn render(&self, html: &str) -> String {
        if self.raw_html {
            html.to_string()
        } else {
            to_ansi(html)
        }
    }

    pub fn attach_image(&mut self, path: &Path) -> Result<()> {
        let bytes = std::fs::read(path)?;
        self.session.attach_image(&bytes, image_mime(path));
        debug!(path = %path.display(), bytes = bytes.len(), "image attached");
        Ok(())
    }

    /// Send `text`, play the reveal on stdout, and return the rendered reply.
    pub async fn send(&mut self, text: &str) -> Option<String> {
        let id = self.session.submit(&self.endpoint, text).await?;
        let animation = self.session.typing_for(&id)?;

        let mut stdout = io::stdout();
        print!("{}", BOT_PREFIX.bright_green().bold());
        let _ = stdout.flush();
        let mut shown = String::new();
        play(animation, self.interval, |frame| {
            if let Frame::Partial { latest, .. } = frame {
                shown.push(*latest);
                print!("{}", latest);
                let _ = io::stdout().flush();
            }
        })
        .await;

        let html = self.session.finish_typing(&id)?.to_string();
        let rendered = self.render(&html);
        print!(
            "{}",
            erase_sequence(&shown, BOT_PREFIX.len(), terminal_columns())
        );
        println!("{}{}", BOT_PREFIX.bright_green().bold(), rendered);
        self.last_reply = Some(id);
        Some(rendered)
    }

    fn copy(&self, command: &Command) -> Result<bool> {
        let Some(id) = self.last_reply.as_deref() else {
            return Ok(false);
        };
        let mut clipboard = Osc52Clipboard::new(io::stdout());
        match command {
            Command::CopyCode(n) => self.session.copy_code(id, *n, &mut clipboard),
            _ => self.session.copy_reply(id, &mut clipboard),
        }
    }

    /// Apply one command. Returns `false` when the loop should stop.
    pub async fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Empty => {}
            Command::Quit => return false,
            Command::Say(text) => {
                self.send(&text).await;
            }
            Command::NewChat => {
                self.session.open_menu();
                self.session.new_chat();
                self.last_reply = None;
                println!("{}", "  (new chat)".bright_black());
            }
            Command::ToggleTheme => {
                let theme = self.theme.toggle();
                println!("{}", format!("  theme: {}", theme).bright_black());
            }
            Command::CopyReply | Command::CopyCode(_) => match self.copy(&command) {
                Ok(true) => println!("{}", "  copied".bright_black()),
                Ok(false) => println!("{}", "  nothing to copy".yellow()),
                Err(e) => {
                    warn!(error = %e, "clipboard write failed");
                    println!("{}", format!("  copy failed: {}", e).red());
                }
            },
            Command::AttachImage(path) => match self.attach_image(&path) {
                Ok(()) => println!(
                    "{}",
                    format!("  attached {}", path.display()).bright_black()
                ),
                Err(e) => println!("{}", format!("  cannot attach image: {}", e).red()),
            },
            Command::Help => print_help(),
            Command::Unknown(line) => {
                println!("{}", format!("  unknown command: {} (try /help)", line).yellow())
            }
        }
        true
    }

    /// Read lines from stdin until EOF or `/quit`.
    pub async fn repl(&mut self) -> io::Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            print!("{}", self.prompt());
            io::stdout().flush()?;
            let Some(line) = lines.next_line().await? else {
                println!();
                break;
            };
            if !self.handle(parse_command(&line)).await {
                break;
            }
        }
        Ok(())
    }
}

fn print_help() {
    println!("{}", "  /new        start a new chat".bright_black());
    println!("{}", "  /theme      toggle light/dark".bright_black());
    println!("{}", "  /copy       copy the last reply".bright_black());
    println!("{}", "  /code [N]   copy code block N of the last reply".bright_black());
    println!("{}", "  /image PATH attach an image to the next message".bright_black());
    println!("{}", "  /quit       exit".bright_black());
}

/// Terminal front end: one-shot when `message` is given, interactive otherwise.
pub async fn run(
    config: &WidgetConfig,
    message: Option<&str>,
    image: Option<&Path>,
    raw_html: bool,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let client = AskClient::new(config.endpoint.clone(), config.request_timeout())?;
    let mut terminal = Terminal::new(client, config, raw_html);
    if let Some(path) = image {
        terminal.attach_image(path)?;
    }

    if let Some(message) = message {
        terminal.send(message).await;
        return Ok(());
    }

    println!("{}", "=".repeat(50).bright_blue());
    println!("{}: {}", "Endpoint".bright_yellow(), config.endpoint);
    println!("{}", "Type /help for commands.".bright_black());
    println!("{}", "=".repeat(50).bright_blue());
    terminal.repl().await?;
    Ok(())
}
