//! Widget host: serves the embedded chat page and forwards `/api/ask` to
//! the configured reply endpoint.
//!
//! Routes:
//! - `GET /` the chat page
//! - `POST /api/ask` `{message, image?}` → `{reply, html}`
//! - `POST /api/render` `{text}` → `{html}`
//! - `GET /api/highlight?lang=..&code=..` → tagged HTML fragment
//! - `POST /api/voice/permission` `{granted}` → stores the microphone memo
//! - `GET /static/<icon>.svg` theme icons
//!
//! Everything else is a 404.

use std::collections::HashMap;
use std::sync::Arc;

use colored::*;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::client::{AskClient, AskRequest, ReplyEndpoint};
use crate::config::WidgetConfig;
use crate::error::{Result, WidgetError};
use crate::highlight::highlight;
use crate::markdown::format_reply;
use crate::theme::{Theme, ThemeIcons};
use crate::voice::{
    is_embedded_browser, microphone_error_message, PermissionMemo, VoiceConfig,
    MICROPHONE_ERROR_NAMES, PERMISSION_DENIED_MESSAGE, UNAVAILABLE_MESSAGE,
};

const MAX_HEAD_BYTES: usize = 16 * 1024;
// Image attachments travel as data URLs inside the JSON body.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Embedded single-page chat widget. `__CONFIG__` is replaced with a JSON
/// object before serving.
pub const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width,initial-scale=1">
<title>Ask</title>
<style>
:root{--bg:#f6f7f9;--panel:#fff;--fg:#1d2330;--muted:#6b7280;--user:#dbeafe;--bot:#eef0f3;--border:#d6d9df;--accent:#2563eb}
body.dark-mode{--bg:#0f1115;--panel:#171a21;--fg:#e6e8ee;--muted:#8b93a3;--user:#1e3a8a;--bot:#222733;--border:#2c313c;--accent:#60a5fa}
*{box-sizing:border-box}
body{margin:0;font:15px/1.5 system-ui,sans-serif;background:var(--bg);color:var(--fg);display:flex;justify-content:center;min-height:100vh}
#app{width:min(760px,100%);display:flex;flex-direction:column;height:100vh;background:var(--panel);border-left:1px solid var(--border);border-right:1px solid var(--border)}
header{display:flex;align-items:center;gap:8px;padding:10px 14px;border-bottom:1px solid var(--border)}
header h1{font-size:16px;margin:0;flex:1}
button{background:none;border:1px solid var(--border);color:var(--fg);border-radius:6px;padding:4px 10px;cursor:pointer}
button img{width:18px;height:18px;vertical-align:middle}
#chatBox{flex:1;overflow-y:auto;padding:14px;display:flex;flex-direction:column;gap:10px}
.message{max-width:85%;padding:8px 12px;border-radius:10px;white-space:pre-wrap;word-wrap:break-word}
.message.user{align-self:flex-end;background:var(--user)}
.message.bot{align-self:flex-start;background:var(--bot)}
.message .copy{float:right;font-size:11px;padding:0 6px;margin-left:8px;opacity:.6}
pre{background:rgba(0,0,0,.06);padding:8px;border-radius:6px;overflow-x:auto;white-space:pre}
body.dark-mode pre{background:rgba(255,255,255,.05)}
code{font-family:ui-monospace,Menlo,Consolas,monospace;font-size:13px}
.hl-keyword{color:#7c3aed;font-weight:600}
.hl-string{color:#059669}
.hl-comment{color:var(--muted);font-style:italic}
.hl-function{color:#2563eb}
.hl-number{color:#d97706}
.hl-preprocessor{color:#db2777}
.hl-tag{color:#dc2626}
.hl-attribute{color:#0891b2}
form{display:flex;gap:8px;padding:10px 14px;border-top:1px solid var(--border)}
#userInput{flex:1;padding:8px 10px;border:1px solid var(--border);border-radius:6px;background:var(--panel);color:var(--fg)}
#imageName{font-size:12px;color:var(--muted);align-self:center}
#micBtn.listening{background:var(--accent);color:#fff}
#voiceStatus{font-size:12px;color:var(--muted);padding:0 14px 8px;min-height:1em}
#mainMenuPopup{display:none;position:fixed;inset:0;background:rgba(0,0,0,.4)}
#mainMenuPopup .card{background:var(--panel);margin:20vh auto;width:260px;padding:16px;border-radius:10px;display:flex;flex-direction:column;gap:8px}
</style>
</head>
<body>
<div id="app">
  <header>
    <button id="mainMenuBtn" title="Menu"><img id="menuIcon" alt="&#9776;"></button>
    <h1>Ask</h1>
    <button id="themeToggle" title="Toggle theme"><img id="themeIcon" alt="theme"></button>
  </header>
  <div id="chatBox"></div>
  <form id="askForm">
    <input id="userInput" autocomplete="off" placeholder="Type a message...">
    <label><button type="button" id="imageBtn" title="Attach image">&#128247;</button>
      <input type="file" id="imageInput" accept="image/*" hidden></label>
    <span id="imageName"></span>
    <button type="button" id="micBtn" title="Voice input">&#127908;</button>
    <button type="submit" id="sendBtn" title="Send"><img id="sendIcon" alt="Send"></button>
  </form>
  <div id="voiceStatus"></div>
</div>
<div id="mainMenuPopup">
  <div class="card">
    <button id="newChatBtn">New chat</button>
    <button id="continueChatBtn">Continue chat</button>
    <button id="closePopupBtn">Close</button>
  </div>
</div>
<script>
const CFG = __CONFIG__;
const $ = s => document.querySelector(s);
const chatBox = $('#chatBox');
let currentImage = null;
let theme = CFG.theme;

function applyTheme() {
  document.body.classList.toggle('dark-mode', theme === 'dark');
  const icons = CFG.icons[theme];
  $('#themeIcon').src = icons.toggle;
  $('#sendIcon').src = icons.send;
  $('#menuIcon').src = icons.menu;
}
$('#themeToggle').onclick = () => { theme = theme === 'dark' ? 'light' : 'dark'; applyTheme(); };
applyTheme();

function escapeHtml(s) {
  return s.replace(/&/g,'&amp;').replace(/</g,'&lt;').replace(/>/g,'&gt;').replace(/"/g,'&quot;').replace(/'/g,'&#39;');
}

function append(sender) {
  const div = document.createElement('div');
  div.className = 'message ' + sender;
  chatBox.appendChild(div);
  return div;
}

function scrollDown() { chatBox.scrollTop = chatBox.scrollHeight; }

function addCopy(div, raw) {
  const btn = document.createElement('button');
  btn.className = 'copy';
  btn.textContent = 'copy';
  btn.onclick = () => navigator.clipboard && navigator.clipboard.writeText(raw);
  div.prepend(btn);
}

function reveal(div, raw, html) {
  const chars = Array.from(raw);
  if (CFG.typingMs <= 0 || chars.length === 0) {
    div.innerHTML = html; addCopy(div, raw); scrollDown(); return;
  }
  let i = 0;
  const timer = setInterval(() => {
    i += 1;
    div.textContent = chars.slice(0, i).join('');
    scrollDown();
    if (i >= chars.length) {
      clearInterval(timer);
      div.innerHTML = html;
      addCopy(div, raw);
      scrollDown();
    }
  }, CFG.typingMs);
}

$('#imageBtn').onclick = () => $('#imageInput').click();
$('#imageInput').onchange = e => {
  const file = e.target.files[0];
  if (!file) return;
  const reader = new FileReader();
  reader.onload = () => { currentImage = reader.result; $('#imageName').textContent = file.name; };
  reader.readAsDataURL(file);
};

$('#askForm').onsubmit = async e => {
  e.preventDefault();
  const input = $('#userInput');
  const text = input.value.trim();
  if (!text) return;
  append('user').innerHTML = escapeHtml(text);
  input.value = '';
  scrollDown();
  const body = { message: text };
  if (currentImage) body.image = currentImage;
  currentImage = null;
  $('#imageName').textContent = '';
  let data;
  try {
    const res = await fetch('/api/ask', { method: 'POST', headers: { 'Content-Type': 'application/json' }, body: JSON.stringify(body) });
    data = await res.json();
    if (typeof data.reply !== 'string') throw new Error(data.error || 'bad reply');
  } catch (err) {
    data = { reply: CFG.fallback, html: escapeHtml(CFG.fallback) };
  }
  reveal(append('bot'), data.reply, data.html);
};

const popup = $('#mainMenuPopup');
$('#mainMenuBtn').onclick = () => { popup.style.display = 'block'; };
$('#closePopupBtn').onclick = () => { popup.style.display = 'none'; };
$('#continueChatBtn').onclick = () => { popup.style.display = 'none'; };
$('#newChatBtn').onclick = () => { chatBox.innerHTML = ''; popup.style.display = 'none'; };

// Voice input. A stop bumps the generation so pending restarts are dropped.
const V = CFG.voice;
const Recognition = window.SpeechRecognition || window.webkitSpeechRecognition;
const voice = { active: false, generation: 0, pending: false, retried: false, recognizer: null };
const micBtn = $('#micBtn');

function voiceStatus(text) { $('#voiceStatus').textContent = text || ''; }

function micRemembered() {
  if (!V.embedded) return false;
  try { if (localStorage.getItem('micPermissionGranted') === 'true') return true; } catch (_) {}
  return V.remembered;
}

function rememberMic(granted) {
  if (!V.embedded) return;
  try { localStorage.setItem('micPermissionGranted', String(granted)); } catch (_) {}
  fetch('/api/voice/permission', { method: 'POST', headers: { 'Content-Type': 'application/json' }, body: JSON.stringify({ granted }) }).catch(() => {});
}

function stopVoice(message) {
  voice.active = false;
  voice.generation += 1;
  voice.pending = false;
  micBtn.classList.remove('listening');
  if (voice.recognizer) { try { voice.recognizer.abort(); } catch (_) {} }
  voiceStatus(message);
}

function restartVoice(delay) {
  const ticket = voice.generation;
  voice.pending = true;
  setTimeout(() => {
    if (!voice.active || voice.generation !== ticket || !voice.pending) return;
    voice.pending = false;
    try { voice.recognizer.start(); } catch (_) { stopVoice(V.unavailable); }
  }, delay);
}

function buildRecognizer() {
  const r = new Recognition();
  r.lang = V.locale;
  r.continuous = V.continuous;
  r.interimResults = V.interimResults;
  r.onstart = () => voiceStatus('Listening...');
  r.onresult = e => {
    if (!voice.active) return;
    let text = '';
    for (let i = e.resultIndex; i < e.results.length; i++) {
      text += e.results[i][0].transcript;
      if (e.results[i].isFinal) voice.retried = false;
    }
    $('#userInput').value = text.trim();
  };
  r.onerror = e => {
    if (!voice.active) return;
    switch (e.error) {
      case 'no-speech':
        restartVoice(V.noSpeechRestart);
        break;
      case 'not-allowed':
      case 'service-not-allowed':
        rememberMic(false);
        stopVoice(V.permissionDenied);
        break;
      case 'aborted':
      case 'network':
        if (voice.retried) { stopVoice(V.unavailable); break; }
        voice.retried = true;
        restartVoice(V.transientRestart);
        break;
      default:
        stopVoice('Speech recognition error: ' + e.error);
    }
  };
  r.onend = () => {
    if (!voice.active || voice.pending) return;
    if (V.continuous) restartVoice(0);
    else stopVoice('');
  };
  return r;
}

async function startVoice() {
  if (!Recognition) { voiceStatus(V.unavailable); return; }
  if (!micRemembered() && navigator.mediaDevices && navigator.mediaDevices.getUserMedia) {
    try {
      const stream = await navigator.mediaDevices.getUserMedia({ audio: true });
      stream.getTracks().forEach(t => t.stop());
      rememberMic(true);
    } catch (err) {
      voiceStatus(V.micErrors[err && err.name] || V.micErrors['default']);
      return;
    }
  }
  voice.recognizer = voice.recognizer || buildRecognizer();
  voice.active = true;
  voice.pending = false;
  voice.retried = false;
  voice.generation += 1;
  micBtn.classList.add('listening');
  try { voice.recognizer.start(); } catch (_) { stopVoice(V.unavailable); }
}

micBtn.onclick = () => voice.active ? stopVoice('') : startVoice();
</script>
</body>
</html>"##;

/// Values the page script reads at load.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PageConfig<'a> {
    typing_ms: u64,
    theme: Theme,
    fallback: &'a str,
    icons: HashMap<Theme, ThemeIcons>,
    voice: PageVoice<'a>,
}

/// Recognizer settings and messages for the page's voice controller. The
/// page follows the same restart rules as [`crate::voice::VoiceSession`].
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PageVoice<'a> {
    locale: &'a str,
    continuous: bool,
    interim_results: bool,
    no_speech_restart: u64,
    transient_restart: u64,
    /// Requesting browser is an in-app one that re-prompts every visit.
    embedded: bool,
    /// Host-side permission memo says the microphone was granted.
    remembered: bool,
    permission_denied: &'static str,
    unavailable: &'static str,
    mic_errors: HashMap<&'static str, &'static str>,
}

/// Icon assets served under `/static/`.
const STATIC_ASSETS: &[(&str, &str)] = &[
    ("/static/Sun.svg", include_str!("../static/Sun.svg")),
    ("/static/Moon.svg", include_str!("../static/Moon.svg")),
    ("/static/sendlight.svg", include_str!("../static/sendlight.svg")),
    ("/static/senddark.svg", include_str!("../static/senddark.svg")),
    ("/static/Menulight.svg", include_str!("../static/Menulight.svg")),
    ("/static/Menudark.svg", include_str!("../static/Menudark.svg")),
];

/// Shared state for every connection.
#[derive(Debug)]
pub struct HostState<E> {
    endpoint: E,
    fallback: String,
    theme: Theme,
    typing_interval_ms: u64,
    voice: VoiceConfig,
    memo: Option<PermissionMemo>,
}

impl<E: ReplyEndpoint> HostState<E> {
    pub fn new(endpoint: E, config: &WidgetConfig) -> Self {
        Self {
            endpoint,
            fallback: config.fallback_message.clone(),
            theme: config.theme,
            typing_interval_ms: config.typing_interval_ms,
            voice: config.voice.clone(),
            memo: config.memo(),
        }
    }

    /// The chat page with this host's settings filled in for a browser
    /// identifying itself as `user_agent`.
    pub fn index_page(&self, user_agent: &str) -> String {
        let icons = [Theme::Light, Theme::Dark]
            .into_iter()
            .map(|t| (t, t.icons()))
            .collect();
        let mut mic_errors: HashMap<&'static str, &'static str> = MICROPHONE_ERROR_NAMES
            .iter()
            .map(|name| (*name, microphone_error_message(name)))
            .collect();
        mic_errors.insert("default", microphone_error_message(""));
        let embedded = is_embedded_browser(user_agent);
        let config = PageConfig {
            typing_ms: self.typing_interval_ms,
            theme: self.theme,
            fallback: &self.fallback,
            icons,
            voice: PageVoice {
                locale: &self.voice.locale,
                continuous: self.voice.continuous,
                interim_results: self.voice.interim_results,
                no_speech_restart: self.voice.no_speech_restart.as_millis() as u64,
                transient_restart: self.voice.transient_restart.as_millis() as u64,
                embedded,
                remembered: embedded && self.memo.as_ref().is_some_and(|m| m.granted()),
                permission_denied: PERMISSION_DENIED_MESSAGE,
                unavailable: UNAVAILABLE_MESSAGE,
                mic_errors,
            },
        };
        let json = serde_json::to_string(&config)
            .unwrap_or_else(|_| "{}".to_string())
            .replace("</", "<\\/");
        INDEX_HTML.replace("__CONFIG__", &json)
    }
}

// ---------------------------------------------------------------------------
// Request / response plumbing
// ---------------------------------------------------------------------------

/// A parsed inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub user_agent: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Response {
    fn html(body: String) -> Self {
        Self {
            status: 200,
            content_type: "text/html; charset=utf-8",
            body,
        }
    }

    fn svg(body: &str) -> Self {
        Self {
            status: 200,
            content_type: "image/svg+xml",
            body: body.to_string(),
        }
    }

    fn json<T: Serialize>(value: &T) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self {
                status: 200,
                content_type: "application/json",
                body,
            },
            Err(e) => Self::error(500, &e.to_string()),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: serde_json::json!({ "error": message }).to_string(),
        }
    }

    fn not_found() -> Self {
        Self::error(404, "not found")
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            404 => "Not Found",
            413 => "Payload Too Large",
            _ => "Internal Server Error",
        }
    }

    /// Full HTTP/1.1 response bytes.
    pub fn to_http(&self) -> Vec<u8> {
        format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            self.reason(),
            self.content_type,
            self.body.len(),
            self.body,
        )
        .into_bytes()
    }
}

/// Simple percent-decoding for URL query parameters.
pub fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        out.push(byte);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse query string into key-value pairs.
pub fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?;
            let val = parts.next().unwrap_or("");
            Some((url_decode(key), url_decode(val)))
        })
        .collect()
}

struct RequestHead {
    method: String,
    target: String,
    user_agent: Option<String>,
    header_len: usize,
    content_length: usize,
}

fn parse_head(buf: &[u8]) -> Result<Option<RequestHead>> {
    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut req = httparse::Request::new(&mut headers);
    let status = req
        .parse(buf)
        .map_err(|e| WidgetError::BadRequest(e.to_string()))?;
    let httparse::Status::Complete(header_len) = status else {
        return Ok(None);
    };
    let content_length = req
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("content-length"))
        .map(|h| {
            std::str::from_utf8(h.value)
                .ok()
                .and_then(|v| v.trim().parse::<usize>().ok())
                .ok_or_else(|| WidgetError::BadRequest("invalid Content-Length".to_string()))
        })
        .transpose()?
        .unwrap_or(0);
    let user_agent = req
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("user-agent"))
        .map(|h| String::from_utf8_lossy(h.value).into_owned());
    Ok(Some(RequestHead {
        method: req.method.unwrap_or("GET").to_string(),
        target: req.path.unwrap_or("/").to_string(),
        user_agent,
        header_len,
        content_length,
    }))
}

/// Read one request (head plus `Content-Length` body) from `stream`.
pub async fn read_request<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Request> {
    let mut buf = Vec::with_capacity(8192);
    let mut chunk = [0u8; 8192];

    let head = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(WidgetError::BadRequest(
                "connection closed before request head".to_string(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(head) = parse_head(&buf)? {
            break head;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(WidgetError::BadRequest("request head too large".to_string()));
        }
    };

    if head.content_length > MAX_BODY_BYTES {
        return Err(WidgetError::BadRequest("request body too large".to_string()));
    }
    let total = head.header_len + head.content_length;
    while buf.len() < total {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(WidgetError::BadRequest("truncated request body".to_string()));
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let (path, query) = match head.target.split_once('?') {
        Some((path, query)) => (path.to_string(), parse_query(query)),
        None => (head.target.clone(), HashMap::new()),
    };
    Ok(Request {
        method: head.method,
        path,
        query,
        user_agent: head.user_agent,
        body: buf[head.header_len..total].to_vec(),
    })
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

/// Body returned by the host's `/api/ask`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostReply {
    pub reply: String,
    pub html: String,
}

#[derive(Debug, Deserialize)]
struct RenderRequest {
    text: String,
}

#[derive(Debug, Serialize)]
struct RenderResponse {
    html: String,
}

#[derive(Debug, Deserialize)]
struct PermissionUpdate {
    granted: bool,
}

#[derive(Debug, Serialize)]
struct PermissionStored {
    stored: bool,
}

/// Dispatch one request.
pub async fn route<E: ReplyEndpoint>(state: &HostState<E>, request: &Request) -> Response {
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") => {
            Response::html(state.index_page(request.user_agent.as_deref().unwrap_or("")))
        }
        ("POST", "/api/ask") => ask(state, &request.body).await,
        ("POST", "/api/render") => match serde_json::from_slice::<RenderRequest>(&request.body) {
            Ok(r) => Response::json(&RenderResponse {
                html: format_reply(&r.text),
            }),
            Err(e) => Response::error(400, &e.to_string()),
        },
        ("GET", "/api/highlight") => {
            let lang = request.query.get("lang").map(String::as_str).unwrap_or("");
            let code = request.query.get("code").map(String::as_str).unwrap_or("");
            Response::html(highlight(code, lang))
        }
        ("POST", "/api/voice/permission") => remember_permission(state, &request.body),
        ("GET", path) if path.starts_with("/static/") => STATIC_ASSETS
            .iter()
            .find(|(name, _)| *name == path)
            .map_or_else(Response::not_found, |(_, body)| Response::svg(body)),
        _ => Response::not_found(),
    }
}

/// Record the page's microphone-permission outcome in the host memo, when
/// one is configured.
fn remember_permission<E>(state: &HostState<E>, body: &[u8]) -> Response {
    let update: PermissionUpdate = match serde_json::from_slice(body) {
        Ok(u) => u,
        Err(e) => return Response::error(400, &e.to_string()),
    };
    let Some(memo) = &state.memo else {
        return Response::json(&PermissionStored { stored: false });
    };
    match memo.remember(update.granted) {
        Ok(()) => {
            debug!(granted = update.granted, path = %memo.path().display(), "permission memo updated");
            Response::json(&PermissionStored { stored: true })
        }
        Err(e) => {
            warn!(error = %e, "permission memo write failed");
            Response::error(500, &e.to_string())
        }
    }
}

async fn ask<E: ReplyEndpoint>(state: &HostState<E>, body: &[u8]) -> Response {
    let request: AskRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return Response::error(400, &e.to_string()),
    };
    if request.message.trim().is_empty() {
        return Response::error(400, "empty message");
    }
    let reply = match state.endpoint.ask(&request).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(error = %e, "upstream reply failed; returning fallback");
            state.fallback.clone()
        }
    };
    let html = format_reply(&reply);
    Response::json(&HostReply { reply, html })
}

async fn handle_connection<E: ReplyEndpoint>(
    mut stream: tokio::net::TcpStream,
    state: Arc<HostState<E>>,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let response = match read_request(&mut stream).await {
        Ok(request) => {
            debug!(method = %request.method, path = %request.path, "request");
            route(&state, &request).await
        }
        Err(WidgetError::BadRequest(msg)) if msg.contains("too large") => {
            Response::error(413, &msg)
        }
        Err(WidgetError::BadRequest(msg)) => Response::error(400, &msg),
        Err(e) => return Err(Box::new(e)),
    };
    stream.write_all(&response.to_http()).await?;
    stream.flush().await?;
    Ok(())
}

/// Accept connections on `listener` until the process exits.
pub async fn run<E>(listener: TcpListener, state: Arc<HostState<E>>) -> std::io::Result<()>
where
    E: ReplyEndpoint + Send + Sync + 'static,
{
    loop {
        let (stream, peer) = listener.accept().await?;
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                debug!(peer = %peer, error = %e, "connection error");
            }
        });
    }
}

fn open_browser(url: &str) {
    #[cfg(target_os = "windows")]
    {
        let _ = std::process::Command::new("cmd")
            .args(["/C", &format!("start {}", url)])
            .spawn();
    }
    #[cfg(target_os = "macos")]
    {
        let _ = std::process::Command::new("open").arg(url).spawn();
    }
    #[cfg(target_os = "linux")]
    {
        let _ = std::process::Command::new("xdg-open").arg(url).spawn();
    }
}

/// Start the widget host and open the browser.
pub async fn serve(config: &WidgetConfig) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", config.port)).await?;
    let client = AskClient::new(config.endpoint.clone(), config.request_timeout())?;
    let url = format!("http://localhost:{}", config.port);

    eprintln!("{}", format!("  Widget running at {}", url).bright_green());
    eprintln!(
        "{}",
        format!("  Forwarding /api/ask to {}", config.endpoint).bright_blue()
    );
    eprintln!("{}", "  Press Ctrl+C to stop.".bright_blue());
    info!(port = config.port, endpoint = %config.endpoint, "widget host started");

    open_browser(&url);

    let state = Arc::new(HostState::new(client, config));
    run(listener, state).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    struct Fixed(Option<&'static str>);

    impl ReplyEndpoint for Fixed {
        async fn ask(&self, _request: &AskRequest) -> Result<String> {
            self.0.map(str::to_string).ok_or(WidgetError::Status(502))
        }
    }

    fn state(reply: Option<&'static str>) -> HostState<Fixed> {
        HostState::new(Fixed(reply), &WidgetConfig::default())
    }

    fn request(method: &str, path: &str, body: &str) -> Request {
        Request {
            method: method.to_string(),
            path: path.to_string(),
            query: HashMap::new(),
            user_agent: None,
            body: body.as_bytes().to_vec(),
        }
    }

    fn state_with_memo(path: &std::path::Path) -> HostState<Fixed> {
        let config = WidgetConfig {
            permission_memo: Some(path.to_path_buf()),
            ..WidgetConfig::default()
        };
        HostState::new(Fixed(None), &config)
    }

    /// The JSON object substituted into the page.
    fn page_config(page: &str) -> serde_json::Value {
        let start = page.find("const CFG = ").unwrap() + "const CFG = ".len();
        let end = start + page[start..].find(";\n").unwrap();
        serde_json::from_str(&page[start..end]).unwrap()
    }

    // -- url_decode / parse_query tests --

    #[rstest]
    #[case("hello+world", "hello world")]
    #[case("a%20b", "a b")]
    #[case("%3Cdiv%3E", "<div>")]
    #[case("caf%C3%A9", "café")]
    #[case("100%", "100%")]
    #[case("%zz", "%zz")]
    #[case("plain", "plain")]
    fn test_url_decode(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(url_decode(input), expected);
    }

    #[test]
    fn test_parse_query() {
        let q = parse_query("lang=js&code=let+x+%3D+1%3B&empty=");
        assert_eq!(q.get("lang").map(String::as_str), Some("js"));
        assert_eq!(q.get("code").map(String::as_str), Some("let x = 1;"));
        assert_eq!(q.get("empty").map(String::as_str), Some(""));
    }

    #[test]
    fn test_parse_query_empty() {
        assert!(parse_query("").is_empty());
    }

    // -- request parsing tests --

    #[tokio::test]
    async fn test_read_request_with_body() {
        let raw = b"POST /api/render?x=1 HTTP/1.1\r\nHost: a\r\nContent-Length: 12\r\n\r\n{\"text\":\"a\"}";
        let mut input = &raw[..];
        let req = read_request(&mut input).await.unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/api/render");
        assert_eq!(req.query.get("x").map(String::as_str), Some("1"));
        assert_eq!(req.body, b"{\"text\":\"a\"}");
    }

    #[tokio::test]
    async fn test_read_request_split_across_reads() {
        let (mut client, mut server) = tokio::io::duplex(16);
        let writer = tokio::spawn(async move {
            client
                .write_all(b"GET /api/highlight?lang=py&code=pass HTTP/1.1\r\nHost: x\r\n\r\n")
                .await
                .unwrap();
        });
        let req = read_request(&mut server).await.unwrap();
        writer.await.unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.query.get("code").map(String::as_str), Some("pass"));
        assert!(req.body.is_empty());
    }

    #[tokio::test]
    async fn test_read_request_truncated_body() {
        let raw = b"POST /api/ask HTTP/1.1\r\nContent-Length: 50\r\n\r\n{}";
        let mut input = &raw[..];
        let err = read_request(&mut input).await.unwrap_err();
        assert!(matches!(err, WidgetError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_read_request_user_agent() {
        let raw = b"GET / HTTP/1.1\r\nUser-Agent: Mozilla/5.0 Instagram 300.0\r\n\r\n";
        let mut input = &raw[..];
        let req = read_request(&mut input).await.unwrap();
        assert_eq!(req.user_agent.as_deref(), Some("Mozilla/5.0 Instagram 300.0"));
    }

    #[tokio::test]
    async fn test_read_request_bad_content_length() {
        let raw = b"POST /api/ask HTTP/1.1\r\nContent-Length: lots\r\n\r\n";
        let mut input = &raw[..];
        assert!(read_request(&mut input).await.is_err());
    }

    // -- route tests --

    #[tokio::test]
    async fn test_index_page_has_config() {
        let resp = route(&state(Some("x")), &request("GET", "/", "")).await;
        assert_eq!(resp.status, 200);
        assert!(resp.content_type.starts_with("text/html"));
        assert!(!resp.body.contains("__CONFIG__"));
        assert!(resp.body.contains("\"typingMs\":25"));
        assert!(resp.body.contains("/static/Moon.svg"));
    }

    #[test]
    fn test_index_page_voice_settings() {
        let config = WidgetConfig::from_toml_str(
            "[voice]\nlocale = \"en-GB\"\ncontinuous = true\nno_speech_restart = 450\n",
        )
        .unwrap();
        let host = HostState::new(Fixed(None), &config);
        let cfg = page_config(&host.index_page("Mozilla/5.0 (X11; Linux x86_64) Firefox/128.0"));
        let voice = &cfg["voice"];
        assert_eq!(voice["locale"], "en-GB");
        assert_eq!(voice["continuous"], true);
        assert_eq!(voice["interimResults"], false);
        assert_eq!(voice["noSpeechRestart"], 450);
        assert_eq!(voice["transientRestart"], 1000);
        assert_eq!(voice["embedded"], false);
        assert_eq!(voice["remembered"], false);
        assert_eq!(voice["permissionDenied"], PERMISSION_DENIED_MESSAGE);
        assert_eq!(voice["unavailable"], UNAVAILABLE_MESSAGE);
        assert_eq!(
            voice["micErrors"]["NotFoundError"],
            microphone_error_message("NotFoundError")
        );
        assert_eq!(voice["micErrors"]["default"], "Could not access the microphone.");
    }

    #[test]
    fn test_index_page_has_voice_controls() {
        let page = state(None).index_page("");
        assert!(page.contains("id=\"micBtn\""));
        assert!(page.contains("/api/voice/permission"));
        assert!(page.contains("micPermissionGranted"));
    }

    #[tokio::test]
    async fn test_embedded_browser_sees_remembered_permission() {
        let dir = tempfile::tempdir().unwrap();
        let memo_path = dir.path().join("mic.json");
        let host = state_with_memo(&memo_path);
        let ua = "Mozilla/5.0 (Linux; Android 14; wv) AppleWebKit/537.36 Instagram 300.0";

        let mut req = request("GET", "/", "");
        req.user_agent = Some(ua.to_string());
        let before = page_config(&route(&host, &req).await.body);
        assert_eq!(before["voice"]["embedded"], true);
        assert_eq!(before["voice"]["remembered"], false);

        let stored = route(
            &host,
            &request("POST", "/api/voice/permission", r#"{"granted":true}"#),
        )
        .await;
        assert_eq!(stored.status, 200);
        assert_eq!(stored.body, r#"{"stored":true}"#);
        assert!(PermissionMemo::new(&memo_path).granted());

        let after = page_config(&route(&host, &req).await.body);
        assert_eq!(after["voice"]["remembered"], true);

        // Regular browsers always go through the prompt.
        let desktop = page_config(&host.index_page("Mozilla/5.0 (Windows NT 10.0) Chrome/126.0"));
        assert_eq!(desktop["voice"]["remembered"], false);
    }

    #[tokio::test]
    async fn test_permission_route_without_memo() {
        let resp = route(
            &state(None),
            &request("POST", "/api/voice/permission", r#"{"granted":true}"#),
        )
        .await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, r#"{"stored":false}"#);
        let bad = route(&state(None), &request("POST", "/api/voice/permission", "{}")).await;
        assert_eq!(bad.status, 400);
    }

    #[rstest]
    #[case("/static/Sun.svg")]
    #[case("/static/Moon.svg")]
    #[case("/static/sendlight.svg")]
    #[case("/static/senddark.svg")]
    #[case("/static/Menulight.svg")]
    #[case("/static/Menudark.svg")]
    #[tokio::test]
    async fn test_static_icons_served(#[case] path: &str) {
        let resp = route(&state(None), &request("GET", path, "")).await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.content_type, "image/svg+xml");
        assert!(resp.body.starts_with("<svg"));
    }

    #[test]
    fn test_every_theme_icon_is_served() {
        for theme in [Theme::Light, Theme::Dark] {
            let icons = theme.icons();
            for path in [icons.toggle, icons.send, icons.menu] {
                assert!(
                    STATIC_ASSETS.iter().any(|(name, _)| *name == path),
                    "{path} has no asset"
                );
            }
        }
    }

    #[tokio::test]
    async fn test_ask_returns_reply_and_html() {
        let resp = route(
            &state(Some("**hi**")),
            &request("POST", "/api/ask", r#"{"message":"hello"}"#),
        )
        .await;
        assert_eq!(resp.status, 200);
        let body: HostReply = serde_json::from_str(&resp.body).unwrap();
        assert_eq!(body.reply, "**hi**");
        assert_eq!(body.html, "<b>hi</b>");
    }

    #[tokio::test]
    async fn test_ask_upstream_failure_returns_fallback() {
        let resp = route(&state(None), &request("POST", "/api/ask", r#"{"message":"hello"}"#)).await;
        assert_eq!(resp.status, 200);
        let body: HostReply = serde_json::from_str(&resp.body).unwrap();
        assert_eq!(body.reply, crate::chat::FALLBACK_REPLY);
    }

    #[rstest]
    #[case("not json")]
    #[case(r#"{"message":"   "}"#)]
    #[tokio::test]
    async fn test_ask_bad_request(#[case] body: &str) {
        let resp = route(&state(Some("x")), &request("POST", "/api/ask", body)).await;
        assert_eq!(resp.status, 400);
    }

    #[tokio::test]
    async fn test_render_route() {
        let resp = route(
            &state(None),
            &request("POST", "/api/render", r#"{"text":"__u__ <x>"}"#),
        )
        .await;
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, r#"{"html":"<u>u</u> &lt;x&gt;"}"#);
    }

    #[tokio::test]
    async fn test_highlight_route() {
        let mut req = request("GET", "/api/highlight", "");
        req.query = parse_query("lang=js&code=return");
        let resp = route(&state(None), &req).await;
        assert_eq!(resp.body, "<span class=\"hl-keyword\">return</span>");
    }

    #[rstest]
    #[case("GET", "/nope")]
    #[case("GET", "/api/ask")]
    #[case("DELETE", "/")]
    #[case("GET", "/static/missing.svg")]
    #[case("GET", "/static/../Cargo.toml")]
    #[tokio::test]
    async fn test_unknown_routes_404(#[case] method: &str, #[case] path: &str) {
        let resp = route(&state(None), &request(method, path, "")).await;
        assert_eq!(resp.status, 404);
    }

    #[test]
    fn test_response_bytes() {
        let http = String::from_utf8(Response::not_found().to_http()).unwrap();
        assert!(http.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(http.contains("Content-Length: 21\r\n"));
        assert!(http.ends_with("{\"error\":\"not found\"}"));
    }
}
