//! End-to-end tests: a fake reply backend on a local socket, driven through
//! `AskClient`, `ChatSession`, and the widget host.

use std::sync::Arc;
use std::time::Duration;

use ask_widget::chat::{ChatSession, Sender, FALLBACK_REPLY};
use ask_widget::client::{AskClient, AskRequest, ReplyEndpoint};
use ask_widget::config::WidgetConfig;
use ask_widget::error::WidgetError;
use ask_widget::typing::{play, Frame};
use ask_widget::web::{self, HostReply, HostState};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

// -- Helpers ----------------------------------------------------------------

/// Serve every connection with the same status and JSON body. Returns the
/// endpoint URL.
async fn fake_backend(status: u16, body: &'static str) -> String {
    serve_backend(status, body, None).await
}

/// Like [`fake_backend`], but also hands over each request body in arrival
/// order.
async fn recording_backend(
    status: u16,
    body: &'static str,
) -> (String, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (serve_backend(status, body, Some(tx)).await, rx)
}

async fn serve_backend(
    status: u16,
    body: &'static str,
    bodies: Option<mpsc::UnboundedSender<String>>,
) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let bodies = bodies.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 65536];
                let mut seen = Vec::new();
                // Read until the JSON body's closing brace arrives.
                loop {
                    let n = stream.read(&mut buf).await.unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    seen.extend_from_slice(&buf[..n]);
                    if seen.ends_with(b"}") {
                        break;
                    }
                }
                if let Some(tx) = bodies {
                    let text = String::from_utf8_lossy(&seen);
                    let request_body = text.split_once("\r\n\r\n").map_or("", |(_, b)| b);
                    let _ = tx.send(request_body.to_string());
                }
                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes()).await;
            });
        }
    });
    format!("http://{}/api/ask", addr)
}

fn client(endpoint: String) -> AskClient {
    AskClient::new(endpoint, Some(Duration::from_secs(5))).unwrap()
}

// -- AskClient tests ----------------------------------------------------------

#[tokio::test]
async fn test_client_decodes_reply() {
    let url = fake_backend(200, r#"{"reply":"**hi**"}"#).await;
    let reply = client(url).ask(&AskRequest::text("hello")).await.unwrap();
    assert_eq!(reply, "**hi**");
}

#[tokio::test]
async fn test_client_error_status() {
    let url = fake_backend(500, r#"{"reply":"Error occurred: boom"}"#).await;
    let err = client(url).ask(&AskRequest::text("hello")).await.unwrap_err();
    assert!(matches!(err, WidgetError::Status(500)));
}

#[tokio::test]
async fn test_client_malformed_body() {
    let url = fake_backend(200, r#"{"answer":"x"}"#).await;
    let err = client(url).ask(&AskRequest::text("hello")).await.unwrap_err();
    assert!(matches!(err, WidgetError::Decode(_)));
}

// -- ChatSession end to end ---------------------------------------------------

#[tokio::test]
async fn test_submit_then_typing_renders_bold() {
    let url = fake_backend(200, r#"{"reply":"**hi**"}"#).await;
    let endpoint = client(url);
    let mut session = ChatSession::new();

    let id = session.submit(&endpoint, "hello").await.unwrap();
    let messages = session.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].sender, Sender::User);
    assert_eq!(messages[0].text, "hello");
    assert_eq!(messages[1].sender, Sender::Bot);
    assert!(messages[1].rendered.is_none());

    let mut partials = 0;
    let html = play(
        session.typing_for(&id).unwrap(),
        Duration::ZERO,
        |frame| {
            if let Frame::Partial { shown, .. } = frame {
                partials += 1;
                assert!(!shown.contains("<b>"));
            }
        },
    )
    .await;
    assert_eq!(partials, "**hi**".chars().count());
    assert_eq!(html, "<b>hi</b>");
    assert_eq!(session.finish_typing(&id), Some("<b>hi</b>"));
}

#[tokio::test]
async fn test_unreachable_endpoint_appends_fallback() {
    // Port 9 (discard) is closed on test machines; the connect fails fast.
    let endpoint = client("http://127.0.0.1:9/api/ask".to_string());
    let mut session = ChatSession::new();
    let id = session.submit(&endpoint, "hello").await.unwrap();
    let bot = session.message(&id).unwrap();
    assert_eq!(bot.sender, Sender::Bot);
    assert_eq!(bot.text, FALLBACK_REPLY);
}

#[tokio::test]
async fn test_server_error_appends_fallback() {
    let url = fake_backend(500, r#"{"reply":"Error occurred"}"#).await;
    let mut session = ChatSession::new();
    let id = session.submit(&client(url), "hello").await.unwrap();
    assert_eq!(session.message(&id).unwrap().text, FALLBACK_REPLY);
}

#[tokio::test]
async fn test_empty_input_sends_nothing() {
    let endpoint = client("http://127.0.0.1:9/api/ask".to_string());
    let mut session = ChatSession::new();
    assert!(session.submit(&endpoint, "   \n").await.is_none());
    assert!(session.messages().is_empty());
}

#[tokio::test]
async fn test_image_is_sent_once() {
    let (url, mut bodies) = recording_backend(200, r#"{"reply":"a cat"}"#).await;
    let endpoint = client(url);
    let mut session = ChatSession::new();
    session.attach_image(b"\x89PNG", "image/png");
    session.submit(&endpoint, "what is this?").await.unwrap();
    assert!(session.current_image().is_none());

    let first: serde_json::Value = serde_json::from_str(&bodies.recv().await.unwrap()).unwrap();
    assert_eq!(first["message"], "what is this?");
    assert_eq!(first["image"], "data:image/png;base64,iVBORw==");

    session.submit(&endpoint, "and now?").await.unwrap();
    let second: serde_json::Value = serde_json::from_str(&bodies.recv().await.unwrap()).unwrap();
    assert_eq!(second["message"], "and now?");
    assert!(second.get("image").is_none(), "{second}");
}

// -- Widget host --------------------------------------------------------------

async fn start_host(upstream: String) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = WidgetConfig::default();
    let state = Arc::new(HostState::new(client(upstream), &config));
    tokio::spawn(web::run(listener, state));
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_host_forwards_ask() {
    let upstream = fake_backend(200, r#"{"reply":"*ok* `x`"}"#).await;
    let host = start_host(upstream).await;
    let reply: HostReply = reqwest::Client::new()
        .post(format!("{}/api/ask", host))
        .json(&AskRequest::text("hello"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reply.reply, "*ok* `x`");
    assert_eq!(reply.html, "<i>ok</i> <code>x</code>");
}

#[tokio::test]
async fn test_host_serves_page_and_404() {
    let host = start_host("http://127.0.0.1:9/api/ask".to_string()).await;
    let http = reqwest::Client::new();

    let page = http.get(format!("{}/", host)).send().await.unwrap();
    assert_eq!(page.status().as_u16(), 200);
    let body = page.text().await.unwrap();
    assert!(body.contains("id=\"chatBox\""));
    assert!(body.contains("id=\"mainMenuPopup\""));

    let icon = http.get(format!("{}/static/Sun.svg", host)).send().await.unwrap();
    assert_eq!(icon.status().as_u16(), 200);
    assert_eq!(icon.headers()["content-type"], "image/svg+xml");

    let missing = http.get(format!("{}/nope", host)).send().await.unwrap();
    assert_eq!(missing.status().as_u16(), 404);
}

#[tokio::test]
async fn test_host_falls_back_when_upstream_down() {
    let host = start_host("http://127.0.0.1:9/api/ask".to_string()).await;
    let resp = reqwest::Client::new()
        .post(format!("{}/api/ask", host))
        .json(&AskRequest::text("hello"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let reply: HostReply = resp.json().await.unwrap();
    assert_eq!(reply.reply, FALLBACK_REPLY);
}

#[tokio::test]
async fn test_host_highlight_endpoint() {
    let host = start_host("http://127.0.0.1:9/api/ask".to_string()).await;
    let body = reqwest::Client::new()
        .get(format!("{}/api/highlight?lang=py&code=def+f%28%29%3A+pass", host))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(body.contains("<span class=\"hl-keyword\">def</span>"), "{body}");
    assert!(body.contains("<span class=\"hl-keyword\">pass</span>"), "{body}");
}
