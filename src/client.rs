//! Reply endpoint wire types and the HTTP client that calls it.

use std::future::Future;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, WidgetError};

/// Body of `POST /api/ask`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskRequest {
    pub message: String,
    /// Attached image as a `data:` URL. Omitted from the body when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl AskRequest {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            image: None,
        }
    }
}

/// Body returned by the reply endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskResponse {
    pub reply: String,
}

/// Encode raw image bytes as a `data:` URL.
pub fn image_data_url(bytes: &[u8], mime: &str) -> String {
    format!("data:{};base64,{}", mime, general_purpose::STANDARD.encode(bytes))
}

/// Anything that can turn a request into a reply string.
pub trait ReplyEndpoint {
    fn ask(&self, request: &AskRequest) -> impl Future<Output = Result<String>> + Send;
}

/// reqwest-backed client for a JSON reply endpoint.
#[derive(Debug, Clone)]
pub struct AskClient {
    client: Client,
    endpoint: String,
}

impl AskClient {
    /// `timeout` of `None` leaves the transport default in place.
    pub fn new(endpoint: impl Into<String>, timeout: Option<Duration>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        Ok(Self {
            client: builder.build()?,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ReplyEndpoint for AskClient {
    async fn ask(&self, request: &AskRequest) -> Result<String> {
        debug!(
            endpoint = %self.endpoint,
            chars = request.message.chars().count(),
            with_image = request.image.is_some(),
            "sending message"
        );
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(WidgetError::Status(status.as_u16()));
        }
        let body = response.text().await?;
        let parsed: AskResponse = serde_json::from_str(&body)?;
        Ok(parsed.reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_without_image_omits_field() {
        let json = serde_json::to_string(&AskRequest::text("hello")).unwrap();
        assert_eq!(json, r#"{"message":"hello"}"#);
    }

    #[test]
    fn test_request_with_image_serializes_data_url() {
        let req = AskRequest {
            message: "what is this".to_string(),
            image: Some(image_data_url(b"\x89PNG", "image/png")),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""image":"data:image/png;base64,iVBORw==""#), "{json}");
    }

    #[test]
    fn test_request_accepts_null_image() {
        let req: AskRequest = serde_json::from_str(r#"{"message":"hi","image":null}"#).unwrap();
        assert_eq!(req, AskRequest::text("hi"));
    }

    #[test]
    fn test_response_deserializes() {
        let resp: AskResponse = serde_json::from_str(r#"{"reply":"**hi**"}"#).unwrap();
        assert_eq!(resp.reply, "**hi**");
    }

    #[test]
    fn test_response_missing_reply_is_error() {
        assert!(serde_json::from_str::<AskResponse>(r#"{"answer":"x"}"#).is_err());
    }

    #[test]
    fn test_client_keeps_endpoint() {
        let client = AskClient::new("http://127.0.0.1:5000/api/ask", None).unwrap();
        assert_eq!(client.endpoint(), "http://127.0.0.1:5000/api/ask");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        // port 9 (discard) on localhost is closed in test environments
        let client =
            AskClient::new("http://127.0.0.1:9/api/ask", Some(Duration::from_secs(2))).unwrap();
        let err = client.ask(&AskRequest::text("hi")).await.unwrap_err();
        assert!(matches!(err, WidgetError::Transport(_)), "{err}");
    }
}
