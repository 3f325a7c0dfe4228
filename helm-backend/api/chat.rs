use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use hyper::StatusCode;
use hyper::header;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;

use super::AppState;
use crate::claude::process::new_request_id;
use crate::claude::prompt::{ConversationEntry, MAX_MESSAGE_CHARS};
use crate::claude::{ChatInput, ProcessRegistry};

pub const MAX_IMAGES: usize = 10;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub images: Option<Vec<String>>,
    #[serde(default)]
    pub conversation_history: Option<Vec<ConversationEntry>>,
}

/// Rejections returned before any process is started.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ChatError {
    #[error("Message or images required")]
    Empty,
    #[error("Message is too long")]
    MessageTooLong,
    #[error("Maximum 10 images allowed")]
    TooManyImages,
    #[error("Invalid image format")]
    InvalidImage,
    #[error("Invalid request body")]
    InvalidBody,
    #[error("Internal server error")]
    Internal,
}

impl ChatError {
    fn status(&self) -> StatusCode {
        match self {
            ChatError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<JsonRejection> for ChatError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            // Could not even buffer the body; not the client's fault.
            JsonRejection::BytesRejection(e) => {
                tracing::error!(error = %e, "failed to read chat request body");
                ChatError::Internal
            }
            other => {
                tracing::debug!(error = %other, "rejected chat request body");
                ChatError::InvalidBody
            }
        }
    }
}

impl ChatRequest {
    pub fn validate(self) -> Result<ChatInput, ChatError> {
        let message = self.message.unwrap_or_default();
        let images = self.images.unwrap_or_default();

        if message.is_empty() && images.is_empty() {
            return Err(ChatError::Empty);
        }
        // Measured in UTF-16 code units, as browsers count `message.length`.
        if message.encode_utf16().count() > MAX_MESSAGE_CHARS {
            return Err(ChatError::MessageTooLong);
        }
        if images.len() > MAX_IMAGES {
            return Err(ChatError::TooManyImages);
        }
        if images.iter().any(|image| !image.starts_with("data:image/")) {
            return Err(ChatError::InvalidImage);
        }

        Ok(ChatInput {
            message,
            images,
            history: self.conversation_history.unwrap_or_default(),
        })
    }
}

/// Kills the session's process if the response stream is dropped before the
/// terminal event went out.
struct AbortOnDisconnect {
    registry: ProcessRegistry,
    request_id: String,
    armed: bool,
}

impl AbortOnDisconnect {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for AbortOnDisconnect {
    fn drop(&mut self) {
        if self.armed {
            self.registry.abort(&self.request_id);
        }
    }
}

#[tracing::instrument(skip_all, fields(request_id = tracing::field::Empty))]
pub async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ChatError> {
    let Json(request) = payload?;
    let input = request.validate()?;

    let request_id = new_request_id();
    tracing::Span::current().record("request_id", request_id.as_str());
    tracing::info!(
        message_chars = input.message.chars().count(),
        images = input.images.len(),
        history = input.history.len(),
        "chat request"
    );

    let mut rx = state.bridge.start(request_id.clone(), input);
    let guard = AbortOnDisconnect {
        registry: state.bridge.registry().clone(),
        request_id,
        armed: true,
    };

    let stream = async_stream::stream! {
        let mut guard = guard;
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            match Event::default().json_data(&event) {
                Ok(frame) => yield Ok::<_, Infallible>(frame),
                Err(e) => tracing::error!(error = %e, "failed to encode stream event"),
            }
            if terminal {
                guard.disarm();
                break;
            }
        }
    };

    Ok((
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
        ],
        Sse::new(stream).keep_alive(KeepAlive::new().interval(std::time::Duration::from_secs(15))),
    ))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/chat", post(chat))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::claude::{Bridge, ClaudeCommand};
    use crate::images::ImageStaging;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use std::path::Path;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app_with_script(dir: &Path, script: &str) -> (Router, ProcessRegistry) {
        let command = ClaudeCommand::new(
            "/bin/sh",
            vec!["-c".to_string(), format!("cat >/dev/null\n{script}")],
            dir,
        );
        let registry = ProcessRegistry::new();
        let bridge = Bridge::new(command, registry.clone(), ImageStaging::new(dir), Duration::from_secs(10))
            .with_reap_delay(Duration::from_millis(10));
        (crate::api::create_app(AppState { bridge, static_dir: None }), registry)
    }

    fn post_chat(body: impl Into<Body>) -> Request<Body> {
        Request::post("/api/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.into())
            .unwrap()
    }

    async fn error_of(response: Response) -> (StatusCode, String) {
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: Value = serde_json::from_slice(&body).unwrap();
        (status, json["error"].as_str().unwrap_or_default().to_string())
    }

    /// Parse `data: {...}` frames out of an SSE body.
    fn frames(body: &[u8]) -> Vec<Value> {
        String::from_utf8_lossy(body)
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|data| serde_json::from_str(data).unwrap())
            .collect()
    }

    fn request(message: Option<&str>, images: Option<Vec<String>>) -> ChatRequest {
        ChatRequest {
            message: message.map(String::from),
            images,
            conversation_history: None,
        }
    }

    #[test]
    fn validate_requires_message_or_images() {
        assert_eq!(request(None, None).validate().unwrap_err(), ChatError::Empty);
        assert_eq!(request(Some(""), Some(vec![])).validate().unwrap_err(), ChatError::Empty);
    }

    #[test]
    fn validate_accepts_whitespace_message() {
        let input = request(Some("   "), None).validate().unwrap();
        assert_eq!(input.message, "   ");
    }

    #[test]
    fn validate_limits() {
        let long = "a".repeat(MAX_MESSAGE_CHARS + 1);
        assert_eq!(request(Some(&long), None).validate().unwrap_err(), ChatError::MessageTooLong);

        let exact = "a".repeat(MAX_MESSAGE_CHARS);
        assert!(request(Some(&exact), None).validate().is_ok());

        // Each emoji is two UTF-16 units, so 6,000 of them exceed the limit.
        let emoji = "😀".repeat(6_000);
        assert_eq!(request(Some(&emoji), None).validate().unwrap_err(), ChatError::MessageTooLong);

        let images = vec!["data:image/png;base64,AAAA".to_string(); MAX_IMAGES + 1];
        assert_eq!(request(Some("hi"), Some(images)).validate().unwrap_err(), ChatError::TooManyImages);

        let images = vec!["https://example.com/cat.png".to_string()];
        assert_eq!(request(Some("hi"), Some(images)).validate().unwrap_err(), ChatError::InvalidImage);
    }

    #[test]
    fn validate_accepts_images_without_message() {
        let input = request(None, Some(vec!["data:image/png;base64,AAAA".into()])).validate().unwrap();
        assert_eq!(input.message, "");
        assert_eq!(input.images.len(), 1);
    }

    #[tokio::test]
    async fn too_many_images_is_rejected_without_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("spawned");
        let (app, registry) = app_with_script(dir.path(), &format!("touch {}", marker.display()));

        let images: Vec<String> = vec!["data:image/png;base64,AAAA".to_string(); 11];
        let body = json!({"message": "hi", "images": images}).to_string();
        let response = app.oneshot(post_chat(body)).await.unwrap();

        assert_eq!(error_of(response).await, (StatusCode::BAD_REQUEST, "Maximum 10 images allowed".to_string()));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!marker.exists());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let (app, _) = app_with_script(dir.path(), "true");

        let response = app.clone().oneshot(post_chat("{not json")).await.unwrap();
        assert_eq!(error_of(response).await, (StatusCode::BAD_REQUEST, "Invalid request body".to_string()));

        let response = app.oneshot(post_chat("{}")).await.unwrap();
        assert_eq!(error_of(response).await, (StatusCode::BAD_REQUEST, "Message or images required".to_string()));
    }

    #[tokio::test]
    async fn chat_streams_events_then_done() {
        let dir = tempfile::tempdir().unwrap();
        let script = [
            r#"printf '%s\n' '{"type":"system","subtype":"init","tools":["Read"],"mcp_servers":[]}'"#,
            r#"printf '%s\n' '{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Read","input":{"file_path":"/a.txt"}}]}}'"#,
            r#"printf '%s\n' '{"type":"assistant","message":{"content":[{"type":"tool_use","name":"Read","input":{"file_path":"/a.txt"}}]}}'"#,
            r#"printf '%s\n' '{"type":"result","subtype":"success","result":"Done reading."}'"#,
        ]
        .join("\n");
        let (app, registry) = app_with_script(dir.path(), &script);

        let body = json!({
            "message": "read a.txt",
            "conversationHistory": [{"role": "user", "content": "hello"}]
        })
        .to_string();
        let response = app.oneshot(post_chat(body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let events = frames(&body);
        let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
        assert_eq!(types, vec!["init", "tool", "done"]);
        assert_eq!(events[1]["friendlyName"], "Reading: a.txt");
        assert_eq!(events[2]["content"], "Done reading.");
        assert!(events[2].get("imagePaths").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn dropping_response_stream_aborts_process() {
        let dir = tempfile::tempdir().unwrap();
        let script = r#"printf '%s\n' '{"type":"system","subtype":"init","tools":[],"mcp_servers":[]}'
sleep 30"#;
        let (app, registry) = app_with_script(dir.path(), script);

        let response = app.oneshot(post_chat(json!({"message": "wait"}).to_string())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut body = response.into_body().into_data_stream();
        use futures::StreamExt;
        let first = body.next().await.unwrap().unwrap();
        assert!(String::from_utf8_lossy(&first).contains("\"type\":\"init\""));
        assert_eq!(registry.len(), 1);

        drop(body);
        assert!(registry.is_empty());
    }
}
