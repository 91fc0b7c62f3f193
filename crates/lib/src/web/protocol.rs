//! JSON shapes of the browser API and the error mapping for handlers.

use async_trait::async_trait;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::archive::ArchiveError;
use crate::session::{SessionError, Turn};

/// Body of `POST /api/sessions/{id}/chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatParams {
    #[serde(default)]
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreated {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnList {
    pub turns: Vec<Turn>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Archived {
    pub file: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveList {
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveRows {
    pub file: String,
    pub rows: Vec<Turn>,
}

/// Error response: `{ "error", "installHint"? }` with an HTTP status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_hint: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
            install_hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.install_hint = Some(hint.into());
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(self)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::new(rejection.status(), rejection.body_text())
    }
}

/// JSON request body whose rejections are reported as [`ApiError`].
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::NotFound(_) => ApiError::new(StatusCode::NOT_FOUND, e.to_string()),
        }
    }
}

impl From<ArchiveError> for ApiError {
    fn from(e: ArchiveError) -> Self {
        let status = match e {
            ArchiveError::InvalidName(_) => StatusCode::BAD_REQUEST,
            ArchiveError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request as HttpRequest};

    fn chat_request(content_type: Option<&str>, body: &str) -> Request {
        let mut builder = HttpRequest::builder().method("POST").uri("/api/sessions/sess-1/chat");
        if let Some(ct) = content_type {
            builder = builder.header(header::CONTENT_TYPE, ct);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[test]
    fn api_error_serializes_without_status() {
        let e = ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "no models").with_hint("pull one");
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json, serde_json::json!({ "error": "no models", "installHint": "pull one" }));
    }

    #[test]
    fn archive_errors_map_to_statuses() {
        let bad: ApiError = ArchiveError::InvalidName("../x".to_string()).into();
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);
        let missing: ApiError = ArchiveError::NotFound("a.csv".to_string()).into();
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
        let session: ApiError = SessionError::NotFound("sess-1".to_string()).into();
        assert_eq!(session.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn chat_params_default_to_empty_prompt() {
        let p: ChatParams = serde_json::from_str("{}").unwrap();
        assert!(p.prompt.is_empty());
    }

    #[tokio::test]
    async fn json_body_accepts_chat_params() {
        let req = chat_request(Some("application/json"), r#"{"prompt":"hi"}"#);
        let JsonBody(params) = JsonBody::<ChatParams>::from_request(req, &()).await.ok().unwrap();
        assert_eq!(params.prompt, "hi");
    }

    #[tokio::test]
    async fn json_body_rejections_are_api_errors() {
        let req = chat_request(None, r#"{"prompt":"hi"}"#);
        let err = JsonBody::<ChatParams>::from_request(req, &()).await.err().unwrap();
        assert_eq!(err.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert!(!err.error.is_empty());

        let req = chat_request(Some("application/json"), "{\"prompt\":");
        let err = JsonBody::<ChatParams>::from_request(req, &()).await.err().unwrap();
        assert!(err.status.is_client_error());
    }
}
