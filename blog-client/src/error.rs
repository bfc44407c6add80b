use thiserror::Error;

use crate::validation::ValidationError;

#[derive(Debug, Error)]
pub enum BlogClientError {
    #[error("Request error: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Not found")]
    NotFound,
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Forbidden")]
    Forbidden,
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl BlogClientError {
    /// Builds the error for a non-success response, keeping the server's
    /// `error` message when the body carries one.
    pub async fn from_http_response(resp: reqwest::Response) -> Self {
        let status = resp.status().as_u16();
        let text = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&text)
            .ok()
            .and_then(|body| body.get("error").and_then(|e| e.as_str()).map(String::from))
            .unwrap_or(text);
        Self::from_status(status, message)
    }

    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            400 => BlogClientError::InvalidRequest(message),
            401 => BlogClientError::Unauthorized,
            403 => BlogClientError::Forbidden,
            404 => BlogClientError::NotFound,
            409 => BlogClientError::Conflict(message),
            _ => BlogClientError::Http { status, message },
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, BlogClientError::Conflict(_))
    }
}
