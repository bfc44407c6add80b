use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("user not found: {0}")]
    UserNotFound(Uuid),
    #[error("user already registered: {0}")]
    UserAlreadyExists(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("forbidden")]
    Forbidden,
    #[error("unauthorized")]
    Unauthorized,
    #[error("payload too large: at most {0} bytes")]
    PayloadTooLarge(usize),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db) = err.as_database_error() {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            match code.as_str() {
                // unique_violation
                "23505" => return DomainError::Conflict(db.message().to_string()),
                // foreign key, check, not null, raise_exception, bad text input
                "23503" | "23514" | "23502" | "P0001" | "22P02" | "22007" | "22001" => {
                    return DomainError::BadRequest(db.message().to_string());
                }
                _ => {}
            }
        }
        if matches!(err, sqlx::Error::RowNotFound) {
            return DomainError::NotFound("row".into());
        }
        error!("database error: {}", err);
        DomainError::Internal(format!("database error: {}", err))
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl ResponseError for DomainError {
    fn status_code(&self) -> StatusCode {
        match self {
            DomainError::UserNotFound(_) | DomainError::NotFound(_) => StatusCode::NOT_FOUND,
            DomainError::Unauthorized => StatusCode::UNAUTHORIZED,
            DomainError::Forbidden => StatusCode::FORBIDDEN,
            DomainError::UserAlreadyExists(_) | DomainError::Conflict(_) => StatusCode::CONFLICT,
            DomainError::BadRequest(_) => StatusCode::BAD_REQUEST,
            DomainError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            DomainError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = self.to_string();
        let details = match self {
            DomainError::UserNotFound(resource) => Some(json!({ "resource": resource })),
            DomainError::Forbidden => {
                Some(json!({ "message": "only the owner may change this resource" }))
            }
            _ => None,
        };
        let body = ErrorBody {
            error: message.as_str(),
            details,
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;
    use rstest::rstest;

    #[rstest]
    #[case(DomainError::NotFound("post".into()), 404)]
    #[case(DomainError::Unauthorized, 401)]
    #[case(DomainError::Forbidden, 403)]
    #[case(DomainError::Conflict("duplicate".into()), 409)]
    #[case(DomainError::UserAlreadyExists("a@b.c".into()), 409)]
    #[case(DomainError::BadRequest("nope".into()), 400)]
    #[case(DomainError::PayloadTooLarge(10), 413)]
    #[case(DomainError::Internal("boom".into()), 500)]
    fn maps_to_status(#[case] err: DomainError, #[case] status: u16) {
        assert_eq!(err.status_code().as_u16(), status);
    }

    #[actix_web::test]
    async fn conflict_body_carries_constraint_message() {
        let err = DomainError::Conflict(
            "duplicate key value violates unique constraint \"likes_pkey\"".into(),
        );
        let body = to_bytes(err.error_response().into_body()).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            body["error"],
            "duplicate key value violates unique constraint \"likes_pkey\""
        );
        assert!(body.get("details").is_none());
    }
}
