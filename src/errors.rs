use crate::{
    credentials::CredentialsError,
    services::{
        document_store::DocumentError, object_store::ObjectError, relational_store::RelationalError,
    },
};
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 503 when a backend is not configured or unreachable
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<RelationalError> for AppError {
    fn from(err: RelationalError) -> Self {
        let status = match &err {
            RelationalError::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
            RelationalError::Schema { .. } | RelationalError::ConstraintViolation { .. } => {
                StatusCode::CONFLICT
            }
            RelationalError::Query(_) | RelationalError::InvalidIdentifier(_) => {
                StatusCode::BAD_REQUEST
            }
            RelationalError::UpsertAborted { source, .. } => match source.as_ref() {
                RelationalError::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
                RelationalError::Query(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::CONFLICT,
            },
        };
        AppError::new(status, err.to_string())
    }
}

impl From<DocumentError> for AppError {
    fn from(err: DocumentError) -> Self {
        let status = match &err {
            DocumentError::Connection(_) => StatusCode::SERVICE_UNAVAILABLE,
            DocumentError::Write { .. } | DocumentError::Read { .. } => StatusCode::BAD_REQUEST,
            DocumentError::InvalidSequence(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        AppError::new(status, err.to_string())
    }
}

impl From<ObjectError> for AppError {
    fn from(err: ObjectError) -> Self {
        let status = match &err {
            ObjectError::BucketNotFound(_) | ObjectError::ObjectNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            ObjectError::AlreadyExists(_) | ObjectError::NotEmpty(_) => StatusCode::CONFLICT,
            ObjectError::Permission(_) => StatusCode::FORBIDDEN,
            ObjectError::InvalidBucketName { .. }
            | ObjectError::InvalidObjectKey
            | ObjectError::Decode { .. } => StatusCode::BAD_REQUEST,
            ObjectError::Transfer { .. } => StatusCode::BAD_GATEWAY,
            ObjectError::PartialEmpty { .. } | ObjectError::Backend { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        AppError::new(status, err.to_string())
    }
}

impl From<CredentialsError> for AppError {
    fn from(err: CredentialsError) -> Self {
        AppError::unavailable(err.to_string())
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), err.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relational_errors_map_to_statuses() {
        let conflict: AppError = RelationalError::Schema {
            table: "orders".into(),
            message: "exists".into(),
        }
        .into();
        assert_eq!(conflict.status, StatusCode::CONFLICT);

        let down: AppError = RelationalError::Connection("refused".into()).into();
        assert_eq!(down.status, StatusCode::SERVICE_UNAVAILABLE);

        let aborted: AppError = RelationalError::UpsertAborted {
            table: "orders".into(),
            committed_rows: 1000,
            source: Box::new(RelationalError::ConstraintViolation {
                table: "orders".into(),
                message: "null id".into(),
            }),
        }
        .into();
        assert_eq!(aborted.status, StatusCode::CONFLICT);
        assert!(aborted.message.contains("1000"));
    }

    #[test]
    fn object_errors_map_to_statuses() {
        let cases = [
            (ObjectError::BucketNotFound("b".into()), StatusCode::NOT_FOUND),
            (ObjectError::AlreadyExists("b".into()), StatusCode::CONFLICT),
            (ObjectError::NotEmpty("b".into()), StatusCode::CONFLICT),
            (ObjectError::Permission("no".into()), StatusCode::FORBIDDEN),
            (ObjectError::InvalidObjectKey, StatusCode::BAD_REQUEST),
        ];
        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status, expected);
        }
    }

    #[test]
    fn document_failures_map_to_statuses() {
        let down: AppError = DocumentError::Connection("no primary".into()).into();
        assert_eq!(down.status, StatusCode::SERVICE_UNAVAILABLE);

        let rejected: AppError = DocumentError::Write {
            collection: "customers".into(),
            message: "bad key".into(),
        }
        .into();
        assert_eq!(rejected.status, StatusCode::BAD_REQUEST);
    }
}
