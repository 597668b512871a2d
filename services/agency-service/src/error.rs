use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tokio_postgres::error::SqlState;

use crate::models::ErrorResponse;

#[derive(Debug)]
pub struct ServiceError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ServiceError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                code,
                message: message.into(),
                reasons: Vec::new(),
            },
        }
    }

    pub fn with_reasons(
        status: StatusCode,
        code: &'static str,
        message: impl Into<String>,
        reasons: Vec<String>,
    ) -> Self {
        Self {
            status,
            body: ErrorResponse {
                code,
                message: message.into(),
                reasons,
            },
        }
    }

    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    /// Logs the driver error and hides its detail from the caller.
    pub fn db(context: &str, err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            if db_err.code() == &SqlState::UNIQUE_VIOLATION {
                tracing::warn!(error = %err, context, "unique violation");
                return Self::new(StatusCode::CONFLICT, "conflict", "record already exists");
            }
            if db_err.code() == &SqlState::FOREIGN_KEY_VIOLATION {
                tracing::warn!(error = %err, context, "foreign key violation");
                return Self::bad_request("invalid_reference", "referenced record does not exist");
            }
        }
        tracing::error!(error = %err, context, "database operation failed");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "db_error",
            "database error",
        )
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::ServiceError;
    use axum::{http::StatusCode, response::IntoResponse};

    #[test]
    fn helpers_pick_status_and_code() {
        let err = ServiceError::not_found("client_not_found", "client not found");
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.body.code, "client_not_found");
        assert!(err.body.reasons.is_empty());
    }

    #[test]
    fn renders_status_on_response() {
        let response = ServiceError::forbidden("missing permission").into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
