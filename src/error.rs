use axum::{http::StatusCode, response::IntoResponse, Json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Upstream unreachable: {0}")]
    Upstream(String),

    #[error("Upstream rejected request ({status}): {body}")]
    UpstreamRejected { status: StatusCode, body: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidSubmission(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::JobNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Http(_) | AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::UpstreamRejected { status, .. } if status.is_client_error() => *status,
            AppError::UpstreamRejected { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        let body = serde_json::json!({
            "success": false,
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_map_to_4xx() {
        assert_eq!(
            AppError::InvalidSubmission("empty".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::JobNotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::Config("bad".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn upstream_rejections_keep_client_errors() {
        let unauthorized = AppError::UpstreamRejected {
            status: StatusCode::UNAUTHORIZED,
            body: "{}".into(),
        };
        assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);
        let broken = AppError::UpstreamRejected {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        };
        assert_eq!(broken.status(), StatusCode::BAD_GATEWAY);
    }
}
