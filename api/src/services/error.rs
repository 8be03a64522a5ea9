//! Error handling helpers for route handlers

use axum::http::StatusCode;
use tracing::error;

/// Log an error with context and turn it into a status code
pub trait LogErr<T> {
    fn log_500(self, context: &str) -> Result<T, StatusCode>;

    fn log_status(self, context: &str, status: StatusCode) -> Result<T, StatusCode>;
}

impl<T, E: std::fmt::Display> LogErr<T> for Result<T, E> {
    fn log_500(self, context: &str) -> Result<T, StatusCode> {
        self.log_status(context, StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn log_status(self, context: &str, status: StatusCode) -> Result<T, StatusCode> {
        self.map_err(|e| {
            error!(status = status.as_u16(), error = %e, "{}", context);
            status
        })
    }
}
