use crate::config::ValidationError;
use hyper::StatusCode;

#[derive(thiserror::Error, Debug)]
pub enum RedirectError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ValidationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid upstream URI: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),

    #[error("upstream request failed: {0}")]
    UpstreamRequest(String),

    #[error("upstream request timed out")]
    UpstreamTimeout,
}

impl RedirectError {
    /// Status returned to the client when forwarding fails with this error.
    pub fn status(&self) -> StatusCode {
        match self {
            RedirectError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            RedirectError::InvalidConfig(_) | RedirectError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}
