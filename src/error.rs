use thiserror::Error;

/// Errors raised by a tree store primitive.
///
/// The update engine catches these per chunk; they only reach callers of
/// `read`/`write` directly.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid store path: {0}")]
    InvalidPath(String),

    #[error("{0}")]
    Other(String),
}
