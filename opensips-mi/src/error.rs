use thiserror::Error;

/// Failure to turn a JSON value into an MI [`Node`](crate::Node).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Unsupported {found} in MI tree at {context}")]
    UnsupportedType {
        /// JSON shape that was found (`null`, `boolean`, `number`, `string`).
        found: &'static str,
        /// Where in the tree it was found.
        context: String,
    },
}

/// Errors returned when executing an MI command.
#[derive(Debug, Error)]
pub enum MiError {
    #[error("Invalid mi_json URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("mi_json status: {0}")]
    Status(u16),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("mi_json response is not a JSON object")]
    NotAnObject,

    #[error("mi_json error: {0}")]
    Remote(String),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// Result type alias using [`MiError`].
pub type Result<T> = std::result::Result<T, MiError>;
