use std::sync::Arc;

/// Represents a result type for operations in this crate.
///
/// Evaluation itself never fails (malformed input degrades to a safe default), so this type is
/// only returned by collaborators: definitions decoding, client options, and sticky bucket stores.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors returned by evaluation collaborators.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Feature definitions payload is not valid JSON or does not have the expected shape.
    #[error("error parsing feature definitions")]
    // serde_json::Error is not clonable, so we're wrapping it in an Arc.
    DefinitionsParse(#[source] Arc<serde_json::Error>),

    /// Invalid `url` client option.
    #[error("invalid url")]
    InvalidUrl(#[source] url::ParseError),

    /// Sticky bucket store failed to load or save assignments.
    #[error("sticky bucket store error: {0}")]
    StickyBucketStore(String),
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::DefinitionsParse(Arc::new(value))
    }
}

impl From<url::ParseError> for Error {
    fn from(value: url::ParseError) -> Self {
        Error::InvalidUrl(value)
    }
}
