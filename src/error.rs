/// Result type for the data-parsing surface of this crate.
///
/// Evaluation itself never returns `Err`: data-model problems are shaped as
/// [`crate::Reason::Error`] results so that `evaluate` always produces
/// exactly one result.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading flag or segment data into the engine.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A flag or segment could not be deserialized from its wire form.
    ///
    /// Callers typically skip the offending item and keep serving the rest
    /// of the data set.
    #[error("error parsing data item")]
    InvalidJson(#[from] serde_json::Error),
}
