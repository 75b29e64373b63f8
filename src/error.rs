use thiserror::Error;

/// Errors returned by the fingerprinting and matching core.
///
/// Empty results (no peaks, no matches) are not errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A bin or time gap does not fit its address bit-field. Only reachable with
    /// an analyzer/encoder pairing that `Config::validate` would reject.
    #[error("address encoding out of range: {0}")]
    EncodingRange(String),

    #[error("fingerprint store unavailable: {0}")]
    StoreUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::StoreUnavailable(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
