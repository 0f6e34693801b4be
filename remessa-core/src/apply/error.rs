use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("another pass is already in flight")]
    PassInFlight,
    #[error("live list error: {0}")]
    Provider(String),
    #[error("unknown entry id: {0}")]
    UnknownEntry(String),
}

pub type ApplyResult<T> = std::result::Result<T, ApplyError>;
