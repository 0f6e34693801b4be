use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document matches no known checkout shape")]
    UnknownShape,
    #[error("order summary is missing a parseable total")]
    MissingTotal,
    #[error("malformed {shape} document: {detail}")]
    Malformed {
        shape: &'static str,
        detail: String,
    },
}

pub type DocumentResult<T> = std::result::Result<T, DocumentError>;
