use thiserror::Error;

/// Errors surfaced across the public API boundary. Internal helpers compose
/// with `anyhow::Result` and get converted into one of these at the edge.
#[derive(Error, Debug)]
pub enum SqibError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed database content: {0}")]
    Malformed(String),

    #[error("encoded key of {len} bytes exceeds the {max}-byte limit for this page size")]
    KeyTooLarge { len: usize, max: usize },

    #[error("invalid argument: {0}")]
    BadArgument(String),
}

pub type Result<T> = std::result::Result<T, SqibError>;

/// Converts an internal `anyhow::Error` into the closed public error enum.
/// `NotFound` never flows through here: `get`/`remove` return it as a plain
/// `Ok` value, never as an error, per the spec's explicit carve-out.
pub fn malformed(err: impl std::fmt::Display) -> SqibError {
    SqibError::Malformed(err.to_string())
}
