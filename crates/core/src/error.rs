use thiserror::Error;

/// Errors raised while encoding or decoding wire payloads.
///
/// Every variant is a protocol violation: the connection that produced the
/// bytes is closed, other connections are unaffected.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum WireError {
    #[error("Declared frame length {declared} exceeds limit {max}")]
    FrameTooLarge { declared: usize, max: usize },

    #[error("Truncated {0} payload")]
    Truncated(&'static str),

    #[error("Field {field} length {len} exceeds limit {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("Unexpected {extra} trailing bytes in {payload} payload")]
    TrailingBytes {
        payload: &'static str,
        extra: usize,
    },
}

pub type Result<T> = std::result::Result<T, WireError>;
