use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    #[error("buffer too short")]
    TooShort,
    #[error("body length mismatch: declared {declared}, got {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("body too large: {0}")]
    BodyTooLarge(usize),
    #[error("unknown message kind: {0}")]
    UnknownKind(u32),
    #[error("unknown list kind: {0}")]
    UnknownListKind(u32),
    #[error("unknown event kind: {0}")]
    UnknownEventKind(u32),
    #[error("declared count {count} overruns body of {body_len} bytes")]
    CountOverrun { count: u32, body_len: usize },
}
