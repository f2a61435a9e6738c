use std::string::FromUtf8Error;

use thiserror::Error;

/// Framing and decode errors shared by both wire families.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid message")]
    InvalidMessage,
    #[error("message of {0} bytes exceeds the frame size limit")]
    MessageTooLarge(usize),
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(#[from] FromUtf8Error),
    #[error("string of {0} bytes does not fit a 2-byte length prefix")]
    StringTooLong(usize),
    #[error("string contains a NUL byte at offset {0}")]
    EmbeddedNul(usize),
    #[error("string is not NUL-terminated")]
    UnterminatedString,
    #[error("missing parameter: {0}")]
    MissingParameter(&'static str),
    #[error("{0} fields do not fit a 2-byte count")]
    TooManyFields(usize),
    #[error("unknown frame type: 0x{0:02x}")]
    UnknownFrameType(u8),
    #[error("chained segment 0x{0:02x} cannot be folded into the preceding request")]
    UnexpectedSegment(u8),
    #[error("expected password message, got tag 0x{0:02x}")]
    ExpectedPassword(u8),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
