use bytes::{Buf, BufMut, BytesMut};

use crate::protocol::ProtocolError;

/// Maximum message size in bytes (16 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Read a null-terminated string from a BytesMut buffer.
/// Returns an error if there's not enough data (no null terminator found).
/// Returns the string (without the null terminator) if successful.
///
/// This function will search for a null byte within the buffer up to a maximum
/// length to prevent unbounded memory consumption from malicious input.
pub fn get_cstring(src: &mut BytesMut) -> Result<String, ProtocolError> {
    const MAX_CSTRING_LENGTH: usize = 64 * 1024; // 64KB limit

    // Find the null terminator position
    let Some(null_pos) = src.iter().take(MAX_CSTRING_LENGTH).position(|&b| b == 0) else {
        return Err(ProtocolError::UnterminatedString);
    };

    let bytes = src.split_to(null_pos);
    src.advance(1);
    Ok(String::from_utf8(bytes.to_vec())?)
}

/// Read a string whose size is fixed by the enclosing message.
///
/// `declared_len` follows the message-length convention: it counts the
/// 4-byte length field itself and the terminator, so the string carries
/// `declared_len - 5` bytes followed by one NUL. A NUL inside the string is
/// rejected.
pub fn get_sized_cstring(src: &mut BytesMut, declared_len: usize) -> Result<String, ProtocolError> {
    let Some(len) = declared_len.checked_sub(5) else {
        return Err(ProtocolError::InvalidMessage);
    };
    if src.len() < len + 1 {
        return Err(ProtocolError::InvalidMessage);
    }
    if let Some(pos) = src[..len].iter().position(|&b| b == 0) {
        return Err(ProtocolError::EmbeddedNul(pos));
    }
    if src[len] != 0 {
        return Err(ProtocolError::UnterminatedString);
    }

    let bytes = src.split_to(len);
    src.advance(1);
    Ok(String::from_utf8(bytes.to_vec())?)
}

/// Write a null-terminated string to a BytesMut buffer.
/// A NUL inside `s` would end the string early and is rejected.
pub fn put_cstring(dst: &mut BytesMut, s: &str) -> Result<(), ProtocolError> {
    if let Some(pos) = s.bytes().position(|b| b == 0) {
        return Err(ProtocolError::EmbeddedNul(pos));
    }
    dst.put_slice(s.as_bytes());
    dst.put_u8(0);
    Ok(())
}

/// Writes a tagged message header with a placeholder length.
/// Returns the offset of the length field for [`end_message`].
pub(crate) fn begin_message(dst: &mut BytesMut, tag: u8) -> usize {
    dst.put_u8(tag);
    let len_pos = dst.len();
    dst.put_i32(0);
    len_pos
}

/// Patches the length written by [`begin_message`]; the length counts itself.
pub(crate) fn end_message(
    dst: &mut BytesMut,
    len_pos: usize,
    max_message_size: usize,
) -> Result<(), ProtocolError> {
    let len = dst.len() - len_pos;
    if len > max_message_size {
        return Err(ProtocolError::MessageTooLarge(len));
    }
    let len = i32::try_from(len).map_err(|_| ProtocolError::MessageTooLarge(len))?;
    dst[len_pos..len_pos + 4].copy_from_slice(&len.to_be_bytes());
    Ok(())
}

/// Codec for the query phase of the compatibility protocol.
/// Encodes BackendMessage (in backend.rs) and decodes FrontendMessage (in frontend.rs).
pub struct PostgresCodec {
    pub(crate) max_message_size: usize,
}

impl PostgresCodec {
    /// Creates a new PostgresCodec with the default maximum message size.
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl Default for PostgresCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Codec for the startup phase of the compatibility protocol.
/// Decodes StartupMessage only (server doesn't receive tagged messages during startup).
pub struct StartupCodec {
    pub(crate) max_message_size: usize,
    /// Length of the first packet when its length word was already consumed
    /// by protocol detection.
    pub(crate) declared_length: Option<usize>,
}

impl StartupCodec {
    /// Creates a new StartupCodec with the default maximum message size.
    pub fn new() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            declared_length: None,
        }
    }

    /// Creates a codec whose first packet's length word has already been read.
    pub fn with_declared_length(len: usize) -> Self {
        Self {
            declared_length: Some(len),
            ..Self::new()
        }
    }

    /// Transitions to query phase codec after successful startup.
    pub fn ready(self) -> PostgresCodec {
        PostgresCodec {
            max_message_size: self.max_message_size,
        }
    }
}

impl Default for StartupCodec {
    fn default() -> Self {
        Self::new()
    }
}
