use bytes::{Buf, BytesMut};
use std::collections::HashMap;
use tokio_util::codec::Decoder;

use crate::protocol::error::ProtocolError;
use crate::protocol::pg::codec::{PostgresCodec, StartupCodec, get_cstring, get_sized_cstring};

/// Ensures that the buffer has at least `n` bytes remaining.
/// Returns `ProtocolError::InvalidMessage` if not enough bytes are available.
macro_rules! ensure_remaining {
    ($buf:expr, $n:expr) => {
        if $buf.len() < $n {
            return Err(ProtocolError::InvalidMessage);
        }
    };
}

/// SSLRequest magic number
const SSL_REQUEST_CODE: i32 = (1234 << 16) | 5679; // 80877103

/// GSSENCRequest magic number
const GSSENC_REQUEST_CODE: i32 = (1234 << 16) | 5680; // 80877104

/// Messages sent by the frontend (client) during startup phase.
#[derive(Debug)]
pub enum StartupMessage {
    /// SSLRequest - client wants to negotiate SSL
    SslRequest,
    /// GSSENCRequest - client wants GSSAPI encryption
    GssEncRequest,
    /// StartupMessage - normal connection startup
    Startup {
        major: u16,
        minor: u16,
        parameters: StartupParameters,
    },
}

impl StartupMessage {
    /// Decodes a startup message body: everything after the length word.
    fn decode(src: &mut BytesMut) -> Result<Self, ProtocolError> {
        ensure_remaining!(src, 4);
        let major = src.get_u16();
        let minor = src.get_u16();
        let code = (i32::from(major) << 16) | i32::from(minor);

        match code {
            SSL_REQUEST_CODE => Ok(StartupMessage::SslRequest),
            GSSENC_REQUEST_CODE => Ok(StartupMessage::GssEncRequest),
            // Any other version word is a startup packet; the version is
            // reported to the caller and not enforced.
            _ => {
                let parameters = StartupParameters::decode(src)?;
                Ok(StartupMessage::Startup {
                    major,
                    minor,
                    parameters,
                })
            }
        }
    }
}

/// Startup parameters from the client
#[derive(Debug, Clone, Default)]
pub struct StartupParameters {
    pub user: String,
    pub database: String,
    pub application_name: Option<String>,
    pub client_encoding: Option<String>,
    pub other: HashMap<String, String>,
}

impl StartupParameters {
    /// Decodes the key/value pairs of a startup packet.
    /// The list ends with an empty key; both `user` and `database` are required.
    fn decode(src: &mut BytesMut) -> Result<Self, ProtocolError> {
        let mut user = None;
        let mut database = None;
        let mut params = StartupParameters::default();

        loop {
            if src.is_empty() {
                return Err(ProtocolError::UnterminatedString);
            }

            // Read parameter name
            let name = get_cstring(src)?;

            // Empty name signals end of parameters
            if name.is_empty() {
                break;
            }

            // Read parameter value
            let value = get_cstring(src)?;

            match name.as_str() {
                "user" => user = Some(value),
                "database" => database = Some(value),
                "application_name" => params.application_name = Some(value),
                "client_encoding" => params.client_encoding = Some(value),
                _ => {
                    params.other.insert(name, value);
                }
            }
        }

        params.database = database.ok_or(ProtocolError::MissingParameter("database"))?;
        params.user = user.ok_or(ProtocolError::MissingParameter("user"))?;
        Ok(params)
    }
}

impl Decoder for StartupCodec {
    type Item = StartupMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let len = match self.declared_length {
            Some(len) => len,
            None => {
                // Need at least 8 bytes (length + code)
                if src.len() < 8 {
                    return Ok(None);
                }
                // Peek at the length (don't consume yet)
                i32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize
            }
        };
        if len < 8 || len > self.max_message_size {
            return Err(ProtocolError::InvalidMessage);
        }

        // The length word is still buffered unless detection already took it.
        let remaining = if self.declared_length.is_some() {
            len - 4
        } else {
            len
        };
        if src.len() < remaining {
            src.reserve(remaining - src.len());
            return Ok(None);
        }

        let mut msg_buf = src.split_to(remaining);
        if self.declared_length.take().is_none() {
            msg_buf.advance(4);
        }
        let msg = StartupMessage::decode(&mut msg_buf)?;
        Ok(Some(msg))
    }
}

/// Messages sent by the frontend (client) after the startup packet.
#[derive(Debug)]
pub enum FrontendMessage {
    /// 'Q' - Simple query
    Query(String),
    /// 'p' - Password response to an authentication request
    Password(String),
    /// 'X' - Termination
    Terminate,
    /// Any other message type. Its body has been consumed.
    Unsupported(u8),
}

impl FrontendMessage {
    pub fn tag(&self) -> u8 {
        match self {
            FrontendMessage::Query(_) => b'Q',
            FrontendMessage::Password(_) => b'p',
            FrontendMessage::Terminate => b'X',
            FrontendMessage::Unsupported(tag) => *tag,
        }
    }

    /// Decodes a frontend message from the buffer.
    /// The buffer should contain the complete message (type, length and body).
    fn decode(src: &mut BytesMut) -> Result<Self, ProtocolError> {
        let msg_type = src.get_u8();
        let length = src.get_i32() as usize;
        match msg_type {
            b'Q' => Ok(FrontendMessage::Query(get_sized_cstring(src, length)?)),
            b'p' => Ok(FrontendMessage::Password(get_sized_cstring(src, length)?)),
            b'X' => Ok(FrontendMessage::Terminate),
            _ => Ok(FrontendMessage::Unsupported(msg_type)),
        }
    }
}

impl Decoder for PostgresCodec {
    type Item = FrontendMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Need at least 5 bytes (type + length)
        if src.len() < 5 {
            return Ok(None);
        }

        // Peek at the length (bytes 1-4, don't consume yet)
        let len = i32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
        if len < 4 || len > self.max_message_size {
            return Err(ProtocolError::InvalidMessage);
        }

        // Total message size = 1 (type byte) + length
        let len = 1 + len;

        // Wait for complete message
        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        // Ready to decode - consume the message and decode it
        let mut msg_buf = src.split_to(len);
        let msg = FrontendMessage::decode(&mut msg_buf)?;
        Ok(Some(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};
    use tokio_util::codec::Decoder;

    /// Helper to create a startup message with given code and body
    fn make_startup_message(code: i32, body: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        let len = 4 + 4 + body.len(); // length + code + body
        buf.put_i32(len as i32);
        buf.put_i32(code);
        buf.extend_from_slice(body);
        buf
    }

    /// Helper to create a frontend message with given type and body
    fn make_frontend_message(msg_type: u8, body: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(msg_type);
        let len = 4 + body.len(); // length includes self (4 bytes) + body
        buf.put_i32(len as i32);
        buf.extend_from_slice(body);
        buf
    }

    /// Helper to decode a StartupMessage from bytes
    fn decode_startup_message(buf: &[u8]) -> Result<Option<StartupMessage>, ProtocolError> {
        let mut codec = StartupCodec::new();
        let mut bytes = BytesMut::from(buf);
        codec.decode(&mut bytes)
    }

    /// Helper to decode a FrontendMessage from bytes
    fn decode_frontend_message(buf: &[u8]) -> Result<Option<FrontendMessage>, ProtocolError> {
        let mut codec = PostgresCodec::new();
        let mut bytes = BytesMut::from(buf);
        codec.decode(&mut bytes)
    }

    #[test]
    fn test_read_ssl_request() {
        let buf = make_startup_message(SSL_REQUEST_CODE, &[]);
        let msg = decode_startup_message(&buf).unwrap();
        assert!(matches!(msg, Some(StartupMessage::SslRequest)));
    }

    #[test]
    fn test_read_gssenc_request() {
        let buf = make_startup_message(GSSENC_REQUEST_CODE, &[]);
        let msg = decode_startup_message(&buf).unwrap();
        assert!(matches!(msg, Some(StartupMessage::GssEncRequest)));
    }

    #[test]
    fn test_read_startup_message() {
        let mut body = Vec::new();
        body.extend_from_slice(b"user\0SA\0");
        body.extend_from_slice(b"database\0/\0");
        body.extend_from_slice(b"application_name\0psql\0");
        body.push(0); // terminator

        let buf = make_startup_message(3 << 16, &body);
        let msg = decode_startup_message(&buf).unwrap();

        let Some(StartupMessage::Startup {
            major,
            minor,
            parameters,
        }) = msg
        else {
            panic!("expected Startup message, got {msg:?}")
        };

        assert_eq!((major, minor), (3, 0));
        assert_eq!(parameters.user, "SA");
        assert_eq!(parameters.database, "/");
        assert_eq!(parameters.application_name.as_deref(), Some("psql"));
    }

    #[test]
    fn test_read_startup_with_declared_length() {
        let mut body = Vec::new();
        body.extend_from_slice(b"user\0SA\0database\0mem\0\0");
        let buf = make_startup_message(3 << 16, &body);

        // Detection already consumed the length word.
        let mut codec = StartupCodec::with_declared_length(buf.len());
        let mut bytes = BytesMut::from(&buf[4..]);
        bytes.extend_from_slice(b"p");

        let msg = codec.decode(&mut bytes).unwrap();
        assert!(matches!(msg, Some(StartupMessage::Startup { .. })));
        // Exactly the declared packet was consumed.
        assert_eq!(bytes, b"p"[..]);
        assert!(codec.declared_length.is_none());
    }

    #[test]
    fn test_read_startup_with_declared_length_waits() {
        let body = b"user\0SA\0database\0mem\0\0";
        let buf = make_startup_message(3 << 16, body);
        let mut codec = StartupCodec::with_declared_length(buf.len());
        let mut bytes = BytesMut::from(&buf[4..buf.len() - 1]);
        assert!(codec.decode(&mut bytes).unwrap().is_none());
        assert_eq!(codec.declared_length, Some(buf.len()));
    }

    #[test]
    fn test_read_startup_message_missing_user() {
        let mut body = Vec::new();
        body.extend_from_slice(b"database\0testdb\0");
        body.push(0); // terminator

        let buf = make_startup_message(3 << 16, &body);
        let result = decode_startup_message(&buf);

        assert!(matches!(
            result,
            Err(ProtocolError::MissingParameter("user"))
        ));
    }

    #[test]
    fn test_read_startup_message_missing_database() {
        let buf = make_startup_message(3 << 16, b"user\0SA\0\0");
        assert!(matches!(
            decode_startup_message(&buf),
            Err(ProtocolError::MissingParameter("database"))
        ));
    }

    #[test]
    fn test_read_startup_message_unterminated_pairs() {
        let buf = make_startup_message(3 << 16, b"user\0SA\0database\0mem\0");
        assert!(matches!(
            decode_startup_message(&buf),
            Err(ProtocolError::UnterminatedString)
        ));
    }

    #[test]
    fn test_read_startup_accepts_any_version() {
        let buf = make_startup_message((2 << 16) | 7, b"user\0SA\0database\0mem\0\0");
        let Some(StartupMessage::Startup {
            major,
            minor,
            parameters,
        }) = decode_startup_message(&buf).unwrap()
        else {
            panic!("expected startup message");
        };
        assert_eq!((major, minor), (2, 7));
        assert_eq!(parameters.user, "SA");
        assert_eq!(parameters.database, "mem");
    }

    #[test]
    fn test_read_eof() {
        let buf = Vec::new();
        let msg = decode_frontend_message(&buf).unwrap();
        assert!(msg.is_none());
    }

    #[test]
    fn test_read_unsupported_message_type() {
        let mut buf = make_frontend_message(b'P', b"stmt\0select 1\0\0\0");
        buf.extend(make_frontend_message(b'X', &[]));

        let mut codec = PostgresCodec::new();
        let mut bytes = BytesMut::from(&buf[..]);
        let msg = codec.decode(&mut bytes).unwrap();
        assert!(matches!(msg, Some(FrontendMessage::Unsupported(b'P'))));
        // The body was skipped, so the next message decodes cleanly.
        let msg = codec.decode(&mut bytes).unwrap();
        assert!(matches!(msg, Some(FrontendMessage::Terminate)));
    }

    #[test]
    fn test_read_query_message() {
        let buf = make_frontend_message(b'Q', b"SELECT 1\0");
        let msg = decode_frontend_message(&buf).unwrap().unwrap();

        let FrontendMessage::Query(q) = msg else {
            panic!("expected Query message, got {msg:?}")
        };

        assert_eq!(q, "SELECT 1");
    }

    #[test]
    fn test_read_query_with_embedded_nul() {
        let buf = make_frontend_message(b'Q', b"SELECT\0 1\0");
        assert!(matches!(
            decode_frontend_message(&buf),
            Err(ProtocolError::EmbeddedNul(6))
        ));
    }

    #[test]
    fn test_read_password_message() {
        let buf = make_frontend_message(b'p', b"secret\0");
        let msg = decode_frontend_message(&buf).unwrap().unwrap();
        let FrontendMessage::Password(password) = msg else {
            panic!("expected Password message, got {msg:?}")
        };
        assert_eq!(password, "secret");
    }

    #[test]
    fn test_read_terminate_message() {
        let buf = make_frontend_message(b'X', &[]);
        let msg = decode_frontend_message(&buf).unwrap().unwrap();
        assert!(matches!(msg, FrontendMessage::Terminate));
    }
}
