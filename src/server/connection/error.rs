use std::io;

use thiserror::Error;

use crate::protocol::ProtocolError;
use crate::session::AuthError;

/// Connection error types.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Protocol error: {0}")]
    Protocol(ProtocolError),
    #[error("unknown client protocol: no data within {0} ms")]
    UnknownClient(u64),
    #[error("client sent an HTTP request to the native protocol port")]
    HttpNotSupported,
    #[error("client network compatibility version {client} does not match {server}")]
    VersionMismatch { client: String, server: String },
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),
    #[error("unexpected request 0x{0:02x} during handshake")]
    UnexpectedHandshakeFrame(u8),
    #[error("client disconnected during handshake")]
    HandshakeDisconnect,
    #[error("connection was closed by the server")]
    ForcedClose,
}

impl From<ProtocolError> for ConnectionError {
    fn from(e: ProtocolError) -> Self {
        // Codec I/O failures are transport failures.
        match e {
            ProtocolError::Io(e) => ConnectionError::Io(e),
            e => ConnectionError::Protocol(e),
        }
    }
}

impl ConnectionError {
    /// Whether this is an ordinary end of the connection rather than a fault.
    pub fn is_disconnect(&self) -> bool {
        match self {
            ConnectionError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            ConnectionError::HandshakeDisconnect | ConnectionError::ForcedClose => true,
            _ => false,
        }
    }
}
