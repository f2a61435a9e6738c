use tokio::io::{AsyncRead, AsyncWrite, DuplexStream};
use tokio::net::TcpStream;

/// A bidirectional byte stream a connection can be served on.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Encrypted streams cannot cheaply report buffered input, so protocol
    /// detection reads from them without a polling window.
    fn is_secure(&self) -> bool {
        false
    }
}

impl Transport for TcpStream {}

// In-memory pipes, used to drive connections without sockets.
impl Transport for DuplexStream {}
