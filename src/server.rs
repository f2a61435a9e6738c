//! Network server accepting native and compatibility-protocol clients on
//! one port.
//!
//! ## Architecture
//!
//! ```text
//! +--------+
//! | Server |  <- Accepts TCP connections
//! +--------+
//!      |
//!      v
//! +-----+
//! | Tls |  <- Optional; upgrades the stream before detection
//! +-----+
//!      |
//!      v
//! +------------+     +---------+
//! | Connection | --> | Sniffer |  <- Picks the protocol family
//! +------------+     +---------+
//!      |
//!      v
//! +-----------+     +--------+
//! | Handshake | --> | Binder |  <- Opens a session
//! +-----------+     +--------+
//!      |
//!      v
//! +----------+
//! | Registry |  <- Open connections, swept at shutdown
//! +----------+
//! ```
//!
//! ## Terminology
//!
//! - **Server**: TCP listener that spawns connections
//! - **Tls**: Server-side TLS handshake for accepted streams
//! - **Connection**: Per-client task running a handshake and a request loop
//! - **Sniffer**: Protocol detection from the first word on the wire
//! - **Handshake**: Startup and authentication of a compatibility client
//! - **Binder**: Resolves a database name and asks the session manager for a session
//! - **Registry**: Tracks open connections so the server can close them all

pub mod binder;
pub mod connection;
pub mod context;
pub mod handshake;
pub mod listener;
pub mod registry;
pub mod sniffer;
pub mod tls;
pub mod transport;

pub use connection::{ConnectionError, ConnectionHandle, Phase};
pub use context::ServerContext;
pub use listener::Server;
pub use registry::Registry;
pub use tls::TlsAcceptor;
pub use transport::Transport;
