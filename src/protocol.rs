//! Wire protocols spoken by the server.
//!
//! Two incompatible families share one listening port:
//!
//! - [`native`]: the engine's own tagged binary frames.
//! - [`pg`]: a PostgreSQL v3 compatible subset for third-party clients.
//!
//! Both are `tokio_util` codecs over `BytesMut` and report failures as
//! [`ProtocolError`].

pub mod error;
pub mod native;
pub mod pg;

pub use error::ProtocolError;
