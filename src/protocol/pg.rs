//! PostgreSQL-style compatibility wire protocol.
//!
//! Only the subset needed to authenticate with a cleartext password and run
//! simple queries is implemented.
//!
//! ## Architecture
//!
//! ```text
//! +----------+                           +----------+
//! |  Client  |  --- FrontendMessage -->  |  Server  |
//! |  (psql)  |  <-- BackendMessage  ---  | (harbor) |
//! +----------+                           +----------+
//!               ^                   ^
//!               |   PostgresCodec   |
//!               +-------------------+
//! ```
//!
//! ## Terminology
//!
//! - **StartupMessage**: The untagged first packet (SSL/GSS request or Startup)
//! - **FrontendMessage**: Tagged messages from client to server (Query, Password, Terminate)
//! - **BackendMessage**: Messages from server to client (RowDescription, DataRow, etc.)
//! - **Codec**: Framing and serialization for the wire protocol

pub mod backend;
pub mod codec;
pub mod frontend;
pub mod types;

pub use backend::{BackendMessage, ErrorField, FieldDescription, TransactionStatus};
pub use codec::{PostgresCodec, StartupCodec};
pub use frontend::{FrontendMessage, StartupMessage, StartupParameters};
pub use types::{ErrorFieldCode, FormatCode};
