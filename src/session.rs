//! Session management boundary.
//!
//! The network layer never executes SQL itself. A [`SessionManager`]
//! authenticates a user against a database and hands back a [`Session`],
//! which executes native requests and yields native responses. Both the
//! native and the compatibility protocol drive sessions through the same
//! interface.

pub mod memory;

use thiserror::Error;

use crate::protocol::native::{Request, Response};

pub use memory::MemorySessionManager;

/// Classified failure to create a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("database does not exist: {0}")]
    UnknownDatabase(String),
    #[error("invalid authorization specification: {0}")]
    InvalidAuthorization(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Creates sessions for authenticated users.
pub trait SessionManager: Send + Sync {
    /// Authenticates `user` with `credential` against the database at
    /// `database_id`. `attribute` is the client-declared value from the
    /// connect request, passed through untouched.
    fn new_session(
        &self,
        database_id: i32,
        user: &str,
        credential: &str,
        attribute: i32,
    ) -> Result<Box<dyn Session>, AuthError>;
}

/// An authenticated execution context bound to one database.
pub trait Session: Send {
    fn id(&self) -> i64;

    fn database_id(&self) -> i32;

    /// Executes one request. Failures are reported as [`Response::Error`];
    /// a data response may hold a cursor the caller must release.
    fn execute(&mut self, request: Request) -> Response;

    /// Ends the session. Calling this more than once has no further effect.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}
