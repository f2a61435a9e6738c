use std::sync::Arc;

use tracing::info;

use crate::protocol::native::{ErrorInfo, error_code};
use crate::session::{AuthError, Session, SessionManager};

/// Resolves database names and opens sessions through the session manager.
pub struct SessionBinder {
    manager: Arc<dyn SessionManager>,
    /// Database names in index order.
    databases: Vec<String>,
}

impl SessionBinder {
    pub fn new(manager: Arc<dyn SessionManager>, databases: Vec<String>) -> Self {
        Self { manager, databases }
    }

    /// Maps a database name to its index. The empty name is the default
    /// (first) database.
    pub fn resolve(&self, database: &str) -> Result<i32, AuthError> {
        if database.is_empty() && !self.databases.is_empty() {
            return Ok(0);
        }
        self.databases
            .iter()
            .position(|name| name == database)
            .map(|i| i as i32)
            .ok_or_else(|| AuthError::UnknownDatabase(database.to_string()))
    }

    pub fn bind(
        &self,
        connection: u32,
        database: &str,
        user: &str,
        credential: &str,
        attribute: i32,
    ) -> Result<Box<dyn Session>, AuthError> {
        info!(connection, user, database, "Trying to connect user");
        let database_id = self.resolve(database)?;
        let session = self
            .manager
            .new_session(database_id, user, credential, attribute)?;
        info!(
            connection,
            user,
            session = session.id(),
            database = database_id,
            "Connected user"
        );
        Ok(session)
    }
}

/// Native error frame for a failed bind.
pub fn auth_error_info(err: &AuthError) -> ErrorInfo {
    let (code, sql_state) = match err {
        AuthError::UnknownDatabase(_) => (error_code::UNKNOWN_DATABASE, "08004"),
        AuthError::InvalidAuthorization(_) => (error_code::INVALID_AUTHORIZATION, "28000"),
        AuthError::Internal(_) => (error_code::INTERNAL, "XX000"),
    };
    ErrorInfo::new(code, sql_state, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionManager;

    fn binder() -> SessionBinder {
        let manager = Arc::new(MemorySessionManager::new([("SA", "")], 2));
        SessionBinder::new(manager, vec!["main".to_string(), "scratch".to_string()])
    }

    #[test]
    fn test_resolve() {
        let binder = binder();
        assert_eq!(binder.resolve("").unwrap(), 0);
        assert_eq!(binder.resolve("main").unwrap(), 0);
        assert_eq!(binder.resolve("scratch").unwrap(), 1);
        assert!(matches!(
            binder.resolve("other"),
            Err(AuthError::UnknownDatabase(_))
        ));
    }

    #[test]
    fn test_bind() {
        let binder = binder();
        let session = binder.bind(1, "scratch", "SA", "", 0).unwrap();
        assert_eq!(session.database_id(), 1);

        let err = binder.bind(1, "", "SA", "nope", 0).err().unwrap();
        assert_eq!(auth_error_info(&err).sql_state, "28000");
        let err = binder.bind(1, "other", "SA", "", 0).err().unwrap();
        assert_eq!(auth_error_info(&err).code, error_code::UNKNOWN_DATABASE);
    }
}
