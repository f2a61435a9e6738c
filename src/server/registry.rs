use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tracing::info;

use crate::server::connection::ConnectionHandle;

/// A registry of open connections.
///
/// Connections add themselves when created and remove themselves when
/// released. The server uses it to reach every open connection at shutdown.
pub struct Registry {
    // connection id -> ConnectionHandle
    connections: Mutex<HashMap<u32, Arc<ConnectionHandle>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Creates and registers the handle of a new connection.
    pub(crate) fn register(&self) -> Arc<ConnectionHandle> {
        let handle = Arc::new(ConnectionHandle::new());
        self.connections.lock().insert(handle.id(), handle.clone());
        handle
    }

    /// Unregisters a connection when it terminates.
    pub(crate) fn unregister(&self, id: u32) -> bool {
        self.connections.lock().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.connections.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Snapshot of the open connections.
    pub fn handles(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.lock().values().cloned().collect()
    }

    /// Force-closes every open connection and waits for all releases.
    pub async fn shutdown(&self) {
        // The lock is not held across the awaits: releasing connections
        // unregister themselves.
        let handles = self.handles();
        info!(connections = handles.len(), "Closing open connections");
        join_all(handles.iter().map(|handle| handle.force_close())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_unregister() {
        let registry = Registry::new();
        let a = registry.register();
        let b = registry.register();
        assert_eq!(registry.len(), 2);

        assert!(registry.unregister(a.id()));
        assert!(!registry.unregister(a.id()));
        assert_eq!(registry.handles().len(), 1);
        assert_eq!(registry.handles()[0].id(), b.id());
    }

    #[tokio::test]
    async fn test_shutdown_closes_all() {
        let registry = Arc::new(Registry::new());
        let mut tasks = Vec::new();
        for _ in 0..3 {
            let handle = registry.register();
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                handle.interrupt().cancelled().await;
                if handle.begin_release() {
                    registry.unregister(handle.id());
                    handle.finish_release();
                }
            }));
        }

        registry.shutdown().await;
        assert!(registry.is_empty());
        for task in tasks {
            task.await.unwrap();
        }
    }
}
