use std::sync::Arc;

use tracing::Instrument;

use crate::config::{Config, ProtocolConfig};
use crate::server::binder::SessionBinder;
use crate::server::connection::{Connection, ConnectionHandle};
use crate::server::registry::Registry;
use crate::server::sniffer::DetectWindow;
use crate::server::transport::Transport;
use crate::session::SessionManager;

/// State shared by the server and every connection it serves.
pub struct ServerContext {
    registry: Arc<Registry>,
    binder: SessionBinder,
    detect_window: DetectWindow,
}

impl ServerContext {
    pub fn new(
        manager: Arc<dyn SessionManager>,
        databases: Vec<String>,
        protocol: &ProtocolConfig,
    ) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            binder: SessionBinder::new(manager, databases),
            detect_window: DetectWindow {
                poll_interval: protocol.poll_interval(),
                max_wait: protocol.max_wait(),
            },
        }
    }

    pub fn from_config(config: &Config, manager: Arc<dyn SessionManager>) -> Self {
        Self::new(
            manager,
            config.databases.iter().map(|d| d.name.clone()).collect(),
            &config.protocol,
        )
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn binder(&self) -> &SessionBinder {
        &self.binder
    }

    pub fn detect_window(&self) -> DetectWindow {
        self.detect_window
    }

    /// Registers a connection for `transport` and serves it on its own task.
    /// The connection is in the registry by the time this returns.
    pub fn spawn<T: Transport>(self: &Arc<Self>, transport: T) -> Arc<ConnectionHandle> {
        let connection = Connection::new(self.clone());
        let handle = connection.handle().clone();
        let span = tracing::info_span!("connection", connection = handle.id());
        tokio::spawn(connection.run(transport).instrument(span));
        handle
    }
}
