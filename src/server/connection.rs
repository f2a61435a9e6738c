mod error;
mod lifecycle;
mod native;
mod pg;

pub use error::ConnectionError;
pub use lifecycle::{ConnectionHandle, Phase};

use std::future::Future;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::server::context::ServerContext;
use crate::server::sniffer::{self, Detected};
use crate::server::transport::Transport;
use crate::session::Session;

/// Base capacity of the read and write buffers between requests.
const BUFFER_SIZE: usize = 8 * 1024;

/// A single client connection.
///
/// The protocol family is detected once from the first bytes on the wire
/// and selects one of two handshake and request loops. Whatever ends the
/// connection, the session is closed before the transport is shut down,
/// and both happen once.
pub(crate) struct Connection {
    ctx: Arc<ServerContext>,
    handle: Arc<ConnectionHandle>,
    session: Option<Box<dyn Session>>,
}

impl Connection {
    /// Creates the connection and adds it to the registry.
    pub(crate) fn new(ctx: Arc<ServerContext>) -> Self {
        let handle = ctx.registry().register();
        Self {
            ctx,
            handle,
            session: None,
        }
    }

    pub(crate) fn handle(&self) -> &Arc<ConnectionHandle> {
        &self.handle
    }

    pub(crate) async fn run<T: Transport>(mut self, transport: T) {
        info!("Connection accepted");
        match self.serve(transport).await {
            Ok(()) => {}
            Err(e) if e.is_disconnect() => debug!(error = %e, "Connection ended"),
            Err(e) => warn!(error = %e, "Connection failed"),
        }
        info!("Connection closed");
    }

    async fn serve<T: Transport>(&mut self, mut transport: T) -> Result<(), ConnectionError> {
        let mut buf = BytesMut::with_capacity(BUFFER_SIZE);
        let window = self.ctx.detect_window();
        let sniffed = interruptible(
            &self.handle,
            sniffer::sniff(&mut transport, &mut buf, window),
        )
        .await;
        let detected = match sniffed {
            Ok(Ok(detected)) => detected,
            Ok(Err(e)) | Err(e) => {
                self.release(transport).await;
                return Err(e);
            }
        };

        match detected {
            Detected::Native { version_token } => {
                debug!("Native protocol client");
                self.serve_native(transport, buf, version_token).await
            }
            Detected::Compatibility { declared_length } => {
                debug!("Compatibility protocol client");
                self.serve_compat(transport, buf, declared_length).await
            }
        }
    }

    /// Installs a new session, closing the previous one.
    fn replace_session(&mut self, session: Option<Box<dyn Session>>) {
        if let Some(mut old) = std::mem::replace(&mut self.session, session) {
            old.close();
        }
    }

    /// Closes the session, then the transport, then leaves the registry.
    async fn release<T: Transport>(&mut self, mut transport: T) {
        self.handle.request_stop();
        if !self.handle.begin_release() {
            return;
        }
        self.replace_session(None);
        if let Err(e) = transport.shutdown().await {
            debug!(error = %e, "Transport shutdown failed");
        }
        drop(transport);
        self.ctx.registry().unregister(self.handle.id());
        self.handle.finish_release();
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Reached without a release only when the task is dropped mid-cycle.
        if self.handle.begin_release() {
            self.replace_session(None);
            self.ctx.registry().unregister(self.handle.id());
            self.handle.finish_release();
        }
    }
}

/// Runs `fut` unless the connection is force-closed first.
pub(crate) async fn interruptible<F: Future>(
    handle: &ConnectionHandle,
    fut: F,
) -> Result<F::Output, ConnectionError> {
    tokio::select! {
        biased;
        _ = handle.interrupt().cancelled() => Err(ConnectionError::ForcedClose),
        output = fut => Ok(output),
    }
}

/// Drops buffers that grew past their base size for a large frame.
fn reset_buffers<T, U>(framed: &mut Framed<T, U>) {
    let read = framed.read_buffer_mut();
    if read.is_empty() && read.capacity() > BUFFER_SIZE {
        *read = BytesMut::with_capacity(BUFFER_SIZE);
    }
    let write = framed.write_buffer_mut();
    if write.is_empty() && write.capacity() > BUFFER_SIZE {
        *write = BytesMut::with_capacity(BUFFER_SIZE);
    }
}
