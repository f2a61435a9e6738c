use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::server::context::ServerContext;
use crate::server::tls::TlsAcceptor;

/// A client that has not finished the TLS handshake by then is dropped.
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// TCP server accepting native and compatibility clients on one port.
pub struct Server {
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    tcp_nodelay: bool,
    tls: Option<TlsAcceptor>,
}

impl Server {
    pub fn new(listener: TcpListener, ctx: Arc<ServerContext>) -> Self {
        Self {
            listener,
            ctx,
            tcp_nodelay: true,
            tls: None,
        }
    }

    /// Serves every accepted connection over TLS.
    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls = Some(acceptor);
        self
    }

    pub fn with_nodelay(mut self, tcp_nodelay: bool) -> Self {
        self.tcp_nodelay = tcp_nodelay;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Accepts connections until `signal` completes, then force-closes every
    /// open connection and waits for them to release.
    pub async fn serve_with_shutdown<F>(self, signal: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(signal);
        // Pending TLS handshakes; they are not connections yet.
        let mut handshakes = JoinSet::new();
        loop {
            tokio::select! {
                _ = &mut signal => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(self.tcp_nodelay) {
                            warn!(%peer, error = %e, "Failed to set TCP_NODELAY");
                        }
                        match &self.tls {
                            Some(acceptor) => {
                                let ctx = self.ctx.clone();
                                let acceptor = acceptor.clone();
                                handshakes.spawn(accept_tls(ctx, acceptor, stream, peer));
                            }
                            None => {
                                let handle = self.ctx.spawn(stream);
                                info!(%peer, connection = handle.id(), "Accepted connection");
                            }
                        }
                    }
                    // Transient failures such as EMFILE should not stop the server.
                    Err(e) => error!(error = %e, "Accept failed"),
                },
                Some(_) = handshakes.join_next(), if !handshakes.is_empty() => {}
            }
        }

        if !handshakes.is_empty() {
            debug!(pending = handshakes.len(), "Abandoning TLS handshakes");
            handshakes.shutdown().await;
        }
        let open = self.ctx.registry().len();
        info!(open, "Shutting down");
        self.ctx.registry().shutdown().await;
        info!("All connections closed");
    }
}

async fn accept_tls(
    ctx: Arc<ServerContext>,
    acceptor: TlsAcceptor,
    stream: TcpStream,
    peer: SocketAddr,
) {
    match tokio::time::timeout(TLS_HANDSHAKE_TIMEOUT, acceptor.accept(stream)).await {
        Ok(Ok(stream)) => {
            let handle = ctx.spawn(stream);
            info!(%peer, connection = handle.id(), "Accepted TLS connection");
        }
        Ok(Err(e)) => warn!(%peer, error = %e, "TLS handshake failed"),
        Err(_) => warn!(%peer, "TLS handshake timed out"),
    }
}
