use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use tokio_util::codec::{Framed, FramedParts};
use tracing::{debug, trace, warn};

use super::{Connection, ConnectionError, interruptible, reset_buffers};
use crate::protocol::native::{
    ConnectRequest, ErrorInfo, NETWORK_COMPATIBILITY_VERSION, NativeCodec, Request, Response,
    error_code, version,
};
use crate::server::binder::auth_error_info;
use crate::server::transport::Transport;

type NativeFramed<T> = Framed<T, NativeCodec>;

impl Connection {
    /// Serves a native client whose version token has been read.
    /// `read_buf` holds whatever followed the token.
    pub(super) async fn serve_native<T: Transport>(
        &mut self,
        transport: T,
        read_buf: BytesMut,
        version_token: i32,
    ) -> Result<(), ConnectionError> {
        let mut parts = FramedParts::new::<&mut Response>(transport, NativeCodec::new());
        parts.read_buf = read_buf;
        let mut framed = Framed::from_parts(parts);

        let result = self.native_session(&mut framed, version_token).await;
        self.release(framed.into_inner()).await;
        result
    }

    async fn native_session<T: Transport>(
        &mut self,
        framed: &mut NativeFramed<T>,
        version_token: i32,
    ) -> Result<(), ConnectionError> {
        let client = version::from_token(version_token);
        if client != NETWORK_COMPATIBILITY_VERSION {
            let mut response = Response::Error(ErrorInfo::versions_incompatible(
                &client,
                NETWORK_COMPATIBILITY_VERSION,
            ));
            self.write_response(framed, &mut response).await?;
            return Err(ConnectionError::VersionMismatch {
                client,
                server: NETWORK_COMPATIBILITY_VERSION.to_string(),
            });
        }

        let request = self
            .read_request(framed)
            .await?
            .ok_or(ConnectionError::HandshakeDisconnect)?;
        let Request::Connect(connect) = request else {
            let tag = request.tag();
            let mut response = Response::Error(ErrorInfo::protocol_violation(format!(
                "expected a connect request, got 0x{tag:02x}"
            )));
            self.write_response(framed, &mut response).await?;
            return Err(ConnectionError::UnexpectedHandshakeFrame(tag));
        };

        // A failed bind still completes the handshake; the client gets the
        // error frame and may connect again.
        let mut credentials = None;
        let mut response = self.connect(connect, &mut credentials);
        self.write_response(framed, &mut response).await?;

        if !self.handle.mark_running() {
            return Ok(());
        }
        self.native_loop(framed, credentials).await
    }

    async fn native_loop<T: Transport>(
        &mut self,
        framed: &mut NativeFramed<T>,
        mut credentials: Option<ConnectRequest>,
    ) -> Result<(), ConnectionError> {
        while self.handle.is_running() {
            let Some(request) = self.read_request(framed).await? else {
                debug!("Client closed the stream");
                break;
            };
            if !self.handle.is_running() {
                debug!("Stop requested; dropping pending request");
                break;
            }
            trace!(?request, "Native request");

            match request {
                Request::Connect(connect) => {
                    let mut response = self.connect(connect, &mut credentials);
                    self.write_response(framed, &mut response).await?;
                }
                Request::Disconnect => {
                    debug!("Client disconnected");
                    self.handle.request_stop();
                }
                Request::ResetSession => self.reset_session(credentials.as_ref()),
                request => {
                    let mut response = match self.session.as_mut() {
                        Some(session) => session.execute(request),
                        None => Response::Error(ErrorInfo::no_session()),
                    };
                    let written = self.write_response(framed, &mut response).await;
                    response.release();
                    match written {
                        Err(ConnectionError::Protocol(e)) => {
                            warn!(error = %e, "Response could not be encoded");
                            let mut response = Response::Error(ErrorInfo::new(
                                error_code::INTERNAL,
                                "XX000",
                                format!("response could not be encoded: {e}"),
                            ));
                            self.write_response(framed, &mut response).await?;
                        }
                        written => written?,
                    }
                }
            }
            reset_buffers(framed);
        }
        Ok(())
    }

    /// Binds a session for `connect`, replacing the current one.
    fn connect(
        &mut self,
        connect: ConnectRequest,
        credentials: &mut Option<ConnectRequest>,
    ) -> Response {
        self.replace_session(None);
        let bound = self.ctx.binder().bind(
            self.handle.id(),
            &connect.database,
            &connect.user,
            &connect.password,
            connect.attribute,
        );
        match bound {
            Ok(session) => {
                let response = Response::ConnectAck {
                    session_id: session.id(),
                    database_id: session.database_id(),
                };
                self.replace_session(Some(session));
                *credentials = Some(connect);
                response
            }
            Err(e) => {
                warn!(user = %connect.user, error = %e, "Connect refused");
                *credentials = None;
                Response::Error(auth_error_info(&e))
            }
        }
    }

    /// Replaces the session with a fresh one for the same credentials.
    fn reset_session(&mut self, credentials: Option<&ConnectRequest>) {
        self.replace_session(None);
        let Some(connect) = credentials else {
            return;
        };
        match self.ctx.binder().bind(
            self.handle.id(),
            &connect.database,
            &connect.user,
            &connect.password,
            connect.attribute,
        ) {
            Ok(session) => self.replace_session(Some(session)),
            Err(e) => warn!(error = %e, "Session reset failed"),
        }
    }

    async fn read_request<T: Transport>(
        &mut self,
        framed: &mut NativeFramed<T>,
    ) -> Result<Option<Request>, ConnectionError> {
        Ok(interruptible(&self.handle, framed.next())
            .await?
            .transpose()?)
    }

    async fn write_response<T: Transport>(
        &mut self,
        framed: &mut NativeFramed<T>,
        response: &mut Response,
    ) -> Result<(), ConnectionError> {
        interruptible(&self.handle, framed.send(response)).await??;
        Ok(())
    }
}
