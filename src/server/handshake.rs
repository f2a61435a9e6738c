use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio_util::codec::{Encoder, Framed};
use tracing::{debug, info};

use crate::protocol::ProtocolError;
use crate::protocol::pg::{
    BackendMessage, FrontendMessage, PostgresCodec, StartupCodec, StartupMessage,
    StartupParameters, TransactionStatus,
};
use crate::server::connection::{ConnectionError, ConnectionHandle, interruptible};
use crate::server::context::ServerContext;
use crate::server::transport::Transport;
use crate::session::{AuthError, Session};

/// Parameters announced after authentication. They describe the server
/// personality, not the state of any database.
const SERVER_PARAMETERS: [(&str, &str); 9] = [
    ("client_encoding", "UTF8"),
    ("DateStyle", "ISO, MDY"),
    ("integer_datetimes", "on"),
    ("is_superuser", "on"),
    ("server_encoding", "UTF8"),
    ("server_version", "8.3.1"),
    ("session_authorization", "SA"),
    ("standard_conforming_strings", "off"),
    ("TimeZone", "UTC"),
];

/// Database name compatibility clients send for the default database,
/// since they cannot send an empty one.
const DEFAULT_DATABASE_ALIAS: &str = "/";

const SQLSTATE_PROTOCOL_VIOLATION: &str = "08P01";

/// Outcome of compatibility authentication.
pub enum HandshakeResult {
    /// Authenticated; the query phase can start.
    Success(Box<dyn Session>),
    /// The client hung up when asked for a password. psql does this once
    /// before retrying with a password prompt.
    Abandoned,
}

/// A compatibility-protocol client handshake.
///
/// The startup packet is read with the startup codec; authentication runs
/// after the codec has been switched to the query phase, since the password
/// arrives as a regular tagged message.
pub struct Handshake {
    handle: Arc<ConnectionHandle>,
    ctx: Arc<ServerContext>,
}

impl Handshake {
    pub fn new(handle: Arc<ConnectionHandle>, ctx: Arc<ServerContext>) -> Self {
        Self { handle, ctx }
    }

    /// Reads the startup packet, refusing any encryption request first.
    pub async fn read_startup<T: Transport>(
        &self,
        framed: &mut Framed<T, StartupCodec>,
    ) -> Result<StartupParameters, ConnectionError> {
        loop {
            let message = match interruptible(&self.handle, framed.next()).await? {
                Some(Ok(message)) => message,
                Some(Err(e)) => return Err(self.reject(framed, e).await),
                None => return Err(ConnectionError::HandshakeDisconnect),
            };

            match message {
                StartupMessage::SslRequest | StartupMessage::GssEncRequest => {
                    debug!("Refusing encryption request");
                    self.send(framed, vec![BackendMessage::EncryptionRefused])
                        .await?;
                }
                StartupMessage::Startup {
                    major,
                    minor,
                    parameters,
                } => {
                    info!(
                        major,
                        minor,
                        user = %parameters.user,
                        database = %parameters.database,
                        "Compatibility client connected"
                    );
                    return Ok(parameters);
                }
            }
        }
    }

    /// Requests a cleartext password and binds a session with it.
    pub async fn authenticate<T: Transport>(
        &self,
        framed: &mut Framed<T, PostgresCodec>,
        parameters: &StartupParameters,
    ) -> Result<HandshakeResult, ConnectionError> {
        self.send(framed, vec![BackendMessage::AuthenticationCleartextPassword])
            .await?;

        let password = match interruptible(&self.handle, framed.next()).await? {
            Some(Ok(FrontendMessage::Password(password))) => password,
            Some(Ok(other)) => {
                return Err(self
                    .reject(framed, ProtocolError::ExpectedPassword(other.tag()))
                    .await);
            }
            Some(Err(e)) => return Err(self.reject(framed, e).await),
            None => {
                debug!("Client left before sending a password");
                return Ok(HandshakeResult::Abandoned);
            }
        };

        let database = if parameters.database == DEFAULT_DATABASE_ALIAS {
            ""
        } else {
            parameters.database.as_str()
        };
        let session = match self.ctx.binder().bind(
            self.handle.id(),
            database,
            &parameters.user,
            &password,
            0,
        ) {
            Ok(session) => session,
            Err(e) => {
                let fatal = BackendMessage::fatal(auth_sql_state(&e), e.to_string());
                // The connection fails either way; a write error only hides the reason.
                let _ = self.send(framed, vec![fatal]).await;
                return Err(e.into());
            }
        };

        let mut messages = vec![BackendMessage::AuthenticationOk];
        messages.extend(
            SERVER_PARAMETERS
                .iter()
                .map(|(name, value)| BackendMessage::parameter_status(name, value)),
        );
        messages.push(BackendMessage::ReadyForQuery {
            status: TransactionStatus::Idle,
        });
        self.send(framed, messages).await?;
        Ok(HandshakeResult::Success(session))
    }

    /// Reports a malformed startup exchange to the client and returns the
    /// error that ends the connection.
    async fn reject<T, C>(&self, framed: &mut Framed<T, C>, e: ProtocolError) -> ConnectionError
    where
        T: Transport,
        C: Encoder<BackendMessage, Error = ProtocolError>,
    {
        if !matches!(e, ProtocolError::Io(_)) {
            let fatal = BackendMessage::fatal(SQLSTATE_PROTOCOL_VIOLATION, e.to_string());
            let _ = self.send(framed, vec![fatal]).await;
        }
        e.into()
    }

    async fn send<T, C>(
        &self,
        framed: &mut Framed<T, C>,
        messages: Vec<BackendMessage>,
    ) -> Result<(), ConnectionError>
    where
        T: Transport,
        C: Encoder<BackendMessage, Error = ProtocolError>,
    {
        send_messages(&self.handle, framed, messages).await
    }
}

/// Writes `messages` and flushes once.
pub(crate) async fn send_messages<T, C>(
    handle: &ConnectionHandle,
    framed: &mut Framed<T, C>,
    messages: Vec<BackendMessage>,
) -> Result<(), ConnectionError>
where
    T: Transport,
    C: Encoder<BackendMessage, Error = ProtocolError>,
{
    interruptible(handle, async {
        for message in messages {
            framed.feed(message).await?;
        }
        SinkExt::<BackendMessage>::flush(&mut *framed).await
    })
    .await??;
    Ok(())
}

fn auth_sql_state(e: &AuthError) -> &'static str {
    match e {
        AuthError::UnknownDatabase(_) => "3D000",
        AuthError::InvalidAuthorization(_) => "28P01",
        AuthError::Internal(_) => "XX000",
    }
}
