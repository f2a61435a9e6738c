use bytes::BytesMut;
use futures_util::StreamExt;
use tokio_util::codec::{Framed, FramedParts};
use tracing::{debug, trace, warn};

use super::{Connection, ConnectionError, interruptible, reset_buffers};
use crate::protocol::native::{ErrorInfo, ExecuteRequest, Request, Response, ResultSet};
use crate::protocol::pg::types::{FormatCode, oid};
use crate::protocol::pg::{
    BackendMessage, FieldDescription, FrontendMessage, PostgresCodec, StartupCodec,
    TransactionStatus,
};
use crate::server::handshake::{Handshake, HandshakeResult, send_messages};
use crate::server::transport::Transport;

type PgFramed<T> = Framed<T, PostgresCodec>;

/// Client-side transaction start, acknowledged separately from the rest of
/// the query text.
const BEGIN_PREFIX: &str = "BEGIN;";

/// Driver lookup of the large-object type, answered with a canned empty result.
const TYPBASETYPE_QUERY: &str = "select oid, typbasetype from";

const SQLSTATE_FEATURE_NOT_SUPPORTED: &str = "0A000";
const SQLSTATE_INTERNAL_ERROR: &str = "XX000";

impl Connection {
    /// Serves a compatibility client whose startup packet length has been
    /// read. `read_buf` holds whatever followed the length word.
    pub(super) async fn serve_compat<T: Transport>(
        &mut self,
        transport: T,
        read_buf: BytesMut,
        declared_length: usize,
    ) -> Result<(), ConnectionError> {
        let mut parts = FramedParts::new::<BackendMessage>(
            transport,
            StartupCodec::with_declared_length(declared_length),
        );
        parts.read_buf = read_buf;
        let mut startup = Framed::from_parts(parts);

        let handshake = Handshake::new(self.handle.clone(), self.ctx.clone());
        let parameters = match handshake.read_startup(&mut startup).await {
            Ok(parameters) => parameters,
            Err(e) => {
                self.release(startup.into_inner()).await;
                return Err(e);
            }
        };

        let mut framed = startup.map_codec(StartupCodec::ready);
        let result = match handshake.authenticate(&mut framed, &parameters).await {
            Ok(HandshakeResult::Success(session)) => {
                self.replace_session(Some(session));
                if self.handle.mark_running() {
                    self.compat_loop(&mut framed).await
                } else {
                    Ok(())
                }
            }
            Ok(HandshakeResult::Abandoned) => Ok(()),
            Err(e) => Err(e),
        };
        self.release(framed.into_inner()).await;
        result
    }

    async fn compat_loop<T: Transport>(
        &mut self,
        framed: &mut PgFramed<T>,
    ) -> Result<(), ConnectionError> {
        let mut status = TransactionStatus::Idle;
        while self.handle.is_running() {
            let message = interruptible(&self.handle, framed.next())
                .await?
                .transpose()?;
            let Some(message) = message else {
                debug!("Client closed the stream");
                break;
            };
            if !self.handle.is_running() {
                debug!("Stop requested; dropping pending message");
                break;
            }

            let mut replies = match message {
                FrontendMessage::Terminate => {
                    debug!("Client terminated");
                    self.handle.request_stop();
                    continue;
                }
                FrontendMessage::Query(query) => self.simple_query(&query, &mut status),
                other => {
                    debug!(tag = %char::from(other.tag()), "Unsupported message");
                    vec![BackendMessage::error(
                        SQLSTATE_FEATURE_NOT_SUPPORTED,
                        format!("Unsupported operation type ({})", char::from(other.tag())),
                    )]
                }
            };
            replies.push(BackendMessage::ReadyForQuery { status });
            match send_messages(&self.handle, framed, replies).await {
                Err(ConnectionError::Protocol(e)) => {
                    warn!(error = %e, "Reply could not be encoded");
                    let replies = vec![
                        BackendMessage::error(
                            SQLSTATE_INTERNAL_ERROR,
                            format!("reply could not be encoded: {e}"),
                        ),
                        BackendMessage::ReadyForQuery { status },
                    ];
                    send_messages(&self.handle, framed, replies).await?;
                }
                sent => sent?,
            }
            reset_buffers(framed);
        }
        Ok(())
    }

    /// Runs one simple query. The caller appends ready-for-query.
    fn simple_query(&mut self, query: &str, status: &mut TransactionStatus) -> Vec<BackendMessage> {
        let mut replies = Vec::new();
        let mut sql = query;
        if let Some(rest) = sql.strip_prefix(BEGIN_PREFIX) {
            debug!("Client transaction started");
            replies.push(BackendMessage::command_complete("BEGIN"));
            *status = TransactionStatus::InTransaction;
            sql = rest;
        }

        let sql = sql.trim();
        let normalized = sql.to_lowercase();
        trace!(query = sql, "Compatibility query");

        if normalized.is_empty() {
            replies.push(BackendMessage::EmptyQueryResponse);
        } else if normalized.starts_with(TYPBASETYPE_QUERY) {
            replies.push(typbasetype_description());
            replies.push(BackendMessage::command_complete("SELECT 0"));
        } else if normalized.starts_with("select ") {
            let response = self.execute(Request::Execute(ExecuteRequest::query(sql)));
            replies.extend(select_replies(response));
        } else {
            let response = self.execute(Request::Execute(ExecuteRequest::update(sql)));
            replies.push(match response {
                Response::UpdateCount(count) => {
                    BackendMessage::command_complete(format!("UPDATE {count}"))
                }
                other => unexpected_response(other),
            });
            if matches!(
                normalized.trim_end_matches(';'),
                "commit" | "rollback" | "end"
            ) {
                *status = TransactionStatus::Idle;
            }
        }
        replies
    }

    fn execute(&mut self, request: Request) -> Response {
        match self.session.as_mut() {
            Some(session) => session.execute(request),
            None => Response::Error(ErrorInfo::no_session()),
        }
    }
}

/// RowDescription, DataRows and CommandComplete for a select.
fn select_replies(response: Response) -> Vec<BackendMessage> {
    let Response::Data(mut result) = response else {
        return vec![unexpected_response(response)];
    };

    let mut replies = vec![row_description(&result)];
    let mut count = 0usize;
    while let Some(row) = result.cursor.next_row() {
        count += 1;
        replies.push(BackendMessage::DataRow {
            values: row.iter().map(|value| value.to_text()).collect(),
        });
    }
    result.cursor.close();
    replies.push(BackendMessage::command_complete(format!("SELECT {count}")));
    replies
}

fn row_description(result: &ResultSet) -> BackendMessage {
    BackendMessage::RowDescription {
        fields: result
            .columns
            .iter()
            .map(|column| FieldDescription::text(column.label.clone()))
            .collect(),
    }
}

fn typbasetype_description() -> BackendMessage {
    let field = |name: &str, column_attr: i16| FieldDescription {
        name: name.to_string(),
        table_oid: 101,
        column_attr,
        type_oid: oid::OID,
        type_size: 4,
        type_modifier: -1,
        format: FormatCode::Text,
    };
    BackendMessage::RowDescription {
        fields: vec![field("oid", 102), field("typbasetype", 103)],
    }
}

fn unexpected_response(mut response: Response) -> BackendMessage {
    let message = match &response {
        Response::Error(err) => return BackendMessage::error(&err.sql_state, err.message.clone()),
        Response::Data(_) => "statement returned rows where an update count was expected",
        Response::UpdateCount(_) => "statement returned an update count where rows were expected",
        Response::ConnectAck { .. } => "unexpected connect acknowledgement",
    };
    response.release();
    BackendMessage::error(SQLSTATE_INTERNAL_ERROR, message)
}
