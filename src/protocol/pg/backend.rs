use bytes::{BufMut, BytesMut};
use tokio_util::codec::Encoder;

use crate::protocol::ProtocolError;
use crate::protocol::pg::codec::{
    PostgresCodec, StartupCodec, begin_message, end_message, put_cstring,
};
use crate::protocol::pg::types::{ErrorFieldCode, FormatCode, oid};

/// Authentication request codes carried by 'R' messages.
const AUTH_OK: i32 = 0;
const AUTH_CLEARTEXT_PASSWORD: i32 = 3;

/// Messages sent by the backend (server) to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendMessage {
    /// Single 'N' byte refusing an SSL or GSS encryption request
    EncryptionRefused,
    /// 'R' - Authentication request for a cleartext password
    AuthenticationCleartextPassword,
    /// 'R' - Authentication response (AuthenticationOk)
    AuthenticationOk,
    /// 'S' - Parameter status notification
    ParameterStatus { name: String, value: String },
    /// 'Z' - Ready for query
    ReadyForQuery { status: TransactionStatus },
    /// 'E' - Error response
    ErrorResponse { fields: Vec<ErrorField> },
    /// 'T' - Row description
    RowDescription { fields: Vec<FieldDescription> },
    /// 'D' - Data row; `None` is SQL NULL
    DataRow { values: Vec<Option<String>> },
    /// 'C' - Command complete
    CommandComplete { tag: String },
    /// 'I' - Empty query response
    EmptyQueryResponse,
}

impl BackendMessage {
    pub fn parameter_status(name: &str, value: &str) -> Self {
        BackendMessage::ParameterStatus {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    pub fn command_complete(tag: impl Into<String>) -> Self {
        BackendMessage::CommandComplete { tag: tag.into() }
    }

    /// An ERROR-severity response; the session continues.
    pub fn error(sql_state: &str, message: impl Into<String>) -> Self {
        Self::error_with_severity("ERROR", sql_state, message.into())
    }

    /// A FATAL-severity response; the connection ends after it.
    pub fn fatal(sql_state: &str, message: impl Into<String>) -> Self {
        Self::error_with_severity("FATAL", sql_state, message.into())
    }

    fn error_with_severity(severity: &str, sql_state: &str, message: String) -> Self {
        BackendMessage::ErrorResponse {
            fields: vec![
                ErrorField::new(ErrorFieldCode::Severity, severity),
                ErrorField::new(ErrorFieldCode::SeverityNonLocalized, severity),
                ErrorField::new(ErrorFieldCode::SqlState, sql_state),
                ErrorField::new(ErrorFieldCode::Message, message),
            ],
        }
    }

    fn encode(&self, dst: &mut BytesMut, max_message_size: usize) -> Result<(), ProtocolError> {
        let len_pos = match self {
            BackendMessage::EncryptionRefused => {
                dst.put_u8(b'N');
                return Ok(());
            }
            BackendMessage::AuthenticationCleartextPassword => {
                let len_pos = begin_message(dst, b'R');
                dst.put_i32(AUTH_CLEARTEXT_PASSWORD);
                len_pos
            }
            BackendMessage::AuthenticationOk => {
                let len_pos = begin_message(dst, b'R');
                dst.put_i32(AUTH_OK);
                len_pos
            }
            BackendMessage::ParameterStatus { name, value } => {
                let len_pos = begin_message(dst, b'S');
                put_cstring(dst, name)?;
                put_cstring(dst, value)?;
                len_pos
            }
            BackendMessage::ReadyForQuery { status } => {
                let len_pos = begin_message(dst, b'Z');
                dst.put_u8(status.as_byte());
                len_pos
            }
            BackendMessage::ErrorResponse { fields } => {
                let len_pos = begin_message(dst, b'E');
                for field in fields {
                    dst.put_u8(field.code.as_u8());
                    put_cstring(dst, &field.value)?;
                }
                dst.put_u8(0); // terminator
                len_pos
            }
            BackendMessage::RowDescription { fields } => {
                let len_pos = begin_message(dst, b'T');
                dst.put_i16(count(fields.len())?);
                for field in fields {
                    put_cstring(dst, &field.name)?;
                    dst.put_i32(field.table_oid);
                    dst.put_i16(field.column_attr);
                    dst.put_i32(field.type_oid);
                    dst.put_i16(field.type_size);
                    dst.put_i32(field.type_modifier);
                    dst.put_i16(field.format.as_i16());
                }
                len_pos
            }
            BackendMessage::DataRow { values } => {
                let len_pos = begin_message(dst, b'D');
                dst.put_i16(count(values.len())?);
                for value in values {
                    match value {
                        Some(v) => {
                            let len = i32::try_from(v.len())
                                .map_err(|_| ProtocolError::MessageTooLarge(v.len()))?;
                            dst.put_i32(len);
                            dst.put_slice(v.as_bytes());
                        }
                        None => dst.put_i32(-1),
                    }
                }
                len_pos
            }
            BackendMessage::CommandComplete { tag } => {
                let len_pos = begin_message(dst, b'C');
                put_cstring(dst, tag)?;
                len_pos
            }
            BackendMessage::EmptyQueryResponse => begin_message(dst, b'I'),
        };
        end_message(dst, len_pos, max_message_size)
    }
}

/// Column and value counts are 16-bit on the wire.
fn count(n: usize) -> Result<i16, ProtocolError> {
    i16::try_from(n).map_err(|_| ProtocolError::TooManyFields(n))
}

/// Encodes `item`, leaving `dst` as it was if the message cannot be represented.
fn encode_message(
    item: &BackendMessage,
    dst: &mut BytesMut,
    max_message_size: usize,
) -> Result<(), ProtocolError> {
    let start = dst.len();
    let result = item.encode(dst, max_message_size);
    if result.is_err() {
        dst.truncate(start);
    }
    result
}

/// Transaction status indicator for ReadyForQuery message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    /// 'I' - Idle (not in a transaction block)
    Idle,
    /// 'T' - In a transaction block
    InTransaction,
}

impl TransactionStatus {
    fn as_byte(self) -> u8 {
        match self {
            TransactionStatus::Idle => b'I',
            TransactionStatus::InTransaction => b'T',
        }
    }
}

/// Error/Notice field.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorField {
    pub code: ErrorFieldCode,
    pub value: String,
}

impl ErrorField {
    pub fn new(code: ErrorFieldCode, value: impl Into<String>) -> Self {
        Self {
            code,
            value: value.into(),
        }
    }
}

/// One column of a RowDescription message.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: i32,
    pub column_attr: i16,
    pub type_oid: i32,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: FormatCode,
}

impl FieldDescription {
    /// A variable-length text column not bound to any table.
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table_oid: 0,
            column_attr: 0,
            type_oid: oid::TEXT,
            type_size: -1,
            type_modifier: -1,
            format: FormatCode::Text,
        }
    }
}

impl Encoder<BackendMessage> for PostgresCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: BackendMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_message(&item, dst, self.max_message_size)
    }
}

// Encryption refusals and startup failures are answered before the codec is
// switched to the query phase.
impl Encoder<BackendMessage> for StartupCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: BackendMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_message(&item, dst, self.max_message_size)
    }
}
