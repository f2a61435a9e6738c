use std::fmt;

/// Frame type tags. The high bit of the tag byte is reserved for `CHAINED`.
pub mod tag {
    pub const CONNECT: u8 = 0x01;
    pub const DISCONNECT: u8 = 0x02;
    pub const RESET_SESSION: u8 = 0x03;
    pub const EXECUTE: u8 = 0x04;
    pub const PARAMETER_SET: u8 = 0x05;

    pub const CONNECT_ACK: u8 = 0x10;
    pub const DATA: u8 = 0x11;
    pub const UPDATE_COUNT: u8 = 0x12;
    pub const ERROR: u8 = 0x13;

    /// Set on a frame that is followed by another segment of the same request.
    pub const CHAINED: u8 = 0x80;
}

/// Vendor error codes carried in native error frames.
pub mod error_code {
    pub const VERSIONS_INCOMPATIBLE: i32 = 1001;
    pub const NO_SESSION: i32 = 1002;
    pub const UNKNOWN_DATABASE: i32 = 1003;
    pub const INVALID_AUTHORIZATION: i32 = 1004;
    pub const INTERNAL: i32 = 1005;
    pub const PROTOCOL_VIOLATION: i32 = 1006;
    pub const UNSUPPORTED_STATEMENT: i32 = 1007;
}

/// A single column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Text(String),
    Binary(Vec<u8>),
}

impl Value {
    /// Text rendering used by the compatibility protocol. `None` is SQL NULL.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Boolean(true) => Some("t".to_string()),
            Value::Boolean(false) => Some("f".to_string()),
            Value::Integer(v) => Some(v.to_string()),
            Value::Double(v) => Some(v.to_string()),
            Value::Text(s) => Some(s.clone()),
            Value::Binary(bytes) => {
                let mut out = String::with_capacity(2 + bytes.len() * 2);
                out.push_str("\\x");
                for b in bytes {
                    out.push_str(&format!("{b:02x}"));
                }
                Some(out)
            }
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Null | Value::Text(_) => ValueType::Text,
            Value::Boolean(_) => ValueType::Boolean,
            Value::Integer(_) => ValueType::Integer,
            Value::Double(_) => ValueType::Double,
            Value::Binary(_) => ValueType::Binary,
        }
    }
}

pub type Row = Vec<Value>;

/// Declared type of a result column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueType {
    Boolean = 1,
    Integer = 2,
    Double = 3,
    Text = 4,
    Binary = 5,
}

impl TryFrom<u8> for ValueType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ValueType::Boolean),
            2 => Ok(ValueType::Integer),
            3 => Ok(ValueType::Double),
            4 => Ok(ValueType::Text),
            5 => Ok(ValueType::Binary),
            _ => Err(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub label: String,
    pub value_type: ValueType,
}

impl Column {
    pub fn new(label: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            label: label.into(),
            value_type,
        }
    }
}

/// A server-side row source attached to a data response.
///
/// The owner of the response must call [`RowCursor::close`] once the rows
/// have been written out.
pub trait RowCursor: Send {
    fn next_row(&mut self) -> Option<Row>;

    fn close(&mut self);
}

/// A cursor over rows that are already materialized.
#[derive(Debug, Default)]
pub struct VecCursor {
    rows: std::vec::IntoIter<Row>,
    closed: bool,
}

impl VecCursor {
    pub fn new(rows: Vec<Row>) -> Self {
        Self {
            rows: rows.into_iter(),
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl RowCursor for VecCursor {
    fn next_row(&mut self) -> Option<Row> {
        if self.closed {
            return None;
        }
        self.rows.next()
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

pub struct ResultSet {
    pub columns: Vec<Column>,
    pub cursor: Box<dyn RowCursor>,
}

impl ResultSet {
    pub fn new(columns: Vec<Column>, cursor: Box<dyn RowCursor>) -> Self {
        Self { columns, cursor }
    }

    /// Builds a result set over materialized rows.
    pub fn from_rows(columns: Vec<Column>, rows: Vec<Row>) -> Self {
        Self::new(columns, Box::new(VecCursor::new(rows)))
    }

    /// Drains the remaining rows. Used by clients and tests.
    pub fn collect_rows(&mut self) -> Vec<Row> {
        let mut rows = Vec::new();
        while let Some(row) = self.cursor.next_row() {
            rows.push(row);
        }
        rows
    }
}

impl fmt::Debug for ResultSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultSet")
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub database: String,
    pub user: String,
    pub password: String,
    /// Client-declared attribute passed through to the session manager.
    pub attribute: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExecuteKind {
    /// Statement is expected to return rows.
    Query = 0,
    /// Statement is expected to return an update count.
    Update = 1,
}

impl TryFrom<u8> for ExecuteKind {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ExecuteKind::Query),
            1 => Ok(ExecuteKind::Update),
            _ => Err(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteRequest {
    pub kind: ExecuteKind,
    pub sql: String,
    /// 0 means no limit.
    pub max_rows: i32,
    /// Parameter sets folded in from chained segments; one per batch entry.
    pub parameter_sets: Vec<Row>,
}

impl ExecuteRequest {
    pub fn query(sql: impl Into<String>) -> Self {
        Self {
            kind: ExecuteKind::Query,
            sql: sql.into(),
            max_rows: 0,
            parameter_sets: Vec::new(),
        }
    }

    pub fn update(sql: impl Into<String>) -> Self {
        Self {
            kind: ExecuteKind::Update,
            ..Self::query(sql)
        }
    }
}

/// A request frame received from a native client.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Connect(ConnectRequest),
    Disconnect,
    ResetSession,
    Execute(ExecuteRequest),
}

impl Request {
    pub fn tag(&self) -> u8 {
        match self {
            Request::Connect(_) => tag::CONNECT,
            Request::Disconnect => tag::DISCONNECT,
            Request::ResetSession => tag::RESET_SESSION,
            Request::Execute(_) => tag::EXECUTE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: i32,
    pub sql_state: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: i32, sql_state: &str, message: impl Into<String>) -> Self {
        Self {
            code,
            sql_state: sql_state.to_string(),
            message: message.into(),
        }
    }

    pub fn versions_incompatible(client: &str, server: &str) -> Self {
        Self::new(
            error_code::VERSIONS_INCOMPATIBLE,
            "08001",
            format!(
                "client network compatibility version {client} does not match server version {server}"
            ),
        )
    }

    pub fn no_session() -> Self {
        Self::new(
            error_code::NO_SESSION,
            "08003",
            "no session is bound to this connection",
        )
    }

    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::new(error_code::PROTOCOL_VIOLATION, "08P01", message)
    }
}

/// A response frame produced for a native client.
#[derive(Debug)]
pub enum Response {
    ConnectAck { session_id: i64, database_id: i32 },
    Data(ResultSet),
    UpdateCount(i64),
    Error(ErrorInfo),
}

impl Response {
    pub fn tag(&self) -> u8 {
        match self {
            Response::ConnectAck { .. } => tag::CONNECT_ACK,
            Response::Data(_) => tag::DATA,
            Response::UpdateCount(_) => tag::UPDATE_COUNT,
            Response::Error(_) => tag::ERROR,
        }
    }

    /// Releases the row cursor attached to a data response, if any.
    pub fn release(&mut self) {
        if let Response::Data(result) = self {
            result.cursor.close();
        }
    }
}
