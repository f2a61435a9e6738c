//! In-memory session manager.
//!
//! Users come from configuration. Sessions understand a single statement
//! shape, `SELECT <literal>[, <literal>...]` without a `FROM` clause, which
//! answers one row. Every update-kind statement succeeds with a count of 0.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use tracing::debug;

use crate::config::Config;
use crate::protocol::native::{
    Column, ErrorInfo, ExecuteKind, ExecuteRequest, Request, Response, ResultSet, Value,
    error_code,
};
use crate::session::{AuthError, Session, SessionManager};

const SQLSTATE_SYNTAX_ERROR: &str = "42601";
const SQLSTATE_FEATURE_NOT_SUPPORTED: &str = "0A000";
const SQLSTATE_CONNECTION_DOES_NOT_EXIST: &str = "08003";

pub struct MemorySessionManager {
    /// user name (upper-cased) -> password
    users: HashMap<String, String>,
    database_count: usize,
    next_session_id: AtomicI64,
}

impl MemorySessionManager {
    pub fn new<I, U, P>(users: I, database_count: usize) -> Self
    where
        I: IntoIterator<Item = (U, P)>,
        U: AsRef<str>,
        P: Into<String>,
    {
        Self {
            users: users
                .into_iter()
                .map(|(name, password)| (name.as_ref().to_ascii_uppercase(), password.into()))
                .collect(),
            database_count,
            next_session_id: AtomicI64::new(1),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config
                .users
                .iter()
                .map(|u| (u.name.as_str(), u.password.clone())),
            config.databases.len(),
        )
    }
}

impl SessionManager for MemorySessionManager {
    fn new_session(
        &self,
        database_id: i32,
        user: &str,
        credential: &str,
        _attribute: i32,
    ) -> Result<Box<dyn Session>, AuthError> {
        if usize::try_from(database_id).map_or(true, |id| id >= self.database_count) {
            return Err(AuthError::UnknownDatabase(database_id.to_string()));
        }
        match self.users.get(&user.to_ascii_uppercase()) {
            Some(password) if password == credential => {}
            _ => return Err(AuthError::InvalidAuthorization(user.to_string())),
        }

        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        debug!(session = id, database = database_id, user, "Session created");
        Ok(Box::new(MemorySession {
            id,
            database_id,
            closed: false,
        }))
    }
}

struct MemorySession {
    id: i64,
    database_id: i32,
    closed: bool,
}

impl MemorySession {
    fn execute_statement(&self, request: ExecuteRequest) -> Response {
        match request.kind {
            ExecuteKind::Update => Response::UpdateCount(0),
            ExecuteKind::Query => match parse_select(&request.sql) {
                Ok(values) => {
                    let columns = values
                        .iter()
                        .enumerate()
                        .map(|(i, v)| Column::new(format!("C{}", i + 1), v.value_type()))
                        .collect();
                    Response::Data(ResultSet::from_rows(columns, vec![values]))
                }
                Err(err) => Response::Error(err),
            },
        }
    }
}

impl Session for MemorySession {
    fn id(&self) -> i64 {
        self.id
    }

    fn database_id(&self) -> i32 {
        self.database_id
    }

    fn execute(&mut self, request: Request) -> Response {
        if self.closed {
            return Response::Error(ErrorInfo::new(
                error_code::NO_SESSION,
                SQLSTATE_CONNECTION_DOES_NOT_EXIST,
                "session is closed",
            ));
        }
        match request {
            Request::Execute(execute) => self.execute_statement(execute),
            other => Response::Error(ErrorInfo::protocol_violation(format!(
                "unexpected request 0x{:02x}",
                other.tag()
            ))),
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            debug!(session = self.id, "Session closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Parses `SELECT <literal list>` into its values.
fn parse_select(sql: &str) -> Result<Vec<Value>, ErrorInfo> {
    let sql = sql.trim().trim_end_matches(';').trim_end();
    let rest = match sql.get(..7) {
        Some(head) if head.eq_ignore_ascii_case("select ") => &sql[7..],
        _ => {
            return Err(ErrorInfo::new(
                error_code::UNSUPPORTED_STATEMENT,
                SQLSTATE_FEATURE_NOT_SUPPORTED,
                "only SELECT of literal values is supported",
            ));
        }
    };

    let mut values = Vec::new();
    let mut chars = rest.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        let value = match chars.peek() {
            Some('\'') => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some('\'') if chars.next_if_eq(&'\'').is_some() => text.push('\''),
                        Some('\'') => break,
                        Some(c) => text.push(c),
                        None => return Err(syntax_error("unterminated string literal")),
                    }
                }
                Value::Text(text)
            }
            Some(_) => {
                let mut word = String::new();
                while let Some(c) = chars.next_if(|c| *c != ',' && !c.is_whitespace()) {
                    word.push(c);
                }
                parse_word(&word)?
            }
            None => return Err(syntax_error("expected a literal")),
        };
        values.push(value);

        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        match chars.next() {
            Some(',') => continue,
            None => break,
            Some(_) => {
                return Err(ErrorInfo::new(
                    error_code::UNSUPPORTED_STATEMENT,
                    SQLSTATE_FEATURE_NOT_SUPPORTED,
                    "only SELECT of literal values is supported",
                ));
            }
        }
    }
    Ok(values)
}

fn parse_word(word: &str) -> Result<Value, ErrorInfo> {
    if word.eq_ignore_ascii_case("null") {
        Ok(Value::Null)
    } else if word.eq_ignore_ascii_case("true") {
        Ok(Value::Boolean(true))
    } else if word.eq_ignore_ascii_case("false") {
        Ok(Value::Boolean(false))
    } else if let Ok(i) = word.parse::<i64>() {
        Ok(Value::Integer(i))
    } else if let Ok(f) = word.parse::<f64>()
        && word.starts_with(|c: char| c.is_ascii_digit() || c == '-' || c == '.')
    {
        Ok(Value::Double(f))
    } else {
        Err(syntax_error(&format!("unexpected token: {word}")))
    }
}

fn syntax_error(message: &str) -> ErrorInfo {
    ErrorInfo::new(error_code::UNSUPPORTED_STATEMENT, SQLSTATE_SYNTAX_ERROR, message)
}
