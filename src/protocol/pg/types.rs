/// Format code for result values in the compatibility protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i16)]
pub enum FormatCode {
    /// Text format (0)
    #[default]
    Text = 0,
    /// Binary format (1)
    Binary = 1,
}

impl FormatCode {
    /// Converts the FormatCode to an i16 value.
    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

/// Type OIDs used in row descriptions.
pub mod oid {
    pub const OID: i32 = 26;
    pub const TEXT: i32 = 25;
}

/// Error and notice message field type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorFieldCode {
    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    Severity = b'S',
    /// Severity (non-localized): Same as Severity but never localized
    SeverityNonLocalized = b'V',
    /// SQLSTATE code
    SqlState = b'C',
    /// Primary human-readable error message
    Message = b'M',
    /// Optional detail message
    Detail = b'D',
}

impl TryFrom<u8> for ErrorFieldCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            b'S' => Ok(ErrorFieldCode::Severity),
            b'V' => Ok(ErrorFieldCode::SeverityNonLocalized),
            b'C' => Ok(ErrorFieldCode::SqlState),
            b'M' => Ok(ErrorFieldCode::Message),
            b'D' => Ok(ErrorFieldCode::Detail),
            _ => Err(value),
        }
    }
}

impl ErrorFieldCode {
    /// Converts the ErrorFieldCode to a u8 value.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}
