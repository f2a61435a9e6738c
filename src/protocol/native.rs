//! Native binary client protocol.
//!
//! ## Wire format
//!
//! ```text
//! +---------+-------------------+------------------+
//! | tag: u8 | length: i32 (BE)  | body: length     |
//! +---------+-------------------+------------------+
//! ```
//!
//! Strings are a 2-byte big-endian length followed by UTF-8 bytes. A tag
//! with the high bit set is followed by a chained segment that belongs to the
//! same request (batch parameter sets for `EXECUTE`). The very first four
//! bytes of a connection are the packed version token, not a frame.

pub mod client;
pub mod codec;
pub mod frame;
pub mod version;

pub use client::NativeClientCodec;
pub use codec::NativeCodec;
pub use frame::{
    Column, ConnectRequest, ErrorInfo, ExecuteKind, ExecuteRequest, Request, Response, ResultSet,
    Row, RowCursor, Value, ValueType, VecCursor, error_code, tag,
};
pub use version::NETWORK_COMPATIBILITY_VERSION;
