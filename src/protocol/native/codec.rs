use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::ProtocolError;
use crate::protocol::native::frame::{
    ConnectRequest, ExecuteKind, ExecuteRequest, Request, Response, Row, Value, tag,
};

/// Maximum frame body size in bytes (16 MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Tag byte plus the 4-byte body length.
pub const HEADER_LEN: usize = 5;

/// Ensures that the buffer has at least `n` bytes remaining.
macro_rules! ensure_remaining {
    ($buf:expr, $n:expr) => {
        if $buf.len() < $n {
            return Err(ProtocolError::InvalidMessage);
        }
    };
}

mod value_tag {
    pub const NULL: u8 = 0;
    pub const BOOLEAN: u8 = 1;
    pub const INTEGER: u8 = 2;
    pub const DOUBLE: u8 = 3;
    pub const TEXT: u8 = 4;
    pub const BINARY: u8 = 5;
}

/// Read a string with a 2-byte big-endian length prefix.
pub fn get_string(src: &mut BytesMut) -> Result<String, ProtocolError> {
    ensure_remaining!(src, 2);
    let len = src.get_u16() as usize;
    ensure_remaining!(src, len);
    let bytes = src.split_to(len);
    Ok(String::from_utf8(bytes.to_vec())?)
}

/// Write a string with a 2-byte big-endian length prefix and no terminator.
pub fn put_string(dst: &mut BytesMut, s: &str) -> Result<(), ProtocolError> {
    let len = u16::try_from(s.len()).map_err(|_| ProtocolError::StringTooLong(s.len()))?;
    dst.put_u16(len);
    dst.put_slice(s.as_bytes());
    Ok(())
}

pub fn get_value(src: &mut BytesMut) -> Result<Value, ProtocolError> {
    ensure_remaining!(src, 1);
    let value = match src.get_u8() {
        value_tag::NULL => Value::Null,
        value_tag::BOOLEAN => {
            ensure_remaining!(src, 1);
            Value::Boolean(src.get_u8() != 0)
        }
        value_tag::INTEGER => {
            ensure_remaining!(src, 8);
            Value::Integer(src.get_i64())
        }
        value_tag::DOUBLE => {
            ensure_remaining!(src, 8);
            Value::Double(src.get_f64())
        }
        value_tag::TEXT => Value::Text(get_string(src)?),
        value_tag::BINARY => {
            ensure_remaining!(src, 4);
            let len = usize::try_from(src.get_i32()).map_err(|_| ProtocolError::InvalidMessage)?;
            ensure_remaining!(src, len);
            Value::Binary(src.split_to(len).to_vec())
        }
        _ => return Err(ProtocolError::InvalidMessage),
    };
    Ok(value)
}

pub fn put_value(dst: &mut BytesMut, value: &Value) -> Result<(), ProtocolError> {
    match value {
        Value::Null => dst.put_u8(value_tag::NULL),
        Value::Boolean(b) => {
            dst.put_u8(value_tag::BOOLEAN);
            dst.put_u8(u8::from(*b));
        }
        Value::Integer(v) => {
            dst.put_u8(value_tag::INTEGER);
            dst.put_i64(*v);
        }
        Value::Double(v) => {
            dst.put_u8(value_tag::DOUBLE);
            dst.put_f64(*v);
        }
        Value::Text(s) => {
            dst.put_u8(value_tag::TEXT);
            put_string(dst, s)?;
        }
        Value::Binary(bytes) => {
            let len = i32::try_from(bytes.len())
                .map_err(|_| ProtocolError::MessageTooLarge(bytes.len()))?;
            dst.put_u8(value_tag::BINARY);
            dst.put_i32(len);
            dst.put_slice(bytes);
        }
    }
    Ok(())
}

pub fn get_row(src: &mut BytesMut) -> Result<Row, ProtocolError> {
    ensure_remaining!(src, 2);
    let count = src.get_u16() as usize;
    let mut row = Vec::with_capacity(count);
    for _ in 0..count {
        row.push(get_value(src)?);
    }
    Ok(row)
}

pub fn put_row(dst: &mut BytesMut, row: &[Value]) -> Result<(), ProtocolError> {
    let count = u16::try_from(row.len()).map_err(|_| ProtocolError::InvalidMessage)?;
    dst.put_u16(count);
    for value in row {
        put_value(dst, value)?;
    }
    Ok(())
}

/// Writes a frame header with a placeholder length.
/// Returns the offset of the length field for [`finish_frame`].
pub(crate) fn begin_frame(dst: &mut BytesMut, frame_tag: u8) -> usize {
    dst.put_u8(frame_tag);
    let len_pos = dst.len();
    dst.put_i32(0);
    len_pos
}

/// Patches the length field written by [`begin_frame`].
pub(crate) fn finish_frame(
    dst: &mut BytesMut,
    len_pos: usize,
    max_frame_size: usize,
) -> Result<(), ProtocolError> {
    let body_len = dst.len() - len_pos - 4;
    if body_len > max_frame_size {
        return Err(ProtocolError::MessageTooLarge(body_len));
    }
    dst[len_pos..len_pos + 4].copy_from_slice(&(body_len as i32).to_be_bytes());
    Ok(())
}

/// Splits off one frame and all of its chained segments once they are fully buffered.
///
/// `max_frame_size` bounds the summed body length of the whole chain.
pub(crate) fn split_chain(
    src: &mut BytesMut,
    max_frame_size: usize,
) -> Result<Option<BytesMut>, ProtocolError> {
    let mut offset = 0;
    let mut chain_len = 0usize;
    loop {
        if src.len() < offset + HEADER_LEN {
            return Ok(None);
        }
        let frame_tag = src[offset];
        let len = i32::from_be_bytes([
            src[offset + 1],
            src[offset + 2],
            src[offset + 3],
            src[offset + 4],
        ]);
        let len = usize::try_from(len).map_err(|_| ProtocolError::InvalidMessage)?;
        chain_len = chain_len.saturating_add(len);
        if chain_len > max_frame_size {
            return Err(ProtocolError::MessageTooLarge(chain_len));
        }

        let end = offset + HEADER_LEN + len;
        if src.len() < end {
            src.reserve(end - src.len());
            return Ok(None);
        }
        offset = end;

        if frame_tag & tag::CHAINED == 0 {
            return Ok(Some(src.split_to(offset)));
        }
    }
}

/// Takes the next `(tag, body)` segment from a buffer produced by [`split_chain`].
pub(crate) fn next_segment(chain: &mut BytesMut) -> (u8, BytesMut) {
    let frame_tag = chain.get_u8() & !tag::CHAINED;
    let len = chain.get_i32() as usize;
    (frame_tag, chain.split_to(len))
}

fn decode_request(frame_tag: u8, body: &mut BytesMut) -> Result<Request, ProtocolError> {
    let request = match frame_tag {
        tag::CONNECT => {
            let database = get_string(body)?;
            let user = get_string(body)?;
            let password = get_string(body)?;
            ensure_remaining!(body, 4);
            let attribute = body.get_i32();
            Request::Connect(ConnectRequest {
                database,
                user,
                password,
                attribute,
            })
        }
        tag::DISCONNECT => Request::Disconnect,
        tag::RESET_SESSION => Request::ResetSession,
        tag::EXECUTE => {
            ensure_remaining!(body, 5);
            let kind = ExecuteKind::try_from(body.get_u8())
                .map_err(|_| ProtocolError::InvalidMessage)?;
            let max_rows = body.get_i32();
            let sql = get_string(body)?;
            Request::Execute(ExecuteRequest {
                kind,
                sql,
                max_rows,
                parameter_sets: Vec::new(),
            })
        }
        other => return Err(ProtocolError::UnknownFrameType(other)),
    };

    if !body.is_empty() {
        return Err(ProtocolError::InvalidMessage);
    }
    Ok(request)
}

/// Merges a chained supplementary segment into the primary request.
fn fold_segment(
    request: &mut Request,
    frame_tag: u8,
    body: &mut BytesMut,
) -> Result<(), ProtocolError> {
    match (request, frame_tag) {
        (Request::Execute(execute), tag::PARAMETER_SET) => {
            let row = get_row(body)?;
            if !body.is_empty() {
                return Err(ProtocolError::InvalidMessage);
            }
            execute.parameter_sets.push(row);
            Ok(())
        }
        (_, other) => Err(ProtocolError::UnexpectedSegment(other)),
    }
}

fn encode_response(
    item: &mut Response,
    dst: &mut BytesMut,
    max_frame_size: usize,
) -> Result<(), ProtocolError> {
    let len_pos = begin_frame(dst, item.tag());
    match item {
        Response::ConnectAck {
            session_id,
            database_id,
        } => {
            dst.put_i64(*session_id);
            dst.put_i32(*database_id);
        }
        Response::Data(result) => {
            let count =
                u16::try_from(result.columns.len()).map_err(|_| ProtocolError::InvalidMessage)?;
            dst.put_u16(count);
            for column in &result.columns {
                put_string(dst, &column.label)?;
                dst.put_u8(column.value_type as u8);
            }
            while let Some(row) = result.cursor.next_row() {
                dst.put_u8(1);
                put_row(dst, &row)?;
            }
            dst.put_u8(0);
        }
        Response::UpdateCount(count) => dst.put_i64(*count),
        Response::Error(info) => {
            dst.put_i32(info.code);
            put_string(dst, &info.sql_state)?;
            put_string(dst, &info.message)?;
        }
    }
    finish_frame(dst, len_pos, max_frame_size)
}

/// Server-side codec for the native protocol.
/// Decodes [`Request`] frames (with chained segments folded in) and encodes [`Response`] frames.
///
/// Responses are encoded by mutable reference so that the caller keeps
/// ownership of any row cursor and can release it after the write.
#[derive(Debug)]
pub struct NativeCodec {
    pub(crate) max_frame_size: usize,
}

impl NativeCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl Default for NativeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for NativeCodec {
    type Item = Request;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(mut chain) = split_chain(src, self.max_frame_size)? else {
            return Ok(None);
        };

        let (frame_tag, mut body) = next_segment(&mut chain);
        let mut request = decode_request(frame_tag, &mut body)?;
        while !chain.is_empty() {
            let (frame_tag, mut body) = next_segment(&mut chain);
            fold_segment(&mut request, frame_tag, &mut body)?;
        }
        Ok(Some(request))
    }
}

impl<'a> Encoder<&'a mut Response> for NativeCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: &'a mut Response, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let start = dst.len();
        let result = encode_response(item, dst, self.max_frame_size);
        if result.is_err() {
            dst.truncate(start);
        }
        result
    }
}
