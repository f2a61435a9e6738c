use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::protocol::ProtocolError;
use crate::protocol::native::codec::{
    DEFAULT_MAX_FRAME_SIZE, begin_frame, finish_frame, get_row, get_string, next_segment,
    put_row, put_string, split_chain,
};
use crate::protocol::native::frame::{
    Column, ErrorInfo, Request, ResultSet, Response, ValueType, tag,
};

/// Client-side codec for the native protocol: the mirror of
/// [`NativeCodec`](crate::protocol::native::NativeCodec).
///
/// Data responses are materialized, so the returned cursor is already
/// detached from the server.
#[derive(Debug)]
pub struct NativeClientCodec {
    max_frame_size: usize,
}

impl NativeClientCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl Default for NativeClientCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_request(
    item: &Request,
    dst: &mut BytesMut,
    max_frame_size: usize,
) -> Result<(), ProtocolError> {
    match item {
        Request::Connect(connect) => {
            let len_pos = begin_frame(dst, tag::CONNECT);
            put_string(dst, &connect.database)?;
            put_string(dst, &connect.user)?;
            put_string(dst, &connect.password)?;
            dst.put_i32(connect.attribute);
            finish_frame(dst, len_pos, max_frame_size)
        }
        Request::Disconnect | Request::ResetSession => {
            let len_pos = begin_frame(dst, item.tag());
            finish_frame(dst, len_pos, max_frame_size)
        }
        Request::Execute(execute) => {
            let chained = if execute.parameter_sets.is_empty() {
                0
            } else {
                tag::CHAINED
            };
            let len_pos = begin_frame(dst, tag::EXECUTE | chained);
            dst.put_u8(execute.kind as u8);
            dst.put_i32(execute.max_rows);
            put_string(dst, &execute.sql)?;
            finish_frame(dst, len_pos, max_frame_size)?;

            let last = execute.parameter_sets.len().saturating_sub(1);
            for (i, row) in execute.parameter_sets.iter().enumerate() {
                let chained = if i == last { 0 } else { tag::CHAINED };
                let len_pos = begin_frame(dst, tag::PARAMETER_SET | chained);
                put_row(dst, row)?;
                finish_frame(dst, len_pos, max_frame_size)?;
            }
            Ok(())
        }
    }
}

fn decode_response(frame_tag: u8, body: &mut BytesMut) -> Result<Response, ProtocolError> {
    let response = match frame_tag {
        tag::CONNECT_ACK => {
            if body.len() < 12 {
                return Err(ProtocolError::InvalidMessage);
            }
            Response::ConnectAck {
                session_id: body.get_i64(),
                database_id: body.get_i32(),
            }
        }
        tag::DATA => {
            if body.len() < 2 {
                return Err(ProtocolError::InvalidMessage);
            }
            let count = body.get_u16() as usize;
            let mut columns = Vec::with_capacity(count);
            for _ in 0..count {
                let label = get_string(body)?;
                if body.is_empty() {
                    return Err(ProtocolError::InvalidMessage);
                }
                let value_type =
                    ValueType::try_from(body.get_u8()).map_err(|_| ProtocolError::InvalidMessage)?;
                columns.push(Column { label, value_type });
            }

            let mut rows = Vec::new();
            loop {
                if body.is_empty() {
                    return Err(ProtocolError::InvalidMessage);
                }
                match body.get_u8() {
                    0 => break,
                    1 => rows.push(get_row(body)?),
                    _ => return Err(ProtocolError::InvalidMessage),
                }
            }
            Response::Data(ResultSet::from_rows(columns, rows))
        }
        tag::UPDATE_COUNT => {
            if body.len() < 8 {
                return Err(ProtocolError::InvalidMessage);
            }
            Response::UpdateCount(body.get_i64())
        }
        tag::ERROR => {
            if body.len() < 4 {
                return Err(ProtocolError::InvalidMessage);
            }
            let code = body.get_i32();
            let sql_state = get_string(body)?;
            let message = get_string(body)?;
            Response::Error(ErrorInfo {
                code,
                sql_state,
                message,
            })
        }
        other => return Err(ProtocolError::UnknownFrameType(other)),
    };

    if !body.is_empty() {
        return Err(ProtocolError::InvalidMessage);
    }
    Ok(response)
}

impl Encoder<Request> for NativeClientCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Request, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let start = dst.len();
        let result = encode_request(&item, dst, self.max_frame_size);
        if result.is_err() {
            dst.truncate(start);
        }
        result
    }
}

impl Decoder for NativeClientCodec {
    type Item = Response;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(mut chain) = split_chain(src, self.max_frame_size)? else {
            return Ok(None);
        };
        let (frame_tag, mut body) = next_segment(&mut chain);
        if !chain.is_empty() {
            return Err(ProtocolError::UnexpectedSegment(frame_tag));
        }
        decode_response(frame_tag, &mut body).map(Some)
    }
}
