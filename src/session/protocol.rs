//! Wire message framing: reading and
//! writing the PostgreSQL v3 simple-query message shapes this session
//! supports. No message type beyond startup/SSL/password/query/terminate on
//! the frontend side, and the matching backend set, is implemented.

use crate::core::{DbError, Result, Value};
use crate::executor::result::{encode_text, ColumnInfo};
use std::collections::HashMap;
use std::io::Read;

pub const TAG_PASSWORD: u8 = b'p';
pub const TAG_QUERY: u8 = b'Q';
pub const TAG_TERMINATE: u8 = b'X';

/// The magic "protocol version" that marks an SSLRequest startup packet
/// instead of a real Startup packet.
const SSL_REQUEST_CODE: u32 = 80_877_103;

pub enum StartupPacket {
    SslRequest,
    Startup(HashMap<String, String>),
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

/// Read one frontend message: `[1-byte tag][4-byte BE length incl. self][payload]`.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<(u8, Vec<u8>)> {
    let mut tag = [0u8; 1];
    reader.read_exact(&mut tag)?;
    let len = read_u32(reader)? as usize;
    if len < 4 {
        return Err(DbError::Protocol("message length shorter than its own header".into()));
    }
    let mut payload = vec![0u8; len - 4];
    reader.read_exact(&mut payload)?;
    Ok((tag[0], payload))
}

/// Read one startup-phase message: `[4-byte length][4-byte version/magic][params]`,
/// with no leading type tag.
pub fn read_startup<R: Read>(reader: &mut R) -> Result<StartupPacket> {
    let len = read_u32(reader)? as usize;
    if len < 8 {
        return Err(DbError::Protocol("startup message shorter than its own header".into()));
    }
    let mut body = vec![0u8; len - 4];
    reader.read_exact(&mut body)?;
    let code = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
    if code == SSL_REQUEST_CODE {
        return Ok(StartupPacket::SslRequest);
    }
    Ok(StartupPacket::Startup(parse_cstr_pairs(&body[4..])?))
}

fn read_cstr(bytes: &[u8], pos: usize) -> Result<(String, usize)> {
    let end = bytes[pos..]
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| DbError::Protocol("unterminated string in message".into()))?;
    let s = String::from_utf8(bytes[pos..pos + end].to_vec())?;
    Ok((s, pos + end + 1))
}

/// Read a null-terminated string occupying the whole remainder of a payload
/// (used for `PasswordMessage` and `Query`).
pub fn read_cstr_payload(payload: &[u8]) -> Result<String> {
    Ok(read_cstr(payload, 0)?.0)
}

fn parse_cstr_pairs(bytes: &[u8]) -> Result<HashMap<String, String>> {
    let mut map = HashMap::new();
    let mut pos = 0;
    loop {
        let (key, next) = read_cstr(bytes, pos)?;
        if key.is_empty() {
            break;
        }
        let (value, next2) = read_cstr(bytes, next)?;
        map.insert(key, value);
        pos = next2;
    }
    Ok(map)
}

fn cstr(s: &str) -> Vec<u8> {
    let mut v = s.as_bytes().to_vec();
    v.push(0);
    v
}

fn push_framed(buf: &mut Vec<u8>, tag: u8, payload: &[u8]) {
    buf.push(tag);
    buf.extend_from_slice(&((payload.len() + 4) as u32).to_be_bytes());
    buf.extend_from_slice(payload);
}

pub fn append_authentication_ok(buf: &mut Vec<u8>) {
    push_framed(buf, b'R', &0i32.to_be_bytes());
}

pub fn append_authentication_cleartext_password(buf: &mut Vec<u8>) {
    push_framed(buf, b'R', &3i32.to_be_bytes());
}

pub fn append_parameter_status(buf: &mut Vec<u8>, key: &str, value: &str) {
    let mut payload = cstr(key);
    payload.extend_from_slice(&cstr(value));
    push_framed(buf, b'S', &payload);
}

pub fn append_backend_key_data(buf: &mut Vec<u8>, process_id: i32, secret_key: i32) {
    let mut payload = Vec::with_capacity(8);
    payload.extend_from_slice(&process_id.to_be_bytes());
    payload.extend_from_slice(&secret_key.to_be_bytes());
    push_framed(buf, b'K', &payload);
}

pub fn append_ready_for_query(buf: &mut Vec<u8>, transaction_status: u8) {
    push_framed(buf, b'Z', &[transaction_status]);
}

pub fn append_row_description(buf: &mut Vec<u8>, columns: &[ColumnInfo]) {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(columns.len() as i16).to_be_bytes());
    for col in columns {
        payload.extend_from_slice(&cstr(&col.name));
        payload.extend_from_slice(&0i32.to_be_bytes()); // table oid: none
        payload.extend_from_slice(&0i16.to_be_bytes()); // column attr number: none
        payload.extend_from_slice(&col.type_oid.to_be_bytes());
        payload.extend_from_slice(&col.type_size.to_be_bytes());
        payload.extend_from_slice(&(-1i32).to_be_bytes()); // type modifier
        payload.extend_from_slice(&0i16.to_be_bytes()); // format code: text
    }
    push_framed(buf, b'T', &payload);
}

pub fn append_data_row(buf: &mut Vec<u8>, row: &[Option<Value>]) {
    let mut payload = Vec::new();
    payload.extend_from_slice(&(row.len() as i16).to_be_bytes());
    for cell in row {
        match cell.as_ref().and_then(encode_text) {
            Some(text) => {
                let bytes = text.as_bytes();
                payload.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                payload.extend_from_slice(bytes);
            }
            None => payload.extend_from_slice(&(-1i32).to_be_bytes()),
        }
    }
    push_framed(buf, b'D', &payload);
}

pub fn append_command_complete(buf: &mut Vec<u8>, tag: &str) {
    push_framed(buf, b'C', &cstr(tag));
}

pub fn append_empty_query_response(buf: &mut Vec<u8>) {
    push_framed(buf, b'I', &[]);
}

pub fn append_error_response(buf: &mut Vec<u8>, severity: &str, sqlstate: &str, message: &str) {
    let mut payload = Vec::new();
    payload.push(b'S');
    payload.extend_from_slice(&cstr(severity));
    payload.push(b'C');
    payload.extend_from_slice(&cstr(sqlstate));
    payload.push(b'M');
    payload.extend_from_slice(&cstr(message));
    payload.push(0);
    push_framed(buf, b'E', &payload);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_packet_roundtrip() {
        let mut body = Vec::new();
        body.extend_from_slice(&196_608u32.to_be_bytes());
        body.extend_from_slice(b"user\0alice\0\0");
        let mut msg = Vec::new();
        msg.extend_from_slice(&((body.len() + 4) as u32).to_be_bytes());
        msg.extend_from_slice(&body);

        let mut cursor = std::io::Cursor::new(msg);
        match read_startup(&mut cursor).unwrap() {
            StartupPacket::Startup(params) => {
                assert_eq!(params.get("user"), Some(&"alice".to_string()));
            }
            StartupPacket::SslRequest => panic!("expected Startup"),
        }
    }

    #[test]
    fn ssl_request_detected() {
        let mut msg = Vec::new();
        msg.extend_from_slice(&8u32.to_be_bytes());
        msg.extend_from_slice(&SSL_REQUEST_CODE.to_be_bytes());
        let mut cursor = std::io::Cursor::new(msg);
        assert!(matches!(read_startup(&mut cursor).unwrap(), StartupPacket::SslRequest));
    }

    #[test]
    fn frame_roundtrip() {
        let mut buf = Vec::new();
        append_command_complete(&mut buf, "SELECT 1");
        let mut cursor = std::io::Cursor::new(buf);
        let (tag, payload) = read_frame(&mut cursor).unwrap();
        assert_eq!(tag, b'C');
        assert_eq!(read_cstr_payload(&payload).unwrap(), "SELECT 1");
    }

    #[test]
    fn data_row_encodes_null_as_negative_length() {
        let mut buf = Vec::new();
        append_data_row(&mut buf, &[None, Some(Value::Integer(7))]);
        // skip tag + length
        let payload = &buf[5..];
        let num_cols = i16::from_be_bytes([payload[0], payload[1]]);
        assert_eq!(num_cols, 2);
        let null_len = i32::from_be_bytes([payload[2], payload[3], payload[4], payload[5]]);
        assert_eq!(null_len, -1);
    }
}
