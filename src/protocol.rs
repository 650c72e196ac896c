/*!
 * Wire protocol: request framing and RESP-subset response encoding.
 *
 * Requests are a simplified line-terminated subset, NOT full RESP
 * multi-bulk arrays: one request is bytes up to the first `\r\n`,
 * whitespace-tokenized into `(command, args...)`. Replies use the RESP
 * subset in spec §4.1: simple string, error, integer, bulk string
 * (with null), and array.
 */

use bytes::{Buf, BytesMut};

/// A single parsed client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub command: String,
    pub args: Vec<String>,
}

/// Drain as many complete `\r\n`-terminated lines as are present in `buf`,
/// tokenizing each non-empty line on whitespace. Incomplete trailing bytes
/// are left in `buf` for the next read.
pub fn parse_requests(buf: &mut BytesMut) -> Vec<Request> {
    let mut out = Vec::new();
    loop {
        let Some(pos) = find_crlf(&buf[..]) else {
            break;
        };
        let line = buf[..pos].to_vec();
        buf.advance(pos + 2);

        if line.is_empty() {
            continue;
        }
        let Ok(text) = std::str::from_utf8(&line) else {
            continue;
        };
        let mut parts = text.split_whitespace();
        let Some(command) = parts.next() else {
            continue;
        };
        out.push(Request {
            command: command.to_string(),
            args: parts.map(|s| s.to_string()).collect(),
        });
    }
    out
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|w| w == b"\r\n")
}

//
// RESP subset encoders (spec §4.1)
//

pub fn resp_ok() -> Vec<u8> {
    b"+OK\r\n".to_vec()
}

pub fn resp_pong() -> Vec<u8> {
    b"+PONG\r\n".to_vec()
}

pub fn resp_simple(s: &str) -> Vec<u8> {
    format!("+{s}\r\n").into_bytes()
}

pub fn resp_error(message: &str) -> Vec<u8> {
    format!("-ERR {message}\r\n").into_bytes()
}

pub fn resp_integer(n: i64) -> Vec<u8> {
    format!(":{n}\r\n").into_bytes()
}

/// Bulk string, or the null bulk (`$-1\r\n`) when `value` is `None`.
pub fn resp_bulk(value: Option<&[u8]>) -> Vec<u8> {
    match value {
        None => b"$-1\r\n".to_vec(),
        Some(b) => {
            let mut out = Vec::with_capacity(b.len() + 16);
            out.extend_from_slice(format!("${}\r\n", b.len()).as_bytes());
            out.extend_from_slice(b);
            out.extend_from_slice(b"\r\n");
            out
        }
    }
}

pub fn resp_null() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

/// Array of already-encoded items; empty array is `*0\r\n`.
pub fn resp_array(items: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
    for item in items {
        out.extend_from_slice(item);
    }
    out
}
