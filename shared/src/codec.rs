//! Newline-delimited codec for TCP framing
//!
//! All messages are framed as:
//! ```text
//! [ N bytes: UTF-8 JSON object ][ 1 byte: '\n' ]
//! ```
//!
//! Line boundaries are the only framing over the stream. A line that
//! grows past [`MAX_LINE_LEN`] can never be resynchronized, so that is
//! fatal for the connection; a complete line that fails to parse is a
//! per-request matter and is left to the dispatch layer.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::Response;

/// Maximum line length (1 MiB) to prevent memory exhaustion
pub const MAX_LINE_LEN: usize = 1024 * 1024;

/// Errors that can occur during line framing
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Line too long: {0} bytes (max: {MAX_LINE_LEN})")]
    LineTooLong(usize),

    #[error("Line is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("JSON encode error: {0}")]
    EncodeError(#[from] serde_json::Error),
}

/// Encode a response as one newline-terminated line
pub fn encode(response: &Response) -> Result<Bytes, CodecError> {
    let mut buf = BytesMut::new();
    encode_into(response, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a response directly into a provided buffer
pub fn encode_into(response: &Response, buf: &mut BytesMut) -> Result<(), CodecError> {
    let json = serde_json::to_vec(response)?;

    buf.reserve(json.len() + 1);
    buf.put_slice(&json);
    buf.put_u8(b'\n');

    Ok(())
}

/// Decoder state machine for streaming line extraction
#[derive(Debug, Default)]
pub struct LineDecoder {
    /// Partial line data being accumulated
    buf: BytesMut,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw socket bytes into the decoder
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Whether the decoder holds no buffered bytes
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Try to extract the next complete line from the buffer
    ///
    /// Returns:
    /// - `Ok(Some(line))` if a complete line was extracted (terminator stripped)
    /// - `Ok(None)` if more data is needed
    /// - `Err(...)` if the stream can no longer be framed
    pub fn next_line(&mut self) -> Result<Option<String>, CodecError> {
        match self.buf.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                if pos > MAX_LINE_LEN {
                    return Err(CodecError::LineTooLong(pos));
                }

                let line = self.buf.split_to(pos + 1);

                // Strip the '\n' terminator and an optional '\r' before it.
                let mut end = pos;
                if end > 0 && line[end - 1] == b'\r' {
                    end -= 1;
                }

                let text = std::str::from_utf8(&line[..end])?.to_owned();
                Ok(Some(text))
            }
            None => {
                if self.buf.len() > MAX_LINE_LEN {
                    return Err(CodecError::LineTooLong(self.buf.len()));
                }
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_appends_newline() {
        let encoded = encode(&Response::success(json!(42))).unwrap();
        assert_eq!(&encoded[..], b"{\"result\":42,\"error\":null}\n");
    }

    #[test]
    fn test_encode_round_trips_through_decoder() {
        let mut buf = BytesMut::new();
        encode_into(&Response::failure("nope"), &mut buf).unwrap();
        encode_into(&Response::success(json!("ok")), &mut buf).unwrap();

        let mut decoder = LineDecoder::new();
        decoder.extend(&buf);
        let first = decoder.next_line().unwrap().unwrap();
        let second = decoder.next_line().unwrap().unwrap();
        assert_eq!(
            serde_json::from_str::<Response>(&first).unwrap(),
            Response::failure("nope")
        );
        assert_eq!(
            serde_json::from_str::<Response>(&second).unwrap(),
            Response::success(json!("ok"))
        );
    }

    #[test]
    fn test_decode_single_line() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"{\"id\":1}\n");
        assert_eq!(decoder.next_line().unwrap(), Some("{\"id\":1}".to_string()));
        assert_eq!(decoder.next_line().unwrap(), None);
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_decode_partial_then_complete() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"{\"id\":");
        assert_eq!(decoder.next_line().unwrap(), None);
        decoder.extend(b"1}\n{\"id\":2}\n");
        assert_eq!(decoder.next_line().unwrap(), Some("{\"id\":1}".to_string()));
        assert_eq!(decoder.next_line().unwrap(), Some("{\"id\":2}".to_string()));
        assert_eq!(decoder.next_line().unwrap(), None);
    }

    #[test]
    fn test_decode_strips_crlf() {
        let mut decoder = LineDecoder::new();
        decoder.extend(b"hello\r\nworld\n");
        assert_eq!(decoder.next_line().unwrap(), Some("hello".to_string()));
        assert_eq!(decoder.next_line().unwrap(), Some("world".to_string()));
    }

    #[test]
    fn test_decode_rejects_oversized_line() {
        let mut decoder = LineDecoder::new();
        decoder.extend(&vec![b'x'; MAX_LINE_LEN + 1]);
        assert!(matches!(
            decoder.next_line(),
            Err(CodecError::LineTooLong(_))
        ));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let mut decoder = LineDecoder::new();
        decoder.extend(&[0xff, 0xfe, b'\n']);
        assert!(matches!(
            decoder.next_line(),
            Err(CodecError::InvalidUtf8(_))
        ));
    }
}
