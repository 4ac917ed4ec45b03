//! RESP protocol parser.
//!
//! The parser works on a borrowed view of its buffer and only consumes
//! bytes once a whole frame is available, so a pipeline that arrives
//! split across socket reads is reassembled correctly.

use super::frame::Frame;
use super::markers;
use crate::error::ProtocolError;
use crate::{MAX_ARGUMENTS, MAX_BULK_SIZE, MAX_INLINE_SIZE};
use bytes::{Buf, Bytes, BytesMut};
use memchr::memchr;

/// Maximum nesting depth for arrays.
const MAX_DEPTH: usize = 8;

/// RESP protocol parser with streaming support.
///
/// ```ignore
/// let mut parser = RespParser::new();
/// parser.extend(data);
///
/// while let Some(frame) = parser.parse()? {
///     // Handle frame
/// }
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    buffer: BytesMut,
}

impl RespParser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Add data to the parser buffer.
    #[inline]
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Returns true if the buffer is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Returns the number of buffered bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Clear the parser buffer.
    #[inline]
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Try to parse a complete frame from the buffer.
    ///
    /// Returns:
    /// - `Ok(Some(frame))` if a complete frame was parsed
    /// - `Ok(None)` if more data is needed
    /// - `Err(e)` if the data is malformed
    pub fn parse(&mut self) -> Result<Option<Frame>, ProtocolError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        if !is_resp_marker(self.buffer[0]) {
            return self.parse_inline();
        }

        let mut pos = 0;
        match parse_at(&self.buffer, &mut pos, 0) {
            Ok(frame) => {
                self.buffer.advance(pos);
                Ok(Some(frame))
            }
            Err(ProtocolError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Parse an inline command (plain text, space-separated).
    fn parse_inline(&mut self) -> Result<Option<Frame>, ProtocolError> {
        let Some(line_end) = find_crlf(&self.buffer) else {
            if self.buffer.len() > MAX_INLINE_SIZE {
                return Err(ProtocolError::LineTooLong {
                    len: self.buffer.len(),
                    max: MAX_INLINE_SIZE,
                });
            }
            return Ok(None);
        };

        let line = self.buffer.split_to(line_end);
        self.buffer.advance(2);

        let args = parse_inline_args(&line);
        if args.is_empty() {
            // Blank line: nothing to run, try the next one.
            return self.parse();
        }

        Ok(Some(Frame::Array(args)))
    }
}

/// Parse one frame starting at `*pos`, advancing `*pos` past it.
fn parse_at(buf: &[u8], pos: &mut usize, depth: usize) -> Result<Frame, ProtocolError> {
    let marker = *buf.get(*pos).ok_or(ProtocolError::Incomplete)?;
    *pos += 1;

    match marker {
        markers::SIMPLE_STRING => {
            let line = read_line(buf, pos)?;
            let s = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;
            Ok(Frame::Simple(s.to_string()))
        }
        markers::ERROR => {
            let line = read_line(buf, pos)?;
            let s = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;
            Ok(Frame::Error(s.to_string()))
        }
        markers::INTEGER => Ok(Frame::Integer(read_number(buf, pos)?)),
        markers::BULK_STRING => {
            let len = read_number(buf, pos)?;
            if len < 0 {
                return Ok(Frame::Null);
            }
            let len = usize::try_from(len).map_err(|_| ProtocolError::InvalidBulkLength(len))?;
            if len > MAX_BULK_SIZE {
                return Err(ProtocolError::BulkTooLarge {
                    len,
                    max: MAX_BULK_SIZE,
                });
            }
            if buf.len() < *pos + len + 2 {
                return Err(ProtocolError::Incomplete);
            }
            let data = Bytes::copy_from_slice(&buf[*pos..*pos + len]);
            if &buf[*pos + len..*pos + len + 2] != b"\r\n" {
                return Err(ProtocolError::MissingCrlf);
            }
            *pos += len + 2;
            Ok(Frame::Bulk(data))
        }
        markers::ARRAY => {
            let len = read_number(buf, pos)?;
            if len < 0 {
                return Ok(Frame::NullArray);
            }
            let len = len as usize;
            if len > MAX_ARGUMENTS {
                return Err(ProtocolError::TooManyElements {
                    count: len,
                    max: MAX_ARGUMENTS,
                });
            }
            if depth >= MAX_DEPTH {
                return Err(ProtocolError::TooManyElements {
                    count: depth,
                    max: MAX_DEPTH,
                });
            }
            let mut frames = Vec::with_capacity(len.min(1024));
            for _ in 0..len {
                frames.push(parse_at(buf, pos, depth + 1)?);
            }
            Ok(Frame::Array(frames))
        }
        _ => Err(ProtocolError::InvalidTypeMarker(marker)),
    }
}

fn read_line<'a>(buf: &'a [u8], pos: &mut usize) -> Result<&'a [u8], ProtocolError> {
    let rest = &buf[*pos..];
    match find_crlf(rest) {
        Some(end) => {
            *pos += end + 2;
            Ok(&rest[..end])
        }
        None => Err(ProtocolError::Incomplete),
    }
}

fn read_number(buf: &[u8], pos: &mut usize) -> Result<i64, ProtocolError> {
    let line = read_line(buf, pos)?;
    let s = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidUtf8)?;
    Ok(s.parse()?)
}

/// Check if a byte is a RESP marker.
#[inline]
fn is_resp_marker(b: u8) -> bool {
    matches!(
        b,
        markers::SIMPLE_STRING
            | markers::ERROR
            | markers::INTEGER
            | markers::BULK_STRING
            | markers::ARRAY
    )
}

/// Find CRLF in a byte slice.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    let mut offset = 0;
    while offset < buf.len().saturating_sub(1) {
        match memchr(b'\r', &buf[offset..]) {
            Some(pos) => {
                let abs_pos = offset + pos;
                if abs_pos + 1 < buf.len() && buf[abs_pos + 1] == b'\n' {
                    return Some(abs_pos);
                }
                offset = abs_pos + 1;
            }
            None => return None,
        }
    }
    None
}

/// Parse inline command arguments.
fn parse_inline_args(line: &[u8]) -> Vec<Frame> {
    let mut args = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut quote_char = b'"';

    for (i, &c) in line.iter().enumerate() {
        if in_quotes {
            if c == quote_char {
                in_quotes = false;
                args.push(Frame::Bulk(Bytes::copy_from_slice(&line[start..i])));
                start = i + 1;
            }
        } else if c == b'"' || c == b'\'' {
            in_quotes = true;
            quote_char = c;
            start = i + 1;
        } else if c == b' ' || c == b'\t' {
            if start < i {
                args.push(Frame::Bulk(Bytes::copy_from_slice(&line[start..i])));
            }
            start = i + 1;
        }
    }

    if start < line.len() {
        args.push(Frame::Bulk(Bytes::copy_from_slice(&line[start..])));
    }

    args
}

/// Parse a single frame from a byte slice (for testing and one-shot parsing).
pub fn parse_frame(data: &[u8]) -> Result<Frame, ProtocolError> {
    let mut parser = RespParser::new();
    parser.extend(data);
    parser.parse()?.ok_or(ProtocolError::Incomplete)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_and_error() {
        assert_eq!(parse_frame(b"+OK\r\n").unwrap(), Frame::Simple("OK".into()));
        assert_eq!(
            parse_frame(b"-ERR unknown command\r\n").unwrap(),
            Frame::Error("ERR unknown command".into())
        );
    }

    #[test]
    fn test_parse_bulk_and_null() {
        assert_eq!(
            parse_frame(b"$5\r\nhello\r\n").unwrap(),
            Frame::Bulk(Bytes::from("hello"))
        );
        assert_eq!(parse_frame(b"$-1\r\n").unwrap(), Frame::Null);
        assert_eq!(parse_frame(b"*-1\r\n").unwrap(), Frame::NullArray);
    }

    #[test]
    fn test_parse_array() {
        let frame = parse_frame(b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n").unwrap();
        assert_eq!(
            frame,
            Frame::Array(vec![
                Frame::bulk("SET"),
                Frame::bulk("key"),
                Frame::bulk("value"),
            ])
        );
    }

    #[test]
    fn test_parse_streaming() {
        let mut parser = RespParser::new();

        parser.extend(b"*2\r\n");
        assert!(parser.parse().unwrap().is_none());

        parser.extend(b"$3\r\nfoo\r\n");
        assert!(parser.parse().unwrap().is_none());

        parser.extend(b"$3\r\nbar\r\n");
        let frame = parser.parse().unwrap().unwrap();
        assert_eq!(frame, Frame::Array(vec![Frame::bulk("foo"), Frame::bulk("bar")]));
        assert!(parser.is_empty());
    }

    #[test]
    fn test_parse_pipeline() {
        let mut parser = RespParser::new();
        parser.extend(b"*1\r\n$5\r\nMULTI\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n*1\r\n$4\r\nEXEC\r\n");

        let mut names = Vec::new();
        while let Some(frame) = parser.parse().unwrap() {
            let arr = frame.as_array().unwrap().to_vec();
            names.push(arr[0].as_str().unwrap().to_string());
        }
        assert_eq!(names, vec!["MULTI", "GET", "EXEC"]);
    }

    #[test]
    fn test_parse_inline_with_quotes() {
        let frame = parse_frame(b"SET key \"hello world\"\r\n").unwrap();
        assert_eq!(
            frame,
            Frame::Array(vec![
                Frame::bulk("SET"),
                Frame::bulk("key"),
                Frame::bulk("hello world"),
            ])
        );
    }

    #[test]
    fn test_bulk_too_large() {
        let mut parser = RespParser::new();
        parser.extend(format!("${}\r\n", MAX_BULK_SIZE + 1).as_bytes());
        assert!(matches!(
            parser.parse(),
            Err(ProtocolError::BulkTooLarge { .. })
        ));
    }

    #[test]
    fn test_invalid_marker_inside_array() {
        let mut parser = RespParser::new();
        parser.extend(b"*1\r\n?oops\r\n");
        assert!(matches!(
            parser.parse(),
            Err(ProtocolError::InvalidTypeMarker(b'?'))
        ));
    }

    #[test]
    fn test_find_crlf_edge_cases() {
        assert_eq!(find_crlf(b""), None);
        assert_eq!(find_crlf(b"\r"), None);
        assert_eq!(find_crlf(b"\r\n"), Some(0));
        assert_eq!(find_crlf(b"hello\r\nworld"), Some(5));
        assert_eq!(find_crlf(b"hello\rworld"), None);
        assert_eq!(find_crlf(b"\r \r\n"), Some(2));
    }
}
