//! RESP frame types.
//!
//! A Frame represents a complete RESP message that can be sent or received.

use super::responses;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// A RESP frame representing a complete protocol message.
///
/// Frames are cheap to clone (`Bytes` for binary data) and serialize
/// directly into a write buffer.
#[derive(Clone, PartialEq, Eq)]
pub enum Frame {
    /// Simple string (no newlines allowed)
    Simple(String),

    /// Error message
    Error(String),

    /// 64-bit signed integer
    Integer(i64),

    /// Bulk string (binary-safe)
    Bulk(Bytes),

    /// Null bulk string
    Null,

    /// Null array. Used as the EXEC abort indicator, which must stay
    /// distinguishable from an empty result array.
    NullArray,

    /// Array of frames
    Array(Vec<Frame>),
}

impl Frame {
    /// Create a simple string frame.
    #[inline]
    pub fn simple(s: impl Into<String>) -> Self {
        Self::Simple(s.into())
    }

    /// Create an error frame.
    #[inline]
    pub fn error(s: impl Into<String>) -> Self {
        Self::Error(s.into())
    }

    /// Create an integer frame.
    #[inline]
    pub fn integer(n: i64) -> Self {
        Self::Integer(n)
    }

    /// Create a bulk string frame.
    #[inline]
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Self::Bulk(data.into())
    }

    /// Create a null frame.
    #[inline]
    pub const fn null() -> Self {
        Self::Null
    }

    /// Create an array frame.
    #[inline]
    pub fn array(frames: Vec<Frame>) -> Self {
        Self::Array(frames)
    }

    /// Create an empty array frame.
    #[inline]
    pub fn empty_array() -> Self {
        Self::Array(Vec::new())
    }

    /// Create an OK response.
    #[inline]
    pub fn ok() -> Self {
        Self::Simple("OK".to_string())
    }

    /// Create a PONG response.
    #[inline]
    pub fn pong() -> Self {
        Self::Simple("PONG".to_string())
    }

    /// Create a QUEUED response (for transactions).
    #[inline]
    pub fn queued() -> Self {
        Self::Simple("QUEUED".to_string())
    }

    /// Bulk string for `Some`, null bulk for `None`.
    #[inline]
    pub fn bulk_or_null(value: Option<Bytes>) -> Self {
        value.map_or(Self::Null, Self::Bulk)
    }

    /// Check if this is a null bulk frame.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Check if this is the null array (EXEC abort indicator).
    #[inline]
    pub fn is_null_array(&self) -> bool {
        matches!(self, Self::NullArray)
    }

    /// Check if this is an error frame.
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Try to get the frame as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Simple(s) | Self::Error(s) => Some(s),
            Self::Bulk(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Try to get the frame as an integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            Self::Bulk(b) => std::str::from_utf8(b).ok()?.parse().ok(),
            Self::Simple(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Try to get the frame as an array.
    pub fn as_array(&self) -> Option<&[Frame]> {
        match self {
            Self::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Convert frame to owned Bytes.
    pub fn to_bytes(&self) -> Option<Bytes> {
        match self {
            Self::Bulk(b) => Some(b.clone()),
            Self::Simple(s) => Some(Bytes::copy_from_slice(s.as_bytes())),
            Self::Integer(n) => Some(Bytes::from(n.to_string())),
            _ => None,
        }
    }

    /// Serialize the frame to a buffer.
    pub fn serialize(&self, buf: &mut BytesMut) {
        match self {
            Self::Simple(s) => match s.as_str() {
                "OK" => buf.put_slice(responses::OK),
                "PONG" => buf.put_slice(responses::PONG),
                "QUEUED" => buf.put_slice(responses::QUEUED),
                _ => {
                    buf.put_u8(b'+');
                    buf.put_slice(s.as_bytes());
                    buf.put_slice(b"\r\n");
                }
            },
            Self::Error(s) => {
                buf.put_u8(b'-');
                buf.put_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            Self::Integer(n) => {
                if let Some(static_resp) = responses::integer(*n) {
                    buf.put_slice(static_resp);
                } else {
                    buf.put_u8(b':');
                    let mut temp = itoa::Buffer::new();
                    buf.put_slice(temp.format(*n).as_bytes());
                    buf.put_slice(b"\r\n");
                }
            }
            Self::Bulk(data) => {
                if data.is_empty() {
                    buf.put_slice(responses::EMPTY_BULK);
                } else {
                    buf.put_u8(b'$');
                    let mut temp = itoa::Buffer::new();
                    buf.put_slice(temp.format(data.len() as i64).as_bytes());
                    buf.put_slice(b"\r\n");
                    buf.put_slice(data);
                    buf.put_slice(b"\r\n");
                }
            }
            Self::Null => buf.put_slice(responses::NULL_BULK),
            Self::NullArray => buf.put_slice(responses::NULL_ARRAY),
            Self::Array(frames) => {
                if frames.is_empty() {
                    buf.put_slice(responses::EMPTY_ARRAY);
                } else {
                    buf.put_u8(b'*');
                    let mut temp = itoa::Buffer::new();
                    buf.put_slice(temp.format(frames.len() as i64).as_bytes());
                    buf.put_slice(b"\r\n");
                    for frame in frames {
                        frame.serialize(buf);
                    }
                }
            }
        }
    }

    /// Convert to a `Vec<u8>` for convenience.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(64);
        self.serialize(&mut buf);
        buf.to_vec()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple(s) => write!(f, "Simple({s:?})"),
            Self::Error(s) => write!(f, "Error({s:?})"),
            Self::Integer(n) => write!(f, "Integer({n})"),
            Self::Bulk(b) => {
                if let Ok(s) = std::str::from_utf8(b) {
                    write!(f, "Bulk({s:?})")
                } else {
                    write!(f, "Bulk({b:?})")
                }
            }
            Self::Null => write!(f, "Null"),
            Self::NullArray => write!(f, "NullArray"),
            Self::Array(arr) => f.debug_list().entries(arr).finish(),
        }
    }
}

impl From<&str> for Frame {
    fn from(s: &str) -> Self {
        Self::Bulk(Bytes::copy_from_slice(s.as_bytes()))
    }
}

impl From<Bytes> for Frame {
    fn from(b: Bytes) -> Self {
        Self::Bulk(b)
    }
}

impl From<i64> for Frame {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<Vec<Frame>> for Frame {
    fn from(frames: Vec<Frame>) -> Self {
        Self::Array(frames)
    }
}

/// Fast integer to string conversion.
mod itoa {
    pub struct Buffer {
        bytes: [u8; 20],
    }

    impl Buffer {
        pub fn new() -> Self {
            Self { bytes: [0; 20] }
        }

        pub fn format(&mut self, n: i64) -> &str {
            let negative = n < 0;
            let mut n = n.unsigned_abs();

            let mut i = self.bytes.len();
            loop {
                i -= 1;
                self.bytes[i] = b'0' + (n % 10) as u8;
                n /= 10;
                if n == 0 {
                    break;
                }
            }

            if negative {
                i -= 1;
                self.bytes[i] = b'-';
            }

            // Only ASCII digits and '-' are written.
            std::str::from_utf8(&self.bytes[i..]).unwrap_or("0")
        }
    }
}
