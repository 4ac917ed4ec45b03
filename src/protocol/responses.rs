//! Pre-encoded RESP replies for the hot paths.

/// `+OK\r\n`
pub static OK: &[u8] = b"+OK\r\n";

/// `+PONG\r\n`
pub static PONG: &[u8] = b"+PONG\r\n";

/// `+QUEUED\r\n`, the reply to every command accepted inside MULTI.
pub static QUEUED: &[u8] = b"+QUEUED\r\n";

/// Null bulk string: `$-1\r\n`
pub static NULL_BULK: &[u8] = b"$-1\r\n";

/// Null array: `*-1\r\n`. EXEC replies with this when a watched key changed.
pub static NULL_ARRAY: &[u8] = b"*-1\r\n";

/// Empty bulk string: `$0\r\n\r\n`
pub static EMPTY_BULK: &[u8] = b"$0\r\n\r\n";

/// Empty array: `*0\r\n`
pub static EMPTY_ARRAY: &[u8] = b"*0\r\n";

static SMALL_INTEGERS: [&[u8]; 11] = [
    b":0\r\n", b":1\r\n", b":2\r\n", b":3\r\n", b":4\r\n", b":5\r\n", b":6\r\n", b":7\r\n",
    b":8\r\n", b":9\r\n", b":10\r\n",
];

/// Pre-encoded reply for small non-negative integers, if one exists.
#[inline]
pub fn integer(n: i64) -> Option<&'static [u8]> {
    usize::try_from(n)
        .ok()
        .and_then(|i| SMALL_INTEGERS.get(i))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_integers() {
        assert_eq!(integer(0), Some(&b":0\r\n"[..]));
        assert_eq!(integer(10), Some(&b":10\r\n"[..]));
        assert_eq!(integer(11), None);
        assert_eq!(integer(-1), None);
    }
}
