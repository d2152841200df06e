//! Fixed-width field encodings shared by both index formats.
//!
//! File offsets are stored as 6-byte big-endian integers. Header numbers are
//! right-justified ASCII decimals padded on the left with spaces.

/// Width of an encoded file offset.
pub const POINTER_SIZE: usize = 6;

/// Largest offset that fits in [`POINTER_SIZE`] bytes.
pub const MAX_POINTER: u64 = (1 << 48) - 1;

/// Encode `value` into the first six bytes of `dest`.
#[inline]
pub fn encode_pointer(value: u64, dest: &mut [u8]) {
    let bytes = value.to_be_bytes();
    dest[..POINTER_SIZE].copy_from_slice(&bytes[8 - POINTER_SIZE..]);
}

/// Decode a 6-byte big-endian offset.
#[inline]
pub fn decode_pointer(src: &[u8]) -> u64 {
    src[..POINTER_SIZE]
        .iter()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64)
}

/// Return the encoded form of `value` as an owned array.
#[inline]
pub fn pointer_bytes(value: u64) -> [u8; POINTER_SIZE] {
    let mut out = [0u8; POINTER_SIZE];
    encode_pointer(value, &mut out);
    out
}

/// Write `value` right-justified into `dest`, padding with spaces.
///
/// High-order digits that do not fit are dropped, matching how fixed header
/// fields have always been filled.
pub fn write_decimal(mut value: u64, dest: &mut [u8]) {
    let mut n = dest.len();
    if n == 0 {
        return;
    }
    loop {
        n -= 1;
        dest[n] = b'0' + (value % 10) as u8;
        value /= 10;
        if value == 0 || n == 0 {
            break;
        }
    }
    dest[..n].fill(b' ');
}

/// Read the decimal digits found in `src`, ignoring any other byte.
///
/// Returns `None` when the field holds no digit at all.
pub fn read_decimal(src: &[u8]) -> Option<u64> {
    let mut seen = false;
    let mut value = 0u64;
    for &b in src {
        if b.is_ascii_digit() {
            seen = true;
            value = value.saturating_mul(10).saturating_add((b - b'0') as u64);
        }
    }
    seen.then_some(value)
}

/// Parse a run of at most `max_digits` leading ASCII digits.
///
/// Returns the value and the number of bytes consumed.
pub fn parse_leading_digits(src: &[u8], max_digits: usize) -> (u64, usize) {
    let mut value = 0u64;
    let mut used = 0;
    while used < max_digits && used < src.len() && src[used].is_ascii_digit() {
        value = value.saturating_mul(10).saturating_add((src[used] - b'0') as u64);
        used += 1;
    }
    (value, used)
}

/// Parse an unsigned decimal the lenient way option values are read:
/// leading digits count, anything after them is ignored.
pub fn lenient_number(text: &str) -> u64 {
    parse_leading_digits(text.trim_start().as_bytes(), 19).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_big_endian() {
        let mut buf = [0u8; 6];
        encode_pointer(0x0102_0304_0506, &mut buf);
        assert_eq!(buf, [1, 2, 3, 4, 5, 6]);
        assert_eq!(decode_pointer(&buf), 0x0102_0304_0506);
    }

    #[test]
    fn test_pointer_extremes() {
        assert_eq!(decode_pointer(&pointer_bytes(0)), 0);
        assert_eq!(decode_pointer(&pointer_bytes(MAX_POINTER)), MAX_POINTER);
        assert_eq!(pointer_bytes(1024), [0, 0, 0, 0, 4, 0]);
    }

    #[test]
    fn test_write_decimal_right_justified() {
        let mut field = [0u8; 5];
        write_decimal(1024, &mut field);
        assert_eq!(&field, b" 1024");

        write_decimal(0, &mut field);
        assert_eq!(&field, b"    0");

        write_decimal(16384, &mut field);
        assert_eq!(&field, b"16384");
    }

    #[test]
    fn test_write_decimal_truncates_high_digits() {
        let mut field = [0u8; 3];
        write_decimal(12345, &mut field);
        assert_eq!(&field, b"345");
    }

    #[test]
    fn test_read_decimal() {
        assert_eq!(read_decimal(b" 1024"), Some(1024));
        assert_eq!(read_decimal(b"000000000042"), Some(42));
        assert_eq!(read_decimal(b"     "), None);
    }

    #[test]
    fn test_parse_leading_digits() {
        assert_eq!(parse_leading_digits(b"12-40", 5), (12, 2));
        assert_eq!(parse_leading_digits(b"1234567", 5), (12345, 5));
        assert_eq!(parse_leading_digits(b"x", 5), (0, 0));
        assert_eq!(lenient_number("512k"), 512);
        assert_eq!(lenient_number("abc"), 0);
    }
}
