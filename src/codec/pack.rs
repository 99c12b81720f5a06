//! Fixed-width integer packing.
//!
//! Widths are given in bytes (1..=8, i.e. 8 to 64 bits). Values wider than
//! the requested width are truncated to their low-order bytes.
//!
//! Big Endian is used for wire headers; Little Endian for helper payload
//! encodings.
//!
//! # Example
//!
//! ```
//! use iproto_client::codec::{pack_big, pack_little};
//!
//! assert_eq!(pack_big(0x0102_0304, 4), vec![0x01, 0x02, 0x03, 0x04]);
//! assert_eq!(pack_little(0x0102_0304, 4), vec![0x04, 0x03, 0x02, 0x01]);
//! ```

/// Maximum packing width in bytes.
pub const MAX_WIDTH: usize = 8;

/// Pack `value` into `width` bytes, most significant byte first.
pub fn pack_big(value: u64, width: usize) -> Vec<u8> {
    let mut out = vec![0u8; width];
    pack_big_to(value, width, &mut out);
    out
}

/// Pack `value` into the first `width` bytes of `dest`, Big Endian.
///
/// # Panics
///
/// Panics if `width` is outside 1..=8 or `dest` is shorter than `width`.
#[inline]
pub fn pack_big_to(value: u64, width: usize, dest: &mut [u8]) {
    assert!((1..=MAX_WIDTH).contains(&width), "width must be 1..=8 bytes");
    let bytes = value.to_be_bytes();
    dest[..width].copy_from_slice(&bytes[MAX_WIDTH - width..]);
}

/// Pack `value` into `width` bytes, least significant byte first.
pub fn pack_little(value: u64, width: usize) -> Vec<u8> {
    let mut out = vec![0u8; width];
    pack_little_to(value, width, &mut out);
    out
}

/// Pack `value` into the first `width` bytes of `dest`, Little Endian.
///
/// # Panics
///
/// Panics if `width` is outside 1..=8 or `dest` is shorter than `width`.
#[inline]
pub fn pack_little_to(value: u64, width: usize, dest: &mut [u8]) {
    assert!((1..=MAX_WIDTH).contains(&width), "width must be 1..=8 bytes");
    let bytes = value.to_le_bytes();
    dest[..width].copy_from_slice(&bytes[..width]);
}

/// Little Endian bytes of a `u32`.
#[inline]
pub fn uint32_le(value: u32) -> [u8; 4] {
    value.to_le_bytes()
}

/// Little Endian bytes of a `u64`.
#[inline]
pub fn uint64_le(value: u64) -> [u8; 8] {
    value.to_le_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_big_widths() {
        assert_eq!(pack_big(0xAB, 1), vec![0xAB]);
        assert_eq!(pack_big(0x0102, 2), vec![0x01, 0x02]);
        assert_eq!(pack_big(0x010203, 3), vec![0x01, 0x02, 0x03]);
        assert_eq!(
            pack_big(0x0102_0304_0506_0708, 8),
            vec![1, 2, 3, 4, 5, 6, 7, 8]
        );
    }

    #[test]
    fn test_pack_little_widths() {
        assert_eq!(pack_little(0x0102, 2), vec![0x02, 0x01]);
        assert_eq!(pack_little(0x0102_0304_0506, 6), vec![6, 5, 4, 3, 2, 1]);
        assert_eq!(
            pack_little(0x0102_0304_0506_0708, 8),
            vec![8, 7, 6, 5, 4, 3, 2, 1]
        );
    }

    #[test]
    fn test_truncates_to_width() {
        assert_eq!(pack_big(0x1_0000_00FF, 4), vec![0x00, 0x00, 0x00, 0xFF]);
        assert_eq!(pack_little(0x1_0000_00FF, 4), vec![0xFF, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_pack_to_leaves_tail_untouched() {
        let mut buf = [0xEEu8; 6];
        pack_big_to(0x2A, 4, &mut buf[1..]);
        assert_eq!(buf, [0xEE, 0x00, 0x00, 0x00, 0x2A, 0xEE]);
    }

    #[test]
    fn test_le_helpers_match_pack_little() {
        assert_eq!(uint32_le(0xDEADBEEF).to_vec(), pack_little(0xDEADBEEF, 4));
        assert_eq!(uint64_le(u64::MAX).to_vec(), pack_little(u64::MAX, 8));
    }

    #[test]
    #[should_panic(expected = "width must be 1..=8 bytes")]
    fn test_zero_width_panics() {
        pack_big(1, 0);
    }
}
