//! Control-byte varint codecs
//!
//! Two values are encoded jointly behind a single control byte which records
//! the byte length of each value. Values are written big-endian using the
//! minimal number of bytes (at least one).
//!
//! ```text
//! control byte (pair codec)
//! ┌───┬───┬───────────┬───────────┐
//! │ 7 │ 6 │   5 4 3   │   2 1 0   │
//! ├───┼───┼───────────┼───────────┤
//! │ - │ - │ len(v2)-1 │ len(v1)-1 │
//! └───┴───┴───────────┴───────────┘
//! ```
//!
//! The two high bits are never touched by this codec and are free for the
//! record layer to carry flags. A 256-entry table maps every control byte to
//! its byte lengths so framing needs no arithmetic.
//!
//! The quad codec packs four `u32` values with four 2-bit length fields.

/// Maximum number of payload bytes following a pair control byte
pub const MAX_PAIR_BYTES: usize = 16;

/// Maximum number of payload bytes following a quad control byte
pub const MAX_QUAD_BYTES: usize = 16;

/// Bits of the pair control byte used for the length fields
pub const PAIR_LENGTH_MASK: u8 = 0b0011_1111;

/// Byte lengths `(len(v1), len(v2))` for every pair control byte
pub static PAIR_LENGTHS: [(u8, u8); 256] = {
    let mut table = [(0u8, 0u8); 256];
    let mut ctrl = 0;
    while ctrl < 256 {
        let l1 = (ctrl & 0b111) as u8 + 1;
        let l2 = ((ctrl >> 3) & 0b111) as u8 + 1;
        table[ctrl] = (l1, l2);
        ctrl += 1;
    }
    table
};

/// Byte lengths of the four values for every quad control byte
pub static QUAD_LENGTHS: [[u8; 4]; 256] = {
    let mut table = [[0u8; 4]; 256];
    let mut ctrl = 0;
    while ctrl < 256 {
        let mut slot = 0;
        while slot < 4 {
            table[ctrl][slot] = ((ctrl >> (slot * 2)) & 0b11) as u8 + 1;
            slot += 1;
        }
        ctrl += 1;
    }
    table
};

/// Minimal number of big-endian bytes needed for `v` (at least one)
#[inline]
fn byte_len_u64(v: u64) -> usize {
    (8 - (v.leading_zeros() as usize / 8)).max(1)
}

#[inline]
fn byte_len_u32(v: u32) -> usize {
    (4 - (v.leading_zeros() as usize / 8)).max(1)
}

#[inline]
fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

/// Total payload length following a pair control byte
#[inline]
#[must_use]
pub fn pair_len(ctrl: u8) -> usize {
    let (l1, l2) = PAIR_LENGTHS[ctrl as usize];
    (l1 + l2) as usize
}

/// Total payload length following a quad control byte
#[inline]
#[must_use]
pub fn quad_len(ctrl: u8) -> usize {
    QUAD_LENGTHS[ctrl as usize].iter().map(|&l| l as usize).sum()
}

/// Encodes two values into `buf`
///
/// # Returns
///
/// The control byte (flag bits cleared) and the slice of `buf` holding the
/// encoded payload.
#[inline]
pub fn encode(v1: u64, v2: u64, buf: &mut [u8; MAX_PAIR_BYTES]) -> (u8, &[u8]) {
    let l1 = byte_len_u64(v1);
    let l2 = byte_len_u64(v2);
    buf[..l1].copy_from_slice(&v1.to_be_bytes()[8 - l1..]);
    buf[l1..l1 + l2].copy_from_slice(&v2.to_be_bytes()[8 - l2..]);
    let ctrl = ((l1 - 1) | ((l2 - 1) << 3)) as u8;
    (ctrl, &buf[..l1 + l2])
}

/// Decodes two values framed by `ctrl` from the front of `bytes`
///
/// Flag bits on `ctrl` are ignored.
///
/// # Returns
///
/// `(v1, v2, consumed)` where `consumed` is zero if `bytes` is shorter than
/// the payload announced by the control byte.
#[inline]
#[must_use]
pub fn decode(ctrl: u8, bytes: &[u8]) -> (u64, u64, usize) {
    let (l1, l2) = PAIR_LENGTHS[ctrl as usize];
    let (l1, l2) = (l1 as usize, l2 as usize);
    if bytes.len() < l1 + l2 {
        return (0, 0, 0);
    }
    let v1 = read_be(&bytes[..l1]);
    let v2 = read_be(&bytes[l1..l1 + l2]);
    (v1, v2, l1 + l2)
}

/// Encodes four `u32` values into `buf`
pub fn encode_quad(values: [u32; 4], buf: &mut [u8; MAX_QUAD_BYTES]) -> (u8, &[u8]) {
    let mut ctrl = 0u8;
    let mut offset = 0;
    for (slot, v) in values.into_iter().enumerate() {
        let len = byte_len_u32(v);
        buf[offset..offset + len].copy_from_slice(&v.to_be_bytes()[4 - len..]);
        offset += len;
        ctrl |= ((len - 1) as u8) << (slot * 2);
    }
    (ctrl, &buf[..offset])
}

/// Decodes four `u32` values framed by `ctrl`
///
/// Returns a zero-length decode if `bytes` is truncated.
#[must_use]
pub fn decode_quad(ctrl: u8, bytes: &[u8]) -> ([u32; 4], usize) {
    let lengths = QUAD_LENGTHS[ctrl as usize];
    let total = quad_len(ctrl);
    if bytes.len() < total {
        return ([0; 4], 0);
    }
    let mut values = [0u32; 4];
    let mut offset = 0;
    for (slot, &len) in lengths.iter().enumerate() {
        let len = len as usize;
        values[slot] = read_be(&bytes[offset..offset + len]) as u32;
        offset += len;
    }
    (values, total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_lengths() {
        let mut buf = [0u8; MAX_PAIR_BYTES];
        let (ctrl, bytes) = encode(0, 0, &mut buf);
        assert_eq!(ctrl, 0);
        assert_eq!(bytes, &[0, 0]);

        let (ctrl, bytes) = encode(0x1234, u64::MAX, &mut buf);
        assert_eq!(PAIR_LENGTHS[ctrl as usize], (2, 8));
        assert_eq!(bytes.len(), 10);
        assert_eq!(&bytes[..2], &[0x12, 0x34]);
    }

    #[test]
    fn test_decode_matches_encode() {
        let mut buf = [0u8; MAX_PAIR_BYTES];
        for (v1, v2) in [
            (0, 1),
            (255, 256),
            (1 << 40, 3),
            (u64::MAX, u64::MAX),
            (0xdead_beef, 0x00ff_0000_0000),
        ] {
            let (ctrl, bytes) = encode(v1, v2, &mut buf);
            let encoded = bytes.to_vec();
            assert_eq!(pair_len(ctrl), encoded.len());
            assert_eq!(decode(ctrl, &encoded), (v1, v2, encoded.len()));
        }
    }

    #[test]
    fn test_decode_ignores_flag_bits() {
        let mut buf = [0u8; MAX_PAIR_BYTES];
        let (ctrl, bytes) = encode(77, 1 << 20, &mut buf);
        let encoded = bytes.to_vec();
        let flagged = ctrl | !PAIR_LENGTH_MASK;
        assert_eq!(decode(flagged, &encoded), (77, 1 << 20, encoded.len()));
    }

    #[test]
    fn test_decode_truncated() {
        let mut buf = [0u8; MAX_PAIR_BYTES];
        let (ctrl, bytes) = encode(1 << 50, 1 << 30, &mut buf);
        let truncated = bytes[..bytes.len() - 1].to_vec();
        assert_eq!(decode(ctrl, &truncated), (0, 0, 0));
        assert_eq!(decode(ctrl, &[]).2, 0);
    }

    #[test]
    fn test_lookup_table() {
        assert_eq!(PAIR_LENGTHS[0], (1, 1));
        assert_eq!(PAIR_LENGTHS[PAIR_LENGTH_MASK as usize], (8, 8));
        assert_eq!(PAIR_LENGTHS[0b1100_0000], (1, 1));
        assert_eq!(QUAD_LENGTHS[0], [1, 1, 1, 1]);
        assert_eq!(QUAD_LENGTHS[0xff], [4, 4, 4, 4]);
        assert_eq!(QUAD_LENGTHS[0b00_01_10_11], [4, 3, 2, 1]);
    }

    #[test]
    fn test_quad_codec() {
        let mut buf = [0u8; MAX_QUAD_BYTES];
        let values = [0, 300, 70_000, u32::MAX];
        let (ctrl, bytes) = encode_quad(values, &mut buf);
        let encoded = bytes.to_vec();
        assert_eq!(encoded.len(), 1 + 2 + 3 + 4);
        assert_eq!(decode_quad(ctrl, &encoded), (values, encoded.len()));
        assert_eq!(decode_quad(ctrl, &encoded[..5]), ([0; 4], 0));
    }
}
