//! Pair record grammar
//!
//! Each mask stores its k-mers two at a time:
//!
//! ```text
//! [ctrl|flags][d1 d2][ctrl][n1 n2][values of k1 ...][values of k2 ...]
//! ```
//!
//! * `d1` is `k1 - previous k2` (absolute for the first record of a mask)
//! * `d2` is `k2 - k1`
//! * `n1`, `n2` are the number of values of `k1` and `k2`
//!
//! The first control byte carries the record flags in its two high bits.
//! A solo record holds a single k-mer with `d2 = n2 = 0` and only ever
//! closes a mask with an odd k-mer count.

use std::io::Read;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use super::utils::PositionedReader;
use super::varint::{self, MAX_PAIR_BYTES, PAIR_LENGTH_MASK};
use crate::{
    error::{ReadError, Result, WriteError},
    VALUE_BATCH,
};

/// The record closes its mask
pub const FLAG_LAST: u8 = 1 << 6;

/// The record holds a single k-mer
pub const FLAG_SOLO: u8 = 1 << 7;

/// Largest value representable with packed 7-byte values
pub const MAX_PACKED_VALUE: u64 = (1 << 56) - 1;

/// Decoded framing of a single pair record (everything but the values)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PairHeader {
    /// Record flags ([`FLAG_LAST`], [`FLAG_SOLO`])
    pub flags: u8,
    /// Offset of the first k-mer from the previous record's second k-mer
    pub d1: u64,
    /// Offset of the second k-mer from the first
    pub d2: u64,
    /// Number of values of the first k-mer
    pub n1: u64,
    /// Number of values of the second k-mer
    pub n2: u64,
}
impl PairHeader {
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.flags & FLAG_LAST != 0
    }

    #[must_use]
    pub fn is_solo(&self) -> bool {
        self.flags & FLAG_SOLO != 0
    }

    /// Total number of values following the header
    #[must_use]
    pub fn num_values(&self) -> u64 {
        self.n1.saturating_add(self.n2)
    }

    /// Reads the record framing from the current position of `reader`
    pub fn read_from<R: Read>(reader: &mut PositionedReader<R>) -> Result<Self> {
        let mut buf = [0u8; MAX_PAIR_BYTES];

        let ctrl = reader.read_u8_checked()?;
        let len = varint::pair_len(ctrl);
        reader.read_exact_checked(&mut buf[..len])?;
        let (d1, d2, _) = varint::decode(ctrl, &buf[..len]);

        let count_ctrl = reader.read_u8_checked()?;
        let len = varint::pair_len(count_ctrl);
        reader.read_exact_checked(&mut buf[..len])?;
        let (n1, n2, _) = varint::decode(count_ctrl, &buf[..len]);

        let header = Self {
            flags: ctrl & !PAIR_LENGTH_MASK,
            d1,
            d2,
            n1,
            n2,
        };
        if header.is_solo() && !header.is_last() {
            return Err(ReadError::BrokenFile { pos: reader.pos() }.into());
        }
        Ok(header)
    }

    /// Appends the record framing to `buf`
    pub fn write_into(&self, buf: &mut Vec<u8>) {
        let mut scratch = [0u8; MAX_PAIR_BYTES];

        let (ctrl, bytes) = varint::encode(self.d1, self.d2, &mut scratch);
        buf.push(ctrl | self.flags);
        buf.extend_from_slice(bytes);

        let (ctrl, bytes) = varint::encode(self.n1, self.n2, &mut scratch);
        buf.push(ctrl);
        buf.extend_from_slice(bytes);
    }
}

/// Fixed width used for stored values
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ValueWidth {
    /// 8-byte little-endian values
    #[default]
    Full,
    /// 7-byte little-endian values (values must be below 2^56)
    Packed,
}
impl ValueWidth {
    #[must_use]
    pub fn from_packed(packed: bool) -> Self {
        if packed {
            Self::Packed
        } else {
            Self::Full
        }
    }

    /// Number of bytes per value
    #[must_use]
    pub fn bytes(self) -> usize {
        match self {
            Self::Full => 8,
            Self::Packed => 7,
        }
    }

    /// Validates that `value` is representable with this width
    pub fn check(self, value: u64) -> Result<()> {
        if self == Self::Packed && value > MAX_PACKED_VALUE {
            return Err(WriteError::ValueOverflow(value).into());
        }
        Ok(())
    }

    /// Decodes a single value from exactly `self.bytes()` bytes
    #[inline]
    #[must_use]
    pub fn decode(self, bytes: &[u8]) -> u64 {
        match self {
            Self::Full => LittleEndian::read_u64(bytes),
            Self::Packed => LittleEndian::read_uint(bytes, 7),
        }
    }

    /// Appends the encoded values to `buf`
    pub fn encode_into(self, values: &[u64], buf: &mut Vec<u8>) -> Result<()> {
        for &value in values {
            match self {
                Self::Full => buf.write_u64::<LittleEndian>(value)?,
                Self::Packed => buf.write_uint::<LittleEndian>(value, 7)?,
            }
        }
        Ok(())
    }

    /// Reads `n` values into `out`, [`VALUE_BATCH`] values per read call
    pub fn read_values<R: Read>(
        self,
        reader: &mut PositionedReader<R>,
        n: u64,
        out: &mut Vec<u64>,
        scratch: &mut Vec<u8>,
    ) -> Result<()> {
        let width = self.bytes();
        let mut remaining = n;
        // `n` is untrusted, reserve at most one batch up front
        out.reserve(n.min(VALUE_BATCH as u64) as usize);
        while remaining > 0 {
            let batch = remaining.min(VALUE_BATCH as u64) as usize;
            scratch.resize(batch * width, 0);
            reader.read_exact_checked(scratch)?;
            out.extend(scratch.chunks_exact(width).map(|chunk| self.decode(chunk)));
            remaining -= batch as u64;
        }
        Ok(())
    }

    /// Number of bytes occupied by `n` values, `None` on overflow
    #[must_use]
    pub fn span(self, n: u64) -> Option<u64> {
        n.checked_mul(self.bytes() as u64)
    }
}
