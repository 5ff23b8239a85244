//! Anchor buckets and sparse anchor entries
//!
//! A k-mer is laid out as `[mask prefix][anchor prefix][suffix]` (most
//! significant symbols first). The mask prefix is fixed by mask selection,
//! the anchor prefix selects the bucket, and the suffix is scanned linearly.

use bytemuck::{Pod, Zeroable};

use crate::{
    error::{HeaderError, Result},
    MAX_DENSE_ANCHOR_PREFIX,
};

/// Maps a k-mer to its anchor bucket in `[0, 4^anchor_prefix)`
///
/// Pure function of the geometry, no validation is performed.
#[inline]
#[must_use]
pub fn anchor_prefix(kmer: u64, k: u8, mask_prefix: u8, anchor_prefix: u8) -> u64 {
    let shift = u32::from(k - mask_prefix - anchor_prefix) * 2;
    (kmer >> shift) & low_bits(u32::from(anchor_prefix) * 2)
}

/// A mask with the lowest `bits` bits set (saturating at 64)
#[inline]
pub(crate) fn low_bits(bits: u32) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Validated anchor geometry for k-mers of length `k`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnchorLayout {
    k: u8,
    mask_prefix: u8,
    anchor_prefix: u8,
    /// Number of bits right of the anchor prefix
    shift: u32,
}
impl AnchorLayout {
    /// Creates a new layout
    ///
    /// # Errors
    ///
    /// * `HeaderError::KOverflow` if `k` lies outside of `[1, 32]`
    /// * `HeaderError::InvalidAnchorPrefix` if `anchor_prefix == 0` or
    ///   `mask_prefix + anchor_prefix > k`
    pub fn new(k: u8, mask_prefix: u8, anchor_prefix: u8) -> Result<Self> {
        if k == 0 || k > 32 {
            return Err(HeaderError::KOverflow(k).into());
        }
        if anchor_prefix == 0
            || u16::from(mask_prefix) + u16::from(anchor_prefix) > u16::from(k)
        {
            return Err(HeaderError::InvalidAnchorPrefix {
                k,
                mask_prefix,
                anchor_prefix,
            }
            .into());
        }
        Ok(Self {
            k,
            mask_prefix,
            anchor_prefix,
            shift: u32::from(k - mask_prefix - anchor_prefix) * 2,
        })
    }

    #[must_use]
    pub fn k(&self) -> u8 {
        self.k
    }

    #[must_use]
    pub fn mask_prefix(&self) -> u8 {
        self.mask_prefix
    }

    #[must_use]
    pub fn anchor_prefix(&self) -> u8 {
        self.anchor_prefix
    }

    /// Number of distinct anchor buckets (`4^anchor_prefix`) when they fit
    /// a dense table, see [`MAX_DENSE_ANCHOR_PREFIX`]
    #[must_use]
    pub fn dense_buckets(&self) -> Option<usize> {
        (self.anchor_prefix <= MAX_DENSE_ANCHOR_PREFIX)
            .then(|| 1usize << (u32::from(self.anchor_prefix) * 2))
    }

    /// Anchor bucket of `kmer`
    #[inline]
    #[must_use]
    pub fn bucket(&self, kmer: u64) -> u64 {
        (kmer >> self.shift) & low_bits(u32::from(self.anchor_prefix) * 2)
    }

    /// The top `mask_prefix` symbols of `kmer`
    #[inline]
    #[must_use]
    pub fn mask_bits(&self, kmer: u64) -> u64 {
        let suffix = self.shift + u32::from(self.anchor_prefix) * 2;
        if suffix >= 64 {
            0
        } else {
            kmer >> suffix
        }
    }

    /// Mask prefix and anchor prefix together
    ///
    /// Changes exactly when either the mask prefix or the bucket changes.
    #[inline]
    #[must_use]
    pub fn prefix_key(&self, kmer: u64) -> u64 {
        if self.shift >= 64 {
            0
        } else {
            kmer >> self.shift
        }
    }
}

/// A sparse anchor entry as stored in the index file
///
/// The offset field holds the byte offset of a pair record shifted left by
/// one; the low bit is set when `kmer` is the second k-mer of that record.
///
/// This is stored identically in memory and on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Zeroable, Pod)]
#[repr(C)]
pub struct Anchor {
    /// First k-mer of the bucket
    pub kmer: u64,
    /// Tagged record offset
    tagged_offset: u64,
}
impl Anchor {
    #[must_use]
    pub fn new(kmer: u64, record_offset: u64, second: bool) -> Self {
        Self {
            kmer,
            tagged_offset: (record_offset << 1) | u64::from(second),
        }
    }

    /// Byte offset of the pair record's control byte in the data file
    #[must_use]
    pub fn record_offset(&self) -> u64 {
        self.tagged_offset >> 1
    }

    /// Whether the anchored k-mer is the second k-mer of its record
    #[must_use]
    pub fn is_second(&self) -> bool {
        self.tagged_offset & 1 == 1
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// Collects anchors for one mask while its k-mers stream past in order
///
/// Shared by the writer and by index rebuilds so both produce the same table.
#[derive(Clone, Debug)]
pub struct AnchorCollector {
    layout: AnchorLayout,
    last_prefix: Option<u64>,
    anchors: Vec<Anchor>,
}
impl AnchorCollector {
    #[must_use]
    pub fn new(layout: AnchorLayout) -> Self {
        Self {
            layout,
            last_prefix: None,
            anchors: Vec::new(),
        }
    }

    #[must_use]
    pub fn layout(&self) -> AnchorLayout {
        self.layout
    }

    /// Observes the next k-mer of the mask
    ///
    /// Records an anchor when `kmer` opens a new bucket.
    #[inline]
    pub fn observe(&mut self, kmer: u64, record_offset: u64, second: bool) {
        let prefix = self.layout.prefix_key(kmer);
        if self.last_prefix != Some(prefix) {
            self.anchors.push(Anchor::new(kmer, record_offset, second));
            self.last_prefix = Some(prefix);
        }
    }

    #[must_use]
    pub fn anchors(&self) -> &[Anchor] {
        &self.anchors
    }

    /// Resets the collector for the next mask
    pub fn clear(&mut self) {
        self.anchors.clear();
        self.last_prefix = None;
    }
}
