//! Store reader module
//!
//! Decodes the masks of a data stream in order. Every decode mode walks the
//! same pair-record grammar and only differs in where the k-mers end up:
//!
//! - [`Reader::read_mask_into_map`] merges into a k-mer to values map
//! - [`Reader::read_mask_as_list`] produces a flat sorted [`MaskList`]
//! - [`Reader::read_mask_as_list_with_index`] additionally fills a
//!   [`DenseAnchors`] table for O(1) bucket lookup
//! - [`Reader::scan_mask`] visits record positions without decoding values

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use tracing::{debug, warn};

use crate::{
    core::{AnchorLayout, DataHeader, PairHeader, PositionedReader, ValueWidth, SIZE_DATA_HEADER},
    error::{IndexError, ReadError, Result},
    MAX_DENSE_ANCHOR_PREFIX,
};

/// Marker for buckets without any k-mer
pub const UNSET: u64 = u64::MAX;

/// One decoded mask as a flat `[kmer, value, kmer, value, ...]` array
///
/// Entries are ascending by k-mer; a k-mer with several values occupies
/// several adjacent entries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MaskList {
    data: Vec<u64>,
}
impl MaskList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Number of `(kmer, value)` entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len() / 2
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// K-mer of the entry at `idx`
    #[inline]
    #[must_use]
    pub fn kmer(&self, idx: usize) -> u64 {
        self.data[idx * 2]
    }

    /// Value of the entry at `idx`
    #[inline]
    #[must_use]
    pub fn value(&self, idx: usize) -> u64 {
        self.data[idx * 2 + 1]
    }

    #[must_use]
    pub fn first_kmer(&self) -> Option<u64> {
        self.data.first().copied()
    }

    #[must_use]
    pub fn last_kmer(&self) -> Option<u64> {
        self.data.len().checked_sub(2).map(|idx| self.data[idx])
    }

    /// The raw interleaved array
    #[must_use]
    pub fn as_slice(&self) -> &[u64] {
        &self.data
    }

    pub fn entries(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.data.chunks_exact(2).map(|pair| (pair[0], pair[1]))
    }

    fn push(&mut self, kmer: u64, values: &[u64]) {
        self.data.reserve(values.len() * 2);
        for &value in values {
            self.data.push(kmer);
            self.data.push(value);
        }
    }
}

/// Dense per-bucket start offsets into a [`MaskList`]
///
/// Holds `4^anchor_prefix` slots; each is the entry index of the first k-mer
/// in that bucket, or [`UNSET`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DenseAnchors {
    offsets: Vec<u64>,
}
impl DenseAnchors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resizes the table for `layout` and marks every bucket unset
    ///
    /// Fails with [`IndexError::DenseTableTooWide`] above
    /// [`MAX_DENSE_ANCHOR_PREFIX`].
    pub fn reset(&mut self, layout: &AnchorLayout) -> Result<()> {
        let buckets = layout
            .dense_buckets()
            .ok_or(IndexError::DenseTableTooWide {
                anchor_prefix: layout.anchor_prefix(),
                max: MAX_DENSE_ANCHOR_PREFIX,
            })?;
        self.offsets.clear();
        self.offsets.resize(buckets, UNSET);
        Ok(())
    }

    /// Entry index of the first k-mer in `bucket`
    #[inline]
    #[must_use]
    pub fn get(&self, bucket: u64) -> Option<usize> {
        match self.offsets.get(bucket as usize) {
            Some(&offset) if offset != UNSET => Some(offset as usize),
            _ => None,
        }
    }

    /// Number of buckets
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u64] {
        &self.offsets
    }

    #[inline]
    fn mark(&mut self, bucket: u64, entry: usize) {
        if let Some(slot) = self.offsets.get_mut(bucket as usize) {
            if *slot == UNSET {
                *slot = entry as u64;
            }
        }
    }
}

/// Destination of decoded k-mers
trait MaskSink {
    /// Value lists are skipped over when `false`
    const VALUES: bool = true;

    fn accept(&mut self, kmer: u64, record_offset: u64, second: bool, values: &[u64]);
}

struct MapSink<'a>(&'a mut HashMap<u64, Vec<u64>>);
impl MaskSink for MapSink<'_> {
    fn accept(&mut self, kmer: u64, _: u64, _: bool, values: &[u64]) {
        self.0.entry(kmer).or_default().extend_from_slice(values);
    }
}

struct ListSink<'a>(&'a mut MaskList);
impl MaskSink for ListSink<'_> {
    fn accept(&mut self, kmer: u64, _: u64, _: bool, values: &[u64]) {
        self.0.push(kmer, values);
    }
}

struct IndexedListSink<'a> {
    list: &'a mut MaskList,
    anchors: &'a mut DenseAnchors,
    layout: AnchorLayout,
}
impl MaskSink for IndexedListSink<'_> {
    fn accept(&mut self, kmer: u64, _: u64, _: bool, values: &[u64]) {
        self.anchors.mark(self.layout.bucket(kmer), self.list.len());
        self.list.push(kmer, values);
    }
}

struct ScanSink<F>(F);
impl<F: FnMut(u64, u64, bool)> MaskSink for ScanSink<F> {
    const VALUES: bool = false;

    fn accept(&mut self, kmer: u64, record_offset: u64, second: bool, _: &[u64]) {
        (self.0)(kmer, record_offset, second);
    }
}

/// Sequential reader over the masks of a data stream
///
/// Each instance owns its decode buffers; concurrent readers need separate
/// instances.
///
/// # Example
///
/// ```
/// # use kmerkv::{MaskList, Reader, Result, WriterBuilder};
/// # fn main() -> Result<()> {
/// let mut writer = WriterBuilder::default().k(4).build(Vec::new(), Vec::new())?;
/// writer.write_mask(&mut [(12, vec![1, 2]), (3, vec![7])])?;
/// let (data, _index) = writer.finish()?;
///
/// let mut reader = Reader::new(data.as_slice())?;
/// let mut list = MaskList::new();
/// reader.read_mask_as_list(&mut list)?;
/// assert_eq!(list.as_slice(), &[3, 7, 12, 1, 12, 2]);
/// # Ok(())
/// # }
/// ```
pub struct Reader<R: Read> {
    reader: PositionedReader<R>,
    header: DataHeader,
    width: ValueWidth,

    /// Masks consumed so far (relative to `first_mask`)
    masks_read: u64,

    /// Values of the k-mer being decoded
    values: Vec<u64>,
    /// Raw value bytes
    scratch: Vec<u8>,
}
impl Reader<BufReader<File>> {
    /// Opens a data file for sequential decoding
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        if !file.metadata()?.is_file() {
            return Err(ReadError::IncompatibleFile.into());
        }
        debug!(path = %path.as_ref().display(), "opening data file");
        Self::new(BufReader::new(file))
    }
}
impl<R: Read> Reader<R> {
    /// Reads and validates the data header from the front of `inner`
    pub fn new(inner: R) -> Result<Self> {
        let mut reader = PositionedReader::new(inner, 0);
        let mut buf = [0u8; SIZE_DATA_HEADER];
        reader.read_exact_checked(&mut buf)?;
        let header = DataHeader::from_bytes(&buf)?;
        Ok(Self {
            reader,
            width: ValueWidth::from_packed(header.has_packed_values()),
            header,
            masks_read: 0,
            values: Vec::new(),
            scratch: Vec::new(),
        })
    }

    #[must_use]
    pub fn header(&self) -> DataHeader {
        self.header
    }

    /// Global index of the next mask to be decoded, if any remain
    #[must_use]
    pub fn next_mask(&self) -> Option<u64> {
        (self.masks_read < self.header.chunk_size)
            .then(|| self.header.first_mask + self.masks_read)
    }

    /// Byte position in the data stream
    #[must_use]
    pub fn position(&self) -> u64 {
        self.reader.pos()
    }

    pub fn into_inner(self) -> R {
        self.reader.into_inner()
    }

    /// Decodes the next mask into `sink` and returns its global index
    fn decode_mask<S: MaskSink>(&mut self, sink: &mut S) -> Result<u64> {
        let Some(mask) = self.next_mask() else {
            return Err(ReadError::EndOfStream.into());
        };
        let count = self.reader.read_u64_checked()?;

        let mut decoded = 0u64;
        let mut prev = 0u64;
        while count > 0 {
            let record_offset = self.reader.pos();
            let header = PairHeader::read_from(&mut self.reader)?;
            let broken = || ReadError::BrokenFile { pos: record_offset };

            let k1 = prev.checked_add(header.d1).ok_or_else(broken)?;
            self.load_values::<S>(header.n1)?;
            sink.accept(k1, record_offset, false, &self.values);
            decoded += 1;
            prev = k1;

            if !header.is_solo() {
                let k2 = k1.checked_add(header.d2).ok_or_else(broken)?;
                self.load_values::<S>(header.n2)?;
                sink.accept(k2, record_offset, true, &self.values);
                decoded += 1;
                prev = k2;
            }

            // more records than declared: stop before running into the next mask
            if header.is_last() || decoded > count {
                break;
            }
        }

        self.masks_read += 1;
        if decoded != count {
            warn!(mask, expected = count, found = decoded, "k-mer count mismatch");
            return Err(ReadError::CountMismatch {
                mask,
                expected: count,
                found: decoded,
            }
            .into());
        }
        Ok(mask)
    }

    /// Loads `n` values into the value buffer, or skips them for scans
    fn load_values<S: MaskSink>(&mut self, n: u64) -> Result<()> {
        self.values.clear();
        if S::VALUES {
            self.width
                .read_values(&mut self.reader, n, &mut self.values, &mut self.scratch)
        } else {
            let pos = self.reader.pos();
            let span = self.width.span(n).ok_or(ReadError::BrokenFile { pos })?;
            self.reader.skip_checked(span)
        }
    }

    /// Decodes the next mask and merges it into `map`
    ///
    /// Values of k-mers already present in `map` are appended to their
    /// existing lists.
    ///
    /// # Returns
    ///
    /// The global index of the decoded mask
    pub fn read_mask_into_map(&mut self, map: &mut HashMap<u64, Vec<u64>>) -> Result<u64> {
        self.decode_mask(&mut MapSink(map))
    }

    /// Decodes the next mask into a flat sorted list, replacing its contents
    pub fn read_mask_as_list(&mut self, list: &mut MaskList) -> Result<u64> {
        list.clear();
        self.decode_mask(&mut ListSink(list))
    }

    /// Decodes the next mask into a flat sorted list and a dense bucket table
    ///
    /// `layout` must describe k-mers of the stored length; it does not need
    /// to match the geometry of the on-disk index.
    pub fn read_mask_as_list_with_index(
        &mut self,
        list: &mut MaskList,
        anchors: &mut DenseAnchors,
        layout: AnchorLayout,
    ) -> Result<u64> {
        if layout.k() != self.header.k {
            return Err(IndexError::HeaderMismatch("k").into());
        }
        anchors.reset(&layout)?;
        list.clear();
        self.decode_mask(&mut IndexedListSink {
            list,
            anchors,
            layout,
        })
    }

    /// Walks the records of the next mask without decoding values
    ///
    /// `f` receives every k-mer with the byte offset of its pair record and
    /// whether it is the record's second k-mer.
    pub fn scan_mask<F: FnMut(u64, u64, bool)>(&mut self, f: F) -> Result<u64> {
        self.decode_mask(&mut ScanSink(f))
    }

    /// Advances past the next mask
    pub fn skip_mask(&mut self) -> Result<u64> {
        self.scan_mask(|_, _, _| {})
    }
}
