//! Store writer module
//!
//! This module writes the per-mask k-mer observations of one chunk into a
//! data stream and its sparse anchor index:
//! - Keys are sorted and validated per mask before anything is written
//! - K-mers are delta-encoded two at a time behind control bytes
//! - Anchors are collected while the records are emitted
//!
//! The index body is kept in memory and written on [`KvWriter::finish`],
//! once the final size of the data stream is known.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};
use tracing::{debug, info};

use crate::{
    core::{
        index_path, max_kmer,
        record::{FLAG_LAST, FLAG_SOLO},
        AnchorCollector, AnchorLayout, DataHeader, IndexHeader, PairHeader, ValueWidth,
        SIZE_DATA_HEADER,
    },
    error::{Result, WriteError},
    DEFAULT_ANCHOR_PREFIX,
};

/// Record bytes are flushed to the data sink once this many are buffered
const RECORD_FLUSH_BYTES: usize = 1 << 20;

/// Builder for creating configured [`KvWriter`] instances
///
/// Only the k-mer length is required. When no anchor prefix is given the
/// default is clamped to what the k-mer length allows.
///
/// # Examples
///
/// ```
/// # use kmerkv::{Result, WriterBuilder};
/// # fn main() -> Result<()> {
/// let mut writer = WriterBuilder::default()
///     .k(15)
///     .anchor_prefix(6)
///     .first_mask(0)
///     .chunk_size(4)
///     .build(Vec::new(), Vec::new())?;
/// writer.write_mask(&mut [(7, vec![1, 2]), (3, vec![9])])?;
/// let (data, index) = writer.finish()?;
/// assert!(!data.is_empty() && !index.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Default, Clone, Copy)]
pub struct WriterBuilder {
    k: Option<u8>,
    mask_prefix: Option<u8>,
    anchor_prefix: Option<u8>,
    first_mask: Option<u64>,
    chunk_size: Option<u64>,
    packed_values: Option<bool>,
}
impl WriterBuilder {
    /// Sets the k-mer length (required, `1..=32`)
    #[must_use]
    pub fn k(mut self, k: u8) -> Self {
        self.k = Some(k);
        self
    }

    /// Sets the number of leading symbols fixed by mask selection
    #[must_use]
    pub fn mask_prefix(mut self, mask_prefix: u8) -> Self {
        self.mask_prefix = Some(mask_prefix);
        self
    }

    /// Sets the number of symbols selecting the anchor bucket
    #[must_use]
    pub fn anchor_prefix(mut self, anchor_prefix: u8) -> Self {
        self.anchor_prefix = Some(anchor_prefix);
        self
    }

    /// Sets the global index of the first mask in the chunk
    #[must_use]
    pub fn first_mask(mut self, first_mask: u64) -> Self {
        self.first_mask = Some(first_mask);
        self
    }

    /// Sets the number of masks in the chunk
    #[must_use]
    pub fn chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    /// Stores values as 7-byte integers
    #[must_use]
    pub fn packed_values(mut self, packed_values: bool) -> Self {
        self.packed_values = Some(packed_values);
        self
    }

    fn resolve(&self) -> Result<(DataHeader, AnchorLayout)> {
        let Some(k) = self.k else {
            return Err(WriteError::MissingK.into());
        };
        let header = DataHeader::new(
            k,
            self.first_mask.unwrap_or(0),
            self.chunk_size.unwrap_or(1),
            self.packed_values.unwrap_or(false),
        )?;
        let mask_prefix = self.mask_prefix.unwrap_or(0);
        let anchor_prefix = self
            .anchor_prefix
            .unwrap_or_else(|| DEFAULT_ANCHOR_PREFIX.min(k.saturating_sub(mask_prefix)).max(1));
        let layout = AnchorLayout::new(k, mask_prefix, anchor_prefix)?;
        Ok((header, layout))
    }

    /// Builds a writer over a data sink and an index sink
    pub fn build<W: Write, I: Write>(self, data: W, index: I) -> Result<KvWriter<W, I>> {
        let (header, layout) = self.resolve()?;
        KvWriter::new(data, index, header, layout)
    }

    /// Creates the file pair `path` and `path.idx`
    pub fn create<P: AsRef<Path>>(
        self,
        path: P,
    ) -> Result<KvWriter<BufWriter<File>, BufWriter<File>>> {
        let (header, layout) = self.resolve()?;
        let data = BufWriter::new(File::create(path.as_ref())?);
        let index = BufWriter::new(File::create(index_path(path.as_ref()))?);
        debug!(path = %path.as_ref().display(), k = header.k, "creating store");
        KvWriter::new(data, index, header, layout)
    }
}

/// Writer for one chunk of masks
///
/// Masks are appended in order starting at `first_mask`. Every instance owns
/// its scratch buffers, so concurrent writers need separate instances.
///
/// # Type Parameters
///
/// * `W` - The data stream sink
/// * `I` - The anchor index sink
pub struct KvWriter<W: Write, I: Write> {
    data: W,
    index: I,
    header: DataHeader,
    width: ValueWidth,
    collector: AnchorCollector,

    /// Bytes already handed to the data sink
    data_pos: u64,
    /// Masks written so far (relative to `first_mask`)
    masks_written: u64,

    /// Pending record bytes
    rbuf: Vec<u8>,
    /// Serialized anchor tables of all written masks
    index_body: Vec<u8>,

    num_kmers: u64,
    num_anchors: u64,
}
impl<W: Write, I: Write> KvWriter<W, I> {
    /// Creates a writer and emits the data header
    ///
    /// This is a low-level constructor. For a more convenient way to create a
    /// `KvWriter`, use the [`WriterBuilder`].
    pub fn new(mut data: W, index: I, header: DataHeader, layout: AnchorLayout) -> Result<Self> {
        header.write_bytes(&mut data)?;
        Ok(Self {
            data,
            index,
            width: ValueWidth::from_packed(header.has_packed_values()),
            header,
            collector: AnchorCollector::new(layout),
            data_pos: SIZE_DATA_HEADER as u64,
            masks_written: 0,
            rbuf: Vec::new(),
            index_body: Vec::new(),
            num_kmers: 0,
            num_anchors: 0,
        })
    }

    #[must_use]
    pub fn header(&self) -> DataHeader {
        self.header
    }

    #[must_use]
    pub fn layout(&self) -> AnchorLayout {
        self.collector.layout()
    }

    /// Global index of the next mask to be written, if any remain
    #[must_use]
    pub fn next_mask(&self) -> Option<u64> {
        (self.masks_written < self.header.chunk_size)
            .then(|| self.header.first_mask + self.masks_written)
    }

    /// Bytes of the data stream produced so far
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.data_pos + self.rbuf.len() as u64
    }

    /// Sorts and validates one mask's observations
    fn prepare(&self, entries: &mut [(u64, Vec<u64>)]) -> Result<()> {
        entries.sort_unstable_by_key(|(kmer, _)| *kmer);

        let max = max_kmer(self.header.k);
        let mut last: Option<u64> = None;
        for (kmer, values) in entries.iter() {
            if last == Some(*kmer) {
                return Err(WriteError::DuplicateKmer(*kmer).into());
            }
            if *kmer > max {
                return Err(WriteError::KmerOverflow {
                    kmer: *kmer,
                    k: self.header.k,
                }
                .into());
            }
            if values.is_empty() {
                return Err(WriteError::EmptyValues(*kmer).into());
            }
            for &value in values {
                self.width.check(value)?;
            }
            last = Some(*kmer);
        }
        Ok(())
    }

    fn flush_records(&mut self, force: bool) -> Result<()> {
        if force || self.rbuf.len() >= RECORD_FLUSH_BYTES {
            self.data.write_all(&self.rbuf)?;
            self.data_pos += self.rbuf.len() as u64;
            self.rbuf.clear();
        }
        Ok(())
    }

    /// Writes the next mask of the chunk
    ///
    /// `entries` holds every k-mer observed for the mask with its owned
    /// value list. It is sorted in place; keys must be unique and every
    /// value list must be non-empty.
    ///
    /// # Returns
    ///
    /// The global index of the mask that was written
    pub fn write_mask(&mut self, entries: &mut [(u64, Vec<u64>)]) -> Result<u64> {
        let Some(mask) = self.next_mask() else {
            return Err(WriteError::MasksExhausted(self.header.chunk_size).into());
        };
        self.prepare(entries)?;

        self.collector.clear();
        self.rbuf.write_u64::<LittleEndian>(entries.len() as u64)?;

        let num_records = entries.len().div_ceil(2);
        let mut prev = 0u64;
        for (idx, pair) in entries.chunks(2).enumerate() {
            let record_offset = self.bytes_written();
            let last_flag = if idx + 1 == num_records { FLAG_LAST } else { 0 };

            let (k1, v1) = &pair[0];
            self.collector.observe(*k1, record_offset, false);
            let header = if let Some((k2, v2)) = pair.get(1) {
                self.collector.observe(*k2, record_offset, true);
                PairHeader {
                    flags: last_flag,
                    d1: k1 - prev,
                    d2: k2 - k1,
                    n1: v1.len() as u64,
                    n2: v2.len() as u64,
                }
            } else {
                PairHeader {
                    flags: FLAG_LAST | FLAG_SOLO,
                    d1: k1 - prev,
                    d2: 0,
                    n1: v1.len() as u64,
                    n2: 0,
                }
            };

            header.write_into(&mut self.rbuf);
            for (_, values) in pair {
                self.width.encode_into(values, &mut self.rbuf)?;
            }
            prev = pair[pair.len() - 1].0;
            self.flush_records(false)?;
        }
        self.flush_records(true)?;

        let anchors = self.collector.anchors();
        self.index_body
            .write_u64::<LittleEndian>(anchors.len() as u64)?;
        for anchor in anchors {
            self.index_body.extend_from_slice(anchor.as_bytes());
        }

        self.num_kmers += entries.len() as u64;
        self.num_anchors += anchors.len() as u64;
        self.masks_written += 1;
        debug!(
            mask,
            kmers = entries.len(),
            anchors = anchors.len(),
            "wrote mask"
        );
        Ok(mask)
    }

    /// Writes the given mask, emitting empty masks for any skipped ones
    pub fn write_mask_at(&mut self, mask: u64, entries: &mut [(u64, Vec<u64>)]) -> Result<()> {
        let expected = self.header.first_mask + self.masks_written;
        if mask < expected || mask >= self.header.mask_range().end {
            return Err(WriteError::MaskOutOfRange {
                requested: mask,
                expected,
            }
            .into());
        }
        for _ in expected..mask {
            self.write_mask(&mut [])?;
        }
        self.write_mask(entries)?;
        Ok(())
    }

    /// Writes the next mask from a k-mer to positions map
    pub fn write_mask_from_map(&mut self, map: HashMap<u64, Vec<u64>>) -> Result<u64> {
        let mut entries: Vec<(u64, Vec<u64>)> = map.into_iter().collect();
        self.write_mask(&mut entries)
    }

    /// Completes the chunk and writes the anchor index
    ///
    /// Masks that were never written are stored as empty masks. The index is
    /// only written here, so a writer dropped without `finish` leaves no
    /// usable index behind.
    ///
    /// # Returns
    ///
    /// The data and index sinks
    pub fn finish(mut self) -> Result<(W, I)> {
        while self.next_mask().is_some() {
            self.write_mask(&mut [])?;
        }
        self.flush_records(true)?;
        self.data.flush()?;

        let index_header = IndexHeader::new(&self.header, self.collector.layout(), self.data_pos);
        index_header.write_bytes(&mut self.index)?;
        self.index.write_all(&self.index_body)?;
        self.index.flush()?;

        info!(
            first_mask = self.header.first_mask,
            masks = self.header.chunk_size,
            kmers = self.num_kmers,
            anchors = self.num_anchors,
            bytes = self.data_pos,
            "finished store chunk"
        );
        Ok((self.data, self.index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::{SIZE_DATA_HEADER, SIZE_INDEX_HEADER},
        Error,
    };

    fn writer(k: u8, chunk_size: u64) -> KvWriter<Vec<u8>, Vec<u8>> {
        WriterBuilder::default()
            .k(k)
            .chunk_size(chunk_size)
            .build(Vec::new(), Vec::new())
            .unwrap()
    }

    #[test]
    fn test_header_written_on_build() {
        let writer = writer(21, 1);
        assert_eq!(writer.bytes_written(), SIZE_DATA_HEADER as u64);
        assert_eq!(writer.data.len(), SIZE_DATA_HEADER);
    }

    #[test]
    fn test_missing_k() {
        let result = WriterBuilder::default().build(Vec::new(), Vec::new());
        assert!(matches!(
            result,
            Err(Error::WriteError(WriteError::MissingK))
        ));
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        let result = WriterBuilder::default()
            .k(8)
            .anchor_prefix(0)
            .build(Vec::new(), Vec::new());
        assert!(result.is_err());

        let result = WriterBuilder::default()
            .k(8)
            .mask_prefix(4)
            .anchor_prefix(5)
            .build(Vec::new(), Vec::new());
        assert!(result.is_err());

        let result = WriterBuilder::default().k(33).build(Vec::new(), Vec::new());
        assert!(result.is_err());
    }

    #[test]
    fn test_default_anchor_prefix_clamped() {
        let writer = WriterBuilder::default()
            .k(2)
            .build(Vec::new(), Vec::new())
            .unwrap();
        assert_eq!(writer.layout().anchor_prefix(), 2);

        let writer = WriterBuilder::default()
            .k(31)
            .build(Vec::new(), Vec::new())
            .unwrap();
        assert_eq!(writer.layout().anchor_prefix(), DEFAULT_ANCHOR_PREFIX);
    }

    #[test]
    fn test_small_mask_layout() {
        // {0: [5], 3: [7, 8]} for k = 2
        let mut writer = writer(2, 1);
        writer
            .write_mask(&mut [(3, vec![7, 8]), (0, vec![5])])
            .unwrap();
        let (data, index) = writer.finish().unwrap();

        let body = &data[SIZE_DATA_HEADER..];
        assert_eq!(&body[..8], &2u64.to_le_bytes());
        // ctrl (last) + d1 + d2, ctrl + n1 + n2, 3 values
        assert_eq!(body[8], FLAG_LAST);
        assert_eq!(&body[9..11], &[0, 3]);
        assert_eq!(body[11], 0);
        assert_eq!(&body[12..14], &[1, 2]);
        assert_eq!(body.len(), 8 + 6 + 3 * 8);
        assert_eq!(&body[14..22], &5u64.to_le_bytes());

        // anchor prefix defaults to k, so both k-mers open a bucket
        let anchors = &index[SIZE_INDEX_HEADER..];
        assert_eq!(&anchors[..8], &2u64.to_le_bytes());
        assert_eq!(anchors.len(), 8 + 2 * 16);
    }

    #[test]
    fn test_odd_count_writes_solo_record() {
        let mut writer = writer(4, 1);
        writer
            .write_mask(&mut [(1, vec![1]), (2, vec![2]), (9, vec![3])])
            .unwrap();
        let (data, _) = writer.finish().unwrap();
        let body = &data[SIZE_DATA_HEADER + 8..];
        // first record: no flags
        assert_eq!(body[0] & (FLAG_LAST | FLAG_SOLO), 0);
        // second record starts after 6 framing bytes and 2 values
        let second = &body[6 + 16..];
        assert_eq!(second[0] & (FLAG_LAST | FLAG_SOLO), FLAG_LAST | FLAG_SOLO);
        // d1 = 9 - 2, d2 = 0
        assert_eq!(&second[1..3], &[7, 0]);
        // n1 = 1, n2 = 0
        assert_eq!(&second[4..6], &[1, 0]);
    }

    #[test]
    fn test_empty_mask_and_padding() {
        let mut writer = writer(8, 3);
        writer.write_mask_at(1, &mut [(4, vec![1])]).unwrap();
        assert_eq!(writer.next_mask(), Some(2));
        let (data, index) = writer.finish().unwrap();

        // mask 0: count 0, mask 1: count + 1 record, mask 2: count 0
        let body = &data[SIZE_DATA_HEADER..];
        assert_eq!(&body[..8], &0u64.to_le_bytes());
        assert_eq!(&body[8..16], &1u64.to_le_bytes());
        assert_eq!(&body[body.len() - 8..], &0u64.to_le_bytes());

        let header = IndexHeader::from_bytes(&index).unwrap();
        assert_eq!(header.chunk_size, 3);
        assert_eq!(header.data_size, data.len() as u64);
        // three anchor counts and one anchor
        assert_eq!(index.len(), SIZE_INDEX_HEADER + 3 * 8 + 16);
    }

    #[test]
    fn test_masks_exhausted() {
        let mut writer = writer(8, 1);
        writer.write_mask(&mut []).unwrap();
        assert!(matches!(
            writer.write_mask(&mut []),
            Err(Error::WriteError(WriteError::MasksExhausted(1)))
        ));
    }

    #[test]
    fn test_write_mask_at_out_of_order() {
        let mut writer = writer(8, 4);
        writer.write_mask_at(2, &mut []).unwrap();
        assert!(matches!(
            writer.write_mask_at(1, &mut []),
            Err(Error::WriteError(WriteError::MaskOutOfRange { .. }))
        ));
        assert!(writer.write_mask_at(4, &mut []).is_err());
    }

    #[test]
    fn test_rejects_invalid_input() {
        let mut writer = writer(2, 8);
        assert!(matches!(
            writer.write_mask(&mut [(1, vec![1]), (1, vec![2])]),
            Err(Error::WriteError(WriteError::DuplicateKmer(1)))
        ));
        assert!(matches!(
            writer.write_mask(&mut [(1, vec![])]),
            Err(Error::WriteError(WriteError::EmptyValues(1)))
        ));
        assert!(matches!(
            writer.write_mask(&mut [(16, vec![1])]),
            Err(Error::WriteError(WriteError::KmerOverflow { .. }))
        ));
        // nothing was written by the failed calls
        assert_eq!(writer.next_mask(), Some(0));
    }

    #[test]
    fn test_mixed_mask_prefix() {
        let mut writer = WriterBuilder::default()
            .k(4)
            .mask_prefix(1)
            .anchor_prefix(2)
            .build(Vec::new(), Vec::new())
            .unwrap();
        writer
            .write_mask(&mut [(0x41, vec![2]), (0x01, vec![1])])
            .unwrap();
        let (data, index) = writer.finish().unwrap();

        let mut decoded = HashMap::new();
        crate::Reader::new(data.as_slice())
            .unwrap()
            .read_mask_into_map(&mut decoded)
            .unwrap();
        assert_eq!(decoded, HashMap::from([(0x01, vec![1]), (0x41, vec![2])]));

        // one anchor per (mask prefix, bucket) pair, ascending
        let index = crate::IndexFile::from_bytes(&index).unwrap();
        let kmers: Vec<u64> = index.anchors(0).unwrap().iter().map(|a| a.kmer).collect();
        assert_eq!(kmers, vec![0x01, 0x41]);
    }

    #[test]
    fn test_packed_values() {
        let mut writer = WriterBuilder::default()
            .k(8)
            .packed_values(true)
            .build(Vec::new(), Vec::new())
            .unwrap();
        assert!(matches!(
            writer.write_mask(&mut [(1, vec![u64::MAX])]),
            Err(Error::WriteError(WriteError::ValueOverflow(_)))
        ));
        writer.write_mask(&mut [(1, vec![1, 2, 3])]).unwrap();
        let (data, _) = writer.finish().unwrap();
        // count + 6 framing bytes + 3 * 7 value bytes
        assert_eq!(data.len(), SIZE_DATA_HEADER + 8 + 6 + 21);
    }

    #[test]
    fn test_write_from_map() {
        let mut writer = writer(4, 1);
        let map = HashMap::from([(9, vec![1]), (2, vec![4, 5]), (200, vec![6])]);
        assert_eq!(writer.write_mask_from_map(map).unwrap(), 0);
        let (data, _) = writer.finish().unwrap();
        assert_eq!(&data[SIZE_DATA_HEADER..SIZE_DATA_HEADER + 8], &3u64.to_le_bytes());
    }

    #[test]
    fn test_create_file_pair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chunk.kv");
        let mut writer = WriterBuilder::default().k(12).create(&path).unwrap();
        writer.write_mask(&mut [(5, vec![1])]).unwrap();
        writer.finish().unwrap();
        assert!(path.exists());
        assert!(index_path(&path).exists());
    }
}
