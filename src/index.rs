//! Sparse anchor index
//!
//! [`IndexFile`] holds the per-mask anchor tables of a `.idx` file in RAM.
//! [`create_kv_index`] rebuilds such a file from an existing data file,
//! optionally with a different anchor density.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::ops::Range;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use memmap2::Mmap;
use tracing::{debug, info};

use crate::{
    core::{
        index_path, Anchor, AnchorCollector, AnchorLayout, DataHeader, IndexHeader,
        SIZE_DATA_HEADER, SIZE_INDEX_HEADER,
    },
    error::{IndexError, ReadError, Result},
    read::Reader,
};

const SIZE_ANCHOR: usize = size_of::<Anchor>();

/// The anchor tables of one file pair
#[derive(Clone, Debug)]
pub struct IndexFile {
    header: IndexHeader,
    layout: AnchorLayout,
    anchors: Vec<Anchor>,
    /// Range of each mask's anchors in `anchors`
    spans: Vec<Range<usize>>,
}
impl IndexFile {
    /// Memory-maps and parses an index file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        if !file.metadata()?.is_file() {
            return Err(ReadError::IncompatibleFile.into());
        }
        let mmap = unsafe { Mmap::map(&file) }?;
        let index = Self::from_bytes(&mmap)?;
        debug!(
            path = %path.as_ref().display(),
            masks = index.num_masks(),
            anchors = index.num_anchors(),
            "loaded anchor index"
        );
        Ok(index)
    }

    /// Loads the index of `data_path` and validates it against the data file
    ///
    /// # Returns
    ///
    /// The data file header along with the validated index
    pub fn open_for<P: AsRef<Path>>(data_path: P) -> Result<(DataHeader, Self)> {
        let data_path = data_path.as_ref();
        let data_size = fs::metadata(data_path)?.len();
        let data_header = Reader::from_path(data_path)?.header();
        let index = Self::from_path(index_path(data_path))?;
        index.validate(&data_header, data_size)?;
        Ok((data_header, index))
    }

    /// Parses a complete index file image
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = IndexHeader::from_bytes(bytes)?;
        let layout = header.layout()?;

        let mut anchors = Vec::new();
        // every mask takes at least its 8-byte count
        let max_masks = (bytes.len().saturating_sub(SIZE_INDEX_HEADER) / 8) as u64;
        let mut spans = Vec::with_capacity(header.chunk_size.min(max_masks) as usize);
        let mut pos = SIZE_INDEX_HEADER;
        for _ in 0..header.chunk_size {
            let count_bytes = bytes
                .get(pos..pos + 8)
                .ok_or(IndexError::MalformedTable(pos))?;
            let count = LittleEndian::read_u64(count_bytes) as usize;
            pos += 8;

            let table = count
                .checked_mul(SIZE_ANCHOR)
                .and_then(|len| pos.checked_add(len))
                .and_then(|end| bytes.get(pos..end))
                .ok_or(IndexError::MalformedTable(pos))?;

            let start = anchors.len();
            match bytemuck::try_cast_slice::<u8, Anchor>(table) {
                Ok(slice) => anchors.extend_from_slice(slice),
                // mmap tables are not guaranteed to be 8-byte aligned
                Err(_) => anchors.extend(
                    table
                        .chunks_exact(SIZE_ANCHOR)
                        .map(bytemuck::pod_read_unaligned::<Anchor>),
                ),
            }
            if anchors[start..].windows(2).any(|w| w[0].kmer >= w[1].kmer) {
                return Err(IndexError::MalformedTable(pos).into());
            }
            spans.push(start..anchors.len());
            pos += table.len();
        }
        if pos != bytes.len() {
            return Err(IndexError::MalformedTable(pos).into());
        }

        Ok(Self {
            header,
            layout,
            anchors,
            spans,
        })
    }

    /// Checks that this index describes the given data file
    pub fn validate(&self, data: &DataHeader, data_size: u64) -> Result<()> {
        if self.header.k != data.k {
            return Err(IndexError::HeaderMismatch("k").into());
        }
        if self.header.first_mask != data.first_mask {
            return Err(IndexError::HeaderMismatch("first_mask").into());
        }
        if self.header.chunk_size != data.chunk_size {
            return Err(IndexError::HeaderMismatch("chunk_size").into());
        }
        if self.header.data_size != data_size {
            return Err(IndexError::ByteSizeMismatch(data_size, self.header.data_size).into());
        }
        // the smallest valid record offset follows the header and a mask count
        let min_offset = SIZE_DATA_HEADER as u64 + 8;
        if let Some(anchor) = self
            .anchors
            .iter()
            .find(|a| a.record_offset() < min_offset || a.record_offset() >= data_size)
        {
            return Err(IndexError::AnchorOutOfBounds {
                offset: anchor.record_offset(),
                size: data_size,
            }
            .into());
        }
        Ok(())
    }

    #[must_use]
    pub fn header(&self) -> IndexHeader {
        self.header
    }

    #[must_use]
    pub fn layout(&self) -> AnchorLayout {
        self.layout
    }

    #[must_use]
    pub fn num_masks(&self) -> usize {
        self.spans.len()
    }

    #[must_use]
    pub fn num_anchors(&self) -> usize {
        self.anchors.len()
    }

    /// Anchors of the mask at position `idx` within the chunk
    #[must_use]
    pub fn anchors_at(&self, idx: usize) -> Option<&[Anchor]> {
        self.spans.get(idx).map(|span| &self.anchors[span.clone()])
    }

    /// Anchors of the global mask index `mask`
    pub fn anchors(&self, mask: u64) -> Result<&[Anchor]> {
        let first = self.header.first_mask;
        let end = first.saturating_add(self.header.chunk_size);
        if !(first..end).contains(&mask) {
            return Err(ReadError::MaskOutOfRange {
                requested: mask,
                first,
                end,
            }
            .into());
        }
        Ok(self.anchors_at((mask - first) as usize).unwrap_or_default())
    }
}

/// Rebuilds the anchor index of an existing data file
///
/// Records are walked without decoding any values. The new index is first
/// written next to the final path and then renamed over `<data_path>.idx`, so
/// an interrupted rebuild leaves the previous index intact.
///
/// # Returns
///
/// The header of the new index
pub fn create_kv_index<P: AsRef<Path>>(
    data_path: P,
    mask_prefix: u8,
    anchor_prefix: u8,
) -> Result<IndexHeader> {
    let data_path = data_path.as_ref();
    let data_size = fs::metadata(data_path)?.len();
    let mut reader = Reader::from_path(data_path)?;
    let data_header = reader.header();
    let layout = AnchorLayout::new(data_header.k, mask_prefix, anchor_prefix)?;

    let mut collector = AnchorCollector::new(layout);
    let mut body = Vec::new();
    let mut num_anchors = 0;
    while reader.next_mask().is_some() {
        collector.clear();
        reader.scan_mask(|kmer, offset, second| collector.observe(kmer, offset, second))?;
        body.write_u64::<LittleEndian>(collector.anchors().len() as u64)?;
        for anchor in collector.anchors() {
            body.extend_from_slice(anchor.as_bytes());
        }
        num_anchors += collector.anchors().len();
    }
    if reader.position() != data_size {
        return Err(IndexError::ByteSizeMismatch(data_size, reader.position()).into());
    }

    let header = IndexHeader::new(&data_header, layout, data_size);
    let final_path = index_path(data_path);
    let mut tmp_path = final_path.clone().into_os_string();
    tmp_path.push(".tmp");

    let mut writer = BufWriter::new(File::create(&tmp_path)?);
    header.write_bytes(&mut writer)?;
    writer.write_all(&body)?;
    writer.flush()?;
    drop(writer);
    fs::rename(&tmp_path, &final_path)?;

    info!(
        path = %final_path.display(),
        mask_prefix,
        anchor_prefix,
        anchors = num_anchors,
        "rebuilt anchor index"
    );
    Ok(header)
}
