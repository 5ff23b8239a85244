use std::io::Write;

use bytemuck::{Pod, Zeroable};

use super::anchor::AnchorLayout;
use crate::{
    error::{HeaderError, Result},
    DATA_MAGIC, FORMAT_MAJOR, FORMAT_MINOR, INDEX_MAGIC,
};

/// Size of the data file header in bytes
pub const SIZE_DATA_HEADER: usize = size_of::<DataHeader>();

/// Size of the index file header in bytes
pub const SIZE_INDEX_HEADER: usize = size_of::<IndexHeader>();

/// Values are stored as 7-byte little-endian integers
pub const FLAG_PACKED_VALUES: u8 = 1 << 0;

fn check_version(major: u8) -> Result<()> {
    if major != FORMAT_MAJOR {
        return Err(HeaderError::VersionMismatch {
            found: major,
            supported: FORMAT_MAJOR,
        }
        .into());
    }
    Ok(())
}

fn check_k(k: u8) -> Result<()> {
    if k == 0 || k > 32 {
        return Err(HeaderError::KOverflow(k).into());
    }
    Ok(())
}

fn check_mask_range(first_mask: u64, chunk_size: u64) -> Result<()> {
    if first_mask.checked_add(chunk_size).is_none() {
        return Err(HeaderError::MaskRangeOverflow {
            first_mask,
            chunk_size,
        }
        .into());
    }
    Ok(())
}

/// Header of a data file
///
/// This is stored identically in memory and on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct DataHeader {
    // File Type Metadata (16 bytes)
    /// File magic number
    magic: [u8; 8],
    /// Main format version (must match exactly)
    pub major: u8,
    /// Minor format version (informational)
    pub minor: u8,
    /// K-mer length in symbols
    pub k: u8,
    /// Format flags
    pub flags: u8,
    /// Reserved for future use
    reserved: [u8; 4],

    // Chunk (16 bytes)
    /// Global index of the first mask stored in this file
    pub first_mask: u64,
    /// Number of masks stored in this file
    pub chunk_size: u64,
}
impl DataHeader {
    pub fn new(k: u8, first_mask: u64, chunk_size: u64, packed_values: bool) -> Result<Self> {
        check_k(k)?;
        check_mask_range(first_mask, chunk_size)?;
        Ok(Self {
            magic: *DATA_MAGIC,
            major: FORMAT_MAJOR,
            minor: FORMAT_MINOR,
            k,
            flags: if packed_values { FLAG_PACKED_VALUES } else { 0 },
            reserved: [0; 4],
            first_mask,
            chunk_size,
        })
    }

    #[must_use]
    pub fn has_packed_values(&self) -> bool {
        self.flags & FLAG_PACKED_VALUES != 0
    }

    /// Global mask indices stored in this file
    #[must_use]
    pub fn mask_range(&self) -> std::ops::Range<u64> {
        self.first_mask..self.first_mask.saturating_add(self.chunk_size)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(self.as_bytes())?;
        Ok(())
    }

    /// Parses and validates a header from the front of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SIZE_DATA_HEADER {
            return Err(HeaderError::InvalidSize(bytes.len(), SIZE_DATA_HEADER).into());
        }
        let header: Self = bytemuck::pod_read_unaligned(&bytes[..SIZE_DATA_HEADER]);
        if header.magic != *DATA_MAGIC {
            return Err(HeaderError::InvalidMagic(header.magic).into());
        }
        check_version(header.major)?;
        check_k(header.k)?;
        check_mask_range(header.first_mask, header.chunk_size)?;
        Ok(header)
    }
}

/// Header of an anchor index file
///
/// This is stored identically in memory and on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Zeroable, Pod)]
#[repr(C)]
pub struct IndexHeader {
    // File Type Metadata (16 bytes)
    /// File magic number
    magic: [u8; 8],
    /// Main format version (must match exactly)
    pub major: u8,
    /// Minor format version (informational)
    pub minor: u8,
    /// K-mer length in symbols
    pub k: u8,
    /// Symbols fixed by mask selection
    pub mask_prefix: u8,
    /// Symbols selecting the anchor bucket
    pub anchor_prefix: u8,
    /// Reserved for future use
    reserved: [u8; 3],

    // Chunk (24 bytes)
    /// Global index of the first mask stored in the data file
    pub first_mask: u64,
    /// Number of masks stored in the data file
    pub chunk_size: u64,
    /// Size in bytes of the data file this index was built from
    pub data_size: u64,
}
impl IndexHeader {
    #[must_use]
    pub fn new(data: &DataHeader, layout: AnchorLayout, data_size: u64) -> Self {
        Self {
            magic: *INDEX_MAGIC,
            major: FORMAT_MAJOR,
            minor: FORMAT_MINOR,
            k: layout.k(),
            mask_prefix: layout.mask_prefix(),
            anchor_prefix: layout.anchor_prefix(),
            reserved: [0; 3],
            first_mask: data.first_mask,
            chunk_size: data.chunk_size,
            data_size,
        }
    }

    /// The anchor geometry this index was built with
    pub fn layout(&self) -> Result<AnchorLayout> {
        AnchorLayout::new(self.k, self.mask_prefix, self.anchor_prefix)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    pub fn write_bytes<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(self.as_bytes())?;
        Ok(())
    }

    /// Parses and validates a header from the front of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SIZE_INDEX_HEADER {
            return Err(HeaderError::InvalidSize(bytes.len(), SIZE_INDEX_HEADER).into());
        }
        let header: Self = bytemuck::pod_read_unaligned(&bytes[..SIZE_INDEX_HEADER]);
        if header.magic != *INDEX_MAGIC {
            return Err(HeaderError::InvalidMagic(header.magic).into());
        }
        check_version(header.major)?;
        check_k(header.k)?;
        check_mask_range(header.first_mask, header.chunk_size)?;
        header.layout()?;
        Ok(header)
    }
}
