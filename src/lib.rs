//! # kmerkv
//!
//! A write-once store mapping fixed-length k-mers to lists of opaque 64-bit
//! values, split into independent partitions ("masks"). A file pair holds a
//! contiguous chunk of masks:
//!
//! - `<name>`: the data file, every mask's k-mers delta-encoded two at a time
//! - `<name>.idx`: the sparse anchor index, one entry per populated bucket
//!
//! Stored k-mers can be searched by shared prefix either straight from disk
//! or from a fully decoded in-memory copy.
//!
//! ```
//! use kmerkv::{Arena, DiskSearcher, KmerSearch, SearchConfig, WriterBuilder};
//!
//! # fn main() -> kmerkv::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let path = dir.path().join("chunk.kv");
//!
//! let mut writer = WriterBuilder::default().k(2).anchor_prefix(1).create(&path)?;
//! writer.write_mask(&mut [(3, vec![7, 8]), (0, vec![5])])?;
//! writer.finish()?;
//!
//! let config = SearchConfig::default().prefix_len(1);
//! let mut searcher = DiskSearcher::open(&path)?.with_config(config);
//! let mut arena = Arena::new();
//! let mut results = Vec::new();
//! searcher.search(&[0b00], &mut arena, &mut results)?;
//! assert_eq!(results.len(), 2);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`core`]: on-disk primitives (headers, varints, pair records, anchors)
//! - [`write`]: [`KvWriter`] and its [`WriterBuilder`]
//! - [`read`]: the sequential [`Reader`] and its decoded forms
//! - [`index`]: the sparse anchor index and [`create_kv_index`]
//! - [`search`]: [`DiskSearcher`] and [`MemorySearcher`]
//! - [`parallel`]: fanning query batches out over threads

pub mod arena;
pub mod core;
pub mod error;
pub mod index;
pub mod parallel;
pub mod read;
pub mod search;
pub mod write;

pub use arena::Arena;
pub use error::{Error, IntoKvError, Result};
pub use index::{create_kv_index, IndexFile};
pub use parallel::{search_parallel, BatchProcessor, ForkSearcher};
pub use read::{DenseAnchors, MaskList, Reader};
pub use search::{
    DiskSearcher, KmerSearch, MemoryIndexKind, MemorySearcher, SearchConfig, SearchResult,
};
pub use write::{KvWriter, WriterBuilder};

/// Magic bytes of a data file
pub const DATA_MAGIC: &[u8; 8] = b".kv-data";

/// Magic bytes of an anchor index file
pub const INDEX_MAGIC: &[u8; 8] = b".kvindex";

/// Main format version, must match exactly when reading
pub const FORMAT_MAJOR: u8 = 1;

/// Minor format version
pub const FORMAT_MINOR: u8 = 0;

/// Extension appended to a data file path to name its index
pub const INDEX_EXTENSION: &str = "idx";

/// Anchor prefix used when none is configured
pub const DEFAULT_ANCHOR_PREFIX: u8 = 8;

/// Largest anchor prefix backed by a dense bucket table (4^12 slots per mask)
///
/// Wider prefixes are valid on disk; in-memory searchers index them batched.
pub const MAX_DENSE_ANCHOR_PREFIX: u8 = 12;

/// Number of values decoded per read call
pub const VALUE_BATCH: usize = 512;

/// Entries per key of a batched in-memory index
pub const DEFAULT_BATCH_STRIDE: usize = 512;
