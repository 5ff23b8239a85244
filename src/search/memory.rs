use std::fs::File;
use std::io::Read;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use tracing::debug;

use super::{push_match, KmerSearch, SearchConfig, SearchResult};
use crate::{
    arena::Arena,
    core::{index_path, AnchorLayout, DataHeader, IndexHeader, SIZE_INDEX_HEADER},
    error::{ReadError, Result},
    read::{DenseAnchors, MaskList, Reader},
    DEFAULT_BATCH_STRIDE,
};

/// How a [`MemorySearcher`] locates the scan start within a mask
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryIndexKind {
    /// One slot per anchor bucket, O(1) lookup
    Anchored { mask_prefix: u8, anchor_prefix: u8 },
    /// One key every `stride` entries, binary searched
    Batched { stride: usize },
}
impl Default for MemoryIndexKind {
    fn default() -> Self {
        Self::Batched {
            stride: DEFAULT_BATCH_STRIDE,
        }
    }
}

#[derive(Debug)]
enum MaskIndex {
    Anchored {
        layout: AnchorLayout,
        /// First entry of each bucket or of the next populated one (one extra slot)
        starts: Vec<usize>,
    },
    Batched {
        stride: usize,
        /// K-mer of every `stride`-th entry
        keys: Vec<u64>,
    },
}

#[derive(Debug)]
struct MemoryMask {
    list: MaskList,
    index: MaskIndex,
}
impl MemoryMask {
    fn anchored(list: MaskList, dense: &DenseAnchors, layout: AnchorLayout) -> Self {
        let buckets = dense.len();
        let mut starts = vec![0; buckets + 1];
        let mut next = list.len();
        starts[buckets] = next;
        for bucket in (0..buckets).rev() {
            if let Some(entry) = dense.get(bucket as u64) {
                next = entry;
            }
            starts[bucket] = next;
        }
        Self {
            list,
            index: MaskIndex::Anchored { layout, starts },
        }
    }

    fn batched(list: MaskList, stride: usize) -> Self {
        let keys = (0..list.len())
            .step_by(stride)
            .map(|idx| list.kmer(idx))
            .collect();
        Self {
            list,
            index: MaskIndex::Batched { stride, keys },
        }
    }

    /// First entry index whose k-mer may be `>= lo`
    ///
    /// `lo` must lie within the mask's first and last k-mer.
    fn seek(&self, lo: u64) -> usize {
        match &self.index {
            MaskIndex::Anchored { layout, starts } => {
                let bucket = layout.bucket(lo) as usize;
                let (begin, end) = (starts[bucket], starts[bucket + 1]);
                if end - begin > 1 {
                    self.lower_bound(begin, end, lo)
                } else {
                    begin
                }
            }
            MaskIndex::Batched { stride, keys } => {
                keys.partition_point(|&key| key < lo).saturating_sub(1) * stride
            }
        }
    }

    /// First entry in `[begin, end)` whose k-mer is `>= kmer`
    fn lower_bound(&self, mut begin: usize, mut end: usize, kmer: u64) -> usize {
        while begin < end {
            let mid = begin + (end - begin) / 2;
            if self.list.kmer(mid) < kmer {
                begin = mid + 1;
            } else {
                end = mid;
            }
        }
        begin
    }
}

/// Searcher holding every mask fully decoded in RAM
///
/// Clones share the decoded masks and are cheap to hand to worker threads.
#[derive(Clone, Debug)]
pub struct MemorySearcher {
    header: DataHeader,
    kind: MemoryIndexKind,
    masks: Arc<Vec<MemoryMask>>,
    config: SearchConfig,
}
impl MemorySearcher {
    /// Loads a data file using the anchor geometry recorded in its `.idx`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut buf = [0u8; SIZE_INDEX_HEADER];
        File::open(index_path(path.as_ref()))?.read_exact(&mut buf)?;
        let header = IndexHeader::from_bytes(&buf)?;
        let kind = MemoryIndexKind::Anchored {
            mask_prefix: header.mask_prefix,
            anchor_prefix: header.anchor_prefix,
        };
        Self::open_with_kind(path, kind)
    }

    /// Loads a data file with an explicit index kind (no `.idx` required)
    pub fn open_with_kind<P: AsRef<Path>>(path: P, kind: MemoryIndexKind) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        if !file.metadata()?.is_file() {
            return Err(ReadError::IncompatibleFile.into());
        }
        let mmap = unsafe { Mmap::map(&file) }?;
        let searcher = Self::from_reader(Reader::new(&mmap[..])?, kind)?;
        debug!(
            path = %path.as_ref().display(),
            masks = searcher.masks.len(),
            entries = searcher.num_entries(),
            "loaded memory searcher"
        );
        Ok(searcher)
    }

    /// Decodes every remaining mask of `reader`
    pub fn from_reader<R: Read>(mut reader: Reader<R>, kind: MemoryIndexKind) -> Result<Self> {
        let header = reader.header();
        let kind = match kind {
            MemoryIndexKind::Batched { stride } => MemoryIndexKind::Batched {
                stride: stride.max(1),
            },
            anchored => anchored,
        };

        // a dense table per mask, or batched when the prefix is too wide for one
        let (dense_layout, stride) = match kind {
            MemoryIndexKind::Anchored {
                mask_prefix,
                anchor_prefix,
            } => {
                let layout = AnchorLayout::new(header.k, mask_prefix, anchor_prefix)?;
                let dense_layout = layout.dense_buckets().map(|_| layout);
                if dense_layout.is_none() {
                    debug!(
                        anchor_prefix,
                        "anchor prefix too wide for a dense table, using batched index"
                    );
                }
                (dense_layout, DEFAULT_BATCH_STRIDE)
            }
            MemoryIndexKind::Batched { stride } => (None, stride),
        };

        // grows with decoded masks only, `chunk_size` is untrusted
        let mut masks = Vec::new();
        let mut dense = DenseAnchors::new();
        while let Some(mask) = reader.next_mask() {
            let mut list = MaskList::new();
            let entry = if let Some(layout) = dense_layout {
                reader.read_mask_as_list_with_index(&mut list, &mut dense, layout)?;
                if shares_mask_prefix(&list, &layout) {
                    MemoryMask::anchored(list, &dense, layout)
                } else {
                    debug!(mask, "k-mers differ in mask prefix, using batched index");
                    MemoryMask::batched(list, stride)
                }
            } else {
                reader.read_mask_as_list(&mut list)?;
                MemoryMask::batched(list, stride)
            };
            masks.push(entry);
        }

        Ok(Self {
            header,
            kind,
            masks: Arc::new(masks),
            config: SearchConfig::default(),
        })
    }

    #[must_use]
    pub fn with_config(mut self, config: SearchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn set_config(&mut self, config: SearchConfig) {
        self.config = config;
    }

    #[must_use]
    pub fn header(&self) -> DataHeader {
        self.header
    }

    #[must_use]
    pub fn kind(&self) -> MemoryIndexKind {
        self.kind
    }

    /// Total number of `(kmer, value)` entries held
    #[must_use]
    pub fn num_entries(&self) -> usize {
        self.masks.iter().map(|mask| mask.list.len()).sum()
    }

    /// The decoded list of a global mask index
    pub fn mask_list(&self, mask: u64) -> Result<&MaskList> {
        self.get(mask).map(|entry| &entry.list)
    }

    fn get(&self, mask: u64) -> Result<&MemoryMask> {
        let range = self.header.mask_range();
        if !range.contains(&mask) {
            return Err(ReadError::MaskOutOfRange {
                requested: mask,
                first: range.start,
                end: range.end,
            }
            .into());
        }
        Ok(&self.masks[(mask - range.start) as usize])
    }
}

fn shares_mask_prefix(list: &MaskList, layout: &AnchorLayout) -> bool {
    match (list.first_kmer(), list.last_kmer()) {
        (Some(first), Some(last)) => layout.mask_bits(first) == layout.mask_bits(last),
        _ => true,
    }
}

impl KmerSearch for MemorySearcher {
    fn k(&self) -> u8 {
        self.header.k
    }

    fn mask_range(&self) -> Range<u64> {
        self.header.mask_range()
    }

    fn config(&self) -> SearchConfig {
        self.config
    }

    fn search_mask(
        &mut self,
        mask: u64,
        query: u64,
        arena: &mut Arena,
        out: &mut Vec<SearchResult>,
    ) -> Result<()> {
        let k = self.header.k;
        let config = self.config;
        let entry = self.get(mask)?;
        let list = &entry.list;

        let (left, right) = config.interval(query, k);
        let (Some(first), Some(last)) = (list.first_kmer(), list.last_kmer()) else {
            return Ok(());
        };
        if right < first || left > last {
            return Ok(());
        }

        let mut idx = entry.seek(left.max(first));
        let len = list.len();
        while idx < len {
            let kmer = list.kmer(idx);
            if kmer > right {
                break;
            }
            let mut end = idx + 1;
            while end < len && list.kmer(end) == kmer {
                end += 1;
            }
            if kmer >= left {
                let values = (idx..end).map(|i| list.value(i));
                push_match(out, arena, mask, query, kmer, k, config.check_strand, values);
            }
            idx = end;
        }
        Ok(())
    }
}
