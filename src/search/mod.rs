//! Prefix search over a stored chunk
//!
//! A query with prefix length `p` matches every stored k-mer sharing its
//! first `p` symbols. Since symbol order is numeric order, those k-mers form
//! the closed interval returned by [`prefix_interval`]. Two searchers answer
//! the same queries with different memory trade-offs:
//!
//! - [`DiskSearcher`] keeps only the sparse anchors and seeks into the file
//! - [`MemorySearcher`] decodes every mask into RAM with a dense bucket index

mod disk;
mod memory;

use std::ops::Range;

use auto_impl::auto_impl;

pub use disk::DiskSearcher;
pub use memory::{MemoryIndexKind, MemorySearcher};

use crate::{
    arena::Arena,
    core::{max_kmer, prefix_interval, shared_prefix_len},
    error::{ReadError, Result},
};

/// A stored k-mer matching a query
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchResult {
    /// Global index of the mask the k-mer was found in
    pub mask: u64,
    /// The matched k-mer
    pub kmer: u64,
    /// Number of leading symbols shared with the query
    pub prefix_len: u8,
    /// Set when `values` holds the reverse-strand positions of a split match
    pub reverse: bool,
    /// Values stored for the k-mer
    pub values: Vec<u64>,
}

/// Query options shared by all searchers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchConfig {
    /// Minimum shared prefix length (clamped to `k`)
    pub prefix_len: u8,
    /// Split each match's values by their low bit into forward and reverse results
    pub check_strand: bool,
    /// Skip queries equal to the all-zero or all-max k-mer
    pub skip_sentinels: bool,
}
impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            prefix_len: u8::MAX,
            check_strand: false,
            skip_sentinels: false,
        }
    }
}
impl SearchConfig {
    /// Exact-match configuration
    #[must_use]
    pub fn exact() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn prefix_len(mut self, prefix_len: u8) -> Self {
        self.prefix_len = prefix_len;
        self
    }

    #[must_use]
    pub fn check_strand(mut self, check_strand: bool) -> Self {
        self.check_strand = check_strand;
        self
    }

    #[must_use]
    pub fn skip_sentinels(mut self, skip_sentinels: bool) -> Self {
        self.skip_sentinels = skip_sentinels;
        self
    }

    /// Closed k-mer interval matched by `query`
    #[inline]
    #[must_use]
    pub fn interval(&self, query: u64, k: u8) -> (u64, u64) {
        prefix_interval(query, k, self.prefix_len.min(k))
    }
}

/// Common interface of the disk and in-memory searchers
///
/// Implementations own mutable scratch state, so one instance serves one
/// thread at a time.
#[auto_impl(&mut, Box)]
pub trait KmerSearch {
    /// K-mer length of the store
    fn k(&self) -> u8;

    /// Global mask indices served by this searcher
    fn mask_range(&self) -> Range<u64>;

    fn config(&self) -> SearchConfig;

    /// Appends every match of `query` within `mask` to `out`
    ///
    /// Value buffers of the appended results come from `arena`.
    fn search_mask(
        &mut self,
        mask: u64,
        query: u64,
        arena: &mut Arena,
        out: &mut Vec<SearchResult>,
    ) -> Result<()>;

    /// Searches one query per mask, `queries[i]` against mask `first_mask + i`
    ///
    /// On error, results appended by this call are released back to `arena`
    /// and removed from `out`; results present before the call are kept.
    fn search(
        &mut self,
        queries: &[u64],
        arena: &mut Arena,
        out: &mut Vec<SearchResult>,
    ) -> Result<()> {
        let range = self.mask_range();
        if queries.len() as u64 > range.end - range.start {
            return Err(ReadError::MaskOutOfRange {
                requested: range.start + queries.len() as u64 - 1,
                first: range.start,
                end: range.end,
            }
            .into());
        }

        let config = self.config();
        let max = max_kmer(self.k());
        let start = out.len();
        for (mask, &query) in range.zip(queries) {
            if config.skip_sentinels && (query == 0 || query == max) {
                continue;
            }
            if let Err(err) = self.search_mask(mask, query, arena, out) {
                arena.truncate_results(out, start);
                return Err(err);
            }
        }
        Ok(())
    }
}

/// Appends the result(s) for one matched k-mer
///
/// `values` is iterated twice when strands are split.
#[allow(clippy::too_many_arguments)]
pub(crate) fn push_match<I>(
    out: &mut Vec<SearchResult>,
    arena: &mut Arena,
    mask: u64,
    query: u64,
    kmer: u64,
    k: u8,
    check_strand: bool,
    values: I,
) where
    I: Iterator<Item = u64> + Clone,
{
    let prefix_len = shared_prefix_len(query, kmer, k);
    let mut emit = |reverse: bool, values: &mut dyn Iterator<Item = u64>| {
        let mut buffer = arena.acquire_values();
        buffer.extend(values);
        if buffer.is_empty() {
            arena.release_values(buffer);
            return;
        }
        out.push(SearchResult {
            mask,
            kmer,
            prefix_len,
            reverse,
            values: buffer,
        });
    };
    if check_strand {
        emit(false, &mut values.clone().filter(|v| v & 1 == 0));
        emit(true, &mut values.filter(|v| v & 1 == 1));
    } else {
        emit(false, &mut values.into_iter());
    }
}
