use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use super::{push_match, KmerSearch, SearchConfig, SearchResult};
use crate::{
    arena::Arena,
    core::{Anchor, DataHeader, PairHeader, PositionedReader, ValueWidth, SIZE_DATA_HEADER},
    error::{ReadError, Result},
    index::IndexFile,
};

/// Value spans below this are read through instead of seeking over them
const SEEK_THRESHOLD: u64 = 8 * 1024;

/// Index of the rightmost anchor whose k-mer is `<= left`
///
/// Returns 0 when `left` precedes every anchor. `anchors` must be non-empty
/// and ascending.
fn rightmost_anchor(anchors: &[Anchor], left: u64) -> usize {
    if anchors[0].kmer > left {
        return 0;
    }
    // anchors[begin].kmer <= left, and end is either past the table or > left
    let (mut begin, mut end) = (0, anchors.len());
    while end - begin > 1 {
        let mid = begin + (end - begin) / 2;
        if anchors[mid].kmer <= left {
            begin = mid;
        } else {
            end = mid;
        }
    }
    begin
}

/// Searcher keeping only the sparse anchor tables in memory
///
/// Queries seek to the nearest anchor at or before the query interval and
/// decode records from there. The index is shared between clones made with
/// [`DiskSearcher::try_clone`]; each clone owns its own file handle.
#[derive(Debug)]
pub struct DiskSearcher<R: Read + Seek = BufReader<File>> {
    reader: PositionedReader<R>,
    header: DataHeader,
    width: ValueWidth,
    index: Arc<IndexFile>,
    config: SearchConfig,

    /// Source file, used to open independent handles
    path: Option<PathBuf>,

    values: Vec<u64>,
    scratch: Vec<u8>,
}
impl DiskSearcher<BufReader<File>> {
    /// Opens a data file and its `.idx` index
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let (header, index) = IndexFile::open_for(path)?;
        debug!(
            path = %path.display(),
            masks = index.num_masks(),
            anchors = index.num_anchors(),
            "opened disk searcher"
        );
        let reader = BufReader::new(File::open(path)?);
        Ok(Self::from_parts(
            reader,
            header,
            Arc::new(index),
            Some(path.to_path_buf()),
        ))
    }

    /// Opens an independent handle on the same file pair
    ///
    /// The anchor tables are shared; only the file handle and scratch
    /// buffers are new.
    pub fn try_clone(&self) -> Result<Self> {
        let Some(path) = &self.path else {
            return Err(ReadError::IncompatibleFile.into());
        };
        let reader = BufReader::new(File::open(path)?);
        let searcher = Self::from_parts(
            reader,
            self.header,
            Arc::clone(&self.index),
            self.path.clone(),
        );
        Ok(searcher.with_config(self.config))
    }
}
impl<R: Read + Seek> DiskSearcher<R> {
    /// Creates a searcher over any seekable data stream
    ///
    /// The stream's header and size are validated against `index`.
    pub fn from_reader(mut inner: R, index: IndexFile) -> Result<Self> {
        let data_size = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        let mut reader = PositionedReader::new(inner, 0);
        let mut buf = [0u8; SIZE_DATA_HEADER];
        reader.read_exact_checked(&mut buf)?;
        let header = DataHeader::from_bytes(&buf)?;
        index.validate(&header, data_size)?;
        Ok(Self::from_parts(
            reader.into_inner(),
            header,
            Arc::new(index),
            None,
        ))
    }

    fn from_parts(
        inner: R,
        header: DataHeader,
        index: Arc<IndexFile>,
        path: Option<PathBuf>,
    ) -> Self {
        Self {
            // every search seeks before reading
            reader: PositionedReader::new(inner, 0),
            width: ValueWidth::from_packed(header.has_packed_values()),
            header,
            index,
            config: SearchConfig::default(),
            path,
            values: Vec::new(),
            scratch: Vec::new(),
        }
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
    pub fn index(&self) -> &IndexFile {
        &self.index
    }

    fn seek_to(&mut self, pos: u64) -> Result<()> {
        self.reader.get_mut().seek(SeekFrom::Start(pos))?;
        self.reader.set_pos(pos);
        Ok(())
    }

    /// Loads the values of a matched k-mer or moves past them
    fn take_values(&mut self, n: u64, keep: bool) -> Result<()> {
        self.values.clear();
        if keep {
            return self
                .width
                .read_values(&mut self.reader, n, &mut self.values, &mut self.scratch);
        }
        let pos = self.reader.pos();
        let broken = || ReadError::BrokenFile { pos };
        let span = self.width.span(n).ok_or_else(broken)?;
        if span >= SEEK_THRESHOLD {
            let end = pos.checked_add(span).ok_or_else(broken)?;
            self.seek_to(end)
        } else {
            self.reader.skip_checked(span)
        }
    }

    fn emit(
        &mut self,
        mask: u64,
        query: u64,
        kmer: u64,
        arena: &mut Arena,
        out: &mut Vec<SearchResult>,
    ) {
        push_match(
            out,
            arena,
            mask,
            query,
            kmer,
            self.header.k,
            self.config.check_strand,
            self.values.iter().copied(),
        );
    }
}
impl<R: Read + Seek> KmerSearch for DiskSearcher<R> {
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
        let index = Arc::clone(&self.index);
        let anchors = index.anchors(mask)?;
        let (left, right) = self.config.interval(query, self.header.k);
        let Some(first) = anchors.first() else {
            return Ok(());
        };
        if right < first.kmer {
            return Ok(());
        }

        let anchor = anchors[rightmost_anchor(anchors, left)];
        self.seek_to(anchor.record_offset())?;

        let mut prev: Option<u64> = None;
        loop {
            let record_offset = self.reader.pos();
            let header = PairHeader::read_from(&mut self.reader)?;
            let broken = || ReadError::BrokenFile { pos: record_offset };

            // the anchored record starts from the anchor k-mer instead of a delta
            let k1 = match prev {
                Some(prev) => prev.checked_add(header.d1),
                None if anchor.is_second() => anchor.kmer.checked_sub(header.d2),
                None => Some(anchor.kmer),
            }
            .ok_or_else(broken)?;
            if k1 > right {
                break;
            }
            self.take_values(header.n1, k1 >= left)?;
            if k1 >= left {
                self.emit(mask, query, k1, arena, out);
            }
            if header.is_solo() {
                break;
            }

            let k2 = k1.checked_add(header.d2).ok_or_else(broken)?;
            if k2 > right {
                break;
            }
            self.take_values(header.n2, k2 >= left)?;
            if k2 >= left {
                self.emit(mask, query, k2, arena, out);
            }
            if header.is_last() {
                break;
            }
            prev = Some(k2);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Cursor;

    use rand::{rngs::SmallRng, Rng, SeedableRng};

    use super::*;
    use crate::{
        core::{index_path, record::FLAG_LAST, AnchorLayout, IndexHeader},
        Error, WriterBuilder,
    };

    fn write_pair(
        dir: &Path,
        k: u8,
        anchor_prefix: u8,
        masks: &[Vec<(u64, Vec<u64>)>],
    ) -> PathBuf {
        let path = dir.join("chunk.kv");
        let mut writer = WriterBuilder::default()
            .k(k)
            .anchor_prefix(anchor_prefix)
            .chunk_size(masks.len() as u64)
            .create(&path)
            .unwrap();
        for mask in masks {
            writer.write_mask(&mut mask.clone()).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    fn kmers(results: &[SearchResult]) -> Vec<u64> {
        results.iter().map(|r| r.kmer).collect()
    }

    #[test]
    fn test_rightmost_anchor() {
        let anchors: Vec<Anchor> = [10, 20, 30, 40]
            .into_iter()
            .map(|kmer| Anchor::new(kmer, 0, false))
            .collect();
        assert_eq!(rightmost_anchor(&anchors, 5), 0);
        assert_eq!(rightmost_anchor(&anchors, 10), 0);
        assert_eq!(rightmost_anchor(&anchors, 29), 1);
        assert_eq!(rightmost_anchor(&anchors, 30), 2);
        assert_eq!(rightmost_anchor(&anchors, 1000), 3);
        assert_eq!(rightmost_anchor(&anchors[..1], 1000), 0);
    }

    #[test]
    fn test_boundary_prefix_search() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pair(dir.path(), 2, 1, &[vec![(0, vec![5]), (3, vec![7, 8])]]);
        let mut searcher =
            DiskSearcher::open(&path).unwrap().with_config(SearchConfig::default().prefix_len(1));
        let mut arena = Arena::new();
        let mut out = Vec::new();
        searcher.search(&[0b00], &mut arena, &mut out).unwrap();
        assert_eq!(kmers(&out), vec![0, 3]);
        assert_eq!(out[0].values, vec![5]);
        assert_eq!(out[1].values, vec![7, 8]);
        assert_eq!(out[0].prefix_len, 2);
        assert_eq!(out[1].prefix_len, 1);
    }

    #[test]
    fn test_exact_lookup_and_absent_key() {
        let dir = tempfile::tempdir().unwrap();
        let mask: Vec<_> = (0..300u64).map(|i| (i * 3, vec![i])).collect();
        let path = write_pair(dir.path(), 6, 2, &[mask]);
        let mut searcher = DiskSearcher::open(&path).unwrap();
        let mut arena = Arena::new();
        let mut out = Vec::new();

        for query in [0u64, 3, 300, 897] {
            out.clear();
            searcher.search(&[query], &mut arena, &mut out).unwrap();
            assert_eq!(kmers(&out), vec![query]);
            assert_eq!(out[0].values, vec![query / 3]);
        }
        for query in [1u64, 301, 898, 4095] {
            out.clear();
            searcher.search(&[query], &mut arena, &mut out).unwrap();
            assert!(out.is_empty());
        }
    }

    #[test]
    fn test_second_kmer_anchor() {
        // with k = 3 and one-symbol buckets, 0x10 is the second k-mer of its record
        let dir = tempfile::tempdir().unwrap();
        let path = write_pair(
            dir.path(),
            3,
            1,
            &[vec![(0x01, vec![1]), (0x10, vec![2]), (0x11, vec![3]), (0x30, vec![4])]],
        );
        let searcher = DiskSearcher::open(&path).unwrap();
        let anchors = searcher.index().anchors(0).unwrap();
        assert!(anchors[1].is_second());
        assert_eq!(anchors[1].kmer, 0x10);

        let mut searcher = searcher.with_config(SearchConfig::default().prefix_len(1));
        let mut out = Vec::new();
        searcher.search(&[0x12], &mut Arena::new(), &mut out).unwrap();
        assert_eq!(kmers(&out), vec![0x10, 0x11]);
    }

    #[test]
    fn test_matches_bruteforce() {
        let mut rng = SmallRng::seed_from_u64(42);
        let k = 8;
        let mut masks = Vec::new();
        for _ in 0..4 {
            let map: HashMap<u64, Vec<u64>> = (0..rng.random_range(0..400))
                .map(|_| {
                    let kmer = rng.random_range(0..1u64 << 16);
                    (kmer, (0..rng.random_range(1..4)).map(|_| rng.random()).collect())
                })
                .collect();
            masks.push(map.into_iter().collect::<Vec<_>>());
        }
        let dir = tempfile::tempdir().unwrap();
        let path = write_pair(dir.path(), k, 3, &masks);
        let mut searcher = DiskSearcher::open(&path).unwrap();
        let mut arena = Arena::new();

        for prefix_len in [0u8, 2, 5, 8] {
            searcher.set_config(SearchConfig::default().prefix_len(prefix_len));
            for _ in 0..50 {
                let queries: Vec<u64> = (0..4).map(|_| rng.random_range(0..1u64 << 16)).collect();
                let mut out = Vec::new();
                searcher.search(&queries, &mut arena, &mut out).unwrap();

                let mut expected = Vec::new();
                for (mask, query) in queries.iter().enumerate() {
                    let (left, right) = SearchConfig::default()
                        .prefix_len(prefix_len)
                        .interval(*query, k);
                    let mut hits: Vec<_> = masks[mask]
                        .iter()
                        .filter(|(kmer, _)| (left..=right).contains(kmer))
                        .map(|(kmer, values)| (mask as u64, *kmer, values.clone()))
                        .collect();
                    hits.sort_unstable();
                    expected.extend(hits);
                }
                let found: Vec<_> = out
                    .iter()
                    .map(|r| (r.mask, r.kmer, r.values.clone()))
                    .collect();
                assert_eq!(found, expected);
                arena.release_results(out);
            }
        }
        assert_eq!(arena.outstanding(), 0);
    }

    #[test]
    fn test_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pair(dir.path(), 2, 1, &[vec![(0, vec![1])], vec![(15, vec![2])]]);
        let mut searcher = DiskSearcher::open(&path).unwrap();
        let mut out = Vec::new();
        searcher.search(&[0, 15], &mut Arena::new(), &mut out).unwrap();
        assert_eq!(kmers(&out), vec![0, 15]);

        out.clear();
        searcher.set_config(SearchConfig::default().skip_sentinels(true));
        searcher.search(&[0, 15], &mut Arena::new(), &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_too_many_queries() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pair(dir.path(), 4, 1, &[vec![(1, vec![1])]]);
        let mut searcher = DiskSearcher::open(&path).unwrap();
        let err = searcher
            .search(&[1, 2], &mut Arena::new(), &mut Vec::new())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ReadError(ReadError::MaskOutOfRange { .. })
        ));
    }

    #[test]
    fn test_corruption_discards_partial_results() {
        let dir = tempfile::tempdir().unwrap();
        let mask: Vec<_> = (0..64u64).map(|i| (i, vec![i])).collect();
        let path = write_pair(dir.path(), 4, 1, &[mask.clone(), mask]);

        // cut the final value short and point a matching index at it
        let mut data = std::fs::read(&path).unwrap();
        data.truncate(data.len() - 4);
        let mut index_bytes = std::fs::read(index_path(&path)).unwrap();
        index_bytes[32..40].copy_from_slice(&(data.len() as u64).to_le_bytes());
        let index = IndexFile::from_bytes(&index_bytes).unwrap();

        let mut searcher = DiskSearcher::from_reader(Cursor::new(data), index)
            .unwrap()
            .with_config(SearchConfig::default().prefix_len(0));
        let mut arena = Arena::new();
        let mut out = Vec::new();

        searcher.search(&[0], &mut arena, &mut out).unwrap();
        assert_eq!(out.len(), 64);
        let kept = out.len();

        let err = searcher.search(&[0, 0], &mut arena, &mut out).unwrap_err();
        assert!(err.is_corruption());
        assert_eq!(out.len(), kept);
        assert_eq!(arena.outstanding(), kept);
    }

    /// One mask holding k-mers 1 and 2, where k-mer 1 claims `n1` values
    fn pair_with_value_count(n1: u64) -> (Vec<u8>, IndexFile) {
        let header = DataHeader::new(4, 0, 1, false).unwrap();
        let mut data = header.as_bytes().to_vec();
        data.extend_from_slice(&2u64.to_le_bytes());
        PairHeader {
            flags: FLAG_LAST,
            d1: 1,
            d2: 1,
            n1,
            n2: 1,
        }
        .write_into(&mut data);
        data.extend_from_slice(&[0u8; 16]);

        let layout = AnchorLayout::new(4, 0, 1).unwrap();
        let mut index = IndexHeader::new(&header, layout, data.len() as u64)
            .as_bytes()
            .to_vec();
        index.extend_from_slice(&1u64.to_le_bytes());
        index.extend_from_slice(Anchor::new(1, SIZE_DATA_HEADER as u64 + 8, false).as_bytes());
        (data, IndexFile::from_bytes(&index).unwrap())
    }

    #[test]
    fn test_huge_value_count() {
        for n1 in [u64::MAX, u64::MAX / 8, 1 << 40] {
            for query in [1, 2] {
                let (data, index) = pair_with_value_count(n1);
                let mut searcher = DiskSearcher::from_reader(Cursor::new(data), index).unwrap();
                let mut arena = Arena::new();
                let mut out = Vec::new();
                let err = searcher.search(&[query], &mut arena, &mut out).unwrap_err();
                assert!(err.is_corruption(), "n1 = {n1}, query = {query}: {err}");
                assert!(out.is_empty());
            }
        }
    }

    #[test]
    fn test_stream_size_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pair(dir.path(), 4, 1, &[vec![(1, vec![1])]]);
        let index = IndexFile::open_for(&path).unwrap().1;
        let mut data = std::fs::read(&path).unwrap();
        data.push(0);
        let err = DiskSearcher::from_reader(Cursor::new(data), index).unwrap_err();
        assert!(err.is_index_mismatch());
    }

    #[test]
    fn test_clone_shares_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pair(dir.path(), 4, 2, &[vec![(9, vec![1])]]);
        let searcher = DiskSearcher::open(&path)
            .unwrap()
            .with_config(SearchConfig::default().prefix_len(1));
        let mut clone = searcher.try_clone().unwrap();
        assert!(Arc::ptr_eq(&searcher.index, &clone.index));
        assert_eq!(clone.config(), searcher.config());

        let mut out = Vec::new();
        clone.search(&[8], &mut Arena::new(), &mut out).unwrap();
        assert_eq!(kmers(&out), vec![9]);
        assert!(index_path(&path).exists());
    }
}
