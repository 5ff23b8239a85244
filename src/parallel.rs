//! Caller-side parallel search
//!
//! Searchers are single-threaded. [`search_parallel`] forks one searcher and
//! one [`Arena`] per worker thread and distributes query batches round-robin.

use std::thread;

use crate::{
    arena::Arena,
    error::{Error, Result},
    search::{DiskSearcher, KmerSearch, MemorySearcher, SearchResult},
};

/// A searcher that can produce independent instances for worker threads
pub trait ForkSearcher: KmerSearch + Send + Sized {
    fn fork(&self) -> Result<Self>;
}
impl ForkSearcher for DiskSearcher {
    fn fork(&self) -> Result<Self> {
        self.try_clone()
    }
}
impl ForkSearcher for MemorySearcher {
    fn fork(&self) -> Result<Self> {
        Ok(self.clone())
    }
}

/// Trait for types that consume search results in parallel
pub trait BatchProcessor: Send + Clone {
    /// Process the results of one query batch
    ///
    /// Result buffers are returned to the worker's arena after this call.
    fn process_results(&mut self, batch_idx: usize, results: &[SearchResult]) -> Result<()>;

    /// Called when a worker has searched all of its batches
    /// Default implementation does nothing
    fn on_thread_complete(&mut self) -> Result<()> {
        Ok(())
    }

    /// Set the thread ID for this processor
    #[allow(unused_variables)]
    fn set_tid(&mut self, tid: usize) {
        // Default implementation does nothing
    }
}

/// Searches every batch of queries on `num_threads` workers
///
/// Each batch holds one query per mask, as for [`KmerSearch::search`].
/// `num_threads == 0` uses all available cores. The first worker error is
/// returned after all workers have stopped.
pub fn search_parallel<S, P>(
    searcher: &S,
    batches: &[Vec<u64>],
    num_threads: usize,
    processor: P,
) -> Result<()>
where
    S: ForkSearcher,
    P: BatchProcessor,
{
    let num_threads = if num_threads == 0 {
        num_cpus::get()
    } else {
        num_threads.min(num_cpus::get())
    }
    .min(batches.len())
    .max(1);

    let workers = (0..num_threads)
        .map(|tid| {
            let mut t_proc = processor.clone();
            t_proc.set_tid(tid);
            Ok((searcher.fork()?, t_proc))
        })
        .collect::<Result<Vec<_>>>()?;

    thread::scope(|scope| {
        let handles: Vec<_> = workers
            .into_iter()
            .enumerate()
            .map(|(tid, (mut t_searcher, mut t_proc))| {
                scope.spawn(move || -> Result<()> {
                    let mut arena = Arena::new();
                    let mut results = Vec::new();
                    for batch_idx in (tid..batches.len()).step_by(num_threads) {
                        t_searcher.search(&batches[batch_idx], &mut arena, &mut results)?;
                        t_proc.process_results(batch_idx, &results)?;
                        arena.release_results(results.drain(..));
                    }
                    t_proc.on_thread_complete()
                })
            })
            .collect();

        let mut outcome = Ok(());
        for handle in handles {
            let joined = handle
                .join()
                .unwrap_or_else(|_| Err(Error::GenericError("search worker panicked".into())));
            if outcome.is_ok() {
                outcome = joined;
            }
        }
        outcome
    })
}

#[cfg(test)]
mod testing {
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::{search::SearchConfig, WriterBuilder};

    #[derive(Clone, Default)]
    struct Collector {
        hits: Arc<Mutex<Vec<(usize, u64, u64)>>>,
        threads: Arc<Mutex<HashSet<usize>>>,
        tid: usize,
    }
    impl BatchProcessor for Collector {
        fn process_results(&mut self, batch_idx: usize, results: &[SearchResult]) -> Result<()> {
            let mut hits = self.hits.lock();
            hits.extend(results.iter().map(|r| (batch_idx, r.mask, r.kmer)));
            Ok(())
        }

        fn on_thread_complete(&mut self) -> Result<()> {
            self.threads.lock().insert(self.tid);
            Ok(())
        }

        fn set_tid(&mut self, tid: usize) {
            self.tid = tid;
        }
    }

    fn write_pair(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("chunk.kv");
        let mut writer = WriterBuilder::default()
            .k(6)
            .anchor_prefix(2)
            .chunk_size(2)
            .create(&path)
            .unwrap();
        let mut first: Vec<_> = (0..100u64).map(|i| (i * 7, vec![i])).collect();
        let mut second: Vec<_> = (0..100u64).map(|i| (i * 11, vec![i])).collect();
        writer.write_mask(&mut first).unwrap();
        writer.write_mask(&mut second).unwrap();
        writer.finish().unwrap();
        path
    }

    fn batches() -> Vec<Vec<u64>> {
        (0..64u64).map(|i| vec![i * 7, i * 11]).collect()
    }

    fn check(collector: &Collector) {
        let mut hits = collector.hits.lock().clone();
        hits.sort_unstable();
        let expected: Vec<_> = (0..64u64)
            .flat_map(|i| [(i as usize, 0, i * 7), (i as usize, 1, i * 11)])
            .collect();
        assert_eq!(hits, expected);
    }

    #[test]
    fn test_parallel_disk_search() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pair(dir.path());
        let searcher = DiskSearcher::open(&path).unwrap();
        let collector = Collector::default();
        search_parallel(&searcher, &batches(), 4, collector.clone()).unwrap();
        check(&collector);
        assert!(!collector.threads.lock().is_empty());
    }

    #[test]
    fn test_parallel_memory_search() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pair(dir.path());
        let searcher = MemorySearcher::open(&path)
            .unwrap()
            .with_config(SearchConfig::exact());
        let collector = Collector::default();
        search_parallel(&searcher, &batches(), 0, collector.clone()).unwrap();
        check(&collector);
    }

    #[test]
    fn test_worker_error_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pair(dir.path());
        let searcher = MemorySearcher::open(&path).unwrap();
        // three queries for a two-mask chunk
        let batches = vec![vec![0, 0, 0]];
        assert!(search_parallel(&searcher, &batches, 2, Collector::default()).is_err());
    }

    #[test]
    fn test_no_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_pair(dir.path());
        let searcher = MemorySearcher::open(&path).unwrap();
        let collector = Collector::default();
        search_parallel(&searcher, &[], 3, collector.clone()).unwrap();
        assert!(collector.hits.lock().is_empty());
    }
}
