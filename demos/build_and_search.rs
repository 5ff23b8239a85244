use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use kmerkv::{
    create_kv_index, search_parallel, Arena, BatchProcessor, DiskSearcher, KmerSearch,
    MemorySearcher, SearchConfig, SearchResult, WriterBuilder,
};
use parking_lot::Mutex;
use rand::{rngs::SmallRng, Rng, SeedableRng};

const K: u8 = 21;
const NUM_MASKS: u64 = 64;
const KMERS_PER_MASK: usize = 20_000;

#[derive(Clone, Default)]
struct Counter {
    local: usize,
    total: Arc<Mutex<usize>>,
}
impl BatchProcessor for Counter {
    fn process_results(
        &mut self,
        _batch_idx: usize,
        results: &[SearchResult],
    ) -> kmerkv::Result<()> {
        self.local += results.len();
        Ok(())
    }

    fn on_thread_complete(&mut self) -> kmerkv::Result<()> {
        *self.total.lock() += self.local;
        self.local = 0;
        Ok(())
    }
}

fn random_mask(rng: &mut SmallRng) -> HashMap<u64, Vec<u64>> {
    let max = (1u64 << (2 * K)) - 1;
    (0..KMERS_PER_MASK)
        .map(|_| {
            let kmer = rng.random_range(0..=max);
            let positions = (0..rng.random_range(1..4))
                .map(|_| rng.random_range(0..1u64 << 40))
                .collect();
            (kmer, positions)
        })
        .collect()
}

fn main() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = std::env::args()
        .nth(1)
        .map_or_else(|| dir.path().join("demo.kv"), Into::into);
    let mut rng = SmallRng::seed_from_u64(42);

    // Build the store
    let start = Instant::now();
    let mut masks = Vec::new();
    let mut writer = WriterBuilder::default()
        .k(K)
        .anchor_prefix(6)
        .chunk_size(NUM_MASKS)
        .create(&path)?;
    for _ in 0..NUM_MASKS {
        let mask = random_mask(&mut rng);
        writer.write_mask_from_map(mask.clone())?;
        masks.push(mask);
    }
    let (data, _index) = writer.finish()?;
    drop(data);
    println!("wrote {} masks in {:?}", NUM_MASKS, start.elapsed());

    // Queries: one stored k-mer per mask
    let batches: Vec<Vec<u64>> = (0..256)
        .map(|_| {
            masks
                .iter()
                .map(|mask| {
                    let idx = rng.random_range(0..mask.len());
                    mask.keys().nth(idx).copied().unwrap_or(0)
                })
                .collect()
        })
        .collect();
    let config = SearchConfig::default().prefix_len(14);

    let mut disk = DiskSearcher::open(&path)?.with_config(config);
    let mut memory = MemorySearcher::open(&path)?.with_config(config);
    let mut arena = Arena::new();
    for (name, searcher) in [
        ("disk", &mut disk as &mut dyn KmerSearch),
        ("memory", &mut memory as &mut dyn KmerSearch),
    ] {
        let start = Instant::now();
        let mut hits = 0;
        let mut results = Vec::new();
        for batch in &batches {
            searcher.search(batch, &mut arena, &mut results)?;
            hits += results.len();
            arena.release_results(results.drain(..));
        }
        println!("{name:>6}: {hits} hits in {:?}", start.elapsed());
    }

    // Denser anchors for the disk searcher
    create_kv_index(&path, 0, 9)?;
    let disk = DiskSearcher::open(&path)?.with_config(config);
    let counter = Counter::default();
    let start = Instant::now();
    search_parallel(&disk, &batches, 0, counter.clone())?;
    println!(
        "parallel disk (rebuilt index): {} hits in {:?}",
        *counter.total.lock(),
        start.elapsed()
    );

    Ok(())
}
