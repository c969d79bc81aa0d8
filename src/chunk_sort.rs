//! In-place chunk sorting.

use log;
use rayon::prelude::*;

use crate::buffer::{Capacity, ChunkBuffer};
use crate::chunk::{Chunk, ChunkStore};
use crate::codec::RecordCodec;
use crate::merger::MergeTree;
use crate::record::Record;
use crate::sort::{SortError, Stage};

/// Sorts chunks in place, replacing each chunk file atomically.
///
/// A chunk holding more records than the batch limit is sorted in batches that are written
/// as temporary runs and merged back into the chunk, so the result is always sorted end-to-end.
pub struct ChunkSorter<'a, C> {
    store: &'a ChunkStore<C>,
    batch_limit: usize,
    fan_in: usize,
}

impl<'a, C: RecordCodec> ChunkSorter<'a, C> {
    /// # Arguments
    /// * `store` - Store owning the chunks
    /// * `batch_limit` - Maximum number of records held in memory at once
    /// * `fan_in` - Maximum number of runs merged at once when a chunk exceeds the batch limit
    pub fn new(store: &'a ChunkStore<C>, batch_limit: usize, fan_in: usize) -> Self {
        ChunkSorter {
            store,
            batch_limit: batch_limit.max(1),
            fan_in,
        }
    }

    /// Sorts all the chunks on the thread pool. Chunk order is preserved.
    pub fn sort_all(&self, chunks: Vec<Chunk>, thread_pool: &rayon::ThreadPool) -> Result<Vec<Chunk>, SortError> {
        log::info!("sorting {} chunks (batch limit: {} records)", chunks.len(), self.batch_limit);

        thread_pool.install(|| chunks.into_par_iter().map(|chunk| self.sort(chunk)).collect())
    }

    /// Sorts a single chunk. The chunk keeps its index and path.
    pub fn sort(&self, chunk: Chunk) -> Result<Chunk, SortError> {
        let sorted = if chunk.len() <= self.batch_limit as u64 {
            self.sort_in_memory(&chunk)?
        } else {
            self.sort_nested(&chunk)?
        };

        if sorted.len() != chunk.len() {
            return Err(SortError::Consistency {
                stage: Stage::Sort,
                index: Some(chunk.index()),
                expected: chunk.len(),
                actual: sorted.len(),
            });
        }

        return Ok(sorted);
    }

    fn sort_in_memory(&self, chunk: &Chunk) -> Result<Chunk, SortError> {
        log::debug!("sorting chunk {} in memory ({} records)", chunk.index(), chunk.len());

        let mut records = self
            .store
            .open(chunk, Stage::Sort, false)?
            .collect::<Result<Vec<Record>, _>>()?;
        records.par_sort_unstable();

        let mut writer = self.store.replace(chunk, Stage::Sort)?;
        writer.extend(records)?;

        return writer.finish();
    }

    fn sort_nested(&self, chunk: &Chunk) -> Result<Chunk, SortError> {
        log::debug!(
            "sorting chunk {} in batches ({} records, batch limit: {})",
            chunk.index(),
            chunk.len(),
            self.batch_limit
        );

        let capacity = Capacity::Records(self.batch_limit);
        let mut runs = Vec::new();
        {
            let reader = self.store.open(chunk, Stage::Sort, false)?;
            let mut batch = ChunkBuffer::new(capacity, self.store.codec());
            for record in reader {
                batch.push(record?);
                if batch.is_full() {
                    runs.push(self.save_run(batch)?);
                    batch = ChunkBuffer::new(capacity, self.store.codec());
                }
            }
            if !batch.is_empty() {
                runs.push(self.save_run(batch)?);
            }
        }

        let tree = MergeTree::new(self.store, self.fan_in, Stage::Sort);
        let (runs, _) = tree.reduce(runs)?;
        let writer = self.store.replace(chunk, Stage::Sort)?;

        return tree.merge_into(runs, writer);
    }

    fn save_run(&self, mut batch: ChunkBuffer<C>) -> Result<Chunk, SortError> {
        batch.par_sort_unstable();

        let mut writer = self.store.create(Stage::Sort)?;
        writer.extend(batch)?;

        return writer.finish();
    }
}
