//! Binary heap merger and bounded fan-in merge tree.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::error::Error;

use log;

use crate::chunk::{Chunk, ChunkReader, ChunkStore, ChunkWriter};
use crate::codec::RecordCodec;
use crate::record::Record;
use crate::sort::{SortError, Stage};

/// Binary heap merger implementation.
/// Merges multiple sorted inputs into a single sorted output.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of items,
/// *n* is the number of chunks (inputs).
///
/// Equal items are emitted in input order, so the output is deterministic.
/// An exhausted input is dropped as soon as its last item is taken, and the merger stops
/// after the first error.
pub struct BinaryHeapMerger<T, E, C>
where
    T: Ord,
    E: Error,
    C: Iterator<Item = Result<T, E>>,
{
    // binary heap is max-heap by default so we reverse it to convert it to min-heap
    items: BinaryHeap<Reverse<(T, usize)>>,
    chunks: Vec<Option<C>>,
    initiated: bool,
    failed: bool,
}

impl<T, E, C> BinaryHeapMerger<T, E, C>
where
    T: Ord,
    E: Error,
    C: Iterator<Item = Result<T, E>>,
{
    /// Creates an instance of a binary heap merger using chunks as inputs.
    /// Chunk items should be sorted in ascending order otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `chunks` - Chunks to be merged in a single sorted one
    pub fn new<I>(chunks: I) -> Self
    where
        I: IntoIterator,
        I::Item: IntoIterator<IntoIter = C, Item = Result<T, E>>,
    {
        let chunks = Vec::from_iter(chunks.into_iter().map(|c| Some(c.into_iter())));
        let items = BinaryHeap::with_capacity(chunks.len());

        return BinaryHeapMerger {
            chunks,
            items,
            initiated: false,
            failed: false,
        };
    }

    /// Returns the number of inputs not yet exhausted.
    pub fn open_chunks(&self) -> usize {
        self.chunks.iter().filter(|chunk| chunk.is_some()).count()
    }

    fn advance(&mut self, idx: usize) -> Result<(), E> {
        let next = match self.chunks[idx].as_mut() {
            Some(chunk) => chunk.next(),
            None => return Ok(()),
        };

        match next {
            Some(Ok(item)) => self.items.push(Reverse((item, idx))),
            Some(Err(err)) => return Err(err),
            None => self.chunks[idx] = None,
        }

        return Ok(());
    }
}

impl<T, E, C> Iterator for BinaryHeapMerger<T, E, C>
where
    T: Ord,
    E: Error,
    C: Iterator<Item = Result<T, E>>,
{
    type Item = Result<T, E>;

    /// Returns the next item from the inputs in ascending order.
    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        if !self.initiated {
            self.initiated = true;
            for idx in 0..self.chunks.len() {
                if let Err(err) = self.advance(idx) {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }

        let Reverse((result, idx)) = self.items.pop()?;
        if let Err(err) = self.advance(idx) {
            self.failed = true;
            return Some(Err(err));
        }

        return Some(Ok(result));
    }
}

/// Merger over sorted chunk readers.
pub type ChunkMerger<C> = BinaryHeapMerger<Record, SortError, ChunkReader<C>>;

/// Merges sorted chunks in passes of at most `fan_in` chunks so that the number of
/// simultaneously open chunk files stays bounded.
pub struct MergeTree<'a, C> {
    store: &'a ChunkStore<C>,
    fan_in: usize,
    stage: Stage,
}

impl<'a, C: RecordCodec> MergeTree<'a, C> {
    /// # Arguments
    /// * `store` - Store the intermediate chunks are created in
    /// * `fan_in` - Maximum number of chunks merged at once, at least 2
    /// * `stage` - Pipeline stage reported on errors
    pub fn new(store: &'a ChunkStore<C>, fan_in: usize, stage: Stage) -> Self {
        MergeTree {
            store,
            fan_in: fan_in.max(2),
            stage,
        }
    }

    /// Merges groups of chunks into intermediate chunks until at most `fan_in` chunks remain.
    /// Consumed chunks are deleted. Returns the remaining chunks and the number of passes made.
    pub fn reduce(&self, mut chunks: Vec<Chunk>) -> Result<(Vec<Chunk>, usize), SortError> {
        let mut passes = 0;

        while chunks.len() > self.fan_in {
            passes += 1;
            log::debug!("merge pass {}: {} chunks, fan-in {}", passes, chunks.len(), self.fan_in);

            let mut merged = Vec::with_capacity((chunks.len() + self.fan_in - 1) / self.fan_in);
            let mut remaining = chunks.into_iter().peekable();
            while remaining.peek().is_some() {
                let group: Vec<Chunk> = remaining.by_ref().take(self.fan_in).collect();
                merged.push(self.merge_group(group)?);
            }
            chunks = merged;
        }

        return Ok((chunks, passes));
    }

    /// Opens an order-verifying reader per chunk and a merger over them.
    pub fn open(&self, chunks: &[Chunk]) -> Result<ChunkMerger<C>, SortError> {
        let readers = chunks
            .iter()
            .map(|chunk| self.store.open(chunk, self.stage, true))
            .collect::<Result<Vec<_>, _>>()?;

        return Ok(BinaryHeapMerger::new(readers));
    }

    /// Merges the chunks into the writer, deleting them afterwards.
    pub fn merge_into(&self, chunks: Vec<Chunk>, mut writer: ChunkWriter<C>) -> Result<Chunk, SortError> {
        {
            let merger = self.open(&chunks)?;
            for record in merger {
                writer.push(record?)?;
            }
        }
        let merged = writer.finish()?;

        for chunk in chunks {
            chunk.remove(self.stage)?;
        }

        return Ok(merged);
    }

    fn merge_group(&self, mut group: Vec<Chunk>) -> Result<Chunk, SortError> {
        if group.len() == 1 {
            return Ok(group.remove(0));
        }

        let writer = self.store.create(self.stage)?;
        log::debug!("merging {} chunks into chunk {}", group.len(), writer.index());

        return self.merge_into(group, writer);
    }
}
