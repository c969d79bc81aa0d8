//! Input partitioning into bounded chunks.

use log;

use crate::buffer::{Capacity, ChunkBuffer};
use crate::chunk::{Chunk, ChunkStore};
use crate::codec::RecordCodec;
use crate::record::{InputError, Record};
use crate::sort::{SortError, Stage};

/// Splits a record stream into chunks of bounded size without holding more than one chunk in memory.
pub struct Partitioner<'a, C> {
    store: &'a ChunkStore<C>,
    capacity: Capacity,
}

impl<'a, C: RecordCodec> Partitioner<'a, C> {
    pub fn new(store: &'a ChunkStore<C>, capacity: Capacity) -> Self {
        Partitioner { store, capacity }
    }

    /// Consumes the input and returns the created chunks in creation order.
    /// Every chunk except the last one has reached the capacity when sealed.
    /// The first input error aborts partitioning.
    pub fn split<I>(&self, input: I) -> Result<Vec<Chunk>, SortError>
    where
        I: IntoIterator<Item = Result<Record, InputError>>,
    {
        let mut chunk_buf = ChunkBuffer::new(self.capacity, self.store.codec());
        let mut chunks = Vec::new();

        for record in input.into_iter() {
            chunk_buf.push(record.map_err(SortError::Input)?);

            if chunk_buf.is_full() {
                chunks.push(self.seal(chunk_buf)?);
                chunk_buf = ChunkBuffer::new(self.capacity, self.store.codec());
            }
        }

        if !chunk_buf.is_empty() {
            chunks.push(self.seal(chunk_buf)?);
        }

        log::info!("input split into {} chunks (capacity: {})", chunks.len(), self.capacity);

        return Ok(chunks);
    }

    fn seal(&self, buffer: ChunkBuffer<C>) -> Result<Chunk, SortError> {
        let mut writer = self.store.create(Stage::Partition)?;
        writer.extend(buffer)?;

        return writer.finish();
    }
}
