//! Capacity-limited chunk buffer.

use std::fmt::{self, Display};

use rayon;

use crate::codec::RecordCodec;
use crate::record::Record;

/// Chunk size budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capacity {
    /// Number of records per chunk.
    Records(usize),
    /// Encoded chunk size in bytes.
    Bytes(u64),
}

impl Capacity {
    pub fn is_zero(&self) -> bool {
        match self {
            Capacity::Records(limit) => *limit == 0,
            Capacity::Bytes(limit) => *limit == 0,
        }
    }
}

impl Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capacity::Records(limit) => write!(f, "{} records", limit),
            Capacity::Bytes(limit) => write!(f, "{} bytes", limit),
        }
    }
}

/// Buffer accumulating records until the capacity budget is reached.
/// Tracks the encoded size of its content so that byte budgets apply to the chunk as stored.
pub struct ChunkBuffer<C> {
    limit: Capacity,
    codec: C,
    size: u64,
    inner: Vec<Record>,
}

impl<C: RecordCodec> ChunkBuffer<C> {
    pub fn new(limit: Capacity, codec: C) -> Self {
        let inner = match limit {
            Capacity::Records(limit) => Vec::with_capacity(limit.min(1 << 20)),
            Capacity::Bytes(_) => Vec::new(),
        };

        ChunkBuffer {
            limit,
            codec,
            size: 0,
            inner,
        }
    }

    /// Adds a new record to the buffer.
    pub fn push(&mut self, record: Record) {
        self.size += self.codec.encoded_len(record) as u64;
        self.inner.push(record);
    }

    /// Returns the number of buffered records.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the encoded size of the buffered records.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Checks if the buffer reached the limit.
    pub fn is_full(&self) -> bool {
        match self.limit {
            Capacity::Records(limit) => self.inner.len() >= limit,
            Capacity::Bytes(limit) => self.size >= limit,
        }
    }
}

impl<C> IntoIterator for ChunkBuffer<C> {
    type Item = Record;
    type IntoIter = <Vec<Record> as IntoIterator>::IntoIter;

    fn into_iter(self) -> Self::IntoIter {
        self.inner.into_iter()
    }
}

impl<C: Send> rayon::slice::ParallelSliceMut<Record> for ChunkBuffer<C> {
    fn as_parallel_slice_mut(&mut self) -> &mut [Record] {
        self.inner.as_mut_slice()
    }
}

#[cfg(test)]
mod test {
    use rayon::slice::ParallelSliceMut;

    use super::{Capacity, ChunkBuffer};
    use crate::codec::{RmpCodec, TextCodec};
    use crate::record::Record;

    #[test]
    fn test_records_limited_buffer() {
        let mut buffer = ChunkBuffer::new(Capacity::Records(2), TextCodec);

        buffer.push(Record::new(1).unwrap());
        assert_eq!(buffer.is_full(), false);
        buffer.push(Record::new(0).unwrap());
        assert_eq!(buffer.is_full(), true);

        buffer.par_sort_unstable();
        let data: Vec<u32> = buffer.into_iter().map(Record::value).collect();
        assert_eq!(data, vec![0, 1]);
    }

    #[test]
    fn test_bytes_limited_buffer() {
        let mut buffer = ChunkBuffer::new(Capacity::Bytes(8), TextCodec);

        buffer.push(Record::new(123).unwrap()); // "123\n"
        assert_eq!(buffer.size(), 4);
        assert_eq!(buffer.is_full(), false);

        buffer.push(Record::new(45).unwrap()); // "45\n"
        assert_eq!(buffer.size(), 7);
        assert_eq!(buffer.is_full(), false);

        buffer.push(Record::new(67890).unwrap()); // "67890\n"
        assert_eq!(buffer.size(), 13);
        assert_eq!(buffer.is_full(), true);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn test_bytes_limited_buffer_uses_codec_size() {
        let mut buffer = ChunkBuffer::new(Capacity::Bytes(6), RmpCodec);

        buffer.push(Record::new(1).unwrap());
        buffer.push(Record::new(100_000).unwrap());
        assert_eq!(buffer.size(), 6);
        assert_eq!(buffer.is_full(), true);
    }
}
