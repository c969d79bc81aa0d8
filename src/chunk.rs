//! External chunks: bounded on-disk record containers and the store owning them.

use std::error::Error;
use std::fmt::{self, Display};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use log;
use tempfile;

use crate::codec::{DecodeError, RecordCodec};
use crate::record::Record;
use crate::sort::{SortError, Stage};

/// Chunk operation error.
#[derive(Debug)]
pub enum ChunkError {
    /// Chunk file I/O error.
    IO(io::Error),
    /// Record serialization error.
    Encode(rmp_serde::encode::Error),
    /// Chunk content is not a valid record encoding.
    Malformed { position: u64, reason: String },
    /// Chunk expected to be sorted is not.
    Unsorted {
        position: u64,
        previous: Record,
        current: Record,
    },
    /// Atomic replacement of the chunk file failed.
    Replace(io::Error),
}

impl Error for ChunkError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            ChunkError::IO(err) => Some(err),
            ChunkError::Encode(err) => Some(err),
            ChunkError::Replace(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for ChunkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            ChunkError::IO(err) => write!(f, "I/O operation failed: {}", err),
            ChunkError::Encode(err) => write!(f, "record serialization error: {}", err),
            ChunkError::Malformed { position, reason } => {
                write!(f, "malformed record at position {}: {}", position, reason)
            }
            ChunkError::Unsorted {
                position,
                previous,
                current,
            } => write!(
                f,
                "chunk is not sorted at position {}: {} follows {}",
                position, current, previous
            ),
            ChunkError::Replace(err) => write!(f, "chunk file replacement failed: {}", err),
        }
    }
}

/// Handle of a sealed chunk.
#[derive(Debug)]
pub struct Chunk {
    index: usize,
    path: PathBuf,
    len: u64,
    size: u64,
}

impl Chunk {
    /// Chunk identity, monotonically increasing within a store.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the number of records in the chunk.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the encoded chunk size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Deletes the chunk file.
    pub fn remove(self, stage: Stage) -> Result<(), SortError> {
        fs::remove_file(&self.path).map_err(|err| SortError::chunk(stage, self.index, ChunkError::IO(err)))
    }
}

/// Temporary directory holding the chunks of a single sorting run.
/// Every chunk file left in it is deleted when the store is dropped.
pub struct ChunkStore<C> {
    dir: tempfile::TempDir,
    codec: C,
    rw_buf_size: Option<usize>,
    next_index: AtomicUsize,
}

impl<C: RecordCodec> ChunkStore<C> {
    /// Creates a store in a fresh temporary directory.
    ///
    /// # Arguments
    /// * `tmp_path` - Directory the store is created in. If the parameter is [`None`] default OS temporary
    ///   directory will be used.
    /// * `codec` - Chunk record encoding
    /// * `rw_buf_size` - Chunk file read/write buffer size
    pub fn new(tmp_path: Option<&Path>, codec: C, rw_buf_size: Option<usize>) -> Result<Self, SortError> {
        let dir = if let Some(tmp_path) = tmp_path {
            tempfile::tempdir_in(tmp_path)
        } else {
            tempfile::tempdir()
        }
        .map_err(SortError::TempDir)?;

        log::info!("using {} as a temporary directory", dir.path().display());

        return Ok(ChunkStore {
            dir,
            codec,
            rw_buf_size,
            next_index: AtomicUsize::new(0),
        });
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn codec(&self) -> C {
        self.codec
    }

    /// Starts a new chunk with the next free index.
    pub fn create(&self, stage: Stage) -> Result<ChunkWriter<C>, SortError> {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        let target = self.dir.path().join(format!("chunk_{:06}.{}", index, C::EXTENSION));

        self.writer(index, target, stage)
    }

    /// Starts a replacement of the chunk content. The chunk keeps its index and path,
    /// the original content stays in place until [`ChunkWriter::finish`] succeeds.
    pub fn replace(&self, chunk: &Chunk, stage: Stage) -> Result<ChunkWriter<C>, SortError> {
        self.writer(chunk.index, chunk.path.clone(), stage)
    }

    fn writer(&self, index: usize, target: PathBuf, stage: Stage) -> Result<ChunkWriter<C>, SortError> {
        let tmp_file = tempfile::NamedTempFile::new_in(self.dir.path())
            .map_err(|err| SortError::chunk(stage, index, ChunkError::IO(err)))?;

        let writer = match self.rw_buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, tmp_file),
            None => io::BufWriter::new(tmp_file),
        };

        return Ok(ChunkWriter {
            index,
            stage,
            target,
            codec: self.codec,
            writer,
            len: 0,
            size: 0,
        });
    }

    /// Opens a sequential reader over the chunk.
    ///
    /// # Arguments
    /// * `chunk` - Chunk to be read
    /// * `stage` - Pipeline stage reported on errors
    /// * `verify_order` - Report records breaking the ascending order as [`ChunkError::Unsorted`]
    pub fn open(&self, chunk: &Chunk, stage: Stage, verify_order: bool) -> Result<ChunkReader<C>, SortError> {
        let file =
            fs::File::open(&chunk.path).map_err(|err| SortError::chunk(stage, chunk.index, ChunkError::IO(err)))?;

        let reader = match self.rw_buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        };

        return Ok(ChunkReader {
            index: chunk.index,
            stage,
            codec: self.codec,
            reader,
            scratch: Vec::new(),
            position: 0,
            previous: None,
            verify_order,
            done: false,
        });
    }
}

/// Writes records to a temporary file which atomically takes the chunk place on [`ChunkWriter::finish`].
/// Dropping an unfinished writer deletes the temporary file.
pub struct ChunkWriter<C> {
    index: usize,
    stage: Stage,
    target: PathBuf,
    codec: C,
    writer: io::BufWriter<tempfile::NamedTempFile>,
    len: u64,
    size: u64,
}

impl<C: RecordCodec> ChunkWriter<C> {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Appends a record to the chunk.
    pub fn push(&mut self, record: Record) -> Result<(), SortError> {
        self.codec
            .write(&mut self.writer, record)
            .map_err(|err| SortError::chunk(self.stage, self.index, err))?;

        self.len += 1;
        self.size += self.codec.encoded_len(record) as u64;

        return Ok(());
    }

    /// Appends all the records to the chunk.
    pub fn extend(&mut self, records: impl IntoIterator<Item = Record>) -> Result<(), SortError> {
        for record in records.into_iter() {
            self.push(record)?;
        }

        return Ok(());
    }

    /// Flushes the records and moves the file to the chunk path.
    pub fn finish(self) -> Result<Chunk, SortError> {
        let (stage, index) = (self.stage, self.index);

        let tmp_file = self
            .writer
            .into_inner()
            .map_err(|err| SortError::chunk(stage, index, ChunkError::IO(err.into_error())))?;
        tmp_file
            .as_file()
            .sync_all()
            .map_err(|err| SortError::chunk(stage, index, ChunkError::IO(err)))?;
        tmp_file
            .persist(&self.target)
            .map_err(|err| SortError::chunk(stage, index, ChunkError::Replace(err.error)))?;

        log::debug!("chunk {} saved ({} records, {} bytes)", index, self.len, self.size);

        return Ok(Chunk {
            index,
            path: self.target,
            len: self.len,
            size: self.size,
        });
    }
}

/// Sequential read cursor over one chunk. Fused after the first error.
pub struct ChunkReader<C> {
    index: usize,
    stage: Stage,
    codec: C,
    reader: io::BufReader<fs::File>,
    scratch: Vec<u8>,
    position: u64,
    previous: Option<Record>,
    verify_order: bool,
    done: bool,
}

impl<C> ChunkReader<C> {
    pub fn index(&self) -> usize {
        self.index
    }

    fn fail(&mut self, err: ChunkError) -> Option<Result<Record, SortError>> {
        self.done = true;
        Some(Err(SortError::chunk(self.stage, self.index, err)))
    }
}

impl<C: RecordCodec> Iterator for ChunkReader<C> {
    type Item = Result<Record, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let record = match self.codec.read(&mut self.reader, &mut self.scratch) {
            Ok(Some(record)) => record,
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(DecodeError::IO(err)) => return self.fail(ChunkError::IO(err)),
            Err(DecodeError::Malformed(reason)) => {
                let position = self.position;
                return self.fail(ChunkError::Malformed { position, reason });
            }
        };

        if self.verify_order {
            if let Some(previous) = self.previous.filter(|previous| record < *previous) {
                let position = self.position;
                return self.fail(ChunkError::Unsorted {
                    position,
                    previous,
                    current: record,
                });
            }
            self.previous = Some(record);
        }
        self.position += 1;

        return Some(Ok(record));
    }
}
