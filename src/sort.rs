//! External sorter.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::{Debug, Display};
use std::fs;
use std::io::{self, prelude::*};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use crate::buffer::Capacity;
use crate::chunk::{ChunkError, ChunkStore};
use crate::chunk_sort::ChunkSorter;
use crate::codec::{RecordCodec, TextCodec};
use crate::merger::{ChunkMerger, MergeTree};
use crate::partition::Partitioner;
use crate::record::{InputError, Record, RecordReader};

/// Default chunk capacity: 100 MiB worth of 4-byte integers.
pub const DEFAULT_CHUNK_RECORDS: usize = 100 * 1024 * 1024 / 4;
/// Default maximum number of chunks merged at once.
pub const DEFAULT_FAN_IN: usize = 256;

/// Pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Partition,
    Sort,
    Merge,
}

impl Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Partition => write!(f, "partition"),
            Stage::Sort => write!(f, "sort"),
            Stage::Merge => write!(f, "merge"),
        }
    }
}

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Invalid sorter configuration.
    Config(String),
    /// Temporary directory or file creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Input data stream error.
    Input(InputError),
    /// Chunk operation error.
    Chunk {
        stage: Stage,
        index: usize,
        source: ChunkError,
    },
    /// Output stream error.
    Output(io::Error),
    /// Record count changed within a stage. `index` names the chunk when the count is per chunk.
    Consistency {
        stage: Stage,
        index: Option<usize>,
        expected: u64,
        actual: u64,
    },
}

impl SortError {
    pub(crate) fn chunk(stage: Stage, index: usize, source: ChunkError) -> Self {
        SortError::Chunk { stage, index, source }
    }
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::TempDir(err) => Some(err),
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::Input(err) => Some(err),
            SortError::Chunk { source, .. } => Some(source),
            SortError::Output(err) => Some(err),
            SortError::Config(_) | SortError::Consistency { .. } => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::Config(reason) => write!(f, "invalid configuration: {}", reason),
            SortError::TempDir(err) => write!(f, "temporary directory or file not created: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::Input(err) => write!(f, "{}", err),
            SortError::Chunk { stage, index, source } => {
                write!(f, "{} stage failed on chunk {}: {}", stage, index, source)
            }
            SortError::Output(err) => write!(f, "output write failed: {}", err),
            SortError::Consistency {
                stage,
                index: Some(index),
                expected,
                actual,
            } => write!(
                f,
                "internal consistency error in {} stage on chunk {}: expected {} records, got {}",
                stage, index, expected, actual
            ),
            SortError::Consistency {
                stage,
                index: None,
                expected,
                actual,
            } => write!(
                f,
                "internal consistency error in {} stage: expected {} records, got {}",
                stage, expected, actual
            ),
        }
    }
}

/// Outcome of a completed sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSummary {
    /// Number of records written to the output.
    pub records: u64,
    /// Number of chunks the input was split into.
    pub chunks: usize,
    /// Number of merge passes including the final one.
    pub merge_passes: usize,
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder<C = TextCodec>
where
    C: RecordCodec,
{
    /// Chunk size budget.
    capacity: Capacity,
    /// Maximum number of records held in memory by a chunk sort.
    batch_limit: Option<usize>,
    /// Maximum number of chunks merged at once.
    fan_in: usize,
    /// Number of threads to be used to sort chunks in parallel.
    threads_number: Option<usize>,
    /// Directory to be used to store temporary data.
    tmp_dir: Option<PathBuf>,
    /// Chunk file read/write buffer size.
    rw_buf_size: Option<usize>,

    /// Chunk codec type.
    codec_type: PhantomData<C>,
}

impl<C: RecordCodec> ExternalSorterBuilder<C> {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter<C>, SortError> {
        if self.capacity.is_zero() {
            return Err(SortError::Config("chunk capacity must be positive".into()));
        }
        if self.fan_in < 2 {
            return Err(SortError::Config(format!("merge fan-in must be at least 2, got {}", self.fan_in)));
        }

        let batch_limit = match (self.batch_limit, self.capacity) {
            (Some(0), _) => return Err(SortError::Config("batch limit must be positive".into())),
            (Some(batch_limit), Capacity::Records(capacity)) if batch_limit < capacity => {
                log::warn!(
                    "batch limit ({}) is below chunk capacity ({}), chunks will be sorted in batches and merged",
                    batch_limit,
                    capacity
                );
                batch_limit
            }
            (Some(batch_limit), _) => batch_limit,
            (None, Capacity::Records(capacity)) => capacity,
            (None, Capacity::Bytes(_)) => usize::MAX,
        };

        ExternalSorter::new(
            self.capacity,
            batch_limit,
            self.fan_in,
            self.threads_number,
            self.tmp_dir,
            self.rw_buf_size,
        )
    }

    /// Sets chunk size budget.
    pub fn with_capacity(mut self, capacity: Capacity) -> ExternalSorterBuilder<C> {
        self.capacity = capacity;
        return self;
    }

    /// Sets maximum number of records a chunk sort holds in memory.
    pub fn with_batch_limit(mut self, batch_limit: usize) -> ExternalSorterBuilder<C> {
        self.batch_limit = Some(batch_limit);
        return self;
    }

    /// Sets maximum number of chunks merged at once.
    ///
    /// Chunk sorts running in parallel share this bound: each of them merges at most
    /// `fan_in / threads` runs at once, but never less than 2.
    pub fn with_fan_in(mut self, fan_in: usize) -> ExternalSorterBuilder<C> {
        self.fan_in = fan_in;
        return self;
    }

    /// Sets number of threads to be used to sort chunks in parallel.
    /// The merge fan-in of a chunk sort is divided between the threads.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder<C> {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder<C> {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets chunk read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder<C> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }
}

impl<C: RecordCodec> Default for ExternalSorterBuilder<C> {
    fn default() -> Self {
        ExternalSorterBuilder {
            capacity: Capacity::Records(DEFAULT_CHUNK_RECORDS),
            batch_limit: None,
            fan_in: DEFAULT_FAN_IN,
            threads_number: None,
            tmp_dir: None,
            rw_buf_size: None,
            codec_type: PhantomData,
        }
    }
}

/// External sorter.
pub struct ExternalSorter<C = TextCodec>
where
    C: RecordCodec,
{
    /// Sorting thread pool.
    thread_pool: rayon::ThreadPool,
    /// Chunk size budget.
    capacity: Capacity,
    /// Maximum number of records held in memory by a chunk sort.
    batch_limit: usize,
    /// Maximum number of chunks merged at once.
    fan_in: usize,
    /// Directory the per-run temporary directories are created in.
    tmp_dir: Option<PathBuf>,
    /// Chunk file read/write buffer size.
    rw_buf_size: Option<usize>,

    /// Chunk codec type.
    codec_type: PhantomData<C>,
}

impl<C: RecordCodec> ExternalSorter<C> {
    /// Creates a new external sorter instance.
    ///
    /// # Arguments
    /// * `capacity` - Chunk size budget.
    /// * `batch_limit` - Maximum number of records a chunk sort holds in memory.
    /// * `fan_in` - Maximum number of chunks merged at once.
    /// * `threads_number` - Number of threads to be used to sort chunks in parallel. If the parameter is [`None`]
    ///   threads number will be selected based on available CPU core number.
    /// * `tmp_path` - Directory to be used to store temporary data. If parameter is [`None`] default OS temporary
    ///   directory will be used.
    /// * `rw_buf_size` - Chunks file read/write buffer size.
    pub fn new(
        capacity: Capacity,
        batch_limit: usize,
        fan_in: usize,
        threads_number: Option<usize>,
        tmp_path: Option<PathBuf>,
        rw_buf_size: Option<usize>,
    ) -> Result<Self, SortError> {
        return Ok(ExternalSorter {
            capacity,
            batch_limit,
            fan_in,
            rw_buf_size,
            tmp_dir: tmp_path,
            thread_pool: Self::init_thread_pool(threads_number)?,
            codec_type: PhantomData,
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    /// Sorts data from the input.
    /// Returns an iterator over the sorted records. Intermediate chunks are removed when
    /// the iterator is dropped.
    ///
    /// # Arguments
    /// * `input` - Input stream data to be fetched from
    pub fn sort_stream<I>(&self, input: I) -> Result<SortedStream<C>, SortError>
    where
        I: IntoIterator<Item = Result<Record, InputError>>,
    {
        let store = ChunkStore::new(self.tmp_dir.as_deref(), C::default(), self.rw_buf_size)?;

        let chunks = Partitioner::new(&store, self.capacity).split(input)?;
        let chunk_count = chunks.len();
        let expected: u64 = chunks.iter().map(|chunk| chunk.len()).sum();

        let sort_fan_in = chunk_sort_fan_in(self.fan_in, self.thread_pool.current_num_threads());
        let chunks = ChunkSorter::new(&store, self.batch_limit, sort_fan_in).sort_all(chunks, &self.thread_pool)?;

        let tree = MergeTree::new(&store, self.fan_in, Stage::Merge);
        let (chunks, passes) = tree.reduce(chunks)?;
        let merger = tree.open(&chunks)?;
        let merge_passes = if chunk_count > 0 { passes + 1 } else { 0 };

        log::debug!("external sort preparation done");

        return Ok(SortedStream {
            merger,
            _store: store,
            chunks: chunk_count,
            merge_passes,
            expected,
            emitted: 0,
            checked: false,
        });
    }

    /// Sorts data from the input writing the records to the output one per line.
    pub fn sort<I, W>(&self, input: I, output: W) -> Result<SortSummary, SortError>
    where
        I: IntoIterator<Item = Result<Record, InputError>>,
        W: Write,
    {
        let stream = self.sort_stream(input)?;

        return self.write_stream(stream, output);
    }

    /// Sorts the input file into the output file.
    /// The output is written to a temporary file next to the destination and moved into place only when
    /// the whole run succeeds, so an existing output file is never left partially written.
    pub fn sort_file(&self, input: &Path, output: &Path) -> Result<SortSummary, SortError> {
        log::info!("sorting {} into {}", input.display(), output.display());

        let input_file = fs::File::open(input).map_err(|err| SortError::Input(InputError::IO(err)))?;
        let records = RecordReader::new(io::BufReader::new(input_file));
        let stream = self.sort_stream(records)?;

        let output_dir = match output.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut output_file = tempfile::NamedTempFile::new_in(output_dir).map_err(SortError::Output)?;

        let summary = self.write_stream(stream, &mut output_file)?;
        output_file.as_file().sync_all().map_err(SortError::Output)?;
        output_file.persist(output).map_err(|err| SortError::Output(err.error))?;

        log::info!(
            "{} records sorted ({} chunks, {} merge passes)",
            summary.records,
            summary.chunks,
            summary.merge_passes
        );

        return Ok(summary);
    }

    fn write_stream<W: Write>(&self, stream: SortedStream<C>, output: W) -> Result<SortSummary, SortError> {
        let mut summary = SortSummary {
            records: 0,
            chunks: stream.chunks(),
            merge_passes: stream.merge_passes(),
        };

        let mut output_writer = match self.rw_buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, output),
            None => io::BufWriter::new(output),
        };
        for record in stream {
            TextCodec
                .write(&mut output_writer, record?)
                .map_err(|err| match err {
                    ChunkError::IO(err) => SortError::Output(err),
                    err => SortError::Output(io::Error::new(io::ErrorKind::Other, err.to_string())),
                })?;
            summary.records += 1;
        }
        output_writer.flush().map_err(SortError::Output)?;

        return Ok(summary);
    }
}

/// Fan-in of a single chunk sort, so that chunk sorts running on all the threads together
/// keep about `fan_in` runs open.
fn chunk_sort_fan_in(fan_in: usize, threads: usize) -> usize {
    (fan_in / threads.max(1)).max(2)
}

/// Sorted record stream produced by [`ExternalSorter::sort_stream`].
/// Owns the temporary directory of the run, which is deleted when the stream is dropped.
pub struct SortedStream<C: RecordCodec> {
    merger: ChunkMerger<C>,
    _store: ChunkStore<C>,
    chunks: usize,
    merge_passes: usize,
    expected: u64,
    emitted: u64,
    checked: bool,
}

impl<C: RecordCodec> SortedStream<C> {
    /// Number of chunks the input was split into.
    pub fn chunks(&self) -> usize {
        self.chunks
    }

    /// Number of merge passes including the final streaming one.
    pub fn merge_passes(&self) -> usize {
        self.merge_passes
    }

    /// Total number of records the stream yields.
    pub fn len(&self) -> u64 {
        self.expected
    }

    pub fn is_empty(&self) -> bool {
        self.expected == 0
    }
}

impl<C: RecordCodec> Iterator for SortedStream<C> {
    type Item = Result<Record, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.merger.next() {
            Some(Ok(record)) => {
                self.emitted += 1;
                Some(Ok(record))
            }
            Some(Err(err)) => {
                self.checked = true;
                Some(Err(err))
            }
            None if !self.checked => {
                self.checked = true;
                (self.emitted != self.expected).then(|| {
                    Err(SortError::Consistency {
                        stage: Stage::Merge,
                        index: None,
                        expected: self.expected,
                        actual: self.emitted,
                    })
                })
            }
            None => None,
        }
    }
}

impl<C: RecordCodec> Debug for SortedStream<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SortedStream")
            .field("chunks", &self.chunks)
            .field("merge_passes", &self.merge_passes)
            .field("expected", &self.expected)
            .field("emitted", &self.emitted)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::io::{self, prelude::*};
    use std::path::Path;

    use rand::seq::SliceRandom;
    use rstest::*;

    use super::{chunk_sort_fan_in, ExternalSorter, ExternalSorterBuilder, SortError, SortSummary, Stage};
    use crate::buffer::Capacity;
    use crate::codec::{RecordCodec, RmpCodec};
    use crate::record::{InputError, Record};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn input(values: &[u32]) -> Vec<Result<Record, InputError>> {
        values.iter().map(|value| Ok(Record::new(*value).unwrap())).collect()
    }

    fn sorter<C: RecordCodec>(tmp_dir: &Path, capacity: usize, batch_limit: usize, fan_in: usize) -> ExternalSorter<C> {
        ExternalSorterBuilder::new()
            .with_capacity(Capacity::Records(capacity))
            .with_batch_limit(batch_limit)
            .with_fan_in(fan_in)
            .with_threads_number(2)
            .with_tmp_dir(tmp_dir)
            .build()
            .unwrap()
    }

    fn sort_values<C: RecordCodec>(sorter: &ExternalSorter<C>, values: &[u32]) -> Vec<u32> {
        let stream = sorter.sort_stream(input(values)).unwrap();
        let sorted: Result<Vec<Record>, _> = stream.collect();
        sorted.unwrap().into_iter().map(Record::value).collect()
    }

    #[rstest]
    #[case(vec![5, 3, 8, 1, 9, 2, 7], 3, vec![1, 2, 3, 5, 7, 8, 9])]
    #[case(vec![4, 4, 1, 4], 2, vec![1, 4, 4, 4])]
    #[case(vec![42], 3, vec![42])]
    #[case(vec![], 3, vec![])]
    fn test_external_sorter_scenarios(
        tmp_dir: tempfile::TempDir,
        #[case] values: Vec<u32>,
        #[case] capacity: usize,
        #[case] expected: Vec<u32>,
    ) {
        let sorter: ExternalSorter = sorter(tmp_dir.path(), capacity, capacity, 16);
        assert_eq!(sort_values(&sorter, &values), expected);
    }

    #[rstest]
    #[case(8, 8, 64)]
    #[case(8, 8, 2)]
    #[case(8, 3, 2)]
    #[case(25, 4, 3)]
    #[case(1000, 1000, 2)]
    fn test_external_sorter(
        tmp_dir: tempfile::TempDir,
        #[case] capacity: usize,
        #[case] batch_limit: usize,
        #[case] fan_in: usize,
    ) {
        let mut values = Vec::from_iter((0..300).map(|value| (value * 7919) % 101));
        values.shuffle(&mut rand::thread_rng());

        let sorter: ExternalSorter = sorter(tmp_dir.path(), capacity, batch_limit, fan_in);
        let actual = sort_values(&sorter, &values);

        values.sort();
        assert_eq!(actual, values);

        // already sorted input stays as it is
        assert_eq!(sort_values(&sorter, &actual), actual);
    }

    #[rstest]
    fn test_external_sorter_rmp_codec(tmp_dir: tempfile::TempDir) {
        let mut values = Vec::from_iter((0..500).map(|value| value * 4_000_000 % 2_147_483_647));
        values.shuffle(&mut rand::thread_rng());

        let sorter: ExternalSorter<RmpCodec> = sorter(tmp_dir.path(), 16, 16, 4);
        let actual = sort_values(&sorter, &values);

        values.sort();
        assert_eq!(actual, values);
    }

    #[rstest]
    fn test_byte_capacity(tmp_dir: tempfile::TempDir) {
        let sorter: ExternalSorter = ExternalSorterBuilder::new()
            .with_capacity(Capacity::Bytes(32))
            .with_fan_in(3)
            .with_tmp_dir(tmp_dir.path())
            .build()
            .unwrap();

        let mut values = Vec::from_iter(0..200);
        values.shuffle(&mut rand::thread_rng());

        let stream = sorter.sort_stream(input(&values)).unwrap();
        assert!(stream.chunks() > 3);
        assert!(stream.merge_passes() > 1);
        assert_eq!(stream.len(), 200);

        let sorted: Vec<u32> = stream.map(|record| record.unwrap().value()).collect();
        assert_eq!(sorted, Vec::from_iter(0..200));
    }

    #[rstest]
    fn test_summary(tmp_dir: tempfile::TempDir) {
        let sorter: ExternalSorter = sorter(tmp_dir.path(), 3, 3, 2);
        let mut output = Vec::new();

        let summary = sorter.sort(input(&[5, 3, 8, 1, 9, 2, 7]), &mut output).unwrap();

        assert_eq!(String::from_utf8(output).unwrap(), "1\n2\n3\n5\n7\n8\n9\n");
        assert_eq!(
            summary,
            SortSummary {
                records: 7,
                chunks: 3,
                merge_passes: 2,
            }
        );
    }

    #[rstest]
    fn test_intermediates_removed(tmp_dir: tempfile::TempDir) {
        let sorter: ExternalSorter = sorter(tmp_dir.path(), 4, 4, 2);

        let stream = sorter.sort_stream(input(&[9, 8, 7, 6, 5, 4, 3, 2, 1, 0])).unwrap();
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 1);

        drop(stream);
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 0);

        let mut output = Vec::new();
        sorter.sort(input(&[3, 2, 1]), &mut output).unwrap();
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 0);
    }

    #[rstest]
    fn test_sort_file(tmp_dir: tempfile::TempDir) {
        let input_path = tmp_dir.path().join("unsorted_numbers.txt");
        let output_path = tmp_dir.path().join("sorted_numbers.txt");
        let work_dir = tempfile::tempdir().unwrap();

        let mut values = Vec::from_iter(0..1000u32);
        values.shuffle(&mut rand::thread_rng());
        let content: String = values.iter().map(|value| format!("{}\n", value)).collect();
        fs::write(&input_path, content).unwrap();

        let sorter: ExternalSorter = sorter(work_dir.path(), 64, 64, 4);
        let summary = sorter.sort_file(&input_path, &output_path).unwrap();

        let expected: String = (0..1000).map(|value| format!("{}\n", value)).collect();
        assert_eq!(fs::read_to_string(&output_path).unwrap(), expected);
        assert_eq!(summary.records, 1000);
        assert_eq!(summary.chunks, 16);
        assert_eq!(fs::read_dir(work_dir.path()).unwrap().count(), 0);
    }

    #[rstest]
    fn test_sort_file_parse_error(tmp_dir: tempfile::TempDir) {
        let input_path = tmp_dir.path().join("unsorted_numbers.txt");
        let output_path = tmp_dir.path().join("sorted_numbers.txt");
        fs::write(&input_path, "5\n3\nfive\n1\n").unwrap();

        let sorter: ExternalSorter = sorter(tmp_dir.path(), 2, 2, 4);
        let result = sorter.sort_file(&input_path, &output_path);

        match result {
            Err(SortError::Input(InputError::Parse(err))) => {
                assert_eq!(err.line, 3);
                assert_eq!(err.offset, 4);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(!output_path.exists());
        // only the input file is left
        assert_eq!(fs::read_dir(tmp_dir.path()).unwrap().count(), 1);
    }

    #[rstest]
    fn test_sort_file_keeps_previous_output_on_error(tmp_dir: tempfile::TempDir) {
        let input_path = tmp_dir.path().join("unsorted_numbers.txt");
        let output_path = tmp_dir.path().join("sorted_numbers.txt");
        fs::write(&input_path, "5\n-3\n").unwrap();
        fs::write(&output_path, "1\n2\n").unwrap();

        let sorter: ExternalSorter = sorter(tmp_dir.path(), 2, 2, 4);
        assert!(sorter.sort_file(&input_path, &output_path).is_err());
        assert_eq!(fs::read_to_string(&output_path).unwrap(), "1\n2\n");
    }

    #[rstest]
    fn test_missing_input_file(tmp_dir: tempfile::TempDir) {
        let sorter: ExternalSorter = sorter(tmp_dir.path(), 2, 2, 4);
        let result = sorter.sort_file(&tmp_dir.path().join("missing.txt"), &tmp_dir.path().join("out.txt"));

        assert!(matches!(result, Err(SortError::Input(InputError::IO(_)))));
    }

    #[rstest]
    #[case(Capacity::Records(0), None, 2)]
    #[case(Capacity::Bytes(0), None, 2)]
    #[case(Capacity::Records(10), Some(0), 2)]
    #[case(Capacity::Records(10), None, 1)]
    fn test_invalid_config(#[case] capacity: Capacity, #[case] batch_limit: Option<usize>, #[case] fan_in: usize) {
        let mut builder = ExternalSorterBuilder::<RmpCodec>::new()
            .with_capacity(capacity)
            .with_fan_in(fan_in);
        if let Some(batch_limit) = batch_limit {
            builder = builder.with_batch_limit(batch_limit);
        }

        assert!(matches!(builder.build(), Err(SortError::Config(_))));
    }

    #[test]
    fn test_output_error() {
        struct BrokenWriter;

        impl io::Write for BrokenWriter {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::Other, "test error"))
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let sorter: ExternalSorter = ExternalSorterBuilder::new()
            .with_capacity(Capacity::Records(2))
            .with_rw_buf_size(1)
            .build()
            .unwrap();

        let result = sorter.sort(input(&[3, 1, 2]), BrokenWriter);
        assert!(matches!(result, Err(SortError::Output(_))));
    }

    #[rstest]
    fn test_stream_count_mismatch_detected(tmp_dir: tempfile::TempDir) {
        let sorter: ExternalSorter = sorter(tmp_dir.path(), 4, 4, 4);
        let stream = sorter.sort_stream(input(&[2, 1])).unwrap();
        assert_eq!(stream.len(), 2);

        fs::OpenOptions::new()
            .append(true)
            .open(stream._store.path().join("chunk_000000.txt"))
            .unwrap()
            .write_all(b"3\n")
            .unwrap();

        let mut items: Vec<_> = stream.collect();
        assert!(matches!(
            items.pop(),
            Some(Err(SortError::Consistency {
                stage: Stage::Merge,
                index: None,
                expected: 2,
                actual: 3,
            }))
        ));
        let values: Vec<u32> = items.into_iter().map(|item| item.unwrap().value()).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[rstest]
    #[case(256, 1, 256)]
    #[case(256, 8, 32)]
    #[case(10, 3, 3)]
    #[case(4, 8, 2)]
    #[case(2, 0, 2)]
    fn test_chunk_sort_fan_in(#[case] fan_in: usize, #[case] threads: usize, #[case] expected: usize) {
        assert_eq!(chunk_sort_fan_in(fan_in, threads), expected);
    }
}
