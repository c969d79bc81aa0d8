//! `int-ext-sort` is an external sort of newline-delimited integer records.
//!
//! External sorting is a class of sorting algorithms that can handle massive amounts of data. External sorting
//! is required when the data being sorted do not fit into the main memory (RAM) of a computer and instead must be
//! resided in slower external memory, usually a hard disk drive. For more information see
//! [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! Sorting runs in three strictly sequential stages:
//!
//! * **Partition:**
//!   the input stream is split into chunks bounded by a record count or an encoded byte size, each chunk is
//!   written to its own file in a per-run temporary directory.
//! * **Sort:**
//!   every chunk is sorted and atomically replaced in place. Chunks are sorted in parallel on a thread pool.
//!   A chunk larger than the in-memory batch limit is sorted in batches which are merged back into it.
//! * **Merge:**
//!   sorted chunks are merged by a k-way binary heap merge. When there are more chunks than the merge fan-in
//!   allows, they are first merged into intermediate chunks in bounded passes (merge tree).
//!
//! Any error aborts the run. Temporary files are removed as soon as the sorted stream is dropped.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use int_ext_sort::{Capacity, ExternalSorter, ExternalSorterBuilder};
//!
//! fn main() {
//!     let sorter: ExternalSorter = ExternalSorterBuilder::new()
//!         .with_tmp_dir(Path::new("./"))
//!         .with_capacity(Capacity::Records(1_000_000))
//!         .with_fan_in(64)
//!         .build()
//!         .unwrap();
//!
//!     sorter
//!         .sort_file(Path::new("unsorted_numbers.txt"), Path::new("sorted_numbers.txt"))
//!         .unwrap();
//! }
//! ```

pub mod buffer;
pub mod chunk;
pub mod chunk_sort;
pub mod codec;
pub mod merger;
pub mod partition;
pub mod record;
pub mod sort;

pub use buffer::{Capacity, ChunkBuffer};
pub use chunk::{Chunk, ChunkError, ChunkStore};
pub use codec::{RecordCodec, RmpCodec, TextCodec};
pub use merger::{BinaryHeapMerger, MergeTree};
pub use record::{InputError, ParseError, Record, RecordReader};
pub use sort::{ExternalSorter, ExternalSorterBuilder, SortError, SortSummary, SortedStream, Stage};
