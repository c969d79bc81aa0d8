use std::path;
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use int_ext_sort::{Capacity, ExternalSorterBuilder, RecordCodec, RmpCodec, SortError, SortSummary, TextCodec};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let format: ChunkFormat = arg_parser.value_of_t_or_exit("chunk_format");
    let settings = Settings {
        input: arg_parser.value_of("input").expect("value is required").into(),
        output: arg_parser.value_of("output").expect("value is required").into(),
        tmp_dir: arg_parser.value_of("tmp_dir").map(path::PathBuf::from),
        capacity: if arg_parser.is_present("chunk_size") {
            let chunk_size = arg_parser.value_of("chunk_size").expect("value is required");
            Some(Capacity::Bytes(
                chunk_size.parse::<ByteSize>().expect("value is pre-validated").as_u64(),
            ))
        } else if arg_parser.is_present("chunk_records") {
            Some(Capacity::Records(arg_parser.value_of_t_or_exit("chunk_records")))
        } else {
            None
        },
        batch_limit: arg_parser
            .is_present("batch_limit")
            .then(|| arg_parser.value_of_t_or_exit("batch_limit")),
        fan_in: arg_parser
            .is_present("fan_in")
            .then(|| arg_parser.value_of_t_or_exit("fan_in")),
        threads: arg_parser
            .is_present("threads")
            .then(|| arg_parser.value_of_t_or_exit("threads")),
    };

    let result = match format {
        ChunkFormat::Text => run::<TextCodec>(&settings),
        ChunkFormat::Msgpack => run::<RmpCodec>(&settings),
    };

    if let Err(err) = result {
        log::error!("data sorting error: {}", err);
        process::exit(1);
    }
}

struct Settings {
    input: path::PathBuf,
    output: path::PathBuf,
    tmp_dir: Option<path::PathBuf>,
    capacity: Option<Capacity>,
    batch_limit: Option<usize>,
    fan_in: Option<usize>,
    threads: Option<usize>,
}

fn run<C: RecordCodec>(settings: &Settings) -> Result<SortSummary, SortError> {
    let mut sorter_builder = ExternalSorterBuilder::<C>::new();
    if let Some(capacity) = settings.capacity {
        sorter_builder = sorter_builder.with_capacity(capacity);
    }

    if let Some(batch_limit) = settings.batch_limit {
        sorter_builder = sorter_builder.with_batch_limit(batch_limit);
    }

    if let Some(fan_in) = settings.fan_in {
        sorter_builder = sorter_builder.with_fan_in(fan_in);
    }

    if let Some(threads) = settings.threads {
        sorter_builder = sorter_builder.with_threads_number(threads);
    }

    if let Some(tmp_dir) = &settings.tmp_dir {
        sorter_builder = sorter_builder.with_tmp_dir(tmp_dir);
    }

    let sorter = sorter_builder.build()?;

    return sorter.sort_file(&settings.input, &settings.output);
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum ChunkFormat {
    Text,
    Msgpack,
}

impl ChunkFormat {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        ChunkFormat::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for ChunkFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <ChunkFormat as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("int-ext-sort")
        .about("external sorter of newline-delimited integers")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file to be sorted, one integer per line")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("result file")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of threads to use for parallel chunk sorting")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("tmp_dir")
                .short('d')
                .long("tmp-dir")
                .help("directory to be used to store temporary data")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("chunk_records")
                .short('r')
                .long("chunk-records")
                .help("chunk size in records")
                .takes_value(true)
                .conflicts_with("chunk_size"),
        )
        .arg(
            clap::Arg::new("chunk_size")
                .short('c')
                .long("chunk-size")
                .help("chunk size in bytes as stored on disk (e.g. 100MB)")
                .takes_value(true)
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(_) => Ok(()),
                    Err(err) => Err(format!("Chunk size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("batch_limit")
                .short('b')
                .long("batch-limit")
                .help("maximum number of records held in memory by a chunk sort")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("fan_in")
                .short('f')
                .long("fan-in")
                .help("maximum number of chunks merged at once")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("chunk_format")
                .long("chunk-format")
                .help("chunk file encoding")
                .takes_value(true)
                .default_value("text")
                .possible_values(ChunkFormat::possible_values()),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
