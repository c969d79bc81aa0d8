//! Integer records and the newline-delimited text stream they are read from.

use std::error::Error;
use std::fmt::{self, Display};
use std::io::{self, prelude::*};
use std::num::ParseIntError;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Longest input line accepted, line terminator included.
pub const MAX_LINE_LEN: u64 = 32;

/// A single sortable value: a non-negative integer in `[0, 2^31 - 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u32", try_from = "u32")]
pub struct Record(u32);

impl Record {
    pub const MIN: Record = Record(0);
    pub const MAX: Record = Record(i32::MAX as u32);

    /// Creates a record checking the value range.
    pub fn new(value: u32) -> Result<Self, InvalidRecord> {
        if value > Self::MAX.0 {
            return Err(InvalidRecord::OutOfRange(value));
        }
        return Ok(Record(value));
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// Parses one record from its decimal text encoding (without the line terminator).
    pub fn parse(bytes: &[u8]) -> Result<Self, InvalidRecord> {
        if bytes.is_empty() {
            return Err(InvalidRecord::Empty);
        }
        let text = std::str::from_utf8(bytes).map_err(|_| InvalidRecord::Encoding)?;
        let value = text.parse::<u32>().map_err(InvalidRecord::Syntax)?;

        return Record::new(value);
    }
}

impl TryFrom<u32> for Record {
    type Error = InvalidRecord;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Record::new(value)
    }
}

impl From<Record> for u32 {
    fn from(record: Record) -> Self {
        record.0
    }
}

impl FromStr for Record {
    type Err = InvalidRecord;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Record::parse(s.as_bytes())
    }
}

impl Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reason a piece of text is not a valid record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidRecord {
    /// Empty line.
    Empty,
    /// Line is not valid UTF-8.
    Encoding,
    /// Line is not a decimal number.
    Syntax(ParseIntError),
    /// Number is above [`Record::MAX`].
    OutOfRange(u32),
    /// Line is longer than [`MAX_LINE_LEN`] bytes.
    TooLong,
}

impl Error for InvalidRecord {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            InvalidRecord::Syntax(err) => Some(err),
            _ => None,
        }
    }
}

impl Display for InvalidRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            InvalidRecord::Empty => write!(f, "empty record"),
            InvalidRecord::Encoding => write!(f, "record is not valid UTF-8"),
            InvalidRecord::Syntax(err) => write!(f, "record is not a number: {}", err),
            InvalidRecord::OutOfRange(value) => {
                write!(f, "record {} exceeds the maximum value {}", value, Record::MAX)
            }
            InvalidRecord::TooLong => write!(f, "line is longer than {} bytes", MAX_LINE_LEN),
        }
    }
}

/// Malformed line of the input stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// 1-based line number.
    pub line: u64,
    /// Byte offset of the line start.
    pub offset: u64,
    pub reason: InvalidRecord,
}

impl Error for ParseError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.reason)
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {} (byte offset {}): {}", self.line, self.offset, self.reason)
    }
}

/// Input stream error.
#[derive(Debug)]
pub enum InputError {
    /// Input read failure.
    IO(io::Error),
    /// Malformed record encoding.
    Parse(ParseError),
}

impl Error for InputError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(match &self {
            InputError::IO(err) => err,
            InputError::Parse(err) => err,
        })
    }
}

impl Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            InputError::IO(err) => write!(f, "input read failed: {}", err),
            InputError::Parse(err) => write!(f, "malformed input record at {}", err),
        }
    }
}

/// Strips a trailing `\n` or `\r\n`.
pub(crate) fn trim_line_ending(mut line: &[u8]) -> &[u8] {
    if let [rest @ .., b'\n'] = line {
        line = rest;
    }
    if let [rest @ .., b'\r'] = line {
        line = rest;
    }
    line
}

/// Reads newline-delimited decimal records from a buffered reader.
/// At most [`MAX_LINE_LEN`] bytes are buffered per line.
pub struct RecordReader<R> {
    reader: R,
    line: Vec<u8>,
    line_number: u64,
    offset: u64,
    failed: bool,
}

impl<R: BufRead> RecordReader<R> {
    pub fn new(reader: R) -> Self {
        RecordReader {
            reader,
            line: Vec::new(),
            line_number: 0,
            offset: 0,
            failed: false,
        }
    }
}

impl<R: BufRead> Iterator for RecordReader<R> {
    type Item = Result<Record, InputError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        self.line.clear();
        let read = match (&mut self.reader).take(MAX_LINE_LEN).read_until(b'\n', &mut self.line) {
            Ok(0) => return None,
            Ok(read) => read,
            Err(err) => {
                self.failed = true;
                return Some(Err(InputError::IO(err)));
            }
        };

        self.line_number += 1;
        let line_start = self.offset;
        self.offset += read as u64;

        let parsed = if read as u64 == MAX_LINE_LEN && self.line.last() != Some(&b'\n') {
            Err(InvalidRecord::TooLong)
        } else {
            Record::parse(trim_line_ending(&self.line))
        };

        match parsed {
            Ok(record) => Some(Ok(record)),
            Err(reason) => {
                self.failed = true;
                Some(Err(InputError::Parse(ParseError {
                    line: self.line_number,
                    offset: line_start,
                    reason,
                })))
            }
        }
    }
}
