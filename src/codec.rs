//! Chunk container encodings.

use std::error::Error;
use std::fmt::{self, Display};
use std::io::{self, prelude::*};

use crate::chunk::ChunkError;
use crate::record::{trim_line_ending, Record};

/// Record decoding error.
#[derive(Debug)]
pub enum DecodeError {
    /// Container read failure.
    IO(io::Error),
    /// Container content is not a valid record encoding.
    Malformed(String),
}

impl Error for DecodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            DecodeError::IO(err) => Some(err),
            DecodeError::Malformed(_) => None,
        }
    }
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            DecodeError::IO(err) => write!(f, "{}", err),
            DecodeError::Malformed(reason) => write!(f, "{}", reason),
        }
    }
}

/// Record encoding used by chunk containers.
pub trait RecordCodec: Copy + Default + Send + Sync + 'static {
    /// Chunk file extension.
    const EXTENSION: &'static str;

    /// Number of bytes the record occupies once encoded.
    fn encoded_len(&self, record: Record) -> usize;

    /// Writes a single record.
    fn write<W: Write>(&self, writer: &mut W, record: Record) -> Result<(), ChunkError>;

    /// Reads the next record, `Ok(None)` at the end of the container.
    fn read<R: BufRead>(&self, reader: &mut R, scratch: &mut Vec<u8>) -> Result<Option<Record>, DecodeError>;
}

/// Newline-delimited decimal text, the same encoding as the input and output streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl RecordCodec for TextCodec {
    const EXTENSION: &'static str = "txt";

    fn encoded_len(&self, record: Record) -> usize {
        let mut value = record.value();
        let mut digits = 1;
        while value >= 10 {
            value /= 10;
            digits += 1;
        }
        digits + 1
    }

    fn write<W: Write>(&self, writer: &mut W, record: Record) -> Result<(), ChunkError> {
        writeln!(writer, "{}", record).map_err(ChunkError::IO)
    }

    fn read<R: BufRead>(&self, reader: &mut R, scratch: &mut Vec<u8>) -> Result<Option<Record>, DecodeError> {
        scratch.clear();
        if reader.read_until(b'\n', scratch).map_err(DecodeError::IO)? == 0 {
            return Ok(None);
        }

        Record::parse(trim_line_ending(scratch))
            .map(Some)
            .map_err(|err| DecodeError::Malformed(err.to_string()))
    }
}

/// RMP (Rust MessagePack) codec.
/// Records are stored as MessagePack unsigned integers in their smallest representation.
/// For more information see https://msgpack.org/.
#[derive(Debug, Clone, Copy, Default)]
pub struct RmpCodec;

impl RecordCodec for RmpCodec {
    const EXTENSION: &'static str = "rmp";

    fn encoded_len(&self, record: Record) -> usize {
        match record.value() {
            0..=0x7f => 1,
            0x80..=0xff => 2,
            0x100..=0xffff => 3,
            _ => 5,
        }
    }

    fn write<W: Write>(&self, writer: &mut W, record: Record) -> Result<(), ChunkError> {
        rmp_serde::encode::write(writer, &record).map_err(ChunkError::Encode)
    }

    fn read<R: BufRead>(&self, reader: &mut R, _scratch: &mut Vec<u8>) -> Result<Option<Record>, DecodeError> {
        if reader.fill_buf().map_err(DecodeError::IO)?.is_empty() {
            return Ok(None);
        }

        rmp_serde::decode::from_read(&mut *reader)
            .map(Some)
            .map_err(|err| DecodeError::Malformed(err.to_string()))
    }
}

#[cfg(test)]
mod test {
    use std::io;

    use rstest::*;

    use super::{DecodeError, RecordCodec, RmpCodec, TextCodec};
    use crate::record::Record;

    fn encode<C: RecordCodec>(codec: C, values: &[u32]) -> Vec<u8> {
        let mut buf = Vec::new();
        for value in values {
            codec.write(&mut buf, Record::new(*value).unwrap()).unwrap();
        }
        buf
    }

    fn decode<C: RecordCodec>(codec: C, data: Vec<u8>) -> Result<Vec<u32>, DecodeError> {
        let mut reader = io::Cursor::new(data);
        let mut scratch = Vec::new();
        let mut values = Vec::new();
        while let Some(record) = codec.read(&mut reader, &mut scratch)? {
            values.push(record.value());
        }
        Ok(values)
    }

    #[rstest]
    #[case(0)]
    #[case(9)]
    #[case(10)]
    #[case(127)]
    #[case(128)]
    #[case(255)]
    #[case(256)]
    #[case(65535)]
    #[case(65536)]
    #[case(2147483647)]
    fn test_encoded_len(#[case] value: u32) {
        let record = Record::new(value).unwrap();

        assert_eq!(TextCodec.encoded_len(record), encode(TextCodec, &[value]).len());
        assert_eq!(RmpCodec.encoded_len(record), encode(RmpCodec, &[value]).len());
    }

    #[test]
    fn test_text_codec() {
        let values = vec![5, 0, 2147483647, 31];
        let data = encode(TextCodec, &values);

        assert_eq!(data, b"5\n0\n2147483647\n31\n".to_vec());
        assert_eq!(decode(TextCodec, data).unwrap(), values);
    }

    #[test]
    fn test_rmp_codec() {
        let values = vec![5, 0, 2147483647, 300, 70000];
        let data = encode(RmpCodec, &values);

        assert_eq!(decode(RmpCodec, data).unwrap(), values);
    }

    #[test]
    fn test_malformed_content() {
        assert!(matches!(
            decode(TextCodec, b"1\nfoo\n".to_vec()),
            Err(DecodeError::Malformed(_))
        ));

        // truncated u32 marker
        assert!(matches!(decode(RmpCodec, vec![0xce, 0x00]), Err(DecodeError::Malformed(_))));
        // value above Record::MAX
        assert!(matches!(
            decode(RmpCodec, vec![0xce, 0xff, 0xff, 0xff, 0xff]),
            Err(DecodeError::Malformed(_))
        ));
    }
}
