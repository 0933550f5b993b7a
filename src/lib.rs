//! A parallel, streaming reader/writer for OpenStreetMap data in PBF format.
//!
//! An OSM PBF file is a sequence of length-prefixed `(BlobHeader, Blob)`
//! pairs. This crate walks that sequence on the caller's thread (the blob
//! framer, [`read_blob`]) while decompressing and decoding each blob's
//! contents — a [`pbf::HeaderBlock`] or [`pbf::PrimitiveBlock`] — on a
//! bounded pool of worker threads (see [`scheduler`]).
//!
//! For straight-line, single-threaded use the low-level [`read_blob`] /
//! [`BlockParser`] pair can be driven directly, exactly as in the original
//! library this crate is descended from. Most callers want
//! [`scheduler::ParserBuilder`] instead: it drives the same framer and
//! decoder, but fans decoding out across a worker pool under strict
//! back-pressure while preserving per-entity-kind, per-block ordering.
//!
//! # Links
//!
//! - [OSM PBF format documentation](https://wiki.openstreetmap.org/wiki/PBF_Format)

#![forbid(unsafe_code)]

#[cfg(feature = "default")]
use flate2::read::ZlibDecoder;

use prost::Message;

use std::convert::From;
#[cfg(feature = "default")]
use std::io::prelude::*;
use std::io::ErrorKind;
use std::str;

mod error;

pub mod dense;
pub mod encoder;
pub mod entities;
pub mod groups;
pub mod header;
pub mod pbf;
pub mod scheduler;
pub mod strtable;
mod sync;
pub mod util;

/// Requires the `default` feature (zlib support); gated the same way as
/// [`DefaultDecompressor`] since blob writing is zlib-only (spec §4.8).
#[cfg(feature = "default")]
pub mod writer;

pub use error::Error;
pub use scheduler::ParserBuilder;

/// Blobs larger than this are rejected as [`Error::MalformedFrame`] /
/// [`Error::MalformedBlock`] (spec §3, "Blob (in-flight)").
pub const MAX_BLOB_SIZE: usize = 32 * 1024 * 1024;

/// `BlobHeader`s larger than this are rejected as [`Error::MalformedFrame`]
/// (spec §4.1).
pub const MAX_BLOB_HEADER_SIZE: usize = 64 * 1024;

/// Result of classifying a `BlobHeader.type` string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Header,
    Data,
    Unknown,
}

impl From<&str> for BlockType {
    fn from(value: &str) -> Self {
        match value {
            "OSMHeader" => BlockType::Header,
            "OSMData" => BlockType::Data,
            _ => BlockType::Unknown,
        }
    }
}

/// An unparsed, possibly compressed block, together with its classified type.
pub struct RawBlock {
    pub block_type: BlockType,
    pub data: Vec<u8>,
}

/// Metadata about the next frame in the stream, read without consuming its
/// payload. Used by the scheduler to implement shard `skip` (spec §4.1).
pub struct FrameHeader {
    pub block_type: BlockType,
    pub datasize: usize,
}

/// Reads the next `(BlobHeader, Blob)` frame from `pbf` and returns a fully
/// materialized [`RawBlock`].
///
/// Returns `None` on a clean end-of-stream at a frame boundary (spec §8,
/// "Empty file" / normal termination).
///
/// # Examples
///
/// ```no_run
/// use osmpbf_stream::read_blob;
///
/// use std::fs::File;
///
/// let mut file = File::open("some.osm.pbf").unwrap();
///
/// while let Some(result) = read_blob(&mut file) {
///     match result {
///         Ok(raw_block) => {}
///         Err(error) => {}
///     }
/// }
/// ```
pub fn read_blob<Input>(pbf: &mut Input) -> Option<Result<RawBlock, Error>>
where
    Input: std::io::Read,
{
    match read_frame_header(pbf)? {
        Ok(header) => Some(read_frame_payload(pbf, header.datasize).map(|data| RawBlock {
            block_type: header.block_type,
            data,
        })),
        Err(error) => Some(Err(error)),
    }
}

/// Reads and classifies the next `BlobHeader`, without reading the `Blob`
/// payload that follows it. Returns `None` on clean end-of-stream.
pub fn read_frame_header<Input>(pbf: &mut Input) -> Option<Result<FrameHeader, Error>>
where
    Input: std::io::Read,
{
    let mut length_buffer = [0u8; 4];

    if let Err(error) = pbf.read_exact(&mut length_buffer) {
        return match error.kind() {
            ErrorKind::UnexpectedEof => None,
            _ => Some(Err(Error::IoError(error))),
        };
    }

    Some(read_frame_header_inner(pbf, length_buffer))
}

fn read_frame_header_inner<Input>(pbf: &mut Input, length_buffer: [u8; 4]) -> Result<FrameHeader, Error>
where
    Input: std::io::Read,
{
    let blob_header_size: usize = i32::from_be_bytes(length_buffer)
        .try_into()
        .map_err(|_| Error::MalformedFrame("negative BlobHeader length prefix".to_string()))?;

    if blob_header_size > MAX_BLOB_HEADER_SIZE {
        return Err(Error::MalformedFrame(format!(
            "BlobHeader length {blob_header_size} exceeds {MAX_BLOB_HEADER_SIZE} byte limit"
        )));
    }

    let mut header_bytes = vec![0u8; blob_header_size];
    pbf.read_exact(&mut header_bytes).map_err(Error::IoError)?;

    let blob_header = pbf::BlobHeader::decode(&*header_bytes)?;
    let block_type = BlockType::from(blob_header.r#type.as_ref());
    let datasize: usize = blob_header
        .datasize
        .try_into()
        .map_err(|_| Error::MalformedFrame("negative Blob datasize".to_string()))?;

    if datasize > MAX_BLOB_SIZE {
        return Err(Error::MalformedFrame(format!(
            "Blob datasize {datasize} exceeds {MAX_BLOB_SIZE} byte limit"
        )));
    }

    Ok(FrameHeader { block_type, datasize })
}

/// Reads exactly `datasize` bytes as the `Blob` payload that follows a
/// [`FrameHeader`].
pub fn read_frame_payload<Input>(pbf: &mut Input, datasize: usize) -> Result<Vec<u8>, Error>
where
    Input: std::io::Read,
{
    let mut data = vec![0u8; datasize];
    pbf.read_exact(&mut data).map_err(Error::IoError)?;
    Ok(data)
}

/// Discards `datasize` bytes without allocating a buffer for them. Used by
/// the scheduler to bypass blobs belonging to a shard it doesn't own (spec
/// §4.1, "skip").
pub fn skip_frame_payload<Input>(pbf: &mut Input, datasize: usize) -> Result<(), Error>
where
    Input: std::io::Read,
{
    let mut sink = std::io::sink();
    let mut limited = pbf.take(datasize as u64);
    let copied = std::io::copy(&mut limited, &mut sink).map_err(Error::IoError)?;

    if copied != datasize as u64 {
        return Err(Error::MalformedFrame(format!(
            "expected to skip {datasize} bytes, stream ended after {copied}"
        )));
    }

    Ok(())
}

/// Result of [`BlockParser::parse_block`].
pub enum Block {
    /// A raw `OSMHeader` block.
    Header(pbf::HeaderBlock),
    /// A raw `OSMData` (primitive) block.
    Primitive(pbf::PrimitiveBlock),
    /// An unknown block; carries the decompressed payload bytes.
    Unknown(Vec<u8>),
}

/// Blob compression method, passed to a [`Decompressor`].
pub enum CompressionMethod {
    Lz4,
    Lzma,
    Zlib,
    Zstd,
}

/// Possible errors returned by [`Decompressor`] implementations.
#[derive(Debug)]
pub enum DecompressionError {
    UnsupportedCompression,
    InternalError(Box<dyn std::error::Error + Send + Sync>),
}

/// Trait for custom decompression support.
pub trait Decompressor {
    /// Decompresses `input` into the preallocated `output` slice, whose
    /// length is the blob's declared `raw_size`.
    fn decompress(method: CompressionMethod, input: &[u8], output: &mut [u8]) -> Result<(), DecompressionError>;
}

/// The default blob decompressor. Supports zlib decompression when the
/// `default` feature (enabled by default) is active; otherwise every method
/// is unsupported.
pub struct DefaultDecompressor;

impl Decompressor for DefaultDecompressor {
    #[cfg(feature = "default")]
    fn decompress(method: CompressionMethod, input: &[u8], output: &mut [u8]) -> Result<(), DecompressionError> {
        match method {
            CompressionMethod::Zlib => {
                let mut decoder = ZlibDecoder::new(input);
                decoder
                    .read_exact(output)
                    .map_err(|e| DecompressionError::InternalError(Box::new(e)))?;

                // `read_exact` only catches raw_size being too large (EOF before
                // output is full). If raw_size is too small, it fills the buffer
                // and returns Ok, silently truncating the rest of the stream —
                // check for that leftover byte explicitly.
                let mut trailing = [0u8; 1];
                match decoder.read(&mut trailing) {
                    Ok(0) => Ok(()),
                    Ok(_) => Err(DecompressionError::InternalError(Box::new(std::io::Error::new(
                        ErrorKind::InvalidData,
                        "decompressed size exceeds declared raw_size",
                    )))),
                    Err(e) => Err(DecompressionError::InternalError(Box::new(e))),
                }
            }
            _ => Err(DecompressionError::UnsupportedCompression),
        }
    }

    #[cfg(not(feature = "default"))]
    fn decompress(_method: CompressionMethod, _input: &[u8], _output: &mut [u8]) -> Result<(), DecompressionError> {
        Err(DecompressionError::UnsupportedCompression)
    }
}

/// Parser with an internal buffer for decompressed block bytes.
///
/// When multiple threads decode blocks concurrently, each should own its own
/// `BlockParser` (e.g. thread-local) so its internal buffer remains alive,
/// avoiding repeated allocation. [`scheduler::ParserBuilder`] does this
/// automatically.
pub struct BlockParser<D: Decompressor = DefaultDecompressor> {
    block_buffer: Vec<u8>,
    decompressor: std::marker::PhantomData<D>,
}

impl Default for BlockParser {
    fn default() -> Self {
        BlockParser::<DefaultDecompressor>::new()
    }
}

impl<D: Decompressor> BlockParser<D> {
    pub fn new() -> Self {
        Self {
            block_buffer: Vec::new(),
            decompressor: Default::default(),
        }
    }

    /// Decompresses and parses `raw_block` into a header, primitive or
    /// unknown block.
    pub fn parse_block(&mut self, raw_block: RawBlock) -> Result<Block, Error> {
        let blob = pbf::Blob::decode(&*raw_block.data)?;

        if let Some(uncompressed_size) = blob.raw_size {
            let uncompressed_size: usize = uncompressed_size
                .try_into()
                .map_err(|_| Error::MalformedBlock("negative raw_size".to_string()))?;

            if uncompressed_size > crate::MAX_BLOB_SIZE {
                return Err(Error::MalformedBlock(format!(
                    "decompressed blob size {uncompressed_size} exceeds {} byte limit",
                    crate::MAX_BLOB_SIZE
                )));
            }

            self.block_buffer.resize_with(uncompressed_size, Default::default);
        } else {
            self.block_buffer.clear();
        }

        match blob.data {
            Some(pbf::blob::Data::Raw(raw_data)) => {
                self.block_buffer.clear();
                self.block_buffer.extend_from_slice(&raw_data);
            }
            Some(pbf::blob::Data::ZlibData(zlib_data)) => {
                D::decompress(CompressionMethod::Zlib, &zlib_data, &mut self.block_buffer)
                    .map_err(decompression_error)?;
            }
            Some(pbf::blob::Data::Lz4Data(lz4_data)) => {
                D::decompress(CompressionMethod::Lz4, &lz4_data, &mut self.block_buffer).map_err(decompression_error)?;
            }
            Some(pbf::blob::Data::LzmaData(lzma_data)) => {
                D::decompress(CompressionMethod::Lzma, &lzma_data, &mut self.block_buffer)
                    .map_err(decompression_error)?;
            }
            Some(pbf::blob::Data::ZstdData(zstd_data)) => {
                D::decompress(CompressionMethod::Zstd, &zstd_data, &mut self.block_buffer).map_err(decompression_error)?;
            }
            Some(pbf::blob::Data::ObsoleteBzip2Data(_)) | None => return Err(Error::UnsupportedCompression),
        }

        match raw_block.block_type {
            BlockType::Header => Ok(Block::Header(pbf::HeaderBlock::decode(&*self.block_buffer)?)),
            BlockType::Data => Ok(Block::Primitive(pbf::PrimitiveBlock::decode(&*self.block_buffer)?)),
            BlockType::Unknown => Ok(Block::Unknown(self.block_buffer.clone())),
        }
    }
}

fn decompression_error(error: DecompressionError) -> Error {
    match error {
        DecompressionError::UnsupportedCompression => Error::UnsupportedCompression,
        DecompressionError::InternalError(e) => Error::DecompressionFailed(e.to_string()),
    }
}

/// Generalized implementation for reading normal (non-dense) tags from
/// string tables — used by ways, sparse nodes, and relation roles.
pub struct TagReader<'a, I>
where
    I: Iterator<Item = (Result<usize, Error>, Result<usize, Error>)>,
{
    string_table: &'a pbf::StringTable,
    iter: I,
}

impl<'a, I> Iterator for TagReader<'a, I>
where
    I: Iterator<Item = (Result<usize, Error>, Result<usize, Error>)>,
{
    type Item = (Result<&'a str, Error>, Result<&'a str, Error>);

    fn next(&mut self) -> Option<Self::Item> {
        let (key, value) = self.iter.next()?;

        let decode_string = |index: usize| -> Result<&'a str, Error> {
            let bytes = self.string_table.s.get(index).ok_or_else(|| {
                Error::MalformedBlock(format!(
                    "string table index {index} is out of bounds ({})",
                    self.string_table.s.len()
                ))
            })?;
            str::from_utf8(bytes).map_err(|_| Error::MalformedBlock(format!("string at index {index} is not valid UTF-8")))
        };

        let key = key.and_then(decode_string);
        let value = value.and_then(decode_string);
        Some((key, value))
    }
}

/// Constructs a new `TagReader` from key and value index slices, and a
/// corresponding string table.
pub fn new_tag_reader<'a>(
    string_table: &'a pbf::StringTable,
    key_indices: &'a [u32],
    value_indices: &'a [u32],
) -> TagReader<'a, impl Iterator<Item = (Result<usize, Error>, Result<usize, Error>)> + 'a> {
    TagReader {
        string_table,
        iter: key_indices
            .iter()
            .map(|i| Ok(*i as usize))
            .zip(value_indices.iter().map(|i| Ok(*i as usize))),
    }
}

/// Utility for reading delta-encoded values directly, like
/// [`pbf::Way::refs`] and [`pbf::Relation::memids`].
pub struct DeltaValueReader<'a, T> {
    remaining: &'a [T],
    accumulated: T,
}

impl<'a, T> DeltaValueReader<'a, T>
where
    T: std::default::Default,
{
    pub fn new(values: &'a [T]) -> Self {
        DeltaValueReader {
            remaining: values,
            accumulated: T::default(),
        }
    }
}

impl<T> Iterator for DeltaValueReader<'_, T>
where
    T: std::ops::AddAssign + std::clone::Clone,
{
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        let (first, elements) = self.remaining.split_first()?;
        self.accumulated += first.clone();
        self.remaining = elements;
        Some(self.accumulated.clone())
    }
}

#[cfg(test)]
mod tag_reader_tests {
    use super::*;

    #[test]
    fn valid_input() {
        let key_vals = ["", "key1", "val1", "key2", "val2"];
        let string_table = pbf::StringTable {
            s: key_vals.iter().map(|s| s.as_bytes().to_vec()).collect(),
        };

        let key_indices = [1, 3];
        let value_indices = [2, 4];
        let mut reader = new_tag_reader(&string_table, &key_indices, &value_indices);

        assert!(matches!(reader.next(), Some((Ok("key1"), Ok("val1")))));
        assert!(matches!(reader.next(), Some((Ok("key2"), Ok("val2")))));
        assert!(reader.next().is_none());
    }
}


#[cfg(test)]
mod blob_round_trip_tests {
    use super::*;
    use std::io::Cursor;

    fn frame(block_type: &str, blob: pbf::Blob) -> Vec<u8> {
        let blob_bytes = blob.encode_to_vec();
        let header = pbf::BlobHeader {
            r#type: block_type.to_string(),
            indexdata: None,
            datasize: blob_bytes.len() as i32,
        };
        let header_bytes = header.encode_to_vec();

        let mut out = Vec::new();
        out.extend_from_slice(&(header_bytes.len() as i32).to_be_bytes());
        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(&blob_bytes);
        out
    }

    #[test]
    fn raw_blob_round_trip() {
        let bytes = frame(
            "TestBlock",
            pbf::Blob {
                data: Some(pbf::blob::Data::Raw(b"TestString".to_vec())),
                raw_size: None,
            },
        );

        let mut cursor = Cursor::new(bytes);
        let raw = read_blob(&mut cursor).unwrap().unwrap();
        assert!(matches!(raw.block_type, BlockType::Unknown));

        let mut parser = BlockParser::default();
        let block = parser.parse_block(raw).unwrap();
        assert!(matches!(block, Block::Unknown(ref data) if data.as_slice() == b"TestString"));
    }

    #[test]
    fn zlib_blob_round_trip() {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;

        let payload = b"TestString";
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload).unwrap();
        let compressed = encoder.finish().unwrap();

        let bytes = frame(
            "TestBlock",
            pbf::Blob {
                data: Some(pbf::blob::Data::ZlibData(compressed)),
                raw_size: Some(payload.len() as i32),
            },
        );

        let mut cursor = Cursor::new(bytes);
        let raw = read_blob(&mut cursor).unwrap().unwrap();
        let mut parser = BlockParser::default();
        let block = parser.parse_block(raw).unwrap();
        assert!(matches!(block, Block::Unknown(ref data) if data.as_slice() == payload));
    }

    #[test]
    fn wrong_raw_size_is_decompression_failed() {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;

        let payload = b"TestString";
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload).unwrap();
        let compressed = encoder.finish().unwrap();

        let bytes = frame(
            "OSMData",
            pbf::Blob {
                data: Some(pbf::blob::Data::ZlibData(compressed)),
                raw_size: Some(9000),
            },
        );

        let mut cursor = Cursor::new(bytes);
        let raw = read_blob(&mut cursor).unwrap().unwrap();
        let mut parser = BlockParser::default();
        assert!(matches!(parser.parse_block(raw), Err(Error::DecompressionFailed(_))));
    }

    #[test]
    fn raw_size_too_small_is_decompression_failed() {
        use flate2::write::ZlibEncoder;
        use flate2::Compression;
        use std::io::Write;

        let payload = b"TestString";
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(payload).unwrap();
        let compressed = encoder.finish().unwrap();

        let bytes = frame(
            "OSMData",
            pbf::Blob {
                data: Some(pbf::blob::Data::ZlibData(compressed)),
                raw_size: Some(4),
            },
        );

        let mut cursor = Cursor::new(bytes);
        let raw = read_blob(&mut cursor).unwrap().unwrap();
        let mut parser = BlockParser::default();
        assert!(matches!(parser.parse_block(raw), Err(Error::DecompressionFailed(_))));
    }

    #[test]
    fn obsolete_bzip2_is_unsupported() {
        let bytes = frame(
            "OSMData",
            pbf::Blob {
                data: Some(pbf::blob::Data::ObsoleteBzip2Data(b"whatever".to_vec())),
                raw_size: None,
            },
        );

        let mut cursor = Cursor::new(bytes);
        let raw = read_blob(&mut cursor).unwrap().unwrap();
        let mut parser = BlockParser::default();
        assert!(matches!(parser.parse_block(raw), Err(Error::UnsupportedCompression)));
    }

    #[test]
    fn empty_stream_is_clean_eof() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        assert!(read_blob(&mut cursor).is_none());
    }

    #[test]
    fn oversize_header_length_is_malformed_frame() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&((MAX_BLOB_HEADER_SIZE as i32) + 1).to_be_bytes());
        let mut cursor = Cursor::new(bytes);
        assert!(matches!(read_blob(&mut cursor), Some(Err(Error::MalformedFrame(_)))));
    }
}
