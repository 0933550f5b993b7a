//! The blob writer (component C9): the inverse of [`crate::read_blob`].
//!
//! Grounded on the `BlobWriter` pattern in the pack's `osmpbf` writer
//! (compress, compute `datasize` from the compressed bytes, then frame),
//! narrowed to this crate's zlib-only compression policy and `Error`
//! taxonomy.

use crate::error::Error;
use crate::pbf;
use crate::{MAX_BLOB_HEADER_SIZE, MAX_BLOB_SIZE};

use flate2::write::ZlibEncoder;
use flate2::Compression;
use prost::Message;

use std::io::Write;

/// Writes `(BlobHeader, Blob)` frames to an underlying writer, zlib
/// compressing every block at the default compression level.
pub struct BlobWriter<W: Write> {
    writer: W,
}

impl<W: Write> BlobWriter<W> {
    pub fn new(writer: W) -> Self {
        BlobWriter { writer }
    }

    /// Consumes the writer, returning the underlying sink.
    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_blob(&mut self, block_type: &str, payload: Vec<u8>) -> Result<(), Error> {
        if payload.len() > MAX_BLOB_SIZE {
            return Err(Error::MalformedBlock(format!(
                "encoded block size {} exceeds {MAX_BLOB_SIZE} byte limit",
                payload.len()
            )));
        }

        let raw_size = payload.len() as i32;

        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload)?;
        let compressed = encoder.finish()?;

        let blob = pbf::Blob {
            data: Some(pbf::blob::Data::ZlibData(compressed)),
            raw_size: Some(raw_size),
        };
        let blob_bytes = blob.encode_to_vec();

        let header = pbf::BlobHeader {
            r#type: block_type.to_string(),
            indexdata: None,
            datasize: blob_bytes.len() as i32,
        };
        let header_bytes = header.encode_to_vec();

        if header_bytes.len() > MAX_BLOB_HEADER_SIZE {
            return Err(Error::MalformedFrame(format!(
                "BlobHeader length {} exceeds {MAX_BLOB_HEADER_SIZE} byte limit",
                header_bytes.len()
            )));
        }

        self.writer.write_all(&(header_bytes.len() as i32).to_be_bytes())?;
        self.writer.write_all(&header_bytes)?;
        self.writer.write_all(&blob_bytes)?;

        Ok(())
    }

    /// Writes `block` as the file's leading `OSMHeader` blob.
    pub fn write_header_block(&mut self, block: &pbf::HeaderBlock) -> Result<(), Error> {
        self.write_blob("OSMHeader", block.encode_to_vec())
    }

    /// Writes `block` as an `OSMData` blob.
    pub fn write_primitive_block(&mut self, block: &pbf::PrimitiveBlock) -> Result<(), Error> {
        self.write_blob("OSMData", block.encode_to_vec())
    }
}
