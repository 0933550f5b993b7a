//! The error taxonomy shared by every component in this crate.

use std::fmt;

/// Possible errors returned by the library.
///
/// Mirrors the disposition table of the format specification: most
/// variants are fatal and abort the in-progress parse or encode;
/// `SequenceViolation` is the one recoverable case (it is logged and the
/// offending block is skipped, see [`crate::scheduler`]).
#[derive(Debug)]
pub enum Error {
    /// A PBF protobuf message failed to decode.
    PbfParseError(prost::DecodeError),
    /// Reading from or writing to the underlying stream failed.
    IoError(std::io::Error),
    /// A `BlobHeader` length prefix was negative, truncated, or >= 64 KiB.
    MalformedFrame(String),
    /// A compression method other than raw or zlib was requested.
    UnsupportedCompression,
    /// Zlib inflation errored, or the inflated size didn't match `raw_size`.
    DecompressionFailed(String),
    /// A decoded block violated an invariant: an out-of-range string table
    /// index, mismatched parallel-array lengths, or similar.
    MalformedBlock(String),
    /// An `OSMData` blob was observed before any `OSMHeader` blob.
    ///
    /// Not surfaced as a hard failure: the scheduler logs this at `warn!`
    /// and skips the offending block (spec §7).
    SequenceViolation,
    /// `parse()` was called while a previous call on the same parser was
    /// still running.
    ParserBusy,
    /// A sink callback or worker task failed or panicked.
    WorkerFailed(String),
    /// An encoder method was called after `write()`/`finish()` had already
    /// consumed it.
    Consumed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::PbfParseError(e) => write!(f, "protobuf decode error: {e}"),
            Error::IoError(e) => write!(f, "I/O error: {e}"),
            Error::MalformedFrame(msg) => write!(f, "malformed blob frame: {msg}"),
            Error::UnsupportedCompression => write!(f, "unsupported blob compression method"),
            Error::DecompressionFailed(msg) => write!(f, "blob decompression failed: {msg}"),
            Error::MalformedBlock(msg) => write!(f, "malformed primitive/header block: {msg}"),
            Error::SequenceViolation => write!(f, "OSMData blob observed before any OSMHeader blob"),
            Error::ParserBusy => write!(f, "parse() called while already running"),
            Error::WorkerFailed(msg) => write!(f, "worker task failed: {msg}"),
            Error::Consumed => write!(f, "encoder used after being consumed"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e)
    }
}

impl From<prost::DecodeError> for Error {
    fn from(e: prost::DecodeError) -> Self {
        Error::PbfParseError(e)
    }
}

impl From<prost::EncodeError> for Error {
    fn from(e: prost::EncodeError) -> Self {
        Error::MalformedBlock(format!("failed to encode block: {e}"))
    }
}
