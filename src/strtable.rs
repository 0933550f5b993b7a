//! Per-block string table decoding (component C3).

use std::str;

use crate::error::Error;
use crate::pbf;

/// A decoded string table, reused by every group inside one primitive block.
///
/// Index 0 is the empty string by convention; out-of-range lookups are a
/// fatal [`Error::MalformedBlock`].
pub struct StringTable<'a> {
    raw: &'a pbf::StringTable,
}

impl<'a> StringTable<'a> {
    pub fn new(raw: &'a pbf::StringTable) -> Self {
        StringTable { raw }
    }

    pub fn len(&self) -> usize {
        self.raw.s.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.s.is_empty()
    }

    /// Resolves `index` to a UTF-8 string slice.
    pub fn get(&self, index: usize) -> Result<&'a str, Error> {
        let bytes = self.raw.s.get(index).ok_or_else(|| {
            Error::MalformedBlock(format!(
                "string table index {index} out of bounds (len {})",
                self.raw.s.len()
            ))
        })?;

        str::from_utf8(bytes)
            .map_err(|_| Error::MalformedBlock(format!("string table entry {index} is not valid UTF-8")))
    }
}
