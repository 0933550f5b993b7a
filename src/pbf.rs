//! Generated protobuf types for `fileformat.proto` and `osmformat.proto`.
//!
//! Compiled by `build.rs` via `prost-build`; see `proto/` for the schemas.

include!(concat!(env!("OUT_DIR"), "/proto/pbf.rs"));
