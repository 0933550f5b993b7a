//! Various utilities, e.g. coordinate and timestamp normalization.

use crate::pbf;

/// Normalizes `lat` and `lon` to nanodegrees and returns them in a
/// `(latitude: i64, longitude: i64)` pair.
pub fn normalize_coord(lat: i64, lon: i64, block: &pbf::PrimitiveBlock) -> (i64, i64) {
    (
        lat * block.granularity() as i64 + block.lat_offset() as i64,
        lon * block.granularity() as i64 + block.lon_offset() as i64,
    )
}

/// Converts a normalized (nanodegree) coordinate to degrees.
pub fn nanodegrees_to_degrees(value: i64) -> f64 {
    value as f64 * 1e-9
}

/// Normalizes a timestamp coming from `pbf::Info` or `pbf::DenseInfo` to
/// milliseconds since the epoch.
pub fn normalize_timestamp(timestamp: i64, block: &pbf::PrimitiveBlock) -> i64 {
    timestamp * block.date_granularity() as i64
}
