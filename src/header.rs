//! Header block parsing (component C4).

use crate::entities::{BoundBox, Header};
use crate::error::Error;
use crate::pbf;
use crate::util::nanodegrees_to_degrees;

/// Parses a raw [`pbf::HeaderBlock`] into the crate's [`Header`] value type.
///
/// `want_bbox` mirrors spec §4.4: if the caller hasn't registered a bbox
/// sink, decoding the bounding box is skipped entirely (it's a handful of
/// multiplications, so this is more about honoring the documented contract
/// than a meaningful optimization).
pub fn parse_header(block: &pbf::HeaderBlock, want_bbox: bool) -> Result<Header, Error> {
    let bbox = if want_bbox {
        block.bbox.as_ref().map(|b| BoundBox {
            left: nanodegrees_to_degrees(b.left),
            right: nanodegrees_to_degrees(b.right),
            top: nanodegrees_to_degrees(b.top),
            bottom: nanodegrees_to_degrees(b.bottom),
        })
    } else {
        None
    };

    Ok(Header {
        required_features: block.required_features.clone(),
        optional_features: block.optional_features.clone(),
        writing_program: block.writingprogram.clone(),
        source: block.source.clone(),
        osmosis_replication_timestamp: block.osmosis_replication_timestamp,
        osmosis_replication_sequence_number: block.osmosis_replication_sequence_number,
        osmosis_replication_base_url: block.osmosis_replication_base_url.clone(),
        bbox,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_bbox_when_requested() {
        let block = pbf::HeaderBlock {
            bbox: Some(pbf::BoundingBox {
                left: -1_000_000_000,
                right: 2_000_000_000,
                top: 900_000_000,
                bottom: -900_000_000,
            }),
            required_features: vec!["OsmSchema-V0.6".to_string()],
            optional_features: vec![],
            writingprogram: Some("test-writer".to_string()),
            source: None,
            osmosis_replication_timestamp: None,
            osmosis_replication_sequence_number: None,
            osmosis_replication_base_url: None,
        };

        let header = parse_header(&block, true).unwrap();
        let bbox = header.bbox.unwrap();
        assert_eq!(bbox.left, -1.0);
        assert_eq!(bbox.right, 2.0);
        assert_eq!(header.writing_program.as_deref(), Some("test-writer"));
        assert_eq!(header.required_features, vec!["OsmSchema-V0.6".to_string()]);
    }

    #[test]
    fn skips_bbox_when_not_wanted() {
        let block = pbf::HeaderBlock {
            bbox: Some(pbf::BoundingBox {
                left: 0,
                right: 0,
                top: 0,
                bottom: 0,
            }),
            ..Default::default()
        };

        let header = parse_header(&block, false).unwrap();
        assert!(header.bbox.is_none());
    }
}
