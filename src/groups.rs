//! Primitive-group parsers (component C5): turns one decoded
//! [`pbf::PrimitiveBlock`] into a stream of [`crate::entities`] values,
//! dispatched to whichever sink callbacks the caller registered.

use crate::dense::DenseNodeReader;
use crate::entities::{Changeset, Info, MemberType, Member, Node, Relation, Tag, Way};
use crate::error::Error;
use crate::pbf;
use crate::scheduler::Sinks;
use crate::strtable::StringTable;
use crate::util::{nanodegrees_to_degrees, normalize_coord, normalize_timestamp};

fn decode_tags(string_table: &StringTable, keys: &[u32], vals: &[u32]) -> Result<Vec<Tag>, Error> {
    if keys.len() != vals.len() {
        return Err(Error::MalformedBlock(format!(
            "tag key/value array length mismatch: {} keys, {} vals",
            keys.len(),
            vals.len()
        )));
    }

    keys.iter()
        .zip(vals.iter())
        .map(|(k, v)| {
            let key = string_table.get(*k as usize)?.to_string();
            let val = string_table.get(*v as usize)?.to_string();
            Ok((key, val))
        })
        .collect()
}

fn decode_dense_tags(string_table: &StringTable, key_value_indices: &[i32]) -> Result<Vec<Tag>, Error> {
    key_value_indices
        .chunks_exact(2)
        .map(|pair| {
            let k = usize::try_from(pair[0])
                .map_err(|_| Error::MalformedBlock(format!("negative string table index {}", pair[0])))?;
            let v = usize::try_from(pair[1])
                .map_err(|_| Error::MalformedBlock(format!("negative string table index {}", pair[1])))?;
            let key = string_table.get(k)?.to_string();
            let val = string_table.get(v)?.to_string();
            Ok((key, val))
        })
        .collect()
}

fn decode_info(info: &pbf::Info, string_table: &StringTable, block: &pbf::PrimitiveBlock) -> Result<Info, Error> {
    let username = match info.user_sid {
        Some(sid) => Some(string_table.get(sid as usize)?.to_string()),
        None => None,
    };

    Ok(Info {
        version: info.version,
        timestamp: info.timestamp.map(|t| normalize_timestamp(t, block)),
        changeset: info.changeset,
        uid: info.uid,
        username,
        visible: info.visible.unwrap_or(true),
    })
}

fn decode_dense_info(
    info: &pbf::Info,
    string_table: &StringTable,
    block: &pbf::PrimitiveBlock,
) -> Result<Info, Error> {
    // Dense info's user_sid is already delta-decoded into an absolute index
    // by `DenseNodeReader`, stored (like the sparse case) as `pbf::Info`.
    decode_info(info, string_table, block)
}

fn decode_member_type(raw: i32) -> Result<MemberType, Error> {
    match raw {
        0 => Ok(MemberType::Node),
        1 => Ok(MemberType::Way),
        2 => Ok(MemberType::Relation),
        other => Err(Error::MalformedBlock(format!("invalid relation member type code {other}"))),
    }
}

pub fn decode_dense_nodes(
    dense: &pbf::DenseNodes,
    string_table: &StringTable,
    block: &pbf::PrimitiveBlock,
    mut emit: impl FnMut(Node) -> Result<(), Error>,
) -> Result<(), Error> {
    for node in DenseNodeReader::new(dense).map_err(|_| {
        Error::MalformedBlock("dense node id/lat/lon array length mismatch".to_string())
    })? {
        let node = node.map_err(|_| Error::MalformedBlock("dense node delta decode underflow".to_string()))?;

        let (lat_nano, lon_nano) = normalize_coord(node.lat, node.lon, block);
        let tags = decode_dense_tags(string_table, node.key_value_indices)?;
        let info = match &node.info {
            Some(info) => Some(decode_dense_info(info, string_table, block)?),
            None => None,
        };

        emit(Node {
            id: node.id,
            tags,
            info,
            lat: nanodegrees_to_degrees(lat_nano),
            lon: nanodegrees_to_degrees(lon_nano),
        })?;
    }

    Ok(())
}

pub fn decode_sparse_node(node: &pbf::Node, string_table: &StringTable, block: &pbf::PrimitiveBlock) -> Result<Node, Error> {
    let (lat_nano, lon_nano) = normalize_coord(node.lat, node.lon, block);
    let tags = decode_tags(string_table, &node.keys, &node.vals)?;
    let info = match &node.info {
        Some(info) => Some(decode_info(info, string_table, block)?),
        None => None,
    };

    Ok(Node {
        id: node.id,
        tags,
        info,
        lat: nanodegrees_to_degrees(lat_nano),
        lon: nanodegrees_to_degrees(lon_nano),
    })
}

pub fn decode_way(way: &pbf::Way, string_table: &StringTable, block: &pbf::PrimitiveBlock) -> Result<Way, Error> {
    let tags = decode_tags(string_table, &way.keys, &way.vals)?;
    let info = match &way.info {
        Some(info) => Some(decode_info(info, string_table, block)?),
        None => None,
    };

    let mut acc: i64 = 0;
    let nodes: Vec<i64> = way
        .refs
        .iter()
        .map(|delta| {
            acc += delta;
            acc
        })
        .collect();

    Ok(Way {
        id: way.id,
        tags,
        info,
        nodes,
    })
}

pub fn decode_relation(rel: &pbf::Relation, string_table: &StringTable, block: &pbf::PrimitiveBlock) -> Result<Relation, Error> {
    let tags = decode_tags(string_table, &rel.keys, &rel.vals)?;
    let info = match &rel.info {
        Some(info) => Some(decode_info(info, string_table, block)?),
        None => None,
    };

    if rel.roles_sid.len() != rel.memids.len() || rel.memids.len() != rel.types.len() {
        return Err(Error::MalformedBlock(format!(
            "relation member array length mismatch: {} roles, {} memids, {} types",
            rel.roles_sid.len(),
            rel.memids.len(),
            rel.types.len()
        )));
    }

    let mut acc: i64 = 0;
    let mut members = Vec::with_capacity(rel.memids.len());
    for ((role_sid, memid_delta), member_type) in rel.roles_sid.iter().zip(rel.memids.iter()).zip(rel.types.iter()) {
        acc += memid_delta;
        let role = string_table.get(*role_sid as usize)?.to_string();
        let member_type = decode_member_type(*member_type)?;
        members.push(Member {
            member_ref: acc,
            role,
            member_type,
        });
    }

    Ok(Relation {
        id: rel.id,
        tags,
        info,
        members,
    })
}

pub fn decode_changeset(cs: &pbf::ChangeSet) -> Changeset {
    Changeset { id: cs.id }
}

/// Decodes every group of `block` in file order, dispatching to whichever
/// sinks `sinks` has registered. Groups inside a block are processed left to
/// right; entities of the same kind within one block are delivered in file
/// order, per spec §4.5.
pub fn decode_primitive_block(block: &pbf::PrimitiveBlock, sinks: &Sinks) -> Result<(), Error> {
    let string_table = StringTable::new(&block.stringtable);

    for group in &block.primitivegroup {
        if let Some(dense) = &group.dense {
            if let Some(on_node) = &sinks.on_node {
                decode_dense_nodes(dense, &string_table, block, |node| {
                    on_node(node);
                    Ok(())
                })?;
            }
        }

        if !group.nodes.is_empty() {
            if let Some(on_node) = &sinks.on_node {
                for node in &group.nodes {
                    on_node(decode_sparse_node(node, &string_table, block)?);
                }
            }
        }

        if !group.ways.is_empty() {
            if let Some(on_way) = &sinks.on_way {
                for way in &group.ways {
                    on_way(decode_way(way, &string_table, block)?);
                }
            }
        }

        if !group.relations.is_empty() {
            if let Some(on_relation) = &sinks.on_relation {
                for rel in &group.relations {
                    on_relation(decode_relation(rel, &string_table, block)?);
                }
            }
        }

        if !group.changesets.is_empty() {
            if let Some(on_changeset) = &sinks.on_changeset {
                for cs in &group.changesets {
                    on_changeset(decode_changeset(cs));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block_with(groups: Vec<pbf::PrimitiveGroup>) -> pbf::PrimitiveBlock {
        pbf::PrimitiveBlock {
            stringtable: pbf::StringTable {
                s: vec![b"".to_vec(), b"highway".to_vec(), b"residential".to_vec()],
            },
            primitivegroup: groups,
            granularity: Some(100),
            lat_offset: Some(0),
            lon_offset: Some(0),
            date_granularity: Some(1000),
        }
    }

    #[test]
    fn way_refs_are_delta_decoded() {
        let block = block_with(vec![]);
        let st = StringTable::new(&block.stringtable);
        let way = pbf::Way {
            id: 1,
            keys: vec![1],
            vals: vec![2],
            info: None,
            refs: vec![10, 5, -3],
        };

        let decoded = decode_way(&way, &st, &block).unwrap();
        assert_eq!(decoded.nodes, vec![10, 15, 12]);
        assert_eq!(decoded.tags, vec![("highway".to_string(), "residential".to_string())]);
    }

    #[test]
    fn zero_ref_way_is_accepted() {
        let block = block_with(vec![]);
        let st = StringTable::new(&block.stringtable);
        let way = pbf::Way {
            id: 1,
            keys: vec![],
            vals: vec![],
            info: None,
            refs: vec![],
        };
        assert!(decode_way(&way, &st, &block).unwrap().nodes.is_empty());
    }

    #[test]
    fn relation_members_are_delta_decoded() {
        let block = block_with(vec![]);
        let st = StringTable::new(&block.stringtable);
        let rel = pbf::Relation {
            id: 1,
            keys: vec![],
            vals: vec![],
            info: None,
            roles_sid: vec![0, 0],
            memids: vec![100, -50],
            types: vec![0, 1],
        };

        let decoded = decode_relation(&rel, &st, &block).unwrap();
        assert_eq!(decoded.members[0].member_ref, 100);
        assert_eq!(decoded.members[0].member_type, MemberType::Node);
        assert_eq!(decoded.members[1].member_ref, 50);
        assert_eq!(decoded.members[1].member_type, MemberType::Way);
    }

    #[test]
    fn relation_array_mismatch_is_malformed() {
        let block = block_with(vec![]);
        let st = StringTable::new(&block.stringtable);
        let rel = pbf::Relation {
            id: 1,
            keys: vec![],
            vals: vec![],
            info: None,
            roles_sid: vec![0],
            memids: vec![],
            types: vec![],
        };
        assert!(matches!(decode_relation(&rel, &st, &block), Err(Error::MalformedBlock(_))));
    }

    #[test]
    fn out_of_range_tag_index_is_malformed() {
        let block = block_with(vec![]);
        let st = StringTable::new(&block.stringtable);
        let node = pbf::Node {
            id: 1,
            keys: vec![99],
            vals: vec![0],
            info: None,
            lat: 0,
            lon: 0,
        };
        assert!(matches!(decode_sparse_node(&node, &st, &block), Err(Error::MalformedBlock(_))));
    }
}
