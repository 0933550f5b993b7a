//! The primitive-block encoder (component C8): the write-side mirror of
//! [`crate::groups`], sharing one string table across every entity
//! accumulated into a block.
//!
//! Grounded on the builder-style `BlockBuilder`/`NodeGroupBuilder` found
//! in the pack's `osmpbf` writer (a shared `string_map` mutated only
//! during construction, consulted read-mostly afterwards), adapted here
//! to dense-node delta coding and this crate's entity model.

use crate::entities::{Changeset, Info, Member, MemberType, Node, Relation, Tag, Way};
use crate::error::Error;
use crate::pbf;

use std::collections::HashMap;

/// A driver should flush the block once [`PrimitiveBlockEncoder::estimated_size`]
/// crosses this, keeping the compressed blob comfortably under the 32 MiB
/// frame limit.
pub const SOFT_SIZE_CAP: usize = 15 * 1024 * 1024;

/// Exceeding this without having flushed is a caller error; the resulting
/// blob risks tripping `MAX_BLOB_SIZE` after compression.
pub const HARD_SIZE_CAP: usize = 16 * 1024 * 1024;

const GRANULARITY: i64 = 100;
const DATE_GRANULARITY: i64 = 1000;

fn degrees_to_raw(degrees: f64) -> i64 {
    (degrees * 1e9 / GRANULARITY as f64).round() as i64
}

fn millis_to_raw(millis: i64) -> i64 {
    millis / DATE_GRANULARITY
}

fn encode_member_type(member_type: MemberType) -> i32 {
    match member_type {
        MemberType::Node => 0,
        MemberType::Way => 1,
        MemberType::Relation => 2,
    }
}

struct StringTableBuilder {
    strings: Vec<Vec<u8>>,
    index: HashMap<Vec<u8>, u32>,
}

impl StringTableBuilder {
    fn new() -> Self {
        // Index 0 is reserved for the empty string by convention.
        StringTableBuilder {
            strings: vec![Vec::new()],
            index: HashMap::new(),
        }
    }

    /// Returns `s`'s index, inserting it at the next free slot on first
    /// occurrence. The sole mutator of the table.
    fn get_or_insert(&mut self, s: &str) -> u32 {
        if let Some(&index) = self.index.get(s.as_bytes()) {
            return index;
        }

        let index = self.strings.len() as u32;
        self.strings.push(s.as_bytes().to_vec());
        self.index.insert(s.as_bytes().to_vec(), index);
        index
    }

    fn into_table(self) -> pbf::StringTable {
        pbf::StringTable { s: self.strings }
    }

    fn estimated_size(&self) -> usize {
        self.strings.iter().map(|s| s.len() + 2).sum()
    }
}

impl Default for StringTableBuilder {
    fn default() -> Self {
        StringTableBuilder::new()
    }
}

fn encode_tags(tags: &[Tag], strings: &mut StringTableBuilder) -> (Vec<u32>, Vec<u32>) {
    let mut keys = Vec::with_capacity(tags.len());
    let mut vals = Vec::with_capacity(tags.len());

    for (key, value) in tags {
        keys.push(strings.get_or_insert(key));
        vals.push(strings.get_or_insert(value));
    }

    (keys, vals)
}

fn encode_info(info: &Info, strings: &mut StringTableBuilder) -> pbf::Info {
    pbf::Info {
        version: info.version,
        timestamp: info.timestamp.map(millis_to_raw),
        changeset: info.changeset,
        uid: info.uid,
        user_sid: info.username.as_deref().map(|username| strings.get_or_insert(username)),
        visible: Some(info.visible),
    }
}

#[derive(Default)]
struct DenseNodeDeltaState {
    id: i64,
    lat: i64,
    lon: i64,
    timestamp: i64,
    changeset: i64,
    uid: i32,
    user_sid: i64,
}

#[derive(Default)]
struct DenseInfoEncoder {
    version: Vec<i32>,
    timestamp: Vec<i64>,
    changeset: Vec<i64>,
    uid: Vec<i32>,
    user_sid: Vec<i32>,
    visible: Vec<bool>,
}

impl DenseInfoEncoder {
    /// Pushes a zero-delta filler entry, keeping every sub-array aligned
    /// with a node that carries no `info` of its own.
    fn push_default(&mut self) {
        self.version.push(-1);
        self.timestamp.push(0);
        self.changeset.push(0);
        self.uid.push(0);
        self.user_sid.push(0);
        self.visible.push(true);
    }
}

#[derive(Default)]
struct DenseNodeEncoder {
    ids: Vec<i64>,
    lats: Vec<i64>,
    lons: Vec<i64>,
    keys_vals: Vec<i32>,
    info: Option<DenseInfoEncoder>,
    state: DenseNodeDeltaState,
    has_nodes: bool,
    node_count: usize,
}

impl DenseNodeEncoder {
    fn push(&mut self, node: &Node, strings: &mut StringTableBuilder) {
        self.has_nodes = true;
        let nodes_before_this_one = self.node_count;
        self.node_count += 1;

        let id_delta = node.id - self.state.id;
        self.state.id = node.id;
        self.ids.push(id_delta);

        let raw_lat = degrees_to_raw(node.lat);
        self.lats.push(raw_lat - self.state.lat);
        self.state.lat = raw_lat;

        let raw_lon = degrees_to_raw(node.lon);
        self.lons.push(raw_lon - self.state.lon);
        self.state.lon = raw_lon;

        for (key, value) in &node.tags {
            self.keys_vals.push(strings.get_or_insert(key) as i32);
            self.keys_vals.push(strings.get_or_insert(value) as i32);
        }
        self.keys_vals.push(0);

        if let Some(info) = &node.info {
            let dense_info = self.info.get_or_insert_with(|| {
                // This is the first node in the block carrying info; back-fill
                // filler entries for every info-less node seen before it so
                // the sub-arrays stay aligned with `ids`.
                let mut dense_info = DenseInfoEncoder::default();
                for _ in 0..nodes_before_this_one {
                    dense_info.push_default();
                }
                dense_info
            });

            dense_info.version.push(info.version.unwrap_or(-1));

            let timestamp_raw = info.timestamp.map(millis_to_raw).unwrap_or(0);
            dense_info.timestamp.push(timestamp_raw - self.state.timestamp);
            self.state.timestamp = timestamp_raw;

            let changeset = info.changeset.unwrap_or(0);
            dense_info.changeset.push(changeset - self.state.changeset);
            self.state.changeset = changeset;

            let uid = info.uid.unwrap_or(0);
            dense_info.uid.push(uid - self.state.uid);
            self.state.uid = uid;

            let user_sid = info
                .username
                .as_deref()
                .map(|username| strings.get_or_insert(username) as i64)
                .unwrap_or(0);
            dense_info.user_sid.push((user_sid - self.state.user_sid) as i32);
            self.state.user_sid = user_sid;

            dense_info.visible.push(info.visible);
        } else if let Some(dense_info) = &mut self.info {
            // A prior node in this block carried info but this one
            // doesn't; keep the parallel arrays aligned with zero-delta
            // entries rather than breaking the index correspondence.
            dense_info.push_default();
        }
    }

    fn estimated_size(&self) -> usize {
        self.ids.len() * 24 + self.keys_vals.len() * 4
    }

    fn into_dense_nodes(self) -> pbf::DenseNodes {
        pbf::DenseNodes {
            id: self.ids,
            denseinfo: self.info.map(|info| pbf::DenseInfo {
                version: info.version,
                timestamp: info.timestamp,
                changeset: info.changeset,
                uid: info.uid,
                user_sid: info.user_sid,
                visible: info.visible,
            }),
            lat: self.lats,
            lon: self.lons,
            keys_vals: self.keys_vals,
        }
    }
}

/// Accumulates entities into a single `PrimitiveBlock`, sharing one
/// string table and delta-encoding dense nodes, way refs and relation
/// member ids as they're added.
///
/// `write()` is terminal: it may be called once, after which any further
/// call on this encoder — `add_*` or `write` again — returns
/// [`Error::Consumed`].
#[derive(Default)]
pub struct PrimitiveBlockEncoder {
    strings: StringTableBuilder,
    dense_nodes: DenseNodeEncoder,
    ways: Vec<pbf::Way>,
    relations: Vec<pbf::Relation>,
    changesets: Vec<pbf::ChangeSet>,
    consumed: bool,
}

impl PrimitiveBlockEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn check_not_consumed(&self) -> Result<(), Error> {
        if self.consumed {
            Err(Error::Consumed)
        } else {
            Ok(())
        }
    }

    /// Adds one node, dense-encoded against the running delta state.
    pub fn add_node(&mut self, node: &Node) -> Result<(), Error> {
        self.check_not_consumed()?;
        self.dense_nodes.push(node, &mut self.strings);
        Ok(())
    }

    pub fn add_way(&mut self, way: &Way) -> Result<(), Error> {
        self.check_not_consumed()?;

        let (keys, vals) = encode_tags(&way.tags, &mut self.strings);
        let info = way.info.as_ref().map(|info| encode_info(info, &mut self.strings));

        let mut acc: i64 = 0;
        let refs = way
            .nodes
            .iter()
            .map(|&id| {
                let delta = id - acc;
                acc = id;
                delta
            })
            .collect();

        self.ways.push(pbf::Way {
            id: way.id,
            keys,
            vals,
            info,
            refs,
        });

        Ok(())
    }

    pub fn add_relation(&mut self, relation: &Relation) -> Result<(), Error> {
        self.check_not_consumed()?;

        let (keys, vals) = encode_tags(&relation.tags, &mut self.strings);
        let info = relation.info.as_ref().map(|info| encode_info(info, &mut self.strings));

        let mut acc: i64 = 0;
        let mut roles_sid = Vec::with_capacity(relation.members.len());
        let mut memids = Vec::with_capacity(relation.members.len());
        let mut types = Vec::with_capacity(relation.members.len());

        for Member { member_ref, role, member_type } in &relation.members {
            roles_sid.push(self.strings.get_or_insert(role) as i32);
            memids.push(member_ref - acc);
            acc = *member_ref;
            types.push(encode_member_type(*member_type));
        }

        self.relations.push(pbf::Relation {
            id: relation.id,
            keys,
            vals,
            info,
            roles_sid,
            memids,
            types,
        });

        Ok(())
    }

    pub fn add_changeset(&mut self, changeset: &Changeset) -> Result<(), Error> {
        self.check_not_consumed()?;
        self.changesets.push(pbf::ChangeSet { id: changeset.id });
        Ok(())
    }

    /// Rough estimate (in bytes) of the block's serialized size so far.
    pub fn estimated_size(&self) -> usize {
        self.strings.estimated_size() + self.dense_nodes.estimated_size() + self.ways.len() * 32 + self.relations.len() * 48
    }

    /// Finishes the block, consuming its accumulated entities. Terminal:
    /// see the struct-level docs.
    pub fn write(&mut self) -> Result<pbf::PrimitiveBlock, Error> {
        self.check_not_consumed()?;
        self.consumed = true;

        let strings = std::mem::take(&mut self.strings);
        let dense_nodes = std::mem::take(&mut self.dense_nodes);
        let ways = std::mem::take(&mut self.ways);
        let relations = std::mem::take(&mut self.relations);
        let changesets = std::mem::take(&mut self.changesets);

        let mut groups = Vec::new();

        if dense_nodes.has_nodes {
            groups.push(pbf::PrimitiveGroup {
                dense: Some(dense_nodes.into_dense_nodes()),
                ..Default::default()
            });
        }

        if !ways.is_empty() {
            groups.push(pbf::PrimitiveGroup { ways, ..Default::default() });
        }

        if !relations.is_empty() {
            groups.push(pbf::PrimitiveGroup {
                relations,
                ..Default::default()
            });
        }

        if !changesets.is_empty() {
            groups.push(pbf::PrimitiveGroup {
                changesets,
                ..Default::default()
            });
        }

        Ok(pbf::PrimitiveBlock {
            stringtable: strings.into_table(),
            primitivegroup: groups,
            granularity: Some(GRANULARITY as i32),
            lat_offset: Some(0),
            lon_offset: Some(0),
            date_granularity: Some(DATE_GRANULARITY as i32),
        })
    }
}
