//! Immutable value types for the OSM data model (component C6).
//!
//! These are constructed by [`crate::groups`] and [`crate::header`] and
//! handed to the caller's sink callbacks by move. Equality is structural;
//! nothing here references anything else in the model, so there are no
//! cyclic references to worry about.

/// A single `key=value` tag. Order within an entity's tag list matches file
/// order; callers that need set semantics can build a map from it.
pub type Tag = (String, String);

/// Optional metadata carried by nodes, ways and relations.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Info {
    pub version: Option<i32>,
    /// Milliseconds since the Unix epoch.
    pub timestamp: Option<i64>,
    pub changeset: Option<i64>,
    pub uid: Option<i32>,
    pub username: Option<String>,
    /// Defaults to `true` when absent from the wire format.
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: i64,
    pub tags: Vec<Tag>,
    pub info: Option<Info>,
    /// Degrees.
    pub lat: f64,
    /// Degrees.
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Way {
    pub id: i64,
    pub tags: Vec<Tag>,
    pub info: Option<Info>,
    /// Ordered node ids; duplicates allowed, direction is semantic.
    pub nodes: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberType {
    Node,
    Way,
    Relation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub member_ref: i64,
    pub role: String,
    pub member_type: MemberType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    pub id: i64,
    pub tags: Vec<Tag>,
    pub info: Option<Info>,
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Changeset {
    pub id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundBox {
    pub left: f64,
    pub right: f64,
    pub top: f64,
    pub bottom: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Header {
    pub required_features: Vec<String>,
    pub optional_features: Vec<String>,
    pub writing_program: Option<String>,
    pub source: Option<String>,
    pub osmosis_replication_timestamp: Option<i64>,
    pub osmosis_replication_sequence_number: Option<i64>,
    pub osmosis_replication_base_url: Option<String>,
    pub bbox: Option<BoundBox>,
}
