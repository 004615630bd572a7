//! Map elements: nodes (points), ways (lines) and relations (groups)

use std::fmt;

use ahash::AHashMap;

/// Tag set of an element. Unordered key/value strings.
pub type Tags = AHashMap<String, String>;

/// The three kinds of map elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ElementType {
    /// A point with a position
    Node,
    /// An ordered sequence of node ids
    Way,
    /// A collection of members of any element type
    Relation,
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::Node => write!(f, "node"),
            ElementType::Way => write!(f, "way"),
            ElementType::Relation => write!(f, "relation"),
        }
    }
}

/// Universal cache key of an element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ElementKey {
    /// Element kind
    pub element_type: ElementType,
    /// Element id, unique per kind
    pub id: i64,
}

impl ElementKey {
    /// Create a key from kind and id
    pub const fn new(element_type: ElementType, id: i64) -> Self {
        Self { element_type, id }
    }

    /// Key of the node with the given id
    pub const fn node(id: i64) -> Self {
        Self::new(ElementType::Node, id)
    }

    /// Key of the way with the given id
    pub const fn way(id: i64) -> Self {
        Self::new(ElementType::Way, id)
    }

    /// Key of the relation with the given id
    pub const fn relation(id: i64) -> Self {
        Self::new(ElementType::Relation, id)
    }
}

impl fmt::Display for ElementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.element_type, self.id)
    }
}

/// A WGS84 position in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLon {
    /// Latitude, north positive
    pub latitude: f64,
    /// Longitude, east positive
    pub longitude: f64,
}

impl LatLon {
    /// Create a position
    pub const fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// A point element
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Node id
    pub id: i64,
    /// Position
    pub position: LatLon,
    /// Tags
    pub tags: Tags,
    /// Edit version counter
    pub version: i32,
    /// Last edit, milliseconds since the epoch
    pub timestamp_edited: i64,
}

impl Node {
    /// Untagged node at version 1
    pub fn new(id: i64, position: LatLon) -> Self {
        Self {
            id,
            position,
            tags: Tags::new(),
            version: 1,
            timestamp_edited: 0,
        }
    }

    /// Cache key of this node
    pub fn key(&self) -> ElementKey {
        ElementKey::node(self.id)
    }
}

/// A line element. Node ids may repeat, e.g. a closed way starts and ends on the same node.
#[derive(Debug, Clone, PartialEq)]
pub struct Way {
    /// Way id
    pub id: i64,
    /// Ordered node ids
    pub node_ids: Vec<i64>,
    /// Tags
    pub tags: Tags,
    /// Edit version counter
    pub version: i32,
    /// Last edit, milliseconds since the epoch
    pub timestamp_edited: i64,
}

impl Way {
    /// Untagged way at version 1
    pub fn new(id: i64, node_ids: Vec<i64>) -> Self {
        Self {
            id,
            node_ids,
            tags: Tags::new(),
            version: 1,
            timestamp_edited: 0,
        }
    }

    /// Cache key of this way
    pub fn key(&self) -> ElementKey {
        ElementKey::way(self.id)
    }
}

/// One entry of a relation's member list
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationMember {
    /// Kind of the referenced element
    pub element_type: ElementType,
    /// Id of the referenced element
    pub ref_id: i64,
    /// Role of the member within the relation, may be empty
    pub role: String,
}

impl RelationMember {
    /// Create a member
    pub fn new(element_type: ElementType, ref_id: i64, role: impl Into<String>) -> Self {
        Self {
            element_type,
            ref_id,
            role: role.into(),
        }
    }

    /// Key of the referenced element
    pub fn key(&self) -> ElementKey {
        ElementKey::new(self.element_type, self.ref_id)
    }
}

/// A group element. May reference nodes, ways and other relations.
#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    /// Relation id
    pub id: i64,
    /// Ordered members
    pub members: Vec<RelationMember>,
    /// Tags
    pub tags: Tags,
    /// Edit version counter
    pub version: i32,
    /// Last edit, milliseconds since the epoch
    pub timestamp_edited: i64,
}

impl Relation {
    /// Untagged relation at version 1
    pub fn new(id: i64, members: Vec<RelationMember>) -> Self {
        Self {
            id,
            members,
            tags: Tags::new(),
            version: 1,
            timestamp_edited: 0,
        }
    }

    /// Cache key of this relation
    pub fn key(&self) -> ElementKey {
        ElementKey::relation(self.id)
    }
}

/// Any map element
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    /// A node
    Node(Node),
    /// A way
    Way(Way),
    /// A relation
    Relation(Relation),
}

impl Element {
    /// Kind of this element
    pub fn element_type(&self) -> ElementType {
        match self {
            Element::Node(_) => ElementType::Node,
            Element::Way(_) => ElementType::Way,
            Element::Relation(_) => ElementType::Relation,
        }
    }

    /// Id of this element
    pub fn id(&self) -> i64 {
        match self {
            Element::Node(node) => node.id,
            Element::Way(way) => way.id,
            Element::Relation(relation) => relation.id,
        }
    }

    /// Cache key of this element
    pub fn key(&self) -> ElementKey {
        ElementKey::new(self.element_type(), self.id())
    }

    /// The node, if this is one
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Element::Node(node) => Some(node),
            _ => None,
        }
    }

    /// The way, if this is one
    pub fn as_way(&self) -> Option<&Way> {
        match self {
            Element::Way(way) => Some(way),
            _ => None,
        }
    }

    /// The relation, if this is one
    pub fn as_relation(&self) -> Option<&Relation> {
        match self {
            Element::Relation(relation) => Some(relation),
            _ => None,
        }
    }
}

impl From<Node> for Element {
    fn from(node: Node) -> Self {
        Element::Node(node)
    }
}

impl From<Way> for Element {
    fn from(way: Way) -> Self {
        Element::Way(way)
    }
}

impl From<Relation> for Element {
    fn from(relation: Relation) -> Self {
        Element::Relation(relation)
    }
}
