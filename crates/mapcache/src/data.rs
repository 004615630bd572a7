//! Update payloads and viewport results

use ahash::AHashMap;
use mapdata::{
    BoundingBox, Element, ElementGeometry, ElementGeometryEntry, ElementKey, ElementType, Node,
    Relation, Way,
};

/// A batch of edits to apply to the cache
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapDataUpdate {
    /// Elements that no longer exist
    pub deleted: Vec<ElementKey>,
    /// Created or modified elements
    pub elements: Vec<Element>,
    /// New geometries of ways and relations
    pub geometries: Vec<ElementGeometryEntry>,
    /// Area this update is complete for. Nodes cached in it but missing from
    /// `elements` are dropped.
    pub bbox: Option<BoundingBox>,
}

impl MapDataUpdate {
    /// Update with the given created or modified elements
    pub fn elements(elements: impl IntoIterator<Item = Element>) -> Self {
        Self {
            elements: elements.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Update deleting the given elements
    pub fn deleted(deleted: impl IntoIterator<Item = ElementKey>) -> Self {
        Self {
            deleted: deleted.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Add geometries to this update
    pub fn with_geometries(mut self, geometries: impl IntoIterator<Item = ElementGeometryEntry>) -> Self {
        self.geometries.extend(geometries);
        self
    }

    /// Mark this update as complete for `bbox`
    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }
}

/// Elements and geometries found in a bounding box
#[derive(Debug, Clone)]
pub struct MapDataWithGeometry {
    /// The queried area
    pub bounding_box: BoundingBox,
    nodes: AHashMap<i64, Node>,
    ways: AHashMap<i64, Way>,
    relations: AHashMap<i64, Relation>,
    way_geometries: AHashMap<i64, ElementGeometry>,
    relation_geometries: AHashMap<i64, ElementGeometry>,
}

impl MapDataWithGeometry {
    /// Empty result for `bounding_box`
    pub fn new(bounding_box: BoundingBox) -> Self {
        Self {
            bounding_box,
            nodes: AHashMap::new(),
            ways: AHashMap::new(),
            relations: AHashMap::new(),
            way_geometries: AHashMap::new(),
            relation_geometries: AHashMap::new(),
        }
    }

    /// Add an element
    pub fn put(&mut self, element: Element) {
        match element {
            Element::Node(node) => {
                self.nodes.insert(node.id, node);
            }
            Element::Way(way) => {
                self.ways.insert(way.id, way);
            }
            Element::Relation(relation) => {
                self.relations.insert(relation.id, relation);
            }
        }
    }

    /// Add a way or relation geometry. Node geometries are derived and ignored.
    pub fn put_geometry(&mut self, entry: ElementGeometryEntry) {
        match entry.element_type {
            ElementType::Node => {}
            ElementType::Way => {
                self.way_geometries.insert(entry.element_id, entry.geometry);
            }
            ElementType::Relation => {
                self.relation_geometries.insert(entry.element_id, entry.geometry);
            }
        }
    }

    /// All nodes, in no particular order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// All ways, in no particular order
    pub fn ways(&self) -> impl Iterator<Item = &Way> {
        self.ways.values()
    }

    /// All relations, in no particular order
    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    /// Node with the given id
    pub fn get_node(&self, id: i64) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Way with the given id
    pub fn get_way(&self, id: i64) -> Option<&Way> {
        self.ways.get(&id)
    }

    /// Relation with the given id
    pub fn get_relation(&self, id: i64) -> Option<&Relation> {
        self.relations.get(&id)
    }

    /// Geometry of the given element. Ways and relations may lack one.
    pub fn geometry(&self, key: ElementKey) -> Option<ElementGeometry> {
        match key.element_type {
            ElementType::Node => self
                .nodes
                .get(&key.id)
                .map(|node| ElementGeometry::Point(node.position)),
            ElementType::Way => self.way_geometries.get(&key.id).cloned(),
            ElementType::Relation => self.relation_geometries.get(&key.id).cloned(),
        }
    }

    /// Keys of all contained elements
    pub fn keys(&self) -> impl Iterator<Item = ElementKey> + '_ {
        self.nodes
            .keys()
            .map(|id| ElementKey::node(*id))
            .chain(self.ways.keys().map(|id| ElementKey::way(*id)))
            .chain(self.relations.keys().map(|id| ElementKey::relation(*id)))
    }

    /// Number of contained elements
    pub fn len(&self) -> usize {
        self.nodes.len() + self.ways.len() + self.relations.len()
    }

    /// Whether no element is contained
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
