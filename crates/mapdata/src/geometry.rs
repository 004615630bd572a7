//! Element geometry as supplied by the caller
//!
//! Way and relation geometry is computed outside the cache and stored verbatim.
//! Node geometry is always just the node position.

use crate::element::{ElementKey, ElementType, LatLon, Node};

/// Shape of an element
#[derive(Debug, Clone, PartialEq)]
pub enum ElementGeometry {
    /// Single position, used for nodes
    Point(LatLon),
    /// One or more open lines
    Polylines(Vec<Vec<LatLon>>),
    /// One or more closed rings
    Polygons(Vec<Vec<LatLon>>),
}

/// Geometry tagged with the element it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct ElementGeometryEntry {
    /// Kind of the element
    pub element_type: ElementType,
    /// Id of the element
    pub element_id: i64,
    /// The geometry
    pub geometry: ElementGeometry,
}

impl ElementGeometryEntry {
    /// Create an entry
    pub fn new(element_type: ElementType, element_id: i64, geometry: ElementGeometry) -> Self {
        Self {
            element_type,
            element_id,
            geometry,
        }
    }

    /// Point geometry entry of a node
    pub fn from_node(node: &Node) -> Self {
        Self::new(
            ElementType::Node,
            node.id,
            ElementGeometry::Point(node.position),
        )
    }

    /// Key of the element this geometry belongs to
    pub fn key(&self) -> ElementKey {
        ElementKey::new(self.element_type, self.element_id)
    }
}
