//! # mapdata
//!
//! Map data model and the spatial node store behind the map data cache.
//!
//! ## Contents
//! - **Elements**: nodes, ways and relations keyed by [`ElementKey`]
//! - **Geometry**: caller-supplied shapes for ways and relations
//! - **Tiles**: slippy-map tile math for bounding boxes
//! - **Spatial store**: tile-partitioned, LRU-bounded node store ([`SpatialCache`])

#![warn(missing_docs)]

mod bbox;
mod element;
mod error;
mod geometry;
mod lru;
mod spatial;
mod tiles;

pub use bbox::BoundingBox;
pub use element::{Element, ElementKey, ElementType, LatLon, Node, Relation, RelationMember, Tags, Way};
pub use error::{Error, Result};
pub use geometry::{ElementGeometry, ElementGeometryEntry};
pub use lru::LruCache;
pub use spatial::{PointStore, SpatialCache};
pub use tiles::{check_zoom, min_tile_rect, TilePos, TilesRect, MAX_ZOOM};
