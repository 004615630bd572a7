//! Tile-partitioned node store
//!
//! Nodes are only held for tiles that are marked as cached. A tile is cached as a
//! whole: once `replace_all_in_bbox` covered it, the store knows every node in it,
//! including the fact that there are none.

use ahash::{AHashMap, AHashSet};
use tracing::debug;

use crate::bbox::BoundingBox;
use crate::element::Node;
use crate::error::{Error, Result};
use crate::lru::LruCache;
use crate::tiles::{check_zoom, TilePos};

/// Capacity-bounded store of nodes keyed by id and partitioned into tiles.
///
/// This is the interface the map data cache consumes; [`SpatialCache`] is the
/// default implementation.
pub trait PointStore {
    /// Zoom level tiles are cut at
    fn tile_zoom(&self) -> u8;

    /// Node with the given id, if held
    fn get(&self, id: i64) -> Option<&Node>;

    /// Whether the node with the given id is held
    fn contains(&self, id: i64) -> bool {
        self.get(id).is_some()
    }

    /// All held nodes among `ids`, in no particular order
    fn get_all(&self, ids: &[i64]) -> Vec<Node> {
        ids.iter().filter_map(|id| self.get(*id).cloned()).collect()
    }

    /// All held nodes positioned in `bbox`. Counts as a use of the touched tiles.
    fn get_in_bbox(&mut self, bbox: &BoundingBox) -> Vec<Node>;

    /// Store updated nodes whose tile is cached and remove `deleted` ones
    fn update(&mut self, updated_or_added: Vec<Node>, deleted: &[i64]);

    /// Make `nodes` the complete content of all tiles covering `bbox`
    fn replace_all_in_bbox(&mut self, nodes: Vec<Node>, bbox: &BoundingBox);

    /// Currently cached tiles
    fn tiles(&self) -> AHashSet<TilePos>;

    /// Number of cached tiles
    fn size(&self) -> usize;

    /// Most tiles held at once, at least 1
    fn max_tiles(&self) -> usize;

    /// Evict tiles until at most `max_tiles` remain
    fn trim(&mut self, max_tiles: usize);

    /// Drop all tiles and nodes
    fn clear(&mut self);
}

/// LRU-ordered tile store holding at most `max_tiles` tiles
pub struct SpatialCache {
    tile_zoom: u8,
    tiles: LruCache<TilePos, AHashSet<i64>>,
    nodes: AHashMap<i64, Node>,
}

impl SpatialCache {
    /// Create an empty store
    ///
    /// # Arguments
    /// * `tile_zoom` - Zoom level tiles are cut at
    /// * `max_tiles` - Maximum number of tiles held at once
    /// * `initial_capacity` - Expected number of nodes
    pub fn new(tile_zoom: u8, max_tiles: usize, initial_capacity: usize) -> Result<Self> {
        check_zoom(tile_zoom)?;
        if max_tiles == 0 {
            return Err(Error::InvalidConfig("max_tiles must be greater than 0".to_string()));
        }

        Ok(Self {
            tile_zoom,
            tiles: LruCache::new(max_tiles),
            nodes: AHashMap::with_capacity(initial_capacity),
        })
    }

    fn tile_of(&self, node: &Node) -> TilePos {
        node.position.enclosing_tile(self.tile_zoom)
    }

    fn put_tile(&mut self, tile: TilePos, ids: AHashSet<i64>) {
        if let Some((evicted, ids)) = self.tiles.put(tile, ids) {
            debug!(x = evicted.x, y = evicted.y, nodes = ids.len(), "evicted tile");
            self.drop_nodes(ids);
        }
    }

    fn drop_nodes(&mut self, ids: AHashSet<i64>) {
        for id in ids {
            self.nodes.remove(&id);
        }
    }

    fn remove_node(&mut self, id: i64) -> Option<Node> {
        let node = self.nodes.remove(&id)?;
        let tile = self.tile_of(&node);
        if let Some(ids) = self.tiles.peek_mut(&tile) {
            ids.remove(&id);
        }
        Some(node)
    }

    /// Store the node if its tile is cached, otherwise forget it
    fn put_node(&mut self, node: Node) {
        self.remove_node(node.id);
        let tile = self.tile_of(&node);
        if let Some(ids) = self.tiles.peek_mut(&tile) {
            ids.insert(node.id);
            self.nodes.insert(node.id, node);
        }
    }
}

impl PointStore for SpatialCache {
    fn tile_zoom(&self) -> u8 {
        self.tile_zoom
    }

    fn get(&self, id: i64) -> Option<&Node> {
        self.nodes.get(&id)
    }

    fn get_in_bbox(&mut self, bbox: &BoundingBox) -> Vec<Node> {
        let rect = bbox.enclosing_tiles_rect(self.tile_zoom);
        // walk whichever is smaller, the rect or the cached tiles
        let candidates: Vec<TilePos> = if rect.size() <= self.tiles.len() {
            rect.tiles().filter(|tile| self.tiles.contains(tile)).collect()
        } else {
            self.tiles.keys().filter(|tile| rect.contains(**tile)).copied().collect()
        };

        let mut result = Vec::new();
        for tile in candidates {
            let Some(ids) = self.tiles.get(&tile) else {
                continue;
            };
            result.extend(
                ids.iter()
                    .filter_map(|id| self.nodes.get(id))
                    .filter(|node| bbox.contains(node.position))
                    .cloned(),
            );
        }
        result
    }

    fn update(&mut self, updated_or_added: Vec<Node>, deleted: &[i64]) {
        for node in updated_or_added {
            self.put_node(node);
        }
        for id in deleted {
            self.remove_node(*id);
        }
    }

    fn replace_all_in_bbox(&mut self, nodes: Vec<Node>, bbox: &BoundingBox) {
        let rect = bbox.enclosing_tiles_rect(self.tile_zoom);
        for tile in rect.tiles() {
            if let Some(ids) = self.tiles.remove(&tile) {
                self.drop_nodes(ids);
            }
        }
        for tile in rect.tiles() {
            self.put_tile(tile, AHashSet::new());
        }
        debug!(tiles = rect.size(), nodes = nodes.len(), "replaced tiles");
        for node in nodes {
            self.put_node(node);
        }
    }

    fn tiles(&self) -> AHashSet<TilePos> {
        self.tiles.keys().copied().collect()
    }

    fn size(&self) -> usize {
        self.tiles.len()
    }

    fn max_tiles(&self) -> usize {
        self.tiles.capacity()
    }

    fn trim(&mut self, max_tiles: usize) {
        let before = self.tiles.len();
        while self.tiles.len() > max_tiles {
            match self.tiles.pop_lru() {
                Some((_, ids)) => self.drop_nodes(ids),
                None => break,
            }
        }
        if before > self.tiles.len() {
            debug!(from = before, to = self.tiles.len(), "trimmed tiles");
        }
    }

    fn clear(&mut self) {
        self.tiles.clear();
        self.nodes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::LatLon;

    const ZOOM: u8 = 16;

    /// Bounding box of the `dx`/`dy`-th tile east/south of a fixed origin tile
    fn tile_bbox(dx: u32, dy: u32) -> BoundingBox {
        let origin = LatLon::new(53.55, 9.99).enclosing_tile(ZOOM);
        TilePos::new(origin.x + dx, origin.y + dy).as_bounding_box(ZOOM)
    }

    fn center(bbox: &BoundingBox) -> LatLon {
        LatLon::new(
            (bbox.min.latitude + bbox.max.latitude) / 2.0,
            (bbox.min.longitude + bbox.max.longitude) / 2.0,
        )
    }

    fn node_in(id: i64, bbox: &BoundingBox) -> Node {
        Node::new(id, center(bbox))
    }

    #[test]
    fn test_new_rejects_invalid() {
        assert!(matches!(SpatialCache::new(23, 4, 0), Err(Error::InvalidZoom(23))));
        assert!(matches!(SpatialCache::new(16, 0, 0), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_update_ignores_uncached_tiles() {
        let mut store = SpatialCache::new(ZOOM, 4, 16).unwrap();
        store.update(vec![node_in(1, &tile_bbox(0, 0))], &[]);

        assert!(store.get(1).is_none());
        assert_eq!(store.size(), 0);
    }

    #[test]
    fn test_replace_all_marks_tiles_cached() {
        let mut store = SpatialCache::new(ZOOM, 4, 16).unwrap();
        let bbox = tile_bbox(0, 0);
        store.replace_all_in_bbox(vec![node_in(1, &bbox)], &bbox);

        assert_eq!(store.size(), 1);
        assert!(store.contains(1));
        assert_eq!(store.get_in_bbox(&bbox).len(), 1);

        // now cached, so updates are taken
        store.update(vec![node_in(2, &bbox)], &[]);
        assert!(store.contains(2));
        assert_eq!(store.get_all(&[1, 2, 3]).len(), 2);
    }

    #[test]
    fn test_replace_all_drops_stale_nodes() {
        let mut store = SpatialCache::new(ZOOM, 4, 16).unwrap();
        let bbox = tile_bbox(0, 0);
        store.replace_all_in_bbox(vec![node_in(1, &bbox), node_in(2, &bbox)], &bbox);
        store.replace_all_in_bbox(vec![node_in(2, &bbox)], &bbox);

        assert!(!store.contains(1));
        assert!(store.contains(2));
    }

    #[test]
    fn test_empty_tile_stays_cached() {
        let mut store = SpatialCache::new(ZOOM, 4, 16).unwrap();
        let bbox = tile_bbox(0, 0);
        store.replace_all_in_bbox(Vec::new(), &bbox);

        assert_eq!(store.size(), 1);
        assert!(store.get_in_bbox(&bbox).is_empty());
    }

    #[test]
    fn test_move_node_between_tiles() {
        let mut store = SpatialCache::new(ZOOM, 4, 16).unwrap();
        let (a, b) = (tile_bbox(0, 0), tile_bbox(1, 0));
        store.replace_all_in_bbox(vec![node_in(1, &a)], &a);
        store.replace_all_in_bbox(Vec::new(), &b);

        store.update(vec![node_in(1, &b)], &[]);
        assert!(store.get_in_bbox(&a).is_empty());
        assert_eq!(store.get_in_bbox(&b)[0].id, 1);

        // moved out of the cached area
        store.update(vec![node_in(1, &tile_bbox(3, 3))], &[]);
        assert!(!store.contains(1));
    }

    #[test]
    fn test_delete() {
        let mut store = SpatialCache::new(ZOOM, 4, 16).unwrap();
        let bbox = tile_bbox(0, 0);
        store.replace_all_in_bbox(vec![node_in(1, &bbox), node_in(2, &bbox)], &bbox);
        store.update(Vec::new(), &[1]);

        assert!(!store.contains(1));
        assert_eq!(store.get_all(&[1, 2]).len(), 1);
    }

    #[test]
    fn test_get_in_bbox_filters_by_position() {
        let mut store = SpatialCache::new(ZOOM, 4, 16).unwrap();
        let bbox = tile_bbox(0, 0);
        let corner = Node::new(2, LatLon::new(bbox.max.latitude - 1e-6, bbox.min.longitude + 1e-6));
        store.replace_all_in_bbox(vec![node_in(1, &bbox), corner], &bbox);

        let inner = BoundingBox::new(
            bbox.min.latitude,
            bbox.min.longitude,
            center(&bbox).latitude + 1e-6,
            center(&bbox).longitude + 1e-6,
        )
        .unwrap();
        let found = store.get_in_bbox(&inner);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 1);
    }

    #[test]
    fn test_capacity_evicts_least_recently_used_tile() {
        let mut store = SpatialCache::new(ZOOM, 2, 16).unwrap();
        let (a, b, c) = (tile_bbox(0, 0), tile_bbox(1, 0), tile_bbox(2, 0));
        store.replace_all_in_bbox(vec![node_in(1, &a)], &a);
        store.replace_all_in_bbox(vec![node_in(2, &b)], &b);
        store.get_in_bbox(&a);
        store.replace_all_in_bbox(vec![node_in(3, &c)], &c);

        assert_eq!(store.size(), 2);
        assert!(store.contains(1));
        assert!(!store.contains(2));
        assert!(store.contains(3));
    }

    #[test]
    fn test_trim() {
        let mut store = SpatialCache::new(ZOOM, 8, 16).unwrap();
        let (a, b, c) = (tile_bbox(0, 0), tile_bbox(1, 0), tile_bbox(2, 0));
        store.replace_all_in_bbox(vec![node_in(1, &a)], &a);
        store.replace_all_in_bbox(vec![node_in(2, &b)], &b);
        store.replace_all_in_bbox(vec![node_in(3, &c)], &c);

        store.trim(1);
        assert_eq!(store.size(), 1);
        assert_eq!(store.tiles().into_iter().next(), Some(c.enclosing_tiles_rect(ZOOM).tiles().next().unwrap()));
        assert_eq!(store.get_all(&[1, 2, 3]).len(), 1);
        assert!(store.contains(3));

        store.clear();
        assert_eq!(store.size(), 0);
        assert_eq!(store.max_tiles(), 8);
        assert!(!store.contains(3));
    }
}
