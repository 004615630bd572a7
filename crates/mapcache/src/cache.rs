//! MapDataCache: read-through cache of nodes, ways, relations and their geometry
//!
//! Nodes live in a tile-partitioned [`PointStore`]. Ways, relations and their
//! geometries live in plain hash maps, together with two reverse indexes:
//! node id -> ids of ways containing it, and element key -> ids of relations
//! having it as a member.
//!
//! A reverse index entry, once present, is a complete list. Entries are created
//! either by a reverse lookup that fetched the full list, or for subjects that are
//! present in the cache while a referencing way or relation is stored. A present
//! node belongs to a fully cached tile, so every way touching it came with that tile.

use ahash::{AHashMap, AHashSet};
use mapdata::{
    min_tile_rect, BoundingBox, Element, ElementGeometry, ElementGeometryEntry, ElementKey,
    ElementType, Node, PointStore, Relation, RelationMember, Result, SpatialCache, TilePos, Way,
};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::MapDataCacheConfig;
use crate::data::{MapDataUpdate, MapDataWithGeometry};
use crate::stats::CacheStats;

/// Elements and geometries returned by a bounding box fetch
pub type FetchedMapData = (Vec<Element>, Vec<ElementGeometryEntry>);

/// Map data cache in front of a slower store.
///
/// All fetch callbacks run while the cache lock is held. They must not call back
/// into the same cache, or they deadlock.
pub struct MapDataCache<S = SpatialCache> {
    state: Mutex<CacheState<S>>,
    stats: CacheStats,
}

struct CacheState<S> {
    spatial: S,
    ways: AHashMap<i64, Way>,
    relations: AHashMap<i64, Relation>,
    way_geometries: AHashMap<i64, ElementGeometry>,
    relation_geometries: AHashMap<i64, ElementGeometry>,
    way_ids_by_node_id: AHashMap<i64, Vec<i64>>,
    relation_ids_by_element_key: AHashMap<ElementKey, Vec<i64>>,
}

impl MapDataCache<SpatialCache> {
    /// Create a cache backed by a [`SpatialCache`] node store
    pub fn new(config: &MapDataCacheConfig) -> Result<Self> {
        config.validate()?;
        let spatial = SpatialCache::new(config.tile_zoom, config.max_tiles, config.initial_capacity)?;
        Ok(Self::with_point_store(spatial, config.initial_capacity))
    }
}

impl<S: PointStore> MapDataCache<S> {
    /// Create a cache on top of any node store. A viewport fill trims the cache
    /// once the store reaches its [`PointStore::max_tiles`].
    ///
    /// # Arguments
    /// * `spatial` - Node store
    /// * `initial_capacity` - Expected number of nodes
    pub fn with_point_store(spatial: S, initial_capacity: usize) -> Self {
        // observed ratios: ~80% of elements are nodes, about every second node is
        // part of a way, more than 90% of elements are in no relation
        let ways = initial_capacity / 6;
        let relations = initial_capacity / 10;

        Self {
            state: Mutex::new(CacheState {
                spatial,
                ways: AHashMap::with_capacity(ways),
                relations: AHashMap::with_capacity(relations),
                way_geometries: AHashMap::with_capacity(ways),
                relation_geometries: AHashMap::with_capacity(relations),
                way_ids_by_node_id: AHashMap::with_capacity(initial_capacity / 2),
                relation_ids_by_element_key: AHashMap::with_capacity(relations),
            }),
            stats: CacheStats::new(),
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Tile count at which a viewport fill trims the cache
    pub fn max_tiles(&self) -> usize {
        self.state.lock().spatial.max_tiles()
    }

    /// Number of tiles currently held by the node store
    pub fn tile_count(&self) -> usize {
        self.state.lock().spatial.size()
    }

    /// Zoom level of the node store tiles
    pub fn tile_zoom(&self) -> u8 {
        self.state.lock().spatial.tile_zoom()
    }

    /// Apply a batch of edits.
    ///
    /// Without a bounding box nodes are updated one by one. With one, the nodes in
    /// the update replace everything the node store held within it.
    pub fn update(&self, update: MapDataUpdate) {
        self.state.lock().apply_update(update);
    }

    /// Get an element, fetching it on a miss.
    ///
    /// Fetched ways and relations are cached. Fetched nodes are returned but not
    /// cached, nodes are only cached tile by tile. A fetched element whose key
    /// differs from the requested one is discarded.
    pub fn get_element<E>(
        &self,
        element_type: ElementType,
        id: i64,
        fetch: impl FnOnce(ElementType, i64) -> std::result::Result<Option<Element>, E>,
    ) -> std::result::Result<Option<Element>, E> {
        let key = ElementKey::new(element_type, id);
        let mut state = self.state.lock();
        if let Some(element) = state.cached_element(key) {
            self.stats.record_hits(1);
            return Ok(Some(element));
        }

        self.stats.record_misses(1);
        self.stats.record_fetch();
        let Some(element) = fetch(element_type, id)? else {
            return Ok(None);
        };
        if element.key() != key {
            warn!(requested = %key, received = %element.key(), "discarding fetched element");
            return Ok(None);
        }

        state.put_fetched(vec![element.clone()]);
        Ok(Some(element))
    }

    /// Get the geometry of an element, fetching it on a miss.
    ///
    /// Node geometry is the node position and is never fetched if the node is cached.
    pub fn get_geometry<E>(
        &self,
        element_type: ElementType,
        id: i64,
        fetch: impl FnOnce(ElementType, i64) -> std::result::Result<Option<ElementGeometry>, E>,
    ) -> std::result::Result<Option<ElementGeometry>, E> {
        let key = ElementKey::new(element_type, id);
        let mut state = self.state.lock();
        if let Some(geometry) = state.cached_geometry(key) {
            self.stats.record_hits(1);
            return Ok(Some(geometry));
        }

        self.stats.record_misses(1);
        self.stats.record_fetch();
        let geometry = fetch(element_type, id)?;
        if let Some(geometry) = &geometry {
            match element_type {
                ElementType::Node => {}
                ElementType::Way => {
                    state.way_geometries.insert(id, geometry.clone());
                }
                ElementType::Relation => {
                    state.relation_geometries.insert(id, geometry.clone());
                }
            }
        }
        Ok(geometry)
    }

    /// Get the elements with the given keys.
    ///
    /// Everything not cached is fetched in a single call. Fetched elements that
    /// were not asked for are discarded. The result is in no particular order.
    pub fn get_elements<E>(
        &self,
        keys: &[ElementKey],
        fetch: impl FnOnce(&[ElementKey]) -> std::result::Result<Vec<Element>, E>,
    ) -> std::result::Result<Vec<Element>, E> {
        let keys = unique(keys);
        let mut state = self.state.lock();

        let node_ids: Vec<i64> = keys
            .iter()
            .filter(|key| key.element_type == ElementType::Node)
            .map(|key| key.id)
            .collect();
        let mut result: Vec<Element> = state
            .spatial
            .get_all(&node_ids)
            .into_iter()
            .map(Element::Node)
            .collect();
        result.extend(
            keys.iter()
                .filter(|key| key.element_type != ElementType::Node)
                .filter_map(|key| state.cached_element(*key)),
        );

        self.stats.record_hits(result.len());
        if result.len() == keys.len() {
            return Ok(result);
        }

        let cached: AHashSet<ElementKey> = result.iter().map(Element::key).collect();
        let missing: Vec<ElementKey> = keys.into_iter().filter(|key| !cached.contains(key)).collect();
        self.stats.record_misses(missing.len());
        self.stats.record_fetch();
        debug!(missing = missing.len(), "fetching elements");

        let fetched = accept_requested(fetch(&missing)?, &missing, Element::key);
        state.put_fetched(fetched.clone());
        result.extend(fetched);
        Ok(result)
    }

    /// Get the geometries of the elements with the given keys.
    ///
    /// Works like [`get_elements`](Self::get_elements), but on the geometry caches.
    pub fn get_geometries<E>(
        &self,
        keys: &[ElementKey],
        fetch: impl FnOnce(&[ElementKey]) -> std::result::Result<Vec<ElementGeometryEntry>, E>,
    ) -> std::result::Result<Vec<ElementGeometryEntry>, E> {
        let keys = unique(keys);
        let mut state = self.state.lock();

        let node_ids: Vec<i64> = keys
            .iter()
            .filter(|key| key.element_type == ElementType::Node)
            .map(|key| key.id)
            .collect();
        let mut result: Vec<ElementGeometryEntry> = state
            .spatial
            .get_all(&node_ids)
            .iter()
            .map(ElementGeometryEntry::from_node)
            .collect();
        result.extend(
            keys.iter()
                .filter(|key| key.element_type != ElementType::Node)
                .filter_map(|key| {
                    let geometry = state.cached_geometry(*key)?;
                    Some(ElementGeometryEntry::new(key.element_type, key.id, geometry))
                }),
        );

        self.stats.record_hits(result.len());
        if result.len() == keys.len() {
            return Ok(result);
        }

        let cached: AHashSet<ElementKey> = result.iter().map(ElementGeometryEntry::key).collect();
        let missing: Vec<ElementKey> = keys.into_iter().filter(|key| !cached.contains(key)).collect();
        self.stats.record_misses(missing.len());
        self.stats.record_fetch();
        debug!(missing = missing.len(), "fetching geometries");

        let fetched = accept_requested(fetch(&missing)?, &missing, ElementGeometryEntry::key);
        for entry in &fetched {
            match entry.element_type {
                ElementType::Node => {}
                ElementType::Way => {
                    state.way_geometries.insert(entry.element_id, entry.geometry.clone());
                }
                ElementType::Relation => {
                    state.relation_geometries.insert(entry.element_id, entry.geometry.clone());
                }
            }
        }
        result.extend(fetched);
        Ok(result)
    }

    /// Get the nodes with the given ids. Missing nodes are fetched, but not cached.
    pub fn get_nodes<E>(
        &self,
        ids: &[i64],
        fetch: impl FnOnce(&[i64]) -> std::result::Result<Vec<Node>, E>,
    ) -> std::result::Result<Vec<Node>, E> {
        let ids = unique(ids);
        let state = self.state.lock();
        let mut result = state.spatial.get_all(&ids);

        self.stats.record_hits(result.len());
        if result.len() == ids.len() {
            return Ok(result);
        }

        let cached: AHashSet<i64> = result.iter().map(|node| node.id).collect();
        let missing: Vec<i64> = ids.into_iter().filter(|id| !cached.contains(id)).collect();
        self.stats.record_misses(missing.len());
        self.stats.record_fetch();

        result.extend(accept_requested(fetch(&missing)?, &missing, |node| node.id));
        Ok(result)
    }

    /// Get the ways with the given ids, fetching and caching the missing ones
    pub fn get_ways<E>(
        &self,
        ids: &[i64],
        fetch: impl FnOnce(&[i64]) -> std::result::Result<Vec<Way>, E>,
    ) -> std::result::Result<Vec<Way>, E> {
        let keys: Vec<ElementKey> = ids.iter().map(|id| ElementKey::way(*id)).collect();
        let elements = self.get_elements(&keys, |missing| {
            let ids: Vec<i64> = missing.iter().map(|key| key.id).collect();
            fetch(&ids).map(|ways| ways.into_iter().map(Element::Way).collect())
        })?;
        Ok(elements
            .into_iter()
            .filter_map(|element| match element {
                Element::Way(way) => Some(way),
                _ => None,
            })
            .collect())
    }

    /// Get the relations with the given ids, fetching and caching the missing ones
    pub fn get_relations<E>(
        &self,
        ids: &[i64],
        fetch: impl FnOnce(&[i64]) -> std::result::Result<Vec<Relation>, E>,
    ) -> std::result::Result<Vec<Relation>, E> {
        let keys: Vec<ElementKey> = ids.iter().map(|id| ElementKey::relation(*id)).collect();
        let elements = self.get_elements(&keys, |missing| {
            let ids: Vec<i64> = missing.iter().map(|key| key.id).collect();
            fetch(&ids).map(|relations| relations.into_iter().map(Element::Relation).collect())
        })?;
        Ok(elements
            .into_iter()
            .filter_map(|element| match element {
                Element::Relation(relation) => Some(relation),
                _ => None,
            })
            .collect())
    }

    /// Get all ways containing the given node.
    ///
    /// The list is fetched at most once per node; afterwards it is answered from the
    /// index, silently skipping ways that have since been evicted.
    pub fn get_ways_for_node<E>(
        &self,
        id: i64,
        fetch: impl FnOnce(i64) -> std::result::Result<Vec<Way>, E>,
    ) -> std::result::Result<Vec<Way>, E> {
        let mut state = self.state.lock();
        if state.way_ids_by_node_id.contains_key(&id) {
            self.stats.record_hits(1);
        } else {
            self.stats.record_misses(1);
            self.stats.record_fetch();
            let ways: Vec<Way> = fetch(id)?
                .into_iter()
                .filter(|way| {
                    let references = way.node_ids.contains(&id);
                    if !references {
                        warn!(node = id, way = way.id, "discarding fetched way not containing node");
                    }
                    references
                })
                .collect();

            let mut way_ids = Vec::with_capacity(ways.len());
            for way in &ways {
                push_unique(&mut way_ids, way.id);
            }
            state.put_fetched(ways.into_iter().map(Element::Way).collect());
            state.way_ids_by_node_id.insert(id, way_ids);
        }

        let state = &*state;
        Ok(state.way_ids_by_node_id[&id]
            .iter()
            .filter_map(|way_id| state.ways.get(way_id).cloned())
            .collect())
    }

    /// Get all relations having the given node as member
    pub fn get_relations_for_node<E>(
        &self,
        id: i64,
        fetch: impl FnOnce(i64) -> std::result::Result<Vec<Relation>, E>,
    ) -> std::result::Result<Vec<Relation>, E> {
        self.get_relations_for_element(ElementKey::node(id), || fetch(id))
    }

    /// Get all relations having the given way as member
    pub fn get_relations_for_way<E>(
        &self,
        id: i64,
        fetch: impl FnOnce(i64) -> std::result::Result<Vec<Relation>, E>,
    ) -> std::result::Result<Vec<Relation>, E> {
        self.get_relations_for_element(ElementKey::way(id), || fetch(id))
    }

    /// Get all relations having the given relation as member
    pub fn get_relations_for_relation<E>(
        &self,
        id: i64,
        fetch: impl FnOnce(i64) -> std::result::Result<Vec<Relation>, E>,
    ) -> std::result::Result<Vec<Relation>, E> {
        self.get_relations_for_element(ElementKey::relation(id), || fetch(id))
    }

    fn get_relations_for_element<E>(
        &self,
        key: ElementKey,
        fetch: impl FnOnce() -> std::result::Result<Vec<Relation>, E>,
    ) -> std::result::Result<Vec<Relation>, E> {
        let mut state = self.state.lock();
        if state.relation_ids_by_element_key.contains_key(&key) {
            self.stats.record_hits(1);
        } else {
            self.stats.record_misses(1);
            self.stats.record_fetch();
            let relations: Vec<Relation> = fetch()?
                .into_iter()
                .filter(|relation| {
                    let references = relation.members.iter().any(|member| member.key() == key);
                    if !references {
                        warn!(member = %key, relation = relation.id, "discarding fetched relation without member");
                    }
                    references
                })
                .collect();

            let mut relation_ids = Vec::with_capacity(relations.len());
            for relation in &relations {
                push_unique(&mut relation_ids, relation.id);
            }
            state.put_fetched(relations.into_iter().map(Element::Relation).collect());
            state.relation_ids_by_element_key.insert(key, relation_ids);
        }

        let state = &*state;
        Ok(state.relation_ids_by_element_key[&key]
            .iter()
            .filter_map(|relation_id| state.relations.get(relation_id).cloned())
            .collect())
    }

    /// Get all elements and geometries in `bbox`: every node in it, every way with at
    /// least one of those nodes and every relation with at least one of those nodes
    /// or ways as member.
    ///
    /// Tiles not cached yet are fetched with a single call covering all of them. If
    /// the fill brings the node store to its tile limit, the cache is trimmed to 90%
    /// of it.
    pub fn get_map_data_with_geometry<E>(
        &self,
        bbox: &BoundingBox,
        fetch: impl FnOnce(&BoundingBox) -> std::result::Result<FetchedMapData, E>,
    ) -> std::result::Result<MapDataWithGeometry, E> {
        let mut state = self.state.lock();
        let zoom = state.spatial.tile_zoom();
        let cached_tiles = state.spatial.tiles();
        let tiles_to_fetch: Vec<TilePos> = bbox
            .enclosing_tiles_rect(zoom)
            .tiles()
            .filter(|tile| !cached_tiles.contains(tile))
            .collect();

        let Some(rect) = min_tile_rect(tiles_to_fetch.iter().copied()) else {
            self.stats.record_hits(1);
            let nodes = state.spatial.get_in_bbox(bbox);
            let mut result = MapDataWithGeometry::new(*bbox);
            state.collect_map_data(nodes, &mut result);
            return Ok(result);
        };

        self.stats.record_misses(1);
        self.stats.record_fetch();
        let fetch_bbox = rect.as_bounding_box(zoom);
        debug!(tiles = tiles_to_fetch.len(), area = rect.size(), "fetching map data");
        let (elements, geometries) = fetch(&fetch_bbox)?;

        let mut result = MapDataWithGeometry::new(*bbox);
        if fetch_bbox == *bbox {
            for element in &elements {
                result.put(element.clone());
            }
            for geometry in &geometries {
                result.put_geometry(geometry.clone());
            }
            state.apply_update(MapDataUpdate {
                deleted: Vec::new(),
                elements,
                geometries,
                bbox: Some(fetch_bbox),
            });
        } else {
            // the fill replaces every tile in rect and may evict any tile, so take
            // cached nodes outside rect now and the rest straight from the fetch
            let kept: Vec<Node> = state
                .spatial
                .get_in_bbox(bbox)
                .into_iter()
                .filter(|node| !rect.contains(node.position.enclosing_tile(zoom)))
                .collect();
            collect_fetched_map_data(&elements, &geometries, &mut result);
            state.apply_update(MapDataUpdate {
                deleted: Vec::new(),
                elements,
                geometries,
                bbox: Some(fetch_bbox),
            });
            state.collect_map_data(kept, &mut result);
        }

        let max_tiles = state.spatial.max_tiles();
        if state.spatial.size() >= max_tiles {
            self.trim_locked(&mut state, trim_target(max_tiles));
        }
        Ok(result)
    }

    /// Reduce the node store to `tiles` tiles and drop all ways and relations that
    /// no longer reference anything in it
    pub fn trim(&self, tiles: usize) {
        let mut state = self.state.lock();
        self.trim_locked(&mut state, tiles);
    }

    /// Drop everything
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.spatial.clear();
        state.ways.clear();
        state.relations.clear();
        state.way_geometries.clear();
        state.relation_geometries.clear();
        state.way_ids_by_node_id.clear();
        state.relation_ids_by_element_key.clear();
        debug!("cleared map data cache");
    }

    fn trim_locked(&self, state: &mut CacheState<S>, tiles: usize) {
        let before = state.spatial.size();
        state.spatial.trim(tiles);
        let evicted_tiles = before.saturating_sub(state.spatial.size());
        let evicted_composites = state.trim_non_spatial();
        debug!(tiles, evicted_tiles, evicted_composites, "trimmed map data cache");
        self.stats.record_trim(evicted_tiles, evicted_composites);
    }
}

impl<S: PointStore> CacheState<S> {
    fn cached_element(&self, key: ElementKey) -> Option<Element> {
        match key.element_type {
            ElementType::Node => self.spatial.get(key.id).cloned().map(Element::Node),
            ElementType::Way => self.ways.get(&key.id).cloned().map(Element::Way),
            ElementType::Relation => self.relations.get(&key.id).cloned().map(Element::Relation),
        }
    }

    fn cached_geometry(&self, key: ElementKey) -> Option<ElementGeometry> {
        match key.element_type {
            ElementType::Node => self
                .spatial
                .get(key.id)
                .map(|node| ElementGeometry::Point(node.position)),
            ElementType::Way => self.way_geometries.get(&key.id).cloned(),
            ElementType::Relation => self.relation_geometries.get(&key.id).cloned(),
        }
    }

    fn apply_update(&mut self, update: MapDataUpdate) {
        let MapDataUpdate {
            deleted,
            elements,
            geometries,
            bbox,
        } = update;

        let mut nodes = Vec::new();
        let mut ways = Vec::new();
        let mut relations = Vec::new();
        for element in elements {
            match element {
                Element::Node(node) => nodes.push(node),
                Element::Way(way) => ways.push(way),
                Element::Relation(relation) => relations.push(relation),
            }
        }

        // nodes
        let deleted_node_ids: Vec<i64> = deleted
            .iter()
            .filter(|key| key.element_type == ElementType::Node)
            .map(|key| key.id)
            .collect();
        let updated_node_ids: Vec<i64> = nodes.iter().map(|node| node.id).collect();
        let previously_present: AHashSet<i64> = updated_node_ids
            .iter()
            .copied()
            .filter(|id| self.spatial.contains(*id))
            .collect();
        match bbox {
            None => self.spatial.update(nodes, &deleted_node_ids),
            Some(bbox) => {
                if !deleted_node_ids.is_empty() {
                    self.spatial.update(Vec::new(), &deleted_node_ids);
                }
                self.spatial.replace_all_in_bbox(nodes, &bbox);
            }
        }
        let newly_present_nodes: AHashSet<i64> = updated_node_ids
            .into_iter()
            .filter(|id| !previously_present.contains(id) && self.spatial.contains(*id))
            .collect();

        // deletions
        for key in &deleted {
            self.remove_element(*key);
        }

        // geometries
        for entry in geometries {
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

        // ways, then relations, so way members of relations count as present
        let mut newly_cached = self.put_ways(ways);
        newly_cached.extend(self.put_relations(relations));
        self.index_newly_present(&newly_present_nodes, &newly_cached);
    }

    /// Cache fetched ways and relations. Nodes are only cached per tile.
    fn put_fetched(&mut self, elements: Vec<Element>) {
        let mut ways = Vec::new();
        let mut relations = Vec::new();
        for element in elements {
            match element {
                Element::Node(_) => {}
                Element::Way(way) => ways.push(way),
                Element::Relation(relation) => relations.push(relation),
            }
        }
        let mut newly_cached = self.put_ways(ways);
        newly_cached.extend(self.put_relations(relations));
        self.index_newly_present(&AHashSet::new(), &newly_cached);
    }

    /// Remove an element with everything it contributed to the reverse indexes and
    /// the index entry about itself
    fn remove_element(&mut self, key: ElementKey) {
        match key.element_type {
            ElementType::Node => {
                self.way_ids_by_node_id.remove(&key.id);
            }
            ElementType::Way => {
                if let Some(way) = self.ways.remove(&key.id) {
                    self.unindex_way(&way);
                }
                self.way_geometries.remove(&key.id);
            }
            ElementType::Relation => {
                if let Some(relation) = self.relations.remove(&key.id) {
                    self.unindex_relation(&relation);
                }
                self.relation_geometries.remove(&key.id);
            }
        }
        self.relation_ids_by_element_key.remove(&key);
    }

    /// Store ways, returning the keys of those that were not cached before
    fn put_ways(&mut self, ways: Vec<Way>) -> Vec<ElementKey> {
        let mut added = Vec::new();
        for way in ways {
            match self.ways.remove(&way.id) {
                Some(old) => self.unindex_way(&old),
                None => added.push(way.key()),
            }
            self.index_way(&way);
            self.ways.insert(way.id, way);
        }
        added
    }

    fn index_way(&mut self, way: &Way) {
        for node_id in &way.node_ids {
            if self.spatial.contains(*node_id) {
                push_unique(self.way_ids_by_node_id.entry(*node_id).or_default(), way.id);
            } else if let Some(way_ids) = self.way_ids_by_node_id.get_mut(node_id) {
                // a resolved entry has to stay complete
                push_unique(way_ids, way.id);
            }
        }
    }

    fn unindex_way(&mut self, way: &Way) {
        for node_id in &way.node_ids {
            if let Some(way_ids) = self.way_ids_by_node_id.get_mut(node_id) {
                way_ids.retain(|id| *id != way.id);
            }
        }
    }

    /// Store relations, returning the keys of those that were not cached before
    fn put_relations(&mut self, relations: Vec<Relation>) -> Vec<ElementKey> {
        let batch: AHashSet<i64> = relations.iter().map(|relation| relation.id).collect();
        let mut added = Vec::new();
        for relation in relations {
            match self.relations.remove(&relation.id) {
                Some(old) => self.unindex_relation(&old),
                None => added.push(relation.key()),
            }
            self.index_relation(&relation, &batch);
            self.relations.insert(relation.id, relation);
        }
        added
    }

    fn is_member_present(&self, member: &RelationMember, batch: &AHashSet<i64>) -> bool {
        match member.element_type {
            ElementType::Node => self.spatial.contains(member.ref_id),
            ElementType::Way => self.ways.contains_key(&member.ref_id),
            ElementType::Relation => {
                self.relations.contains_key(&member.ref_id) || batch.contains(&member.ref_id)
            }
        }
    }

    fn index_relation(&mut self, relation: &Relation, batch: &AHashSet<i64>) {
        for member in &relation.members {
            let key = member.key();
            if self.is_member_present(member, batch) {
                push_unique(self.relation_ids_by_element_key.entry(key).or_default(), relation.id);
            } else if let Some(relation_ids) = self.relation_ids_by_element_key.get_mut(&key) {
                push_unique(relation_ids, relation.id);
            }
        }
    }

    fn unindex_relation(&mut self, relation: &Relation) {
        for member in &relation.members {
            if let Some(relation_ids) = self.relation_ids_by_element_key.get_mut(&member.key()) {
                relation_ids.retain(|id| *id != relation.id);
            }
        }
    }

    /// Add already cached ways and relations to the index entries of subjects that
    /// just became present
    fn index_newly_present(&mut self, nodes: &AHashSet<i64>, composites: &[ElementKey]) {
        if !nodes.is_empty() {
            for way in self.ways.values() {
                for node_id in way.node_ids.iter().filter(|id| nodes.contains(*id)) {
                    push_unique(self.way_ids_by_node_id.entry(*node_id).or_default(), way.id);
                }
            }
        }

        if nodes.is_empty() && composites.is_empty() {
            return;
        }
        let subjects: AHashSet<ElementKey> = nodes
            .iter()
            .map(|id| ElementKey::node(*id))
            .chain(composites.iter().copied())
            .collect();
        for relation in self.relations.values() {
            for member in &relation.members {
                let key = member.key();
                if subjects.contains(&key) {
                    push_unique(self.relation_ids_by_element_key.entry(key).or_default(), relation.id);
                }
            }
        }
    }

    /// Add `nodes` and every cached way and relation found through them to `result`
    fn collect_map_data(&self, nodes: Vec<Node>, result: &mut MapDataWithGeometry) {
        let mut way_ids = AHashSet::new();
        let mut relation_ids = AHashSet::new();

        for node in nodes {
            if let Some(ids) = self.way_ids_by_node_id.get(&node.id) {
                way_ids.extend(ids.iter().copied());
            }
            if let Some(ids) = self.relation_ids_by_element_key.get(&node.key()) {
                relation_ids.extend(ids.iter().copied());
            }
            result.put(Element::Node(node));
        }

        for way_id in way_ids {
            let Some(way) = self.ways.get(&way_id) else {
                continue;
            };
            result.put(Element::Way(way.clone()));
            if let Some(geometry) = self.way_geometries.get(&way_id) {
                result.put_geometry(ElementGeometryEntry::new(ElementType::Way, way_id, geometry.clone()));
            }
            if let Some(ids) = self.relation_ids_by_element_key.get(&way.key()) {
                relation_ids.extend(ids.iter().copied());
            }
        }

        // relations of relations are not followed
        for relation_id in relation_ids {
            let Some(relation) = self.relations.get(&relation_id) else {
                continue;
            };
            result.put(Element::Relation(relation.clone()));
            if let Some(geometry) = self.relation_geometries.get(&relation_id) {
                result.put_geometry(ElementGeometryEntry::new(
                    ElementType::Relation,
                    relation_id,
                    geometry.clone(),
                ));
            }
        }
    }

    /// Drop ways and relations not anchored in the node store, and index entries
    /// about subjects no longer present. Returns the number of dropped elements.
    fn trim_non_spatial(&mut self) -> usize {
        let (way_ids, relation_ids) = self.anchored_composite_ids();
        let before = self.ways.len() + self.relations.len();

        self.ways.retain(|id, _| way_ids.contains(id));
        self.relations.retain(|id, _| relation_ids.contains(id));
        self.way_geometries.retain(|id, _| way_ids.contains(id));
        self.relation_geometries.retain(|id, _| relation_ids.contains(id));

        let spatial = &self.spatial;
        self.way_ids_by_node_id.retain(|id, _| spatial.contains(*id));
        self.relation_ids_by_element_key.retain(|key, _| match key.element_type {
            ElementType::Node => spatial.contains(key.id),
            ElementType::Way => way_ids.contains(&key.id),
            ElementType::Relation => relation_ids.contains(&key.id),
        });

        before - (self.ways.len() + self.relations.len())
    }

    /// Ids of ways with a node in the node store, and of relations with a member that
    /// is such a node or way, directly or through one level of sub-relation
    fn anchored_composite_ids(&self) -> (AHashSet<i64>, AHashSet<i64>) {
        let spatial = &self.spatial;
        let way_ids: AHashSet<i64> = self
            .ways
            .values()
            .filter(|way| way.node_ids.iter().any(|id| spatial.contains(*id)))
            .map(|way| way.id)
            .collect();

        let is_anchored = |member: &RelationMember| match member.element_type {
            ElementType::Node => spatial.contains(member.ref_id),
            ElementType::Way => way_ids.contains(&member.ref_id),
            ElementType::Relation => false,
        };
        let relation_ids: AHashSet<i64> = self
            .relations
            .values()
            .filter(|relation| {
                relation.members.iter().any(|member| {
                    is_anchored(member)
                        || (member.element_type == ElementType::Relation
                            && self
                                .relations
                                .get(&member.ref_id)
                                .is_some_and(|sub| sub.members.iter().any(is_anchored)))
                })
            })
            .map(|relation| relation.id)
            .collect();

        (way_ids, relation_ids)
    }
}

/// Add the fetched nodes inside the result's bbox to `result`, with the fetched ways
/// and relations found through them and their geometries
fn collect_fetched_map_data(
    elements: &[Element],
    geometries: &[ElementGeometryEntry],
    result: &mut MapDataWithGeometry,
) {
    let bbox = result.bounding_box;
    let node_ids: AHashSet<i64> = elements
        .iter()
        .filter_map(Element::as_node)
        .filter(|node| bbox.contains(node.position))
        .map(|node| node.id)
        .collect();
    let way_ids: AHashSet<i64> = elements
        .iter()
        .filter_map(Element::as_way)
        .filter(|way| way.node_ids.iter().any(|id| node_ids.contains(id)))
        .map(|way| way.id)
        .collect();
    // relations of relations are not followed
    let relation_ids: AHashSet<i64> = elements
        .iter()
        .filter_map(Element::as_relation)
        .filter(|relation| {
            relation.members.iter().any(|member| match member.element_type {
                ElementType::Node => node_ids.contains(&member.ref_id),
                ElementType::Way => way_ids.contains(&member.ref_id),
                ElementType::Relation => false,
            })
        })
        .map(|relation| relation.id)
        .collect();

    let selected = |key: ElementKey| match key.element_type {
        ElementType::Node => node_ids.contains(&key.id),
        ElementType::Way => way_ids.contains(&key.id),
        ElementType::Relation => relation_ids.contains(&key.id),
    };
    for element in elements.iter().filter(|element| selected(element.key())) {
        result.put(element.clone());
    }
    for entry in geometries.iter().filter(|entry| selected(entry.key())) {
        result.put_geometry(entry.clone());
    }
}

/// 90% of `max_tiles`, so the next fill does not trim again right away
fn trim_target(max_tiles: usize) -> usize {
    max_tiles / 10 * 9 + max_tiles % 10 * 9 / 10
}

fn push_unique(ids: &mut Vec<i64>, id: i64) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}

/// Deduplicate while keeping the first occurrence
fn unique<T: Copy + Eq + std::hash::Hash>(items: &[T]) -> Vec<T> {
    let mut seen = AHashSet::with_capacity(items.len());
    items.iter().copied().filter(|item| seen.insert(*item)).collect()
}

/// Keep fetched items whose key was requested, each key at most once
fn accept_requested<T, K>(fetched: Vec<T>, requested: &[K], key_of: impl Fn(&T) -> K) -> Vec<T>
where
    K: Copy + Eq + std::hash::Hash + std::fmt::Debug,
{
    let mut open: AHashSet<K> = requested.iter().copied().collect();
    fetched
        .into_iter()
        .filter(|item| {
            let key = key_of(item);
            let accepted = open.remove(&key);
            if !accepted {
                warn!(key = ?key, "discarding fetched item that was not requested");
            }
            accepted
        })
        .collect()
}
