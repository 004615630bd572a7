//! Property tests for MapDataCache against a plain model of the applied edits

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::convert::Infallible;

use mapcache::mapdata::{
    BoundingBox, Element, ElementKey, ElementType, LatLon, Node, Relation, RelationMember,
    TilePos, Way,
};
use mapcache::{FetchedMapData, MapDataCache, MapDataCacheConfig, MapDataUpdate, MapDataWithGeometry};
use proptest::prelude::*;

const ZOOM: u8 = 16;
/// Nodes 1..=LOADED_NODES are in the cached tile, higher ids are not cached
const LOADED_NODES: i64 = 20;

fn tile() -> BoundingBox {
    let origin = LatLon::new(48.137, 11.575).enclosing_tile(ZOOM);
    TilePos::new(origin.x, origin.y).as_bounding_box(ZOOM)
}

fn loaded_cache() -> MapDataCache {
    let cache = MapDataCache::new(&MapDataCacheConfig {
        tile_zoom: ZOOM,
        max_tiles: 64,
        initial_capacity: 256,
    })
    .unwrap();

    let bbox = tile();
    let lat_step = (bbox.max.latitude - bbox.min.latitude) / (LOADED_NODES + 2) as f64;
    let lon_step = (bbox.max.longitude - bbox.min.longitude) / (LOADED_NODES + 2) as f64;
    let nodes = (1..=LOADED_NODES).map(|id| {
        let position = LatLon::new(
            bbox.min.latitude + lat_step * id as f64,
            bbox.min.longitude + lon_step * id as f64,
        );
        Element::from(Node::new(id, position))
    });
    cache.update(MapDataUpdate::elements(nodes).with_bbox(bbox));
    cache
}

fn no_fetch(_: &BoundingBox) -> Result<FetchedMapData, &'static str> {
    Err("unexpected fetch")
}

fn way_strategy() -> impl Strategy<Value = Way> {
    (100i64..110, prop::collection::vec(1i64..=30, 1..6)).prop_map(|(id, node_ids)| Way::new(id, node_ids))
}

fn member_strategy() -> impl Strategy<Value = RelationMember> {
    prop_oneof![
        (1i64..=30).prop_map(|id| RelationMember::new(ElementType::Node, id, "")),
        (100i64..110).prop_map(|id| RelationMember::new(ElementType::Way, id, "outer")),
        (200i64..206).prop_map(|id| RelationMember::new(ElementType::Relation, id, "subarea")),
    ]
}

fn relation_strategy() -> impl Strategy<Value = Relation> {
    (200i64..206, prop::collection::vec(member_strategy(), 1..4))
        .prop_map(|(id, members)| Relation::new(id, members))
}

fn update_strategy() -> impl Strategy<Value = MapDataUpdate> {
    (
        prop::collection::vec(way_strategy(), 0..4),
        prop::collection::vec(relation_strategy(), 0..3),
        prop::collection::vec((100i64..110).prop_map(ElementKey::way), 0..2),
        prop::collection::vec((200i64..206).prop_map(ElementKey::relation), 0..2),
    )
        .prop_map(|(ways, relations, deleted_ways, deleted_relations)| MapDataUpdate {
            deleted: deleted_ways.into_iter().chain(deleted_relations).collect(),
            elements: ways
                .into_iter()
                .map(Element::Way)
                .chain(relations.into_iter().map(Element::Relation))
                .collect(),
            geometries: Vec::new(),
            bbox: None,
        })
}

/// Ways and relations as they should be after applying `updates` in order
#[derive(Default)]
struct Model {
    ways: BTreeMap<i64, Way>,
    relations: BTreeMap<i64, Relation>,
}

impl Model {
    fn apply(&mut self, update: &MapDataUpdate) {
        for key in &update.deleted {
            match key.element_type {
                ElementType::Way => {
                    self.ways.remove(&key.id);
                }
                ElementType::Relation => {
                    self.relations.remove(&key.id);
                }
                ElementType::Node => {}
            }
        }
        for element in &update.elements {
            match element {
                Element::Way(way) => {
                    self.ways.insert(way.id, way.clone());
                }
                Element::Relation(relation) => {
                    self.relations.insert(relation.id, relation.clone());
                }
                Element::Node(_) => {}
            }
        }
    }

    /// Ways and relations a viewport over the whole cached tile has to return
    fn expected_in_tile(&self) -> (BTreeSet<i64>, BTreeSet<i64>) {
        let is_loaded = |id: i64| (1..=LOADED_NODES).contains(&id);
        let ways: BTreeSet<i64> = self
            .ways
            .values()
            .filter(|way| way.node_ids.iter().any(|id| is_loaded(*id)))
            .map(|way| way.id)
            .collect();
        let relations = self
            .relations
            .values()
            .filter(|relation| {
                relation.members.iter().any(|member| match member.element_type {
                    ElementType::Node => is_loaded(member.ref_id),
                    ElementType::Way => ways.contains(&member.ref_id),
                    ElementType::Relation => false,
                })
            })
            .map(|relation| relation.id)
            .collect();
        (ways, relations)
    }
}

#[derive(Debug, PartialEq)]
struct Summary {
    nodes: BTreeSet<i64>,
    ways: BTreeMap<i64, Way>,
    relations: BTreeMap<i64, Relation>,
}

fn summarize(data: &MapDataWithGeometry) -> Summary {
    Summary {
        nodes: data.nodes().map(|node| node.id).collect(),
        ways: data.ways().map(|way| (way.id, way.clone())).collect(),
        relations: data.relations().map(|relation| (relation.id, relation.clone())).collect(),
    }
}

/// Ways per node as answered by the cache, `None` where it would have to fetch
fn ways_per_node(cache: &MapDataCache) -> Vec<Option<BTreeSet<i64>>> {
    (1..=30)
        .map(|id| {
            cache
                .get_ways_for_node(id, |_| Err::<Vec<Way>, _>(()))
                .ok()
                .map(|ways| ways.into_iter().map(|way| way.id).collect())
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// A viewport over a cached tile returns every way touching its nodes and every
    /// relation with such a node or way as member, whatever order edits came in
    #[test]
    fn prop_viewport_matches_model(updates in prop::collection::vec(update_strategy(), 1..6)) {
        let cache = loaded_cache();
        let mut model = Model::default();
        for update in &updates {
            cache.update(update.clone());
            model.apply(update);
        }

        let data = cache.get_map_data_with_geometry(&tile(), no_fetch).unwrap();
        let summary = summarize(&data);
        let (ways, relations) = model.expected_in_tile();

        prop_assert_eq!(summary.nodes.len() as i64, LOADED_NODES);
        prop_assert_eq!(summary.ways.keys().copied().collect::<BTreeSet<_>>(), ways);
        prop_assert_eq!(summary.relations.keys().copied().collect::<BTreeSet<_>>(), relations);
        for (id, way) in &summary.ways {
            prop_assert_eq!(Some(way), model.ways.get(id));
        }
    }

    /// Applying every update twice leaves the cache as applying it once
    #[test]
    fn prop_update_is_idempotent(updates in prop::collection::vec(update_strategy(), 1..6)) {
        let once = loaded_cache();
        let twice = loaded_cache();
        for update in &updates {
            once.update(update.clone());
            twice.update(update.clone());
            twice.update(update.clone());
        }

        let data_once = once.get_map_data_with_geometry(&tile(), no_fetch).unwrap();
        let data_twice = twice.get_map_data_with_geometry(&tile(), no_fetch).unwrap();
        prop_assert_eq!(summarize(&data_once), summarize(&data_twice));
        prop_assert_eq!(ways_per_node(&once), ways_per_node(&twice));
    }

    /// A batch read fetches exactly the keys that are not cached, once, or not at all
    #[test]
    fn prop_get_elements_fetches_exactly_missing(
        cached in prop::collection::btree_set(100i64..120, 0..10),
        requested in prop::collection::vec(100i64..120, 0..15),
    ) {
        let cache = loaded_cache();
        cache.update(MapDataUpdate::elements(cached.iter().map(|id| Element::from(Way::new(*id, vec![1])))));

        let keys: Vec<ElementKey> = requested.iter().map(|id| ElementKey::way(*id)).collect();
        let calls = RefCell::new(Vec::new());
        let elements = cache
            .get_elements(&keys, |missing| {
                calls.borrow_mut().push(missing.to_vec());
                Ok::<_, Infallible>(missing.iter().map(|key| Element::from(Way::new(key.id, vec![2]))).collect())
            })
            .unwrap();

        let requested: BTreeSet<i64> = requested.into_iter().collect();
        let missing: BTreeSet<i64> = requested.difference(&cached).copied().collect();
        let calls = calls.into_inner();
        if missing.is_empty() {
            prop_assert!(calls.is_empty());
        } else {
            prop_assert_eq!(calls.len(), 1);
            prop_assert_eq!(calls[0].len(), missing.len());
            prop_assert_eq!(calls[0].iter().map(|key| key.id).collect::<BTreeSet<_>>(), missing);
        }
        prop_assert_eq!(elements.iter().map(Element::id).collect::<BTreeSet<_>>(), requested);
    }
}

#[test]
fn test_edit_session() {
    let cache = loaded_cache();
    let bbox = tile();

    cache.update(MapDataUpdate::elements([
        Way::new(100, vec![1, 2, 3]).into(),
        Relation::new(200, vec![RelationMember::new(ElementType::Way, 100, "outer")]).into(),
    ]));
    let data = cache.get_map_data_with_geometry(&bbox, no_fetch).unwrap();
    assert!(data.get_way(100).is_some());
    assert!(data.get_relation(200).is_some());

    // a node moves within the tile, the way is split
    let mut moved = data.get_node(2).unwrap().clone();
    moved.position.latitude += 0.0001;
    moved.version += 1;
    cache.update(MapDataUpdate {
        deleted: vec![ElementKey::relation(200)],
        elements: vec![
            moved.clone().into(),
            Way::new(100, vec![1, 2]).into(),
            Way::new(101, vec![2, 3]).into(),
        ],
        geometries: Vec::new(),
        bbox: None,
    });

    let data = cache.get_map_data_with_geometry(&bbox, no_fetch).unwrap();
    assert_eq!(data.get_node(2), Some(&moved));
    assert_eq!(data.get_way(100).map(|way| way.node_ids.clone()), Some(vec![1, 2]));
    assert!(data.get_way(101).is_some());
    assert!(data.get_relation(200).is_none());

    let ways_of_3 = cache.get_ways_for_node(3, |_| Err::<Vec<Way>, _>(())).unwrap();
    assert_eq!(ways_of_3, vec![Way::new(101, vec![2, 3])]);
    let relations_of_100 = cache
        .get_relations_for_way(100, |_| Err::<Vec<Relation>, _>(()))
        .unwrap();
    assert!(relations_of_100.is_empty());

    assert_eq!(cache.stats().fetches(), 0);
}
