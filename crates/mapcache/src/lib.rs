//! # mapcache
//!
//! Memory-bounded, read-through cache of map data in front of a slower store.
//!
//! ## Architecture
//! - **Nodes**: tile-partitioned LRU store, filled a whole tile at a time
//! - **Ways/Relations**: hash maps with their geometries
//! - **Reverse indexes**: node -> ways, element -> relations, answered without a fetch once resolved
//! - **Trimming**: ways and relations go when nothing they reference is cached anymore
//!
//! Every read takes a fetch callback that is invoked only on a miss; its error
//! type is passed through unchanged.

#![warn(missing_docs)]

mod cache;
mod config;
mod data;
mod stats;

pub use cache::{FetchedMapData, MapDataCache};
pub use config::MapDataCacheConfig;
pub use data::{MapDataUpdate, MapDataWithGeometry};
pub use stats::CacheStats;

pub use mapdata;
