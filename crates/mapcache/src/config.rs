//! Cache configuration

use mapdata::{check_zoom, Error, Result};
use serde::Deserialize;

/// Sizing of a [`MapDataCache`](crate::MapDataCache).
///
/// Deserializes from any serde format; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MapDataCacheConfig {
    /// Zoom level the node store is partitioned at
    pub tile_zoom: u8,
    /// Maximum number of tiles held by the node store
    pub max_tiles: usize,
    /// Expected number of nodes; capacities of the other maps derive from it
    pub initial_capacity: usize,
}

impl Default for MapDataCacheConfig {
    fn default() -> Self {
        Self {
            tile_zoom: 16,
            max_tiles: 256,
            initial_capacity: 40_000,
        }
    }
}

impl MapDataCacheConfig {
    /// Check the configuration for values the cache cannot work with
    pub fn validate(&self) -> Result<()> {
        check_zoom(self.tile_zoom)?;
        if self.max_tiles == 0 {
            return Err(Error::InvalidConfig("max_tiles must be greater than 0".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(MapDataCacheConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_config_takes_defaults() {
        let config: MapDataCacheConfig = serde_json::from_str(r#"{ "max_tiles": 64 }"#).unwrap();
        assert_eq!(config.max_tiles, 64);
        assert_eq!(config.tile_zoom, 16);
        assert_eq!(config.initial_capacity, 40_000);
    }

    #[test]
    fn test_validate_rejects() {
        let config = MapDataCacheConfig {
            tile_zoom: 30,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(Error::InvalidZoom(30)));

        let config = MapDataCacheConfig {
            max_tiles: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
