//! Error types for mapdata

use thiserror::Error;

/// Result type alias for mapdata operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while constructing map data primitives and stores.
///
/// Cache misses are not errors; these only cover invalid input.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    /// Bounding box with a coordinate out of range or min above max
    #[error("Invalid bounding box [{min_lat}, {min_lon}, {max_lat}, {max_lon}]: {reason}")]
    InvalidBoundingBox {
        /// South edge
        min_lat: f64,
        /// West edge
        min_lon: f64,
        /// North edge
        max_lat: f64,
        /// East edge
        max_lon: f64,
        /// What is wrong with it
        reason: &'static str,
    },

    /// Tile zoom above the supported maximum
    #[error("Invalid tile zoom {0} (max 22)")]
    InvalidZoom(u8),

    /// Configuration value rejected
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
