//! Geographic bounding boxes

use crate::element::LatLon;
use crate::error::{Error, Result};

/// A rectangular area between a south-west and a north-east corner.
///
/// Boxes crossing the 180th meridian are not supported; `min.longitude <= max.longitude` always
/// holds. Edges are inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// South-west corner
    pub min: LatLon,
    /// North-east corner
    pub max: LatLon,
}

impl BoundingBox {
    /// Create a bounding box from its edges
    ///
    /// # Errors
    /// Fails if a coordinate is out of range or a min edge lies beyond its max edge.
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Result<Self> {
        let invalid = |reason| Error::InvalidBoundingBox {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
            reason,
        };

        if !(-90.0..=90.0).contains(&min_lat) || !(-90.0..=90.0).contains(&max_lat) {
            return Err(invalid("latitude out of range"));
        }
        if !(-180.0..=180.0).contains(&min_lon) || !(-180.0..=180.0).contains(&max_lon) {
            return Err(invalid("longitude out of range"));
        }
        if min_lat > max_lat {
            return Err(invalid("min latitude above max latitude"));
        }
        if min_lon > max_lon {
            return Err(invalid("min longitude above max longitude"));
        }

        Ok(Self {
            min: LatLon::new(min_lat, min_lon),
            max: LatLon::new(max_lat, max_lon),
        })
    }

    /// Whether `position` lies inside or on the edge of this box
    pub fn contains(&self, position: LatLon) -> bool {
        position.latitude >= self.min.latitude
            && position.latitude <= self.max.latitude
            && position.longitude >= self.min.longitude
            && position.longitude <= self.max.longitude
    }
}
