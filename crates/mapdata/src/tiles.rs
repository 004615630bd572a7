//! Slippy-map tile math at a fixed zoom level
//!
//! Tiles are addressed Web Mercator style: `x` grows eastward from the antimeridian,
//! `y` grows southward from the north edge of the projection.

use std::f64::consts::PI;

use crate::bbox::BoundingBox;
use crate::element::LatLon;
use crate::error::{Error, Result};

/// Highest supported zoom level
pub const MAX_ZOOM: u8 = 22;

/// Web Mercator latitude limit
const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// Tile-aligned boxes touch their neighbours; shrink by this before mapping back to tiles
const NOT_THE_NEXT_TILE: f64 = 1e-7;

/// Validate a zoom level
pub fn check_zoom(zoom: u8) -> Result<()> {
    if zoom > MAX_ZOOM {
        return Err(Error::InvalidZoom(zoom));
    }
    Ok(())
}

/// Position of a tile at some zoom level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TilePos {
    /// Column, 0 at the antimeridian
    pub x: u32,
    /// Row, 0 at the north edge
    pub y: u32,
}

impl TilePos {
    /// Create a tile position
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Area covered by this tile
    pub fn as_bounding_box(&self, zoom: u8) -> BoundingBox {
        TilesRect::new(self.x, self.y, self.x, self.y).as_bounding_box(zoom)
    }
}

/// Inclusive rectangle of tiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TilesRect {
    /// Westmost column
    pub left: u32,
    /// Northmost row
    pub top: u32,
    /// Eastmost column
    pub right: u32,
    /// Southmost row
    pub bottom: u32,
}

impl TilesRect {
    /// Create a rectangle. Edges are inclusive, `left <= right` and `top <= bottom`.
    pub const fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Number of tiles in this rectangle
    pub fn size(&self) -> usize {
        (self.right - self.left + 1) as usize * (self.bottom - self.top + 1) as usize
    }

    /// Whether `tile` lies in this rectangle
    pub fn contains(&self, tile: TilePos) -> bool {
        (self.left..=self.right).contains(&tile.x) && (self.top..=self.bottom).contains(&tile.y)
    }

    /// All tiles of this rectangle, row by row
    pub fn tiles(&self) -> impl Iterator<Item = TilePos> {
        let (left, right) = (self.left, self.right);
        (self.top..=self.bottom).flat_map(move |y| (left..=right).map(move |x| TilePos::new(x, y)))
    }

    /// Area covered by this rectangle. Converting it back with
    /// [`BoundingBox::enclosing_tiles_rect`] yields this rectangle again.
    pub fn as_bounding_box(&self, zoom: u8) -> BoundingBox {
        BoundingBox {
            min: LatLon::new(tile_y_to_lat(self.bottom + 1, zoom), tile_x_to_lon(self.left, zoom)),
            max: LatLon::new(tile_y_to_lat(self.top, zoom), tile_x_to_lon(self.right + 1, zoom)),
        }
    }
}

/// Smallest rectangle containing all `tiles`, `None` if there are none
pub fn min_tile_rect(tiles: impl IntoIterator<Item = TilePos>) -> Option<TilesRect> {
    tiles.into_iter().fold(None, |rect, tile| {
        Some(match rect {
            None => TilesRect::new(tile.x, tile.y, tile.x, tile.y),
            Some(r) => TilesRect::new(
                r.left.min(tile.x),
                r.top.min(tile.y),
                r.right.max(tile.x),
                r.bottom.max(tile.y),
            ),
        })
    })
}

impl LatLon {
    /// Tile containing this position
    pub fn enclosing_tile(&self, zoom: u8) -> TilePos {
        TilePos::new(lon_to_tile_x(self.longitude, zoom), lat_to_tile_y(self.latitude, zoom))
    }
}

impl BoundingBox {
    /// Smallest rectangle of tiles covering this box
    pub fn enclosing_tiles_rect(&self, zoom: u8) -> TilesRect {
        let (min_lat, max_lat) = shrink(self.min.latitude, self.max.latitude);
        let (min_lon, max_lon) = shrink(self.min.longitude, self.max.longitude);
        let south_west = LatLon::new(min_lat, min_lon).enclosing_tile(zoom);
        let north_east = LatLon::new(max_lat, max_lon).enclosing_tile(zoom);
        TilesRect::new(south_west.x, north_east.y, north_east.x, south_west.y)
    }
}

fn shrink(min: f64, max: f64) -> (f64, f64) {
    if max - min > 2.0 * NOT_THE_NEXT_TILE {
        (min + NOT_THE_NEXT_TILE, max - NOT_THE_NEXT_TILE)
    } else {
        (min, max)
    }
}

fn tile_count(zoom: u8) -> f64 {
    (1u64 << zoom) as f64
}

fn lon_to_tile_x(lon: f64, zoom: u8) -> u32 {
    let n = tile_count(zoom);
    let x = ((lon + 180.0) / 360.0 * n).floor();
    x.clamp(0.0, n - 1.0) as u32
}

fn lat_to_tile_y(lat: f64, zoom: u8) -> u32 {
    let n = tile_count(zoom);
    let lat_rad = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT).to_radians();
    let y = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n).floor();
    y.clamp(0.0, n - 1.0) as u32
}

fn tile_x_to_lon(x: u32, zoom: u8) -> f64 {
    x as f64 / tile_count(zoom) * 360.0 - 180.0
}

fn tile_y_to_lat(y: u32, zoom: u8) -> f64 {
    let n = PI * (1.0 - 2.0 * y as f64 / tile_count(zoom));
    n.sinh().atan().to_degrees()
}
