//! Geographic bounds type and operations.

use serde::{Deserialize, Serialize};

/// A geographic bounding rectangle in coordinate units of the source CRS.
///
/// For geographic CRS (EPSG:4326) the values are degrees; for projected CRS
/// they are meters. Axis convention is (west, south, east, north).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Bounds {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// Width in coordinate units.
    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    /// Height in coordinate units.
    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    /// Check if this bounds rectangle intersects another.
    pub fn intersects(&self, other: &Bounds) -> bool {
        self.west < other.east
            && self.east > other.west
            && self.south < other.north
            && self.north > other.south
    }

    /// Compute the intersection of two bounds rectangles.
    pub fn intersection(&self, other: &Bounds) -> Option<Bounds> {
        if !self.intersects(other) {
            return None;
        }

        Some(Bounds {
            west: self.west.max(other.west),
            south: self.south.max(other.south),
            east: self.east.min(other.east),
            north: self.north.min(other.north),
        })
    }

    /// Smallest rectangle covering both inputs. Used when accumulating a
    /// collection's spatial extent across items.
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            west: self.west.min(other.west),
            south: self.south.min(other.south),
            east: self.east.max(other.east),
            north: self.north.max(other.north),
        }
    }

    /// Check if a point is contained within this bounds rectangle.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.west && x <= self.east && y >= self.south && y <= self.north
    }

    /// As `[west, south, east, north]`, the order used in record extra fields.
    pub fn to_array(&self) -> [f64; 4] {
        [self.west, self.south, self.east, self.north]
    }

    pub fn from_array(a: [f64; 4]) -> Self {
        Self::new(a[0], a[1], a[2], a[3])
    }
}
