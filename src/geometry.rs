//! Planar geometry for footprints and the area of interest.
//!
//! All coordinates are metres in a projected CRS shared by the AOI and every
//! scene. Reprojection is the imagery service's job.

use crate::types::{WaterError, WaterResult};
use geo::{Area, BooleanOps, BoundingRect, Contains, LineString, MultiPolygon, Rect};
use serde::{Deserialize, Serialize};

/// Planar point (metres)
pub type Point = geo::Point<f64>;

/// Overlap between AOI parts tolerated as shared-edge noise (m²)
const PART_OVERLAP_TOLERANCE_M2: f64 = 1.0;

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            max_x: self.max_x.max(other.max_x),
            min_y: self.min_y.min(other.min_y),
            max_y: self.max_y.max(other.max_y),
        }
    }
}

impl From<Rect<f64>> for BoundingBox {
    fn from(rect: Rect<f64>) -> Self {
        Self {
            min_x: rect.min().x,
            max_x: rect.max().x,
            min_y: rect.min().y,
            max_y: rect.max().y,
        }
    }
}

/// Simple polygon without holes, convex or not
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    shape: geo::Polygon<f64>,
    bounds: BoundingBox,
}

impl Polygon {
    /// Build a polygon from its exterior ring, in either orientation. A
    /// closing vertex equal to the first one is optional.
    pub fn new(mut exterior: Vec<Point>) -> WaterResult<Self> {
        if exterior.len() > 1 && exterior.first() == exterior.last() {
            exterior.pop();
        }
        if exterior.len() < 3 {
            return Err(WaterError::InvalidGeometry(format!(
                "Polygon needs at least 3 distinct vertices, got {}",
                exterior.len()
            )));
        }
        if exterior.iter().any(|p| !p.x().is_finite() || !p.y().is_finite()) {
            return Err(WaterError::InvalidGeometry(
                "Polygon has non-finite coordinates".to_string(),
            ));
        }

        let shape = geo::Polygon::new(LineString::from(exterior), vec![]);
        if shape.unsigned_area() <= 0.0 {
            return Err(WaterError::InvalidGeometry(
                "Polygon has zero area".to_string(),
            ));
        }
        let bounds = shape
            .bounding_rect()
            .map(BoundingBox::from)
            .ok_or_else(|| WaterError::InvalidGeometry("Polygon has no extent".to_string()))?;

        Ok(Self { shape, bounds })
    }

    /// Axis-aligned rectangle
    pub fn rectangle(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> WaterResult<Self> {
        Self::new(vec![
            Point::new(min_x, min_y),
            Point::new(max_x, min_y),
            Point::new(max_x, max_y),
            Point::new(min_x, max_y),
        ])
    }

    /// Number of distinct exterior vertices
    pub fn vertex_count(&self) -> usize {
        self.shape.exterior().0.len().saturating_sub(1)
    }

    pub fn as_geo(&self) -> &geo::Polygon<f64> {
        &self.shape
    }

    pub fn area_m2(&self) -> f64 {
        self.shape.unsigned_area()
    }

    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    /// Interior test; points on the boundary are outside
    pub fn contains(&self, p: Point) -> bool {
        self.shape.contains(&p)
    }
}

/// Area of interest: one or more polygons that may touch but not overlap
#[derive(Debug, Clone, PartialEq)]
pub struct Aoi {
    parts: Vec<Polygon>,
    shape: MultiPolygon<f64>,
    area_km2: f64,
    bounds: BoundingBox,
}

impl Aoi {
    pub fn new(parts: Vec<Polygon>) -> WaterResult<Self> {
        let first = parts.first().ok_or_else(|| {
            WaterError::Configuration("AOI must contain at least one polygon".to_string())
        })?;
        let bounds = parts
            .iter()
            .skip(1)
            .fold(first.bounds(), |acc, p| acc.union(&p.bounds()));

        for (i, a) in parts.iter().enumerate() {
            for (j, b) in parts.iter().enumerate().skip(i + 1) {
                if !a.bounds().intersects(&b.bounds()) {
                    continue;
                }
                let overlap = a.as_geo().intersection(b.as_geo()).unsigned_area();
                if overlap > PART_OVERLAP_TOLERANCE_M2 {
                    return Err(WaterError::Configuration(format!(
                        "AOI parts {} and {} overlap by {:.1} m²",
                        i, j, overlap
                    )));
                }
            }
        }

        let shape = MultiPolygon::new(parts.iter().map(|p| p.as_geo().clone()).collect());
        let area_m2 = shape.unsigned_area();
        if !(area_m2.is_finite() && area_m2 > 0.0) {
            return Err(WaterError::Configuration(format!(
                "AOI area must be positive, got {} m²",
                area_m2
            )));
        }

        Ok(Self {
            parts,
            shape,
            area_km2: area_m2 / 1e6,
            bounds,
        })
    }

    pub fn from_polygon(polygon: Polygon) -> WaterResult<Self> {
        Self::new(vec![polygon])
    }

    pub fn parts(&self) -> &[Polygon] {
        &self.parts
    }

    pub fn as_geo(&self) -> &MultiPolygon<f64> {
        &self.shape
    }

    pub fn area_km2(&self) -> f64 {
        self.area_km2
    }

    pub fn area_m2(&self) -> f64 {
        self.area_km2 * 1e6
    }

    pub fn bounds(&self) -> &BoundingBox {
        &self.bounds
    }

    pub fn contains(&self, p: Point) -> bool {
        self.shape.contains(&p)
    }
}

/// Geometric operations the pipeline needs from a geometry provider
pub trait GeometryService: Send + Sync {
    /// Area of the part of the AOI covered by `footprint`, in m²
    fn intersection_area_m2(&self, footprint: &Polygon, aoi: &Aoi) -> WaterResult<f64>;

    /// Maximum error tolerated by approximate operations, in metres
    fn error_margin_m(&self) -> f64;
}

/// Planar geometry backed by `geo` boolean operations
#[derive(Debug, Clone)]
pub struct PlanarGeometry {
    error_margin_m: f64,
}

impl PlanarGeometry {
    pub fn new(error_margin_m: f64) -> Self {
        Self { error_margin_m }
    }
}

impl Default for PlanarGeometry {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl GeometryService for PlanarGeometry {
    fn intersection_area_m2(&self, footprint: &Polygon, aoi: &Aoi) -> WaterResult<f64> {
        if !footprint.bounds().intersects(aoi.bounds()) {
            return Ok(0.0);
        }

        let footprint = MultiPolygon::new(vec![footprint.as_geo().clone()]);
        let total = footprint.intersection(aoi.as_geo()).unsigned_area();
        if !total.is_finite() {
            return Err(WaterError::InvalidGeometry(format!(
                "Footprint intersection produced area {}",
                total
            )));
        }

        // Slivers below the error margin are noise from touching edges
        if total <= self.error_margin_m * self.error_margin_m {
            Ok(0.0)
        } else {
            Ok(total)
        }
    }

    fn error_margin_m(&self) -> f64 {
        self.error_margin_m
    }
}
