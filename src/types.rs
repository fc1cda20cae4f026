use chrono::{DateTime, Utc};
use geo::{MultiPolygon, Polygon};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Revisit counter. Accumulation saturates at `u16::MAX`.
pub type Count = u16;

/// 2D revisit-count raster (rows x cols, north-up)
pub type CountGrid = Array2<Count>;

/// Geographic bounding box in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBox {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl GeoBox {
    /// Create a bounding box, rejecting inverted or non-finite bounds
    pub fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> RevisitResult<Self> {
        let bounds = [x_min, y_min, x_max, y_max];
        if bounds.iter().any(|v| !v.is_finite()) {
            return Err(RevisitError::Geometry(format!(
                "Non-finite bounding box: {:?}",
                bounds
            )));
        }
        if x_min > x_max || y_min > y_max {
            return Err(RevisitError::Geometry(format!(
                "Inverted bounding box: ({}, {}, {}, {})",
                x_min, y_min, x_max, y_max
            )));
        }
        Ok(Self { x_min, y_min, x_max, y_max })
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    /// Smallest box covering both
    pub fn union(&self, other: &GeoBox) -> GeoBox {
        GeoBox {
            x_min: self.x_min.min(other.x_min),
            y_min: self.y_min.min(other.y_min),
            x_max: self.x_max.max(other.x_max),
            y_max: self.y_max.max(other.y_max),
        }
    }

    pub fn contains(&self, other: &GeoBox) -> bool {
        self.x_min <= other.x_min
            && self.y_min <= other.y_min
            && self.x_max >= other.x_max
            && self.y_max >= other.y_max
    }

    /// Tight bounds of a `geo` geometry, `None` for empty geometries
    pub fn of<G: geo::BoundingRect<f64>>(geometry: &G) -> Option<GeoBox>
    where
        G::Output: Into<Option<geo::Rect<f64>>>,
    {
        let rect: Option<geo::Rect<f64>> = geometry.bounding_rect().into();
        rect.and_then(|r| GeoBox::new(r.min().x, r.min().y, r.max().x, r.max().y).ok())
    }
}

/// Integer pixel window, half-open on both axes: rows `[row_start, row_end)`,
/// columns `[col_start, col_end)`.
///
/// Indices are signed so a window lying partly outside the global grid keeps
/// its true offset until it is clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelWindow {
    pub row_start: i64,
    pub row_end: i64,
    pub col_start: i64,
    pub col_end: i64,
}

/// Scene footprint for one observation
#[derive(Debug, Clone)]
pub struct Footprint {
    pub scene_id: String,
    pub datetime: Option<DateTime<Utc>>,
    pub polygon: Polygon<f64>,
}

/// Footprints retrieved for a single tiling-index row
#[derive(Debug, Clone, Default)]
pub struct FootprintSet {
    pub tile_id: String,
    pub footprints: Vec<Footprint>,
}

impl FootprintSet {
    pub fn new(tile_id: impl Into<String>) -> Self {
        Self {
            tile_id: tile_id.into(),
            footprints: Vec::new(),
        }
    }

    /// Build a set from bare polygons (no scene metadata)
    pub fn from_polygons(tile_id: impl Into<String>, polygons: Vec<Polygon<f64>>) -> Self {
        let tile_id = tile_id.into();
        let footprints = polygons
            .into_iter()
            .enumerate()
            .map(|(i, polygon)| Footprint {
                scene_id: format!("{}-{}", tile_id, i),
                datetime: None,
                polygon,
            })
            .collect();
        Self { tile_id, footprints }
    }

    pub fn is_empty(&self) -> bool {
        self.footprints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.footprints.len()
    }

    pub fn polygons(&self) -> impl Iterator<Item = &Polygon<f64>> {
        self.footprints.iter().map(|f| &f.polygon)
    }

    /// Union of all footprint bounds
    pub fn total_bounds(&self) -> Option<GeoBox> {
        self.polygons()
            .filter_map(|p| GeoBox::of(p))
            .reduce(|acc, b| acc.union(&b))
    }
}

/// One row of the tiling index
#[derive(Debug, Clone)]
pub struct TileRecord {
    pub id: String,
    pub geometry: MultiPolygon<f64>,
}

impl TileRecord {
    pub fn bounds(&self) -> Option<GeoBox> {
        GeoBox::of(&self.geometry)
    }
}

/// Inclusive range of acquisition years
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearRange {
    pub min_year: i32,
    pub max_year: i32,
}

impl YearRange {
    pub fn new(min_year: i32, max_year: i32) -> RevisitResult<Self> {
        if min_year > max_year {
            return Err(RevisitError::InvalidInput(format!(
                "min_year {} is after max_year {}",
                min_year, max_year
            )));
        }
        Ok(Self { min_year, max_year })
    }

    /// RFC 3339 interval covering the whole range, as accepted by STAC `datetime`
    pub fn datetime_interval(&self) -> String {
        format!(
            "{}-01-01T00:00:00Z/{}-12-31T23:59:59Z",
            self.min_year, self.max_year
        )
    }
}

impl Default for YearRange {
    fn default() -> Self {
        Self {
            min_year: 2023,
            max_year: 2023,
        }
    }
}

/// Error types for revisit raster processing
#[derive(Debug, thiserror::Error)]
pub enum RevisitError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Geometry error: {0}")]
    Geometry(String),

    #[error("Allocation error: {0}")]
    Allocation(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Processing error: {0}")]
    Processing(String),

    #[cfg(feature = "geotiff")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

impl From<reqwest::Error> for RevisitError {
    fn from(e: reqwest::Error) -> Self {
        RevisitError::Network(e.to_string())
    }
}

/// Result type for revisit operations
pub type RevisitResult<T> = Result<T, RevisitError>;
