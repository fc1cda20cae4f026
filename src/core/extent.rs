use crate::types::{GeoBox, RevisitError, RevisitResult, TileRecord};
use serde::{Deserialize, Serialize};

/// Overscan applied to the planned bounds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ExtentBuffer {
    /// Multiply every bound by a constant factor (e.g. 1.2).
    ///
    /// Crude: the margin grows with the distance from (0, 0), and bounds on
    /// the positive side of an axis move inwards when they are minima.
    Scale(f64),
    /// Pad every side by a fixed number of degrees
    Degrees(f64),
}

impl ExtentBuffer {
    pub fn apply(&self, bounds: &GeoBox) -> RevisitResult<GeoBox> {
        match *self {
            ExtentBuffer::Scale(factor) => {
                if !(factor.is_finite() && factor > 0.0) {
                    return Err(RevisitError::InvalidInput(format!(
                        "Extent scale factor must be positive, got {}",
                        factor
                    )));
                }
                GeoBox::new(
                    bounds.x_min * factor,
                    bounds.y_min * factor,
                    bounds.x_max * factor,
                    bounds.y_max * factor,
                )
            }
            ExtentBuffer::Degrees(pad) => {
                if !(pad.is_finite() && pad >= 0.0) {
                    return Err(RevisitError::InvalidInput(format!(
                        "Extent padding must be non-negative, got {}",
                        pad
                    )));
                }
                GeoBox::new(
                    bounds.x_min - pad,
                    bounds.y_min - pad,
                    bounds.x_max + pad,
                    bounds.y_max + pad,
                )
            }
        }
    }
}

/// Which geometries fix the global grid bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExtentSource {
    /// Bounds of the tiling index, known before any fetch
    #[default]
    TilingIndex,
    /// Bounds of the retrieved footprints; every fetch completes before planning
    Footprints,
}

/// Geographic bounds and pixel dimensions of the global grid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridExtent {
    pub bounds: GeoBox,
    pub resolution: f64,
    pub width: usize,
    pub height: usize,
}

impl GridExtent {
    /// North-west corner `(x_min, y_max)` every pixel window is measured from
    pub fn origin(&self) -> (f64, f64) {
        (self.bounds.x_min, self.bounds.y_max)
    }

    /// `width * height`, failing on overflow
    pub fn pixel_count(&self) -> RevisitResult<usize> {
        self.width.checked_mul(self.height).ok_or_else(|| {
            RevisitError::Allocation(format!(
                "Grid {}x{} overflows the address space",
                self.height, self.width
            ))
        })
    }

    /// GDAL-style affine transform, north-up, derived from bounds and size
    pub fn geo_transform(&self) -> [f64; 6] {
        [
            self.bounds.x_min,
            self.bounds.width() / self.width as f64,
            0.0,
            self.bounds.y_max,
            0.0,
            -self.bounds.height() / self.height as f64,
        ]
    }
}

/// Plan the global grid from the tiling index
pub fn plan_extent(
    tiles: &[TileRecord],
    resolution: f64,
    buffer: Option<ExtentBuffer>,
    max_pixels: Option<usize>,
) -> RevisitResult<GridExtent> {
    let bounds = tiles
        .iter()
        .filter_map(|t| t.bounds())
        .reduce(|acc, b| acc.union(&b))
        .ok_or_else(|| {
            RevisitError::InvalidInput("Tiling index has no usable geometry".to_string())
        })?;

    log::debug!("Tiling index bounds from {} tiles: {:?}", tiles.len(), bounds);
    plan_extent_from_bounds(bounds, resolution, buffer, max_pixels)
}

/// Plan the global grid from an already known bounding box
pub fn plan_extent_from_bounds(
    bounds: GeoBox,
    resolution: f64,
    buffer: Option<ExtentBuffer>,
    max_pixels: Option<usize>,
) -> RevisitResult<GridExtent> {
    if !(resolution.is_finite() && resolution > 0.0) {
        return Err(RevisitError::InvalidInput(format!(
            "Resolution must be a positive number of degrees, got {}",
            resolution
        )));
    }

    let bounds = match buffer {
        Some(b) => b.apply(&bounds)?,
        None => bounds,
    };

    let width_px = (bounds.width() / resolution).floor();
    let height_px = (bounds.height() / resolution).floor();
    if width_px < 1.0 || height_px < 1.0 {
        return Err(RevisitError::InvalidInput(format!(
            "Extent {:?} is smaller than one {}-degree pixel",
            bounds, resolution
        )));
    }
    if width_px > usize::MAX as f64 || height_px > usize::MAX as f64 {
        return Err(RevisitError::Allocation(format!(
            "Extent {:?} at resolution {} exceeds addressable size",
            bounds, resolution
        )));
    }

    let extent = GridExtent {
        bounds,
        resolution,
        width: width_px as usize,
        height: height_px as usize,
    };

    let pixels = extent.pixel_count()?;
    if let Some(limit) = max_pixels {
        if pixels > limit {
            return Err(RevisitError::Allocation(format!(
                "Planned grid {}x{} ({} pixels) exceeds limit of {} pixels",
                extent.height, extent.width, pixels, limit
            )));
        }
    }

    log::info!(
        "Planned global extent ({:.4}, {:.4}, {:.4}, {:.4}) at {} deg -> {}x{} pixels",
        bounds.x_min,
        bounds.y_min,
        bounds.x_max,
        bounds.y_max,
        resolution,
        extent.width,
        extent.height
    );

    Ok(extent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use geo::{polygon, MultiPolygon};

    fn tile(id: &str, x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> TileRecord {
        TileRecord {
            id: id.to_string(),
            geometry: MultiPolygon(vec![polygon![
                (x: x_min, y: y_min),
                (x: x_max, y: y_min),
                (x: x_max, y: y_max),
                (x: x_min, y: y_max),
            ]]),
        }
    }

    #[test]
    fn test_plan_from_tiles() {
        let tiles = vec![
            tile("A", -1.0, 0.0, 0.0, 1.0),
            tile("B", 0.0, -1.0, 1.0, 0.0),
        ];
        let extent = plan_extent(&tiles, 1.0, None, None).unwrap();
        assert_eq!((extent.width, extent.height), (2, 2));
        assert_eq!(extent.origin(), (-1.0, 1.0));
    }

    #[test]
    fn test_dimensions_are_floored() {
        let bounds = GeoBox::new(0.0, 0.0, 1.0, 0.55).unwrap();
        let extent = plan_extent_from_bounds(bounds, 0.1, None, None).unwrap();
        assert_eq!(extent.width, 10);
        assert_eq!(extent.height, 5);
    }

    #[test]
    fn test_scale_buffer() {
        let bounds = GeoBox::new(-10.0, -5.0, 10.0, 5.0).unwrap();
        let extent = plan_extent_from_bounds(bounds, 1.0, Some(ExtentBuffer::Scale(1.2)), None).unwrap();
        assert_relative_eq!(extent.bounds.x_min, -12.0);
        assert_relative_eq!(extent.bounds.y_max, 6.0);
        assert_eq!((extent.width, extent.height), (24, 12));
    }

    #[test]
    fn test_degree_buffer() {
        let bounds = GeoBox::new(2.0, 2.0, 4.0, 4.0).unwrap();
        let extent = plan_extent_from_bounds(bounds, 0.5, Some(ExtentBuffer::Degrees(1.0)), None).unwrap();
        assert_relative_eq!(extent.bounds.x_min, 1.0);
        assert_relative_eq!(extent.bounds.x_max, 5.0);
        assert_eq!(extent.width, 8);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(plan_extent(&[], 1.0, None, None).is_err());

        let bounds = GeoBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        assert!(plan_extent_from_bounds(bounds, 0.0, None, None).is_err());
        assert!(plan_extent_from_bounds(bounds, f64::NAN, None, None).is_err());
        assert!(plan_extent_from_bounds(bounds, 2.0, None, None).is_err());
        assert!(plan_extent_from_bounds(bounds, 1.0, Some(ExtentBuffer::Scale(-1.0)), None).is_err());
    }

    #[test]
    fn test_pixel_budget_is_fatal() {
        let bounds = GeoBox::new(-180.0, -90.0, 180.0, 90.0).unwrap();
        let result = plan_extent_from_bounds(bounds, 0.00278, None, Some(1_000_000));
        assert!(matches!(result, Err(RevisitError::Allocation(_))));
    }

    #[test]
    fn test_geo_transform() {
        let bounds = GeoBox::new(-1.0, -1.0, 1.0, 1.0).unwrap();
        let extent = plan_extent_from_bounds(bounds, 1.0, None, None).unwrap();
        assert_eq!(extent.geo_transform(), [-1.0, 1.0, 0.0, 1.0, 0.0, -1.0]);
    }
}
