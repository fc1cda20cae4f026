use crate::core::grid_index::pixel_window;
use crate::types::{Count, CountGrid, FootprintSet, GeoBox, PixelWindow};
use geo::{Coord, LineString, Polygon};
use ndarray::{s, Array2, Zip};

/// Counters collected while rasterizing one footprint set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RasterStats {
    /// Footprints that contributed a mask
    pub rasterized: usize,
    /// Degenerate footprints (empty, non-finite, or smaller than one pixel)
    pub skipped: usize,
    /// Pixels that hit `Count::MAX` and stopped accumulating
    pub saturated: usize,
}

/// Tile-local revisit counts located inside the global pixel space
#[derive(Debug, Clone)]
pub struct TileRaster {
    pub tile_id: String,
    pub window: PixelWindow,
    pub counts: CountGrid,
    pub stats: RasterStats,
}

/// Per-footprint rasterization plan: its global window and own bounds
struct FootprintPlan<'a> {
    polygon: &'a Polygon<f64>,
    bbox: GeoBox,
    window: PixelWindow,
    mask_dim: (usize, usize),
}

/// Tile rasterizer for footprint sets
///
/// Each footprint is burned into its own mask, sized to the footprint's
/// bounding box and anchored at its north-west corner. Masks are then summed
/// into one grid spanning the union of the footprints' global pixel windows.
pub struct TileRasterizer {
    origin_x: f64,
    origin_y: f64,
    resolution: f64,
}

impl TileRasterizer {
    /// Create a rasterizer for the global grid anchored at `(origin_x, origin_y)`
    pub fn new(origin_x: f64, origin_y: f64, resolution: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            resolution,
        }
    }

    /// Rasterize a footprint set into a tile-local count grid.
    ///
    /// Returns `None` for an empty set or when no footprint covers a pixel.
    pub fn rasterize(&self, footprints: &FootprintSet) -> Option<TileRaster> {
        if footprints.is_empty() {
            return None;
        }

        let mut stats = RasterStats::default();
        let mut plans = Vec::with_capacity(footprints.len());
        let mut union: Option<PixelWindow> = None;

        for polygon in footprints.polygons() {
            match self.plan(polygon) {
                Some(plan) => {
                    union = Some(match union {
                        Some(u) => u.union(&plan.window),
                        None => plan.window,
                    });
                    plans.push(plan);
                }
                None => stats.skipped += 1,
            }
        }

        let union = match union {
            Some(u) => u,
            None => {
                log::debug!(
                    "Tile {}: all {} footprints degenerate, nothing to rasterize",
                    footprints.tile_id,
                    footprints.len()
                );
                return None;
            }
        };

        let mut counts = CountGrid::zeros((union.height(), union.width()));

        for plan in &plans {
            let mask = rasterize_polygon(
                plan.polygon,
                plan.bbox.x_min,
                plan.bbox.y_max,
                self.resolution,
                plan.mask_dim,
            );

            let row_off = (plan.window.row_start - union.row_start) as usize;
            let col_off = (plan.window.col_start - union.col_start) as usize;

            // Mask and window may disagree by one pixel; keep the overlap only
            let h = plan.window.height().min(mask.nrows());
            let w = plan.window.width().min(mask.ncols());

            let mut target = counts.slice_mut(s![row_off..row_off + h, col_off..col_off + w]);
            Zip::from(&mut target)
                .and(&mask.slice(s![..h, ..w]))
                .for_each(|count, &hit| {
                    if hit {
                        match count.checked_add(1) {
                            Some(v) => *count = v,
                            None => stats.saturated += 1,
                        }
                    }
                });
            stats.rasterized += 1;
        }

        if stats.saturated > 0 {
            log::warn!(
                "Tile {}: {} pixel increments saturated at {}",
                footprints.tile_id,
                stats.saturated,
                Count::MAX
            );
        }

        log::debug!(
            "Tile {}: rasterized {} footprints ({} skipped) into {}x{} window at ({}, {})",
            footprints.tile_id,
            stats.rasterized,
            stats.skipped,
            union.height(),
            union.width(),
            union.row_start,
            union.col_start
        );

        Some(TileRaster {
            tile_id: footprints.tile_id.clone(),
            window: union,
            counts,
            stats,
        })
    }

    fn plan<'a>(&self, polygon: &'a Polygon<f64>) -> Option<FootprintPlan<'a>> {
        if !is_finite_polygon(polygon) {
            return None;
        }
        let bbox = GeoBox::of(polygon)?;

        let mask_dim = (
            (bbox.height() / self.resolution) as usize,
            (bbox.width() / self.resolution) as usize,
        );
        if mask_dim.0 == 0 || mask_dim.1 == 0 {
            return None;
        }

        let window = pixel_window(&bbox, self.origin_x, self.origin_y, self.resolution);
        if window.is_empty() {
            return None;
        }

        Some(FootprintPlan {
            polygon,
            bbox,
            window,
            mask_dim,
        })
    }
}

fn is_finite_polygon(polygon: &Polygon<f64>) -> bool {
    !polygon.exterior().0.is_empty()
        && std::iter::once(polygon.exterior())
            .chain(polygon.interiors())
            .flat_map(|ring| ring.0.iter())
            .all(|c| c.x.is_finite() && c.y.is_finite())
}

/// Burn a polygon into a `(rows, cols)` mask whose north-west corner is
/// `(x0, y0)`.
///
/// A pixel is set when its center lies inside the polygon under the even-odd
/// rule, so holes are left unset. Each row is filled by intersecting the
/// horizontal line through the pixel centers with every ring edge; an edge
/// covers `y_lo <= y < y_hi` and a span covers centers `x_a <= x < x_b`.
pub fn rasterize_polygon(
    polygon: &Polygon<f64>,
    x0: f64,
    y0: f64,
    resolution: f64,
    (rows, cols): (usize, usize),
) -> Array2<bool> {
    let mut mask = Array2::from_elem((rows, cols), false);
    let edges = collect_edges(polygon);
    if edges.is_empty() {
        return mask;
    }

    let mut crossings: Vec<f64> = Vec::with_capacity(8);

    for (row, mut line) in mask.rows_mut().into_iter().enumerate() {
        let yc = y0 - (row as f64 + 0.5) * resolution;

        crossings.clear();
        for (a, b) in &edges {
            let (lo, hi) = if a.y < b.y { (a, b) } else { (b, a) };
            if lo.y <= yc && yc < hi.y {
                crossings.push(lo.x + (yc - lo.y) * (hi.x - lo.x) / (hi.y - lo.y));
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));

        for span in crossings.chunks_exact(2) {
            let start = center_index(span[0], x0, resolution).clamp(0, cols as i64) as usize;
            let end = center_index(span[1], x0, resolution).clamp(0, cols as i64) as usize;
            for col in start..end {
                line[col] = true;
            }
        }
    }

    mask
}

/// First column whose center is at or east of `x`
fn center_index(x: f64, x0: f64, resolution: f64) -> i64 {
    ((x - x0) / resolution - 0.5).ceil() as i64
}

fn collect_edges(polygon: &Polygon<f64>) -> Vec<(Coord<f64>, Coord<f64>)> {
    let mut edges = Vec::new();
    let mut push_ring = |ring: &LineString<f64>| {
        let n = ring.0.len();
        if n < 3 {
            return;
        }
        for i in 0..n {
            let a = ring.0[i];
            // geo closes rings, but tolerate an open one
            let b = ring.0[(i + 1) % n];
            if a.y != b.y {
                edges.push((a, b));
            }
        }
    };

    push_ring(polygon.exterior());
    for interior in polygon.interiors() {
        push_ring(interior);
    }
    edges
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    fn square(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Polygon<f64> {
        polygon![
            (x: x_min, y: y_min),
            (x: x_max, y: y_min),
            (x: x_max, y: y_max),
            (x: x_min, y: y_max),
        ]
    }

    #[test]
    fn test_mask_of_aligned_square() {
        let mask = rasterize_polygon(&square(0.0, 0.0, 3.0, 2.0), 0.0, 2.0, 1.0, (2, 3));
        assert!(mask.iter().all(|&v| v));
    }

    #[test]
    fn test_mask_of_triangle_uses_pixel_centers() {
        // Hypotenuse x = 4y/3
        let tri = polygon![(x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 3.0)];
        let mask = rasterize_polygon(&tri, 0.0, 3.0, 1.0, (3, 4));
        // Row 0 center y=2.5: inside for x > 3.33 -> only column 3
        assert_eq!(mask.row(0).iter().filter(|&&v| v).count(), 1);
        assert!(mask[[0, 3]]);
        // Row 2 center y=0.5: inside for x > 0.67 -> columns 1..4
        assert_eq!(mask.row(2).iter().filter(|&&v| v).count(), 3);
        assert!(!mask[[2, 0]]);
    }

    #[test]
    fn test_mask_respects_holes() {
        let poly = Polygon::new(
            square(0.0, 0.0, 3.0, 3.0).exterior().clone(),
            vec![square(1.0, 1.0, 2.0, 2.0).exterior().clone()],
        );
        let mask = rasterize_polygon(&poly, 0.0, 3.0, 1.0, (3, 3));
        assert!(!mask[[1, 1]]);
        assert_eq!(mask.iter().filter(|&&v| v).count(), 8);
    }

    #[test]
    fn test_disjoint_footprints_count_once() {
        let set = FootprintSet::from_polygons(
            "T01",
            vec![square(0.0, 0.0, 2.0, 2.0), square(3.0, 0.0, 5.0, 2.0)],
        );
        let raster = TileRasterizer::new(0.0, 2.0, 1.0).rasterize(&set).unwrap();

        assert_eq!(
            raster.window,
            PixelWindow { row_start: 0, row_end: 2, col_start: 0, col_end: 5 }
        );
        for row in 0..2 {
            assert_eq!(raster.counts.row(row).to_vec(), vec![1, 1, 0, 1, 1]);
        }
        assert_eq!(raster.stats.rasterized, 2);
    }

    #[test]
    fn test_congruent_footprints_sum() {
        let set = FootprintSet::from_polygons(
            "T02",
            vec![square(1.0, 1.0, 3.0, 2.0), square(1.0, 1.0, 3.0, 2.0)],
        );
        let raster = TileRasterizer::new(0.0, 4.0, 1.0).rasterize(&set).unwrap();
        assert_eq!(raster.counts.dim(), (1, 2));
        assert!(raster.counts.iter().all(|&v| v == 2));
        assert_eq!(raster.window.row_start, 2);
        assert_eq!(raster.window.col_start, 1);
    }

    #[test]
    fn test_counts_saturate_at_max() {
        let n = Count::MAX as usize + 5;
        let set = FootprintSet::from_polygons("SAT", vec![square(0.0, 0.0, 1.0, 1.0); n]);
        let raster = TileRasterizer::new(0.0, 1.0, 1.0).rasterize(&set).unwrap();

        assert_eq!(raster.counts.dim(), (1, 1));
        assert_eq!(raster.counts[[0, 0]], Count::MAX);
        assert_eq!(raster.stats.rasterized, n);
        assert_eq!(raster.stats.saturated, n - Count::MAX as usize);
    }

    #[test]
    fn test_empty_and_degenerate_sets() {
        let rasterizer = TileRasterizer::new(0.0, 0.0, 1.0);
        assert!(rasterizer.rasterize(&FootprintSet::new("EMPTY")).is_none());

        let degenerate = FootprintSet::from_polygons(
            "DEGEN",
            vec![
                square(0.0, -1.0, 0.0, 0.0),
                square(0.0, -0.4, 0.4, 0.0),
                square(f64::NAN, -1.0, 1.0, 0.0),
            ],
        );
        assert!(rasterizer.rasterize(&degenerate).is_none());
    }

    #[test]
    fn test_degenerate_footprint_skipped_alongside_valid() {
        let set = FootprintSet::from_polygons(
            "MIXED",
            vec![square(0.0, -2.0, 2.0, 0.0), square(5.0, -1.0, 5.0, 0.0)],
        );
        let raster = TileRasterizer::new(0.0, 0.0, 1.0).rasterize(&set).unwrap();
        assert_eq!(raster.stats.rasterized, 1);
        assert_eq!(raster.stats.skipped, 1);
        assert_eq!(raster.counts.dim(), (2, 2));
    }

    #[test]
    fn test_mask_truncated_to_window() {
        // Unaligned box: own mask is 1x1 (trunc 1.4), global window spans 2x2
        let set = FootprintSet::from_polygons("OFF", vec![square(0.8, -2.2, 2.2, -0.8)]);
        let raster = TileRasterizer::new(0.0, 0.0, 1.0).rasterize(&set).unwrap();
        assert_eq!(
            raster.window,
            PixelWindow { row_start: 0, row_end: 2, col_start: 0, col_end: 2 }
        );
        assert_eq!(raster.counts.iter().map(|&v| v as u32).sum::<u32>(), 1);
        assert_eq!(raster.counts[[0, 0]], 1);
    }
}
