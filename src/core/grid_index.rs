//! Geographic bounding box to pixel window mapping
//!
//! Every grid in the crate shares one resolution and is anchored at the
//! global grid's north-west corner `(x_min, y_max)`. Columns grow east,
//! rows grow south. All four edges are mapped with `floor`, so the mapping is
//! monotonic and reproduces pixel indices exactly across runs.

use crate::types::{GeoBox, PixelWindow};
use std::ops::Range;

/// Map a bounding box onto the pixel index space anchored at `(origin_x, origin_y)`
pub fn pixel_window(bbox: &GeoBox, origin_x: f64, origin_y: f64, resolution: f64) -> PixelWindow {
    PixelWindow {
        row_start: ((origin_y - bbox.y_max) / resolution).floor() as i64,
        row_end: ((origin_y - bbox.y_min) / resolution).floor() as i64,
        col_start: ((bbox.x_min - origin_x) / resolution).floor() as i64,
        col_end: ((bbox.x_max - origin_x) / resolution).floor() as i64,
    }
}

impl PixelWindow {
    /// Window of size `height x width` anchored at the origin
    pub fn full(height: usize, width: usize) -> Self {
        Self {
            row_start: 0,
            row_end: height as i64,
            col_start: 0,
            col_end: width as i64,
        }
    }

    pub fn height(&self) -> usize {
        (self.row_end - self.row_start).max(0) as usize
    }

    pub fn width(&self) -> usize {
        (self.col_end - self.col_start).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.height() == 0 || self.width() == 0
    }

    /// True when `other` lies entirely inside `self`
    pub fn contains(&self, other: &PixelWindow) -> bool {
        self.row_start <= other.row_start
            && self.row_end >= other.row_end
            && self.col_start <= other.col_start
            && self.col_end >= other.col_end
    }

    /// Smallest window covering both
    pub fn union(&self, other: &PixelWindow) -> PixelWindow {
        PixelWindow {
            row_start: self.row_start.min(other.row_start),
            row_end: self.row_end.max(other.row_end),
            col_start: self.col_start.min(other.col_start),
            col_end: self.col_end.max(other.col_end),
        }
    }

    /// Intersect with a `height x width` grid anchored at the origin.
    ///
    /// Returns the row and column ranges in grid coordinates, or `None` when
    /// the window falls completely outside.
    pub fn clamp(&self, height: usize, width: usize) -> Option<(Range<usize>, Range<usize>)> {
        let r0 = self.row_start.max(0);
        let r1 = self.row_end.min(height as i64);
        let c0 = self.col_start.max(0);
        let c1 = self.col_end.min(width as i64);

        if r0 >= r1 || c0 >= c1 {
            return None;
        }
        Some((r0 as usize..r1 as usize, c0 as usize..c1 as usize))
    }
}
