use crate::core::extent::GridExtent;
use crate::core::rasterize::TileRaster;
use crate::types::{CountGrid, PixelWindow, RevisitError, RevisitResult};
use ndarray::{s, Zip};
use serde::{Deserialize, Serialize};

/// How a tile-local count is folded into the global grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MergeRule {
    /// Keep the larger value. Overlapping tiles cover the same scenes, so
    /// their counts are not added.
    #[default]
    Max,
    /// Saturating sum. Counts revisits across tile borders once per tile.
    Sum,
}

/// The whole-run revisit raster
#[derive(Debug, Clone)]
pub struct GlobalGrid {
    pub extent: GridExtent,
    pub counts: CountGrid,
}

impl GlobalGrid {
    /// Allocate a zeroed grid for a planned extent.
    ///
    /// The buffer is reserved fallibly so an oversized extent fails here,
    /// before any tile job is dispatched.
    pub fn allocate(extent: GridExtent) -> RevisitResult<Self> {
        let len = extent.pixel_count()?;

        let mut buffer = Vec::new();
        buffer.try_reserve_exact(len).map_err(|e| {
            RevisitError::Allocation(format!(
                "Cannot allocate {}x{} grid ({} pixels): {}",
                extent.height, extent.width, len, e
            ))
        })?;
        buffer.resize(len, 0);

        let counts = CountGrid::from_shape_vec((extent.height, extent.width), buffer)
            .map_err(|e| RevisitError::Processing(format!("Failed to shape global grid: {}", e)))?;

        log::info!(
            "Allocated global grid {}x{} ({:.1} MB)",
            extent.height,
            extent.width,
            (len * std::mem::size_of::<u16>()) as f64 / (1024.0 * 1024.0)
        );

        Ok(Self { extent, counts })
    }

    pub fn height(&self) -> usize {
        self.counts.nrows()
    }

    pub fn width(&self) -> usize {
        self.counts.ncols()
    }

    /// Fold one tile raster into the grid.
    ///
    /// Only the tile's window is touched, clamped to the grid bounds. When the
    /// window and the tile's counts disagree in shape the smaller extent wins on
    /// each axis. Returns the number of pixels visited.
    pub fn composite(&mut self, tile: &TileRaster, rule: MergeRule) -> usize {
        let (rows, cols) = match tile.window.clamp(self.height(), self.width()) {
            Some(ranges) => ranges,
            None => {
                log::warn!(
                    "Tile {} window {:?} lies outside the global grid, skipping",
                    tile.tile_id,
                    tile.window
                );
                return 0;
            }
        };

        // Offset into the tile when its window starts above or left of the grid
        let src_row = (rows.start as i64 - tile.window.row_start) as usize;
        let src_col = (cols.start as i64 - tile.window.col_start) as usize;

        let (tile_h, tile_w) = tile.counts.dim();
        let h = rows.len().min(tile_h.saturating_sub(src_row));
        let w = cols.len().min(tile_w.saturating_sub(src_col));
        if h == 0 || w == 0 {
            return 0;
        }

        if !PixelWindow::full(self.height(), self.width()).contains(&tile.window) {
            log::debug!(
                "Tile {} window {:?} clamped to rows {:?}, cols {:?}",
                tile.tile_id,
                tile.window,
                rows,
                cols
            );
        }

        let mut target = self.counts.slice_mut(s![
            rows.start..rows.start + h,
            cols.start..cols.start + w
        ]);
        let source = tile.counts.slice(s![src_row..src_row + h, src_col..src_col + w]);

        match rule {
            MergeRule::Max => Zip::from(&mut target)
                .and(&source)
                .for_each(|dst, &src| *dst = (*dst).max(src)),
            MergeRule::Sum => Zip::from(&mut target)
                .and(&source)
                .for_each(|dst, &src| *dst = dst.saturating_add(src)),
        }

        h * w
    }

    /// Check the grid still matches the planned `(height, width)`
    pub fn validate_shape(&self) -> RevisitResult<()> {
        if self.counts.dim() != (self.extent.height, self.extent.width) {
            return Err(RevisitError::Processing(format!(
                "Global grid shape {:?} does not match planned {}x{}",
                self.counts.dim(),
                self.extent.height,
                self.extent.width
            )));
        }
        Ok(())
    }

    /// Number of pixels with at least one revisit
    pub fn covered_pixels(&self) -> usize {
        self.counts.iter().filter(|&&v| v > 0).count()
    }

    pub fn max_count(&self) -> u16 {
        self.counts.iter().copied().max().unwrap_or(0)
    }
}
