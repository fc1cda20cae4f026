//! Core raster aggregation modules

pub mod grid_index;
pub mod rasterize;
pub mod composite;
pub mod extent;
pub mod orchestrator;

// Re-export main types
pub use grid_index::pixel_window;
pub use rasterize::{TileRasterizer, TileRaster, RasterStats, rasterize_polygon};
pub use composite::{GlobalGrid, MergeRule};
pub use extent::{GridExtent, ExtentBuffer, ExtentSource, plan_extent, plan_extent_from_bounds};
pub use orchestrator::{
    RevisitProcessor, RevisitConfig, SceneSource, JobState, JobOutcome, RunReport,
    Schedule, MergeStrategy,
};
