//! I/O modules for the tiling index, the scene catalog, and raster export

pub mod geojson;
pub mod retry;
pub mod tile_index;
pub mod stac;
#[cfg(feature = "geotiff")]
pub mod export;

pub use retry::RetryPolicy;
pub use tile_index::TileIndex;
pub use stac::{StacClient, StacConfig};
#[cfg(feature = "geotiff")]
pub use export::export_geotiff;
