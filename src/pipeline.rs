//! End-to-end driver: tiling index -> catalog queries -> global revisit grid -> GeoTIFF

use crate::core::composite::GlobalGrid;
use crate::core::orchestrator::{RevisitConfig, RevisitProcessor, RunReport, SceneSource};
use crate::io::retry::RetryPolicy;
use crate::io::stac::{StacClient, StacConfig};
use crate::io::tile_index::TileIndex;
use crate::types::RevisitResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where the tiling index comes from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IndexSource {
    /// Local GeoJSON file
    Path(PathBuf),
    /// Remote GeoJSON, cached under `cache_dir` (platform cache dir when `None`)
    Url { url: String, cache_dir: Option<PathBuf> },
}

/// Everything a full run needs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOptions {
    pub index: IndexSource,
    pub export_path: PathBuf,
    pub revisit: RevisitConfig,
    pub stac: StacConfig,
}

impl PipelineOptions {
    pub fn new(index: IndexSource) -> Self {
        Self {
            index,
            export_path: PathBuf::from("Output.tif"),
            revisit: RevisitConfig::default(),
            stac: StacConfig::default(),
        }
    }
}

/// Cache directory for downloaded tiling indexes
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|dir| dir.join("revisit").join("tiling-index"))
        .unwrap_or_else(|| PathBuf::from("tiling-index"))
}

/// Resolve the index source to a local file and load it
pub fn load_index(source: &IndexSource, retry: &RetryPolicy) -> RevisitResult<TileIndex> {
    let path = match source {
        IndexSource::Path(path) => path.clone(),
        IndexSource::Url { url, cache_dir } => {
            let cache_dir = cache_dir.clone().unwrap_or_else(default_cache_dir);
            TileIndex::download(url, &cache_dir, retry)?
        }
    };
    TileIndex::from_geojson_path(path)
}

/// Compute the global grid against any scene source
pub fn compute_revisits<S: SceneSource>(
    index: &TileIndex,
    config: RevisitConfig,
    source: &S,
) -> RevisitResult<(GlobalGrid, RunReport)> {
    let processor = RevisitProcessor::new(config)?;
    processor.run(&index.tiles, source)
}

/// Load the index, query the STAC catalog for every tile, and return the grid
pub fn run_pipeline(options: &PipelineOptions) -> RevisitResult<(GlobalGrid, RunReport)> {
    let index = load_index(&options.index, &options.stac.retry)?;
    let client = StacClient::new(options.stac.clone())?;
    compute_revisits(&index, options.revisit.clone(), &client)
}

/// Full run ending in a GeoTIFF; returns the written path
#[cfg(feature = "geotiff")]
pub fn build_revisit_raster(options: &PipelineOptions) -> RevisitResult<PathBuf> {
    let (grid, report) = run_pipeline(options)?;
    if report.failed > 0 {
        log::warn!(
            "{} of {} tiles failed retrieval and are missing from the raster",
            report.failed,
            report.total()
        );
    }
    let export_path = normalize_export_path(&options.export_path);
    crate::io::export::export_geotiff(&grid, &export_path)?;
    Ok(export_path)
}

/// Export path with a `.tif` extension when none was given
pub fn normalize_export_path(path: &Path) -> PathBuf {
    match path.extension() {
        Some(_) => path.to_path_buf(),
        None => path.with_extension("tif"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_export_path() {
        assert_eq!(normalize_export_path(Path::new("out")), PathBuf::from("out.tif"));
        assert_eq!(normalize_export_path(Path::new("out.tiff")), PathBuf::from("out.tiff"));
    }

    #[test]
    fn test_load_index_from_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tiles.geojson");
        std::fs::write(
            &path,
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "properties": {"Name": "A"},
                 "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]]}}
            ]}"#,
        )
        .unwrap();

        let index = load_index(&IndexSource::Path(path), &RetryPolicy::none()).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.tiles[0].id, "A");
    }

    #[test]
    fn test_default_cache_dir_is_namespaced() {
        assert!(default_cache_dir().ends_with("tiling-index"));
    }
}
