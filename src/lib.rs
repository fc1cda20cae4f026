//! revisit: global satellite revisit-count rasters
//!
//! Scene footprints are retrieved per tile of a global tiling index, burned
//! into tile-local count grids, and folded into one global raster whose pixels
//! hold the number of distinct passes observed over each location.

pub mod types;
pub mod core;
pub mod io;
pub mod pipeline;

// Re-export main types and functions for easier access
pub use types::{
    Count, CountGrid, GeoBox, PixelWindow, Footprint, FootprintSet, TileRecord, YearRange,
    RevisitError, RevisitResult,
};

pub use self::core::{
    GlobalGrid, GridExtent, MergeRule, RevisitConfig, RevisitProcessor, RunReport, SceneSource,
    TileRaster, TileRasterizer,
};
pub use io::{RetryPolicy, StacClient, StacConfig, TileIndex};
pub use pipeline::{IndexSource, PipelineOptions};

#[cfg(feature = "python")]
mod python {
    use crate::core::rasterize::TileRasterizer;
    use crate::io::tile_index::TileIndex;
    use crate::pipeline::{build_revisit_raster, IndexSource, PipelineOptions};
    use crate::types::{FootprintSet, RevisitError, YearRange};
    use numpy::ToPyArray;
    use pyo3::exceptions::{PyRuntimeError, PyValueError};
    use pyo3::prelude::*;
    use std::path::PathBuf;

    fn to_py_err(e: RevisitError) -> PyErr {
        match e {
            RevisitError::InvalidInput(_) | RevisitError::Geometry(_) => {
                PyValueError::new_err(e.to_string())
            }
            _ => PyRuntimeError::new_err(e.to_string()),
        }
    }

    /// Build the global revisit raster and write it as a GeoTIFF
    #[pyfunction]
    #[pyo3(signature = (
        export_path = "Output.tif".to_string(),
        resolution = 0.00278,
        min_year = 2023,
        max_year = 2023,
        count_limit = None,
        debug_mode = false,
        scenes_path = None,
        index_url = None,
    ))]
    #[allow(clippy::too_many_arguments)]
    fn build_revisit_raster_py(
        py: Python,
        export_path: String,
        resolution: f64,
        min_year: i32,
        max_year: i32,
        count_limit: Option<usize>,
        debug_mode: bool,
        scenes_path: Option<String>,
        index_url: Option<String>,
    ) -> PyResult<String> {
        let index = match (scenes_path, index_url) {
            (Some(path), _) => IndexSource::Path(PathBuf::from(path)),
            (None, Some(url)) => IndexSource::Url { url, cache_dir: None },
            (None, None) => {
                return Err(PyValueError::new_err(
                    "Either scenes_path or index_url must be given",
                ))
            }
        };

        let mut options = PipelineOptions::new(index);
        options.export_path = PathBuf::from(export_path);
        options.revisit.resolution = resolution;
        options.revisit.years = YearRange::new(min_year, max_year).map_err(to_py_err)?;
        options.revisit.count_limit = count_limit;
        if debug_mode {
            options.revisit.schedule = crate::core::Schedule::Sequential;
        }

        let path = py
            .allow_threads(|| build_revisit_raster(&options))
            .map_err(to_py_err)?;
        Ok(path.display().to_string())
    }

    /// Rasterize a GeoJSON FeatureCollection of footprints against a grid origin.
    ///
    /// Returns the count array and the `(row, col)` offset of its top-left pixel.
    #[pyfunction]
    fn rasterize_footprints(
        py: Python,
        geojson: &str,
        resolution: f64,
        origin_x: f64,
        origin_y: f64,
    ) -> PyResult<Option<(PyObject, (i64, i64))>> {
        if !(resolution.is_finite() && resolution > 0.0) {
            return Err(PyValueError::new_err("resolution must be positive"));
        }
        let index = TileIndex::from_geojson_str(geojson).map_err(to_py_err)?;
        let polygons = index
            .tiles
            .into_iter()
            .flat_map(|t| t.geometry.0.into_iter())
            .collect();
        let set = FootprintSet::from_polygons("python", polygons);

        let raster = TileRasterizer::new(origin_x, origin_y, resolution).rasterize(&set);
        Ok(raster.map(|r| {
            let array: PyObject = r.counts.to_pyarray(py).into();
            (array, (r.window.row_start, r.window.col_start))
        }))
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add("build_revisit_raster", wrap_pyfunction!(build_revisit_raster_py, m)?)?;
        m.add_function(wrap_pyfunction!(rasterize_footprints, m)?)?;
        Ok(())
    }
}
