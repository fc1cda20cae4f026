use crate::core::composite::GlobalGrid;
use crate::types::RevisitResult;
use gdal::raster::{Buffer, RasterCreationOption};
use gdal::spatial_ref::SpatialRef;
use gdal::DriverManager;
use std::path::Path;

/// Geographic lat/lon on WGS84
const OUTPUT_EPSG: u32 = 4326;

/// Write the global grid as a single-band UInt16 GeoTIFF.
///
/// Zero is declared as nodata; the file is LZW compressed.
pub fn export_geotiff<P: AsRef<Path>>(grid: &GlobalGrid, output_path: P) -> RevisitResult<()> {
    grid.validate_shape()?;

    let extent = &grid.extent;
    log::info!(
        "Saving revisit raster as GeoTIFF: {} ({}x{})",
        output_path.as_ref().display(),
        extent.width,
        extent.height
    );

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let options = [
        RasterCreationOption { key: "COMPRESS", value: "LZW" },
        RasterCreationOption { key: "BIGTIFF", value: "IF_SAFER" },
    ];
    let mut dataset = driver.create_with_band_type_with_options::<u16, _>(
        output_path.as_ref(),
        extent.width as isize,
        extent.height as isize,
        1,
        &options,
    )?;

    dataset.set_geo_transform(&extent.geo_transform())?;
    dataset.set_spatial_ref(&SpatialRef::from_epsg(OUTPUT_EPSG)?)?;

    let mut rasterband = dataset.rasterband(1)?;
    let flat_data: Vec<u16> = grid.counts.iter().copied().collect();
    let buffer = Buffer::new((extent.width, extent.height), flat_data);
    rasterband.write((0, 0), (extent.width, extent.height), &buffer)?;
    rasterband.set_no_data_value(Some(0.0))?;

    log::info!("✅ GeoTIFF saved successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::extent::plan_extent_from_bounds;
    use crate::types::GeoBox;
    use gdal::Dataset;

    #[test]
    fn test_export_roundtrip_header_and_values() {
        let bounds = GeoBox::new(-1.0, -1.0, 1.0, 1.0).unwrap();
        let extent = plan_extent_from_bounds(bounds, 1.0, None, None).unwrap();
        let mut grid = GlobalGrid::allocate(extent).unwrap();
        grid.counts[[0, 0]] = 2;
        grid.counts[[1, 1]] = 1;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("revisits.tif");
        export_geotiff(&grid, &path).unwrap();

        let dataset = Dataset::open(&path).unwrap();
        assert_eq!(dataset.raster_size(), (2, 2));
        assert_eq!(dataset.geo_transform().unwrap(), [-1.0, 1.0, 0.0, 1.0, 0.0, -1.0]);

        let band = dataset.rasterband(1).unwrap();
        let data = band.read_as::<u16>((0, 0), (2, 2), (2, 2), None).unwrap();
        assert_eq!(data.data, vec![2, 0, 0, 1]);
        assert_eq!(band.no_data_value(), Some(0.0));
    }
}
