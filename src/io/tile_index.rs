use crate::io::geojson::geometry_from_value;
use crate::io::retry::RetryPolicy;
use crate::types::{GeoBox, RevisitError, RevisitResult, TileRecord};
use serde_json::Value;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Property names tried, in order, for the tile identifier
const ID_PROPERTIES: [&str; 3] = ["Name", "name", "id"];

/// Tiling index: the fixed grid of query tiles covering the globe
#[derive(Debug, Clone, Default)]
pub struct TileIndex {
    pub tiles: Vec<TileRecord>,
}

impl TileIndex {
    /// Read a GeoJSON FeatureCollection (plain or gzip-compressed)
    pub fn from_geojson_path<P: AsRef<Path>>(path: P) -> RevisitResult<Self> {
        log::info!("Reading tiling index from: {}", path.as_ref().display());
        let bytes = std::fs::read(path.as_ref())?;
        let text = decode_bytes(&bytes)?;
        Self::from_geojson_str(&text)
    }

    /// Parse a GeoJSON FeatureCollection
    pub fn from_geojson_str(text: &str) -> RevisitResult<Self> {
        let root: Value = serde_json::from_str(text)?;
        let features = root
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                RevisitError::InvalidInput("Tiling index is not a FeatureCollection".to_string())
            })?;

        let mut tiles = Vec::with_capacity(features.len());
        let mut skipped = 0usize;

        for (i, feature) in features.iter().enumerate() {
            let geometry = match feature.get("geometry") {
                Some(g) => geometry_from_value(g)?,
                None => None,
            };
            let geometry = match geometry {
                Some(g) if !g.0.is_empty() => g,
                _ => {
                    skipped += 1;
                    continue;
                }
            };

            let id = feature_id(feature).unwrap_or_else(|| format!("tile-{}", i));
            tiles.push(TileRecord { id, geometry });
        }

        if skipped > 0 {
            log::warn!("Skipped {} tiling-index features without polygon geometry", skipped);
        }
        log::info!("Loaded {} tiles from tiling index", tiles.len());

        Ok(Self { tiles })
    }

    /// Download the index into `cache_dir`, reusing a cached copy when present
    pub fn download(url: &str, cache_dir: &Path, retry: &RetryPolicy) -> RevisitResult<PathBuf> {
        let filename = url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("tiling_index.geojson");
        let output_path = cache_dir.join(filename);

        if output_path.exists() {
            log::info!("Tiling index {} already cached, skipping download", output_path.display());
            return Ok(output_path);
        }

        std::fs::create_dir_all(cache_dir)?;
        log::info!("Downloading tiling index from: {}", url);

        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(300))
            .user_agent(concat!("revisit/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RevisitError::Network(format!("Failed to create HTTP client: {}", e)))?;

        let content = retry.run("tiling index download", |_| {
            let response = client.get(url).send()?;
            let status = response.status();
            if !status.is_success() {
                return Err(RevisitError::Http {
                    status: status.as_u16(),
                    message: format!(
                        "{}: {}",
                        status.canonical_reason().unwrap_or("request failed"),
                        url
                    ),
                });
            }
            Ok(response.bytes()?)
        })?;

        log::debug!("Downloaded {} bytes", content.len());

        // Write under a temporary name so a partial file is never mistaken for a cache hit
        let partial_path = output_path.with_extension("part");
        std::fs::write(&partial_path, &content)?;
        std::fs::rename(&partial_path, &output_path)?;

        log::info!("Tiling index saved to: {}", output_path.display());
        Ok(output_path)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Keep only the first `n` tiles
    pub fn truncate(&mut self, n: usize) {
        self.tiles.truncate(n);
    }

    /// Union of all tile bounds
    pub fn total_bounds(&self) -> Option<GeoBox> {
        self.tiles
            .iter()
            .filter_map(|t| t.bounds())
            .reduce(|acc, b| acc.union(&b))
    }
}

fn feature_id(feature: &Value) -> Option<String> {
    let properties = feature.get("properties");
    ID_PROPERTIES
        .iter()
        .filter_map(|key| properties.and_then(|p| p.get(*key)))
        .chain(feature.get("id"))
        .find_map(value_to_id)
}

fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// UTF-8 text, gunzipping first when the content starts with the gzip magic
fn decode_bytes(bytes: &[u8]) -> RevisitResult<String> {
    if is_gzip_content(bytes) {
        log::debug!("Decompressing gzipped tiling index");
        let mut decoder = flate2::read::GzDecoder::new(bytes);
        let mut text = String::new();
        decoder.read_to_string(&mut text)?;
        return Ok(text);
    }

    String::from_utf8(bytes.to_vec())
        .map_err(|e| RevisitError::InvalidInput(format!("Tiling index is not UTF-8: {}", e)))
}

fn is_gzip_content(content: &[u8]) -> bool {
    content.len() >= 2 && content[0] == 0x1f && content[1] == 0x8b
}
