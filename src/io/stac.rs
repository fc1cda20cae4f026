use crate::core::orchestrator::SceneSource;
use crate::io::geojson::geometry_from_value;
use crate::io::retry::RetryPolicy;
use crate::types::{Footprint, FootprintSet, GeoBox, RevisitError, RevisitResult, TileRecord, YearRange};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// STAC API catalog settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacConfig {
    /// API root; `/search` is appended
    pub endpoint: String,
    pub collection: String,
    /// Item property that must equal the tile id (e.g. `s2:mgrs_tile`)
    pub tile_property: Option<String>,
    /// Degrees removed from each side of the tile bounds before querying,
    /// so neighbouring tiles' scenes are not matched on the shared border
    pub query_inset: f64,
    /// Items per page
    pub page_limit: usize,
    /// Stop following `next` links after this many pages
    pub max_pages: usize,
    pub timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for StacConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://planetarycomputer.microsoft.com/api/stac/v1".to_string(),
            collection: "sentinel-2-l2a".to_string(),
            tile_property: Some("s2:mgrs_tile".to_string()),
            query_inset: 0.1,
            page_limit: 250,
            max_pages: 50,
            timeout_secs: 120,
            retry: RetryPolicy::default(),
        }
    }
}

/// Next page request advertised by a STAC response
#[derive(Debug, Clone, PartialEq)]
pub enum NextPage {
    Get {
        href: String,
        headers: Vec<(String, String)>,
    },
    Post {
        href: String,
        body: Value,
        /// Overlay `body` onto the previous request body instead of replacing it
        merge: bool,
        headers: Vec<(String, String)>,
    },
}

impl NextPage {
    fn body(&self) -> Option<&Value> {
        match self {
            NextPage::Get { .. } => None,
            NextPage::Post { body, .. } => Some(body),
        }
    }

    fn headers(&self) -> &[(String, String)] {
        match self {
            NextPage::Get { headers, .. } | NextPage::Post { headers, .. } => headers,
        }
    }

    /// Apply a `merge` link against the body of the request that returned it
    pub fn resolve(self, previous: Option<&Value>) -> NextPage {
        match self {
            NextPage::Post { href, body, merge: true, headers } => NextPage::Post {
                href,
                body: match previous {
                    Some(base) => merge_bodies(base, &body),
                    None => body,
                },
                merge: false,
                headers,
            },
            other => other,
        }
    }
}

/// Top-level keys of `overlay` replace those of `base`
fn merge_bodies(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            let mut merged = base.clone();
            for (key, value) in overlay {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => overlay.clone(),
    }
}

/// Blocking STAC API client returning scene footprints per tile
pub struct StacClient {
    config: StacConfig,
    client: reqwest::blocking::Client,
}

impl StacClient {
    pub fn new(config: StacConfig) -> RevisitResult<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("revisit/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RevisitError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &StacConfig {
        &self.config
    }

    /// `POST /search` body for one tile and year range
    pub fn search_body(&self, tile: &TileRecord, years: &YearRange) -> RevisitResult<Value> {
        let bounds = tile.bounds().ok_or_else(|| {
            RevisitError::Geometry(format!("Tile {} has no bounds", tile.id))
        })?;
        let bbox = inset_bounds(&bounds, self.config.query_inset);

        let mut body = json!({
            "collections": [self.config.collection],
            "bbox": [bbox.x_min, bbox.y_min, bbox.x_max, bbox.y_max],
            "datetime": years.datetime_interval(),
            "limit": self.config.page_limit,
        });
        if let Some(property) = &self.config.tile_property {
            let mut query = serde_json::Map::new();
            query.insert(property.clone(), json!({ "eq": tile.id }));
            body["query"] = Value::Object(query);
        }
        Ok(body)
    }

    fn search_url(&self) -> String {
        format!("{}/search", self.config.endpoint.trim_end_matches('/'))
    }

    /// Execute one page request under the retry policy
    fn request_page(&self, page: &NextPage, label: &str) -> RevisitResult<Value> {
        self.config.retry.run(label, |_| {
            let mut request = match page {
                NextPage::Get { href, .. } => self.client.get(href),
                NextPage::Post { href, body, .. } => self.client.post(href).json(body),
            };
            for (name, value) in page.headers() {
                request = request.header(name.as_str(), value.as_str());
            }
            let response = request.send()?;
            let status = response.status();
            if !status.is_success() {
                return Err(RevisitError::Http {
                    status: status.as_u16(),
                    message: format!(
                        "{} from STAC search",
                        status.canonical_reason().unwrap_or("request failed")
                    ),
                });
            }
            Ok(response.json::<Value>()?)
        })
    }
}

impl SceneSource for StacClient {
    fn fetch(&self, tile: &TileRecord, years: &YearRange) -> RevisitResult<FootprintSet> {
        let mut set = FootprintSet::new(tile.id.clone());
        let mut page = Some(NextPage::Post {
            href: self.search_url(),
            body: self.search_body(tile, years)?,
            merge: false,
            headers: Vec::new(),
        });
        let mut pages = 0;

        while let Some(current) = page.take() {
            if pages >= self.config.max_pages {
                log::warn!(
                    "Tile {}: stopping after {} pages, results may be incomplete",
                    tile.id,
                    pages
                );
                break;
            }
            pages += 1;

            let label = format!("STAC search {} page {}", tile.id, pages);
            let response = self.request_page(&current, &label)?;
            let (footprints, next) = parse_item_collection(&response)?;
            set.footprints.extend(footprints);
            page = next.map(|n| n.resolve(current.body()));
        }

        log::debug!("Tile {}: {} scenes over {} pages", tile.id, set.len(), pages);
        Ok(set)
    }
}

/// Extract footprints and the `next` link from a STAC ItemCollection
pub fn parse_item_collection(response: &Value) -> RevisitResult<(Vec<Footprint>, Option<NextPage>)> {
    let features = response
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| RevisitError::Catalog("Search response has no features array".to_string()))?;

    let mut footprints = Vec::with_capacity(features.len());
    for item in features {
        let scene_id = item
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let geometry = match item.get("geometry").map(geometry_from_value).transpose()? {
            Some(Some(g)) => g,
            _ => {
                log::debug!("Item {} has no footprint, skipping", scene_id);
                continue;
            }
        };

        let datetime = item
            .pointer("/properties/datetime")
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        for polygon in geometry {
            footprints.push(Footprint {
                scene_id: scene_id.clone(),
                datetime,
                polygon,
            });
        }
    }

    Ok((footprints, next_page(response)))
}

fn next_page(response: &Value) -> Option<NextPage> {
    let link = response
        .get("links")?
        .as_array()?
        .iter()
        .find(|l| l.get("rel").and_then(Value::as_str) == Some("next"))?;
    let href = link.get("href")?.as_str()?.to_string();
    let headers = link
        .get("headers")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default();

    match link.get("method").and_then(Value::as_str) {
        Some(m) if m.eq_ignore_ascii_case("POST") => Some(NextPage::Post {
            href,
            body: link.get("body").cloned().unwrap_or_else(|| json!({})),
            merge: link.get("merge").and_then(Value::as_bool).unwrap_or(false),
            headers,
        }),
        _ => Some(NextPage::Get { href, headers }),
    }
}

/// Shrink a box by `inset` on each side, collapsing to the center rather than inverting
pub fn inset_bounds(bounds: &GeoBox, inset: f64) -> GeoBox {
    let shrink = |lo: f64, hi: f64| {
        if hi - lo > 2.0 * inset {
            (lo + inset, hi - inset)
        } else {
            let mid = (lo + hi) / 2.0;
            (mid, mid)
        }
    };
    let (x_min, x_max) = shrink(bounds.x_min, bounds.x_max);
    let (y_min, y_max) = shrink(bounds.y_min, bounds.y_max);
    GeoBox { x_min, y_min, x_max, y_max }
}
