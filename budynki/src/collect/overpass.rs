use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Context};
use geo::{Centroid, Contains, Geometry, LineString, MultiPolygon, Point, Polygon};
use log::{debug, info, warn};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::areas::TagFilter;
use crate::collect::cache::ResponseCache;
use crate::collect::{RawFeature, RawFeatureSet};
use crate::error::{PipelineError, Result};
use crate::geo_core::{BoundingBox, CRS_WGS84};

pub const OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";

/// Server-side and client-side bound for one Overpass query.
const REQUEST_TIMEOUT_S: u64 = 180;

const SERVICE: &str = "Overpass API";

/// Queries the Overpass API for tagged features inside a bounding box.
/// Responses are cached on disk by query text, so repeated invocations for
/// the same area never re-hit the network.
pub struct OverpassCollect {
    client: Client,
    cache: ResponseCache,
    endpoint: String,
}

impl OverpassCollect {
    pub fn new(cache: ResponseCache) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_S))
            .user_agent(concat!("budynki/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(OverpassCollect {
            client,
            cache,
            endpoint: OVERPASS_URL.to_string(),
        })
    }

    /// Overpass QL union over nodes, ways and relations. `out geom` makes
    /// every element carry its own coordinate list, so no second id-lookup
    /// pass is needed.
    pub fn build_query(bbox: &BoundingBox, tags: &TagFilter) -> String {
        let clause = tags.overpass_clause();
        let bbox = format!(
            "({},{},{},{})",
            bbox.south, bbox.west, bbox.north, bbox.east
        );
        format!(
            "[out:json][timeout:{timeout}];\
             (node{clause}{bbox};way{clause}{bbox};relation{clause}{bbox};);\
             out geom;",
            timeout = REQUEST_TIMEOUT_S,
            clause = clause,
            bbox = bbox,
        )
    }

    /// Fetch all matching features, in EPSG:4326. Transport and service
    /// errors are surfaced as `SourceUnavailable` and never retried here;
    /// retry policy belongs to the caller.
    pub fn fetch_features(&self, bbox: &BoundingBox, tags: &TagFilter) -> Result<RawFeatureSet> {
        let query = Self::build_query(bbox, tags);
        debug!("Overpass query: {query}");

        let body = match self.cache.get(&query) {
            Some(body) => {
                info!("Using cached Overpass response");
                body
            }
            None => {
                let body = self.request(&query)?;
                if let Err(e) = self.cache.put(&query, &body) {
                    warn!("Failed to cache Overpass response: {e:#}");
                }
                body
            }
        };

        let response: OverpassResponse =
            serde_json::from_str(&body).map_err(|e| PipelineError::SourceUnavailable {
                service: SERVICE,
                source: anyhow!(e).context("Response is not valid Overpass JSON"),
            })?;
        Ok(elements_to_features(response.elements))
    }

    fn request(&self, query: &str) -> Result<String> {
        info!("Querying {} at {}", SERVICE, self.endpoint);
        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("data", query)])
            .send()
            .map_err(|e| PipelineError::SourceUnavailable {
                service: SERVICE,
                source: e.into(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let mut body = response.text().unwrap_or_default();
            body.truncate(500);
            return Err(PipelineError::SourceUnavailable {
                service: SERVICE,
                source: anyhow!("HTTP {status}: {body}"),
            });
        }

        response.text().map_err(|e| PipelineError::SourceUnavailable {
            service: SERVICE,
            source: e.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    #[serde(default)]
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    #[serde(rename = "type")]
    kind: String,
    id: u64,
    #[serde(default)]
    tags: HashMap<String, String>,
    lat: Option<f64>,
    lon: Option<f64>,
    geometry: Option<Vec<LatLon>>,
    members: Option<Vec<OverpassMember>>,
}

#[derive(Debug, Deserialize, Clone, Copy)]
struct LatLon {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct OverpassMember {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    role: String,
    geometry: Option<Vec<LatLon>>,
}

/// Convert Overpass elements into raw features. Nodes become points and
/// open ways become lines on purpose; the normalizer is the single place
/// that decides what is polygonal enough to keep.
fn elements_to_features(elements: Vec<OverpassElement>) -> RawFeatureSet {
    let mut features = Vec::with_capacity(elements.len());
    for element in elements {
        let geometry = match element.kind.as_str() {
            "node" => match (element.lon, element.lat) {
                (Some(lon), Some(lat)) => Some(Geometry::Point(Point::new(lon, lat))),
                _ => None,
            },
            "way" => element.geometry.as_deref().map(way_geometry),
            "relation" => relation_geometry(&element),
            _ => None,
        };
        let Some(geometry) = geometry else { continue };

        let mut properties = Map::new();
        properties.insert("osm_id".to_string(), Value::from(element.id));
        for (key, value) in element.tags {
            properties.insert(key, Value::String(value));
        }
        features.push(RawFeature {
            geometry,
            properties,
        });
    }
    RawFeatureSet {
        features,
        epsg: CRS_WGS84,
    }
}

fn ring(coords: &[LatLon]) -> LineString<f64> {
    LineString::from(
        coords
            .iter()
            .map(|c| (c.lon, c.lat))
            .collect::<Vec<(f64, f64)>>(),
    )
}

fn way_geometry(coords: &[LatLon]) -> Geometry<f64> {
    let line = ring(coords);
    if line.is_closed() && coords.len() >= 4 {
        Geometry::Polygon(Polygon::new(line, vec![]))
    } else {
        Geometry::LineString(line)
    }
}

/// Assemble a multipolygon relation from its member rings. Inner rings are
/// attached to the first outer ring that contains them; inner rings outside
/// every outer are dropped.
/// TODO: stitch outer rings split across multiple open member ways.
fn relation_geometry(element: &OverpassElement) -> Option<Geometry<f64>> {
    if element.tags.get("type").map(String::as_str) != Some("multipolygon") {
        return None;
    }
    let members = element.members.as_ref()?;

    let mut outers: Vec<Polygon<f64>> = Vec::new();
    let mut inners: Vec<LineString<f64>> = Vec::new();
    for member in members {
        if member.kind != "way" {
            continue;
        }
        let Some(coords) = member.geometry.as_deref() else {
            continue;
        };
        let line = ring(coords);
        if !line.is_closed() || coords.len() < 4 {
            continue;
        }
        match member.role.as_str() {
            "outer" | "" => outers.push(Polygon::new(line, vec![])),
            "inner" => inners.push(line),
            _ => {}
        }
    }
    if outers.is_empty() {
        return None;
    }

    for inner in inners {
        let probe = Polygon::new(inner.clone(), vec![]).centroid();
        let Some(probe) = probe else { continue };
        if let Some(outer) = outers.iter_mut().find(|o| o.contains(&probe)) {
            outer.interiors_push(inner);
        }
    }
    Some(Geometry::MultiPolygon(MultiPolygon(outers)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> Vec<OverpassElement> {
        serde_json::from_str::<OverpassResponse>(body).unwrap().elements
    }

    #[test]
    fn test_build_query_bbox_order_and_tag() {
        let bbox = BoundingBox::new(21.00, 52.05, 21.10, 52.10);
        let query = OverpassCollect::build_query(&bbox, &TagFilter::key_only("building"));
        // Overpass bbox order is (south, west, north, east).
        assert!(query.contains("(52.05,21,52.1,21.1)"));
        assert!(query.contains("way[\"building\"]"));
        assert!(query.contains("relation[\"building\"]"));
        assert!(query.ends_with("out geom;"));
    }

    #[test]
    fn test_closed_way_becomes_polygon() {
        let elements = parse(
            r#"{"elements": [{
                "type": "way", "id": 7,
                "tags": {"building": "yes"},
                "geometry": [
                    {"lat": 52.0, "lon": 21.0},
                    {"lat": 52.0, "lon": 21.1},
                    {"lat": 52.1, "lon": 21.1},
                    {"lat": 52.0, "lon": 21.0}
                ]
            }]}"#,
        );
        let set = elements_to_features(elements);
        assert_eq!(set.len(), 1);
        assert!(matches!(set.features[0].geometry, Geometry::Polygon(_)));
        assert_eq!(
            set.features[0].properties.get("building").and_then(|v| v.as_str()),
            Some("yes")
        );
        assert_eq!(
            set.features[0].properties.get("osm_id").and_then(|v| v.as_u64()),
            Some(7)
        );
    }

    #[test]
    fn test_open_way_and_node_stay_non_polygonal() {
        let elements = parse(
            r#"{"elements": [
                {"type": "node", "id": 1, "lat": 52.0, "lon": 21.0,
                 "tags": {"building": "entrance"}},
                {"type": "way", "id": 2,
                 "geometry": [{"lat": 52.0, "lon": 21.0}, {"lat": 52.1, "lon": 21.1}]}
            ]}"#,
        );
        let set = elements_to_features(elements);
        assert_eq!(set.len(), 2);
        assert!(matches!(set.features[0].geometry, Geometry::Point(_)));
        assert!(matches!(set.features[1].geometry, Geometry::LineString(_)));
    }

    #[test]
    fn test_multipolygon_relation_with_courtyard() {
        let elements = parse(
            r#"{"elements": [{
                "type": "relation", "id": 9,
                "tags": {"type": "multipolygon", "building": "yes"},
                "members": [
                    {"type": "way", "role": "outer", "geometry": [
                        {"lat": 0.0, "lon": 0.0}, {"lat": 0.0, "lon": 10.0},
                        {"lat": 10.0, "lon": 10.0}, {"lat": 10.0, "lon": 0.0},
                        {"lat": 0.0, "lon": 0.0}
                    ]},
                    {"type": "way", "role": "inner", "geometry": [
                        {"lat": 4.0, "lon": 4.0}, {"lat": 4.0, "lon": 6.0},
                        {"lat": 6.0, "lon": 6.0}, {"lat": 6.0, "lon": 4.0},
                        {"lat": 4.0, "lon": 4.0}
                    ]}
                ]
            }]}"#,
        );
        let set = elements_to_features(elements);
        assert_eq!(set.len(), 1);
        let Geometry::MultiPolygon(mp) = &set.features[0].geometry else {
            panic!("expected a multipolygon");
        };
        assert_eq!(mp.0.len(), 1);
        assert_eq!(mp.0[0].interiors().len(), 1);
    }

    #[test]
    fn test_relation_without_multipolygon_type_is_skipped() {
        let elements = parse(
            r#"{"elements": [{
                "type": "relation", "id": 3,
                "tags": {"type": "route"},
                "members": []
            }]}"#,
        );
        assert!(elements_to_features(elements).is_empty());
    }
}
