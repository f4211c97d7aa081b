use anyhow::{bail, Context, Result};
use geojson::GeoJson;
use log::warn;
use serde_json::{Map, Value};

pub mod cache;
pub mod global_variables;
pub mod gugik;
pub mod overpass;

/// One geometry plus its source attributes, as delivered by a source.
#[derive(Debug, Clone)]
pub struct RawFeature {
    pub geometry: geo::Geometry<f64>,
    pub properties: Map<String, Value>,
}

/// Unordered feature collection in the source's native coordinate system.
/// May still contain points and lines; the normalizer filters those out.
#[derive(Debug, Clone)]
pub struct RawFeatureSet {
    pub features: Vec<RawFeature>,
    pub epsg: i32,
}

impl RawFeatureSet {
    pub fn empty(epsg: i32) -> Self {
        RawFeatureSet {
            features: Vec::new(),
            epsg,
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Parse a GeoJSON document into a raw feature set. Features whose
    /// geometry is missing or unsupported are skipped with a warning so a
    /// single bad record cannot sink a whole layer.
    pub fn from_geojson(text: &str, epsg: i32) -> Result<Self> {
        let geojson: GeoJson = text.parse().context("Failed to parse GeoJSON")?;
        let features = match geojson {
            GeoJson::FeatureCollection(fc) => fc.features,
            GeoJson::Feature(f) => vec![f],
            GeoJson::Geometry(_) => bail!("GeoJSON must be a Feature or FeatureCollection"),
        };

        let mut out = Vec::with_capacity(features.len());
        for feature in features {
            let Some(geometry) = feature.geometry.as_ref() else {
                warn!("Skipping feature without geometry");
                continue;
            };
            let geometry: geo::Geometry<f64> = match geometry.try_into() {
                Ok(g) => g,
                Err(e) => {
                    warn!("Skipping feature with unsupported geometry: {e}");
                    continue;
                }
            };
            out.push(RawFeature {
                geometry,
                properties: feature.properties.unwrap_or_default(),
            });
        }
        Ok(RawFeatureSet {
            features: out,
            epsg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_core::CRS_WGS84;

    #[test]
    fn test_from_geojson_feature_collection() {
        let text = r#"{
            "type": "FeatureCollection",
            "features": [
                {
                    "type": "Feature",
                    "geometry": {
                        "type": "Polygon",
                        "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]
                    },
                    "properties": {"funkcja": "budynek mieszkalny"}
                },
                {
                    "type": "Feature",
                    "geometry": {"type": "Point", "coordinates": [0.5, 0.5]},
                    "properties": {}
                }
            ]
        }"#;
        let set = RawFeatureSet::from_geojson(text, CRS_WGS84).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.epsg, CRS_WGS84);
        assert_eq!(
            set.features[0].properties.get("funkcja").and_then(|v| v.as_str()),
            Some("budynek mieszkalny")
        );
    }

    #[test]
    fn test_from_geojson_rejects_bare_geometry() {
        let text = r#"{"type": "Point", "coordinates": [0.0, 0.0]}"#;
        assert!(RawFeatureSet::from_geojson(text, CRS_WGS84).is_err());
    }

    #[test]
    fn test_from_geojson_skips_missing_geometry() {
        let text = r#"{
            "type": "FeatureCollection",
            "features": [{"type": "Feature", "geometry": null, "properties": {}}]
        }"#;
        let set = RawFeatureSet::from_geojson(text, CRS_WGS84).unwrap();
        assert!(set.is_empty());
    }
}
