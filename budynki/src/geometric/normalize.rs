use std::fmt;
use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use geo::{Area, Geometry};
use geojson::{Feature, FeatureCollection, GeoJson};
use log::{info, warn};
use serde_json::{Map, Value};

use crate::areas::StudyArea;
use crate::collect::{RawFeature, RawFeatureSet};
use crate::error::Result;
use crate::geo_core::{self, CRS_POLAND};

/// Provenance of a normalized record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLabel {
    CrowdSource,
    Authority,
    /// Crowd-source data substituted because the authority path failed.
    AuthorityFallback,
}

impl SourceLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceLabel::CrowdSource => "crowd-source",
            SourceLabel::Authority => "authority",
            SourceLabel::AuthorityFallback => "authority-fallback",
        }
    }
}

impl fmt::Display for SourceLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Footprint area statistics, for logging only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AreaStats {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
}

impl AreaStats {
    fn compute(areas: &[f64]) -> Option<AreaStats> {
        if areas.is_empty() {
            return None;
        }
        let mut sorted = areas.to_vec();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };
        Some(AreaStats {
            mean: sorted.iter().sum::<f64>() / sorted.len() as f64,
            median,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
        })
    }
}

/// One building footprint in the metric reference system.
#[derive(Debug, Clone)]
pub struct NormalizedBuilding {
    /// Polygon or MultiPolygon, nothing else survives normalization.
    pub geometry: Geometry<f64>,
    pub source: SourceLabel,
    pub area_name: String,
    /// Planar area, computed after reprojection.
    pub area_m2: f64,
    /// Pass-through attributes from the source.
    pub properties: Map<String, Value>,
}

/// The pipeline's terminal artifact for one (area, source) pair.
#[derive(Debug, Clone)]
pub struct NormalizedBuildingSet {
    pub buildings: Vec<NormalizedBuilding>,
    pub epsg: i32,
    pub source: SourceLabel,
    pub area_key: String,
    /// How many non-polygonal records were filtered out.
    pub dropped_non_polygonal: usize,
    pub stats: Option<AreaStats>,
}

impl NormalizedBuildingSet {
    pub fn len(&self) -> usize {
        self.buildings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buildings.is_empty()
    }

    /// Rewrite the provenance label on the set and every record.
    pub fn relabeled(mut self, label: SourceLabel) -> Self {
        self.source = label;
        for building in &mut self.buildings {
            building.source = label;
        }
        self
    }

    pub fn to_feature_collection(&self) -> FeatureCollection {
        let features = self
            .buildings
            .iter()
            .map(|b| {
                let mut properties = b.properties.clone();
                properties.insert(
                    "source".to_string(),
                    Value::String(b.source.as_str().to_string()),
                );
                properties.insert(
                    "area_name".to_string(),
                    Value::String(b.area_name.clone()),
                );
                properties.insert("area_m2".to_string(), Value::from(b.area_m2));
                Feature {
                    bbox: None,
                    geometry: Some(geojson::Geometry::new(geojson::Value::from(&b.geometry))),
                    id: None,
                    properties: Some(properties),
                    foreign_members: None,
                }
            })
            .collect();
        FeatureCollection {
            bbox: None,
            features,
            foreign_members: None,
        }
    }
}

/// Turns raw source output into the canonical building schema: filter to
/// polygonal geometries, reproject into the metric system, attach
/// provenance and area, persist the artifact.
#[derive(Debug, Clone)]
pub struct Normalizer {
    target_epsg: i32,
    out_dir: PathBuf,
}

impl Normalizer {
    pub fn new(out_dir: PathBuf) -> Self {
        Normalizer {
            target_epsg: CRS_POLAND,
            out_dir,
        }
    }

    pub fn artifact_path(&self, area_key: &str, label: SourceLabel) -> PathBuf {
        self.out_dir
            .join(format!("{}_{}.geojson", area_key, label.as_str()))
    }

    /// An empty input yields an empty set without error; callers report it
    /// as a non-fatal condition.
    pub fn normalize(
        &self,
        raw: RawFeatureSet,
        area: &StudyArea,
        label: SourceLabel,
    ) -> Result<NormalizedBuildingSet> {
        let original_count = raw.len();
        let source_epsg = raw.epsg;

        if original_count == 0 {
            warn!("No features returned for {} ({label})", area.key);
            return Ok(NormalizedBuildingSet {
                buildings: Vec::new(),
                epsg: self.target_epsg,
                source: label,
                area_key: area.key.clone(),
                dropped_non_polygonal: 0,
                stats: None,
            });
        }

        let mut polygonal: Vec<RawFeature> = raw
            .features
            .into_iter()
            .filter(|f| {
                matches!(
                    f.geometry,
                    Geometry::Polygon(_) | Geometry::MultiPolygon(_)
                )
            })
            .collect();
        let dropped = original_count - polygonal.len();
        info!(
            "Buildings (Polygon/MultiPolygon): {}/{}",
            polygonal.len(),
            original_count
        );

        if source_epsg != self.target_epsg {
            info!(
                "Reprojecting EPSG:{} -> EPSG:{}",
                source_epsg, self.target_epsg
            );
            let proj = geo_core::transformer(source_epsg, self.target_epsg)?;
            for feature in &mut polygonal {
                feature.geometry = geo_core::reproject(&feature.geometry, &proj)?;
            }
        }

        let buildings: Vec<NormalizedBuilding> = polygonal
            .into_iter()
            .map(|f| {
                let area_m2 = f.geometry.unsigned_area();
                NormalizedBuilding {
                    geometry: f.geometry,
                    source: label,
                    area_name: area.key.clone(),
                    area_m2,
                    properties: f.properties,
                }
            })
            .collect();

        let areas: Vec<f64> = buildings.iter().map(|b| b.area_m2).collect();
        let stats = AreaStats::compute(&areas);
        if let Some(s) = &stats {
            info!(
                "Area statistics [m2]: mean {:.2}, median {:.2}, min {:.2}, max {:.2}",
                s.mean, s.median, s.min, s.max
            );
        }

        let set = NormalizedBuildingSet {
            buildings,
            epsg: self.target_epsg,
            source: label,
            area_key: area.key.clone(),
            dropped_non_polygonal: dropped,
            stats,
        };
        if !set.is_empty() {
            self.persist(&set)?;
        }
        Ok(set)
    }

    /// Write the set to its deterministic artifact path, overwriting any
    /// prior file. Also used to re-persist a relabeled set.
    pub fn persist(&self, set: &NormalizedBuildingSet) -> Result<PathBuf> {
        fs::create_dir_all(&self.out_dir).with_context(|| {
            format!("Failed to create output directory {}", self.out_dir.display())
        })?;
        let path = self.artifact_path(&set.area_key, set.source);
        let geojson = GeoJson::from(set.to_feature_collection());
        fs::write(&path, geojson.to_string())
            .with_context(|| format!("Failed to write artifact {}", path.display()))?;
        info!("Saved {} buildings to {}", set.len(), path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::areas::AreaCatalog;
    use geo::{polygon, Geometry, Point};

    fn square(offset: f64, size: f64) -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: offset, y: offset),
            (x: offset + size, y: offset),
            (x: offset + size, y: offset + size),
            (x: offset, y: offset + size),
            (x: offset, y: offset),
        ])
    }

    fn raw_feature(geometry: Geometry<f64>) -> RawFeature {
        RawFeature {
            geometry,
            properties: Map::new(),
        }
    }

    /// Raw set already in EPSG:2180 so tests stay independent of proj data.
    fn metric_set(features: Vec<RawFeature>) -> RawFeatureSet {
        RawFeatureSet {
            features,
            epsg: CRS_POLAND,
        }
    }

    fn normalizer() -> (tempfile::TempDir, Normalizer) {
        let dir = tempfile::tempdir().unwrap();
        let normalizer = Normalizer::new(dir.path().to_path_buf());
        (dir, normalizer)
    }

    #[test]
    fn test_empty_input_yields_empty_set_without_error() {
        let (_dir, normalizer) = normalizer();
        let catalog = AreaCatalog::builtin();
        let area = catalog.resolve(Some("piaseczno")).unwrap();
        let set = normalizer
            .normalize(RawFeatureSet::empty(CRS_POLAND), area, SourceLabel::Authority)
            .unwrap();
        assert!(set.is_empty());
        assert!(set.stats.is_none());
        assert_eq!(set.dropped_non_polygonal, 0);
    }

    #[test]
    fn test_filtering_keeps_exactly_the_polygonal_records() {
        let (_dir, normalizer) = normalizer();
        let catalog = AreaCatalog::builtin();
        let area = catalog.resolve(Some("piaseczno")).unwrap();

        let mut features = Vec::new();
        for i in 0..480 {
            features.push(raw_feature(square(i as f64 * 20.0, 10.0)));
        }
        for _ in 0..20 {
            features.push(raw_feature(Geometry::Point(Point::new(0.0, 0.0))));
        }

        let set = normalizer
            .normalize(metric_set(features), area, SourceLabel::CrowdSource)
            .unwrap();
        assert_eq!(set.len(), 480);
        assert_eq!(set.dropped_non_polygonal, 20);
        assert!(set.buildings.iter().all(|b| b.source == SourceLabel::CrowdSource));
        assert!(set.buildings.iter().all(|b| b.area_name == "piaseczno"));
        assert!(set.buildings.iter().all(|b| b.area_m2 >= 0.0));
        assert_eq!(set.epsg, CRS_POLAND);
    }

    #[test]
    fn test_normalization_is_deterministic() {
        let (_dir, normalizer) = normalizer();
        let catalog = AreaCatalog::builtin();
        let area = catalog.resolve(Some("legionowo")).unwrap();

        let features = vec![
            raw_feature(square(0.0, 12.5)),
            raw_feature(square(100.0, 7.25)),
        ];
        let first = normalizer
            .normalize(metric_set(features.clone()), area, SourceLabel::Authority)
            .unwrap();
        let second = normalizer
            .normalize(metric_set(features), area, SourceLabel::Authority)
            .unwrap();

        let a: Vec<u64> = first.buildings.iter().map(|b| b.area_m2.to_bits()).collect();
        let b: Vec<u64> = second.buildings.iter().map(|b| b.area_m2.to_bits()).collect();
        assert_eq!(a, b);
        assert_eq!(first.buildings[0].area_m2, 12.5 * 12.5);
    }

    #[test]
    fn test_area_stats_median_even_and_odd() {
        let stats = AreaStats::compute(&[4.0, 1.0, 3.0]).unwrap();
        assert_eq!(stats.median, 3.0);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);

        let stats = AreaStats::compute(&[4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_eq!(stats.median, 2.5);
        assert_eq!(stats.mean, 2.5);

        assert!(AreaStats::compute(&[]).is_none());
    }

    #[test]
    fn test_artifact_written_at_deterministic_path_and_overwritten() {
        let (dir, normalizer) = normalizer();
        let catalog = AreaCatalog::builtin();
        let area = catalog.resolve(Some("piaseczno")).unwrap();

        normalizer
            .normalize(
                metric_set(vec![raw_feature(square(0.0, 10.0)), raw_feature(square(50.0, 10.0))]),
                area,
                SourceLabel::CrowdSource,
            )
            .unwrap();
        let path = dir.path().join("piaseczno_crowd-source.geojson");
        assert!(path.exists());

        normalizer
            .normalize(
                metric_set(vec![raw_feature(square(0.0, 10.0))]),
                area,
                SourceLabel::CrowdSource,
            )
            .unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let geojson: GeoJson = text.parse().unwrap();
        let GeoJson::FeatureCollection(fc) = geojson else {
            panic!("artifact is not a FeatureCollection");
        };
        assert_eq!(fc.features.len(), 1);
        let properties = fc.features[0].properties.as_ref().unwrap();
        assert_eq!(
            properties.get("source").and_then(|v| v.as_str()),
            Some("crowd-source")
        );
        assert_eq!(
            properties.get("area_name").and_then(|v| v.as_str()),
            Some("piaseczno")
        );
        assert_eq!(
            properties.get("area_m2").and_then(|v| v.as_f64()),
            Some(100.0)
        );
    }

    #[test]
    fn test_relabeled_rewrites_every_record() {
        let (_dir, normalizer) = normalizer();
        let catalog = AreaCatalog::builtin();
        let area = catalog.resolve(Some("legionowo")).unwrap();

        let set = normalizer
            .normalize(
                metric_set(vec![raw_feature(square(0.0, 10.0)), raw_feature(square(30.0, 5.0))]),
                area,
                SourceLabel::CrowdSource,
            )
            .unwrap();
        let set = set.relabeled(SourceLabel::AuthorityFallback);
        assert_eq!(set.source, SourceLabel::AuthorityFallback);
        assert!(set
            .buildings
            .iter()
            .all(|b| b.source == SourceLabel::AuthorityFallback));
    }

    #[test]
    fn test_multipolygon_survives_normalization() {
        let (_dir, normalizer) = normalizer();
        let catalog = AreaCatalog::builtin();
        let area = catalog.resolve(None).unwrap();

        let Geometry::Polygon(a) = square(0.0, 10.0) else { unreachable!() };
        let Geometry::Polygon(b) = square(100.0, 10.0) else { unreachable!() };
        let mp = Geometry::MultiPolygon(geo::MultiPolygon(vec![a, b]));
        let set = normalizer
            .normalize(metric_set(vec![raw_feature(mp)]), area, SourceLabel::Authority)
            .unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.buildings[0].area_m2, 200.0);
    }
}
