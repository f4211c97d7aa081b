use std::fs;
use std::path::Path;

use anyhow::Context;
use geo::Intersects;
use log::{info, warn};

use crate::areas::{AreaCatalog, StudyArea};
use crate::collect::global_variables::DataPaths;
use crate::collect::gugik::{GugikCollect, BUILDINGS_LAYER};
use crate::collect::RawFeatureSet;
use crate::error::{PipelineError, Result};
use crate::geo_core::{BoundingBox, CRS_WGS84};
use crate::geometric::normalize::{NormalizedBuildingSet, Normalizer, SourceLabel};
use crate::geometric::osm_buildings::OsmBuildings;

/// Authority fetcher: BDOT10k buildings for one study area.
///
/// Three attempt states tried in order, first success wins:
/// a local override file, the remote county archive, and finally the
/// crowd-source fetcher relabeled as `authority-fallback`. Every failed
/// attempt's cause is kept so total exhaustion reports all of them.
pub struct BdotBuildings {
    catalog: AreaCatalog,
    collect: GugikCollect,
    normalizer: Normalizer,
    fallback: OsmBuildings,
}

impl BdotBuildings {
    pub fn new(catalog: AreaCatalog, paths: &DataPaths) -> Result<Self> {
        Ok(BdotBuildings {
            collect: GugikCollect::new()?,
            normalizer: Normalizer::new(paths.raw.clone()),
            fallback: OsmBuildings::new(catalog.clone(), paths)?,
            catalog,
        })
    }

    pub fn fetch(
        &self,
        area_key: Option<&str>,
        local_override: Option<&Path>,
    ) -> Result<NormalizedBuildingSet> {
        let area = self.catalog.resolve(area_key)?;
        info!("Fetching reference data for: {}", area.name);

        let mut causes: Vec<String> = Vec::new();

        if let Some(path) = local_override {
            if path.exists() {
                match self.load_local(path, area) {
                    Ok(set) => return Ok(set),
                    Err(e) => {
                        warn!("Local file {} unusable: {e}", path.display());
                        causes.push(format!("local override: {e}"));
                    }
                }
            } else {
                // A missing optional override is not an attempt failure.
                warn!(
                    "Local file {} does not exist, trying the remote archive",
                    path.display()
                );
            }
        }

        match self.fetch_remote(area) {
            Ok(set) => return Ok(set),
            Err(e) => {
                warn!("BDOT10k download failed: {e}");
                causes.push(format!("remote archive: {e}"));
            }
        }

        info!("Falling back to OSM as the reference source for {}", area.key);
        info!("   (not official BDOT10k data, but it allows the comparison)");
        match self.fallback.fetch(Some(&area.key)) {
            Ok(set) => {
                let set = set.relabeled(SourceLabel::AuthorityFallback);
                if !set.is_empty() {
                    self.normalizer.persist(&set)?;
                }
                Ok(set)
            }
            Err(e) => {
                causes.push(format!("crowd-source fallback: {e}"));
                Err(PipelineError::AllSourcesExhausted {
                    area: area.key.clone(),
                    causes,
                })
            }
        }
    }

    fn fetch_remote(&self, area: &StudyArea) -> Result<NormalizedBuildingSet> {
        let teryt = area
            .teryt
            .as_deref()
            .ok_or_else(|| PipelineError::MissingRegionCode {
                area: area.key.clone(),
            })?;
        let raw = self.collect.fetch_layer(teryt, BUILDINGS_LAYER)?;
        self.normalizer.normalize(raw, area, SourceLabel::Authority)
    }

    /// Load a user-provided reference file (GeoJSON, WGS84), clipped to the
    /// area's bounding box. No network involved.
    fn load_local(&self, path: &Path, area: &StudyArea) -> Result<NormalizedBuildingSet> {
        info!("Loading local reference file: {}", path.display());
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let raw = RawFeatureSet::from_geojson(&text, CRS_WGS84)?;
        info!("Loaded {} features", raw.len());

        let raw = filter_bbox(raw, &area.bbox);
        info!("After bbox filter: {} features", raw.len());

        self.normalizer.normalize(raw, area, SourceLabel::Authority)
    }
}

fn filter_bbox(mut raw: RawFeatureSet, bbox: &BoundingBox) -> RawFeatureSet {
    let window = bbox.to_polygon();
    raw.features.retain(|f| window.intersects(&f.geometry));
    raw
}
