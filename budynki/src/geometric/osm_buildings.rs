use log::info;

use crate::areas::AreaCatalog;
use crate::collect::cache::ResponseCache;
use crate::collect::global_variables::DataPaths;
use crate::collect::overpass::OverpassCollect;
use crate::error::Result;
use crate::geometric::normalize::{NormalizedBuildingSet, Normalizer, SourceLabel};

/// Crowd-source fetcher: OSM buildings for one study area, via Overpass.
pub struct OsmBuildings {
    catalog: AreaCatalog,
    collect: OverpassCollect,
    normalizer: Normalizer,
}

impl OsmBuildings {
    pub fn new(catalog: AreaCatalog, paths: &DataPaths) -> Result<Self> {
        let collect = OverpassCollect::new(ResponseCache::new(paths.cache.clone()))?;
        Ok(OsmBuildings {
            catalog,
            collect,
            normalizer: Normalizer::new(paths.raw.clone()),
        })
    }

    /// Fetch and normalize OSM buildings. `None` selects the default area;
    /// an unknown key propagates as `UnknownArea`.
    pub fn fetch(&self, area_key: Option<&str>) -> Result<NormalizedBuildingSet> {
        let area = self.catalog.resolve(area_key)?;
        info!("Fetching OSM data for: {}", area.name);
        info!(
            "   BBox: ({}, {}, {}, {})",
            area.bbox.west, area.bbox.south, area.bbox.east, area.bbox.north
        );

        let raw = self.collect.fetch_features(&area.bbox, &area.tags)?;
        info!("Received {} raw OSM features", raw.len());

        self.normalizer
            .normalize(raw, area, SourceLabel::CrowdSource)
    }
}
