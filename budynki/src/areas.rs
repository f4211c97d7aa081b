use anyhow::bail;

use crate::error::{PipelineError, Result};
use crate::geo_core::BoundingBox;

/// OSM-style tag predicate selecting which features to fetch.
/// `value = None` matches any value of the key (`building=*`).
#[derive(Debug, Clone)]
pub struct TagFilter {
    pub key: String,
    pub value: Option<String>,
}

impl TagFilter {
    pub fn key_only(key: &str) -> Self {
        TagFilter {
            key: key.to_string(),
            value: None,
        }
    }

    /// Render as an Overpass QL tag clause.
    pub fn overpass_clause(&self) -> String {
        match &self.value {
            Some(value) => format!("[\"{}\"=\"{}\"]", self.key, value),
            None => format!("[\"{}\"]", self.key),
        }
    }
}

/// One registered study area. Immutable after catalogue construction.
#[derive(Debug, Clone)]
pub struct StudyArea {
    pub key: String,
    pub name: String,
    pub bbox: BoundingBox,
    pub tags: TagFilter,
    pub description: String,
    /// TERYT county code, required only by the BDOT10k archive path.
    pub teryt: Option<String>,
}

/// Static catalogue of study areas, ordered for display only.
#[derive(Debug, Clone)]
pub struct AreaCatalog {
    areas: Vec<StudyArea>,
    default_key: String,
}

impl AreaCatalog {
    /// Validates every entry up front so a malformed catalogue never
    /// reaches the fetchers.
    pub fn new(areas: Vec<StudyArea>, default_key: &str) -> anyhow::Result<Self> {
        for area in &areas {
            if !area.bbox.is_valid() {
                bail!(
                    "study area {:?} has a malformed bounding box {:?}",
                    area.key,
                    area.bbox
                );
            }
        }
        if !areas.iter().any(|a| a.key == default_key) {
            bail!("default study area {:?} is not in the catalogue", default_key);
        }
        Ok(AreaCatalog {
            areas,
            default_key: default_key.to_string(),
        })
    }

    /// The built-in Mazowieckie catalogue. Whole-voivodeship downloads take
    /// far too long, so the catalogue covers three contrasting counties.
    pub fn builtin() -> Self {
        let areas = vec![
            StudyArea {
                key: "warszawa_srodmiescie".to_string(),
                name: "Warszawa - Śródmieście".to_string(),
                bbox: BoundingBox::new(20.9800, 52.2100, 21.0500, 52.2500),
                tags: TagFilter::key_only("building"),
                description: "Centrum Warszawy - gęsta zabudowa".to_string(),
                teryt: Some("1465".to_string()),
            },
            StudyArea {
                key: "piaseczno".to_string(),
                name: "Piaseczno".to_string(),
                bbox: BoundingBox::new(21.0000, 52.0500, 21.1000, 52.1000),
                tags: TagFilter::key_only("building"),
                description: "Piaseczno - zabudowa podmiejska".to_string(),
                teryt: Some("1418".to_string()),
            },
            StudyArea {
                key: "legionowo".to_string(),
                name: "Legionowo".to_string(),
                bbox: BoundingBox::new(20.9000, 52.3800, 21.0000, 52.4200),
                tags: TagFilter::key_only("building"),
                description: "Legionowo - miasto satelickie".to_string(),
                teryt: Some("1408".to_string()),
            },
        ];
        Self::new(areas, "warszawa_srodmiescie").expect("built-in catalogue is valid")
    }

    /// Look up an area by key; `None` selects the default area.
    pub fn resolve(&self, key: Option<&str>) -> Result<&StudyArea> {
        let key = key.unwrap_or(&self.default_key);
        self.areas
            .iter()
            .find(|a| a.key == key)
            .ok_or_else(|| PipelineError::UnknownArea {
                key: key.to_string(),
                known: self.keys(),
            })
    }

    pub fn keys(&self) -> Vec<String> {
        self.areas.iter().map(|a| a.key.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StudyArea> {
        self.areas.iter()
    }

    pub fn default_key(&self) -> &str {
        &self.default_key
    }

    pub fn len(&self) -> usize {
        self.areas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }
}
