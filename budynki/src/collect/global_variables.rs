use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default root for downloaded data and caches.
pub const DATA_PATH: &str = "./data";

/// Buffer used when checking geometry overlap in the comparison stage (m).
pub const COMPARISON_BUFFER_M: f64 = 5.0;
/// Buildings below this footprint are ignored by the comparison stage (m²).
pub const MIN_BUILDING_AREA_M2: f64 = 10.0;
/// Geometry similarity threshold (0-1, 1 = identical) forwarded to the
/// comparison stage.
pub const GEOMETRY_SIMILARITY_THRESHOLD: f64 = 0.7;

/// On-disk layout: `<root>/raw` for output artifacts and
/// `<root>/raw/osm_cache` for the Overpass response cache.
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub raw: PathBuf,
    pub cache: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let raw = root.as_ref().join("raw");
        let cache = raw.join("osm_cache");
        fs::create_dir_all(&cache)?;
        Ok(DataPaths { raw, cache })
    }
}
