use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use log::debug;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

/// On-disk cache for remote feature-service responses, keyed by the query
/// text. Writes go through a temporary file and a rename so a concurrent
/// reader never sees a partial entry.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
}

impl ResponseCache {
    pub fn new(dir: PathBuf) -> Self {
        ResponseCache { dir }
    }

    fn entry_path(&self, query: &str) -> PathBuf {
        let digest = Sha256::digest(query.as_bytes());
        self.dir
            .join(format!("overpass_{}.json", hex::encode(&digest[..8])))
    }

    pub fn get(&self, query: &str) -> Option<String> {
        let path = self.entry_path(query);
        match fs::read_to_string(&path) {
            Ok(body) => {
                debug!("Cache hit: {}", path.display());
                Some(body)
            }
            Err(_) => None,
        }
    }

    pub fn put(&self, query: &str, body: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cache directory {}", self.dir.display()))?;
        let mut tmp = NamedTempFile::new_in(&self.dir)
            .context("Failed to create temporary cache file")?;
        tmp.write_all(body.as_bytes())
            .context("Failed to write cache entry")?;
        let path = self.entry_path(query);
        tmp.persist(&path)
            .with_context(|| format!("Failed to persist cache entry {}", path.display()))?;
        debug!("Cached response at {}", path.display());
        Ok(())
    }
}
