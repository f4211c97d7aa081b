use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context};
use log::info;
use reqwest::blocking::Client;
use tempfile::TempDir;
use zip::ZipArchive;

use crate::collect::RawFeatureSet;
use crate::error::{PipelineError, Result};
use crate::geo_core::CRS_POLAND;

/// GUGiK open-data root for BDOT10k county archives.
pub const GUGIK_BDOT_URL: &str = "https://opendata.geoportal.gov.pl/bdot10k/schemat2021/GeoJSON";

/// BDOT10k building-footprint layer.
pub const BUILDINGS_LAYER: &str = "BUBD_A";

/// County archives run into hundreds of megabytes.
const REQUEST_TIMEOUT_S: u64 = 600;

const SERVICE: &str = "GUGiK BDOT10k";

/// Downloads a BDOT10k county archive and loads one named layer out of it.
/// The archive and its extracted contents live in a temporary directory
/// scoped to the call; it is removed on every exit path.
pub struct GugikCollect {
    client: Client,
}

impl GugikCollect {
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_S))
            .user_agent(concat!("budynki/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(GugikCollect { client })
    }

    /// Archive URL for a TERYT county code; the voivodeship path segment is
    /// the first two digits of the code.
    pub fn archive_url(teryt: &str) -> String {
        let voivodeship = teryt.get(..2).unwrap_or(teryt);
        format!("{}/{}/{}_GeoJSON.zip", GUGIK_BDOT_URL, voivodeship, teryt)
    }

    /// Download, extract and load `layer` for the given county. Layer data
    /// is published in EPSG:2180.
    pub fn fetch_layer(&self, teryt: &str, layer: &str) -> Result<RawFeatureSet> {
        let url = Self::archive_url(teryt);
        info!("Downloading BDOT10k archive: {url}");

        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| PipelineError::SourceUnavailable {
                service: SERVICE,
                source: e.into(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::SourceUnavailable {
                service: SERVICE,
                source: anyhow!("HTTP {status} for {url}"),
            });
        }
        let bytes = response
            .bytes()
            .map_err(|e| PipelineError::SourceUnavailable {
                service: SERVICE,
                source: e.into(),
            })?;
        info!("Downloaded {} bytes", bytes.len());

        let temp_dir = extract_archive(&bytes, &url)?;
        info!("Extracted archive into {}", temp_dir.path().display());

        let layer_path =
            find_layer(temp_dir.path(), layer).ok_or_else(|| PipelineError::MalformedArchive {
                archive: url.clone(),
                reason: format!("no {layer}.geojson layer found after extraction"),
            })?;
        info!("Layer file: {}", layer_path.display());

        let text = fs::read_to_string(&layer_path)
            .with_context(|| format!("Failed to read layer file {}", layer_path.display()))?;
        let set = RawFeatureSet::from_geojson(&text, CRS_POLAND)?;
        info!("Loaded {} features from layer {layer}", set.len());
        Ok(set)
        // temp_dir drops here, removing the archive and everything extracted
    }
}

/// Spool the archive into a fresh temporary directory and unpack it there,
/// so both the ZIP and its contents share the attempt's lifetime.
fn extract_archive(bytes: &[u8], url: &str) -> Result<TempDir> {
    let temp_dir = TempDir::new().context("Failed to create temporary extraction directory")?;

    let zip_path = temp_dir.path().join("archive.zip");
    fs::write(&zip_path, bytes)
        .with_context(|| format!("Failed to write archive to {}", zip_path.display()))?;

    let file = fs::File::open(&zip_path)
        .with_context(|| format!("Failed to reopen {}", zip_path.display()))?;
    let mut archive = ZipArchive::new(file).map_err(|e| PipelineError::MalformedArchive {
        archive: url.to_string(),
        reason: format!("cannot open ZIP: {e}"),
    })?;

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| PipelineError::MalformedArchive {
                archive: url.to_string(),
                reason: format!("corrupt entry {i}: {e}"),
            })?;
        let outpath = temp_dir.path().join(file.mangled_name());
        if file.is_dir() {
            fs::create_dir_all(&outpath).context("Failed to create extracted directory")?;
        } else {
            if let Some(parent) = outpath.parent() {
                fs::create_dir_all(parent).context("Failed to create extracted directory")?;
            }
            let mut outfile = fs::File::create(&outpath)
                .with_context(|| format!("Failed to create {}", outpath.display()))?;
            std::io::copy(&mut file, &mut outfile).map_err(|e| {
                PipelineError::MalformedArchive {
                    archive: url.to_string(),
                    reason: format!("truncated entry {}: {e}", outpath.display()),
                }
            })?;
        }
    }

    Ok(temp_dir)
}

/// Recursive lookup for `<layer>.geojson` anywhere under `dir`; archives
/// nest their layers in per-county subdirectories.
fn find_layer(dir: &Path, layer: &str) -> Option<PathBuf> {
    for entry in fs::read_dir(dir).ok()? {
        let path = entry.ok()?.path();
        if path.is_dir() {
            if let Some(found) = find_layer(&path, layer) {
                return Some(found);
            }
        } else if path.file_stem().and_then(|s| s.to_str()) == Some(layer)
            && path.extension().and_then(|s| s.to_str()) == Some("geojson")
        {
            return Some(path);
        }
    }
    None
}
