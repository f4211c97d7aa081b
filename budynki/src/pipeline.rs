use std::path::Path;

use log::{error, info, warn};

use crate::areas::AreaCatalog;
use crate::collect::global_variables::{DataPaths, GEOMETRY_SIMILARITY_THRESHOLD};
use crate::error::Result;
use crate::geometric::bdot_buildings::BdotBuildings;
use crate::geometric::osm_buildings::OsmBuildings;

/// Transient result of one fetcher invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched { count: usize },
    Failed { reason: String },
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Fetched { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    /// Crowd-source data usable standalone, authority step failed.
    Partial,
    Failed,
}

/// Per-area outcome of one `run` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub area_key: String,
    pub crowd_source: FetchOutcome,
    /// `None` when the run aborted before the authority step.
    pub authority: Option<FetchOutcome>,
    pub status: RunStatus,
}

impl RunReport {
    pub fn new(
        area_key: String,
        crowd_source: FetchOutcome,
        authority: Option<FetchOutcome>,
    ) -> Self {
        let status = if !crowd_source.is_success() {
            RunStatus::Failed
        } else if authority.as_ref().is_some_and(FetchOutcome::is_success) {
            RunStatus::Success
        } else {
            RunStatus::Partial
        };
        RunReport {
            area_key,
            crowd_source,
            authority,
            status,
        }
    }
}

/// Sequences the crowd-source and authority fetchers per area and
/// aggregates the per-area outcomes.
pub struct Pipeline {
    catalog: AreaCatalog,
    osm: OsmBuildings,
    bdot: BdotBuildings,
    /// Geometry similarity threshold forwarded to the comparison stage.
    pub similarity_threshold: f64,
}

impl Pipeline {
    pub fn new(catalog: AreaCatalog, paths: &DataPaths) -> Result<Self> {
        Ok(Pipeline {
            osm: OsmBuildings::new(catalog.clone(), paths)?,
            bdot: BdotBuildings::new(catalog.clone(), paths)?,
            catalog,
            similarity_threshold: GEOMETRY_SIMILARITY_THRESHOLD,
        })
    }

    /// Acquire both datasets for one area. Without the crowd-source
    /// baseline there is nothing to compare against, so a failure in the
    /// first step aborts the run; an authority failure after that is a
    /// partial success.
    pub fn run(
        &self,
        area_key: Option<&str>,
        local_override: Option<&Path>,
    ) -> Result<RunReport> {
        let area = self.catalog.resolve(area_key)?;
        info!("Starting acquisition for: {}", area.name);

        info!("Step 1/2: OpenStreetMap");
        let crowd_source = match self.osm.fetch(Some(&area.key)) {
            Ok(set) => FetchOutcome::Fetched { count: set.len() },
            Err(e) => {
                error!("OSM step failed for {}: {e}", area.key);
                let report = RunReport::new(
                    area.key.clone(),
                    FetchOutcome::Failed {
                        reason: e.to_string(),
                    },
                    None,
                );
                return Ok(report);
            }
        };

        info!("Step 2/2: BDOT10k");
        warn!("County archives are large, this step can take several minutes");
        let authority = match self.bdot.fetch(Some(&area.key), local_override) {
            Ok(set) => FetchOutcome::Fetched { count: set.len() },
            Err(e) => {
                error!("Authority step failed for {}: {e}", area.key);
                FetchOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        let report = RunReport::new(area.key.clone(), crowd_source, Some(authority));
        log_report(&report);
        Ok(report)
    }

    /// Run every registered area independently; one area's failure never
    /// stops the others.
    pub fn run_all(&self, local_override: Option<&Path>) -> Vec<RunReport> {
        info!("Processing all {} study areas", self.catalog.len());
        let mut reports = Vec::with_capacity(self.catalog.len());
        for area in self.catalog.iter() {
            match self.run(Some(&area.key), local_override) {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!("Area {} failed: {e}", area.key);
                    reports.push(RunReport::new(
                        area.key.clone(),
                        FetchOutcome::Failed {
                            reason: e.to_string(),
                        },
                        None,
                    ));
                }
            }
        }

        info!("Summary:");
        for report in &reports {
            info!(
                "   {:<24} {:?} (osm: {}, bdot: {})",
                report.area_key,
                report.status,
                describe(&report.crowd_source),
                report.authority.as_ref().map_or_else(
                    || "skipped".to_string(),
                    describe
                ),
            );
        }
        reports
    }
}

fn describe(outcome: &FetchOutcome) -> String {
    match outcome {
        FetchOutcome::Fetched { count } => format!("{count} buildings"),
        FetchOutcome::Failed { reason } => format!("failed: {reason}"),
    }
}

fn log_report(report: &RunReport) {
    match report.status {
        RunStatus::Success => info!("Acquisition finished for {}", report.area_key),
        RunStatus::Partial => warn!(
            "Partial success for {}: continuing with OSM data only",
            report.area_key
        ),
        RunStatus::Failed => error!("Acquisition failed for {}", report.area_key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_success() {
        let report = RunReport::new(
            "piaseczno".to_string(),
            FetchOutcome::Fetched { count: 480 },
            Some(FetchOutcome::Fetched { count: 512 }),
        );
        assert_eq!(report.status, RunStatus::Success);
    }

    #[test]
    fn test_authority_failure_after_crowd_source_success_is_partial() {
        let report = RunReport::new(
            "legionowo".to_string(),
            FetchOutcome::Fetched { count: 300 },
            Some(FetchOutcome::Failed {
                reason: "all sources exhausted".to_string(),
            }),
        );
        assert_eq!(report.status, RunStatus::Partial);
    }

    #[test]
    fn test_crowd_source_failure_aborts_the_run() {
        let report = RunReport::new(
            "warszawa_srodmiescie".to_string(),
            FetchOutcome::Failed {
                reason: "Overpass API unavailable".to_string(),
            },
            None,
        );
        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.authority.is_none());
    }
}
