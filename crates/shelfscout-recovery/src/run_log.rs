//! Per-run audit records.
//!
//! Layout: `<state_dir>/runs/<run_id>/<site>.json` plus one
//! `<site>-<label>.png` per screenshot taken during the run.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::StoreError;
use crate::harvest::Harvest;
use crate::persist::{site_file, write_bytes_atomic, write_json_atomic};

#[derive(Debug, Serialize)]
pub struct RunRecord<'a> {
    pub run_id: Uuid,
    pub site: &'a str,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub screenshots: Vec<String>,
    #[serde(flatten)]
    pub harvest: &'a Harvest,
}

#[derive(Debug, Clone)]
pub struct RunLog {
    run_id: Uuid,
    dir: PathBuf,
}

impl RunLog {
    /// A fresh run directory under `state_dir`. Nothing is created until the
    /// first record is written.
    #[must_use]
    pub fn new(state_dir: &Path) -> Self {
        let run_id = Uuid::new_v4();
        Self {
            run_id,
            dir: state_dir.join("runs").join(run_id.to_string()),
        }
    }

    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes the screenshots and then the record for one site. Returns the
    /// record path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the site code is not a valid file name or
    /// any write fails.
    pub async fn write(
        &self,
        harvest: &Harvest,
        started_at: DateTime<Utc>,
    ) -> Result<PathBuf, StoreError> {
        let site = harvest.outcome.site.as_str();

        let mut screenshots = Vec::with_capacity(harvest.outcome.screenshots.len());
        for shot in &harvest.outcome.screenshots {
            let path = site_file(&self.dir, site, &format!("-{}.png", shot.label))?;
            write_bytes_atomic(&path, &shot.png).await?;
            if let Some(name) = path.file_name() {
                screenshots.push(name.to_string_lossy().into_owned());
            }
        }

        let record = RunRecord {
            run_id: self.run_id,
            site,
            started_at,
            finished_at: Utc::now(),
            screenshots,
            harvest,
        };
        let path = site_file(&self.dir, site, ".json")?;
        write_json_atomic(&path, "run record", &record).await?;
        tracing::debug!(site, path = %path.display(), "run record written");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::controller::{ContentSource, RecoveryOutcome, RunMode, RunReason, Screenshot};
    use crate::harvest::{ItemCounts, WalkStop};

    fn harvest() -> Harvest {
        Harvest {
            outcome: RecoveryOutcome {
                site: "shop".to_string(),
                mode: RunMode::Live,
                target_url: "https://shop.example/".to_string(),
                content: Some("<html>secret body</html>".to_string()),
                source: ContentSource::Live {
                    url: "https://shop.example/".to_string(),
                },
                stale: false,
                reason: RunReason::LiveOk,
                verdicts: Vec::new(),
                transitions: Vec::new(),
                ladder: None,
                screenshots: vec![Screenshot {
                    label: "listing",
                    png: vec![0x89, b'P', b'N', b'G'],
                }],
                elapsed: Duration::from_millis(1200),
            },
            extractor: "jsonld".to_string(),
            pages: 1,
            walk_stop: WalkStop::SinglePage,
            counts: ItemCounts::default(),
            items: Vec::new(),
            selector: None,
            snapshot_saved: false,
        }
    }

    #[tokio::test]
    async fn record_and_screenshots_land_in_run_dir() {
        let state = tempfile::tempdir().unwrap();
        let log = RunLog::new(state.path());

        let path = log.write(&harvest(), Utc::now()).await.unwrap();

        assert_eq!(path, log.dir().join("shop.json"));
        assert!(log.dir().join("shop-listing.png").exists());
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["run_id"], log.run_id().to_string());
        assert_eq!(json["outcome"]["reason"], "live_ok");
        assert_eq!(json["walk_stop"], "single_page");
        assert_eq!(json["screenshots"][0], "shop-listing.png");
        assert!(json["outcome"].get("content").is_none());
    }
}
