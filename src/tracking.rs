#![forbid(unsafe_code)]

//! Best-effort mirror of each collection run to the experiment-tracking
//! service.
//!
//! Every run uploads a visualization table (same columns as the metadata
//! CSV) tagged with the target batch version, then prunes the service's own
//! oldest runs so its retention window tracks the primary one. Nothing in
//! here is load-bearing: callers treat every failure as a warning and the
//! primary pipeline never waits on this module's success.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dataset::{CSV_COLUMNS, VideoRecord};

const TRACKER_TIMEOUT: Duration = Duration::from_secs(15);
const JOB_TYPE: &str = "daily_collection";

/// Where and how to reach the tracking service.
#[derive(Debug, Clone)]
pub struct TrackingSettings {
    pub base_url: String,
    pub api_key: String,
    pub project: String,
}

/// The experiment-tracking capability the collection binary drives.
pub trait RunTracker {
    /// Uploads the run's records as a visualization table tagged with the
    /// batch version.
    fn log_run(&self, batch_version: &str, records: &[VideoRecord]) -> Result<()>;

    /// Deletes the oldest runs past `max_runs`, returning how many went.
    fn prune_runs(&self, max_runs: usize) -> Result<usize>;
}

/// Tracker used when no service is configured.
pub struct DisabledTracker;

impl RunTracker for DisabledTracker {
    fn log_run(&self, _batch_version: &str, _records: &[VideoRecord]) -> Result<()> {
        Ok(())
    }

    fn prune_runs(&self, _max_runs: usize) -> Result<usize> {
        Ok(0)
    }
}

#[derive(Debug, Serialize)]
struct RunPayload<'a> {
    name: &'a str,
    job_type: &'a str,
    tags: Vec<&'a str>,
    table: TablePayload,
}

#[derive(Debug, Serialize)]
struct TablePayload {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Deserialize)]
struct RunInfo {
    id: String,
    #[serde(default)]
    name: String,
    created_at: DateTime<Utc>,
}

/// JSON/HTTP client for the tracking service.
pub struct HttpTracker {
    agent: ureq::Agent,
    settings: TrackingSettings,
}

impl HttpTracker {
    pub fn new(mut settings: TrackingSettings) -> Self {
        settings.base_url = settings.base_url.trim_end_matches('/').to_string();
        let agent = ureq::AgentBuilder::new().timeout(TRACKER_TIMEOUT).build();
        Self { agent, settings }
    }

    fn runs_url(&self) -> String {
        format!(
            "{}/projects/{}/runs",
            self.settings.base_url, self.settings.project
        )
    }

    fn authorized(&self, request: ureq::Request) -> ureq::Request {
        if self.settings.api_key.is_empty() {
            request
        } else {
            request.set(
                "Authorization",
                &format!("Bearer {}", self.settings.api_key),
            )
        }
    }

    fn list_runs(&self) -> Result<Vec<RunInfo>> {
        let response = self
            .authorized(self.agent.get(&self.runs_url()))
            .call()
            .context("listing tracking runs")?;
        response
            .into_json::<Vec<RunInfo>>()
            .context("decoding tracking run list")
    }
}

impl RunTracker for HttpTracker {
    fn log_run(&self, batch_version: &str, records: &[VideoRecord]) -> Result<()> {
        let payload = RunPayload {
            name: batch_version,
            job_type: JOB_TYPE,
            tags: vec!["production", "daily", batch_version],
            table: TablePayload {
                columns: CSV_COLUMNS.iter().map(|c| c.to_string()).collect(),
                rows: table_rows(records),
            },
        };

        self.authorized(self.agent.post(&self.runs_url()))
            .send_json(&payload)
            .with_context(|| format!("uploading tracking run {batch_version}"))?;
        info!(
            "tracking run {batch_version} uploaded ({} row(s))",
            records.len()
        );
        Ok(())
    }

    fn prune_runs(&self, max_runs: usize) -> Result<usize> {
        let runs = self.list_runs()?;
        let stale = runs_to_delete(runs, max_runs);
        if stale.is_empty() {
            return Ok(0);
        }

        info!("pruning {} tracking run(s) past the window", stale.len());
        let mut deleted = 0usize;
        for run in &stale {
            let url = format!("{}/{}", self.runs_url(), run.id);
            match self.authorized(self.agent.delete(&url)).call() {
                Ok(_) => deleted += 1,
                Err(err) => warn!("could not delete tracking run {}: {err}", run.name),
            }
        }
        Ok(deleted)
    }
}

/// Table rows in [`CSV_COLUMNS`] order, taken from each record's serialized
/// form so the columns can never drift from the CSV.
fn table_rows(records: &[VideoRecord]) -> Vec<Vec<Value>> {
    records
        .iter()
        .map(|record| {
            let value = serde_json::to_value(record).unwrap_or(Value::Null);
            CSV_COLUMNS
                .iter()
                .map(|column| value.get(column).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect()
}

/// Oldest runs past the retained maximum, in deletion order.
fn runs_to_delete(mut runs: Vec<RunInfo>, max_runs: usize) -> Vec<RunInfo> {
    if runs.len() <= max_runs {
        return Vec::new();
    }
    runs.sort_by_key(|run| run.created_at);
    let excess = runs.len() - max_runs;
    runs.truncate(excess);
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn run(id: &str, day: u32) -> RunInfo {
        RunInfo {
            id: id.to_string(),
            name: format!("batch_{day:03}"),
            created_at: Utc.with_ymd_and_hms(2026, 7, day, 0, 0, 0).unwrap(),
        }
    }

    fn record(video_id: &str) -> VideoRecord {
        VideoRecord {
            video_id: video_id.to_string(),
            title: "t".to_string(),
            category_id: "10".to_string(),
            category_name: "Music".to_string(),
            views: 7,
            likes: 0,
            comments: 0,
            channel_id: "c".to_string(),
            channel_subscribers: 0,
            channel_total_views: 0,
            channel_video_count: 0,
            tags: String::new(),
            description_len: 0,
            duration_seconds: 90,
            definition: "hd".to_string(),
            language: "en".to_string(),
            published_at: "2026-07-29T10:00:00Z".to_string(),
            captured_at: "2026-08-05T09:00:00.000000".to_string(),
            video_url: "https://www.youtube.com/watch?v=x".to_string(),
            thumbnail_url: String::new(),
            batch_version: "batch_004".to_string(),
        }
    }

    #[test]
    fn table_rows_follow_the_csv_columns() {
        let rows = table_rows(&[record("x")]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].len(), CSV_COLUMNS.len());
        assert_eq!(rows[0][0], Value::String("x".to_string()));
        // "views" sits at index 4 of the column order.
        assert_eq!(rows[0][4], Value::from(7u64));
        let last = rows[0].last().unwrap();
        assert_eq!(*last, Value::String("batch_004".to_string()));
    }

    #[test]
    fn prune_selects_the_oldest_excess_runs() {
        let runs = vec![run("c", 3), run("a", 1), run("d", 4), run("b", 2)];
        let stale = runs_to_delete(runs, 2);
        let ids: Vec<&str> = stale.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn prune_keeps_everything_within_the_window() {
        let runs = vec![run("a", 1), run("b", 2)];
        assert!(runs_to_delete(runs, 2).is_empty());
        assert!(runs_to_delete(Vec::new(), 0).is_empty());
    }

    #[test]
    fn run_payload_serializes_tags_and_table() {
        let payload = RunPayload {
            name: "batch_009",
            job_type: JOB_TYPE,
            tags: vec!["production", "daily", "batch_009"],
            table: TablePayload {
                columns: CSV_COLUMNS.iter().map(|c| c.to_string()).collect(),
                rows: table_rows(&[record("x")]),
            },
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["name"], "batch_009");
        assert_eq!(value["job_type"], "daily_collection");
        assert_eq!(value["tags"][2], "batch_009");
        assert_eq!(value["table"]["columns"][0], "video_id");
    }

    #[test]
    fn disabled_tracker_is_inert() {
        let tracker = DisabledTracker;
        tracker.log_run("batch_001", &[record("x")]).unwrap();
        assert_eq!(tracker.prune_runs(0).unwrap(), 0);
    }
}
