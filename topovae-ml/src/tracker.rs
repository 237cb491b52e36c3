//! Run tracker — per-run scalar events, figure artifacts, and a final summary.
//!
//! Each run gets its own directory under the runs root. Scalars are appended
//! to `events.jsonl` as they arrive; artifacts are registered by path and
//! written into `summary.json` when the run finishes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::MlError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Serialize)]
struct ScalarEvent<'a> {
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    step: Option<usize>,
    value: f64,
    logged_at: DateTime<Utc>,
}

/// Tracker handle for one run.
pub struct RunTracker {
    project: String,
    run_name: String,
    run_dir: PathBuf,
    events_path: PathBuf,
    artifacts: Vec<Artifact>,
    started_at: DateTime<Utc>,
}

impl RunTracker {
    /// Create the run directory and start a fresh event log.
    pub fn init(runs_dir: &Path, project: &str, run_name: &str) -> Result<Self, MlError> {
        let run_dir = runs_dir.join(run_name);
        std::fs::create_dir_all(&run_dir)?;
        let events_path = run_dir.join("events.jsonl");
        // Truncate any leftover log from a previous attempt of the same run.
        std::fs::write(&events_path, b"")?;
        Ok(Self {
            project: project.to_string(),
            run_name: run_name.to_string(),
            run_dir,
            events_path,
            artifacts: Vec::new(),
            started_at: Utc::now(),
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Append one scalar event to the log.
    pub fn log_scalar(
        &mut self,
        name: &str,
        step: Option<usize>,
        value: f64,
    ) -> Result<(), MlError> {
        let event = ScalarEvent {
            name,
            step,
            value,
            logged_at: Utc::now(),
        };
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&self.events_path)?;
        writeln!(file, "{}", serde_json::to_string(&event)?)?;
        Ok(())
    }

    /// Register a figure or table produced by the run.
    pub fn log_artifact(&mut self, name: &str, path: &Path) {
        self.artifacts.push(Artifact {
            name: name.to_string(),
            path: path.to_path_buf(),
        });
    }

    /// Finalize the run: write `summary.json` and consume the tracker.
    pub fn finish(
        self,
        status: &str,
        summary: serde_json::Value,
    ) -> Result<PathBuf, MlError> {
        let path = self.run_dir.join("summary.json");
        let document = json!({
            "project": self.project,
            "run_name": self.run_name,
            "status": status,
            "started_at": self.started_at,
            "finished_at": Utc::now(),
            "artifacts": self.artifacts,
            "summary": summary,
        });
        topovae_core::persistence::atomic_write_json(&path, &document)?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_appended_one_per_line() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut tracker = RunTracker::init(dir.path(), "topo-vae", "run_x").unwrap();
        tracker.log_scalar("train_loss", Some(1), 0.5).unwrap();
        tracker.log_scalar("test_loss", Some(1), 0.6).unwrap();

        let text = std::fs::read_to_string(dir.path().join("run_x/events.jsonl")).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let event: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(event["name"], "train_loss");
        assert_eq!(event["step"], 1);
    }

    #[test]
    fn finish_writes_summary_with_artifacts() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut tracker = RunTracker::init(dir.path(), "topo-vae", "run_y").unwrap();
        tracker.log_artifact("fig_loss", Path::new("results/runs/run_y/fig_loss.svg"));
        let path = tracker
            .finish("completed", serde_json::json!({"best_test_loss": 0.4}))
            .unwrap();

        let summary: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(summary["status"], "completed");
        assert_eq!(summary["summary"]["best_test_loss"], 0.4);
        assert_eq!(summary["artifacts"][0]["name"], "fig_loss");
    }

    #[test]
    fn reinit_truncates_a_previous_event_log() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut tracker = RunTracker::init(dir.path(), "topo-vae", "run_z").unwrap();
        tracker.log_scalar("train_loss", None, 1.0).unwrap();
        drop(tracker);

        let tracker = RunTracker::init(dir.path(), "topo-vae", "run_z").unwrap();
        let text = std::fs::read_to_string(tracker.run_dir().join("events.jsonl")).unwrap();
        assert!(text.is_empty());
    }
}
