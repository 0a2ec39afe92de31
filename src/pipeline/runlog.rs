//! The shared `script_running_log.csv` appender.
//!
//! Every completed step appends one row: script name, task description,
//! completion timestamp and duration in minutes. The file is created with a
//! header on first use.

use std::fs::OpenOptions;
use std::path::Path;

use chrono::Local;
use serde::{Deserialize, Serialize};

use crate::error::Result;

const HEADER: [&str; 4] = ["script", "task", "datetime_completed", "duration_mins"];

/// One run-log row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogEntry {
    pub script: String,
    pub task: String,
    pub datetime_completed: String,
    pub duration_mins: f64,
}

/// Append a completion row, creating the log with a header if absent.
pub fn append(path: &Path, script: &str, task: &str, duration_mins: f64) -> Result<()> {
    let needs_header = !path.exists();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(file);
    if needs_header {
        writer.write_record(HEADER)?;
    }
    writer.serialize(RunLogEntry {
        script: script.to_string(),
        task: task.to_string(),
        datetime_completed: Local::now().format("%Y%m%d-%H%M%S").to_string(),
        duration_mins,
    })?;
    writer.flush()?;
    Ok(())
}

/// Read the last `n` rows of the run log (most recent last).
pub fn tail(path: &Path, n: usize) -> Result<Vec<RunLogEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let mut reader = csv::Reader::from_path(path)?;
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        let entry: RunLogEntry = record?;
        rows.push(entry);
    }
    let skip = rows.len().saturating_sub(n);
    Ok(rows.split_off(skip))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_bootstraps_header_and_tail_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("script_running_log.csv");

        append(&path, "06_sausage_buffers", "create 1600m sausage buffers", 12.5).unwrap();
        append(&path, "07_od_closest_destinations", "closest destination OD matrix", 3.25).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("script,task,datetime_completed,duration_mins"));

        let rows = tail(&path, 1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].script, "07_od_closest_destinations");
        assert!((rows[0].duration_mins - 3.25).abs() < f64::EPSILON);
    }

    #[test]
    fn tail_of_missing_log_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let rows = tail(&dir.path().join("nope.csv"), 10).unwrap();
        assert!(rows.is_empty());
    }
}
