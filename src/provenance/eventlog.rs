//! WR-015: Append-only JSONL run event log.
//!
//! Events are buffered in memory for the whole run and written once the
//! output directory exists, so a run that fails before launching leaves
//! nothing on disk.

use crate::core::types::{RunEvent, TimestampedEvent};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Generate an ISO 8601 UTC timestamp.
pub fn now_iso8601() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    format_iso8601(secs)
}

/// Format seconds since the epoch as `YYYY-MM-DDTHH:MM:SSZ`.
fn format_iso8601(secs: u64) -> String {
    let mut days = (secs / 86400) as i64;
    let time_secs = secs % 86400;

    let mut year = 1970i64;
    loop {
        let year_days = if is_leap(year) { 366 } else { 365 };
        if days < year_days {
            break;
        }
        days -= year_days;
        year += 1;
    }

    let feb = if is_leap(year) { 29 } else { 28 };
    let month_days = [31, feb, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];
    let mut month = 1;
    for md in month_days {
        if days < md {
            break;
        }
        days -= md;
        month += 1;
    }

    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        year,
        month,
        days + 1,
        time_secs / 3600,
        (time_secs % 3600) / 60,
        time_secs % 60
    )
}

fn is_leap(y: i64) -> bool {
    (y % 4 == 0 && y % 100 != 0) || y % 400 == 0
}

fn now_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}

/// Generate a run ID.
pub fn generate_run_id() -> String {
    format!("r-{:012x}", now_nanos() & 0xFFFF_FFFF_FFFF)
}

/// Seed for runs that did not ask for one. Clock-derived, mixed through BLAKE3.
pub fn random_seed() -> u64 {
    let digest = blake3::hash(&now_nanos().to_le_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    // Samplers downstream seed 32-bit generators.
    u64::from_le_bytes(bytes) % (i32::MAX as u64)
}

/// Event log location inside a run's output directory.
pub fn event_log_path(output_dir: &Path) -> PathBuf {
    output_dir.join("events.jsonl")
}

/// In-memory event buffer for a single run.
#[derive(Debug, Clone)]
pub struct EventBuffer {
    run_id: String,
    events: Vec<TimestampedEvent>,
}

impl EventBuffer {
    pub fn new(run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            events: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn record(&mut self, event: RunEvent) {
        self.events.push(TimestampedEvent {
            ts: now_iso8601(),
            event,
        });
    }

    /// Append all buffered events to `<output_dir>/events.jsonl`.
    pub fn flush(&mut self, output_dir: &Path) -> Result<(), String> {
        append_events(&event_log_path(output_dir), &self.events)?;
        self.events.clear();
        Ok(())
    }
}

/// Append events to a JSONL file, one object per line.
pub fn append_events(path: &Path, events: &[TimestampedEvent]) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
    }

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("cannot open event log {}: {}", path.display(), e))?;

    for te in events {
        let json =
            serde_json::to_string(te).map_err(|e| format!("JSON serialize error: {}", e))?;
        writeln!(file, "{}", json).map_err(|e| format!("write error: {}", e))?;
    }

    Ok(())
}
