//! Per-host, per-day audit trail of raw probe results.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::monitoring::types::ProbeOutcome;

/// Append-only probe log under `<dir>/<host>-<YYYY-MM-DD>.log`
#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding `host`'s records for the day of `outcome`
    pub fn path_for(&self, outcome: &ProbeOutcome) -> PathBuf {
        self.dir.join(format!("{}-{}.log", outcome.host, outcome.timestamp.format("%Y-%m-%d")))
    }

    /// Append one line per outcome. Keeps going after a failed host and
    /// returns the first error.
    pub fn record(&self, outcomes: &BTreeMap<String, ProbeOutcome>) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        let mut first_error = None;
        for outcome in outcomes.values() {
            if let Err(e) = self.append(outcome) {
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    fn append(&self, outcome: &ProbeOutcome) -> io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(self.path_for(outcome))?;
        writeln!(file, "{}", format_line(outcome))
    }
}

fn format_line(outcome: &ProbeOutcome) -> String {
    let status = if outcome.reachable { "up" } else { "down" };
    let mut line = format!("{} {} {}", outcome.timestamp.format("%Y-%m-%d %H:%M:%S"), outcome.address, status);
    if let Some(latency) = outcome.latency_ms {
        line.push_str(&format!(" {latency:.1}ms"));
    }
    line
}
