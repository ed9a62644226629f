use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::monitoring::types::{HostStatus, HostTarget};

/// Persisted per-host failure streak and downtime accounting
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HostState {
    /// Unreachable probes in a row; reset by any reachable probe
    pub consecutive_failures: u32,

    /// `Down` exactly when `consecutive_failures >= threshold`
    pub status: HostStatus,

    /// Downtime accrued since the last daily report, one interval per down cycle
    pub daily_down_seconds: u64,

    /// When `status` last changed
    pub last_change: Option<NaiveDateTime>,

    /// First failed probe of the current streak
    #[serde(default)]
    pub first_failure_at: Option<NaiveDateTime>,

    #[serde(default)]
    pub last_latency_ms: Option<f64>,
}

impl HostState {
    pub fn is_down(&self) -> bool {
        self.status == HostStatus::Down
    }

    /// Whether the status agrees with the failure streak for `threshold`
    pub fn is_consistent(&self, threshold: u32) -> bool {
        self.is_down() == (self.consecutive_failures >= threshold)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IspOutageState {
    pub active: bool,
    pub started_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DailySummaryState {
    /// Date the most recent daily report was generated for
    pub last_report_date: Option<NaiveDate>,

    /// Whether that report actually reached the transport
    pub last_report_posted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageKind {
    Alert,
    DailySummary { date: NaiveDate },
}

/// Rendered message waiting for delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingMessage {
    pub id: Uuid,
    pub kind: MessageKind,
    pub text: String,
    pub created_at: NaiveDateTime,
    /// Failed delivery attempts so far
    #[serde(default)]
    pub attempts: u32,
}

impl PendingMessage {
    pub fn new(kind: MessageKind, text: String, created_at: NaiveDateTime) -> Self {
        Self { id: Uuid::new_v4(), kind, text, created_at, attempts: 0 }
    }
}

/// Everything persisted between cycles
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default)]
    pub hosts: BTreeMap<String, HostState>,
    #[serde(default)]
    pub isp_outage: IspOutageState,
    #[serde(default)]
    pub daily_summary: DailySummaryState,
    #[serde(default)]
    pub outbox: Vec<PendingMessage>,
}

impl StateSnapshot {
    /// Drop state kept for hosts that are no longer configured.
    /// Returns the names that were removed.
    pub fn prune_orphans(&mut self, targets: &[HostTarget]) -> Vec<String> {
        let orphans: Vec<String> = self
            .hosts
            .keys()
            .filter(|name| !targets.iter().any(|t| &t.name == *name))
            .cloned()
            .collect();

        for name in &orphans {
            self.hosts.remove(name);
        }
        orphans
    }

    /// Start a new reporting day: zero every host's downtime and record
    /// `date` as reported, not yet posted.
    pub fn close_day(&mut self, date: NaiveDate) {
        for state in self.hosts.values_mut() {
            state.daily_down_seconds = 0;
        }
        self.daily_summary = DailySummaryState { last_report_date: Some(date), last_report_posted: false };
    }

    /// Remove delivered and dropped messages from the outbox and keep the
    /// attempt counts of the rest.
    pub fn settle_outbox(&mut self, delivered: &[PendingMessage], remaining: Vec<PendingMessage>) {
        for message in delivered {
            if let MessageKind::DailySummary { date } = message.kind {
                if self.daily_summary.last_report_date == Some(date) {
                    self.daily_summary.last_report_posted = true;
                }
            }
        }
        self.outbox = remaining;
    }
}
