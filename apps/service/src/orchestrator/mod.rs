/// Orchestrator module - drives one monitoring cycle end to end
///
/// One cycle walks through:
/// - Loading the last durable snapshot (cold start when missing or corrupt)
/// - Probing every host concurrently
/// - Classifying outcomes into host and ISP events
/// - Rendering alerts and the daily summary into the outbox
/// - Persisting the snapshot atomically, then delivering the outbox
///
/// Nothing is kept in memory between cycles; every cycle starts from what
/// was last durably written.


use std::fmt;
use std::future::{self, Future};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::{Config, ConfigError};
use crate::journal::AuditLog;
use crate::lock::{LockError, RunLock};
use crate::monitoring::checker::Prober;
use crate::monitoring::classifier::{MonitorEvent, classify};
use crate::monitoring::scheduler::ProbeScheduler;
use crate::monitoring::types::HostTarget;
use crate::report::{DeliveryPolicy, Notifier, Reporter, deliver_outbox};
use crate::state::{PendingMessage, StateSnapshot, StateStore, StoreError};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("another cycle is running (lock {0})")]
    Busy(PathBuf),
    #[error("failed to take run lock: {0}")]
    Lock(LockError),
    #[error("stop requested before classification")]
    Cancelled,
    #[error("cycle updates lost, state not persisted: {0}")]
    Persist(#[source] StoreError),
}

impl From<LockError> for CycleError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::Busy(path) => CycleError::Busy(path),
            other => CycleError::Lock(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    StateLoaded,
    ProbesDispatched,
    Classified,
    Reported,
    StatePersisted,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::StateLoaded => "state-loaded",
            CyclePhase::ProbesDispatched => "probes-dispatched",
            CyclePhase::Classified => "classified",
            CyclePhase::Reported => "reported",
            CyclePhase::StatePersisted => "state-persisted",
        };
        write!(f, "{}", name)
    }
}

/// What one completed cycle did
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub probed: usize,
    pub unreachable: usize,
    pub events: Vec<MonitorEvent>,
    /// Host events folded into an ISP event
    pub suppressed: usize,
    pub summary_rendered: bool,
    /// Loaded state was missing or unreadable
    pub cold_start: bool,
    pub pruned: Vec<String>,
    pub queued: usize,
    pub delivered: usize,
    pub dropped: usize,
    /// Messages still waiting in the outbox
    pub pending: usize,
}

/// Owns every component a cycle touches
pub struct CycleCoordinator {
    targets: Vec<HostTarget>,
    scheduler: ProbeScheduler,
    store: Arc<dyn StateStore>,
    reporter: Reporter,
    notifier: Arc<dyn Notifier>,
    delivery: DeliveryPolicy,
    audit: AuditLog,
    interval: Duration,
    lock: Option<(PathBuf, Duration)>,
}

impl CycleCoordinator {
    pub fn from_config(
        config: &Config,
        prober: Arc<dyn Prober>,
        store: Arc<dyn StateStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ConfigError> {
        let interval = config.cycle_interval();
        let reporter = Reporter::new(
            config.notifier.mention_tags.clone(),
            config.notifier.max_message_len,
            config.report_time()?,
        );
        let delivery = DeliveryPolicy {
            max_attempts: config.notifier.max_attempts,
            send_timeout: Duration::from_millis(config.notifier.send_timeout_ms),
            budget: delivery_budget(interval, config.cycle_deadline()),
        };

        Ok(Self {
            targets: config.targets(),
            scheduler: ProbeScheduler::new(prober, config.probe_timeout(), config.cycle_deadline()),
            store,
            reporter,
            notifier,
            delivery,
            audit: AuditLog::new(config.audit_dir()),
            interval,
            lock: None,
        })
    }

    /// Hold an exclusive lock file for the duration of every cycle
    pub fn with_run_lock(mut self, path: impl Into<PathBuf>, stale_after: Duration) -> Self {
        self.lock = Some((path.into(), stale_after));
        self
    }

    pub fn targets(&self) -> &[HostTarget] {
        &self.targets
    }

    pub async fn run_cycle(&self, now: NaiveDateTime) -> Result<CycleReport, CycleError> {
        self.run_cycle_until(now, future::pending()).await
    }

    /// Run one cycle, abandoning it if `shutdown` completes while probes are
    /// in flight. Once outcomes are classified the cycle runs to the end.
    pub async fn run_cycle_until<F>(&self, now: NaiveDateTime, shutdown: F) -> Result<CycleReport, CycleError>
    where
        F: Future<Output = ()>,
    {
        let _lock = match &self.lock {
            Some((path, stale_after)) => {
                let lock = RunLock::acquire(path.clone(), *stale_after)?;
                debug!("Holding run lock {}", lock.path().display());
                Some(lock)
            }
            None => None,
        };
        let mut report = CycleReport::default();
        let mut phase = CyclePhase::Idle;

        let mut snapshot = self.load_snapshot(&mut report);
        report.pruned = snapshot.prune_orphans(&self.targets);
        if !report.pruned.is_empty() {
            info!("Dropping state of hosts no longer configured: {}", report.pruned.join(", "));
        }
        advance(&mut phase, CyclePhase::StateLoaded);

        advance(&mut phase, CyclePhase::ProbesDispatched);
        let outcomes = tokio::select! {
            outcomes = self.scheduler.run_cycle(&self.targets) => outcomes,
            _ = shutdown => {
                warn!("Stop requested while probing, abandoning cycle");
                return Err(CycleError::Cancelled);
            }
        };
        report.probed = outcomes.len();
        report.unreachable = outcomes.values().filter(|o| !o.reachable).count();

        if let Err(e) = self.audit.record(&outcomes) {
            warn!("Failed to write audit log in {}: {}", self.audit.dir().display(), e);
        }

        let classification =
            classify(&self.targets, &outcomes, &snapshot.hosts, &snapshot.isp_outage, now, self.interval);
        snapshot.hosts = classification.hosts;
        snapshot.isp_outage = classification.isp_outage;
        report.suppressed = classification.suppressed;
        advance(&mut phase, CyclePhase::Classified);

        let summary_due = self.reporter.summary_due(now, &snapshot.daily_summary);
        let messages =
            self.reporter.render(&classification.events, summary_due, now, &self.targets, &snapshot.hosts);
        if summary_due {
            snapshot.close_day(now.date());
        }
        report.summary_rendered = summary_due;
        report.queued = messages.len();
        report.events = classification.events;
        snapshot.outbox.extend(messages.into_iter().map(|m| PendingMessage::new(m.kind, m.text, now)));
        advance(&mut phase, CyclePhase::Reported);

        if let Err(e) = self.store.persist(&snapshot) {
            error!("Failed to persist state, this cycle's updates are lost: {}", e);
            return Err(CycleError::Persist(e));
        }
        advance(&mut phase, CyclePhase::StatePersisted);

        if !snapshot.outbox.is_empty() {
            let outbox = std::mem::take(&mut snapshot.outbox);
            let delivery = deliver_outbox(self.notifier.as_ref(), outbox, &self.delivery).await;
            report.delivered = delivery.delivered.len();
            report.dropped = delivery.dropped.len();
            report.pending = delivery.remaining.len();

            snapshot.settle_outbox(&delivery.delivered, delivery.remaining);
            if let Err(e) = self.store.persist(&snapshot) {
                warn!("Failed to record delivery, delivered messages may be sent again: {}", e);
            }
        }

        advance(&mut phase, CyclePhase::Idle);
        info!(
            probed = report.probed,
            unreachable = report.unreachable,
            events = report.events.len(),
            delivered = report.delivered,
            pending = report.pending,
            "Cycle complete"
        );
        Ok(report)
    }

    fn load_snapshot(&self, report: &mut CycleReport) -> StateSnapshot {
        match self.store.load() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                info!("No saved state, starting fresh");
                report.cold_start = true;
                StateSnapshot::default()
            }
            Err(e) => {
                error!("Failed to load state, starting fresh: {}", e);
                report.cold_start = true;
                StateSnapshot::default()
            }
        }
    }
}

/// Half of what the probe round leaves of the interval, so a stalled
/// transport still lets the cycle finish before the next one is due
fn delivery_budget(interval: Duration, probe_deadline: Duration) -> Duration {
    interval.saturating_sub(probe_deadline) / 2
}

fn advance(phase: &mut CyclePhase, next: CyclePhase) {
    debug!("Cycle {} -> {}", phase, next);
    *phase = next;
}
