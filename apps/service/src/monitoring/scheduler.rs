use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, warn};

use super::checker::Prober;
use super::types::{HostTarget, ProbeOutcome, ProbeReply};

/// Slack granted on top of the probe timeout before a probe task is cut off
const PROBE_GRACE: Duration = Duration::from_millis(500);

/// Fans one probe per host out concurrently and joins the outcomes
pub struct ProbeScheduler {
    prober: Arc<dyn Prober>,
    probe_timeout: Duration,
    deadline: Duration,
}

impl ProbeScheduler {
    /// `deadline` bounds the whole round; anything still running by then is
    /// abandoned and counted as unreachable.
    pub fn new(prober: Arc<dyn Prober>, probe_timeout: Duration, deadline: Duration) -> Self {
        Self { prober, probe_timeout, deadline }
    }

    /// Probe every host once. The returned map holds exactly one outcome per
    /// host, keyed by host name.
    pub async fn run_cycle(&self, hosts: &[HostTarget]) -> BTreeMap<String, ProbeOutcome> {
        let deadline = Instant::now() + self.deadline;
        let mut tasks = JoinSet::new();

        for target in hosts.iter().cloned() {
            let prober = Arc::clone(&self.prober);
            let wait = self.probe_timeout;

            tasks.spawn(async move {
                let reply = match timeout(wait + PROBE_GRACE, prober.probe(&target.address, wait)).await {
                    Ok(Ok(reply)) => reply,
                    Ok(Err(e)) => {
                        warn!(host = %target.name, address = %target.address, "Probe failed, counting as unreachable: {}", e);
                        ProbeReply::unreachable()
                    }
                    Err(_) => {
                        debug!(host = %target.name, "Probe did not return within {:?}", wait + PROBE_GRACE);
                        ProbeReply::unreachable()
                    }
                };
                ProbeOutcome::from_reply(&target, reply, local_now())
            });
        }

        let mut outcomes = BTreeMap::new();
        loop {
            match timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(outcome))) => {
                    outcomes.insert(outcome.host.clone(), outcome);
                }
                Ok(Some(Err(e))) => warn!("Probe task aborted: {}", e),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Probe deadline of {:?} reached with {} probe(s) outstanding",
                        self.deadline,
                        tasks.len()
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }

        for target in hosts {
            outcomes
                .entry(target.name.clone())
                .or_insert_with(|| ProbeOutcome::unreachable(target, local_now()));
        }

        outcomes
    }
}

/// Current local wall-clock time
pub fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::checker::ProbeError;
    use crate::monitoring::types::HostRole;
    use std::collections::HashMap;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Reachable,
        Unreachable,
        Fails,
        Hangs,
        Slow(u64),
    }

    struct ScriptedProber {
        script: HashMap<String, Behaviour>,
    }

    #[async_trait::async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, address: &str, _timeout: Duration) -> Result<ProbeReply, ProbeError> {
            match self.script[address] {
                Behaviour::Reachable => Ok(ProbeReply::reachable(Some(1.5))),
                Behaviour::Unreachable => Ok(ProbeReply::unreachable()),
                Behaviour::Fails => Err(ProbeError::PermissionDenied("raw socket".into())),
                Behaviour::Hangs => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(ProbeReply::reachable(None))
                }
                Behaviour::Slow(ms) => {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(ProbeReply::reachable(Some(ms as f64)))
                }
            }
        }
    }

    fn scheduler(script: &[(&str, Behaviour)], deadline_ms: u64) -> (ProbeScheduler, Vec<HostTarget>) {
        let hosts = script
            .iter()
            .enumerate()
            .map(|(i, (address, _))| HostTarget::new(format!("host{i}"), *address, HostRole::Remote, 1))
            .collect();
        let prober = ScriptedProber {
            script: script.iter().map(|(a, b)| (a.to_string(), *b)).collect(),
        };
        let scheduler = ProbeScheduler::new(
            Arc::new(prober),
            Duration::from_secs(5),
            Duration::from_millis(deadline_ms),
        );
        (scheduler, hosts)
    }

    #[tokio::test]
    async fn test_every_host_gets_an_outcome() {
        let (scheduler, hosts) = scheduler(
            &[("10.0.0.1", Behaviour::Reachable), ("10.0.0.2", Behaviour::Unreachable), ("10.0.0.3", Behaviour::Fails)],
            1000,
        );

        let outcomes = scheduler.run_cycle(&hosts).await;
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes["host0"].reachable);
        assert_eq!(outcomes["host0"].latency_ms, Some(1.5));
        assert!(!outcomes["host1"].reachable);
        assert!(!outcomes["host2"].reachable);
        assert_eq!(outcomes["host2"].address, "10.0.0.3");
    }

    #[tokio::test]
    async fn test_hanging_probe_does_not_block_others() {
        let (scheduler, hosts) = scheduler(
            &[("10.0.0.1", Behaviour::Hangs), ("10.0.0.2", Behaviour::Reachable), ("10.0.0.3", Behaviour::Slow(20))],
            300,
        );

        let started = std::time::Instant::now();
        let outcomes = scheduler.run_cycle(&hosts).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!outcomes["host0"].reachable);
        assert!(outcomes["host1"].reachable);
        assert!(outcomes["host2"].reachable);
    }

    #[tokio::test]
    async fn test_probes_run_concurrently() {
        let script: Vec<(&str, Behaviour)> = ["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4", "10.0.0.5"]
            .into_iter()
            .map(|a| (a, Behaviour::Slow(150)))
            .collect();
        let (scheduler, hosts) = scheduler(&script, 600);

        let outcomes = scheduler.run_cycle(&hosts).await;
        assert!(outcomes.values().all(|o| o.reachable));
    }

    #[tokio::test]
    async fn test_no_hosts() {
        let (scheduler, _) = scheduler(&[], 100);
        assert!(scheduler.run_cycle(&[]).await.is_empty());
    }
}
