use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::monitoring::classifier::MonitorEvent;
use crate::monitoring::types::HostTarget;
use crate::state::{DailySummaryState, HostState, MessageKind};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// A rendered message, not yet queued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub kind: MessageKind,
    pub text: String,
}

/// Turns events and the daily summary into message text
#[derive(Debug, Clone)]
pub struct Reporter {
    mention_tags: String,
    max_len: usize,
    report_time: NaiveTime,
}

impl Reporter {
    pub fn new(mention_tags: impl Into<String>, max_len: usize, report_time: NaiveTime) -> Self {
        Self { mention_tags: mention_tags.into().trim().to_string(), max_len: max_len.max(1), report_time }
    }

    /// The summary is due once per calendar date, at or after the report time
    pub fn summary_due(&self, now: NaiveDateTime, daily: &DailySummaryState) -> bool {
        now.time() >= self.report_time && daily.last_report_date != Some(now.date())
    }

    /// Render every event, then the summary when `summary_due`.
    pub fn render(
        &self,
        events: &[MonitorEvent],
        summary_due: bool,
        now: NaiveDateTime,
        targets: &[HostTarget],
        hosts: &BTreeMap<String, HostState>,
    ) -> Vec<OutboundMessage> {
        let mut messages: Vec<OutboundMessage> = events
            .iter()
            .map(|event| OutboundMessage { kind: MessageKind::Alert, text: self.render_event(event) })
            .collect();

        if summary_due {
            let date = now.date();
            messages.push(OutboundMessage {
                kind: MessageKind::DailySummary { date },
                text: self.render_summary(date, targets, hosts),
            });
        }

        messages
    }

    pub fn render_event(&self, event: &MonitorEvent) -> String {
        let body = match event {
            MonitorEvent::HostDown { host, address, since, .. } => {
                format!("Alert: {host} ({address}) DOWN since {}", since.format(TIMESTAMP_FORMAT))
            }
            MonitorEvent::HostRecovered { host, address, down_since, at } => format!(
                "Recovery: {host} ({address}) UP. Outage: {} to {} ({}m)",
                down_since.format(TIMESTAMP_FORMAT),
                at.format(TIMESTAMP_FORMAT),
                (*at - *down_since).num_minutes().max(0)
            ),
            MonitorEvent::IspOutageStarted { at, remotes } => format!(
                "ISP outage: gateway reachable, all remote hosts down since {} ({})",
                at.format(TIMESTAMP_FORMAT),
                remotes.join(", ")
            ),
            MonitorEvent::IspOutageRestored { started, at } => format!(
                "ISP restored. Outage: {} to {} ({}m)",
                started.format(TIMESTAMP_FORMAT),
                at.format(TIMESTAMP_FORMAT),
                (*at - *started).num_minutes().max(0)
            ),
        };

        let text = if self.mention_tags.is_empty() { body } else { format!("{} {}", self.mention_tags, body) };
        truncate_chars(text, self.max_len)
    }

    /// Downtime per configured host, in whole minutes
    pub fn render_summary(&self, date: NaiveDate, targets: &[HostTarget], hosts: &BTreeMap<String, HostState>) -> String {
        let mut text = String::from("Daily Network Report");
        if !self.mention_tags.is_empty() {
            text.push(' ');
            text.push_str(&self.mention_tags);
        }
        let _ = writeln!(text);
        let _ = writeln!(text, "Date: {}", date.format("%m/%d/%Y"));

        for target in targets {
            let seconds = hosts.get(&target.name).map_or(0, |s| s.daily_down_seconds);
            let _ = writeln!(text, "• {}: {}m down", target.name, seconds / 60);
        }

        truncate_chars(text, self.max_len)
    }
}

fn truncate_chars(text: String, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text,
    }
}
