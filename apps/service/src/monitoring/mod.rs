/// Monitoring engine module - probes hosts and interprets the results
///
/// This module is responsible for:
/// - Probing hosts over ICMP or TCP
/// - Fanning probes out concurrently under a deadline
/// - Classifying outcomes into host and ISP outage events
pub mod checker;
pub mod classifier;
pub mod scheduler;
pub mod types;

