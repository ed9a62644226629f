/// Outbound notifications
///
/// This module is responsible for:
/// - Rendering monitor events and the daily summary into messages
/// - Delivering queued messages through the configured transport
/// - Bounding retries so a dead transport never stalls a cycle
pub mod delivery;
pub mod notifier;
pub mod reporter;

pub use delivery::{DeliveryPolicy, deliver_outbox};
pub use notifier::{Notifier, build_notifier};
pub use reporter::Reporter;
