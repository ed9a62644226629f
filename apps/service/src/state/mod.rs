/// Durable monitor state
///
/// One snapshot holds every host's failure streak, the ISP outage flag, the
/// daily summary bookkeeping and the outbound message queue. It is loaded at
/// the start of a cycle and replaced as a whole at the end.
pub mod models;
pub mod store;

pub use models::{
    DailySummaryState, HostState, IspOutageState, MessageKind, PendingMessage, StateSnapshot,
};
pub use store::{JsonFileStore, StateStore, StoreError};
