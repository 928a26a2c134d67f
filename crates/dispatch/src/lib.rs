//! `queryjobs-dispatch` — fan-out of active jobs onto a work queue,
//! result-set notifications and expired-set pruning.

pub mod dispatcher;
pub mod notifier;
pub mod pruner;
pub mod queue;

pub use dispatcher::{DispatchSummary, Dispatcher};
pub use notifier::{InMemoryNotifier, ResultSetNotification, ResultSetNotifier, notify_if_results};
pub use pruner::Pruner;
pub use queue::{InMemoryWorkQueue, QueueMessage, WorkQueue};
