//! Work queue seam between the dispatcher and job executors.

use std::sync::Mutex;

use async_trait::async_trait;

use queryjobs_core::QjResult;

/// One unit of work: a serialized job plus the FIFO keys that order and
/// deduplicate it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub body: String,
    /// Stable per job definition, so runs of the same job are serialized.
    pub group_id: String,
    /// Stable per (job, execution), so a redelivered trigger enqueues each
    /// job at most once.
    pub dedupe_id: String,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn send(&self, message: QueueMessage) -> QjResult<()>;
}

/// Queue that collects messages in memory, for tests and local runs.
#[derive(Default)]
pub struct InMemoryWorkQueue {
    messages: Mutex<Vec<QueueMessage>>,
}

impl InMemoryWorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<QueueMessage> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn send(&self, message: QueueMessage) -> QjResult<()> {
        self.messages.lock().unwrap().push(message);
        Ok(())
    }
}
