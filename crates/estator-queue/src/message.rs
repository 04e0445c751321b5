use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A dispatch message. Self-describing: `job_id` always identifies the job
/// so a consumer can resolve (or idempotently recreate) it even when `body`
/// is only a reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchMessage {
    /// The job this message refers to.
    pub job_id: String,
    /// Inline payload or a reference the consumer resolves via the store.
    pub body: serde_json::Value,
}

impl DispatchMessage {
    pub fn new(job_id: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            job_id: job_id.into(),
            body,
        }
    }

    /// Reference-only message; the consumer must `get` the job row.
    pub fn reference(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            body: serde_json::Value::Null,
        }
    }
}

/// Opaque per-delivery handle. Acknowledging an expired handle is a no-op;
/// the redelivered copy carries a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptHandle(pub Uuid);

impl ReceiptHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ReceiptHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// A delivered message plus its delivery metadata.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// Handle for this delivery, required to acknowledge.
    pub receipt: ReceiptHandle,
    /// The message itself.
    pub message: DispatchMessage,
    /// How many times this message has been delivered, this one included.
    pub receive_count: u32,
}

impl ReceivedMessage {
    /// Whether this is a redelivery of a previously received message.
    pub fn is_redelivery(&self) -> bool {
        self.receive_count > 1
    }
}

/// A message parked on the dead-letter channel after exhausting its
/// redelivery budget.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub message: DispatchMessage,
    /// Deliveries consumed before the message was parked.
    pub receive_count: u32,
}
