use crate::message::{DeadLetter, DispatchMessage, ReceiptHandle, ReceivedMessage};
use async_trait::async_trait;
use estator_core::EstatorResult;
use std::time::Duration;

/// Redrive policy: how long a delivery stays invisible and how many
/// deliveries a message gets before it is parked on the dead-letter channel.
#[derive(Debug, Clone, Copy)]
pub struct RedrivePolicy {
    /// Window during which a delivered, unacknowledged message is invisible.
    pub visibility_timeout: Duration,
    /// Maximum deliveries before dead-lettering. Policy value: 3.
    pub max_receive_count: u32,
}

impl Default for RedrivePolicy {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            max_receive_count: 3,
        }
    }
}

/// The at-least-once dispatch channel.
///
/// Guarantees, independent of transport:
/// - a message not acknowledged within the visibility window is redelivered;
/// - each delivery carries a monotonically tracked receive count;
/// - a message whose receive count would exceed the policy maximum moves to
///   the dead-letter channel and is no longer visible to normal consumers;
/// - acknowledgement is the only way to prevent redelivery — there is no NACK.
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Enqueue a message.
    async fn send(&self, message: DispatchMessage) -> EstatorResult<()>;

    /// Long-poll for the next visible message, waiting up to `wait`.
    /// Returns `None` when nothing became visible within the window.
    async fn receive(&self, wait: Duration) -> EstatorResult<Option<ReceivedMessage>>;

    /// Acknowledge (delete) a delivery. Acknowledging a receipt whose
    /// visibility already lapsed is a no-op: the redelivered copy owns the
    /// message now.
    async fn acknowledge(&self, receipt: ReceiptHandle) -> EstatorResult<()>;

    /// Drain the dead-letter channel.
    async fn take_dead_letters(&self) -> EstatorResult<Vec<DeadLetter>>;

    /// Messages currently queued or in flight (excludes dead letters).
    async fn depth(&self) -> EstatorResult<usize>;

    /// Messages parked on the dead-letter channel.
    async fn dead_letter_depth(&self) -> EstatorResult<usize>;
}
