//! At-least-once dispatch channel between pipeline producers and consumers.
//!
//! Delivery semantics are modeled on a visibility-timeout queue: a received
//! message stays invisible until acknowledged or until its visibility window
//! lapses, after which it is redelivered with a higher receive count. A
//! bounded-retry redrive policy moves repeatedly unacknowledged messages to
//! a dead-letter channel instead of delivering them again.
//!
//! [`DispatchQueue`] is the transport seam; [`MemoryQueue`] is the in-process
//! implementation. A remote queue binding implements the same trait.

/// In-process queue implementation.
pub mod memory;
/// Message and receipt types.
pub mod message;
/// The queue contract.
pub mod queue;

pub use memory::MemoryQueue;
pub use message::{DeadLetter, DispatchMessage, ReceiptHandle, ReceivedMessage};
pub use queue::{DispatchQueue, RedrivePolicy};
