use crate::message::{DeadLetter, DispatchMessage, ReceiptHandle, ReceivedMessage};
use crate::queue::{DispatchQueue, RedrivePolicy};
use async_trait::async_trait;
use estator_core::EstatorResult;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

struct Entry {
    message: DispatchMessage,
    receive_count: u32,
}

struct InFlight {
    entry: Entry,
    deadline: Instant,
}

struct State {
    visible: VecDeque<Entry>,
    in_flight: HashMap<ReceiptHandle, InFlight>,
    dead: Vec<DeadLetter>,
}

/// In-process dispatch queue with visibility-timeout redelivery and a
/// dead-letter channel. Any number of consumers may pull concurrently.
pub struct MemoryQueue {
    policy: RedrivePolicy,
    state: Mutex<State>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new(policy: RedrivePolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(State {
                visible: VecDeque::new(),
                in_flight: HashMap::new(),
                dead: Vec::new(),
            }),
            notify: Notify::new(),
        }
    }

    /// Queue with the default redrive policy (30s visibility, 3 deliveries).
    pub fn with_defaults() -> Self {
        Self::new(RedrivePolicy::default())
    }

    /// Return expired in-flight entries to the visible queue, then either
    /// deliver the next visible message or park it on the dead-letter
    /// channel when its delivery budget is spent. Returns the delivery and
    /// the nearest in-flight deadline (for the long-poll sleep).
    fn poll_once(&self, state: &mut State, now: Instant) -> (Option<ReceivedMessage>, Option<Instant>) {
        let expired: Vec<ReceiptHandle> = state
            .in_flight
            .iter()
            .filter(|(_, f)| f.deadline <= now)
            .map(|(r, _)| *r)
            .collect();
        for receipt in expired {
            if let Some(flight) = state.in_flight.remove(&receipt) {
                debug!(
                    job_id = %flight.entry.message.job_id,
                    receive_count = flight.entry.receive_count,
                    "visibility window lapsed, message requeued"
                );
                state.visible.push_back(flight.entry);
            }
        }

        while let Some(mut entry) = state.visible.pop_front() {
            if entry.receive_count >= self.policy.max_receive_count {
                warn!(
                    job_id = %entry.message.job_id,
                    receive_count = entry.receive_count,
                    "delivery budget exhausted, moving message to dead-letter channel"
                );
                state.dead.push(DeadLetter {
                    receive_count: entry.receive_count,
                    message: entry.message,
                });
                continue;
            }

            entry.receive_count += 1;
            let receipt = ReceiptHandle::new();
            let received = ReceivedMessage {
                receipt,
                message: entry.message.clone(),
                receive_count: entry.receive_count,
            };
            state.in_flight.insert(
                receipt,
                InFlight {
                    entry,
                    deadline: now + self.policy.visibility_timeout,
                },
            );
            return (Some(received), None);
        }

        let nearest = state.in_flight.values().map(|f| f.deadline).min();
        (None, nearest)
    }
}

#[async_trait]
impl DispatchQueue for MemoryQueue {
    async fn send(&self, message: DispatchMessage) -> EstatorResult<()> {
        let mut state = self.state.lock().await;
        debug!(job_id = %message.job_id, "message enqueued");
        state.visible.push_back(Entry {
            message,
            receive_count: 0,
        });
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> EstatorResult<Option<ReceivedMessage>> {
        let poll_deadline = Instant::now() + wait;
        loop {
            let now = Instant::now();
            let (delivery, nearest) = {
                let mut state = self.state.lock().await;
                self.poll_once(&mut state, now)
            };
            if delivery.is_some() {
                return Ok(delivery);
            }
            if now >= poll_deadline {
                return Ok(None);
            }

            // Sleep until something is sent, a visibility window lapses, or
            // the long-poll window closes — whichever comes first.
            let mut sleep_for = poll_deadline - now;
            if let Some(deadline) = nearest {
                sleep_for = sleep_for.min(deadline.saturating_duration_since(now));
            }
            let sleep_for = sleep_for.max(Duration::from_millis(1));
            let _ = tokio::time::timeout(sleep_for, self.notify.notified()).await;
        }
    }

    async fn acknowledge(&self, receipt: ReceiptHandle) -> EstatorResult<()> {
        let mut state = self.state.lock().await;
        if state.in_flight.remove(&receipt).is_none() {
            // Receipt already expired; the redelivered copy owns the message.
            debug!("acknowledge on expired receipt ignored");
        }
        Ok(())
    }

    async fn take_dead_letters(&self) -> EstatorResult<Vec<DeadLetter>> {
        let mut state = self.state.lock().await;
        Ok(std::mem::take(&mut state.dead))
    }

    async fn depth(&self) -> EstatorResult<usize> {
        let state = self.state.lock().await;
        Ok(state.visible.len() + state.in_flight.len())
    }

    async fn dead_letter_depth(&self) -> EstatorResult<usize> {
        let state = self.state.lock().await;
        Ok(state.dead.len())
    }
}
