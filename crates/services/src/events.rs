//! Completion events for downstream consumers (progress tracking, XP, mentors).

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast};

use quiz_core::model::{LearnerId, QuizId};

/// Sequence number assigned on publish, starting at 0.
pub type EventSeq = u64;

pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Emitted exactly once per passing submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    pub learner_id: LearnerId,
    pub quiz_id: QuizId,
    pub attempt_number: u32,
    /// Rounded percentage, 0..=100.
    pub score: u8,
    pub xp_earned: u32,
}

/// Publish/subscribe seam for completion events.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: CompletionEvent) -> EventSeq;

    /// Live stream of events published after this call.
    fn subscribe(&self) -> broadcast::Receiver<(EventSeq, CompletionEvent)>;

    /// Replay everything published at or after `seq`.
    async fn events_from(&self, seq: EventSeq) -> Vec<(EventSeq, CompletionEvent)>;

    /// Sequence number the next event will get.
    fn current_seq(&self) -> EventSeq;
}

/// In-memory bus: a replay log plus a broadcast channel for live subscribers.
pub struct MemoryEventBus {
    events: RwLock<Vec<(EventSeq, CompletionEvent)>>,
    next_seq: AtomicU64,
    tx: broadcast::Sender<(EventSeq, CompletionEvent)>,
}

impl MemoryEventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            events: RwLock::new(Vec::new()),
            next_seq: AtomicU64::new(0),
            tx,
        }
    }
}

impl Default for MemoryEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn publish(&self, event: CompletionEvent) -> EventSeq {
        let mut log = self.events.write().await;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        log.push((seq, event.clone()));
        drop(log);

        // No live subscribers is fine; the log still has it.
        let _ = self.tx.send((seq, event));
        seq
    }

    fn subscribe(&self) -> broadcast::Receiver<(EventSeq, CompletionEvent)> {
        self.tx.subscribe()
    }

    async fn events_from(&self, seq: EventSeq) -> Vec<(EventSeq, CompletionEvent)> {
        self.events
            .read()
            .await
            .iter()
            .filter(|(s, _)| *s >= seq)
            .cloned()
            .collect()
    }

    fn current_seq(&self) -> EventSeq {
        self.next_seq.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(learner: u64, attempt_number: u32) -> CompletionEvent {
        CompletionEvent {
            learner_id: LearnerId::new(learner),
            quiz_id: QuizId::new(7),
            attempt_number,
            score: 100,
            xp_earned: 30,
        }
    }

    #[tokio::test]
    async fn publish_assigns_increasing_sequence_numbers() {
        let bus = MemoryEventBus::default();
        assert_eq!(bus.current_seq(), 0);

        assert_eq!(bus.publish(event(1, 1)).await, 0);
        assert_eq!(bus.publish(event(2, 1)).await, 1);
        assert_eq!(bus.current_seq(), 2);
    }

    #[tokio::test]
    async fn live_subscribers_receive_events() {
        let bus = MemoryEventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(event(1, 2)).await;

        let (seq, received) = rx.recv().await.unwrap();
        assert_eq!(seq, 0);
        assert_eq!(received, event(1, 2));
    }

    #[tokio::test]
    async fn late_joiners_can_replay() {
        let bus = MemoryEventBus::default();
        bus.publish(event(1, 1)).await;
        bus.publish(event(2, 1)).await;
        bus.publish(event(1, 2)).await;

        let from_one: Vec<_> = bus.events_from(1).await.into_iter().map(|(s, _)| s).collect();
        assert_eq!(from_one, vec![1, 2]);
        assert!(bus.events_from(3).await.is_empty());
    }

    #[test]
    fn completion_event_serializes_camel_case() {
        let json = serde_json::to_value(event(3, 1)).unwrap();
        assert_eq!(json["learnerId"], 3);
        assert_eq!(json["xpEarned"], 30);
    }
}
