//! Post-commit event fan-out.
//!
//! The notifier is informed after a commit has landed and is never
//! authoritative: a dropped subscriber or a full channel is logged and
//! forgotten, it can never unwind a settlement.

use crate::types::{Round, SettlementReport, TossMatch, Wager};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// State change pushed to the UI layer for refresh.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BookEvent {
    WagerPlaced { wager: Wager },
    RoundSettled { round: Round },
    MatchSettled { toss_match: TossMatch, report: SettlementReport },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn publish(&self, event: BookEvent);
}

/// Notifier that drops everything. For tests and headless tools.
pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    async fn publish(&self, _event: BookEvent) {}
}

/// Fans events out to any number of subscribers over unbounded channels.
/// Subscribers that went away are pruned on the next publish.
pub struct FanoutNotifier {
    subscribers: DashMap<u64, mpsc::UnboundedSender<BookEvent>>,
    next_id: AtomicU64,
}

impl FanoutNotifier {
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> (u64, mpsc::UnboundedReceiver<BookEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl Default for FanoutNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn publish(&self, event: BookEvent) {
        let mut dead = Vec::new();
        for entry in self.subscribers.iter() {
            if entry.value().send(event.clone()).is_err() {
                dead.push(*entry.key());
            }
        }
        for id in dead {
            debug!(subscriber = id, "dropping closed subscriber");
            self.subscribers.remove(&id);
        }
    }
}

/// Convenience alias used by the engine.
pub type SharedNotifier = Arc<dyn Notifier>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CoinSide, Round};
    use chrono::TimeZone;

    fn test_round() -> Round {
        Round {
            id: "r1".to_string(),
            number: 1,
            starts_at: chrono::Utc.timestamp_opt(0, 0).unwrap(),
            ends_at: chrono::Utc.timestamp_opt(15, 0).unwrap(),
            outcome: Some(CoinSide::Heads),
            settled: true,
            settled_at: None,
        }
    }

    #[tokio::test]
    async fn test_fanout_delivers_to_all_subscribers() {
        let notifier = FanoutNotifier::new();
        let (_, mut rx1) = notifier.subscribe();
        let (_, mut rx2) = notifier.subscribe();

        notifier
            .publish(BookEvent::RoundSettled { round: test_round() })
            .await;

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await {
                Some(BookEvent::RoundSettled { round }) => assert_eq!(round.id, "r1"),
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_dead_subscribers_pruned() {
        let notifier = FanoutNotifier::new();
        let (id, rx) = notifier.subscribe();
        let (_, mut live_rx) = notifier.subscribe();
        drop(rx);
        let _ = id;

        notifier
            .publish(BookEvent::RoundSettled { round: test_round() })
            .await;
        assert_eq!(notifier.subscriber_count(), 1);
        assert!(live_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let notifier = FanoutNotifier::new();
        let (id, _rx) = notifier.subscribe();
        notifier.unsubscribe(id);
        assert_eq!(notifier.subscriber_count(), 0);
    }
}
