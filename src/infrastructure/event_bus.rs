use crate::domain::events::{DetectionEvent, EventKind, EventListener};
use std::sync::Arc;
use tokio::sync::RwLock;

struct Subscription {
    /// None means every kind
    kind: Option<EventKind>,
    listener: Arc<dyn EventListener>,
}

/// Fan-out sink for detection events.
///
/// Only events that already passed the dedup gate are published here, so
/// listeners see each identity at most once.
pub struct EventEmitter {
    subscriptions: Arc<RwLock<Vec<Subscription>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Subscribe a listener to every event
    pub async fn subscribe(&self, listener: Arc<dyn EventListener>) {
        self.subscriptions.write().await.push(Subscription {
            kind: None,
            listener,
        });
    }

    /// Subscribe a listener to one event kind only
    pub async fn subscribe_to(&self, kind: EventKind, listener: Arc<dyn EventListener>) {
        self.subscriptions.write().await.push(Subscription {
            kind: Some(kind),
            listener,
        });
    }

    pub async fn publish(&self, event: &DetectionEvent) {
        let subscriptions = self.subscriptions.read().await;
        for sub in subscriptions
            .iter()
            .filter(|s| s.kind.is_none_or(|k| k == event.kind))
        {
            sub.listener.on_event(event);
        }
    }

    /// Get count of subscribers (for testing)
    pub async fn subscriber_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for EventEmitter {
    fn clone(&self) -> Self {
        Self {
            subscriptions: Arc::clone(&self.subscriptions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::LoggingListener;
    use crate::domain::market::bucketing::Bucket;
    use crate::domain::market::candle::Candle;
    use crate::domain::market::timeframe::Timeframe;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        count: Arc<AtomicUsize>,
    }

    impl EventListener for CountingListener {
        fn on_event(&self, _event: &DetectionEvent) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn candle_event() -> DetectionEvent {
        let candle = Candle::opening(
            "AAPL",
            Timeframe::ONE_MIN,
            Bucket {
                start: 0,
                end: 60_000,
            },
            dec!(150.0),
            10,
        )
        .into_closed();
        DetectionEvent::candle_closed(candle, 0)
    }

    #[tokio::test]
    async fn test_emitter_subscribe() {
        let emitter = EventEmitter::new();
        assert_eq!(emitter.subscriber_count().await, 0);

        emitter.subscribe(Arc::new(LoggingListener)).await;
        emitter
            .subscribe_to(EventKind::PivotConfirmed, Arc::new(LoggingListener))
            .await;
        assert_eq!(emitter.subscriber_count().await, 2);
    }

    #[tokio::test]
    async fn test_kind_filter() {
        let emitter = EventEmitter::new();
        let all = Arc::new(AtomicUsize::new(0));
        let pivots = Arc::new(AtomicUsize::new(0));

        emitter
            .subscribe(Arc::new(CountingListener {
                count: Arc::clone(&all),
            }))
            .await;
        emitter
            .subscribe_to(
                EventKind::PivotConfirmed,
                Arc::new(CountingListener {
                    count: Arc::clone(&pivots),
                }),
            )
            .await;

        emitter.publish(&candle_event()).await;

        assert_eq!(all.load(Ordering::SeqCst), 1);
        assert_eq!(pivots.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_emitter_clone_shares_listeners() {
        let first = EventEmitter::new();
        let second = first.clone();

        first.subscribe(Arc::new(LoggingListener)).await;

        assert_eq!(second.subscriber_count().await, 1);
    }
}
