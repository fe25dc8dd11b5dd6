use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::Order;

/// Callback invoked for every order event of a pair
pub type OrderConsumer = Arc<dyn Fn(Order) + Send + Sync>;

struct OrderSubscription {
    only_new: bool,
    consumer: OrderConsumer,
}

struct OrderEvent {
    order: Order,
    is_new: bool,
}

#[derive(Default)]
struct FeedState {
    senders: HashMap<String, mpsc::UnboundedSender<OrderEvent>>,
    receivers: HashMap<String, mpsc::UnboundedReceiver<OrderEvent>>,
    subscriptions: HashMap<String, Vec<Arc<OrderSubscription>>>,
    handles: Vec<JoinHandle<()>>,
}

/// Per-pair fan-out of order events
///
/// `publish` never blocks; each pair is drained by its own task once started.
#[derive(Default)]
pub struct OrderFeed {
    state: Mutex<FeedState>,
}

impl OrderFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a consumer; with `only_new` it skips status updates of existing orders
    pub fn subscribe(&self, pair: &str, consumer: OrderConsumer, only_new: bool) {
        let mut state = self.lock();
        if !state.senders.contains_key(pair) {
            let (tx, rx) = mpsc::unbounded_channel();
            state.senders.insert(pair.to_string(), tx);
            state.receivers.insert(pair.to_string(), rx);
        }
        state
            .subscriptions
            .entry(pair.to_string())
            .or_default()
            .push(Arc::new(OrderSubscription { only_new, consumer }));
    }

    /// Queue an order event; dropped when nobody subscribed to the pair
    pub fn publish(&self, order: Order, is_new: bool) {
        let state = self.lock();
        if let Some(tx) = state.senders.get(&order.pair) {
            if tx.send(OrderEvent { order, is_new }).is_err() {
                tracing::warn!("Order feed closed");
            }
        }
    }

    /// Spawn one delivery task per subscribed pair
    pub fn start(&self) {
        let mut state = self.lock();
        let receivers: Vec<_> = state.receivers.drain().collect();

        for (pair, mut rx) in receivers {
            let subscriptions = state.subscriptions.get(&pair).cloned().unwrap_or_default();
            let handle = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    for subscription in &subscriptions {
                        if subscription.only_new && !event.is_new {
                            continue;
                        }
                        (subscription.consumer)(event.order.clone());
                    }
                }
            });
            state.handles.push(handle);
        }
    }

    /// Close every channel and wait until queued events are delivered
    pub async fn shutdown(&self) {
        let handles = {
            let mut state = self.lock();
            state.senders.clear();
            std::mem::take(&mut state.handles)
        };

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Order feed task failed: {}", e);
            }
        }
    }
}
