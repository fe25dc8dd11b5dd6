use crate::error::Error;
use crate::models::{Order, OrderStatus};

/// Outbound messages about the run
///
/// Calls are best effort: implementations swallow and log their own failures.
pub trait Notifier: Send + Sync {
    fn notify(&self, text: &str);

    fn on_order(&self, order: &Order);

    fn on_error(&self, err: &Error);
}

/// Notifier that writes through tracing
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, text: &str) {
        tracing::info!("{}", text);
    }

    fn on_order(&self, order: &Order) {
        let title = match order.status {
            OrderStatus::Filled => "✅ ORDER FILLED",
            OrderStatus::New => "🆕 NEW ORDER",
            OrderStatus::Canceled | OrderStatus::Rejected => "❌ ORDER CANCELED / REJECTED",
            _ => "ORDER UPDATE",
        };
        tracing::info!("{} {}", title, order);
    }

    fn on_error(&self, err: &Error) {
        tracing::error!("🛑 {}", err);
    }
}
