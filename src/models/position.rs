use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::order::{Order, Side};

/// Quantities closer than this are treated as equal when closing a position
const QUANTITY_EPSILON: f64 = 1e-9;

/// Open position for one pair, as seen by the order controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub pair: String,
    pub side: Side,
    pub avg_price: f64,
    pub quantity: f64,
    pub leverage: u32,
    pub created_at: DateTime<Utc>,
    /// Set once the position is fully closed or flipped to the other side
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

/// Realized outcome of a reduce or close
#[derive(Debug, Clone, PartialEq)]
pub struct TradeResult {
    pub pair: String,
    /// Side of the position that was reduced
    pub side: Side,
    pub profit_percent: f64,
    pub profit_value: f64,
    pub duration: Duration,
    pub created_at: DateTime<Utc>,
}

impl TradeResult {
    pub fn is_win(&self) -> bool {
        self.profit_value > 0.0
    }
}

impl Position {
    /// Open a spot position from a filled order
    pub fn open(order: &Order) -> Self {
        Self {
            id: Uuid::new_v4(),
            pair: order.pair.clone(),
            side: order.side,
            avg_price: order.fill_price(),
            quantity: order.quantity,
            leverage: 1,
            created_at: order.updated_at,
            closed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }

    /// Copy of this position marked closed at `at`
    pub fn closed(&self, at: DateTime<Utc>) -> Self {
        Self {
            closed_at: Some(at),
            ..self.clone()
        }
    }

    /// Apply a filled order to the position
    ///
    /// Same side accumulates at a volume-weighted average. Opposite side reduces,
    /// closes, or flips the position when the order is larger than what is open.
    /// The realized profit of the closed slice is written back on the order.
    ///
    /// # Returns
    /// The realized result (if anything was closed) and whether the position is finished
    pub fn update(&mut self, order: &mut Order) -> (Option<TradeResult>, bool) {
        let price = order.fill_price();

        if self.side == order.side {
            self.avg_price = (self.avg_price * self.quantity + price * order.quantity)
                / (self.quantity + order.quantity);
            self.quantity += order.quantity;
            return (None, false);
        }

        let closed_side = self.side;
        let closed_quantity = self.quantity.min(order.quantity);
        let opened_at = self.created_at;
        let sign = closed_side.sign();

        order.profit = sign * (price - self.avg_price) / self.avg_price;
        order.profit_value = sign * (price - self.avg_price) * closed_quantity;

        let mut finished = false;
        if (self.quantity - order.quantity).abs() < QUANTITY_EPSILON {
            finished = true;
            self.closed_at = Some(order.updated_at);
        } else if self.quantity > order.quantity {
            self.quantity -= order.quantity;
        } else {
            // Flip to the opposite side
            self.quantity = order.quantity - self.quantity;
            self.side = order.side;
            self.avg_price = price;
            self.created_at = order.updated_at;
            self.id = Uuid::new_v4();
        }

        let result = TradeResult {
            pair: order.pair.clone(),
            side: closed_side,
            profit_percent: order.profit,
            profit_value: order.profit_value,
            duration: order.updated_at - opened_at,
            created_at: order.updated_at,
        };

        (Some(result), finished)
    }
}
