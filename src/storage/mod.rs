// Order and position records
pub mod file;
pub mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::models::{Order, OrderStatus, Position};
use crate::Result;

pub type OrderFilter = Box<dyn Fn(&Order) -> bool + Send + Sync>;
pub type PositionFilter = Box<dyn Fn(&Position) -> bool + Send + Sync>;

pub fn with_id(id: i64) -> OrderFilter {
    Box::new(move |order| order.id == id)
}

pub fn with_status_in(statuses: &[OrderStatus]) -> OrderFilter {
    let statuses = statuses.to_vec();
    Box::new(move |order| statuses.contains(&order.status))
}

pub fn with_status(status: OrderStatus) -> OrderFilter {
    Box::new(move |order| order.status == status)
}

pub fn with_pair(pair: &str) -> OrderFilter {
    let pair = pair.to_string();
    Box::new(move |order| order.pair == pair)
}

pub fn with_updated_at_before_or_equal(time: DateTime<Utc>) -> OrderFilter {
    Box::new(move |order| order.updated_at <= time)
}

pub fn with_position_pair(pair: &str) -> PositionFilter {
    let pair = pair.to_string();
    Box::new(move |position| position.pair == pair)
}

pub fn with_position_open() -> PositionFilter {
    Box::new(|position| position.is_open())
}

/// Durable record of orders and positions
///
/// Queries return records ordered by `updated_at`, then id. All filters must match.
pub trait Storage: Send + Sync {
    /// Persist a new order and assign its id
    fn create_order(&self, order: &mut Order) -> Result<()>;

    fn update_order(&self, order: &Order) -> Result<()>;

    fn orders(&self, filters: &[OrderFilter]) -> Result<Vec<Order>>;

    /// Insert or replace a position by id
    fn create_position(&self, position: &Position) -> Result<()>;

    fn positions(&self, filters: &[PositionFilter]) -> Result<Vec<Position>>;
}

/// Record set shared by the storage backends
#[derive(Debug, Default, Serialize, Deserialize)]
struct Records {
    last_id: i64,
    orders: Vec<Order>,
    positions: Vec<Position>,
}

impl Records {
    fn create_order(&mut self, order: &mut Order) {
        self.last_id += 1;
        order.id = self.last_id;
        self.orders.push(order.clone());
    }

    fn update_order(&mut self, order: &Order) -> Result<()> {
        let slot = self
            .orders
            .iter_mut()
            .find(|o| o.id == order.id)
            .ok_or(Error::OrderNotFound(order.id))?;
        if slot.status != order.status && !slot.status.can_transition_to(order.status) {
            return Err(Error::Storage(format!(
                "order {} cannot move from {} to {}",
                order.id, slot.status, order.status
            )));
        }
        *slot = order.clone();
        Ok(())
    }

    fn orders(&self, filters: &[OrderFilter]) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|o| filters.iter().all(|f| f(o)))
            .cloned()
            .collect();
        orders.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then(a.id.cmp(&b.id)));
        orders
    }

    fn create_position(&mut self, position: &Position) {
        match self.positions.iter_mut().find(|p| p.id == position.id) {
            Some(slot) => *slot = position.clone(),
            None => self.positions.push(position.clone()),
        }
    }

    fn positions(&self, filters: &[PositionFilter]) -> Vec<Position> {
        let mut positions: Vec<Position> = self
            .positions
            .iter()
            .filter(|p| filters.iter().all(|f| f(p)))
            .cloned()
            .collect();
        positions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        positions
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{OrderType, Side};
    use chrono::{Duration, TimeZone};

    pub(crate) fn order(pair: &str, status: OrderStatus, minute: i64) -> Order {
        let time = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
        Order {
            id: 0,
            exchange_id: minute,
            pair: pair.to_string(),
            side: Side::Buy,
            order_type: OrderType::Limit,
            status,
            price: 100.0,
            quantity: 1.0,
            created_at: time,
            updated_at: time,
            stop: None,
            group_id: None,
            ref_price: 100.0,
            profit: 0.0,
            profit_value: 0.0,
        }
    }

    /// Behaviour every backend has to share
    pub(crate) fn exercise(storage: &dyn Storage) {
        let mut a = order("BTCUSDT", OrderStatus::New, 2);
        let mut b = order("ETHUSDT", OrderStatus::Filled, 1);
        let mut c = order("BTCUSDT", OrderStatus::Canceled, 3);
        storage.create_order(&mut a).unwrap();
        storage.create_order(&mut b).unwrap();
        storage.create_order(&mut c).unwrap();
        assert_eq!((a.id, b.id, c.id), (1, 2, 3));

        let all = storage.orders(&[]).unwrap();
        let ids: Vec<i64> = all.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![2, 1, 3]);

        let pending = storage
            .orders(&[with_status_in(&[OrderStatus::New, OrderStatus::PartiallyFilled])])
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, a.id);

        let btc_until = storage
            .orders(&[with_pair("BTCUSDT"), with_updated_at_before_or_equal(a.updated_at)])
            .unwrap();
        assert_eq!(btc_until.len(), 1);

        a.status = OrderStatus::Filled;
        storage.update_order(&a).unwrap();
        assert_eq!(storage.orders(&[with_status(OrderStatus::Filled)]).unwrap().len(), 2);

        a.status = OrderStatus::PendingCancel;
        assert!(matches!(storage.update_order(&a), Err(Error::Storage(_))));
        assert_eq!(storage.orders(&[with_id(a.id)]).unwrap()[0].status, OrderStatus::Filled);

        let mut ghost = order("BTCUSDT", OrderStatus::New, 9);
        ghost.id = 42;
        assert!(matches!(storage.update_order(&ghost), Err(Error::OrderNotFound(42))));

        let mut position = Position::open(&b);
        storage.create_position(&position).unwrap();
        position.quantity = 3.0;
        storage.create_position(&position).unwrap();
        let positions = storage.positions(&[with_position_pair("ETHUSDT")]).unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, 3.0);
        assert!(storage.positions(&[with_position_pair("BTCUSDT")]).unwrap().is_empty());

        storage.create_position(&position.closed(b.updated_at)).unwrap();
        assert_eq!(storage.positions(&[]).unwrap().len(), 1);
        assert!(storage.positions(&[with_position_open()]).unwrap().is_empty());
    }
}
