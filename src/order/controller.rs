use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;

use super::{OrderFeed, Summary};
use crate::error::Error;
use crate::exchange::{Broker, Exchange};
use crate::models::{Account, Candle, Order, OrderStatus, Position, Side};
use crate::notification::Notifier;
use crate::pairs::PairTable;
use crate::storage::{with_id, with_status_in, Storage};
use crate::Result;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerStatus {
    Running,
    Stopped,
}

struct ControllerState {
    status: ControllerStatus,
    positions: HashMap<String, Position>,
    results: BTreeMap<String, Summary>,
    last_price: HashMap<String, f64>,
    finish: Option<oneshot::Sender<()>>,
}

/// Order entry point for strategies
///
/// Sends orders to the exchange, records them, mirrors fills into positions and
/// realized results, and polls pending orders for status changes.
pub struct Controller {
    exchange: Arc<dyn Exchange>,
    storage: Arc<dyn Storage>,
    order_feed: Arc<OrderFeed>,
    pairs: Arc<PairTable>,
    notifier: Option<Arc<dyn Notifier>>,
    poll_interval: Duration,
    state: Mutex<ControllerState>,
}

impl Controller {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        storage: Arc<dyn Storage>,
        order_feed: Arc<OrderFeed>,
        pairs: Arc<PairTable>,
    ) -> Self {
        Self {
            exchange,
            storage,
            order_feed,
            pairs,
            notifier: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            state: Mutex::new(ControllerState {
                status: ControllerStatus::Stopped,
                positions: HashMap::new(),
                results: BTreeMap::new(),
                last_price: HashMap::new(),
                finish: None,
            }),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn notify(&self, message: &str) {
        tracing::info!("{}", message);
        if let Some(notifier) = &self.notifier {
            notifier.notify(message);
        }
    }

    fn notify_error(&self, err: &Error) {
        tracing::error!("{}", err);
        if let Some(notifier) = &self.notifier {
            notifier.on_error(err);
        }
    }

    pub fn status(&self) -> ControllerStatus {
        self.lock().status
    }

    /// Record the latest close and pick up fills made on this candle
    pub fn on_candle(&self, candle: &Candle) {
        self.lock().last_price.insert(candle.pair.clone(), candle.close);
        self.update_orders();
    }

    pub fn last_quote(&self, pair: &str) -> Result<f64> {
        self.exchange.last_quote(pair)
    }

    /// Asset holdings of a pair valued at the last seen close
    pub fn position_value(&self, pair: &str) -> Result<f64> {
        let (asset, _) = self.exchange.position(pair)?;
        let price = self.lock().last_price.get(pair).copied().unwrap_or(0.0);
        Ok(asset * price)
    }

    /// Open position of a pair, if any
    pub fn open_position(&self, pair: &str) -> Option<Position> {
        self.lock().positions.get(pair).cloned()
    }

    pub fn summary(&self, pair: &str) -> Option<Summary> {
        self.lock().results.get(pair).cloned()
    }

    /// Per-pair results ordered by pair
    pub fn summaries(&self) -> Vec<Summary> {
        self.lock().results.values().cloned().collect()
    }

    fn process_trade(&self, state: &mut ControllerState, order: &mut Order) {
        if order.status != OrderStatus::Filled {
            return;
        }

        let quote = self
            .pairs
            .split(&order.pair)
            .map(|(_, quote)| quote)
            .unwrap_or_default();
        state
            .results
            .entry(order.pair.clone())
            .or_insert_with(|| Summary::new(&order.pair, &quote))
            .volume += order.fill_price() * order.quantity;

        self.update_position(state, order, &quote);
    }

    fn update_position(&self, state: &mut ControllerState, order: &mut Order, quote: &str) {
        let Some(position) = state.positions.get_mut(&order.pair) else {
            let position = Position::open(order);
            self.save_position(&position);
            state.positions.insert(order.pair.clone(), position);
            return;
        };

        let before = position.clone();
        let (result, finished) = position.update(order);
        let position = position.clone();
        if finished {
            self.save_position(&position);
            state.positions.remove(&order.pair);
        } else {
            if position.id != before.id {
                self.save_position(&before.closed(order.updated_at));
            }
            self.save_position(&position);
        }

        if let Some(result) = result {
            let summary = state
                .results
                .entry(order.pair.clone())
                .or_insert_with(|| Summary::new(&order.pair, quote));
            summary.record(&result);

            let message = format!(
                "[PROFIT] {:.4} {} ({:.2} %)\n{}",
                result.profit_value,
                quote,
                result.profit_percent * 100.0,
                summary
            );
            self.notify(&message);
        }
    }

    fn save_position(&self, position: &Position) {
        if let Err(e) = self.storage.create_position(position) {
            self.notify_error(&e);
        }
    }

    /// Persist a new order, surfacing failures as storage errors
    fn record_order(&self, order: &mut Order) -> Result<()> {
        self.storage.create_order(order).map_err(|e| {
            let err = Error::Storage(e.to_string());
            self.notify_error(&err);
            err
        })
    }

    /// Re-check pending orders against the exchange and book any status change
    pub fn update_orders(&self) {
        let mut state = self.lock();

        let pending = match self.storage.orders(&[with_status_in(&[
            OrderStatus::New,
            OrderStatus::PartiallyFilled,
            OrderStatus::PendingCancel,
        ])]) {
            Ok(orders) => orders,
            Err(e) => {
                self.notify_error(&e);
                return;
            }
        };

        for stored in pending {
            let mut order = match self.exchange.order(&stored.pair, stored.exchange_id) {
                Ok(order) => order,
                Err(e) => {
                    tracing::error!(id = stored.exchange_id, "Order lookup failed: {}", e);
                    continue;
                }
            };
            if order.status == stored.status {
                continue;
            }

            // Status is stored before the fill is booked; a failed write is retried on the next poll
            order.id = stored.id;
            if let Err(e) = self.storage.update_order(&order) {
                self.notify_error(&e);
                continue;
            }
            if order.status == OrderStatus::Filled {
                self.process_trade(&mut state, &mut order);
                if let Err(e) = self.storage.update_order(&order) {
                    self.notify_error(&e);
                }
            }

            tracing::info!("[ORDER {}] {}", order.status, order);
            self.order_feed.publish(order, false);
        }
    }

    /// Start polling pending orders
    pub fn start(self: &Arc<Self>) {
        let (tx, mut rx) = oneshot::channel();
        {
            let mut state = self.lock();
            if state.status == ControllerStatus::Running {
                return;
            }
            state.status = ControllerStatus::Running;
            state.finish = Some(tx);
        }

        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(controller.poll_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => controller.update_orders(),
                    _ = &mut rx => break,
                }
            }
        });
        tracing::info!("Order controller started");
    }

    /// Stop polling after one last pass over pending orders
    pub fn stop(&self) {
        let finish = {
            let mut state = self.lock();
            if state.status != ControllerStatus::Running {
                return;
            }
            state.status = ControllerStatus::Stopped;
            state.finish.take()
        };

        self.update_orders();
        if let Some(finish) = finish {
            let _ = finish.send(());
        }
        tracing::info!("Order controller stopped");
    }

    fn submitted(&self, mut order: Order) -> Result<Order> {
        {
            let mut state = self.lock();
            self.process_trade(&mut state, &mut order);
        }
        self.record_order(&mut order)?;
        self.order_feed.publish(order.clone(), true);
        tracing::info!("[ORDER CREATED] {}", order);
        Ok(order)
    }

    fn rejected<T>(&self, err: Error) -> Result<T> {
        self.notify_error(&err);
        Err(err)
    }
}

impl Broker for Controller {
    fn account(&self) -> Result<Account> {
        self.exchange.account()
    }

    fn position(&self, pair: &str) -> Result<(f64, f64)> {
        self.exchange.position(pair)
    }

    fn order(&self, pair: &str, id: i64) -> Result<Order> {
        self.exchange.order(pair, id)
    }

    fn create_order_oco(
        &self,
        side: Side,
        pair: &str,
        quantity: f64,
        price: f64,
        stop: f64,
        stop_limit: f64,
    ) -> Result<Vec<Order>> {
        tracing::info!(pair, side = %side, "[ORDER] Creating OCO order");
        let orders = match self
            .exchange
            .create_order_oco(side, pair, quantity, price, stop, stop_limit)
        {
            Ok(orders) => orders,
            Err(e) => return self.rejected(e),
        };

        let mut created = Vec::with_capacity(orders.len());
        for mut order in orders {
            self.record_order(&mut order)?;
            self.order_feed.publish(order.clone(), true);
            created.push(order);
        }
        Ok(created)
    }

    fn create_order_limit(&self, side: Side, pair: &str, quantity: f64, limit: f64) -> Result<Order> {
        tracing::info!(pair, side = %side, "[ORDER] Creating LIMIT order");
        match self.exchange.create_order_limit(side, pair, quantity, limit) {
            Ok(order) => self.submitted(order),
            Err(e) => self.rejected(e),
        }
    }

    fn create_order_market(&self, side: Side, pair: &str, quantity: f64) -> Result<Order> {
        tracing::info!(pair, side = %side, "[ORDER] Creating MARKET order");
        match self.exchange.create_order_market(side, pair, quantity) {
            Ok(order) => self.submitted(order),
            Err(e) => self.rejected(e),
        }
    }

    fn create_order_market_quote(&self, side: Side, pair: &str, quote: f64) -> Result<Order> {
        tracing::info!(pair, side = %side, "[ORDER] Creating MARKET order");
        match self.exchange.create_order_market_quote(side, pair, quote) {
            Ok(order) => self.submitted(order),
            Err(e) => self.rejected(e),
        }
    }

    fn create_order_stop(&self, pair: &str, quantity: f64, limit: f64) -> Result<Order> {
        tracing::info!(pair, "[ORDER] Creating STOP order");
        match self.exchange.create_order_stop(pair, quantity, limit) {
            Ok(order) => self.submitted(order),
            Err(e) => self.rejected(e),
        }
    }

    fn cancel(&self, order: &Order) -> Result<()> {
        tracing::info!(pair = %order.pair, "[ORDER] Cancelling order {}", order.exchange_id);
        if let Err(e) = self.exchange.cancel(order) {
            return self.rejected(e);
        }

        let current = match self.exchange.order(&order.pair, order.exchange_id) {
            Ok(current) => current,
            Err(e) => return self.rejected(e),
        };
        if current.status != OrderStatus::Canceled {
            tracing::warn!(
                pair = %order.pair,
                "Order {} is {}, nothing to cancel",
                order.exchange_id,
                current.status
            );
            return Ok(());
        }

        let stored = match self.storage.orders(&[with_id(order.id)]) {
            Ok(orders) => orders.into_iter().next(),
            Err(e) => return self.rejected(e),
        };
        let Some(mut pending) = stored else {
            return self.rejected(Error::OrderNotFound(order.id));
        };
        if !pending.status.can_transition_to(OrderStatus::PendingCancel) {
            tracing::warn!(pair = %order.pair, "Order {} already stored as {}", order.id, pending.status);
            return Ok(());
        }

        pending.status = OrderStatus::PendingCancel;
        pending.updated_at = current.updated_at;
        if let Err(e) = self.storage.update_order(&pending) {
            self.notify_error(&e);
            return Err(e);
        }
        tracing::info!("[ORDER CANCELED] {}", order);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::PaperWallet;
    use crate::storage::{with_position_open, with_status, MemoryStorage, OrderFilter, PositionFilter};
    use approx::assert_relative_eq;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::minutes(minute)
    }

    fn candle(minute: i64, close: f64, high: f64, low: f64) -> Candle {
        Candle::new("BTCUSDT", at(minute), close, high, low, close, 1.0)
    }

    struct Fixture {
        wallet: Arc<PaperWallet>,
        storage: Arc<MemoryStorage>,
        controller: Arc<Controller>,
    }

    impl Fixture {
        fn new(usdt: f64) -> Self {
            let pairs = Arc::new(PairTable::with_quote_fallback());
            let wallet = Arc::new(PaperWallet::new("USDT", pairs.clone()).with_asset("USDT", usdt));
            let storage = Arc::new(MemoryStorage::new());
            let controller = Arc::new(Controller::new(
                wallet.clone(),
                storage.clone(),
                Arc::new(OrderFeed::new()),
                pairs,
            ));
            Self {
                wallet,
                storage,
                controller,
            }
        }

        fn tick(&self, candle: &Candle) {
            self.wallet.on_candle(candle);
            self.controller.on_candle(candle);
        }
    }

    #[test]
    fn test_market_order_opens_position() {
        let fx = Fixture::new(10_000.0);
        fx.tick(&candle(0, 1000.0, 1000.0, 1000.0));

        let order = fx.controller.create_order_market(Side::Buy, "BTCUSDT", 2.0).unwrap();
        assert_eq!(order.id, 1);
        assert_eq!(fx.storage.orders(&[]).unwrap().len(), 1);

        let position = fx.controller.open_position("BTCUSDT").unwrap();
        assert_eq!(position.side, Side::Buy);
        assert_eq!(position.quantity, 2.0);
        assert_eq!(fx.storage.positions(&[]).unwrap().len(), 1);
        assert_relative_eq!(fx.controller.position_value("BTCUSDT").unwrap(), 2000.0);
    }

    #[test]
    fn test_round_trip_records_win() {
        let fx = Fixture::new(10_000.0);
        fx.tick(&candle(0, 1000.0, 1000.0, 1000.0));
        fx.controller.create_order_market(Side::Buy, "BTCUSDT", 1.0).unwrap();

        fx.tick(&candle(1, 1100.0, 1100.0, 1100.0));
        let sell = fx.controller.create_order_market(Side::Sell, "BTCUSDT", 1.0).unwrap();

        assert!(fx.controller.open_position("BTCUSDT").is_none());
        assert_relative_eq!(sell.profit_value, 100.0);
        assert_relative_eq!(sell.profit, 0.1);

        let summary = fx.controller.summary("BTCUSDT").unwrap();
        assert_eq!(summary.win_long, vec![100.0]);
        assert_relative_eq!(summary.volume, 2100.0);
    }

    #[test]
    fn test_flip_long_to_short() {
        let fx = Fixture::new(10_000.0);
        fx.tick(&candle(0, 1500.0, 1500.0, 1500.0));
        fx.controller.create_order_market(Side::Buy, "BTCUSDT", 2.0).unwrap();

        fx.tick(&candle(1, 1600.0, 1600.0, 1600.0));
        let sell = fx.controller.create_order_market(Side::Sell, "BTCUSDT", 3.0).unwrap();
        assert_relative_eq!(sell.profit_value, 200.0);

        let position = fx.controller.open_position("BTCUSDT").unwrap();
        assert_eq!(position.side, Side::Sell);
        assert_relative_eq!(position.quantity, 1.0);
        assert_relative_eq!(position.avg_price, 1600.0);
        assert_eq!(position.created_at, at(1));
        assert_eq!(fx.controller.summary("BTCUSDT").unwrap().win_long.len(), 1);
    }

    #[test]
    fn test_limit_fill_is_picked_up_on_candle() {
        let fx = Fixture::new(100.0);
        fx.tick(&candle(0, 110.0, 110.0, 110.0));

        let buy = fx.controller.create_order_limit(Side::Buy, "BTCUSDT", 1.0, 100.0).unwrap();
        assert!(fx.controller.open_position("BTCUSDT").is_none());

        fx.tick(&candle(1, 100.0, 101.0, 99.0));
        let stored = fx.storage.orders(&[with_status(OrderStatus::Filled)]).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, buy.id);
        assert_eq!(fx.controller.open_position("BTCUSDT").unwrap().quantity, 1.0);

        fx.controller.create_order_limit(Side::Sell, "BTCUSDT", 1.0, 200.0).unwrap();
        fx.tick(&candle(2, 200.0, 200.0, 150.0));
        assert!(fx.controller.open_position("BTCUSDT").is_none());
        assert_eq!(fx.controller.summary("BTCUSDT").unwrap().win().len(), 1);
    }

    #[test]
    fn test_cancel_marks_pending_then_canceled() {
        let fx = Fixture::new(100.0);
        fx.tick(&candle(0, 110.0, 110.0, 110.0));
        let buy = fx.controller.create_order_limit(Side::Buy, "BTCUSDT", 1.0, 50.0).unwrap();

        fx.controller.cancel(&buy).unwrap();
        assert_eq!(
            fx.storage.orders(&[with_status(OrderStatus::PendingCancel)]).unwrap().len(),
            1
        );

        fx.controller.update_orders();
        assert_eq!(
            fx.storage.orders(&[with_status(OrderStatus::Canceled)]).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_cancel_after_fill_books_the_fill_once() {
        let fx = Fixture::new(1000.0);
        fx.tick(&candle(0, 110.0, 110.0, 110.0));
        let buy = fx.controller.create_order_limit(Side::Buy, "BTCUSDT", 1.0, 100.0).unwrap();

        fx.tick(&candle(1, 100.0, 101.0, 99.0));
        assert_eq!(fx.controller.open_position("BTCUSDT").unwrap().quantity, 1.0);

        fx.controller.cancel(&buy).unwrap();
        let stored = fx.storage.orders(&[with_id(buy.id)]).unwrap();
        assert_eq!(stored[0].status, OrderStatus::Filled);

        fx.controller.update_orders();
        assert_eq!(fx.controller.open_position("BTCUSDT").unwrap().quantity, 1.0);
        assert_eq!(fx.wallet.position("BTCUSDT").unwrap(), (1.0, 900.0));
    }

    #[test]
    fn test_cancel_of_unpolled_fill_leaves_it_to_the_poll() {
        let fx = Fixture::new(1000.0);
        fx.tick(&candle(0, 110.0, 110.0, 110.0));
        let buy = fx.controller.create_order_limit(Side::Buy, "BTCUSDT", 1.0, 100.0).unwrap();

        fx.wallet.on_candle(&candle(1, 100.0, 101.0, 99.0));
        fx.controller.cancel(&buy).unwrap();
        let stored = fx.storage.orders(&[with_id(buy.id)]).unwrap();
        assert_eq!(stored[0].status, OrderStatus::New);

        fx.controller.update_orders();
        fx.controller.update_orders();
        assert_eq!(fx.controller.open_position("BTCUSDT").unwrap().quantity, 1.0);
        assert_eq!(fx.storage.orders(&[with_status(OrderStatus::Filled)]).unwrap().len(), 1);
    }

    #[test]
    fn test_closed_position_is_stored_closed() {
        let fx = Fixture::new(10_000.0);
        fx.tick(&candle(0, 1000.0, 1000.0, 1000.0));
        fx.controller.create_order_market(Side::Buy, "BTCUSDT", 2.0).unwrap();
        fx.tick(&candle(1, 1100.0, 1100.0, 1100.0));
        fx.controller.create_order_market(Side::Sell, "BTCUSDT", 2.0).unwrap();

        let stored = fx.storage.positions(&[]).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].closed_at, Some(at(1)));
        assert!(fx.storage.positions(&[with_position_open()]).unwrap().is_empty());
    }

    #[test]
    fn test_flip_stores_closed_long_and_open_short() {
        let fx = Fixture::new(10_000.0);
        fx.tick(&candle(0, 1500.0, 1500.0, 1500.0));
        fx.controller.create_order_market(Side::Buy, "BTCUSDT", 2.0).unwrap();
        fx.tick(&candle(1, 1600.0, 1600.0, 1600.0));
        fx.controller.create_order_market(Side::Sell, "BTCUSDT", 3.0).unwrap();

        let stored = fx.storage.positions(&[]).unwrap();
        assert_eq!(stored.len(), 2);
        let long = stored.iter().find(|p| p.side == Side::Buy).unwrap();
        assert_eq!(long.closed_at, Some(at(1)));
        assert_relative_eq!(long.quantity, 2.0);

        let open = fx.storage.positions(&[with_position_open()]).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].side, Side::Sell);
        assert_relative_eq!(open[0].quantity, 1.0);
        assert_eq!(Some(&open[0]), fx.controller.open_position("BTCUSDT").as_ref());
    }

    /// Memory storage whose order updates can be switched to fail
    #[derive(Default)]
    struct FlakyStorage {
        inner: MemoryStorage,
        failing: AtomicBool,
    }

    impl Storage for FlakyStorage {
        fn create_order(&self, order: &mut Order) -> Result<()> {
            self.inner.create_order(order)
        }

        fn update_order(&self, order: &Order) -> Result<()> {
            if self.failing.load(AtomicOrdering::SeqCst) {
                return Err(Error::Storage("disk full".to_string()));
            }
            self.inner.update_order(order)
        }

        fn orders(&self, filters: &[OrderFilter]) -> Result<Vec<Order>> {
            self.inner.orders(filters)
        }

        fn create_position(&self, position: &Position) -> Result<()> {
            self.inner.create_position(position)
        }

        fn positions(&self, filters: &[PositionFilter]) -> Result<Vec<Position>> {
            self.inner.positions(filters)
        }
    }

    #[test]
    fn test_failed_update_does_not_book_the_fill_twice() {
        let pairs = Arc::new(PairTable::with_quote_fallback());
        let wallet = Arc::new(PaperWallet::new("USDT", pairs.clone()).with_asset("USDT", 1000.0));
        let storage = Arc::new(FlakyStorage::default());
        let controller = Controller::new(wallet.clone(), storage.clone(), Arc::new(OrderFeed::new()), pairs);

        let bar = candle(0, 110.0, 110.0, 110.0);
        wallet.on_candle(&bar);
        controller.on_candle(&bar);
        controller.create_order_limit(Side::Buy, "BTCUSDT", 1.0, 100.0).unwrap();

        storage.failing.store(true, AtomicOrdering::SeqCst);
        let bar = candle(1, 100.0, 101.0, 99.0);
        wallet.on_candle(&bar);
        controller.on_candle(&bar);
        assert!(controller.open_position("BTCUSDT").is_none());

        storage.failing.store(false, AtomicOrdering::SeqCst);
        controller.update_orders();
        controller.update_orders();
        assert_eq!(controller.open_position("BTCUSDT").unwrap().quantity, 1.0);
        assert_eq!(storage.orders(&[with_status(OrderStatus::Filled)]).unwrap().len(), 1);
    }

    #[test]
    fn test_rejected_orders_are_returned() {
        let fx = Fixture::new(100.0);
        fx.tick(&candle(0, 1000.0, 1000.0, 1000.0));

        let err = fx
            .controller
            .create_order_market(Side::Buy, "BTCUSDT", 1.0)
            .unwrap_err();
        assert!(matches!(err, Error::InsufficientFunds { .. }));
        assert!(fx.storage.orders(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_oco_orders_are_stored() {
        let fx = Fixture::new(100.0);
        fx.tick(&candle(0, 100.0, 100.0, 100.0));
        fx.controller.create_order_market(Side::Buy, "BTCUSDT", 1.0).unwrap();

        let legs = fx
            .controller
            .create_order_oco(Side::Sell, "BTCUSDT", 1.0, 120.0, 90.0, 89.0)
            .unwrap();
        assert_eq!(legs.len(), 2);
        assert!(legs.iter().all(|o| o.id > 0));

        fx.tick(&candle(1, 121.0, 121.0, 110.0));
        let canceled = fx.storage.orders(&[with_status(OrderStatus::Canceled)]).unwrap();
        assert_eq!(canceled.len(), 1);
        assert!(fx.controller.open_position("BTCUSDT").is_none());
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let fx = Fixture::new(100.0);
        let controller = fx.controller.clone();

        controller.start();
        assert_eq!(controller.status(), ControllerStatus::Running);
        tokio::time::sleep(Duration::from_millis(5)).await;

        controller.stop();
        assert_eq!(controller.status(), ControllerStatus::Stopped);
        controller.stop();
    }
}
