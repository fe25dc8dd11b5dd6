use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::ledger::Ledger;
use super::Broker;
use crate::error::Error;
use crate::feed::{CandleStream, Feeder};
use crate::models::{Account, AssetInfo, AssetValue, Balance, Candle, Order, OrderStatus, OrderType, Side};
use crate::pairs::PairTable;
use crate::Result;

const DEFAULT_FEE: f64 = 0.001;
const LOT_PRECISION: f64 = 1e8;

/// Largest peak-to-trough decline of an equity curve
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Drawdown {
    /// Relative decline, negative (-0.25 is a 25% drawdown)
    pub value: f64,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Maximum drawdown of a value series
///
/// Backward scan keeping a running loss that restarts whenever it turns into a gain.
/// Runs are compared by their loss relative to the value they started from.
pub fn max_drawdown_of(values: &[AssetValue]) -> Option<Drawdown> {
    if values.len() < 2 {
        return None;
    }

    let mut local = f64::MAX;
    let mut local_end = values[values.len() - 1].time;
    let mut global: Option<Drawdown> = None;

    for i in (1..values.len()).rev() {
        let diff = values[i].value - values[i - 1].value;
        if local > 0.0 {
            local = diff;
            local_end = values[i].time;
        } else {
            local += diff;
        }
        let (local_base, local_start) = (values[i - 1].value, values[i - 1].time);

        if local_base <= 0.0 {
            continue;
        }
        let relative = local / local_base;
        if global.map_or(true, |g| relative < g.value) {
            global = Some(Drawdown {
                value: relative,
                start: local_start,
                end: local_end,
            });
        }
    }

    global.filter(|g| g.value < 0.0)
}

/// End-of-run numbers of a paper account
#[derive(Debug, Clone)]
pub struct WalletSummary {
    pub base_coin: String,
    pub start_portfolio: f64,
    pub final_portfolio: f64,
    pub gross_profit: f64,
    /// Average buy-and-hold change across traded pairs, in percent
    pub market_change: f64,
    pub max_drawdown: Option<Drawdown>,
    pub volume: BTreeMap<String, f64>,
    /// Volume times the taker fee
    pub costs: f64,
}

impl WalletSummary {
    pub fn return_pct(&self) -> f64 {
        if self.start_portfolio == 0.0 {
            return 0.0;
        }
        self.gross_profit / self.start_portfolio * 100.0
    }

    /// Print a formatted report to stdout
    pub fn print_report(&self) {
        println!("{}", self);
    }
}

impl fmt::Display for WalletSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "╔════════════════════════════════════════════════════════╗")?;
        writeln!(f, "║                 PAPER WALLET REPORT                    ║")?;
        writeln!(f, "╚════════════════════════════════════════════════════════╝")?;
        writeln!(f)?;
        writeln!(f, "📊 PORTFOLIO")?;
        writeln!(f, "  Start Portfolio:       {:.2} {}", self.start_portfolio, self.base_coin)?;
        writeln!(f, "  Final Portfolio:       {:.2} {}", self.final_portfolio, self.base_coin)?;
        writeln!(
            f,
            "  Gross Profit:          {:.2} {} ({:+.2}%)",
            self.gross_profit,
            self.base_coin,
            self.return_pct()
        )?;
        writeln!(f, "  Market Change (B&H):   {:+.2}%", self.market_change)?;

        writeln!(f)?;
        writeln!(f, "⚠️  RISK")?;
        match &self.max_drawdown {
            Some(dd) => writeln!(
                f,
                "  Max Drawdown:          {:.2}% ({} -> {})",
                dd.value * 100.0,
                dd.start.format("%Y-%m-%d %H:%M"),
                dd.end.format("%Y-%m-%d %H:%M")
            )?,
            None => writeln!(f, "  Max Drawdown:          none")?,
        }

        writeln!(f)?;
        writeln!(f, "💰 VOLUME")?;
        for (pair, volume) in &self.volume {
            writeln!(f, "  {:<22} {:.2} {}", pair, volume, self.base_coin)?;
        }
        write!(f, "  Estimated Costs:       {:.2} {}", self.costs, self.base_coin)
    }
}

#[derive(Default)]
struct WalletState {
    ledger: Ledger,
    orders: Vec<Order>,
    counter: i64,
    last_candle: HashMap<String, Candle>,
    first_candle: HashMap<String, Candle>,
    volume: HashMap<String, f64>,
    asset_values: HashMap<String, Vec<AssetValue>>,
    equity_values: Vec<AssetValue>,
    initial_equity: f64,
}

impl WalletState {
    fn next_id(&mut self) -> i64 {
        self.counter += 1;
        self.counter
    }

    fn now(&self, pair: &str) -> DateTime<Utc> {
        self.last_candle.get(pair).map_or_else(Utc::now, |c| c.time)
    }

    fn last_close(&self, pair: &str) -> Result<f64> {
        self.last_candle
            .get(pair)
            .map(|c| c.close)
            .ok_or_else(|| Error::InsufficientData(format!("no price for {}", pair)))
    }

    fn new_order(&mut self, pair: &str, side: Side, order_type: OrderType, quantity: f64, price: f64) -> Order {
        let id = self.next_id();
        let now = self.now(pair);
        Order {
            id: 0,
            exchange_id: id,
            pair: pair.to_string(),
            side,
            order_type,
            status: OrderStatus::New,
            price,
            quantity,
            created_at: now,
            updated_at: now,
            stop: None,
            group_id: None,
            ref_price: self.last_close(pair).unwrap_or(price),
            profit: 0.0,
            profit_value: 0.0,
        }
    }

    /// Value of every non-base holding at its last close, keyed by asset
    fn holdings(&self, pairs: &PairTable, base_coin: &str) -> Vec<(String, f64)> {
        self.ledger
            .assets()
            .filter(|(asset, _)| asset.as_str() != base_coin)
            .map(|(asset, balance)| {
                let pair = pairs.pair_for(asset, base_coin);
                let quantity = balance.total();
                let value = match self.last_candle.get(&pair) {
                    None => 0.0,
                    Some(candle) if quantity < 0.0 => {
                        self.ledger.short_value(&pair, quantity.abs(), candle.close)
                    }
                    Some(candle) => quantity * candle.close,
                };
                (asset.clone(), value)
            })
            .collect()
    }

    fn equity(&self, pairs: &PairTable, base_coin: &str) -> f64 {
        let holdings: f64 = self.holdings(pairs, base_coin).iter().map(|(_, v)| v).sum();
        holdings + self.ledger.balance(base_coin).total()
    }
}

/// In-memory simulated exchange
///
/// Fills resting orders against incoming candles and keeps balances, average entry
/// prices, traded volume and the equity curve. All state sits behind one lock.
pub struct PaperWallet {
    base_coin: String,
    pairs: Arc<PairTable>,
    feeder: Option<Arc<dyn Feeder>>,
    maker_fee: f64,
    taker_fee: f64,
    state: Mutex<WalletState>,
}

impl PaperWallet {
    pub fn new(base_coin: &str, pairs: Arc<PairTable>) -> Self {
        Self {
            base_coin: base_coin.to_uppercase(),
            pairs,
            feeder: None,
            maker_fee: DEFAULT_FEE,
            taker_fee: DEFAULT_FEE,
            state: Mutex::new(WalletState::default()),
        }
    }

    /// Seed a balance
    pub fn with_asset(self, asset: &str, amount: f64) -> Self {
        {
            let mut state = self.lock();
            state.ledger.deposit(&asset.to_uppercase(), amount);
            if asset.eq_ignore_ascii_case(&self.base_coin) {
                state.initial_equity += amount;
            }
        }
        self
    }

    /// Market data source used for quotes and subscriptions
    pub fn with_feeder(mut self, feeder: Arc<dyn Feeder>) -> Self {
        self.feeder = Some(feeder);
        self
    }

    pub fn with_fees(mut self, maker: f64, taker: f64) -> Self {
        self.maker_fee = maker;
        self.taker_fee = taker;
        self
    }

    pub fn base_coin(&self) -> &str {
        &self.base_coin
    }

    pub fn fees(&self) -> (f64, f64) {
        (self.maker_fee, self.taker_fee)
    }

    fn lock(&self) -> MutexGuard<'_, WalletState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Trading rules of a pair; the paper venue accepts any size down to 1e-8
    pub fn assets_info(&self, pair: &str) -> Result<AssetInfo> {
        let (asset, quote) = self.pairs.split(pair)?;
        Ok(AssetInfo {
            base_asset: asset,
            quote_asset: quote,
            min_price: 0.0,
            max_price: f64::MAX,
            min_quantity: 0.0,
            max_quantity: f64::MAX,
            step_size: 1.0 / LOT_PRECISION,
            tick_size: 1.0 / LOT_PRECISION,
            quote_precision: 8,
            base_asset_precision: 8,
        })
    }

    /// Match resting orders of the candle's pair and sample equity on closed bars
    pub fn on_candle(&self, candle: &Candle) {
        let mut state = self.lock();
        state.last_candle.insert(candle.pair.clone(), candle.clone());
        state
            .first_candle
            .entry(candle.pair.clone())
            .or_insert_with(|| candle.clone());

        let triggered: Vec<usize> = state
            .orders
            .iter()
            .enumerate()
            .filter(|(_, o)| o.pair == candle.pair && o.status == OrderStatus::New)
            .filter(|(_, o)| match o.side {
                Side::Buy => o.price >= candle.close,
                Side::Sell if o.order_type.is_stop_family() => o.stop.map_or(false, |stop| candle.low <= stop),
                Side::Sell => o.order_type.is_limit_family() && candle.high >= o.price,
            })
            .map(|(i, _)| i)
            .collect();

        // Both legs of a group hit in the same bar: the stop leg wins
        let stop_groups: HashSet<i64> = triggered
            .iter()
            .map(|&i| &state.orders[i])
            .filter(|o| o.order_type.is_stop_family())
            .filter_map(|o| o.group_id)
            .collect();

        let mut filled_groups = HashSet::new();
        for i in triggered {
            let (group, is_stop) = (state.orders[i].group_id, state.orders[i].order_type.is_stop_family());
            if let Some(group) = group {
                if (stop_groups.contains(&group) && !is_stop) || !filled_groups.insert(group) {
                    continue;
                }
            }
            self.fill(&mut state, i, candle);
        }

        if candle.complete {
            let values = state.holdings(&self.pairs, &self.base_coin);
            let mut total = 0.0;
            for (asset, value) in values {
                total += value;
                state.asset_values.entry(asset).or_default().push(AssetValue {
                    time: candle.time,
                    value,
                });
            }
            total += state.ledger.balance(&self.base_coin).total();
            state.equity_values.push(AssetValue {
                time: candle.time,
                value: total,
            });
        }
    }

    fn fill(&self, state: &mut WalletState, index: usize, candle: &Candle) {
        let order = state.orders[index].clone();
        let Ok(assets) = self.pairs.split(&order.pair) else {
            tracing::warn!(pair = %order.pair, "Unknown pair, order left open");
            return;
        };
        let price = order.fill_price();

        state.ledger.release(order.group_id.unwrap_or(order.exchange_id));
        state
            .ledger
            .settle(order.side, &order.pair, (&assets.0, &assets.1), order.quantity, price);
        state.orders[index].transition(OrderStatus::Filled, candle.time);
        *state.volume.entry(order.pair.clone()).or_default() += price * order.quantity;

        if let Some(group) = order.group_id {
            for sibling in state.orders.iter_mut() {
                if sibling.group_id == Some(group) && sibling.exchange_id != order.exchange_id {
                    sibling.transition(OrderStatus::Canceled, candle.time);
                }
            }
        }

        tracing::info!(
            pair = %order.pair,
            side = %order.side,
            quantity = order.quantity,
            price,
            "Paper order {} filled",
            order.exchange_id
        );
    }

    /// Equity curve sampled on every closed candle
    pub fn equity_values(&self) -> Vec<AssetValue> {
        self.lock().equity_values.clone()
    }

    /// Value curve of one asset
    pub fn asset_values(&self, asset: &str) -> Vec<AssetValue> {
        self.lock()
            .asset_values
            .get(&asset.to_uppercase())
            .cloned()
            .unwrap_or_default()
    }

    pub fn max_drawdown(&self) -> Option<Drawdown> {
        max_drawdown_of(&self.lock().equity_values)
    }

    /// Traded volume in quote currency
    pub fn volume(&self, pair: &str) -> f64 {
        self.lock().volume.get(pair).copied().unwrap_or(0.0)
    }

    /// Average long and short entry price of a pair
    pub fn average_prices(&self, pair: &str) -> (f64, f64) {
        let state = self.lock();
        (state.ledger.avg_long_price(pair), state.ledger.avg_short_price(pair))
    }

    /// Every order the wallet has seen, oldest first
    pub fn orders(&self) -> Vec<Order> {
        self.lock().orders.clone()
    }

    pub fn summary(&self) -> WalletSummary {
        let state = self.lock();
        let final_portfolio = state.equity(&self.pairs, &self.base_coin);
        let start_portfolio = state
            .equity_values
            .first()
            .map_or(state.initial_equity, |v| v.value);

        let changes: Vec<f64> = state
            .first_candle
            .iter()
            .filter_map(|(pair, first)| {
                let last = state.last_candle.get(pair)?;
                (first.close != 0.0).then(|| (last.close - first.close) / first.close)
            })
            .collect();
        let market_change = if changes.is_empty() {
            0.0
        } else {
            changes.iter().sum::<f64>() / changes.len() as f64 * 100.0
        };

        let volume: BTreeMap<String, f64> = state.volume.iter().map(|(k, v)| (k.clone(), *v)).collect();
        let costs = volume.values().sum::<f64>() * self.taker_fee;

        WalletSummary {
            base_coin: self.base_coin.clone(),
            start_portfolio,
            final_portfolio,
            gross_profit: final_portfolio - start_portfolio,
            market_change,
            max_drawdown: max_drawdown_of(&state.equity_values),
            volume,
            costs,
        }
    }

    fn create_market(&self, state: &mut WalletState, side: Side, pair: &str, quantity: f64) -> Result<Order> {
        let assets = self.pairs.split(pair)?;
        let price = state.last_close(pair)?;

        state
            .ledger
            .execute(side, pair, (&assets.0, &assets.1), quantity, price)?;

        let mut order = state.new_order(pair, side, OrderType::Market, quantity, price);
        order.status = OrderStatus::Filled;
        *state.volume.entry(pair.to_string()).or_default() += price * quantity;
        state.orders.push(order.clone());

        tracing::info!(pair, side = %side, quantity, price, "Paper market order filled");
        Ok(order)
    }
}

impl Broker for PaperWallet {
    fn account(&self) -> Result<Account> {
        let state = self.lock();
        let mut balances: Vec<Balance> = state
            .ledger
            .assets()
            .map(|(asset, b)| Balance {
                asset: asset.clone(),
                free: b.free,
                lock: b.lock,
            })
            .collect();
        balances.sort_by(|a, b| a.asset.cmp(&b.asset));
        Ok(Account { balances })
    }

    fn position(&self, pair: &str) -> Result<(f64, f64)> {
        let (asset, quote) = self.pairs.split(pair)?;
        let state = self.lock();
        Ok((state.ledger.balance(&asset).total(), state.ledger.balance(&quote).total()))
    }

    fn order(&self, _pair: &str, id: i64) -> Result<Order> {
        self.lock()
            .orders
            .iter()
            .find(|o| o.exchange_id == id)
            .cloned()
            .ok_or(Error::OrderNotFound(id))
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
        let assets = self.pairs.split(pair)?;
        let mut state = self.lock();

        let group = state.next_id();
        state
            .ledger
            .reserve(group, side, pair, (&assets.0, &assets.1), quantity, price)?;

        let mut limit_maker = state.new_order(pair, side, OrderType::LimitMaker, quantity, price);
        limit_maker.group_id = Some(group);
        let mut stop_loss = state.new_order(pair, side, OrderType::StopLoss, quantity, stop_limit);
        stop_loss.stop = Some(stop);
        stop_loss.group_id = Some(group);

        state.orders.push(limit_maker.clone());
        state.orders.push(stop_loss.clone());

        tracing::info!(pair, side = %side, quantity, price, stop, "Paper OCO order placed");
        Ok(vec![limit_maker, stop_loss])
    }

    fn create_order_limit(&self, side: Side, pair: &str, quantity: f64, limit: f64) -> Result<Order> {
        let assets = self.pairs.split(pair)?;
        let mut state = self.lock();

        let order = state.new_order(pair, side, OrderType::Limit, quantity, limit);
        state
            .ledger
            .reserve(order.exchange_id, side, pair, (&assets.0, &assets.1), quantity, limit)?;
        state.orders.push(order.clone());

        tracing::info!(pair, side = %side, quantity, price = limit, "Paper limit order placed");
        Ok(order)
    }

    fn create_order_market(&self, side: Side, pair: &str, quantity: f64) -> Result<Order> {
        let mut state = self.lock();
        self.create_market(&mut state, side, pair, quantity)
    }

    fn create_order_market_quote(&self, side: Side, pair: &str, quote: f64) -> Result<Order> {
        let mut state = self.lock();
        let price = state.last_close(pair)?;
        let quantity = (quote / price * LOT_PRECISION).floor() / LOT_PRECISION;
        self.create_market(&mut state, side, pair, quantity)
    }

    fn create_order_stop(&self, pair: &str, quantity: f64, limit: f64) -> Result<Order> {
        let assets = self.pairs.split(pair)?;
        let mut state = self.lock();

        let mut order = state.new_order(pair, Side::Sell, OrderType::StopLoss, quantity, limit);
        order.stop = Some(limit);
        state
            .ledger
            .reserve(order.exchange_id, Side::Sell, pair, (&assets.0, &assets.1), quantity, limit)?;
        state.orders.push(order.clone());

        tracing::info!(pair, quantity, stop = limit, "Paper stop order placed");
        Ok(order)
    }

    fn cancel(&self, order: &Order) -> Result<()> {
        let mut state = self.lock();
        let now = state.now(&order.pair);

        let target = state
            .orders
            .iter()
            .find(|o| o.exchange_id == order.exchange_id)
            .map(|o| (o.group_id, o.status))
            .ok_or(Error::OrderNotFound(order.exchange_id))?;

        if target.1.is_terminal() {
            tracing::warn!(pair = %order.pair, "Order {} already {}", order.exchange_id, target.1);
            return Ok(());
        }

        state.ledger.release(target.0.unwrap_or(order.exchange_id));
        for o in state.orders.iter_mut() {
            let same = o.exchange_id == order.exchange_id || (target.0.is_some() && o.group_id == target.0);
            if same {
                o.transition(OrderStatus::Canceled, now);
            }
        }

        tracing::info!(pair = %order.pair, "Paper order {} canceled", order.exchange_id);
        Ok(())
    }
}

impl Feeder for PaperWallet {
    fn last_quote(&self, pair: &str) -> Result<f64> {
        match &self.feeder {
            Some(feeder) => feeder.last_quote(pair),
            None => self.lock().last_close(pair),
        }
    }

    fn candles_by_period(
        &self,
        pair: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        self.feeder
            .as_ref()
            .ok_or(Error::NoDataFeed)?
            .candles_by_period(pair, timeframe, start, end)
    }

    fn candles_by_limit(&self, pair: &str, timeframe: &str, limit: usize) -> Result<Vec<Candle>> {
        self.feeder
            .as_ref()
            .ok_or(Error::NoDataFeed)?
            .candles_by_limit(pair, timeframe, limit)
    }

    fn candles_subscription(&self, pair: &str, timeframe: &str) -> CandleStream {
        match &self.feeder {
            Some(feeder) => feeder.candles_subscription(pair, timeframe),
            None => {
                let (_, err_tx, stream) = CandleStream::channel(1);
                let _ = err_tx.try_send(Error::NoDataFeed);
                stream
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn candle(minute: i64, close: f64, high: f64, low: f64) -> Candle {
        Candle::new("BTCUSDT", at(minute), close, high, low, close, 1.0)
    }

    fn wallet(usdt: f64) -> PaperWallet {
        PaperWallet::new("USDT", Arc::new(PairTable::with_quote_fallback())).with_asset("USDT", usdt)
    }

    fn balances(wallet: &PaperWallet) -> (Balance, Balance) {
        wallet.account().unwrap().balance("BTC", "USDT")
    }

    fn values(raw: &[f64]) -> Vec<AssetValue> {
        raw.iter()
            .enumerate()
            .map(|(i, v)| AssetValue {
                time: at(i as i64),
                value: *v,
            })
            .collect()
    }

    #[test]
    fn test_limit_round_trip() {
        let wallet = wallet(100.0);

        let buy = wallet.create_order_limit(Side::Buy, "BTCUSDT", 1.0, 100.0).unwrap();
        let (btc, usdt) = balances(&wallet);
        assert_eq!((usdt.free, usdt.lock), (0.0, 100.0));
        assert_eq!(btc.total(), 0.0);

        wallet.on_candle(&candle(0, 100.0, 100.0, 100.0));
        assert_eq!(wallet.order("BTCUSDT", buy.exchange_id).unwrap().status, OrderStatus::Filled);
        let (btc, usdt) = balances(&wallet);
        assert_eq!(btc.free, 1.0);
        assert_eq!((usdt.free, usdt.lock), (0.0, 0.0));

        wallet.create_order_limit(Side::Sell, "BTCUSDT", 1.0, 200.0).unwrap();
        let (btc, _) = balances(&wallet);
        assert_eq!((btc.free, btc.lock), (0.0, 1.0));

        wallet.on_candle(&candle(1, 200.0, 200.0, 190.0));
        let (btc, usdt) = balances(&wallet);
        assert_eq!(btc.total(), 0.0);
        assert_eq!(usdt.free, 200.0);
        assert_relative_eq!(wallet.volume("BTCUSDT"), 300.0);
    }

    #[test]
    fn test_limit_waits_for_price() {
        let wallet = wallet(100.0);
        let buy = wallet.create_order_limit(Side::Buy, "BTCUSDT", 1.0, 90.0).unwrap();

        wallet.on_candle(&candle(0, 95.0, 96.0, 89.0));
        assert_eq!(wallet.order("BTCUSDT", buy.exchange_id).unwrap().status, OrderStatus::New);

        wallet.on_candle(&candle(1, 90.0, 91.0, 89.0));
        let filled = wallet.order("BTCUSDT", buy.exchange_id).unwrap();
        assert_eq!(filled.status, OrderStatus::Filled);
        assert_eq!(filled.updated_at, at(1));
        // filled at the limit, the 10 USDT difference stays free
        assert_relative_eq!(balances(&wallet).1.free, 10.0);
    }

    #[test]
    fn test_cancel_restores_funds() {
        let wallet = wallet(100.0);
        let before = balances(&wallet);

        let order = wallet.create_order_limit(Side::Buy, "BTCUSDT", 0.5, 150.0).unwrap();
        wallet.cancel(&order).unwrap();

        assert_eq!(balances(&wallet), before);
        assert_eq!(wallet.order("BTCUSDT", order.exchange_id).unwrap().status, OrderStatus::Canceled);
        // no fill after cancel
        wallet.on_candle(&candle(0, 100.0, 100.0, 100.0));
        assert_eq!(balances(&wallet), before);

        let mut ghost = order.clone();
        ghost.exchange_id = 999;
        assert!(matches!(wallet.cancel(&ghost), Err(Error::OrderNotFound(999))));
    }

    #[test]
    fn test_market_orders() {
        let wallet = wallet(10_000.0);
        assert!(matches!(
            wallet.create_order_market(Side::Buy, "BTCUSDT", 1.0),
            Err(Error::InsufficientData(_))
        ));

        wallet.on_candle(&candle(0, 1500.0, 1500.0, 1500.0));
        assert!(matches!(
            wallet.create_order_market(Side::Buy, "BTCUSDT", 0.0),
            Err(Error::InvalidQuantity)
        ));
        assert!(matches!(
            wallet.create_order_market(Side::Buy, "BTCUSDT", 10.0),
            Err(Error::InsufficientFunds { .. })
        ));

        let order = wallet.create_order_market_quote(Side::Buy, "BTCUSDT", 3000.0).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.quantity, 2.0);
        assert_eq!(wallet.position("BTCUSDT").unwrap(), (2.0, 7000.0));
    }

    #[test]
    fn test_short_round_trip() {
        let wallet = wallet(10_000.0);

        wallet.on_candle(&candle(0, 1500.0, 1500.0, 1500.0));
        wallet.create_order_market(Side::Sell, "BTCUSDT", 1.0).unwrap();
        assert_eq!(balances(&wallet).0.free, -1.0);

        wallet.on_candle(&candle(1, 1000.0, 1000.0, 1000.0));
        wallet.create_order_market(Side::Buy, "BTCUSDT", 1.0).unwrap();
        let (btc, usdt) = balances(&wallet);
        assert_eq!(btc.free, 0.0);
        assert_relative_eq!(usdt.free, 10_500.0);
    }

    #[test]
    fn test_average_price() {
        let wallet = wallet(1000.0);
        wallet.on_candle(&candle(0, 100.0, 100.0, 100.0));
        wallet.create_order_market(Side::Buy, "BTCUSDT", 1.0).unwrap();
        wallet.on_candle(&candle(1, 50.0, 50.0, 50.0));
        wallet.create_order_market(Side::Buy, "BTCUSDT", 1.0).unwrap();
        assert_relative_eq!(wallet.average_prices("BTCUSDT").0, 75.0);

        wallet.on_candle(&candle(2, 101.0, 101.0, 101.0));
        wallet.create_order_market(Side::Buy, "BTCUSDT", 2.0).unwrap();
        assert_relative_eq!(wallet.average_prices("BTCUSDT").0, 88.0);
    }

    #[test]
    fn test_oco_take_profit_cancels_stop() {
        let wallet = wallet(0.0).with_asset("BTC", 1.0);
        wallet.on_candle(&candle(0, 100.0, 100.0, 100.0));

        let legs = wallet
            .create_order_oco(Side::Sell, "BTCUSDT", 1.0, 120.0, 90.0, 89.0)
            .unwrap();
        assert_eq!(legs.len(), 2);
        assert_eq!(legs[0].group_id, legs[1].group_id);
        assert_eq!(legs[0].order_type, OrderType::LimitMaker);
        assert_eq!(legs[1].order_type, OrderType::StopLoss);
        // locked once for the pair of legs
        assert_eq!(balances(&wallet).0.lock, 1.0);

        wallet.on_candle(&candle(1, 119.0, 121.0, 95.0));
        let limit = wallet.order("BTCUSDT", legs[0].exchange_id).unwrap();
        let stop = wallet.order("BTCUSDT", legs[1].exchange_id).unwrap();
        assert_eq!(limit.status, OrderStatus::Filled);
        assert_eq!(stop.status, OrderStatus::Canceled);
        assert_relative_eq!(balances(&wallet).1.free, 120.0);
    }

    #[test]
    fn test_oco_same_bar_prefers_stop() {
        let wallet = wallet(0.0).with_asset("BTC", 1.0);
        wallet.on_candle(&candle(0, 100.0, 100.0, 100.0));
        let legs = wallet
            .create_order_oco(Side::Sell, "BTCUSDT", 1.0, 120.0, 90.0, 89.0)
            .unwrap();

        wallet.on_candle(&candle(1, 100.0, 125.0, 85.0));
        let limit = wallet.order("BTCUSDT", legs[0].exchange_id).unwrap();
        let stop = wallet.order("BTCUSDT", legs[1].exchange_id).unwrap();
        assert_eq!(limit.status, OrderStatus::Canceled);
        assert_eq!(stop.status, OrderStatus::Filled);
        assert_relative_eq!(balances(&wallet).1.free, 90.0);
    }

    #[test]
    fn test_cancel_oco_cancels_group() {
        let wallet = wallet(0.0).with_asset("BTC", 1.0);
        wallet.on_candle(&candle(0, 100.0, 100.0, 100.0));
        let legs = wallet
            .create_order_oco(Side::Sell, "BTCUSDT", 1.0, 120.0, 90.0, 89.0)
            .unwrap();

        wallet.cancel(&legs[1]).unwrap();
        assert!(wallet
            .orders()
            .iter()
            .all(|o| o.status == OrderStatus::Canceled));
        assert_eq!(balances(&wallet).0, Balance { asset: "BTC".to_string(), free: 1.0, lock: 0.0 });
    }

    #[test]
    fn test_stop_order_fires_on_low() {
        let wallet = wallet(0.0).with_asset("BTC", 2.0);
        wallet.on_candle(&candle(0, 100.0, 100.0, 100.0));
        let stop = wallet.create_order_stop("BTCUSDT", 2.0, 95.0).unwrap();

        wallet.on_candle(&candle(1, 97.0, 99.0, 96.0));
        assert_eq!(wallet.order("BTCUSDT", stop.exchange_id).unwrap().status, OrderStatus::New);

        wallet.on_candle(&candle(2, 94.0, 97.0, 93.0));
        assert_eq!(wallet.order("BTCUSDT", stop.exchange_id).unwrap().status, OrderStatus::Filled);
        assert_relative_eq!(balances(&wallet).1.free, 190.0);
    }

    #[test]
    fn test_unknown_pair_rejected() {
        let wallet = PaperWallet::new("USDT", Arc::new(PairTable::new())).with_asset("USDT", 100.0);
        assert!(matches!(
            wallet.create_order_limit(Side::Buy, "BTCUSDT", 1.0, 10.0),
            Err(Error::InvalidAsset(_))
        ));
    }

    #[test]
    fn test_equity_curve_values_long_and_short() {
        let pairs = PairTable::with_quote_fallback();
        let wallet = PaperWallet::new("USDT", Arc::new(pairs)).with_asset("USDT", 10_000.0);

        wallet.on_candle(&candle(0, 1000.0, 1000.0, 1000.0));
        wallet.create_order_market(Side::Buy, "BTCUSDT", 2.0).unwrap();
        let mut eth = candle(0, 100.0, 100.0, 100.0);
        eth.pair = "ETHUSDT".to_string();
        wallet.on_candle(&eth);
        wallet.create_order_market(Side::Sell, "ETHUSDT", 10.0).unwrap();

        // BTC long +200, ETH short +100
        wallet.on_candle(&candle(1, 1100.0, 1100.0, 1100.0));
        let mut eth = candle(1, 90.0, 90.0, 90.0);
        eth.pair = "ETHUSDT".to_string();
        wallet.on_candle(&eth);

        let equity = wallet.equity_values();
        assert_relative_eq!(equity.last().unwrap().value, 10_300.0);
        assert_relative_eq!(wallet.asset_values("ETH").last().unwrap().value, 1100.0);
        assert_relative_eq!(wallet.asset_values("BTC").last().unwrap().value, 2200.0);

        let summary = wallet.summary();
        assert_relative_eq!(summary.final_portfolio, 10_300.0);
        assert!(summary.to_string().contains("PAPER WALLET REPORT"));
    }

    #[test]
    fn test_incomplete_candles_do_not_sample_equity() {
        let wallet = wallet(100.0);
        let mut partial = candle(0, 100.0, 100.0, 100.0);
        partial.complete = false;
        wallet.on_candle(&partial);
        assert!(wallet.equity_values().is_empty());
    }

    #[test]
    fn test_max_drawdown_known_series() {
        let cases: [(&[f64], f64, i64, i64); 4] = [
            (&[10.0, 5.0], -0.5, 0, 1),
            (&[1.0, 10.0, 5.0], -0.5, 1, 2),
            (&[4.0, 5.0, 4.0, 3.0, 4.0, 5.0, 6.0, 7.0, 6.0], -0.4, 1, 3),
            (&[1.0, 5.0, 4.0, 7.0, 8.0, 4.0, 5.0, 2.0, 3.0], -0.75, 4, 7),
        ];

        for (series, expected, start, end) in cases {
            let dd = max_drawdown_of(&values(series)).unwrap();
            assert_relative_eq!(dd.value, expected);
            assert_eq!(dd.start, at(start), "{:?}", series);
            assert_eq!(dd.end, at(end), "{:?}", series);
        }
    }

    #[test]
    fn test_max_drawdown_none_for_rising_or_short_series() {
        assert!(max_drawdown_of(&values(&[1.0])).is_none());
        assert!(max_drawdown_of(&values(&[1.0, 2.0, 3.0])).is_none());
    }
}
