use std::fmt;

use crate::models::{Side, TradeResult};

/// Closed-trade statistics of one pair
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub pair: String,
    pub quote: String,

    pub win_long: Vec<f64>,
    pub win_long_percent: Vec<f64>,
    pub win_short: Vec<f64>,
    pub win_short_percent: Vec<f64>,

    pub lose_long: Vec<f64>,
    pub lose_long_percent: Vec<f64>,
    pub lose_short: Vec<f64>,
    pub lose_short_percent: Vec<f64>,

    /// Filled order value in quote currency
    pub volume: f64,
}

impl Summary {
    pub fn new(pair: &str, quote: &str) -> Self {
        Self {
            pair: pair.to_string(),
            quote: quote.to_string(),
            ..Default::default()
        }
    }

    /// Book a realized result in the win or lose bucket of its side
    pub fn record(&mut self, result: &TradeResult) {
        let (values, percents) = match (result.profit_percent > 0.0, result.side) {
            (true, Side::Buy) => (&mut self.win_long, &mut self.win_long_percent),
            (true, Side::Sell) => (&mut self.win_short, &mut self.win_short_percent),
            (false, Side::Buy) => (&mut self.lose_long, &mut self.lose_long_percent),
            (false, Side::Sell) => (&mut self.lose_short, &mut self.lose_short_percent),
        };
        values.push(result.profit_value);
        percents.push(result.profit_percent);
    }

    pub fn win(&self) -> Vec<f64> {
        self.win_long.iter().chain(&self.win_short).copied().collect()
    }

    pub fn win_percent(&self) -> Vec<f64> {
        self.win_long_percent
            .iter()
            .chain(&self.win_short_percent)
            .copied()
            .collect()
    }

    pub fn lose(&self) -> Vec<f64> {
        self.lose_long.iter().chain(&self.lose_short).copied().collect()
    }

    pub fn lose_percent(&self) -> Vec<f64> {
        self.lose_long_percent
            .iter()
            .chain(&self.lose_short_percent)
            .copied()
            .collect()
    }

    pub fn trades(&self) -> usize {
        self.win().len() + self.lose().len()
    }

    pub fn profit(&self) -> f64 {
        self.win().iter().chain(self.lose().iter()).sum()
    }

    /// System quality number: sqrt(n) x mean / stddev of trade profits
    pub fn sqn(&self) -> f64 {
        let profits: Vec<f64> = self.win().into_iter().chain(self.lose()).collect();
        let total = profits.len() as f64;
        if profits.is_empty() {
            return 0.0;
        }

        let mean = self.profit() / total;
        let variance = profits.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / total;
        let std_dev = variance.sqrt();
        if std_dev == 0.0 {
            return 0.0;
        }
        total.sqrt() * mean / std_dev
    }

    /// Average win over the absolute average loss
    pub fn payoff(&self) -> f64 {
        let (win, lose) = (self.win(), self.lose());
        let lose_sum: f64 = lose.iter().sum();
        if win.is_empty() || lose.is_empty() || lose_sum == 0.0 {
            return 0.0;
        }

        let avg_win = win.iter().sum::<f64>() / win.len() as f64;
        avg_win / (lose_sum / lose.len() as f64).abs()
    }

    /// Gross wins over gross losses, 10 when nothing was lost
    pub fn profit_factor(&self) -> f64 {
        let lose_sum: f64 = self.lose().iter().sum();
        if lose_sum == 0.0 {
            return 10.0;
        }
        self.win().iter().sum::<f64>() / lose_sum.abs()
    }

    pub fn win_percentage(&self) -> f64 {
        let trades = self.trades();
        if trades == 0 {
            return 0.0;
        }
        self.win().len() as f64 / trades as f64 * 100.0
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = [
            ("Coin", self.pair.clone()),
            ("Trades", self.trades().to_string()),
            ("Win", self.win().len().to_string()),
            ("Loss", self.lose().len().to_string()),
            ("% Win", format!("{:.1}", self.win_percentage())),
            ("Payoff", format!("{:.1}", self.payoff() * 100.0)),
            ("Pr.Fact", format!("{:.1}", self.profit_factor())),
            ("SQN", format!("{:.1}", self.sqn())),
            ("Profit", format!("{:.4} {}", self.profit(), self.quote)),
            ("Volume", format!("{:.4} {}", self.volume, self.quote)),
        ];

        let width = rows.iter().map(|(_, v)| v.len()).max().unwrap_or(0);
        writeln!(f, "┌─────────┬─{}─┐", "─".repeat(width))?;
        for (label, value) in &rows {
            writeln!(f, "│ {:<7} │ {:>width$} │", label, value, width = width)?;
        }
        write!(f, "└─────────┴─{}─┘", "─".repeat(width))
    }
}
