use std::collections::HashMap;

use crate::error::Error;
use crate::Result;

/// Quote assets recognised when a pair is not registered explicitly, longest first
const KNOWN_QUOTES: &[&str] = &[
    "FDUSD", "USDT", "BUSD", "USDC", "TUSD", "BTC", "ETH", "BNB", "EUR", "BRL",
];

/// Pair symbol lookup: `BTCUSDT` -> (`BTC`, `USDT`)
///
/// Built once at startup and shared by the wallet, controller and notifier.
#[derive(Debug, Clone, Default)]
pub struct PairTable {
    pairs: HashMap<String, (String, String)>,
    suffix_fallback: bool,
}

impl PairTable {
    /// Table that only resolves registered pairs
    pub fn new() -> Self {
        Self {
            pairs: HashMap::new(),
            suffix_fallback: false,
        }
    }

    /// Table that also splits unregistered pairs on a known quote suffix
    pub fn with_quote_fallback() -> Self {
        Self {
            pairs: HashMap::new(),
            suffix_fallback: true,
        }
    }

    pub fn register(mut self, pair: &str, asset: &str, quote: &str) -> Self {
        self.insert(pair, asset, quote);
        self
    }

    pub fn insert(&mut self, pair: &str, asset: &str, quote: &str) {
        self.pairs.insert(
            pair.to_uppercase(),
            (asset.to_uppercase(), quote.to_uppercase()),
        );
    }

    /// Split a pair into (asset, quote)
    pub fn split(&self, pair: &str) -> Result<(String, String)> {
        let pair = pair.to_uppercase();
        if let Some((asset, quote)) = self.pairs.get(&pair) {
            return Ok((asset.clone(), quote.clone()));
        }

        if self.suffix_fallback {
            for quote in KNOWN_QUOTES {
                if let Some(asset) = pair.strip_suffix(quote) {
                    if !asset.is_empty() {
                        return Ok((asset.to_string(), quote.to_string()));
                    }
                }
            }
        }

        Err(Error::InvalidAsset(pair))
    }

    /// Pair symbol trading `asset` against `quote`
    pub fn pair_for(&self, asset: &str, quote: &str) -> String {
        let (asset, quote) = (asset.to_uppercase(), quote.to_uppercase());
        self.pairs
            .iter()
            .find(|(_, (a, q))| *a == asset && *q == quote)
            .map(|(pair, _)| pair.clone())
            .unwrap_or_else(|| format!("{}{}", asset, quote))
    }
}
