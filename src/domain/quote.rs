//! Bid/ask quotes for outcome assets.

use crate::domain::{AssetSymbol, Decimal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sell-side (`bid`) and buy-side (`ask`) price of one asset in cash units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: Decimal,
    pub ask: Decimal,
}

impl Quote {
    pub fn new(bid: Decimal, ask: Decimal) -> Self {
        Self { bid, ask }
    }

    pub fn price(&self, side: QuoteSide) -> Decimal {
        match side {
            QuoteSide::Bid => self.bid,
            QuoteSide::Ask => self.ask,
        }
    }
}

/// Which side of the book a valuation uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuoteSide {
    /// Liquidation value.
    Bid,
    /// Re-acquisition cost.
    Ask,
}

impl std::fmt::Display for QuoteSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuoteSide::Bid => write!(f, "bid"),
            QuoteSide::Ask => write!(f, "ask"),
        }
    }
}

/// Quotes read for a single job. Never reused across jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuoteBook(BTreeMap<AssetSymbol, Quote>);

impl QuoteBook {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, asset: &str, bid: Decimal, ask: Decimal) -> Self {
        self.0.insert(AssetSymbol::new(asset), Quote::new(bid, ask));
        self
    }

    pub fn insert(&mut self, asset: AssetSymbol, quote: Quote) {
        self.0.insert(asset, quote);
    }

    pub fn get(&self, asset: &AssetSymbol) -> Option<&Quote> {
        self.0.get(asset)
    }

    pub fn price(&self, asset: &AssetSymbol, side: QuoteSide) -> Option<Decimal> {
        self.0.get(asset).map(|q| q.price(side))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(AssetSymbol, Quote)> for QuoteBook {
    fn from_iter<I: IntoIterator<Item = (AssetSymbol, Quote)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
