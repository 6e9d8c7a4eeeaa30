//! Pool holdings: per-asset amount and informational cost basis.

use crate::domain::{AssetSymbol, Decimal, PoolName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A pool's position in one asset.
///
/// `cost_basis` is the average price paid per unit, kept for profit display
/// only. Settlement math never reads it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub amount: Decimal,
    #[serde(default)]
    pub cost_basis: Decimal,
}

impl Holding {
    pub fn new(amount: Decimal, cost_basis: Decimal) -> Self {
        Self { amount, cost_basis }
    }

    pub fn with_amount(amount: Decimal) -> Self {
        Self {
            amount,
            cost_basis: Decimal::zero(),
        }
    }
}

/// Asset symbol to holding, ordered by symbol so that iteration and the
/// persisted JSON are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Holdings(BTreeMap<AssetSymbol, Holding>);

impl Holdings {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn with(mut self, asset: &str, amount: Decimal) -> Self {
        self.0
            .insert(AssetSymbol::new(asset), Holding::with_amount(amount));
        self
    }

    pub fn get(&self, asset: &AssetSymbol) -> Option<&Holding> {
        self.0.get(asset)
    }

    /// Amount held of `asset`, zero if absent.
    pub fn amount(&self, asset: &AssetSymbol) -> Decimal {
        self.0.get(asset).map(|h| h.amount).unwrap_or_default()
    }

    pub fn insert(&mut self, asset: AssetSymbol, holding: Holding) {
        self.0.insert(asset, holding);
    }

    /// Add `delta` to the asset's amount, creating the entry if needed.
    /// A provided `cost_basis` replaces the stored one.
    pub fn add(&mut self, asset: &AssetSymbol, delta: Decimal, cost_basis: Option<Decimal>) {
        let entry = self.0.entry(asset.clone()).or_default();
        entry.amount += delta;
        if let Some(basis) = cost_basis {
            entry.cost_basis = basis;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&AssetSymbol, &Holding)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Symbols with a non-zero amount.
    pub fn held_assets(&self) -> Vec<AssetSymbol> {
        self.0
            .iter()
            .filter(|(_, h)| !h.amount.is_zero())
            .map(|(s, _)| s.clone())
            .collect()
    }
}

impl FromIterator<(AssetSymbol, Holding)> for Holdings {
    fn from_iter<I: IntoIterator<Item = (AssetSymbol, Holding)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A pool and its current holdings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub name: PoolName,
    #[serde(default)]
    pub holdings: Holdings,
}

impl Pool {
    pub fn new(name: PoolName, holdings: Holdings) -> Self {
        Self { name, holdings }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_add_creates_and_accumulates() {
        let usdc = AssetSymbol::new("USDC");
        let mut holdings = Holdings::new();
        holdings.add(&usdc, d("10"), None);
        holdings.add(&usdc, d("2.5"), None);
        assert_eq!(holdings.amount(&usdc), d("12.5"));
        assert_eq!(holdings.amount(&AssetSymbol::new("Yes")), Decimal::zero());
    }

    #[test]
    fn test_add_replaces_cost_basis_when_given() {
        let yes = AssetSymbol::new("Yes");
        let mut holdings = Holdings::new();
        holdings.add(&yes, d("100"), Some(d("0.6")));
        holdings.add(&yes, d("-50"), None);
        let holding = holdings.get(&yes).unwrap();
        assert_eq!(holding.amount, d("50"));
        assert_eq!(holding.cost_basis, d("0.6"));
    }

    #[test]
    fn test_json_shape() {
        let holdings = Holdings::new().with("USDC", d("500")).with("Yes", d("100"));
        let json = serde_json::to_value(&holdings).unwrap();
        assert_eq!(json["USDC"]["amount"], "500");
        assert_eq!(json["Yes"]["cost_basis"], "0");

        let back: Holdings = serde_json::from_value(serde_json::json!({
            "USDC": {"amount": "500"}
        }))
        .unwrap();
        assert_eq!(back.amount(&AssetSymbol::new("USDC")), d("500"));
    }

    #[test]
    fn test_held_assets_skips_zero() {
        let holdings = Holdings::new().with("USDC", d("1")).with("No", Decimal::zero());
        assert_eq!(holdings.held_assets(), vec![AssetSymbol::new("USDC")]);
    }
}
