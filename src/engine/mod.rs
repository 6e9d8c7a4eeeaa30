//! Settlement engine: share pricing, redemption liquidation and position
//! adjustment for a pooled fund.

use crate::domain::AssetSymbol;

pub mod accounting;
pub mod locks;
pub mod retry;
pub mod settlement;

pub use accounting::{AccountingError, FeeSplit, LiquidationPlan, Sale, TradeFill};
pub use locks::{PoolGuard, PoolLocks};
pub use retry::{RetryError, RetryPolicy};
pub use settlement::{
    DepositOutcome, JobOutcome, RecommendOutcome, SettlementEngine, SettlementError,
    TradeOutcome, TradeSide, WithdrawOutcome,
};

/// Which share supply a redemption fraction is measured against.
///
/// The ledger escrows redeemed shares without burning them, so the supply
/// read before a withdrawal already includes them. `Outstanding` divides by
/// that supply. `OutstandingPlusRedeemed` adds the redeemed shares on top,
/// for ledgers that burn on request instead of on fulfillment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RedemptionBasis {
    #[default]
    Outstanding,
    OutstandingPlusRedeemed,
}

/// Whether a buy may take the cash holding below zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CashPolicy {
    /// Reject buys that cost more than the cash on hand.
    #[default]
    RequireCovered,
    /// Commit buys regardless; cash may go negative (margin).
    AllowNegative,
}

/// Decimal places per asset class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scales {
    pub cash: u32,
    pub native: u32,
    pub shares: u32,
    pub outcome: u32,
}

impl Default for Scales {
    fn default() -> Self {
        Self {
            cash: 2,
            native: 24,
            shares: 24,
            outcome: 6,
        }
    }
}

/// Fee, rounding and risk policy applied by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementPolicy {
    pub cash_symbol: AssetSymbol,
    pub native_symbol: AssetSymbol,
    /// Operational fee taken from the native amount before conversion.
    pub deposit_fee_bps: u32,
    /// Operational fee taken from the native amount after conversion.
    pub withdraw_fee_bps: u32,
    pub scales: Scales,
    pub redemption_basis: RedemptionBasis,
    pub cash_policy: CashPolicy,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            cash_symbol: AssetSymbol::new("USDC"),
            native_symbol: AssetSymbol::new("NEAR"),
            deposit_fee_bps: 100,
            withdraw_fee_bps: 200,
            scales: Scales::default(),
            redemption_basis: RedemptionBasis::default(),
            cash_policy: CashPolicy::default(),
        }
    }
}

impl SettlementPolicy {
    /// Policy with both operational fees set to zero.
    pub fn fee_free() -> Self {
        Self {
            deposit_fee_bps: 0,
            withdraw_fee_bps: 0,
            ..Self::default()
        }
    }

    pub fn is_cash(&self, asset: &AssetSymbol) -> bool {
        asset == &self.cash_symbol
    }

    /// Outcome positions: everything that is neither cash nor the native currency.
    pub fn is_outcome(&self, asset: &AssetSymbol) -> bool {
        asset != &self.cash_symbol && asset != &self.native_symbol
    }
}
