//! Pure accounting for share pricing, redemption and trades.
//!
//! Nothing here performs I/O. The settlement engine gathers holdings, quotes
//! and share supply, then calls into these functions for every number it
//! persists or sends to the ledger.

use super::{CashPolicy, RedemptionBasis, SettlementPolicy};
use crate::domain::{AssetSymbol, Decimal, Holdings, QuoteBook, QuoteSide};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountingError {
    #[error("no {side} quote for held asset {asset}")]
    MissingQuote { asset: AssetSymbol, side: QuoteSide },
    #[error("pool value is {pool_value} with {shares} shares outstanding; cannot price shares")]
    UnpriceableShares { pool_value: Decimal, shares: Decimal },
    #[error("no shares outstanding")]
    NoSharesOutstanding,
    #[error("redeeming {redeemed} shares exceeds outstanding supply {outstanding}")]
    RedemptionExceedsSupply {
        redeemed: Decimal,
        outstanding: Decimal,
    },
    #[error("cannot sell {requested} {asset}: only {held} held")]
    InsufficientHolding {
        asset: AssetSymbol,
        held: Decimal,
        requested: Decimal,
    },
    #[error("buy costs {required} but only {available} cash is available")]
    InsufficientCash {
        available: Decimal,
        required: Decimal,
    },
    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: Decimal },
    #[error("{asset} is not a tradable outcome asset")]
    NotTradable { asset: AssetSymbol },
    #[error("{operation} overflows the decimal range")]
    Overflow { operation: &'static str },
}

fn checked_mul(
    a: Decimal,
    b: Decimal,
    operation: &'static str,
) -> Result<Decimal, AccountingError> {
    a.checked_mul(b).ok_or(AccountingError::Overflow { operation })
}

fn checked_add(
    a: Decimal,
    b: Decimal,
    operation: &'static str,
) -> Result<Decimal, AccountingError> {
    a.checked_add(b).ok_or(AccountingError::Overflow { operation })
}

/// Amount split into what remains after a fee and the fee itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeSplit {
    pub net: Decimal,
    pub fee: Decimal,
}

/// Take `bps` off `amount`, truncating the net to `scale`. Rounding dust
/// goes to the fee.
pub fn split_fee(amount: Decimal, bps: u32, scale: u32) -> FeeSplit {
    let net = (amount - amount * Decimal::from_bps(bps)).truncate_to(scale);
    FeeSplit {
        net,
        fee: amount - net,
    }
}

/// Cash plus every other holding marked at the given side of its quote.
///
/// Zero holdings need no quote. Any other non-cash holding without one is an
/// error rather than being silently valued at zero.
pub fn portfolio_value(
    holdings: &Holdings,
    quotes: &QuoteBook,
    side: QuoteSide,
    policy: &SettlementPolicy,
) -> Result<Decimal, AccountingError> {
    let mut total = Decimal::zero();
    for (asset, holding) in holdings.iter() {
        if policy.is_cash(asset) {
            total = checked_add(total, holding.amount, "portfolio value")?;
            continue;
        }
        if holding.amount.is_zero() {
            continue;
        }
        let price = quotes
            .price(asset, side)
            .ok_or_else(|| AccountingError::MissingQuote {
                asset: asset.clone(),
                side,
            })?;
        let worth = checked_mul(holding.amount, price, "portfolio value")?;
        total = checked_add(total, worth, "portfolio value")?;
    }
    Ok(total)
}

/// Value of one share. Exactly 1 cash unit while no shares exist.
pub fn value_per_share(pool_value: Decimal, shares: Decimal) -> Result<Decimal, AccountingError> {
    if shares.is_zero() {
        return Ok(Decimal::one());
    }
    let vps = pool_value
        .checked_div(shares)
        .ok_or(AccountingError::NoSharesOutstanding)?;
    if !vps.is_positive() || shares.is_negative() {
        return Err(AccountingError::UnpriceableShares { pool_value, shares });
    }
    Ok(vps)
}

/// Shares bought by `cash` at `value_per_share`, truncated to `share_scale`.
pub fn shares_to_mint(
    cash: Decimal,
    value_per_share: Decimal,
    share_scale: u32,
) -> Result<Decimal, AccountingError> {
    if !value_per_share.is_positive() {
        return Err(AccountingError::NonPositive {
            field: "value_per_share",
            value: value_per_share,
        });
    }
    let shares = cash
        .checked_div(value_per_share)
        .ok_or(AccountingError::Overflow {
            operation: "share mint",
        })?;
    Ok(shares.truncate_to(share_scale))
}

/// Fraction of the pool a redemption of `redeemed` shares is entitled to.
pub fn redemption_fraction(
    redeemed: Decimal,
    outstanding: Decimal,
    basis: RedemptionBasis,
) -> Result<Decimal, AccountingError> {
    if !redeemed.is_positive() {
        return Err(AccountingError::NonPositive {
            field: "shares",
            value: redeemed,
        });
    }
    let denominator = match basis {
        RedemptionBasis::Outstanding => {
            if !outstanding.is_positive() {
                return Err(AccountingError::NoSharesOutstanding);
            }
            if redeemed > outstanding {
                return Err(AccountingError::RedemptionExceedsSupply {
                    redeemed,
                    outstanding,
                });
            }
            outstanding
        }
        RedemptionBasis::OutstandingPlusRedeemed => {
            if outstanding.is_negative() {
                return Err(AccountingError::NoSharesOutstanding);
            }
            checked_add(outstanding, redeemed, "redemption basis")?
        }
    };
    Ok(redeemed / denominator)
}

/// One asset sold during a proportional liquidation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sale {
    pub asset: AssetSymbol,
    pub quantity: Decimal,
    pub bid: Decimal,
    pub proceeds: Decimal,
    /// The computed quantity exceeded the holding and was cut to it.
    pub clamped: bool,
}

/// Everything a withdrawal needs to know about raising its cash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LiquidationPlan {
    /// Pool value at bid, before liquidation.
    pub total_value: Decimal,
    pub target_cash: Decimal,
    pub shortfall: Decimal,
    pub sales: Vec<Sale>,
    /// Added to the cash holding by the liquidation.
    pub cash_credited: Decimal,
    /// Cash that leaves the pool. Equals `target_cash` unless the pool could
    /// not raise enough.
    pub payout: Decimal,
    pub warnings: Vec<String>,
    /// Holdings after sales and credit, before the payout is removed.
    pub resulting_holdings: Holdings,
}

impl LiquidationPlan {
    pub fn liquidated(&self) -> bool {
        !self.sales.is_empty()
    }

    /// Holdings once the payout has left the pool.
    pub fn holdings_after_payout(&self, cash_symbol: &AssetSymbol) -> Holdings {
        let mut holdings = self.resulting_holdings.clone();
        holdings.add(cash_symbol, -self.payout, None);
        holdings
    }
}

/// Plan the sales that raise `fraction` of the pool's bid value in cash.
///
/// Existing cash is used first. Any shortfall is spread over outcome
/// holdings in proportion to their bid value, so no single asset is
/// favored. Sale quantities round up to the asset scale and are clamped to
/// the holding; a clamp is reported as a warning and the payout is capped at
/// the cash actually available.
pub fn plan_liquidation(
    holdings: &Holdings,
    quotes: &QuoteBook,
    fraction: Decimal,
    policy: &SettlementPolicy,
) -> Result<LiquidationPlan, AccountingError> {
    let scales = policy.scales;
    let cash_symbol = &policy.cash_symbol;
    let total_value = portfolio_value(holdings, quotes, QuoteSide::Bid, policy)?;
    let target_cash =
        checked_mul(fraction, total_value, "target cash")?.truncate_to(scales.cash);
    let cash = holdings.amount(cash_symbol);

    let mut resulting = holdings.clone();
    let mut warnings = Vec::new();

    if cash >= target_cash {
        return Ok(LiquidationPlan {
            total_value,
            target_cash,
            shortfall: Decimal::zero(),
            sales: Vec::new(),
            cash_credited: Decimal::zero(),
            payout: target_cash,
            warnings,
            resulting_holdings: resulting,
        });
    }

    let shortfall = target_cash - cash;

    let mut candidates = Vec::new();
    for (asset, holding) in holdings.iter() {
        if !policy.is_outcome(asset) || !holding.amount.is_positive() {
            continue;
        }
        let bid = quotes
            .price(asset, QuoteSide::Bid)
            .ok_or_else(|| AccountingError::MissingQuote {
                asset: asset.clone(),
                side: QuoteSide::Bid,
            })?;
        let worth = checked_mul(holding.amount, bid, "liquidation worth")?;
        if worth.is_positive() {
            candidates.push((asset.clone(), holding.amount, bid, worth));
        }
    }
    let mut total_worth = Decimal::zero();
    for (_, _, _, worth) in &candidates {
        total_worth = checked_add(total_worth, *worth, "liquidation worth")?;
    }

    let mut sales = Vec::with_capacity(candidates.len());
    if total_worth.is_positive() {
        for (asset, held, bid, worth) in candidates {
            let contribution =
                checked_mul(shortfall, worth, "liquidation share")? / total_worth;
            let mut quantity = contribution
                .checked_div(bid)
                .ok_or(AccountingError::Overflow {
                    operation: "liquidation quantity",
                })?
                .round_up_to(scales.outcome);
            let clamped = quantity > held;
            if clamped {
                warnings.push(format!(
                    "{}: needed {} but only {} held; sold entire holding",
                    asset, quantity, held
                ));
                quantity = held;
            }
            resulting.add(&asset, -quantity, None);
            sales.push(Sale {
                proceeds: checked_mul(quantity, bid, "sale proceeds")?,
                asset,
                quantity,
                bid,
                clamped,
            });
        }
    } else {
        warnings.push(format!(
            "shortfall of {} but no outcome holdings with a positive bid",
            shortfall
        ));
    }

    let mut proceeds = Decimal::zero();
    for sale in &sales {
        proceeds = checked_add(proceeds, sale.proceeds, "sale proceeds")?;
    }
    let short_raised = sales.is_empty() || sales.iter().any(|s| s.clamped);
    let cash_credited = if short_raised {
        proceeds.truncate_to(scales.cash).min(shortfall)
    } else {
        shortfall
    };
    resulting.add(cash_symbol, cash_credited, None);
    let payout = target_cash.min(checked_add(cash, cash_credited, "payout")?);
    if payout < target_cash {
        warnings.push(format!(
            "payout capped at {} of target {}",
            payout, target_cash
        ));
    }

    Ok(LiquidationPlan {
        total_value,
        target_cash,
        shortfall,
        sales,
        cash_credited,
        payout,
        warnings,
        resulting_holdings: resulting,
    })
}

/// Effect of a single buy or sell on the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradeFill {
    pub asset: AssetSymbol,
    pub quantity: Decimal,
    pub price: Decimal,
    /// Signed change to the outcome holding.
    pub asset_delta: Decimal,
    /// Signed change to the cash holding.
    pub cash_delta: Decimal,
    /// New cost basis for the outcome holding, when it changes.
    pub cost_basis: Option<Decimal>,
}

/// Only outcome positions are traded; cash and native are settlement assets.
fn require_tradable(
    asset: &AssetSymbol,
    policy: &SettlementPolicy,
) -> Result<(), AccountingError> {
    if policy.is_outcome(asset) {
        Ok(())
    } else {
        Err(AccountingError::NotTradable {
            asset: asset.clone(),
        })
    }
}

/// Buy `quantity` of `asset` at its ask.
///
/// Cost rounds up to the cash scale. Under `RequireCovered` the buy is
/// rejected if it would take cash below zero.
pub fn plan_buy(
    holdings: &Holdings,
    asset: &AssetSymbol,
    quantity: Decimal,
    quotes: &QuoteBook,
    policy: &SettlementPolicy,
) -> Result<TradeFill, AccountingError> {
    require_tradable(asset, policy)?;
    if !quantity.is_positive() {
        return Err(AccountingError::NonPositive {
            field: "quantity",
            value: quantity,
        });
    }
    let ask = quotes
        .price(asset, QuoteSide::Ask)
        .ok_or_else(|| AccountingError::MissingQuote {
            asset: asset.clone(),
            side: QuoteSide::Ask,
        })?;
    let gross = checked_mul(quantity, ask, "buy cost")?;
    let cost = gross.round_up_to(policy.scales.cash);
    let available = holdings.amount(&policy.cash_symbol);
    if policy.cash_policy == CashPolicy::RequireCovered && cost > available {
        return Err(AccountingError::InsufficientCash {
            available,
            required: cost,
        });
    }

    let (held, basis) = holdings
        .get(asset)
        .map(|h| (h.amount, h.cost_basis))
        .unwrap_or_default();
    let new_amount = checked_add(held, quantity, "position size")?;
    let held_cost = checked_mul(held, basis, "cost basis")?;
    let new_basis = checked_add(held_cost, gross, "cost basis")? / new_amount;

    Ok(TradeFill {
        asset: asset.clone(),
        quantity,
        price: ask,
        asset_delta: quantity,
        cash_delta: -cost,
        cost_basis: Some(new_basis),
    })
}

/// Sell `quantity` of `asset` at its bid. Proceeds truncate to the cash scale.
pub fn plan_sell(
    holdings: &Holdings,
    asset: &AssetSymbol,
    quantity: Decimal,
    quotes: &QuoteBook,
    policy: &SettlementPolicy,
) -> Result<TradeFill, AccountingError> {
    require_tradable(asset, policy)?;
    if !quantity.is_positive() {
        return Err(AccountingError::NonPositive {
            field: "quantity",
            value: quantity,
        });
    }
    let held = holdings.amount(asset);
    if quantity > held {
        return Err(AccountingError::InsufficientHolding {
            asset: asset.clone(),
            held,
            requested: quantity,
        });
    }
    let bid = quotes
        .price(asset, QuoteSide::Bid)
        .ok_or_else(|| AccountingError::MissingQuote {
            asset: asset.clone(),
            side: QuoteSide::Bid,
        })?;
    let proceeds =
        checked_mul(quantity, bid, "sell proceeds")?.truncate_to(policy.scales.cash);
    let cost_basis = if quantity == held {
        Some(Decimal::zero())
    } else {
        None
    };

    Ok(TradeFill {
        asset: asset.clone(),
        quantity,
        price: bid,
        asset_delta: -quantity,
        cash_delta: proceeds,
        cost_basis,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn sym(s: &str) -> AssetSymbol {
        AssetSymbol::new(s)
    }

    fn policy() -> SettlementPolicy {
        SettlementPolicy::default()
    }

    #[test]
    fn split_fee_truncates_net() {
        let split = split_fee(d("100"), 100, 24);
        assert_eq!(split.net, d("99"));
        assert_eq!(split.fee, d("1"));

        let split = split_fee(d("10.999"), 200, 0);
        assert_eq!(split.net, d("10"));
        assert_eq!(split.fee, d("0.999"));
    }

    #[test]
    fn portfolio_value_uses_requested_side() {
        let holdings = Holdings::new().with("USDC", d("500")).with("Yes", d("100"));
        let quotes = QuoteBook::new().with("Yes", d("0.6"), d("0.65"));
        let p = policy();
        assert_eq!(
            portfolio_value(&holdings, &quotes, QuoteSide::Bid, &p).unwrap(),
            d("560")
        );
        assert_eq!(
            portfolio_value(&holdings, &quotes, QuoteSide::Ask, &p).unwrap(),
            d("565")
        );
    }

    #[test]
    fn portfolio_value_requires_quotes_for_nonzero_holdings() {
        let holdings = Holdings::new()
            .with("USDC", d("1"))
            .with("Yes", d("5"))
            .with("No", Decimal::zero());
        let err = portfolio_value(&holdings, &QuoteBook::new(), QuoteSide::Bid, &policy())
            .unwrap_err();
        assert_eq!(
            err,
            AccountingError::MissingQuote {
                asset: sym("Yes"),
                side: QuoteSide::Bid
            }
        );
    }

    #[test]
    fn bootstrap_value_per_share_is_one() {
        assert_eq!(value_per_share(d("0"), d("0")).unwrap(), d("1"));
        assert_eq!(value_per_share(d("1234"), d("0")).unwrap(), d("1"));
    }

    #[test]
    fn value_per_share_with_supply() {
        assert_eq!(value_per_share(d("1000"), d("1000")).unwrap(), d("1"));
        assert_eq!(value_per_share(d("1500"), d("1000")).unwrap(), d("1.5"));
        assert!(matches!(
            value_per_share(d("0"), d("10")),
            Err(AccountingError::UnpriceableShares { .. })
        ));
    }

    #[test]
    fn shares_to_mint_truncates() {
        assert_eq!(shares_to_mint(d("50"), d("1"), 24).unwrap(), d("50"));
        assert_eq!(shares_to_mint(d("10"), d("3"), 2).unwrap(), d("3.33"));
    }

    #[test]
    fn redemption_fraction_bases() {
        assert_eq!(
            redemption_fraction(d("10"), d("100"), RedemptionBasis::Outstanding).unwrap(),
            d("0.1")
        );
        assert_eq!(
            redemption_fraction(d("25"), d("75"), RedemptionBasis::OutstandingPlusRedeemed)
                .unwrap(),
            d("0.25")
        );
        assert!(matches!(
            redemption_fraction(d("101"), d("100"), RedemptionBasis::Outstanding),
            Err(AccountingError::RedemptionExceedsSupply { .. })
        ));
        assert_eq!(
            redemption_fraction(d("1"), d("0"), RedemptionBasis::Outstanding),
            Err(AccountingError::NoSharesOutstanding)
        );
    }

    #[test]
    fn small_redemption_uses_cash_only() {
        let holdings = Holdings::new().with("USDC", d("500")).with("Yes", d("100"));
        let quotes = QuoteBook::new().with("Yes", d("0.6"), d("0.62"));

        let plan = plan_liquidation(&holdings, &quotes, d("0.1"), &policy()).unwrap();
        assert_eq!(plan.total_value, d("560"));
        assert_eq!(plan.target_cash, d("56"));
        assert_eq!(plan.shortfall, Decimal::zero());
        assert!(!plan.liquidated());
        assert_eq!(plan.resulting_holdings, holdings);
    }

    #[test]
    fn large_redemption_covered_by_cash_does_not_liquidate() {
        let holdings = Holdings::new().with("USDC", d("500")).with("Yes", d("100"));
        let quotes = QuoteBook::new().with("Yes", d("0.6"), d("0.62"));

        let plan = plan_liquidation(&holdings, &quotes, d("0.5"), &policy()).unwrap();
        assert_eq!(plan.target_cash, d("280"));
        assert_eq!(plan.shortfall, Decimal::zero());
        assert!(plan.sales.is_empty());
        assert_eq!(plan.payout, d("280"));
        let after = plan.holdings_after_payout(&sym("USDC"));
        assert_eq!(after.amount(&sym("USDC")), d("220"));
        assert_eq!(after.amount(&sym("Yes")), d("100"));
    }

    #[test]
    fn shortfall_is_spread_proportionally() {
        // Cash 100, Yes worth 300 at bid, No worth 100 at bid: total 500.
        let holdings = Holdings::new()
            .with("USDC", d("100"))
            .with("Yes", d("500"))
            .with("No", d("250"));
        let quotes = QuoteBook::new()
            .with("Yes", d("0.6"), d("0.61"))
            .with("No", d("0.4"), d("0.42"));

        let plan = plan_liquidation(&holdings, &quotes, d("0.5"), &policy()).unwrap();
        assert_eq!(plan.total_value, d("500"));
        assert_eq!(plan.target_cash, d("250"));
        assert_eq!(plan.shortfall, d("150"));

        // Yes holds 3/4 of outcome value, No 1/4.
        let yes = plan.sales.iter().find(|s| s.asset == sym("Yes")).unwrap();
        let no = plan.sales.iter().find(|s| s.asset == sym("No")).unwrap();
        assert_eq!(yes.quantity, d("187.5"));
        assert_eq!(no.quantity, d("93.75"));

        let liquidated: Decimal = plan.sales.iter().map(|s| s.proceeds).sum();
        assert!((liquidated - plan.shortfall).abs() <= d("0.000002"));

        assert_eq!(plan.cash_credited, d("150"));
        assert_eq!(plan.payout, d("250"));
        let after = plan.holdings_after_payout(&sym("USDC"));
        assert_eq!(after.amount(&sym("USDC")), Decimal::zero());
        assert_eq!(after.amount(&sym("Yes")), d("312.5"));
        assert_eq!(after.amount(&sym("No")), d("156.25"));
    }

    #[test]
    fn liquidation_skips_native_and_never_goes_negative() {
        let holdings = Holdings::new()
            .with("USDC", Decimal::zero())
            .with("NEAR", d("10"))
            .with("Yes", d("3"));
        let quotes = QuoteBook::new()
            .with("NEAR", d("5"), d("5"))
            .with("Yes", d("0.333333"), d("0.34"));

        let plan = plan_liquidation(&holdings, &quotes, d("1"), &policy()).unwrap();
        assert!(plan.sales.iter().all(|s| s.asset != sym("NEAR")));
        for (_, holding) in plan.resulting_holdings.iter() {
            assert!(!holding.amount.is_negative());
        }
        assert!(plan.sales[0].clamped);
        assert!(!plan.warnings.is_empty());
        assert_eq!(plan.target_cash, d("50.99"));
        assert_eq!(plan.cash_credited, d("0.99"));
        assert_eq!(plan.payout, d("0.99"));
        let after = plan.holdings_after_payout(&sym("USDC"));
        assert_eq!(after.amount(&sym("USDC")), Decimal::zero());
        assert_eq!(after.amount(&sym("Yes")), Decimal::zero());
    }

    #[test]
    fn clamped_and_unclamped_sales_settle_consistently() {
        // No is held below the outcome scale, so its rounded-up share clamps
        // while Yes sells exactly its proportional slice.
        let holdings = Holdings::new()
            .with("USDC", Decimal::zero())
            .with("Yes", d("200"))
            .with("No", d("0.0000005"));
        let quotes = QuoteBook::new()
            .with("Yes", d("0.5"), d("0.55"))
            .with("No", d("0.4"), d("0.45"));

        let plan = plan_liquidation(&holdings, &quotes, d("0.5"), &policy()).unwrap();
        assert_eq!(plan.target_cash, d("50"));
        assert_eq!(plan.shortfall, d("50"));

        let yes = plan.sales.iter().find(|s| s.asset == sym("Yes")).unwrap();
        let no = plan.sales.iter().find(|s| s.asset == sym("No")).unwrap();
        assert!(!yes.clamped);
        assert_eq!(yes.quantity, d("100"));
        assert!(no.clamped);
        assert_eq!(no.quantity, d("0.0000005"));
        assert_eq!(plan.warnings.len(), 1);

        let proceeds: Decimal = plan.sales.iter().map(|s| s.proceeds).sum();
        assert!(plan.cash_credited <= proceeds);
        assert!(plan.cash_credited <= plan.shortfall);
        assert_eq!(plan.cash_credited, d("50"));
        assert_eq!(
            plan.payout,
            plan.target_cash
                .min(holdings.amount(&sym("USDC")) + plan.cash_credited)
        );
        assert_eq!(plan.payout, d("50"));

        let after = plan.holdings_after_payout(&sym("USDC"));
        for (_, holding) in after.iter() {
            assert!(!holding.amount.is_negative());
        }
        assert_eq!(after.amount(&sym("USDC")), Decimal::zero());
        assert_eq!(after.amount(&sym("Yes")), d("100"));
        assert_eq!(after.amount(&sym("No")), Decimal::zero());
    }

    #[test]
    fn clamped_sale_caps_payout_at_raised_cash() {
        // Outcome value cannot cover the target: every sale clamps and the
        // payout is what the sales actually raised.
        let holdings = Holdings::new()
            .with("USDC", d("10"))
            .with("NEAR", d("4"))
            .with("Yes", d("20"))
            .with("No", d("10"));
        let quotes = QuoteBook::new()
            .with("NEAR", d("5"), d("5"))
            .with("Yes", d("0.5"), d("0.55"))
            .with("No", d("0.25"), d("0.3"));

        let plan = plan_liquidation(&holdings, &quotes, d("1"), &policy()).unwrap();
        assert_eq!(plan.target_cash, d("42.5"));
        assert_eq!(plan.shortfall, d("32.5"));
        assert!(plan.sales.iter().all(|s| s.clamped));
        assert_eq!(plan.cash_credited, d("12.5"));
        assert_eq!(plan.payout, d("22.5"));
        assert!(plan.warnings.iter().any(|w| w.contains("payout capped")));

        let after = plan.holdings_after_payout(&sym("USDC"));
        assert_eq!(after.amount(&sym("USDC")), Decimal::zero());
        assert_eq!(after.amount(&sym("NEAR")), d("4"));
        assert_eq!(after.amount(&sym("Yes")), Decimal::zero());
    }

    #[test]
    fn settlement_assets_are_not_tradable() {
        let p = policy();
        let holdings = Holdings::new().with("USDC", d("100")).with("NEAR", d("3"));
        let quotes = QuoteBook::new()
            .with("USDC", d("1"), d("1"))
            .with("NEAR", d("5"), d("5"));

        let err = plan_buy(&holdings, &sym("USDC"), d("10"), &quotes, &p).unwrap_err();
        assert_eq!(err, AccountingError::NotTradable { asset: sym("USDC") });
        let err = plan_sell(&holdings, &sym("NEAR"), d("1"), &quotes, &p).unwrap_err();
        assert_eq!(err, AccountingError::NotTradable { asset: sym("NEAR") });
    }

    #[test]
    fn oversized_amounts_overflow_without_panicking() {
        let p = policy();
        let yes = sym("Yes");
        let huge = Decimal::max_value();
        let quotes = QuoteBook::new().with("Yes", d("2"), d("2"));

        let holdings = Holdings::new().with("USDC", d("1")).with("Yes", huge);
        assert!(matches!(
            portfolio_value(&holdings, &quotes, QuoteSide::Bid, &p),
            Err(AccountingError::Overflow { .. })
        ));
        assert!(matches!(
            plan_liquidation(&holdings, &quotes, d("0.5"), &p),
            Err(AccountingError::Overflow { .. })
        ));

        let margin = SettlementPolicy {
            cash_policy: CashPolicy::AllowNegative,
            ..p.clone()
        };
        let err = plan_buy(&Holdings::new(), &yes, huge, &quotes, &margin).unwrap_err();
        assert_eq!(err, AccountingError::Overflow { operation: "buy cost" });

        let err = plan_sell(&holdings, &yes, huge, &quotes, &p).unwrap_err();
        assert_eq!(err, AccountingError::Overflow { operation: "sell proceeds" });

        assert!(matches!(
            shares_to_mint(huge, d("0.5"), 24),
            Err(AccountingError::Overflow { .. })
        ));
    }

    #[test]
    fn buy_then_sell_loses_the_spread() {
        let p = policy();
        let yes = sym("Yes");
        let quotes = QuoteBook::new().with("Yes", d("0.6"), d("0.62"));
        let mut holdings = Holdings::new().with("USDC", d("1000"));

        let buy = plan_buy(&holdings, &yes, d("100"), &quotes, &p).unwrap();
        assert_eq!(buy.cash_delta, d("-62"));
        assert_eq!(buy.cost_basis, Some(d("0.62")));
        holdings.add(&yes, buy.asset_delta, buy.cost_basis);
        holdings.add(&p.cash_symbol, buy.cash_delta, None);

        let sell = plan_sell(&holdings, &yes, d("100"), &quotes, &p).unwrap();
        holdings.add(&yes, sell.asset_delta, sell.cost_basis);
        holdings.add(&p.cash_symbol, sell.cash_delta, None);

        assert_eq!(
            holdings.amount(&p.cash_symbol),
            d("1000") - d("100") * (d("0.62") - d("0.6"))
        );
        assert_eq!(holdings.amount(&yes), Decimal::zero());
    }

    #[test]
    fn buy_averages_cost_basis() {
        let yes = sym("Yes");
        let mut holdings = Holdings::new().with("USDC", d("1000"));
        holdings.add(&yes, d("100"), Some(d("0.5")));
        let quotes = QuoteBook::new().with("Yes", d("0.6"), d("0.7"));

        let fill = plan_buy(&holdings, &yes, d("100"), &quotes, &policy()).unwrap();
        assert_eq!(fill.cost_basis, Some(d("0.6")));
    }

    #[test]
    fn oversized_buy_respects_cash_policy() {
        let yes = sym("Yes");
        let holdings = Holdings::new().with("USDC", d("10"));
        let quotes = QuoteBook::new().with("Yes", d("0.5"), d("0.5"));

        let err = plan_buy(&holdings, &yes, d("100"), &quotes, &policy()).unwrap_err();
        assert_eq!(
            err,
            AccountingError::InsufficientCash {
                available: d("10"),
                required: d("50")
            }
        );

        let margin = SettlementPolicy {
            cash_policy: CashPolicy::AllowNegative,
            ..policy()
        };
        let fill = plan_buy(&holdings, &yes, d("100"), &quotes, &margin).unwrap();
        assert_eq!(fill.cash_delta, d("-50"));
    }

    #[test]
    fn sell_rejects_insufficient_holding() {
        let holdings = Holdings::new().with("Yes", d("5"));
        let quotes = QuoteBook::new().with("Yes", d("0.5"), d("0.5"));
        let err = plan_sell(&holdings, &sym("Yes"), d("6"), &quotes, &policy()).unwrap_err();
        assert!(matches!(err, AccountingError::InsufficientHolding { .. }));
    }
}
