//! Job execution against the pool's collaborators.
//!
//! Every operation reads what it needs, runs the pure accounting in
//! [`super::accounting`], then applies the result through the store and
//! ledger. Calls go through the engine's [`RetryPolicy`]; a call that keeps
//! failing transiently surfaces as [`SettlementError::Stuck`] instead of
//! blocking the worker forever. There is no rollback: steps that completed
//! before a failure stay applied and are visible in the action history.

use super::accounting::{
    self, AccountingError, FeeSplit, LiquidationPlan, Sale, TradeFill,
};
use super::locks::PoolLocks;
use super::retry::{RetryError, RetryPolicy};
use super::SettlementPolicy;
use crate::domain::{
    AccountId, ActionKind, ActionRecord, Actor, AssetSymbol, Decimal, DepositRequest, Holdings,
    Job, JobAction, JobStatus, PoolName, QuoteBook, QuoteSide, RecommendRequest, TradeRequest,
    WithdrawRequest,
};
use crate::gateway::{
    Collaborators, ConversionDirection, Decision, GatewayError, Recommendation,
    RecommendationContext,
};
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error(transparent)]
    Accounting(#[from] AccountingError),
    #[error("deposit of {cash_received} cash mints no shares at {value_per_share} per share")]
    DustDeposit {
        cash_received: Decimal,
        value_per_share: Decimal,
    },
    #[error("redeeming {shares} shares pays out nothing ({cash_payout} cash)")]
    DustWithdrawal { shares: Decimal, cash_payout: Decimal },
    /// A collaborator refused the call or returned something unusable.
    #[error("{operation} failed: {source}")]
    Gateway {
        operation: &'static str,
        source: GatewayError,
    },
    #[error("{operation} still failing after {attempts} attempts: {last_error}")]
    Stuck {
        operation: &'static str,
        attempts: u32,
        last_error: GatewayError,
    },
    #[error("no recommender configured")]
    NoRecommender,
}

impl SettlementError {
    fn from_retry(operation: &'static str, err: RetryError) -> Self {
        match err {
            RetryError::Exhausted { attempts, error } => SettlementError::Stuck {
                operation,
                attempts,
                last_error: error,
            },
            RetryError::Permanent(source) => SettlementError::Gateway { operation, source },
        }
    }

    /// Short machine-readable class, stored with the failed job.
    pub fn kind(&self) -> &'static str {
        match self {
            SettlementError::Accounting(_)
            | SettlementError::DustDeposit { .. }
            | SettlementError::DustWithdrawal { .. } => "validation",
            SettlementError::Gateway { .. } => "gateway",
            SettlementError::Stuck { .. } => "stuck",
            SettlementError::NoRecommender => "unavailable",
        }
    }

    /// Queue status a job ending in this error is reported with.
    pub fn job_status(&self) -> JobStatus {
        match self {
            SettlementError::Stuck { .. } => JobStatus::Stuck,
            _ => JobStatus::Failed,
        }
    }

    pub fn to_details(&self) -> serde_json::Value {
        let mut details = json!({ "error": self.to_string(), "kind": self.kind() });
        if let SettlementError::Stuck {
            operation,
            attempts,
            ..
        } = self
        {
            details["operation"] = json!(operation);
            details["attempts"] = json!(attempts);
        }
        details
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepositOutcome {
    pub request_ref: String,
    pub account: AccountId,
    pub native_amount: Decimal,
    pub operational_fee: Decimal,
    pub cash_received: Decimal,
    pub conversion_fee: Decimal,
    pub pool_value_before: Decimal,
    pub shares_outstanding_before: Decimal,
    pub value_per_share: Decimal,
    pub shares_minted: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WithdrawOutcome {
    pub request_ref: String,
    pub account: AccountId,
    pub shares_redeemed: Decimal,
    pub shares_outstanding: Decimal,
    pub fraction: Decimal,
    pub pool_value: Decimal,
    pub target_cash: Decimal,
    pub shortfall: Decimal,
    pub sales: Vec<Sale>,
    pub cash_paid_out: Decimal,
    pub conversion_fee: Decimal,
    pub native_gross: Decimal,
    pub operational_fee: Decimal,
    pub native_net: Decimal,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradeOutcome {
    pub side: TradeSide,
    pub asset: AssetSymbol,
    pub quantity: Decimal,
    pub price: Decimal,
    pub cash_delta: Decimal,
    pub actor: Actor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecommendOutcome {
    pub recommender: String,
    pub recommendation: Recommendation,
}

impl RecommendOutcome {
    /// The trade to queue for a buy or sell verdict. Verdicts missing an
    /// asset or a positive quantity yield nothing.
    pub fn follow_up(&self) -> Option<JobAction> {
        let rec = &self.recommendation;
        let asset = rec.asset.clone()?;
        let quantity = rec.quantity.filter(|q| q.is_positive())?;
        let request = TradeRequest {
            asset,
            quantity,
            actor: Actor::Recommender(self.recommender.clone()),
        };
        match rec.decision {
            Decision::Buy => Some(JobAction::Buy(request)),
            Decision::Sell => Some(JobAction::Sell(request)),
            Decision::Hold => None,
        }
    }
}

/// Result of one executed job, stored as its completion details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum JobOutcome {
    Deposit(DepositOutcome),
    Withdraw(WithdrawOutcome),
    Trade(TradeOutcome),
    Recommend(RecommendOutcome),
}

impl JobOutcome {
    pub fn to_details(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Audit context for one job: numbers its action records so retried writes
/// keep the same key.
struct Trail<'a> {
    pool: &'a PoolName,
    job_id: Option<&'a str>,
    step: u32,
}

impl<'a> Trail<'a> {
    fn new(pool: &'a PoolName, job_id: Option<&'a str>) -> Self {
        Self {
            pool,
            job_id,
            step: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SettlementEngine {
    collaborators: Collaborators,
    policy: SettlementPolicy,
    retry: RetryPolicy,
    locks: PoolLocks,
}

impl SettlementEngine {
    pub fn new(collaborators: Collaborators, policy: SettlementPolicy, retry: RetryPolicy) -> Self {
        Self {
            collaborators,
            policy,
            retry,
            locks: PoolLocks::new(),
        }
    }

    pub fn policy(&self) -> &SettlementPolicy {
        &self.policy
    }

    pub fn recommender_name(&self) -> Option<&str> {
        self.collaborators.recommender.as_deref().map(|r| r.name())
    }

    /// Run a validated job to completion.
    pub async fn execute(&self, job: &Job) -> Result<JobOutcome, SettlementError> {
        let job_id = Some(job.id.as_str());
        match &job.action {
            JobAction::Deposit(req) => self
                .fulfill_deposit(&job.pool, req, job_id)
                .await
                .map(JobOutcome::Deposit),
            JobAction::Withdraw(req) => self
                .fulfill_withdraw(&job.pool, req, job_id)
                .await
                .map(JobOutcome::Withdraw),
            JobAction::Buy(req) => self
                .adjust_position(&job.pool, TradeSide::Buy, req, job_id)
                .await
                .map(JobOutcome::Trade),
            JobAction::Sell(req) => self
                .adjust_position(&job.pool, TradeSide::Sell, req, job_id)
                .await
                .map(JobOutcome::Trade),
            JobAction::Recommend(req) => self
                .recommend(&job.pool, req, job_id)
                .await
                .map(JobOutcome::Recommend),
        }
    }

    /// Convert a native deposit to cash and mint shares at the pool's
    /// pre-deposit value per share.
    pub async fn fulfill_deposit(
        &self,
        pool: &PoolName,
        req: &DepositRequest,
        job_id: Option<&str>,
    ) -> Result<DepositOutcome, SettlementError> {
        let _guard = self.locks.acquire(pool).await;
        let mut trail = Trail::new(pool, job_id);
        let scales = self.policy.scales;

        let FeeSplit {
            net: net_native,
            fee: operational_fee,
        } = accounting::split_fee(req.amount, self.policy.deposit_fee_bps, scales.native);

        let conversion = self.collaborators.conversion.clone();
        let converted = self
            .call("convert", || {
                conversion.convert(net_native, ConversionDirection::NativeToCash)
            })
            .await?;
        let cash_received = converted.received.truncate_to(scales.cash);
        self.record(
            &mut trail,
            ActionKind::Swap,
            Actor::Platform,
            json!({
                "from": self.policy.native_symbol,
                "to": self.policy.cash_symbol,
                "amount_in": net_native,
                "amount_out": cash_received,
                "fee": converted.fee,
            }),
        )
        .await;

        let holdings = self.load_holdings(pool).await?;
        let quotes = self.load_quotes(pool, &holdings).await?;
        let pool_value_before =
            accounting::portfolio_value(&holdings, &quotes, QuoteSide::Ask, &self.policy)?;

        let ledger = self.collaborators.ledger.clone();
        let shares_outstanding_before = self
            .call("ledger.total_shares", || ledger.total_shares_outstanding(pool))
            .await?;

        let value_per_share =
            accounting::value_per_share(pool_value_before, shares_outstanding_before)?;
        let shares_minted =
            accounting::shares_to_mint(cash_received, value_per_share, scales.shares)?;
        if !shares_minted.is_positive() {
            return Err(SettlementError::DustDeposit {
                cash_received,
                value_per_share,
            });
        }

        let store = self.collaborators.store.clone();
        let cash_symbol = &self.policy.cash_symbol;
        self.call("store.add_holding", || {
            store.add_holding(pool, cash_symbol, cash_received, None)
        })
        .await?;

        self.call("ledger.mint_shares", || {
            ledger.mint_shares(pool, &req.request_ref, &req.account, shares_minted)
        })
        .await?;

        let outcome = DepositOutcome {
            request_ref: req.request_ref.clone(),
            account: req.account.clone(),
            native_amount: req.amount,
            operational_fee,
            cash_received,
            conversion_fee: converted.fee,
            pool_value_before,
            shares_outstanding_before,
            value_per_share,
            shares_minted,
        };
        self.record(
            &mut trail,
            ActionKind::Deposit,
            Actor::Account(req.account.clone()),
            json!({
                "request_ref": req.request_ref,
                "amount": req.amount,
                "cash_received": cash_received,
                "value_per_share": value_per_share,
                "shares": shares_minted,
                "fees": { "operational": operational_fee, "conversion": converted.fee },
            }),
        )
        .await;

        info!(
            pool = %pool,
            account = %req.account,
            cash = %cash_received,
            shares = %shares_minted,
            vps = %value_per_share,
            "Deposit fulfilled"
        );
        Ok(outcome)
    }

    /// Redeem shares for a proportional slice of the pool, liquidating
    /// outcome holdings when cash alone does not cover it.
    pub async fn fulfill_withdraw(
        &self,
        pool: &PoolName,
        req: &WithdrawRequest,
        job_id: Option<&str>,
    ) -> Result<WithdrawOutcome, SettlementError> {
        let _guard = self.locks.acquire(pool).await;
        let mut trail = Trail::new(pool, job_id);
        let scales = self.policy.scales;
        let cash_symbol = &self.policy.cash_symbol;

        let ledger = self.collaborators.ledger.clone();
        let shares_outstanding = self
            .call("ledger.total_shares", || ledger.total_shares_outstanding(pool))
            .await?;
        let fraction = accounting::redemption_fraction(
            req.shares,
            shares_outstanding,
            self.policy.redemption_basis,
        )?;

        let holdings = self.load_holdings(pool).await?;
        let quotes = self.load_quotes(pool, &holdings).await?;
        let plan = accounting::plan_liquidation(&holdings, &quotes, fraction, &self.policy)?;
        for warning in &plan.warnings {
            warn!(pool = %pool, request_ref = %req.request_ref, "{}", warning);
        }
        if !plan.payout.is_positive() {
            return Err(SettlementError::DustWithdrawal {
                shares: req.shares,
                cash_payout: plan.payout,
            });
        }

        let store = self.collaborators.store.clone();
        if plan.liquidated() {
            self.call("store.replace_holdings", || {
                store.replace_pool_holdings(pool, &plan.resulting_holdings)
            })
            .await?;
        }
        self.record(
            &mut trail,
            ActionKind::Rebalance,
            Actor::Platform,
            rebalance_details(&plan, cash_symbol),
        )
        .await;

        let conversion = self.collaborators.conversion.clone();
        let converted = self
            .call("convert", || {
                conversion.convert(plan.payout, ConversionDirection::CashToNative)
            })
            .await?;
        let native_gross = converted.received.truncate_to(scales.native);
        let FeeSplit {
            net: native_net,
            fee: operational_fee,
        } = accounting::split_fee(native_gross, self.policy.withdraw_fee_bps, scales.native);
        // The payout cash stays in the pool when nothing would reach the redeemer.
        if !native_net.is_positive() {
            return Err(SettlementError::DustWithdrawal {
                shares: req.shares,
                cash_payout: plan.payout,
            });
        }
        self.record(
            &mut trail,
            ActionKind::Swap,
            Actor::Platform,
            json!({
                "from": cash_symbol,
                "to": self.policy.native_symbol,
                "amount_in": plan.payout,
                "amount_out": native_gross,
                "fee": converted.fee,
            }),
        )
        .await;

        let after_payout = plan.holdings_after_payout(cash_symbol);
        self.call("store.replace_holdings", || {
            store.replace_pool_holdings(pool, &after_payout)
        })
        .await?;

        self.call("ledger.burn_and_release", || {
            ledger.burn_and_release(pool, &req.request_ref, &req.account, native_net)
        })
        .await?;

        self.record(
            &mut trail,
            ActionKind::Withdraw,
            Actor::Account(req.account.clone()),
            json!({
                "request_ref": req.request_ref,
                "shares": req.shares,
                "gross": native_gross,
                "net": native_net,
                "fees": { "operational": operational_fee, "conversion": converted.fee },
            }),
        )
        .await;

        info!(
            pool = %pool,
            account = %req.account,
            shares = %req.shares,
            fraction = %fraction,
            payout = %plan.payout,
            native = %native_net,
            liquidated = plan.liquidated(),
            "Withdrawal fulfilled"
        );

        Ok(WithdrawOutcome {
            request_ref: req.request_ref.clone(),
            account: req.account.clone(),
            shares_redeemed: req.shares,
            shares_outstanding,
            fraction,
            pool_value: plan.total_value,
            target_cash: plan.target_cash,
            shortfall: plan.shortfall,
            cash_paid_out: plan.payout,
            sales: plan.sales,
            conversion_fee: converted.fee,
            native_gross,
            operational_fee,
            native_net,
            warnings: plan.warnings,
        })
    }

    /// Buy at the ask or sell at the bid, updating the outcome and cash
    /// holdings incrementally.
    pub async fn adjust_position(
        &self,
        pool: &PoolName,
        side: TradeSide,
        req: &TradeRequest,
        job_id: Option<&str>,
    ) -> Result<TradeOutcome, SettlementError> {
        let _guard = self.locks.acquire(pool).await;
        let mut trail = Trail::new(pool, job_id);

        let holdings = self.load_holdings(pool).await?;
        let quote_source = self.collaborators.quotes.clone();
        let wanted = [req.asset.clone()];
        let quotes = self
            .call("quotes.get", || quote_source.get_quotes(pool, &wanted))
            .await?;

        let fill: TradeFill = match side {
            TradeSide::Buy => {
                accounting::plan_buy(&holdings, &req.asset, req.quantity, &quotes, &self.policy)?
            }
            TradeSide::Sell => {
                accounting::plan_sell(&holdings, &req.asset, req.quantity, &quotes, &self.policy)?
            }
        };

        let store = self.collaborators.store.clone();
        self.call("store.add_holding", || {
            store.add_holding(pool, &fill.asset, fill.asset_delta, fill.cost_basis)
        })
        .await?;
        let cash_symbol = &self.policy.cash_symbol;
        self.call("store.add_holding", || {
            store.add_holding(pool, cash_symbol, fill.cash_delta, None)
        })
        .await?;

        let kind = match side {
            TradeSide::Buy => ActionKind::Buy,
            TradeSide::Sell => ActionKind::Sell,
        };
        self.record(
            &mut trail,
            kind,
            req.actor.clone(),
            json!({
                "asset": fill.asset,
                "quantity": fill.quantity,
                "price": fill.price,
                "cash": fill.cash_delta,
            }),
        )
        .await;

        info!(
            pool = %pool,
            side = ?side,
            asset = %fill.asset,
            quantity = %fill.quantity,
            price = %fill.price,
            actor = %req.actor,
            "Position adjusted"
        );

        Ok(TradeOutcome {
            side,
            asset: fill.asset,
            quantity: fill.quantity,
            price: fill.price,
            cash_delta: fill.cash_delta,
            actor: req.actor.clone(),
        })
    }

    /// Ask the configured recommender what to do with the pool. The verdict
    /// is returned, not executed.
    pub async fn recommend(
        &self,
        pool: &PoolName,
        req: &RecommendRequest,
        job_id: Option<&str>,
    ) -> Result<RecommendOutcome, SettlementError> {
        let recommender = self
            .collaborators
            .recommender
            .clone()
            .ok_or(SettlementError::NoRecommender)?;
        let mut trail = Trail::new(pool, job_id);

        let holdings = self.load_holdings(pool).await?;
        let context = RecommendationContext {
            pool: pool.clone(),
            cash_available: holdings.amount(&self.policy.cash_symbol),
            holdings,
            market_url: req.market_url.clone(),
        };
        let recommendation = self
            .call("recommender.recommend", || recommender.recommend(&context))
            .await?;

        let actor = Actor::Recommender(recommender.name().to_string());
        self.record(
            &mut trail,
            ActionKind::AiCall,
            actor,
            serde_json::to_value(&recommendation).unwrap_or(serde_json::Value::Null),
        )
        .await;

        info!(
            pool = %pool,
            recommender = recommender.name(),
            decision = ?recommendation.decision,
            "Recommendation received"
        );

        Ok(RecommendOutcome {
            recommender: recommender.name().to_string(),
            recommendation,
        })
    }

    async fn load_holdings(&self, pool: &PoolName) -> Result<Holdings, SettlementError> {
        let store = self.collaborators.store.clone();
        let fetched = self.call("store.get_pool", || store.get_pool(pool)).await?;
        Ok(fetched.holdings)
    }

    /// Quotes for every non-cash asset the pool holds, fetched once per job.
    async fn load_quotes(
        &self,
        pool: &PoolName,
        holdings: &Holdings,
    ) -> Result<QuoteBook, SettlementError> {
        let assets: Vec<AssetSymbol> = holdings
            .held_assets()
            .into_iter()
            .filter(|a| !self.policy.is_cash(a))
            .collect();
        if assets.is_empty() {
            return Ok(QuoteBook::new());
        }
        let quotes = self.collaborators.quotes.clone();
        self.call("quotes.get", || quotes.get_quotes(pool, &assets))
            .await
    }

    async fn call<T, F, Fut>(&self, operation: &'static str, op: F) -> Result<T, SettlementError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        self.retry
            .run(operation, op)
            .await
            .map_err(|e| SettlementError::from_retry(operation, e))
    }

    /// Write an audit record. Failures are logged and otherwise ignored; the
    /// settlement they describe has already happened.
    async fn record(
        &self,
        trail: &mut Trail<'_>,
        kind: ActionKind,
        actor: Actor,
        details: serde_json::Value,
    ) {
        trail.step += 1;
        let record = ActionRecord::new(
            trail.pool.clone(),
            kind,
            actor,
            trail.job_id,
            trail.step,
            details,
        );
        let log = self.collaborators.actions.clone();
        if let Err(err) = self.retry.run("actions.record", || log.record_action(&record)).await {
            warn!(
                pool = %trail.pool,
                kind = %kind,
                action_key = %record.action_key,
                error = ?err,
                "Failed to record action"
            );
        }
    }
}

fn rebalance_details(plan: &LiquidationPlan, cash_symbol: &AssetSymbol) -> serde_json::Value {
    let mut details = json!({
        "cash": plan.resulting_holdings.amount(cash_symbol),
        "target_cash": plan.target_cash,
        "shortfall": plan.shortfall,
        "sales": plan.sales,
    });
    if !plan.warnings.is_empty() {
        details["warnings"] = json!(plan.warnings);
    }
    details
}
