//! In-memory collaborators for tests and local dry runs.
//!
//! Every mock appends to a shared call log so tests can assert the order in
//! which the engine touched its collaborators.

use super::{
    ActionLog, Collaborators, Conversion, ConversionDirection, ConversionService, GatewayError,
    JobQueue, LedgerGateway, PoolStore, QuoteSource, Recommendation, RecommendationContext,
    Recommender,
};
use crate::domain::{
    AccountId, ActionKind, ActionRecord, AssetSymbol, Decimal, Holdings, JobAction, JobStatus,
    Pool, PoolName, QuoteBook, RawJob,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

/// Shared, ordered record of collaborator calls.
pub type CallLog = Arc<Mutex<Vec<String>>>;

fn log(calls: &CallLog, entry: String) {
    calls.lock().unwrap().push(entry);
}

/// Scripted failures, consumed one per call.
#[derive(Debug, Default)]
struct FailureScript {
    queued: VecDeque<GatewayError>,
    always: Option<GatewayError>,
}

impl FailureScript {
    fn next(&mut self) -> Option<GatewayError> {
        self.queued.pop_front().or_else(|| self.always.clone())
    }
}

#[derive(Debug, Default)]
pub struct MockPoolStore {
    pools: Mutex<HashMap<PoolName, Holdings>>,
    failures: Mutex<FailureScript>,
    calls: CallLog,
}

impl MockPoolStore {
    pub fn new(calls: CallLog) -> Self {
        Self {
            calls,
            ..Default::default()
        }
    }

    pub fn with_pool(self, pool: &PoolName, holdings: Holdings) -> Self {
        self.pools.lock().unwrap().insert(pool.clone(), holdings);
        self
    }

    pub fn holdings(&self, pool: &PoolName) -> Holdings {
        self.pools
            .lock()
            .unwrap()
            .get(pool)
            .cloned()
            .unwrap_or_default()
    }

    pub fn fail_next(&self, err: GatewayError) {
        self.failures.lock().unwrap().queued.push_back(err);
    }

    fn check(&self) -> Result<(), GatewayError> {
        match self.failures.lock().unwrap().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PoolStore for MockPoolStore {
    async fn get_pool(&self, pool: &PoolName) -> Result<Pool, GatewayError> {
        log(&self.calls, format!("store.get_pool:{}", pool));
        self.check()?;
        Ok(Pool::new(pool.clone(), self.holdings(pool)))
    }

    async fn replace_pool_holdings(
        &self,
        pool: &PoolName,
        holdings: &Holdings,
    ) -> Result<(), GatewayError> {
        log(&self.calls, format!("store.replace:{}", pool));
        self.check()?;
        self.pools
            .lock()
            .unwrap()
            .insert(pool.clone(), holdings.clone());
        Ok(())
    }

    async fn add_holding(
        &self,
        pool: &PoolName,
        asset: &AssetSymbol,
        delta: Decimal,
        cost_basis: Option<Decimal>,
    ) -> Result<(), GatewayError> {
        log(&self.calls, format!("store.add:{}:{}:{}", pool, asset, delta));
        self.check()?;
        self.pools
            .lock()
            .unwrap()
            .entry(pool.clone())
            .or_default()
            .add(asset, delta, cost_basis);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MockQuoteSource {
    book: Mutex<QuoteBook>,
    calls: CallLog,
}

impl MockQuoteSource {
    pub fn new(calls: CallLog) -> Self {
        Self {
            calls,
            ..Default::default()
        }
    }

    pub fn set_book(&self, book: QuoteBook) {
        *self.book.lock().unwrap() = book;
    }
}

#[async_trait]
impl QuoteSource for MockQuoteSource {
    async fn get_quotes(
        &self,
        pool: &PoolName,
        assets: &[AssetSymbol],
    ) -> Result<QuoteBook, GatewayError> {
        log(&self.calls, format!("quotes.get:{}", pool));
        let book = self.book.lock().unwrap();
        Ok(assets
            .iter()
            .filter_map(|a| book.get(a).map(|q| (a.clone(), *q)))
            .collect())
    }
}

/// Converts at a fixed rate with a flat fee fraction of the output.
#[derive(Debug)]
pub struct MockConversion {
    rate: Decimal,
    fee_rate: Decimal,
    failures: Mutex<FailureScript>,
    calls: CallLog,
}

impl MockConversion {
    pub fn new(calls: CallLog, rate: Decimal) -> Self {
        Self {
            rate,
            fee_rate: Decimal::zero(),
            failures: Mutex::new(FailureScript::default()),
            calls,
        }
    }

    pub fn with_fee_rate(mut self, fee_rate: Decimal) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    pub fn fail_next(&self, err: GatewayError) {
        self.failures.lock().unwrap().queued.push_back(err);
    }
}

#[async_trait]
impl ConversionService for MockConversion {
    async fn convert(
        &self,
        amount: Decimal,
        direction: ConversionDirection,
    ) -> Result<Conversion, GatewayError> {
        log(&self.calls, format!("convert:{:?}:{}", direction, amount));
        if let Some(err) = self.failures.lock().unwrap().next() {
            return Err(err);
        }
        let gross = match direction {
            ConversionDirection::NativeToCash => amount.checked_mul(self.rate),
            ConversionDirection::CashToNative => amount.checked_div(self.rate),
        }
        .ok_or_else(|| GatewayError::Rejected(format!("converting {} overflows", amount)))?;
        let fee = gross * self.fee_rate;
        Ok(Conversion {
            received: gross - fee,
            fee,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub request_ref: String,
    pub account: AccountId,
    pub native_amount: Decimal,
}

#[derive(Debug, Default)]
struct LedgerState {
    supply: HashMap<PoolName, Decimal>,
    balances: HashMap<(PoolName, AccountId), Decimal>,
    escrow: HashMap<String, Decimal>,
    fulfilled: HashSet<String>,
    releases: Vec<Release>,
}

/// Share ledger with idempotent fulfillment by request reference.
#[derive(Debug, Default)]
pub struct MockLedger {
    state: Mutex<LedgerState>,
    failures: Mutex<FailureScript>,
    calls: CallLog,
}

impl MockLedger {
    pub fn new(calls: CallLog) -> Self {
        Self {
            calls,
            ..Default::default()
        }
    }

    pub fn with_supply(self, pool: &PoolName, supply: Decimal) -> Self {
        self.state
            .lock()
            .unwrap()
            .supply
            .insert(pool.clone(), supply);
        self
    }

    /// Register shares escrowed by a pending withdrawal request.
    pub fn with_escrow(self, request_ref: &str, shares: Decimal) -> Self {
        self.state
            .lock()
            .unwrap()
            .escrow
            .insert(request_ref.to_string(), shares);
        self
    }

    pub fn fail_next(&self, err: GatewayError) {
        self.failures.lock().unwrap().queued.push_back(err);
    }

    pub fn fail_always(&self, err: GatewayError) {
        self.failures.lock().unwrap().always = Some(err);
    }

    pub fn supply(&self, pool: &PoolName) -> Decimal {
        self.state
            .lock()
            .unwrap()
            .supply
            .get(pool)
            .copied()
            .unwrap_or_default()
    }

    pub fn balance(&self, pool: &PoolName, account: &AccountId) -> Decimal {
        self.state
            .lock()
            .unwrap()
            .balances
            .get(&(pool.clone(), account.clone()))
            .copied()
            .unwrap_or_default()
    }

    pub fn releases(&self) -> Vec<Release> {
        self.state.lock().unwrap().releases.clone()
    }

    fn check(&self) -> Result<(), GatewayError> {
        match self.failures.lock().unwrap().next() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LedgerGateway for MockLedger {
    async fn total_shares_outstanding(&self, pool: &PoolName) -> Result<Decimal, GatewayError> {
        log(&self.calls, format!("ledger.supply:{}", pool));
        Ok(self.supply(pool))
    }

    async fn mint_shares(
        &self,
        pool: &PoolName,
        request_ref: &str,
        account: &AccountId,
        shares: Decimal,
    ) -> Result<(), GatewayError> {
        log(&self.calls, format!("ledger.mint:{}:{}", request_ref, shares));
        self.check()?;
        let mut state = self.state.lock().unwrap();
        if !state.fulfilled.insert(request_ref.to_string()) {
            return Ok(());
        }
        *state.supply.entry(pool.clone()).or_default() += shares;
        *state
            .balances
            .entry((pool.clone(), account.clone()))
            .or_default() += shares;
        Ok(())
    }

    async fn burn_and_release(
        &self,
        pool: &PoolName,
        request_ref: &str,
        account: &AccountId,
        native_amount: Decimal,
    ) -> Result<(), GatewayError> {
        log(
            &self.calls,
            format!("ledger.release:{}:{}", request_ref, native_amount),
        );
        self.check()?;
        let mut state = self.state.lock().unwrap();
        if !state.fulfilled.insert(request_ref.to_string()) {
            return Ok(());
        }
        let burned = state.escrow.remove(request_ref).unwrap_or_default();
        *state.supply.entry(pool.clone()).or_default() -= burned;
        state.releases.push(Release {
            request_ref: request_ref.to_string(),
            account: account.clone(),
            native_amount,
        });
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MockActionLog {
    records: Mutex<Vec<ActionRecord>>,
    calls: CallLog,
}

impl MockActionLog {
    pub fn new(calls: CallLog) -> Self {
        Self {
            calls,
            ..Default::default()
        }
    }

    pub fn records(&self) -> Vec<ActionRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<ActionKind> {
        self.records().iter().map(|r| r.kind).collect()
    }
}

#[async_trait]
impl ActionLog for MockActionLog {
    async fn record_action(&self, record: &ActionRecord) -> Result<(), GatewayError> {
        log(&self.calls, format!("action:{}", record.kind));
        let mut records = self.records.lock().unwrap();
        if !records.iter().any(|r| r.action_key == record.action_key) {
            records.push(record.clone());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub job_id: String,
    pub status: JobStatus,
    pub details: serde_json::Value,
}

#[derive(Debug, Default)]
pub struct MockJobQueue {
    jobs: Mutex<Vec<RawJob>>,
    reports: Mutex<Vec<StatusReport>>,
    enqueued: Mutex<Vec<(PoolName, JobAction)>>,
    report_failures: Mutex<FailureScript>,
    enqueue_failures: Mutex<FailureScript>,
}

impl MockJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, job: RawJob) {
        self.jobs.lock().unwrap().push(job);
    }

    pub fn reports(&self) -> Vec<StatusReport> {
        self.reports.lock().unwrap().clone()
    }

    pub fn enqueued(&self) -> Vec<(PoolName, JobAction)> {
        self.enqueued.lock().unwrap().clone()
    }

    /// Every status report fails with `err` until [`Self::restore_reports`].
    pub fn fail_reports(&self, err: GatewayError) {
        self.report_failures.lock().unwrap().always = Some(err);
    }

    pub fn restore_reports(&self) {
        *self.report_failures.lock().unwrap() = FailureScript::default();
    }

    pub fn fail_enqueue(&self, err: GatewayError) {
        self.enqueue_failures.lock().unwrap().always = Some(err);
    }
}

#[async_trait]
impl JobQueue for MockJobQueue {
    async fn fetch_pending(&self) -> Result<Vec<RawJob>, GatewayError> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .cloned()
            .collect())
    }

    async fn report_status(
        &self,
        job_id: &str,
        status: JobStatus,
        details: &serde_json::Value,
    ) -> Result<(), GatewayError> {
        if let Some(err) = self.report_failures.lock().unwrap().next() {
            return Err(err);
        }
        if let Some(job) = self.jobs.lock().unwrap().iter_mut().find(|j| j.id == job_id) {
            job.status = status;
        }
        self.reports.lock().unwrap().push(StatusReport {
            job_id: job_id.to_string(),
            status,
            details: details.clone(),
        });
        Ok(())
    }

    async fn enqueue(&self, pool: &PoolName, action: &JobAction) -> Result<String, GatewayError> {
        if let Some(err) = self.enqueue_failures.lock().unwrap().next() {
            return Err(err);
        }
        let mut enqueued = self.enqueued.lock().unwrap();
        enqueued.push((pool.clone(), action.clone()));
        let id = format!("enqueued-{}", enqueued.len());
        self.jobs.lock().unwrap().push(RawJob {
            id: id.clone(),
            action: action.name().to_string(),
            pool_name: pool.to_string(),
            details: action.details(),
            status: JobStatus::Pending,
        });
        Ok(id)
    }
}

/// Returns the same recommendation every time.
#[derive(Debug)]
pub struct MockRecommender {
    reply: Recommendation,
    contexts: Mutex<Vec<RecommendationContext>>,
}

impl MockRecommender {
    pub fn new(reply: Recommendation) -> Self {
        Self {
            reply,
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub fn contexts(&self) -> Vec<RecommendationContext> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Recommender for MockRecommender {
    fn name(&self) -> &str {
        "mock-agent"
    }

    async fn recommend(
        &self,
        context: &RecommendationContext,
    ) -> Result<Recommendation, GatewayError> {
        self.contexts.lock().unwrap().push(context.clone());
        Ok(self.reply.clone())
    }
}

/// A full set of mocks wired to one call log.
#[derive(Debug, Clone)]
pub struct MockEnv {
    pub calls: CallLog,
    pub store: Arc<MockPoolStore>,
    pub quotes: Arc<MockQuoteSource>,
    pub conversion: Arc<MockConversion>,
    pub ledger: Arc<MockLedger>,
    pub actions: Arc<MockActionLog>,
}

impl MockEnv {
    /// Empty pool state, conversion at `rate` cash per native unit.
    pub fn new(rate: Decimal) -> Self {
        let calls: CallLog = Arc::new(Mutex::new(Vec::new()));
        Self {
            store: Arc::new(MockPoolStore::new(calls.clone())),
            quotes: Arc::new(MockQuoteSource::new(calls.clone())),
            conversion: Arc::new(MockConversion::new(calls.clone(), rate)),
            ledger: Arc::new(MockLedger::new(calls.clone())),
            actions: Arc::new(MockActionLog::new(calls.clone())),
            calls,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            store: self.store.clone(),
            quotes: self.quotes.clone(),
            conversion: self.conversion.clone(),
            ledger: self.ledger.clone(),
            actions: self.actions.clone(),
            recommender: None,
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn d(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[tokio::test]
    async fn test_mock_ledger_mint_is_idempotent() {
        let pool = PoolName::new("alpha");
        let alice = AccountId::new("alice");
        let ledger = MockLedger::default();

        ledger.mint_shares(&pool, "iou-1", &alice, d("10")).await.unwrap();
        ledger.mint_shares(&pool, "iou-1", &alice, d("10")).await.unwrap();

        assert_eq!(ledger.supply(&pool), d("10"));
        assert_eq!(ledger.balance(&pool, &alice), d("10"));
    }

    #[tokio::test]
    async fn test_mock_ledger_burns_escrow() {
        let pool = PoolName::new("alpha");
        let ledger = MockLedger::default()
            .with_supply(&pool, d("100"))
            .with_escrow("iou-2", d("40"));

        ledger
            .burn_and_release(&pool, "iou-2", &AccountId::new("bob"), d("3"))
            .await
            .unwrap();
        assert_eq!(ledger.supply(&pool), d("60"));
        assert_eq!(ledger.releases().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_store_scripted_failure() {
        let store = MockPoolStore::default();
        store.fail_next(GatewayError::Network("down".into()));
        let pool = PoolName::new("alpha");
        assert!(store.get_pool(&pool).await.is_err());
        assert!(store.get_pool(&pool).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_queue_hides_reported_jobs() {
        let queue = MockJobQueue::new();
        queue.push(RawJob {
            id: "1".into(),
            action: "recommend".into(),
            pool_name: "alpha".into(),
            details: serde_json::Value::Null,
            status: JobStatus::Pending,
        });
        assert_eq!(queue.fetch_pending().await.unwrap().len(), 1);
        queue
            .report_status("1", JobStatus::Complete, &serde_json::json!({}))
            .await
            .unwrap();
        assert!(queue.fetch_pending().await.unwrap().is_empty());
    }
}
