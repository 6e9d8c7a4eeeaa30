use poolkeeper::db::init_db;
use poolkeeper::domain::{ActionKind, AssetSymbol, Decimal, Holdings, JobStatus, PoolName, Quote};
use poolkeeper::engine::{RetryPolicy, SettlementEngine, SettlementPolicy};
use poolkeeper::gateway::mock::{CallLog, MockConversion, MockLedger};
use poolkeeper::gateway::{Collaborators, PoolStore};
use poolkeeper::{JobDispatcher, Repository};
use serde_json::json;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

struct Harness {
    repo: Arc<Repository>,
    ledger: Arc<MockLedger>,
    dispatcher: JobDispatcher,
    _temp: TempDir,
}

/// Dispatcher whose pool store, quotes, audit log and queue are one SQLite
/// file. Only conversion and the share ledger are doubles.
async fn setup(ledger: MockLedger, calls: CallLog) -> Harness {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let repo = Arc::new(Repository::new(init_db(&db_path).await.expect("init_db failed")));
    let ledger = Arc::new(ledger);

    let collaborators = Collaborators {
        store: repo.clone(),
        quotes: repo.clone(),
        conversion: Arc::new(MockConversion::new(calls, d("5"))),
        ledger: ledger.clone(),
        actions: repo.clone(),
        recommender: None,
    };
    let retry = RetryPolicy::immediate(Duration::from_millis(100));
    let engine = Arc::new(SettlementEngine::new(
        collaborators,
        SettlementPolicy::default(),
        retry,
    ));
    let dispatcher = JobDispatcher::new(engine, repo.clone()).with_retry(retry);

    Harness {
        repo,
        ledger,
        dispatcher,
        _temp: temp_dir,
    }
}

fn new_calls() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

#[tokio::test]
async fn test_deposit_job_settles_against_sqlite() {
    let h = setup(MockLedger::default(), new_calls()).await;
    let pool = PoolName::new("alpha");

    let job_id = h
        .repo
        .insert_job(
            &pool,
            "deposit",
            &json!({"request_ref": "dep-1", "account": "alice", "amount": "20"}),
        )
        .await
        .unwrap();

    let processed = tokio_test::assert_ok!(h.dispatcher.poll_once().await);
    assert_eq!(processed, 1);

    let job = h.repo.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    let result = job.result.unwrap();
    assert_eq!(result["action"], "deposit");
    assert_eq!(d(result["shares_minted"].as_str().unwrap()), d("99"));

    let holdings = h.repo.get_pool(&pool).await.unwrap().holdings;
    assert_eq!(holdings.amount(&AssetSymbol::new("USDC")), d("99"));
    assert_eq!(h.ledger.supply(&pool), d("99"));

    let kinds: Vec<ActionKind> = h
        .repo
        .list_actions(&pool, 10)
        .await
        .unwrap()
        .iter()
        .map(|a| a.kind)
        .collect();
    // Newest first.
    assert_eq!(kinds, vec![ActionKind::Deposit, ActionKind::Swap]);

    // Completed jobs are not picked up again.
    assert_eq!(h.dispatcher.poll_once().await.unwrap(), 0);
}

#[tokio::test]
async fn test_withdraw_job_liquidates_stored_holdings() {
    let pool = PoolName::new("alpha");
    let ledger = MockLedger::default()
        .with_supply(&pool, d("1000"))
        .with_escrow("wd-1", d("500"));
    let h = setup(ledger, new_calls()).await;

    h.repo
        .replace_pool_holdings(
            &pool,
            &Holdings::new()
                .with("USDC", d("100"))
                .with("Yes", d("500"))
                .with("No", d("250")),
        )
        .await
        .unwrap();
    h.repo
        .upsert_quote(&pool, &AssetSymbol::new("Yes"), &Quote::new(d("0.6"), d("0.61")))
        .await
        .unwrap();
    h.repo
        .upsert_quote(&pool, &AssetSymbol::new("No"), &Quote::new(d("0.4"), d("0.42")))
        .await
        .unwrap();

    let job_id = h
        .repo
        .insert_job(
            &pool,
            "withdraw",
            &json!({"request_ref": "wd-1", "account": "bob", "shares": "500"}),
        )
        .await
        .unwrap();
    h.dispatcher.poll_once().await.unwrap();

    let job = h.repo.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Complete);

    let holdings = h.repo.get_pool(&pool).await.unwrap().holdings;
    assert!(holdings.amount(&AssetSymbol::new("USDC")).is_zero());
    assert_eq!(holdings.amount(&AssetSymbol::new("Yes")), d("312.5"));
    assert_eq!(holdings.amount(&AssetSymbol::new("No")), d("156.25"));
    assert_eq!(h.ledger.supply(&pool), d("500"));
    assert_eq!(h.ledger.releases()[0].native_amount, d("49"));

    let actions = h.repo.list_actions(&pool, 10).await.unwrap();
    assert_eq!(actions.len(), 3);
    assert!(actions.iter().all(|a| a.job_id.as_deref() == Some(job_id.as_str())));
}

#[tokio::test]
async fn test_invalid_job_is_failed_without_side_effects() {
    let h = setup(MockLedger::default(), new_calls()).await;
    let pool = PoolName::new("alpha");

    let job_id = h
        .repo
        .insert_job(&pool, "deposit", &json!({"request_ref": "dep-x", "amount": "5"}))
        .await
        .unwrap();
    h.dispatcher.poll_once().await.unwrap();

    let job = h.repo.get_job(&job_id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.result.unwrap()["kind"], "malformed");
    assert!(h.repo.get_pool(&pool).await.unwrap().holdings.is_empty());
    assert!(h.repo.list_actions(&pool, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_oversized_job_fails_and_next_job_runs() {
    let h = setup(MockLedger::default(), new_calls()).await;
    let pool = PoolName::new("alpha");

    let huge = h
        .repo
        .insert_job(
            &pool,
            "deposit",
            &json!({"request_ref": "dep-big", "account": "alice", "amount": "20000000000000000000000000000"}),
        )
        .await
        .unwrap();
    let small = h
        .repo
        .insert_job(
            &pool,
            "deposit",
            &json!({"request_ref": "dep-ok", "account": "bob", "amount": "2"}),
        )
        .await
        .unwrap();
    assert_eq!(h.dispatcher.poll_once().await.unwrap(), 2);

    let job = h.repo.get_job(&huge).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.result.unwrap()["kind"], "malformed");

    let job = h.repo.get_job(&small).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(h.ledger.supply(&pool), d("9.9"));
}
