//! Integration tests for the dispatcher
//!
//! These tests drive the public API end-to-end: configuration parsing, the
//! worker pool against wiremock servers, and snapshot persistence.

use std::sync::Arc;
use std::time::{Duration, Instant};
use sumi_dispatch::config::{parse_config, Config};
use sumi_dispatch::storage::{SqliteStorage, Storage};
use sumi_dispatch::worker::{run_pool, run_worker, Fetcher};
use sumi_dispatch::{
    LeaseResponse, NoWorkReason, Outcome, ReportAck, ReportDetail, Scheduler, TaskState,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration fetching directly with fast politeness
fn create_test_config(seeds: &[String]) -> Config {
    let seeds = seeds
        .iter()
        .map(|s| format!("\"{}\"", s))
        .collect::<Vec<_>>()
        .join(", ");

    parse_config(&format!(
        r#"
seeds = [{}]

[scheduler]
max-retries = 2
lease-duration-ms = 5000

[proxy-pool]
proxies = ["direct"]

[throttle]
max-concurrency = 2
min-interval-ms = 5

[worker]
count = 4
request-timeout-ms = 5000
"#,
        seeds
    ))
    .expect("test config should parse")
}

#[tokio::test]
async fn test_full_crawl_and_resume() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(&server)
        .await;

    let base = server.uri();
    let seeds: Vec<String> = (0..6)
        .map(|i| format!("{}/page/{}", base, i))
        .chain([format!("{}/missing", base), format!("{}/page/0/#dup", base)])
        .collect();
    let config = create_test_config(&seeds);

    let scheduler = Arc::new(Scheduler::new(&config));
    let admitted = config
        .seeds
        .iter()
        .filter(|seed| scheduler.enqueue(seed, 0).unwrap().is_some())
        .count();
    assert_eq!(admitted, 7);

    run_pool(Arc::clone(&scheduler), &config).await.unwrap();

    let stats = scheduler.stats();
    assert_eq!(stats.tasks_in(TaskState::Completed), 6);
    assert_eq!(stats.tasks_in(TaskState::Dead), 1);
    assert!(scheduler.is_drained());
    for domain in &stats.domains {
        assert_eq!(domain.active, 0);
    }

    // Persist and resume: nothing is re-fetched, seen URLs stay seen
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("dispatch.db");
    let mut storage = SqliteStorage::new(&db_path).unwrap();
    storage.save_snapshot(&scheduler.snapshot(), "hash").unwrap();

    let snapshot = storage.load_snapshot().unwrap().unwrap();
    let resumed = Scheduler::restore(&config, snapshot);
    assert!(resumed.is_drained());
    assert_eq!(resumed.enqueue(&format!("{}/page/3", base), 0).unwrap(), None);
    assert!(resumed.enqueue(&format!("{}/page/99", base), 0).unwrap().is_some());
}

#[tokio::test]
async fn test_crash_recovery_returns_leases() {
    let config = create_test_config(&[]);
    let scheduler = Scheduler::new(&config);
    let id = scheduler.enqueue("https://example.com/a", 0).unwrap().unwrap();

    let lease = scheduler.request_lease("w1").unwrap().lease().unwrap();
    assert_eq!(lease.task_id, id);

    let dir = tempfile::tempdir().unwrap();
    let mut storage = SqliteStorage::new(&dir.path().join("dispatch.db")).unwrap();
    storage.save_snapshot(&scheduler.snapshot(), "hash").unwrap();
    drop(scheduler);

    let restored = Scheduler::restore(&config, storage.load_snapshot().unwrap().unwrap());
    let task = restored.task(id).unwrap();
    assert_eq!(task.state, TaskState::Pending);
    assert_eq!(task.retry_count, 0);

    // The old lease belongs to a scheduler that no longer exists
    let ack = restored
        .report(&lease, Outcome::Success, ReportDetail::default())
        .unwrap();
    assert!(matches!(ack, ReportAck::Ignored(_)));
    assert!(restored.request_lease("w2").unwrap().is_granted());
}

#[test]
fn test_politeness_spacing() {
    let mut config = create_test_config(&[]);
    config.throttle.max_concurrency = 1;
    config.throttle.min_interval_ms = 1000;
    let scheduler = Scheduler::new(&config);
    for i in 0..3 {
        scheduler
            .enqueue(&format!("https://polite.com/{}", i), 0)
            .unwrap();
    }

    let t = Instant::now();
    let lease = scheduler.request_lease_at("w1", t).unwrap().lease().unwrap();
    scheduler
        .report_at(&lease, Outcome::Success, ReportDetail::default(), t)
        .unwrap();

    match scheduler
        .request_lease_at("w1", t + Duration::from_millis(400))
        .unwrap()
    {
        LeaseResponse::NoWork {
            reason,
            retry_after,
        } => {
            assert_eq!(reason, NoWorkReason::Throttled);
            assert!(retry_after >= Duration::from_millis(600));
            assert!(retry_after < Duration::from_millis(1000));
        }
        LeaseResponse::Granted(lease) => panic!("lease {} granted too early", lease.task_id),
    }

    assert!(scheduler
        .request_lease_at("w1", t + Duration::from_millis(1000))
        .unwrap()
        .is_granted());
}

#[tokio::test]
async fn test_rate_limited_domain_is_tightened() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let mut config = create_test_config(&[]);
    config.scheduler.max_retries = 0;
    let scheduler = Arc::new(Scheduler::new(&config));
    let id = scheduler
        .enqueue(&format!("{}/busy", server.uri()), 0)
        .unwrap()
        .unwrap();

    let fetcher = Arc::new(Fetcher::new(&config.worker));
    let summary = run_worker(Arc::clone(&scheduler), "w1".to_string(), fetcher)
        .await
        .unwrap();
    assert_eq!(summary.fetched, 1);

    let task = scheduler.task(id).unwrap();
    assert_eq!(task.state, TaskState::Dead);
    assert_eq!(task.last_error.as_deref(), Some("HTTP 429"));

    let domain = scheduler.domain("127.0.0.1").unwrap();
    assert_eq!(domain.target_concurrency, 1);
    assert!(domain.min_interval > config.throttle.min_interval());
}
