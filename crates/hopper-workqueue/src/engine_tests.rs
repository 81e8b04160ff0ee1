use super::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32};

use chrono::Duration as ChronoDuration;
use parking_lot::Mutex as SyncMutex;
use tempfile::TempDir;

use crate::handler::handler_fn;
use crate::job::JobStatus;
use crate::priority;
use crate::store::{MemoryJobStore, SqliteJobStore};

fn test_config() -> QueueConfig {
    QueueConfig {
        poll_interval_ms: 50,
        shutdown_grace_secs: 5,
        ..Default::default()
    }
}

fn memory_queue(config: QueueConfig) -> JobQueue {
    JobQueue::new(config, Arc::new(MemoryJobStore::new()))
}

/// Register a handler that counts calls and always fails with `message`.
fn register_failing(queue: &JobQueue, job_type: &str, message: &'static str) -> Arc<AtomicU32> {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    queue.register_handler(job_type, handler_fn(move |_job| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Err(JobError::retryable(message)) }
    }));
    calls
}

fn register_counting(queue: &JobQueue, job_type: &str) -> Arc<SyncMutex<Vec<Uuid>>> {
    let seen = Arc::new(SyncMutex::new(Vec::new()));
    let sink = seen.clone();
    queue.register_handler(job_type, handler_fn(move |job: Job| {
        sink.lock().push(job.id);
        async { Ok(()) }
    }));
    seen
}

async fn wait_for_status(queue: &JobQueue, id: Uuid, status: JobStatus) -> Job {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let job = queue.get_job(id).await.unwrap().unwrap();
        if job.status == status {
            return job;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} stuck in {} waiting for {}",
            id,
            job.status,
            status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_enqueue_defaults() {
    let queue = memory_queue(test_config());
    let before = Utc::now();
    let id = queue
        .enqueue("crawl_source", serde_json::json!({"sourceId": "s"}), EnqueueOptions::new())
        .await
        .unwrap();

    let job = queue.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.priority, priority::NORMAL);
    assert_eq!(job.max_retries, 3);
    assert_eq!(job.retry_count, 0);
    assert!(job.scheduled_at >= before && job.scheduled_at <= Utc::now());
    assert_eq!(job.payload["sourceId"], "s");
}

#[tokio::test]
async fn test_enqueue_options_override_config() {
    let queue = memory_queue(test_config());
    let later = Utc::now() + ChronoDuration::hours(2);
    let id = queue
        .enqueue(
            "t",
            serde_json::Value::Null,
            EnqueueOptions::new().priority(priority::HIGH).max_retries(1).scheduled_at(later),
        )
        .await
        .unwrap();

    let job = queue.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.priority, priority::HIGH);
    assert_eq!(job.max_retries, 1);
    assert_eq!(job.scheduled_at, later);

    // Not eligible yet.
    assert_eq!(queue.poll_once().await.unwrap(), 0);
}

#[tokio::test]
async fn test_enqueue_rejects_empty_type() {
    let queue = memory_queue(test_config());
    let result = queue.enqueue("  ", serde_json::Value::Null, EnqueueOptions::new()).await;
    assert!(matches!(result, Err(QueueError::InvalidJob(_))));
}

async fn assert_crawl_grant_scenario(queue: JobQueue) {
    let calls = register_failing(&queue, "crawl_grant_source", "source unreachable");

    let id = queue
        .enqueue(
            "crawl_grant_source",
            serde_json::json!({"sourceId": "abc"}),
            EnqueueOptions::new().priority(9).max_retries(2),
        )
        .await
        .unwrap();
    let t0 = Utc::now();

    // Attempt 1.
    assert_eq!(queue.poll_at(t0).await.unwrap(), 1);
    let job = queue.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Retry);
    assert_eq!(job.retry_count, 1);
    let delay = (job.scheduled_at - t0).num_milliseconds();
    assert!((59_990..61_000).contains(&delay), "first delay {}ms", delay);

    // Backoff not elapsed: nothing to claim.
    assert_eq!(queue.poll_at(t0 + ChronoDuration::seconds(30)).await.unwrap(), 0);

    // Attempt 2.
    let t1 = t0 + ChronoDuration::seconds(61);
    assert_eq!(queue.poll_at(t1).await.unwrap(), 1);
    let job = queue.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Retry);
    assert_eq!(job.retry_count, 2);
    let delay = (job.scheduled_at - t1).num_milliseconds();
    assert!((299_990..301_000).contains(&delay), "second delay {}ms", delay);

    // Attempt 3 exhausts the retries.
    let t2 = t1 + ChronoDuration::seconds(301);
    assert_eq!(queue.poll_at(t2).await.unwrap(), 1);
    let job = queue.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 2);
    assert_eq!(job.error_message.as_deref(), Some("source unreachable"));
    assert!(job.completed_at.is_some());

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(queue.poll_at(t2 + ChronoDuration::days(1)).await.unwrap(), 0);
}

#[tokio::test]
async fn test_crawl_grant_source_scenario_memory() {
    assert_crawl_grant_scenario(memory_queue(test_config())).await;
}

#[tokio::test]
async fn test_crawl_grant_source_scenario_sqlite() {
    let store = Arc::new(SqliteJobStore::in_memory().await.unwrap());
    assert_crawl_grant_scenario(JobQueue::new(test_config(), store)).await;
}

#[tokio::test]
async fn test_terminal_exhaustion_after_k_plus_one_attempts() {
    for k in 0..=4u32 {
        let queue = memory_queue(test_config());
        let calls = register_failing(&queue, "flaky", "nope");
        let id = queue
            .enqueue("flaky", serde_json::Value::Null, EnqueueOptions::new().max_retries(k))
            .await
            .unwrap();

        // Far enough ahead that every backoff has elapsed.
        let mut at = Utc::now();
        for _ in 0..10 {
            queue.poll_at(at).await.unwrap();
            at += ChronoDuration::hours(1);
        }

        let job = queue.get_job(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed, "k = {}", k);
        assert_eq!(job.retry_count, k, "k = {}", k);
        assert_eq!(calls.load(Ordering::SeqCst), k + 1, "k = {}", k);
    }
}

#[tokio::test]
async fn test_retry_monotonicity() {
    let queue = memory_queue(test_config());
    register_failing(&queue, "flaky", "again");
    let id = queue
        .enqueue("flaky", serde_json::Value::Null, EnqueueOptions::new().max_retries(5))
        .await
        .unwrap();

    let mut previous = queue.get_job(id).await.unwrap().unwrap();
    let mut at = Utc::now();
    for _ in 0..5 {
        queue.poll_at(at).await.unwrap();
        let current = queue.get_job(id).await.unwrap().unwrap();
        assert_eq!(current.status, JobStatus::Retry);
        assert_eq!(current.retry_count, previous.retry_count + 1);
        assert!(current.scheduled_at > previous.scheduled_at);
        at = current.scheduled_at;
        previous = current;
    }
}

#[tokio::test]
async fn test_permanent_error_skips_retries() {
    let queue = memory_queue(test_config());
    queue.register_handler("strict", handler_fn(|_job| async {
        Err(JobError::permanent("payload missing sourceId"))
    }));

    let id = queue.enqueue("strict", serde_json::json!({}), EnqueueOptions::new()).await.unwrap();
    queue.poll_once().await.unwrap();

    let job = queue.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 0);
    assert_eq!(job.error_message.as_deref(), Some("payload missing sourceId"));
}

#[tokio::test]
async fn test_unregistered_type_fails_immediately() {
    let queue = memory_queue(test_config());
    let id = queue.enqueue("nobody_handles_this", serde_json::Value::Null, EnqueueOptions::new())
        .await
        .unwrap();
    queue.poll_once().await.unwrap();

    let job = queue.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 0);
    assert!(job.error_message.unwrap().contains("nobody_handles_this"));
    assert_eq!(queue.missing_handlers(["nobody_handles_this"]), vec!["nobody_handles_this"]);
}

#[tokio::test]
async fn test_priority_ordering() {
    let config = QueueConfig {
        batch_size: 1,
        ..test_config()
    };
    let queue = memory_queue(config);
    let order = register_counting(&queue, "t");

    let at = Utc::now() - ChronoDuration::seconds(1);
    let b = queue
        .enqueue("t", serde_json::json!("B"), EnqueueOptions::new().priority(1).scheduled_at(at))
        .await
        .unwrap();
    let a = queue
        .enqueue("t", serde_json::json!("A"), EnqueueOptions::new().priority(9).scheduled_at(at))
        .await
        .unwrap();

    assert_eq!(queue.poll_once().await.unwrap(), 1);
    assert_eq!(queue.poll_once().await.unwrap(), 1);
    assert_eq!(*order.lock(), vec![a, b]);
}

#[tokio::test]
async fn test_concurrent_polls_never_double_invoke() {
    let config = QueueConfig {
        batch_size: 3,
        max_workers: 32,
        ..test_config()
    };
    let queue = Arc::new(memory_queue(config));
    let seen = register_counting(&queue, "t");

    let mut ids = HashSet::new();
    for i in 0..40 {
        let id = queue
            .enqueue("t", serde_json::json!(i), EnqueueOptions::new().priority(i % 4))
            .await
            .unwrap();
        ids.insert(id);
    }

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let queue = queue.clone();
        tasks.push(tokio::spawn(async move {
            while queue.poll_once().await.unwrap() > 0 {}
        }));
    }
    for task in futures::future::join_all(tasks).await {
        task.unwrap();
    }

    let seen = seen.lock().clone();
    assert_eq!(seen.len(), 40);
    assert_eq!(seen.into_iter().collect::<HashSet<_>>(), ids);
}

#[tokio::test]
async fn test_two_engines_share_sqlite_store() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("jobs.db");

    let first = Arc::new(JobQueue::new(
        test_config(),
        Arc::new(SqliteJobStore::open(&path, Duration::from_secs(5)).await.unwrap()),
    ));
    let second = Arc::new(JobQueue::new(
        test_config(),
        Arc::new(SqliteJobStore::open(&path, Duration::from_secs(5)).await.unwrap()),
    ));
    let seen = Arc::new(SyncMutex::new(Vec::new()));
    for queue in [&first, &second] {
        let sink = seen.clone();
        queue.register_handler("t", handler_fn(move |job: Job| {
            sink.lock().push(job.id);
            async { Ok(()) }
        }));
    }

    for i in 0..30 {
        first.enqueue("t", serde_json::json!(i), EnqueueOptions::new()).await.unwrap();
    }

    let drain = |queue: Arc<JobQueue>| {
        tokio::spawn(async move { while queue.poll_once().await.unwrap() > 0 {} })
    };
    let (a, b) = tokio::join!(drain(first.clone()), drain(second.clone()));
    a.unwrap();
    b.unwrap();

    let seen = seen.lock().clone();
    let unique: HashSet<Uuid> = seen.iter().copied().collect();
    assert_eq!(seen.len(), 30);
    assert_eq!(unique.len(), 30);
    assert_eq!(first.stats().await.unwrap().count(JobStatus::Completed), 30);
}

#[tokio::test]
async fn test_start_stop_idempotent() {
    let queue = memory_queue(test_config());
    assert!(!queue.is_running());

    // Stopping a stopped engine is a no-op.
    queue.stop().await;
    assert!(!queue.is_running());

    queue.start().await.unwrap();
    let first_token = queue.poll_loop.lock().await.as_ref().map(|l| l.shutdown.clone()).unwrap();
    queue.start().await.unwrap();
    assert!(queue.is_running());

    // The second start kept the first loop: cancelling its token is visible
    // through the stored one.
    first_token.cancel();
    let stored = queue.poll_loop.lock().await.as_ref().map(|l| l.shutdown.is_cancelled());
    assert_eq!(stored, Some(true));

    queue.stop().await;
    assert!(!queue.is_running());
    queue.stop().await;
    assert!(!queue.is_running());

    // Restartable.
    queue.start().await.unwrap();
    assert!(queue.is_running());
    queue.stop().await;
}

#[tokio::test]
async fn test_running_loop_processes_enqueued_jobs() {
    // Long interval: the enqueue wake-up must trigger the claim.
    let config = QueueConfig {
        poll_interval_ms: 60_000,
        ..test_config()
    };
    let queue = memory_queue(config);
    register_counting(&queue, "t");
    queue.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let id = queue.enqueue("t", serde_json::Value::Null, EnqueueOptions::new()).await.unwrap();
    let job = wait_for_status(&queue, id, JobStatus::Completed).await;
    assert!(job.started_at.is_some());
    assert!(job.completed_at >= job.started_at);

    queue.stop().await;
}

#[tokio::test]
async fn test_cancel_pending_job() {
    let queue = memory_queue(test_config());
    let id = queue
        .enqueue(
            "t",
            serde_json::Value::Null,
            EnqueueOptions::new().scheduled_at(Utc::now() + ChronoDuration::hours(1)),
        )
        .await
        .unwrap();

    assert!(queue.cancel_job(id).await.unwrap());
    let job = queue.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some(CANCELLED_BY_USER));

    assert!(!queue.cancel_job(id).await.unwrap());
    assert!(!queue.cancel_job(Uuid::new_v4()).await.unwrap());
}

#[tokio::test]
async fn test_cancel_race_with_claim() {
    let queue = Arc::new(memory_queue(test_config()));
    let entered = Arc::new(tokio::sync::Notify::new());
    let release = Arc::new(tokio::sync::Notify::new());
    {
        let entered = entered.clone();
        let release = release.clone();
        queue.register_handler("slow", handler_fn(move |_job| {
            let entered = entered.clone();
            let release = release.clone();
            async move {
                entered.notify_one();
                release.notified().await;
                Ok(())
            }
        }));
    }

    let id = queue.enqueue("slow", serde_json::Value::Null, EnqueueOptions::new()).await.unwrap();
    let poller = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.poll_once().await.unwrap() })
    };

    entered.notified().await;
    assert_eq!(queue.get_job(id).await.unwrap().unwrap().status, JobStatus::Processing);
    assert!(!queue.cancel_job(id).await.unwrap());

    release.notify_one();
    assert_eq!(poller.await.unwrap(), 1);

    let job = queue.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.error_message.is_none());
}

#[tokio::test]
async fn test_start_recovers_stalled_jobs() {
    let store = Arc::new(MemoryJobStore::new());
    let config = QueueConfig {
        job_timeout_secs: Some(600),
        ..test_config()
    };
    let queue = JobQueue::new(config, store.clone());

    let long_ago = Utc::now() - ChronoDuration::hours(2);
    let stalled = Job::new("t", serde_json::Value::Null).with_scheduled_at(long_ago);
    let exhausted = Job::new("t", serde_json::Value::Null)
        .with_scheduled_at(long_ago)
        .with_max_retries(0);
    store.insert(&stalled).await.unwrap();
    store.insert(&exhausted).await.unwrap();
    store.claim_batch(long_ago, 10).await.unwrap();

    assert_eq!(queue.recover_stalled().await.unwrap(), 2);

    let recovered = queue.get_job(stalled.id).await.unwrap().unwrap();
    assert_eq!(recovered.status, JobStatus::Retry);
    assert_eq!(recovered.retry_count, 1);
    assert_eq!(recovered.error_message.as_deref(), Some(ABANDONED));

    let failed = queue.get_job(exhausted.id).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);

    // Nothing left to recover.
    assert_eq!(queue.recover_stalled().await.unwrap(), 0);
}

#[tokio::test]
async fn test_health_reflects_loop_state() {
    let queue = memory_queue(test_config());

    let health = queue.health().await;
    assert!(health.store_reachable);
    assert!(!health.engine_running);
    assert!(!health.is_healthy());
    assert!(health.last_poll_at.is_none());

    queue.start().await.unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while queue.last_poll_at().is_none() {
        assert!(tokio::time::Instant::now() < deadline);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let health = queue.health().await;
    assert!(health.is_healthy(), "{:?}", health);

    queue.stop().await;
    let health = queue.health().await;
    assert!(!health.engine_running);
    assert_eq!(health.status, crate::health::HealthStatus::Degraded);
}

#[tokio::test]
async fn test_stats_counts_by_status() {
    let queue = memory_queue(test_config());
    register_counting(&queue, "ok");
    queue.register_handler("bad", handler_fn(|_job| async { Err(JobError::permanent("no")) }));

    queue.enqueue("ok", serde_json::Value::Null, EnqueueOptions::new()).await.unwrap();
    queue.enqueue("ok", serde_json::Value::Null, EnqueueOptions::new()).await.unwrap();
    queue.enqueue("bad", serde_json::Value::Null, EnqueueOptions::new()).await.unwrap();
    queue
        .enqueue(
            "ok",
            serde_json::Value::Null,
            EnqueueOptions::new().scheduled_at(Utc::now() + ChronoDuration::hours(1)),
        )
        .await
        .unwrap();
    queue.poll_once().await.unwrap();

    let stats = queue.stats().await.unwrap();
    assert_eq!(stats.count(JobStatus::Completed), 2);
    assert_eq!(stats.count(JobStatus::Failed), 1);
    assert_eq!(stats.count(JobStatus::Pending), 1);
    assert!(stats.get(JobStatus::Completed).avg_duration_secs.is_some());
}

#[tokio::test]
async fn test_last_registration_wins() {
    let queue = memory_queue(test_config());
    register_failing(&queue, "t", "old handler");
    let seen = register_counting(&queue, "t");

    let id = queue.enqueue("t", serde_json::Value::Null, EnqueueOptions::new()).await.unwrap();
    queue.poll_once().await.unwrap();

    assert_eq!(*seen.lock(), vec![id]);
    assert_eq!(queue.get_job(id).await.unwrap().unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn test_stalled_jobs_kept_without_deadline() {
    let store = Arc::new(MemoryJobStore::new());
    let queue = JobQueue::new(test_config(), store.clone());

    let long_ago = Utc::now() - ChronoDuration::hours(2);
    let job = Job::new("t", serde_json::Value::Null).with_scheduled_at(long_ago);
    store.insert(&job).await.unwrap();
    store.claim_batch(long_ago, 1).await.unwrap();

    assert_eq!(queue.recover_stalled().await.unwrap(), 0);
    assert_eq!(queue.get_job(job.id).await.unwrap().unwrap().status, JobStatus::Processing);

    // A per-type deadline under the stale timeout is enough.
    queue.register_handler_with_timeout("t", handler_fn(|_job| async { Ok(()) }), Duration::from_secs(60));
    assert_eq!(queue.recover_stalled().await.unwrap(), 1);
    assert_eq!(queue.get_job(job.id).await.unwrap().unwrap().status, JobStatus::Retry);
}

/// Handler shared by two engines: counts runs and blocks until released.
fn register_blocking(
    queue: &JobQueue,
    calls: Arc<AtomicU32>,
    entered: Arc<tokio::sync::Notify>,
    release: Arc<tokio::sync::Notify>,
    result: Result<(), JobError>,
) {
    queue.register_handler("slow", handler_fn(move |_job| {
        calls.fetch_add(1, Ordering::SeqCst);
        let entered = entered.clone();
        let release = release.clone();
        let result = result.clone();
        async move {
            entered.notify_one();
            release.notified().await;
            result
        }
    }));
}

#[tokio::test]
async fn test_second_engine_leaves_live_claim_alone() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let config = QueueConfig {
        stale_after_secs: 1,
        backoff_secs: vec![0],
        ..test_config()
    };
    let first = Arc::new(JobQueue::new(config.clone(), store.clone()));
    let second = JobQueue::new(config, store);

    let calls = Arc::new(AtomicU32::new(0));
    let entered = Arc::new(tokio::sync::Notify::new());
    let release = Arc::new(tokio::sync::Notify::new());
    register_blocking(&first, calls.clone(), entered.clone(), release.clone(), Ok(()));
    register_blocking(&second, calls.clone(), entered.clone(), release.clone(), Ok(()));

    let id = first.enqueue("slow", serde_json::Value::Null, EnqueueOptions::new()).await.unwrap();
    let poller = {
        let first = first.clone();
        tokio::spawn(async move { first.poll_once().await.unwrap() })
    };
    entered.notified().await;

    // The claim is now older than the stale timeout but the handler is still running.
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(second.recover_stalled().await.unwrap(), 0);
    assert_eq!(second.poll_once().await.unwrap(), 0);
    assert_eq!(second.get_job(id).await.unwrap().unwrap().status, JobStatus::Processing);

    release.notify_one();
    assert_eq!(poller.await.unwrap(), 1);

    let job = first.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.retry_count, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_late_outcome_of_recovered_claim_is_discarded() {
    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let config = QueueConfig {
        job_timeout_secs: Some(600),
        backoff_secs: vec![0],
        ..test_config()
    };
    let first = Arc::new(JobQueue::new(config.clone(), store.clone()));
    let second = JobQueue::new(config, store);

    let calls = Arc::new(AtomicU32::new(0));
    let entered = Arc::new(tokio::sync::Notify::new());
    let release = Arc::new(tokio::sync::Notify::new());
    register_blocking(
        &first,
        calls.clone(),
        entered.clone(),
        release.clone(),
        Err(JobError::permanent("late failure")),
    );
    let second_seen = register_counting(&second, "slow");

    // Claimed two hours in the past, so the claim already looks abandoned.
    let long_ago = Utc::now() - ChronoDuration::hours(2);
    let id = first
        .enqueue("slow", serde_json::Value::Null, EnqueueOptions::new().scheduled_at(long_ago))
        .await
        .unwrap();
    let poller = {
        let first = first.clone();
        tokio::spawn(async move { first.poll_at(long_ago).await.unwrap() })
    };
    entered.notified().await;

    assert_eq!(second.recover_stalled().await.unwrap(), 1);
    assert_eq!(second.poll_once().await.unwrap(), 1);
    assert_eq!(second_seen.lock().as_slice(), &[id]);

    release.notify_one();
    assert_eq!(poller.await.unwrap(), 1);

    let job = second.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.retry_count, 1);
    assert!(!job.error_message.unwrap_or_default().contains("late failure"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

/// Memory store whose claims or outcome writes can be made to fail.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryJobStore,
    fail_claims: AtomicBool,
    fail_outcomes: AtomicBool,
}

impl FlakyStore {
    fn check(flag: &AtomicBool) -> Result<(), QueueError> {
        if flag.load(Ordering::SeqCst) {
            return Err(QueueError::Store("database is locked".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl JobStore for FlakyStore {
    async fn insert(&self, job: &Job) -> Result<(), QueueError> {
        self.inner.insert(job).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, QueueError> {
        self.inner.get(id).await
    }

    async fn claim_batch(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Job>, QueueError> {
        Self::check(&self.fail_claims)?;
        self.inner.claim_batch(now, limit).await
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        Self::check(&self.fail_outcomes)?;
        self.inner.mark_completed(id, claimed_at, now).await
    }

    async fn mark_retry(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        retry_count: u32,
        scheduled_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        Self::check(&self.fail_outcomes)?;
        self.inner
            .mark_retry(id, claimed_at, retry_count, scheduled_at, error, now)
            .await
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        claimed_at: DateTime<Utc>,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        Self::check(&self.fail_outcomes)?;
        self.inner.mark_failed(id, claimed_at, error, now).await
    }

    async fn cancel_pending(&self, id: Uuid, reason: &str, now: DateTime<Utc>) -> Result<bool, QueueError> {
        self.inner.cancel_pending(id, reason, now).await
    }

    async fn find_stalled(&self, started_before: DateTime<Utc>) -> Result<Vec<Job>, QueueError> {
        self.inner.find_stalled(started_before).await
    }

    async fn status_stats(&self, since: DateTime<Utc>) -> Result<JobStats, QueueError> {
        self.inner.status_stats(since).await
    }

    async fn purge_finished(&self, before: DateTime<Utc>) -> Result<u64, QueueError> {
        self.inner.purge_finished(before).await
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.inner.ping().await
    }
}

#[tokio::test]
async fn test_claim_error_skips_cycle_then_recovers() {
    let store = Arc::new(FlakyStore::default());
    store.fail_claims.store(true, Ordering::SeqCst);
    let queue = JobQueue::new(test_config(), store.clone());
    let seen = register_counting(&queue, "t");

    let id = queue.enqueue("t", serde_json::Value::Null, EnqueueOptions::new()).await.unwrap();
    assert!(matches!(queue.poll_once().await, Err(QueueError::Store(_))));

    // The running loop keeps ticking through the errors without touching the row.
    queue.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let job = queue.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert!(job.started_at.is_none());
    assert_eq!(job.retry_count, 0);
    assert!(seen.lock().is_empty());
    assert!(queue.last_poll_at().is_some());

    store.fail_claims.store(false, Ordering::SeqCst);
    wait_for_status(&queue, id, JobStatus::Completed).await;
    assert_eq!(seen.lock().as_slice(), &[id]);

    queue.stop().await;
}

#[tokio::test]
async fn test_outcome_write_error_leaves_job_processing() {
    let store = Arc::new(FlakyStore::default());
    let config = QueueConfig {
        job_timeout_secs: Some(600),
        ..test_config()
    };
    let queue = JobQueue::new(config, store.clone());
    let calls = register_failing(&queue, "t", "boom");

    let long_ago = Utc::now() - ChronoDuration::hours(2);
    let id = queue
        .enqueue("t", serde_json::Value::Null, EnqueueOptions::new().scheduled_at(long_ago))
        .await
        .unwrap();

    store.fail_outcomes.store(true, Ordering::SeqCst);
    assert_eq!(queue.poll_at(long_ago).await.unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let job = queue.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Processing);
    assert_eq!(job.retry_count, 0);
    assert!(job.error_message.is_none());

    // Once writes succeed again the stalled claim is recovered as a failed attempt.
    store.fail_outcomes.store(false, Ordering::SeqCst);
    assert_eq!(queue.recover_stalled().await.unwrap(), 1);
    let job = queue.get_job(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Retry);
    assert_eq!(job.retry_count, 1);
    assert_eq!(job.error_message.as_deref(), Some(ABANDONED));
}
