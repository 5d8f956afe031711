//! End-to-end engine behavior against an in-process GetWork upstream

use epoch_client::config::EngineConfig;
use epoch_client::pow::{self, Blake2sPow, PowHasher};
use epoch_client::transport::MemoryUpstream;
use epoch_client::types::{JobTemplate, PowHash, Work, MINIBLOCK_SIZE};
use epoch_client::{Engine, EngineBuilder, Error};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const ADDRESS: &str = "dero1qy0khp9s9yw2h0eu20xmy9lth3zp5cacmx3rwt6k45l568d2mmcf6qgcsevzx";
const DAEMON: &str = "127.0.0.1:10102";

/// Difficulty every hash meets
const EASY: &str = "1";
/// Difficulty no test hash will meet
const HARD: &str = "18446744073709551615";

fn job(id: &str, difficulty: &str) -> JobTemplate {
    JobTemplate {
        job_id: id.to_string(),
        blockhashing_blob: format!("01{}", "00".repeat(MINIBLOCK_SIZE - 1)),
        difficulty: difficulty.to_string(),
        height: 100,
        ..Default::default()
    }
}

fn builder(upstream: &MemoryUpstream) -> EngineBuilder {
    let config = EngineConfig {
        max_threads: 2,
        ..Default::default()
    };
    Engine::builder(config).connector(upstream.clone())
}

async fn start(engine: &Engine, upstream: &MemoryUpstream, template: JobTemplate) {
    engine.start(ADDRESS, DAEMON).await.unwrap();
    let id = template.job_id.clone();
    assert!(upstream.push_job(template));
    engine.wait_for_job(Duration::from_secs(2)).await.unwrap();

    for _ in 0..100 {
        if engine.get_job().job_id == id {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never arrived", id);
}

/// Blake2s hasher that sleeps and records peak concurrency
struct SlowHasher {
    delay: Duration,
    running: AtomicUsize,
    peak: Arc<AtomicUsize>,
}

impl SlowHasher {
    fn new(delay: Duration, peak: Arc<AtomicUsize>) -> Self {
        Self {
            delay,
            running: AtomicUsize::new(0),
            peak,
        }
    }
}

impl PowHasher for SlowHasher {
    fn hash(&self, work: &Work) -> PowHash {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.running.fetch_sub(1, Ordering::SeqCst);
        Blake2sPow.hash(work)
    }
}

#[tokio::test]
async fn test_operations_fail_when_inactive() {
    let upstream = MemoryUpstream::new();
    let engine = builder(&upstream).build().unwrap();

    assert!(matches!(engine.attempt_hashes(1).await, Err(Error::Inactive)));
    assert!(matches!(
        engine.submit_hashes(Vec::new()).await,
        Err(Error::Inactive)
    ));
    assert!(matches!(
        engine.wait_for_job(Duration::from_millis(50)).await,
        Err(Error::Timeout { .. })
    ));

    // Stopping an engine that never started is a no-op
    engine.stop().await;
    assert!(!engine.is_active());
}

#[tokio::test]
async fn test_capacity_rejection_leaves_session_unchanged() {
    let upstream = MemoryUpstream::new();
    let engine = builder(&upstream).build().unwrap();
    engine.set_max_hashes(10).unwrap();
    start(&engine, &upstream, job("job-1", EASY)).await;

    let err = engine.attempt_hashes(11).await.unwrap_err();
    assert!(matches!(err, Error::Capacity { requested: 11, limit: 10 }));

    let too_many = vec![Default::default(); 11];
    assert!(matches!(
        engine.submit_hashes(too_many).await,
        Err(Error::Capacity { .. })
    ));

    let session = engine.get_session(Duration::from_secs(1)).await.unwrap();
    assert_eq!(session.hashes, 0);
    assert_eq!(session.miniblocks, 0);
    assert!(upstream.submissions().is_empty());

    engine.stop().await;
}

#[tokio::test]
async fn test_attempt_counts_hashes_and_rate() {
    let upstream = MemoryUpstream::new();
    let engine = builder(&upstream).build().unwrap();
    start(&engine, &upstream, job("job-1", HARD)).await;

    let result = engine.attempt_hashes(5).await.unwrap();
    assert!(result.is_ok());
    assert_eq!(result.hashes, 5);
    assert_eq!(result.submitted, 0);
    assert!(result.hash_per_sec > 0.0);
    assert!(upstream.submissions().is_empty());

    let session = engine.get_session(Duration::from_secs(1)).await.unwrap();
    assert_eq!(session.hashes, 5);
    assert_eq!(session.miniblocks, 0);

    engine.stop().await;
}

#[tokio::test]
async fn test_attempt_submits_valid_miniblocks() {
    let upstream = MemoryUpstream::new();
    let engine = builder(&upstream).build().unwrap();
    start(&engine, &upstream, job("job-7", EASY)).await;

    let result = engine.attempt_hashes(3).await.unwrap();
    assert_eq!(result.hashes, 3);
    assert_eq!(result.submitted, 3);

    let submissions = upstream.submissions();
    assert_eq!(submissions.len(), 3);
    for submission in &submissions {
        assert_eq!(submission.job_id, "job-7");
        assert_eq!(submission.miniblock_blob.len(), MINIBLOCK_SIZE * 2);
        // Version byte kept, final byte forced to 1
        assert!(submission.miniblock_blob.starts_with("01"));
        assert!(submission.miniblock_blob.ends_with("01"));
    }

    // Each attempt hashes a different randomized buffer
    assert_ne!(submissions[0].miniblock_blob, submissions[1].miniblock_blob);

    let session = engine.get_session(Duration::from_secs(1)).await.unwrap();
    assert_eq!(session.miniblocks, 3);

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_attempts_do_not_lose_updates() {
    let upstream = MemoryUpstream::new();
    let engine = Arc::new(builder(&upstream).build().unwrap());
    start(&engine, &upstream, job("job-1", HARD)).await;

    let first = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.attempt_hashes(25).await }
    });
    let second = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.attempt_hashes(25).await }
    });

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_eq!(first.hashes, 25);
    assert_eq!(second.hashes, 25);

    let session = engine.get_session(Duration::from_secs(1)).await.unwrap();
    assert_eq!(session.hashes, first.hashes + second.hashes);
    assert!(!engine.is_processing());

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_admission_caps_concurrent_hashing() {
    let upstream = MemoryUpstream::new();
    let peak = Arc::new(AtomicUsize::new(0));
    let engine = builder(&upstream)
        .hasher(SlowHasher::new(Duration::from_millis(5), Arc::clone(&peak)))
        .build()
        .unwrap();
    start(&engine, &upstream, job("job-1", HARD)).await;

    let result = engine.attempt_hashes(20).await.unwrap();
    assert_eq!(result.hashes, 20);
    assert!(peak.load(Ordering::SeqCst) >= 1);
    assert!(peak.load(Ordering::SeqCst) <= engine.max_threads());

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_get_session_waits_for_batch() {
    let upstream = MemoryUpstream::new();
    let engine = Arc::new(
        builder(&upstream)
            .hasher(SlowHasher::new(
                Duration::from_millis(100),
                Arc::new(AtomicUsize::new(0)),
            ))
            .build()
            .unwrap(),
    );
    start(&engine, &upstream, job("job-1", HARD)).await;

    let batch = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.attempt_hashes(4).await }
    });

    for _ in 0..100 {
        if engine.is_processing() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(engine.is_processing());

    let err = engine
        .get_session(Duration::from_millis(20))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));

    let session = engine.get_session(Duration::from_secs(5)).await.unwrap();
    assert_eq!(session.hashes, 4);

    let result = batch.await.unwrap().unwrap();
    assert_eq!(result.hashes, 4);

    engine.stop().await;
}

#[tokio::test]
async fn test_bad_blob_fails_tasks_not_batch() {
    let upstream = MemoryUpstream::new();
    let engine = builder(&upstream).build().unwrap();

    let mut bad = job("job-1", EASY);
    bad.blockhashing_blob = "0101".to_string();
    start(&engine, &upstream, bad).await;

    let result = engine.attempt_hashes(50).await.unwrap();
    let error = result.error.as_ref().unwrap();
    assert!(matches!(error, Error::Work { .. }));
    assert!(result.hashes >= 1);
    assert!(result.hashes < 50);
    assert_eq!(result.submitted, 0);

    // The engine stays usable
    assert!(engine.is_active());
    let session = engine.get_session(Duration::from_secs(1)).await.unwrap();
    assert_eq!(session.hashes, result.hashes);

    engine.stop().await;
}

#[tokio::test]
async fn test_submit_precomputed_hashes() {
    let upstream = MemoryUpstream::new();
    let engine = builder(&upstream).build().unwrap();
    start(&engine, &upstream, job("job-1", EASY)).await;

    let empty = engine.submit_hashes(Vec::new()).await.unwrap();
    assert_eq!(empty.hashes, 0);
    assert_eq!(empty.submitted, 0);
    assert!(empty.is_ok());

    let easy = job("job-2", EASY);
    let hard = job("job-3", HARD);
    let params = vec![
        pow::compute(easy.clone(), &Blake2sPow).unwrap(),
        pow::compute(easy, &Blake2sPow).unwrap(),
        pow::compute(hard, &Blake2sPow).unwrap(),
    ];

    let result = engine.submit_hashes(params).await.unwrap();
    assert!(result.is_ok());
    assert_eq!(result.hashes, 3);
    assert_eq!(result.submitted, 2);
    assert_eq!(result.hash_per_sec, 0.0);

    let submissions = upstream.submissions();
    assert_eq!(submissions.len(), 2);
    assert!(submissions.iter().all(|s| s.job_id == "job-2"));

    // Only the miniblock total grows on the submit path
    let session = engine.get_session(Duration::from_secs(1)).await.unwrap();
    assert_eq!(session.hashes, 0);
    assert_eq!(session.miniblocks, 2);

    engine.stop().await;
}

#[tokio::test]
async fn test_write_failure_is_scoped_to_task() {
    let upstream = MemoryUpstream::new();
    let engine = builder(&upstream).build().unwrap();
    start(&engine, &upstream, job("job-1", EASY)).await;

    upstream.fail_submissions(true);
    let result = engine.attempt_hashes(10).await.unwrap();
    assert!(matches!(result.error, Some(Error::Submission { .. })));
    assert_eq!(result.submitted, 0);
    assert!(engine.is_active());

    upstream.fail_submissions(false);
    let result = engine.attempt_hashes(2).await.unwrap();
    assert!(result.is_ok());
    assert_eq!(result.submitted, 2);

    engine.stop().await;
}

#[tokio::test]
async fn test_restart_resets_session() {
    let upstream = MemoryUpstream::new();
    let engine = builder(&upstream).build().unwrap();
    start(&engine, &upstream, job("job-1", EASY)).await;

    engine.attempt_hashes(3).await.unwrap();
    let session = engine.get_session(Duration::from_secs(1)).await.unwrap();
    assert_eq!(session.hashes, 3);
    assert_eq!(session.miniblocks, 3);

    assert!(matches!(
        engine.start(ADDRESS, DAEMON).await,
        Err(Error::AlreadyActive)
    ));

    engine.stop().await;
    engine.stop().await;
    assert!(!engine.is_active());

    start(&engine, &upstream, job("job-2", HARD)).await;
    let session = engine.get_session(Duration::from_secs(1)).await.unwrap();
    assert_eq!(session.hashes, 0);
    assert_eq!(session.miniblocks, 0);
    assert_eq!(upstream.connections(), 2);

    engine.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restart_during_batch_keeps_limit_and_session() {
    let upstream = MemoryUpstream::new();
    let peak = Arc::new(AtomicUsize::new(0));
    let config = EngineConfig {
        max_threads: 1,
        ..Default::default()
    };
    let engine = Arc::new(
        Engine::builder(config)
            .connector(upstream.clone())
            .hasher(SlowHasher::new(Duration::from_millis(10), Arc::clone(&peak)))
            .build()
            .unwrap(),
    );
    start(&engine, &upstream, job("job-1", HARD)).await;

    let first = tokio::spawn({
        let engine = Arc::clone(&engine);
        async move { engine.attempt_hashes(20).await }
    });
    for _ in 0..100 {
        if engine.is_processing() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(engine.is_processing());

    engine.stop().await;
    start(&engine, &upstream, job("job-2", HARD)).await;

    let second = engine.attempt_hashes(20).await.unwrap();
    assert!(second.is_ok());
    assert_eq!(second.hashes, 20);

    // The first batch ended with the connection it started on
    let first = first.await.unwrap().unwrap();
    assert!(first.hashes < 20);
    assert!(matches!(first.error, Some(Error::Submission { .. })));

    assert!(peak.load(Ordering::SeqCst) <= engine.max_threads());
    let session = engine.get_session(Duration::from_secs(1)).await.unwrap();
    assert_eq!(session.hashes, 20);
    assert_eq!(session.miniblocks, 0);

    engine.stop().await;
}

#[tokio::test]
async fn test_failed_start_keeps_previous_job() {
    let upstream = MemoryUpstream::new();
    let engine = builder(&upstream).build().unwrap();
    start(&engine, &upstream, job("job-1", HARD)).await;
    engine.stop().await;

    upstream.refuse_connections(true);
    assert!(matches!(
        engine.start(ADDRESS, DAEMON).await,
        Err(Error::Connection { .. })
    ));
    assert_eq!(engine.get_job().job_id, "job-1");

    upstream.refuse_connections(false);
    engine.start(ADDRESS, DAEMON).await.unwrap();
    assert!(engine.get_job().job_id.is_empty());

    engine.stop().await;
}

#[tokio::test]
async fn test_upstream_close_deactivates_engine() {
    let upstream = MemoryUpstream::new();
    let engine = builder(&upstream).build().unwrap();
    start(&engine, &upstream, job("job-1", EASY)).await;

    upstream.disconnect();
    for _ in 0..100 {
        if !engine.is_active() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!engine.is_active());
    assert!(matches!(engine.attempt_hashes(1).await, Err(Error::Inactive)));

    // A new start is required after the upstream goes away
    start(&engine, &upstream, job("job-2", EASY)).await;
    assert!(engine.is_active());
    engine.stop().await;
}

#[tokio::test]
async fn test_job_round_trip() {
    let upstream = MemoryUpstream::new();
    let engine = builder(&upstream).build().unwrap();

    let template = JobTemplate {
        job_id: "1700000000.0.notified".to_string(),
        blocktemplate_blob: "aa".repeat(16),
        blockhashing_blob: format!("01{}", "ff".repeat(MINIBLOCK_SIZE - 1)),
        difficulty: "123456789".to_string(),
        difficulty_u64: 123456789,
        height: 2_500_000,
        prev_hash: "bb".repeat(32),
        epoch_milli: 1_700_000_000_000,
        blocks: 3,
        miniblocks: 27,
        rejected: 1,
        last_error: "stale share".to_string(),
        status: "OK".to_string(),
    };
    start(&engine, &upstream, template.clone()).await;
    assert_eq!(engine.get_job(), template);

    // A newer template replaces the stored one
    start_next(&engine, &upstream, job("job-2", EASY)).await;
    assert_eq!(engine.get_job().job_id, "job-2");

    engine.stop().await;
}

async fn start_next(engine: &Engine, upstream: &MemoryUpstream, template: JobTemplate) {
    let id = template.job_id.clone();
    assert!(upstream.push_job(template));
    for _ in 0..100 {
        if engine.get_job().job_id == id {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {} never arrived", id);
}

#[tokio::test]
async fn test_start_uses_address_argument() {
    let upstream = MemoryUpstream::new();
    let engine = builder(&upstream).build().unwrap();
    assert!(engine.address().is_empty());

    engine.start(ADDRESS, DAEMON).await.unwrap();
    assert_eq!(engine.address(), ADDRESS);
    assert!(upstream
        .last_url()
        .unwrap()
        .as_str()
        .ends_with(&format!("/ws/{}", ADDRESS)));
    engine.stop().await;

    // The configured address is used when none is passed
    engine.start("", DAEMON).await.unwrap();
    assert!(engine.is_active());
    engine.stop().await;
}
