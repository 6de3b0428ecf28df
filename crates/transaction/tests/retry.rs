//! Retry, backoff and timeout behaviour against the in-memory transaction
//! manager. Time is paused so backoff sleeps complete instantly.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use transaction::{
    DbError, DbErrorCode, InMemoryTransactionManager, TransactionError, TransactionOptions,
    Transactional,
};

fn setup() -> (InMemoryTransactionManager, Transactional<InMemoryTransactionManager>) {
    let manager = InMemoryTransactionManager::new();
    let tx = Transactional::new(manager.clone());
    (manager, tx)
}

fn failure(code: DbErrorCode) -> TransactionError {
    TransactionError::Database(DbError::new(code, code.as_str()))
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_retried_up_to_max_retries() {
    let (manager, tx) = setup();
    let mut session = tx.session();
    let attempts = Arc::new(AtomicU32::new(0));

    let options = TransactionOptions::required().with_max_retries(3);
    let err = tx
        .run(&mut session, &options, |_s| {
            let attempts = Arc::clone(&attempts);
            Box::pin(async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(failure(DbErrorCode::Deadlock))
            })
        })
        .await
        .unwrap_err();

    assert!(matches!(err, TransactionError::Database(ref e) if e.code == DbErrorCode::Deadlock));
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
    assert_eq!(manager.begin_count(), 4);
    assert_eq!(manager.rollback_count(), 4);
    assert_eq!(manager.commit_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_then_success_commits_once() {
    let (manager, tx) = setup();
    let mut session = tx.session();
    let attempts = Arc::new(AtomicU32::new(0));

    let value = tx
        .run(&mut session, &TransactionOptions::required(), |_s| {
            let attempts = Arc::clone(&attempts);
            Box::pin(async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(failure(DbErrorCode::SerializationFailure));
                }
                Ok(42)
            })
        })
        .await
        .unwrap();

    assert_eq!(value, 42);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(manager.commit_count(), 1);
    assert_eq!(manager.rollback_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_non_retryable_failure_runs_once() {
    for code in [
        DbErrorCode::UniqueViolation,
        DbErrorCode::ForeignKeyViolation,
        DbErrorCode::Validation,
        DbErrorCode::NotFound,
        DbErrorCode::Other,
    ] {
        let (manager, tx) = setup();
        let mut session = tx.session();
        let attempts = Arc::new(AtomicU32::new(0));

        let result = tx
            .run(&mut session, &TransactionOptions::required(), |_s| {
                let attempts = Arc::clone(&attempts);
                Box::pin(async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(failure(code))
                })
            })
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1, "{code} ran more than once");
        assert_eq!(manager.begin_count(), 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_commit_conflict_retries_whole_unit() {
    let (manager, tx) = setup();
    let mut session = tx.session();
    let attempts = Arc::new(AtomicU32::new(0));
    manager.fail_next_commit(DbError::new(DbErrorCode::SerializationFailure, "could not serialize"));

    tx.run(&mut session, &TransactionOptions::required(), |_s| {
        let attempts = Arc::clone(&attempts);
        Box::pin(async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Ok::<_, TransactionError>(())
        })
    })
    .await
    .unwrap();

    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert_eq!(manager.commit_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_begin_failure_is_retried() {
    let (manager, tx) = setup();
    let mut session = tx.session();
    manager.fail_next_begin(DbError::new(DbErrorCode::PoolTimeout, "pool timed out"));

    tx.run(&mut session, &TransactionOptions::required(), |_s| {
        Box::pin(async { Ok::<_, TransactionError>(()) })
    })
    .await
    .unwrap();

    assert_eq!(manager.begin_count(), 1);
    assert_eq!(manager.commit_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_joined_failure_is_retried_by_owner() {
    let (manager, tx) = setup();
    let mut session = tx.session();
    let inner_attempts = Arc::new(AtomicU32::new(0));

    tx.run(&mut session, &TransactionOptions::required(), |s| {
        let tx = tx.clone();
        let inner_attempts = Arc::clone(&inner_attempts);
        Box::pin(async move {
            tx.run(s, &TransactionOptions::required(), |_s| {
                let inner_attempts = Arc::clone(&inner_attempts);
                Box::pin(async move {
                    if inner_attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        return Err(failure(DbErrorCode::Deadlock));
                    }
                    Ok(())
                })
            })
            .await
        })
    })
    .await
    .unwrap();

    assert_eq!(inner_attempts.load(Ordering::SeqCst), 2);
    assert_eq!(manager.begin_count(), 2);
    assert_eq!(manager.rollback_count(), 1);
    assert_eq!(manager.commit_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_detached_scope_retries_without_transaction() {
    let (manager, tx) = setup();
    let mut session = tx.session();
    let attempts = Arc::new(AtomicU32::new(0));

    let result = tx
        .run(
            &mut session,
            &TransactionOptions::supports().with_max_retries(2),
            |_s| {
                let attempts = Arc::clone(&attempts);
                Box::pin(async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(failure(DbErrorCode::ConnectionFailure))
                })
            },
        )
        .await;

    assert!(result.is_err());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(manager.journal().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delays_stay_within_ceiling() {
    let (_manager, tx) = setup();
    let mut session = tx.session();
    let started = Arc::new(Mutex::new(Vec::new()));

    let options = TransactionOptions::required()
        .with_max_retries(5)
        .with_retry_delay(Duration::from_millis(100))
        .with_max_retry_delay(Duration::from_millis(500));

    let _ = tx
        .run(&mut session, &options, |_s| {
            let started = Arc::clone(&started);
            Box::pin(async move {
                started.lock().unwrap().push(Instant::now());
                Err::<(), _>(failure(DbErrorCode::LockNotAvailable))
            })
        })
        .await;

    let started = started.lock().unwrap();
    assert_eq!(started.len(), 6);
    let backoff = options.backoff();
    for (i, pair) in started.windows(2).enumerate() {
        let gap = pair[1] - pair[0];
        let attempt = i as u32 + 1;
        assert!(
            gap <= backoff.ceiling(attempt),
            "gap {gap:?} after attempt {attempt} exceeds {:?}",
            backoff.ceiling(attempt)
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_timeout_bounds_all_attempts() {
    let (manager, tx) = setup();
    let mut session = tx.session();
    let attempts = Arc::new(AtomicU32::new(0));

    let options = TransactionOptions::required()
        .with_max_retries(10)
        .with_retry_delay(Duration::ZERO)
        .with_timeout(Duration::from_millis(250));

    let err = tx
        .run(&mut session, &options, |_s| {
            let attempts = Arc::clone(&attempts);
            Box::pin(async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Err::<(), _>(failure(DbErrorCode::Deadlock))
            })
        })
        .await
        .unwrap_err();

    assert!(matches!(err, TransactionError::Timeout(d) if d == Duration::from_millis(250)));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(manager.begin_count(), 3);
    assert_eq!(manager.rollback_count(), 3);
    assert_eq!(manager.commit_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_crossing_deadline_is_abandoned() {
    let (_manager, tx) = setup();
    let mut session = tx.session();

    let options = TransactionOptions::required()
        .with_max_retries(5)
        .with_retry_delay(Duration::from_secs(10))
        .with_max_retry_delay(Duration::from_secs(10))
        .with_timeout(Duration::from_secs(1));

    let start = Instant::now();
    let err = tx
        .run(&mut session, &options, |_s| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(900)).await;
                Err::<(), _>(failure(DbErrorCode::Deadlock))
            })
        })
        .await
        .unwrap_err();

    assert!(matches!(err, TransactionError::Timeout(_)));
    assert!(start.elapsed() <= Duration::from_secs(1));
}
