//! Integration tests for LockRepository.
//!
//! Two repositories on the same pool stand in for two scheduler replicas.

use std::time::Duration;

use pulse_core::traits::SchedulerLock;
use pulse_db::LockRepository;

use crate::integration::common::setup_test_db;

const LOCK: &str = "sync_jira_issues";

/// Test 1: Verify that only one replica holds a lock at a time
#[tokio::test]
async fn test_second_replica_is_refused() {
    let (pool, _container) = setup_test_db().await;
    let first = LockRepository::new(pool.clone());
    let second = LockRepository::new(pool);
    assert_ne!(first.holder(), second.holder());

    assert!(first.try_lock(LOCK, Duration::from_secs(600)).await.unwrap());
    assert!(!second.try_lock(LOCK, Duration::from_secs(600)).await.unwrap());
    assert_eq!(
        second.current_holder(LOCK).await.unwrap().as_deref(),
        Some(first.holder())
    );

    // Other lock names are independent
    assert!(second.try_lock("sync_github_commits", Duration::from_secs(600)).await.unwrap());
}

/// Test 2: Verify that unlocking lets the next replica in
#[tokio::test]
async fn test_unlock_releases() {
    let (pool, _container) = setup_test_db().await;
    let first = LockRepository::new(pool.clone());
    let second = LockRepository::new(pool);

    assert!(first.try_lock(LOCK, Duration::from_secs(600)).await.unwrap());
    first.unlock(LOCK, Duration::ZERO).await.unwrap();

    assert!(second.try_lock(LOCK, Duration::from_secs(600)).await.unwrap());
}

/// Test 3: Verify that lock_at_least_for keeps the lock after unlock
#[tokio::test]
async fn test_unlock_honours_minimum_hold() {
    let (pool, _container) = setup_test_db().await;
    let first = LockRepository::new(pool.clone());
    let second = LockRepository::new(pool);

    assert!(first.try_lock(LOCK, Duration::from_secs(600)).await.unwrap());
    first.unlock(LOCK, Duration::from_secs(60)).await.unwrap();

    assert!(!second.try_lock(LOCK, Duration::from_secs(600)).await.unwrap());
}

/// Test 4: Verify that an abandoned lock expires after lock_at_most_for
#[tokio::test]
async fn test_abandoned_lock_expires() {
    let (pool, _container) = setup_test_db().await;
    let crashed = LockRepository::new(pool.clone());
    let survivor = LockRepository::new(pool);

    assert!(crashed.try_lock(LOCK, Duration::from_millis(200)).await.unwrap());
    assert!(!survivor.try_lock(LOCK, Duration::from_secs(600)).await.unwrap());

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(survivor.try_lock(LOCK, Duration::from_secs(600)).await.unwrap());
}

/// Test 5: Verify that a replica cannot release a lock it does not hold
#[tokio::test]
async fn test_unlock_by_other_holder_is_ignored() {
    let (pool, _container) = setup_test_db().await;
    let owner = LockRepository::new(pool.clone());
    let other = LockRepository::new(pool);

    assert!(owner.try_lock(LOCK, Duration::from_secs(600)).await.unwrap());
    other.unlock(LOCK, Duration::ZERO).await.unwrap();

    assert!(!other.try_lock(LOCK, Duration::from_secs(600)).await.unwrap());
}
