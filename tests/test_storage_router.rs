// Copyright 2025 Vijaykumar Singh
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.

//! Integration tests for multi-endpoint routing: weighted reads, priority
//! failover, write fallthrough and sync direction rules

mod common;

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common::{endpoint, MemoryBackend};
use imghub::core::{
    BackendType, ContentHash, EndpointRole, HealthConfig, ImageId, LocationStatus, RouterError,
};
use imghub::storage::{
    EndpointHealthTracker, LocationTable, RoutedEndpoint, StorageRouter, SyncOutcome,
};

fn build_router(endpoints: Vec<RoutedEndpoint>) -> StorageRouter {
    let probes = endpoints
        .iter()
        .map(|e| (e.id.clone(), Arc::clone(&e.backend)))
        .collect();
    let health = Arc::new(EndpointHealthTracker::new(probes, HealthConfig::default()));
    StorageRouter::new(
        endpoints,
        health,
        Arc::new(LocationTable::new()),
        Duration::from_secs(2),
    )
}

fn mark_down(router: &StorageRouter, endpoint_id: &str) {
    for _ in 0..HealthConfig::default().failure_threshold {
        router
            .health()
            .record_probe(endpoint_id, Err("connection refused".to_string()));
    }
    assert!(!router.health().is_healthy(endpoint_id));
}

fn mark_present(router: &StorageRouter, image_id: ImageId, hash: &ContentHash, endpoint_id: &str) {
    router.locations().claim(image_id, endpoint_id, hash);
    router
        .locations()
        .set_status(image_id, endpoint_id, LocationStatus::Present);
}

#[tokio::test]
async fn test_weighted_reads_follow_ratio_within_priority_group() {
    let router = build_router(vec![
        endpoint("a", EndpointRole::Primary, 1, 3, MemoryBackend::local()),
        endpoint("b", EndpointRole::Primary, 1, 1, MemoryBackend::local()),
        endpoint("backup", EndpointRole::Backup, 2, 1, MemoryBackend::local()),
    ]);
    let image_id = ImageId::new();
    let hash = ContentHash::of(b"weighted");
    for id in ["a", "b", "backup"] {
        mark_present(&router, image_id, &hash, id);
    }

    let mut rng = StdRng::seed_from_u64(42);
    let mut first_choice: HashMap<String, usize> = HashMap::new();
    for _ in 0..1000 {
        let candidates = router.read_candidates_with_rng(image_id, &mut rng);
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[2], "backup", "lower priority group always comes last");
        *first_choice.entry(candidates[0].clone()).or_default() += 1;
    }

    let a = first_choice.get("a").copied().unwrap_or(0);
    let b = first_choice.get("b").copied().unwrap_or(0);
    println!("📊 first choice: a={} b={}", a, b);
    assert_eq!(a + b, 1000);
    assert!((680..=820).contains(&a), "expected ~750 reads on 'a', got {}", a);
    assert!(!first_choice.contains_key("backup"));
}

#[tokio::test]
async fn test_reads_fall_back_to_next_priority_when_primary_unhealthy() {
    let primary = MemoryBackend::local();
    let backup = MemoryBackend::local();
    let router = build_router(vec![
        endpoint("primary", EndpointRole::Primary, 1, 1, primary.clone()),
        endpoint("backup", EndpointRole::Backup, 2, 1, backup.clone()),
    ]);

    let image_id = ImageId::new();
    let hash = ContentHash::of(b"failover");
    router.write(image_id, &hash, b"failover").await.unwrap();
    router.sync(image_id, "backup").await.unwrap();

    assert_eq!(router.select_read_endpoint(image_id).as_deref(), Some("primary"));

    mark_down(&router, "primary");
    assert_eq!(router.read_candidates(image_id), vec!["backup".to_string()]);

    let gets_before = primary.get_count();
    let read = router.read(image_id).await.unwrap();
    assert_eq!(read.endpoint_id, "backup");
    assert_eq!(read.data, b"failover");
    assert_eq!(primary.get_count(), gets_before, "unhealthy endpoint must not be read");
}

#[tokio::test]
async fn test_unhealthy_primary_excluded_from_writes() {
    let a = MemoryBackend::local();
    let b = MemoryBackend::local();
    let router = build_router(vec![
        endpoint("a", EndpointRole::Primary, 1, 5, a.clone()),
        endpoint("b", EndpointRole::Primary, 2, 1, b.clone()),
    ]);
    mark_down(&router, "a");

    let receipt = router
        .write(ImageId::new(), &ContentHash::of(b"x"), b"x")
        .await
        .unwrap();
    assert_eq!(receipt.endpoint_id, "b");
    assert_eq!(a.put_count(), 0);
    assert_eq!(b.put_count(), 1);
}

#[tokio::test]
async fn test_write_falls_through_failing_primary() {
    let a = MemoryBackend::local();
    let b = MemoryBackend::local();
    a.set_failing(true);
    let router = build_router(vec![
        endpoint("a", EndpointRole::Primary, 1, 1, a.clone()),
        endpoint("b", EndpointRole::Primary, 1, 1, b.clone()),
    ]);

    let image_id = ImageId::new();
    let receipt = router
        .write(image_id, &ContentHash::of(b"fall"), b"fall")
        .await
        .unwrap();
    assert_eq!(receipt.endpoint_id, "b");
    assert_eq!(receipt.attempts, 2);
    assert!(!receipt.deduplicated);
    assert_eq!(
        router.locations().status(image_id, "a"),
        Some(LocationStatus::Failed)
    );
    assert_eq!(
        router.locations().status(image_id, "b"),
        Some(LocationStatus::Present)
    );
}

#[tokio::test]
async fn test_write_errors() {
    let a = MemoryBackend::local();
    let router = build_router(vec![endpoint("a", EndpointRole::Primary, 1, 1, a.clone())]);

    a.set_failing(true);
    let err = router
        .write(ImageId::new(), &ContentHash::of(b"e"), b"e")
        .await
        .unwrap_err();
    assert!(matches!(err, RouterError::TransferFailure { ref endpoint, .. } if endpoint == "a"));

    mark_down(&router, "a");
    let err = router
        .write(ImageId::new(), &ContentHash::of(b"e"), b"e")
        .await
        .unwrap_err();
    assert_eq!(err, RouterError::NoHealthyEndpoint);
}

#[tokio::test]
async fn test_second_write_of_same_image_is_deduplicated() {
    let a = MemoryBackend::local();
    let router = build_router(vec![endpoint("a", EndpointRole::Primary, 1, 1, a.clone())]);
    let image_id = ImageId::new();
    let hash = ContentHash::of(b"dup");

    router.write(image_id, &hash, b"dup").await.unwrap();
    let again = router.write(image_id, &hash, b"dup").await.unwrap();
    assert!(again.deduplicated);
    assert_eq!(again.object_key, hash.object_key());
    assert_eq!(a.put_count(), 1);
}

#[tokio::test]
async fn test_sync_out_of_object_store_is_rejected_before_any_transfer() {
    let s3 = MemoryBackend::s3();
    let local_backup = MemoryBackend::local();
    let router = build_router(vec![
        endpoint("s3", EndpointRole::Primary, 1, 1, s3.clone()),
        endpoint("local-backup", EndpointRole::Backup, 2, 1, local_backup.clone()),
    ]);

    let image_id = ImageId::new();
    router
        .write(image_id, &ContentHash::of(b"cloud"), b"cloud")
        .await
        .unwrap();

    let err = router.sync(image_id, "local-backup").await.unwrap_err();
    assert_eq!(
        err,
        RouterError::UnsupportedSyncDirection {
            from: BackendType::S3Compatible,
            to: BackendType::Local,
        }
    );
    assert_eq!(s3.get_count(), 0);
    assert_eq!(local_backup.put_count(), 0);
    assert_eq!(router.locations().status(image_id, "local-backup"), None);
}

#[tokio::test]
async fn test_sync_is_idempotent() {
    let primary = MemoryBackend::local();
    let backup = MemoryBackend::s3();
    let router = build_router(vec![
        endpoint("primary", EndpointRole::Primary, 1, 1, primary.clone()),
        endpoint("backup", EndpointRole::Backup, 2, 1, backup.clone()),
    ]);

    let image_id = ImageId::new();
    router
        .write(image_id, &ContentHash::of(b"sync"), b"sync")
        .await
        .unwrap();
    assert_eq!(router.missing_backups(image_id), vec!["backup".to_string()]);

    let first = router.sync(image_id, "backup").await.unwrap();
    assert_eq!(
        first,
        SyncOutcome::Copied {
            from: "primary".to_string()
        }
    );
    let second = router.sync(image_id, "backup").await.unwrap();
    assert_eq!(second, SyncOutcome::AlreadyPresent);

    assert_eq!(backup.put_count(), 1);
    assert!(router.missing_backups(image_id).is_empty());
}

#[tokio::test]
async fn test_sync_to_unhealthy_or_unknown_target() {
    let router = build_router(vec![
        endpoint("primary", EndpointRole::Primary, 1, 1, MemoryBackend::local()),
        endpoint("backup", EndpointRole::Backup, 2, 1, MemoryBackend::local()),
    ]);
    let image_id = ImageId::new();
    router
        .write(image_id, &ContentHash::of(b"t"), b"t")
        .await
        .unwrap();

    assert!(matches!(
        router.sync(image_id, "nowhere").await,
        Err(RouterError::UnknownEndpoint(_))
    ));

    mark_down(&router, "backup");
    assert!(matches!(
        router.sync(image_id, "backup").await,
        Err(RouterError::TransferFailure { .. })
    ));

    assert!(matches!(
        router.sync(ImageId::new(), "backup").await,
        Err(RouterError::NoSource(_))
    ));
}

#[tokio::test]
async fn test_vanished_object_is_marked_missing_and_read_falls_back() {
    let primary = MemoryBackend::local();
    let backup = MemoryBackend::local();
    let router = build_router(vec![
        endpoint("primary", EndpointRole::Primary, 1, 1, primary.clone()),
        endpoint("backup", EndpointRole::Backup, 2, 1, backup.clone()),
    ]);

    let image_id = ImageId::new();
    let hash = ContentHash::of(b"gone");
    router.write(image_id, &hash, b"gone").await.unwrap();
    router.sync(image_id, "backup").await.unwrap();
    primary.drop_object(&hash.object_key());

    let read = router.read(image_id).await.unwrap();
    assert_eq!(read.endpoint_id, "backup");
    assert_eq!(
        router.locations().status(image_id, "primary"),
        Some(LocationStatus::Missing)
    );
    assert_eq!(router.read_candidates(image_id), vec!["backup".to_string()]);
}

#[tokio::test]
async fn test_delete_removes_every_copy() {
    let primary = MemoryBackend::local();
    let backup = MemoryBackend::local();
    let router = build_router(vec![
        endpoint("primary", EndpointRole::Primary, 1, 1, primary.clone()),
        endpoint("backup", EndpointRole::Backup, 2, 1, backup.clone()),
    ]);

    let image_id = ImageId::new();
    router
        .write(image_id, &ContentHash::of(b"del"), b"del")
        .await
        .unwrap();
    router.sync(image_id, "backup").await.unwrap();

    assert_eq!(router.delete(image_id).await, 2);
    assert_eq!(primary.object_count(), 0);
    assert_eq!(backup.object_count(), 0);
    assert!(router.image_locations(image_id).is_empty());
    assert!(matches!(
        router.read(image_id).await,
        Err(RouterError::ReadUnavailable { .. })
    ));
}

#[tokio::test]
async fn test_delete_during_sync_leaves_no_orphan() {
    let primary = MemoryBackend::local();
    let backup = MemoryBackend::local();
    let router = Arc::new(build_router(vec![
        endpoint("primary", EndpointRole::Primary, 1, 1, primary.clone()),
        endpoint("backup", EndpointRole::Backup, 2, 1, backup.clone()),
    ]));

    let image_id = ImageId::new();
    router
        .write(image_id, &ContentHash::of(b"race"), b"race")
        .await
        .unwrap();
    backup.set_put_delay(Duration::from_millis(200));

    let syncing = {
        let router = Arc::clone(&router);
        tokio::spawn(async move { router.sync(image_id, "backup").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        router.locations().status(image_id, "backup"),
        Some(LocationStatus::Syncing)
    );

    // Only the present copy counts; the in-flight row is dropped
    assert_eq!(router.delete(image_id).await, 1);

    let outcome = syncing.await.unwrap();
    assert!(
        matches!(outcome, Err(RouterError::TransferFailure { ref endpoint, .. }) if endpoint == "backup"),
        "unexpected outcome {:?}",
        outcome
    );
    assert_eq!(backup.put_count(), 1);
    assert_eq!(backup.object_count(), 0);
    assert_eq!(primary.object_count(), 0);
    assert!(router.image_locations(image_id).is_empty());
}

#[tokio::test]
async fn test_delete_during_write_leaves_no_orphan() {
    let primary = MemoryBackend::local();
    primary.set_put_delay(Duration::from_millis(200));
    let router = Arc::new(build_router(vec![endpoint(
        "primary",
        EndpointRole::Primary,
        1,
        1,
        primary.clone(),
    )]));

    let image_id = ImageId::new();
    let writing = {
        let router = Arc::clone(&router);
        tokio::spawn(async move {
            router
                .write(image_id, &ContentHash::of(b"late"), b"late")
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(router.delete(image_id).await, 0);

    assert!(matches!(
        writing.await.unwrap(),
        Err(RouterError::TransferFailure { .. })
    ));
    assert_eq!(primary.object_count(), 0);
    assert!(router.image_locations(image_id).is_empty());
}

#[tokio::test]
async fn test_endpoints_view_reports_health() {
    let router = build_router(vec![
        endpoint("primary", EndpointRole::Primary, 1, 1, MemoryBackend::local()),
        endpoint("backup", EndpointRole::Backup, 2, 0, MemoryBackend::s3()),
    ]);
    mark_down(&router, "backup");

    let view = router.endpoints();
    assert_eq!(view.len(), 2);
    assert!(view[0].healthy);
    assert!(!view[1].healthy);
    assert_eq!(view[1].backend_type, BackendType::S3Compatible);
}
