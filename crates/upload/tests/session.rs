//! Integration tests for session bookkeeping, rotation and finalization

mod common;

use std::sync::Arc;
use std::time::Duration;

use ::common::prelude::{BucketKind, Digester, Sha256Digester};
use tokio::sync::Semaphore;
use upload::prelude::*;

use crate::common::{
    config, put, sent_objects, setup_session, CountingLease, FakeTransport, RefusingDispatcher,
};

#[tokio::test]
async fn test_third_object_rotates_pack() {
    let transport = Arc::new(FakeTransport::default());
    let lease = Arc::new(CountingLease::default());
    let session = setup_session(config(100, 8), transport.clone(), lease).await;

    put(&session, &[1u8; 40], false).await;
    put(&session, &[2u8; 40], false).await;
    assert_eq!(session.jobs_dispatched().await, 0);
    assert_eq!(session.current_pack_size().await, Some(80));

    put(&session, &[3u8; 40], false).await;
    assert_eq!(session.jobs_dispatched().await, 1);
    assert_eq!(session.active_buckets().await, 0);
    assert_eq!(session.current_pack_size().await, Some(40));
    assert_eq!(session.bytes_dispatched().await, 80);

    let report = session.finalize().await.unwrap();
    assert_eq!(report.jobs, 2);

    let packs = transport.received_packs();
    assert_eq!(packs.len(), 2);
    assert_eq!(packs[0].objects.len(), 2);
    assert_eq!(packs[0].size, 80);
    assert_eq!(packs[1].objects.len(), 1);
    assert_eq!(&packs[1].objects[0].data[..], &[3u8; 40][..]);
}

#[tokio::test]
async fn test_open_bucket_survives_rotation() {
    let transport = Arc::new(FakeTransport::default());
    let lease = Arc::new(CountingLease::default());
    let session = setup_session(config(100, 8), transport.clone(), lease).await;

    let open = session.new_bucket().await.unwrap();
    session.write(open, b"partial ").await.unwrap();

    put(&session, &[7u8; 60], false).await;
    put(&session, &[8u8; 60], false).await;
    assert_eq!(session.jobs_dispatched().await, 1);
    assert_eq!(session.active_buckets().await, 1);

    session.write(open, b"contents").await.unwrap();
    session
        .commit_bucket(
            BucketKind::Cas,
            Sha256Digester.compute(b"partial contents"),
            open,
            "",
            false,
        )
        .await
        .unwrap();
    session.finalize().await.unwrap();

    let objects = sent_objects(&transport);
    assert_eq!(objects.len(), 3);
    assert_eq!(objects[0], vec![7u8; 60]);
    assert!(objects.contains(&b"partial contents".to_vec()));
}

#[tokio::test]
async fn test_force_dispatch_keeps_other_open_buckets() {
    let transport = Arc::new(FakeTransport::default());
    let lease = Arc::new(CountingLease::default());
    let session = setup_session(config(1 << 20, 8), transport.clone(), lease).await;

    let open = session.new_bucket().await.unwrap();
    session.write(open, b"still writing").await.unwrap();

    put(&session, b"catalog", true).await;
    assert_eq!(session.jobs_dispatched().await, 1);
    assert_eq!(session.active_buckets().await, 1);
    assert_eq!(session.current_pack_size().await, Some(0));

    session
        .commit_bucket(
            BucketKind::Named,
            Sha256Digester.compute(b"still writing"),
            open,
            "data/.cvmfscatalog",
            false,
        )
        .await
        .unwrap();
    let report = session.finalize().await.unwrap();
    assert_eq!(report.jobs, 2);

    let packs = transport.received_packs();
    assert_eq!(packs[0].objects.len(), 1);
    assert_eq!(&packs[0].objects[0].data[..], b"catalog");
    assert_eq!(packs[1].objects[0].name.as_deref(), Some("data/.cvmfscatalog"));
    assert_eq!(&packs[1].objects[0].data[..], b"still writing");
}

#[tokio::test]
async fn test_oversized_object_gets_its_own_pack() {
    let transport = Arc::new(FakeTransport::default());
    let lease = Arc::new(CountingLease::default());
    let session = setup_session(config(16, 8), transport.clone(), lease).await;

    put(&session, b"small", false).await;
    put(&session, &[9u8; 64], false).await;
    put(&session, b"tail", false).await;
    let report = session.finalize().await.unwrap();

    let sizes: Vec<u64> = transport.received_packs().iter().map(|p| p.size).collect();
    assert_eq!(sizes, vec![5, 64, 4]);
    assert_eq!(report.bytes_committed, 73);
}

#[tokio::test]
async fn test_every_object_sent_exactly_once() {
    let transport = Arc::new(FakeTransport::default());
    let lease = Arc::new(CountingLease::default());
    let session = setup_session(config(50, 2), transport.clone(), lease).await;

    let mut expected = Vec::new();
    for i in 0..40u8 {
        let data = vec![i; (i as usize % 17) + 1];
        put(&session, &data, i % 11 == 0).await;
        expected.push(data);
    }
    let report = session.finalize().await.unwrap();

    let sent = sent_objects(&transport);
    assert_eq!(sent, expected);
    assert_eq!(report.bytes_committed, report.bytes_dispatched);
    let total: u64 = transport.received_packs().iter().map(|p| p.size).sum();
    assert_eq!(total, report.bytes_committed);
}

#[tokio::test]
async fn test_concurrent_producers() {
    let transport = Arc::new(FakeTransport::default());
    let lease = Arc::new(CountingLease::default());
    let session = setup_session(config(256, 4), transport.clone(), lease).await;

    let producers: Vec<_> = (0..8u8)
        .map(|producer| {
            let session = session.clone();
            tokio::spawn(async move {
                for i in 0..10u8 {
                    let handle = session.new_bucket().await.unwrap();
                    let data = vec![producer; 10 + i as usize];
                    for chunk in data.chunks(3) {
                        session.write(handle, chunk).await.unwrap();
                        tokio::task::yield_now().await;
                    }
                    session
                        .commit_bucket(
                            BucketKind::Cas,
                            Sha256Digester.compute(&data),
                            handle,
                            "",
                            false,
                        )
                        .await
                        .unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }

    let report = session.finalize().await.unwrap();
    let mut sent = sent_objects(&transport);
    assert_eq!(sent.len(), 80);
    assert!(sent.iter().all(|data| data.iter().all(|b| *b == data[0])));
    sent.sort();
    sent.dedup();
    assert_eq!(sent.len(), 80);
    assert_eq!(report.bytes_committed, 8 * (10..20).sum::<u64>());
}

#[tokio::test]
async fn test_packs_uploaded_in_dispatch_order() {
    let transport = Arc::new(FakeTransport::default());
    let lease = Arc::new(CountingLease::default());
    let session = setup_session(config(1 << 20, 16), transport.clone(), lease).await;

    for i in 0..6u8 {
        put(&session, &[i; 4], true).await;
    }
    session.finalize().await.unwrap();

    let first_bytes: Vec<u8> = sent_objects(&transport).iter().map(|d| d[0]).collect();
    assert_eq!(first_bytes, vec![0, 1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_full_queue_blocks_dispatch() {
    let gate = Arc::new(Semaphore::new(0));
    let transport = Arc::new(FakeTransport::gated(gate.clone()));
    let lease = Arc::new(CountingLease::default());
    let session = setup_session(config(1 << 20, 1), transport.clone(), lease).await;

    // one pack held by the worker, one waiting in the queue
    put(&session, b"first", true).await;
    put(&session, b"second", true).await;

    let blocked = {
        let session = session.clone();
        tokio::spawn(async move { put(&session, b"third", true).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    // the blocked producer still holds the session lock
    assert!(!blocked.is_finished());

    gate.add_permits(1);
    tokio::time::timeout(Duration::from_secs(5), blocked)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.jobs_dispatched().await, 3);

    gate.add_permits(2);
    let report = session.finalize().await.unwrap();
    assert_eq!(report.jobs, 3);
}

#[tokio::test]
async fn test_failed_upload_fails_finalize() {
    let transport = Arc::new(FakeTransport::failing_on(&[2]));
    let lease = Arc::new(CountingLease::default());
    let session = setup_session(config(1 << 20, 8), transport.clone(), lease.clone()).await;

    for i in 0..4u8 {
        put(&session, &[i; 8], true).await;
    }
    let result = session.finalize().await;

    match result {
        Err(SessionError::UploadsFailed(failures)) => {
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].job, 2);
        }
        other => panic!("expected upload failure, got {:?}", other),
    }
    assert_eq!(transport.requests().len(), 4);
    assert_eq!(lease.drops(), 1);
}

#[tokio::test]
async fn test_reply_with_trailing_space_is_failure() {
    let transport = Arc::new(FakeTransport::replying("{\"status\":\"ok\"} "));
    let lease = Arc::new(CountingLease::default());
    let session = setup_session(config(1 << 20, 8), transport, lease.clone()).await;

    put(&session, b"object", false).await;
    assert!(matches!(
        session.finalize().await,
        Err(SessionError::UploadsFailed(_))
    ));
    assert_eq!(lease.drops(), 1);
}

#[tokio::test]
async fn test_lease_drop_failure_does_not_fail_session() {
    let transport = Arc::new(FakeTransport::default());
    let lease = Arc::new(CountingLease::failing());
    let session = setup_session(config(1 << 20, 8), transport, lease.clone()).await;

    put(&session, b"object", false).await;
    assert!(session.finalize().await.is_ok());
    assert_eq!(lease.drops(), 1);
}

#[tokio::test]
async fn test_lease_kept_when_configured() {
    let transport = Arc::new(FakeTransport::default());
    let lease = Arc::new(CountingLease::default());
    let config = SessionConfig {
        drop_lease: false,
        ..config(1 << 20, 8)
    };
    let session = setup_session(config, transport, lease.clone()).await;

    put(&session, b"object", false).await;
    session.finalize().await.unwrap();
    assert_eq!(lease.drops(), 0);
}

#[tokio::test]
async fn test_empty_session_uploads_nothing() {
    let transport = Arc::new(FakeTransport::default());
    let lease = Arc::new(CountingLease::default());
    let session = setup_session(SessionConfig::default(), transport.clone(), lease).await;

    session.wait_for_upload().await;
    let report = session.finalize().await.unwrap();
    assert_eq!(report.jobs, 0);
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn test_wait_for_upload_drains_queue() {
    let transport = Arc::new(FakeTransport::default());
    let lease = Arc::new(CountingLease::default());
    let session = setup_session(config(1 << 20, 8), transport.clone(), lease).await;

    for i in 0..3u8 {
        put(&session, &[i; 16], true).await;
    }
    session.wait_for_upload().await;
    assert_eq!(transport.requests().len(), 3);
    session.finalize().await.unwrap();
}

#[tokio::test]
async fn test_requests_are_signed() {
    let transport = Arc::new(FakeTransport::default());
    let lease = Arc::new(CountingLease::default());
    let session = setup_session(config(1 << 20, 8), transport.clone(), lease).await;

    put(&session, b"signed object", false).await;
    session.finalize().await.unwrap();

    let request = &transport.requests()[0];
    let envelope_len: usize = request.header("Message-Size").unwrap().parse().unwrap();
    let envelope = &request.body[..envelope_len];
    assert!(std::str::from_utf8(envelope)
        .unwrap()
        .starts_with("{\"session_token\" : \"session-token\""));
    assert_eq!(
        request.header("Authorization").unwrap(),
        upload::gateway::authorization(
            common::KEY_ID,
            common::SECRET,
            envelope,
            &Sha256Digester
        )
    );
    assert_eq!(request.url.as_str(), "http://gateway.test/api/v1/payloads");
}

#[tokio::test]
async fn test_lifecycle_errors() {
    let transport = Arc::new(FakeTransport::default());
    let lease = Arc::new(CountingLease::default());
    let dispatcher = GatewayDispatcher::new(
        common::credentials(),
        transport,
        Arc::new(Sha256Digester),
        lease,
        4,
    );
    let session = SessionContext::new(SessionConfig::default(), Arc::new(dispatcher)).unwrap();

    assert!(matches!(
        session.new_bucket().await,
        Err(SessionError::NotInitialized)
    ));
    session.initialize().await.unwrap();
    assert!(matches!(
        session.initialize().await,
        Err(SessionError::AlreadyInitialized)
    ));
    session.finalize().await.unwrap();
    assert!(matches!(
        session.new_bucket().await,
        Err(SessionError::Finalized)
    ));
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let dispatcher = GatewayDispatcher::new(
        common::credentials(),
        Arc::new(FakeTransport::default()),
        Arc::new(Sha256Digester),
        Arc::new(NoLease),
        1,
    );
    let config = SessionConfig {
        max_pack_size: 0,
        ..Default::default()
    };
    assert!(matches!(
        SessionContext::new(config, Arc::new(dispatcher)),
        Err(SessionError::InvalidConfig(_))
    ));
}

#[tokio::test]
#[should_panic(expected = "uncommitted bucket")]
async fn test_finalize_with_open_bucket_panics() {
    let transport = Arc::new(FakeTransport::default());
    let lease = Arc::new(CountingLease::default());
    let session = setup_session(SessionConfig::default(), transport, lease).await;

    session.new_bucket().await.unwrap();
    let _ = session.finalize().await;
}

#[tokio::test]
async fn test_refused_last_pack_still_releases_lease() {
    let dispatcher = Arc::new(RefusingDispatcher::refusing(1));
    let session = SessionContext::new(config(1 << 20, 8), dispatcher.clone()).unwrap();
    session.initialize().await.unwrap();

    put(&session, b"never shipped", false).await;

    let result = session.finalize().await;
    assert!(matches!(result, Err(SessionError::QueueClosed)));
    assert_eq!(dispatcher.lease_drops(), 1);
    assert_eq!(dispatcher.finalized(), 1);
    assert!(matches!(
        session.finalize().await,
        Err(SessionError::Finalized)
    ));
}

#[tokio::test]
async fn test_refused_rotation_breaks_accounting() {
    let dispatcher = Arc::new(RefusingDispatcher::refusing(1));
    let session = SessionContext::new(config(100, 8), dispatcher.clone()).unwrap();
    session.initialize().await.unwrap();

    put(&session, &[1u8; 60], false).await;

    // the full pack is refused during rotation, the new bucket moves on
    let handle = session.new_bucket().await.unwrap();
    session.write(handle, &[2u8; 60]).await.unwrap();
    let hash = Sha256Digester.compute(&[2u8; 60]);
    assert!(matches!(
        session
            .commit_bucket(BucketKind::Cas, hash, handle, "", false)
            .await,
        Err(SessionError::QueueClosed)
    ));
    assert_eq!(session.active_buckets().await, 1);
    session
        .commit_bucket(BucketKind::Cas, hash, handle, "", false)
        .await
        .unwrap();

    match session.finalize().await {
        Err(SessionError::AccountingMismatch {
            committed,
            dispatched,
        }) => {
            assert_eq!(committed, 120);
            assert_eq!(dispatched, 60);
        }
        other => panic!("expected accounting mismatch, got {:?}", other),
    }
    assert_eq!(dispatcher.accepted(), vec![60]);
    assert_eq!(dispatcher.lease_drops(), 1);
    assert_eq!(dispatcher.finalized(), 1);
}
