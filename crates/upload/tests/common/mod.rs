//! Shared test utilities for session integration tests
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use url::Url;

use common::prelude::{
    BucketHandle, BucketKind, Digester, ObjectPack, ReceivedPack, Sha256Digester,
};
use upload::gateway::OK_REPLY;
use upload::prelude::*;

pub const KEY_ID: &str = "publisher";
pub const SECRET: &str = "shared-secret";
pub const TOKEN: &str = "session-token";

/// Transport that records every request and answers from a script
#[derive(Debug)]
pub struct FakeTransport {
    requests: Mutex<Vec<GatewayRequest>>,
    calls: AtomicUsize,
    /// 1-based call numbers that fail at the transport level
    fail_calls: Vec<usize>,
    reply: String,
    gate: Option<Arc<Semaphore>>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            fail_calls: Vec::new(),
            reply: OK_REPLY.to_string(),
            gate: None,
        }
    }
}

impl FakeTransport {
    pub fn failing_on(calls: &[usize]) -> Self {
        Self {
            fail_calls: calls.to_vec(),
            ..Default::default()
        }
    }

    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            ..Default::default()
        }
    }

    /// Every send waits for a permit from `gate`
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }

    pub fn requests(&self) -> Vec<GatewayRequest> {
        self.requests.lock().clone()
    }

    /// Packs in the order they reached the transport
    pub fn received_packs(&self) -> Vec<ReceivedPack> {
        self.requests().iter().map(decode_pack).collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: GatewayRequest) -> Result<String, TransportError> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().push(request);
        if self.fail_calls.contains(&call) {
            return Err(TransportError::Other(format!("connection reset on call {}", call)));
        }
        Ok(self.reply.clone())
    }
}

/// Lease that counts how often it was dropped
#[derive(Debug, Default)]
pub struct CountingLease {
    drops: AtomicUsize,
    fail: bool,
}

impl CountingLease {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn drops(&self) -> usize {
        self.drops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Lease for CountingLease {
    async fn drop_lease(&self) -> Result<(), LeaseError> {
        self.drops.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(LeaseError::Rejected {
                status: "error".to_string(),
                reason: "lease already expired".to_string(),
            });
        }
        Ok(())
    }
}

/// Dispatcher that refuses its first `refuse` packs and completes the rest
///  immediately
#[derive(Debug, Default)]
pub struct RefusingDispatcher {
    refuse: usize,
    calls: AtomicUsize,
    accepted: Mutex<Vec<u64>>,
    lease_drops: AtomicUsize,
    finalized: AtomicUsize,
}

impl RefusingDispatcher {
    pub fn refusing(refuse: usize) -> Self {
        Self {
            refuse,
            ..Default::default()
        }
    }

    /// Sizes of the packs that were accepted
    pub fn accepted(&self) -> Vec<u64> {
        self.accepted.lock().clone()
    }

    pub fn lease_drops(&self) -> usize {
        self.lease_drops.load(Ordering::SeqCst)
    }

    pub fn finalized(&self) -> usize {
        self.finalized.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PackDispatcher for RefusingDispatcher {
    async fn initialize(&self) -> Result<(), SessionError> {
        Ok(())
    }

    async fn dispatch(
        &self,
        _job: u64,
        pack: ObjectPack,
    ) -> Result<Completion<UploadResult>, SessionError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.refuse {
            return Err(SessionError::QueueClosed);
        }
        self.accepted.lock().push(pack.size());
        let (setter, completion) = completion();
        setter.set(Ok(()));
        Ok(completion)
    }

    async fn wait_for_drain(&self) {}

    async fn drop_lease(&self) -> Result<(), LeaseError> {
        self.lease_drops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn finalize(&self) -> Result<(), SessionError> {
        self.finalized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn credentials() -> LeaseCredentials {
    LeaseCredentials::new(
        Url::parse("http://gateway.test/api/v1").unwrap(),
        TOKEN,
        &GatewayKey::new(KEY_ID, SECRET),
    )
}

pub fn config(max_pack_size: u64, queue_capacity: usize) -> SessionConfig {
    SessionConfig {
        max_pack_size,
        queue_capacity,
        ..Default::default()
    }
}

/// Route pipeline logs to the test harness; honours RUST_LOG
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An initialized session wired to fakes
pub async fn setup_session(
    config: SessionConfig,
    transport: Arc<FakeTransport>,
    lease: Arc<CountingLease>,
) -> Arc<SessionContext> {
    init_tracing();
    let dispatcher = GatewayDispatcher::new(
        credentials(),
        transport,
        Arc::new(Sha256Digester),
        lease,
        config.queue_capacity,
    );
    let session = SessionContext::new(config, Arc::new(dispatcher)).unwrap();
    session.initialize().await.unwrap();
    Arc::new(session)
}

/// Open, fill and commit one content-addressed object
pub async fn put(session: &SessionContext, data: &[u8], force_dispatch: bool) -> BucketHandle {
    let handle = session.new_bucket().await.unwrap();
    session.write(handle, data).await.unwrap();
    session
        .commit_bucket(
            BucketKind::Cas,
            Sha256Digester.compute(data),
            handle,
            "",
            force_dispatch,
        )
        .await
        .unwrap();
    handle
}

/// Split a payload request back into its pack
pub fn decode_pack(request: &GatewayRequest) -> ReceivedPack {
    let envelope_len: usize = request.header("Message-Size").unwrap().parse().unwrap();
    let raw = STANDARD.decode(&request.body[envelope_len..]).unwrap();
    ReceivedPack::parse(&raw).unwrap()
}

/// Payload bytes of every object sent, in upload order
pub fn sent_objects(transport: &FakeTransport) -> Vec<Vec<u8>> {
    transport
        .received_packs()
        .into_iter()
        .flat_map(|pack| pack.objects.into_iter().map(|object| object.data.to_vec()))
        .collect()
}
