//! Background upload worker
//!
//! [`GatewayDispatcher`] feeds dispatched packs through a bounded queue to a
//! single worker task. The worker turns each pack into a signed payload
//! request, sends it, and publishes the outcome on the job's completion
//! handle. Jobs are processed one at a time in dispatch order.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use common::prelude::{Digester, ObjectPack};

use super::lease::{GatewayLease, Lease};
use super::protocol::{is_ok_reply, payload_request};
use super::transport::Transport;
use crate::completion::{completion, Completion, CompletionSetter};
use crate::config::LeaseCredentials;
use crate::dispatcher::PackDispatcher;
use crate::error::{LeaseError, SessionError, UploadFailure, UploadResult};
use crate::queue::{bounded, JobReceiver, JobSender};

struct UploadJob {
    job: u64,
    pack: ObjectPack,
    setter: CompletionSetter<UploadResult>,
}

/// Builds and sends the payload request for one pack
#[derive(Debug)]
struct Uploader {
    credentials: LeaseCredentials,
    transport: Arc<dyn Transport>,
    digester: Arc<dyn Digester>,
}

impl Uploader {
    async fn upload(&self, job: u64, pack: &ObjectPack) -> UploadResult {
        let fail = |reason: String| UploadFailure { job, reason };

        let request = payload_request(&self.credentials, pack, self.digester.as_ref())
            .map_err(|e| fail(e.to_string()))?;
        let reply = self
            .transport
            .send(request)
            .await
            .map_err(|e| fail(e.to_string()))?;
        if !is_ok_reply(&reply) {
            return Err(fail(format!("gateway replied: {}", reply)));
        }
        Ok(())
    }
}

/// Counters shared between the dispatcher and its worker
#[derive(Debug, Default)]
struct Progress {
    dispatched: AtomicU64,
    processed: AtomicU64,
    stopped: AtomicBool,
    drained: Notify,
}

impl Progress {
    fn is_drained(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
            || self.processed.load(Ordering::SeqCst) >= self.dispatched.load(Ordering::SeqCst)
    }
}

/// Marks the worker stopped however its task ends, so drain waiters never hang
struct StopGuard(Arc<Progress>);

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.0.stopped.store(true, Ordering::SeqCst);
        self.0.drained.notify_waiters();
    }
}

#[derive(Debug)]
struct WorkerHandle {
    jobs: JobSender<UploadJob>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for UploadJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadJob")
            .field("job", &self.job)
            .field("size", &self.pack.size())
            .finish()
    }
}

/// Uploads packs to a storage gateway from a background task
#[derive(Debug)]
pub struct GatewayDispatcher {
    uploader: Arc<Uploader>,
    lease: Arc<dyn Lease>,
    queue_capacity: usize,
    worker: Mutex<Option<WorkerHandle>>,
    progress: Arc<Progress>,
}

impl GatewayDispatcher {
    pub fn new(
        credentials: LeaseCredentials,
        transport: Arc<dyn Transport>,
        digester: Arc<dyn Digester>,
        lease: Arc<dyn Lease>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            uploader: Arc::new(Uploader {
                credentials,
                transport,
                digester,
            }),
            lease,
            queue_capacity,
            worker: Mutex::new(None),
            progress: Arc::new(Progress::default()),
        }
    }

    /// Upload under `lease` and give it back when the session ends
    pub fn with_lease(lease: GatewayLease, queue_capacity: usize) -> Self {
        let credentials = lease.credentials().clone();
        let transport = lease.transport();
        let digester = lease.digester();
        Self::new(
            credentials,
            transport,
            digester,
            Arc::new(lease),
            queue_capacity,
        )
    }

    /// Jobs handed to the worker but not yet finished
    pub fn outstanding(&self) -> u64 {
        let dispatched = self.progress.dispatched.load(Ordering::SeqCst);
        dispatched.saturating_sub(self.progress.processed.load(Ordering::SeqCst))
    }

    async fn run_worker(
        uploader: Arc<Uploader>,
        progress: Arc<Progress>,
        jobs: JobReceiver<UploadJob>,
    ) {
        let _guard = StopGuard(progress.clone());
        tracing::debug!("upload worker started");

        while let Some(UploadJob { job, pack, setter }) = jobs.recv().await {
            tracing::debug!("uploading pack {} ({} bytes)", job, pack.size());
            let result = uploader.upload(job, &pack).await;
            match &result {
                Ok(()) => tracing::info!("pack {} uploaded", job),
                Err(e) => tracing::error!("{}", e),
            }
            setter.set(result);

            progress.processed.fetch_add(1, Ordering::SeqCst);
            if progress.is_drained() {
                progress.drained.notify_waiters();
            }
        }

        tracing::debug!("upload queue closed, worker exiting");
    }
}

#[async_trait]
impl PackDispatcher for GatewayDispatcher {
    async fn initialize(&self) -> Result<(), SessionError> {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return Err(SessionError::AlreadyInitialized);
        }

        let (jobs, receiver) = bounded(self.queue_capacity);
        let task = tokio::spawn(Self::run_worker(
            self.uploader.clone(),
            self.progress.clone(),
            receiver,
        ));
        *worker = Some(WorkerHandle { jobs, task });
        Ok(())
    }

    async fn dispatch(
        &self,
        job: u64,
        pack: ObjectPack,
    ) -> Result<Completion<UploadResult>, SessionError> {
        let jobs = self
            .worker
            .lock()
            .as_ref()
            .map(|worker| worker.jobs.clone())
            .ok_or(SessionError::NotInitialized)?;

        let (setter, completion) = completion();
        self.progress.dispatched.fetch_add(1, Ordering::SeqCst);
        if jobs.send(UploadJob { job, pack, setter }).await.is_err() {
            self.progress.dispatched.fetch_sub(1, Ordering::SeqCst);
            return Err(SessionError::QueueClosed);
        }
        tracing::debug!(
            "pack {} queued, {} job(s) outstanding, {} waiting in queue",
            job,
            self.outstanding(),
            jobs.queued()
        );
        Ok(completion)
    }

    async fn wait_for_drain(&self) {
        loop {
            let notified = self.progress.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.progress.is_drained() {
                return;
            }
            notified.await;
        }
    }

    async fn drop_lease(&self) -> Result<(), LeaseError> {
        self.lease.drop_lease().await
    }

    async fn finalize(&self) -> Result<(), SessionError> {
        let handle = self.worker.lock().take();
        let Some(WorkerHandle { jobs, task }) = handle else {
            return Err(SessionError::NotInitialized);
        };
        drop(jobs);
        task.await
            .map_err(|e| SessionError::Worker(e.to_string()))?;
        tracing::debug!("upload worker joined");
        Ok(())
    }
}
