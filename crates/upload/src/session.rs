//! Publish sessions
//!
//! A [`SessionContext`] owns the pack currently being filled, tracks every
//! bucket producers have opened but not yet committed, and rotates packs when
//! they fill up. Full packs go to a [`PackDispatcher`]; the session keeps one
//! completion handle per dispatched pack and settles them all in
//! [`SessionContext::finalize`].
//!
//! # Accounting
//!
//! Every committed byte is counted once when its bucket is committed and once
//! more when the pack holding it is dispatched. Both counters only change
//! under the session lock, together with the pack they describe, so at
//! finalize they must agree; a mismatch means data was lost or duplicated
//! between commit and upload.
//!
//! # Rotation
//!
//! When a commit does not fit, every bucket still open in the current pack
//! (including the one being committed) moves to a fresh pack, the old pack is
//! dispatched, and the commit is retried once against the fresh pack.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;

use common::prelude::{BucketHandle, BucketKind, ContentHash, ObjectPack};

use crate::completion::Completion;
use crate::config::SessionConfig;
use crate::dispatcher::PackDispatcher;
use crate::error::{SessionError, UploadFailure, UploadResult};

/// Totals of a successfully finalized session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub jobs: u64,
    pub bytes_committed: u64,
    pub bytes_dispatched: u64,
}

#[derive(Debug, Default)]
struct SessionState {
    initialized: bool,
    finalized: bool,
    current: Option<ObjectPack>,
    /// buckets opened but not yet committed; all live in `current`
    active: Vec<BucketHandle>,
    /// completion handles in dispatch order
    results: VecDeque<(u64, Completion<UploadResult>)>,
    jobs_dispatched: u64,
    bytes_committed: u64,
    bytes_dispatched: u64,
}

impl SessionState {
    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.finalized {
            return Err(SessionError::Finalized);
        }
        if !self.initialized {
            return Err(SessionError::NotInitialized);
        }
        Ok(())
    }
}

/// State of one publish operation
#[derive(Debug)]
pub struct SessionContext {
    config: SessionConfig,
    dispatcher: Arc<dyn PackDispatcher>,
    state: Mutex<SessionState>,
}

impl SessionContext {
    pub fn new(
        config: SessionConfig,
        dispatcher: Arc<dyn PackDispatcher>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        Ok(Self {
            config,
            dispatcher,
            state: Mutex::new(SessionState::default()),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Reset the counters and start the dispatcher
    pub async fn initialize(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        if state.initialized || state.finalized {
            return Err(SessionError::AlreadyInitialized);
        }
        if state.current.is_some() {
            tracing::error!("could not initialize session: existing open object pack");
            return Err(SessionError::AlreadyInitialized);
        }

        *state = SessionState::default();
        self.dispatcher.initialize().await?;
        state.initialized = true;
        tracing::info!(
            "session initialized, pack limit {} bytes, queue capacity {}",
            self.config.max_pack_size,
            self.config.queue_capacity
        );
        Ok(())
    }

    /// Open a bucket in the current pack, creating the pack if needed
    pub async fn new_bucket(&self) -> Result<BucketHandle, SessionError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.ensure_open()?;

        let max_pack_size = self.config.max_pack_size;
        let pack = state
            .current
            .get_or_insert_with(|| ObjectPack::new(max_pack_size));
        let handle = pack.new_bucket();
        state.active.push(handle);
        Ok(handle)
    }

    /// Append bytes to an open bucket, wherever rotation has moved it
    pub async fn write(&self, handle: BucketHandle, data: &[u8]) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        state.ensure_open()?;
        let pack = state
            .current
            .as_mut()
            .ok_or(SessionError::NoOpenPack(handle))?;
        pack.write(handle, data)?;
        Ok(())
    }

    /// Seal a bucket into the current pack
    ///
    /// Rotates the pack if the bucket does not fit. With `force_dispatch` the
    ///  pack holding the bucket is dispatched right away; buckets other
    ///  producers still have open stay behind in a fresh pack.
    pub async fn commit_bucket(
        &self,
        kind: BucketKind,
        hash: ContentHash,
        handle: BucketHandle,
        name: &str,
        force_dispatch: bool,
    ) -> Result<(), SessionError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.ensure_open()?;

        if !self.try_commit(state, kind, hash, handle, name)? {
            tracing::debug!("pack full while committing {}, rotating", handle);
            self.rotate(state).await?;
            if !self.try_commit(state, kind, hash, handle, name)? {
                return Err(SessionError::RotationFailed(handle));
            }
        }

        if force_dispatch {
            self.rotate(state).await?;
        }
        Ok(())
    }

    /// Block until the upload queue has been drained at least once since
    ///  this call was made
    pub async fn wait_for_upload(&self) {
        let dispatched = self.state.lock().await.jobs_dispatched;
        if dispatched == 0 {
            return;
        }
        self.dispatcher.wait_for_drain().await;
    }

    /// Dispatch what is left, settle every job and release the lease
    ///
    /// Fails if the dispatcher could not shut down cleanly, if the last pack
    ///  could not be dispatched, if committed and dispatched byte counts
    ///  disagree, or if any upload failed, checked in that order. The lease is
    ///  dropped (unless configured otherwise) in every case.
    ///
    /// # Panics
    ///
    /// Panics if buckets are still open: every `new_bucket` must be matched
    ///  by a commit before the session ends.
    pub async fn finalize(&self) -> Result<SessionReport, SessionError> {
        let (dispatch_result, results, jobs, committed, dispatched) = {
            let mut guard = self.state.lock().await;
            let state = &mut *guard;
            state.ensure_open()?;
            assert!(
                state.active.is_empty(),
                "finalizing session with {} uncommitted bucket(s)",
                state.active.len()
            );
            state.finalized = true;

            // a refused last pack still has to release the lease and the worker
            let mut dispatch_result = Ok(());
            if let Some(pack) = state.current.take() {
                if pack.num_objects() > 0 {
                    dispatch_result = self.dispatch(state, pack).await;
                    if let Err(e) = &dispatch_result {
                        tracing::error!(
                            "session finalization: could not dispatch last pack: {}",
                            e
                        );
                    }
                }
            }
            (
                dispatch_result,
                std::mem::take(&mut state.results),
                state.jobs_dispatched,
                state.bytes_committed,
                state.bytes_dispatched,
            )
        };

        let mut failures = Vec::new();
        for (job, completion) in results {
            match completion.wait().await {
                Some(Ok(())) => {}
                Some(Err(failure)) => failures.push(failure),
                None => failures.push(UploadFailure {
                    job,
                    reason: "job dropped without a result".to_string(),
                }),
            }
        }

        if self.config.drop_lease {
            if let Err(e) = self.dispatcher.drop_lease().await {
                tracing::error!("session finalization: could not drop active lease: {}", e);
            }
        }

        let dispatcher_result = self.dispatcher.finalize().await;

        tracing::info!(
            "session finalized: {} job(s), {} failed, {} bytes committed, {} bytes dispatched",
            jobs,
            failures.len(),
            committed,
            dispatched
        );

        dispatcher_result?;
        dispatch_result?;
        if committed != dispatched {
            return Err(SessionError::AccountingMismatch {
                committed,
                dispatched,
            });
        }
        if !failures.is_empty() {
            return Err(SessionError::UploadsFailed(failures));
        }
        Ok(SessionReport {
            jobs,
            bytes_committed: committed,
            bytes_dispatched: dispatched,
        })
    }

    pub async fn jobs_dispatched(&self) -> u64 {
        self.state.lock().await.jobs_dispatched
    }

    pub async fn bytes_committed(&self) -> u64 {
        self.state.lock().await.bytes_committed
    }

    pub async fn bytes_dispatched(&self) -> u64 {
        self.state.lock().await.bytes_dispatched
    }

    /// Number of buckets opened but not yet committed
    pub async fn active_buckets(&self) -> usize {
        self.state.lock().await.active.len()
    }

    /// Committed bytes in the pack currently being filled
    pub async fn current_pack_size(&self) -> Option<u64> {
        self.state.lock().await.current.as_ref().map(|pack| pack.size())
    }

    /// Commit into the current pack; `Ok(false)` if it is full
    fn try_commit(
        &self,
        state: &mut SessionState,
        kind: BucketKind,
        hash: ContentHash,
        handle: BucketHandle,
        name: &str,
    ) -> Result<bool, SessionError> {
        let pack = state
            .current
            .as_mut()
            .ok_or(SessionError::NoOpenPack(handle))?;
        let size_before = pack.size();
        if !pack.commit_bucket(kind, hash, handle, name)? {
            return Ok(false);
        }
        let delta = pack.size() - size_before;

        state.active.retain(|h| *h != handle);
        state.bytes_committed += delta;
        tracing::debug!("committed {} ({} bytes) as {}", handle, delta, hash);
        Ok(true)
    }

    /// Move open buckets to a fresh pack and dispatch the old one
    async fn rotate(&self, state: &mut SessionState) -> Result<(), SessionError> {
        let Some(mut old) = state.current.take() else {
            return Ok(());
        };

        let mut next = ObjectPack::new(self.config.max_pack_size);
        for handle in &state.active {
            old.transfer_bucket(*handle, &mut next)?;
        }
        if !state.active.is_empty() {
            tracing::debug!("carried {} open bucket(s) into new pack", state.active.len());
            state.current = Some(next);
        }

        if old.num_objects() > 0 {
            self.dispatch(state, old).await?;
        }
        Ok(())
    }

    /// Hand a pack to the dispatcher, counting it while the lock is held
    async fn dispatch(&self, state: &mut SessionState, pack: ObjectPack) -> Result<(), SessionError> {
        debug_assert_eq!(pack.open_handles().count(), 0);

        let job = state.jobs_dispatched + 1;
        let size = pack.size();
        tracing::info!(
            "dispatching pack {}: {} object(s), {} bytes",
            job,
            pack.num_objects(),
            size
        );
        let completion = self.dispatcher.dispatch(job, pack).await?;

        state.jobs_dispatched = job;
        state.bytes_dispatched += size;
        state.results.push_back((job, completion));
        Ok(())
    }
}
