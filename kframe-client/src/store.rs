//! Client frame store.
//!
//! Process-local cache of the merged frame. Concurrent callers that find the
//! store empty are coalesced onto one two-hop fetch (i-frame, then the
//! matching p-frame) and all receive the same outcome.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kframe_core::{
    decode_iframes, decode_pframes, merge_into_frame, MergedFrame, UpstreamError, WireError,
};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::transport::FrameTransport;

type FetchOutcome = Result<Arc<MergedFrame>, ClientError>;

enum Slot {
    Empty,
    Loading {
        id: u64,
        done: broadcast::Sender<FetchOutcome>,
        /// Cleared while loading: waiters still get the outcome, the store
        /// does not hold it.
        keep: bool,
    },
    Ready(Arc<MergedFrame>),
}

enum Role {
    Lead(u64),
    Wait(broadcast::Receiver<FetchOutcome>),
}

struct StoreState {
    slot: Mutex<Slot>,
    next_load: AtomicU64,
    round_trips: AtomicU64,
}

impl StoreState {
    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Settle load `id`: hold or forget the outcome, then wake every waiter.
    fn finish(&self, id: u64, outcome: &FetchOutcome) {
        let mut slot = self.lock();
        let Slot::Loading {
            id: current,
            done,
            keep,
        } = &*slot
        else {
            return;
        };
        if *current != id {
            return;
        }
        let (done, keep) = (done.clone(), *keep);
        *slot = match outcome {
            Ok(frame) if keep => Slot::Ready(Arc::clone(frame)),
            _ => Slot::Empty,
        };
        drop(slot);
        let _ = done.send(outcome.clone());
    }
}

/// Fails every waiter of a load whose leader was dropped mid-fetch.
struct LoadGuard<'a> {
    state: &'a StoreState,
    id: u64,
    armed: bool,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.finish(self.id, &Err(ClientError::Cancelled));
        }
    }
}

#[derive(Clone)]
pub struct ClientFrameStore {
    transport: Arc<dyn FrameTransport>,
    config: ClientConfig,
    state: Arc<StoreState>,
}

impl ClientFrameStore {
    pub fn new(transport: Arc<dyn FrameTransport>, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            state: Arc::new(StoreState {
                slot: Mutex::new(Slot::Empty),
                next_load: AtomicU64::new(0),
                round_trips: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Frame endpoint in use.
    pub fn frame_url(&self) -> &str {
        self.config.frame_url()
    }

    pub fn is_loaded(&self) -> bool {
        matches!(*self.state.lock(), Slot::Ready(_))
    }

    /// The held frame, without fetching.
    pub fn frame(&self) -> Option<Arc<MergedFrame>> {
        match &*self.state.lock() {
            Slot::Ready(frame) => Some(Arc::clone(frame)),
            _ => None,
        }
    }

    /// Drop the held frame. An in-flight fetch keeps running: its waiters,
    /// including callers arriving after the clear, still share its outcome,
    /// but the store does not hold the result.
    pub fn clear_frame(&self) {
        let mut slot = self.state.lock();
        match &mut *slot {
            Slot::Loading { keep, .. } => *keep = false,
            other => *other = Slot::Empty,
        }
    }

    /// Number of two-hop fetches performed.
    pub fn round_trips(&self) -> u64 {
        self.state.round_trips.load(Ordering::Relaxed)
    }

    /// The merged frame, fetching it if the store is empty.
    pub async fn get_frame(&self) -> Result<Arc<MergedFrame>, ClientError> {
        self.get_frame_with_cancel(&CancellationToken::new()).await
    }

    /// Like [`get_frame`](Self::get_frame). Cancelling the token of the call
    /// performing the fetch fails every coalesced waiter with
    /// [`ClientError::Cancelled`]; cancelling a waiter's token only releases
    /// that waiter.
    pub async fn get_frame_with_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<MergedFrame>, ClientError> {
        let role = {
            let mut slot = self.state.lock();
            match &*slot {
                Slot::Ready(frame) => return Ok(Arc::clone(frame)),
                Slot::Loading { done, .. } => Role::Wait(done.subscribe()),
                Slot::Empty => {
                    let id = self.state.next_load.fetch_add(1, Ordering::Relaxed) + 1;
                    let (done, _) = broadcast::channel(1);
                    *slot = Slot::Loading {
                        id,
                        done,
                        keep: true,
                    };
                    Role::Lead(id)
                }
            }
        };

        match role {
            Role::Lead(id) => self.lead(id, cancel).await,
            Role::Wait(mut waiter) => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(ClientError::Cancelled),
                    outcome = waiter.recv() => outcome.unwrap_or(Err(ClientError::Cancelled)),
                }
            }
        }
    }

    /// The held frame if it is younger than `expires`, otherwise a fresh one.
    pub async fn check_frame(&self, expires: Duration) -> Result<Arc<MergedFrame>, ClientError> {
        if let Some(frame) = self.frame() {
            if !frame.is_expired(expires, Utc::now()) {
                return Ok(frame);
            }
            debug!(version = %frame.version, "held frame expired");
            self.clear_frame();
        }
        self.get_frame().await
    }

    async fn lead(&self, id: u64, cancel: &CancellationToken) -> FetchOutcome {
        let mut guard = LoadGuard {
            state: &self.state,
            id,
            armed: true,
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            fetched = self.lookup_frame() => fetched.map(Arc::new),
        };

        guard.armed = false;
        match &outcome {
            Ok(frame) => info!(version = %frame.version, records = frame.len(), "frame loaded"),
            Err(err) => warn!(error = %err, "frame load failed"),
        }
        self.state.finish(id, &outcome);
        outcome
    }

    /// Fetch the i-frame, then its p-frame, and merge them.
    async fn lookup_frame(&self) -> Result<MergedFrame, ClientError> {
        self.state.round_trips.fetch_add(1, Ordering::Relaxed);

        let index = decode_iframes(self.transport.execute(&self.config.iframe_path()).await?)?;
        log_skipped(&index.skipped);
        let version = match index.entries.first() {
            Some(entry) if !entry.frame.is_zero() => entry.frame,
            _ => return Err(UpstreamError::EmptyUpstreamResult.into()),
        };

        let path = self.config.pframe_path(version);
        let delta = decode_pframes(self.transport.execute(&path).await?)?;
        log_skipped(&delta.skipped);

        Ok(merge_into_frame(&index.entries, &delta.entries, Utc::now())?)
    }
}

fn log_skipped(skipped: &[WireError]) {
    for err in skipped {
        warn!(error = %err, "skipped chapter");
    }
}
