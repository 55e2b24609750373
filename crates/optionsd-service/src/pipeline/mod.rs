//! The bounded request pipeline.
//!
//! Requests are admitted through [`Pipeline::submit`], which either enqueues them right away or
//! rejects them as [`PipelineError::Overloaded`]. A single worker task drains the queue in FIFO
//! order. Each request holds one of `queue_capacity` slots from admission until the worker is done
//! with it, so queued requests and the one being processed count against the same limit.
//!
//! The worker serves fresh and stale cache entries without waiting on the upstream. Stale entries
//! get a background refresh, at most one per key at a time.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use anyhow::Context as _;
use futures::FutureExt;
use futures::channel::oneshot;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{TryAcquireError, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::caching::{CacheStore, FreshnessPolicy};
use crate::config::PipelineConfig;
use crate::fetch::{DataFetcher, FetchError};
use crate::types::{OptionPayload, RequestDescriptor};

mod refresh;
mod worker;

use worker::{QueuedRequest, Responder, SharedReceiver};

/// An error returned for a request submitted to the [`Pipeline`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    /// All queue slots are taken.
    #[error("system overloaded: request queue is full, try again later")]
    Overloaded,
    /// The upstream fetch failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// Processing the request failed unexpectedly.
    #[error("internal error while processing the request")]
    WorkerInternal,
    /// The pipeline stopped before the request was processed.
    #[error("the request pipeline is shutting down")]
    ShutDown,
}

/// State shared by the worker and the refresh tasks it spawns.
pub struct PipelineContext {
    cache: CacheStore,
    policy: FreshnessPolicy,
    fetcher: Arc<dyn DataFetcher>,
    fetch_timeout: Duration,
}

impl PipelineContext {
    pub fn new(
        cache: CacheStore,
        policy: FreshnessPolicy,
        fetcher: Arc<dyn DataFetcher>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            policy,
            fetcher,
            fetch_timeout,
        }
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("cache", &self.cache)
            .field("policy", &self.policy)
            .field("fetch_timeout", &self.fetch_timeout)
            .finish_non_exhaustive()
    }
}

struct PipelineInner {
    context: Arc<PipelineContext>,
    capacity: usize,
    slots: Arc<tokio::sync::Semaphore>,
    sender: mpsc::Sender<QueuedRequest>,
    receiver: SharedReceiver,
    worker: Mutex<Option<JoinHandle<()>>>,
    runtime: tokio::runtime::Handle,
    shutdown: CancellationToken,
}

impl PipelineInner {
    fn spawn_worker(&self) -> JoinHandle<()> {
        self.runtime.spawn(worker::run(
            Arc::clone(&self.context),
            Arc::clone(&self.receiver),
            self.shutdown.clone(),
        ))
    }
}

impl Drop for PipelineInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Admits option data requests and hands out their responses.
///
/// Cloning a `Pipeline` gives another handle to the same queue and worker. The worker stops once
/// [`shutdown`](Self::shutdown) is called or the last handle is dropped.
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("capacity", &self.inner.capacity)
            .field("in_flight", &self.in_flight())
            .field("context", &self.inner.context)
            .finish()
    }
}

impl Pipeline {
    /// Creates a pipeline with an empty cache and starts its worker.
    ///
    /// This must be called within a tokio runtime, which is used to run the worker.
    pub fn new(config: &PipelineConfig, fetcher: Arc<dyn DataFetcher>) -> anyhow::Result<Self> {
        config.validate()?;
        let context = PipelineContext::new(
            CacheStore::new(config.max_entries),
            FreshnessPolicy::from_config(config)?,
            fetcher,
            config.fetch_timeout,
        );
        Self::with_context(config.queue_capacity, context)
    }

    /// Creates a pipeline around an existing cache and starts its worker.
    pub fn with_context(capacity: usize, context: PipelineContext) -> anyhow::Result<Self> {
        if capacity == 0 {
            anyhow::bail!("pipeline capacity must be at least 1");
        }
        let runtime = tokio::runtime::Handle::try_current()
            .context("the pipeline must be created within a tokio runtime")?;

        let (sender, receiver) = mpsc::channel(capacity);
        let inner = PipelineInner {
            context: Arc::new(context),
            capacity,
            slots: Arc::new(tokio::sync::Semaphore::new(capacity)),
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            worker: Mutex::new(None),
            runtime,
            shutdown: CancellationToken::new(),
        };
        *inner.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(inner.spawn_worker());

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn cache(&self) -> &CacheStore {
        &self.inner.context.cache
    }

    /// The number of admitted requests that have not been completed yet.
    pub fn in_flight(&self) -> usize {
        self.inner.capacity - self.inner.slots.available_permits()
    }

    /// Admits a request without waiting.
    ///
    /// Fails with [`PipelineError::Overloaded`] if all queue slots are taken, in which case the
    /// request is discarded. Otherwise the returned [`PendingResponse`] resolves once the worker
    /// has processed the request.
    pub fn submit(&self, descriptor: RequestDescriptor) -> Result<PendingResponse, PipelineError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(PipelineError::ShutDown);
        }
        self.ensure_worker();

        let slot = match Arc::clone(&self.inner.slots).try_acquire_owned() {
            Ok(slot) => slot,
            Err(TryAcquireError::NoPermits) => {
                metric!(counter("pipeline.rejected") += 1);
                tracing::debug!(%descriptor, "Rejecting request, request queue is full");
                return Err(PipelineError::Overloaded);
            }
            Err(TryAcquireError::Closed) => return Err(PipelineError::ShutDown),
        };

        let (sender, receiver) = oneshot::channel();
        let request = QueuedRequest::new(descriptor, Responder::new(sender), slot);
        match self.inner.sender.try_send(request) {
            Ok(()) => {}
            // The channel has as many places as there are slots, so this is not expected
            Err(TrySendError::Full(_)) => return Err(PipelineError::Overloaded),
            Err(TrySendError::Closed(_)) => return Err(PipelineError::ShutDown),
        }

        metric!(counter("pipeline.accepted") += 1);
        metric!(gauge("pipeline.in_flight") = self.in_flight() as u64);
        Ok(PendingResponse { receiver })
    }

    /// Submits a request and waits for its response.
    pub async fn request(
        &self,
        descriptor: RequestDescriptor,
    ) -> Result<OptionPayload, PipelineError> {
        self.submit(descriptor)?.await
    }

    /// Stops the worker and waits until it has exited.
    ///
    /// Requests still waiting in the queue fail with [`PipelineError::ShutDown`], the request
    /// being processed is completed first. Later submissions are rejected.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.slots.close();

        let worker = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                tracing::error!(error = &err as &dyn std::error::Error, "Pipeline worker failed");
            }
        }
    }

    /// Starts a new worker if the previous one has exited.
    fn ensure_worker(&self) {
        let mut worker = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        if self.inner.shutdown.is_cancelled() {
            return;
        }

        tracing::warn!("Pipeline worker is not running, restarting it");
        *worker = Some(self.inner.spawn_worker());
    }
}

/// The eventual response to a submitted request.
#[derive(Debug)]
#[must_use = "the response is lost when this is dropped"]
pub struct PendingResponse {
    receiver: oneshot::Receiver<Result<OptionPayload, PipelineError>>,
}

impl Future for PendingResponse {
    type Output = Result<OptionPayload, PipelineError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(self.receiver.poll_unpin(cx)) {
            Ok(result) => Poll::Ready(result),
            Err(oneshot::Canceled) => Poll::Ready(Err(PipelineError::WorkerInternal)),
        }
    }
}
