use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::channel::oneshot;
use tokio::sync::{OwnedSemaphorePermit, mpsc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::caching::Freshness;
use crate::fetch::{DataFetcher, FetchError};
use crate::types::{OptionPayload, RequestDescriptor};
use crate::utils::futures::{m, measure};

use super::{PipelineContext, PipelineError};

pub(super) type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedRequest>>>;

type Response = Result<OptionPayload, PipelineError>;

/// Delivers the response of a single request.
///
/// A `Responder` resolves at most once. Dropping it unresolved delivers
/// [`PipelineError::WorkerInternal`].
#[derive(Debug)]
pub(super) struct Responder {
    sender: Option<oneshot::Sender<Response>>,
}

impl Responder {
    pub fn new(sender: oneshot::Sender<Response>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// Delivers `response`, unless a response was already delivered.
    ///
    /// Returns `true` if this call resolved the responder. A caller that stopped waiting still
    /// counts as resolved.
    pub fn resolve(&mut self, response: Response) -> bool {
        match self.sender.take() {
            Some(sender) => {
                // the caller may have given up on the response
                sender.send(response).ok();
                true
            }
            None => false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.sender.is_none()
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        self.resolve(Err(PipelineError::WorkerInternal));
    }
}

/// A request admitted to the queue.
#[derive(Debug)]
pub(super) struct QueuedRequest {
    descriptor: RequestDescriptor,
    responder: Responder,
    enqueued_at: Instant,
    /// Released when the request is dropped after processing.
    _slot: OwnedSemaphorePermit,
}

impl QueuedRequest {
    pub fn new(
        descriptor: RequestDescriptor,
        responder: Responder,
        slot: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            descriptor,
            responder,
            enqueued_at: Instant::now(),
            _slot: slot,
        }
    }
}

/// Processes queued requests one at a time until `shutdown` is cancelled or the queue closes.
///
/// Requests left in the queue afterwards are resolved with [`PipelineError::ShutDown`].
pub(super) async fn run(
    context: Arc<PipelineContext>,
    receiver: SharedReceiver,
    shutdown: CancellationToken,
) {
    let mut receiver = receiver.lock().await;
    tracing::info!("Pipeline worker started");

    loop {
        let request = tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,
            request = receiver.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        context.handle(request).await;
    }

    receiver.close();
    let mut dropped = 0;
    while let Ok(mut request) = receiver.try_recv() {
        request.responder.resolve(Err(PipelineError::ShutDown));
        dropped += 1;
    }

    tracing::info!(dropped, "Pipeline worker stopped");
}

impl PipelineContext {
    async fn handle(&self, request: QueuedRequest) {
        let QueuedRequest {
            descriptor,
            mut responder,
            enqueued_at,
            _slot,
        } = request;
        metric!(timer("pipeline.queue_wait") = enqueued_at.elapsed());

        let processed = AssertUnwindSafe(self.process(&descriptor, &mut responder))
            .catch_unwind()
            .await;

        if let Err(panic) = processed {
            let message = panic_message(&*panic);
            if responder.is_resolved() {
                tracing::error!(
                    %descriptor,
                    "Pipeline worker panicked after responding, error swallowed: {message}"
                );
            } else {
                tracing::error!(%descriptor, "Pipeline worker panicked: {message}");
                responder.resolve(Err(PipelineError::WorkerInternal));
            }
        }
        // `_slot` is released here
    }

    async fn process(&self, descriptor: &RequestDescriptor, responder: &mut Responder) {
        let entry = self.cache.get(descriptor);
        let freshness = self.policy.classify_entry(Instant::now(), entry.as_ref());
        let access = match entry {
            Some(_) => freshness.as_str(),
            None => "miss",
        };
        metric!(counter("cache.access") += 1, "freshness" => access);

        match (freshness, entry) {
            (Freshness::Fresh, Some(entry)) => {
                responder.resolve(Ok(entry.data));
                return;
            }
            (Freshness::Stale, Some(entry)) => {
                let token = self.cache.try_begin_refresh(descriptor);
                responder.resolve(Ok(entry.data));
                if let Some(token) = token {
                    self.spawn_refresh(descriptor.clone(), token);
                }
                return;
            }
            _ => {}
        }

        let result = fetch_with_timeout(&*self.fetcher, descriptor, self.fetch_timeout).await;
        match result {
            Ok(payload) => {
                self.cache.insert(descriptor.clone(), payload.clone());
                responder.resolve(Ok(payload));
            }
            Err(err) => {
                tracing::debug!(%descriptor, error = %err, "Fetching option data failed");
                responder.resolve(Err(err.into()));
            }
        }
    }
}

/// Fetches `descriptor`, giving up after `timeout`.
pub(super) async fn fetch_with_timeout(
    fetcher: &dyn DataFetcher,
    descriptor: &RequestDescriptor,
    timeout: Duration,
) -> Result<OptionPayload, FetchError> {
    let fetch = tokio::time::timeout(timeout, fetcher.fetch(descriptor));
    match measure("fetch", m::timed_result, fetch).await {
        Ok(result) => result,
        Err(_elapsed) => Err(FetchError::Timeout(timeout)),
    }
}

pub(super) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
