use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use sentry::{Hub, SentryFutureExt};

use crate::caching::RefreshToken;
use crate::types::RequestDescriptor;

use super::PipelineContext;
use super::worker::{fetch_with_timeout, panic_message};

impl PipelineContext {
    /// Refreshes the entry of `key` in the background.
    ///
    /// The key stays marked as refreshing until the task ends. Failures are logged and leave the
    /// stale entry in place.
    pub(super) fn spawn_refresh(&self, key: RequestDescriptor, token: RefreshToken) {
        metric!(counter("cache.refresh.spawned") += 1);
        tracing::trace!(descriptor = %key, "Spawning background refresh");

        let cache = self.cache.clone();
        let fetcher = Arc::clone(&self.fetcher);
        let timeout = self.fetch_timeout;

        let task = async move {
            let _token = token; // move into the future

            let fetched = AssertUnwindSafe(fetch_with_timeout(&*fetcher, &key, timeout))
                .catch_unwind()
                .await;

            match fetched {
                Ok(Ok(payload)) => {
                    cache.insert(key.clone(), payload);
                    tracing::debug!(descriptor = %key, "Refreshed cache entry");
                }
                Ok(Err(err)) => {
                    metric!(counter("cache.refresh.failed") += 1, "reason" => "error");
                    tracing::error!(
                        error = &err as &dyn std::error::Error,
                        descriptor = %key,
                        "Background refresh failed"
                    );
                }
                Err(panic) => {
                    metric!(counter("cache.refresh.failed") += 1, "reason" => "panic");
                    tracing::error!(
                        descriptor = %key,
                        "Background refresh panicked: {}",
                        panic_message(&*panic)
                    );
                }
            }
        };

        tokio::spawn(task.bind_hub(Hub::new_from_top(Hub::current())));
    }
}
