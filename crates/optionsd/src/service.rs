use std::sync::Arc;

use anyhow::{Context, Result};
use optionsd_service::config::Config;
use optionsd_service::fetch::{MarketData, OptionDataFetcher, YahooMarketData};
use optionsd_service::pipeline::Pipeline;

/// The state shared by all request handlers.
#[derive(Clone, Debug)]
pub struct RequestService {
    inner: Arc<RequestServiceInner>,
}

struct RequestServiceInner {
    pipeline: Pipeline,
    market: Arc<dyn MarketData>,
}

impl std::fmt::Debug for RequestServiceInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestServiceInner")
            .field("pipeline", &self.pipeline)
            .finish_non_exhaustive()
    }
}

impl RequestService {
    /// Creates the pipeline and the upstream client from the configuration.
    ///
    /// This must be called within a tokio runtime.
    pub fn create(config: &Config) -> Result<Self> {
        let yahoo = YahooMarketData::new(&config.upstream)
            .context("failed to create the upstream client")?;
        let fetcher = OptionDataFetcher::new(yahoo.clone(), config.upstream.risk_free_rate);
        let pipeline = Pipeline::new(&config.pipeline, Arc::new(fetcher))?;

        Ok(Self::new(pipeline, Arc::new(yahoo)))
    }

    pub fn new(pipeline: Pipeline, market: Arc<dyn MarketData>) -> Self {
        Self {
            inner: Arc::new(RequestServiceInner { pipeline, market }),
        }
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    pub fn market(&self) -> &dyn MarketData {
        &*self.inner.market
    }
}
