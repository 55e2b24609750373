use std::sync::Arc;
use std::time::Duration;

use optionsd_service::config::PipelineConfig;
use optionsd_service::pipeline::Pipeline;
use optionsd_service::types::{OptionKind, RequestDescriptor};
use optionsd_test as test;
use tokio::time::Instant;

pub use test::{Outcome, ScriptedFetcher, YahooServer, payload};

/// Setup tests and create a pipeline around the given fetcher.
///
/// The `update_config` closure can modify the default pipeline configuration before the worker
/// is started.
pub fn setup_pipeline(
    fetcher: Arc<ScriptedFetcher>,
    update_config: impl FnOnce(&mut PipelineConfig),
) -> Pipeline {
    test::setup();

    let mut config = PipelineConfig::default();
    update_config(&mut config);

    Pipeline::new(&config, fetcher).unwrap()
}

/// The descriptor of the nearest at-the-money AAPL call.
pub fn aapl_call() -> RequestDescriptor {
    RequestDescriptor::new("AAPL", OptionKind::Call)
}

/// A timestamp that lies `age` in the past.
pub fn aged(age: Duration) -> Instant {
    Instant::now() - age
}

/// Waits until no refresh is running for `key`.
pub async fn refresh_finished(pipeline: &Pipeline, key: &RequestDescriptor) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while pipeline.cache().is_refreshing(key) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
}
