use std::sync::Arc;
use std::time::Duration;

use optionsd_service::fetch::FetchError;
use optionsd_service::pipeline::PipelineError;
use optionsd_service::types::{OptionKind, RequestDescriptor};

use crate::{
    Outcome, ScriptedFetcher, aapl_call, aged, payload, refresh_finished, setup_pipeline,
};

#[tokio::test]
async fn test_fresh_entry_served_from_cache() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let pipeline = setup_pipeline(fetcher.clone(), |_| ());
    pipeline
        .cache()
        .insert_at(aapl_call(), payload(42.0), aged(Duration::from_secs(10)));

    let response = pipeline.request(aapl_call()).await;
    assert_eq!(response, Ok(payload(42.0)));
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn test_miss_then_fresh() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let pipeline = setup_pipeline(fetcher.clone(), |_| ());

    assert_eq!(pipeline.request(aapl_call()).await, Ok(payload(101.0)));
    assert_eq!(pipeline.request(aapl_call()).await, Ok(payload(101.0)));
    assert_eq!(fetcher.calls(), 1);

    // a different strike is a different entry
    let struck = aapl_call().with_strike(150.0);
    assert_eq!(pipeline.request(struck).await, Ok(payload(102.0)));
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_stale_entry_refreshed_in_background() {
    let fetcher = Arc::new(ScriptedFetcher::gated());
    let pipeline = setup_pipeline(fetcher.clone(), |_| ());
    let key = aapl_call();
    pipeline
        .cache()
        .insert_at(key.clone(), payload(1.0), aged(Duration::from_secs(120)));
    assert!(!pipeline.cache().is_refreshing(&key));

    // served stale without waiting on the blocked fetcher
    assert_eq!(pipeline.request(key.clone()).await, Ok(payload(1.0)));
    assert!(pipeline.cache().is_refreshing(&key));

    // while refreshing, another request is served stale without a second fetch
    assert_eq!(pipeline.request(key.clone()).await, Ok(payload(1.0)));
    fetcher.wait_for_calls(1).await;
    assert_eq!(fetcher.calls(), 1);

    fetcher.open(1);
    refresh_finished(&pipeline, &key).await;
    assert_eq!(fetcher.calls(), 1);

    let entry = pipeline.cache().get(&key).unwrap();
    assert_eq!(entry.data, payload(101.0));
    assert!(!entry.refreshing);

    // the refreshed entry is fresh
    assert_eq!(pipeline.request(key).await, Ok(payload(101.0)));
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_failed_refresh_keeps_stale_entry() {
    let fetcher = Arc::new(
        ScriptedFetcher::new().script([Outcome::Fail(FetchError::Upstream("boom".into()))]),
    );
    let pipeline = setup_pipeline(fetcher.clone(), |_| ());
    let key = aapl_call();
    let timestamp = aged(Duration::from_secs(120));
    pipeline.cache().insert_at(key.clone(), payload(1.0), timestamp);

    assert_eq!(pipeline.request(key.clone()).await, Ok(payload(1.0)));
    fetcher.wait_for_calls(1).await;
    refresh_finished(&pipeline, &key).await;

    let entry = pipeline.cache().get(&key).unwrap();
    assert_eq!(entry.data, payload(1.0));
    assert_eq!(entry.timestamp, timestamp);

    // the next stale hit tries again
    assert_eq!(pipeline.request(key.clone()).await, Ok(payload(1.0)));
    fetcher.wait_for_calls(2).await;
    refresh_finished(&pipeline, &key).await;
    assert_eq!(pipeline.cache().get(&key).unwrap().data, payload(102.0));
}

#[tokio::test]
async fn test_panicking_refresh_clears_flag() {
    let fetcher = Arc::new(ScriptedFetcher::new().script([Outcome::Panic]));
    let pipeline = setup_pipeline(fetcher.clone(), |_| ());
    let key = aapl_call();
    pipeline
        .cache()
        .insert_at(key.clone(), payload(1.0), aged(Duration::from_secs(120)));

    assert_eq!(pipeline.request(key.clone()).await, Ok(payload(1.0)));
    fetcher.wait_for_calls(1).await;
    refresh_finished(&pipeline, &key).await;
    assert_eq!(pipeline.cache().get(&key).unwrap().data, payload(1.0));
}

#[tokio::test]
async fn test_expired_entry_fetched() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let pipeline = setup_pipeline(fetcher.clone(), |_| ());
    let key = aapl_call();
    let timestamp = aged(Duration::from_secs(600));
    pipeline.cache().insert_at(key.clone(), payload(1.0), timestamp);

    assert_eq!(pipeline.request(key.clone()).await, Ok(payload(101.0)));
    assert_eq!(fetcher.calls(), 1);

    let entry = pipeline.cache().get(&key).unwrap();
    assert_eq!(entry.data, payload(101.0));
    assert!(entry.timestamp > timestamp);
}

#[tokio::test]
async fn test_failed_fetch_keeps_expired_entry() {
    let error = FetchError::NoPriceHistory {
        symbol: "AAPL".into(),
    };
    let fetcher = Arc::new(ScriptedFetcher::new().script([Outcome::Fail(error.clone())]));
    let pipeline = setup_pipeline(fetcher.clone(), |_| ());
    let key = aapl_call();
    let timestamp = aged(Duration::from_secs(600));
    pipeline.cache().insert_at(key.clone(), payload(1.0), timestamp);

    assert_eq!(
        pipeline.request(key.clone()).await,
        Err(PipelineError::Fetch(error))
    );

    let entry = pipeline.cache().get(&key).unwrap();
    assert_eq!(entry.data, payload(1.0));
    assert_eq!(entry.timestamp, timestamp);
}

#[tokio::test]
async fn test_failed_fetch_not_cached() {
    let fetcher = Arc::new(
        ScriptedFetcher::new().script([Outcome::Fail(FetchError::Upstream("boom".into()))]),
    );
    let pipeline = setup_pipeline(fetcher.clone(), |_| ());

    assert!(pipeline.request(aapl_call()).await.is_err());
    assert!(pipeline.cache().get(&aapl_call()).is_none());
    assert_eq!(pipeline.request(aapl_call()).await, Ok(payload(102.0)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_overloaded_when_full() {
    let fetcher = Arc::new(ScriptedFetcher::new().script((0..5).map(|_| Outcome::Hang)));
    let pipeline = setup_pipeline(fetcher.clone(), |config| config.queue_capacity = 5);

    let mut pending = Vec::new();
    for strike in 0..5 {
        let descriptor = aapl_call().with_strike(strike as f64);
        pending.push(pipeline.submit(descriptor).unwrap());
    }
    fetcher.wait_for_calls(1).await;
    assert_eq!(pipeline.in_flight(), 5);

    let rejected = tokio::time::timeout(Duration::from_secs(1), async {
        pipeline.request(RequestDescriptor::new("MSFT", OptionKind::Put)).await
    })
    .await
    .unwrap();
    assert_eq!(rejected, Err(PipelineError::Overloaded));

    // the rejected request was neither queued nor fetched
    assert_eq!(pipeline.in_flight(), 5);
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_slots_released_after_processing() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let pipeline = setup_pipeline(fetcher.clone(), |config| config.queue_capacity = 1);

    for strike in 0..3 {
        let descriptor = aapl_call().with_strike(strike as f64);
        assert!(pipeline.request(descriptor).await.is_ok());
    }
    assert_eq!(pipeline.in_flight(), 0);
    assert_eq!(fetcher.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_fetch_timeout() {
    let fetcher = Arc::new(ScriptedFetcher::new().script([Outcome::Hang]));
    let pipeline = setup_pipeline(fetcher.clone(), |config| {
        config.fetch_timeout = Duration::from_secs(10)
    });

    assert_eq!(
        pipeline.request(aapl_call()).await,
        Err(PipelineError::Fetch(FetchError::Timeout(Duration::from_secs(10))))
    );
    assert!(pipeline.cache().get(&aapl_call()).is_none());
    assert_eq!(pipeline.in_flight(), 0);
}

#[tokio::test]
async fn test_worker_survives_panic() {
    let fetcher = Arc::new(ScriptedFetcher::new().script([Outcome::Panic]));
    let pipeline = setup_pipeline(fetcher.clone(), |_| ());

    assert_eq!(
        pipeline.request(aapl_call()).await,
        Err(PipelineError::WorkerInternal)
    );
    assert_eq!(pipeline.request(aapl_call()).await, Ok(payload(102.0)));
    assert_eq!(pipeline.in_flight(), 0);
}

#[tokio::test]
async fn test_shutdown_resolves_queued_requests() {
    let fetcher = Arc::new(ScriptedFetcher::gated());
    let pipeline = setup_pipeline(fetcher.clone(), |_| ());

    let first = pipeline.submit(aapl_call()).unwrap();
    let second = pipeline.submit(aapl_call().with_strike(1.0)).unwrap();
    let third = pipeline.submit(aapl_call().with_strike(2.0)).unwrap();
    fetcher.wait_for_calls(1).await;

    let shutdown = pipeline.shutdown();
    tokio::pin!(shutdown);
    assert!(futures::poll!(&mut shutdown).is_pending());
    assert_eq!(
        pipeline.submit(aapl_call()).unwrap_err(),
        PipelineError::ShutDown
    );

    // the request being processed completes, queued ones do not
    fetcher.open(1);
    shutdown.await;

    assert_eq!(first.await, Ok(payload(101.0)));
    assert_eq!(second.await, Err(PipelineError::ShutDown));
    assert_eq!(third.await, Err(PipelineError::ShutDown));
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_stale_scenario_with_defaults() {
    // ttl 60s, swr 300s, capacity 5, and an entry written two minutes ago
    let fetcher = Arc::new(ScriptedFetcher::gated());
    let pipeline = setup_pipeline(fetcher.clone(), |_| ());
    let key = aapl_call();
    pipeline
        .cache()
        .insert_at(key.clone(), payload(1.0), aged(Duration::from_secs(120)));

    let mut flags = vec![pipeline.cache().is_refreshing(&key)];
    assert_eq!(pipeline.request(key.clone()).await, Ok(payload(1.0)));
    flags.push(pipeline.cache().is_refreshing(&key));

    fetcher.open(1);
    refresh_finished(&pipeline, &key).await;
    flags.push(pipeline.cache().is_refreshing(&key));

    assert_eq!(flags, [false, true, false]);
    assert_eq!(fetcher.calls(), 1);
}
