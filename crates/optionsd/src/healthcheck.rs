use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use optionsd_service::config::Config;

/// Probes `/healthcheck` of a running server.
///
/// The server is healthy if it answers with a success status and an `ok` body within `timeout`.
/// Without an explicit `addr`, the configured bind address is probed.
pub fn healthcheck(
    config: &Config,
    addr: Option<SocketAddr>,
    timeout: Duration,
) -> anyhow::Result<()> {
    let addr = match addr {
        Some(addr) => addr,
        None => config
            .bind
            .parse()
            .with_context(|| format!("invalid bind address {:?}", config.bind))?,
    };

    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()?;

    let url = format!("http://{addr}/healthcheck");
    tracing::debug!(%url, "Probing server health");

    let response = client
        .get(url)
        .send()
        .with_context(|| format!("optionsd at {addr} is unreachable"))?;
    let status = response.status();
    let body = response.text().unwrap_or_default();

    if !status.is_success() || body.trim() != "ok" {
        anyhow::bail!("optionsd at {addr} is unhealthy, status {status}: {body}");
    }

    println!("OK");
    Ok(())
}

#[cfg(test)]
mod tests {
    use optionsd_test::ScriptedFetcher;

    use super::*;
    use crate::test;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_healthy_server() {
        let app = test::app(ScriptedFetcher::new());
        let addr = app.server.addr();

        let result = tokio::task::spawn_blocking(move || {
            healthcheck(&Config::default(), Some(addr), Duration::from_secs(5))
        })
        .await
        .unwrap();
        assert!(result.is_ok(), "{result:?}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unreachable_server() {
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();

        let result = tokio::task::spawn_blocking(move || {
            healthcheck(&Config::default(), Some(addr), Duration::from_secs(1))
        })
        .await
        .unwrap();
        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "optionsd at 127.0.0.1:9 is unreachable");
    }

    #[test]
    fn test_invalid_bind_address() {
        let config = Config {
            bind: "localhost".into(),
            ..Default::default()
        };
        let err = healthcheck(&config, None, Duration::from_secs(1)).unwrap_err();
        assert_eq!(err.to_string(), "invalid bind address \"localhost\"");
    }
}
