//! Exposes the command line application.
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use optionsd_service::config::Config;
use optionsd_service::metrics;
use optionsd_service::types::{OptionKind, RequestDescriptor};

use crate::healthcheck;
use crate::logging;
use crate::server;
use crate::service::RequestService;

/// optionsd commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the web server.
    Run,

    /// Fetch the data of a single option and print it as JSON.
    Fetch {
        /// Ticker of the underlying, e.g. `AAPL`.
        symbol: String,

        /// `call` or `put`.
        #[arg(long, short, default_value = "call")]
        kind: OptionKind,

        /// Expiration date as `YYYY-MM-DD`.
        ///
        /// Defaults to the nearest listed expiration.
        #[arg(long, short)]
        expiration: Option<String>,

        /// The desired strike.
        ///
        /// Defaults to the strike closest to the current price.
        #[arg(long, short)]
        strike: Option<f64>,
    },

    /// Check the health of a running server.
    Healthcheck {
        /// Address of the server, defaults to the configured `bind` address.
        #[arg(long)]
        addr: Option<SocketAddr>,

        /// Request timeout in seconds.
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },
}

/// Command line interface parser.
#[derive(Parser, Debug)]
#[command(bin_name = "optionsd", version, about)]
struct Cli {
    /// Path to your configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Returns the path to the configuration file.
    fn config(&self) -> Option<&Path> {
        self.config.as_deref()
    }
}

/// Runs the main application.
pub fn execute() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::get(cli.config()).context("failed loading config")?;

    let _sentry = sentry::init(sentry::ClientOptions {
        dsn: config.sentry_dsn.clone(),
        release: Some(env!("CARGO_PKG_VERSION").into()),
        ..Default::default()
    });

    // SAFETY: No other threads are running at this point.
    unsafe { logging::init_logging(&config) };
    if let Some(ref statsd) = config.metrics.statsd {
        metrics::configure_statsd(
            &config.metrics.prefix,
            statsd.as_str(),
            config.metrics.custom_tags.clone(),
        )
        .context("failed to configure statsd")?;
    }

    match cli.command {
        Command::Run => server::run(config).context("failed to start the server")?,
        Command::Fetch {
            symbol,
            kind,
            expiration,
            strike,
        } => {
            let mut descriptor = RequestDescriptor::new(symbol, kind);
            descriptor.expiration = expiration;
            if let Some(strike) = strike {
                descriptor = descriptor.with_strike(strike);
            }
            fetch(config, descriptor).context("failed to fetch option data")?
        }
        Command::Healthcheck { addr, timeout } => {
            healthcheck::healthcheck(&config, addr, std::time::Duration::from_secs(timeout))?
        }
    }

    Ok(())
}

/// Runs a single request through the pipeline and prints the response.
fn fetch(config: Config, descriptor: RequestDescriptor) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("optionsd-fetch")
        .enable_all()
        .build()?;

    let payload = runtime.block_on(async {
        let service = RequestService::create(&config)?;
        let payload = service.pipeline().request(descriptor).await?;
        service.pipeline().shutdown().await;
        anyhow::Ok(payload)
    })?;

    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}
