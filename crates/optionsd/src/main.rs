//! optionsd.
//!
//! optionsd is a standalone web service that serves the inputs of a Black-Scholes valuation for
//! listed options: the spot price, strike, time to expiry, risk-free rate, and implied volatility
//! of a single contract. Requests go through a bounded queue and are answered from a
//! stale-while-revalidate cache whenever possible.

#![warn(missing_debug_implementations, clippy::all)]

mod cli;
mod endpoints;
mod healthcheck;
mod logging;
mod server;
mod service;


#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
