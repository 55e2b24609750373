//! Helpers for unit tests within this crate.

use crate::types::{OptionKind, OptionPayload};

/// A call option payload with the given spot price.
pub fn payload(spot: f64) -> OptionPayload {
    OptionPayload {
        spot,
        strike: 100.0,
        time_to_expiry: 0.25,
        risk_free_rate: 0.045,
        implied_volatility: 0.3,
        kind: OptionKind::Call,
    }
}
