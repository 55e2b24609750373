//! The request descriptor and the option payload passed through the pipeline.
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Whether an option is a call or a put.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    Call,
    Put,
}

impl OptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Put => "put",
        }
    }
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error parsing an [`OptionKind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("option kind must be 'call' or 'put', got {0:?}")]
pub struct ParseOptionKindError(String);

impl FromStr for OptionKind {
    type Err = ParseOptionKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("call") {
            Ok(Self::Call)
        } else if s.eq_ignore_ascii_case("put") {
            Ok(Self::Put)
        } else {
            Err(ParseOptionKindError(s.to_owned()))
        }
    }
}

impl<'de> Deserialize<'de> for OptionKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A requested strike price.
///
/// Compares and hashes by value so that it can be part of a cache key. `-0.0` and `0.0` are the
/// same strike.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Strike(pub f64);

impl Strike {
    fn bits(&self) -> u64 {
        if self.0 == 0.0 {
            0.0f64.to_bits()
        } else {
            self.0.to_bits()
        }
    }
}

impl PartialEq for Strike {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for Strike {}

impl Hash for Strike {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state)
    }
}

impl fmt::Display for Strike {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A request for the data of a single option contract.
///
/// The descriptor doubles as its own cache key: two descriptors hit the same cache entry exactly
/// when all four fields are equal. An unspecified expiration or strike is a different key than
/// any concrete value, even the one it would resolve to.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestDescriptor {
    /// The ticker of the underlying, e.g. `AAPL`.
    pub symbol: String,
    /// Call or put.
    pub kind: OptionKind,
    /// Expiration date as `YYYY-MM-DD`, the nearest listed expiration if unset.
    #[serde(default)]
    pub expiration: Option<String>,
    /// The desired strike, the strike closest to the spot price if unset.
    #[serde(default)]
    pub strike: Option<Strike>,
}

impl RequestDescriptor {
    /// Creates a descriptor for the nearest expiration and the at-the-money strike.
    pub fn new(symbol: impl Into<String>, kind: OptionKind) -> Self {
        Self {
            symbol: symbol.into(),
            kind,
            expiration: None,
            strike: None,
        }
    }

    pub fn with_expiration(mut self, expiration: impl Into<String>) -> Self {
        self.expiration = Some(expiration.into());
        self
    }

    pub fn with_strike(mut self, strike: f64) -> Self {
        self.strike = Some(Strike(strike));
        self
    }
}

impl fmt::Display for RequestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.symbol, self.kind)?;
        if let Some(ref expiration) = self.expiration {
            write!(f, " exp={expiration}")?;
        }
        if let Some(strike) = self.strike {
            write!(f, " strike={strike}")?;
        }
        Ok(())
    }
}

/// The inputs of a Black-Scholes valuation for one option contract.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptionPayload {
    /// Latest price of the underlying.
    #[serde(rename = "S")]
    pub spot: f64,
    /// Strike of the selected contract.
    #[serde(rename = "K")]
    pub strike: f64,
    /// Time to expiration in years.
    #[serde(rename = "T")]
    pub time_to_expiry: f64,
    /// Annualized risk-free rate.
    #[serde(rename = "r")]
    pub risk_free_rate: f64,
    /// Implied volatility of the selected contract.
    #[serde(rename = "sigma")]
    pub implied_volatility: f64,
    #[serde(rename = "option_type")]
    pub kind: OptionKind,
}
