use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tri-state availability as reported by the shop.
///
/// Stored as a nullable boolean so that state files stay readable by older and
/// newer builds alike: `true`, `false`, or `null` for unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<bool>", into = "Option<bool>")]
pub enum Availability {
    /// The product can be added to the cart.
    Available,
    /// The product is listed but sold out.
    Unavailable,
    /// The API omitted or malformed the field.
    #[default]
    Unknown,
}

impl Availability {
    /// Whether this is a definite "available".
    pub fn is_available(self) -> bool {
        matches!(self, Availability::Available)
    }
}

impl From<Option<bool>> for Availability {
    fn from(value: Option<bool>) -> Self {
        match value {
            Some(true) => Availability::Available,
            Some(false) => Availability::Unavailable,
            None => Availability::Unknown,
        }
    }
}

impl From<Availability> for Option<bool> {
    fn from(value: Availability) -> Self {
        match value {
            Availability::Available => Some(true),
            Availability::Unavailable => Some(false),
            Availability::Unknown => None,
        }
    }
}

impl fmt::Display for Availability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Availability::Available => "available",
            Availability::Unavailable => "sold out",
            Availability::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Observed state of one product alias at one point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    /// Stable product identifier used by the shop
    pub alias: String,

    /// Whether the product can currently be bought
    #[serde(default)]
    pub available: Availability,

    /// Units in stock, when reported
    #[serde(default)]
    pub inventory_quantity: Option<u64>,

    /// Listed price, when reported
    #[serde(default)]
    pub price: Option<f64>,

    /// When this observation was made
    pub observed_at: DateTime<Utc>,
}

impl ProductSnapshot {
    /// Snapshot for an alias the response did not describe usably.
    pub fn unknown(alias: &str, observed_at: DateTime<Utc>) -> Self {
        Self {
            alias: alias.to_string(),
            available: Availability::Unknown,
            inventory_quantity: None,
            price: None,
            observed_at,
        }
    }
}

/// Errors raised while talking to the shop API
#[derive(thiserror::Error, Debug)]
pub enum ShopError {
    /// Transient failure that persisted through every retry attempt
    #[error("Network error after {attempts} attempt(s): {message}")]
    Network {
        /// Number of attempts made
        attempts: u32,
        /// Last failure observed
        message: String,
    },

    /// Definitive client-side rejection, never retried
    #[error("Client error: HTTP {status}: {body}")]
    Client {
        /// HTTP status code
        status: u16,
        /// Response body, truncated
        body: String,
    },

    /// A usable session could not be established
    #[error("Session error: {0}")]
    Session(String),

    /// The product query could not be completed
    #[error("Fetch error: {0}")]
    Fetch(String),
}

/// Failure of a single transport attempt
#[derive(thiserror::Error, Debug, Clone)]
pub enum TransportError {
    /// The request did not complete within its timeout
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The connection could not be established
    #[error("connection failed: {0}")]
    Connect(String),

    /// Any other transport-level failure
    #[error("transport failure: {0}")]
    Other(String),
}

/// Non-fatal problem with one alias in a product response
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("alias {alias}: {detail}")]
pub struct ParseWarning {
    /// Alias whose entry was unusable
    pub alias: String,
    /// What was wrong with it
    pub detail: String,
}
