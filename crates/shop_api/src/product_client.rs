use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::try_join_all;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::retry_client::{ApiRequest, RetryClient};
use crate::session_manager::SessionContext;
use crate::types::{Availability, ParseWarning, ProductSnapshot, ShopError};

/// Settings for the product availability query
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Timeout applied to every product request (default: 30 seconds)
    pub request_timeout: Duration,

    /// Aliases per request (default: 20)
    pub batch_size: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            batch_size: 20,
        }
    }
}

/// Snapshots for every requested alias plus the problems met along the way
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// One snapshot per requested alias
    pub snapshots: BTreeMap<String, ProductSnapshot>,
    /// Non-fatal per-alias parse problems
    pub warnings: Vec<ParseWarning>,
}

/// Queries product availability for a set of aliases
pub struct ProductFetcher {
    client: RetryClient,
    config: FetcherConfig,
}

impl ProductFetcher {
    /// Create a new product fetcher
    pub fn new(client: RetryClient, config: FetcherConfig) -> Self {
        Self { client, config }
    }

    /// Fetch a snapshot for every alias.
    ///
    /// Aliases are queried in batches, concurrently. A batch that fails after
    /// retries fails the whole fetch with `ShopError::Fetch`; a malformed entry
    /// only degrades that alias to `Availability::Unknown`.
    pub async fn fetch(
        &self,
        session: &SessionContext,
        aliases: &[String],
    ) -> Result<FetchOutcome, ShopError> {
        let batch_size = self.config.batch_size.max(1);
        let batches: Vec<&[String]> = aliases.chunks(batch_size).collect();

        debug!(
            "Fetching {} aliases in {} batch(es)",
            aliases.len(),
            batches.len()
        );

        let results = try_join_all(
            batches
                .iter()
                .map(|batch| self.fetch_batch(session, batch)),
        )
        .await?;

        let mut outcome = FetchOutcome::default();
        for (snapshots, warnings) in results {
            for snapshot in snapshots {
                outcome.snapshots.insert(snapshot.alias.clone(), snapshot);
            }
            outcome.warnings.extend(warnings);
        }

        for warning in &outcome.warnings {
            warn!("Parse warning: {}", warning);
        }

        info!(
            "Fetched {} snapshots ({} parse warnings)",
            outcome.snapshots.len(),
            outcome.warnings.len()
        );
        Ok(outcome)
    }

    async fn fetch_batch(
        &self,
        session: &SessionContext,
        batch: &[String],
    ) -> Result<(Vec<ProductSnapshot>, Vec<ParseWarning>), ShopError> {
        let observed_at = Utc::now();
        let filter = batch.join(",");
        let limit = batch.len().to_string();

        let response = self
            .client
            .execute_with(|| {
                ApiRequest::get(
                    format!("{}/api/1/entity/ms.products", session.base_url()),
                    self.config.request_timeout,
                )
                .query("fields[name]", "1")
                .query("fields[alias]", "1")
                .query("fields[available]", "1")
                .query("fields[inventory_quantity]", "1")
                .query("fields[price]", "1")
                .query("filters[0][field]", "alias")
                .query("filters[0][value]", filter.as_str())
                .query("filters[0][operator]", "in")
                .query("substore", session.store())
                .query("limit", limit.as_str())
                .headers(session.signed_headers())
            })
            .await
            .map_err(|e| ShopError::Fetch(format!("product query failed: {}", e)))?;

        let entries = parse_envelope(&response.body)?;

        Ok(normalize_batch(batch, &entries, observed_at))
    }
}

fn parse_envelope(body: &str) -> Result<Vec<Value>, ShopError> {
    let envelope: Value = serde_json::from_str(body)
        .map_err(|e| ShopError::Fetch(format!("Failed to parse product response: {}", e)))?;

    envelope
        .get("data")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| ShopError::Fetch("product response has no data array".to_string()))
}

/// Turn the raw entries of one response into a snapshot per requested alias.
///
/// Requested aliases missing from the response get an unknown snapshot;
/// entries for aliases that were not requested are ignored.
pub fn normalize_batch(
    aliases: &[String],
    entries: &[Value],
    observed_at: DateTime<Utc>,
) -> (Vec<ProductSnapshot>, Vec<ParseWarning>) {
    let mut by_alias: HashMap<&str, &Value> = HashMap::new();

    for entry in entries {
        match entry.get("alias").and_then(Value::as_str) {
            Some(alias) if aliases.iter().any(|wanted| wanted == alias) => {
                by_alias.entry(alias).or_insert(entry);
            }
            Some(alias) => debug!("Ignoring unrequested alias {}", alias),
            None => debug!("Ignoring product entry without alias"),
        }
    }

    let mut snapshots = Vec::with_capacity(aliases.len());
    let mut warnings = Vec::new();

    for alias in aliases {
        match by_alias.get(alias.as_str()) {
            Some(entry) => snapshots.push(parse_entry(alias, entry, observed_at, &mut warnings)),
            None => {
                warnings.push(ParseWarning {
                    alias: alias.clone(),
                    detail: "missing from response".to_string(),
                });
                snapshots.push(ProductSnapshot::unknown(alias, observed_at));
            }
        }
    }

    (snapshots, warnings)
}

fn parse_entry(
    alias: &str,
    entry: &Value,
    observed_at: DateTime<Utc>,
    warnings: &mut Vec<ParseWarning>,
) -> ProductSnapshot {
    let mut warn_about = |detail: String| {
        warnings.push(ParseWarning {
            alias: alias.to_string(),
            detail,
        })
    };

    let available = match entry.get("available") {
        None | Some(Value::Null) => {
            warn_about("availability field missing".to_string());
            Availability::Unknown
        }
        Some(value) => parse_available(value).unwrap_or_else(|| {
            warn_about(format!("unrecognised availability value {}", value));
            Availability::Unknown
        }),
    };

    let inventory_quantity = match entry.get("inventory_quantity") {
        None | Some(Value::Null) => None,
        Some(value) => {
            let quantity = parse_quantity(value);
            if quantity.is_none() {
                warn_about(format!("invalid inventory quantity {}", value));
            }
            quantity
        }
    };

    let price = match entry.get("price") {
        None | Some(Value::Null) => None,
        Some(value) => {
            let price = parse_price(value);
            if price.is_none() {
                warn_about(format!("non-numeric price {}", value));
            }
            price
        }
    };

    ProductSnapshot {
        alias: alias.to_string(),
        available,
        inventory_quantity,
        price,
        observed_at,
    }
}

fn parse_available(value: &Value) -> Option<Availability> {
    match value {
        Value::Bool(flag) => Some(Availability::from(Some(*flag))),
        Value::Number(number) => match number.as_i64() {
            Some(1) => Some(Availability::Available),
            Some(0) => Some(Availability::Unavailable),
            _ => None,
        },
        Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(Availability::Available),
            "false" | "0" => Some(Availability::Unavailable),
            _ => None,
        },
        _ => None,
    }
}

fn parse_quantity(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number.as_u64().or_else(|| {
            number
                .as_f64()
                .filter(|quantity| *quantity >= 0.0 && quantity.fract() == 0.0)
                .map(|quantity| quantity as u64)
        }),
        Value::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    }
}

fn parse_price(value: &Value) -> Option<f64> {
    let price = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };

    price.filter(|price| price.is_finite())
}
