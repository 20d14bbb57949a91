//! Two-currency conversion (USD and bolivares) plus the dollar-price source.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::app::AppState;
use crate::constants::*;

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct Currency {
    pub code: &'static str,
    pub symbol: &'static str,
    pub name: &'static str,
}

pub const CURRENCIES: [Currency; 6] = [
    Currency { code: "USD", symbol: "$", name: "US Dollar" },
    Currency { code: "EUR", symbol: "€", name: "Euro" },
    Currency { code: "GBP", symbol: "£", name: "British Pound" },
    Currency { code: "JPY", symbol: "¥", name: "Japanese Yen" },
    Currency { code: "MXN", symbol: "$", name: "Mexican Peso" },
    Currency { code: "BS", symbol: "bs", name: "Bolivares" },
];

pub fn currency(code: &str) -> Option<&'static Currency> {
    CURRENCIES.iter().find(|c| c.code.eq_ignore_ascii_case(code))
}

#[derive(Debug, Error)]
pub enum PriceError {
    #[error("price request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("price service returned status {0}")]
    Status(u16),
    #[error("price missing from response")]
    MissingPrice,
    #[error("exchange rate must be a positive number, got {0}")]
    InvalidRate(f64),
}

/// `(thousands, decimal)` separators for a currency code.
fn separators(code: &str) -> (char, char) {
    if code.eq_ignore_ascii_case("USD") {
        (',', '.')
    } else {
        ('.', ',')
    }
}

/// Parses user-typed text using the separators of `code`; `None` for garbage.
pub fn parse_amount(input: &str, code: &str) -> Option<f64> {
    let (thousands, decimal) = separators(code);
    let cleaned: String = input
        .trim()
        .chars()
        .filter(|c| *c != thousands)
        .map(|c| if c == decimal { '.' } else { c })
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Two decimals with grouped thousands, e.g. `1,234.50` (USD) or `1.234,50` (BS).
pub fn format_amount(value: f64, code: &str) -> String {
    if !value.is_finite() {
        return String::new();
    }
    let (thousands, decimal) = separators(code);
    let fixed = format!("{:.2}", value.abs());
    let (int_part, frac_part) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, digit) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(thousands);
        }
        grouped.push(digit);
    }

    let sign = if value < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("{}{}{}{}", sign, grouped, decimal, frac_part)
}

/// USD to BS multiplies by the rate, anything else divides.
pub fn convert(amount: f64, from: &str, rate: f64) -> Result<f64, PriceError> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(PriceError::InvalidRate(rate));
    }
    if from.eq_ignore_ascii_case("USD") {
        Ok(amount * rate)
    } else {
        Ok(amount / rate)
    }
}

/// Reads `monitors.bcv.price`; a response without a `bcv` monitor yields the fallback.
pub fn extract_bcv_price(body: &serde_json::Value) -> Option<f64> {
    let Some(bcv) = body.pointer("/monitors/bcv") else {
        return Some(FALLBACK_DOLLAR_PRICE);
    };
    match bcv.get("price")? {
        serde_json::Value::Number(n) => n.as_f64(),
        // Some monitors publish the price as a localized string ("41,25")
        serde_json::Value::String(s) if s.contains(',') => parse_amount(s, "BS"),
        serde_json::Value::String(s) => parse_amount(s, "USD"),
        _ => None,
    }
    .filter(|p| *p > 0.0)
}

#[derive(Debug, Clone, Copy)]
struct CachedPrice {
    price: f64,
    fetched_at: Instant,
}

/// Fetches the BCV dollar price and remembers the last good value.
#[derive(Clone)]
pub struct DollarPrice {
    url: Arc<str>,
    client: reqwest::Client,
    cached: Arc<RwLock<Option<CachedPrice>>>,
    in_flight: Arc<Mutex<()>>,
}

impl DollarPrice {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PRICE_REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self {
            url: Arc::from(url.into()),
            client,
            cached: Arc::new(RwLock::new(None)),
            in_flight: Arc::new(Mutex::new(())),
        }
    }

    pub async fn cached(&self) -> Option<f64> {
        self.cached.read().await.map(|c| c.price)
    }

    /// Cached price, fetching it first if nothing has been loaded yet.
    pub async fn current(&self) -> Result<f64, PriceError> {
        match self.cached().await {
            Some(price) => Ok(price),
            None => self.refresh().await,
        }
    }

    /// Concurrent callers share a single request: whoever waited on the lock
    /// reuses a price fetched after it started waiting.
    pub async fn refresh(&self) -> Result<f64, PriceError> {
        let started = Instant::now();
        let _guard = self.in_flight.lock().await;

        if let Some(cached) = *self.cached.read().await {
            if cached.fetched_at >= started {
                return Ok(cached.price);
            }
        }

        let price = self.fetch().await?;
        *self.cached.write().await = Some(CachedPrice {
            price,
            fetched_at: Instant::now(),
        });
        tracing::info!(price, "dollar price refreshed");
        Ok(price)
    }

    async fn fetch(&self) -> Result<f64, PriceError> {
        let response = self.client.get(self.url.as_ref()).send().await?;
        if !response.status().is_success() {
            return Err(PriceError::Status(response.status().as_u16()));
        }
        let body: serde_json::Value = response.json().await?;
        extract_bcv_price(&body).ok_or(PriceError::MissingPrice)
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct PriceQuery {
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct PriceResponse {
    pub price: f64,
}

pub async fn dollar_price_handler(
    State(state): State<AppState>,
    Query(query): Query<PriceQuery>,
) -> Result<(StatusCode, Json<PriceResponse>), (StatusCode, String)> {
    let result = if query.refresh {
        state.price.refresh().await
    } else {
        state.price.current().await
    };

    match result {
        Ok(price) => Ok((StatusCode::OK, Json(PriceResponse { price }))),
        Err(e) => {
            tracing::error!(error = %e, "failed to fetch dollar price");
            Err((StatusCode::BAD_GATEWAY, "failed to fetch data".to_string()))
        }
    }
}
