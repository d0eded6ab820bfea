// 💵 Rates & Pricing - display-only price breakdown for the shared subscription
//
// The exchange rate never touches ledger state. When it cannot be obtained
// the reminder and price messages degrade to an "unavailable" note.
//
// Sources, in the order the binaries chain them:
//   SharedRate  pushed by an admin, seeded from config
//   HttpRate    live quote from an exchangerate-api style endpoint

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Public endpoint quoting every currency against one US dollar
pub const DEFAULT_RATE_URL: &str = "https://api.exchangerate-api.com/v4/latest/USD";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct RateError(pub String);

pub trait RateProvider: Send + Sync {
    /// Units of local currency per US dollar
    fn current_usd_to_local(&self) -> Result<f64, RateError>;
}

// ============================================================================
// PROVIDERS
// ============================================================================

/// Constant rate from configuration
#[derive(Debug, Clone, Copy)]
pub struct FixedRate(pub f64);

impl RateProvider for FixedRate {
    fn current_usd_to_local(&self) -> Result<f64, RateError> {
        validate_rate(self.0)
    }
}

/// Rate pushed in from outside (admin endpoint, external poller).
/// `None` means no quote has been received yet.
#[derive(Debug, Clone, Default)]
pub struct SharedRate {
    rate: Arc<RwLock<Option<f64>>>,
}

impl SharedRate {
    pub fn new(initial: Option<f64>) -> Self {
        SharedRate {
            rate: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn set(&self, rate: Option<f64>) -> Result<(), RateError> {
        if let Some(value) = rate {
            validate_rate(value)?;
        }
        let mut guard = self
            .rate
            .write()
            .map_err(|_| RateError("rate lock poisoned".to_string()))?;
        *guard = rate;
        Ok(())
    }
}

impl RateProvider for SharedRate {
    fn current_usd_to_local(&self) -> Result<f64, RateError> {
        let guard = self
            .rate
            .read()
            .map_err(|_| RateError("rate lock poisoned".to_string()))?;
        match *guard {
            Some(rate) => validate_rate(rate),
            None => Err(RateError("no exchange rate received yet".to_string())),
        }
    }
}

/// Always fails; used when no rate source is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableRate;

impl RateProvider for UnavailableRate {
    fn current_usd_to_local(&self) -> Result<f64, RateError> {
        Err(RateError("no exchange rate source configured".to_string()))
    }
}

/// Live quote over HTTP. The endpoint answers
/// `{ "base": "USD", "rates": { "BRL": 5.43, ... } }`.
#[derive(Debug, Clone)]
pub struct HttpRate {
    agent: ureq::Agent,
    url: String,
    currency: String,
}

impl HttpRate {
    /// `timeout` bounds the whole request, connect included
    pub fn new(url: impl Into<String>, currency: impl Into<String>, timeout: Duration) -> Self {
        HttpRate {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            url: url.into(),
            currency: currency.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl RateProvider for HttpRate {
    fn current_usd_to_local(&self) -> Result<f64, RateError> {
        let response = self
            .agent
            .get(&self.url)
            .call()
            .map_err(|e| RateError(format!("rate request to {} failed: {e}", self.url)))?;
        let body = response
            .into_string()
            .map_err(|e| RateError(format!("unreadable rate response: {e}")))?;

        let rate = parse_rate(&body, &self.currency)?;
        debug!(currency = %self.currency, rate, "exchange rate fetched");
        Ok(rate)
    }
}

/// Pull `rates.<currency>` out of an exchange-rate response body
pub fn parse_rate(body: &str, currency: &str) -> Result<f64, RateError> {
    let quote: serde_json::Value =
        serde_json::from_str(body).map_err(|e| RateError(format!("malformed rate response: {e}")))?;

    let rate = quote
        .get("rates")
        .and_then(|rates| rates.get(currency))
        .and_then(serde_json::Value::as_f64)
        .ok_or_else(|| RateError(format!("no {currency} quote in rate response")))?;

    validate_rate(rate)
}

/// First provider with a usable quote wins
#[derive(Clone, Default)]
pub struct RateChain(pub Vec<Arc<dyn RateProvider>>);

impl RateProvider for RateChain {
    fn current_usd_to_local(&self) -> Result<f64, RateError> {
        let mut reasons = Vec::new();
        for provider in &self.0 {
            match provider.current_usd_to_local() {
                Ok(rate) => return Ok(rate),
                Err(e) => reasons.push(e.0),
            }
        }

        if reasons.is_empty() {
            Err(RateError("no exchange rate source configured".to_string()))
        } else {
            Err(RateError(reasons.join("; ")))
        }
    }
}

fn validate_rate(rate: f64) -> Result<f64, RateError> {
    if rate.is_finite() && rate > 0.0 {
        Ok(rate)
    } else {
        Err(RateError(format!("invalid exchange rate {rate}")))
    }
}

// ============================================================================
// PRICE BREAKDOWN
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Subscription price in US dollars
    pub subscription_usd: f64,
    /// Number of people splitting the bill
    pub split_count: u32,
    /// ISO code shown next to local amounts
    pub local_currency: String,
    /// Free text telling members where to pay
    pub payment_instructions: Option<String>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        PricingConfig {
            subscription_usd: 20.0,
            split_count: 4,
            local_currency: "BRL".to_string(),
            payment_instructions: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub subscription_usd: f64,
    pub rate: f64,
    pub total_local: f64,
    pub per_person: f64,
    pub split_count: u32,
    pub currency: String,
}

impl PriceBreakdown {
    pub fn compute(pricing: &PricingConfig, rate: f64) -> Self {
        let total_local = pricing.subscription_usd * rate;
        let split = pricing.split_count.max(1);
        PriceBreakdown {
            subscription_usd: pricing.subscription_usd,
            rate,
            total_local,
            per_person: total_local / f64::from(split),
            split_count: split,
            currency: pricing.local_currency.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PriceInfo {
    Available(PriceBreakdown),
    Unavailable { reason: String },
}

impl PriceInfo {
    /// Query the provider and degrade instead of failing
    pub fn lookup(provider: &dyn RateProvider, pricing: &PricingConfig) -> Self {
        match provider.current_usd_to_local() {
            Ok(rate) => PriceInfo::Available(PriceBreakdown::compute(pricing, rate)),
            Err(e) => {
                tracing::warn!(error = %e, "exchange rate unavailable");
                PriceInfo::Unavailable { reason: e.0 }
            }
        }
    }

    pub fn breakdown(&self) -> Option<&PriceBreakdown> {
        match self {
            PriceInfo::Available(b) => Some(b),
            PriceInfo::Unavailable { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakdown_splits_total() {
        let pricing = PricingConfig::default();
        let breakdown = PriceBreakdown::compute(&pricing, 5.0);
        assert_eq!(breakdown.total_local, 100.0);
        assert_eq!(breakdown.per_person, 25.0);
        assert_eq!(breakdown.currency, "BRL");
    }

    #[test]
    fn test_zero_split_treated_as_one() {
        let pricing = PricingConfig {
            split_count: 0,
            ..Default::default()
        };
        let breakdown = PriceBreakdown::compute(&pricing, 2.0);
        assert_eq!(breakdown.per_person, 40.0);
    }

    #[test]
    fn test_unavailable_rate_degrades() {
        let info = PriceInfo::lookup(&UnavailableRate, &PricingConfig::default());
        assert!(matches!(info, PriceInfo::Unavailable { .. }));
        assert!(info.breakdown().is_none());
    }

    #[test]
    fn test_shared_rate_updates() {
        let rate = SharedRate::new(None);
        assert!(rate.current_usd_to_local().is_err());

        rate.set(Some(5.5)).unwrap();
        assert_eq!(rate.current_usd_to_local().unwrap(), 5.5);

        assert!(rate.set(Some(-1.0)).is_err());
        assert_eq!(rate.current_usd_to_local().unwrap(), 5.5);
    }

    #[test]
    fn test_parse_rate_reads_currency_quote() {
        let body = r#"{"base":"USD","date":"2025-02-08","rates":{"USD":1,"BRL":5.43,"EUR":0.92}}"#;
        assert_eq!(parse_rate(body, "BRL").unwrap(), 5.43);
        assert_eq!(parse_rate(body, "USD").unwrap(), 1.0);
    }

    #[test]
    fn test_parse_rate_failures() {
        assert!(parse_rate("<html>rate limited</html>", "BRL").is_err());
        assert!(parse_rate(r#"{"rates":{"EUR":0.92}}"#, "BRL").unwrap_err().0.contains("BRL"));
        assert!(parse_rate(r#"{"result":"error"}"#, "BRL").is_err());
        assert!(parse_rate(r#"{"rates":{"BRL":"5.4"}}"#, "BRL").is_err());
        assert!(parse_rate(r#"{"rates":{"BRL":0}}"#, "BRL").is_err());
    }

    fn serve_once(status: &'static str, body: &'static str) -> String {
        use std::io::{BufRead, BufReader, Write};
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 && line != "\r\n" {
                line.clear();
            }
            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();
        });
        format!("http://{addr}/v4/latest/USD")
    }

    #[test]
    fn test_http_rate_fetches_quote() {
        let url = serve_once("200 OK", r#"{"base":"USD","rates":{"BRL":5.5}}"#);
        let provider = HttpRate::new(url, "BRL", Duration::from_secs(5));
        assert_eq!(provider.current_usd_to_local().unwrap(), 5.5);
    }

    #[test]
    fn test_http_rate_errors_become_rate_errors() {
        let url = serve_once("500 Internal Server Error", r#"{"error":"down"}"#);
        let provider = HttpRate::new(url, "BRL", Duration::from_secs(5));
        assert!(provider.current_usd_to_local().is_err());

        let info = PriceInfo::lookup(&provider, &PricingConfig::default());
        assert!(matches!(info, PriceInfo::Unavailable { .. }));
    }

    #[test]
    fn test_chain_prefers_pushed_rate() {
        let pushed = SharedRate::new(None);
        let chain = RateChain(vec![Arc::new(pushed.clone()), Arc::new(FixedRate(5.0))]);
        assert_eq!(chain.current_usd_to_local().unwrap(), 5.0);

        pushed.set(Some(6.0)).unwrap();
        assert_eq!(chain.current_usd_to_local().unwrap(), 6.0);
    }

    #[test]
    fn test_chain_reports_every_failure() {
        let chain = RateChain(vec![Arc::new(SharedRate::new(None)), Arc::new(UnavailableRate)]);
        let err = chain.current_usd_to_local().unwrap_err();
        assert!(err.0.contains("no exchange rate received yet"));
        assert!(err.0.contains("no exchange rate source configured"));

        assert!(RateChain::default().current_usd_to_local().is_err());
    }

    #[test]
    fn test_fixed_rate_rejects_nonsense() {
        assert!(FixedRate(0.0).current_usd_to_local().is_err());
        assert!(FixedRate(f64::NAN).current_usd_to_local().is_err());
        assert_eq!(FixedRate(5.0).current_usd_to_local().unwrap(), 5.0);
    }
}
