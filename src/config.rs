// ⚙️ Configuration - JSON file layered under DUES_* environment variables
//
// Precedence: defaults < config file < .env < process environment.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::ledger::{LedgerConfig, DEFAULT_DUE_DAY};
use crate::persistence::{JsonFileStore, PersistencePort, SqliteStore};
use crate::rates::{HttpRate, PricingConfig, RateChain, RateProvider, SharedRate, DEFAULT_RATE_URL};

/// `DUES_DATA_PATH` overrides `data_path`, and so on for every field
pub const ENV_PREFIX: &str = "DUES";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Json,
    Sqlite,
}

impl FromStr for StorageKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(StorageKind::Json),
            "sqlite" => Ok(StorageKind::Sqlite),
            other => bail!("unknown storage kind '{other}' (expected json or sqlite)"),
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageKind::Json => write!(f, "json"),
            StorageKind::Sqlite => write!(f, "sqlite"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Ledger file (json) or database (sqlite)
    pub data_path: PathBuf,
    pub storage: StorageKind,
    /// Root directory for payment proof blobs
    pub attachments_dir: PathBuf,
    pub tick_interval_secs: u64,
    /// Due day used only when no ledger has been saved yet
    pub default_due_day: u32,
    pub subscription_usd: f64,
    pub split_count: u32,
    pub payment_instructions: Option<String>,
    pub local_currency: String,
    /// Static USD rate, tried before the live quote
    pub fixed_rate: Option<f64>,
    /// Live quote endpoint; empty disables it
    pub rate_url: Option<String>,
    pub rate_timeout_secs: u64,
    pub bind_addr: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            data_path: PathBuf::from("data/ledger.json"),
            storage: StorageKind::Json,
            attachments_dir: PathBuf::from("data/proofs"),
            tick_interval_secs: 86_400,
            default_due_day: DEFAULT_DUE_DAY,
            subscription_usd: 20.0,
            split_count: 4,
            payment_instructions: None,
            local_currency: "BRL".to_string(),
            fixed_rate: None,
            rate_url: Some(DEFAULT_RATE_URL.to_string()),
            rate_timeout_secs: 5,
            bind_addr: "127.0.0.1:3000".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment.
    ///
    /// Layers, lowest first:
    /// 1. built-in defaults
    /// 2. `path` (JSON), when given and present
    /// 3. a `.env` file in the working directory
    /// 4. environment variables with the DUES_ prefix
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(file) => debug!(file = %file.display(), ".env loaded"),
            Err(e) if e.not_found() => {}
            Err(e) => warn!(error = %e, ".env ignored"),
        }
        Self::layered(path, None)
    }

    /// `env` replaces the process environment when given
    fn layered(path: Option<&Path>, env: Option<config::Map<String, String>>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Json)
                    .required(false),
            );
        }
        builder = builder.add_source(config::Environment::with_prefix(ENV_PREFIX).source(env));

        let config: AppConfig = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        LedgerConfig::validate_due_day(self.default_due_day)
            .context("default_due_day out of range")?;
        if self.tick_interval_secs == 0 {
            bail!("tick_interval_secs must be greater than zero");
        }
        if !(self.subscription_usd.is_finite() && self.subscription_usd > 0.0) {
            bail!("subscription_usd must be a positive amount");
        }
        if self.split_count == 0 {
            bail!("split_count must be at least 1");
        }
        if let Some(rate) = self.fixed_rate {
            if !(rate.is_finite() && rate > 0.0) {
                bail!("fixed_rate must be a positive number");
            }
        }
        if self.rate_timeout_secs == 0 {
            bail!("rate_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    pub fn ledger_config(&self) -> LedgerConfig {
        LedgerConfig {
            due_day: self.default_due_day,
        }
    }

    pub fn pricing(&self) -> PricingConfig {
        PricingConfig {
            subscription_usd: self.subscription_usd,
            split_count: self.split_count,
            local_currency: self.local_currency.clone(),
            payment_instructions: self.payment_instructions.clone(),
        }
    }

    /// Seeded with `fixed_rate`; can be updated at runtime
    pub fn rate_provider(&self) -> SharedRate {
        SharedRate::new(self.fixed_rate)
    }

    pub fn live_rate(&self) -> Option<HttpRate> {
        self.rate_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(|url| HttpRate::new(url, &self.local_currency, Duration::from_secs(self.rate_timeout_secs)))
    }

    /// `pushed` first, then the live quote when one is configured
    pub fn rate_chain(&self, pushed: &SharedRate) -> RateChain {
        let mut providers: Vec<Arc<dyn RateProvider>> = vec![Arc::new(pushed.clone())];
        if let Some(live) = self.live_rate() {
            providers.push(Arc::new(live));
        }
        RateChain(providers)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs)
    }

    /// Open the configured persistence medium, creating its directory
    pub fn open_port(&self) -> Result<Box<dyn PersistencePort>> {
        if let Some(parent) = self.data_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory {}", parent.display()))?;
        }

        let port: Box<dyn PersistencePort> = match self.storage {
            StorageKind::Json => Box::new(JsonFileStore::new(&self.data_path)),
            StorageKind::Sqlite => Box::new(
                SqliteStore::open(&self.data_path)
                    .with_context(|| format!("Failed to open database {}", self.data_path.display()))?,
            ),
        };
        Ok(port)
    }
}
