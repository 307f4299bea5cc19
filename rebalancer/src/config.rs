//! TOML configuration loading and validation.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub tolerance: ToleranceConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Paper-gateway account state file.
    pub state_file: String,
    #[serde(default = "default_keepalive")]
    pub keepalive_interval_secs: u64,
}

fn default_keepalive() -> u64 {
    55
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// 0 crosses the whole spread (fill as fast as possible), 100 rests
    /// on the passive side.
    #[serde(default = "default_patience")]
    pub fill_patience: u8,
    /// Orders whose USD notional falls below this are dropped to zero.
    #[serde(default = "default_min_trade")]
    pub min_trade_usd: f64,
    /// Auto-confirmed orders above this USD notional are deferred for
    /// manual review.
    #[serde(default = "default_max_auto")]
    pub max_auto_order_usd: f64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            fill_patience: default_patience(),
            min_trade_usd: default_min_trade(),
            max_auto_order_usd: default_max_auto(),
        }
    }
}

fn default_patience() -> u8 {
    20
}
fn default_min_trade() -> f64 {
    100.0
}
fn default_max_auto() -> f64 {
    25_000.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToleranceConfig {
    /// Relative price drift beyond which an open order is stale.
    #[serde(default = "default_price_pct")]
    pub price_pct: f64,
    /// Wider tolerance for thinly traded venues.
    #[serde(default = "default_illiquid_pct")]
    pub illiquid_price_pct: f64,
    #[serde(default = "default_illiquid_exchanges")]
    pub illiquid_exchanges: Vec<String>,
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            price_pct: default_price_pct(),
            illiquid_price_pct: default_illiquid_pct(),
            illiquid_exchanges: default_illiquid_exchanges(),
        }
    }
}

fn default_price_pct() -> f64 {
    0.005
}
fn default_illiquid_pct() -> f64 {
    0.05
}
fn default_illiquid_exchanges() -> Vec<String> {
    vec!["XFRA".into(), "OTCM".into()]
}

impl ToleranceConfig {
    /// Stale tolerance for an exchange, honoring the illiquid list.
    pub fn for_exchange(&self, mic: &str) -> f64 {
        if self
            .illiquid_exchanges
            .iter()
            .any(|e| e.eq_ignore_ascii_case(mic))
        {
            self.illiquid_price_pct
        } else {
            self.price_pct
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CalendarConfig {
    /// MIC codes outside the hours table to treat as open.
    #[serde(default)]
    pub assume_open: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,
    #[serde(default = "default_audit_file")]
    pub audit_file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            audit_file: default_audit_file(),
        }
    }
}

fn default_log_dir() -> String {
    "./logs".into()
}
fn default_audit_file() -> String {
    "audit.jsonl".into()
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate config invariants.
    fn validate(&self) -> Result<()> {
        if self.gateway.state_file.is_empty() {
            return Err(Error::Config("gateway.state_file must not be empty".into()));
        }
        if self.execution.fill_patience > 100 {
            return Err(Error::Config("fill_patience must be in [0, 100]".into()));
        }
        if self.execution.min_trade_usd < 0.0 {
            return Err(Error::Config("min_trade_usd must be >= 0".into()));
        }
        if self.execution.max_auto_order_usd <= 0.0 {
            return Err(Error::Config("max_auto_order_usd must be > 0".into()));
        }
        if self.tolerance.price_pct <= 0.0 {
            return Err(Error::Config("tolerance.price_pct must be > 0".into()));
        }
        if self.tolerance.illiquid_price_pct < self.tolerance.price_pct {
            return Err(Error::Config(
                "illiquid_price_pct must be >= price_pct".into(),
            ));
        }
        Ok(())
    }

    /// Full path to the audit log file.
    pub fn audit_path(&self) -> std::path::PathBuf {
        Path::new(&self.logging.dir).join(&self.logging.audit_file)
    }
}
