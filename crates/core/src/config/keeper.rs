//! Keeper runtime configuration.
//!
//! Sources, lowest to highest precedence: built-in defaults, an optional TOML
//! file, environment variables, command-line flags (applied by the binary).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{ensure, Context};
use keeper_chain::FeePolicy;
use serde::{Deserialize, Serialize};

use super::bounds::RiskBounds;
use crate::progress::ProgressMode;

/// Main configuration structure, passed by value to every component.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeeperConfig {
    #[serde(default)]
    pub rpc: RpcConfig,

    #[serde(default)]
    pub poller: PollerConfig,

    #[serde(default)]
    pub keeper: LoopConfig,

    #[serde(default)]
    pub bounds: RiskBounds,

    #[serde(default)]
    pub treasury: TreasuryConfig,

    #[serde(default)]
    pub fees: FeesConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub market: MarketConfig,

    #[serde(default)]
    pub progress: ProgressMode,
}

/// External market ticker used as the collateral reference price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Ticker endpoint; the protocol oracle is used when unset
    #[serde(default)]
    pub price_url: Option<String>,

    /// Multiplier converting the quoted price into stablecoin units
    #[serde(default = "default_price_scale")]
    pub price_scale: f64,
}

fn default_price_scale() -> f64 {
    1.0
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            price_url: None,
            price_scale: default_price_scale(),
        }
    }
}

/// RPC service endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Upper bound on any single RPC call (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_request_timeout() -> u64 {
    30
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl RpcConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Snapshot retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    8_000
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl PollerConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

/// Loop cadence and persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Delay between iterations (seconds)
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    #[serde(default)]
    pub run_once: bool,

    /// Directory holding the instance lock
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_interval() -> u64 {
    50
}

/// `~/.circuit`, or `.circuit` when no home directory is known.
pub fn default_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".circuit")
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            run_once: false,
            data_dir: default_data_dir(),
        }
    }
}

impl LoopConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Treasury rebalancing thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreasuryConfig {
    /// Tolerated (max - min) / mean across treasury coins
    #[serde(default = "default_max_skew")]
    pub max_skew: f64,

    /// Coin count above which the treasury is considered fragmented
    #[serde(default = "default_max_coin_count")]
    pub max_coin_count: usize,

    /// Smallest max-min spread worth a rebalance (base units)
    #[serde(default = "default_min_rebalance_delta")]
    pub min_rebalance_delta: u64,
}

fn default_max_skew() -> f64 {
    0.25
}
fn default_max_coin_count() -> usize {
    10
}
fn default_min_rebalance_delta() -> u64 {
    1_000
}

impl Default for TreasuryConfig {
    fn default() -> Self {
        Self {
            max_skew: default_max_skew(),
            max_coin_count: default_max_coin_count(),
            min_rebalance_delta: default_min_rebalance_delta(),
        }
    }
}

/// Stability fee and bad-debt thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeesConfig {
    /// Accrued fees below this are not worth a transfer
    #[serde(default = "default_transfer_dust")]
    pub transfer_dust_threshold: u64,

    /// Treasury balance required before recovering bad debt (10 BYC)
    #[serde(default = "default_min_treasury_for_recovery")]
    pub min_treasury_for_recovery: u64,
}

fn default_transfer_dust() -> u64 {
    1_000
}
fn default_min_treasury_for_recovery() -> u64 {
    10_000
}

impl Default for FeesConfig {
    fn default() -> Self {
        Self {
            transfer_dust_threshold: default_transfer_dust(),
            min_treasury_for_recovery: default_min_treasury_for_recovery(),
        }
    }
}

/// Transaction submission settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub fee_policy: FeePolicy,

    /// Return right after broadcast instead of waiting for confirmation
    #[serde(default)]
    pub no_wait: bool,

    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout_secs: u64,

    #[serde(default = "default_confirm_poll")]
    pub confirm_poll_secs: u64,

    #[serde(default = "default_broadcast_attempts")]
    pub broadcast_attempts: u32,
}

fn default_confirm_timeout() -> u64 {
    600
}
fn default_confirm_poll() -> u64 {
    30
}
fn default_broadcast_attempts() -> u32 {
    3
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fee_policy: FeePolicy::default(),
            no_wait: false,
            confirm_timeout_secs: default_confirm_timeout(),
            confirm_poll_secs: default_confirm_poll(),
            broadcast_attempts: default_broadcast_attempts(),
        }
    }
}

impl PipelineConfig {
    pub fn confirm_poll(&self) -> Duration {
        Duration::from_secs(self.confirm_poll_secs)
    }
}

impl KeeperConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> anyhow::Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `BASE_URL`, `FEE_PER_COST`, `NO_WAIT_TX`,
    /// `CIRCUIT_CLI_PROGRESS` and `MARKET_PRICE_URL`, read through `lookup`.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(url) = lookup("BASE_URL").filter(|v| !v.is_empty()) {
            self.rpc.base_url = url;
        }
        if let Some(fee) = lookup("FEE_PER_COST").filter(|v| !v.is_empty()) {
            self.pipeline.fee_policy = fee
                .parse()
                .with_context(|| format!("FEE_PER_COST={fee}"))?;
        }
        if let Some(flag) = lookup("NO_WAIT_TX") {
            self.pipeline.no_wait = matches!(flag.to_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(mode) = lookup("CIRCUIT_CLI_PROGRESS").filter(|v| !v.is_empty()) {
            self.progress = mode
                .parse()
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("CIRCUIT_CLI_PROGRESS={mode}"))?;
        }
        if let Some(url) = lookup("MARKET_PRICE_URL").filter(|v| !v.is_empty()) {
            self.market.price_url = Some(url);
        }
        Ok(())
    }

    /// Reject configurations the keeper cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let min_discount = self.bounds.min_discount;
        ensure!(
            (0.0..1.0).contains(&min_discount),
            "min_discount must be in [0, 1), got {min_discount}"
        );
        ensure!(self.poller.max_attempts > 0, "poller.max_attempts must be at least 1");
        ensure!(
            self.poller.initial_backoff_ms <= self.poller.max_backoff_ms,
            "poller.initial_backoff_ms must not exceed poller.max_backoff_ms"
        );
        ensure!(
            self.pipeline.broadcast_attempts > 0,
            "pipeline.broadcast_attempts must be at least 1"
        );
        ensure!(
            self.pipeline.confirm_poll_secs > 0,
            "pipeline.confirm_poll_secs must be positive"
        );
        ensure!(
            self.keeper.run_once || self.keeper.interval_secs > 0,
            "keeper.interval_secs must be positive in continuous mode"
        );
        ensure!(self.treasury.max_skew >= 0.0, "treasury.max_skew must not be negative");
        ensure!(!self.rpc.base_url.is_empty(), "rpc.base_url must be set");
        let scale = self.market.price_scale;
        ensure!(
            scale.is_finite() && scale > 0.0,
            "market.price_scale must be positive, got {scale}"
        );
        Ok(())
    }

    /// Log the resolved configuration.
    pub fn log_config(&self) {
        tracing::info!(
            base_url = %self.rpc.base_url,
            request_timeout_secs = self.rpc.request_timeout_secs,
            "RPC service"
        );
        tracing::info!(
            interval_secs = self.keeper.interval_secs,
            run_once = self.keeper.run_once,
            data_dir = %self.keeper.data_dir.display(),
            "Keeper loop"
        );
        tracing::info!(
            max_bid_amount = self.bounds.max_bid_amount,
            min_discount = self.bounds.min_discount,
            max_offer_amount = self.bounds.max_offer_amount,
            offer_expiry_secs = self.bounds.offer_expiry_secs,
            bid_ordering = ?self.bounds.bid_ordering,
            "Risk bounds"
        );
        tracing::info!(
            max_skew = self.treasury.max_skew,
            max_coin_count = self.treasury.max_coin_count,
            transfer_dust = self.fees.transfer_dust_threshold,
            min_treasury_for_recovery = self.fees.min_treasury_for_recovery,
            "Maintenance thresholds"
        );
        tracing::info!(
            fee_policy = %self.pipeline.fee_policy,
            no_wait = self.pipeline.no_wait,
            confirm_timeout_secs = self.pipeline.confirm_timeout_secs,
            progress = ?self.progress,
            "Transaction pipeline"
        );
        tracing::info!(
            price_url = self.market.price_url.as_deref().unwrap_or("oracle"),
            price_scale = self.market.price_scale,
            "Collateral reference price"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_chain::FeeTier;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = KeeperConfig::default();
        assert_eq!(config.keeper.interval_secs, 50);
        assert_eq!(config.poller.max_attempts, 5);
        assert_eq!(config.pipeline.fee_policy, FeePolicy::Tier(FeeTier::Fast));
        assert_eq!(config.progress, ProgressMode::Text);
        assert!(config.keeper.data_dir.ends_with(".circuit"));
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: KeeperConfig = toml::from_str(
            r#"
            [bounds]
            min_discount = 0.2
            bid_ordering = "largest_first"

            [pipeline]
            fee_policy = 9
            "#,
        )
        .unwrap();
        assert_eq!(config.bounds.min_discount, 0.2);
        assert_eq!(config.bounds.bid_ordering, crate::config::BidOrdering::LargestFirst);
        assert_eq!(config.bounds.offer_expiry_secs, 600);
        assert_eq!(config.pipeline.fee_policy, FeePolicy::Explicit(9));
        assert_eq!(config.pipeline.confirm_poll_secs, 30);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keeper.toml");
        std::fs::write(&path, "progress = \"json\"\n[keeper]\ninterval_secs = 5\n").unwrap();
        let config = KeeperConfig::from_file(&path).unwrap();
        assert_eq!(config.progress, ProgressMode::Json);
        assert_eq!(config.keeper.interval_secs, 5);

        assert!(KeeperConfig::from_file(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("BASE_URL", "http://rpc:9000"),
            ("FEE_PER_COST", "medium"),
            ("NO_WAIT_TX", "true"),
            ("CIRCUIT_CLI_PROGRESS", "off"),
            ("MARKET_PRICE_URL", "http://ticker/xch"),
        ]);
        let mut config = KeeperConfig::default();
        config
            .apply_env_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.rpc.base_url, "http://rpc:9000");
        assert_eq!(config.pipeline.fee_policy, FeePolicy::Tier(FeeTier::Medium));
        assert!(config.pipeline.no_wait);
        assert_eq!(config.progress, ProgressMode::Off);
        assert_eq!(config.market.price_url.as_deref(), Some("http://ticker/xch"));
    }

    #[test]
    fn test_bad_env_value_is_error() {
        let mut config = KeeperConfig::default();
        let result = config.apply_env_from(|k| (k == "FEE_PER_COST").then(|| "turbo".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_validate_rejects_bad_bounds() {
        let mut config = KeeperConfig::default();
        config.bounds.min_discount = 1.0;
        assert!(config.validate().is_err());

        let mut config = KeeperConfig::default();
        config.bounds.min_discount = -0.1;
        assert!(config.validate().is_err());

        let mut config = KeeperConfig::default();
        config.poller.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = KeeperConfig::default();
        config.keeper.interval_secs = 0;
        assert!(config.validate().is_err());
        config.keeper.run_once = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_backoff_above_cap() {
        let mut config = KeeperConfig::default();
        config.poller.initial_backoff_ms = u64::MAX;
        assert!(config.validate().is_err());

        config.poller.initial_backoff_ms = config.poller.max_backoff_ms;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_market_section() {
        let config: KeeperConfig = toml::from_str(
            r#"
            [market]
            price_url = "https://www.okx.com/api/v5/market/ticker?instId=XCH-USDT"
            price_scale = 100.0
            "#,
        )
        .unwrap();
        assert!(config.market.price_url.is_some());
        assert_eq!(config.market.price_scale, 100.0);
        assert!(KeeperConfig::default().market.price_url.is_none());

        let mut config = config;
        config.market.price_scale = 0.0;
        assert!(config.validate().is_err());
    }
}
