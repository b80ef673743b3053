//! Configuration management for the fib grid bot.
//!
//! Loads settings from environment variables and config files. Everything is
//! immutable for the lifetime of the process; the level table in particular
//! is built once at startup and never reloaded.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// OKX API credentials
    #[serde(default)]
    pub okx: OkxConfig,
    /// Level table and order placement parameters
    #[serde(default)]
    pub grid: GridConfig,
    /// Control loop parameters
    #[serde(default)]
    pub engine: EngineConfig,
    /// Telegram notification settings
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkxConfig {
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret key for signing requests
    #[serde(default)]
    pub secret_key: String,
    /// API passphrase
    #[serde(default)]
    pub passphrase: String,
    /// Use the simulated-trading (demo) environment
    #[serde(default)]
    pub simulated: bool,
}

/// One row of the level table: a fibonacci ratio and the position the bot
/// should hold once price has fallen to that level.
///
/// The ratio -> target mapping is literal configuration data. The default
/// table is hand-tuned and does not follow a closed-form function of the
/// ratio, so it is never re-derived at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelEntry {
    pub ratio: Decimal,
    pub target_qty: u32,
}

/// Which side an exact level touch belongs to when bracketing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundaryBias {
    /// Price sitting exactly on a level counts as the lower bracket bound
    /// (the level stays eligible as the buy-side primary).
    Lower,
    /// Price sitting exactly on a level counts as the upper bracket bound.
    Upper,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    /// Instrument to trade
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Bottom of the trading range
    #[serde(default = "default_price_min")]
    pub price_min: Decimal,
    /// Top of the trading range
    #[serde(default = "default_price_max")]
    pub price_max: Decimal,
    /// Maximum position in contracts (held at the bottom of the range)
    #[serde(default = "default_max_position")]
    pub max_position: u32,
    /// Level table entries, ascending ratio
    #[serde(default = "default_levels")]
    pub levels: Vec<LevelEntry>,
    /// Sub-integer price offsets a resting order may be jittered by
    #[serde(default = "default_jitter_offsets")]
    pub jitter_offsets: Vec<Decimal>,
    /// Extra dollar offset applied to secondary-tier orders
    #[serde(default = "default_secondary_offset")]
    pub secondary_offset: Decimal,
    /// Price tick orders are rounded to
    #[serde(default = "default_price_tick")]
    pub price_tick: Decimal,
    /// Tie-break when price lands exactly on a level
    #[serde(default = "default_boundary_bias")]
    pub boundary_bias: BoundaryBias,
    /// Price tolerance when deciding whether a resting order is stale
    #[serde(default = "default_price_tolerance")]
    pub price_tolerance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between control loop iterations
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Retry bound for transient exchange failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// SQLite database path for trade history and lot snapshots
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
    #[serde(default)]
    pub enabled: bool,
}

// Default value functions

fn default_symbol() -> String {
    "SOL-USDT-SWAP".to_string()
}

fn default_price_min() -> Decimal {
    dec!(100.0)
}

fn default_price_max() -> Decimal {
    dec!(160.0)
}

fn default_max_position() -> u32 {
    40
}

/// The pinned default level table (15 fibonacci ratios, hand-tuned targets
/// for a 40-contract range).
fn default_levels() -> Vec<LevelEntry> {
    const TABLE: [(&str, u32); 15] = [
        ("0.000", 40),
        ("0.090", 36),
        ("0.146", 34),
        ("0.200", 32),
        ("0.236", 30),
        ("0.300", 28),
        ("0.382", 24),
        ("0.450", 22),
        ("0.500", 20),
        ("0.550", 18),
        ("0.618", 15),
        ("0.700", 12),
        ("0.764", 9),
        ("0.854", 5),
        ("1.000", 0),
    ];
    TABLE
        .iter()
        .map(|(ratio, target_qty)| LevelEntry {
            ratio: ratio.parse().expect("pinned ratio is valid"),
            target_qty: *target_qty,
        })
        .collect()
}

/// Fractional offsets that keep resting orders off round numbers.
fn default_jitter_offsets() -> Vec<Decimal> {
    vec![dec!(0.2), dec!(0.3), dec!(0.6), dec!(0.7)]
}

fn default_secondary_offset() -> Decimal {
    Decimal::ONE
}

fn default_price_tick() -> Decimal {
    dec!(0.1)
}

fn default_boundary_bias() -> BoundaryBias {
    BoundaryBias::Lower
}

fn default_price_tolerance() -> Decimal {
    Decimal::ZERO
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_max_retries() -> u32 {
    3
}

fn default_db_path() -> String {
    "data/trading.db".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("FGB"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        let grid = &self.grid;

        anyhow::ensure!(
            grid.price_max > grid.price_min,
            "price_max must be greater than price_min"
        );

        anyhow::ensure!(grid.levels.len() >= 2, "at least two levels are required");

        for pair in grid.levels.windows(2) {
            anyhow::ensure!(
                pair[1].ratio > pair[0].ratio,
                "level ratios must be strictly increasing ({} then {})",
                pair[0].ratio,
                pair[1].ratio
            );
            anyhow::ensure!(
                pair[1].target_qty <= pair[0].target_qty,
                "target quantities must be non-increasing as price rises ({} then {})",
                pair[0].target_qty,
                pair[1].target_qty
            );
        }

        for entry in &grid.levels {
            anyhow::ensure!(
                entry.ratio >= Decimal::ZERO && entry.ratio <= Decimal::ONE,
                "level ratio {} out of [0, 1]",
                entry.ratio
            );
            anyhow::ensure!(
                entry.target_qty <= grid.max_position,
                "target quantity {} exceeds max_position {}",
                entry.target_qty,
                grid.max_position
            );
        }

        anyhow::ensure!(
            !grid.jitter_offsets.is_empty(),
            "at least one jitter offset is required"
        );
        for offset in &grid.jitter_offsets {
            anyhow::ensure!(
                *offset > Decimal::ZERO && *offset < Decimal::ONE,
                "jitter offset {} out of (0, 1)",
                offset
            );
        }

        anyhow::ensure!(
            grid.price_tick > Decimal::ZERO,
            "price_tick must be positive"
        );
        anyhow::ensure!(
            self.engine.poll_interval_secs >= 1,
            "poll_interval_secs must be at least 1"
        );

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            okx: OkxConfig::default(),
            grid: GridConfig::default(),
            engine: EngineConfig::default(),
            telegram: TelegramConfig::default(),
        }
    }
}

impl Default for OkxConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            passphrase: String::new(),
            simulated: true,
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            price_min: default_price_min(),
            price_max: default_price_max(),
            max_position: default_max_position(),
            levels: default_levels(),
            jitter_offsets: default_jitter_offsets(),
            secondary_offset: default_secondary_offset(),
            price_tick: default_price_tick(),
            boundary_bias: default_boundary_bias(),
            price_tolerance: default_price_tolerance(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_retries: default_max_retries(),
            db_path: default_db_path(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            enabled: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_table_has_fifteen_levels() {
        let config = Config::default();
        assert_eq!(config.grid.levels.len(), 15);
        assert_eq!(config.grid.levels[0].target_qty, 40);
        assert_eq!(config.grid.levels[14].target_qty, 0);
    }

    #[test]
    fn test_rejects_non_monotonic_targets() {
        let mut config = Config::default();
        config.grid.levels[3].target_qty = 39; // higher than the level below it
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_range() {
        let mut config = Config::default();
        config.grid.price_min = dec!(200.0);
        assert!(config.validate().is_err());
    }
}
