// SPDX-FileCopyrightText: 2025 Joost van der Laan <joost@fashionunited.com>
//
// SPDX-License-Identifier: AGPL-3.0-only

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub commissions: CommissionConfig,
    pub rates: RateConfig,
    pub banking_hours: BankingHours,
}

/// Commission fractions charged on the VES leg of a conversion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommissionConfig {
    pub buy: Decimal,
    pub sell: Decimal,
}

impl Default for CommissionConfig {
    fn default() -> Self {
        Self {
            buy: Decimal::new(5, 3),
            sell: Decimal::new(5, 3),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    /// Fraction added to the base rate when the client buys and removed when
    /// the client sells
    pub spread: Decimal,
    /// Active rates older than this are reported as stale
    pub max_age_minutes: i64,
    pub refresh_interval_secs: u64,
    pub log_retention_days: i64,
    pub exchange_rate_api_url: String,
    pub binance_p2p_url: String,
    pub binance_sample_size: usize,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            spread: Decimal::new(8, 3),
            max_age_minutes: 120,
            refresh_interval_secs: 3600,
            log_retention_days: 30,
            exchange_rate_api_url: "https://api.exchangerate-api.com/v4".to_string(),
            binance_p2p_url: "https://p2p.binance.com/bapi/c2c/v2/friendly/c2c/adv/search"
                .to_string(),
            binance_sample_size: 10,
        }
    }
}

/// Window in which the scheduler refreshes rates, Monday to Friday
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BankingHours {
    pub open_hour: u32,
    pub close_hour: u32,
}

impl Default for BankingHours {
    fn default() -> Self {
        Self {
            open_hour: 8,
            close_hour: 18,
        }
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, pct) in [
            ("commissions.buy", self.commissions.buy),
            ("commissions.sell", self.commissions.sell),
            ("rates.spread", self.rates.spread),
        ] {
            if pct < Decimal::ZERO || pct >= Decimal::ONE {
                anyhow::bail!("{} must be a fraction in [0, 1), got {}", name, pct);
            }
        }
        if self.banking_hours.open_hour >= self.banking_hours.close_hour
            || self.banking_hours.close_hour > 24
        {
            anyhow::bail!(
                "banking_hours must satisfy open_hour < close_hour <= 24, got {}..{}",
                self.banking_hours.open_hour,
                self.banking_hours.close_hour
            );
        }
        Ok(())
    }
}

pub fn get_config_path() -> PathBuf {
    std::env::var("DIVISAS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"))
}

/// Read the configuration file, falling back to defaults when it does not exist
pub fn load_config_from(path: &Path) -> anyhow::Result<Config> {
    let config = match fs::read_to_string(path) {
        Ok(config_str) => match toml::from_str::<Config>(&config_str) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to parse config");
                return Err(e.into());
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "no config file, using defaults");
            Config::default()
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "failed to read config");
            return Err(e.into());
        }
    };

    config.validate()?;
    Ok(config)
}

pub fn load_config() -> anyhow::Result<Config> {
    load_config_from(&get_config_path())
}

pub fn save_config(config: &Config, path: &Path) -> anyhow::Result<()> {
    let config_str = toml::to_string_pretty(config)?;
    fs::write(path, config_str)?;
    Ok(())
}

/// Write the default configuration to `path`. An existing file, even one
/// that no longer parses, is only replaced with `force`.
pub fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    save_config(&Config::default(), path)?;
    tracing::info!(path = %path.display(), "default config written");
    Ok(())
}
