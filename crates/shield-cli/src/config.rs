//! CLI configuration, parsed from a TOML file plus environment variable overrides.
//!
//! Priority: environment variables > config file > defaults.

use anyhow::{Context, Result};
use bitcoin::secp256k1::PublicKey;
use bitcoin::Network;
use serde::{Deserialize, Serialize};
use shield_derive::script::check_multisig_bounds;
use shield_derive::{parse_master_key_hex, ShieldError};
use std::path::Path;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShieldConfig {
    /// General settings
    #[serde(default)]
    pub general: GeneralSection,

    /// Key set and policy used for every derivation
    pub derivation: DerivationSection,

    /// Overrides that could not be applied, reported by `validate`
    #[serde(skip)]
    rejected_overrides: Vec<String>,
}

/// General settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSection {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralSection {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Multisig policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivationSection {
    /// Bitcoin network: "bitcoin", "testnet", "signet", "regtest"
    #[serde(default = "default_network")]
    pub network: String,

    /// Signatures required (m)
    pub threshold: u64,

    /// Co-signer master keys, hex-encoded compressed points
    pub master_keys: Vec<String>,
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_log_level() -> String {
    "info".to_string()
}

fn default_network() -> String {
    "bitcoin".to_string()
}

// ============================================================================
// Loading & environment override
// ============================================================================

impl ShieldConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: ShieldConfig =
            toml::from_str(&contents).with_context(|| "Failed to parse TOML config")?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Supported env vars:
    /// - `SHIELD_LOG_LEVEL`
    /// - `SHIELD_NETWORK`
    /// - `SHIELD_THRESHOLD`
    /// - `SHIELD_MASTER_KEYS` (comma separated)
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from any variable source.
    ///
    /// A value that does not parse is kept aside and makes `validate` fail,
    /// so the file's value is never used in its place.
    pub fn apply_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = var("SHIELD_LOG_LEVEL") {
            self.general.log_level = v;
        }
        if let Some(v) = var("SHIELD_NETWORK") {
            self.derivation.network = v;
        }
        if let Some(v) = var("SHIELD_THRESHOLD") {
            match v.trim().parse::<u64>() {
                Ok(m) => self.derivation.threshold = m,
                Err(e) => self
                    .rejected_overrides
                    .push(format!("SHIELD_THRESHOLD={:?}: {}", v, e)),
            }
        }
        if let Some(v) = var("SHIELD_MASTER_KEYS") {
            self.derivation.master_keys = v
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(String::from)
                .collect();
        }
    }

    /// Parse the network string to a `bitcoin::Network`.
    pub fn network(&self) -> Result<Network> {
        match self.derivation.network.as_str() {
            "bitcoin" | "mainnet" => Ok(Network::Bitcoin),
            "testnet" | "testnet3" => Ok(Network::Testnet),
            "signet" => Ok(Network::Signet),
            "regtest" => Ok(Network::Regtest),
            other => anyhow::bail!("derivation.network: unknown network '{}'", other),
        }
    }

    /// The threshold narrowed to a byte.
    pub fn threshold(&self) -> Result<u8> {
        let m = self.derivation.threshold;
        u8::try_from(m)
            .map_err(|_| ShieldError::ThresholdOutOfRange(m))
            .context("derivation.threshold")
    }

    /// Parse every configured master key.
    pub fn master_keys(&self) -> Result<Vec<PublicKey>> {
        self.derivation
            .master_keys
            .iter()
            .enumerate()
            .map(|(i, k)| {
                parse_master_key_hex(k).with_context(|| format!("derivation.master_keys[{}]", i))
            })
            .collect()
    }

    /// Validate that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if let Some(rejected) = self.rejected_overrides.first() {
            anyhow::bail!("invalid override {}", rejected);
        }

        self.network()?;
        let threshold = self.threshold()?;
        let keys = self.master_keys()?;

        check_multisig_bounds(threshold as usize, keys.len())
            .context("derivation.threshold must satisfy 1 <= m <= n <= 15")?;

        let mut unique: Vec<[u8; 33]> = keys.iter().map(PublicKey::serialize).collect();
        unique.sort_unstable();
        unique.dedup();
        anyhow::ensure!(
            unique.len() == keys.len(),
            "derivation.master_keys must not contain duplicates"
        );

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
