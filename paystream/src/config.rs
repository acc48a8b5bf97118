//! Client configuration, stored as TOML.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{amount::Denom, ledger::FeeHint};

/// Settings for talking to the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// JSON-RPC endpoint of the ledger node
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Per-request HTTP timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Default deadline for one transition, estimation through inclusion
    #[serde(default = "default_submit_deadline_secs")]
    pub submit_deadline_secs: u64,

    /// Multiplier applied to simulated gas
    #[serde(default = "default_gas_adjustment")]
    pub gas_adjustment: f64,

    /// Display refresh cadence for projections
    #[serde(default = "default_projection_interval_ms")]
    pub projection_interval_ms: u64,

    /// Streamed coin
    #[serde(default)]
    pub denom: Denom,

    /// Fee to sign with when estimation fails. Only used when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_fee: Option<FallbackFee>,
}

/// Fixed fee in base units of the configured denomination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackFee {
    #[serde(default = "default_fallback_amount")]
    pub amount: u64,
    #[serde(default = "default_fallback_gas")]
    pub gas: u64,
}

impl Default for FallbackFee {
    fn default() -> Self {
        Self {
            amount: default_fallback_amount(),
            gas: default_fallback_gas(),
        }
    }
}

fn default_rpc_url() -> String {
    "http://localhost:26657".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_submit_deadline_secs() -> u64 {
    60
}

fn default_gas_adjustment() -> f64 {
    2.0
}

fn default_fallback_amount() -> u64 {
    1000
}

fn default_fallback_gas() -> u64 {
    1_000_000
}

fn default_projection_interval_ms() -> u64 {
    100
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            request_timeout_secs: default_request_timeout_secs(),
            submit_deadline_secs: default_submit_deadline_secs(),
            denom: Denom::default(),
            gas_adjustment: default_gas_adjustment(),
            fallback_fee: None,
            projection_interval_ms: default_projection_interval_ms(),
        }
    }
}

impl ClientConfig {
    /// Load config from a file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load config, or fall back to defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.rpc_url.trim().is_empty() {
            return Err(anyhow!("rpc_url must not be empty"));
        }
        if !(self.gas_adjustment.is_finite() && self.gas_adjustment >= 1.0) {
            return Err(anyhow!(
                "gas_adjustment must be at least 1.0, got {}",
                self.gas_adjustment
            ));
        }
        if self.denom.base.is_empty() || self.denom.exponent > 30 {
            return Err(anyhow!("invalid denom {:?}", self.denom));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn submit_deadline(&self) -> Duration {
        Duration::from_secs(self.submit_deadline_secs)
    }

    pub fn projection_interval(&self) -> Duration {
        Duration::from_millis(self.projection_interval_ms.max(1))
    }

    /// Fallback fee as a signable hint, if configured.
    pub fn fallback_fee_hint(&self) -> Option<FeeHint> {
        self.fallback_fee.as_ref().map(|fee| FeeHint {
            amount: self.denom.coin(fee.amount as u128),
            gas: fee.gas,
        })
    }
}

/// Get the default config file path
pub fn default_config_path() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
    Ok(home.join(".paystream").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = ClientConfig {
            rpc_url: "http://node.example:26657".to_string(),
            fallback_fee: Some(FallbackFee::default()),
            ..ClientConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = ClientConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(
            loaded.fallback_fee_hint().unwrap().amount.to_string(),
            "1000nund"
        );
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "rpc_url = \"http://10.0.0.1:26657\"\n").unwrap();

        let loaded = ClientConfig::load(&path).unwrap();
        assert_eq!(loaded.rpc_url, "http://10.0.0.1:26657");
        assert_eq!(loaded.request_timeout(), Duration::from_secs(30));
        assert_eq!(loaded.denom, Denom::default());
        assert_eq!(loaded.gas_adjustment, 2.0);
        assert!(loaded.fallback_fee_hint().is_none());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "gas_adjustment = 0.5\n").unwrap();
        assert!(ClientConfig::load(&path).is_err());

        fs::write(&path, "rpc_url = [1, 2]\n").unwrap();
        assert!(ClientConfig::load(&path).is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let loaded = ClientConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, ClientConfig::default());
    }
}
