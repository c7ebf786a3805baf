//! Configuration management for the vault
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::types::{AccountKey, PoolId, TokenMapping, BPS_DENOMINATOR};

use alloy_primitives::Address;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "XLEDGER_VAULT_CONFIG";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub vault: VaultConfig,
    pub counterparty: CounterpartyConfig,
    pub token_mappings: Vec<TokenMappingConfig>,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VaultConfig {
    pub instance_id: String,
    /// Host-ledger address of the vault contract
    pub host_address: Address,
    pub max_slippage_bps: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CounterpartyConfig {
    pub pool_program_id: String,
    pub token_program_id: String,
    pub custody_seed: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenMappingConfig {
    pub wrapped: Address,
    pub mint: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimulationConfig {
    #[serde(default)]
    pub pools: Vec<SimPoolConfig>,
    #[serde(default)]
    pub accounts: Vec<SimAccountConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimPoolConfig {
    pub pool_id: String,
    pub mint: String,
    /// Third-party liquidity seeded at startup
    #[serde(default)]
    pub initial_liquidity: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimAccountConfig {
    pub address: Address,
    pub token: Address,
    pub balance: u64,
    /// Allowance granted to the vault
    #[serde(default)]
    pub allowance: u64,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));
        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.token_mappings.is_empty() {
            anyhow::bail!("At least one token mapping must be configured");
        }

        if self.vault.max_slippage_bps > BPS_DENOMINATOR {
            anyhow::bail!(
                "max_slippage_bps {} exceeds {}",
                self.vault.max_slippage_bps,
                BPS_DENOMINATOR
            );
        }

        if self.counterparty.custody_seed.trim().is_empty() {
            anyhow::bail!("Custody seed must not be empty");
        }

        self.pool_program_id()?;
        self.token_program_id()?;
        self.token_mapping()?;

        let mut pool_ids = HashSet::new();
        for pool in &self.simulation.pools {
            let id = parse_pool_id(&pool.pool_id)?;
            if !pool_ids.insert(id) {
                anyhow::bail!("Simulated pool {} configured twice", pool.pool_id);
            }
            parse_key(&pool.mint).with_context(|| format!("Simulated pool {}", pool.pool_id))?;
        }

        if self.vault.max_slippage_bps == 0 {
            tracing::warn!("max_slippage_bps is 0 - every call requires an exact quote");
        }

        Ok(())
    }

    pub fn pool_program_id(&self) -> Result<AccountKey> {
        parse_key(&self.counterparty.pool_program_id).context("counterparty.pool_program_id")
    }

    pub fn token_program_id(&self) -> Result<AccountKey> {
        parse_key(&self.counterparty.token_program_id).context("counterparty.token_program_id")
    }

    /// Build the wrapped ↔ mint registry
    pub fn token_mapping(&self) -> Result<TokenMapping> {
        let pairs = self
            .token_mappings
            .iter()
            .map(|m| Ok((m.wrapped, parse_key(&m.mint)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(TokenMapping::new(pairs)?)
    }
}

fn parse_key(raw: &str) -> Result<AccountKey> {
    Ok(raw.parse::<AccountKey>()?)
}

/// Accepts a full 32-byte hex id or a shorter one, left-padded
pub fn parse_pool_id(raw: &str) -> Result<PoolId> {
    let hex_part = raw.strip_prefix("0x").unwrap_or(raw);
    let bytes =
        hex::decode(hex_part).with_context(|| format!("Invalid pool id {}", raw))?;
    Ok(PoolId::from_short(&bytes)?)
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = match regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") {
        Ok(re) => re,
        Err(_) => return result,
    };

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[vault]
instance_id = "vault-test"
host_address = "0x5555555555555555555555555555555555555555"
max_slippage_bps = ${XLEDGER_TEST_MAX_SLIPPAGE}

[counterparty]
pool_program_id = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
token_program_id = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb"
custody_seed = "staking-vault"

[[token_mappings]]
wrapped = "0xc7c7c7c7c7c7c7c7c7c7c7c7c7c7c7c7c7c7c7c7"
mint = "0x0606060606060606060606060606060606060606060606060606060606060606"

[api]
host = "127.0.0.1"
port = 8080

[metrics]
enabled = false
port = 9090

[[simulation.pools]]
pool_id = "0x01"
mint = "0x0606060606060606060606060606060606060606060606060606060606060606"
initial_liquidity = 1000000
"#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_load_sample_config() {
        env::set_var("XLEDGER_TEST_MAX_SLIPPAGE", "100");
        let file = write_config(SAMPLE);
        let settings = Settings::load_from(file.path()).unwrap();

        assert_eq!(settings.vault.max_slippage_bps, 100);
        assert_eq!(settings.token_mapping().unwrap().len(), 1);
        assert_eq!(settings.simulation.pools.len(), 1);
        assert_eq!(
            parse_pool_id(&settings.simulation.pools[0].pool_id).unwrap(),
            PoolId::from_short(&[1u8]).unwrap()
        );
        assert_eq!(settings.pool_program_id().unwrap(), AccountKey([0xaa; 32]));
    }

    #[test]
    fn test_validation_rejects_bad_config() {
        env::set_var("XLEDGER_TEST_MAX_SLIPPAGE", "100");
        let too_loose = SAMPLE.replace("${XLEDGER_TEST_MAX_SLIPPAGE}", "10001");
        assert!(Settings::load_from(write_config(&too_loose).path()).is_err());

        let no_seed = SAMPLE.replace("\"staking-vault\"", "\"  \"");
        assert!(Settings::load_from(write_config(&no_seed).path()).is_err());

        let duplicate = SAMPLE.replace(
            "[api]",
            "[[token_mappings]]\nwrapped = \"0xd7d7d7d7d7d7d7d7d7d7d7d7d7d7d7d7d7d7d7d7\"\nmint = \"0x0606060606060606060606060606060606060606060606060606060606060606\"\n\n[api]",
        );
        assert!(Settings::load_from(write_config(&duplicate).path()).is_err());
    }
}
