//! Configuration management for the compounder
//!
//! Loads configuration from a TOML file with environment variable substitution.

use crate::error::{CompounderError, CompounderResult};

use cosmrs::AccountId;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}").expect("valid pattern");
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub chain: ChainConfig,
    pub signer: SignerConfig,
    pub tx: TxConfig,
    pub compounder: CompounderConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub grpc_endpoint: String,
    #[serde(default)]
    pub insecure: bool,
    pub chain_id: String,
    #[serde(default = "default_account_prefix")]
    pub account_prefix: String,
    #[serde(default = "default_denom")]
    pub denom: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Clone, Deserialize)]
pub struct SignerConfig {
    #[serde(default = "default_signer_name")]
    pub name: String,
    pub mnemonic: String,
}

impl fmt::Debug for SignerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerConfig")
            .field("name", &self.name)
            .field("mnemonic", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TxConfig {
    pub gas_limit: u64,
    pub fee_initial: u64,
    pub max_attempts: u32,
    pub multiplier: f64,
    #[serde(default = "default_confirm_poll_interval_ms")]
    pub confirm_poll_interval_ms: u64,
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompounderConfig {
    pub contract_address: String,
    pub stake_source_path: PathBuf,
    /// Smallest-denomination units left in the wallet for fees
    #[serde(default = "default_fee_reserve")]
    pub fee_reserve: u64,
    #[serde(default = "default_claim_to_compound_delay_secs")]
    pub claim_to_compound_delay_secs: u64,
    /// Run one cycle and exit when unset
    #[serde(default)]
    pub repeat_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_account_prefix() -> String {
    "nibi".to_string()
}

fn default_denom() -> String {
    "unibi".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    60
}

fn default_signer_name() -> String {
    "compounder".to_string()
}

fn default_confirm_poll_interval_ms() -> u64 {
    1_000
}

fn default_confirm_timeout_secs() -> u64 {
    60
}

fn default_fee_reserve() -> u64 {
    1_000_000
}

fn default_claim_to_compound_delay_secs() -> u64 {
    10
}

fn default_metrics_port() -> u16 {
    9100
}

impl Settings {
    /// Load settings from the configuration file
    pub fn load() -> CompounderResult<Self> {
        load_env_file(Path::new(".env"));

        let config_path = env::var("COMPOUNDER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path).map_err(|e| {
            CompounderError::Config(format!(
                "Failed to read config file {:?}: {}",
                config_path, e
            ))
        })?;

        Self::from_toml(&config_str)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml(input: &str) -> CompounderResult<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(input);

        let settings: Settings = toml::from_str(&config_str)
            .map_err(|e| CompounderError::Config(format!("Failed to parse configuration: {}", e)))?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> CompounderResult<()> {
        if self.chain.grpc_endpoint.trim().is_empty() {
            return Err(CompounderError::Config("chain.grpc_endpoint is empty".into()));
        }
        if self.chain.chain_id.trim().is_empty() {
            return Err(CompounderError::Config("chain.chain_id is empty".into()));
        }
        if self.signer.mnemonic.trim().is_empty() {
            return Err(CompounderError::Config("signer.mnemonic is empty".into()));
        }
        if !self.tx.multiplier.is_finite() || self.tx.multiplier <= 1.0 {
            return Err(CompounderError::Config(format!(
                "tx.multiplier must be greater than 1, got {}",
                self.tx.multiplier
            )));
        }
        if self.tx.max_attempts == 0 {
            return Err(CompounderError::Config("tx.max_attempts must be at least 1".into()));
        }
        if self.tx.gas_limit == 0 {
            return Err(CompounderError::Config("tx.gas_limit must be positive".into()));
        }
        if self.tx.fee_initial == 0 {
            return Err(CompounderError::Config("tx.fee_initial must be positive".into()));
        }
        if self.tx.confirm_poll_interval_ms == 0 {
            return Err(CompounderError::Config(
                "tx.confirm_poll_interval_ms must be positive".into(),
            ));
        }
        self.contract_address()?;

        if self.compounder.repeat_interval_secs == Some(0) {
            warn!("compounder.repeat_interval_secs is 0 - cycles will run back to back");
        }

        Ok(())
    }

    /// Contract address parsed and checked against the account prefix
    pub fn contract_address(&self) -> CompounderResult<AccountId> {
        let address: AccountId = self.compounder.contract_address.parse().map_err(|e| {
            CompounderError::Config(format!(
                "Invalid contract address {:?}: {}",
                self.compounder.contract_address, e
            ))
        })?;
        if address.prefix() != self.chain.account_prefix {
            return Err(CompounderError::Config(format!(
                "Contract address {} does not use prefix {}",
                address, self.chain.account_prefix
            )));
        }
        Ok(address)
    }
}

/// Export variables from a dotenv file. Variables already set win; a
/// missing or unreadable file is only a warning.
fn load_env_file(path: &Path) {
    match dotenvy::from_path(path) {
        Ok(()) => debug!("Loaded environment from {}", path.display()),
        Err(e) => warn!("Error loading {} file: {}", path.display(), e),
    }
}

/// Substitute environment variables in the format ${VAR_NAME} or
/// ${VAR_NAME:-default}. Unset or empty variables take the default.
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR
        .replace_all(input, |caps: &regex::Captures| {
            env::var(&caps[1])
                .ok()
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| caps.get(2).map_or("", |m| m.as_str()).to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const CONTRACT: &str = "nibi1qypqxpq9qcrsszg2pvxq6rs0zqg3yyc5g8g800";

    fn sample(multiplier: &str, contract: &str) -> String {
        format!(
            r#"
[chain]
grpc_endpoint = "grpc.nibiru.fi:443"
chain_id = "cataclysm-1"

[signer]
mnemonic = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about"

[tx]
gas_limit = 2000000
fee_initial = 50000
max_attempts = 3
multiplier = {multiplier}

[compounder]
contract_address = "{contract}"
stake_source_path = "stake.csv"
"#
        )
    }

    #[test]
    fn test_env_var_substitution() {
        env::set_var("COMPOUNDER_TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${COMPOUNDER_TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_missing_env_var_becomes_empty() {
        let result = substitute_env_vars("x = \"${COMPOUNDER_TEST_UNSET_VAR}\"");
        assert_eq!(result, "x = \"\"");
    }

    #[test]
    fn test_env_var_default() {
        env::set_var("COMPOUNDER_TEST_SET_LIMIT", "300000");
        let input = "a = ${COMPOUNDER_TEST_UNSET_LIMIT:-2000000}\nb = ${COMPOUNDER_TEST_SET_LIMIT:-1}";
        assert_eq!(substitute_env_vars(input), "a = 2000000\nb = 300000");
    }

    #[test]
    fn test_env_file_loaded_without_overriding() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "COMPOUNDER_TEST_DOTENV_NEW=from_file").unwrap();
        writeln!(file, "COMPOUNDER_TEST_DOTENV_SET=from_file").unwrap();
        env::set_var("COMPOUNDER_TEST_DOTENV_SET", "from_env");

        load_env_file(file.path());

        assert_eq!(env::var("COMPOUNDER_TEST_DOTENV_NEW").unwrap(), "from_file");
        assert_eq!(env::var("COMPOUNDER_TEST_DOTENV_SET").unwrap(), "from_env");
    }

    #[test]
    fn test_missing_env_file_is_not_fatal() {
        load_env_file(Path::new("/nonexistent/.env"));
    }

    #[test]
    fn test_shipped_config_parses() {
        env::set_var("GRPC_ENDPOINT", "localhost:9090");
        env::set_var("CHAIN_ID", "nibiru-localnet-0");
        env::set_var("COMPOUNDER_MNEMONIC", crate::keys::TEST_MNEMONIC);
        env::set_var("COMPOUNDER_CONTRACT_ADDRESS", CONTRACT);

        let settings = Settings::from_toml(include_str!("../config/default.toml")).unwrap();
        assert_eq!(settings.chain.grpc_endpoint, "localhost:9090");
        assert_eq!(settings.tx.gas_limit, 2_000_000);
        assert_eq!(settings.tx.multiplier, 1.5);
        assert_eq!(settings.compounder.stake_source_path, PathBuf::from("stake.csv"));
        assert!(!settings.metrics.enabled);
    }

    #[test]
    fn test_defaults_applied() {
        let settings = Settings::from_toml(&sample("1.5", CONTRACT)).unwrap();
        assert!(!settings.chain.insecure);
        assert_eq!(settings.chain.account_prefix, "nibi");
        assert_eq!(settings.chain.denom, "unibi");
        assert_eq!(settings.chain.connect_timeout_secs, 60);
        assert_eq!(settings.signer.name, "compounder");
        assert_eq!(settings.tx.confirm_poll_interval_ms, 1_000);
        assert_eq!(settings.tx.confirm_timeout_secs, 60);
        assert_eq!(settings.compounder.fee_reserve, 1_000_000);
        assert_eq!(settings.compounder.claim_to_compound_delay_secs, 10);
        assert_eq!(settings.compounder.repeat_interval_secs, None);
        assert!(!settings.metrics.enabled);
        assert_eq!(settings.metrics.port, 9100);
    }

    #[test]
    fn test_multiplier_must_grow() {
        let err = Settings::from_toml(&sample("1.0", CONTRACT)).unwrap_err();
        assert!(err.is_setup_failure());
        assert!(err.to_string().contains("multiplier"));
    }

    #[test]
    fn test_contract_prefix_checked() {
        let cosmos = "cosmos1qypqxpq9qcrsszg2pvxq6rs0zqg3yyc5lzv7xu";
        let err = Settings::from_toml(&sample("1.5", cosmos));
        assert!(err.is_err());
    }

    #[test]
    fn test_mnemonic_redacted_in_debug() {
        let settings = Settings::from_toml(&sample("1.5", CONTRACT)).unwrap();
        let rendered = format!("{:?}", settings);
        assert!(!rendered.contains("abandon"));
        assert!(rendered.contains("<redacted>"));
    }
}
