//! Node configuration, built once at startup and shared by `Arc`.

use core::fmt;
use std::{path::Path, time::Duration};

use serde::Deserialize;

use crate::{channel::PartIdx, types::Address};

/// Which side of the two-party setup this node plays.
///
/// Alice deploys the contracts, Bob validates them. Channel participant
/// indices are assigned per proposal, not per role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum Role {
    Alice,
    Bob,
}

impl Role {
    pub fn index(self) -> PartIdx {
        match self {
            Role::Alice => 0,
            Role::Bob => 1,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Alice => write!(f, "Alice"),
            Role::Bob => write!(f, "Bob"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}

/// On-chain addresses of the adjudicator and the asset holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct ContractAddresses {
    pub adjudicator: Address,
    pub asset_holder: Address,
}

impl Default for ContractAddresses {
    /// Addresses a fresh development chain assigns to the first two
    /// deployments of the default account.
    fn default() -> Self {
        Self {
            adjudicator: Address([
                0x07, 0x95, 0x57, 0xd7, 0x54, 0x9d, 0x7d, 0x44, 0xf4, 0xb0, 0x0b, 0x51, 0xd2,
                0xc5, 0x32, 0x67, 0x41, 0x29, 0xed, 0x51,
            ]),
            asset_holder: Address([
                0x92, 0x34, 0x39, 0xbe, 0x51, 0x5b, 0x6a, 0x92, 0x8c, 0xb9, 0x65, 0x0d, 0x70,
                0x00, 0x0a, 0x90, 0x44, 0xe4, 0x9e, 0x85,
            ]),
        }
    }
}

/// Upper bounds for every blocking call, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Waiting for the answer to our proposal.
    pub propose_ms: u64,
    /// Deciding on and answering an inbound proposal.
    pub accept_proposal_ms: u64,
    /// Waiting for the peer to accept our update.
    pub update_ms: u64,
    /// Deciding on an inbound update.
    pub accept_update_ms: u64,
    /// Register and settle during close.
    pub close_ms: u64,
    /// Waiting for all deposits.
    pub funding_ms: u64,
    /// Deploying the contracts, at least twice the block time.
    pub deploy_ms: u64,
    pub validate_ms: u64,
    /// Waiting for the peer's signature on the initial state.
    pub response_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            propose_ms: 10_000,
            accept_proposal_ms: 15_000,
            update_ms: 10_000,
            accept_update_ms: 10_000,
            close_ms: 15_000,
            funding_ms: 20_000,
            deploy_ms: 31_000,
            validate_ms: 20_000,
            response_ms: 10_000,
        }
    }
}

impl Timeouts {
    pub fn propose(&self) -> Duration {
        Duration::from_millis(self.propose_ms)
    }
    pub fn accept_proposal(&self) -> Duration {
        Duration::from_millis(self.accept_proposal_ms)
    }
    pub fn update(&self) -> Duration {
        Duration::from_millis(self.update_ms)
    }
    pub fn accept_update(&self) -> Duration {
        Duration::from_millis(self.accept_update_ms)
    }
    pub fn close(&self) -> Duration {
        Duration::from_millis(self.close_ms)
    }
    pub fn funding(&self) -> Duration {
        Duration::from_millis(self.funding_ms)
    }
    pub fn deploy(&self) -> Duration {
        Duration::from_millis(self.deploy_ms)
    }
    pub fn validate(&self) -> Duration {
        Duration::from_millis(self.validate_ms)
    }
    pub fn response(&self) -> Duration {
        Duration::from_millis(self.response_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Shared wallet seed both roles derive their account from.
    pub seed: String,
    pub chain_id: u64,
    /// Seconds a registered state can be refuted before it concludes.
    pub challenge_duration: u64,
    /// Well-known contract addresses, validated by the non-deploying role.
    pub contracts: Option<ContractAddresses>,
    pub timeouts: Timeouts,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            seed: "pistol kiwi shrug future ozone ostrich match remove crucial oblige cream critic"
                .into(),
            chain_id: 1337,
            challenge_duration: 10,
            contracts: Some(ContractAddresses::default()),
            timeouts: Timeouts::default(),
        }
    }
}

impl Config {
    /// Parse a TOML document, missing fields fall back to their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.seed.is_empty() {
            return Err(ConfigError::Invalid("seed must not be empty"));
        }
        if self.challenge_duration == 0 {
            return Err(ConfigError::Invalid("challenge_duration must be non-zero"));
        }
        if let Some(c) = &self.contracts {
            if c.adjudicator.is_zero() || c.asset_holder.is_zero() {
                return Err(ConfigError::Invalid("contract addresses must be non-zero"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = Config::from_toml_str("").unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.timeouts.accept_proposal(), Duration::from_secs(15));
        assert_eq!(cfg.timeouts.deploy(), Duration::from_secs(31));
    }

    #[test]
    fn partial_override() {
        let cfg = Config::from_toml_str(
            r#"
            chain_id = 5
            [timeouts]
            update_ms = 250
            [contracts]
            adjudicator = "0x079557d7549d7D44F4b00b51d2C532674129ed51"
            asset_holder = "923439be515b6A928cB9650d70000a9044e49E85"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.chain_id, 5);
        assert_eq!(cfg.timeouts.update(), Duration::from_millis(250));
        assert_eq!(cfg.timeouts.close(), Duration::from_secs(15));
        assert_eq!(cfg.contracts, Some(ContractAddresses::default()));
    }

    #[test]
    fn rejects_bad_address() {
        let err = Config::from_toml_str(
            r#"
            [contracts]
            adjudicator = "0x1234"
            asset_holder = "0x923439be515b6A928cB9650d70000a9044e49E85"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));

        let err = Config::from_toml_str(
            r#"
            [contracts]
            adjudicator = "0x0000000000000000000000000000000000000000"
            asset_holder = "0x923439be515b6A928cB9650d70000a9044e49E85"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_zero_challenge_duration() {
        let err = Config::from_toml_str("challenge_duration = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn role_helpers() {
        assert_eq!(Role::Bob.index(), 1);
        assert_eq!(Role::Bob.to_string(), "Bob");
    }
}
