use std::str::FromStr;

use crate::{
    constants::DEFAULT_CONTRACT_NAME,
    error::ConfigError,
};

/// What the event pump does with an event it cannot decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UnknownEventPolicy {
    /// Log the event and keep consuming the stream.
    #[default]
    Skip,
    /// Log the event and stop consuming the stream.
    Halt,
}

impl FromStr for UnknownEventPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(UnknownEventPolicy::Skip),
            "halt" => Ok(UnknownEventPolicy::Halt),
            _ => Err(ConfigError::Invalid {
                name: "BLUEPRINT_UNKNOWN_EVENTS",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name resolved through the transport when no address is configured.
    pub contract_name: String,
    pub contract_address: Option<String>,
    pub unknown_event_policy: UnknownEventPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            contract_name: DEFAULT_CONTRACT_NAME.to_string(),
            contract_address: None,
            unknown_event_policy: UnknownEventPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_contract_address(mut self, address: impl Into<String>) -> Self {
        self.contract_address = Some(address.into());
        self
    }

    pub fn with_unknown_event_policy(mut self, policy: UnknownEventPolicy) -> Self {
        self.unknown_event_policy = policy;
        self
    }

    /// Loads the configuration from the process environment, reading `.env`
    /// first when present.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            contract_name: lookup("BLUEPRINT_CONTRACT_NAME").unwrap_or(defaults.contract_name),
            contract_address: lookup("BLUEPRINT_CONTRACT_ADDRESS").filter(|a| !a.is_empty()),
            unknown_event_policy: lookup("BLUEPRINT_UNKNOWN_EVENTS")
                .map(|raw| raw.parse())
                .transpose()?
                .unwrap_or_default(),
        })
    }
}
