use std::str::FromStr;

use anyhow::{Result, bail};

pub mod event;

pub use event::{BlueprintEvent, EventDetails, RawEvent, ValueChanged, ValueRemoved};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainId {
    MAINNET = 77658377,
    BUILDNET = 77658366,
}

impl ChainId {
    pub fn to_u64(&self) -> u64 {
        *self as u64
    }
}

impl FromStr for ChainId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(ChainId::MAINNET),
            "buildnet" => Ok(ChainId::BUILDNET),
            other => bail!("Unknown chain `{}`, expected mainnet or buildnet", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_id_from_str() {
        assert_eq!("buildnet".parse::<ChainId>().unwrap(), ChainId::BUILDNET);
        assert_eq!("MAINNET".parse::<ChainId>().unwrap(), ChainId::MAINNET);
        assert!("devnet".parse::<ChainId>().is_err());
    }

    #[test]
    fn test_chain_id_to_u64() {
        assert_eq!(ChainId::BUILDNET.to_u64(), 77658366);
        assert_eq!(ChainId::MAINNET.to_u64(), 77658377);
    }
}
