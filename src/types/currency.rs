//! Currency Identifiers
//!
//! Every asset the engine handles is named by a composite id
//! `{token}_{network}_{family}`:
//! - `ETH_ETH_ETH` - native ether on the "ETH" network (account-gas family)
//! - `USDT_BSC_ETH` - a token on the "BSC" network, same family
//! - `BTCTEST_BTCTEST_BTC` - native coin of a UTXO network
//!
//! A native coin repeats the network name as its token segment.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Chain families the engine can drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChainFamily {
    /// Bitcoin-style unspent outputs
    Utxo,
    /// Ethereum-style balances with a gas fee market
    AccountGas,
    /// Tron-style balances with bandwidth/energy resources
    AccountResource,
}

impl ChainFamily {
    /// Tag used in the network file and in coin ids
    pub fn tag(&self) -> &'static str {
        match self {
            ChainFamily::Utxo => "BTC",
            ChainFamily::AccountGas => "ETH",
            ChainFamily::AccountResource => "TRX",
        }
    }

    /// Decimal precision of the native coin
    pub fn native_decimals(&self) -> u8 {
        match self {
            ChainFamily::Utxo => 8,
            ChainFamily::AccountGas => 18,
            ChainFamily::AccountResource => 6,
        }
    }

    pub fn default_confirmations(&self) -> u64 {
        match self {
            ChainFamily::Utxo => 3,
            ChainFamily::AccountGas | ChainFamily::AccountResource => 10,
        }
    }

    pub fn default_poll_interval(&self) -> Duration {
        match self {
            ChainFamily::Utxo => Duration::from_secs(30),
            ChainFamily::AccountGas => Duration::from_secs(3),
            ChainFamily::AccountResource => Duration::from_secs(1),
        }
    }

    pub fn default_sweep_interval(&self) -> Duration {
        match self {
            ChainFamily::Utxo => Duration::from_secs(60),
            ChainFamily::AccountGas | ChainFamily::AccountResource => Duration::from_secs(10),
        }
    }
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for ChainFamily {
    type Err = CoinIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BTC" | "UTXO" => Ok(ChainFamily::Utxo),
            "ETH" | "EVM" => Ok(ChainFamily::AccountGas),
            "TRX" | "TRON" => Ok(ChainFamily::AccountResource),
            other => Err(CoinIdError::UnknownFamily(other.to_string())),
        }
    }
}

/// Coin id parse errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoinIdError {
    #[error("malformed coin id: {0}")]
    Malformed(String),

    #[error("unknown chain family: {0}")]
    UnknownFamily(String),
}

/// Composite currency identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoinId {
    token: String,
    network: String,
    family: ChainFamily,
}

impl CoinId {
    /// Native coin of a network
    pub fn native(network: &str, family: ChainFamily) -> Self {
        let network = network.to_uppercase();
        Self {
            token: network.clone(),
            network,
            family,
        }
    }

    /// Token on a network
    pub fn token(symbol: &str, network: &str, family: ChainFamily) -> Self {
        Self {
            token: symbol.to_uppercase(),
            network: network.to_uppercase(),
            family,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.token
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn family(&self) -> ChainFamily {
        self.family
    }

    pub fn is_native(&self) -> bool {
        self.token == self.network
    }
}

impl fmt::Display for CoinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.token, self.network, self.family.tag())
    }
}

impl FromStr for CoinId {
    type Err = CoinIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('_').collect();
        if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(CoinIdError::Malformed(s.to_string()));
        }

        let family = parts[2].parse()?;
        Ok(CoinId::token(parts[0], parts[1], family))
    }
}

/// One entry of an adapter's currency catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Currency {
    pub id: CoinId,
    pub decimals: u8,
    /// Contract address for tokens, `None` for the native coin
    pub contract: Option<String>,
}

impl Currency {
    /// Native coin entry
    pub fn native(network: &str, family: ChainFamily) -> Self {
        Self {
            id: CoinId::native(network, family),
            decimals: family.native_decimals(),
            contract: None,
        }
    }

    /// Token entry
    pub fn token(symbol: &str, network: &str, family: ChainFamily, contract: String, decimals: u8) -> Self {
        Self {
            id: CoinId::token(symbol, network, family),
            decimals,
            contract: Some(contract),
        }
    }

    pub fn is_native(&self) -> bool {
        self.contract.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coin_id_parsing() {
        let id: CoinId = "usdt_bsc_eth".parse().unwrap();
        assert_eq!(id.symbol(), "USDT");
        assert_eq!(id.network(), "BSC");
        assert_eq!(id.family(), ChainFamily::AccountGas);
        assert!(!id.is_native());
        assert_eq!(id.to_string(), "USDT_BSC_ETH");

        let native = CoinId::native("btctest", ChainFamily::Utxo);
        assert!(native.is_native());
        assert_eq!(native.to_string(), "BTCTEST_BTCTEST_BTC");
    }

    #[test]
    fn test_coin_id_rejects_malformed() {
        assert!(matches!("ETH_ETH".parse::<CoinId>(), Err(CoinIdError::Malformed(_))));
        assert!(matches!("A__ETH".parse::<CoinId>(), Err(CoinIdError::Malformed(_))));
        assert!(matches!(
            "DOGE_DOGE_DOGE".parse::<CoinId>(),
            Err(CoinIdError::UnknownFamily(_))
        ));
    }

    #[test]
    fn test_native_decimals() {
        assert_eq!(Currency::native("BTC", ChainFamily::Utxo).decimals, 8);
        assert_eq!(Currency::native("ETH", ChainFamily::AccountGas).decimals, 18);
        assert_eq!(Currency::native("TRX", ChainFamily::AccountResource).decimals, 6);
    }

    #[test]
    fn test_default_confirmations() {
        assert_eq!(ChainFamily::Utxo.default_confirmations(), 3);
        assert_eq!(ChainFamily::AccountGas.default_confirmations(), 10);
        assert_eq!(ChainFamily::AccountResource.default_confirmations(), 10);
    }
}
