//! Esplora API Client
//!
//! UTXO listing, fee estimation and broadcast for the UTXO sender.
//! Works against mempool.space and Blockstream-style endpoints.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::chain::ChainError;

/// Confirmation target used when only `/fee-estimates` is available
const ECONOMY_TARGET_BLOCKS: &str = "144";

/// Unspent transaction output
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Utxo {
    pub txid: String,
    pub vout: u32,
    /// Satoshis
    pub value: u64,
    #[serde(default)]
    pub status: UtxoStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UtxoStatus {
    #[serde(default)]
    pub confirmed: bool,
    #[serde(default)]
    pub block_height: Option<u64>,
}

/// mempool.space `/v1/fees/recommended`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecommendedFees {
    economy_fee: u64,
}

/// What the UTXO sender needs from the network
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UtxoBackend: Send + Sync {
    /// Spendable outputs of `address`
    async fn utxos(&self, address: &str) -> Result<Vec<Utxo>, ChainError>;

    /// Economy fee rate, sat/vB
    async fn fee_rate(&self) -> Result<u64, ChainError>;

    /// Broadcast a raw transaction; returns its txid
    async fn broadcast(&self, tx_hex: &str) -> Result<String, ChainError>;
}

/// Esplora HTTP client
#[derive(Debug, Clone)]
pub struct EsploraClient {
    client: Client,
    base_url: String,
}

impl EsploraClient {
    pub fn new(base_url: &str) -> Result<Self, ChainError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ChainError> {
        Ok(self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}

#[async_trait]
impl UtxoBackend for EsploraClient {
    async fn utxos(&self, address: &str) -> Result<Vec<Utxo>, ChainError> {
        self.get(&format!("/address/{}/utxo", address)).await
    }

    /// mempool.space's economy recommendation, else Esplora's one-day estimate
    async fn fee_rate(&self) -> Result<u64, ChainError> {
        if let Ok(fees) = self.get::<RecommendedFees>("/v1/fees/recommended").await {
            return Ok(fees.economy_fee.max(1));
        }

        let estimates: HashMap<String, f64> = self.get("/fee-estimates").await?;
        estimates
            .get(ECONOMY_TARGET_BLOCKS)
            .map(|rate| rate.ceil().max(1.0) as u64)
            .ok_or_else(|| ChainError::Parse("no fee estimate".to_string()))
    }

    async fn broadcast(&self, tx_hex: &str) -> Result<String, ChainError> {
        let resp = self
            .client
            .post(format!("{}/tx", self.base_url))
            .body(tx_hex.to_string())
            .send()
            .await?;

        if !resp.status().is_success() {
            let reason = resp.text().await.unwrap_or_default();
            return Err(ChainError::Broadcast(reason));
        }

        Ok(resp.text().await?.trim().to_string())
    }
}
