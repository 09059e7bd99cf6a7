//! Account-gas Sender
//!
//! Native transfers pay their own fee. Token transfers need native gas on
//! the source address; when it is short, the hot wallet tops it up first
//! and the driver re-submits once the top-up is seen in a block.
//!
//! Transactions are EIP-1559 with the fee cap pinned to `eth_gasPrice`, so
//! `gasPrice * gas` bounds what the sender can be charged.

use alloy::consensus::{SignableTransaction, TxEip1559, TxEnvelope};
use alloy::eips::eip2718::Encodable2718;
use alloy::network::TxSignerSync;
use alloy::primitives::{Address, Bytes, TxKind, U256};
use alloy::signers::local::PrivateKeySigner;
use async_trait::async_trait;
use std::sync::Arc;

use super::abi;
use super::client::{EthNode, FeeParams};
use crate::chain::{ChainError, FamilySender, HotWallet, SendAmount, Submission, WithdrawalRequest};
use crate::keys::PrivateKey;

/// Gas of a plain value transfer
pub const NATIVE_TRANSFER_GAS: u64 = 21_000;

/// Gas budget of an ERC-20 `transfer`
pub const TOKEN_TRANSFER_GAS: u64 = 65_000;

/// Top-up safety margin, ×1.2
const TOP_UP_MARGIN_NUM: u128 = 12;
const TOP_UP_MARGIN_DEN: u128 = 10;

/// An unsigned call from one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedCall {
    pub to: [u8; 20],
    pub value: u128,
    pub data: Vec<u8>,
    pub gas_limit: u64,
    pub nonce: u64,
}

impl UnsignedCall {
    /// Plain value transfer; the nonce is filled in at broadcast
    pub fn native(to: [u8; 20], value: u128) -> Self {
        Self {
            to,
            value,
            data: Vec::new(),
            gas_limit: NATIVE_TRANSFER_GAS,
            nonce: 0,
        }
    }

    /// `transfer(to, amount)` on `contract`
    pub fn token(contract: [u8; 20], to: &[u8; 20], amount: u128) -> Self {
        Self {
            to: contract,
            value: 0,
            data: abi::encode_transfer(to, amount),
            gas_limit: TOKEN_TRANSFER_GAS,
            nonce: 0,
        }
    }
}

/// Sign `call` as an EIP-1559 transaction; returns the 2718 envelope bytes
pub fn sign_call(key: &PrivateKey, fees: &FeeParams, call: UnsignedCall) -> Result<Vec<u8>, ChainError> {
    let signer = PrivateKeySigner::from_signing_key(key.signing_key()?);

    let mut tx = TxEip1559 {
        chain_id: fees.chain_id,
        nonce: call.nonce,
        gas_limit: call.gas_limit,
        max_fee_per_gas: fees.gas_price,
        max_priority_fee_per_gas: fees.priority_fee.min(fees.gas_price),
        to: TxKind::Call(Address::from(call.to)),
        value: U256::from(call.value),
        access_list: Default::default(),
        input: Bytes::from(call.data),
    };

    let signature = signer
        .sign_transaction_sync(&mut tx)
        .map_err(|e| ChainError::Signing(e.to_string()))?;
    let envelope = TxEnvelope::from(tx.into_signed(signature));

    Ok(envelope.encoded_2718())
}

/// Native amount the hot wallet sends so `balance` covers `fee` with margin
pub fn top_up_amount(fee: u128, balance: u128) -> u128 {
    (fee.saturating_mul(TOP_UP_MARGIN_NUM) / TOP_UP_MARGIN_DEN).saturating_sub(balance)
}

/// Sender for the account-gas family
pub struct EthSender {
    node: Arc<dyn EthNode>,
}

impl EthSender {
    pub fn new(node: Arc<dyn EthNode>) -> Self {
        Self { node }
    }

    async fn broadcast(
        &self,
        key: &PrivateKey,
        from: &str,
        fees: &FeeParams,
        mut call: UnsignedCall,
    ) -> Result<String, ChainError> {
        call.nonce = self.node.nonce(from).await?;
        let raw = sign_call(key, fees, call)?;

        let hash = self
            .node
            .send_raw_transaction(&format!("0x{}", hex::encode(raw)))
            .await?;
        Ok(hash.to_lowercase())
    }

    async fn send_native(
        &self,
        request: &WithdrawalRequest,
        fees: &FeeParams,
    ) -> Result<Submission, ChainError> {
        let to = abi::parse_eth_address(&request.to)?;
        let balance = self.node.balance(&request.from).await?;
        let fee = fees.cost(NATIVE_TRANSFER_GAS);

        let value = match request.amount {
            SendAmount::All => balance.checked_sub(fee).filter(|v| *v > 0),
            SendAmount::Exact(v) => (v > 0 && balance >= v.saturating_add(fee)).then_some(v),
        };
        let Some(value) = value else {
            return Ok(Submission::NoFeeOnNative);
        };

        let hash = self
            .broadcast(&request.from_key, &request.from, fees, UnsignedCall::native(to, value))
            .await?;
        Ok(Submission::Sent { hash })
    }

    async fn send_token(
        &self,
        request: &WithdrawalRequest,
        contract: &str,
        hot: &HotWallet,
        fees: &FeeParams,
    ) -> Result<Submission, ChainError> {
        let to = abi::parse_eth_address(&request.to)?;
        let contract_address = abi::parse_eth_address(contract)?;

        let held = self.node.token_balance(contract, &request.from).await?;
        let amount = match request.amount {
            SendAmount::All => held,
            SendAmount::Exact(v) => v,
        };
        if amount == 0 || held < amount {
            return Err(ChainError::InsufficientFunds(format!(
                "{} holds {} of {}, needs {}",
                request.from, held, request.currency.id, amount
            )));
        }

        let fee = fees.cost(TOKEN_TRANSFER_GAS);
        let native = self.node.balance(&request.from).await?;

        if native < fee {
            if request.from == hot.address {
                return Ok(Submission::NoFeeOnNative);
            }

            let top_up = top_up_amount(fee, native);
            let faucet = self.node.balance(&hot.address).await?;
            if faucet.saturating_sub(top_up) <= fees.cost(NATIVE_TRANSFER_GAS) {
                return Ok(Submission::FaucetEmpty);
            }

            let source = abi::parse_eth_address(&request.from)?;
            let hash = self
                .broadcast(&hot.key, &hot.address, fees, UnsignedCall::native(source, top_up))
                .await?;
            return Ok(Submission::GasTopUp { hash });
        }

        let call = UnsignedCall::token(contract_address, &to, amount);
        let hash = self
            .broadcast(&request.from_key, &request.from, fees, call)
            .await?;
        Ok(Submission::Sent { hash })
    }
}

#[async_trait]
impl FamilySender for EthSender {
    async fn submit(
        &self,
        request: &WithdrawalRequest,
        hot: &HotWallet,
    ) -> Result<Submission, ChainError> {
        let fees = self.node.fee_params().await?;

        match request.currency.contract.as_deref() {
            None => self.send_native(request, &fees).await,
            Some(contract) => self.send_token(request, contract, hot, &fees).await,
        }
    }
}
