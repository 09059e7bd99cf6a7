//! Account-resource Sender
//!
//! Transactions are built by the node (`createtransaction`,
//! `triggersmartcontract`), checked against their `raw_data_hex`, and
//! signed locally: secp256k1 over `txID`, 65 bytes `r ‖ s ‖ v` with
//! `v = recid + 27`.
//!
//! Fees are reserved rather than estimated:
//!
//! | transfer | reserve                                  |
//! |----------|------------------------------------------|
//! | TRX      | 2 TRX                                    |
//! | TRC-20   | 50 TRX, or 1 TRX if staked energy covers it |

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::client::{TronNode, TronTransaction};
use crate::chain::{ChainError, FamilySender, HotWallet, SendAmount, Submission, WithdrawalRequest};
use crate::keys::{tron_base58_to_bytes, PrivateKey};

pub const SUN_PER_TRX: u128 = 1_000_000;

/// Reserve kept for a native transfer
pub const NATIVE_FEE_RESERVE: u128 = 2 * SUN_PER_TRX;

/// Reserve for a token transfer that burns TRX for energy
pub const TOKEN_FEE_RESERVE: u128 = 50 * SUN_PER_TRX;

/// Reserve for a token transfer paid from staked energy
pub const TOKEN_FEE_RESERVE_WITH_ENERGY: u128 = SUN_PER_TRX;

/// Energy of a TRC-20 `transfer` to an activated account
pub const TOKEN_TRANSFER_ENERGY: u64 = 65_000;

/// `fee_limit` on token transfers, in sun
pub const TOKEN_FEE_LIMIT: u64 = 50_000_000;

/// Top-up safety margin, ×1.2
const TOP_UP_MARGIN_NUM: u128 = 12;
const TOP_UP_MARGIN_DEN: u128 = 10;

/// Sign a node-built transaction in place
///
/// Refuses to sign when `txID` is not the hash of `raw_data_hex`.
pub fn sign_transaction(key: &PrivateKey, tx: &mut TronTransaction) -> Result<(), ChainError> {
    let raw = hex::decode(&tx.raw_data_hex)
        .map_err(|e| ChainError::Parse(format!("raw_data_hex: {}", e)))?;
    let digest = Sha256::digest(&raw);

    if !hex::encode(digest).eq_ignore_ascii_case(tx.tx_id.trim_start_matches("0x")) {
        return Err(ChainError::Signing(format!(
            "txID {} does not match raw data",
            tx.tx_id
        )));
    }

    let (signature, recovery_id) = key
        .signing_key()?
        .sign_prehash_recoverable(&digest)
        .map_err(|e| ChainError::Signing(e.to_string()))?;

    let mut bytes = signature.to_bytes().to_vec();
    bytes.push(recovery_id.to_byte() + 27);
    tx.signature = vec![hex::encode(bytes)];

    Ok(())
}

fn top_up_amount(reserve: u128, balance: u128) -> u128 {
    (reserve * TOP_UP_MARGIN_NUM / TOP_UP_MARGIN_DEN).saturating_sub(balance)
}

/// Sender for the account-resource family
pub struct TronSender {
    node: Arc<dyn TronNode>,
}

impl TronSender {
    pub fn new(node: Arc<dyn TronNode>) -> Self {
        Self { node }
    }

    async fn sign_and_broadcast(&self, key: &PrivateKey, mut tx: TronTransaction) -> Result<String, ChainError> {
        sign_transaction(key, &mut tx)?;
        let hash = self.node.broadcast(&tx).await?;
        Ok(hash.to_lowercase())
    }

    async fn send_native(&self, request: &WithdrawalRequest) -> Result<Submission, ChainError> {
        let balance = self.node.balance(&request.from).await?;

        let value = match request.amount {
            SendAmount::All => balance.checked_sub(NATIVE_FEE_RESERVE).filter(|v| *v > 0),
            SendAmount::Exact(v) => {
                (v > 0 && balance >= v.saturating_add(NATIVE_FEE_RESERVE)).then_some(v)
            }
        };
        let Some(value) = value else {
            return Ok(Submission::NoFeeOnNative);
        };

        let tx = self
            .node
            .create_transfer(&request.from, &request.to, value)
            .await?;
        let hash = self.sign_and_broadcast(&request.from_key, tx).await?;
        Ok(Submission::Sent { hash })
    }

    async fn send_token(
        &self,
        request: &WithdrawalRequest,
        contract: &str,
        hot: &HotWallet,
    ) -> Result<Submission, ChainError> {
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

        let energy = self.node.available_energy(&request.from).await?;
        let reserve = if energy >= TOKEN_TRANSFER_ENERGY {
            TOKEN_FEE_RESERVE_WITH_ENERGY
        } else {
            TOKEN_FEE_RESERVE
        };
        let native = self.node.balance(&request.from).await?;

        if native < reserve {
            if request.from == hot.address {
                return Ok(Submission::NoFeeOnNative);
            }

            let top_up = top_up_amount(reserve, native);
            let faucet = self.node.balance(&hot.address).await?;
            if faucet.saturating_sub(top_up) <= NATIVE_FEE_RESERVE {
                return Ok(Submission::FaucetEmpty);
            }

            let tx = self
                .node
                .create_transfer(&hot.address, &request.from, top_up)
                .await?;
            let hash = self.sign_and_broadcast(&hot.key, tx).await?;
            return Ok(Submission::GasTopUp { hash });
        }

        let tx = self
            .node
            .create_token_transfer(&request.from, contract, &request.to, amount, TOKEN_FEE_LIMIT)
            .await?;
        let hash = self.sign_and_broadcast(&request.from_key, tx).await?;
        Ok(Submission::Sent { hash })
    }
}

#[async_trait]
impl FamilySender for TronSender {
    async fn submit(
        &self,
        request: &WithdrawalRequest,
        hot: &HotWallet,
    ) -> Result<Submission, ChainError> {
        tron_base58_to_bytes(&request.to)
            .map_err(|_| ChainError::InvalidAddress(request.to.clone()))?;

        match request.currency.contract.as_deref() {
            None => self.send_native(request).await,
            Some(contract) => self.send_token(request, contract, hot).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{tron_address, AddressEncoding};
    use crate::resource::client::MockTronNode;
    use crate::types::{ChainFamily, Currency};
    use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
    use serde_json::json;

    fn key(n: u64) -> PrivateKey {
        PrivateKey::from_hex(&format!("{:064x}", n)).unwrap()
    }

    fn hot() -> HotWallet {
        HotWallet::derive(key(21), AddressEncoding::Tron).unwrap()
    }

    fn usdt() -> Currency {
        let contract = tron_address(&key(22)).unwrap();
        Currency::token("USDT", "TRX", ChainFamily::AccountResource, contract, 6)
    }

    fn request(currency: Currency, amount: SendAmount) -> WithdrawalRequest {
        WithdrawalRequest {
            from: tron_address(&key(23)).unwrap(),
            from_key: key(23),
            currency,
            amount,
            to: tron_address(&key(24)).unwrap(),
        }
    }

    /// An unsigned transaction as a node would return it
    fn built(marker: &str) -> TronTransaction {
        let raw_data_hex = hex::encode(marker.as_bytes());
        let tx_id = hex::encode(Sha256::digest(marker.as_bytes()));
        TronTransaction {
            tx_id,
            raw_data: json!({ "marker": marker }),
            raw_data_hex,
            visible: true,
            signature: Vec::new(),
        }
    }

    fn signed_by(tx: &TronTransaction, key: &PrivateKey) -> bool {
        let Some(sig) = tx.signature.first().and_then(|s| hex::decode(s).ok()) else {
            return false;
        };
        if sig.len() != 65 || !(sig[64] == 27 || sig[64] == 28) {
            return false;
        }

        let digest = hex::decode(&tx.tx_id).unwrap();
        let signature = Signature::from_slice(&sig[..64]).unwrap();
        let recid = RecoveryId::from_byte(sig[64] - 27).unwrap();
        let recovered = VerifyingKey::recover_from_prehash(&digest, &signature, recid).unwrap();

        recovered == *key.signing_key().unwrap().verifying_key()
    }

    #[test]
    fn test_signature_recovers_signer() {
        let mut tx = built("native-transfer");
        sign_transaction(&key(5), &mut tx).unwrap();
        assert!(signed_by(&tx, &key(5)));
        assert!(!signed_by(&tx, &key(6)));
    }

    #[test]
    fn test_refuses_mismatched_tx_id() {
        let mut tx = built("one");
        tx.raw_data_hex = hex::encode(b"two");
        assert!(matches!(
            sign_transaction(&key(5), &mut tx),
            Err(ChainError::Signing(_))
        ));
        assert!(tx.signature.is_empty());
    }

    #[tokio::test]
    async fn test_native_sweep_keeps_reserve() {
        let mut node = MockTronNode::new();
        node.expect_balance().returning(|_| Ok(10 * SUN_PER_TRX));
        node.expect_create_transfer()
            .times(1)
            .withf(|_, _, amount| *amount == 8 * SUN_PER_TRX)
            .returning(|_, _, _| Ok(built("sweep")));
        node.expect_broadcast()
            .times(1)
            .withf(|tx: &TronTransaction| signed_by(tx, &key(23)))
            .returning(|tx| Ok(tx.tx_id.to_uppercase()));

        let sender = TronSender::new(Arc::new(node));
        let result = sender
            .submit(
                &request(Currency::native("TRX", ChainFamily::AccountResource), SendAmount::All),
                &hot(),
            )
            .await
            .unwrap();

        assert_eq!(
            result,
            Submission::Sent {
                hash: built("sweep").tx_id
            }
        );
    }

    #[tokio::test]
    async fn test_token_without_trx_gets_top_up() {
        let hot = hot();
        let hot_address = hot.address.clone();
        let source = request(usdt(), SendAmount::Exact(1)).from;

        let mut node = MockTronNode::new();
        node.expect_token_balance().returning(|_, _| Ok(3_000_000));
        node.expect_available_energy().returning(|_| Ok(0));
        node.expect_balance()
            .returning(move |address| Ok(if address == hot_address { 1_000 * SUN_PER_TRX } else { 0 }));

        let hot_address = hot.address.clone();
        node.expect_create_transfer()
            .times(1)
            .withf(move |from, to, amount| from == hot_address && to == source && *amount == 60 * SUN_PER_TRX)
            .returning(|_, _, _| Ok(built("top-up")));
        node.expect_create_token_transfer().never();
        node.expect_broadcast()
            .times(1)
            .withf(|tx: &TronTransaction| signed_by(tx, &key(21)))
            .returning(|tx| Ok(tx.tx_id.clone()));

        let sender = TronSender::new(Arc::new(node));
        let result = sender
            .submit(&request(usdt(), SendAmount::Exact(3_000_000)), &hot)
            .await
            .unwrap();

        assert_eq!(
            result,
            Submission::GasTopUp {
                hash: built("top-up").tx_id
            }
        );
    }

    #[tokio::test]
    async fn test_staked_energy_lowers_reserve() {
        let mut node = MockTronNode::new();
        node.expect_token_balance().returning(|_, _| Ok(3_000_000));
        node.expect_available_energy().returning(|_| Ok(TOKEN_TRANSFER_ENERGY));
        node.expect_balance().returning(|_| Ok(SUN_PER_TRX + 500_000));
        node.expect_create_transfer().never();
        node.expect_create_token_transfer()
            .times(1)
            .withf(|_, _, _, amount, fee_limit| *amount == 3_000_000 && *fee_limit == TOKEN_FEE_LIMIT)
            .returning(|_, _, _, _, _| Ok(built("token")));
        node.expect_broadcast()
            .times(1)
            .withf(|tx: &TronTransaction| signed_by(tx, &key(23)))
            .returning(|tx| Ok(tx.tx_id.clone()));

        let sender = TronSender::new(Arc::new(node));
        let result = sender
            .submit(&request(usdt(), SendAmount::All), &hot())
            .await
            .unwrap();

        assert!(matches!(result, Submission::Sent { .. }));
    }

    #[tokio::test]
    async fn test_faucet_empty() {
        let hot = hot();
        let hot_address = hot.address.clone();

        let mut node = MockTronNode::new();
        node.expect_token_balance().returning(|_, _| Ok(1));
        node.expect_available_energy().returning(|_| Ok(0));
        // 60 TRX top-up leaves exactly the 2 TRX native reserve
        node.expect_balance()
            .returning(move |address| Ok(if address == hot_address { 62 * SUN_PER_TRX } else { 0 }));
        node.expect_create_transfer().never();
        node.expect_broadcast().never();

        let sender = TronSender::new(Arc::new(node));
        let result = sender.submit(&request(usdt(), SendAmount::Exact(1)), &hot).await.unwrap();

        assert_eq!(result, Submission::FaucetEmpty);
    }

    #[tokio::test]
    async fn test_rejects_malformed_destination() {
        let node = MockTronNode::new();
        let sender = TronSender::new(Arc::new(node));

        let mut req = request(Currency::native("TRX", ChainFamily::AccountResource), SendAmount::All);
        req.to = "0x8ba1f109551bd432803012645ac136ddd64dba72".into();

        assert!(matches!(
            sender.submit(&req, &hot()).await,
            Err(ChainError::InvalidAddress(_))
        ));
    }
}
