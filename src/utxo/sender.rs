//! UTXO Withdrawal Sender
//!
//! Spends every UTXO of the source P2PKH address. A sweep sends the whole
//! balance minus the fee to one output; an exact payout adds a change
//! output back to the source when the change clears the dust limit.
//!
//! Fee = rate × (148 · inputs + 34 · outputs + 20).

use async_trait::async_trait;
use bitcoin::address::NetworkUnchecked;
use bitcoin::hashes::Hash;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::{Message, SECP256K1};
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::{
    absolute::LockTime, transaction::Version, Address, Amount, Network, OutPoint, ScriptBuf,
    Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use std::sync::Arc;

use super::esplora::{Utxo, UtxoBackend};
use crate::chain::{ChainError, FamilySender, HotWallet, SendAmount, Submission, WithdrawalRequest};
use crate::keys::{btc_public_key, PrivateKey};

/// Outputs at or below this are not worth creating
pub const DUST_LIMIT: u64 = 546;

/// Estimated size of a P2PKH transaction in bytes
pub fn estimate_size(inputs: usize, outputs: usize) -> u64 {
    148 * inputs as u64 + 34 * outputs as u64 + 20
}

/// Amounts of a planned transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payout {
    pub send: u64,
    /// Returned to the source; 0 for no change output
    pub change: u64,
    pub fee: u64,
}

/// Plan a spend of `total` sats over `inputs` inputs
///
/// `None` when the funds cannot cover the amount plus fee.
pub fn plan_payout(total: u64, inputs: usize, amount: SendAmount, fee_rate: u64) -> Option<Payout> {
    let single_fee = fee_rate.checked_mul(estimate_size(inputs, 1))?;

    match amount {
        SendAmount::All => {
            if total <= single_fee {
                return None;
            }
            Some(Payout {
                send: total - single_fee,
                change: 0,
                fee: single_fee,
            })
        }
        SendAmount::Exact(value) => {
            let value = u64::try_from(value).ok().filter(|v| *v > 0)?;

            let change_fee = fee_rate.checked_mul(estimate_size(inputs, 2))?;
            if let Some(change) = total
                .checked_sub(value)
                .and_then(|rest| rest.checked_sub(change_fee))
            {
                if change > DUST_LIMIT {
                    return Some(Payout {
                        send: value,
                        change,
                        fee: change_fee,
                    });
                }
            }

            // Leftover too small for a change output goes to the miner
            let rest = total.checked_sub(value)?;
            if rest < single_fee {
                return None;
            }
            Some(Payout {
                send: value,
                change: 0,
                fee: rest,
            })
        }
    }
}

/// Build and sign a P2PKH spend of `utxos`
pub fn build_signed_transaction(
    key: &PrivateKey,
    network: Network,
    utxos: &[Utxo],
    to: &str,
    payout: &Payout,
) -> Result<Transaction, ChainError> {
    let secret = key.secp_secret()?;
    let public_key = btc_public_key(key)?;
    let source_script = ScriptBuf::new_p2pkh(&public_key.pubkey_hash());

    let destination = to
        .parse::<Address<NetworkUnchecked>>()
        .map_err(|_| ChainError::InvalidAddress(to.to_string()))?
        .require_network(network)
        .map_err(|_| ChainError::InvalidAddress(to.to_string()))?;

    let input = utxos
        .iter()
        .map(|utxo| {
            let txid: Txid = utxo
                .txid
                .parse()
                .map_err(|_| ChainError::Parse(format!("bad utxo txid {}", utxo.txid)))?;
            Ok(TxIn {
                previous_output: OutPoint::new(txid, utxo.vout),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::new(),
            })
        })
        .collect::<Result<Vec<_>, ChainError>>()?;

    let mut output = vec![TxOut {
        value: Amount::from_sat(payout.send),
        script_pubkey: destination.script_pubkey(),
    }];
    if payout.change > 0 {
        output.push(TxOut {
            value: Amount::from_sat(payout.change),
            script_pubkey: source_script.clone(),
        });
    }

    let mut tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input,
        output,
    };

    let sighashes = {
        let cache = SighashCache::new(&tx);
        (0..tx.input.len())
            .map(|i| {
                cache
                    .legacy_signature_hash(i, &source_script, EcdsaSighashType::All.to_u32())
                    .map_err(|e| ChainError::Signing(e.to_string()))
            })
            .collect::<Result<Vec<_>, ChainError>>()?
    };

    for (input, sighash) in tx.input.iter_mut().zip(sighashes) {
        let message = Message::from_digest(sighash.to_byte_array());
        let signature = bitcoin::ecdsa::Signature {
            signature: SECP256K1.sign_ecdsa(&message, &secret),
            sighash_type: EcdsaSighashType::All,
        };
        let push = PushBytesBuf::try_from(signature.to_vec())
            .map_err(|e| ChainError::Signing(e.to_string()))?;

        input.script_sig = Builder::new()
            .push_slice(push)
            .push_key(&public_key)
            .into_script();
    }

    Ok(tx)
}

/// Sender for the UTXO family
pub struct UtxoSender {
    backend: Arc<dyn UtxoBackend>,
    network: Network,
}

impl UtxoSender {
    pub fn new(backend: Arc<dyn UtxoBackend>, network: Network) -> Self {
        Self { backend, network }
    }
}

#[async_trait]
impl FamilySender for UtxoSender {
    async fn submit(
        &self,
        request: &WithdrawalRequest,
        _hot: &HotWallet,
    ) -> Result<Submission, ChainError> {
        let utxos = self.backend.utxos(&request.from).await?;
        let total: u64 = utxos.iter().map(|u| u.value).sum();
        let fee_rate = self.backend.fee_rate().await?;

        let Some(payout) = plan_payout(total, utxos.len(), request.amount, fee_rate) else {
            return Ok(Submission::NoFeeOnNative);
        };

        let tx = build_signed_transaction(&request.from_key, self.network, &utxos, &request.to, &payout)?;
        let raw = bitcoin::consensus::encode::serialize_hex(&tx);
        let txid = self.backend.broadcast(&raw).await?;

        Ok(Submission::Sent {
            hash: txid.to_lowercase(),
        })
    }
}
