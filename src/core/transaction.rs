// Transactions follow the UTXO model: each input consumes one output of an
// earlier transaction, each output locks a value to a public-key hash.
// Signatures use a trimmed copy of the transaction in place of a script.

use crate::error::{BlockchainError, Result};
use crate::storage::UTXOSet;
use crate::utils::{
    deserialize, ecdsa_p256_sha256_sign_digest, ecdsa_p256_sha256_sign_verify, serialize,
    sha256_digest,
};
use crate::wallet::{address_to_pub_key_hash, hash_pub_key, Wallet};
use data_encoding::HEXLOWER;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Reward paid by every coinbase transaction.
pub const SUBSIDY: u64 = 10;

/// Output index carried by the single coinbase input.
const COINBASE_VOUT: i64 = -1;

/// Previous transactions keyed by id, as needed by [`Transaction::sign`] and
/// [`Transaction::verify`].
pub type PrevTransactions = HashMap<Vec<u8>, Transaction>;

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXInput {
    txid: Vec<u8>,
    vout: i64,
    signature: Vec<u8>,
    pub_key: Vec<u8>,
}

impl TXInput {
    pub fn get_txid(&self) -> &[u8] {
        self.txid.as_slice()
    }

    pub fn get_vout(&self) -> i64 {
        self.vout
    }

    /// The referenced output index, `None` for the coinbase marker.
    pub fn output_index(&self) -> Option<usize> {
        usize::try_from(self.vout).ok()
    }

    pub fn get_signature(&self) -> &[u8] {
        self.signature.as_slice()
    }

    pub fn get_pub_key(&self) -> &[u8] {
        self.pub_key.as_slice()
    }

    fn uses_key(&self, pub_key_hash: &[u8]) -> bool {
        hash_pub_key(self.pub_key.as_slice()).eq(pub_key_hash)
    }
}

#[derive(
    Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct TXOutput {
    value: u64,
    pub_key_hash: Vec<u8>,
}

impl TXOutput {
    /// Locks `value` to the public-key hash carried by `address`.
    pub fn new(value: u64, address: &str) -> Result<TXOutput> {
        Ok(TXOutput {
            value,
            pub_key_hash: address_to_pub_key_hash(address)?,
        })
    }

    pub fn get_value(&self) -> u64 {
        self.value
    }

    pub fn get_pub_key_hash(&self) -> &[u8] {
        self.pub_key_hash.as_slice()
    }

    pub fn is_locked_with_key(&self, pub_key_hash: &[u8]) -> bool {
        self.pub_key_hash.eq(pub_key_hash)
    }
}

#[derive(
    Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    id: Vec<u8>,
    vin: Vec<TXInput>,
    vout: Vec<TXOutput>,
}

impl Transaction {
    /// Builds the block reward. An empty `memo` is replaced by a unique one so
    /// repeated rewards to the same address get distinct ids.
    pub fn new_coinbase_tx(to: &str, memo: &str) -> Result<Transaction> {
        let memo = if memo.is_empty() {
            format!("Reward to '{to}' {}", Uuid::new_v4())
        } else {
            memo.to_string()
        };

        let tx_input = TXInput {
            txid: vec![],
            vout: COINBASE_VOUT,
            signature: vec![],
            pub_key: memo.into_bytes(),
        };
        let tx_output = TXOutput::new(SUBSIDY, to)?;

        let mut tx = Transaction {
            id: vec![],
            vin: vec![tx_input],
            vout: vec![tx_output],
        };
        tx.id = tx.hash()?;
        Ok(tx)
    }

    /// Spends outputs owned by `wallet` to pay `amount` to `to`, returning
    /// change to the wallet. The result is signed.
    pub fn new_utxo_transaction(
        wallet: &Wallet,
        to: &str,
        amount: u64,
        utxo_set: &UTXOSet,
    ) -> Result<Transaction> {
        if amount == 0 {
            return Err(BlockchainError::Transaction(
                "Amount must be positive".to_string(),
            ));
        }

        let from = wallet.get_address();
        if from == to {
            return Err(BlockchainError::Transaction(
                "Cannot send coins to yourself".to_string(),
            ));
        }
        // Fail on a bad destination before touching the index.
        let destination = TXOutput::new(amount, to)?;

        let public_key_hash = hash_pub_key(wallet.get_public_key());
        let (accumulated, spendable) =
            utxo_set.find_spendable_outputs(public_key_hash.as_slice(), amount)?;
        if accumulated < amount {
            return Err(BlockchainError::InsufficientFunds {
                required: amount,
                available: accumulated,
            });
        }

        let inputs = spendable
            .iter()
            .map(|(txid, idx)| TXInput {
                txid: txid.clone(),
                vout: *idx as i64,
                signature: vec![],
                pub_key: wallet.get_public_key().to_vec(),
            })
            .collect();

        let mut outputs = vec![destination];
        if accumulated > amount {
            outputs.push(TXOutput::new(accumulated - amount, &from)?);
        }

        let mut tx = Transaction {
            id: vec![],
            vin: inputs,
            vout: outputs,
        };
        tx.id = tx.hash()?;
        utxo_set
            .get_blockchain()
            .sign_transaction(&mut tx, wallet.get_pkcs8())?;
        Ok(tx)
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].txid.is_empty() && self.vin[0].vout == COINBASE_VOUT
    }

    /// Copy with every signature and public key cleared.
    fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .vin
            .iter()
            .map(|input| TXInput {
                txid: input.txid.clone(),
                vout: input.vout,
                signature: vec![],
                pub_key: vec![],
            })
            .collect();
        Transaction {
            id: self.id.clone(),
            vin: inputs,
            vout: self.vout.clone(),
        }
    }

    /// Bytes covered by the signature of input `idx`: the trimmed copy with
    /// that input's key slot holding the referenced output's pub-key hash.
    fn signing_payload(
        tx_copy: &mut Transaction,
        idx: usize,
        referenced: &TXOutput,
    ) -> Result<Vec<u8>> {
        tx_copy.vin[idx].pub_key = referenced.pub_key_hash.clone();
        let payload = Transaction::serialize(tx_copy);
        tx_copy.vin[idx].pub_key = vec![];
        payload
    }

    /// Looks up the output an input spends. A missing previous transaction is
    /// a broken invariant and surfaces as an error; an out-of-range index is
    /// reported as `None`.
    fn referenced_output<'a>(
        input: &TXInput,
        prev_txs: &'a PrevTransactions,
    ) -> Result<Option<&'a TXOutput>> {
        let prev_tx = prev_txs.get(input.get_txid()).ok_or_else(|| {
            BlockchainError::MissingPreviousTransaction(HEXLOWER.encode(input.get_txid()))
        })?;
        Ok(input
            .output_index()
            .and_then(|idx| prev_tx.vout.get(idx)))
    }

    pub fn sign(&mut self, pkcs8: &[u8], prev_txs: &PrevTransactions) -> Result<()> {
        if self.is_coinbase() {
            return Ok(());
        }

        let mut tx_copy = self.trimmed_copy();
        for idx in 0..self.vin.len() {
            let referenced = Self::referenced_output(&self.vin[idx], prev_txs)?
                .ok_or_else(|| {
                    BlockchainError::Transaction(format!(
                        "Input {idx} references a missing output"
                    ))
                })?;
            let payload = Self::signing_payload(&mut tx_copy, idx, referenced)?;
            self.vin[idx].signature = ecdsa_p256_sha256_sign_digest(pkcs8, &payload)?;
        }
        Ok(())
    }

    /// `Ok(false)` on the first input whose signature or ownership check
    /// fails; `Err` only when a previous transaction is unknown.
    pub fn verify(&self, prev_txs: &PrevTransactions) -> Result<bool> {
        if self.is_coinbase() {
            return Ok(true);
        }

        let mut tx_copy = self.trimmed_copy();
        for (idx, input) in self.vin.iter().enumerate() {
            let referenced = match Self::referenced_output(input, prev_txs)? {
                Some(output) => output,
                None => {
                    log::warn!("Input {idx} references a missing output");
                    return Ok(false);
                }
            };
            if !input.uses_key(referenced.get_pub_key_hash()) {
                log::warn!("Input {idx} is not owned by the key that signed it");
                return Ok(false);
            }

            let payload = Self::signing_payload(&mut tx_copy, idx, referenced)?;
            if !ecdsa_p256_sha256_sign_verify(
                input.get_pub_key(),
                input.get_signature(),
                &payload,
            ) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// SHA-256 of the serialized transaction with its id cleared.
    fn hash(&self) -> Result<Vec<u8>> {
        let tx_copy = Transaction {
            id: vec![],
            vin: self.vin.clone(),
            vout: self.vout.clone(),
        };
        Ok(sha256_digest(&tx_copy.serialize()?))
    }

    pub fn get_id(&self) -> &[u8] {
        self.id.as_slice()
    }

    pub fn get_vin(&self) -> &[TXInput] {
        self.vin.as_slice()
    }

    pub fn get_vout(&self) -> &[TXOutput] {
        self.vout.as_slice()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Transaction> {
        deserialize(bytes)
    }
}
