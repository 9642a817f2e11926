// Copyright 2021-2022 Farcaster Devs
//
// This library is free software; you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public
// License as published by the Free Software Foundation; either
// version 3 of the License, or (at your option) any later version.
//
// This library is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this library; if not, write to the Free Software
// Foundation, Inc., 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301, USA

//! Transactions as seen on-chain: inputs and outputs of both assets, miner fees, arbitrary data,
//! and signatures that each declare which fields they cover. Partial coverage is what lets a
//! second party extend a transaction without invalidating signatures already attached.

use secp256k1::ecdsa::Signature;
use secp256k1::{Message, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use std::collections::{HashMap, HashSet};
use std::error;
use std::io;

use crate::blockchain::{
    hex_bytes, keccak256, Currency, Hash256, OutputId, TransactionId, UnlockConditions, UnlockHash,
};
use crate::consensus::{self, serialize, Decodable, Encodable};

/// Maximum encoded size of a transaction accepted by [`Transaction::standalone_valid`].
pub const MAX_TRANSACTION_SIZE: usize = 64 * 1024;

const COIN_OUTPUT_SPECIFIER: &[u8; 16] = b"coin output\0\0\0\0\0";
const FUND_OUTPUT_SPECIFIER: &[u8; 16] = b"fund output\0\0\0\0\0";

/// A list specifying the reasons a transaction is not valid on its own.
#[derive(Error, Debug)]
pub enum Error {
    /// The encoded transaction exceeds the size limit.
    #[error("Transaction is too large")]
    TooLarge,
    /// An output carries no value.
    #[error("Transaction creates a zero value output")]
    ZeroOutput,
    /// The same output is spent twice.
    #[error("Output {0:x} is spent twice")]
    DuplicateInput(OutputId),
    /// An input's unlock conditions are still timelocked.
    #[error("Input unlock conditions are timelocked")]
    Timelocked,
    /// A signature does not refer to any input of the transaction.
    #[error("Signature parent is not an input of the transaction")]
    UnknownSignatureParent,
    /// A signature's covered fields are malformed.
    #[error("Invalid covered fields: {0}")]
    InvalidCoveredFields(&'static str),
    /// Two signatures use the same key for the same input.
    #[error("Duplicate signature")]
    DuplicateSignature,
    /// A signature's timelock is not reached yet.
    #[error("Signature is timelocked")]
    PrematureSignature,
    /// The public key index does not exist in the unlock conditions.
    #[error("Invalid public key index")]
    InvalidPublicKeyIndex,
    /// The signature does not pass the validation.
    #[error("The signature does not pass the validation")]
    InvalidSignature,
    /// The index is not a signature of the transaction.
    #[error("Missing signature")]
    MissingSignature,
    /// An input has fewer valid signatures than required.
    #[error("Input {0:x} is missing signatures")]
    MissingSignatures(OutputId),
    /// Any transaction error not part of this list.
    #[error("Transaction error: {0}")]
    Other(Box<dyn error::Error + Send + Sync>),
}

impl Error {
    /// Creates a new transaction error of type other with an arbitrary payload.
    pub fn new<E>(error: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Self::Other(error.into())
    }

    /// Consumes the `Error`, returning its inner error (if any).
    ///
    /// If this [`enum@Error`] was constructed via [`new`] then this function will return [`Some`],
    /// otherwise it will return [`None`].
    ///
    /// [`new`]: Error::new
    ///
    pub fn into_inner(self) -> Option<Box<dyn error::Error + Send + Sync>> {
        match self {
            Self::Other(error) => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinInput {
    pub parent_id: OutputId,
    pub unlock_conditions: UnlockConditions,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundInput {
    pub parent_id: OutputId,
    pub unlock_conditions: UnlockConditions,
    /// Receives the coin claim accrued by the spent fund output.
    pub claim_unlock_hash: UnlockHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinOutput {
    pub value: Currency,
    pub unlock_hash: UnlockHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundOutput {
    pub value: Currency,
    pub unlock_hash: UnlockHash,
}

/// The declaration, attached to a signature, of which transaction elements the signature
/// authenticates. Every list holds strictly increasing indices into the matching transaction
/// field. A whole-transaction signature covers every field except signatures, and may only list
/// signatures explicitly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoveredFields {
    pub whole_transaction: bool,
    pub coin_inputs: Vec<u64>,
    pub coin_outputs: Vec<u64>,
    pub fund_inputs: Vec<u64>,
    pub fund_outputs: Vec<u64>,
    pub contracts: Vec<u64>,
    pub miner_fees: Vec<u64>,
    pub arbitrary_data: Vec<u64>,
    pub signatures: Vec<u64>,
}

impl CoveredFields {
    /// Coverage of every non-signature field.
    pub fn whole() -> Self {
        CoveredFields {
            whole_transaction: true,
            ..Default::default()
        }
    }

    /// Number of indices listed, all categories included.
    pub fn len(&self) -> usize {
        self.coin_inputs.len()
            + self.coin_outputs.len()
            + self.fund_inputs.len()
            + self.fund_outputs.len()
            + self.contracts.len()
            + self.miner_fees.len()
            + self.arbitrary_data.len()
            + self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionSignature {
    /// The id of the output spent by the input this signature unlocks.
    pub parent_id: Hash256,
    pub public_key_index: u64,
    pub timelock: u64,
    pub covered_fields: CoveredFields,
    /// Compact ECDSA signature, empty until a wallet signs.
    #[serde(with = "hex_bytes")]
    pub signature: Vec<u8>,
}

impl TransactionSignature {
    /// An unsigned signature entry for the input spending `parent_id`, to be filled by a wallet.
    pub fn unsigned(parent_id: OutputId, covered_fields: CoveredFields) -> Self {
        TransactionSignature {
            parent_id: parent_id.into(),
            public_key_index: 0,
            timelock: 0,
            covered_fields,
            signature: vec![],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub coin_inputs: Vec<CoinInput>,
    pub coin_outputs: Vec<CoinOutput>,
    pub fund_inputs: Vec<FundInput>,
    pub fund_outputs: Vec<FundOutput>,
    /// Storage contracts, carried opaquely as their canonical bytes.
    pub contracts: Vec<Vec<u8>>,
    pub miner_fees: Vec<Currency>,
    pub arbitrary_data: Vec<Vec<u8>>,
    pub signatures: Vec<TransactionSignature>,
}

impl Transaction {
    /// The transaction identifier, the hash of every field except signatures. Stable across
    /// signing, which makes it the universal trade identifier once the transaction is final.
    pub fn id(&self) -> TransactionId {
        let mut buf = vec![];
        // writing into a `Vec` never fails
        let _ = self.encode_unsigned(&mut buf);
        TransactionId(keccak256(&[&buf]).0)
    }

    /// Identifier of the `index`-th coin output.
    pub fn coin_output_id(&self, index: u64) -> OutputId {
        self.output_id(COIN_OUTPUT_SPECIFIER, index)
    }

    /// Identifier of the `index`-th fund output.
    pub fn fund_output_id(&self, index: u64) -> OutputId {
        self.output_id(FUND_OUTPUT_SPECIFIER, index)
    }

    fn output_id(&self, specifier: &[u8; 16], index: u64) -> OutputId {
        let id = self.id();
        OutputId(keccak256(&[specifier, id.as_bytes(), &index.to_le_bytes()]).0)
    }

    /// Return the unlock conditions of the input spending `parent_id`, if any.
    pub fn input_unlock_conditions(&self, parent_id: &Hash256) -> Option<&UnlockConditions> {
        let parent = OutputId::from(*parent_id);
        self.coin_inputs
            .iter()
            .find(|i| i.parent_id == parent)
            .map(|i| &i.unlock_conditions)
            .or_else(|| {
                self.fund_inputs
                    .iter()
                    .find(|i| i.parent_id == parent)
                    .map(|i| &i.unlock_conditions)
            })
    }

    /// Parent ids of every input, coin inputs first.
    pub fn input_parent_ids(&self) -> Vec<OutputId> {
        self.coin_inputs
            .iter()
            .map(|i| i.parent_id)
            .chain(self.fund_inputs.iter().map(|i| i.parent_id))
            .collect()
    }

    /// Compute the message signed by the `index`-th signature: the signature metadata followed by
    /// every element its covered fields declare.
    pub fn sig_hash(&self, index: usize) -> Result<Hash256, Error> {
        let sig = self.signatures.get(index).ok_or(Error::MissingSignature)?;
        let cf = &sig.covered_fields;
        self.validate_covered_fields(cf)?;

        let mut buf = serialize(&sig.parent_id);
        buf.extend(serialize(&sig.public_key_index));
        buf.extend(serialize(&sig.timelock));
        if cf.whole_transaction {
            let _ = self.encode_unsigned(&mut buf);
        } else {
            extend_covered(&mut buf, &self.coin_inputs, &cf.coin_inputs);
            extend_covered(&mut buf, &self.coin_outputs, &cf.coin_outputs);
            extend_covered(&mut buf, &self.fund_inputs, &cf.fund_inputs);
            extend_covered(&mut buf, &self.fund_outputs, &cf.fund_outputs);
            extend_covered(&mut buf, &self.contracts, &cf.contracts);
            extend_covered(&mut buf, &self.miner_fees, &cf.miner_fees);
            extend_covered(&mut buf, &self.arbitrary_data, &cf.arbitrary_data);
        }
        extend_covered(&mut buf, &self.signatures, &cf.signatures);
        Ok(keccak256(&[&buf]))
    }

    /// Fill the `index`-th signature with an ECDSA signature of its sig hash. Wallet
    /// implementations use this once they found the key matching the signature's public key
    /// index.
    pub fn sign(&mut self, index: usize, key: &SecretKey) -> Result<(), Error> {
        let hash = self.sig_hash(index)?;
        let msg = Message::from_slice(hash.as_bytes()).map_err(Error::new)?;
        let sig = Secp256k1::signing_only().sign_ecdsa(&msg, key);
        if let Some(s) = self.signatures.get_mut(index) {
            s.signature = sig.serialize_compact().to_vec();
        }
        Ok(())
    }

    /// Check the covered fields are well formed for this transaction: indices in range, strictly
    /// increasing, and whole-transaction coverage lists nothing but signatures.
    pub fn validate_covered_fields(&self, cf: &CoveredFields) -> Result<(), Error> {
        if cf.whole_transaction && cf.len() != cf.signatures.len() {
            return Err(Error::InvalidCoveredFields(
                "whole transaction coverage may only list signatures",
            ));
        }
        check_indices(&cf.coin_inputs, self.coin_inputs.len())?;
        check_indices(&cf.coin_outputs, self.coin_outputs.len())?;
        check_indices(&cf.fund_inputs, self.fund_inputs.len())?;
        check_indices(&cf.fund_outputs, self.fund_outputs.len())?;
        check_indices(&cf.contracts, self.contracts.len())?;
        check_indices(&cf.miner_fees, self.miner_fees.len())?;
        check_indices(&cf.arbitrary_data, self.arbitrary_data.len())?;
        check_indices(&cf.signatures, self.signatures.len())
    }

    /// Validate everything that can be validated without chain state: size, output values,
    /// double spends within the transaction, timelocks, signature coverage and cryptographic
    /// validity, and that every input is unlocked by enough signatures.
    pub fn standalone_valid(&self, height: u64) -> Result<(), Error> {
        if serialize(self).len() > MAX_TRANSACTION_SIZE {
            return Err(Error::TooLarge);
        }
        if self.coin_outputs.iter().any(|o| o.value.is_zero())
            || self.fund_outputs.iter().any(|o| o.value.is_zero())
        {
            return Err(Error::ZeroOutput);
        }

        let mut seen = HashSet::new();
        for parent in self.input_parent_ids() {
            if !seen.insert(parent) {
                return Err(Error::DuplicateInput(parent));
            }
        }
        let inputs = self
            .coin_inputs
            .iter()
            .map(|i| (i.parent_id, &i.unlock_conditions))
            .chain(
                self.fund_inputs
                    .iter()
                    .map(|i| (i.parent_id, &i.unlock_conditions)),
            );
        let mut remaining: HashMap<OutputId, u64> = HashMap::new();
        for (parent, uc) in inputs {
            if uc.timelock > height {
                return Err(Error::Timelocked);
            }
            remaining.insert(parent, uc.signatures_required);
        }

        let secp = Secp256k1::verification_only();
        let mut used_keys = HashSet::new();
        for (index, sig) in self.signatures.iter().enumerate() {
            let uc = self
                .input_unlock_conditions(&sig.parent_id)
                .ok_or(Error::UnknownSignatureParent)?;
            if !used_keys.insert((sig.parent_id, sig.public_key_index)) {
                return Err(Error::DuplicateSignature);
            }
            if sig.timelock > height {
                return Err(Error::PrematureSignature);
            }
            let key = usize::try_from(sig.public_key_index)
                .ok()
                .and_then(|i| uc.public_keys.get(i))
                .ok_or(Error::InvalidPublicKeyIndex)?;
            let hash = self.sig_hash(index)?;
            let msg = Message::from_slice(hash.as_bytes()).map_err(Error::new)?;
            let signature =
                Signature::from_compact(&sig.signature).map_err(|_| Error::InvalidSignature)?;
            secp.verify_ecdsa(&msg, &signature, key)
                .map_err(|_| Error::InvalidSignature)?;
            if let Some(count) = remaining.get_mut(&OutputId::from(sig.parent_id)) {
                *count = count.saturating_sub(1);
            }
        }

        match remaining.into_iter().find(|(_, count)| *count > 0) {
            Some((parent, _)) => Err(Error::MissingSignatures(parent)),
            None => Ok(()),
        }
    }

    fn encode_unsigned<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let mut len = self.coin_inputs.consensus_encode(s)?;
        len += self.coin_outputs.consensus_encode(s)?;
        len += self.fund_inputs.consensus_encode(s)?;
        len += self.fund_outputs.consensus_encode(s)?;
        len += self.contracts.consensus_encode(s)?;
        len += self.miner_fees.consensus_encode(s)?;
        Ok(len + self.arbitrary_data.consensus_encode(s)?)
    }
}

/// Mutable access to the input and output legs, shared by full transactions and the staged swap
/// transaction so wallet funding can be appended to either.
pub trait Legs {
    fn coin_inputs_mut(&mut self) -> &mut Vec<CoinInput>;
    fn fund_inputs_mut(&mut self) -> &mut Vec<FundInput>;
    fn coin_outputs_mut(&mut self) -> &mut Vec<CoinOutput>;
    fn fund_outputs_mut(&mut self) -> &mut Vec<FundOutput>;
}

impl Legs for Transaction {
    fn coin_inputs_mut(&mut self) -> &mut Vec<CoinInput> {
        &mut self.coin_inputs
    }

    fn fund_inputs_mut(&mut self) -> &mut Vec<FundInput> {
        &mut self.fund_inputs
    }

    fn coin_outputs_mut(&mut self) -> &mut Vec<CoinOutput> {
        &mut self.coin_outputs
    }

    fn fund_outputs_mut(&mut self) -> &mut Vec<FundOutput> {
        &mut self.fund_outputs
    }
}

fn check_indices(indices: &[u64], len: usize) -> Result<(), Error> {
    let mut previous: Option<u64> = None;
    for &i in indices {
        if previous.map_or(false, |p| i <= p) {
            return Err(Error::InvalidCoveredFields("indices must be strictly increasing"));
        }
        if i >= len as u64 {
            return Err(Error::InvalidCoveredFields("index out of range"));
        }
        previous = Some(i);
    }
    Ok(())
}

// Indices are validated beforehand, out of range entries are skipped.
fn extend_covered<T: Encodable>(buf: &mut Vec<u8>, elements: &[T], indices: &[u64]) {
    for &i in indices {
        if let Some(element) = usize::try_from(i).ok().and_then(|i| elements.get(i)) {
            buf.extend(serialize(element));
        }
    }
}

impl Encodable for CoinInput {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let len = self.parent_id.consensus_encode(s)?;
        Ok(len + self.unlock_conditions.consensus_encode(s)?)
    }
}

impl Decodable for CoinInput {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(CoinInput {
            parent_id: Decodable::consensus_decode(d)?,
            unlock_conditions: Decodable::consensus_decode(d)?,
        })
    }
}

impl Encodable for FundInput {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let mut len = self.parent_id.consensus_encode(s)?;
        len += self.unlock_conditions.consensus_encode(s)?;
        Ok(len + self.claim_unlock_hash.consensus_encode(s)?)
    }
}

impl Decodable for FundInput {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(FundInput {
            parent_id: Decodable::consensus_decode(d)?,
            unlock_conditions: Decodable::consensus_decode(d)?,
            claim_unlock_hash: Decodable::consensus_decode(d)?,
        })
    }
}

impl Encodable for CoinOutput {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let len = self.value.consensus_encode(s)?;
        Ok(len + self.unlock_hash.consensus_encode(s)?)
    }
}

impl Decodable for CoinOutput {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(CoinOutput {
            value: Decodable::consensus_decode(d)?,
            unlock_hash: Decodable::consensus_decode(d)?,
        })
    }
}

impl Encodable for FundOutput {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let len = self.value.consensus_encode(s)?;
        Ok(len + self.unlock_hash.consensus_encode(s)?)
    }
}

impl Decodable for FundOutput {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(FundOutput {
            value: Decodable::consensus_decode(d)?,
            unlock_hash: Decodable::consensus_decode(d)?,
        })
    }
}

impl Encodable for CoveredFields {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let mut len = self.whole_transaction.consensus_encode(s)?;
        len += self.coin_inputs.consensus_encode(s)?;
        len += self.coin_outputs.consensus_encode(s)?;
        len += self.fund_inputs.consensus_encode(s)?;
        len += self.fund_outputs.consensus_encode(s)?;
        len += self.contracts.consensus_encode(s)?;
        len += self.miner_fees.consensus_encode(s)?;
        len += self.arbitrary_data.consensus_encode(s)?;
        Ok(len + self.signatures.consensus_encode(s)?)
    }
}

impl Decodable for CoveredFields {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(CoveredFields {
            whole_transaction: Decodable::consensus_decode(d)?,
            coin_inputs: Decodable::consensus_decode(d)?,
            coin_outputs: Decodable::consensus_decode(d)?,
            fund_inputs: Decodable::consensus_decode(d)?,
            fund_outputs: Decodable::consensus_decode(d)?,
            contracts: Decodable::consensus_decode(d)?,
            miner_fees: Decodable::consensus_decode(d)?,
            arbitrary_data: Decodable::consensus_decode(d)?,
            signatures: Decodable::consensus_decode(d)?,
        })
    }
}

impl Encodable for TransactionSignature {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let mut len = self.parent_id.consensus_encode(s)?;
        len += self.public_key_index.consensus_encode(s)?;
        len += self.timelock.consensus_encode(s)?;
        len += self.covered_fields.consensus_encode(s)?;
        Ok(len + self.signature.consensus_encode(s)?)
    }
}

impl Decodable for TransactionSignature {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(TransactionSignature {
            parent_id: Decodable::consensus_decode(d)?,
            public_key_index: Decodable::consensus_decode(d)?,
            timelock: Decodable::consensus_decode(d)?,
            covered_fields: Decodable::consensus_decode(d)?,
            signature: Decodable::consensus_decode(d)?,
        })
    }
}

impl Encodable for Transaction {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let len = self.encode_unsigned(s)?;
        Ok(len + self.signatures.consensus_encode(s)?)
    }
}

impl Decodable for Transaction {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(Transaction {
            coin_inputs: Decodable::consensus_decode(d)?,
            coin_outputs: Decodable::consensus_decode(d)?,
            fund_inputs: Decodable::consensus_decode(d)?,
            fund_outputs: Decodable::consensus_decode(d)?,
            contracts: Decodable::consensus_decode(d)?,
            miner_fees: Decodable::consensus_decode(d)?,
            arbitrary_data: Decodable::consensus_decode(d)?,
            signatures: Decodable::consensus_decode(d)?,
        })
    }
}

impl_strict_encoding!(Transaction);
