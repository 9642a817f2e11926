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

//! The swap protocol: a single transaction exchanging coin for fund, built in stages by two
//! parties and made safe by the order in which each party adds its partial signature.
//!
//! ```text
//!   proposer                     acceptor
//!   create ---- base64 ------->  check_accept, accept (signs own inputs)
//!   check_finish, finish <----- base64 ----
//!   (signs own inputs, broadcasts)
//! ```
//!
//! Every step takes the staged transaction by reference and returns a new one, a failed step
//! leaves the caller's copy untouched.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use std::collections::HashSet;
use std::fmt;
use std::io;
use std::str::FromStr;

use crate::blockchain::{Asset, Currency, Hash256, OutputId, UnlockHash, MINER_FEE};
use crate::consensus::{self, Decodable, Encodable};
use crate::transaction::{
    CoinInput, CoinOutput, CoveredFields, FundInput, FundOutput, Legs, Transaction,
    TransactionSignature,
};
use crate::wallet::{self, owned_addresses, select_outputs, Wallet};

/// The invariant a staged transaction broke when checked before accepting or finishing.
#[derive(Display, Debug, Clone, Copy, PartialEq, Eq)]
#[display(Debug)]
pub enum Violation {
    NoInputs,
    BothInputSets,
    NoOutputs,
    AmbiguousRecipient,
    UnsetRecipientMismatch,
    PrematureSignatures,
    MissingInputs,
    MissingOutputs,
    UnsetRecipient,
    MissingCounterpartySignature,
    UnknownSignatureParent,
    ForeignInput(Asset),
    OwnInput(Asset),
    ForeignChangeOutput(Asset),
    ForeignOutput(Asset),
}

impl Violation {
    /// Human readable description of the broken invariant.
    pub fn reason(&self) -> String {
        match self {
            Violation::NoInputs => "transaction has no inputs".into(),
            Violation::BothInputSets => "only one set of inputs should be provided".into(),
            Violation::NoOutputs => "transaction has no outputs".into(),
            Violation::AmbiguousRecipient => {
                "exactly one output address should be left unspecified".into()
            }
            Violation::UnsetRecipientMismatch => {
                "the unspecified output address must be the one of the offered asset".into()
            }
            Violation::PrematureSignatures => {
                "transaction should not have any signatures yet".into()
            }
            Violation::MissingInputs => "transaction is missing inputs".into(),
            Violation::MissingOutputs => "transaction is missing outputs".into(),
            Violation::UnsetRecipient => {
                "one or both swap output addresses have been left unspecified".into()
            }
            Violation::MissingCounterpartySignature => {
                "transaction is missing counterparty signatures".into()
            }
            Violation::UnknownSignatureParent => {
                "counterparty signature does not sign any input".into()
            }
            Violation::ForeignInput(asset) => {
                format!("counterparty added a {} input that does not belong to us", asset)
            }
            Violation::OwnInput(asset) => {
                format!("counterparty added a {} input that belongs to us", asset)
            }
            Violation::ForeignChangeOutput(asset) => {
                format!("counterparty added a {} output that does not belong to us", asset)
            }
            Violation::ForeignOutput(asset) => {
                format!("the {} output address does not belong to us", asset)
            }
        }
    }
}

/// A list of possible swap errors.
#[derive(Error, Debug)]
pub enum Error {
    /// The staged transaction breaks a protocol invariant and must be discarded.
    #[error("Protocol violation: {}", .0.reason())]
    ProtocolViolation(Violation),
    /// Amounts must be non-zero and leave room for the miner fee.
    #[error("Invalid swap amount")]
    InvalidAmount,
    /// The wallet service failed or lacks funds.
    #[error("Wallet error: {0}")]
    Wallet(#[from] wallet::Error),
    /// The staged transaction could not be decoded.
    #[error("Consensus error: {0}")]
    Consensus(#[from] consensus::Error),
}

impl From<Violation> for Error {
    fn from(v: Violation) -> Self {
        Error::ProtocolViolation(v)
    }
}

/// Progress of a swap from the point of view of one party.
#[derive(
    Display, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[display(Debug)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    WaitingForYouToAccept = 0,
    WaitingForCounterpartyToAccept = 1,
    WaitingForYouToFinish = 2,
    WaitingForCounterpartyToFinish = 3,
    Completed = 4,
}

impl Stage {
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// What a swap means for one party, computed by [`summarize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapSummary {
    pub receive_coin: bool,
    pub receive_fund: bool,
    pub pay_fee: bool,
    pub coin_amount: Currency,
    pub fund_amount: Currency,
    pub fee_amount: Currency,
    pub stage: Stage,
}

/// A swap transaction under construction. The first output of each asset is the primary output
/// paying the counterparty, any following output of the same asset is change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapTransaction {
    pub coin_inputs: Vec<CoinInput>,
    pub fund_inputs: Vec<FundInput>,
    pub coin_outputs: Vec<CoinOutput>,
    pub fund_outputs: Vec<FundOutput>,
    pub signatures: Vec<TransactionSignature>,
}

impl SwapTransaction {
    /// The transaction submitted to the chain. Deterministic, the miner fee is always the single
    /// protocol fee.
    pub fn as_full_transaction(&self) -> Transaction {
        Transaction {
            coin_inputs: self.coin_inputs.clone(),
            coin_outputs: self.coin_outputs.clone(),
            fund_inputs: self.fund_inputs.clone(),
            fund_outputs: self.fund_outputs.clone(),
            miner_fees: vec![MINER_FEE],
            signatures: self.signatures.clone(),
            ..Default::default()
        }
    }

    /// Encode for manual exchange between the two parties.
    pub fn to_base64(&self) -> String {
        consensus::to_base64(self)
    }

    pub fn from_base64(s: &str) -> Result<Self, Error> {
        Ok(consensus::from_base64(s)?)
    }

    fn signed_asset(&self, parent_id: &Hash256) -> Option<Asset> {
        let parent = OutputId::from(*parent_id);
        if self.coin_inputs.iter().any(|i| i.parent_id == parent) {
            Some(Asset::Coin)
        } else if self.fund_inputs.iter().any(|i| i.parent_id == parent) {
            Some(Asset::Fund)
        } else {
            None
        }
    }

    fn input_unlock_hash(&self, parent_id: &Hash256) -> Option<UnlockHash> {
        let parent = OutputId::from(*parent_id);
        self.coin_inputs
            .iter()
            .find(|i| i.parent_id == parent)
            .map(|i| i.unlock_conditions.unlock_hash())
            .or_else(|| {
                self.fund_inputs
                    .iter()
                    .find(|i| i.parent_id == parent)
                    .map(|i| i.unlock_conditions.unlock_hash())
            })
    }
}

impl Legs for SwapTransaction {
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

impl fmt::Display for SwapTransaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

impl FromStr for SwapTransaction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base64(s)
    }
}

impl Encodable for SwapTransaction {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let mut len = self.coin_inputs.consensus_encode(s)?;
        len += self.fund_inputs.consensus_encode(s)?;
        len += self.coin_outputs.consensus_encode(s)?;
        len += self.fund_outputs.consensus_encode(s)?;
        Ok(len + self.signatures.consensus_encode(s)?)
    }
}

impl Decodable for SwapTransaction {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(SwapTransaction {
            coin_inputs: Decodable::consensus_decode(d)?,
            fund_inputs: Decodable::consensus_decode(d)?,
            coin_outputs: Decodable::consensus_decode(d)?,
            fund_outputs: Decodable::consensus_decode(d)?,
            signatures: Decodable::consensus_decode(d)?,
        })
    }
}

impl_strict_encoding!(SwapTransaction);

/// Start a swap offering `offered` units of one asset for `requested` units of the other. The
/// primary output of the requested asset pays the proposer, the other one is left for the
/// counterparty to fill in. The party contributing coin pays the miner fee.
pub fn create<W>(
    wallet: &W,
    offered: Currency,
    requested: Currency,
    offering_fund: bool,
) -> Result<SwapTransaction, Error>
where
    W: Wallet + ?Sized,
{
    if offered.is_zero() || requested.is_zero() {
        return Err(Error::InvalidAmount);
    }
    let address = wallet.new_receiving_address()?;
    let mut swap = SwapTransaction::default();
    let funding = if offering_fund {
        swap.coin_outputs.push(CoinOutput {
            value: requested,
            unlock_hash: address,
        });
        swap.fund_outputs.push(FundOutput {
            value: offered,
            unlock_hash: UnlockHash::zero(),
        });
        select_outputs(wallet, Asset::Fund, offered)?
    } else {
        swap.coin_outputs.push(CoinOutput {
            value: offered,
            unlock_hash: UnlockHash::zero(),
        });
        swap.fund_outputs.push(FundOutput {
            value: requested,
            unlock_hash: address,
        });
        let needed = offered.checked_add(MINER_FEE).ok_or(Error::InvalidAmount)?;
        select_outputs(wallet, Asset::Coin, needed)?
    };
    funding.add_to(&mut swap);
    debug!(%offered, %requested, offering_fund, "created swap");
    Ok(swap)
}

/// Validate a freshly proposed swap before accepting it.
pub fn check_accept(swap: &SwapTransaction) -> Result<(), Error> {
    let (has_coin, has_fund) = (!swap.coin_inputs.is_empty(), !swap.fund_inputs.is_empty());
    if !has_coin && !has_fund {
        return Err(Violation::NoInputs.into());
    }
    if has_coin && has_fund {
        return Err(Violation::BothInputSets.into());
    }
    let (coin, fund) = match (swap.coin_outputs.first(), swap.fund_outputs.first()) {
        (Some(coin), Some(fund)) => (coin, fund),
        _ => return Err(Violation::NoOutputs.into()),
    };
    let (coin_unset, fund_unset) = (coin.unlock_hash.is_zero(), fund.unlock_hash.is_zero());
    if coin_unset == fund_unset {
        return Err(Violation::AmbiguousRecipient.into());
    }
    // the counterparty fills in the output of the asset the proposer offers
    if coin_unset != has_coin {
        return Err(Violation::UnsetRecipientMismatch.into());
    }
    if !swap.signatures.is_empty() {
        return Err(Violation::PrematureSignatures.into());
    }
    Ok(())
}

/// Accept a proposed swap: claim the unset output, source the opposite asset and sign the newly
/// added inputs.
pub fn accept<W>(swap: &SwapTransaction, wallet: &W) -> Result<SwapTransaction, Error>
where
    W: Wallet + ?Sized,
{
    check_accept(swap)?;
    let mut next = swap.clone();
    let address = wallet.new_receiving_address()?;
    let asset = if next.coin_inputs.is_empty() {
        // proposer offers fund, we pay coin plus the fee
        if let Some(fund) = next.fund_outputs.first_mut() {
            fund.unlock_hash = address;
        }
        let requested = next.coin_outputs.first().map(|o| o.value).unwrap_or_default();
        let needed = requested.checked_add(MINER_FEE).ok_or(Error::InvalidAmount)?;
        select_outputs(wallet, Asset::Coin, needed)?.add_to(&mut next);
        Asset::Coin
    } else {
        if let Some(coin) = next.coin_outputs.first_mut() {
            coin.unlock_hash = address;
        }
        let requested = next.fund_outputs.first().map(|o| o.value).unwrap_or_default();
        select_outputs(wallet, Asset::Fund, requested)?.add_to(&mut next);
        Asset::Fund
    };
    sign_inputs(&mut next, wallet, asset)?;
    debug!(%asset, "accepted swap");
    Ok(next)
}

/// Validate an accepted swap before adding the final signature. The checking party must own
/// every input of the asset it contributes, none of the counterparty's inputs, every change
/// output of its own asset, and the primary output of the asset it receives.
pub fn check_finish<W>(swap: &SwapTransaction, wallet: &W) -> Result<(), Error>
where
    W: Wallet + ?Sized,
{
    if swap.coin_inputs.is_empty() || swap.fund_inputs.is_empty() {
        return Err(Violation::MissingInputs.into());
    }
    let (coin, fund) = match (swap.coin_outputs.first(), swap.fund_outputs.first()) {
        (Some(coin), Some(fund)) => (coin, fund),
        _ => return Err(Violation::MissingOutputs.into()),
    };
    if coin.unlock_hash.is_zero() || fund.unlock_hash.is_zero() {
        return Err(Violation::UnsetRecipient.into());
    }
    let signed = counterparty_asset(swap)?;
    let ours = owned_addresses(wallet)?;

    // our asset is the one the counterparty did not sign
    let own = signed.other();
    let (own_inputs, their_inputs) = match own {
        Asset::Coin => (input_hashes_coin(swap), input_hashes_fund(swap)),
        Asset::Fund => (input_hashes_fund(swap), input_hashes_coin(swap)),
    };
    if own_inputs.iter().any(|h| !ours.contains(h)) {
        return Err(Violation::ForeignInput(own).into());
    }
    if their_inputs.iter().any(|h| ours.contains(h)) {
        return Err(Violation::OwnInput(signed).into());
    }
    let (change, received) = match own {
        Asset::Coin => (
            swap.coin_outputs[1..]
                .iter()
                .map(|o| o.unlock_hash)
                .collect::<Vec<_>>(),
            fund.unlock_hash,
        ),
        Asset::Fund => (
            swap.fund_outputs[1..]
                .iter()
                .map(|o| o.unlock_hash)
                .collect::<Vec<_>>(),
            coin.unlock_hash,
        ),
    };
    if change.iter().any(|h| !ours.contains(h)) {
        return Err(Violation::ForeignChangeOutput(own).into());
    }
    if !ours.contains(&received) {
        return Err(Violation::ForeignOutput(signed).into());
    }
    Ok(())
}

/// Sign the still unsigned side of an accepted swap and broadcast the complete transaction.
/// Returns the swap as broadcast.
pub fn finish<W>(swap: &SwapTransaction, wallet: &W) -> Result<SwapTransaction, Error>
where
    W: Wallet + ?Sized,
{
    check_finish(swap, wallet)?;
    let mut next = swap.clone();
    let asset = counterparty_asset(&next)?.other();
    sign_inputs(&mut next, wallet, asset)?;
    wallet.broadcast_transaction(&next.as_full_transaction())?;
    debug!(%asset, txid = %next.as_full_transaction().id().to_hex(), "finished swap");
    Ok(next)
}

/// Compute the swap summary from the point of view of the wallet owning `addresses`.
pub fn summarize(
    swap: &SwapTransaction,
    addresses: &HashSet<UnlockHash>,
) -> Result<SwapSummary, Error> {
    let (coin, fund) = match (swap.coin_outputs.first(), swap.fund_outputs.first()) {
        (Some(coin), Some(fund)) => (coin, fund),
        _ => return Err(Violation::NoOutputs.into()),
    };
    let receive_coin = addresses.contains(&coin.unlock_hash);
    Ok(SwapSummary {
        receive_coin,
        receive_fund: addresses.contains(&fund.unlock_hash),
        pay_fee: !receive_coin,
        coin_amount: coin.value,
        fund_amount: fund.value,
        fee_amount: MINER_FEE,
        stage: derive_stage(swap, addresses),
    })
}

/// Derive the stage of a swap from its content and the caller's addresses alone.
pub fn derive_stage(swap: &SwapTransaction, addresses: &HashSet<UnlockHash>) -> Stage {
    if swap.signatures.is_empty() {
        let receives = swap
            .coin_outputs
            .first()
            .map(|o| addresses.contains(&o.unlock_hash))
            .unwrap_or(false)
            || swap
                .fund_outputs
                .first()
                .map(|o| addresses.contains(&o.unlock_hash))
                .unwrap_or(false);
        return if receives {
            Stage::WaitingForCounterpartyToAccept
        } else {
            Stage::WaitingForYouToAccept
        };
    }

    let signed: HashSet<Asset> = swap
        .signatures
        .iter()
        .filter_map(|s| swap.signed_asset(&s.parent_id))
        .collect();
    if signed.contains(&Asset::Coin) && signed.contains(&Asset::Fund) {
        return Stage::Completed;
    }
    let ours = swap.signatures.iter().any(|s| {
        swap.input_unlock_hash(&s.parent_id)
            .map_or(false, |h| addresses.contains(&h))
    });
    if ours {
        Stage::WaitingForCounterpartyToFinish
    } else {
        Stage::WaitingForYouToFinish
    }
}

// The asset whose inputs carry the existing signature.
fn counterparty_asset(swap: &SwapTransaction) -> Result<Asset, Error> {
    let first = swap
        .signatures
        .first()
        .ok_or(Violation::MissingCounterpartySignature)?;
    Ok(swap
        .signed_asset(&first.parent_id)
        .ok_or(Violation::UnknownSignatureParent)?)
}

fn input_hashes_coin(swap: &SwapTransaction) -> Vec<UnlockHash> {
    swap.coin_inputs
        .iter()
        .map(|i| i.unlock_conditions.unlock_hash())
        .collect()
}

fn input_hashes_fund(swap: &SwapTransaction) -> Vec<UnlockHash> {
    swap.fund_inputs
        .iter()
        .map(|i| i.unlock_conditions.unlock_hash())
        .collect()
}

// Add one signature per input of `asset`, covering those inputs, every output and the miner
// fee, then let the wallet sign exactly these.
fn sign_inputs<W>(swap: &mut SwapTransaction, wallet: &W, asset: Asset) -> Result<(), Error>
where
    W: Wallet + ?Sized,
{
    let parents: Vec<OutputId> = match asset {
        Asset::Coin => swap.coin_inputs.iter().map(|i| i.parent_id).collect(),
        Asset::Fund => swap.fund_inputs.iter().map(|i| i.parent_id).collect(),
    };
    let own: Vec<u64> = (0..parents.len() as u64).collect();
    let covered_fields = CoveredFields {
        coin_inputs: if asset == Asset::Coin { own.clone() } else { vec![] },
        fund_inputs: if asset == Asset::Fund { own } else { vec![] },
        coin_outputs: (0..swap.coin_outputs.len() as u64).collect(),
        fund_outputs: (0..swap.fund_outputs.len() as u64).collect(),
        miner_fees: vec![0],
        ..Default::default()
    };
    for parent in &parents {
        swap.signatures.push(TransactionSignature::unsigned(
            *parent,
            covered_fields.clone(),
        ));
    }
    let to_sign: Vec<Hash256> = parents.into_iter().map(Hash256::from).collect();
    let signed = wallet.sign_transaction(&swap.as_full_transaction(), &to_sign)?;
    swap.signatures = signed.signatures;
    Ok(())
}
