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

//! Bids are partially signed swap fragments: one input of the offered asset and one output of
//! the requested asset, signed with a narrow coverage so that anyone can complete them. They
//! travel as base64 text or on-chain inside a transaction's arbitrary data.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use std::fmt;
use std::io;
use std::str::FromStr;

use crate::blockchain::{Asset, Currency, OutputId};
use crate::consensus::{self, serialize, Decodable, Encodable};
use crate::transaction::{self, CoveredFields, Transaction};

/// Prefix of the arbitrary data entry announcing a bid on-chain.
pub const BID_MAGIC_BYTES: &[u8; 6] = b"BRTBID";

/// A list of possible bid errors.
#[derive(Error, Debug)]
pub enum Error {
    /// No signature has the narrow coverage expected from a bid.
    #[error("No signature covers exactly one input and one output of complementary assets")]
    NoBidSignature,
    /// The signed fragment does not match the amounts and direction the bid announces.
    #[error("Bid does not match its signed fragment")]
    InconsistentBid,
    /// The fragment is not valid on its own.
    #[error("Invalid bid transaction: {0}")]
    Transaction(#[from] transaction::Error),
    /// The bid could not be decoded.
    #[error("Consensus error: {0}")]
    Consensus(#[from] consensus::Error),
}

/// An unfilled trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bid {
    /// The signed one-input one-output fragment.
    pub transaction: Transaction,
    /// Parent id of the fragment's input, the output reserved by the bid.
    pub id: OutputId,
    /// Height of the block announcing the bid.
    pub height: u64,
    pub fund: Currency,
    pub coin: Currency,
    pub offering_fund: bool,
    /// Set while the reserved output is spent or altered outside a fill.
    #[serde(default)]
    pub invalid: bool,
}

impl Bid {
    /// The asset given away by the bidder.
    pub fn offered_asset(&self) -> Asset {
        if self.offering_fund {
            Asset::Fund
        } else {
            Asset::Coin
        }
    }

    /// Amount of the offered asset, the value of the reserved output.
    pub fn offered(&self) -> Currency {
        if self.offering_fund {
            self.fund
        } else {
            self.coin
        }
    }

    /// Amount of the requested asset.
    pub fn requested(&self) -> Currency {
        if self.offering_fund {
            self.coin
        } else {
            self.fund
        }
    }

    pub fn to_base64(&self) -> String {
        consensus::to_base64(self)
    }

    pub fn from_base64(s: &str) -> Result<Self, Error> {
        Ok(consensus::from_base64(s)?)
    }

    // The fragment must spend the offered asset and pay the requested amount.
    pub(crate) fn check_consistency(&self) -> Result<(), Error> {
        let txn = &self.transaction;
        let consistent = match self.offered_asset() {
            Asset::Fund => {
                txn.fund_inputs.len() == 1
                    && txn.coin_outputs.len() == 1
                    && txn.coin_outputs[0].value == self.requested()
            }
            Asset::Coin => {
                txn.coin_inputs.len() == 1
                    && txn.fund_outputs.len() == 1
                    && txn.fund_outputs[0].value == self.requested()
            }
        };
        if consistent {
            Ok(())
        } else {
            Err(Error::InconsistentBid)
        }
    }
}

impl fmt::Display for Bid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_base64())
    }
}

impl FromStr for Bid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base64(s)
    }
}

impl Encodable for Bid {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        let mut len = self.transaction.consensus_encode(s)?;
        len += self.id.consensus_encode(s)?;
        len += self.height.consensus_encode(s)?;
        len += self.fund.consensus_encode(s)?;
        len += self.coin.consensus_encode(s)?;
        len += self.offering_fund.consensus_encode(s)?;
        Ok(len + self.invalid.consensus_encode(s)?)
    }
}

impl Decodable for Bid {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        Ok(Bid {
            transaction: Decodable::consensus_decode(d)?,
            id: Decodable::consensus_decode(d)?,
            height: Decodable::consensus_decode(d)?,
            fund: Decodable::consensus_decode(d)?,
            coin: Decodable::consensus_decode(d)?,
            offering_fund: Decodable::consensus_decode(d)?,
            invalid: Decodable::consensus_decode(d)?,
        })
    }
}

impl_strict_encoding!(Bid);

/// A bid and its fill. A zero fill height means the bid is still open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub bid: Bid,
    /// The filling transaction, empty while open.
    pub transaction: Transaction,
    pub height: u64,
}

impl Trade {
    pub fn open(bid: Bid) -> Self {
        Trade {
            bid,
            transaction: Transaction::default(),
            height: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.height == 0
    }
}

/// Wrap a bid into the transaction announcing it on-chain.
pub fn announcement_transaction(bid: &Bid) -> Transaction {
    let mut data = BID_MAGIC_BYTES.to_vec();
    data.extend(serialize(bid));
    Transaction {
        arbitrary_data: vec![data],
        ..Default::default()
    }
}

fn is_bid_coverage(txn: &Transaction, cf: &CoveredFields) -> bool {
    if cf.whole_transaction
        || !cf.contracts.is_empty()
        || !cf.miner_fees.is_empty()
        || !cf.arbitrary_data.is_empty()
        || !cf.signatures.is_empty()
    {
        return false;
    }
    let in_range = |indices: &[u64], len: usize| indices.len() == 1 && indices[0] < len as u64;
    let coin_in = in_range(&cf.coin_inputs, txn.coin_inputs.len())
        && in_range(&cf.fund_outputs, txn.fund_outputs.len())
        && cf.fund_inputs.is_empty()
        && cf.coin_outputs.is_empty();
    let fund_in = in_range(&cf.fund_inputs, txn.fund_inputs.len())
        && in_range(&cf.coin_outputs, txn.coin_outputs.len())
        && cf.coin_inputs.is_empty()
        && cf.fund_outputs.is_empty();
    coin_in || fund_in
}

/// Extract the bid fragment of a transaction: the input and output covered by the first
/// signature with a bid coverage, along with that signature. Anything else the transaction
/// carries is dropped. The fragment must be valid on its own at `height`.
pub fn extract_bid_transaction(height: u64, txn: &Transaction) -> Result<Transaction, Error> {
    let sig = txn
        .signatures
        .iter()
        .find(|s| is_bid_coverage(txn, &s.covered_fields))
        .ok_or(Error::NoBidSignature)?;
    let cf = &sig.covered_fields;
    let mut keep = Transaction {
        signatures: vec![sig.clone()],
        ..Default::default()
    };
    if let (Some(&i), Some(&o)) = (cf.coin_inputs.first(), cf.fund_outputs.first()) {
        keep.coin_inputs = vec![txn.coin_inputs[i as usize].clone()];
        keep.fund_outputs = vec![txn.fund_outputs[o as usize].clone()];
    } else if let (Some(&i), Some(&o)) = (cf.fund_inputs.first(), cf.coin_outputs.first()) {
        keep.fund_inputs = vec![txn.fund_inputs[i as usize].clone()];
        keep.coin_outputs = vec![txn.coin_outputs[o as usize].clone()];
    }
    keep.standalone_valid(height)?;
    Ok(keep)
}

/// Whether a transaction looks like a bid fill: inputs and outputs of both assets and at least
/// one signature without whole-transaction coverage. Shape based, it can misclassify unrelated
/// transactions sharing the same shape.
pub fn is_probable_fill(txn: &Transaction) -> bool {
    !txn.coin_inputs.is_empty()
        && !txn.fund_inputs.is_empty()
        && !txn.coin_outputs.is_empty()
        && !txn.fund_outputs.is_empty()
        && txn
            .signatures
            .iter()
            .any(|s| !s.covered_fields.whole_transaction)
}

/// Decode and validate the bid carried by one arbitrary data entry, `None` if the entry is not a
/// bid announcement.
pub fn decode_announcement(height: u64, data: &[u8]) -> Option<Result<Bid, Error>> {
    let payload = data.strip_prefix(&BID_MAGIC_BYTES[..])?;
    Some(decode_bid(height, payload))
}

fn decode_bid(height: u64, payload: &[u8]) -> Result<Bid, Error> {
    let mut bid: Bid = consensus::deserialize(payload)?;
    bid.transaction = extract_bid_transaction(height, &bid.transaction)?;
    bid.check_consistency()?;
    bid.id = bid.transaction.input_parent_ids()[0];
    bid.height = height;
    bid.invalid = false;
    Ok(bid)
}

/// Scan the transactions of a block for announced bids and probable fills.
pub fn find_bids(height: u64, txns: &[Transaction]) -> (Vec<Bid>, Vec<Transaction>) {
    let mut bids = vec![];
    let mut fills = vec![];
    for txn in txns {
        if is_probable_fill(txn) {
            fills.push(txn.clone());
        }
        for data in &txn.arbitrary_data {
            match decode_announcement(height, data) {
                Some(Ok(bid)) => bids.push(bid),
                Some(Err(err)) => warn!(height, %err, "skipping invalid bid announcement"),
                None => {}
            }
        }
    }
    (bids, fills)
}
