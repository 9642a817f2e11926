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

//! Bid workflows on top of the wallet boundary: create and place a bid, look one up, and fill
//! it.
//!
//! A bid reserves an output holding exactly the offered amount with a *setup* transaction, then
//! signs a fragment spending that output with a coverage limited to the spent input and the
//! requested output. A filler appends its own inputs, outputs and the miner fee, signs them with
//! whole-transaction coverage, and broadcasts.

use thiserror::Error;
use tracing::info;

use std::error;

use crate::bid::{self, announcement_transaction, Bid};
use crate::blockchain::{Asset, Currency, Hash256, OutputId, MINER_FEE};
use crate::consensus::{self, serialize};
use crate::tracker::MarketTracker;
use crate::transaction::{
    CoinInput, CoinOutput, CoveredFields, FundInput, FundOutput, Transaction,
    TransactionSignature,
};
use crate::wallet::{self, select_outputs, Wallet};

/// A list of possible market errors.
#[derive(Error, Debug)]
pub enum Error {
    /// No fillable bid id starts with the given prefix.
    #[error("Bid not found: {0}")]
    BidNotFound(String),
    /// Several fillable bid ids start with the given prefix.
    #[error("Bid id {0} is not unique, add more digits")]
    AmbiguousBidId(String),
    /// Amounts must be non-zero.
    #[error("Invalid bid amount")]
    InvalidAmount,
    /// The bid does not carry a valid fragment.
    #[error("Invalid bid: {0}")]
    Bid(#[from] bid::Error),
    #[error("Wallet error: {0}")]
    Wallet(#[from] wallet::Error),
    #[error("Consensus error: {0}")]
    Consensus(#[from] consensus::Error),
    /// Any blob store error.
    #[error("Blob store error: {0}")]
    Other(Box<dyn error::Error + Send + Sync>),
}

impl Error {
    /// Creates a new market error of type other with an arbitrary payload.
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

/// A content addressed store for encoded bids.
pub trait BlobStore {
    /// Store the data and return a link to it.
    fn upload(&self, data: &[u8]) -> Result<String, Error>;

    fn download(&self, link: &str) -> Result<Vec<u8>, Error>;
}

/// How a freshly created bid is handed to potential fillers.
pub enum BidTransport<'a> {
    /// Announce it on-chain for the market trackers.
    OnChain,
    /// Return it as base64 text.
    Base64,
    /// Upload it to a blob store.
    Blob(&'a dyn BlobStore),
}

/// Where a bid to fill comes from.
pub enum BidSource<'a> {
    Base64(&'a str),
    Blob(&'a dyn BlobStore, &'a str),
    /// A unique id prefix among the tracker's fillable bids.
    Tracker(&'a MarketTracker, &'a str),
}

/// The outcome of placing a bid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Bid id, the bid shows in the trackers once the announcement is mined.
    OnChain(OutputId),
    Text(String),
    Link(String),
}

/// Create a bid offering `offered` units of one asset for `requested` units of the other.
/// Returns the setup transaction reserving the offered output, still to be broadcast, and the
/// bid spending it. Both are signed.
pub fn create_bid<W>(
    wallet: &W,
    offered: Currency,
    requested: Currency,
    offering_fund: bool,
) -> Result<(Transaction, Bid), Error>
where
    W: Wallet + ?Sized,
{
    if offered.is_zero() || requested.is_zero() {
        return Err(Error::InvalidAmount);
    }
    let asset = if offering_fund {
        Asset::Fund
    } else {
        Asset::Coin
    };

    let funding = select_outputs(wallet, asset, offered)?;
    let setup_parents: Vec<Hash256> = funding
        .inputs
        .parent_ids()
        .into_iter()
        .map(Hash256::from)
        .collect();
    let reserved = wallet.new_receiving_address()?;
    let mut setup = Transaction::default();
    match asset {
        Asset::Coin => setup.coin_outputs.push(CoinOutput {
            value: offered,
            unlock_hash: reserved,
        }),
        Asset::Fund => setup.fund_outputs.push(FundOutput {
            value: offered,
            unlock_hash: reserved,
        }),
    }
    funding.add_to(&mut setup);
    setup.signatures = setup_parents
        .iter()
        .map(|p| TransactionSignature::unsigned((*p).into(), CoveredFields::whole()))
        .collect();

    let unlock_conditions = wallet.unlock_conditions(&reserved)?;
    let receive = wallet.new_receiving_address()?;
    let mut fragment = Transaction::default();
    let (id, covered_fields) = match asset {
        Asset::Coin => {
            let id = setup.coin_output_id(0);
            fragment.coin_inputs.push(CoinInput {
                parent_id: id,
                unlock_conditions,
            });
            fragment.fund_outputs.push(FundOutput {
                value: requested,
                unlock_hash: receive,
            });
            let cf = CoveredFields {
                coin_inputs: vec![0],
                fund_outputs: vec![0],
                ..Default::default()
            };
            (id, cf)
        }
        Asset::Fund => {
            let id = setup.fund_output_id(0);
            fragment.fund_inputs.push(FundInput {
                parent_id: id,
                unlock_conditions,
                claim_unlock_hash: receive,
            });
            fragment.coin_outputs.push(CoinOutput {
                value: requested,
                unlock_hash: receive,
            });
            let cf = CoveredFields {
                fund_inputs: vec![0],
                coin_outputs: vec![0],
                ..Default::default()
            };
            (id, cf)
        }
    };
    fragment
        .signatures
        .push(TransactionSignature::unsigned(id, covered_fields));

    let setup = wallet.sign_transaction(&setup, &setup_parents)?;
    let fragment = wallet.sign_transaction(&fragment, &[id.into()])?;
    let (fund, coin) = if offering_fund {
        (offered, requested)
    } else {
        (requested, offered)
    };
    Ok((
        setup,
        Bid {
            transaction: fragment,
            id,
            height: 0,
            fund,
            coin,
            offering_fund,
            invalid: false,
        },
    ))
}

/// Create a bid, broadcast its setup transaction and publish it through `transport`.
pub fn place_bid<W>(
    wallet: &W,
    offered: Currency,
    requested: Currency,
    offering_fund: bool,
    transport: BidTransport,
) -> Result<Placement, Error>
where
    W: Wallet + ?Sized,
{
    let (setup, bid) = create_bid(wallet, offered, requested, offering_fund)?;
    wallet.broadcast_transaction(&setup)?;
    info!(id = %bid.id.to_hex(), %offered, %requested, offering_fund, "bid created");
    Ok(match transport {
        BidTransport::OnChain => Placement::OnChain(announce(wallet, &bid)?),
        BidTransport::Base64 => Placement::Text(bid.to_base64()),
        BidTransport::Blob(store) => Placement::Link(upload_bid(store, &bid)?),
    })
}

/// Broadcast the transaction announcing `bid` on-chain, returns the bid id.
pub fn announce<W>(wallet: &W, bid: &Bid) -> Result<OutputId, Error>
where
    W: Wallet + ?Sized,
{
    wallet.broadcast_transaction(&announcement_transaction(bid))?;
    Ok(bid.id)
}

pub fn upload_bid(store: &dyn BlobStore, bid: &Bid) -> Result<String, Error> {
    store.upload(&serialize(bid))
}

pub fn download_bid(store: &dyn BlobStore, link: &str) -> Result<Bid, Error> {
    Ok(consensus::deserialize(&store.download(link)?)?)
}

/// Find the single bid whose id starts with `prefix`, in hex with or without `0x`.
pub fn select_bid(bids: &[Bid], prefix: &str) -> Result<Bid, Error> {
    let prefix = prefix.trim();
    let prefix = prefix.strip_prefix("0x").unwrap_or(prefix).to_lowercase();
    let mut matches = bids.iter().filter(|b| b.id.to_hex().starts_with(&prefix));
    match (matches.next(), matches.next()) {
        (Some(bid), None) => Ok(bid.clone()),
        (None, _) => Err(Error::BidNotFound(prefix)),
        (Some(_), Some(_)) => Err(Error::AmbiguousBidId(prefix)),
    }
}

pub fn load_bid(source: BidSource) -> Result<Bid, Error> {
    match source {
        BidSource::Base64(text) => Ok(Bid::from_base64(text)?),
        BidSource::Blob(store, link) => download_bid(store, link),
        BidSource::Tracker(tracker, prefix) => select_bid(&tracker.fillable_bids(), prefix),
    }
}

/// Extend the bid fragment into a complete unsigned fill: the filler's inputs for the requested
/// amount and the miner fee, change, and the output receiving the offered amount. The fragment's
/// own entries keep their indices.
pub fn fill_bid_transaction<W>(wallet: &W, bid: &Bid) -> Result<Transaction, Error>
where
    W: Wallet + ?Sized,
{
    // timelocks are left to the chain
    let fragment = bid::extract_bid_transaction(u64::MAX, &bid.transaction)?;
    let bid = Bid {
        transaction: fragment,
        ..bid.clone()
    };
    bid.check_consistency()?;
    if bid.transaction.input_parent_ids() != vec![bid.id] {
        return Err(bid::Error::InconsistentBid.into());
    }
    let mut txn = bid.transaction.clone();
    let receive = wallet.new_receiving_address()?;
    let mut parents = vec![];
    if bid.offering_fund {
        let needed = bid
            .coin
            .checked_add(MINER_FEE)
            .ok_or(Error::InvalidAmount)?;
        let funding = select_outputs(wallet, Asset::Coin, needed)?;
        parents.extend(funding.inputs.parent_ids());
        funding.add_to(&mut txn);
        txn.fund_outputs.push(FundOutput {
            value: bid.fund,
            unlock_hash: receive,
        });
    } else {
        let funding = select_outputs(wallet, Asset::Fund, bid.fund)?;
        parents.extend(funding.inputs.parent_ids());
        funding.add_to(&mut txn);
        let fee = select_outputs(wallet, Asset::Coin, MINER_FEE)?;
        parents.extend(fee.inputs.parent_ids());
        fee.add_to(&mut txn);
        txn.coin_outputs.push(CoinOutput {
            value: bid.coin,
            unlock_hash: receive,
        });
    }
    txn.miner_fees.push(MINER_FEE);
    txn.signatures.extend(
        parents
            .into_iter()
            .map(|p| TransactionSignature::unsigned(p, CoveredFields::whole())),
    );
    Ok(txn)
}

/// Fill a bid: build the fill, sign the filler's inputs and broadcast. Returns the broadcast
/// transaction.
pub fn fill_bid<W>(wallet: &W, bid: &Bid) -> Result<Transaction, Error>
where
    W: Wallet + ?Sized,
{
    let txn = fill_bid_transaction(wallet, bid)?;
    let to_sign: Vec<Hash256> = txn
        .signatures
        .iter()
        .filter(|s| s.covered_fields.whole_transaction)
        .map(|s| s.parent_id)
        .collect();
    let txn = wallet.sign_transaction(&txn, &to_sign)?;
    wallet.broadcast_transaction(&txn)?;
    info!(id = %bid.id.to_hex(), txid = %txn.id().to_hex(), "bid filled");
    Ok(txn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{UnlockConditions, UnlockHash};
    use crate::wallet::UnspentOutput;

    fn bid(byte: u8) -> Bid {
        Bid {
            transaction: Transaction::default(),
            id: OutputId::repeat_byte(byte),
            height: 0,
            fund: Currency::new(1),
            coin: Currency::new(1),
            offering_fund: true,
            invalid: false,
        }
    }

    #[test]
    fn select_by_prefix() {
        let bids = vec![bid(0xab), bid(0xac), bid(0x12)];
        assert_eq!(select_bid(&bids, "12").unwrap(), bids[2]);
        assert_eq!(select_bid(&bids, "0xABAB").unwrap(), bids[0]);
        assert!(matches!(
            select_bid(&bids, "a"),
            Err(Error::AmbiguousBidId(_))
        ));
        assert!(matches!(select_bid(&bids, "ff"), Err(Error::BidNotFound(_))));
    }

    #[test]
    fn zero_amounts_are_rejected() {
        struct NoWallet;
        impl Wallet for NoWallet {
            fn new_receiving_address(&self) -> Result<UnlockHash, wallet::Error> {
                Err(wallet::Error::new("unreachable"))
            }
            fn unspent_outputs(&self, _: Asset) -> Result<Vec<UnspentOutput>, wallet::Error> {
                Ok(vec![])
            }
            fn unlock_conditions(&self, _: &UnlockHash) -> Result<UnlockConditions, wallet::Error> {
                Err(wallet::Error::new("unreachable"))
            }
            fn addresses(&self) -> Result<Vec<UnlockHash>, wallet::Error> {
                Ok(vec![])
            }
            fn sign_transaction(
                &self,
                txn: &Transaction,
                _: &[Hash256],
            ) -> Result<Transaction, wallet::Error> {
                Ok(txn.clone())
            }
            fn broadcast_transaction(&self, _: &Transaction) -> Result<(), wallet::Error> {
                Ok(())
            }
        }
        assert!(matches!(
            create_bid(&NoWallet, Currency::ZERO, Currency::new(1), true),
            Err(Error::InvalidAmount)
        ));
        assert!(matches!(
            create_bid(&NoWallet, Currency::new(1), Currency::new(1), true),
            Err(Error::Wallet(wallet::Error::InsufficientFunds { .. }))
        ));
    }
}
