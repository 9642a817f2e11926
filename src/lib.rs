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

//! Barter Core library
//!
//! Trustless same-chain swaps between the native coin and a second fund asset, made safe by the
//! order in which the two parties add partial signatures to a single transaction, plus a market
//! tracker following the chain to maintain the book of on-chain bids and the trades filling them.
//!
//! The [`swap`] module holds the staged protocol, [`bid`] and [`market`] the on-chain bids, and
//! [`tracker`] the market tracker with its crash-safe [`persist`]ence. Keys and signatures stay
//! behind the [`wallet::Wallet`] trait, chain data comes through the [`syncer`] feed traits.

#[macro_use]
extern crate amplify;

use thiserror::Error;

#[macro_use]
pub mod consensus;

pub mod bid;
pub mod blockchain;
pub mod config;
pub mod market;
pub mod persist;
pub mod swap;
pub mod syncer;
pub mod tracker;
pub mod transaction;
pub mod wallet;

/// A list of possible errors when swapping, placing and filling bids, or tracking the market.
/// Each error carries the error of the module it comes from.
#[derive(Error, Debug)]
pub enum Error {
    /// A consensus error during encoding/decoding operation.
    #[error("Consensus error: {0}")]
    Consensus(#[from] consensus::Error),
    /// A transaction fails its standalone validation.
    #[error("Transaction error: {0}")]
    Transaction(#[from] transaction::Error),
    /// The wallet service failed or lacks funds.
    #[error("Wallet error: {0}")]
    Wallet(#[from] wallet::Error),
    /// A swap step failed, protocol violations included.
    #[error("Swap error: {0}")]
    Swap(#[from] swap::Error),
    /// A bid is malformed or invalid.
    #[error("Bid error: {0}")]
    Bid(#[from] bid::Error),
    /// Placing, loading or filling a bid failed.
    #[error("Market error: {0}")]
    Market(#[from] market::Error),
    /// The consensus feed failed.
    #[error("Syncer error: {0}")]
    Syncer(#[from] syncer::Error),
    /// The tracker state could not be saved or loaded.
    #[error("Persistence error: {0}")]
    Persist(#[from] persist::Error),
    /// The market tracker stopped.
    #[error("Tracker error: {0}")]
    Tracker(#[from] tracker::Error),
}

/// Result of a high level operation such as swap steps, bid workflows or tracking.
pub type Res<T> = Result<T, Error>;
