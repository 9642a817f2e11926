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

//! The wallet service boundary. Keys, output selection data, addresses and signatures all live
//! behind the [`Wallet`] trait; the swap and market code only ever call it.

use thiserror::Error;
use tracing::debug;

use std::collections::HashSet;
use std::error;

use crate::blockchain::{Asset, Currency, Hash256, OutputId, UnlockConditions, UnlockHash};
use crate::transaction::{CoinInput, CoinOutput, FundInput, FundOutput, Legs, Transaction};

/// A list of possible wallet errors.
#[derive(Error, Debug)]
pub enum Error {
    /// The spendable outputs of the wallet do not cover the requested amount.
    #[error("Insufficient funds: needed {needed} {asset}, available {available}")]
    InsufficientFunds {
        asset: Asset,
        needed: Currency,
        available: Currency,
    },
    /// Any error returned by the wallet service itself.
    #[error("Wallet service error: {0}")]
    Other(Box<dyn error::Error + Send + Sync>),
}

impl Error {
    /// Creates a new wallet error of type other with an arbitrary payload.
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

/// An output the wallet can spend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnspentOutput {
    pub id: OutputId,
    pub asset: Asset,
    pub unlock_hash: UnlockHash,
    pub value: Currency,
}

/// The wallet service contract. Every call is synchronous and individually fallible, failures
/// are surfaced unchanged to the caller of the protocol step.
pub trait Wallet {
    /// Derive a fresh address owned by the wallet.
    fn new_receiving_address(&self) -> Result<UnlockHash, Error>;

    /// List spendable outputs of the given asset, in the wallet's preferred order.
    fn unspent_outputs(&self, asset: Asset) -> Result<Vec<UnspentOutput>, Error>;

    /// Return the unlock conditions behind one of the wallet's addresses.
    fn unlock_conditions(&self, address: &UnlockHash) -> Result<UnlockConditions, Error>;

    /// List every address owned by the wallet.
    fn addresses(&self) -> Result<Vec<UnlockHash>, Error>;

    /// Fill the signatures whose parent id is listed in `to_sign`, or every signature the wallet
    /// can produce when `to_sign` is empty, and return the signed transaction.
    fn sign_transaction(&self, txn: &Transaction, to_sign: &[Hash256])
        -> Result<Transaction, Error>;

    /// Submit a transaction to the network.
    fn broadcast_transaction(&self, txn: &Transaction) -> Result<(), Error>;
}

/// Collect the wallet's addresses into a set for ownership checks.
pub fn owned_addresses<W>(wallet: &W) -> Result<HashSet<UnlockHash>, Error>
where
    W: Wallet + ?Sized,
{
    Ok(wallet.addresses()?.into_iter().collect())
}

/// The inputs sourced from the wallet, one variant per asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inputs {
    Coin(Vec<CoinInput>),
    Fund(Vec<FundInput>),
}

impl Inputs {
    /// Parent ids of the selected outputs.
    pub fn parent_ids(&self) -> Vec<OutputId> {
        match self {
            Inputs::Coin(inputs) => inputs.iter().map(|i| i.parent_id).collect(),
            Inputs::Fund(inputs) => inputs.iter().map(|i| i.parent_id).collect(),
        }
    }
}

/// Inputs covering a requested amount, plus the change to return to the wallet if the selected
/// outputs exceed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Funding {
    pub inputs: Inputs,
    pub change: Option<(UnlockHash, Currency)>,
}

impl Funding {
    /// Append the inputs and the change output, if any, to the transaction legs.
    pub fn add_to<L: Legs>(self, legs: &mut L) {
        match self.inputs {
            Inputs::Coin(inputs) => {
                legs.coin_inputs_mut().extend(inputs);
                if let Some((unlock_hash, value)) = self.change {
                    legs.coin_outputs_mut().push(CoinOutput { value, unlock_hash });
                }
            }
            Inputs::Fund(inputs) => {
                legs.fund_inputs_mut().extend(inputs);
                if let Some((unlock_hash, value)) = self.change {
                    legs.fund_outputs_mut().push(FundOutput { value, unlock_hash });
                }
            }
        }
    }
}

/// Select wallet outputs of `asset`, in wallet order, until their sum reaches `amount`. Fails with
/// [`Error::InsufficientFunds`] if all of them together do not.
pub fn select_outputs<W>(wallet: &W, asset: Asset, amount: Currency) -> Result<Funding, Error>
where
    W: Wallet + ?Sized,
{
    let mut sum = Currency::ZERO;
    let mut selected = vec![];
    for output in wallet.unspent_outputs(asset)? {
        if output.asset != asset {
            continue;
        }
        sum = sum.saturating_add(output.value);
        selected.push(output);
        if sum >= amount {
            break;
        }
    }
    if sum < amount {
        return Err(Error::InsufficientFunds {
            asset,
            needed: amount,
            available: sum,
        });
    }

    let inputs = match asset {
        Asset::Coin => Inputs::Coin(
            selected
                .iter()
                .map(|u| {
                    Ok(CoinInput {
                        parent_id: u.id,
                        unlock_conditions: wallet.unlock_conditions(&u.unlock_hash)?,
                    })
                })
                .collect::<Result<_, Error>>()?,
        ),
        Asset::Fund => {
            let claim_unlock_hash = wallet.new_receiving_address()?;
            Inputs::Fund(
                selected
                    .iter()
                    .map(|u| {
                        Ok(FundInput {
                            parent_id: u.id,
                            unlock_conditions: wallet.unlock_conditions(&u.unlock_hash)?,
                            claim_unlock_hash,
                        })
                    })
                    .collect::<Result<_, Error>>()?,
            )
        }
    };

    let change = match sum.checked_sub(amount) {
        Some(change) if !change.is_zero() => Some((wallet.new_receiving_address()?, change)),
        _ => None,
    };
    debug!(%asset, %amount, %sum, inputs = selected.len(), "selected wallet outputs");
    Ok(Funding { inputs, change })
}
