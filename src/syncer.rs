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

//! The consensus feed the market tracker consumes: ordered consensus changes, each listing the
//! blocks reverted and applied at the chain tip and the resulting output differences.

use thiserror::Error;

use std::error;
use std::io;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

pub use crate::blockchain::ConsensusChangeId;
use crate::blockchain::{BlockId, OutputId};
use crate::consensus::{self, Decodable, Encodable};
use crate::transaction::{CoinOutput, FundOutput, Transaction};

/// Errors reported by a consensus feed. Any of them is fatal to a subscriber.
#[derive(Error, Debug)]
pub enum Error {
    /// The feed stopped without reporting an error.
    #[error("Consensus feed disconnected")]
    Disconnected,
    /// Any feed or subscriber error not part of this list.
    #[error("Consensus feed error: {0}")]
    Other(Box<dyn error::Error + Send + Sync>),
}

impl Error {
    /// Creates a new feed error of type other with an arbitrary payload.
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

impl ConsensusChangeId {
    /// Subscribe from the genesis block.
    pub const BEGINNING: ConsensusChangeId = ConsensusChangeId([0u8; 32]);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Block {
    pub id: BlockId,
    pub transactions: Vec<Transaction>,
}

#[derive(Display, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[display(Debug)]
pub enum DiffDirection {
    /// The output was created.
    Apply,
    /// The output ceased to exist.
    Revert,
}

impl Encodable for DiffDirection {
    fn consensus_encode<W: io::Write>(&self, writer: &mut W) -> Result<usize, io::Error> {
        match self {
            DiffDirection::Apply => 0x01u8.consensus_encode(writer),
            DiffDirection::Revert => 0x00u8.consensus_encode(writer),
        }
    }
}

impl Decodable for DiffDirection {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        match Decodable::consensus_decode(d)? {
            0x01u8 => Ok(DiffDirection::Apply),
            0x00u8 => Ok(DiffDirection::Revert),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

/// A record stating that an output began or ceased to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputDiff {
    Coin {
        direction: DiffDirection,
        id: OutputId,
        output: CoinOutput,
    },
    Fund {
        direction: DiffDirection,
        id: OutputId,
        output: FundOutput,
    },
}

impl OutputDiff {
    pub fn direction(&self) -> DiffDirection {
        match self {
            OutputDiff::Coin { direction, .. } | OutputDiff::Fund { direction, .. } => *direction,
        }
    }

    pub fn id(&self) -> OutputId {
        match self {
            OutputDiff::Coin { id, .. } | OutputDiff::Fund { id, .. } => *id,
        }
    }

    /// The same diff in the opposite direction, what a reverted block reports.
    pub fn reversed(&self) -> Self {
        let flip = |d: &DiffDirection| match d {
            DiffDirection::Apply => DiffDirection::Revert,
            DiffDirection::Revert => DiffDirection::Apply,
        };
        match self {
            OutputDiff::Coin {
                direction,
                id,
                output,
            } => OutputDiff::Coin {
                direction: flip(direction),
                id: *id,
                output: output.clone(),
            },
            OutputDiff::Fund {
                direction,
                id,
                output,
            } => OutputDiff::Fund {
                direction: flip(direction),
                id: *id,
                output: output.clone(),
            },
        }
    }
}

// Coin diffs are tagged 0x01, fund diffs 0x00.
impl Encodable for OutputDiff {
    fn consensus_encode<W: io::Write>(&self, s: &mut W) -> Result<usize, io::Error> {
        match self {
            OutputDiff::Coin {
                direction,
                id,
                output,
            } => {
                let mut len = 0x01u8.consensus_encode(s)?;
                len += direction.consensus_encode(s)?;
                len += id.consensus_encode(s)?;
                Ok(len + output.consensus_encode(s)?)
            }
            OutputDiff::Fund {
                direction,
                id,
                output,
            } => {
                let mut len = 0x00u8.consensus_encode(s)?;
                len += direction.consensus_encode(s)?;
                len += id.consensus_encode(s)?;
                Ok(len + output.consensus_encode(s)?)
            }
        }
    }
}

impl Decodable for OutputDiff {
    fn consensus_decode<D: io::Read>(d: &mut D) -> Result<Self, consensus::Error> {
        match Decodable::consensus_decode(d)? {
            0x01u8 => Ok(OutputDiff::Coin {
                direction: Decodable::consensus_decode(d)?,
                id: Decodable::consensus_decode(d)?,
                output: Decodable::consensus_decode(d)?,
            }),
            0x00u8 => Ok(OutputDiff::Fund {
                direction: Decodable::consensus_decode(d)?,
                id: Decodable::consensus_decode(d)?,
                output: Decodable::consensus_decode(d)?,
            }),
            _ => Err(consensus::Error::UnknownType),
        }
    }
}

impl_strict_encoding!(OutputDiff);

/// One ordered update of the chain tip.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsensusChange {
    pub id: ConsensusChangeId,
    pub reverted_blocks: Vec<Block>,
    pub applied_blocks: Vec<Block>,
    pub output_diffs: Vec<OutputDiff>,
}

/// Receives consensus changes, one at a time and in order, from the feed's delivery thread.
pub trait ConsensusSubscriber: Send + Sync {
    /// Process one change. An error stops the subscription and is reported through it.
    fn process_consensus_change(&self, change: &ConsensusChange) -> Result<(), Error>;
}

/// A source of consensus changes.
pub trait ConsensusFeed {
    /// Start delivering the changes following `start` to `subscriber`.
    fn subscribe(
        &self,
        subscriber: Arc<dyn ConsensusSubscriber>,
        start: ConsensusChangeId,
    ) -> Result<Subscription, Error>;
}

/// A live subscription. The feed signals on its channel once with `Ok(())` when the subscriber
/// caught up with the chain tip, and with `Err` if delivery failed; either way a disconnected
/// channel counts as an error.
pub struct Subscription {
    signals: Receiver<Result<(), Error>>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new<F>(signals: Receiver<Result<(), Error>>, cancel: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Subscription {
            signals,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Wait for the next signal. Returns `Ok(false)` if none arrived before the timeout.
    pub fn wait(&self, timeout: Duration) -> Result<bool, Error> {
        match self.signals.recv_timeout(timeout) {
            Ok(Ok(())) => Ok(true),
            Ok(Err(err)) => Err(err),
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(Error::Disconnected),
        }
    }

    /// Stop the delivery of changes. Idempotent.
    pub fn unsubscribe(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
