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

//! The market tracker follows the consensus feed and maintains the table of announced bids and
//! their fills, surviving reorganizations and restarts.
//!
//! All state sits behind one mutex. Consensus changes are processed one at a time by the feed's
//! delivery thread holding the lock for the whole change, queries take it briefly.

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error, info};

use std::cmp::Reverse;
use std::collections::HashMap;
use std::fs;
use std::sync::mpsc::{Receiver, TryRecvError};
use std::sync::Arc;
use std::time::Duration;

use crate::bid::{find_bids, Bid, Trade};
use crate::blockchain::{Asset, ConsensusChangeId, Currency, OutputId};
use crate::config::TrackerConfig;
use crate::persist::{self, DiffLog, Snapshot};
use crate::syncer::{
    self, ConsensusChange, ConsensusFeed, ConsensusSubscriber, DiffDirection, OutputDiff,
    Subscription,
};
use crate::transaction::{CoinOutput, FundOutput, Transaction};

/// How often the run loop checks for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A list of possible tracker errors, all fatal.
#[derive(Error, Debug)]
pub enum Error {
    /// Saving or loading the tracker state failed.
    #[error("Persistence error: {0}")]
    Persist(#[from] persist::Error),
    /// The consensus feed reported an error.
    #[error("Consensus feed error: {0}")]
    Feed(#[from] syncer::Error),
}

struct TrackerState {
    height: u64,
    change_id: ConsensusChangeId,
    /// Open bids and closed trades, keyed by bid id.
    trades: HashMap<OutputId, Trade>,
    coin_outputs: HashMap<OutputId, CoinOutput>,
    fund_outputs: HashMap<OutputId, FundOutput>,
    log: DiffLog,
    syncing: bool,
}

fn apply_diff(
    coin_outputs: &mut HashMap<OutputId, CoinOutput>,
    fund_outputs: &mut HashMap<OutputId, FundOutput>,
    diff: OutputDiff,
) {
    match diff {
        OutputDiff::Coin {
            direction: DiffDirection::Apply,
            id,
            output,
        } => {
            coin_outputs.insert(id, output);
        }
        OutputDiff::Coin { id, .. } => {
            coin_outputs.remove(&id);
        }
        OutputDiff::Fund {
            direction: DiffDirection::Apply,
            id,
            output,
        } => {
            fund_outputs.insert(id, output);
        }
        OutputDiff::Fund { id, .. } => {
            fund_outputs.remove(&id);
        }
    }
}

impl TrackerState {
    fn save(&mut self, config: &TrackerConfig) -> Result<(), Error> {
        let diff_log_len = self.log.sync()?;
        let mut trades: Vec<Trade> = self.trades.values().cloned().collect();
        trades.sort_by_key(|t| (t.bid.height, t.bid.id));
        Snapshot::new(self.height, self.change_id, diff_log_len, trades)
            .save(&config.snapshot_path())?;
        info!(height = self.height, diff_log_len, "saved tracker state");
        Ok(())
    }

    // Returns whether any trade changed.
    fn revert_block(&mut self, txns: &[Transaction]) -> bool {
        let (bids, fills) = find_bids(self.height, txns);
        self.height = self.height.wrapping_sub(1);
        for bid in &bids {
            if self.trades.remove(&bid.id).is_some() {
                info!(id = %bid.id.to_hex(), height = bid.height, "bid reverted");
            }
        }
        for fill in &fills {
            // a single fill can close several bids
            for id in fill.input_parent_ids() {
                if let Some(trade) = self.trades.get_mut(&id) {
                    trade.transaction = Transaction::default();
                    trade.height = 0;
                    info!(id = %id.to_hex(), "fill rolled back");
                }
            }
        }
        !bids.is_empty() || !fills.is_empty()
    }

    fn apply_block(&mut self, txns: &[Transaction]) -> bool {
        self.height = self.height.wrapping_add(1);
        let (bids, fills) = find_bids(self.height, txns);
        for bid in &bids {
            info!(
                id = %bid.id.to_hex(),
                height = bid.height,
                offering_fund = bid.offering_fund,
                "bid discovered"
            );
            self.trades.insert(bid.id, Trade::open(bid.clone()));
        }
        for fill in &fills {
            for id in fill.input_parent_ids() {
                if let Some(trade) = self.trades.get_mut(&id) {
                    trade.transaction = fill.clone();
                    trade.height = self.height;
                    info!(id = %id.to_hex(), height = self.height, "bid filled");
                }
            }
        }
        !bids.is_empty() || !fills.is_empty()
    }

    // An open bid is invalid while its reserved output is missing or holds another value.
    // Recomputed from scratch so that reverting the spend clears the flag.
    fn refresh_invalid(&mut self) -> bool {
        let mut flipped = false;
        for (id, trade) in self.trades.iter_mut().filter(|(_, t)| t.is_open()) {
            let live: Option<Currency> = match trade.bid.offered_asset() {
                Asset::Coin => self.coin_outputs.get(id).map(|o| o.value),
                Asset::Fund => self.fund_outputs.get(id).map(|o| o.value),
            };
            let invalid = live != Some(trade.bid.offered());
            if invalid != trade.bid.invalid {
                info!(id = %id.to_hex(), invalid, "bid validity changed");
                trade.bid.invalid = invalid;
                flipped = true;
            }
        }
        flipped
    }
}

/// Tracks bids announced on-chain and the trades filling them.
pub struct MarketTracker {
    config: TrackerConfig,
    state: Mutex<TrackerState>,
}

impl MarketTracker {
    /// Load the tracker state from the configured directory, creating it if needed.
    pub fn open(config: TrackerConfig) -> Result<Self, Error> {
        fs::create_dir_all(config.dir()).map_err(persist::Error::from)?;
        let snapshot = Snapshot::load(&config.snapshot_path())?;
        let mut coin_outputs = HashMap::new();
        let mut fund_outputs = HashMap::new();
        let log = DiffLog::open(&config.diff_log_path(), snapshot.diff_log_len, |diff| {
            apply_diff(&mut coin_outputs, &mut fund_outputs, diff)
        })?;
        let trades = snapshot
            .trades
            .into_iter()
            .map(|t| (t.bid.id, t))
            .collect::<HashMap<_, _>>();
        info!(
            height = snapshot.height,
            trades = trades.len(),
            coin_outputs = coin_outputs.len(),
            fund_outputs = fund_outputs.len(),
            "loaded tracker state"
        );
        Ok(MarketTracker {
            state: Mutex::new(TrackerState {
                height: snapshot.height,
                change_id: snapshot.change_id,
                trades,
                coin_outputs,
                fund_outputs,
                log,
                syncing: false,
            }),
            config,
        })
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Apply one consensus change: update the unspent outputs and the diff log, revert then
    /// apply blocks, recompute invalid bids, and save when trades changed or at the save
    /// cadence.
    pub fn process_consensus_change(&self, change: &ConsensusChange) -> Result<(), Error> {
        let mut state = self.state.lock();
        if state.change_id == ConsensusChangeId::BEGINNING {
            // the genesis block is at height 0
            state.height = state.height.wrapping_sub(1);
        }
        state.change_id = change.id;

        {
            let TrackerState {
                coin_outputs,
                fund_outputs,
                log,
                ..
            } = &mut *state;
            for diff in &change.output_diffs {
                apply_diff(coin_outputs, fund_outputs, diff.clone());
                log.append(diff)?;
            }
        }

        let mut changed = false;
        for block in &change.reverted_blocks {
            changed |= state.revert_block(&block.transactions);
        }
        for block in &change.applied_blocks {
            changed |= state.apply_block(&block.transactions);
        }
        changed |= state.refresh_invalid();

        let interval = if state.syncing {
            self.config.sync_save_interval
        } else {
            self.config.save_interval
        };
        debug!(
            id = %change.id.to_hex(),
            height = state.height,
            reverted = change.reverted_blocks.len(),
            applied = change.applied_blocks.len(),
            "processed consensus change"
        );
        if changed || (interval != 0 && state.height % interval == 0) {
            state.save(&self.config)?;
        }
        Ok(())
    }

    /// Open bids, flagged invalid ones included, most recent first.
    pub fn bids(&self) -> Vec<Bid> {
        let state = self.state.lock();
        let mut bids: Vec<Bid> = state
            .trades
            .values()
            .filter(|t| t.is_open())
            .map(|t| t.bid.clone())
            .collect();
        bids.sort_by_key(|b| (Reverse(b.height), b.id));
        bids
    }

    /// Open bids that can still be filled, most recent first.
    pub fn fillable_bids(&self) -> Vec<Bid> {
        self.bids().into_iter().filter(|b| !b.invalid).collect()
    }

    /// Filled trades, most recently filled first.
    pub fn trades(&self) -> Vec<Trade> {
        let state = self.state.lock();
        let mut trades: Vec<Trade> = state
            .trades
            .values()
            .filter(|t| !t.is_open())
            .cloned()
            .collect();
        trades.sort_by_key(|t| (Reverse(t.height), t.bid.id));
        trades
    }

    pub fn height(&self) -> u64 {
        self.state.lock().height
    }

    pub fn change_id(&self) -> ConsensusChangeId {
        self.state.lock().change_id
    }

    /// Coin outputs unspent as of the last processed change.
    pub fn coin_outputs(&self) -> HashMap<OutputId, CoinOutput> {
        self.state.lock().coin_outputs.clone()
    }

    /// Fund outputs unspent as of the last processed change.
    pub fn fund_outputs(&self) -> HashMap<OutputId, FundOutput> {
        self.state.lock().fund_outputs.clone()
    }

    /// Switch between the catch-up and the steady state save cadence.
    pub fn set_syncing(&self, syncing: bool) {
        self.state.lock().syncing = syncing;
    }

    pub fn save(&self) -> Result<(), Error> {
        self.state.lock().save(&self.config)
    }

    /// Final save before shutdown.
    pub fn close(&self) -> Result<(), Error> {
        self.save()
    }
}

impl ConsensusSubscriber for MarketTracker {
    fn process_consensus_change(&self, change: &ConsensusChange) -> Result<(), syncer::Error> {
        MarketTracker::process_consensus_change(self, change).map_err(syncer::Error::new)
    }
}

/// Subscribe the tracker from its last processed change and block until it caught up with the
/// chain tip, logging progress meanwhile. Returns the live subscription.
pub fn sync<F>(tracker: &Arc<MarketTracker>, feed: &F) -> Result<Subscription, Error>
where
    F: ConsensusFeed + ?Sized,
{
    tracker.set_syncing(true);
    let mut subscription = feed.subscribe(tracker.clone(), tracker.change_id())?;
    loop {
        match subscription.wait(tracker.config.progress_interval) {
            Ok(true) => break,
            Ok(false) => info!(height = tracker.height(), "syncing"),
            Err(err) => {
                subscription.unsubscribe();
                return Err(err.into());
            }
        }
    }
    tracker.set_syncing(false);
    info!(height = tracker.height(), "caught up with the chain tip");
    Ok(subscription)
}

/// Run the tracker until `shutdown` fires or is dropped, then save a last time. A feed error
/// stops the tracker without saving, the persisted state stays consistent on its own.
pub fn run<F>(tracker: Arc<MarketTracker>, feed: &F, shutdown: Receiver<()>) -> Result<(), Error>
where
    F: ConsensusFeed + ?Sized,
{
    let mut subscription = sync(&tracker, feed)?;
    let result = loop {
        match shutdown.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => break Ok(()),
            Err(TryRecvError::Empty) => {}
        }
        if let Err(err) = subscription.wait(POLL_INTERVAL) {
            break Err(err);
        }
    };
    subscription.unsubscribe();
    match result {
        Ok(()) => {
            info!("shutting down market tracker");
            tracker.close()
        }
        Err(err) => {
            error!(%err, "consensus feed failed");
            Err(err.into())
        }
    }
}
