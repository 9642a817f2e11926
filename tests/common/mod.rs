#![allow(dead_code)]

//! Deterministic test doubles: an in-memory wallet, a toy chain producing consensus changes and a
//! feed delivering them.

use barter_core::blockchain::{
    Asset, BlockId, ConsensusChangeId, Currency, Hash256, OutputId, UnlockConditions, UnlockHash,
};
use barter_core::market::{self, BlobStore};
use barter_core::syncer::{
    self, Block, ConsensusChange, ConsensusFeed, ConsensusSubscriber, DiffDirection, OutputDiff,
    Subscription,
};
use barter_core::transaction::{CoinOutput, FundOutput, Transaction};
use barter_core::wallet::{self, UnspentOutput, Wallet};

use parking_lot::Mutex;
use secp256k1::{PublicKey, Secp256k1, SecretKey};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

fn hash_from_counter(tag: u8, n: u64) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes[0] = tag;
    bytes[24..].copy_from_slice(&n.to_be_bytes());
    bytes
}

#[derive(Default)]
struct WalletState {
    keys: HashMap<UnlockHash, (SecretKey, UnlockConditions)>,
    outputs: Vec<UnspentOutput>,
    broadcasts: Vec<Transaction>,
    counter: u16,
}

/// A wallet deriving its keys from a seed byte, so two wallets with different seeds never share
/// an address.
pub struct FakeWallet {
    seed: u8,
    state: Mutex<WalletState>,
}

impl FakeWallet {
    pub fn new(seed: u8) -> Self {
        assert!(seed > 0 && seed < 0x7f);
        FakeWallet {
            seed,
            state: Mutex::new(WalletState::default()),
        }
    }

    fn derive(&self, state: &mut WalletState) -> UnlockHash {
        state.counter += 1;
        let mut bytes = [self.seed; 32];
        bytes[30..].copy_from_slice(&state.counter.to_be_bytes());
        let sk = SecretKey::from_slice(&bytes).unwrap();
        let pk = PublicKey::from_secret_key(&Secp256k1::new(), &sk);
        let uc = UnlockConditions::standard(pk);
        let address = uc.unlock_hash();
        state.keys.insert(address, (sk, uc));
        address
    }

    /// Credit the wallet with a fresh output and return it.
    pub fn fund(&self, asset: Asset, value: Currency) -> UnspentOutput {
        let mut state = self.state.lock();
        let unlock_hash = self.derive(&mut state);
        let output = UnspentOutput {
            id: OutputId::from(hash_from_counter(self.seed, state.counter as u64)),
            asset,
            unlock_hash,
            value,
        };
        state.outputs.push(output.clone());
        output
    }

    pub fn owns(&self, address: &UnlockHash) -> bool {
        self.state.lock().keys.contains_key(address)
    }

    pub fn broadcasts(&self) -> Vec<Transaction> {
        self.state.lock().broadcasts.clone()
    }

    pub fn last_broadcast(&self) -> Transaction {
        self.state.lock().broadcasts.last().cloned().unwrap()
    }
}

impl Wallet for FakeWallet {
    fn new_receiving_address(&self) -> Result<UnlockHash, wallet::Error> {
        let mut state = self.state.lock();
        Ok(self.derive(&mut state))
    }

    fn unspent_outputs(&self, asset: Asset) -> Result<Vec<UnspentOutput>, wallet::Error> {
        Ok(self
            .state
            .lock()
            .outputs
            .iter()
            .filter(|o| o.asset == asset)
            .cloned()
            .collect())
    }

    fn unlock_conditions(&self, address: &UnlockHash) -> Result<UnlockConditions, wallet::Error> {
        self.state
            .lock()
            .keys
            .get(address)
            .map(|(_, uc)| uc.clone())
            .ok_or_else(|| wallet::Error::new("unknown address"))
    }

    fn addresses(&self) -> Result<Vec<UnlockHash>, wallet::Error> {
        Ok(self.state.lock().keys.keys().copied().collect())
    }

    fn sign_transaction(
        &self,
        txn: &Transaction,
        to_sign: &[Hash256],
    ) -> Result<Transaction, wallet::Error> {
        let state = self.state.lock();
        let mut signed = txn.clone();
        for i in 0..txn.signatures.len() {
            let parent = txn.signatures[i].parent_id;
            if !to_sign.is_empty() && !to_sign.contains(&parent) {
                continue;
            }
            let key = txn
                .input_unlock_conditions(&parent)
                .and_then(|uc| state.keys.get(&uc.unlock_hash()));
            match key {
                Some((sk, _)) => signed.sign(i, sk).map_err(wallet::Error::new)?,
                None if to_sign.is_empty() => {}
                None => return Err(wallet::Error::new("cannot sign a foreign input")),
            }
        }
        Ok(signed)
    }

    fn broadcast_transaction(&self, txn: &Transaction) -> Result<(), wallet::Error> {
        let mut state = self.state.lock();
        let spent = txn.input_parent_ids();
        state.outputs.retain(|o| !spent.contains(&o.id));
        for (i, output) in txn.coin_outputs.iter().enumerate() {
            if state.keys.contains_key(&output.unlock_hash) {
                let id = txn.coin_output_id(i as u64);
                state.outputs.push(UnspentOutput {
                    id,
                    asset: Asset::Coin,
                    unlock_hash: output.unlock_hash,
                    value: output.value,
                });
            }
        }
        for (i, output) in txn.fund_outputs.iter().enumerate() {
            if state.keys.contains_key(&output.unlock_hash) {
                let id = txn.fund_output_id(i as u64);
                state.outputs.push(UnspentOutput {
                    id,
                    asset: Asset::Fund,
                    unlock_hash: output.unlock_hash,
                    value: output.value,
                });
            }
        }
        state.broadcasts.push(txn.clone());
        Ok(())
    }
}

/// A chain that mines one block per call and hands out the matching consensus changes.
#[derive(Default)]
pub struct FakeChain {
    unspent: HashMap<OutputId, OutputDiff>,
    pending: Vec<OutputDiff>,
    tip: Vec<(Block, Vec<OutputDiff>)>,
    changes: Vec<ConsensusChange>,
    counter: u64,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit a wallet with an output that appears on-chain with the next mined block.
    pub fn credit(&mut self, wallet: &FakeWallet, asset: Asset, value: Currency) -> UnspentOutput {
        let output = wallet.fund(asset, value);
        let diff = match asset {
            Asset::Coin => OutputDiff::Coin {
                direction: DiffDirection::Apply,
                id: output.id,
                output: CoinOutput {
                    value,
                    unlock_hash: output.unlock_hash,
                },
            },
            Asset::Fund => OutputDiff::Fund {
                direction: DiffDirection::Apply,
                id: output.id,
                output: FundOutput {
                    value,
                    unlock_hash: output.unlock_hash,
                },
            },
        };
        self.unspent.insert(output.id, diff.clone());
        self.pending.push(diff);
        output
    }

    fn next_change_id(&mut self) -> ConsensusChangeId {
        self.counter += 1;
        ConsensusChangeId::from(hash_from_counter(0xcc, self.counter))
    }

    fn next_block(&mut self, transactions: Vec<Transaction>) -> Block {
        self.counter += 1;
        Block {
            id: BlockId::from(hash_from_counter(0xbb, self.counter)),
            transactions,
        }
    }

    fn block_diffs(&mut self, transactions: &[Transaction]) -> Vec<OutputDiff> {
        let mut diffs: Vec<OutputDiff> = self.pending.drain(..).collect();
        for txn in transactions {
            for parent in txn.input_parent_ids() {
                if let Some(diff) = self.unspent.remove(&parent) {
                    diffs.push(diff.reversed());
                }
            }
            for (i, output) in txn.coin_outputs.iter().enumerate() {
                let diff = OutputDiff::Coin {
                    direction: DiffDirection::Apply,
                    id: txn.coin_output_id(i as u64),
                    output: output.clone(),
                };
                self.unspent.insert(diff.id(), diff.clone());
                diffs.push(diff);
            }
            for (i, output) in txn.fund_outputs.iter().enumerate() {
                let diff = OutputDiff::Fund {
                    direction: DiffDirection::Apply,
                    id: txn.fund_output_id(i as u64),
                    output: output.clone(),
                };
                self.unspent.insert(diff.id(), diff.clone());
                diffs.push(diff);
            }
        }
        diffs
    }

    /// Mine one block holding `transactions`.
    pub fn mine(&mut self, transactions: Vec<Transaction>) -> ConsensusChange {
        let diffs = self.block_diffs(&transactions);
        let block = self.next_block(transactions);
        self.tip.push((block.clone(), diffs.clone()));
        let change = ConsensusChange {
            id: self.next_change_id(),
            reverted_blocks: vec![],
            applied_blocks: vec![block],
            output_diffs: diffs,
        };
        self.changes.push(change.clone());
        change
    }

    /// Mine `count` empty blocks in a single consensus change.
    pub fn mine_empty(&mut self, count: usize) -> ConsensusChange {
        let mut blocks = Vec::with_capacity(count);
        let mut output_diffs = vec![];
        for _ in 0..count {
            let diffs = self.block_diffs(&[]);
            let block = self.next_block(vec![]);
            self.tip.push((block.clone(), diffs.clone()));
            output_diffs.extend(diffs);
            blocks.push(block);
        }
        let change = ConsensusChange {
            id: self.next_change_id(),
            reverted_blocks: vec![],
            applied_blocks: blocks,
            output_diffs,
        };
        self.changes.push(change.clone());
        change
    }

    /// Undo the last mined block.
    pub fn revert_tip(&mut self) -> ConsensusChange {
        let (block, diffs) = self.tip.pop().unwrap();
        let mut output_diffs = vec![];
        for diff in diffs.iter().rev() {
            let reversed = diff.reversed();
            match reversed.direction() {
                DiffDirection::Apply => {
                    self.unspent.insert(reversed.id(), reversed.clone());
                }
                DiffDirection::Revert => {
                    self.unspent.remove(&reversed.id());
                }
            }
            output_diffs.push(reversed);
        }
        let change = ConsensusChange {
            id: self.next_change_id(),
            reverted_blocks: vec![block],
            applied_blocks: vec![],
            output_diffs,
        };
        self.changes.push(change.clone());
        change
    }

    pub fn changes(&self) -> Vec<ConsensusChange> {
        self.changes.clone()
    }
}

/// Delivers a fixed list of changes from a background thread, then signals it caught up. With a
/// failure set, the failure is signalled after the last change instead.
pub struct FakeFeed {
    pub changes: Vec<ConsensusChange>,
    pub failure: Option<String>,
}

impl FakeFeed {
    pub fn new(changes: Vec<ConsensusChange>) -> Self {
        FakeFeed {
            changes,
            failure: None,
        }
    }

    pub fn failing(changes: Vec<ConsensusChange>, failure: &str) -> Self {
        FakeFeed {
            changes,
            failure: Some(failure.into()),
        }
    }
}

impl ConsensusFeed for FakeFeed {
    fn subscribe(
        &self,
        subscriber: Arc<dyn ConsensusSubscriber>,
        start: ConsensusChangeId,
    ) -> Result<Subscription, syncer::Error> {
        let skip = if start == ConsensusChangeId::BEGINNING {
            0
        } else {
            self.changes
                .iter()
                .position(|c| c.id == start)
                .map(|i| i + 1)
                .ok_or_else(|| syncer::Error::new("unknown consensus change id"))?
        };
        let changes = self.changes[skip..].to_vec();
        let failure = self.failure.clone();
        let (tx, rx) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));
        let stopped = stop.clone();
        thread::spawn(move || {
            for change in &changes {
                if stopped.load(Ordering::SeqCst) {
                    return;
                }
                if let Err(err) = subscriber.process_consensus_change(change) {
                    let _ = tx.send(Err(err));
                    return;
                }
            }
            let signal = match failure {
                Some(failure) => Err(syncer::Error::new(failure)),
                None => Ok(()),
            };
            let _ = tx.send(signal);
            while !stopped.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
        });
        Ok(Subscription::new(rx, move || stop.store(true, Ordering::SeqCst)))
    }
}

/// Blobs kept in memory, linked by the hex of their hash.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl BlobStore for MemoryBlobStore {
    fn upload(&self, data: &[u8]) -> Result<String, market::Error> {
        let link = format!(
            "mem://{}",
            barter_core::blockchain::keccak256(&[data]).to_hex()
        );
        self.blobs.lock().insert(link.clone(), data.to_vec());
        Ok(link)
    }

    fn download(&self, link: &str) -> Result<Vec<u8>, market::Error> {
        self.blobs
            .lock()
            .get(link)
            .cloned()
            .ok_or_else(|| market::Error::new("no such blob"))
    }
}
