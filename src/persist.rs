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

//! Crash-safe tracker state: an append-only log of every output diff ever processed, and a JSON
//! snapshot recording how much of that log its state reflects.
//!
//! Saving flushes and syncs the log first, then atomically replaces the snapshot. Loading
//! truncates the log back to the recorded length before replaying it, so diffs appended after
//! the last save are discarded together with the blocks they belong to.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::bid::Trade;
use crate::blockchain::ConsensusChangeId;
use crate::consensus::{self, Decodable, Encodable};
use crate::syncer::OutputDiff;

/// Header identifying tracker snapshots.
pub const SNAPSHOT_HEADER: &str = "Barter Market Tracker";
/// Version of the snapshot layout.
pub const SNAPSHOT_VERSION: &str = "0.1.0";

/// A list of possible persistence errors, all fatal to the tracker.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Snapshot serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// The diff log holds an undecodable record.
    #[error("Corrupt diff log: {0}")]
    Consensus(#[from] consensus::Error),
    #[error("Unexpected snapshot header: {0}")]
    Header(String),
    #[error("Unsupported snapshot version: {0}")]
    Version(String),
    /// The diff log lost bytes the snapshot relies on.
    #[error("Diff log is {actual} bytes long, snapshot expects {expected}")]
    ShortLog { expected: u64, actual: u64 },
}

/// The tracker state written at every save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub header: String,
    pub version: String,
    pub height: u64,
    pub change_id: ConsensusChangeId,
    /// Length in bytes of the diff log at save time.
    pub diff_log_len: u64,
    pub trades: Vec<Trade>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Snapshot::new(0, ConsensusChangeId::BEGINNING, 0, vec![])
    }
}

impl Snapshot {
    pub fn new(
        height: u64,
        change_id: ConsensusChangeId,
        diff_log_len: u64,
        trades: Vec<Trade>,
    ) -> Self {
        Snapshot {
            header: SNAPSHOT_HEADER.into(),
            version: SNAPSHOT_VERSION.into(),
            height,
            change_id,
            diff_log_len,
            trades,
        }
    }

    /// Read the snapshot at `path`. A missing file is the empty initial state.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Snapshot::default()),
            Err(err) => return Err(err.into()),
        };
        let snapshot: Snapshot = serde_json::from_reader(BufReader::new(file))?;
        if snapshot.header != SNAPSHOT_HEADER {
            return Err(Error::Header(snapshot.header));
        }
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(Error::Version(snapshot.version));
        }
        Ok(snapshot)
    }

    /// Atomically replace the snapshot at `path`.
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        let tmp_path = path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            serde_json::to_writer_pretty(&mut writer, self)?;
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        sync_parent(path)?;
        Ok(())
    }
}

// A rename survives a crash only once the directory holding the entry is synced.
#[cfg(unix)]
fn sync_parent(path: &Path) -> Result<(), Error> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> Result<(), Error> {
    Ok(())
}

/// The append-only binary log of output diffs.
pub struct DiffLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl DiffLog {
    /// Open the log at `path`, truncate it to `len` bytes and feed every remaining record to
    /// `apply`, in order. The returned log appends after the last replayed record.
    pub fn open<F>(path: &Path, len: u64, mut apply: F) -> Result<Self, Error>
    where
        F: FnMut(OutputDiff),
    {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let actual = file.metadata()?.len();
        if actual < len {
            return Err(Error::ShortLog {
                expected: len,
                actual,
            });
        }
        file.set_len(len)?;
        file.seek(SeekFrom::Start(0))?;

        let mut replayed = 0u64;
        {
            let mut reader = BufReader::new(&file);
            let mut tag = [0u8; 1];
            loop {
                // end of file is only valid between records
                if reader.read(&mut tag)? == 0 {
                    break;
                }
                let mut record = (&tag[..]).chain(&mut reader);
                apply(OutputDiff::consensus_decode(&mut record)?);
                replayed += 1;
            }
        }
        file.seek(SeekFrom::Start(len))?;
        debug!(path = %path.display(), len, replayed, "replayed diff log");
        Ok(DiffLog {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    /// Buffer one record. Durable only after the next [`DiffLog::sync`].
    pub fn append(&mut self, diff: &OutputDiff) -> Result<(), Error> {
        diff.consensus_encode(&mut self.writer)?;
        Ok(())
    }

    /// Flush and sync the log, returning its length in bytes.
    pub fn sync(&mut self) -> Result<u64, Error> {
        self.writer.flush()?;
        let file = self.writer.get_ref();
        file.sync_all()?;
        Ok(file.metadata()?.len())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
