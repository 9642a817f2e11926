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

//! Market tracker configuration.

use serde::{Deserialize, Serialize};

use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the JSON snapshot inside the state directory.
pub const SNAPSHOT_FILE: &str = "persist.json";
/// File name of the output diff log inside the state directory.
pub const DIFF_LOG_FILE: &str = "outputs.dat";

/// Where the tracker keeps its state and how often it saves it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// State directory holding the snapshot and the diff log.
    pub dir: PathBuf,

    /// Save every this many blocks while following the chain tip.
    #[serde(default = "default_save_interval")]
    pub save_interval: u64,

    /// Save every this many blocks while replaying history.
    #[serde(default = "default_sync_save_interval")]
    pub sync_save_interval: u64,

    /// How often catch-up progress is logged.
    #[serde(default = "default_progress_interval")]
    pub progress_interval: Duration,
}

impl TrackerConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            save_interval: default_save_interval(),
            sync_save_interval: default_sync_save_interval(),
            progress_interval: default_progress_interval(),
        }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    pub fn diff_log_path(&self) -> PathBuf {
        self.dir.join(DIFF_LOG_FILE)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

// about one day of blocks
fn default_save_interval() -> u64 {
    144
}

fn default_sync_save_interval() -> u64 {
    10_000
}

fn default_progress_interval() -> Duration {
    Duration::from_secs(1)
}
