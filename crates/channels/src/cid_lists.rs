//! Per-channel received-block lists.
//!
//! The recipient of a transfer appends every received block id to an
//! append-only file, one per channel. On restart the list becomes the skip
//! set handed to the sender so already-transferred blocks are not resent.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::warn;

use conduit_primitives::{ChannelId, ContentId};

const LIST_EXTENSION: &str = "cids";

/// Error type for received-CID list operations.
#[derive(Debug, Error)]
pub enum CidListError {
    /// IO error reading or writing a list file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Manages one append-only received-block list per channel.
///
/// Each list file holds one hex-encoded block id per line. An in-memory set
/// mirrors each file so duplicate appends are suppressed and reads never
/// touch disk.
pub struct CidLists {
    dir: PathBuf,
    lists: RwLock<HashMap<ChannelId, HashSet<ContentId>>>,
}

impl CidLists {
    /// Open the list directory, creating it if needed and loading any lists
    /// left by a previous run.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CidListError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut lists = HashMap::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(LIST_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Ok(chid) = stem.parse::<ChannelId>() else {
                warn!(file = %path.display(), "skipping unparseable cid list");
                continue;
            };
            lists.insert(chid, Self::load_list(&path)?);
        }

        Ok(Self {
            dir,
            lists: RwLock::new(lists),
        })
    }

    fn load_list(path: &PathBuf) -> Result<HashSet<ContentId>, CidListError> {
        let file = File::open(path)?;
        let mut cids = HashSet::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            match line.parse::<ContentId>() {
                Ok(cid) => {
                    cids.insert(cid);
                }
                Err(_) => warn!(file = %path.display(), "skipping unparseable cid entry"),
            }
        }
        Ok(cids)
    }

    fn list_path(&self, chid: &ChannelId) -> PathBuf {
        self.dir.join(format!("{chid}.{LIST_EXTENSION}"))
    }

    /// Append a block id to the channel's list.
    ///
    /// Each block id is recorded at most once; repeated appends are no-ops.
    pub fn append(&self, chid: ChannelId, cid: ContentId) -> Result<(), CidListError> {
        {
            let mut lists = self.lists.write();
            let list = lists.entry(chid).or_default();
            if !list.insert(cid) {
                return Ok(());
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.list_path(&chid))?;
        writeln!(file, "{cid}")?;
        Ok(())
    }

    /// All block ids received on the channel so far. No ordering guarantee.
    pub fn get(&self, chid: &ChannelId) -> Vec<ContentId> {
        self.lists
            .read()
            .get(chid)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of block ids recorded for the channel.
    pub fn len(&self, chid: &ChannelId) -> usize {
        self.lists.read().get(chid).map(HashSet::len).unwrap_or(0)
    }

    /// Delete the channel's list and its file.
    pub fn delete(&self, chid: &ChannelId) -> Result<(), CidListError> {
        self.lists.write().remove(chid);
        let path = self.list_path(chid);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
