//! # VaultDb: Command Journal & State Snapshots
//!
//! The persistence layer for the coordinator, built on sled's embedded
//! key-value store. The engine applies one command at a time; after each
//! applied command the node writes the command (journal) and the resulting
//! state (snapshot) here.
//!
//! ## Tree Layout
//!
//! | Tree        | Key              | Value                  |
//! |-------------|------------------|------------------------|
//! | `journal`   | `seq` (8B BE)    | `bincode(entry)`       |
//! | `snapshots` | `seq` (8B BE)    | `bincode(state)`       |
//! | `metadata`  | key (UTF-8)      | value (bytes)          |
//!
//! Sequence numbers are stored big-endian so sled's lexicographic ordering
//! matches numeric ordering and "latest" is simply the last key.
//!
//! ## Atomicity
//!
//! [`VaultDb::commit`] writes the journal entry, the snapshot and the
//! latest-sequence marker in one multi-tree sled transaction. After a crash
//! either the command and its resulting state are both on disk or neither
//! is.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("sequence {got} does not follow latest {latest}")]
    OutOfOrder { latest: u64, got: u64 },

    #[error("transaction aborted")]
    Aborted,
}

pub type DbResult<T> = Result<T, DbError>;

/// Well-known key in the `metadata` tree for the latest committed sequence.
const META_LATEST_SEQUENCE: &[u8] = b"latest_sequence";

fn decode_seq(bytes: &[u8]) -> DbResult<u64> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| DbError::Serialization("invalid sequence bytes".to_string()))?;
    Ok(u64::from_be_bytes(array))
}

// ---------------------------------------------------------------------------
// VaultDb
// ---------------------------------------------------------------------------

/// Persistent journal and snapshot store.
///
/// Cheap to clone; sled handles are reference counted and thread-safe.
#[derive(Debug, Clone)]
pub struct VaultDb {
    db: Db,
    journal: Tree,
    snapshots: Tree,
    metadata: Tree,
}

impl VaultDb {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary database removed when the handle is dropped.
    pub fn open_temporary() -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let journal = db.open_tree("journal")?;
        let snapshots = db.open_tree("snapshots")?;
        let metadata = db.open_tree("metadata")?;
        Ok(Self {
            db,
            journal,
            snapshots,
            metadata,
        })
    }

    /// Latest committed sequence number, if any.
    pub fn latest_sequence(&self) -> DbResult<Option<u64>> {
        match self.metadata.get(META_LATEST_SEQUENCE)? {
            Some(bytes) => Ok(Some(decode_seq(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Atomically appends `entry` to the journal and stores `snapshot` as
    /// the state after it.
    ///
    /// `seq` must be exactly one past the latest committed sequence (or `0`
    /// on an empty database).
    pub fn commit<E: Serialize, S: Serialize>(
        &self,
        seq: u64,
        entry: &E,
        snapshot: &S,
    ) -> DbResult<()> {
        let expected = match self.latest_sequence()? {
            Some(latest) => latest + 1,
            None => 0,
        };
        if seq != expected {
            return Err(DbError::OutOfOrder {
                latest: expected.saturating_sub(1),
                got: seq,
            });
        }

        let key = seq.to_be_bytes().to_vec();
        let entry_bytes =
            bincode::serialize(entry).map_err(|e| DbError::Serialization(e.to_string()))?;
        let snapshot_bytes =
            bincode::serialize(snapshot).map_err(|e| DbError::Serialization(e.to_string()))?;

        let result: Result<(), TransactionError<()>> =
            (&self.journal, &self.snapshots, &self.metadata).transaction(
                |(journal, snapshots, metadata)| {
                    journal.insert(key.clone(), entry_bytes.clone())?;
                    snapshots.insert(key.clone(), snapshot_bytes.clone())?;
                    metadata.insert(META_LATEST_SEQUENCE, key.clone())?;
                    Ok::<(), ConflictableTransactionError<()>>(())
                },
            );

        match result {
            Ok(()) => {}
            Err(TransactionError::Storage(e)) => return Err(DbError::Sled(e)),
            Err(TransactionError::Abort(())) => return Err(DbError::Aborted),
        }

        self.db.flush()?;
        Ok(())
    }

    /// The most recent snapshot together with its sequence number.
    pub fn load_latest<S: DeserializeOwned>(&self) -> DbResult<Option<(u64, S)>> {
        let seq = match self.latest_sequence()? {
            Some(seq) => seq,
            None => return Ok(None),
        };
        match self.snapshots.get(seq.to_be_bytes())? {
            Some(bytes) => {
                let state = bincode::deserialize(&bytes)
                    .map_err(|e| DbError::Serialization(e.to_string()))?;
                Ok(Some((seq, state)))
            }
            None => Ok(None),
        }
    }

    /// A single journal entry.
    pub fn journal_entry<E: DeserializeOwned>(&self, seq: u64) -> DbResult<Option<E>> {
        match self.journal.get(seq.to_be_bytes())? {
            Some(bytes) => {
                let entry = bincode::deserialize(&bytes)
                    .map_err(|e| DbError::Serialization(e.to_string()))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }

    /// Number of journal entries.
    pub fn journal_len(&self) -> usize {
        self.journal.len()
    }

    /// Number of stored snapshots.
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.len()
    }

    /// Drops all but the newest `keep` snapshots. The journal is never
    /// pruned; it is the authoritative history.
    pub fn prune_snapshots(&self, keep: usize) -> DbResult<usize> {
        let total = self.snapshots.len();
        if total <= keep {
            return Ok(0);
        }
        let excess = total - keep;
        let mut removed = 0;
        for item in self.snapshots.iter().take(excess) {
            let (key, _) = item?;
            self.snapshots.remove(key)?;
            removed += 1;
        }
        tracing::debug!(removed, kept = keep, "pruned snapshots");
        Ok(removed)
    }

    /// Force a flush of all pending writes to disk.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
