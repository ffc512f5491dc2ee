//! Persistent book storage on RocksDB.
//!
//! Every mutation lands as a single `WriteBatch`, so a commit is all or
//! nothing. Read-validate-write sections (admission, cancellation,
//! settlement, round creation) serialize on the store's commit guard:
//! that is what makes the settlement claim and the admission window check
//! mutually exclusive against the same row.

use crate::errors::{StoreError, StoreResult};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Key layout of the book.
///
/// ```text
/// account:{id}                          -> Account
/// ledger:{account}:{inv_ts}{entry_id}   -> LedgerEntry   (newest first)
/// round:id:{id}                         -> Round
/// round:num:{number be}                 -> round id      (uniqueness)
/// round:current                         -> round id
/// match:id:{id}                         -> TossMatch
/// wager:id:{id}                         -> Wager
/// wager:target:{target}:{id}           -> wager id      (settlement scan)
/// wager:acct:{account}:{target}        -> wager id      (duplicate check)
/// ```
pub mod keys {
    use crate::types::Target;
    use chrono::{DateTime, Utc};

    pub const CURRENT_ROUND: &[u8] = b"round:current";

    pub fn account(id: &str) -> Vec<u8> {
        format!("account:{}", id).into_bytes()
    }

    pub fn ledger_prefix(account_id: &str) -> Vec<u8> {
        format!("ledger:{}:", account_id).into_bytes()
    }

    /// Newest-first ordering via an inverted millisecond timestamp, the
    /// entry id breaks ties.
    pub fn ledger_entry(account_id: &str, created_at: DateTime<Utc>, entry_id: &str) -> Vec<u8> {
        let inv_ts = u64::MAX - created_at.timestamp_millis().max(0) as u64;
        let mut key = ledger_prefix(account_id);
        key.extend_from_slice(&inv_ts.to_be_bytes());
        key.extend_from_slice(entry_id.as_bytes());
        key
    }

    pub fn round(id: &str) -> Vec<u8> {
        format!("round:id:{}", id).into_bytes()
    }

    pub fn round_number(number: u64) -> Vec<u8> {
        let mut key = b"round:num:".to_vec();
        key.extend_from_slice(&number.to_be_bytes());
        key
    }

    pub fn toss_match(id: &str) -> Vec<u8> {
        format!("match:id:{}", id).into_bytes()
    }

    pub fn wager(id: &str) -> Vec<u8> {
        format!("wager:id:{}", id).into_bytes()
    }

    pub fn wager_target_prefix(target: &Target) -> Vec<u8> {
        format!("wager:target:{}:", target.key()).into_bytes()
    }

    pub fn wager_target(target: &Target, wager_id: &str) -> Vec<u8> {
        let mut key = wager_target_prefix(target);
        key.extend_from_slice(wager_id.as_bytes());
        key
    }

    pub fn wager_account(account_id: &str, target: &Target) -> Vec<u8> {
        format!("wager:acct:{}:{}", account_id, target.key()).into_bytes()
    }
}

/// RocksDB-backed store shared by all engine components.
#[derive(Clone)]
pub struct BookStore {
    db: Arc<DB>,
    commit: Arc<Mutex<()>>,
}

impl BookStore {
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_write_buffer_size(64 * 1024 * 1024);
        opts.set_max_write_buffer_number(4);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path).map_err(|e| StoreError::Open(e.to_string()))?;
        Ok(Self {
            db: Arc::new(db),
            commit: Arc::new(Mutex::new(())),
        })
    }

    /// Enter a read-validate-write section. Held across the reads, the
    /// validation and the final `write`; dropped only after the batch
    /// landed or the operation bailed out.
    pub fn commit_guard(&self) -> MutexGuard<'_, ()> {
        self.commit.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        self.db.get(key).map_err(|e| StoreError::Read(e.to_string()))
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &[u8]) -> StoreResult<Option<T>> {
        let Some(bytes) = self.get(key)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt(format!("{}: {}", String::from_utf8_lossy(key), e)))
    }

    /// Stage a JSON record into a batch.
    pub fn put_json<T: Serialize>(batch: &mut WriteBatch, key: &[u8], value: &T) -> StoreResult<()> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| StoreError::Write(format!("serialize failed: {}", e)))?;
        batch.put(key, bytes);
        Ok(())
    }

    /// Commit a batch atomically.
    pub fn write(&self, batch: WriteBatch) -> StoreResult<()> {
        self.db.write(batch).map_err(|e| StoreError::Write(e.to_string()))
    }

    /// Scan keys under `prefix`, resuming strictly after `cursor` when one
    /// is given, returning at most `limit` rows. An iterator failure aborts
    /// the scan; a truncated result must never pass for a complete one.
    pub fn scan_prefix(
        &self,
        prefix: &[u8],
        cursor: Option<&[u8]>,
        limit: usize,
    ) -> StoreResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let start: &[u8] = cursor.unwrap_or(prefix);
        let mode = IteratorMode::From(start, Direction::Forward);
        let mut rows = Vec::new();

        for item in self.db.iterator(mode) {
            let (key, value) = item.map_err(|e| StoreError::Read(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            if let Some(cursor) = cursor {
                if key.as_ref() <= cursor {
                    continue;
                }
            }
            rows.push((key.to_vec(), value.to_vec()));
            if rows.len() >= limit {
                break;
            }
        }

        Ok(rows)
    }
}
