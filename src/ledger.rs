//! Append-only balance ledger.
//!
//! Entries are the single source of truth for wallet balances; the cached
//! balance on the account row is written in the same batch as the entry
//! that moved it and never anywhere else. `derived_balance` recomputes the
//! sum from entries for audits.

use crate::errors::{EngineError, EngineResult, StoreError, StoreResult};
use crate::store::{keys, BookStore};
use crate::types::{Account, EntryReason, EntryRef, LedgerEntry};
use chrono::{DateTime, Utc};
use rocksdb::WriteBatch;
use tracing::debug;
use uuid::Uuid;

/// Convert a wire amount into the ledger's signed representation.
/// Anything that cannot carry a sign without wrapping never reaches an
/// entry.
pub(crate) fn signed_amount(amount: u64) -> EngineResult<i64> {
    i64::try_from(amount).map_err(|_| EngineError::AmountOutOfRange { amount })
}

#[derive(Clone)]
pub struct Ledger {
    store: BookStore,
}

impl Ledger {
    pub fn new(store: BookStore) -> Self {
        Self { store }
    }

    pub fn account(&self, account_id: &str) -> StoreResult<Option<Account>> {
        self.store.get_json(&keys::account(account_id))
    }

    /// Load an account, or a zero-balance one for first use.
    pub fn load_or_new(&self, account_id: &str, now: DateTime<Utc>) -> StoreResult<Account> {
        Ok(self.account(account_id)?.unwrap_or(Account {
            id: account_id.to_string(),
            balance: 0,
            updated_at: now,
        }))
    }

    /// Cached balance; zero for an account with no entries.
    pub fn balance(&self, account_id: &str) -> StoreResult<i64> {
        Ok(self.account(account_id)?.map(|a| a.balance).unwrap_or(0))
    }

    /// Stage one entry and the moved balance into `batch`. The caller owns
    /// the commit guard and the loaded account row; at most one staged
    /// entry per account per batch.
    pub fn stage_entry(
        &self,
        batch: &mut WriteBatch,
        account: &mut Account,
        amount: i64,
        reason: EntryReason,
        reference: EntryRef,
        now: DateTime<Utc>,
    ) -> StoreResult<LedgerEntry> {
        let entry = LedgerEntry {
            id: Uuid::new_v4().to_string(),
            account_id: account.id.clone(),
            amount,
            reason,
            reference,
            created_at: now,
        };

        account.balance += amount;
        account.updated_at = now;

        BookStore::put_json(batch, &keys::ledger_entry(&account.id, now, &entry.id), &entry)?;
        BookStore::put_json(batch, &keys::account(&account.id), account)?;

        debug!(
            account = %account.id,
            amount,
            reason = ?reason,
            balance = account.balance,
            "ledger entry staged"
        );
        Ok(entry)
    }

    /// Credit an account at the funding boundary. The payment rail itself
    /// lives outside the core.
    pub fn deposit(&self, account_id: &str, amount: u64, now: DateTime<Utc>) -> EngineResult<Account> {
        let amount = signed_amount(amount)?;
        let _guard = self.store.commit_guard();
        let mut account = self.load_or_new(account_id, now)?;
        let mut batch = WriteBatch::default();
        self.stage_entry(
            &mut batch,
            &mut account,
            amount,
            EntryReason::Deposit,
            EntryRef::External,
            now,
        )?;
        self.store.write(batch)?;
        Ok(account)
    }

    /// Debit an account at the funding boundary; fails when the balance
    /// does not cover the amount.
    pub fn withdraw(&self, account_id: &str, amount: u64, now: DateTime<Utc>) -> EngineResult<Account> {
        let amount = signed_amount(amount)?;
        let _guard = self.store.commit_guard();
        let mut account = self.load_or_new(account_id, now)?;
        if account.balance < amount {
            return Err(EngineError::InsufficientBalance {
                have: account.balance,
                need: amount,
            });
        }
        let mut batch = WriteBatch::default();
        self.stage_entry(
            &mut batch,
            &mut account,
            -amount,
            EntryReason::Withdrawal,
            EntryRef::External,
            now,
        )?;
        self.store.write(batch)?;
        Ok(account)
    }

    /// Newest-first page of entries with a hex cursor for the next page.
    pub fn history(
        &self,
        account_id: &str,
        cursor_hex: Option<&str>,
        limit: usize,
    ) -> StoreResult<(Vec<LedgerEntry>, Option<String>)> {
        let cursor_bytes = match cursor_hex {
            Some(c) => Some(
                hex::decode(c)
                    .map_err(|e| StoreError::Corrupt(format!("invalid cursor hex: {}", e)))?,
            ),
            None => None,
        };

        let prefix = keys::ledger_prefix(account_id);
        let rows = self
            .store
            .scan_prefix(&prefix, cursor_bytes.as_deref(), limit.max(1))?;

        let mut entries = Vec::with_capacity(rows.len());
        let mut next_cursor = None;
        for (key, value) in rows {
            let entry: LedgerEntry = serde_json::from_slice(&value)
                .map_err(|e| StoreError::Corrupt(format!("ledger entry decode: {}", e)))?;
            next_cursor = Some(hex::encode(&key));
            entries.push(entry);
        }

        Ok((entries, next_cursor))
    }

    /// Recompute the balance from entries; the audit counterpart of the
    /// cached value.
    pub fn derived_balance(&self, account_id: &str) -> StoreResult<i64> {
        let prefix = keys::ledger_prefix(account_id);
        let mut sum = 0i64;
        let mut cursor: Option<Vec<u8>> = None;

        loop {
            let rows = self.store.scan_prefix(&prefix, cursor.as_deref(), 256)?;
            if rows.is_empty() {
                break;
            }
            for (key, value) in &rows {
                let entry: LedgerEntry = serde_json::from_slice(value)
                    .map_err(|e| StoreError::Corrupt(format!("ledger entry decode: {}", e)))?;
                sum += entry.amount;
                cursor = Some(key.clone());
            }
        }

        Ok(sum)
    }
}
