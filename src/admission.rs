//! Admission of new wagers and player-initiated cancellation.
//!
//! A wager and its stake debit land in a single batch: neither can exist
//! without the other. The whole check-and-commit runs under the store's
//! commit guard, so admission cannot slip in after settlement has claimed
//! the same round or match.

use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::ledger::{signed_amount, Ledger};
use crate::registry::Registry;
use crate::store::{keys, BookStore};
use crate::types::{
    EntryReason, EntryRef, MatchStatus, Pick, Target, Wager, WagerStatus,
};
use chrono::{DateTime, Utc};
use rocksdb::WriteBatch;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct Admission {
    store: BookStore,
    ledger: Ledger,
    registry: Registry,
}

impl Admission {
    pub fn new(store: BookStore, ledger: Ledger, registry: Registry) -> Self {
        Self {
            store,
            ledger,
            registry,
        }
    }

    pub fn wager(&self, wager_id: &str) -> EngineResult<Option<Wager>> {
        Ok(self.store.get_json(&keys::wager(wager_id))?)
    }

    /// Admit a wager against the target's current window and debit the
    /// stake, atomically.
    pub fn place_wager(
        &self,
        account_id: &str,
        target: Target,
        pick: Pick,
        stake: u64,
        now: DateTime<Utc>,
        cfg: &EngineConfig,
    ) -> EngineResult<Wager> {
        let _guard = self.store.commit_guard();

        // Resolve the target and the multiplier in force right now.
        let payout_bps = match &target {
            Target::Round(id) => {
                let round = self
                    .registry
                    .round(id)?
                    .ok_or_else(|| EngineError::InvalidTarget(id.clone()))?;
                if !matches!(pick, Pick::Coin(_)) {
                    return Err(EngineError::InvalidPick(
                        "round wagers pick a coin side".to_string(),
                    ));
                }
                if !round.admits(now) {
                    return Err(EngineError::WindowClosed);
                }
                cfg.round.payout_bps
            }
            Target::Match(id) => {
                let toss = self
                    .registry
                    .toss_match(id)?
                    .ok_or_else(|| EngineError::InvalidTarget(id.clone()))?;
                let Pick::Side(label) = &pick else {
                    return Err(EngineError::InvalidPick(
                        "match wagers pick a named side".to_string(),
                    ));
                };
                if !toss.has_side(label) {
                    return Err(EngineError::InvalidPick(format!(
                        "'{}' is not a side of this match",
                        label
                    )));
                }
                let bps = toss
                    .admission_bps(now)
                    .ok_or(EngineError::WindowClosed)?;
                if stake > toss.max_stake {
                    return Err(EngineError::AboveMaximumStake {
                        stake,
                        max: toss.max_stake,
                    });
                }
                bps
            }
        };

        if stake < cfg.stakes.min_stake {
            return Err(EngineError::BelowMinimumStake {
                stake,
                min: cfg.stakes.min_stake,
            });
        }

        // One active wager per account per target.
        if self
            .store
            .get(&keys::wager_account(account_id, &target))?
            .is_some()
        {
            return Err(EngineError::DuplicateWager);
        }

        let stake_signed = signed_amount(stake)?;
        let mut account = self.ledger.load_or_new(account_id, now)?;
        if account.balance < stake_signed {
            return Err(EngineError::InsufficientBalance {
                have: account.balance,
                need: stake_signed,
            });
        }

        let wager = Wager {
            id: Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            target: target.clone(),
            pick,
            stake,
            payout_bps,
            status: WagerStatus::Pending,
            payout: 0,
            created_at: now,
        };

        let mut batch = WriteBatch::default();
        BookStore::put_json(&mut batch, &keys::wager(&wager.id), &wager)?;
        batch.put(keys::wager_target(&target, &wager.id), wager.id.as_bytes());
        batch.put(keys::wager_account(account_id, &target), wager.id.as_bytes());
        self.ledger.stage_entry(
            &mut batch,
            &mut account,
            -stake_signed,
            EntryReason::Stake,
            EntryRef::Wager(wager.id.clone()),
            now,
        )?;
        self.store.write(batch)?;

        info!(
            wager = %wager.id,
            account = %account_id,
            target = %target.key(),
            stake,
            "wager admitted"
        );
        Ok(wager)
    }

    /// Reverse a pending wager while its window is still open. The only
    /// player-initiated reversal; racing settlement resolves to
    /// `AlreadySettled`, never a double refund.
    pub fn cancel_wager(&self, wager_id: &str, now: DateTime<Utc>) -> EngineResult<Wager> {
        let _guard = self.store.commit_guard();

        let mut wager = self
            .wager(wager_id)?
            .ok_or_else(|| EngineError::InvalidTarget(wager_id.to_string()))?;
        if wager.status != WagerStatus::Pending {
            return Err(EngineError::AlreadySettled);
        }

        let admitting = match &wager.target {
            Target::Round(id) => {
                let round = self
                    .registry
                    .round(id)?
                    .ok_or_else(|| EngineError::InvalidTarget(id.clone()))?;
                if round.settled {
                    return Err(EngineError::AlreadySettled);
                }
                round.admits(now)
            }
            Target::Match(id) => {
                let toss = self
                    .registry
                    .toss_match(id)?
                    .ok_or_else(|| EngineError::InvalidTarget(id.clone()))?;
                if matches!(toss.status, MatchStatus::Completed | MatchStatus::Cancelled) {
                    return Err(EngineError::AlreadySettled);
                }
                toss.admission_bps(now).is_some()
            }
        };
        if !admitting {
            return Err(EngineError::WindowClosed);
        }

        wager.status = WagerStatus::Cancelled;
        wager.payout = wager.stake;

        let mut account = self.ledger.load_or_new(&wager.account_id, now)?;
        let mut batch = WriteBatch::default();
        BookStore::put_json(&mut batch, &keys::wager(&wager.id), &wager)?;
        // Frees the one-wager-per-target slot.
        batch.delete(keys::wager_account(&wager.account_id, &wager.target));
        self.ledger.stage_entry(
            &mut batch,
            &mut account,
            signed_amount(wager.stake)?,
            EntryReason::Refund,
            EntryRef::Wager(wager.id.clone()),
            now,
        )?;
        self.store.write(batch)?;

        info!(wager = %wager.id, account = %wager.account_id, "wager cancelled");
        Ok(wager)
    }
}
