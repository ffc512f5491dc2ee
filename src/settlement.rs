//! Settlement of rounds and matches.
//!
//! A round is settled exactly once: the first caller past the cutoff
//! claims it inside the serialized commit section, draws the outcome and
//! commits round, wagers, entries and balances as one batch. Every later
//! caller observes the settled row and returns it without side effects,
//! so client timers can retry liberally.
//!
//! A match is a one-shot operator action instead: it declares its own
//! winner, may carry a corrected event time, and re-running it is an
//! error. Wagers placed after the (possibly corrected) cutoff were not
//! fair bets and are refunded in full regardless of the side they backed.

use crate::draw::DrawPolicy;
use crate::errors::{EngineError, EngineResult};
use crate::ledger::{signed_amount, Ledger};
use crate::registry::Registry;
use crate::store::{keys, BookStore};
use crate::types::{
    apply_bps, EntryReason, EntryRef, MatchStatus, Pick, Round, SettlementReport, Target,
    TossMatch, Wager, WagerStatus,
};
use chrono::{DateTime, Utc};
use rocksdb::WriteBatch;
use std::sync::Arc;
use tracing::{info, warn};

/// Conservation check over every wager on a target.
#[derive(Debug, Clone, Default)]
pub struct ConservationReport {
    pub total_staked: u64,
    pub total_paid_out: u64,
    pub total_refunded: u64,
}

impl ConservationReport {
    /// What the house kept: stakes minus everything credited back.
    pub fn house_retention(&self) -> i64 {
        self.total_staked as i64 - self.total_paid_out as i64 - self.total_refunded as i64
    }
}

#[derive(Clone)]
pub struct Settlement {
    store: BookStore,
    ledger: Ledger,
    registry: Registry,
    draw: Arc<dyn DrawPolicy>,
}

impl Settlement {
    pub fn new(
        store: BookStore,
        ledger: Ledger,
        registry: Registry,
        draw: Arc<dyn DrawPolicy>,
    ) -> Self {
        Self {
            store,
            ledger,
            registry,
            draw,
        }
    }

    /// All wagers recorded against a target, resolved or not.
    pub fn wagers_on(&self, target: &Target) -> EngineResult<Vec<Wager>> {
        let prefix = keys::wager_target_prefix(target);
        let mut wagers = Vec::new();
        let mut cursor: Option<Vec<u8>> = None;

        loop {
            let rows = self.store.scan_prefix(&prefix, cursor.as_deref(), 256)?;
            if rows.is_empty() {
                break;
            }
            for (key, value) in &rows {
                let wager_id = String::from_utf8_lossy(value);
                match self.store.get_json::<Wager>(&keys::wager(&wager_id))? {
                    Some(wager) => wagers.push(wager),
                    None => warn!(wager = %wager_id, "dangling wager index entry"),
                }
                cursor = Some(key.clone());
            }
        }

        Ok(wagers)
    }

    /// Settle a coin-flip round. Idempotent: the recorded result is
    /// returned to every caller after the first. The flag reports whether
    /// this call performed the commit.
    pub fn settle_round(&self, round_id: &str, now: DateTime<Utc>) -> EngineResult<(Round, bool)> {
        let _guard = self.store.commit_guard();

        let mut round = self
            .registry
            .round(round_id)?
            .ok_or_else(|| EngineError::InvalidTarget(round_id.to_string()))?;

        // Lost the claim race, or a late retry: no side effects.
        if round.settled {
            return Ok((round, false));
        }
        if now < round.ends_at {
            return Err(EngineError::RoundStillOpen);
        }

        // Claim and draw. The claim is the settled flag flipping inside
        // this serialized section; nothing after this point can race us.
        let outcome = self.draw.draw();
        round.outcome = Some(outcome);
        round.settled = true;
        round.settled_at = Some(now);

        let target = Target::Round(round.id.clone());
        let mut batch = WriteBatch::default();
        let mut won = 0usize;
        let mut lost = 0usize;

        for mut wager in self.wagers_on(&target)? {
            if wager.status != WagerStatus::Pending {
                continue;
            }
            let hit = matches!(wager.pick, Pick::Coin(side) if side == outcome);
            if hit {
                wager.status = WagerStatus::Won;
                wager.payout = apply_bps(wager.stake, wager.payout_bps);
                let mut account = self.ledger.load_or_new(&wager.account_id, now)?;
                self.ledger.stage_entry(
                    &mut batch,
                    &mut account,
                    signed_amount(wager.payout)?,
                    EntryReason::Payout,
                    EntryRef::Wager(wager.id.clone()),
                    now,
                )?;
                won += 1;
            } else {
                wager.status = WagerStatus::Lost;
                lost += 1;
            }
            BookStore::put_json(&mut batch, &keys::wager(&wager.id), &wager)?;
        }

        BookStore::put_json(&mut batch, &keys::round(&round.id), &round)?;
        self.store.write(batch)?;

        info!(
            round = %round.id,
            number = round.number,
            outcome = %outcome,
            won,
            lost,
            "round settled"
        );
        Ok((round, true))
    }

    /// One-shot operator settlement of a toss match. Wagers placed after
    /// the cutoff are neutralized with a full refund; eligible wagers
    /// settle against the declared winner at their locked multiplier.
    pub fn settle_match(
        &self,
        match_id: &str,
        winner: &str,
        corrected_event_time: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> EngineResult<SettlementReport> {
        let _guard = self.store.commit_guard();

        let mut toss = self
            .registry
            .toss_match(match_id)?
            .ok_or_else(|| EngineError::InvalidTarget(match_id.to_string()))?;
        if matches!(toss.status, MatchStatus::Completed | MatchStatus::Cancelled) {
            return Err(EngineError::AlreadySettled);
        }
        if !toss.has_side(winner) {
            return Err(EngineError::InvalidPick(format!(
                "'{}' is not a side of this match",
                winner
            )));
        }

        toss.event_corrected_at = corrected_event_time;
        let cutoff = toss.cutoff();

        let target = Target::Match(toss.id.clone());
        let mut batch = WriteBatch::default();
        let mut report = SettlementReport::default();

        for mut wager in self.wagers_on(&target)? {
            if wager.status != WagerStatus::Pending {
                continue;
            }
            report.total_staked += wager.stake;

            if wager.created_at > cutoff {
                // Placed after the real event: not a fair bet either way.
                wager.status = WagerStatus::Refunded;
                wager.payout = wager.stake;
                report.refunded += 1;
                report.total_refunded += wager.stake;
                self.stage_credit(&mut batch, &wager, EntryReason::Refund, now)?;
            } else if matches!(&wager.pick, Pick::Side(side) if side == winner) {
                wager.status = WagerStatus::Won;
                wager.payout = apply_bps(wager.stake, wager.payout_bps);
                report.won += 1;
                report.total_payout += wager.payout;
                self.stage_credit(&mut batch, &wager, EntryReason::Payout, now)?;
            } else {
                wager.status = WagerStatus::Lost;
                report.lost += 1;
            }
            BookStore::put_json(&mut batch, &keys::wager(&wager.id), &wager)?;
        }

        toss.status = MatchStatus::Completed;
        toss.winner = Some(winner.to_string());
        toss.settled_at = Some(now);
        BookStore::put_json(&mut batch, &keys::toss_match(&toss.id), &toss)?;
        self.store.write(batch)?;

        info!(
            toss_match = %toss.id,
            winner,
            cutoff = %cutoff,
            won = report.won,
            lost = report.lost,
            refunded = report.refunded,
            "match settled"
        );
        Ok(report)
    }

    /// Operator abort: refund every pending wager and close the match
    /// without a winner. Same one-shot guard as settlement.
    pub fn cancel_match(&self, match_id: &str, now: DateTime<Utc>) -> EngineResult<SettlementReport> {
        let _guard = self.store.commit_guard();

        let mut toss = self
            .registry
            .toss_match(match_id)?
            .ok_or_else(|| EngineError::InvalidTarget(match_id.to_string()))?;
        if matches!(toss.status, MatchStatus::Completed | MatchStatus::Cancelled) {
            return Err(EngineError::AlreadySettled);
        }

        let target = Target::Match(toss.id.clone());
        let mut batch = WriteBatch::default();
        let mut report = SettlementReport::default();

        for mut wager in self.wagers_on(&target)? {
            if wager.status != WagerStatus::Pending {
                continue;
            }
            wager.status = WagerStatus::Refunded;
            wager.payout = wager.stake;
            report.refunded += 1;
            report.total_staked += wager.stake;
            report.total_refunded += wager.stake;
            self.stage_credit(&mut batch, &wager, EntryReason::Refund, now)?;
            BookStore::put_json(&mut batch, &keys::wager(&wager.id), &wager)?;
        }

        toss.status = MatchStatus::Cancelled;
        toss.settled_at = Some(now);
        BookStore::put_json(&mut batch, &keys::toss_match(&toss.id), &toss)?;
        self.store.write(batch)?;

        info!(toss_match = %toss.id, refunded = report.refunded, "match cancelled");
        Ok(report)
    }

    fn stage_credit(
        &self,
        batch: &mut WriteBatch,
        wager: &Wager,
        reason: EntryReason,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let mut account = self.ledger.load_or_new(&wager.account_id, now)?;
        self.ledger.stage_entry(
            batch,
            &mut account,
            signed_amount(wager.payout)?,
            reason,
            EntryRef::Wager(wager.id.clone()),
            now,
        )?;
        Ok(())
    }

    /// Sum debits and credits over every wager on a settled target. For a
    /// settled round or match, stakes equal payouts plus refunds plus
    /// house retention.
    pub fn conservation(&self, target: &Target) -> EngineResult<ConservationReport> {
        let mut report = ConservationReport::default();
        for wager in self.wagers_on(target)? {
            report.total_staked += wager.stake;
            match wager.status {
                WagerStatus::Won => report.total_paid_out += wager.payout,
                WagerStatus::Refunded | WagerStatus::Cancelled => {
                    report.total_refunded += wager.payout
                }
                WagerStatus::Lost | WagerStatus::Pending => {}
            }
        }
        Ok(report)
    }
}
