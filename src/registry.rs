//! Round and match registry.
//!
//! Rounds repeat on a fixed duration and are created lazily: the first
//! caller past the previous round's end rolls the book over to the next
//! round number. Creation runs under the store's commit guard against a
//! uniqueness key on the round number, so concurrent creators converge on
//! the same row. Matches are operator-driven and only admit while live.

use crate::config::{MatchConfig, RoundConfig};
use crate::errors::{EngineError, EngineResult, StoreResult};
use crate::store::{keys, BookStore};
use crate::types::{MatchStatus, Round, TossMatch};
use chrono::{DateTime, Duration, Utc};
use rocksdb::WriteBatch;
use tracing::info;
use uuid::Uuid;

/// Operator request to open a new toss match.
#[derive(Debug, Clone)]
pub struct MatchSpec {
    pub sides: [String; 2],
    pub closes_at: DateTime<Utc>,
    pub extra_time: Option<DateTime<Utc>>,
    /// Per-match stake ceiling; falls back to the configured default.
    pub max_stake: Option<u64>,
}

#[derive(Clone)]
pub struct Registry {
    store: BookStore,
}

impl Registry {
    pub fn new(store: BookStore) -> Self {
        Self { store }
    }

    pub fn round(&self, round_id: &str) -> StoreResult<Option<Round>> {
        self.store.get_json(&keys::round(round_id))
    }

    pub fn current_round(&self) -> StoreResult<Option<Round>> {
        let Some(id) = self.store.get(keys::CURRENT_ROUND)? else {
            return Ok(None);
        };
        self.round(&String::from_utf8_lossy(&id))
    }

    /// Return the open round, rolling over to a fresh one when the
    /// previous window has passed. Concurrent callers converge on the same
    /// row: the round number is claimed under the commit guard.
    pub fn get_or_create_current_round(
        &self,
        now: DateTime<Utc>,
        cfg: &RoundConfig,
    ) -> EngineResult<Round> {
        let _guard = self.store.commit_guard();

        let previous = self.current_round()?;
        if let Some(round) = &previous {
            if round.admits(now) {
                return Ok(round.clone());
            }
        }

        let next_number = previous.map(|r| r.number + 1).unwrap_or(1);

        // A concurrent creator may have claimed this number already; if
        // so, its row is the current round.
        if let Some(existing_id) = self.store.get(&keys::round_number(next_number))? {
            if let Some(existing) = self.round(&String::from_utf8_lossy(&existing_id))? {
                return Ok(existing);
            }
        }

        let round = Round {
            id: Uuid::new_v4().to_string(),
            number: next_number,
            starts_at: now,
            ends_at: now + Duration::seconds(cfg.duration_secs as i64),
            outcome: None,
            settled: false,
            settled_at: None,
        };

        let mut batch = WriteBatch::default();
        BookStore::put_json(&mut batch, &keys::round(&round.id), &round)?;
        batch.put(keys::round_number(round.number), round.id.as_bytes());
        batch.put(keys::CURRENT_ROUND, round.id.as_bytes());
        self.store.write(batch)?;

        info!(round = %round.id, number = round.number, ends_at = %round.ends_at, "round opened");
        Ok(round)
    }

    pub fn toss_match(&self, match_id: &str) -> StoreResult<Option<TossMatch>> {
        self.store.get_json(&keys::toss_match(match_id))
    }

    /// Open a new match in `Upcoming`; admission starts at `go_live`.
    pub fn create_match(
        &self,
        spec: MatchSpec,
        defaults: &MatchConfig,
        now: DateTime<Utc>,
    ) -> EngineResult<TossMatch> {
        if spec.sides[0] == spec.sides[1] {
            return Err(EngineError::InvalidPick(format!(
                "match sides must differ, got '{}' twice",
                spec.sides[0]
            )));
        }

        let toss = TossMatch {
            id: Uuid::new_v4().to_string(),
            sides: spec.sides,
            status: MatchStatus::Upcoming,
            closes_at: spec.closes_at,
            extra_time: spec.extra_time,
            event_corrected_at: None,
            winner: None,
            max_stake: spec.max_stake.unwrap_or(defaults.max_stake),
            payout_bps: defaults.payout_bps,
            extra_payout_bps: defaults.extra_payout_bps,
            created_at: now,
            settled_at: None,
        };

        let _guard = self.store.commit_guard();
        let mut batch = WriteBatch::default();
        BookStore::put_json(&mut batch, &keys::toss_match(&toss.id), &toss)?;
        self.store.write(batch)?;

        info!(toss_match = %toss.id, closes_at = %toss.closes_at, "match created");
        Ok(toss)
    }

    /// Operator transition `Upcoming -> Live`. Idempotent for an already
    /// live match; a finished match is rejected.
    pub fn go_live(&self, match_id: &str) -> EngineResult<TossMatch> {
        let _guard = self.store.commit_guard();
        let mut toss = self
            .toss_match(match_id)?
            .ok_or_else(|| EngineError::InvalidTarget(match_id.to_string()))?;

        match toss.status {
            MatchStatus::Live => return Ok(toss),
            MatchStatus::Completed | MatchStatus::Cancelled => {
                return Err(EngineError::AlreadySettled)
            }
            MatchStatus::Upcoming => {}
        }

        toss.status = MatchStatus::Live;
        let mut batch = WriteBatch::default();
        BookStore::put_json(&mut batch, &keys::toss_match(&toss.id), &toss)?;
        self.store.write(batch)?;

        info!(toss_match = %toss.id, "match live");
        Ok(toss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn open_registry() -> (TempDir, Registry) {
        let dir = TempDir::new().unwrap();
        let store = BookStore::open(dir.path()).unwrap();
        (dir, Registry::new(store))
    }

    fn round_cfg() -> RoundConfig {
        RoundConfig {
            duration_secs: 15,
            closing_buffer_secs: 2,
            payout_bps: 19_500,
            heads_bps: 5_000,
        }
    }

    #[test]
    fn test_first_round_is_number_one() {
        let (_dir, registry) = open_registry();

        let round = registry.get_or_create_current_round(t(0), &round_cfg()).unwrap();
        assert_eq!(round.number, 1);
        assert_eq!(round.starts_at, t(0));
        assert_eq!(round.ends_at, t(15));
    }

    #[test]
    fn test_open_round_is_returned_not_recreated() {
        let (_dir, registry) = open_registry();
        let cfg = round_cfg();

        let first = registry.get_or_create_current_round(t(0), &cfg).unwrap();
        let again = registry.get_or_create_current_round(t(5), &cfg).unwrap();
        assert_eq!(first.id, again.id);
    }

    #[test]
    fn test_rollover_increments_number() {
        let (_dir, registry) = open_registry();
        let cfg = round_cfg();

        let first = registry.get_or_create_current_round(t(0), &cfg).unwrap();
        let second = registry.get_or_create_current_round(t(20), &cfg).unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(second.number, 2);
        assert_eq!(second.starts_at, t(20));
    }

    #[test]
    fn test_concurrent_creation_converges() {
        let (_dir, registry) = open_registry();
        let registry = Arc::new(registry);
        let cfg = round_cfg();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let cfg = cfg.clone();
            handles.push(std::thread::spawn(move || {
                registry.get_or_create_current_round(t(0), &cfg).unwrap()
            }));
        }

        let rounds: Vec<Round> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let ids: std::collections::HashSet<_> = rounds.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids.len(), 1);
        assert!(rounds.iter().all(|r| r.number == 1));
    }

    #[test]
    fn test_match_lifecycle() {
        let (_dir, registry) = open_registry();
        let defaults = MatchConfig {
            payout_bps: 20_000,
            extra_payout_bps: 15_000,
            max_stake: 500,
        };

        let spec = MatchSpec {
            sides: ["india".to_string(), "australia".to_string()],
            closes_at: t(100),
            extra_time: None,
            max_stake: None,
        };
        let toss = registry.create_match(spec, &defaults, t(0)).unwrap();
        assert_eq!(toss.status, MatchStatus::Upcoming);
        assert_eq!(toss.max_stake, 500);

        let live = registry.go_live(&toss.id).unwrap();
        assert_eq!(live.status, MatchStatus::Live);
        // Idempotent while live.
        assert_eq!(registry.go_live(&toss.id).unwrap().status, MatchStatus::Live);
    }

    #[test]
    fn test_match_with_equal_sides_rejected() {
        let (_dir, registry) = open_registry();
        let spec = MatchSpec {
            sides: ["india".to_string(), "india".to_string()],
            closes_at: t(100),
            extra_time: None,
            max_stake: None,
        };
        let err = registry
            .create_match(spec, &MatchConfig::default(), t(0))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidPick(_)));
    }

    #[test]
    fn test_go_live_unknown_match() {
        let (_dir, registry) = open_registry();
        assert!(matches!(
            registry.go_live("missing"),
            Err(EngineError::InvalidTarget(_))
        ));
    }
}
