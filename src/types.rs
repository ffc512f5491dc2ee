use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Basis points denominator: 10_000 bps = 1.0x.
pub const BPS_SCALE: u32 = 10_000;

/// Apply a basis-point multiplier to a stake, rounding down.
pub fn apply_bps(stake: u64, bps: u32) -> u64 {
    (stake as u128 * bps as u128 / BPS_SCALE as u128) as u64
}

/// Side of the coin-flip draw.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CoinSide {
    Heads,
    Tails,
}

impl fmt::Display for CoinSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoinSide::Heads => write!(f, "heads"),
            CoinSide::Tails => write!(f, "tails"),
        }
    }
}

/// What a wager is placed on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Target {
    Round(String),
    Match(String),
}

impl Target {
    /// Stable key fragment used in storage indexes.
    pub fn key(&self) -> String {
        match self {
            Target::Round(id) => format!("round:{}", id),
            Target::Match(id) => format!("match:{}", id),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Target::Round(id) | Target::Match(id) => id,
        }
    }
}

/// The outcome a wager is backing: a coin side for rounds, a named side
/// for toss matches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Pick {
    Coin(CoinSide),
    Side(String),
}

impl fmt::Display for Pick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pick::Coin(side) => write!(f, "{}", side),
            Pick::Side(label) => write!(f, "{}", label),
        }
    }
}

/// Why a ledger entry exists.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EntryReason {
    Stake,
    Payout,
    Refund,
    Deposit,
    Withdrawal,
}

/// What a ledger entry points back at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum EntryRef {
    Wager(String),
    Round(String),
    Match(String),
    External,
}

/// Immutable signed balance mutation. The only way balances change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub account_id: String,
    /// Signed minor units: negative for debits, positive for credits.
    pub amount: i64,
    pub reason: EntryReason,
    pub reference: EntryRef,
    pub created_at: DateTime<Utc>,
}

/// Cached wallet state. The balance is derived from ledger entries and is
/// only ever written in the same batch as the entry that moved it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub balance: i64,
    pub updated_at: DateTime<Utc>,
}

/// Phase of a coin-flip round relative to a point in time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoundPhase {
    /// Admitting wagers.
    Open,
    /// Final buffer before the cutoff; UI should stop admitting, the
    /// authoritative cutoff is still `ends_at`.
    Closing,
    /// Past `ends_at`, waiting for settlement.
    Locked,
    Settled,
}

/// A repeating fixed-duration coin-flip betting opportunity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    pub id: String,
    /// Sequential and unique across the lifetime of the book.
    pub number: u64,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub outcome: Option<CoinSide>,
    pub settled: bool,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Round {
    pub fn phase(&self, now: DateTime<Utc>, closing_buffer_secs: u64) -> RoundPhase {
        if self.settled {
            return RoundPhase::Settled;
        }
        if now >= self.ends_at {
            return RoundPhase::Locked;
        }
        let buffer = chrono::Duration::seconds(closing_buffer_secs as i64);
        if now >= self.ends_at - buffer {
            RoundPhase::Closing
        } else {
            RoundPhase::Open
        }
    }

    /// Admission cutoff check. `Closing` still admits; only `ends_at` is
    /// authoritative.
    pub fn admits(&self, now: DateTime<Utc>) -> bool {
        !self.settled && now < self.ends_at
    }
}

/// Operator-driven lifecycle of a toss match.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    Upcoming,
    Live,
    Completed,
    Cancelled,
}

/// An operator-managed toss-betting opportunity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TossMatch {
    pub id: String,
    /// The two sides wagers may back, e.g. team names.
    pub sides: [String; 2],
    pub status: MatchStatus,
    /// Advertised admission cutoff.
    pub closes_at: DateTime<Utc>,
    /// Optional extended-admission cutoff; wagers admitted after
    /// `closes_at` but before this get the extended multiplier.
    pub extra_time: Option<DateTime<Utc>>,
    /// True event time supplied by the operator at settlement when it
    /// differs from `closes_at`. Wagers placed after it are refunded.
    pub event_corrected_at: Option<DateTime<Utc>>,
    pub winner: Option<String>,
    pub max_stake: u64,
    pub payout_bps: u32,
    pub extra_payout_bps: u32,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl TossMatch {
    pub fn has_side(&self, label: &str) -> bool {
        self.sides.iter().any(|s| s == label)
    }

    /// Multiplier in force at `now`, or `None` when the match is not
    /// admitting.
    pub fn admission_bps(&self, now: DateTime<Utc>) -> Option<u32> {
        if self.status != MatchStatus::Live {
            return None;
        }
        if now < self.closes_at {
            return Some(self.payout_bps);
        }
        match self.extra_time {
            Some(extra) if now < extra => Some(self.extra_payout_bps),
            _ => None,
        }
    }

    /// The settlement cutoff: the corrected event time when the operator
    /// supplied one, the advertised close otherwise.
    pub fn cutoff(&self) -> DateTime<Utc> {
        self.event_corrected_at.unwrap_or(self.closes_at)
    }
}

/// Status of a single stake. Leaves `Pending` at most once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WagerStatus {
    Pending,
    Won,
    Lost,
    Refunded,
    Cancelled,
}

/// A single stake placed by an account on an outcome of a round or match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wager {
    pub id: String,
    pub account_id: String,
    pub target: Target,
    pub pick: Pick,
    pub stake: u64,
    /// Multiplier locked in at admission; a corrected cutoff never
    /// re-prices an eligible wager.
    pub payout_bps: u32,
    pub status: WagerStatus,
    /// Set at settlement: gross credit for a win, stake for a refund,
    /// zero otherwise.
    pub payout: u64,
    pub created_at: DateTime<Utc>,
}

/// Summary returned by match settlement and cancellation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettlementReport {
    pub won: usize,
    pub lost: usize,
    pub refunded: usize,
    pub total_staked: u64,
    pub total_payout: u64,
    pub total_refunded: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_apply_bps() {
        assert_eq!(apply_bps(20, 19_500), 39);
        assert_eq!(apply_bps(100, 20_000), 200);
        assert_eq!(apply_bps(3, 19_500), 5); // rounds down from 5.85
        assert_eq!(apply_bps(0, 19_500), 0);
    }

    #[test]
    fn test_round_phases() {
        let round = Round {
            id: "r1".to_string(),
            number: 1,
            starts_at: t(0),
            ends_at: t(15),
            outcome: None,
            settled: false,
            settled_at: None,
        };

        assert_eq!(round.phase(t(5), 2), RoundPhase::Open);
        assert_eq!(round.phase(t(14), 2), RoundPhase::Closing);
        assert_eq!(round.phase(t(15), 2), RoundPhase::Locked);

        // Closing still admits; the hard cutoff is ends_at.
        assert!(round.admits(t(14)));
        assert!(!round.admits(t(15)));
    }

    #[test]
    fn test_settled_round_phase() {
        let round = Round {
            id: "r1".to_string(),
            number: 1,
            starts_at: t(0),
            ends_at: t(15),
            outcome: Some(CoinSide::Heads),
            settled: true,
            settled_at: Some(t(16)),
        };
        assert_eq!(round.phase(t(20), 2), RoundPhase::Settled);
        assert!(!round.admits(t(5)));
    }

    #[test]
    fn test_match_admission_bps() {
        let mut m = TossMatch {
            id: "m1".to_string(),
            sides: ["india".to_string(), "australia".to_string()],
            status: MatchStatus::Live,
            closes_at: t(100),
            extra_time: Some(t(160)),
            event_corrected_at: None,
            winner: None,
            max_stake: 1_000,
            payout_bps: 20_000,
            extra_payout_bps: 15_000,
            created_at: t(0),
            settled_at: None,
        };

        assert_eq!(m.admission_bps(t(50)), Some(20_000));
        assert_eq!(m.admission_bps(t(120)), Some(15_000));
        assert_eq!(m.admission_bps(t(160)), None);

        m.status = MatchStatus::Upcoming;
        assert_eq!(m.admission_bps(t(50)), None);
    }

    #[test]
    fn test_match_cutoff_prefers_correction() {
        let m = TossMatch {
            id: "m1".to_string(),
            sides: ["a".to_string(), "b".to_string()],
            status: MatchStatus::Live,
            closes_at: t(100),
            extra_time: None,
            event_corrected_at: Some(t(80)),
            winner: None,
            max_stake: 0,
            payout_bps: 20_000,
            extra_payout_bps: 20_000,
            created_at: t(0),
            settled_at: None,
        };
        assert_eq!(m.cutoff(), t(80));
    }

    #[test]
    fn test_target_key() {
        assert_eq!(Target::Round("r1".to_string()).key(), "round:r1");
        assert_eq!(Target::Match("m1".to_string()).key(), "match:m1");
    }
}
