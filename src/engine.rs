//! The wagering engine facade.
//!
//! Wires the ledger, registry, admission controller and settlement engine
//! over one shared store, stamps wall-clock time onto every operation and
//! informs the notifier after commits. This is the surface the UI layer
//! consumes.

use crate::admission::Admission;
use crate::config::EngineConfig;
use crate::draw::{DrawPolicy, WeightedDraw};
use crate::errors::{EngineError, EngineResult};
use crate::ledger::Ledger;
use crate::notifier::{BookEvent, Notifier, NullNotifier, SharedNotifier};
use crate::registry::{MatchSpec, Registry};
use crate::settlement::{ConservationReport, Settlement};
use crate::store::BookStore;
use crate::types::{
    Account, LedgerEntry, Pick, Round, RoundPhase, SettlementReport, Target, TossMatch, Wager,
};
use chrono::Utc;
use std::sync::Arc;

pub struct WagerEngine {
    cfg: EngineConfig,
    ledger: Ledger,
    registry: Registry,
    admission: Admission,
    settlement: Settlement,
    notifier: SharedNotifier,
}

impl WagerEngine {
    /// Open the book at the configured data directory with the weighted
    /// draw from the config and no notifier.
    pub fn open(cfg: EngineConfig) -> EngineResult<Self> {
        let draw = Arc::new(WeightedDraw::new(cfg.round.heads_bps));
        Self::open_with(cfg, draw, Arc::new(NullNotifier))
    }

    /// Open with an injected draw policy and notifier.
    pub fn open_with(
        cfg: EngineConfig,
        draw: Arc<dyn DrawPolicy>,
        notifier: SharedNotifier,
    ) -> EngineResult<Self> {
        let store = BookStore::open(&cfg.storage.data_dir)?;
        Ok(Self::with_store(cfg, store, draw, notifier))
    }

    /// Assemble the engine over an already-open store.
    pub fn with_store(
        cfg: EngineConfig,
        store: BookStore,
        draw: Arc<dyn DrawPolicy>,
        notifier: SharedNotifier,
    ) -> Self {
        let ledger = Ledger::new(store.clone());
        let registry = Registry::new(store.clone());
        let admission = Admission::new(store.clone(), ledger.clone(), registry.clone());
        let settlement = Settlement::new(store, ledger.clone(), registry.clone(), draw);
        Self {
            cfg,
            ledger,
            registry,
            admission,
            settlement,
            notifier,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    // --- Rounds ---

    pub fn get_or_create_current_round(&self) -> EngineResult<Round> {
        self.registry
            .get_or_create_current_round(Utc::now(), &self.cfg.round)
    }

    pub fn round(&self, round_id: &str) -> EngineResult<Option<Round>> {
        Ok(self.registry.round(round_id)?)
    }

    /// One tick of the round loop: settle the stored current round if its
    /// window has locked, then roll the book over to a fresh round. The
    /// rollover must come second, otherwise the elapsed round is replaced
    /// before anyone settles it and its wagers stay pending forever.
    /// Returns the round settled on this tick (if any) and the open round.
    pub async fn advance_rounds(&self) -> EngineResult<(Option<Round>, Round)> {
        let mut settled = None;
        if let Some(current) = self.registry.current_round()? {
            if !current.settled && self.round_phase(&current) == RoundPhase::Locked {
                match self.settle_round(&current.id).await {
                    Ok(round) => settled = Some(round),
                    // Clock skew between the phase read and the settlement
                    // stamp; the next tick gets it.
                    Err(EngineError::RoundStillOpen) => {}
                    Err(e) => return Err(e),
                }
            }
        }
        let open = self.get_or_create_current_round()?;
        Ok((settled, open))
    }

    /// Phase as the UI should render it right now, including the closing
    /// buffer before the hard cutoff.
    pub fn round_phase(&self, round: &Round) -> RoundPhase {
        round.phase(Utc::now(), self.cfg.round.closing_buffer_secs)
    }

    pub async fn settle_round(&self, round_id: &str) -> EngineResult<Round> {
        let (round, claimed) = self.settlement.settle_round(round_id, Utc::now())?;
        if claimed {
            self.notifier
                .publish(BookEvent::RoundSettled { round: round.clone() })
                .await;
        }
        Ok(round)
    }

    // --- Matches ---

    pub fn create_match(&self, spec: MatchSpec) -> EngineResult<TossMatch> {
        self.registry
            .create_match(spec, &self.cfg.match_rules, Utc::now())
    }

    pub fn go_live(&self, match_id: &str) -> EngineResult<TossMatch> {
        self.registry.go_live(match_id)
    }

    pub fn toss_match(&self, match_id: &str) -> EngineResult<Option<TossMatch>> {
        Ok(self.registry.toss_match(match_id)?)
    }

    pub async fn settle_match(
        &self,
        match_id: &str,
        winner: &str,
        corrected_event_time: Option<chrono::DateTime<Utc>>,
    ) -> EngineResult<SettlementReport> {
        let report =
            self.settlement
                .settle_match(match_id, winner, corrected_event_time, Utc::now())?;
        if let Some(toss) = self.registry.toss_match(match_id)? {
            self.notifier
                .publish(BookEvent::MatchSettled {
                    toss_match: toss,
                    report: report.clone(),
                })
                .await;
        }
        Ok(report)
    }

    pub async fn cancel_match(&self, match_id: &str) -> EngineResult<SettlementReport> {
        let report = self.settlement.cancel_match(match_id, Utc::now())?;
        if let Some(toss) = self.registry.toss_match(match_id)? {
            self.notifier
                .publish(BookEvent::MatchSettled {
                    toss_match: toss,
                    report: report.clone(),
                })
                .await;
        }
        Ok(report)
    }

    // --- Wagers ---

    pub async fn place_wager(
        &self,
        account_id: &str,
        target: Target,
        pick: Pick,
        stake: u64,
    ) -> EngineResult<Wager> {
        let wager = self
            .admission
            .place_wager(account_id, target, pick, stake, Utc::now(), &self.cfg)?;
        self.notifier
            .publish(BookEvent::WagerPlaced { wager: wager.clone() })
            .await;
        Ok(wager)
    }

    pub fn cancel_wager(&self, wager_id: &str) -> EngineResult<Wager> {
        self.admission.cancel_wager(wager_id, Utc::now())
    }

    pub fn wager(&self, wager_id: &str) -> EngineResult<Option<Wager>> {
        self.admission.wager(wager_id)
    }

    // --- Accounts ---

    pub fn balance(&self, account_id: &str) -> EngineResult<i64> {
        Ok(self.ledger.balance(account_id)?)
    }

    pub fn deposit(&self, account_id: &str, amount: u64) -> EngineResult<Account> {
        self.ledger.deposit(account_id, amount, Utc::now())
    }

    pub fn withdraw(&self, account_id: &str, amount: u64) -> EngineResult<Account> {
        self.ledger.withdraw(account_id, amount, Utc::now())
    }

    pub fn ledger_history(
        &self,
        account_id: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> EngineResult<(Vec<LedgerEntry>, Option<String>)> {
        Ok(self.ledger.history(account_id, cursor, limit)?)
    }

    // --- Audits ---

    pub fn conservation(&self, target: &Target) -> EngineResult<ConservationReport> {
        self.settlement.conservation(target)
    }

    /// Check the cached balance against the sum of ledger entries.
    pub fn audit_balance(&self, account_id: &str) -> EngineResult<bool> {
        let cached = self.ledger.balance(account_id)?;
        let derived = self.ledger.derived_balance(account_id)?;
        Ok(cached == derived)
    }
}
