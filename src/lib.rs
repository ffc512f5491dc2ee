//! tossbook - wagering round/match lifecycle and settlement ledger.
//!
//! The core of a real-money wagering book: a timed betting window per
//! coin-flip round, operator-managed toss matches, an append-only balance
//! ledger, and a settlement engine that resolves every pending wager
//! exactly once per round or match. Everything user-facing around it
//! (auth, profiles, tickets, charts) is an external collaborator.

pub mod admission;
pub mod config;
pub mod draw;
pub mod engine;
pub mod errors;
pub mod ledger;
pub mod notifier;
pub mod registry;
pub mod settlement;
pub mod store;
pub mod types;

pub use config::EngineConfig;
pub use engine::WagerEngine;
pub use errors::{EngineError, EngineResult};
pub use registry::MatchSpec;
pub use types::{
    CoinSide, MatchStatus, Pick, Round, RoundPhase, SettlementReport, Target, TossMatch, Wager,
    WagerStatus,
};
