//! End-to-end tests over the public engine API, including state
//! surviving a store reopen.

use std::sync::Arc;
use tempfile::TempDir;
use tossbook::config::EngineConfig;
use tossbook::draw::{DrawPolicy, FixedDraw};
use tossbook::engine::WagerEngine;
use tossbook::notifier::NullNotifier;
use tossbook::types::{CoinSide, Pick, Target, WagerStatus};
use tossbook::MatchSpec;

fn config_at(dir: &TempDir) -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.storage.data_dir = dir.path().to_string_lossy().to_string();
    cfg
}

fn open_engine(cfg: EngineConfig, draw: Arc<dyn DrawPolicy>) -> WagerEngine {
    WagerEngine::open_with(cfg, draw, Arc::new(NullNotifier)).expect("open engine")
}

#[tokio::test]
async fn test_book_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let cfg = config_at(&dir);

    let wager_id = {
        let engine = open_engine(cfg.clone(), Arc::new(FixedDraw(CoinSide::Heads)));
        engine.deposit("alice", 250).unwrap();

        let toss = engine
            .create_match(MatchSpec {
                sides: ["india".to_string(), "australia".to_string()],
                closes_at: chrono::Utc::now() + chrono::Duration::seconds(3_600),
                extra_time: None,
                max_stake: None,
            })
            .unwrap();
        engine.go_live(&toss.id).unwrap();

        let wager = engine
            .place_wager(
                "alice",
                Target::Match(toss.id.clone()),
                Pick::Side("india".to_string()),
                50,
            )
            .await
            .unwrap();
        wager.id
        // Engine dropped here; the database lock is released.
    };

    let engine = open_engine(cfg, Arc::new(FixedDraw(CoinSide::Heads)));
    assert_eq!(engine.balance("alice").unwrap(), 200);
    assert!(engine.audit_balance("alice").unwrap());

    let wager = engine.wager(&wager_id).unwrap().expect("wager persisted");
    assert_eq!(wager.status, WagerStatus::Pending);
    assert_eq!(wager.stake, 50);

    let (history, _) = engine.ledger_history("alice", None, 10).unwrap();
    assert_eq!(history.len(), 2); // deposit + stake debit
}

#[tokio::test]
async fn test_round_lifecycle_end_to_end() {
    let dir = TempDir::new().unwrap();
    let mut cfg = config_at(&dir);
    cfg.round.duration_secs = 1;
    cfg.round.closing_buffer_secs = 0;

    let engine = open_engine(cfg, Arc::new(FixedDraw(CoinSide::Heads)));
    engine.deposit("alice", 100).unwrap();
    engine.deposit("bob", 100).unwrap();

    let round = engine.get_or_create_current_round().unwrap();
    engine
        .place_wager(
            "alice",
            Target::Round(round.id.clone()),
            Pick::Coin(CoinSide::Heads),
            20,
        )
        .await
        .unwrap();
    engine
        .place_wager(
            "bob",
            Target::Round(round.id.clone()),
            Pick::Coin(CoinSide::Tails),
            20,
        )
        .await
        .unwrap();

    // Let the window pass, then settle from several tasks at once.
    tokio::time::sleep(tokio::time::Duration::from_millis(1_200)).await;

    let engine = Arc::new(engine);
    let mut handles = Vec::new();
    for _ in 0..4 {
        let engine = Arc::clone(&engine);
        let round_id = round.id.clone();
        handles.push(tokio::spawn(async move {
            engine.settle_round(&round_id).await.unwrap()
        }));
    }
    for handle in handles {
        let settled = handle.await.unwrap();
        assert_eq!(settled.outcome, Some(CoinSide::Heads));
    }

    // 20 * 1.95 = 39 exactly once, loser keeps the loss.
    assert_eq!(engine.balance("alice").unwrap(), 119);
    assert_eq!(engine.balance("bob").unwrap(), 80);
    assert!(engine.audit_balance("alice").unwrap());
    assert!(engine.audit_balance("bob").unwrap());

    let report = engine
        .conservation(&Target::Round(round.id.clone()))
        .unwrap();
    assert_eq!(report.total_staked, 40);
    assert_eq!(report.total_paid_out, 39);
    assert_eq!(report.house_retention(), 1);

    // The book rolls over to the next round on demand.
    let next = engine.get_or_create_current_round().unwrap();
    assert_eq!(next.number, round.number + 1);
}

#[tokio::test]
async fn test_match_cutoff_conserves_money() {
    let dir = TempDir::new().unwrap();
    let cfg = config_at(&dir);
    let engine = open_engine(cfg, Arc::new(FixedDraw(CoinSide::Heads)));

    for account in ["early-winner", "early-loser", "late"] {
        engine.deposit(account, 100).unwrap();
    }

    let now = chrono::Utc::now();
    let toss = engine
        .create_match(MatchSpec {
            sides: ["india".to_string(), "australia".to_string()],
            closes_at: now + chrono::Duration::seconds(3_600),
            extra_time: None,
            max_stake: None,
        })
        .unwrap();
    engine.go_live(&toss.id).unwrap();

    for (account, side) in [
        ("early-winner", "india"),
        ("early-loser", "australia"),
        ("late", "india"),
    ] {
        engine
            .place_wager(
                account,
                Target::Match(toss.id.clone()),
                Pick::Side(side.to_string()),
                40,
            )
            .await
            .unwrap();
    }

    // Corrected time falls after every placement, so all three settle.
    let report = engine
        .settle_match(&toss.id, "india", Some(chrono::Utc::now()))
        .await
        .unwrap();
    assert_eq!(report.won, 2);
    assert_eq!(report.lost, 1);
    assert_eq!(report.refunded, 0);

    let conservation = engine.conservation(&Target::Match(toss.id.clone())).unwrap();
    assert_eq!(conservation.total_staked, 120);
    assert_eq!(conservation.total_paid_out, 160); // two winners at 2x
    assert_eq!(conservation.house_retention(), -40);

    for account in ["early-winner", "early-loser", "late"] {
        assert!(engine.audit_balance(account).unwrap());
    }
    assert_eq!(engine.balance("early-winner").unwrap(), 140);
    assert_eq!(engine.balance("early-loser").unwrap(), 60);
    assert_eq!(engine.balance("late").unwrap(), 140);
}

#[tokio::test]
async fn test_retroactive_cutoff_refunds_late_wager() {
    let dir = TempDir::new().unwrap();
    let cfg = config_at(&dir);
    let engine = open_engine(cfg, Arc::new(FixedDraw(CoinSide::Heads)));

    engine.deposit("early", 100).unwrap();
    engine.deposit("late", 100).unwrap();

    let toss = engine
        .create_match(MatchSpec {
            sides: ["india".to_string(), "australia".to_string()],
            closes_at: chrono::Utc::now() + chrono::Duration::seconds(3_600),
            extra_time: None,
            max_stake: None,
        })
        .unwrap();
    engine.go_live(&toss.id).unwrap();

    engine
        .place_wager(
            "early",
            Target::Match(toss.id.clone()),
            Pick::Side("india".to_string()),
            40,
        )
        .await
        .unwrap();

    // The true event time falls between the two placements.
    let cutoff = chrono::Utc::now();
    tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;

    engine
        .place_wager(
            "late",
            Target::Match(toss.id.clone()),
            Pick::Side("india".to_string()),
            40,
        )
        .await
        .unwrap();

    let report = engine
        .settle_match(&toss.id, "india", Some(cutoff))
        .await
        .unwrap();
    assert_eq!(report.won, 1);
    assert_eq!(report.refunded, 1);
    assert_eq!(report.total_refunded, 40);

    // The late wager backed the winner and still only gets its stake back.
    assert_eq!(engine.balance("late").unwrap(), 100);
    assert_eq!(engine.balance("early").unwrap(), 140);
}
