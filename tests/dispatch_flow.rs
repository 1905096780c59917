//! End-to-end dispatch flows on the in-memory store: escalation through
//! rejects and expiries, accept races, exhaustion, and reopen.

use std::sync::Arc;

use rooftop::config::DispatchConfig;
use rooftop::dispatch::{DispatchEngine, RoundOutcome};
use rooftop::domain::{AssignmentStatus, OfferStatus};
use rooftop::error::RooftopError;
use rooftop::notify::LogNotifier;
use rooftop::selector::PoolSelector;
use rooftop::store::{AssignmentStore, MemoryStore, OfferStore};

fn engine_with_pool(pool: &[&str], candidates_per_round: usize) -> (Arc<MemoryStore>, DispatchEngine) {
    let store = Arc::new(MemoryStore::new());
    let config = DispatchConfig {
        offer_ttl_secs: 300,
        candidates_per_round,
        sweep_interval_secs: 1,
        sweep_batch_size: 100,
        selector_max_retries: 1,
        selector_backoff_ms: 1,
    };
    let engine = DispatchEngine::new(
        store.clone(),
        store.clone(),
        Arc::new(PoolSelector::new(
            pool.iter().map(|s| s.to_string()).collect(),
        )),
        Arc::new(LogNotifier),
        config,
    );
    (store, engine)
}

async fn sole_pending_offer(store: &MemoryStore, property_id: &str) -> rooftop::domain::Offer {
    let pending = store.pending_for_property(property_id).await.unwrap();
    assert_eq!(pending.len(), 1, "expected exactly one open offer");
    pending.into_iter().next().unwrap()
}

#[tokio::test]
async fn reject_then_expiry_then_accept_walks_the_pool() {
    let (store, engine) = engine_with_pool(&["agent-a", "agent-b", "agent-c"], 1);

    let outcome = engine.dispatcher.dispatch_property("prop-1").await.unwrap();
    assert!(matches!(
        outcome,
        RoundOutcome::OffersCreated { round: 1, .. }
    ));

    // Round 1: agent-a declines, dispatch escalates to agent-b.
    let offer_a = sole_pending_offer(&store, "prop-1").await;
    assert_eq!(offer_a.agent_id, "agent-a");
    engine
        .coordinator
        .reject(offer_a.offer_id, "agent-a", Some("too far out"))
        .await
        .unwrap();

    let offer_b = sole_pending_offer(&store, "prop-1").await;
    assert_eq!(offer_b.agent_id, "agent-b");
    assert_eq!(offer_b.round, 2);

    // Round 2: agent-b never responds; the sweep settles the expiry and
    // escalates to agent-c.
    store
        .rewind_deadline(offer_b.offer_id, chrono::Duration::minutes(6))
        .await;
    engine.monitor.run_sweep_and_settle().await.unwrap();

    let expired = store.offer_snapshot(offer_b.offer_id).await.unwrap();
    assert_eq!(expired.status, OfferStatus::Expired);

    let offer_c = sole_pending_offer(&store, "prop-1").await;
    assert_eq!(offer_c.agent_id, "agent-c");
    assert_eq!(offer_c.round, 3);

    // Round 3: agent-c takes it.
    engine
        .coordinator
        .accept(offer_c.offer_id, "agent-c")
        .await
        .unwrap();

    let record = store.get("prop-1").await.unwrap().unwrap();
    assert_eq!(record.status, AssignmentStatus::Assigned);
    assert_eq!(record.assigned_agent_id.as_deref(), Some("agent-c"));
    assert!(record.is_excluded("agent-a"));
    assert!(record.is_excluded("agent-b"));
}

#[tokio::test]
async fn broadcast_round_admits_exactly_one_winner() {
    let (store, engine) = engine_with_pool(&["agent-a", "agent-b", "agent-c"], 3);

    engine.dispatcher.dispatch_property("prop-1").await.unwrap();
    let pending = store.pending_for_property("prop-1").await.unwrap();
    assert_eq!(pending.len(), 3);

    let mut handles = Vec::new();
    for offer in &pending {
        let coordinator = engine.coordinator.clone();
        let offer_id = offer.offer_id;
        let agent_id = offer.agent_id.clone();
        handles.push(tokio::spawn(async move {
            coordinator.accept(offer_id, &agent_id).await
        }));
    }

    let mut wins = 0;
    let mut losses = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => wins += 1,
            Err(e) if e.is_already_resolved() => losses += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(losses, 2);

    let record = store.get("prop-1").await.unwrap().unwrap();
    assert_eq!(record.status, AssignmentStatus::Assigned);
    let winner = record.assigned_agent_id.clone().unwrap();

    // No offer other than the winner's is left open or accepted.
    for offer in store.offers_for_round("prop-1", 1).await.unwrap() {
        let stored = store.offer_snapshot(offer.offer_id).await.unwrap();
        if stored.agent_id == winner {
            assert_eq!(stored.status, OfferStatus::Accepted);
        } else {
            assert_eq!(stored.status, OfferStatus::Superseded);
        }
    }
}

#[tokio::test]
async fn pool_runs_dry_and_reopen_restarts_dispatch() {
    let (store, engine) = engine_with_pool(&["agent-a"], 1);

    engine.dispatcher.dispatch_property("prop-1").await.unwrap();
    let offer = sole_pending_offer(&store, "prop-1").await;
    engine
        .coordinator
        .reject(offer.offer_id, "agent-a", None)
        .await
        .unwrap();

    let record = store.get("prop-1").await.unwrap().unwrap();
    assert_eq!(record.status, AssignmentStatus::Exhausted);

    // Further dispatch attempts bounce off the terminal state.
    let err = engine
        .dispatcher
        .dispatch_property("prop-1")
        .await
        .unwrap_err();
    assert!(matches!(err, RooftopError::InvalidState { .. }));

    // Operator reopen clears the exclusion set so agent-a is eligible again.
    assert!(store.reopen_exhausted("prop-1").await.unwrap());
    let outcome = engine.dispatcher.dispatch_property("prop-1").await.unwrap();
    match outcome {
        RoundOutcome::OffersCreated { round, agent_ids } => {
            assert_eq!(round, 1);
            assert_eq!(agent_ids, vec!["agent-a".to_string()]);
        }
        other => panic!("expected a fresh round, got {other:?}"),
    }
}

#[tokio::test]
async fn duplicate_dispatch_trigger_is_a_noop() {
    let (store, engine) = engine_with_pool(&["agent-a", "agent-b"], 1);

    engine.dispatcher.dispatch_property("prop-1").await.unwrap();
    let outcome = engine.dispatcher.dispatch_property("prop-1").await.unwrap();
    assert!(matches!(outcome, RoundOutcome::AlreadyOpen));

    // Still exactly one open offer, still round 1.
    let offer = sole_pending_offer(&store, "prop-1").await;
    assert_eq!(offer.round, 1);
    let record = store.get("prop-1").await.unwrap().unwrap();
    assert_eq!(record.current_round, 1);
}

#[tokio::test]
async fn overdue_accept_is_refused_and_escalates() {
    let (store, engine) = engine_with_pool(&["agent-a", "agent-b"], 1);

    engine.dispatcher.dispatch_property("prop-1").await.unwrap();
    let offer = sole_pending_offer(&store, "prop-1").await;
    store
        .rewind_deadline(offer.offer_id, chrono::Duration::minutes(6))
        .await;

    // The deadline passed but the sweep has not run yet; the accept must
    // still be refused and settled as an expiry.
    let err = engine
        .coordinator
        .accept(offer.offer_id, "agent-a")
        .await
        .unwrap_err();
    assert!(err.is_already_resolved());

    let settled = store.offer_snapshot(offer.offer_id).await.unwrap();
    assert_eq!(settled.status, OfferStatus::Expired);

    let next = sole_pending_offer(&store, "prop-1").await;
    assert_eq!(next.agent_id, "agent-b");
    assert_eq!(next.round, 2);
}

#[tokio::test]
async fn sweep_after_restart_settles_offers_from_previous_process() {
    let (store, engine) = engine_with_pool(&["agent-a", "agent-b"], 1);

    engine.dispatcher.dispatch_property("prop-1").await.unwrap();
    let offer = sole_pending_offer(&store, "prop-1").await;
    store
        .rewind_deadline(offer.offer_id, chrono::Duration::minutes(10))
        .await;
    drop(engine);

    // A fresh engine over the same store stands in for a restarted process:
    // the deadline lives in the store, so the new sweep finds it.
    let config = DispatchConfig {
        offer_ttl_secs: 300,
        candidates_per_round: 1,
        sweep_interval_secs: 1,
        sweep_batch_size: 100,
        selector_max_retries: 1,
        selector_backoff_ms: 1,
    };
    let fresh = DispatchEngine::new(
        store.clone(),
        store.clone(),
        Arc::new(PoolSelector::new(vec![
            "agent-a".to_string(),
            "agent-b".to_string(),
        ])),
        Arc::new(LogNotifier),
        config,
    );
    fresh.monitor.run_sweep_and_settle().await.unwrap();

    let settled = store.offer_snapshot(offer.offer_id).await.unwrap();
    assert_eq!(settled.status, OfferStatus::Expired);

    let next = sole_pending_offer(&store, "prop-1").await;
    assert_eq!(next.agent_id, "agent-b");
    assert_eq!(next.round, 2);
}
