//! Join Flow Workflow Tests
//!
//! Covers the post-join evaluation: the link nudge for unlinked players,
//! role refreshes for linked ones, and how dry run changes what the player
//! experiences without changing what the cache records.

mod common;

use guildgate_core::models::IdentityRecord;
use guildgate_core::services::{JoinAttempt, JoinOutcome};
use uuid::Uuid;
use workflow_tests::{AuditKind, Enforcement, GateHarness, MemberRole};

fn linked(player_id: Uuid, name: &str, community_id: u64, has_access: bool) -> IdentityRecord {
    let mut record = IdentityRecord::with_name(player_id, name);
    record.community_id = Some(community_id);
    record.has_access = has_access;
    record
}

/// Test: an unlinked player gets a link notice carrying a redeemable code.
#[tokio::test]
async fn unlinked_player_gets_link_code_on_join() {
    let harness = common::setup().await;
    let player = Uuid::new_v4();

    let JoinOutcome::Notice(text) = harness.join(player, "Frodo").await else {
        panic!("unlinked join must produce a notice");
    };
    let code = harness.issued_code_for(player).expect("token issued");
    assert!(text.contains(&code));
    assert!(text.contains("Link your community account"));
}

/// Test: the dry-run join notice is gentler but carries the same code.
#[tokio::test]
async fn dry_run_join_notice_is_gentle() {
    let harness = GateHarness::with_enforcement(Enforcement::DryRun)
        .await
        .unwrap();
    harness.start_bridge().await.unwrap();
    let player = Uuid::new_v4();

    let JoinOutcome::Notice(text) = harness.join(player, "Sam").await else {
        panic!("unlinked join must produce a notice");
    };
    assert!(text.contains("moving to community-linked access"));
    let code = harness.issued_code_for(player).unwrap();
    assert!(text.contains(&code));
}

/// Test: a linked member holding the role is welcomed and granted on their
/// first join; later joins are silent.
#[tokio::test]
async fn join_refresh_grants_on_role_proof() {
    let harness = common::setup().await;
    let player = Uuid::new_v4();
    harness.engine.cache.upsert(linked(player, "Merry", 50, false));
    harness.connector.set_member(50, MemberRole::Holds);

    let outcome = harness.join(player, "Merry").await;
    assert_eq!(
        outcome,
        JoinOutcome::Notice("Community role verified. Welcome!".to_string())
    );
    assert!(harness.engine.cache.get(player).unwrap().has_access);

    assert_eq!(harness.join(player, "Merry").await, JoinOutcome::Silent);
}

/// Test: losing the role disconnects in active enforcement and revokes the
/// cached access.
#[tokio::test]
async fn join_refresh_disconnects_on_missing_role() {
    let harness = common::setup().await;
    let player = Uuid::new_v4();
    harness.engine.cache.upsert(linked(player, "Pippin", 51, true));
    harness.connector.set_member(51, MemberRole::Lacks);

    let JoinOutcome::Disconnect(reason) = harness.join(player, "Pippin").await else {
        panic!("missing role must disconnect in active enforcement");
    };
    assert!(reason.contains("community role is missing"));
    assert!(!harness.engine.cache.get(player).unwrap().has_access);
    assert_eq!(
        harness.audit_kinds_for(player),
        vec![AuditKind::AccessRevoked]
    );
}

/// Test: dry run suppresses the disconnect but the revocation still lands
/// in cache and ledger.
#[tokio::test]
async fn dry_run_join_revocation_is_silent_but_recorded() {
    let harness = GateHarness::with_enforcement(Enforcement::DryRun)
        .await
        .unwrap();
    harness.start_bridge().await.unwrap();
    let player = Uuid::new_v4();
    harness.engine.cache.upsert(linked(player, "Boromir", 52, true));
    harness.connector.set_member(52, MemberRole::Lacks);

    assert_eq!(harness.join(player, "Boromir").await, JoinOutcome::Silent);
    assert!(!harness.engine.cache.get(player).unwrap().has_access);
    assert_eq!(
        harness.audit_kinds_for(player),
        vec![AuditKind::AccessRevoked]
    );
}

/// Test: leaving the community group revokes with its own audit trail and
/// wording.
#[tokio::test]
async fn join_refresh_revokes_when_player_left_group() {
    let harness = common::setup().await;
    let player = Uuid::new_v4();
    harness.engine.cache.upsert(linked(player, "Gollum", 53, true));
    // No member scripted at 53: the remote answer is "not in group".

    let JoinOutcome::Disconnect(reason) = harness.join(player, "Gollum").await else {
        panic!("departed member must disconnect in active enforcement");
    };
    assert!(reason.contains("you left the community"));
    assert_eq!(
        harness.audit_kinds_for(player),
        vec![AuditKind::LeftCommunity]
    );
}

/// Test: remote outage never kicks a player with cached access.
#[tokio::test]
async fn join_outage_keeps_cached_access() {
    let harness = common::setup().await;
    let player = Uuid::new_v4();
    harness.engine.cache.upsert(linked(player, "Gimli", 54, true));
    harness.connector.set_fail_lookups(true);

    let JoinOutcome::Notice(text) = harness.join(player, "Gimli").await else {
        panic!("outage must degrade to a notice, not a kick");
    };
    assert!(text.contains("temporarily unavailable"));
    assert!(harness.engine.cache.get(player).unwrap().has_access);
    assert!(harness.audit_kinds_for(player).is_empty());
}

/// Test: privileged unlinked players are nudged to link but never gated.
#[tokio::test]
async fn privileged_join_gets_link_nudge() {
    let harness = common::setup().await;
    let player = Uuid::new_v4();

    let outcome = harness
        .engine
        .gate
        .decide_join(JoinAttempt {
            player_id: player,
            player_name: "Operator".to_string(),
            privileged: true,
        })
        .await;
    let JoinOutcome::Notice(text) = outcome else {
        panic!("unlinked operator should get the link nudge");
    };
    assert!(text.contains("links accounts"));

    // Once linked, operators join without chatter.
    let linked_operator = Uuid::new_v4();
    harness
        .engine
        .cache
        .upsert(linked(linked_operator, "SeniorOp", 55, true));
    let outcome = harness
        .engine
        .gate
        .decide_join(JoinAttempt {
            player_id: linked_operator,
            player_name: "SeniorOp".to_string(),
            privileged: true,
        })
        .await;
    assert_eq!(outcome, JoinOutcome::Silent);
}
