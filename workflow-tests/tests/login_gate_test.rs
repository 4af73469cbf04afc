//! Login Gate Workflow Tests
//!
//! Drives the full engine through the login decision tree: strangers,
//! privileged players, bans, cached grants, linked re-verification and the
//! legacy allow-list migration path.

mod common;

use guildgate_core::models::IdentityRecord;
use guildgate_core::services::LoginDecision;
use uuid::Uuid;
use workflow_tests::{AuditKind, Enforcement, GateHarness, MemberRole};

fn linked(player_id: Uuid, name: &str, community_id: u64, has_access: bool) -> IdentityRecord {
    let mut record = IdentityRecord::with_name(player_id, name);
    record.community_id = Some(community_id);
    record.has_access = has_access;
    record
}

/// Test: a never-seen player is declined with the application message.
#[tokio::test]
async fn stranger_is_denied_with_application_message() {
    let harness = common::setup().await;
    let player = Uuid::new_v4();

    let decision = harness.login(player, "Frodo").await;
    let LoginDecision::Deny {
        message,
        revoke_local_grant,
    } = decision
    else {
        panic!("stranger must be denied, got {:?}", decision);
    };
    assert_eq!(message, harness.engine.settings.application_message());
    assert!(!revoke_local_grant);

    // Being declined leaves no trace; the player was never admitted.
    assert!(harness.engine.cache.get(player).is_none());
    harness.engine.shutdown().await;
}

/// Test: privileged players bypass every rule, including an active ban.
#[tokio::test]
async fn privileged_login_bypasses_even_bans() {
    let harness = GateHarness::new().await.unwrap();
    let player = Uuid::new_v4();
    harness
        .engine
        .admin
        .ban("ops", player, "griefing", None)
        .unwrap();

    let decision = harness.privileged_login(player, "Operator").await;
    assert_eq!(decision, LoginDecision::Allow);

    // The same player without the flag stays out.
    let decision = harness.login(player, "Operator").await;
    assert!(matches!(decision, LoginDecision::Deny { .. }));
}

/// Test: an active ban denies with the stored reason even while the bridge
/// is down.
#[tokio::test]
async fn banned_player_is_denied_while_bridge_is_down() {
    let harness = GateHarness::new().await.unwrap();
    let player = Uuid::new_v4();
    harness
        .engine
        .admin
        .whitelist_add("ops", player, Some("Sam"))
        .unwrap();
    harness
        .engine
        .admin
        .ban("ops", player, "multiboxing", None)
        .unwrap();

    let LoginDecision::Deny { message, .. } = harness.login(player, "Sam").await else {
        panic!("banned player must be denied");
    };
    assert!(message.contains("multiboxing"));
}

/// Test: a cached grant admits immediately with no remote dependency.
#[tokio::test]
async fn cached_grant_allows_with_bridge_stopped() {
    let harness = GateHarness::new().await.unwrap();
    let player = Uuid::new_v4();
    harness
        .engine
        .admin
        .whitelist_add("ops", player, Some("Bilbo"))
        .unwrap();

    assert_eq!(harness.login(player, "Bilbo").await, LoginDecision::Allow);
}

/// Test: a linked player without access is re-granted on live role proof,
/// and the first_allow event is recorded exactly once.
#[tokio::test]
async fn linked_player_regains_access_on_role_proof() {
    let harness = common::setup().await;
    let player = Uuid::new_v4();
    harness.engine.cache.upsert(linked(player, "Merry", 42, false));
    harness.connector.set_member(42, MemberRole::Holds);

    assert_eq!(harness.login(player, "Merry").await, LoginDecision::Allow);
    assert!(harness.engine.cache.get(player).unwrap().has_access);

    // The second login takes the cached path.
    assert_eq!(harness.login(player, "Merry").await, LoginDecision::Allow);
    let first_allows = harness
        .audit_kinds_for(player)
        .into_iter()
        .filter(|k| *k == AuditKind::FirstAllow)
        .count();
    assert_eq!(first_allows, 1);
}

/// Test: a linked player stays out while their role cannot be verified.
#[tokio::test]
async fn unverifiable_link_stays_denied() {
    let harness = common::setup().await;
    let player = Uuid::new_v4();
    harness.engine.cache.upsert(linked(player, "Pippin", 43, false));
    harness.connector.set_fail_lookups(true);

    let LoginDecision::Deny { message, .. } = harness.login(player, "Pippin").await else {
        panic!("unverifiable link must not be granted");
    };
    assert_eq!(message, harness.engine.settings.application_message());
    assert!(!harness.engine.cache.get(player).unwrap().has_access);
}

/// Test: the legacy allow-list path denies with a link code and records one
/// legacy_kick no matter how often the player retries.
#[tokio::test]
async fn legacy_grant_is_superseded_with_link_token() {
    let harness = common::setup().await;
    let player = Uuid::new_v4();

    let LoginDecision::Deny {
        message,
        revoke_local_grant,
    } = harness.legacy_login(player, "Fatty").await
    else {
        panic!("legacy grant must be denied in active enforcement");
    };
    assert!(revoke_local_grant);
    let code = harness.issued_code_for(player).expect("token issued");
    assert!(message.contains(&code));

    // Retrying reuses the outstanding token and adds no second audit event.
    let LoginDecision::Deny {
        message: retry_message,
        ..
    } = harness.legacy_login(player, "Fatty").await
    else {
        panic!("retry must still be denied");
    };
    assert!(retry_message.contains(&code));
    assert_eq!(harness.audit_kinds_for(player), vec![AuditKind::LegacyKick]);
}

/// Test: dry run lets legacy players stay while still issuing their token.
#[tokio::test]
async fn dry_run_keeps_legacy_players_in() {
    let harness = GateHarness::with_enforcement(Enforcement::DryRun)
        .await
        .unwrap();
    harness.start_bridge().await.unwrap();
    let player = Uuid::new_v4();

    assert_eq!(
        harness.legacy_login(player, "Folco").await,
        LoginDecision::Allow
    );
    assert!(harness.issued_code_for(player).is_some());
    assert_eq!(harness.audit_kinds_for(player), vec![AuditKind::LegacyKick]);
}

/// Test: enforcement off admits everyone, bans included; the host's native
/// ban list is expected to cover that case.
#[tokio::test]
async fn enforcement_off_admits_everyone() {
    let harness = GateHarness::with_enforcement(Enforcement::Off)
        .await
        .unwrap();

    let stranger = Uuid::new_v4();
    assert_eq!(harness.login(stranger, "Anyone").await, LoginDecision::Allow);

    let banned = Uuid::new_v4();
    harness.engine.admin.ban("ops", banned, "spam", None).unwrap();
    assert_eq!(harness.login(banned, "Spammer").await, LoginDecision::Allow);
}

/// Test: a display name change on login is reconciled into the cache and
/// audited; the decision is unaffected.
#[tokio::test]
async fn display_name_change_is_reconciled() {
    let harness = common::setup().await;
    let player = Uuid::new_v4();
    harness
        .engine
        .admin
        .whitelist_add("ops", player, Some("OldName"))
        .unwrap();

    assert_eq!(harness.login(player, "NewName").await, LoginDecision::Allow);

    let record = harness.engine.cache.get(player).unwrap();
    assert_eq!(record.player_name.as_deref(), Some("NewName"));
    let renamed = harness
        .engine
        .cache
        .events_for_player(player)
        .into_iter()
        .any(|e| {
            e.kind == AuditKind::NameChanged && e.message == "name changed: OldName -> NewName"
        });
    assert!(renamed);
}
