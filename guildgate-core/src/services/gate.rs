//! The permission gate - every login and join decision comes from here.
//!
//! Decisions are cache-first: the cached record answers immediately and at
//! most one bounded remote role check runs per decision, only where a cached
//! answer is missing or needs refreshing. The gate never returns an error to
//! the connection path; remote trouble degrades to the cached state or to a
//! conservative denial.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::config::{Enforcement, Settings};
use crate::error::GateError;
use crate::hooks::HookHub;
use crate::models::{AuditEvent, AuditKind, IdentityRecord};
use crate::services::audit::AuditSink;
use crate::services::bridge::{RoleCheck, RoleStatus};
use crate::services::cache::CacheStore;
use crate::services::tokens::LinkTokenService;

/// Everything known about a player at the login gate.
#[derive(Debug, Clone)]
pub struct LoginAttempt {
    pub player_id: Uuid,
    pub player_name: String,
    /// Operator or configured admin; bypasses every rule including bans.
    pub privileged: bool,
    /// The host's superseded allow-list still grants this player.
    pub legacy_granted: bool,
}

#[derive(Debug, Clone)]
pub struct JoinAttempt {
    pub player_id: Uuid,
    pub player_name: String,
    pub privileged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginDecision {
    Allow,
    AllowWithNotice(String),
    Deny {
        message: String,
        /// The host should also drop the player from its legacy allow-list.
        revoke_local_grant: bool,
    },
}

/// What the host should do after a completed join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Silent,
    /// Deliver this text to the player in chat.
    Notice(String),
    /// Disconnect the player with this reason.
    Disconnect(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinkOutcome {
    pub record: IdentityRecord,
    /// Whether the link itself granted access (role verified live).
    pub access_granted: bool,
}

#[derive(Clone)]
pub struct PermissionGate {
    cache: CacheStore,
    tokens: LinkTokenService,
    roles: Arc<dyn RoleCheck>,
    settings: Settings,
    audit: AuditSink,
    hooks: HookHub,
}

impl PermissionGate {
    pub fn new(
        cache: CacheStore,
        tokens: LinkTokenService,
        roles: Arc<dyn RoleCheck>,
        settings: Settings,
        audit: AuditSink,
        hooks: HookHub,
    ) -> Self {
        Self {
            cache,
            tokens,
            roles,
            settings,
            audit,
            hooks,
        }
    }

    /// Decide a login attempt. Runs on the host's connection task; performs
    /// at most one bounded remote check and never errors.
    pub async fn decide_login(&self, attempt: LoginAttempt) -> LoginDecision {
        let enforcement = self.settings.enforcement();
        let record = self.cache.get(attempt.player_id);

        if enforcement == Enforcement::Off {
            if let Some(record) = record {
                self.reconcile_name(record, &attempt.player_name);
            }
            return LoginDecision::Allow;
        }

        if attempt.privileged {
            tracing::debug!(player_id = %attempt.player_id, "Privileged login allowed");
            return LoginDecision::Allow;
        }

        // Bans hold regardless of access state or bridge availability.
        if let Some(record) = &record {
            if record.is_banned(Utc::now()) {
                tracing::info!(player_id = %attempt.player_id, "Login denied by active ban");
                return LoginDecision::Deny {
                    message: record.ban_message(),
                    revoke_local_grant: false,
                };
            }
        }

        if let Some(record) = &record {
            if record.has_access {
                self.reconcile_name(record.clone(), &attempt.player_name);
                return LoginDecision::Allow;
            }
            if let Some(community_id) = record.community_id {
                // Linked without access: one live check may re-grant.
                // Anything short of a definite yes stays denied.
                if self.roles.check_role(community_id).await == RoleStatus::HasRole {
                    self.grant_access(record.clone(), Some(&attempt.player_name));
                    return LoginDecision::Allow;
                }
                return self.deny_without_grant();
            }
        }

        if attempt.legacy_granted {
            let token = self.tokens.issue(attempt.player_id, &attempt.player_name);
            match &record {
                Some(existing) => self.reconcile_name(existing.clone(), &attempt.player_name),
                None => {
                    self.cache.upsert(IdentityRecord::with_name(
                        attempt.player_id,
                        &attempt.player_name,
                    ));
                    self.audit.record(AuditEvent::system(
                        AuditKind::LegacyKick,
                        Some(attempt.player_id),
                        format!(
                            "legacy grant superseded; link token issued to {}",
                            attempt.player_name
                        ),
                    ));
                    self.persist();
                }
            }
            return match enforcement {
                Enforcement::Active => LoginDecision::Deny {
                    message: self.link_required_text(&token.code),
                    revoke_local_grant: true,
                },
                _ => LoginDecision::Allow,
            };
        }

        self.deny_without_grant()
    }

    /// Decide what happens once a player has fully joined. Mutations apply
    /// in every enforcement mode; only the disconnect is suppressed in dry
    /// run.
    pub async fn decide_join(&self, join: JoinAttempt) -> JoinOutcome {
        let enforcement = self.settings.enforcement();
        if enforcement == Enforcement::Off {
            return JoinOutcome::Silent;
        }

        let record = self.cache.get(join.player_id);
        let linked = record.as_ref().and_then(|r| r.community_id);

        if join.privileged {
            return match linked {
                Some(_) => JoinOutcome::Silent,
                None => {
                    let token = self.tokens.issue(join.player_id, &join.player_name);
                    JoinOutcome::Notice(format!(
                        "This server links accounts to the community. Send the code {} to the community bot to link yours.{}",
                        token.code,
                        self.invite_suffix()
                    ))
                }
            };
        }

        let Some(record) = record else {
            return self.join_link_notice(&join, enforcement);
        };
        let Some(community_id) = record.community_id else {
            return self.join_link_notice(&join, enforcement);
        };

        match self.roles.check_role(community_id).await {
            RoleStatus::HasRole => {
                if record.has_access {
                    JoinOutcome::Silent
                } else {
                    self.grant_access(record, Some(&join.player_name));
                    JoinOutcome::Notice("Community role verified. Welcome!".to_string())
                }
            }
            RoleStatus::MissingRole => {
                self.revoke(record, AuditKind::AccessRevoked, "missing role");
                match enforcement {
                    Enforcement::Active => JoinOutcome::Disconnect(
                        self.revoked_text("your community role is missing"),
                    ),
                    _ => JoinOutcome::Silent,
                }
            }
            RoleStatus::NotInGroup => {
                self.revoke(record, AuditKind::LeftCommunity, "left community");
                match enforcement {
                    Enforcement::Active => {
                        JoinOutcome::Disconnect(self.revoked_text("you left the community"))
                    }
                    _ => JoinOutcome::Silent,
                }
            }
            // Transient remote trouble never punishes anyone.
            RoleStatus::Indeterminate => JoinOutcome::Notice(
                "Welcome! Community verification is temporarily unavailable; your cached access applies."
                    .to_string(),
            ),
        }
    }

    /// Redeem a link code on behalf of the community bot and bind the
    /// accounts. Single-use per token; one community account binds at most
    /// one player.
    pub async fn complete_link(
        &self,
        code: &str,
        community_id: u64,
        username: &str,
        nickname: Option<&str>,
    ) -> Result<LinkOutcome, GateError> {
        let token = self.tokens.consume(code).ok_or(GateError::TokenNotFound)?;

        if let Some(holder) = self.cache.find_by_community_id(community_id) {
            if holder.player_id != token.player_id {
                tracing::warn!(
                    community_id,
                    player_id = %token.player_id,
                    holder = %holder.player_id,
                    "Link rejected; community account already bound"
                );
                return Err(GateError::AlreadyLinked(community_id));
            }
        }

        let mut record = self
            .cache
            .get(token.player_id)
            .unwrap_or_else(|| IdentityRecord::new(token.player_id));
        // Rebinding to a different community account forfeits cached access;
        // the check below may re-derive it from the new account's role.
        if record.community_id.is_some() && record.community_id != Some(community_id) {
            record.has_access = false;
        }
        record.community_id = Some(community_id);
        record.player_name = Some(token.player_name.clone());
        record.community_username = Some(username.to_string());
        record.community_nickname = nickname.map(str::to_string);

        let mut granted = false;
        if !record.has_access
            && self.roles.is_started()
            && self.roles.check_role(community_id).await == RoleStatus::HasRole
        {
            record.has_access = true;
            granted = true;
        }

        self.cache.upsert(record.clone());
        self.audit.record(
            AuditEvent::system(
                AuditKind::Linked,
                Some(record.player_id),
                format!("linked to community account {} ({})", username, community_id),
            )
            .for_community(community_id),
        );
        if granted {
            self.audit.record(
                AuditEvent::system(
                    AuditKind::FirstAllow,
                    Some(record.player_id),
                    "community role verified; access granted".to_string(),
                )
                .for_community(community_id),
            );
        }
        self.persist();

        tracing::info!(
            player_id = %record.player_id,
            community_id,
            granted,
            "Link completed"
        );
        Ok(LinkOutcome {
            record,
            access_granted: granted,
        })
    }

    /// Remote profile change pushed by the community bot.
    pub fn note_member_profile(&self, community_id: u64, username: &str, nickname: Option<&str>) {
        let Some(mut record) = self.cache.find_by_community_id(community_id) else {
            return;
        };
        let username_changed = record.community_username.as_deref() != Some(username);
        let nickname_changed = record.community_nickname.as_deref() != nickname;
        if !username_changed && !nickname_changed {
            return;
        }

        let message = if username_changed {
            format!(
                "name changed: {} -> {}",
                record.community_username.as_deref().unwrap_or("<unset>"),
                username
            )
        } else {
            format!(
                "nickname changed: {} -> {}",
                record.community_nickname.as_deref().unwrap_or("<unset>"),
                nickname.unwrap_or("<unset>")
            )
        };
        record.community_username = Some(username.to_string());
        record.community_nickname = nickname.map(str::to_string);
        self.cache.upsert(record.clone());
        self.audit.record(
            AuditEvent::system(AuditKind::NameChanged, Some(record.player_id), message)
                .for_community(community_id),
        );
        self.persist();
    }

    /// The linked community member left the group. Access ends now; the
    /// disconnect, if any, happens on their next join evaluation.
    pub fn note_member_left(&self, community_id: u64) {
        let Some(mut record) = self.cache.find_by_community_id(community_id) else {
            tracing::debug!(community_id, "Departing member has no linked record");
            return;
        };
        record.has_access = false;
        self.cache.upsert(record.clone());
        self.audit.record(
            AuditEvent::system(
                AuditKind::LeftCommunity,
                Some(record.player_id),
                "left the community; access revoked".to_string(),
            )
            .for_community(community_id),
        );
        self.hooks.message(
            record.player_id,
            "Your community membership ended; server access was revoked.",
        );
        self.persist();
    }

    fn reconcile_name(&self, mut record: IdentityRecord, player_name: &str) {
        if record.player_name.as_deref() == Some(player_name) {
            return;
        }
        let before = record
            .player_name
            .clone()
            .unwrap_or_else(|| "<unset>".to_string());
        record.player_name = Some(player_name.to_string());
        self.cache.upsert(record.clone());
        self.audit.record(AuditEvent::system(
            AuditKind::NameChanged,
            Some(record.player_id),
            format!("name changed: {} -> {}", before, player_name),
        ));
        self.persist();
    }

    fn grant_access(&self, mut record: IdentityRecord, player_name: Option<&str>) {
        record.has_access = true;
        if let Some(player_name) = player_name {
            record.player_name = Some(player_name.to_string());
        }
        let community_id = record.community_id;
        self.cache.upsert(record.clone());
        let mut event = AuditEvent::system(
            AuditKind::FirstAllow,
            Some(record.player_id),
            "community role verified; access granted".to_string(),
        );
        if let Some(community_id) = community_id {
            event = event.for_community(community_id);
        }
        self.audit.record(event);
        self.persist();
    }

    fn revoke(&self, mut record: IdentityRecord, kind: AuditKind, detail: &str) {
        record.has_access = false;
        let community_id = record.community_id;
        self.cache.upsert(record.clone());
        let mut event = AuditEvent::system(
            kind,
            Some(record.player_id),
            format!("access revoked ({})", detail),
        );
        if let Some(community_id) = community_id {
            event = event.for_community(community_id);
        }
        self.audit.record(event);
        self.persist();
    }

    fn join_link_notice(&self, join: &JoinAttempt, enforcement: Enforcement) -> JoinOutcome {
        let token = self.tokens.issue(join.player_id, &join.player_name);
        let text = match enforcement {
            Enforcement::Active => self.link_required_text(&token.code),
            _ => format!(
                "This server is moving to community-linked access. Please link soon: send the code {} to the community bot.{}",
                token.code,
                self.invite_suffix()
            ),
        };
        JoinOutcome::Notice(text)
    }

    fn deny_without_grant(&self) -> LoginDecision {
        LoginDecision::Deny {
            message: self.settings.application_message(),
            revoke_local_grant: false,
        }
    }

    fn link_required_text(&self, code: &str) -> String {
        let ttl_minutes = self.settings.link_token_ttl().num_minutes();
        format!(
            "Link your community account to play: send the code {} to the community bot within {} minutes.{}",
            code,
            ttl_minutes,
            self.invite_suffix()
        )
    }

    fn revoked_text(&self, reason: &str) -> String {
        format!(
            "Access revoked: {}. {}",
            reason,
            self.settings.application_message()
        )
    }

    fn invite_suffix(&self) -> String {
        match self.settings.invite_hint() {
            Some(hint) => format!(" Join the community: {}", hint),
            None => String::new(),
        }
    }

    fn persist(&self) {
        self.cache.enqueue_save(self.settings.cache_path());
    }
}
