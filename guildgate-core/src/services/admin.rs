//! Administrative operations - the backing for whatever command frontend the
//! host wires up. Every mutation records an audit event labeled with the
//! acting admin and schedules a cache save.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::Settings;
use crate::error::GateError;
use crate::hooks::HookHub;
use crate::models::{
    ApplicationStatus, AuditEvent, AuditKind, IdentityRecord, LinkToken, WhitelistApplication,
};
use crate::services::audit::AuditSink;
use crate::services::cache::CacheStore;
use crate::services::tokens::LinkTokenService;
use crate::utils::{paginate, Page};

#[derive(Clone)]
pub struct AdminService {
    cache: CacheStore,
    tokens: LinkTokenService,
    settings: Settings,
    audit: AuditSink,
    hooks: HookHub,
}

impl AdminService {
    pub fn new(
        cache: CacheStore,
        tokens: LinkTokenService,
        settings: Settings,
        audit: AuditSink,
        hooks: HookHub,
    ) -> Self {
        Self {
            cache,
            tokens,
            settings,
            audit,
            hooks,
        }
    }

    // ---- whitelist ----

    /// Grant access directly, bypassing the role check. Creates the record
    /// if the player has never been seen.
    pub fn whitelist_add(
        &self,
        actor: &str,
        player_id: Uuid,
        player_name: Option<&str>,
    ) -> Result<IdentityRecord, GateError> {
        let mut record = self.get_or_create(player_id);
        record.has_access = true;
        if let Some(name) = player_name {
            record.player_name = Some(name.to_string());
        }
        self.cache.upsert(record.clone());
        self.audit.record(AuditEvent::admin(
            AuditKind::WhitelistAdded,
            actor,
            Some(player_id),
            "added to the whitelist".to_string(),
        ));
        self.persist();
        Ok(record)
    }

    pub fn whitelist_remove(
        &self,
        actor: &str,
        player_id: Uuid,
    ) -> Result<IdentityRecord, GateError> {
        let mut record = self.cache.get(player_id).ok_or(GateError::PlayerNotFound)?;
        record.has_access = false;
        self.cache.upsert(record.clone());
        self.audit.record(AuditEvent::admin(
            AuditKind::WhitelistRemoved,
            actor,
            Some(player_id),
            "removed from the whitelist".to_string(),
        ));
        self.persist();
        Ok(record)
    }

    pub fn status(&self, player_id: Uuid) -> Option<IdentityRecord> {
        self.cache.get(player_id)
    }

    pub fn find_by_name(&self, player_name: &str) -> Option<IdentityRecord> {
        self.cache.find_by_name(player_name)
    }

    /// All known players, sorted by display name, one page at a time.
    pub fn players(&self, page: usize, per_page: usize) -> Page<IdentityRecord> {
        let mut records = self.cache.records();
        records.sort_by(|a, b| {
            let a_name = a.player_name.as_deref().unwrap_or("").to_ascii_lowercase();
            let b_name = b.player_name.as_deref().unwrap_or("").to_ascii_lowercase();
            a_name.cmp(&b_name).then_with(|| a.player_id.cmp(&b.player_id))
        });
        paginate(&records, page, per_page)
    }

    // ---- moderation ----

    /// Returns the new warning count.
    pub fn warn(&self, actor: &str, player_id: Uuid, reason: &str) -> Result<u32, GateError> {
        let mut record = self.get_or_create(player_id);
        record.warn_count += 1;
        let count = record.warn_count;
        self.cache.upsert(record);
        self.audit.record(AuditEvent::admin(
            AuditKind::Warned,
            actor,
            Some(player_id),
            format!("warning {}: {}", count, reason),
        ));
        self.hooks.message(
            player_id,
            &format!("You have been warned ({}): {}", count, reason),
        );
        self.persist();
        Ok(count)
    }

    /// `until: None` bans permanently. The ban is mirrored into the host's
    /// native ban list through the ban sync hook.
    pub fn ban(
        &self,
        actor: &str,
        player_id: Uuid,
        reason: &str,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), GateError> {
        let mut record = self.get_or_create(player_id);
        record.ban_reason = Some(reason.to_string());
        record.ban_until = until;
        self.cache.upsert(record);

        let until_text = match until {
            Some(until) => format!("until {}", until.format("%Y-%m-%d %H:%M UTC")),
            None => "permanently".to_string(),
        };
        self.audit.record(AuditEvent::admin(
            AuditKind::Banned,
            actor,
            Some(player_id),
            format!("banned {}: {}", until_text, reason),
        ));
        self.hooks.ban_applied(player_id, reason, until);
        self.persist();
        Ok(())
    }

    /// Lifting a ban that does not exist is a quiet success.
    pub fn unban(&self, actor: &str, player_id: Uuid) -> Result<(), GateError> {
        let mut record = self.cache.get(player_id).ok_or(GateError::PlayerNotFound)?;
        if record.ban_reason.is_none() {
            return Ok(());
        }
        record.ban_reason = None;
        record.ban_until = None;
        self.cache.upsert(record);
        self.audit.record(AuditEvent::admin(
            AuditKind::Unbanned,
            actor,
            Some(player_id),
            "ban lifted".to_string(),
        ));
        self.hooks.ban_lifted(player_id);
        self.persist();
        Ok(())
    }

    /// Free-form operator note, visible in the player's history.
    pub fn comment(&self, actor: &str, player_id: Uuid, text: &str) -> Result<(), GateError> {
        let record = self.get_or_create(player_id);
        self.cache.upsert(record);
        self.audit.record(AuditEvent::admin(
            AuditKind::Comment,
            actor,
            Some(player_id),
            text.to_string(),
        ));
        self.persist();
        Ok(())
    }

    // ---- whitelist applications ----

    /// File an application from the community side. A community account with
    /// a pending application gets that one back instead of a duplicate.
    pub fn submit_application(
        &self,
        community_id: u64,
        player_name: &str,
    ) -> Result<WhitelistApplication, GateError> {
        let resolved = self.cache.find_by_name(player_name).map(|r| r.player_id);
        let (application, created) =
            self.cache.add_application(community_id, player_name, resolved);
        if created {
            self.audit.record(AuditEvent::community(
                AuditKind::ApplicationSubmitted,
                community_id,
                format!("application from {}", player_name),
            ));
            self.persist();
        }
        Ok(application)
    }

    /// Approve an application; grants access when the applicant resolves to
    /// a known player. Re-approving is a no-op success.
    pub fn approve_application(
        &self,
        actor: &str,
        id: Uuid,
        reason: Option<&str>,
    ) -> Result<WhitelistApplication, GateError> {
        let (application, changed) =
            self.cache
                .resolve_application(id, ApplicationStatus::Approved, reason)?;
        if !changed {
            return Ok(application);
        }

        // The applicant may have logged in since submission; resolve late.
        let target = application.player_id.or_else(|| {
            self.cache
                .find_by_name(&application.player_name)
                .map(|r| r.player_id)
        });
        if let Some(player_id) = target {
            let mut record = self.get_or_create(player_id);
            record.has_access = true;
            if record.player_name.is_none() {
                record.player_name = Some(application.player_name.clone());
            }
            self.cache.upsert(record);
        }

        let detail = match reason {
            Some(reason) => format!("application from {} approved: {}", application.player_name, reason),
            None => format!("application from {} approved", application.player_name),
        };
        self.audit.record(
            AuditEvent::admin(AuditKind::ApplicationApproved, actor, target, detail)
                .for_community(application.community_id),
        );
        self.persist();
        Ok(application)
    }

    pub fn deny_application(
        &self,
        actor: &str,
        id: Uuid,
        reason: &str,
    ) -> Result<WhitelistApplication, GateError> {
        let (application, changed) =
            self.cache
                .resolve_application(id, ApplicationStatus::Denied, Some(reason))?;
        if !changed {
            return Ok(application);
        }
        self.audit.record(
            AuditEvent::admin(
                AuditKind::ApplicationDenied,
                actor,
                application.player_id,
                format!("application from {} denied: {}", application.player_name, reason),
            )
            .for_community(application.community_id),
        );
        self.persist();
        Ok(application)
    }

    pub fn application(&self, id: Uuid) -> Option<WhitelistApplication> {
        self.cache.application(id)
    }

    pub fn applications(&self, page: usize, per_page: usize) -> Page<WhitelistApplication> {
        paginate(&self.cache.applications(), page, per_page)
    }

    // ---- history ----

    pub fn history(&self, player_id: Uuid, page: usize, per_page: usize) -> Page<AuditEvent> {
        paginate(&self.cache.events_for_player(player_id), page, per_page)
    }

    pub fn recent_events(&self, page: usize, per_page: usize) -> Page<AuditEvent> {
        paginate(&self.cache.events(), page, per_page)
    }

    // ---- link tokens ----

    pub fn issue_link_token(
        &self,
        actor: &str,
        player_id: Uuid,
        player_name: &str,
    ) -> LinkToken {
        let token = self.tokens.issue(player_id, player_name);
        self.audit.record(AuditEvent::admin(
            AuditKind::TokenIssued,
            actor,
            Some(player_id),
            format!("link token issued for {}", player_name),
        ));
        self.persist();
        token
    }

    pub fn link_tokens(&self) -> Vec<LinkToken> {
        self.tokens.active()
    }

    /// Remove the community binding. Access goes with it, since it derived
    /// from the linked account's role.
    pub fn unlink(&self, actor: &str, player_id: Uuid) -> Result<IdentityRecord, GateError> {
        let mut record = self.cache.get(player_id).ok_or(GateError::PlayerNotFound)?;
        let community_id = record.community_id;
        record.community_id = None;
        record.community_username = None;
        record.community_nickname = None;
        record.has_access = false;
        self.cache.upsert(record.clone());

        let mut event = AuditEvent::admin(
            AuditKind::Unlinked,
            actor,
            Some(player_id),
            "community link removed".to_string(),
        );
        if let Some(community_id) = community_id {
            event = event.for_community(community_id);
        }
        self.audit.record(event);
        self.persist();
        Ok(record)
    }

    fn get_or_create(&self, player_id: Uuid) -> IdentityRecord {
        self.cache
            .get(player_id)
            .unwrap_or_else(|| IdentityRecord::new(player_id))
    }

    fn persist(&self) {
        self.cache.enqueue_save(self.settings.cache_path());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::BanSync;
    use chrono::Duration;
    use std::sync::{Arc, Mutex};

    struct Fixture {
        admin: AdminService,
        cache: CacheStore,
        hooks: HookHub,
    }

    fn fixture() -> Fixture {
        let cache = CacheStore::new();
        let settings = Settings::default();
        let hooks = HookHub::new();
        let audit = AuditSink::new(cache.clone(), hooks.clone());
        let tokens = LinkTokenService::new(Duration::minutes(30));
        let admin = AdminService::new(
            cache.clone(),
            tokens,
            settings,
            audit,
            hooks.clone(),
        );
        Fixture {
            admin,
            cache,
            hooks,
        }
    }

    fn kinds_for(fx: &Fixture, player_id: Uuid) -> Vec<AuditKind> {
        fx.cache
            .events_for_player(player_id)
            .iter()
            .map(|e| e.kind)
            .collect()
    }

    #[derive(Default)]
    struct RecordingBanSync {
        bans: Mutex<Vec<(Uuid, String, Option<DateTime<Utc>>)>>,
        unbans: Mutex<Vec<Uuid>>,
    }

    impl BanSync for Arc<RecordingBanSync> {
        fn on_ban(&self, player_id: Uuid, reason: &str, until: Option<DateTime<Utc>>) {
            self.bans
                .lock()
                .unwrap()
                .push((player_id, reason.to_string(), until));
        }

        fn on_unban(&self, player_id: Uuid) {
            self.unbans.lock().unwrap().push(player_id);
        }
    }

    #[tokio::test]
    async fn test_whitelist_add_and_remove() {
        let fx = fixture();
        let player = Uuid::new_v4();

        let record = fx.admin.whitelist_add("ops", player, Some("Gimli")).unwrap();
        assert!(record.has_access);
        assert_eq!(record.player_name.as_deref(), Some("Gimli"));
        assert!(fx.admin.status(player).unwrap().has_access);

        let record = fx.admin.whitelist_remove("ops", player).unwrap();
        assert!(!record.has_access);
        assert_eq!(
            kinds_for(&fx, player),
            vec![AuditKind::WhitelistAdded, AuditKind::WhitelistRemoved]
        );

        assert!(matches!(
            fx.admin.whitelist_remove("ops", Uuid::new_v4()),
            Err(GateError::PlayerNotFound)
        ));
    }

    #[tokio::test]
    async fn test_warn_increments_and_notifies() {
        let fx = fixture();
        let notices: Arc<Mutex<Vec<String>>> = Arc::default();
        let sink = Arc::clone(&notices);
        fx.hooks
            .register_messenger(move |_, text| sink.lock().unwrap().push(text.to_string()));

        let player = Uuid::new_v4();
        assert_eq!(fx.admin.warn("ops", player, "spam").unwrap(), 1);
        assert_eq!(fx.admin.warn("ops", player, "more spam").unwrap(), 2);

        assert_eq!(fx.cache.get(player).unwrap().warn_count, 2);
        assert_eq!(kinds_for(&fx, player), vec![AuditKind::Warned, AuditKind::Warned]);
        assert_eq!(notices.lock().unwrap().len(), 2);
        assert!(notices.lock().unwrap()[1].contains("(2)"));
    }

    #[tokio::test]
    async fn test_ban_mirrors_to_the_host() {
        let fx = fixture();
        let sync = Arc::new(RecordingBanSync::default());
        fx.hooks.register_ban_sync(Arc::clone(&sync));

        let player = Uuid::new_v4();
        let until = Some(Utc::now() + Duration::days(7));
        fx.admin.ban("ops", player, "cheating", until).unwrap();

        let record = fx.cache.get(player).unwrap();
        assert!(record.is_banned(Utc::now()));
        assert_eq!(record.ban_reason.as_deref(), Some("cheating"));

        let bans = sync.bans.lock().unwrap();
        assert_eq!(bans.len(), 1);
        assert_eq!(bans[0].1, "cheating");
        assert_eq!(bans[0].2, until);
    }

    #[tokio::test]
    async fn test_unban_clears_and_mirrors_once() {
        let fx = fixture();
        let sync = Arc::new(RecordingBanSync::default());
        fx.hooks.register_ban_sync(Arc::clone(&sync));

        let player = Uuid::new_v4();
        fx.admin.ban("ops", player, "toxicity", None).unwrap();
        fx.admin.unban("ops", player).unwrap();

        let record = fx.cache.get(player).unwrap();
        assert!(!record.is_banned(Utc::now()));
        assert!(record.ban_reason.is_none());
        assert_eq!(sync.unbans.lock().unwrap().len(), 1);

        // Lifting again changes nothing.
        fx.admin.unban("ops", player).unwrap();
        assert_eq!(sync.unbans.lock().unwrap().len(), 1);
        assert_eq!(
            kinds_for(&fx, player),
            vec![AuditKind::Banned, AuditKind::Unbanned]
        );
    }

    #[tokio::test]
    async fn test_comment_lands_in_history() {
        let fx = fixture();
        let player = Uuid::new_v4();

        fx.admin.comment("ops", player, "friend of the mods").unwrap();

        let page = fx.admin.history(player, 0, 10);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].kind, AuditKind::Comment);
        assert_eq!(page.items[0].message, "friend of the mods");
        assert_eq!(page.items[0].actor.as_deref(), Some("ops"));
    }

    #[tokio::test]
    async fn test_application_flow_grants_known_players() {
        let fx = fixture();
        let player = IdentityRecord::with_name(Uuid::new_v4(), "Gimli");
        fx.cache.upsert(player.clone());

        let app = fx.admin.submit_application(600, "Gimli").unwrap();
        assert_eq!(app.player_id, Some(player.player_id));

        fx.admin.approve_application("ops", app.id, None).unwrap();
        assert!(fx.cache.get(player.player_id).unwrap().has_access);
        assert_eq!(
            kinds_for(&fx, player.player_id),
            vec![AuditKind::ApplicationApproved]
        );
    }

    #[tokio::test]
    async fn test_application_submission_dedupes_pending() {
        let fx = fixture();

        let first = fx.admin.submit_application(601, "Thorin").unwrap();
        let second = fx.admin.submit_application(601, "Thorin").unwrap();
        assert_eq!(first.id, second.id);

        let submitted = fx
            .cache
            .events()
            .iter()
            .filter(|e| e.kind == AuditKind::ApplicationSubmitted)
            .count();
        assert_eq!(submitted, 1);
    }

    #[tokio::test]
    async fn test_application_resolution_is_idempotent_but_final() {
        let fx = fixture();
        let app = fx.admin.submit_application(602, "Balin").unwrap();

        fx.admin.approve_application("ops", app.id, None).unwrap();
        let again = fx.admin.approve_application("ops", app.id, None).unwrap();
        assert_eq!(again.status, ApplicationStatus::Approved);

        assert!(matches!(
            fx.admin.deny_application("ops", app.id, "changed my mind"),
            Err(GateError::ApplicationAlreadyResolved)
        ));

        // Only one approval audit despite the repeat.
        let approvals = fx
            .cache
            .events()
            .iter()
            .filter(|e| e.kind == AuditKind::ApplicationApproved)
            .count();
        assert_eq!(approvals, 1);
    }

    #[tokio::test]
    async fn test_denied_application_keeps_reason() {
        let fx = fixture();
        let app = fx.admin.submit_application(603, "Smaug").unwrap();

        let denied = fx.admin.deny_application("ops", app.id, "dragon").unwrap();
        assert_eq!(denied.status, ApplicationStatus::Denied);
        assert_eq!(denied.resolution_reason.as_deref(), Some("dragon"));
        assert!(denied.resolved_at.is_some());
    }

    #[tokio::test]
    async fn test_player_listing_pages_and_clamps() {
        let fx = fixture();
        for i in 0..12 {
            fx.admin
                .whitelist_add("ops", Uuid::new_v4(), Some(&format!("Player{:02}", i)))
                .unwrap();
        }

        let page = fx.admin.players(0, 5);
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.page_count, 3);
        assert_eq!(page.items[0].player_name.as_deref(), Some("Player00"));

        let clamped = fx.admin.players(7, 5);
        assert_eq!(clamped.page, 2);
        assert_eq!(clamped.items.len(), 2);
    }

    #[tokio::test]
    async fn test_issue_and_list_link_tokens() {
        let fx = fixture();
        let player = Uuid::new_v4();

        let token = fx.admin.issue_link_token("ops", player, "Bofur");
        let listed = fx.admin.link_tokens();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].code, token.code);
        assert_eq!(kinds_for(&fx, player), vec![AuditKind::TokenIssued]);
    }

    #[tokio::test]
    async fn test_unlink_clears_the_binding() {
        let fx = fixture();
        let mut record = IdentityRecord::with_name(Uuid::new_v4(), "Bifur");
        record.community_id = Some(604);
        record.community_username = Some("bifur#1".to_string());
        record.has_access = true;
        fx.cache.upsert(record.clone());

        let unlinked = fx.admin.unlink("ops", record.player_id).unwrap();
        assert!(unlinked.community_id.is_none());
        assert!(unlinked.community_username.is_none());
        assert!(!unlinked.has_access);
        assert_eq!(kinds_for(&fx, record.player_id), vec![AuditKind::Unlinked]);

        assert!(matches!(
            fx.admin.unlink("ops", Uuid::new_v4()),
            Err(GateError::PlayerNotFound)
        ));
    }
}
