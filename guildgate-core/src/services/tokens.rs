//! Link token issuance and redemption.
//!
//! Tokens are keyed by player so reissuing while a token is still live hands
//! back the same code instead of minting a second one. Redemption removes
//! the token atomically; two racing redeemers can never both win.

use chrono::{Duration, Utc};
use dashmap::DashMap;
use rand::Rng;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::LinkToken;

// 0/O and 1/I are left out so codes survive being read aloud or retyped.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LENGTH: usize = 8;

#[derive(Clone)]
pub struct LinkTokenService {
    tokens: Arc<DashMap<Uuid, LinkToken>>,
    ttl: Duration,
}

impl LinkTokenService {
    pub fn new(ttl: Duration) -> Self {
        Self {
            tokens: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Issue a token for a player, or return the live one they already have.
    /// The stored display name follows the latest issuance.
    pub fn issue(&self, player_id: Uuid, player_name: &str) -> LinkToken {
        let now = Utc::now();
        let mut entry = self
            .tokens
            .entry(player_id)
            .or_insert_with(|| LinkToken::new(mint_code(), player_id, player_name, self.ttl));

        let token = entry.value_mut();
        if token.is_expired(now) {
            *token = LinkToken::new(mint_code(), player_id, player_name, self.ttl);
            tracing::debug!(player_id = %player_id, "Expired link token replaced");
        } else {
            token.player_name = player_name.to_string();
        }
        token.clone()
    }

    /// Redeem a code. Succeeds at most once per token; expired codes are
    /// discarded on the spot. Matching ignores case so retyped codes work.
    pub fn consume(&self, code: &str) -> Option<LinkToken> {
        let now = Utc::now();
        let player_id = self
            .tokens
            .iter()
            .find(|t| t.code.eq_ignore_ascii_case(code))
            .map(|t| t.player_id)?;
        let (_, token) = self
            .tokens
            .remove_if(&player_id, |_, t| t.code.eq_ignore_ascii_case(code))?;
        if token.is_expired(now) {
            tracing::debug!(player_id = %token.player_id, "Expired link token rejected");
            return None;
        }
        Some(token)
    }

    /// Live tokens ordered by expiry, soonest first. Evicts expired ones.
    pub fn active(&self) -> Vec<LinkToken> {
        self.sweep_expired();
        let mut tokens: Vec<LinkToken> = self.tokens.iter().map(|t| t.value().clone()).collect();
        tokens.sort_by_key(|t| t.expires_at);
        tokens
    }

    /// Drop every expired token. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut removed = 0;
        self.tokens.retain(|_, token| {
            let keep = !token.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        if removed > 0 {
            tracing::debug!(removed, "Swept expired link tokens");
        }
        removed
    }
}

fn mint_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LENGTH)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}
