use std::collections::{HashMap, HashSet};
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio::time::Instant;

use crate::models::UserId;

/// Elevated users and punitive blocks.
///
/// Block entries are never purged; an expired entry simply stops matching.
#[derive(Debug, Default)]
pub struct AccessGuard {
    elevated: HashSet<UserId>,
    blocks: HashMap<UserId, Instant>,
}

impl AccessGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant_elevated(&mut self, user_id: UserId) {
        if self.elevated.insert(user_id) {
            tracing::info!(submitter = user_id, "elevated access granted");
        }
    }

    pub fn is_elevated(&self, user_id: UserId) -> bool {
        self.elevated.contains(&user_id)
    }

    pub fn is_on_cooldown(&self, user_id: UserId) -> bool {
        self.blocks
            .get(&user_id)
            .is_some_and(|until| *until > Instant::now())
    }

    /// Last write wins, even if it shortens an earlier block.
    pub fn impose_temporary_block(&mut self, user_id: UserId, duration: Duration) {
        self.blocks.insert(user_id, Instant::now() + duration);
        tracing::info!(
            submitter = user_id,
            seconds = duration.as_secs(),
            "temporary block imposed"
        );
    }

    /// Grants elevation when `attempt` matches the shared secret.
    pub fn authorize(&mut self, user_id: UserId, attempt: &str, expected: Option<&str>) -> bool {
        let Some(expected) = expected else {
            return false;
        };

        if bool::from(attempt.as_bytes().ct_eq(expected.as_bytes())) {
            self.grant_elevated(user_id);
            true
        } else {
            tracing::warn!(submitter = user_id, "rejected elevation attempt");
            false
        }
    }
}
