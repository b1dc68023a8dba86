//! User directory seam
//!
//! User profiles are owned by an external service. The core reads skill sets,
//! moderation flags and role, and writes back only the three reputation
//! counters (`average_rating`, `total_ratings`, `total_swaps`).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::reputation::increment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    User,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub skills_offered: BTreeSet<String>,
    pub skills_wanted: BTreeSet<String>,
    pub average_rating: f64,
    pub total_ratings: u32,
    pub total_swaps: u32,
    pub is_banned: bool,
    pub is_active: bool,
    pub role: UserRole,
}

impl UserProfile {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            skills_offered: BTreeSet::new(),
            skills_wanted: BTreeSet::new(),
            average_rating: 0.0,
            total_ratings: 0,
            total_swaps: 0,
            is_banned: false,
            is_active: true,
            role: UserRole::User,
        }
    }

    pub fn offering<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills_offered.extend(skills.into_iter().map(Into::into));
        self
    }

    pub fn wanting<I, S>(mut self, skills: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skills_wanted.extend(skills.into_iter().map(Into::into));
        self
    }

    pub fn admin(mut self) -> Self {
        self.role = UserRole::Admin;
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Case-insensitive lookup in `skills_offered`
    pub fn offers_skill(&self, skill: &str) -> bool {
        let wanted = skill.trim().to_lowercase();
        self.skills_offered
            .iter()
            .any(|offered| offered.trim().to_lowercase() == wanted)
    }
}

/// Materialized reputation written back to a profile
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Reputation {
    pub average_rating: f64,
    pub total_ratings: u32,
}

impl Reputation {
    pub const EMPTY: Reputation = Reputation {
        average_rating: 0.0,
        total_ratings: 0,
    };
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, user_id: &str) -> CoreResult<Option<UserProfile>>;

    /// Credit one completed swap to both participants, or to neither
    async fn record_completed_swap(&self, requester: &str, receiver: &str) -> CoreResult<()>;

    /// Overwrite `total_swaps` with a recounted value
    async fn set_total_swaps(&self, user_id: &str, total: u32) -> CoreResult<()>;

    /// Fold one visible rating into the stored running average in a single
    /// atomic read-modify-write
    async fn add_rating(&self, user_id: &str, score: u8) -> CoreResult<Reputation>;

    async fn set_reputation(&self, user_id: &str, reputation: Reputation) -> CoreResult<()>;
}

/// Process-local user directory
#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<String, UserProfile>>,
}

impl InMemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, profile: UserProfile) {
        let mut users = self.users.write().await;
        users.insert(profile.id.clone(), profile);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get_user(&self, user_id: &str) -> CoreResult<Option<UserProfile>> {
        let users = self.users.read().await;
        Ok(users.get(user_id).cloned())
    }

    async fn record_completed_swap(&self, requester: &str, receiver: &str) -> CoreResult<()> {
        let mut users = self.users.write().await;
        for user_id in [requester, receiver] {
            if !users.contains_key(user_id) {
                return Err(CoreError::not_found("user", user_id));
            }
        }

        for user_id in [requester, receiver] {
            if let Some(user) = users.get_mut(user_id) {
                user.total_swaps += 1;
                debug!(
                    user_id = %user_id,
                    total_swaps = user.total_swaps,
                    "Incremented swap count"
                );
            }
        }
        Ok(())
    }

    async fn set_total_swaps(&self, user_id: &str, total: u32) -> CoreResult<()> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| CoreError::not_found("user", user_id))?;
        user.total_swaps = total;
        Ok(())
    }

    async fn add_rating(&self, user_id: &str, score: u8) -> CoreResult<Reputation> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| CoreError::not_found("user", user_id))?;
        let updated = increment(
            Reputation {
                average_rating: user.average_rating,
                total_ratings: user.total_ratings,
            },
            score,
        );
        user.average_rating = updated.average_rating;
        user.total_ratings = updated.total_ratings;
        Ok(updated)
    }

    async fn set_reputation(&self, user_id: &str, reputation: Reputation) -> CoreResult<()> {
        let mut users = self.users.write().await;
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| CoreError::not_found("user", user_id))?;
        user.average_rating = reputation.average_rating;
        user.total_ratings = reputation.total_ratings;
        Ok(())
    }
}


#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-memory directory whose calls can be switched to fail the way an
    /// unreachable database does
    #[derive(Default)]
    pub(crate) struct FaultyDirectory {
        inner: InMemoryUserDirectory,
        pub(crate) fail_reads: AtomicBool,
        pub(crate) fail_reputation: AtomicBool,
        pub(crate) fail_swap_credit: AtomicBool,
        pub(crate) fail_swap_repair: AtomicBool,
    }

    impl FaultyDirectory {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) async fn upsert(&self, profile: UserProfile) {
            self.inner.upsert(profile).await;
        }

        pub(crate) fn set(flag: &AtomicBool, failing: bool) {
            flag.store(failing, Ordering::SeqCst);
        }
    }

    fn check(flag: &AtomicBool) -> CoreResult<()> {
        if flag.load(Ordering::SeqCst) {
            return Err(CoreError::Storage(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    #[async_trait]
    impl UserDirectory for FaultyDirectory {
        async fn get_user(&self, user_id: &str) -> CoreResult<Option<UserProfile>> {
            check(&self.fail_reads)?;
            self.inner.get_user(user_id).await
        }

        async fn record_completed_swap(&self, requester: &str, receiver: &str) -> CoreResult<()> {
            check(&self.fail_swap_credit)?;
            self.inner.record_completed_swap(requester, receiver).await
        }

        async fn set_total_swaps(&self, user_id: &str, total: u32) -> CoreResult<()> {
            check(&self.fail_swap_repair)?;
            self.inner.set_total_swaps(user_id, total).await
        }

        async fn add_rating(&self, user_id: &str, score: u8) -> CoreResult<Reputation> {
            check(&self.fail_reputation)?;
            self.inner.add_rating(user_id, score).await
        }

        async fn set_reputation(&self, user_id: &str, reputation: Reputation) -> CoreResult<()> {
            check(&self.fail_reputation)?;
            self.inner.set_reputation(user_id, reputation).await
        }
    }
}
