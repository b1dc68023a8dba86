//! Reputation Aggregator
//!
//! Keeps each user's `average_rating`/`total_ratings` as a materialized view
//! over the ratings they received. Every rating mutation for a reviewee runs
//! while holding that reviewee's [`ReputationGuard`], so the stored rating
//! and the materialized score move together. The score writes themselves are
//! atomic in the backing store, so instances that do not share a guard map
//! still converge.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};
use crate::rating::Rating;
use crate::reputation::stats::{aggregate, UserRatingStats};
use crate::store::RatingStore;
use crate::users::{Reputation, UserDirectory};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// Exclusive right to update one user's reputation
pub struct ReputationGuard {
    user_id: String,
    lock: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockMap>,
}

impl ReputationGuard {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl Drop for ReputationGuard {
    fn drop(&mut self) {
        drop(self.lock.take());
        // Only the map holds the mutex once nobody holds or waits for it
        self.locks
            .remove_if(&self.user_id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

pub struct ReputationAggregator {
    ratings: Arc<dyn RatingStore>,
    users: Arc<dyn UserDirectory>,
    locks: Arc<LockMap>,
}

impl ReputationAggregator {
    pub fn new(ratings: Arc<dyn RatingStore>, users: Arc<dyn UserDirectory>) -> Self {
        Self {
            ratings,
            users,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Serialize reputation updates for `user_id`
    pub async fn lock(&self, user_id: &str) -> ReputationGuard {
        let mutex = self
            .locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        ReputationGuard {
            user_id: user_id.to_string(),
            lock: Some(mutex.lock_owned().await),
            locks: self.locks.clone(),
        }
    }

    /// Users with a guard held or awaited
    pub fn tracked_locks(&self) -> usize {
        self.locks.len()
    }

    /// Current materialized reputation
    pub async fn materialized(&self, user_id: &str) -> CoreResult<Reputation> {
        let user = self
            .users
            .get_user(user_id)
            .await?
            .ok_or_else(|| CoreError::not_found("user", user_id))?;
        Ok(Reputation {
            average_rating: user.average_rating,
            total_ratings: user.total_ratings,
        })
    }

    /// Apply a newly stored rating as a running-average delta
    ///
    /// Ratings that are not approved and public leave the score unchanged.
    pub async fn apply_new_rating(
        &self,
        guard: &ReputationGuard,
        rating: &Rating,
    ) -> CoreResult<Reputation> {
        if guard.user_id() != rating.reviewee {
            warn!(
                guard = %guard.user_id(),
                reviewee = %rating.reviewee,
                "Reputation guard does not cover the reviewee"
            );
            return Err(CoreError::forbidden(
                guard.user_id(),
                format!("update reputation of {}", rating.reviewee),
            ));
        }

        if !rating.is_visible() {
            return self.materialized(guard.user_id()).await;
        }

        let updated = self
            .ratings
            .fold_new_rating(rating, self.users.as_ref())
            .await?;

        debug!(
            user_id = %guard.user_id(),
            average = updated.average_rating,
            total = updated.total_ratings,
            "Reputation incremented"
        );
        Ok(updated)
    }

    /// Rebuild the materialized reputation from stored ratings
    pub async fn recompute(&self, user_id: &str) -> CoreResult<Reputation> {
        let guard = self.lock(user_id).await;
        self.recompute_locked(&guard).await
    }

    pub async fn recompute_locked(&self, guard: &ReputationGuard) -> CoreResult<Reputation> {
        let canonical = self
            .ratings
            .materialize_reputation(guard.user_id(), self.users.as_ref())
            .await?;

        debug!(
            user_id = %guard.user_id(),
            average = canonical.average_rating,
            total = canonical.total_ratings,
            "Reputation recomputed"
        );
        Ok(canonical)
    }

    /// Canonical reputation without writing it anywhere
    pub async fn compute(&self, user_id: &str) -> CoreResult<Reputation> {
        let ratings = self.ratings.ratings_received(user_id, true).await?;
        Ok(aggregate(&ratings))
    }

    pub async fn stats(&self, user_id: &str) -> CoreResult<UserRatingStats> {
        let ratings = self.ratings.ratings_received(user_id, true).await?;
        Ok(UserRatingStats::from_ratings(user_id, &ratings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rating::NewRating;
    use crate::store::InMemoryRatingStore;
    use crate::users::{InMemoryUserDirectory, UserProfile};
    use chrono::Utc;
    use uuid::Uuid;

    async fn setup() -> (
        ReputationAggregator,
        Arc<InMemoryRatingStore>,
        Arc<InMemoryUserDirectory>,
    ) {
        let ratings = Arc::new(InMemoryRatingStore::new());
        let users = Arc::new(InMemoryUserDirectory::new());
        users.upsert(UserProfile::new("bob")).await;
        let aggregator = ReputationAggregator::new(ratings.clone(), users.clone());
        (aggregator, ratings, users)
    }

    #[tokio::test]
    async fn test_increment_then_recompute_agree() {
        let (aggregator, ratings, _users) = setup().await;

        for score in [5u8, 2, 4] {
            let rating =
                NewRating::new(Uuid::new_v4(), "alice", "bob", score).into_rating(Utc::now());
            let guard = aggregator.lock("bob").await;
            ratings.insert_rating(&rating).await.unwrap();
            aggregator.apply_new_rating(&guard, &rating).await.unwrap();
        }

        let materialized = aggregator.materialized("bob").await.unwrap();
        let canonical = aggregator.compute("bob").await.unwrap();
        assert_eq!(materialized.total_ratings, 3);
        assert!((materialized.average_rating - canonical.average_rating).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_private_rating_does_not_move_score() {
        let (aggregator, ratings, _users) = setup().await;
        let rating = NewRating::new(Uuid::new_v4(), "alice", "bob", 1)
            .private()
            .into_rating(Utc::now());

        let guard = aggregator.lock("bob").await;
        ratings.insert_rating(&rating).await.unwrap();
        let rep = aggregator.apply_new_rating(&guard, &rating).await.unwrap();
        assert_eq!(rep, Reputation::EMPTY);
    }

    #[tokio::test]
    async fn test_recompute_overwrites_drift() {
        let (aggregator, ratings, users) = setup().await;
        let rating = NewRating::new(Uuid::new_v4(), "alice", "bob", 4).into_rating(Utc::now());
        ratings.insert_rating(&rating).await.unwrap();

        users
            .set_reputation(
                "bob",
                Reputation {
                    average_rating: 1.0,
                    total_ratings: 9,
                },
            )
            .await
            .unwrap();

        let rep = aggregator.recompute("bob").await.unwrap();
        assert_eq!(rep.total_ratings, 1);
        assert_eq!(aggregator.materialized("bob").await.unwrap(), rep);
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let (aggregator, _ratings, _users) = setup().await;
        let err = aggregator.recompute("ghost").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_separate_instances_converge() {
        let (first, ratings, users) = setup().await;
        let second = Arc::new(ReputationAggregator::new(ratings.clone(), users.clone()));
        let first = Arc::new(first);

        let mut handles = Vec::new();
        for i in 0..30u8 {
            // Each instance has its own guard map, as two processes would
            let aggregator = if i % 2 == 0 { first.clone() } else { second.clone() };
            let ratings = ratings.clone();
            handles.push(tokio::spawn(async move {
                let rating = NewRating::new(Uuid::new_v4(), "alice", "bob", i % 5 + 1)
                    .into_rating(Utc::now());
                let guard = aggregator.lock("bob").await;
                ratings.insert_rating(&rating).await.unwrap();
                aggregator.apply_new_rating(&guard, &rating).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let materialized = first.materialized("bob").await.unwrap();
        let canonical = first.compute("bob").await.unwrap();
        assert_eq!(materialized.total_ratings, 30);
        assert!((materialized.average_rating - canonical.average_rating).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_idle_locks_are_pruned() {
        let (aggregator, _ratings, _users) = setup().await;

        let guard = aggregator.lock("bob").await;
        assert_eq!(aggregator.tracked_locks(), 1);
        drop(guard);
        assert_eq!(aggregator.tracked_locks(), 0);

        aggregator.recompute("bob").await.unwrap();
        assert_eq!(aggregator.tracked_locks(), 0);
    }

    #[tokio::test]
    async fn test_waiter_keeps_lock_alive() {
        let (aggregator, _ratings, _users) = setup().await;
        let aggregator = Arc::new(aggregator);

        let held = aggregator.lock("bob").await;
        let waiter = {
            let aggregator = aggregator.clone();
            tokio::spawn(async move {
                let guard = aggregator.lock("bob").await;
                aggregator.tracked_locks() + usize::from(guard.user_id() == "bob")
            })
        };
        tokio::task::yield_now().await;
        drop(held);

        // The waiter acquired the same entry instead of a fresh one
        assert_eq!(waiter.await.unwrap(), 2);
        assert_eq!(aggregator.tracked_locks(), 0);
    }
}
