//! In-memory swap and rating stores
//!
//! A single write lock covers each check-then-write, which gives the same
//! conditional-update guarantees the PostgreSQL backend gets from its
//! constraints and `WHERE status = ...` clauses.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult, Ineligibility};
use crate::rating::Rating;
use crate::store::{rating_conflict, swap_conflict, RatingStore, SwapStore};
use crate::swap::{Swap, SwapQuery, SwapStatus};

#[derive(Default)]
pub struct InMemorySwapStore {
    swaps: RwLock<HashMap<Uuid, Swap>>,
}

impl InMemorySwapStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.swaps.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.swaps.read().await.is_empty()
    }
}

fn newest_first(items: &mut [Swap]) {
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

#[async_trait]
impl SwapStore for InMemorySwapStore {
    async fn insert_swap(&self, swap: &Swap) -> CoreResult<()> {
        let mut swaps = self.swaps.write().await;

        if swap.status == SwapStatus::Pending {
            if let Some(existing) = swaps.values().find(|s| {
                s.status == SwapStatus::Pending && s.involves_pair(&swap.requester, &swap.receiver)
            }) {
                return Err(Ineligibility::DuplicatePending(existing.id).into());
            }
        }

        swaps.insert(swap.id, swap.clone());
        debug!(swap_id = %swap.id, "Swap stored");
        Ok(())
    }

    async fn get_swap(&self, id: Uuid) -> CoreResult<Option<Swap>> {
        Ok(self.swaps.read().await.get(&id).cloned())
    }

    async fn swaps_between(&self, a: &str, b: &str) -> CoreResult<Vec<Swap>> {
        let swaps = self.swaps.read().await;
        let mut found: Vec<Swap> = swaps
            .values()
            .filter(|s| s.involves_pair(a, b))
            .cloned()
            .collect();
        newest_first(&mut found);
        Ok(found)
    }

    async fn transition_swap(
        &self,
        id: Uuid,
        expected: SwapStatus,
        next: SwapStatus,
        at: DateTime<Utc>,
    ) -> CoreResult<Swap> {
        let mut swaps = self.swaps.write().await;
        let swap = swaps
            .get_mut(&id)
            .ok_or_else(|| CoreError::not_found("swap", id))?;

        if swap.status != expected {
            return Err(swap_conflict(id, expected, swap.status));
        }

        swap.apply_transition(next, at);
        Ok(swap.clone())
    }

    async fn list_swaps(&self, query: &SwapQuery) -> CoreResult<(Vec<Swap>, u64)> {
        let swaps = self.swaps.read().await;
        let mut matching: Vec<Swap> = swaps
            .values()
            .filter(|s| query.matches(s))
            .cloned()
            .collect();
        newest_first(&mut matching);

        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn swaps_for_user(&self, user_id: &str) -> CoreResult<Vec<Swap>> {
        let swaps = self.swaps.read().await;
        let mut found: Vec<Swap> = swaps
            .values()
            .filter(|s| s.is_participant(user_id))
            .cloned()
            .collect();
        newest_first(&mut found);
        Ok(found)
    }

    async fn expired_pending(&self, now: DateTime<Utc>) -> CoreResult<Vec<Swap>> {
        let swaps = self.swaps.read().await;
        let mut expired: Vec<Swap> = swaps
            .values()
            .filter(|s| s.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|s| s.response_deadline);
        Ok(expired)
    }
}

#[derive(Default)]
pub struct InMemoryRatingStore {
    ratings: RwLock<HashMap<Uuid, Rating>>,
}

impl InMemoryRatingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_ratings_first(items: &mut [Rating]) {
    items.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

#[async_trait]
impl RatingStore for InMemoryRatingStore {
    async fn insert_rating(&self, rating: &Rating) -> CoreResult<()> {
        let mut ratings = self.ratings.write().await;

        if ratings
            .values()
            .any(|r| r.swap_id == rating.swap_id && r.reviewer == rating.reviewer)
        {
            return Err(CoreError::DuplicateRating {
                swap_id: rating.swap_id,
                reviewer: rating.reviewer.clone(),
            });
        }

        ratings.insert(rating.id, rating.clone());
        Ok(())
    }

    async fn get_rating(&self, id: Uuid) -> CoreResult<Option<Rating>> {
        Ok(self.ratings.read().await.get(&id).cloned())
    }

    async fn update_rating(
        &self,
        rating: &Rating,
        expected_updated_at: DateTime<Utc>,
    ) -> CoreResult<()> {
        let mut ratings = self.ratings.write().await;
        let stored = ratings
            .get_mut(&rating.id)
            .ok_or_else(|| CoreError::not_found("rating", rating.id))?;

        if stored.updated_at != expected_updated_at {
            return Err(rating_conflict(rating.id, expected_updated_at, stored.updated_at));
        }

        *stored = rating.clone();
        Ok(())
    }

    async fn delete_rating(&self, id: Uuid) -> CoreResult<bool> {
        Ok(self.ratings.write().await.remove(&id).is_some())
    }

    async fn ratings_for_swap(&self, swap_id: Uuid) -> CoreResult<Vec<Rating>> {
        let ratings = self.ratings.read().await;
        let mut found: Vec<Rating> = ratings
            .values()
            .filter(|r| r.swap_id == swap_id)
            .cloned()
            .collect();
        newest_ratings_first(&mut found);
        Ok(found)
    }

    async fn ratings_received(
        &self,
        reviewee: &str,
        visible_only: bool,
    ) -> CoreResult<Vec<Rating>> {
        let ratings = self.ratings.read().await;
        let mut found: Vec<Rating> = ratings
            .values()
            .filter(|r| r.reviewee == reviewee && (!visible_only || r.is_visible()))
            .cloned()
            .collect();
        newest_ratings_first(&mut found);
        Ok(found)
    }

    async fn flagged_ratings(&self) -> CoreResult<Vec<Rating>> {
        let ratings = self.ratings.read().await;
        let mut found: Vec<Rating> = ratings.values().filter(|r| r.is_flagged).cloned().collect();
        newest_ratings_first(&mut found);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rating::CategoryScores;
    use crate::swap::MeetingType;
    use chrono::Duration;

    fn pending(requester: &str, receiver: &str) -> Swap {
        let now = Utc::now();
        Swap {
            id: Uuid::new_v4(),
            requester: requester.to_string(),
            receiver: receiver.to_string(),
            requested_skill: "Spanish".to_string(),
            offered_skill: "Photoshop".to_string(),
            message: None,
            status: SwapStatus::Pending,
            accepted_at: None,
            rejected_at: None,
            cancelled_at: None,
            completed_at: None,
            response_deadline: now + Duration::days(7),
            meeting_type: MeetingType::Online,
            location: None,
            proposed_date: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn rating_for(swap_id: Uuid, reviewer: &str, reviewee: &str) -> Rating {
        let now = Utc::now();
        Rating {
            id: Uuid::new_v4(),
            swap_id,
            reviewer: reviewer.to_string(),
            reviewee: reviewee.to_string(),
            rating: 4,
            feedback: None,
            categories: CategoryScores::default(),
            would_recommend: true,
            is_public: true,
            is_anonymous: false,
            is_approved: true,
            is_flagged: false,
            flag_reason: None,
            admin_reviewed: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_one_pending_swap_per_pair() {
        let store = InMemorySwapStore::new();
        assert!(store.is_empty().await);
        let first = pending("alice", "bob");
        store.insert_swap(&first).await.unwrap();

        let err = store.insert_swap(&pending("bob", "alice")).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::NotEligible(Ineligibility::DuplicatePending(id)) if id == first.id
        ));

        // A different pair is unaffected
        store.insert_swap(&pending("alice", "carol")).await.unwrap();
        assert_eq!(store.len().await, 2);
        assert!(!store.is_empty().await);
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_swap() {
        let store = InMemorySwapStore::new();
        let swap = pending("alice", "bob");
        store.insert_swap(&swap).await.unwrap();

        let now = Utc::now();
        let accepted = store
            .transition_swap(swap.id, SwapStatus::Pending, SwapStatus::Accepted, now)
            .await
            .unwrap();
        assert_eq!(accepted.accepted_at, Some(now));

        let err = store
            .transition_swap(swap.id, SwapStatus::Pending, SwapStatus::Rejected, now)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict { .. }));

        let stored = store.get_swap(swap.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SwapStatus::Accepted);
        assert_eq!(stored.rejected_at, None);
    }

    #[tokio::test]
    async fn test_rating_uniqueness_and_cas_update() {
        let store = InMemoryRatingStore::new();
        let swap_id = Uuid::new_v4();
        let rating = rating_for(swap_id, "alice", "bob");
        store.insert_rating(&rating).await.unwrap();

        let dup = store.insert_rating(&rating_for(swap_id, "alice", "bob")).await;
        assert!(matches!(dup, Err(CoreError::DuplicateRating { .. })));
        store.insert_rating(&rating_for(swap_id, "bob", "alice")).await.unwrap();

        let mut edited = rating.clone();
        edited.rating = 2;
        edited.updated_at = rating.updated_at + Duration::minutes(5);
        store.update_rating(&edited, rating.updated_at).await.unwrap();

        // A writer holding the old version loses
        let stale = store.update_rating(&edited, rating.updated_at).await;
        assert!(matches!(stale, Err(CoreError::Conflict { .. })));

        assert_eq!(store.ratings_for_swap(swap_id).await.unwrap().len(), 2);
        assert!(store.delete_rating(rating.id).await.unwrap());
        assert!(!store.delete_rating(rating.id).await.unwrap());
    }
}
