//! Rating Ledger
//!
//! Owns rating creation, edits and moderation. Each mutation takes the
//! reviewee's reputation guard first, writes the rating, then updates the
//! materialized score before the guard is released.

use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{CoreError, CoreResult, Ineligibility};
use crate::rating::{NewRating, PublicRating, Rating, RatingEdit, MAX_FLAG_REASON_CHARS};
use crate::reputation::{ReputationAggregator, UserRatingStats};
use crate::store::{RatingStore, SwapStore};
use crate::swap::{Swap, SwapStatus, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
use crate::users::UserDirectory;

#[derive(Debug, Clone, Copy)]
pub struct RatingPolicy {
    /// How long a reviewer may edit or delete their rating
    pub edit_window: Duration,
}

impl Default for RatingPolicy {
    fn default() -> Self {
        Self {
            edit_window: Duration::hours(24),
        }
    }
}

pub struct RatingLedger {
    swaps: Arc<dyn SwapStore>,
    ratings: Arc<dyn RatingStore>,
    users: Arc<dyn UserDirectory>,
    aggregator: Arc<ReputationAggregator>,
    clock: Arc<dyn Clock>,
    policy: RatingPolicy,
}

impl RatingLedger {
    pub fn new(
        swaps: Arc<dyn SwapStore>,
        ratings: Arc<dyn RatingStore>,
        users: Arc<dyn UserDirectory>,
        aggregator: Arc<ReputationAggregator>,
        clock: Arc<dyn Clock>,
        policy: RatingPolicy,
    ) -> Self {
        Self {
            swaps,
            ratings,
            users,
            aggregator,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &RatingPolicy {
        &self.policy
    }

    async fn load_swap(&self, swap_id: Uuid) -> CoreResult<Swap> {
        self.swaps
            .get_swap(swap_id)
            .await?
            .ok_or_else(|| CoreError::not_found("swap", swap_id))
    }

    async fn load_rating(&self, rating_id: Uuid) -> CoreResult<Rating> {
        self.ratings
            .get_rating(rating_id)
            .await?
            .ok_or_else(|| CoreError::not_found("rating", rating_id))
    }

    async fn require_admin(&self, actor: &str, action: &str) -> CoreResult<()> {
        let is_admin = self
            .users
            .get_user(actor)
            .await?
            .map(|user| user.is_admin())
            .unwrap_or(false);
        if !is_admin {
            warn!(actor = %actor, action = %action, "Non-admin attempted moderation");
            return Err(CoreError::forbidden(actor, action));
        }
        Ok(())
    }

    /// Record a rating for a completed swap
    pub async fn submit(&self, request: NewRating) -> CoreResult<Rating> {
        request.validate()?;

        let swap = self.load_swap(request.swap_id).await?;
        if swap.status != SwapStatus::Completed {
            return Err(Ineligibility::SwapNotCompleted(swap.id).into());
        }

        let expected_reviewee = swap
            .other_participant(&request.reviewer)
            .ok_or_else(|| CoreError::NotParticipant {
                user_id: request.reviewer.clone(),
                swap_id: swap.id,
            })?;
        if expected_reviewee != request.reviewee {
            return Err(CoreError::WrongReviewee {
                expected: expected_reviewee.to_string(),
                actual: request.reviewee.clone(),
            });
        }

        let rating = request.into_rating(self.clock.now());

        let guard = self.aggregator.lock(&rating.reviewee).await;
        self.ratings.insert_rating(&rating).await?;
        let reputation = match self.aggregator.apply_new_rating(&guard, &rating).await {
            Ok(reputation) => reputation,
            Err(err) => {
                // Undo the insert so a retry is not a duplicate
                warn!(
                    rating_id = %rating.id,
                    error = %err,
                    "Reputation update failed, removing rating"
                );
                if let Err(rollback) = self.ratings.delete_rating(rating.id).await {
                    error!(
                        rating_id = %rating.id,
                        reviewee = %rating.reviewee,
                        error = %rollback,
                        "Rating kept without reputation effect; recompute the reviewee"
                    );
                }
                return Err(err);
            }
        };
        drop(guard);

        info!(
            rating_id = %rating.id,
            swap_id = %rating.swap_id,
            reviewer = %rating.reviewer,
            reviewee = %rating.reviewee,
            score = rating.rating,
            average = reputation.average_rating,
            "Rating submitted"
        );
        Ok(rating)
    }

    /// Reviewer edit within the edit window
    pub async fn edit(
        &self,
        rating_id: Uuid,
        actor: &str,
        edit: RatingEdit,
    ) -> CoreResult<Rating> {
        edit.validate()?;

        let rating = self.load_rating(rating_id).await?;
        if rating.reviewer != actor {
            return Err(CoreError::forbidden(actor, format!("edit rating {}", rating_id)));
        }

        let now = self.clock.now();
        if !rating.within_edit_window(now, self.policy.edit_window) {
            return Err(Ineligibility::EditWindowClosed(rating_id).into());
        }

        let guard = self.aggregator.lock(&rating.reviewee).await;
        // Re-read under the guard so the CAS compares against the latest version
        let mut current = self.load_rating(rating_id).await?;
        let expected = current.updated_at;
        edit.apply(&mut current, now);
        self.ratings.update_rating(&current, expected).await?;
        self.aggregator.recompute_locked(&guard).await?;
        drop(guard);

        debug!(rating_id = %rating_id, score = current.rating, "Rating edited");
        Ok(current)
    }

    /// Flag a rating for moderation; hides it from aggregates
    pub async fn flag(&self, rating_id: Uuid, actor: &str, reason: &str) -> CoreResult<()> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(CoreError::validation("reason", "must not be empty"));
        }
        if reason.chars().count() > MAX_FLAG_REASON_CHARS {
            return Err(CoreError::validation(
                "reason",
                format!("must be at most {} characters", MAX_FLAG_REASON_CHARS),
            ));
        }

        let rating = self.load_rating(rating_id).await?;
        let swap = self.load_swap(rating.swap_id).await?;
        if !swap.is_participant(actor) {
            return Err(CoreError::NotParticipant {
                user_id: actor.to_string(),
                swap_id: swap.id,
            });
        }
        if rating.reviewer == actor {
            return Err(CoreError::forbidden(actor, format!("flag own rating {}", rating_id)));
        }

        let guard = self.aggregator.lock(&rating.reviewee).await;
        let mut current = self.load_rating(rating_id).await?;
        let expected = current.updated_at;
        current.is_flagged = true;
        current.is_approved = false;
        current.flag_reason = Some(reason.to_string());
        current.updated_at = self.clock.now();
        self.ratings.update_rating(&current, expected).await?;
        self.aggregator.recompute_locked(&guard).await?;
        drop(guard);

        info!(rating_id = %rating_id, flagged_by = %actor, "Rating flagged for review");
        Ok(())
    }

    /// Admin approval; restores a flagged rating to the aggregates
    pub async fn approve(&self, rating_id: Uuid, admin: &str) -> CoreResult<Rating> {
        self.require_admin(admin, &format!("approve rating {}", rating_id))
            .await?;

        let rating = self.load_rating(rating_id).await?;
        let guard = self.aggregator.lock(&rating.reviewee).await;
        let mut current = self.load_rating(rating_id).await?;
        let expected = current.updated_at;
        current.is_approved = true;
        current.is_flagged = false;
        current.admin_reviewed = true;
        current.updated_at = self.clock.now();
        self.ratings.update_rating(&current, expected).await?;
        self.aggregator.recompute_locked(&guard).await?;
        drop(guard);

        info!(rating_id = %rating_id, admin = %admin, "Rating approved");
        Ok(current)
    }

    /// Hard delete: the reviewer inside the edit window, or an admin
    pub async fn delete(&self, rating_id: Uuid, actor: &str) -> CoreResult<()> {
        let rating = self.load_rating(rating_id).await?;

        if rating.reviewer == actor {
            if !rating.within_edit_window(self.clock.now(), self.policy.edit_window) {
                // Past the window only an admin may remove it
                match self
                    .require_admin(actor, &format!("delete rating {}", rating_id))
                    .await
                {
                    Ok(()) => {}
                    Err(CoreError::Forbidden { .. }) => {
                        return Err(Ineligibility::EditWindowClosed(rating_id).into());
                    }
                    Err(err) => return Err(err),
                }
            }
        } else {
            self.require_admin(actor, &format!("delete rating {}", rating_id))
                .await?;
        }

        let guard = self.aggregator.lock(&rating.reviewee).await;
        if !self.ratings.delete_rating(rating_id).await? {
            return Err(CoreError::not_found("rating", rating_id));
        }
        self.aggregator.recompute_locked(&guard).await?;
        drop(guard);

        info!(rating_id = %rating_id, actor = %actor, "Rating deleted");
        Ok(())
    }

    pub async fn get(&self, rating_id: Uuid) -> CoreResult<Rating> {
        self.load_rating(rating_id).await
    }

    pub async fn ratings_for_swap(&self, swap_id: Uuid) -> CoreResult<Vec<Rating>> {
        self.ratings.ratings_for_swap(swap_id).await
    }

    /// Approved public ratings a user received, newest first
    pub async fn ratings_for_user(
        &self,
        user_id: &str,
        page: u32,
        limit: u32,
    ) -> CoreResult<(Vec<PublicRating>, u64)> {
        if page == 0 {
            return Err(CoreError::validation("page", "pages start at 1"));
        }
        let limit = if limit == 0 { DEFAULT_PAGE_LIMIT } else { limit.min(MAX_PAGE_LIMIT) };

        let ratings = self.ratings.ratings_received(user_id, true).await?;
        let total = ratings.len() as u64;
        let offset = (page as usize - 1) * limit as usize;
        let page = ratings
            .iter()
            .skip(offset)
            .take(limit as usize)
            .map(Rating::to_public)
            .collect();
        Ok((page, total))
    }

    /// Moderation queue
    pub async fn flagged(&self, admin: &str) -> CoreResult<Vec<Rating>> {
        self.require_admin(admin, "view flagged ratings").await?;
        self.ratings.flagged_ratings().await
    }

    pub async fn stats(&self, user_id: &str) -> CoreResult<UserRatingStats> {
        self.aggregator.stats(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ErrorKind;
    use crate::store::{InMemoryRatingStore, InMemorySwapStore};
    use crate::swap::{MeetingType, Swap};
    use crate::users::testing::FaultyDirectory;
    use crate::users::UserProfile;
    use chrono::Utc;

    struct Fixture {
        ledger: RatingLedger,
        swaps: Arc<InMemorySwapStore>,
        ratings: Arc<InMemoryRatingStore>,
        users: Arc<FaultyDirectory>,
        aggregator: Arc<ReputationAggregator>,
        clock: ManualClock,
    }

    async fn fixture() -> Fixture {
        let swaps = Arc::new(InMemorySwapStore::new());
        let ratings = Arc::new(InMemoryRatingStore::new());
        let users = Arc::new(FaultyDirectory::new());
        for profile in [
            UserProfile::new("alice"),
            UserProfile::new("bob"),
            UserProfile::new("carol"),
            UserProfile::new("root").admin(),
        ] {
            users.upsert(profile).await;
        }

        let clock = ManualClock::new(Utc::now());
        let aggregator = Arc::new(ReputationAggregator::new(ratings.clone(), users.clone()));
        let ledger = RatingLedger::new(
            swaps.clone(),
            ratings.clone(),
            users.clone(),
            aggregator.clone(),
            Arc::new(clock.clone()),
            RatingPolicy::default(),
        );
        Fixture {
            ledger,
            swaps,
            ratings,
            users,
            aggregator,
            clock,
        }
    }

    async fn swap_in(fx: &Fixture, status: SwapStatus) -> Swap {
        let now = fx.clock.now();
        let swap = Swap {
            id: Uuid::new_v4(),
            requester: "alice".to_string(),
            receiver: "bob".to_string(),
            requested_skill: "Spanish".to_string(),
            offered_skill: "Photoshop".to_string(),
            message: None,
            status,
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
        };
        fx.swaps.insert_swap(&swap).await.unwrap();
        swap
    }

    async fn bob_average(fx: &Fixture) -> f64 {
        fx.users.get_user("bob").await.unwrap().unwrap().average_rating
    }

    #[tokio::test]
    async fn test_submit_requires_completed_swap() {
        let fx = fixture().await;
        let swap = swap_in(&fx, SwapStatus::Accepted).await;
        let err = fx
            .ledger
            .submit(NewRating::new(swap.id, "alice", "bob", 5))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::NotEligible(Ineligibility::SwapNotCompleted(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_checks_participants() {
        let fx = fixture().await;
        let swap = swap_in(&fx, SwapStatus::Completed).await;

        let err = fx
            .ledger
            .submit(NewRating::new(swap.id, "carol", "bob", 5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotParticipant);

        let err = fx
            .ledger
            .submit(NewRating::new(swap.id, "alice", "alice", 5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WrongReviewee);

        let err = fx
            .ledger
            .submit(NewRating::new(swap.id, "alice", "carol", 5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WrongReviewee);
    }

    #[tokio::test]
    async fn test_submit_updates_reputation() {
        let fx = fixture().await;
        let swap = swap_in(&fx, SwapStatus::Completed).await;

        fx.ledger
            .submit(NewRating::new(swap.id, "alice", "bob", 4))
            .await
            .unwrap();
        let bob = fx.users.get_user("bob").await.unwrap().unwrap();
        assert_eq!(bob.total_ratings, 1);
        assert!((bob.average_rating - 4.0).abs() < f64::EPSILON);

        let dup = fx
            .ledger
            .submit(NewRating::new(swap.id, "alice", "bob", 1))
            .await
            .unwrap_err();
        assert_eq!(dup.kind(), ErrorKind::DuplicateRating);
        // Failed duplicate left the score alone
        assert!((bob_average(&fx).await - 4.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_edit_window() {
        let fx = fixture().await;
        let swap = swap_in(&fx, SwapStatus::Completed).await;
        let rating = fx
            .ledger
            .submit(NewRating::new(swap.id, "alice", "bob", 3))
            .await
            .unwrap();

        let err = fx
            .ledger
            .edit(rating.id, "bob", RatingEdit::score(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        fx.clock.advance(Duration::hours(23));
        fx.ledger
            .edit(rating.id, "alice", RatingEdit::score(5))
            .await
            .unwrap();
        assert!((bob_average(&fx).await - 5.0).abs() < f64::EPSILON);

        fx.clock.advance(Duration::hours(2));
        let err = fx
            .ledger
            .edit(rating.id, "alice", RatingEdit::score(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::NotEligible(Ineligibility::EditWindowClosed(_))
        ));
        assert!((bob_average(&fx).await - 5.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_flag_and_approve_cycle() {
        let fx = fixture().await;
        let swap = swap_in(&fx, SwapStatus::Completed).await;
        let rating = fx
            .ledger
            .submit(NewRating::new(swap.id, "alice", "bob", 2))
            .await
            .unwrap();

        // Reviewer cannot flag their own rating, outsiders cannot flag at all
        let err = fx.ledger.flag(rating.id, "alice", "spam").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        let err = fx.ledger.flag(rating.id, "carol", "spam").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotParticipant);
        let err = fx.ledger.flag(rating.id, "bob", "   ").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        fx.ledger.flag(rating.id, "bob", "unfair").await.unwrap();
        let bob = fx.users.get_user("bob").await.unwrap().unwrap();
        assert_eq!(bob.total_ratings, 0);

        let flagged = fx.ledger.flagged("root").await.unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].flag_reason.as_deref(), Some("unfair"));

        let err = fx.ledger.approve(rating.id, "bob").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        let approved = fx.ledger.approve(rating.id, "root").await.unwrap();
        assert!(approved.admin_reviewed);
        let bob = fx.users.get_user("bob").await.unwrap().unwrap();
        assert_eq!(bob.total_ratings, 1);
        assert!((bob.average_rating - 2.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_delete_rules() {
        let fx = fixture().await;
        let swap = swap_in(&fx, SwapStatus::Completed).await;
        let from_alice = fx
            .ledger
            .submit(NewRating::new(swap.id, "alice", "bob", 5))
            .await
            .unwrap();
        let from_bob = fx
            .ledger
            .submit(NewRating::new(swap.id, "bob", "alice", 3))
            .await
            .unwrap();

        fx.ledger.delete(from_alice.id, "alice").await.unwrap();
        assert_eq!(fx.users.get_user("bob").await.unwrap().unwrap().total_ratings, 0);

        fx.clock.advance(Duration::hours(30));
        let err = fx.ledger.delete(from_bob.id, "bob").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotEligible);
        let err = fx.ledger.delete(from_bob.id, "carol").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        fx.ledger.delete(from_bob.id, "root").await.unwrap();
        assert_eq!(fx.users.get_user("alice").await.unwrap().unwrap().total_ratings, 0);
    }

    #[tokio::test]
    async fn test_public_listing_masks_anonymous() {
        let fx = fixture().await;
        let swap = swap_in(&fx, SwapStatus::Completed).await;
        let mut request = NewRating::new(swap.id, "alice", "bob", 5);
        request.is_anonymous = Some(true);
        fx.ledger.submit(request).await.unwrap();

        let (page, total) = fx.ledger.ratings_for_user("bob", 1, 10).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].reviewer, None);
    }

    #[tokio::test]
    async fn test_late_delete_surfaces_storage_failure() {
        let fx = fixture().await;
        let swap = swap_in(&fx, SwapStatus::Completed).await;
        let rating = fx
            .ledger
            .submit(NewRating::new(swap.id, "alice", "bob", 4))
            .await
            .unwrap();

        fx.clock.advance(Duration::hours(30));
        FaultyDirectory::set(&fx.users.fail_reads, true);
        let err = fx.ledger.delete(rating.id, "alice").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(!err.is_recoverable());

        // With the directory back, a non-admin reviewer is past the window
        FaultyDirectory::set(&fx.users.fail_reads, false);
        let err = fx.ledger.delete(rating.id, "alice").await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::NotEligible(Ineligibility::EditWindowClosed(id)) if id == rating.id
        ));
        assert!(fx.ledger.get(rating.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_failed_reputation_write_leaves_no_rating() {
        let fx = fixture().await;
        let swap = swap_in(&fx, SwapStatus::Completed).await;

        FaultyDirectory::set(&fx.users.fail_reputation, true);
        let err = fx
            .ledger
            .submit(NewRating::new(swap.id, "alice", "bob", 4))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(fx.ratings.ratings_for_swap(swap.id).await.unwrap().is_empty());

        // Once storage recovers the same submission goes through
        FaultyDirectory::set(&fx.users.fail_reputation, false);
        fx.ledger
            .submit(NewRating::new(swap.id, "alice", "bob", 4))
            .await
            .unwrap();

        let bob = fx.users.get_user("bob").await.unwrap().unwrap();
        let canonical = fx.aggregator.compute("bob").await.unwrap();
        assert_eq!(bob.total_ratings, 1);
        assert_eq!(canonical.total_ratings, 1);
        assert!((bob.average_rating - canonical.average_rating).abs() < f64::EPSILON);
    }
}
