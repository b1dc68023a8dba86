//! Storage seams for swaps and ratings
//!
//! Every write is a conditional update scoped by record id. Implementations
//! must enforce, at write time:
//!
//! - at most one `pending` swap per unordered user pair
//!   ([`Ineligibility::DuplicatePending`](crate::error::Ineligibility))
//! - swap transitions only from the expected prior status ([`CoreError::Conflict`])
//! - at most one rating per `(swap, reviewer)` ([`CoreError::DuplicateRating`])
//!
//! Writes that must land together with a user-counter update (completing a
//! swap, folding a rating into a reputation) go through defaulted methods
//! that the PostgreSQL backend overrides with a single transaction.
//!
//! Two backends exist: [`memory`] for a single process and
//! [`crate::database`] for PostgreSQL.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, warn};
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::rating::Rating;
use crate::reputation::aggregate;
use crate::swap::{Swap, SwapQuery, SwapStatus};
use crate::users::{Reputation, UserDirectory};

pub use memory::{InMemoryRatingStore, InMemorySwapStore};

#[async_trait]
pub trait SwapStore: Send + Sync {
    async fn insert_swap(&self, swap: &Swap) -> CoreResult<()>;

    async fn get_swap(&self, id: Uuid) -> CoreResult<Option<Swap>>;

    /// All swaps between two users, in either direction
    async fn swaps_between(&self, a: &str, b: &str) -> CoreResult<Vec<Swap>>;

    /// Compare-and-swap on status. Stamps the target state's timestamp only
    /// if it is unset.
    async fn transition_swap(
        &self,
        id: Uuid,
        expected: SwapStatus,
        next: SwapStatus,
        at: DateTime<Utc>,
    ) -> CoreResult<Swap>;

    /// Newest first, with the total count before paging
    async fn list_swaps(&self, query: &SwapQuery) -> CoreResult<(Vec<Swap>, u64)>;

    async fn swaps_for_user(&self, user_id: &str) -> CoreResult<Vec<Swap>>;

    async fn expired_pending(&self, now: DateTime<Utc>) -> CoreResult<Vec<Swap>>;

    /// Move an accepted swap to `completed` and credit both participants'
    /// `total_swaps`
    ///
    /// When the credit fails after the status commit, both counters are
    /// recounted from stored swaps before the error is surfaced.
    async fn complete_swap(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        users: &dyn UserDirectory,
    ) -> CoreResult<Swap> {
        let swap = self
            .transition_swap(id, SwapStatus::Accepted, SwapStatus::Completed, at)
            .await?;

        if let Err(err) = users.record_completed_swap(&swap.requester, &swap.receiver).await {
            warn!(swap_id = %id, error = %err, "Swap credit failed, recounting participants");
            for user_id in [&swap.requester, &swap.receiver] {
                if let Err(repair) = reconcile_total_swaps(self, users, user_id).await {
                    error!(
                        swap_id = %id,
                        user_id = %user_id,
                        error = %repair,
                        "Swap count left stale; run reconcile_swap_counts"
                    );
                    return Err(err);
                }
            }
        }
        Ok(swap)
    }
}

/// Recount a user's completed swaps and store the result as `total_swaps`
pub async fn reconcile_total_swaps<S>(
    swaps: &S,
    users: &dyn UserDirectory,
    user_id: &str,
) -> CoreResult<u32>
where
    S: SwapStore + ?Sized,
{
    let completed = swaps
        .swaps_for_user(user_id)
        .await?
        .iter()
        .filter(|swap| swap.status == SwapStatus::Completed)
        .count();
    let total = u32::try_from(completed).unwrap_or(u32::MAX);
    users.set_total_swaps(user_id, total).await?;
    Ok(total)
}

#[async_trait]
pub trait RatingStore: Send + Sync {
    async fn insert_rating(&self, rating: &Rating) -> CoreResult<()>;

    async fn get_rating(&self, id: Uuid) -> CoreResult<Option<Rating>>;

    /// Overwrite a rating's values if it has not changed since
    /// `expected_updated_at`
    async fn update_rating(
        &self,
        rating: &Rating,
        expected_updated_at: DateTime<Utc>,
    ) -> CoreResult<()>;

    /// Returns false if the rating did not exist
    async fn delete_rating(&self, id: Uuid) -> CoreResult<bool>;

    async fn ratings_for_swap(&self, swap_id: Uuid) -> CoreResult<Vec<Rating>>;

    /// Ratings received by `reviewee`, newest first. With `visible_only`,
    /// restricted to approved public ratings.
    async fn ratings_received(
        &self,
        reviewee: &str,
        visible_only: bool,
    ) -> CoreResult<Vec<Rating>>;

    async fn flagged_ratings(&self) -> CoreResult<Vec<Rating>>;

    /// Fold a newly stored visible rating into the reviewee's reputation
    async fn fold_new_rating(
        &self,
        rating: &Rating,
        users: &dyn UserDirectory,
    ) -> CoreResult<Reputation> {
        users.add_rating(&rating.reviewee, rating.rating).await
    }

    /// Replace the reviewee's reputation with the aggregate of the stored
    /// ratings
    ///
    /// A backend that holds the user profiles in the same database may
    /// compute and write it there in one statement.
    async fn materialize_reputation(
        &self,
        reviewee: &str,
        users: &dyn UserDirectory,
    ) -> CoreResult<Reputation> {
        let canonical = aggregate(&self.ratings_received(reviewee, true).await?);
        users.set_reputation(reviewee, canonical).await?;
        Ok(canonical)
    }
}

pub(crate) fn rating_conflict(
    rating_id: Uuid,
    expected: DateTime<Utc>,
    found: DateTime<Utc>,
) -> CoreError {
    CoreError::Conflict {
        entity: "rating",
        id: rating_id,
        expected: expected.to_rfc3339(),
        found: found.to_rfc3339(),
    }
}

pub(crate) fn swap_conflict(swap_id: Uuid, expected: SwapStatus, found: SwapStatus) -> CoreError {
    CoreError::Conflict {
        entity: "swap",
        id: swap_id,
        expected: expected.to_string(),
        found: found.to_string(),
    }
}
