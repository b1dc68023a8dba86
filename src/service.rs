//! Skill Swap Service
//!
//! The operation surface the outer layers (HTTP handlers, admin tooling,
//! the sweep daemon) call. It loads the data each component needs and wires
//! the lifecycle manager, rating ledger and reputation aggregator to the same
//! stores.

use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::SkillSwapConfig;
use crate::database::DatabasePool;
use crate::error::{CoreError, CoreResult};
use crate::rating::{NewRating, PublicRating, Rating, RatingEdit, RatingLedger, RatingPolicy};
use crate::reputation::{ReputationAggregator, UserRatingStats};
use crate::store::{InMemoryRatingStore, InMemorySwapStore, RatingStore, SwapStore};
use crate::swap::{
    EligibilityChecker, EligibleSwap, LifecyclePolicy, NewSwap, Swap, SwapAction,
    SwapLifecycleManager, SwapPage, SwapQuery, SwapStats, SweepReport,
};
use crate::users::{Reputation, UserDirectory};

pub struct SkillSwapService {
    swaps: Arc<dyn SwapStore>,
    users: Arc<dyn UserDirectory>,
    checker: EligibilityChecker,
    lifecycle: SwapLifecycleManager,
    ledger: RatingLedger,
    aggregator: Arc<ReputationAggregator>,
}

impl SkillSwapService {
    pub fn new(
        swaps: Arc<dyn SwapStore>,
        ratings: Arc<dyn RatingStore>,
        users: Arc<dyn UserDirectory>,
        clock: Arc<dyn Clock>,
        lifecycle_policy: LifecyclePolicy,
        rating_policy: RatingPolicy,
    ) -> Self {
        let aggregator = Arc::new(ReputationAggregator::new(ratings.clone(), users.clone()));
        let lifecycle = SwapLifecycleManager::new(
            swaps.clone(),
            users.clone(),
            clock.clone(),
            lifecycle_policy,
        );
        let ledger = RatingLedger::new(
            swaps.clone(),
            ratings,
            users.clone(),
            aggregator.clone(),
            clock,
            rating_policy,
        );

        Self {
            swaps,
            users,
            checker: EligibilityChecker::new(),
            lifecycle,
            ledger,
            aggregator,
        }
    }

    /// Process-local stores; profiles come from `users`
    pub fn in_memory(users: Arc<dyn UserDirectory>, config: &SkillSwapConfig) -> Self {
        Self::new(
            Arc::new(InMemorySwapStore::new()),
            Arc::new(InMemoryRatingStore::new()),
            users,
            Arc::new(SystemClock),
            config.swap.to_lifecycle_policy(),
            config.rating.to_rating_policy(),
        )
    }

    /// PostgreSQL-backed stores and user profile mirror
    pub fn with_postgres(db: &DatabasePool, config: &SkillSwapConfig) -> Self {
        Self::new(
            db.swaps(),
            db.ratings(),
            db.users(),
            Arc::new(SystemClock),
            config.swap.to_lifecycle_policy(),
            config.rating.to_rating_policy(),
        )
    }

    pub fn lifecycle(&self) -> &SwapLifecycleManager {
        &self.lifecycle
    }

    pub fn ledger(&self) -> &RatingLedger {
        &self.ledger
    }

    // ==================== Swaps ====================

    /// Run every eligibility rule against current profiles and swaps
    pub async fn check_eligibility(&self, request: NewSwap) -> CoreResult<EligibleSwap> {
        request.validate()?;

        let requester = self
            .users
            .get_user(&request.requester)
            .await?
            .ok_or_else(|| CoreError::not_found("user", &request.requester))?;
        let receiver = self.users.get_user(&request.receiver).await?;
        let existing = self
            .swaps
            .swaps_between(&request.requester, &request.receiver)
            .await?;

        self.checker
            .check(request, &requester, receiver.as_ref(), &existing)
    }

    pub async fn create_swap(&self, request: NewSwap) -> CoreResult<Swap> {
        let eligible = self.check_eligibility(request).await?;
        self.lifecycle.create(eligible).await
    }

    pub async fn transition_swap(
        &self,
        swap_id: Uuid,
        actor: &str,
        action: SwapAction,
    ) -> CoreResult<Swap> {
        self.lifecycle.transition(swap_id, actor, action).await
    }

    pub async fn get_swap(&self, swap_id: Uuid, actor: &str) -> CoreResult<Swap> {
        self.lifecycle.get(swap_id, actor).await
    }

    pub async fn list_swaps(&self, query: &SwapQuery) -> CoreResult<SwapPage> {
        self.lifecycle.list(query).await
    }

    pub async fn swap_stats(&self, user_id: &str) -> CoreResult<SwapStats> {
        self.lifecycle.stats(user_id).await
    }

    pub async fn sweep_expired(&self) -> CoreResult<SweepReport> {
        self.lifecycle.sweep_expired().await
    }

    /// Repair a user's `total_swaps` after a failed completion credit
    pub async fn reconcile_swap_counts(&self, user_id: &str) -> CoreResult<u32> {
        self.lifecycle.reconcile_swap_counts(user_id).await
    }

    // ==================== Ratings ====================

    pub async fn submit_rating(&self, request: NewRating) -> CoreResult<Rating> {
        self.ledger.submit(request).await
    }

    pub async fn edit_rating(
        &self,
        rating_id: Uuid,
        actor: &str,
        edit: RatingEdit,
    ) -> CoreResult<Rating> {
        self.ledger.edit(rating_id, actor, edit).await
    }

    pub async fn flag_rating(&self, rating_id: Uuid, actor: &str, reason: &str) -> CoreResult<()> {
        self.ledger.flag(rating_id, actor, reason).await
    }

    pub async fn approve_rating(&self, rating_id: Uuid, admin: &str) -> CoreResult<Rating> {
        self.ledger.approve(rating_id, admin).await
    }

    pub async fn delete_rating(&self, rating_id: Uuid, actor: &str) -> CoreResult<()> {
        self.ledger.delete(rating_id, actor).await
    }

    pub async fn get_rating(&self, rating_id: Uuid) -> CoreResult<Rating> {
        self.ledger.get(rating_id).await
    }

    pub async fn ratings_for_swap(&self, swap_id: Uuid) -> CoreResult<Vec<Rating>> {
        self.ledger.ratings_for_swap(swap_id).await
    }

    pub async fn ratings_for_user(
        &self,
        user_id: &str,
        page: u32,
        limit: u32,
    ) -> CoreResult<(Vec<PublicRating>, u64)> {
        self.ledger.ratings_for_user(user_id, page, limit).await
    }

    pub async fn flagged_ratings(&self, admin: &str) -> CoreResult<Vec<Rating>> {
        self.ledger.flagged(admin).await
    }

    // ==================== Reputation ====================

    pub async fn get_user_rating_stats(&self, user_id: &str) -> CoreResult<UserRatingStats> {
        debug!(user_id = %user_id, "Computing rating stats");
        self.ledger.stats(user_id).await
    }

    /// Rebuild a user's materialized reputation from stored ratings
    pub async fn recompute_reputation(&self, user_id: &str) -> CoreResult<Reputation> {
        let before = self.aggregator.materialized(user_id).await?;
        let after = self.aggregator.recompute(user_id).await?;
        if before != after {
            info!(
                user_id = %user_id,
                before = before.average_rating,
                after = after.average_rating,
                total = after.total_ratings,
                "Reputation corrected by recompute"
            );
        }
        Ok(after)
    }
}
