//! Swap Lifecycle Manager
//!
//! Owns swap creation and every state transition. Transitions are validated
//! against the actor and the current status, then committed with a
//! compare-and-swap on that status so a concurrent writer fails with
//! `Conflict` instead of overwriting.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{CoreError, CoreResult, Ineligibility};
use crate::store::{reconcile_total_swaps, SwapStore};
use crate::swap::{EligibleSwap, Swap, SwapAction, SwapPage, SwapQuery, SwapStats, SwapStatus};
use crate::users::UserDirectory;

/// Whether a requester may still cancel after the receiver accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CancelPolicy {
    /// Cancellation is blocked only by completion
    #[default]
    AllowAfterAccept,
    /// Once accepted, a swap can only be completed
    PendingOnly,
}

impl CancelPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "allow-after-accept" => Some(CancelPolicy::AllowAfterAccept),
            "pending-only" => Some(CancelPolicy::PendingOnly),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LifecyclePolicy {
    /// Time a receiver has to respond before the swap counts as expired
    pub response_window: Duration,
    pub cancel_policy: CancelPolicy,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            response_window: Duration::days(7),
            cancel_policy: CancelPolicy::AllowAfterAccept,
        }
    }
}

/// Outcome of one expiry sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub cancelled: Vec<Uuid>,
    /// Swaps an actor moved while the sweep was running
    pub skipped: usize,
}

pub struct SwapLifecycleManager {
    swaps: Arc<dyn SwapStore>,
    users: Arc<dyn UserDirectory>,
    clock: Arc<dyn Clock>,
    policy: LifecyclePolicy,
}

impl SwapLifecycleManager {
    pub fn new(
        swaps: Arc<dyn SwapStore>,
        users: Arc<dyn UserDirectory>,
        clock: Arc<dyn Clock>,
        policy: LifecyclePolicy,
    ) -> Self {
        Self {
            swaps,
            users,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &LifecyclePolicy {
        &self.policy
    }

    /// Persist an eligible request as a new pending swap
    pub async fn create(&self, eligible: EligibleSwap) -> CoreResult<Swap> {
        let request = eligible.into_request();
        let now = self.clock.now();
        let response_deadline = now
            .checked_add_signed(self.policy.response_window)
            .ok_or_else(|| {
                CoreError::validation("response_window", "deadline is out of the supported range")
            })?;

        let swap = Swap {
            id: Uuid::new_v4(),
            requester: request.requester,
            receiver: request.receiver,
            requested_skill: request.requested_skill,
            offered_skill: request.offered_skill,
            message: request.message,
            status: SwapStatus::Pending,
            accepted_at: None,
            rejected_at: None,
            cancelled_at: None,
            completed_at: None,
            response_deadline,
            meeting_type: request.meeting_type.unwrap_or_default(),
            location: request.location,
            proposed_date: request.proposed_date,
            created_at: now,
            updated_at: now,
        };

        self.swaps.insert_swap(&swap).await?;

        info!(
            swap_id = %swap.id,
            requester = %swap.requester,
            receiver = %swap.receiver,
            "Swap requested"
        );
        Ok(swap)
    }

    /// Validate `action` for `actor` against the swap's current status
    ///
    /// Returns the status the swap must currently be in for the commit.
    pub fn authorize(
        &self,
        swap: &Swap,
        actor: &str,
        action: SwapAction,
    ) -> CoreResult<SwapStatus> {
        if !swap.is_participant(actor) {
            return Err(CoreError::NotParticipant {
                user_id: actor.to_string(),
                swap_id: swap.id,
            });
        }

        let allowed_actor = match action {
            SwapAction::Accept | SwapAction::Reject => swap.receiver == actor,
            SwapAction::Cancel => swap.requester == actor,
            SwapAction::Complete => true,
        };
        if !allowed_actor {
            return Err(CoreError::forbidden(
                actor,
                format!("{} swap {}", action, swap.id),
            ));
        }

        let status_ok = match action {
            SwapAction::Accept | SwapAction::Reject => swap.status == SwapStatus::Pending,
            SwapAction::Cancel => match self.policy.cancel_policy {
                CancelPolicy::AllowAfterAccept => {
                    matches!(swap.status, SwapStatus::Pending | SwapStatus::Accepted)
                }
                CancelPolicy::PendingOnly => swap.status == SwapStatus::Pending,
            },
            SwapAction::Complete => swap.status == SwapStatus::Accepted,
        };
        if !status_ok {
            return Err(Ineligibility::InvalidTransition {
                action,
                status: swap.status,
            }
            .into());
        }

        Ok(swap.status)
    }

    pub async fn transition(
        &self,
        swap_id: Uuid,
        actor: &str,
        action: SwapAction,
    ) -> CoreResult<Swap> {
        let swap = self
            .swaps
            .get_swap(swap_id)
            .await?
            .ok_or_else(|| CoreError::not_found("swap", swap_id))?;

        let expected = self.authorize(&swap, actor, action)?;
        let now = self.clock.now();

        let result = if action == SwapAction::Complete {
            self.swaps
                .complete_swap(swap_id, now, self.users.as_ref())
                .await
        } else {
            self.swaps
                .transition_swap(swap_id, expected, action.target_status(), now)
                .await
        };

        let updated = match result {
            Ok(updated) => updated,
            Err(err @ CoreError::Conflict { .. }) => {
                warn!(
                    swap_id = %swap_id,
                    actor = %actor,
                    action = %action,
                    "Lost swap transition race"
                );
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        info!(
            swap_id = %swap_id,
            actor = %actor,
            from = %expected,
            to = %updated.status,
            "Swap transitioned"
        );
        Ok(updated)
    }

    /// Fetch a swap visible to `actor`
    pub async fn get(&self, swap_id: Uuid, actor: &str) -> CoreResult<Swap> {
        let swap = self
            .swaps
            .get_swap(swap_id)
            .await?
            .ok_or_else(|| CoreError::not_found("swap", swap_id))?;

        if !swap.is_participant(actor) {
            return Err(CoreError::NotParticipant {
                user_id: actor.to_string(),
                swap_id,
            });
        }
        Ok(swap)
    }

    pub async fn list(&self, query: &SwapQuery) -> CoreResult<SwapPage> {
        query.validate()?;
        let (swaps, total) = self.swaps.list_swaps(query).await?;
        Ok(SwapPage {
            swaps,
            total,
            page: query.page,
            limit: query.limit,
        })
    }

    pub async fn stats(&self, user_id: &str) -> CoreResult<SwapStats> {
        let mut stats = SwapStats::default();
        for swap in self.swaps.swaps_for_user(user_id).await? {
            if swap.requester == user_id {
                stats.sent.record(swap.status);
            } else {
                stats.received.record(swap.status);
            }
        }
        Ok(stats)
    }

    /// Recount `total_swaps` for a user from their completed swaps
    pub async fn reconcile_swap_counts(&self, user_id: &str) -> CoreResult<u32> {
        let total = reconcile_total_swaps(self.swaps.as_ref(), self.users.as_ref(), user_id).await?;
        debug!(user_id = %user_id, total_swaps = total, "Swap count reconciled");
        Ok(total)
    }

    pub fn is_expired(&self, swap: &Swap) -> bool {
        swap.is_expired(self.clock.now())
    }

    /// Cancel every pending swap whose response deadline has passed
    ///
    /// Uses the same compare-and-swap as actor transitions, so a swap an
    /// actor accepts mid-sweep is left alone.
    pub async fn sweep_expired(&self) -> CoreResult<SweepReport> {
        self.sweep_expired_at(self.clock.now()).await
    }

    pub async fn sweep_expired_at(&self, now: DateTime<Utc>) -> CoreResult<SweepReport> {
        let expired = self.swaps.expired_pending(now).await?;
        let mut report = SweepReport {
            examined: expired.len(),
            ..Default::default()
        };

        for swap in expired {
            match self
                .swaps
                .transition_swap(swap.id, SwapStatus::Pending, SwapStatus::Cancelled, now)
                .await
            {
                Ok(_) => {
                    debug!(
                        swap_id = %swap.id,
                        deadline = %swap.response_deadline,
                        "Expired swap cancelled"
                    );
                    report.cancelled.push(swap.id);
                }
                Err(CoreError::Conflict { .. }) | Err(CoreError::NotFound { .. }) => {
                    report.skipped += 1;
                }
                Err(err) => return Err(err),
            }
        }

        if !report.cancelled.is_empty() {
            info!(
                cancelled = report.cancelled.len(),
                skipped = report.skipped,
                "Expiry sweep finished"
            );
        }
        Ok(report)
    }
}
