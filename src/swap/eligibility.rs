//! Swap eligibility rules
//!
//! Pure checks over data the caller has already loaded. The result is
//! advisory: the store re-validates the one-pending-swap-per-pair rule when
//! the swap is written.

use serde::Serialize;

use crate::error::{CoreResult, Ineligibility};
use crate::swap::{NewSwap, Swap, SwapStatus};
use crate::users::UserProfile;

/// A creation request that passed every eligibility rule
#[derive(Debug, Clone, Serialize)]
pub struct EligibleSwap {
    request: NewSwap,
}

impl EligibleSwap {
    pub fn request(&self) -> &NewSwap {
        &self.request
    }

    pub fn into_request(self) -> NewSwap {
        self.request
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EligibilityChecker;

impl EligibilityChecker {
    pub fn new() -> Self {
        Self
    }

    /// Run the rules in order; the first violation wins
    pub fn check(
        &self,
        request: NewSwap,
        requester: &UserProfile,
        receiver: Option<&UserProfile>,
        existing: &[Swap],
    ) -> CoreResult<EligibleSwap> {
        let request = request.normalized();

        let receiver = receiver
            .ok_or_else(|| Ineligibility::ReceiverNotFound(request.receiver.clone()))?;
        if receiver.is_banned {
            return Err(Ineligibility::ReceiverBanned(receiver.id.clone()).into());
        }
        if !receiver.is_active {
            return Err(Ineligibility::ReceiverInactive(receiver.id.clone()).into());
        }

        if requester.id == receiver.id {
            return Err(Ineligibility::SelfSwap.into());
        }

        if !receiver.offers_skill(&request.requested_skill) {
            return Err(Ineligibility::SkillNotOffered(request.requested_skill.clone()).into());
        }

        if !requester.offers_skill(&request.offered_skill) {
            return Err(Ineligibility::OfferedSkillNotHeld(request.offered_skill.clone()).into());
        }

        if let Some(pending) = existing.iter().find(|swap| {
            swap.status == SwapStatus::Pending && swap.involves_pair(&requester.id, &receiver.id)
        }) {
            return Err(Ineligibility::DuplicatePending(pending.id).into());
        }

        Ok(EligibleSwap { request })
    }
}
