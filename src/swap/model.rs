//! Swap entity, status machine vocabulary and query types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};

pub const MAX_MESSAGE_CHARS: usize = 500;
pub const MAX_SKILL_CHARS: usize = 100;
pub const MAX_LOCATION_CHARS: usize = 200;

/// Lifecycle status of a swap
///
/// `pending → {accepted, rejected, cancelled}`, `accepted → {completed, cancelled}`.
/// Everything else is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapStatus {
    Pending,
    Accepted,
    Rejected,
    Cancelled,
    Completed,
}

impl SwapStatus {
    pub const ALL: [SwapStatus; 5] = [
        SwapStatus::Pending,
        SwapStatus::Accepted,
        SwapStatus::Rejected,
        SwapStatus::Cancelled,
        SwapStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SwapStatus::Pending => "pending",
            SwapStatus::Accepted => "accepted",
            SwapStatus::Rejected => "rejected",
            SwapStatus::Cancelled => "cancelled",
            SwapStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(SwapStatus::Pending),
            "accepted" => Some(SwapStatus::Accepted),
            "rejected" => Some(SwapStatus::Rejected),
            "cancelled" => Some(SwapStatus::Cancelled),
            "completed" => Some(SwapStatus::Completed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SwapStatus::Rejected | SwapStatus::Cancelled | SwapStatus::Completed
        )
    }
}

impl fmt::Display for SwapStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Actor command that moves a swap between states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapAction {
    Accept,
    Reject,
    Cancel,
    Complete,
}

impl SwapAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapAction::Accept => "accept",
            SwapAction::Reject => "reject",
            SwapAction::Cancel => "cancel",
            SwapAction::Complete => "complete",
        }
    }

    /// Status the swap lands in when the action succeeds
    pub fn target_status(&self) -> SwapStatus {
        match self {
            SwapAction::Accept => SwapStatus::Accepted,
            SwapAction::Reject => SwapStatus::Rejected,
            SwapAction::Cancel => SwapStatus::Cancelled,
            SwapAction::Complete => SwapStatus::Completed,
        }
    }
}

impl fmt::Display for SwapAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MeetingType {
    #[default]
    Online,
    InPerson,
    Both,
}

impl MeetingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MeetingType::Online => "online",
            MeetingType::InPerson => "in-person",
            MeetingType::Both => "both",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "online" => Some(MeetingType::Online),
            "in-person" => Some(MeetingType::InPerson),
            "both" => Some(MeetingType::Both),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Swap {
    pub id: Uuid,
    pub requester: String,
    pub receiver: String,
    pub requested_skill: String,
    pub offered_skill: String,
    pub message: Option<String>,
    pub status: SwapStatus,

    pub accepted_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub response_deadline: DateTime<Utc>,

    /// Descriptive only, never enforced
    pub meeting_type: MeetingType,
    pub location: Option<String>,
    pub proposed_date: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Swap {
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.requester == user_id || self.receiver == user_id
    }

    /// The participant on the other side from `user_id`
    pub fn other_participant(&self, user_id: &str) -> Option<&str> {
        if self.requester == user_id {
            Some(&self.receiver)
        } else if self.receiver == user_id {
            Some(&self.requester)
        } else {
            None
        }
    }

    /// Same two users, in either direction
    pub fn involves_pair(&self, a: &str, b: &str) -> bool {
        (self.requester == a && self.receiver == b) || (self.requester == b && self.receiver == a)
    }

    /// Advisory only: nothing transitions a swap because it expired
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == SwapStatus::Pending && now > self.response_deadline
    }

    pub fn stamp_for(&self, status: SwapStatus) -> Option<DateTime<Utc>> {
        match status {
            SwapStatus::Pending => None,
            SwapStatus::Accepted => self.accepted_at,
            SwapStatus::Rejected => self.rejected_at,
            SwapStatus::Cancelled => self.cancelled_at,
            SwapStatus::Completed => self.completed_at,
        }
    }

    /// Move into `status`, stamping its timestamp only if not already set
    pub fn apply_transition(&mut self, status: SwapStatus, at: DateTime<Utc>) {
        let stamp = match status {
            SwapStatus::Pending => None,
            SwapStatus::Accepted => Some(&mut self.accepted_at),
            SwapStatus::Rejected => Some(&mut self.rejected_at),
            SwapStatus::Cancelled => Some(&mut self.cancelled_at),
            SwapStatus::Completed => Some(&mut self.completed_at),
        };
        if let Some(stamp) = stamp {
            stamp.get_or_insert(at);
        }
        self.status = status;
        self.updated_at = at;
    }
}

/// Request to create a swap, before eligibility
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSwap {
    pub requester: String,
    pub receiver: String,
    pub requested_skill: String,
    pub offered_skill: String,
    pub message: Option<String>,
    pub meeting_type: Option<MeetingType>,
    pub location: Option<String>,
    pub proposed_date: Option<DateTime<Utc>>,
}

impl NewSwap {
    pub fn new(
        requester: impl Into<String>,
        receiver: impl Into<String>,
        requested_skill: impl Into<String>,
        offered_skill: impl Into<String>,
    ) -> Self {
        Self {
            requester: requester.into(),
            receiver: receiver.into(),
            requested_skill: requested_skill.into(),
            offered_skill: offered_skill.into(),
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Reject malformed input before any stored state is read
    pub fn validate(&self) -> CoreResult<()> {
        require_id("requester", &self.requester)?;
        require_id("receiver", &self.receiver)?;
        require_text("requested_skill", &self.requested_skill, MAX_SKILL_CHARS)?;
        require_text("offered_skill", &self.offered_skill, MAX_SKILL_CHARS)?;

        if let Some(ref message) = self.message {
            if message.chars().count() > MAX_MESSAGE_CHARS {
                return Err(CoreError::validation(
                    "message",
                    format!("must be at most {} characters", MAX_MESSAGE_CHARS),
                ));
            }
        }

        if let Some(ref location) = self.location {
            if location.chars().count() > MAX_LOCATION_CHARS {
                return Err(CoreError::validation(
                    "location",
                    format!("must be at most {} characters", MAX_LOCATION_CHARS),
                ));
            }
        }

        Ok(())
    }

    /// Trims skill names and drops blank optional text
    pub fn normalized(mut self) -> Self {
        self.requested_skill = self.requested_skill.trim().to_string();
        self.offered_skill = self.offered_skill.trim().to_string();
        self.message = self
            .message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty());
        self.location = self
            .location
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());
        self
    }
}

pub(crate) fn require_id(field: &'static str, value: &str) -> CoreResult<()> {
    if value.trim().is_empty() {
        return Err(CoreError::validation(field, "must not be empty"));
    }
    Ok(())
}

fn require_text(field: &'static str, value: &str, max_chars: usize) -> CoreResult<()> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CoreError::validation(field, "must not be empty"));
    }
    if trimmed.chars().count() > max_chars {
        return Err(CoreError::validation(
            field,
            format!("must be at most {} characters", max_chars),
        ));
    }
    Ok(())
}

/// Which side of a swap a listed user is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwapRole {
    Requester,
    Receiver,
}

impl SwapRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapRole::Requester => "requester",
            SwapRole::Receiver => "receiver",
        }
    }
}

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapQuery {
    pub user_id: String,
    pub status: Option<SwapStatus>,
    pub role: Option<SwapRole>,
    /// 1-based
    pub page: u32,
    pub limit: u32,
}

impl SwapQuery {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            status: None,
            role: None,
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }

    pub fn with_status(mut self, status: SwapStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_role(mut self, role: SwapRole) -> Self {
        self.role = Some(role);
        self
    }

    pub fn page(mut self, page: u32, limit: u32) -> Self {
        self.page = page;
        self.limit = limit;
        self
    }

    pub fn validate(&self) -> CoreResult<()> {
        require_id("user_id", &self.user_id)?;
        if self.page == 0 {
            return Err(CoreError::validation("page", "pages start at 1"));
        }
        if self.limit == 0 || self.limit > MAX_PAGE_LIMIT {
            return Err(CoreError::validation(
                "limit",
                format!("must be between 1 and {}", MAX_PAGE_LIMIT),
            ));
        }
        Ok(())
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }

    pub fn matches(&self, swap: &Swap) -> bool {
        let role_ok = match self.role {
            Some(SwapRole::Requester) => swap.requester == self.user_id,
            Some(SwapRole::Receiver) => swap.receiver == self.user_id,
            None => swap.is_participant(&self.user_id),
        };
        role_ok && self.status.map_or(true, |s| swap.status == s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SwapPage {
    pub swaps: Vec<Swap>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

impl SwapPage {
    pub fn total_pages(&self) -> u64 {
        self.total.div_ceil(u64::from(self.limit.max(1)))
    }
}

/// Per-user swap counts, split by direction
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SwapStats {
    pub sent: StatusCounts,
    pub received: StatusCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub cancelled: u64,
    pub completed: u64,
}

impl StatusCounts {
    pub fn record(&mut self, status: SwapStatus) {
        match status {
            SwapStatus::Pending => self.pending += 1,
            SwapStatus::Accepted => self.accepted += 1,
            SwapStatus::Rejected => self.rejected += 1,
            SwapStatus::Cancelled => self.cancelled += 1,
            SwapStatus::Completed => self.completed += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.accepted + self.rejected + self.cancelled + self.completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_swap() -> Swap {
        let now = Utc::now();
        Swap {
            id: Uuid::new_v4(),
            requester: "alice".to_string(),
            receiver: "bob".to_string(),
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

    #[test]
    fn test_status_round_trips_through_str() {
        for status in SwapStatus::ALL {
            assert_eq!(SwapStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SwapStatus::parse("expired"), None);
        assert!(!SwapStatus::Pending.is_terminal());
        assert!(!SwapStatus::Accepted.is_terminal());
        assert!(SwapStatus::Completed.is_terminal());
    }

    #[test]
    fn test_transition_stamp_is_set_once() {
        let mut swap = sample_swap();
        let first = Utc::now();
        swap.apply_transition(SwapStatus::Cancelled, first);
        swap.apply_transition(SwapStatus::Cancelled, first + Duration::hours(1));
        assert_eq!(swap.cancelled_at, Some(first));
        assert_eq!(swap.updated_at, first + Duration::hours(1));
    }

    #[test]
    fn test_expiry_is_pending_only() {
        let mut swap = sample_swap();
        let later = swap.response_deadline + Duration::seconds(1);
        assert!(!swap.is_expired(swap.response_deadline));
        assert!(swap.is_expired(later));

        swap.apply_transition(SwapStatus::Accepted, Utc::now());
        assert!(!swap.is_expired(later));
    }

    #[test]
    fn test_participants() {
        let swap = sample_swap();
        assert_eq!(swap.other_participant("alice"), Some("bob"));
        assert_eq!(swap.other_participant("bob"), Some("alice"));
        assert_eq!(swap.other_participant("carol"), None);
        assert!(swap.involves_pair("bob", "alice"));
    }

    #[test]
    fn test_new_swap_validation() {
        assert!(NewSwap::new("a", "b", "Spanish", "Photoshop").validate().is_ok());

        let err = NewSwap::new("a", "b", "  ", "Photoshop").validate().unwrap_err();
        assert_eq!(err.field(), Some("requested_skill"));

        let err = NewSwap::new("a", "b", "Spanish", "Photoshop")
            .with_message("x".repeat(MAX_MESSAGE_CHARS + 1))
            .validate()
            .unwrap_err();
        assert_eq!(err.field(), Some("message"));

        // Exactly at the limit is fine
        assert!(NewSwap::new("a", "b", "Spanish", "Photoshop")
            .with_message("é".repeat(MAX_MESSAGE_CHARS))
            .validate()
            .is_ok());
    }

    #[test]
    fn test_query_matching_and_paging() {
        let swap = sample_swap();
        assert!(SwapQuery::for_user("alice").matches(&swap));
        assert!(!SwapQuery::for_user("alice").with_role(SwapRole::Receiver).matches(&swap));
        assert!(!SwapQuery::for_user("bob").with_status(SwapStatus::Accepted).matches(&swap));

        let query = SwapQuery::for_user("alice").page(3, 20);
        assert_eq!(query.offset(), 40);
        assert!(SwapQuery::for_user("alice").page(0, 10).validate().is_err());
        assert!(SwapQuery::for_user("alice").page(1, 101).validate().is_err());
    }
}
