//! Skill swaps
//!
//! A swap is a bilateral request: the requester asks the receiver for one
//! skill in exchange for one of their own.
//!
//! ```text
//!            accept             complete
//! pending ──────────► accepted ──────────► completed
//!    │ reject            │ cancel
//!    ▼                   ▼
//! rejected           cancelled ◄── cancel (from pending)
//! ```

mod eligibility;
mod lifecycle;
mod model;

pub use eligibility::{EligibilityChecker, EligibleSwap};
pub use lifecycle::{CancelPolicy, LifecyclePolicy, SwapLifecycleManager, SweepReport};
pub use model::{
    MeetingType, NewSwap, StatusCounts, Swap, SwapAction, SwapPage, SwapQuery, SwapRole,
    SwapStats, SwapStatus, DEFAULT_PAGE_LIMIT, MAX_MESSAGE_CHARS, MAX_PAGE_LIMIT,
};

pub(crate) use model::require_id;
