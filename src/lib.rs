//! Skill Swap Core
//!
//! Lifecycle state machine for bilateral skill swaps, and the rating and
//! reputation engine that runs once a swap completes.
//!
//! ## Module Structure
//!
//! ```text
//! src/
//! ├── lib.rs         - Crate root with re-exports
//! ├── main.rs        - Expiry sweep daemon
//! ├── config.rs      - Environment configuration
//! ├── error.rs       - CoreError taxonomy
//! ├── clock.rs       - Injectable time source
//! ├── users.rs       - User directory seam
//! ├── swap/          - Swap lifecycle
//! │   ├── model.rs       - Swap, statuses, queries
//! │   ├── eligibility.rs - Creation rules
//! │   └── lifecycle.rs   - Transitions & expiry sweep
//! ├── rating/        - Ratings
//! │   ├── model.rs   - Rating, submissions, edits
//! │   └── ledger.rs  - Submit, edit, moderation
//! ├── reputation/    - Materialized reputation
//! │   ├── aggregator.rs - Per-user locked updates
//! │   └── stats.rs      - Aggregate folds
//! ├── store/         - Storage traits & in-memory backend
//! ├── database/      - PostgreSQL backend
//! └── service.rs     - SkillSwapService
//! ```

pub mod clock;
pub mod config;
pub mod database;
pub mod error;
pub mod rating;
pub mod reputation;
pub mod service;
pub mod store;
pub mod swap;
pub mod users;

// Re-export main types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SkillSwapConfig;
pub use database::DatabasePool;
pub use error::{CoreError, CoreResult, ErrorKind, Ineligibility};
pub use service::SkillSwapService;

pub use swap::{
    CancelPolicy, EligibilityChecker, EligibleSwap, LifecyclePolicy, MeetingType, NewSwap,
    StatusCounts, Swap, SwapAction, SwapLifecycleManager, SwapPage, SwapQuery, SwapRole,
    SwapStats, SwapStatus, SweepReport,
};

pub use rating::{
    CategoryScores, NewRating, PublicRating, Rating, RatingEdit, RatingLedger, RatingPolicy,
};

pub use reputation::{CategoryAverages, ReputationAggregator, UserRatingStats};

pub use store::{InMemoryRatingStore, InMemorySwapStore, RatingStore, SwapStore};

pub use users::{InMemoryUserDirectory, Reputation, UserDirectory, UserProfile, UserRole};
