//! Reputation aggregation
//!
//! ```text
//! ┌──────────────┐  submit/edit/flag/  ┌──────────────────────┐
//! │ RatingLedger │────────────────────►│ ReputationAggregator │
//! └──────────────┘  approve/delete     │  (per-user lock)     │
//!                                      └──────────┬───────────┘
//!                                                 │ add_rating / set_reputation
//!                                                 ▼
//!                                         ┌───────────────┐
//!                                         │ UserDirectory │
//!                                         └───────────────┘
//! ```
//!
//! ## Score Model
//!
//! - New approved public rating: running average, `count + 1`, applied as
//!   one atomic write (PostgreSQL rebuilds instead, under an advisory lock)
//! - Edit, delete, flag, approve: full recompute from stored ratings
//! - `recompute` is canonical; the materialized value must always agree

mod aggregator;
mod stats;

pub use aggregator::{ReputationAggregator, ReputationGuard};
pub use stats::{aggregate, increment, CategoryAverages, UserRatingStats};
