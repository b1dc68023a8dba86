//! Ratings left by swap participants
//!
//! A rating can only exist for a completed swap, and each participant may
//! rate the other exactly once. Flagged or private ratings stay stored but
//! drop out of every aggregate until an admin approves them.

mod ledger;
mod model;

pub use ledger::{RatingLedger, RatingPolicy};
pub use model::{
    CategoryScores, NewRating, PublicRating, Rating, RatingEdit, MAX_FEEDBACK_CHARS,
    MAX_FLAG_REASON_CHARS, MAX_SCORE, MIN_SCORE,
};
