//! PostgreSQL Database Module
//!
//! Provides the PostgreSQL backend for swaps, ratings and the user profile
//! mirror. All tables live in the `skillswap` schema.

pub mod pool;
pub mod ratings;
pub mod swaps;
pub mod users;

pub use pool::DatabasePool;
pub use ratings::RatingRepository;
pub use swaps::SwapRepository;
pub use users::UserProfileRepository;

/// Unique-constraint violation on the named index
pub(crate) fn is_unique_violation(err: &sqlx::Error, index: &str) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation() && db.constraint() == Some(index),
        _ => false,
    }
}

pub(crate) fn column_error(column: &str, value: &str) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("unexpected value '{}'", value).into(),
    }
}
