//! Rating Repository - PostgreSQL rating store
//!
//! Ratings share a database with the user profile mirror, so reputation is
//! rebuilt there by a single statement over the visible ratings. A per-user
//! advisory lock orders those rebuilds across processes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::debug;
use uuid::Uuid;

use crate::database::{column_error, is_unique_violation};
use crate::error::{CoreError, CoreResult};
use crate::rating::{CategoryScores, Rating};
use crate::database::users::reputation_from_row;
use crate::store::{rating_conflict, RatingStore};
use crate::users::{Reputation, UserDirectory};

const RATING_REVIEWER_INDEX: &str = "ratings_one_per_reviewer";

const RATING_COLUMNS: &str = r#"
    id, swap_id, reviewer_id, reviewee_id, rating, feedback,
    communication, skill_level, punctuality, helpfulness,
    would_recommend, is_public, is_anonymous,
    is_approved, is_flagged, flag_reason, admin_reviewed,
    created_at, updated_at
"#;

pub struct RatingRepository {
    pool: PgPool,
}

impl RatingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> CoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS skillswap.ratings (
                id UUID PRIMARY KEY,
                swap_id UUID NOT NULL REFERENCES skillswap.swaps(id),
                reviewer_id VARCHAR(255) NOT NULL,
                reviewee_id VARCHAR(255) NOT NULL,
                rating SMALLINT NOT NULL CHECK (rating BETWEEN 1 AND 5),
                feedback VARCHAR(1000),
                communication SMALLINT CHECK (communication BETWEEN 1 AND 5),
                skill_level SMALLINT CHECK (skill_level BETWEEN 1 AND 5),
                punctuality SMALLINT CHECK (punctuality BETWEEN 1 AND 5),
                helpfulness SMALLINT CHECK (helpfulness BETWEEN 1 AND 5),
                would_recommend BOOLEAN NOT NULL DEFAULT TRUE,
                is_public BOOLEAN NOT NULL DEFAULT TRUE,
                is_anonymous BOOLEAN NOT NULL DEFAULT FALSE,
                is_approved BOOLEAN NOT NULL DEFAULT TRUE,
                is_flagged BOOLEAN NOT NULL DEFAULT FALSE,
                flag_reason VARCHAR(500),
                admin_reviewed BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                CHECK (reviewer_id <> reviewee_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {} ON skillswap.ratings(swap_id, reviewer_id)",
            RATING_REVIEWER_INDEX
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_ratings_reviewee
            ON skillswap.ratings(reviewee_id, created_at DESC)
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_ratings_flagged
            ON skillswap.ratings(created_at)
            WHERE is_flagged
        "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn score_from_row(row: &PgRow, column: &'static str) -> Result<u8, sqlx::Error> {
    let value: i16 = row.try_get(column)?;
    u8::try_from(value).map_err(|_| column_error(column, &value.to_string()))
}

fn optional_score(row: &PgRow, column: &'static str) -> Result<Option<u8>, sqlx::Error> {
    let value: Option<i16> = row.try_get(column)?;
    value
        .map(|v| u8::try_from(v).map_err(|_| column_error(column, &v.to_string())))
        .transpose()
}

fn rating_from_row(row: &PgRow) -> Result<Rating, sqlx::Error> {
    Ok(Rating {
        id: row.try_get("id")?,
        swap_id: row.try_get("swap_id")?,
        reviewer: row.try_get("reviewer_id")?,
        reviewee: row.try_get("reviewee_id")?,
        rating: score_from_row(row, "rating")?,
        feedback: row.try_get("feedback")?,
        categories: CategoryScores {
            communication: optional_score(row, "communication")?,
            skill_level: optional_score(row, "skill_level")?,
            punctuality: optional_score(row, "punctuality")?,
            helpfulness: optional_score(row, "helpfulness")?,
        },
        would_recommend: row.try_get("would_recommend")?,
        is_public: row.try_get("is_public")?,
        is_anonymous: row.try_get("is_anonymous")?,
        is_approved: row.try_get("is_approved")?,
        is_flagged: row.try_get("is_flagged")?,
        flag_reason: row.try_get("flag_reason")?,
        admin_reviewed: row.try_get("admin_reviewed")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn ratings_from_rows(rows: &[PgRow]) -> CoreResult<Vec<Rating>> {
    rows.iter()
        .map(|row| rating_from_row(row).map_err(CoreError::from))
        .collect()
}

#[async_trait]
impl RatingStore for RatingRepository {
    async fn insert_rating(&self, rating: &Rating) -> CoreResult<()> {
        let categories = rating.categories;
        let result = sqlx::query(
            r#"
            INSERT INTO skillswap.ratings (
                id, swap_id, reviewer_id, reviewee_id, rating, feedback,
                communication, skill_level, punctuality, helpfulness,
                would_recommend, is_public, is_anonymous,
                is_approved, is_flagged, flag_reason, admin_reviewed,
                created_at, updated_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17, $18, $19
            )
        "#,
        )
        .bind(rating.id)
        .bind(rating.swap_id)
        .bind(&rating.reviewer)
        .bind(&rating.reviewee)
        .bind(i16::from(rating.rating))
        .bind(&rating.feedback)
        .bind(categories.communication.map(i16::from))
        .bind(categories.skill_level.map(i16::from))
        .bind(categories.punctuality.map(i16::from))
        .bind(categories.helpfulness.map(i16::from))
        .bind(rating.would_recommend)
        .bind(rating.is_public)
        .bind(rating.is_anonymous)
        .bind(rating.is_approved)
        .bind(rating.is_flagged)
        .bind(&rating.flag_reason)
        .bind(rating.admin_reviewed)
        .bind(rating.created_at)
        .bind(rating.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(rating_id = %rating.id, swap_id = %rating.swap_id, "Rating stored");
                Ok(())
            }
            Err(err) if is_unique_violation(&err, RATING_REVIEWER_INDEX) => {
                Err(CoreError::DuplicateRating {
                    swap_id: rating.swap_id,
                    reviewer: rating.reviewer.clone(),
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get_rating(&self, id: Uuid) -> CoreResult<Option<Rating>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM skillswap.ratings WHERE id = $1",
            RATING_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(rating_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn update_rating(
        &self,
        rating: &Rating,
        expected_updated_at: DateTime<Utc>,
    ) -> CoreResult<()> {
        let categories = rating.categories;
        let result = sqlx::query(
            r#"
            UPDATE skillswap.ratings
            SET rating = $3,
                feedback = $4,
                communication = $5,
                skill_level = $6,
                punctuality = $7,
                helpfulness = $8,
                would_recommend = $9,
                is_public = $10,
                is_anonymous = $11,
                is_approved = $12,
                is_flagged = $13,
                flag_reason = $14,
                admin_reviewed = $15,
                updated_at = $16
            WHERE id = $1 AND updated_at = $2
        "#,
        )
        .bind(rating.id)
        .bind(expected_updated_at)
        .bind(i16::from(rating.rating))
        .bind(&rating.feedback)
        .bind(categories.communication.map(i16::from))
        .bind(categories.skill_level.map(i16::from))
        .bind(categories.punctuality.map(i16::from))
        .bind(categories.helpfulness.map(i16::from))
        .bind(rating.would_recommend)
        .bind(rating.is_public)
        .bind(rating.is_anonymous)
        .bind(rating.is_approved)
        .bind(rating.is_flagged)
        .bind(&rating.flag_reason)
        .bind(rating.admin_reviewed)
        .bind(rating.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        match self.get_rating(rating.id).await? {
            Some(current) => Err(rating_conflict(
                rating.id,
                expected_updated_at,
                current.updated_at,
            )),
            None => Err(CoreError::not_found("rating", rating.id)),
        }
    }

    async fn delete_rating(&self, id: Uuid) -> CoreResult<bool> {
        let result = sqlx::query("DELETE FROM skillswap.ratings WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn ratings_for_swap(&self, swap_id: Uuid) -> CoreResult<Vec<Rating>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM skillswap.ratings
            WHERE swap_id = $1
            ORDER BY created_at DESC, id DESC
        "#,
            RATING_COLUMNS
        ))
        .bind(swap_id)
        .fetch_all(&self.pool)
        .await?;

        ratings_from_rows(&rows)
    }

    async fn ratings_received(
        &self,
        reviewee: &str,
        visible_only: bool,
    ) -> CoreResult<Vec<Rating>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM skillswap.ratings
            WHERE reviewee_id = $1 AND (NOT $2 OR (is_approved AND is_public))
            ORDER BY created_at DESC, id DESC
        "#,
            RATING_COLUMNS
        ))
        .bind(reviewee)
        .bind(visible_only)
        .fetch_all(&self.pool)
        .await?;

        ratings_from_rows(&rows)
    }

    async fn flagged_ratings(&self) -> CoreResult<Vec<Rating>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM skillswap.ratings
            WHERE is_flagged
            ORDER BY created_at DESC, id DESC
        "#,
            RATING_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        ratings_from_rows(&rows)
    }

    async fn fold_new_rating(
        &self,
        rating: &Rating,
        users: &dyn UserDirectory,
    ) -> CoreResult<Reputation> {
        // A running-average delta could double count against a concurrent
        // rebuild in another process
        self.materialize_reputation(&rating.reviewee, users).await
    }

    async fn materialize_reputation(
        &self,
        reviewee: &str,
        _users: &dyn UserDirectory,
    ) -> CoreResult<Reputation> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(reviewee)
            .execute(&mut *tx)
            .await?;

        // Runs after the lock, so its snapshot sees every committed rating
        let row = sqlx::query(
            r#"
            UPDATE skillswap.user_profiles AS p
            SET average_rating = agg.average_rating,
                total_ratings = agg.total_ratings,
                updated_at = NOW()
            FROM (
                SELECT COALESCE(AVG(rating)::DOUBLE PRECISION, 0.0) AS average_rating,
                       COUNT(*)::INTEGER AS total_ratings
                FROM skillswap.ratings
                WHERE reviewee_id = $1 AND is_approved AND is_public
            ) AS agg
            WHERE p.user_id = $1
            RETURNING p.average_rating, p.total_ratings
        "#,
        )
        .bind(reviewee)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Err(CoreError::not_found("user", reviewee));
        };
        let reputation = reputation_from_row(&row)?;
        tx.commit().await?;

        debug!(
            user_id = %reviewee,
            average = reputation.average_rating,
            total = reputation.total_ratings,
            "Reputation rebuilt"
        );
        Ok(reputation)
    }
}
