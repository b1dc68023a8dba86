//! User Profile Repository
//!
//! Mirror of the profile fields the core reads, plus the reputation counters
//! it writes back. Profiles themselves are provisioned by the user service
//! through [`UserProfileRepository::upsert`].

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow, Postgres};
use sqlx::{Row, Transaction};
use std::collections::BTreeSet;
use tracing::debug;

use crate::database::column_error;
use crate::error::{CoreError, CoreResult};
use crate::users::{Reputation, UserDirectory, UserProfile, UserRole};

pub struct UserProfileRepository {
    pool: PgPool,
}

impl UserProfileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> CoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS skillswap.user_profiles (
                user_id VARCHAR(255) PRIMARY KEY,
                skills_offered TEXT[] NOT NULL DEFAULT '{}',
                skills_wanted TEXT[] NOT NULL DEFAULT '{}',
                average_rating DOUBLE PRECISION NOT NULL DEFAULT 0.0,
                total_ratings INTEGER NOT NULL DEFAULT 0,
                total_swaps INTEGER NOT NULL DEFAULT 0,
                is_banned BOOLEAN NOT NULL DEFAULT FALSE,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                role VARCHAR(20) NOT NULL DEFAULT 'user',
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or refresh a profile's descriptive fields; counters are kept
    pub async fn upsert(&self, profile: &UserProfile) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO skillswap.user_profiles (
                user_id, skills_offered, skills_wanted, is_banned, is_active, role
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id) DO UPDATE SET
                skills_offered = EXCLUDED.skills_offered,
                skills_wanted = EXCLUDED.skills_wanted,
                is_banned = EXCLUDED.is_banned,
                is_active = EXCLUDED.is_active,
                role = EXCLUDED.role,
                updated_at = NOW()
        "#,
        )
        .bind(&profile.id)
        .bind(profile.skills_offered.iter().cloned().collect::<Vec<String>>())
        .bind(profile.skills_wanted.iter().cloned().collect::<Vec<String>>())
        .bind(profile.is_banned)
        .bind(profile.is_active)
        .bind(role_str(profile.role))
        .execute(&self.pool)
        .await?;

        debug!(user_id = %profile.id, "User profile upserted");
        Ok(())
    }
}

fn role_str(role: UserRole) -> &'static str {
    match role {
        UserRole::User => "user",
        UserRole::Admin => "admin",
    }
}

pub(crate) fn reputation_from_row(row: &PgRow) -> Result<Reputation, sqlx::Error> {
    let total_ratings: i32 = row.try_get("total_ratings")?;
    Ok(Reputation {
        average_rating: row.try_get("average_rating")?,
        total_ratings: u32::try_from(total_ratings)
            .map_err(|_| column_error("total_ratings", &total_ratings.to_string()))?,
    })
}

/// Add one completed swap to both participants inside `tx`
///
/// Fails with `NotFound` unless both profiles were updated; the caller then
/// drops the transaction uncommitted.
pub(crate) async fn credit_completed_swap(
    tx: &mut Transaction<'_, Postgres>,
    requester: &str,
    receiver: &str,
) -> CoreResult<()> {
    let result = sqlx::query(
        r#"
        UPDATE skillswap.user_profiles
        SET total_swaps = total_swaps + 1, updated_at = NOW()
        WHERE user_id IN ($1, $2)
    "#,
    )
    .bind(requester)
    .bind(receiver)
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() != 2 {
        return Err(CoreError::not_found(
            "user",
            format!("{} or {}", requester, receiver),
        ));
    }
    Ok(())
}

fn profile_from_row(row: &PgRow) -> Result<UserProfile, sqlx::Error> {
    let role: String = row.try_get("role")?;
    let total_ratings: i32 = row.try_get("total_ratings")?;
    let total_swaps: i32 = row.try_get("total_swaps")?;
    let skills_offered: Vec<String> = row.try_get("skills_offered")?;
    let skills_wanted: Vec<String> = row.try_get("skills_wanted")?;

    Ok(UserProfile {
        id: row.try_get("user_id")?,
        skills_offered: skills_offered.into_iter().collect::<BTreeSet<_>>(),
        skills_wanted: skills_wanted.into_iter().collect::<BTreeSet<_>>(),
        average_rating: row.try_get("average_rating")?,
        total_ratings: u32::try_from(total_ratings)
            .map_err(|_| column_error("total_ratings", &total_ratings.to_string()))?,
        total_swaps: u32::try_from(total_swaps)
            .map_err(|_| column_error("total_swaps", &total_swaps.to_string()))?,
        is_banned: row.try_get("is_banned")?,
        is_active: row.try_get("is_active")?,
        role: match role.as_str() {
            "user" => UserRole::User,
            "admin" => UserRole::Admin,
            other => return Err(column_error("role", other)),
        },
    })
}

#[async_trait]
impl UserDirectory for UserProfileRepository {
    async fn get_user(&self, user_id: &str) -> CoreResult<Option<UserProfile>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, skills_offered, skills_wanted, average_rating, total_ratings,
                   total_swaps, is_banned, is_active, role
            FROM skillswap.user_profiles
            WHERE user_id = $1
        "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(profile_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn record_completed_swap(&self, requester: &str, receiver: &str) -> CoreResult<()> {
        let mut tx = self.pool.begin().await?;
        credit_completed_swap(&mut tx, requester, receiver).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_total_swaps(&self, user_id: &str, total: u32) -> CoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE skillswap.user_profiles
            SET total_swaps = $2, updated_at = NOW()
            WHERE user_id = $1
        "#,
        )
        .bind(user_id)
        .bind(i32::try_from(total).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("user", user_id));
        }
        Ok(())
    }

    async fn add_rating(&self, user_id: &str, score: u8) -> CoreResult<Reputation> {
        // The row lock taken by UPDATE serializes concurrent writers
        let row = sqlx::query(
            r#"
            UPDATE skillswap.user_profiles
            SET average_rating = (average_rating * total_ratings + $2) / (total_ratings + 1),
                total_ratings = total_ratings + 1,
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING average_rating, total_ratings
        "#,
        )
        .bind(user_id)
        .bind(f64::from(score))
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(reputation_from_row(&row)?),
            None => Err(CoreError::not_found("user", user_id)),
        }
    }

    async fn set_reputation(&self, user_id: &str, reputation: Reputation) -> CoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE skillswap.user_profiles
            SET average_rating = $2, total_ratings = $3, updated_at = NOW()
            WHERE user_id = $1
        "#,
        )
        .bind(user_id)
        .bind(reputation.average_rating)
        .bind(i32::try_from(reputation.total_ratings).unwrap_or(i32::MAX))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("user", user_id));
        }
        Ok(())
    }
}
