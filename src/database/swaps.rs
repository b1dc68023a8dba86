//! Swap Repository - PostgreSQL swap store
//!
//! The one-pending-swap-per-pair rule lives in a partial unique index and
//! transitions are `UPDATE ... WHERE status = $expected`, so concurrent
//! writers are arbitrated by the database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::database::users::credit_completed_swap;
use crate::database::{column_error, is_unique_violation};
use crate::error::{CoreError, CoreResult, Ineligibility};
use crate::store::{swap_conflict, SwapStore};
use crate::swap::{MeetingType, Swap, SwapQuery, SwapRole, SwapStatus};
use crate::users::UserDirectory;

pub(crate) const PENDING_PAIR_INDEX: &str = "swaps_one_pending_per_pair";

const SWAP_COLUMNS: &str = r#"
    id, requester_id, receiver_id, requested_skill, offered_skill, message, status,
    accepted_at, rejected_at, cancelled_at, completed_at, response_deadline,
    meeting_type, location, proposed_date, created_at, updated_at
"#;

pub struct SwapRepository {
    pool: PgPool,
}

impl SwapRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> CoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS skillswap.swaps (
                id UUID PRIMARY KEY,
                requester_id VARCHAR(255) NOT NULL,
                receiver_id VARCHAR(255) NOT NULL,
                requested_skill VARCHAR(100) NOT NULL,
                offered_skill VARCHAR(100) NOT NULL,
                message VARCHAR(500),
                status VARCHAR(20) NOT NULL DEFAULT 'pending',
                accepted_at TIMESTAMP WITH TIME ZONE,
                rejected_at TIMESTAMP WITH TIME ZONE,
                cancelled_at TIMESTAMP WITH TIME ZONE,
                completed_at TIMESTAMP WITH TIME ZONE,
                response_deadline TIMESTAMP WITH TIME ZONE NOT NULL,
                meeting_type VARCHAR(20) NOT NULL DEFAULT 'online',
                location VARCHAR(200),
                proposed_date TIMESTAMP WITH TIME ZONE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                CHECK (requester_id <> receiver_id)
            )
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS {}
            ON skillswap.swaps (
                LEAST(requester_id, receiver_id),
                GREATEST(requester_id, receiver_id)
            )
            WHERE status = 'pending'
        "#,
            PENDING_PAIR_INDEX
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_swaps_requester
            ON skillswap.swaps(requester_id, created_at DESC)
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_swaps_receiver
            ON skillswap.swaps(receiver_id, created_at DESC)
        "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_swaps_pending_deadline
            ON skillswap.swaps(response_deadline)
            WHERE status = 'pending'
        "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn pending_between(&self, a: &str, b: &str) -> CoreResult<Option<Uuid>> {
        let row = sqlx::query(
            r#"
            SELECT id FROM skillswap.swaps
            WHERE status = 'pending'
              AND ((requester_id = $1 AND receiver_id = $2)
                OR (requester_id = $2 AND receiver_id = $1))
        "#,
        )
        .bind(a)
        .bind(b)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => Some(row.try_get("id")?),
            None => None,
        })
    }

    /// Why a compare-and-swap matched no row
    async fn transition_failure(&self, id: Uuid, expected: SwapStatus) -> CoreError {
        match self.get_swap(id).await {
            Ok(Some(current)) => swap_conflict(id, expected, current.status),
            Ok(None) => CoreError::not_found("swap", id),
            Err(err) => err,
        }
    }
}

// Each stamp is written only on first entry into its state
fn transition_sql() -> String {
    format!(
        r#"
        UPDATE skillswap.swaps
        SET status = $3,
            accepted_at = CASE WHEN $3 = 'accepted'
                THEN COALESCE(accepted_at, $4) ELSE accepted_at END,
            rejected_at = CASE WHEN $3 = 'rejected'
                THEN COALESCE(rejected_at, $4) ELSE rejected_at END,
            cancelled_at = CASE WHEN $3 = 'cancelled'
                THEN COALESCE(cancelled_at, $4) ELSE cancelled_at END,
            completed_at = CASE WHEN $3 = 'completed'
                THEN COALESCE(completed_at, $4) ELSE completed_at END,
            updated_at = $4
        WHERE id = $1 AND status = $2
        RETURNING {}
    "#,
        SWAP_COLUMNS
    )
}

fn swap_from_row(row: &PgRow) -> Result<Swap, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let meeting_type: String = row.try_get("meeting_type")?;

    Ok(Swap {
        id: row.try_get("id")?,
        requester: row.try_get("requester_id")?,
        receiver: row.try_get("receiver_id")?,
        requested_skill: row.try_get("requested_skill")?,
        offered_skill: row.try_get("offered_skill")?,
        message: row.try_get("message")?,
        status: SwapStatus::parse(&status).ok_or_else(|| column_error("status", &status))?,
        accepted_at: row.try_get("accepted_at")?,
        rejected_at: row.try_get("rejected_at")?,
        cancelled_at: row.try_get("cancelled_at")?,
        completed_at: row.try_get("completed_at")?,
        response_deadline: row.try_get("response_deadline")?,
        meeting_type: MeetingType::parse(&meeting_type)
            .ok_or_else(|| column_error("meeting_type", &meeting_type))?,
        location: row.try_get("location")?,
        proposed_date: row.try_get("proposed_date")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn swaps_from_rows(rows: &[PgRow]) -> CoreResult<Vec<Swap>> {
    rows.iter()
        .map(|row| swap_from_row(row).map_err(CoreError::from))
        .collect()
}

fn role_filter(role: Option<SwapRole>) -> &'static str {
    match role {
        Some(SwapRole::Requester) => "requester_id = $1",
        Some(SwapRole::Receiver) => "receiver_id = $1",
        None => "(requester_id = $1 OR receiver_id = $1)",
    }
}

#[async_trait]
impl SwapStore for SwapRepository {
    async fn insert_swap(&self, swap: &Swap) -> CoreResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO skillswap.swaps (
                id, requester_id, receiver_id, requested_skill, offered_skill, message, status,
                accepted_at, rejected_at, cancelled_at, completed_at, response_deadline,
                meeting_type, location, proposed_date, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
        "#,
        )
        .bind(swap.id)
        .bind(&swap.requester)
        .bind(&swap.receiver)
        .bind(&swap.requested_skill)
        .bind(&swap.offered_skill)
        .bind(&swap.message)
        .bind(swap.status.as_str())
        .bind(swap.accepted_at)
        .bind(swap.rejected_at)
        .bind(swap.cancelled_at)
        .bind(swap.completed_at)
        .bind(swap.response_deadline)
        .bind(swap.meeting_type.as_str())
        .bind(&swap.location)
        .bind(swap.proposed_date)
        .bind(swap.created_at)
        .bind(swap.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                debug!(swap_id = %swap.id, "Swap stored");
                Ok(())
            }
            Err(err) if is_unique_violation(&err, PENDING_PAIR_INDEX) => {
                let existing = self
                    .pending_between(&swap.requester, &swap.receiver)
                    .await?
                    .unwrap_or(swap.id);
                warn!(
                    swap_id = %swap.id,
                    existing = %existing,
                    "Rejected second pending swap for pair"
                );
                Err(Ineligibility::DuplicatePending(existing).into())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn get_swap(&self, id: Uuid) -> CoreResult<Option<Swap>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM skillswap.swaps WHERE id = $1",
            SWAP_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(swap_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn swaps_between(&self, a: &str, b: &str) -> CoreResult<Vec<Swap>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM skillswap.swaps
            WHERE (requester_id = $1 AND receiver_id = $2)
               OR (requester_id = $2 AND receiver_id = $1)
            ORDER BY created_at DESC, id DESC
        "#,
            SWAP_COLUMNS
        ))
        .bind(a)
        .bind(b)
        .fetch_all(&self.pool)
        .await?;

        swaps_from_rows(&rows)
    }

    async fn transition_swap(
        &self,
        id: Uuid,
        expected: SwapStatus,
        next: SwapStatus,
        at: DateTime<Utc>,
    ) -> CoreResult<Swap> {
        let row = sqlx::query(&transition_sql())
            .bind(id)
            .bind(expected.as_str())
            .bind(next.as_str())
            .bind(at)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(swap_from_row(&row)?),
            None => Err(self.transition_failure(id, expected).await),
        }
    }

    /// Status change and both participants' credit commit in one transaction
    async fn complete_swap(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
        _users: &dyn UserDirectory,
    ) -> CoreResult<Swap> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&transition_sql())
            .bind(id)
            .bind(SwapStatus::Accepted.as_str())
            .bind(SwapStatus::Completed.as_str())
            .bind(at)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Err(self.transition_failure(id, SwapStatus::Accepted).await);
        };
        let swap = swap_from_row(&row)?;

        if let Err(err) = credit_completed_swap(&mut tx, &swap.requester, &swap.receiver).await {
            warn!(swap_id = %id, error = %err, "Completion rolled back");
            tx.rollback().await?;
            return Err(err);
        }

        tx.commit().await?;
        debug!(swap_id = %id, "Swap completed and participants credited");
        Ok(swap)
    }

    async fn list_swaps(&self, query: &SwapQuery) -> CoreResult<(Vec<Swap>, u64)> {
        let filter = role_filter(query.role);
        let status = query.status.map(|s| s.as_str());

        let total: i64 = sqlx::query(&format!(
            r#"
            SELECT COUNT(*) AS total FROM skillswap.swaps
            WHERE {} AND ($2::VARCHAR IS NULL OR status = $2)
        "#,
            filter
        ))
        .bind(&query.user_id)
        .bind(status)
        .fetch_one(&self.pool)
        .await?
        .try_get("total")?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM skillswap.swaps
            WHERE {} AND ($2::VARCHAR IS NULL OR status = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3 OFFSET $4
        "#,
            SWAP_COLUMNS, filter
        ))
        .bind(&query.user_id)
        .bind(status)
        .bind(i64::from(query.limit))
        .bind(query.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok((swaps_from_rows(&rows)?, total as u64))
    }

    async fn swaps_for_user(&self, user_id: &str) -> CoreResult<Vec<Swap>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM skillswap.swaps
            WHERE requester_id = $1 OR receiver_id = $1
            ORDER BY created_at DESC, id DESC
        "#,
            SWAP_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        swaps_from_rows(&rows)
    }

    async fn expired_pending(&self, now: DateTime<Utc>) -> CoreResult<Vec<Swap>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM skillswap.swaps
            WHERE status = 'pending' AND response_deadline < $1
            ORDER BY response_deadline ASC
        "#,
            SWAP_COLUMNS
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        swaps_from_rows(&rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_filter_binds_user_once() {
        for role in [None, Some(SwapRole::Requester), Some(SwapRole::Receiver)] {
            let filter = role_filter(role);
            assert!(filter.contains("$1"));
            assert!(!filter.contains("$2"));
        }
    }
}
