//! Database Connection Pool using sqlx

use anyhow::{Context, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;
use tracing::info;

use crate::database::ratings::RatingRepository;
use crate::database::swaps::SwapRepository;
use crate::database::users::UserProfileRepository;

pub struct DatabasePool {
    pool: PgPool,
    swaps: Arc<SwapRepository>,
    ratings: Arc<RatingRepository>,
    users: Arc<UserProfileRepository>,
}

impl DatabasePool {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(connection_string)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!(max_connections, "Connected to PostgreSQL");

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            swaps: Arc::new(SwapRepository::new(pool.clone())),
            ratings: Arc::new(RatingRepository::new(pool.clone())),
            users: Arc::new(UserProfileRepository::new(pool.clone())),
            pool,
        }
    }

    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema...");

        sqlx::query("CREATE SCHEMA IF NOT EXISTS skillswap")
            .execute(&self.pool)
            .await
            .context("Failed to create skillswap schema")?;

        self.users
            .init_schema()
            .await
            .context("Failed to create user_profiles table")?;
        self.swaps
            .init_schema()
            .await
            .context("Failed to create swaps table")?;
        // ratings reference swaps
        self.ratings
            .init_schema()
            .await
            .context("Failed to create ratings table")?;

        info!("Database schema initialized");
        Ok(())
    }

    pub fn swaps(&self) -> Arc<SwapRepository> {
        self.swaps.clone()
    }

    pub fn ratings(&self) -> Arc<RatingRepository> {
        self.ratings.clone()
    }

    pub fn users(&self) -> Arc<UserProfileRepository> {
        self.users.clone()
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
