use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::fmt::format::FmtSpan;

use skillswap_core::{
    DatabasePool, InMemoryUserDirectory, SkillSwapConfig, SkillSwapService,
    config::redact_url,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = SkillSwapConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {:#}", e);
        eprintln!("Please check the SKILLSWAP_* environment variables.");
        e
    })?;

    init_logging(&config)?;

    info!("Starting skill swap core daemon");
    info!(
        "Swap policy: response window {} days, cancel policy {:?}, rating edit window {}h",
        config.swap.response_window_days,
        config.swap.cancel_policy,
        config.rating.edit_window_hours
    );

    let service = if config.database.postgres_enabled {
        info!(
            "Using PostgreSQL at {}",
            redact_url(&config.database.postgres_url)
        );
        let db = DatabasePool::new(&config.database.postgres_url, config.database.max_connections)
            .await?;
        db.init_schema().await.context("Schema initialization failed")?;
        SkillSwapService::with_postgres(&db, &config)
    } else {
        warn!("PostgreSQL disabled, using in-memory stores (state is lost on exit)");
        SkillSwapService::in_memory(Arc::new(InMemoryUserDirectory::new()), &config)
    };

    if !config.swap.sweep_enabled {
        info!("Expiry sweep disabled (set SKILLSWAP_SWEEP_ENABLED=true to enable)");
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        info!("Shutting down");
        return Ok(());
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(config.swap.sweep_interval_secs));
    info!(
        "Expiry sweep running every {}s",
        config.swap.sweep_interval_secs
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match service.sweep_expired().await {
                    Ok(report) => {
                        if report.examined > 0 {
                            info!(
                                examined = report.examined,
                                cancelled = report.cancelled.len(),
                                skipped = report.skipped,
                                "Sweep complete"
                            );
                        }
                    }
                    Err(e) if e.is_recoverable() => warn!("Sweep failed: {}", e),
                    Err(e) => error!("Sweep failed: {}", e),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for shutdown signal")?;
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}

fn init_logging(config: &SkillSwapConfig) -> Result<()> {
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(if config.logging.log_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        })
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}
