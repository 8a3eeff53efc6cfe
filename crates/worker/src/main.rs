//! Billtrack Background Worker
//!
//! Handles scheduled jobs:
//! - Overdue invoice sweep (daily at 1:00 AM UTC)
//! - Stuck webhook claim recovery (every 15 minutes)
//! - Webhook audit record cleanup (daily at 3:00 AM UTC)

use std::time::Duration;

use anyhow::Context;
use billtrack_billing::InvoiceStore;
use billtrack_shared::create_pool;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Audit rows for processed webhooks are kept this long.
const WEBHOOK_RETENTION_DAYS: i32 = 90;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();

    info!("Starting Billtrack Worker");

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = create_pool(&database_url).await?;
    info!("Database pool created");

    let scheduler = JobScheduler::new().await?;

    // Job 1: Sweep sent invoices past their due date into overdue status
    // Cron: daily at 1:00 AM UTC
    let overdue_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 0 1 * * *", move |_uuid, _l| {
            let store = InvoiceStore::new(overdue_pool.clone());
            Box::pin(async move {
                info!("Running overdue invoice sweep");
                match store.mark_overdue().await {
                    Ok(count) => info!(flagged = count, "Overdue sweep complete"),
                    Err(e) => error!(error = %e, "Overdue sweep failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Overdue invoice sweep (daily at 1:00 AM UTC)");

    // Job 2: Surface webhook events stuck in 'processing'
    // The reconciler re-claims stuck events on redelivery; this job marks
    // them as errored so events Stripe never redelivers become visible.
    let stuck_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 */15 * * * *", move |_uuid, _l| {
            let pool = stuck_pool.clone();
            Box::pin(async move {
                let result = sqlx::query(
                    r#"
                    UPDATE webhook_events
                    SET processing_result = 'error',
                        error_message = 'processing timed out'
                    WHERE processing_result = 'processing'
                      AND processing_started_at < NOW() - INTERVAL '30 minutes'
                    "#,
                )
                .execute(&pool)
                .await;

                match result {
                    Ok(r) if r.rows_affected() > 0 => {
                        error!(
                            stuck = r.rows_affected(),
                            "Webhook events timed out in processing state"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Stuck webhook recovery failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Stuck webhook claim recovery (every 15 minutes)");

    // Job 3: Drop old webhook audit rows
    // Cron: daily at 3:00 AM UTC
    let cleanup_pool = pool.clone();
    scheduler
        .add(Job::new_async("0 0 3 * * *", move |_uuid, _l| {
            let pool = cleanup_pool.clone();
            Box::pin(async move {
                let result = sqlx::query(
                    r#"
                    DELETE FROM webhook_events
                    WHERE processing_result = 'success'
                      AND created_at < NOW() - ($1 || ' days')::INTERVAL
                    "#,
                )
                .bind(WEBHOOK_RETENTION_DAYS)
                .execute(&pool)
                .await;

                match result {
                    Ok(r) => info!(deleted = r.rows_affected(), "Webhook cleanup complete"),
                    Err(e) => error!(error = %e, "Webhook cleanup failed"),
                }
            })
        })?)
        .await?;
    info!("Scheduled: Webhook audit cleanup (daily at 3:00 AM UTC)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("Billtrack Worker started successfully with 3 scheduled jobs");

    // The scheduler runs jobs in background tasks
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
