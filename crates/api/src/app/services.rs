//! Store wiring and background tasks for the binary.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::postgres::PgPoolOptions;

use ctms_infra::store::postgres::{
    PostgresAuditStore, PostgresCredentialStore, PostgresSessionStore, ensure_schema,
};
use ctms_infra::{AppConfig, AuthService};

pub async fn build_services(config: &AppConfig) -> anyhow::Result<Arc<AuthService>> {
    let service = match (config.use_persistent_stores, config.database_url.as_deref()) {
        (true, Some(database_url)) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(5))
                .connect(database_url)
                .await?;
            ensure_schema(&pool).await?;
            tracing::info!("using Postgres stores");

            AuthService::new(
                Arc::new(PostgresCredentialStore::new(pool.clone())),
                Arc::new(PostgresSessionStore::new(pool.clone())),
                Arc::new(PostgresAuditStore::new(pool)),
                config.auth.clone(),
            )?
        }
        _ => {
            tracing::warn!("USE_PERSISTENT_STORES not enabled; using in-memory stores");
            AuthService::in_memory(config.auth.clone())?
        }
    };

    Ok(Arc::new(service))
}

/// Periodically deactivate expired sessions. Failures are logged and retried
/// on the next tick.
pub fn spawn_session_sweeper(auth: Arc<AuthService>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = auth.sweep_expired_sessions(Utc::now()).await {
                tracing::warn!(error = %e, "session sweep failed");
            }
        }
    })
}
