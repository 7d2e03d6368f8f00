use std::net::SocketAddr;

use chrono::Utc;

use ctms_api::app::{build_app, services};
use ctms_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ctms_observability::init();

    let config = AppConfig::from_env()?;
    let auth = services::build_services(&config).await?;

    if let Some(admin) = auth.bootstrap_admin(Utc::now()).await? {
        tracing::info!(user_id = %admin.id, "bootstrap admin created");
    }

    let _sweeper = services::spawn_session_sweeper(auth.clone(), config.sweep_interval);

    let app = build_app(auth);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
