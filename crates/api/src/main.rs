use std::sync::Arc;

use anyhow::Context;

use circulation_infra::config::CirculationConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    circulation_observability::init();

    let config = CirculationConfig::from_env().context("loading configuration")?;
    let locations = config.item_locations().context("loading item locations")?;
    let app = circulation_api::app::build_app(&config, Arc::new(locations))
        .context("building transition table")?;

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
