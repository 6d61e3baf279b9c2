mod api;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use relaynodes::{standard_registry, GatewaySettings};
use relayruntime::{CronScheduler, FlowRuntime, RuntimeConfig};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use api::AppState;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 Starting Relay server");

    let ports = GatewaySettings::from_env().into_ports();
    let registry = Arc::new(standard_registry(&ports));
    let runtime = FlowRuntime::with_config(registry, ports.store.clone(), RuntimeConfig::from_env());

    info!("✅ Runtime initialized with standard nodes");

    let mut scheduler = CronScheduler::new(runtime.clone()).await?;
    scheduler.start().await?;

    let app_state = web::Data::new(AppState::new(runtime));

    let bind_address = std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());

    info!("🌐 Server starting on http://{}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(cors)
            .wrap(actix_web::middleware::Logger::default())
            .configure(api::routes)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    if let Err(e) = scheduler.shutdown().await {
        warn!("Cron scheduler did not stop cleanly: {}", e);
    }

    Ok(())
}
