#![warn(clippy::all, clippy::pedantic)]

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use actix_web::{App, HttpServer, web};
use tracing::info;
use vigil_service::config::Config;
use vigil_service::database::open_repository;
use vigil_service::orchestrator::Engine;

mod error;
mod routes;

use error::AppError;

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    logger::init();

    let config = Config::from_config(env::var("VIGIL_CONFIG").ok())?;
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;

    let repository = open_repository(&config.database).await?;
    let engine = Arc::new(Engine::with_defaults(repository, config.engine_config())?);
    engine.apply_seeds(&config.seeds).await?;
    engine.start().await?;

    let result = run_server(addr, engine.clone()).await;

    engine.shutdown(Duration::from_secs(config.engine.shutdown_grace_seconds + 5)).await;
    result
}

async fn run_server(addr: SocketAddr, engine: Arc<Engine>) -> Result<(), AppError> {
    let engine = web::Data::from(engine);
    info!("Listening on {}", addr);

    HttpServer::new(move || App::new().app_data(engine.clone()).configure(routes::routes))
        .bind(addr)?
        .run()
        .await?;

    Ok(())
}
