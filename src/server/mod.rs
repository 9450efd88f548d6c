use actix_web::{dev::Server, middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use log::info;

use crate::config::ServerSettings;
use crate::db::PostgresClient;
use crate::query::RangeQueryEngine;

pub mod routes;

/// Bind the HTTP server. The returned [`Server`] must be awaited to serve.
///
/// Signal handling is left to the caller so shutdown can be coordinated
/// with the ingestion task.
pub fn build_server(
    settings: &ServerSettings,
    engine: RangeQueryEngine,
    postgres: PostgresClient,
) -> anyhow::Result<Server> {
    let engine = web::Data::new(engine);
    let postgres = web::Data::new(postgres);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(engine.clone())
            .app_data(postgres.clone())
            .service(routes::chart_data)
            .service(routes::health)
    })
    .disable_signals()
    .bind((settings.host.as_str(), settings.port))
    .with_context(|| format!("Failed to bind {}:{}", settings.host, settings.port))?
    .run();

    info!("HTTP server listening on {}:{}", settings.host, settings.port);
    Ok(server)
}
