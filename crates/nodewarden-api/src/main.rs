mod config;
mod error;
mod extract;
mod middleware;
mod routes;
mod sweep;

use actix_web::{App, HttpResponse, HttpServer, web};
use tracing::info;

use nodewarden_node::amnezia::AmneziaEngine;
use nodewarden_node::clients::ClientManager;
use nodewarden_node::exec::HostRunner;
use nodewarden_node::server::ServerService;
use nodewarden_node::xray::XrayEngine;

use crate::config::Config;

fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(distribute)]
    {
        fmt().json().with_env_filter(filter).init();
    }

    #[cfg(not(distribute))]
    {
        fmt().pretty().with_env_filter(filter).init();
    }
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().expect("failed to load configuration");
    info!(addr = %config.bind_addr, "starting nodewarden-api");

    let runner = HostRunner;
    let amnezia = AmneziaEngine::new(runner, config.amnezia.clone());
    let xray = XrayEngine::new(runner, config.xray.clone());
    let manager = ClientManager::new(
        runner,
        amnezia,
        xray,
        config.protocols_enabled.clone(),
        config.server.max_peers,
    );
    let service = ServerService::new(runner, manager.clone(), config.server.clone());

    tokio::spawn(sweep::run(manager.clone(), config.sweep_interval));

    let bind = config.bind_addr.clone();

    let config_data = web::Data::new(config);
    let manager_data = web::Data::new(manager);
    let service_data = web::Data::new(service);

    HttpServer::new(move || {
        App::new()
            .app_data(config_data.clone())
            .app_data(manager_data.clone())
            .app_data(service_data.clone())
            .wrap(middleware::RequestLogger)
            .route("/health", web::get().to(health))
            .configure(routes::clients::configure)
            .configure(routes::server::configure)
    })
    .bind(&bind)?
    .run()
    .await
}
