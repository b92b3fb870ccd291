use actix_web::{App, HttpServer, middleware::Logger, web};
use chrono::Local; // timestamp in log lines
use env_logger::{Env, Target};
use std::io::Write; // for env_logger custom formatter
use std::sync::Arc;

use genmeter_backend::{
    config::Config,
    database::{create_pool, run_migrations},
    external::{DashScopeProvider, HttpObjectStorage},
    handlers,
    middlewares::{AuthMiddleware, create_cors},
    services::{GenerationService, LedgerService, Materializer},
    swagger::swagger_config,
    tasks,
    utils::JwtService,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");
            let level = record.level().as_str().to_ascii_lowercase();
            let msg_json = serde_json::to_string(&format!("{}", record.args()))
                .unwrap_or_else(|_| "\"<invalid utf8>\"".to_string());
            writeln!(
                buf,
                "{{\"timestamp\":\"{}\",\"level\":\"{}\",\"message\":{},\"target\":\"{}\"}}",
                ts,
                level,
                msg_json,
                record.target(),
            )
        })
        .target(Target::Stdout)
        .init();

    let config = Config::from_toml().expect("Failed to load configuration");

    let pool = create_pool(&config.database)
        .await
        .expect("Failed to connect to the database");

    run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");

    let jwt_service = JwtService::new(&config.jwt);

    let provider =
        DashScopeProvider::new(config.provider.clone()).expect("Failed to build provider client");
    let storage =
        HttpObjectStorage::new(config.storage.clone()).expect("Failed to build storage client");
    let materializer = Materializer::new(Arc::new(storage), config.storage.bucket.clone());

    let ledger_service = LedgerService::new(pool.clone(), config.orchestrator.ledger_max_attempts);
    let generation_service = GenerationService::new(
        pool.clone(),
        Arc::new(provider),
        materializer,
        config.pricing.clone(),
        config.orchestrator.clone(),
    );

    tasks::spawn_all(generation_service.clone(), &config.orchestrator);

    if config.admin.api_key.is_empty() {
        log::warn!("admin.api_key is empty; admin endpoints are disabled");
    }
    let admin_config = config.admin.clone();

    log::info!(
        "Starting HTTP server at {}:{}",
        config.server.host,
        config.server.port
    );

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(AuthMiddleware::new(jwt_service.clone()))
            .wrap(create_cors())
            .app_data(web::Data::new(ledger_service.clone()))
            .app_data(web::Data::new(generation_service.clone()))
            .app_data(web::Data::new(admin_config.clone()))
            .configure(swagger_config)
            .configure(handlers::health_config)
            .service(
                web::scope("/api/v1")
                    .configure(handlers::generation_config)
                    .configure(handlers::credits_config)
                    .configure(handlers::admin_config),
            )
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await
}
