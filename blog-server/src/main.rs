mod application;
mod data;
mod domain;
mod infrastructure;
mod presentation;

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::middleware::{DefaultHeaders, Logger};
use actix_web::{App, HttpServer, Scope, web};
use anyhow::Context;
use application::auth_service::AuthService;
use application::data_service::DataService;
use application::storage_service::{MAX_OBJECT_BYTES, StorageService};
use data::collection_repository::PostgresCollectionRepository;
use data::user_repository::PostgresUserRepository;
use domain::error::DomainError;
use infrastructure::config::AppConfig;
use infrastructure::database::{create_pool, run_migrations};
use infrastructure::logging::init_logging;
use infrastructure::security::JwtKeys;
use presentation::handlers;
use presentation::middleware::{JwtAuthMiddleware, RequestLogMiddleware};
use tracing::info;

const JSON_LIMIT_BYTES: usize = 1024 * 1024;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let pool = create_pool(&config)
        .await
        .context("failed to connect to database")?;
    run_migrations(&pool)
        .await
        .context("failed to run migrations")?;
    tokio::fs::create_dir_all(&config.storage_dir)
        .await
        .with_context(|| format!("cannot create {}", config.storage_dir.display()))?;

    let keys = JwtKeys::new(config.jwt_secret.clone(), config.token_ttl_secs);
    let auth_service = AuthService::new(
        Arc::new(PostgresUserRepository::new(pool.clone())),
        keys.clone(),
    );
    let data_service = DataService::new(Arc::new(PostgresCollectionRepository::new(pool)));
    let storage_service =
        StorageService::new(config.storage_dir.clone(), config.public_base_url.clone());

    let config_data = config.clone();
    info!(host = %config.host, port = config.port, "HTTP server starting");

    HttpServer::new(move || {
        let cors = build_cors(&config_data);
        App::new()
            .wrap(JwtAuthMiddleware::optional(keys.clone()))
            .wrap(Logger::default())
            .wrap(RequestLogMiddleware)
            .wrap(
                DefaultHeaders::new()
                    .add(("X-Content-Type-Options", "nosniff"))
                    .add(("Referrer-Policy", "no-referrer"))
                    .add(("Permissions-Policy", "geolocation=()"))
                    .add(("Cross-Origin-Opener-Policy", "same-origin")),
            )
            .wrap(cors)
            .app_data(json_config())
            .app_data(web::PayloadConfig::new(MAX_OBJECT_BYTES + 1))
            .app_data(web::Data::new(auth_service.clone()))
            .app_data(web::Data::new(data_service.clone()))
            .app_data(web::Data::new(storage_service.clone()))
            .service(api_scope(keys.clone()))
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await?;

    Ok(())
}

fn api_scope(keys: JwtKeys) -> Scope {
    web::scope("/api")
        .route("/health", web::get().to(handlers::health::health))
        .service(handlers::auth::scope(keys.clone()))
        .service(handlers::rest::scope())
        .service(handlers::storage::scope(keys))
}

/// Malformed bodies get the same `{error}` shape as every other failure.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(JSON_LIMIT_BYTES)
        .error_handler(|err, _req| DomainError::BadRequest(err.to_string()).into())
}

fn build_cors(config: &AppConfig) -> Cors {
    let mut cors = Cors::default()
        .allowed_methods(vec!["GET", "POST", "PATCH", "DELETE"])
        .allowed_headers(vec![
            actix_web::http::header::CONTENT_TYPE,
            actix_web::http::header::AUTHORIZATION,
        ])
        .max_age(3600);

    if config.cors_origins.iter().any(|o| o == "*") {
        cors = cors.allow_any_origin();
    } else {
        for origin in &config.cors_origins {
            cors = cors.allowed_origin(origin);
        }
    }

    cors
}
