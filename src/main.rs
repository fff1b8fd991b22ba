mod config;
mod errors;
mod handlers;
mod middleware;
mod models;
mod reports;

use actix_cors::Cors;
use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{middleware::Logger, web, App, HttpServer};
use dotenv::dotenv;

use config::AppConfig;
use errors::ApiError;
use middleware::{auth::JwtKeys, Authentication};

const LOCAL_FRONTEND: &str = "http://localhost:5173";

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = AppConfig::from_env();

    // Serving without the store is pointless, so a failed connection ends the process.
    let database = match config::init_database(&config).await {
        Ok(db) => db,
        Err(e) => {
            log::error!("MongoDB connection error: {}", e);
            std::process::exit(1);
        }
    };

    let keys = JwtKeys::new(&config.jwt_secret);

    // Roughly one request per second per client, with bursts of 60.
    let governor_conf = GovernorConfigBuilder::default()
        .per_second(1)
        .burst_size(60)
        .finish()
        .ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::Other, "invalid rate limit configuration")
        })?;

    let frontend_url = config.frontend_url.clone();
    log::info!("Listening on {}:{}", config.host, config.port);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(LOCAL_FRONTEND)
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE"])
            .allow_any_header()
            .supports_credentials();
        let cors = match &frontend_url {
            Some(url) => cors.allowed_origin(url),
            None => cors,
        };

        App::new()
            .wrap(Authentication::new(keys.clone()))
            .wrap(Governor::new(&governor_conf))
            .wrap(Logger::default())
            .wrap(cors)
            .app_data(web::Data::new(database.clone()))
            .app_data(web::Data::new(keys.clone()))
            .app_data(web::JsonConfig::default().error_handler(|err, _req| {
                ApiError::validation(format!("Invalid request body: {}", err)).into()
            }))
            .app_data(web::QueryConfig::default().error_handler(|err, _req| {
                ApiError::validation(format!("Invalid query: {}", err)).into()
            }))
            .app_data(web::PathConfig::default().error_handler(|err, _req| {
                ApiError::validation(format!("Invalid path: {}", err)).into()
            }))
            .service(handlers::health::index)
            .service(
                web::scope("/api")
                    .configure(handlers::health::routes)
                    .configure(handlers::auth::routes)
                    .configure(handlers::courses::routes)
                    .configure(handlers::students::routes),
            )
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await
}
