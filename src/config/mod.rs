use mongodb::{
    bson::doc,
    options::IndexOptions,
    Client, Database, IndexModel,
};
use std::env;

use crate::models::{course::Course, enrollment::Enrollment, user::User};

pub const DEFAULT_MONGO_URI: &str = "mongodb://127.0.0.1:27017/eduport";
pub const DEFAULT_DATABASE_NAME: &str = "eduport";
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_JWT_SECRET: &str = "dev-secret";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mongo_uri: String,
    pub database_name: Option<String>,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub frontend_url: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup, falling back to local defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match value("PORT") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                log::warn!("PORT={} is not a valid port, using {}", raw, DEFAULT_PORT);
                DEFAULT_PORT
            }),
            None => DEFAULT_PORT,
        };

        let jwt_secret = value("JWT_SECRET").unwrap_or_else(|| {
            log::warn!("JWT_SECRET not set, using the development secret");
            DEFAULT_JWT_SECRET.to_string()
        });

        Self {
            mongo_uri: value("MONGO_URI").unwrap_or_else(|| DEFAULT_MONGO_URI.to_string()),
            database_name: value("DATABASE_NAME"),
            host: value("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            jwt_secret,
            frontend_url: value("FRONTEND_URL"),
        }
    }
}

pub async fn init_database(config: &AppConfig) -> mongodb::error::Result<Database> {
    let client = Client::with_uri_str(&config.mongo_uri).await?;

    let database = match &config.database_name {
        Some(name) => client.database(name),
        None => client
            .default_database()
            .unwrap_or_else(|| client.database(DEFAULT_DATABASE_NAME)),
    };

    log::info!("Connecting to MongoDB database: {}", database.name());

    // The driver connects lazily, so force a round trip before serving traffic.
    database.run_command(doc! { "ping": 1 }, None).await?;
    log::info!("Successfully connected to MongoDB");

    ensure_indexes(&database).await?;

    Ok(database)
}

async fn ensure_indexes(db: &Database) -> mongodb::error::Result<()> {
    let unique = || IndexOptions::builder().unique(true).build();

    let users = db.collection::<User>(User::COLLECTION);
    users
        .create_index(
            IndexModel::builder()
                .keys(doc! { "email": 1 })
                .options(unique())
                .build(),
            None,
        )
        .await?;
    users
        .create_index(IndexModel::builder().keys(doc! { "role": 1 }).build(), None)
        .await?;

    db.collection::<Course>(Course::COLLECTION)
        .create_index(
            IndexModel::builder().keys(doc! { "instructor": 1 }).build(),
            None,
        )
        .await?;

    let enrollments = db.collection::<Enrollment>(Enrollment::COLLECTION);
    enrollments
        .create_indexes(
            vec![
                IndexModel::builder().keys(doc! { "student": 1 }).build(),
                IndexModel::builder().keys(doc! { "course": 1 }).build(),
                IndexModel::builder()
                    .keys(doc! { "student": 1, "course": 1 })
                    .options(unique())
                    .build(),
            ],
            None,
        )
        .await?;

    log::info!("MongoDB indexes are in place");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = AppConfig::from_lookup(lookup(&[]));
        assert_eq!(config.mongo_uri, DEFAULT_MONGO_URI);
        assert_eq!(config.database_name, None);
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.jwt_secret, DEFAULT_JWT_SECRET);
        assert!(config.frontend_url.is_none());
    }

    #[test]
    fn test_reads_supplied_values() {
        let config = AppConfig::from_lookup(lookup(&[
            ("MONGO_URI", "mongodb://db:27017/courses"),
            ("DATABASE_NAME", "courses"),
            ("PORT", "8080"),
            ("JWT_SECRET", "s3cret"),
            ("FRONTEND_URL", "https://app.example.com"),
        ]));
        assert_eq!(config.mongo_uri, "mongodb://db:27017/courses");
        assert_eq!(config.database_name.as_deref(), Some("courses"));
        assert_eq!(config.port, 8080);
        assert_eq!(config.jwt_secret, "s3cret");
        assert_eq!(config.frontend_url.as_deref(), Some("https://app.example.com"));
    }

    #[test]
    fn test_bad_port_and_blank_values_fall_back() {
        let config = AppConfig::from_lookup(lookup(&[("PORT", "eighty"), ("JWT_SECRET", "  ")]));
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.jwt_secret, DEFAULT_JWT_SECRET);
    }
}
