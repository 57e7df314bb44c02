use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use reqwest::Client;
use sqlx::postgres::PgPoolOptions;
use tracing::info;

use crate::{
    config::{AppConfig, StoragePaths},
    recognition::{HttpRecognizer, Recognizer},
    web::store::{AuthStore, PgAuthStore},
};

#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn AuthStore>,
    recognizer: Arc<dyn Recognizer>,
    fetcher: Client,
    storage: StoragePaths,
}

impl AppState {
    pub async fn new(config: &AppConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;
        info!("database schema is up to date");

        config
            .storage
            .ensure_all()
            .await
            .context("failed to prepare storage directories")?;

        let recognizer = HttpRecognizer::new(&config.recognition_url, config.recognition_timeout)
            .context("failed to initialize recognition client")?;
        let fetcher = build_fetcher(config.url_fetch_timeout)?;

        Ok(Self::from_parts(
            Arc::new(PgAuthStore::new(pool)),
            Arc::new(recognizer),
            fetcher,
            config.storage.clone(),
        ))
    }

    pub fn from_parts(
        store: Arc<dyn AuthStore>,
        recognizer: Arc<dyn Recognizer>,
        fetcher: Client,
        storage: StoragePaths,
    ) -> Self {
        Self {
            store,
            recognizer,
            fetcher,
            storage,
        }
    }

    pub fn store(&self) -> &dyn AuthStore {
        self.store.as_ref()
    }

    pub fn recognizer(&self) -> &dyn Recognizer {
        self.recognizer.as_ref()
    }

    pub fn fetcher(&self) -> &Client {
        &self.fetcher
    }

    pub fn storage(&self) -> &StoragePaths {
        &self.storage
    }
}

pub fn build_fetcher(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("food-recognition/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build URL fetch client")
}
