use std::{
    env,
    net::{SocketAddr, ToSocketAddrs},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, anyhow};

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_PORT: u16 = 4000;
const DEFAULT_STORAGE_ROOT: &str = "storage";
const DEFAULT_RECOGNITION_URL: &str = "http://127.0.0.1:5000";
const DEFAULT_RECOGNITION_TIMEOUT_SECS: u64 = 120;
const DEFAULT_URL_FETCH_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_UPLOAD_MB: usize = 25;

/// Process-wide settings resolved from the environment at startup.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub storage: StoragePaths,
    pub recognition_url: String,
    pub recognition_timeout: Duration,
    pub url_fetch_timeout: Duration,
    pub max_upload_bytes: usize,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL env var is missing")?;

        let bind_raw = env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = parse_bind_addr(&bind_raw)?;

        let storage_root =
            env::var("STORAGE_ROOT").unwrap_or_else(|_| DEFAULT_STORAGE_ROOT.to_string());

        let recognition_url = env::var("RECOGNITION_URL")
            .unwrap_or_else(|_| DEFAULT_RECOGNITION_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        let recognition_timeout = Duration::from_secs(env_number(
            "RECOGNITION_TIMEOUT_SECS",
            DEFAULT_RECOGNITION_TIMEOUT_SECS,
        )?);
        let url_fetch_timeout = Duration::from_secs(env_number(
            "URL_FETCH_TIMEOUT_SECS",
            DEFAULT_URL_FETCH_TIMEOUT_SECS,
        )?);
        let max_upload_mb: usize = env_number("MAX_UPLOAD_MB", DEFAULT_MAX_UPLOAD_MB)?;

        Ok(Self {
            database_url,
            bind_addr,
            storage: StoragePaths::new(storage_root),
            recognition_url,
            recognition_timeout,
            url_fetch_timeout,
            max_upload_bytes: max_upload_mb * 1024 * 1024,
        })
    }
}

/// Directory layout for inputs and pipeline artifacts.
#[derive(Clone, Debug)]
pub struct StoragePaths {
    root: PathBuf,
}

impl StoragePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn uploads(&self) -> PathBuf {
        self.root.join("uploads")
    }

    pub fn detections(&self) -> PathBuf {
        self.root.join("detections")
    }

    pub fn segmentations(&self) -> PathBuf {
        self.root.join("segmentations")
    }

    pub fn csv(&self) -> PathBuf {
        self.root.join("csv")
    }

    pub fn metadata(&self) -> PathBuf {
        self.root.join("metadata")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_all(&self) -> Result<()> {
        for dir in [
            self.uploads(),
            self.detections(),
            self.segmentations(),
            self.csv(),
            self.metadata(),
        ] {
            tokio::fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("failed to create storage directory {}", dir.display()))?;
        }
        Ok(())
    }
}

/// Accepts `host:port` or a bare host, which binds the legacy default port.
pub fn parse_bind_addr(raw: &str) -> Result<SocketAddr> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(anyhow!("bind address must not be empty"));
    }

    let candidate = match raw.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => raw.to_string(),
        Some(_) => return Err(anyhow!("invalid port in bind address `{raw}`")),
        None => format!("{raw}:{DEFAULT_PORT}"),
    };

    candidate
        .to_socket_addrs()
        .with_context(|| format!("failed to resolve bind address `{candidate}`"))?
        .next()
        .ok_or_else(|| anyhow!("bind address `{candidate}` resolved to nothing"))
}

fn env_number<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a number, got `{value}`")),
        Err(_) => Ok(default),
    }
}
