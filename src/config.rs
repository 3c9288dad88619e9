use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use time::UtcOffset;

use crate::diary::ledger::DEFAULT_UNDO_WINDOW;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(Self::Postgres),
            "memory" | "mem" => Ok(Self::Memory),
            other => anyhow::bail!("unknown STORAGE_BACKEND {other:?}"),
        }
    }
}

/// S3-compatible bucket for scanned label images.
#[derive(Debug, Clone, Deserialize)]
pub struct MinioConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    pub url: String,
    pub api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub backend: StorageBackend,
    pub database_url: Option<String>,
    pub jwt: JwtConfig,
    pub minio: Option<MinioConfig>,
    pub analysis: Option<AnalysisConfig>,
    pub undo_window_ms: u64,
    pub default_tz_offset_minutes: i32,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let backend = match std::env::var("STORAGE_BACKEND") {
            Ok(v) => v.parse()?,
            Err(_) => StorageBackend::Postgres,
        };
        let database_url = std::env::var("DATABASE_URL").ok();
        if backend == StorageBackend::Postgres && database_url.is_none() {
            anyhow::bail!("DATABASE_URL is required for the postgres backend");
        }

        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "nutrilog".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "nutrilog-users".into()),
        };

        let minio = match (
            std::env::var("MINIO_ENDPOINT"),
            std::env::var("MINIO_BUCKET"),
            std::env::var("MINIO_ACCESS_KEY"),
            std::env::var("MINIO_SECRET_KEY"),
        ) {
            (Ok(endpoint), Ok(bucket), Ok(access_key), Ok(secret_key)) => Some(MinioConfig {
                endpoint,
                bucket,
                access_key,
                secret_key,
            }),
            _ => None,
        };

        let analysis = match (std::env::var("ANALYSIS_URL"), std::env::var("ANALYSIS_API_KEY")) {
            (Ok(url), Ok(api_key)) => Some(AnalysisConfig { url, api_key }),
            _ => None,
        };

        let cfg = Self {
            backend,
            database_url,
            jwt,
            minio,
            analysis,
            undo_window_ms: std::env::var("UNDO_WINDOW_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(DEFAULT_UNDO_WINDOW.as_millis() as u64),
            default_tz_offset_minutes: std::env::var("DEFAULT_TZ_OFFSET_MINUTES")
                .ok()
                .and_then(|v| v.parse::<i32>().ok())
                .unwrap_or(0),
        };
        cfg.default_offset()?;
        Ok(cfg)
    }

    pub fn undo_window(&self) -> Duration {
        Duration::from_millis(self.undo_window_ms)
    }

    pub fn default_offset(&self) -> anyhow::Result<UtcOffset> {
        offset_from_minutes(self.default_tz_offset_minutes)
            .context("DEFAULT_TZ_OFFSET_MINUTES out of range")
    }
}

/// `UtcOffset` for a signed minute count east of UTC.
pub fn offset_from_minutes(minutes: i32) -> Result<UtcOffset, time::error::ComponentRange> {
    UtcOffset::from_whole_seconds(minutes.saturating_mul(60))
}
