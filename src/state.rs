use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{AppConfig, StorageBackend};
use crate::diary::ledger::MutationLedger;
use crate::entries::memory::MemoryRepository;
use crate::entries::postgres::PgEntryRepository;
use crate::entries::repo::EntryRepository;
use crate::scans::pipeline::{AnalysisPipeline, HttpAnalysisPipeline};
use crate::storage::{ImageStore, S3ImageStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub repo: Arc<dyn EntryRepository>,
    pub ledger: Arc<MutationLedger>,
    /// Absent when no bucket is configured; scans then keep no image.
    pub storage: Option<Arc<dyn ImageStore>>,
    /// Absent when no analysis endpoint is configured; scans answer 503.
    pub analyzer: Option<Arc<dyn AnalysisPipeline>>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let repo: Arc<dyn EntryRepository> = match config.backend {
            StorageBackend::Postgres => {
                let url = config.database_url.as_deref().unwrap_or_default();
                let db = sqlx::postgres::PgPoolOptions::new()
                    .max_connections(10)
                    .connect(url)
                    .await?;

                if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
                    warn!(error = %e, "migration failed; continuing");
                }
                Arc::new(PgEntryRepository::new(db))
            }
            StorageBackend::Memory => {
                warn!("using in-memory entry storage; data is lost on restart");
                Arc::new(MemoryRepository::new())
            }
        };

        let storage = match &config.minio {
            Some(m) => Some(Arc::new(S3ImageStore::connect(m).await) as Arc<dyn ImageStore>),
            None => {
                info!("no image bucket configured; scans will not keep images");
                None
            }
        };

        let analyzer = config
            .analysis
            .as_ref()
            .map(|a| Arc::new(HttpAnalysisPipeline::new(a)) as Arc<dyn AnalysisPipeline>);
        if analyzer.is_none() {
            info!("no analysis endpoint configured; scans are disabled");
        }

        Ok(Self::from_parts(config, repo, storage, analyzer))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        repo: Arc<dyn EntryRepository>,
        storage: Option<Arc<dyn ImageStore>>,
        analyzer: Option<Arc<dyn AnalysisPipeline>>,
    ) -> Self {
        let ledger = Arc::new(MutationLedger::new(repo.clone(), config.undo_window()));
        Self {
            config,
            repo,
            ledger,
            storage,
            analyzer,
        }
    }

    #[cfg(test)]
    pub fn fake() -> Self {
        Self::fake_with(
            Arc::new(MemoryRepository::new()),
            Some(Arc::new(crate::scans::services::fakes::StubAnalyzer::ok())),
        )
    }

    #[cfg(test)]
    pub fn fake_with(
        repo: Arc<MemoryRepository>,
        analyzer: Option<Arc<dyn AnalysisPipeline>>,
    ) -> Self {
        use crate::config::JwtConfig;
        use crate::scans::services::fakes::RecordingStorage;

        let config = Arc::new(AppConfig {
            backend: StorageBackend::Memory,
            database_url: None,
            jwt: JwtConfig {
                secret: "test".into(),
                issuer: "test".into(),
                audience: "test".into(),
            },
            minio: None,
            analysis: None,
            undo_window_ms: 4000,
            default_tz_offset_minutes: 0,
        });

        let storage = Arc::new(RecordingStorage::default()) as Arc<dyn ImageStore>;
        Self::from_parts(config, repo, Some(storage), analyzer)
    }
}
