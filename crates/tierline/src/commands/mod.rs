pub mod classify;
pub mod health;
pub mod history;
pub mod init;
pub mod invalidate;
pub mod route;
pub mod status;
pub mod version;

use std::sync::Arc;
use tierline_core::{AuditTarget, Config, FsResources};
use tierline_router::Router;
use tierline_store::SqliteStore;
use tierline_telemetry::{AuditSink, JsonlAuditLog, Paths};

/// Config and state database under one tierline home
pub struct Workspace {
    pub paths: Paths,
    pub config: Config,
    pub db: Arc<SqliteStore>,
}

impl Workspace {
    pub fn open(paths: &Paths) -> anyhow::Result<Self> {
        let config = Config::load_or_default(&paths.config_file());
        let db = Arc::new(SqliteStore::open(&paths.store_file())?);
        Ok(Self {
            paths: paths.clone(),
            config,
            db,
        })
    }

    pub fn audit_sink(&self) -> Arc<dyn AuditSink> {
        match self.config.audit {
            AuditTarget::Sqlite => self.db.clone() as Arc<dyn AuditSink>,
            AuditTarget::Jsonl => Arc::new(JsonlAuditLog::new(self.paths.dispatch_log_file())),
        }
    }

    /// Router over the workspace database with saved state restored.
    /// Must be called from within a Tokio runtime.
    pub fn router(&self) -> anyhow::Result<Router> {
        let router = Router::builder(self.config.clone())
            .store(self.db.clone())
            .audit(self.audit_sink())
            .resources(Arc::new(FsResources::new()))
            .build()?;
        router.restore(&self.db)?;
        Ok(router)
    }

    /// Save router state and wait for its background work to finish
    pub async fn close(&self, router: Router) -> anyhow::Result<()> {
        router.shutdown().await;
        router.persist(&self.db)?;
        Ok(())
    }
}
