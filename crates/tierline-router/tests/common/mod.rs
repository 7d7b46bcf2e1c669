#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tierline_core::{AssembledContext, Config, MemoryResources, Request};
use tierline_router::{BackendExecutor, ExecutionError, ExecutionResult, Router};
use tierline_store::SqliteStore;
use tokio::sync::Notify;

#[derive(Debug, Clone)]
pub enum Behavior {
    Reply(String),
    Fail,
    Hang,
    /// Signal `started`, wait for `release`, then reply
    Gated {
        started: Arc<Notify>,
        release: Arc<Notify>,
        reply: String,
    },
}

/// Executor with a fixed behavior that counts its calls
pub struct ScriptedExecutor {
    behavior: Mutex<Behavior>,
    calls: AtomicUsize,
    probe_ok: AtomicBool,
    last_context: Mutex<Option<AssembledContext>>,
}

impl ScriptedExecutor {
    fn with(behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            calls: AtomicUsize::new(0),
            probe_ok: AtomicBool::new(false),
            last_context: Mutex::new(None),
        })
    }

    pub fn replying(text: &str) -> Arc<Self> {
        Self::with(Behavior::Reply(text.to_string()))
    }

    pub fn failing() -> Arc<Self> {
        Self::with(Behavior::Fail)
    }

    pub fn hanging() -> Arc<Self> {
        Self::with(Behavior::Hang)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    pub fn last_context(&self) -> Option<AssembledContext> {
        self.last_context.lock().unwrap().clone()
    }
}

#[async_trait]
impl BackendExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        _request: &Request,
        context: &AssembledContext,
        _timeout: Duration,
    ) -> Result<ExecutionResult, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_context.lock().unwrap() = Some(context.clone());
        let behavior = self.behavior.lock().unwrap().clone();
        // Let concurrent requests interleave
        tokio::task::yield_now().await;
        match behavior {
            Behavior::Reply(text) => Ok(ExecutionResult {
                payload: text.into_bytes(),
                cost: 0.0,
            }),
            Behavior::Fail => Err(ExecutionError::Failed("scripted failure".to_string())),
            Behavior::Hang => std::future::pending().await,
            Behavior::Gated {
                started,
                release,
                reply,
            } => {
                started.notify_one();
                release.notified().await;
                Ok(ExecutionResult {
                    payload: reply.into_bytes(),
                    cost: 0.0,
                })
            }
        }
    }

    async fn probe(&self, _timeout: Duration) -> Result<(), ExecutionError> {
        if self.probe_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ExecutionError::Unavailable("scripted probe failure".to_string()))
        }
    }
}

/// One scripted executor per default tier
pub struct Tiers {
    pub tier0: Arc<ScriptedExecutor>,
    pub tier1: Arc<ScriptedExecutor>,
    pub tier2: Arc<ScriptedExecutor>,
}

impl Tiers {
    pub fn replying() -> Self {
        Self {
            tier0: ScriptedExecutor::replying("tier0 says hi"),
            tier1: ScriptedExecutor::replying("tier1 says hi"),
            tier2: ScriptedExecutor::replying("tier2 says hi"),
        }
    }

    pub fn total_calls(&self) -> usize {
        self.tier0.calls() + self.tier1.calls() + self.tier2.calls()
    }
}

pub fn resources() -> MemoryResources {
    MemoryResources::new()
        .with(
            "src/auth.rs",
            "pub fn login(user: &str) -> bool {\n    !user.is_empty()\n}\n",
        )
        .with("docs/cache.md", "# Cache\nEntries expire after five minutes.\n")
}

/// Router over `tiers` with in-memory resources and the given audit database
pub fn router(config: Config, tiers: &Tiers, db: Arc<SqliteStore>) -> Router {
    Router::builder(config)
        .sqlite(db)
        .resources(Arc::new(resources()))
        .executor("tier0", tiers.tier0.clone())
        .executor("tier1", tiers.tier1.clone())
        .executor("tier2", tiers.tier2.clone())
        .build()
        .unwrap()
}

pub fn memory_db() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::open_in_memory().unwrap())
}
