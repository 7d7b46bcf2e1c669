//! The routing pipeline
//!
//! classify → dedup lookup → tier resources → assemble context →
//! cascade dispatch → cache commit → tick
//!
//! Every backend attempt runs in a task owned by the router's
//! [`TaskTracker`], so a caller that cancels or drops its request never
//! loses the attempt's outcome record.

use crate::executor::{BackendExecutor, CommandExecutor, ExecutionResult};
use crate::response::{Invalidation, RouteResponse, RouterStatus};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tierline_classify::Classifier;
use tierline_core::{
    AssembledContext, AttemptFailure, BackendDescriptor, CacheHit, CascadeSelector,
    Classification, Config, ConfigError, ContextAssembler, ContextSummary, FsResources,
    RelevanceEngine, Request, ResourceProvider, RouteError,
};
use tierline_dedup::{DedupMatch, MatchKind, SemanticDedupIndex};
use tierline_learn::{HealthMonitor, OutcomeRecorder};
use tierline_store::{CacheStore, MemoryStore, SqliteStore, StoreError};
use tierline_telemetry::{AuditSink, DispatchOutcome, DispatchRecord};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("backend {0} has no executor and no command configured")]
    MissingExecutor(String),
}

pub struct RouterBuilder {
    config: Config,
    store: Option<Arc<dyn CacheStore>>,
    audit: Option<Arc<dyn AuditSink>>,
    resources: Option<Arc<dyn ResourceProvider>>,
    executors: HashMap<String, Arc<dyn BackendExecutor>>,
    handlers: HashMap<String, Arc<dyn BackendExecutor>>,
}

impl RouterBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: None,
            audit: None,
            resources: None,
            executors: HashMap::new(),
            handlers: HashMap::new(),
        }
    }

    /// Cache store. Defaults to an in-memory store.
    pub fn store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Audit sink for dispatch records. Defaults to an in-memory SQLite log.
    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Use one SQLite database for both cache entries and the dispatch log
    pub fn sqlite(mut self, db: Arc<SqliteStore>) -> Self {
        let store: Arc<dyn CacheStore> = db.clone();
        let audit: Arc<dyn AuditSink> = db;
        self.store = Some(store);
        self.audit = Some(audit);
        self
    }

    /// Where resource content is read from. Defaults to the filesystem.
    pub fn resources(mut self, resources: Arc<dyn ResourceProvider>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Executor for a configured backend tier, replacing its command
    pub fn executor(
        mut self,
        tier_id: impl Into<String>,
        executor: Arc<dyn BackendExecutor>,
    ) -> Self {
        self.executors.insert(tier_id.into(), executor);
        self
    }

    /// Executor for a fast-path handler, replacing its command
    pub fn handler(
        mut self,
        name: impl Into<String>,
        executor: Arc<dyn BackendExecutor>,
    ) -> Self {
        self.handlers.insert(name.into(), executor);
        self
    }

    /// Validate the configuration, wire the components, and start the decay
    /// sweeper. Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<Router, BuildError> {
        let RouterBuilder {
            config,
            store,
            audit,
            resources,
            mut executors,
            mut handlers,
        } = self;
        config.validate()?;

        for spec in &config.backends {
            if executors.contains_key(&spec.tier_id) {
                continue;
            }
            let executor = CommandExecutor::from_backend(spec)
                .ok_or_else(|| BuildError::MissingExecutor(spec.tier_id.clone()))?;
            executors.insert(spec.tier_id.clone(), Arc::new(executor));
        }
        for spec in &config.handlers {
            if !handlers.contains_key(&spec.name) {
                handlers.insert(
                    spec.name.clone(),
                    Arc::new(CommandExecutor::from_handler(spec)),
                );
            }
        }

        let store: Arc<dyn CacheStore> = match store {
            Some(store) => store,
            None => Arc::new(MemoryStore::new()),
        };
        let audit: Arc<dyn AuditSink> = match audit {
            Some(audit) => audit,
            None => Arc::new(SqliteStore::open_in_memory()?),
        };
        let resources: Arc<dyn ResourceProvider> = match resources {
            Some(resources) => resources,
            None => Arc::new(FsResources::new()),
        };

        let dedup = SemanticDedupIndex::new(store, config.dedup.clone());
        match dedup.rebuild() {
            Ok(0) => {}
            Ok(indexed) => tracing::info!(indexed, "cache index rebuilt"),
            Err(e) => tracing::warn!(error = %e, "failed to rebuild cache index, starting empty"),
        }

        let health = Arc::new(HealthMonitor::new(config.health.clone(), config.descriptors()));
        let recorder = OutcomeRecorder::new(Arc::clone(&health), audit, config.adaptive.clone());

        let inner = Arc::new(Inner {
            classifier: Classifier::new(config.classifier.clone()),
            relevance: RelevanceEngine::new(config.tiering.clone()),
            assembler: ContextAssembler::new(config.context.clone()),
            selector: CascadeSelector::new(),
            dedup,
            health,
            recorder,
            executors,
            handlers,
            resources,
            revalidating: DashMap::new(),
            invalidations: AtomicU64::new(0),
            invalidated: DashMap::new(),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            config,
        });
        spawn_sweeper(&inner);

        Ok(Router { inner })
    }
}

/// Entry point for routing requests. Cheap to clone.
#[derive(Clone)]
pub struct Router {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    classifier: Classifier,
    relevance: RelevanceEngine,
    assembler: ContextAssembler,
    selector: CascadeSelector,
    dedup: SemanticDedupIndex,
    health: Arc<HealthMonitor>,
    recorder: OutcomeRecorder,
    executors: HashMap<String, Arc<dyn BackendExecutor>>,
    handlers: HashMap<String, Arc<dyn BackendExecutor>>,
    resources: Arc<dyn ResourceProvider>,
    /// Fingerprints with a soft-hit re-validation in flight
    revalidating: DashMap<String, ()>,
    /// Bumped by every `invalidate`
    invalidations: AtomicU64,
    /// Generation at which each resource was last invalidated
    invalidated: DashMap<String, u64>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

enum Attempt {
    Done(ExecutionResult),
    Failed(AttemptFailure),
    Cancelled,
}

struct Dispatched {
    payload: Vec<u8>,
    backend: String,
    tiers_attempted: Vec<String>,
    degraded: bool,
}

impl Router {
    pub fn builder(config: Config) -> RouterBuilder {
        RouterBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn relevance(&self) -> &RelevanceEngine {
        &self.inner.relevance
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.inner.health
    }

    pub fn dedup(&self) -> &SemanticDedupIndex {
        &self.inner.dedup
    }

    pub fn classify(&self, text: &str) -> Classification {
        self.inner.classifier.classify(text)
    }

    pub async fn route(&self, request: Request) -> Result<RouteResponse, RouteError> {
        self.route_with_cancel(request, CancellationToken::new()).await
    }

    /// Route `request`, giving up with [`RouteError::Cancelled`] if `cancel`
    /// fires before a result is committed. An attempt already in flight keeps
    /// running so its outcome is still recorded.
    pub async fn route_with_cancel(
        &self,
        request: Request,
        cancel: CancellationToken,
    ) -> Result<RouteResponse, RouteError> {
        let inner = &self.inner;
        if cancel.is_cancelled() {
            return Err(RouteError::Cancelled);
        }

        let request = Arc::new(request);
        let classification = inner.classifier.classify(&request.text);
        tracing::debug!(
            request_id = %request.id,
            intent = %classification.intent,
            complexity = classification.complexity,
            fast_path = classification.fast_path,
            "request classified"
        );

        // Fast-path requests never consult or fill the cache.
        if !classification.fast_path {
            if let Some(hit) = inner.dedup.lookup(&request.text) {
                return Ok(inner.serve_cached(&request, classification, hit));
            }
        }

        let generation = inner.generation();
        let now = Utc::now();
        let records: Vec<_> = request
            .resources
            .iter()
            .map(|id| inner.relevance.access(id, now))
            .collect();
        let context = Arc::new(inner.assembler.assemble(&records, inner.resources.as_ref()));

        if let Some((name, handler)) = classification
            .handler
            .as_deref()
            .and_then(|name| inner.handlers.get_key_value(name))
        {
            let attempt = inner
                .attempt(&request, &classification, name, Arc::clone(handler), &context, &cancel)
                .await;
            match attempt {
                Attempt::Done(result) => {
                    if cancel.is_cancelled() {
                        return Err(RouteError::Cancelled);
                    }
                    inner.relevance.tick();
                    return Ok(RouteResponse {
                        request_id: request.id.clone(),
                        payload: result.payload,
                        backend_used: name.clone(),
                        cache_hit: CacheHit::None,
                        similarity: None,
                        tiers_attempted: Vec::new(),
                        context: context.summary(),
                        classification,
                        degraded: false,
                    });
                }
                Attempt::Failed(failure) => tracing::warn!(
                    request_id = %request.id,
                    handler = %name,
                    reason = %failure.reason,
                    "fast-path handler failed, falling back to cascade"
                ),
                Attempt::Cancelled => return Err(RouteError::Cancelled),
            }
        }

        inner.schedule_probes();
        match inner.dispatch(&request, &classification, &context, &cancel).await {
            Ok(dispatched) => {
                if cancel.is_cancelled() {
                    return Err(RouteError::Cancelled);
                }
                if !classification.fast_path {
                    inner.commit(&request, &dispatched.payload, &dispatched.backend, generation);
                }
                inner.relevance.tick();
                Ok(RouteResponse {
                    request_id: request.id.clone(),
                    payload: dispatched.payload,
                    backend_used: dispatched.backend,
                    cache_hit: CacheHit::None,
                    similarity: None,
                    tiers_attempted: dispatched.tiers_attempted,
                    context: context.summary(),
                    classification,
                    degraded: dispatched.degraded,
                })
            }
            Err(RouteError::Cancelled) => Err(RouteError::Cancelled),
            Err(e) => {
                inner.relevance.tick();
                tracing::warn!(request_id = %request.id, error = %e, "request failed");
                Err(e)
            }
        }
    }

    /// Mark a resource stale and drop every cache entry built with it.
    /// Calling it again has no further effect.
    pub fn invalidate(&self, resource_id: &str) -> Result<Invalidation, StoreError> {
        // Marked before entries are removed so an in-flight commit either
        // sees the mark or is removed below.
        let generation = self.inner.invalidations.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner
            .invalidated
            .insert(resource_id.to_string(), generation);
        let relevance_marked = self.inner.relevance.invalidate(resource_id);
        let cache_entries_removed = self.inner.dedup.invalidate_resource(resource_id)?;
        tracing::info!(
            resource = resource_id,
            relevance_marked,
            cache_entries_removed,
            "resource invalidated"
        );
        Ok(Invalidation {
            relevance_marked,
            cache_entries_removed,
        })
    }

    pub fn health_snapshot(&self) -> Vec<BackendDescriptor> {
        self.inner.health.snapshot()
    }

    pub fn status(&self) -> RouterStatus {
        let relevance = &self.inner.relevance;
        RouterStatus {
            tick: relevance.current_tick(),
            resources: relevance.len(),
            tiers: relevance.tier_counts(),
            evictable: relevance.evictable(),
            cache_entries: self.inner.dedup.len(),
        }
    }

    /// Save relevance and backend state
    pub fn persist(&self, db: &SqliteStore) -> Result<(), StoreError> {
        let records = self.inner.relevance.snapshot();
        let backends = self.inner.health.snapshot();
        db.save_relevance(&records)?;
        db.save_backends(&backends)?;
        tracing::debug!(
            resources = records.len(),
            backends = backends.len(),
            "router state persisted"
        );
        Ok(())
    }

    /// Load relevance and backend state saved by [`persist`](Self::persist).
    /// Backends that are no longer configured are ignored.
    pub fn restore(&self, db: &SqliteStore) -> Result<(), StoreError> {
        let resources = self.inner.relevance.restore(db.load_relevance()?);
        let backends = self.inner.health.restore(&db.load_backends()?);
        tracing::debug!(resources, backends, "router state restored");
        Ok(())
    }

    /// Stop the sweeper and wait for in-flight attempts, probes, and
    /// re-validations to finish.
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}

impl Inner {
    fn serve_cached(
        self: &Arc<Self>,
        request: &Arc<Request>,
        classification: Classification,
        hit: DedupMatch,
    ) -> RouteResponse {
        let cache_hit = match hit.kind {
            MatchKind::Hard => CacheHit::Hard,
            MatchKind::Soft => CacheHit::Soft,
        };
        if hit.kind == MatchKind::Soft && self.config.dispatch.revalidate_soft_hits {
            self.schedule_revalidation(request, &classification, &hit.fingerprint);
        }
        self.relevance.tick();

        RouteResponse {
            request_id: request.id.clone(),
            payload: hit.entry.payload,
            backend_used: hit.entry.backend,
            cache_hit,
            similarity: Some(hit.similarity),
            tiers_attempted: Vec::new(),
            classification,
            context: ContextSummary::default(),
            degraded: false,
        }
    }

    /// Re-execute a soft-hit request in the background and cache its own
    /// result, so the next identical request is a hard hit.
    fn schedule_revalidation(
        self: &Arc<Self>,
        request: &Arc<Request>,
        classification: &Classification,
        fingerprint: &str,
    ) {
        if self.revalidating.insert(fingerprint.to_string(), ()).is_some() {
            tracing::debug!(fingerprint, "re-validation already in flight");
            return;
        }

        let inner = Arc::clone(self);
        let request = Arc::clone(request);
        let classification = classification.clone();
        let fingerprint = fingerprint.to_string();
        self.tracker.spawn(async move {
            let generation = inner.generation();
            let records: Vec<_> = request
                .resources
                .iter()
                .filter_map(|id| inner.relevance.get(id))
                .collect();
            let context = Arc::new(inner.assembler.assemble(&records, inner.resources.as_ref()));
            let cancel = inner.shutdown.child_token();

            match inner.dispatch(&request, &classification, &context, &cancel).await {
                Ok(dispatched) => {
                    inner.commit(&request, &dispatched.payload, &dispatched.backend, generation);
                    tracing::debug!(
                        request_id = %request.id,
                        fingerprint = %fingerprint,
                        "soft hit re-validated"
                    );
                }
                Err(e) => tracing::debug!(
                    request_id = %request.id,
                    error = %e,
                    "soft hit re-validation failed"
                ),
            }
            inner.revalidating.remove(&fingerprint);
        });
    }

    /// Walk the cascade until one candidate succeeds
    async fn dispatch(
        self: &Arc<Self>,
        request: &Arc<Request>,
        classification: &Classification,
        context: &Arc<AssembledContext>,
        cancel: &CancellationToken,
    ) -> Result<Dispatched, RouteError> {
        let required = classification.required_capability(&request.hints);
        let plan = self.selector.select_with_handler(
            required,
            classification.handler.as_deref(),
            &self.health.snapshot(),
        );
        tracing::debug!(
            request_id = %request.id,
            required,
            candidates = ?plan.candidates,
            degraded = plan.degraded,
            "cascade planned"
        );

        let mut attempts = Vec::new();
        let mut tiers_attempted = Vec::new();
        for tier in plan.candidates {
            if cancel.is_cancelled() {
                return Err(RouteError::Cancelled);
            }
            let Some(executor) = self.executors.get(&tier).cloned() else {
                tracing::warn!(tier = %tier, "no executor registered for backend");
                attempts.push(AttemptFailure {
                    tier,
                    outcome: DispatchOutcome::Failure,
                    reason: "no executor registered".to_string(),
                });
                continue;
            };

            tiers_attempted.push(tier.clone());
            match self
                .attempt(request, classification, &tier, executor, context, cancel)
                .await
            {
                Attempt::Done(result) => {
                    return Ok(Dispatched {
                        payload: result.payload,
                        backend: tier,
                        tiers_attempted,
                        degraded: plan.degraded,
                    })
                }
                Attempt::Failed(failure) => attempts.push(failure),
                Attempt::Cancelled => return Err(RouteError::Cancelled),
            }
        }

        Err(RouteError::AllBackendsExhausted { attempts })
    }

    /// Run one attempt in a tracked task and wait for it or for `cancel`
    async fn attempt(
        self: &Arc<Self>,
        request: &Arc<Request>,
        classification: &Classification,
        tier: &str,
        executor: Arc<dyn BackendExecutor>,
        context: &Arc<AssembledContext>,
        cancel: &CancellationToken,
    ) -> Attempt {
        let task = self.tracker.spawn(run_attempt(
            Arc::clone(self),
            Arc::clone(request),
            classification.clone(),
            tier.to_string(),
            executor,
            Arc::clone(context),
        ));

        tokio::select! {
            biased;
            joined = task => match joined {
                Ok(Ok(result)) => Attempt::Done(result),
                Ok(Err(failure)) => Attempt::Failed(failure),
                Err(e) => Attempt::Failed(AttemptFailure {
                    tier: tier.to_string(),
                    outcome: DispatchOutcome::Failure,
                    reason: format!("attempt task failed: {e}"),
                }),
            },
            _ = cancel.cancelled() => {
                tracing::debug!(request_id = %request.id, tier, "cancelled with attempt in flight");
                Attempt::Cancelled
            }
        }
    }

    fn generation(&self) -> u64 {
        self.invalidations.load(Ordering::SeqCst)
    }

    /// Resources of `request` invalidated after `generation`
    fn invalidated_since(&self, request: &Request, generation: u64) -> Vec<String> {
        request
            .resources
            .iter()
            .filter(|id| self.invalidated.get(id.as_str()).is_some_and(|g| *g > generation))
            .cloned()
            .collect()
    }

    /// Cache a dispatch result unless one of its resources was invalidated
    /// after its context was assembled at `generation`.
    fn commit(&self, request: &Request, payload: &[u8], backend: &str, generation: u64) {
        if !self.invalidated_since(request, generation).is_empty() {
            tracing::debug!(
                request_id = %request.id,
                "resource invalidated during dispatch, result not cached"
            );
            return;
        }

        match self
            .dedup
            .insert(&request.text, payload.to_vec(), backend, request.resources.clone())
        {
            Ok(Some(fingerprint)) => {
                // An invalidate that landed between the check and the insert
                let stale = self.invalidated_since(request, generation);
                for resource in &stale {
                    if let Err(e) = self.dedup.invalidate_resource(resource) {
                        tracing::warn!(resource = %resource, error = %e, "failed to drop stale entry");
                    }
                }
                if stale.is_empty() {
                    tracing::debug!(
                        request_id = %request.id,
                        fingerprint = %fingerprint,
                        "result cached"
                    );
                }
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(
                request_id = %request.id,
                error = %e,
                "failed to cache dispatch result"
            ),
        }
    }

    /// Start a short-lived probe for every unhealthy backend that is due
    fn schedule_probes(&self) {
        for tier in self.health.claim_due_probes(Utc::now()) {
            let Some(executor) = self.executors.get(&tier).cloned() else {
                continue;
            };
            let health = Arc::clone(&self.health);
            let timeout = self.config.dispatch.probe_timeout();
            self.tracker.spawn(async move {
                let probed = tokio::time::timeout(timeout, executor.probe(timeout)).await;
                let ok = matches!(probed, Ok(Ok(())));
                tracing::debug!(tier = %tier, ok, "probe finished");
                health.record_probe(&tier, ok, Utc::now());
            });
        }
    }
}

async fn run_attempt(
    inner: Arc<Inner>,
    request: Arc<Request>,
    classification: Classification,
    tier: String,
    executor: Arc<dyn BackendExecutor>,
    context: Arc<AssembledContext>,
) -> Result<ExecutionResult, AttemptFailure> {
    let timeout = inner.config.dispatch.attempt_timeout();
    let started_at = Utc::now();
    let result = tokio::time::timeout(timeout, executor.execute(&request, &context, timeout)).await;
    let finished_at = Utc::now();

    let (outcome, cost, settled) = match result {
        Ok(Ok(result)) => (DispatchOutcome::Success, result.cost, Ok(result)),
        Ok(Err(e)) => {
            let absorbed = RouteError::BackendUnavailable {
                tier: tier.clone(),
                reason: e.to_string(),
            };
            tracing::debug!(request_id = %request.id, error = %absorbed, "attempt failed");
            (DispatchOutcome::Failure, 0.0, Err(e.to_string()))
        }
        Err(_) => {
            let absorbed = RouteError::BackendTimeout {
                tier: tier.clone(),
                timeout_ms: duration_ms(timeout),
            };
            tracing::debug!(request_id = %request.id, error = %absorbed, "attempt timed out");
            (
                DispatchOutcome::Timeout,
                0.0,
                Err(format!("timed out after {}ms", duration_ms(timeout))),
            )
        }
    };

    let record = DispatchRecord {
        request_id: request.id.clone(),
        backend_tier: tier.clone(),
        intent: classification.intent.clone(),
        complexity: classification.complexity,
        fast_path: classification.fast_path,
        started_at,
        finished_at,
        outcome,
        cost,
        reason: settled.as_ref().err().cloned(),
    };
    // Audit failures are logged by the recorder; health is updated regardless.
    if let Ok(Some(transition)) = inner.recorder.record(&record) {
        tracing::debug!(tier = %tier, ?transition, "backend health changed");
    }

    settled.map_err(|reason| AttemptFailure {
        tier,
        outcome,
        reason,
    })
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn spawn_sweeper(inner: &Arc<Inner>) {
    let weak: Weak<Inner> = Arc::downgrade(inner);
    let shutdown = inner.shutdown.clone();
    let period = inner.config.tiering.sweep_interval();
    let batch = inner.config.tiering.sweep_batch.max(1);

    inner.tracker.spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let Some(inner) = weak.upgrade() else { break };
                    let swept = inner.relevance.sweep(batch);
                    let purged = inner.dedup.purge_expired(Utc::now());
                    if purged > 0 {
                        tracing::debug!(swept, purged, "sweep finished");
                    }
                }
            }
        }
        tracing::debug!("decay sweeper stopped");
    });
}
