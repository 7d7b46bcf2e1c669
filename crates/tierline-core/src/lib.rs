//! Core routing types, relevance tiering, context assembly, and cascade selection

mod cascade;
mod config;
mod context;
mod error;
mod relevance;
mod types;

pub use cascade::{CascadePlan, CascadeSelector};
pub use config::{
    AdaptiveConfig, AuditTarget, BackendSpec, ClassifierConfig, Config, ContextConfig,
    DedupConfig, DispatchConfig, HandlerSpec, HealthConfig, PatternKind, PatternSpec,
    TieringConfig,
};
pub use context::{
    summarize, AssembledContext, ContextAssembler, ContextSection, ContextSummary, FsResources,
    MemoryResources, ResourceProvider,
};
pub use error::{AttemptFailure, ConfigError, RouteError};
pub use relevance::{RelevanceEngine, TierCounts};
pub use types::{
    BackendDescriptor, CacheHit, CapabilityHints, Classification, RelevanceRecord, Request, Tier,
};
