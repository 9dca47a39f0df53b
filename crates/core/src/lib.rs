pub mod dedup;
pub mod enrichment;
pub mod error;
pub mod evaluator;
pub mod features;
pub mod fetch;
pub mod limiter;
pub mod models;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod profile;
pub mod sources;
pub mod stats;
pub mod text;
pub mod traits;

pub use dedup::{dedupe, normalize_url, DedupKey, DedupOutcome};
pub use enrichment::{EnrichmentFetcher, EnrichmentReport};
pub use error::{
    BlockedError, ConfigError, DetailFetchError, FetchError, ParseError, PipelineError,
    SourceError, WriteError,
};
pub use evaluator::ProfileMatchEvaluator;
pub use features::{classify_work_mode, FeatureExtractor, ListingHints, SkillVocabulary};
pub use fetch::{
    FetchRequest, FetchedPage, HttpFetcher, OfflineFetcher, PageFetcher, ProxyIdentity,
    SessionHandle,
};
pub use limiter::{ProxyPool, RetryPolicy, SourceLimiter, TokenBucket};
pub use models::{
    AlignmentLevel, Compensation, EnrichedJob, EnrichmentStatus, ExperienceRange,
    ExtractedFeatures, JobDetail, MatchResult, RawListing, ScoredJob, SearchQuery, Site, WorkMode,
};
pub use orchestrator::{DiscoveryOrchestrator, SourceHandle, SourceOutcome};
pub use output::{
    write_with_fallback, DebugDumpHook, HookContext, HookOutcome, KeepStrategy,
    MasterAggregateHook, PostRunHook, PrimaryRow,
};
pub use pipeline::{PipelineController, PipelineSettings, RunConfig, RunReport};
pub use profile::{AlignmentBands, ExclusionMode, Profile, ScoringRule, TierWeights};
pub use sources::{build_adapter, Discovery, SourceSettings};
pub use stats::{RunStats, RunSummary, SourceReport, SourceStatus};
pub use traits::{ListingPage, PageCursor, SourceAdapter};
