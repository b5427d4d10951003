pub mod analyzer;
pub mod config;
pub mod document;
pub mod error;
pub mod extract;
pub mod queue;
pub mod rules;
pub mod storage;
pub mod toxicity;

pub use analyzer::{
    fuse, AnalysisError, AnalysisResult, Analyzer, Fusion, ModerationDecision, RetryClass,
    RULE_MODEL_VERSION,
};
pub use config::{
    AnalysisConfig, ConfigError, DecisionThresholds, FusionPolicy, ModerationConfig, QueueConfig,
    RulesConfig, ToxicityConfig,
};
pub use document::{DocumentId, DocumentMetadata, FlagValue, Flags};
pub use error::{Error, Result};
pub use extract::{CompositeExtractor, ExtractError, FileType, TextExtractor};
pub use queue::{
    DecisionSink, EnqueueOutcome, JobState, ModerationJob, ModerationQueue, QueueStats,
};
pub use rules::{Blocklist, RuleFilter, RuleVerdict};
pub use storage::JobStore;
pub use toxicity::{
    LexiconLoader, LexiconModel, ModelLoader, ScorerStatus, ToxicityModel, ToxicityReport,
    ToxicityScorer,
};
