use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Weights and sentinels used when combining rule and model scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusionPolicy {
    /// Weight of the model score when the model is healthy
    pub ai_weight: f64,
    /// Weight of the rule score when the model is healthy
    pub rule_weight: f64,
    /// Keeps a single worst-case category from driving the model score to zero
    pub damping: f64,
    /// Neutral score reported when the model is switched off
    pub disabled_score: f64,
    /// Neutral score reported when loading or inference failed
    pub error_score: f64,
}

impl Default for FusionPolicy {
    fn default() -> Self {
        Self {
            ai_weight: 0.7,
            rule_weight: 0.3,
            damping: 0.8,
            disabled_score: 0.8,
            error_score: 0.7,
        }
    }
}

/// Score cut-offs that turn a fused score into a decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionThresholds {
    /// Scores at or above this are approved
    pub approve: f64,
    /// Scores at or below this are rejected
    pub reject: f64,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            approve: 0.7,
            reject: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Excerpt bound passed to the rule filter and the model
    pub max_excerpt_chars: usize,
    /// Below this (trimmed) the excerpt is treated as near-empty
    pub min_text_chars: usize,
    pub fusion: FusionPolicy,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_excerpt_chars: 1000,
            min_text_chars: 10,
            fusion: FusionPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToxicityConfig {
    /// When false the scorer runs in disabled mode and never loads a model
    pub enabled: bool,
    /// Per-category probability at which a category counts as tripped
    pub threshold: f64,
    /// JSON lexicon to load instead of the built-in one
    pub lexicon_path: Option<PathBuf>,
}

impl Default for ToxicityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 0.9,
            lexicon_path: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Newline-delimited blocklist replacing the built-in terms
    pub blocklist_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub worker_count: usize,
    /// Attempts before a job moves to the dead set
    pub max_attempts: u32,
    #[serde(with = "duration_secs")]
    pub job_timeout: Duration,
    #[serde(with = "duration_secs")]
    pub drain_timeout: Duration,
    #[serde(with = "duration_millis")]
    pub backoff_base: Duration,
    #[serde(with = "duration_millis")]
    pub backoff_max: Duration,
    #[serde(with = "duration_millis")]
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            max_attempts: 3,
            job_timeout: Duration::from_secs(60),
            drain_timeout: Duration::from_secs(30),
            backoff_base: Duration::from_secs(2),
            backoff_max: Duration::from_secs(300),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Pipeline configuration, read once at process start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationConfig {
    /// SQLite file backing the job queue
    pub database_path: PathBuf,
    pub analysis: AnalysisConfig,
    pub toxicity: ToxicityConfig,
    pub rules: RulesConfig,
    pub thresholds: DecisionThresholds,
    pub queue: QueueConfig,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            analysis: AnalysisConfig::default(),
            toxicity: ToxicityConfig::default(),
            rules: RulesConfig::default(),
            thresholds: DecisionThresholds::default(),
            queue: QueueConfig::default(),
        }
    }
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("docguard")
        .join("queue.db")
}

impl ModerationConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or unparseable keys keep defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("DOCGUARD_DB") {
            config.database_path = PathBuf::from(path);
        }

        let analysis = &mut config.analysis;
        set_parsed(&lookup, "DOCGUARD_MAX_EXCERPT_CHARS", &mut analysis.max_excerpt_chars);
        set_parsed(&lookup, "DOCGUARD_MIN_TEXT_CHARS", &mut analysis.min_text_chars);

        if let Some(v) = lookup("DOCGUARD_TOXICITY_ENABLED") {
            config.toxicity.enabled = v == "1" || v.eq_ignore_ascii_case("true");
        }
        set_parsed(&lookup, "DOCGUARD_TOXICITY_THRESHOLD", &mut config.toxicity.threshold);
        config.toxicity.lexicon_path = lookup("DOCGUARD_TOXICITY_LEXICON").map(PathBuf::from);
        config.rules.blocklist_path = lookup("DOCGUARD_BLOCKLIST_PATH").map(PathBuf::from);

        set_parsed(&lookup, "DOCGUARD_APPROVE_THRESHOLD", &mut config.thresholds.approve);
        set_parsed(&lookup, "DOCGUARD_REJECT_THRESHOLD", &mut config.thresholds.reject);

        set_parsed(&lookup, "DOCGUARD_MAX_ATTEMPTS", &mut config.queue.max_attempts);
        set_parsed(&lookup, "DOCGUARD_WORKERS", &mut config.queue.worker_count);

        let mut secs = config.queue.job_timeout.as_secs();
        set_parsed(&lookup, "DOCGUARD_JOB_TIMEOUT_SECS", &mut secs);
        config.queue.job_timeout = Duration::from_secs(secs);

        let mut secs = config.queue.drain_timeout.as_secs();
        set_parsed(&lookup, "DOCGUARD_DRAIN_TIMEOUT_SECS", &mut secs);
        config.queue.drain_timeout = Duration::from_secs(secs);

        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.thresholds;
        if !(0.0..=1.0).contains(&t.approve) || !(0.0..=1.0).contains(&t.reject) {
            return Err(ConfigError::ThresholdOutOfRange);
        }
        if t.reject >= t.approve {
            return Err(ConfigError::ThresholdOrder {
                reject: t.reject,
                approve: t.approve,
            });
        }
        if !(0.0..=1.0).contains(&self.toxicity.threshold) {
            return Err(ConfigError::ThresholdOutOfRange);
        }

        let f = &self.analysis.fusion;
        let weights_valid = (0.0..=1.0).contains(&f.ai_weight)
            && (0.0..=1.0).contains(&f.rule_weight)
            && ((f.ai_weight + f.rule_weight) - 1.0).abs() <= 1e-9;
        if !weights_valid {
            return Err(ConfigError::FusionWeights(f.ai_weight, f.rule_weight));
        }
        if !f.damping.is_finite() || f.damping <= 0.0 || f.damping > 1.0 {
            return Err(ConfigError::Damping(f.damping));
        }
        for sentinel in [f.disabled_score, f.error_score] {
            if !(0.0..=1.0).contains(&sentinel) {
                return Err(ConfigError::SentinelScore(sentinel));
            }
        }
        if self.analysis.max_excerpt_chars == 0 {
            return Err(ConfigError::ZeroExcerpt);
        }

        if self.queue.worker_count == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.queue.max_attempts == 0 {
            return Err(ConfigError::NoAttempts);
        }
        if self.queue.job_timeout.is_zero() {
            return Err(ConfigError::ZeroJobTimeout);
        }
        Ok(())
    }
}

fn set_parsed<F, T>(lookup: &F, key: &str, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse() {
        Ok(value) => *target = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparseable configuration value"),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Thresholds must lie within [0, 1]")]
    ThresholdOutOfRange,
    #[error("Reject threshold {reject} must be below approve threshold {approve}")]
    ThresholdOrder { reject: f64, approve: f64 },
    #[error("Fusion weights must be non-negative and sum to 1 (got {0} + {1})")]
    FusionWeights(f64, f64),
    #[error("Damping factor must be in (0, 1], got {0}")]
    Damping(f64),
    #[error("Fallback model scores must lie within [0, 1], got {0}")]
    SentinelScore(f64),
    #[error("Excerpt length must be positive")]
    ZeroExcerpt,
    #[error("Worker pool size must be at least 1")]
    NoWorkers,
    #[error("Max attempts must be at least 1")]
    NoAttempts,
    #[error("Job timeout must be positive")]
    ZeroJobTimeout,
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
