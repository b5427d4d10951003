use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{AnalysisConfig, DecisionThresholds, FusionPolicy};
use crate::document::{DocumentMetadata, FlagValue, Flags};
use crate::extract::{truncate_chars, CompositeExtractor, ExtractError, FileType, TextExtractor};
use crate::rules::RuleFilter;
use crate::toxicity::{ToxicityReport, ToxicityScorer};

/// `model_version` when the score came from the rule filter alone.
pub const RULE_MODEL_VERSION: &str = "rule-based-v1";
/// Appended to the model version when a model score was fused in.
pub const FUSED_SUFFIX: &str = "+rules-v1";

pub const FLAG_REJECTED_BY_RULES: &str = "rejected_by_rules";
pub const FLAG_RULE_SCORE: &str = "rule_score";
pub const FLAG_AI_SCORE: &str = "ai_score";
pub const FLAG_AI_ENABLED: &str = "ai_enabled";

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("Text extraction failed: {0}")]
    Extraction(#[source] ExtractError),
    #[error("Analysis failed: {0}")]
    Failed(String),
}

impl From<ExtractError> for AnalysisError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::UnsupportedFileType(t) => Self::UnsupportedFileType(t),
            other => Self::Extraction(other),
        }
    }
}

/// How the queue should treat a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Retrying cannot help
    Permanent,
    /// One more attempt, in case the file was still being written
    Once,
    /// Retry with exponential backoff up to the attempt limit
    Backoff,
}

impl AnalysisError {
    #[must_use]
    pub const fn retry_class(&self) -> RetryClass {
        match self {
            Self::UnsupportedFileType(_) => RetryClass::Permanent,
            Self::Extraction(_) => RetryClass::Once,
            Self::Failed(_) => RetryClass::Backoff,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Confidence the document is safe, in [0, 1]
    pub score: f64,
    pub flags: Flags,
    /// Characters in the full extracted text, before truncation
    pub extracted_text_length: usize,
    pub model_version: String,
    pub rule_based_rejection: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationDecision {
    Approved,
    Rejected,
    NeedsReview,
}

impl ModerationDecision {
    #[must_use]
    pub fn from_score(score: f64, thresholds: &DecisionThresholds) -> Self {
        if score >= thresholds.approve {
            Self::Approved
        } else if score <= thresholds.reject {
            Self::Rejected
        } else {
            Self::NeedsReview
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::NeedsReview => "needs_review",
        }
    }
}

impl std::fmt::Display for ModerationDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score and version produced by combining the rule score with a model report.
#[derive(Debug, Clone, PartialEq)]
pub struct Fusion {
    pub score: f64,
    pub model_version: String,
    pub ai_score: Option<f64>,
}

/// Combine a rule score with an optional model report.
///
/// Sentinel reports (disabled or errored model) and a missing report leave the
/// rule score untouched.
#[must_use]
pub fn fuse(rule_score: f64, report: Option<&ToxicityReport>, policy: &FusionPolicy) -> Fusion {
    let (score, model_version, ai_score) = match report.filter(|r| r.ai_enabled()) {
        Some(report) => (
            report.score * policy.ai_weight + rule_score * policy.rule_weight,
            format!("{}{FUSED_SUFFIX}", report.model_version),
            Some(report.score),
        ),
        None => (rule_score, RULE_MODEL_VERSION.to_string(), None),
    };

    Fusion {
        score: clamp_unit(score),
        model_version,
        ai_score,
    }
}

fn clamp_unit(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

pub struct Analyzer {
    extractor: Arc<dyn TextExtractor>,
    rules: RuleFilter,
    scorer: Arc<ToxicityScorer>,
    config: AnalysisConfig,
}

impl Analyzer {
    #[must_use]
    pub fn new(
        extractor: Arc<dyn TextExtractor>,
        rules: RuleFilter,
        scorer: Arc<ToxicityScorer>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            extractor,
            rules,
            scorer,
            config,
        }
    }

    /// Default extractors and rules with the given scorer.
    #[must_use]
    pub fn with_scorer(scorer: Arc<ToxicityScorer>, config: AnalysisConfig) -> Self {
        let rules = RuleFilter::new(config.min_text_chars);
        Self::new(Arc::new(CompositeExtractor::default()), rules, scorer, config)
    }

    pub async fn analyze(
        &self,
        file_path: &Path,
        metadata: &DocumentMetadata,
    ) -> Result<AnalysisResult, AnalysisError> {
        let file_type = FileType::from_declared(&metadata.file_type)
            .ok_or_else(|| AnalysisError::UnsupportedFileType(metadata.file_type.clone()))?;

        let text = self.extractor.extract_file(file_path, file_type).await?;
        let extracted_text_length = text.chars().count();
        let excerpt = truncate_chars(&text, self.config.max_excerpt_chars);

        let has_text = excerpt.trim().chars().count() >= self.config.min_text_chars;
        if !has_text {
            warn!(
                path = %file_path.display(),
                chars = extracted_text_length,
                "extracted text is near-empty; scoring on metadata only"
            );
        }

        let verdict = self.rules.evaluate(excerpt, metadata);
        let mut flags = verdict.flags;

        if verdict.should_reject {
            flags.insert(FLAG_REJECTED_BY_RULES.into(), true.into());
            flags.insert(FLAG_RULE_SCORE.into(), 0.0.into());
            flags.insert(FLAG_AI_SCORE.into(), FlagValue::Null);
            flags.insert(FLAG_AI_ENABLED.into(), false.into());

            return Ok(AnalysisResult {
                score: 0.0,
                flags,
                extracted_text_length,
                model_version: RULE_MODEL_VERSION.to_string(),
                rule_based_rejection: true,
            });
        }

        let report = if has_text {
            Some(self.scorer.analyze_toxicity(excerpt).await)
        } else {
            None
        };

        let fusion = fuse(verdict.score, report.as_ref(), &self.config.fusion);
        if let Some(report) = report {
            flags.extend(report.flags);
        }
        flags.insert(FLAG_AI_SCORE.into(), fusion.ai_score.into());
        flags.insert(FLAG_RULE_SCORE.into(), verdict.score.into());
        flags.insert(FLAG_AI_ENABLED.into(), fusion.ai_score.is_some().into());

        debug!(
            score = fusion.score,
            model_version = %fusion.model_version,
            "analysis complete"
        );

        Ok(AnalysisResult {
            score: fusion.score,
            flags,
            extracted_text_length,
            model_version: fusion.model_version,
            rule_based_rejection: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::FLAG_BLOCKLISTED;
    use crate::toxicity::{
        CategoryPrediction, ModelLoader, ToxicityModel, ToxicityResult, MODEL_DISABLED, MODEL_ERROR,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingModel {
        calls: AtomicUsize,
        predictions: Vec<CategoryPrediction>,
    }

    #[async_trait::async_trait]
    impl ToxicityModel for CountingModel {
        fn version(&self) -> &str {
            "mock-v2"
        }

        fn max_input_chars(&self) -> usize {
            512
        }

        async fn classify(&self, _text: &str) -> ToxicityResult<Vec<CategoryPrediction>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.predictions.clone())
        }
    }

    struct MockLoader(Arc<CountingModel>);

    #[async_trait::async_trait]
    impl ModelLoader for MockLoader {
        async fn load(&self) -> ToxicityResult<Arc<dyn ToxicityModel>> {
            Ok(self.0.clone())
        }
    }

    fn mock_model(predictions: Vec<CategoryPrediction>) -> Arc<CountingModel> {
        Arc::new(CountingModel {
            calls: AtomicUsize::new(0),
            predictions,
        })
    }

    fn analyzer_with(model: &Arc<CountingModel>) -> Analyzer {
        let scorer = ToxicityScorer::new(
            Arc::new(MockLoader(model.clone())),
            FusionPolicy::default(),
        );
        Analyzer::with_scorer(Arc::new(scorer), AnalysisConfig::default())
    }

    fn disabled_analyzer() -> Analyzer {
        let scorer = ToxicityScorer::disabled(FusionPolicy::default());
        Analyzer::with_scorer(Arc::new(scorer), AnalysisConfig::default())
    }

    async fn write_text(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        tokio::fs::write(&path, body).await.unwrap();
        path
    }

    fn txt_meta(name: &str) -> DocumentMetadata {
        DocumentMetadata::new("txt").with_file_name(name)
    }

    #[test]
    fn test_fuse_healthy_weights() {
        let report = ToxicityReport {
            score: 1.0,
            flags: Flags::new(),
            model_version: "m1".into(),
        };
        let fusion = fuse(1.0, Some(&report), &FusionPolicy::default());
        assert!((fusion.score - 1.0).abs() < f64::EPSILON);
        assert_eq!(fusion.model_version, "m1+rules-v1");

        let report = ToxicityReport {
            score: 0.2,
            ..report
        };
        let fusion = fuse(0.5, Some(&report), &FusionPolicy::default());
        // 0.2 * 0.7 + 0.5 * 0.3
        assert!((fusion.score - 0.29).abs() < 1e-9);
        assert_eq!(fusion.ai_score, Some(0.2));
    }

    #[test]
    fn test_fuse_ignores_sentinels() {
        for version in [MODEL_DISABLED, MODEL_ERROR] {
            let report = ToxicityReport {
                score: 0.8,
                flags: Flags::new(),
                model_version: version.into(),
            };
            let fusion = fuse(0.45, Some(&report), &FusionPolicy::default());
            assert!((fusion.score - 0.45).abs() < f64::EPSILON);
            assert_eq!(fusion.model_version, RULE_MODEL_VERSION);
            assert_eq!(fusion.ai_score, None);
        }
    }

    #[test]
    fn test_fuse_clamps_and_handles_nan() {
        let policy = FusionPolicy::default();
        assert!(fuse(f64::NAN, None, &policy).score.abs() < f64::EPSILON);
        assert!((fuse(1.7, None, &policy).score - 1.0).abs() < f64::EPSILON);
        assert!(fuse(-0.2, None, &policy).score.abs() < f64::EPSILON);
    }

    #[test]
    fn test_decision_thresholds() {
        let t = DecisionThresholds::default();
        assert_eq!(ModerationDecision::from_score(0.7, &t), ModerationDecision::Approved);
        assert_eq!(ModerationDecision::from_score(0.5, &t), ModerationDecision::NeedsReview);
        assert_eq!(ModerationDecision::from_score(0.3, &t), ModerationDecision::Rejected);
        assert_eq!(ModerationDecision::from_score(0.0, &t), ModerationDecision::Rejected);
        assert_eq!(
            serde_json::to_string(&ModerationDecision::NeedsReview).unwrap(),
            r#""needs_review""#
        );
    }

    #[test]
    fn test_retry_classes() {
        assert_eq!(
            AnalysisError::UnsupportedFileType("exe".into()).retry_class(),
            RetryClass::Permanent
        );
        assert_eq!(
            AnalysisError::from(ExtractError::Failed("corrupt".into())).retry_class(),
            RetryClass::Once
        );
        assert_eq!(
            AnalysisError::from(ExtractError::UnsupportedFileType("rtf".into())).retry_class(),
            RetryClass::Permanent
        );
        assert_eq!(AnalysisError::Failed("timeout".into()).retry_class(), RetryClass::Backoff);
    }

    #[tokio::test]
    async fn test_rule_rejection_skips_scorer() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_text(&dir, "essay.txt", "buy cheap essays now").await;
        let model = mock_model(vec![]);

        let result = analyzer_with(&model)
            .analyze(&path, &txt_meta("essay.txt"))
            .await
            .unwrap();

        assert!(result.rule_based_rejection);
        assert!(result.score.abs() < f64::EPSILON);
        assert_eq!(result.model_version, RULE_MODEL_VERSION);
        assert_eq!(result.flags[FLAG_BLOCKLISTED], FlagValue::Bool(true));
        assert_eq!(result.flags[FLAG_REJECTED_BY_RULES], FlagValue::Bool(true));
        assert!(result.flags[FLAG_AI_SCORE].is_null());
        assert_eq!(result.flags[FLAG_AI_ENABLED], FlagValue::Bool(false));
        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disabled_scorer_uses_rule_score() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_text(&dir, "notes.txt", "Cells divide through mitosis and meiosis.").await;

        let result = disabled_analyzer()
            .analyze(&path, &txt_meta("notes.txt"))
            .await
            .unwrap();

        assert!((result.score - 1.0).abs() < f64::EPSILON);
        assert_eq!(result.model_version, RULE_MODEL_VERSION);
        assert!(result.flags[FLAG_AI_SCORE].is_null());
        assert_eq!(result.flags[FLAG_RULE_SCORE], FlagValue::Number(1.0));
        assert_eq!(result.flags[FLAG_AI_ENABLED], FlagValue::Bool(false));
        assert!(!result.rule_based_rejection);
    }

    #[tokio::test]
    async fn test_healthy_scorer_fuses() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_text(&dir, "notes.txt", "Cells divide through mitosis and meiosis.").await;
        let model = mock_model(vec![CategoryPrediction::new("insult", 0.1, false)]);

        let result = analyzer_with(&model)
            .analyze(&path, &txt_meta("notes.txt"))
            .await
            .unwrap();

        assert!((result.score - 1.0).abs() < f64::EPSILON);
        assert_eq!(result.model_version, "mock-v2+rules-v1");
        assert_eq!(result.flags[FLAG_AI_SCORE], FlagValue::Number(1.0));
        assert_eq!(result.flags[FLAG_AI_ENABLED], FlagValue::Bool(true));
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_toxicity_flags_are_merged() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_text(&dir, "rant.txt", "A long rant that the model dislikes a lot.").await;
        let model = mock_model(vec![CategoryPrediction::new("insult", 1.0, true)]);

        let result = analyzer_with(&model)
            .analyze(&path, &txt_meta("rant.txt"))
            .await
            .unwrap();

        // ai = 1 - 1.0 * 0.8 = 0.2; fused = 0.2 * 0.7 + 1.0 * 0.3
        assert!((result.score - 0.44).abs() < 1e-9);
        assert_eq!(result.flags["toxicity_insult"], FlagValue::Number(1.0));
    }

    #[tokio::test]
    async fn test_short_text_skips_scorer() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_text(&dir, "tiny.txt", "hello").await;
        let model = mock_model(vec![]);

        let result = analyzer_with(&model)
            .analyze(&path, &txt_meta("tiny.txt"))
            .await
            .unwrap();

        assert_eq!(model.calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.model_version, RULE_MODEL_VERSION);
        assert_eq!(result.extracted_text_length, 5);
        assert_eq!(result.flags["near_empty_text"], FlagValue::Bool(true));
        // near-empty penalty only
        assert!((result.score - 0.8).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_excerpt_truncated_but_length_is_full() {
        let dir = tempfile::tempdir().unwrap();
        let body = "Plenty of ordinary words. ".repeat(100);
        let path = write_text(&dir, "long.txt", &body).await;

        let result = disabled_analyzer()
            .analyze(&path, &txt_meta("long.txt"))
            .await
            .unwrap();

        assert_eq!(result.extracted_text_length, body.chars().count());
        assert!(result.extracted_text_length > 1000);
    }

    #[tokio::test]
    async fn test_analysis_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_text(&dir, "notes.txt", "Some repeatable lecture content here.").await;
        let analyzer = disabled_analyzer();

        let a = analyzer.analyze(&path, &txt_meta("notes.txt")).await.unwrap();
        let b = analyzer.analyze(&path, &txt_meta("notes.txt")).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_unknown_type_is_permanent() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_text(&dir, "virus.exe", "MZ").await;

        let err = disabled_analyzer()
            .analyze(&path, &DocumentMetadata::new("exe"))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::UnsupportedFileType(_)));
        assert_eq!(err.retry_class(), RetryClass::Permanent);
    }

    #[tokio::test]
    async fn test_missing_file_is_extraction_error() {
        let err = disabled_analyzer()
            .analyze(Path::new("/nowhere/notes.txt"), &txt_meta("notes.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::Extraction(ExtractError::Io(_))));
        assert_eq!(err.retry_class(), RetryClass::Once);
    }
}
