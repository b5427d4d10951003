use docguard_core::{AnalysisResult, DecisionSink, DocumentId, ModerationDecision};
use tracing::{error, info};

/// Reports decisions as structured log events.
pub struct LogSink;

#[async_trait::async_trait]
impl DecisionSink for LogSink {
    async fn on_decision(
        &self,
        document_id: &DocumentId,
        decision: ModerationDecision,
        result: &AnalysisResult,
    ) {
        let flags = serde_json::to_string(&result.flags).unwrap_or_default();
        info!(
            %document_id,
            %decision,
            score = result.score,
            model_version = %result.model_version,
            rule_based_rejection = result.rule_based_rejection,
            %flags,
            "document moderated"
        );
    }

    async fn on_dead(&self, document_id: &DocumentId, last_error: &str) {
        error!(%document_id, error = last_error, "document needs manual review");
    }
}
