use std::sync::Arc;

use tokio::sync::{OnceCell, RwLock};
use tracing::{error, info, warn};

use super::{
    CategoryPrediction, ModelLoader, ToxicityError, ToxicityModel, ToxicityReport, MODEL_DISABLED,
    MODEL_ERROR,
};
use crate::config::FusionPolicy;
use crate::document::{FlagValue, Flags};
use crate::extract::truncate_chars;

#[derive(Clone)]
enum ModelState {
    Ready(Arc<dyn ToxicityModel>),
    Unavailable(String),
}

/// What the scorer would do on its next call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScorerStatus {
    Disabled,
    NotLoaded,
    Ready { version: String },
    Unavailable { reason: String },
}

/// Lazily loads a toxicity model on first use and shares it across callers.
///
/// Concurrent first calls wait on a single load. A failed load is remembered
/// until [`ToxicityScorer::reload`] is called.
pub struct ToxicityScorer {
    loader: Option<Arc<dyn ModelLoader>>,
    policy: FusionPolicy,
    state: RwLock<Arc<OnceCell<ModelState>>>,
}

impl ToxicityScorer {
    #[must_use]
    pub fn new(loader: Arc<dyn ModelLoader>, policy: FusionPolicy) -> Self {
        Self {
            loader: Some(loader),
            policy,
            state: RwLock::new(Arc::new(OnceCell::new())),
        }
    }

    #[must_use]
    pub fn disabled(policy: FusionPolicy) -> Self {
        Self {
            loader: None,
            policy,
            state: RwLock::new(Arc::new(OnceCell::new())),
        }
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.loader.is_some()
    }

    pub async fn status(&self) -> ScorerStatus {
        if self.loader.is_none() {
            return ScorerStatus::Disabled;
        }
        match self.state.read().await.get() {
            None => ScorerStatus::NotLoaded,
            Some(ModelState::Ready(model)) => ScorerStatus::Ready {
                version: model.version().to_string(),
            },
            Some(ModelState::Unavailable(reason)) => ScorerStatus::Unavailable {
                reason: reason.clone(),
            },
        }
    }

    /// Drop the cached model (or cached failure); the next call loads again.
    pub async fn reload(&self) {
        *self.state.write().await = Arc::new(OnceCell::new());
        info!("toxicity model scheduled for reload");
    }

    pub async fn analyze_toxicity(&self, text: &str) -> ToxicityReport {
        let Some(loader) = &self.loader else {
            return self.disabled_report();
        };

        let model = match self.model_state(loader).await {
            ModelState::Ready(model) => model,
            ModelState::Unavailable(reason) => return self.error_report(&reason),
        };

        let input = truncate_chars(text, model.max_input_chars());
        match model.classify(input).await {
            Ok(predictions) => self.healthy_report(model.version(), &predictions),
            Err(e) => {
                warn!(error = %e, model_version = model.version(), "toxicity inference failed");
                self.error_report(&e.to_string())
            }
        }
    }

    async fn model_state(&self, loader: &Arc<dyn ModelLoader>) -> ModelState {
        let cell = Arc::clone(&*self.state.read().await);
        cell.get_or_init(|| async {
            // A panicking loader must land in the cell like any other failure.
            let loader = Arc::clone(loader);
            let loaded = tokio::spawn(async move { loader.load().await })
                .await
                .unwrap_or_else(|e| Err(ToxicityError::Load(format!("loader panicked: {e}"))));

            match loaded {
                Ok(model) => {
                    info!(model_version = model.version(), "toxicity model loaded");
                    ModelState::Ready(model)
                }
                Err(e) => {
                    error!(error = %e, "toxicity model unavailable; scoring degraded");
                    ModelState::Unavailable(e.to_string())
                }
            }
        })
        .await
        .clone()
    }

    fn disabled_report(&self) -> ToxicityReport {
        ToxicityReport {
            score: self.policy.disabled_score,
            flags: Flags::new(),
            model_version: MODEL_DISABLED.to_string(),
        }
    }

    fn error_report(&self, message: &str) -> ToxicityReport {
        let mut flags = Flags::new();
        flags.insert("error".into(), FlagValue::Bool(true));
        flags.insert("message".into(), FlagValue::from(message));

        ToxicityReport {
            score: self.policy.error_score,
            flags,
            model_version: MODEL_ERROR.to_string(),
        }
    }

    fn healthy_report(&self, version: &str, predictions: &[CategoryPrediction]) -> ToxicityReport {
        let tripped: Vec<&CategoryPrediction> = predictions.iter().filter(|p| p.matched).collect();

        let mut flags = Flags::new();
        for prediction in &tripped {
            flags.insert(
                format!("toxicity_{}", prediction.label),
                FlagValue::Number(prediction.toxic_probability),
            );
        }

        let score = if tripped.is_empty() {
            1.0
        } else {
            let total: f64 = tripped.iter().map(|p| p.toxic_probability).sum();
            let avg = total / tripped.len() as f64;
            (1.0 - avg * self.policy.damping).clamp(0.0, 1.0)
        };

        ToxicityReport {
            score,
            flags,
            model_version: version.to_string(),
        }
    }
}
