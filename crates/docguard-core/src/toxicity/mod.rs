//! Probabilistic toxicity scoring.
//!
//! The scorer never fails: a switched-off model, a model that could not be
//! loaded, and an inference error all produce a neutral report whose
//! `model_version` says which of those happened.

mod lexicon;
mod scorer;

pub use lexicon::{Lexicon, LexiconLoader, LexiconModel, LEXICON_MODEL_VERSION};
pub use scorer::{ScorerStatus, ToxicityScorer};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::document::Flags;

/// `model_version` reported when no model is configured.
pub const MODEL_DISABLED: &str = "disabled";
/// `model_version` reported when loading or inference failed.
pub const MODEL_ERROR: &str = "error";

#[derive(Debug, Error)]
pub enum ToxicityError {
    #[error("Model load failed: {0}")]
    Load(String),
    #[error("Inference failed: {0}")]
    Inference(String),
}

pub type ToxicityResult<T> = Result<T, ToxicityError>;

/// Model output for a single category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryPrediction {
    pub label: String,
    pub toxic_probability: f64,
    /// Whether the model considers this category tripped
    pub matched: bool,
}

impl CategoryPrediction {
    #[must_use]
    pub fn new(label: impl Into<String>, toxic_probability: f64, matched: bool) -> Self {
        Self {
            label: label.into(),
            toxic_probability,
            matched,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToxicityReport {
    pub score: f64,
    pub flags: Flags,
    pub model_version: String,
}

impl ToxicityReport {
    /// True when the score came from a working model rather than a sentinel.
    #[must_use]
    pub fn ai_enabled(&self) -> bool {
        self.model_version != MODEL_DISABLED && self.model_version != MODEL_ERROR
    }
}

#[async_trait::async_trait]
pub trait ToxicityModel: Send + Sync {
    fn version(&self) -> &str;

    /// Longest input, in characters, the model accepts.
    fn max_input_chars(&self) -> usize;

    async fn classify(&self, text: &str) -> ToxicityResult<Vec<CategoryPrediction>>;
}

#[async_trait::async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self) -> ToxicityResult<Arc<dyn ToxicityModel>>;
}
