//! Weighted-lexicon toxicity model.
//!
//! Each category holds terms with a weight in [0, 1]. A category's
//! probability is `1 - Π(1 - w)` over the distinct terms found in the text,
//! so independent weak signals add up without ever exceeding 1.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use regex::Regex;

use super::{CategoryPrediction, ModelLoader, ToxicityError, ToxicityModel, ToxicityResult};

pub const LEXICON_MODEL_VERSION: &str = "lexicon-toxicity-v1";

const DEFAULT_MAX_INPUT_CHARS: usize = 512;

/// Category name → term → weight.
pub type Lexicon = BTreeMap<String, BTreeMap<String, f64>>;

const BUILTIN_LEXICON: &str = r#"{
    "identity_attack": { "go back to your country": 0.85, "subhuman": 0.9 },
    "insult": {
        "idiot": 0.6, "moron": 0.7, "stupid": 0.4, "loser": 0.5, "dumb": 0.4, "pathetic": 0.5
    },
    "obscene": { "fuck": 0.9, "shit": 0.7, "bitch": 0.8, "asshole": 0.85 },
    "severe_toxicity": { "kill yourself": 0.97, "kys": 0.9 },
    "sexual_explicit": { "nude": 0.5, "sex tape": 0.9, "nsfw": 0.6 },
    "threat": { "kill you": 0.95, "hurt you": 0.8, "i will find you": 0.7 },
    "toxicity": {
        "hate you": 0.8, "shut up": 0.5, "kill yourself": 0.95, "fuck": 0.9, "idiot": 0.5,
        "moron": 0.6
    }
}"#;

struct WeightedTerm {
    regex: Regex,
    weight: f64,
}

pub struct LexiconModel {
    categories: Vec<(String, Vec<WeightedTerm>)>,
    threshold: f64,
    max_input_chars: usize,
}

impl LexiconModel {
    pub fn from_lexicon(lexicon: &Lexicon, threshold: f64) -> ToxicityResult<Self> {
        let mut categories = Vec::with_capacity(lexicon.len());

        for (label, terms) in lexicon {
            let mut compiled = Vec::with_capacity(terms.len());
            for (term, weight) in terms {
                if !(0.0..=1.0).contains(weight) {
                    return Err(ToxicityError::Load(format!(
                        "weight {weight} for '{term}' in {label} is outside [0, 1]"
                    )));
                }
                let words: Vec<String> = term.split_whitespace().map(regex::escape).collect();
                let regex = Regex::new(&format!(r"(?i)\b{}\b", words.join(r"\s+")))
                    .map_err(|e| ToxicityError::Load(format!("bad term '{term}': {e}")))?;
                compiled.push(WeightedTerm {
                    regex,
                    weight: *weight,
                });
            }
            categories.push((label.clone(), compiled));
        }

        Ok(Self {
            categories,
            threshold,
            max_input_chars: DEFAULT_MAX_INPUT_CHARS,
        })
    }

    pub fn builtin(threshold: f64) -> ToxicityResult<Self> {
        let lexicon: Lexicon = serde_json::from_str(BUILTIN_LEXICON)
            .map_err(|e| ToxicityError::Load(format!("built-in lexicon: {e}")))?;
        Self::from_lexicon(&lexicon, threshold)
    }

    #[must_use]
    pub const fn with_max_input_chars(mut self, max: usize) -> Self {
        self.max_input_chars = max;
        self
    }

    fn predict(&self, text: &str) -> Vec<CategoryPrediction> {
        self.categories
            .iter()
            .map(|(label, terms)| {
                let clean = terms
                    .iter()
                    .filter(|t| t.regex.is_match(text))
                    .fold(1.0, |clean, t| clean * (1.0 - t.weight));
                let probability = 1.0 - clean;
                CategoryPrediction::new(label.clone(), probability, probability >= self.threshold)
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl ToxicityModel for LexiconModel {
    fn version(&self) -> &str {
        LEXICON_MODEL_VERSION
    }

    fn max_input_chars(&self) -> usize {
        self.max_input_chars
    }

    async fn classify(&self, text: &str) -> ToxicityResult<Vec<CategoryPrediction>> {
        Ok(self.predict(text))
    }
}

/// Loads a [`LexiconModel`] from a JSON file, or the built-in lexicon.
pub struct LexiconLoader {
    path: Option<PathBuf>,
    threshold: f64,
}

impl LexiconLoader {
    #[must_use]
    pub const fn new(path: Option<PathBuf>, threshold: f64) -> Self {
        Self { path, threshold }
    }

    #[must_use]
    pub const fn builtin(threshold: f64) -> Self {
        Self::new(None, threshold)
    }
}

#[async_trait::async_trait]
impl ModelLoader for LexiconLoader {
    async fn load(&self) -> ToxicityResult<Arc<dyn ToxicityModel>> {
        let model = match &self.path {
            Some(path) => {
                let raw = tokio::fs::read_to_string(path)
                    .await
                    .map_err(|e| ToxicityError::Load(format!("{}: {e}", path.display())))?;
                let lexicon: Lexicon = serde_json::from_str(&raw)
                    .map_err(|e| ToxicityError::Load(format!("{}: {e}", path.display())))?;
                LexiconModel::from_lexicon(&lexicon, self.threshold)?
            }
            None => LexiconModel::builtin(self.threshold)?,
        };
        Ok(Arc::new(model))
    }
}
