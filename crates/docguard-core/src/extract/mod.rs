mod file_type;
mod office;
mod pdf;
mod text;

pub use file_type::FileType;
pub use office::OfficeExtractor;
pub use pdf::PdfExtractor;
pub use text::PlainTextExtractor;

use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Encoding error: {0}")]
    Encoding(String),
    #[error("Extraction failed: {0}")]
    Failed(String),
}

impl ExtractError {
    /// Anything other than an unsupported type means the file itself could not be read.
    #[must_use]
    pub const fn is_unsupported(&self) -> bool {
        matches!(self, Self::UnsupportedFileType(_))
    }
}

pub type ExtractResult<T> = Result<T, ExtractError>;

#[async_trait::async_trait]
pub trait TextExtractor: Send + Sync {
    fn supported_types(&self) -> &[FileType];

    fn can_extract(&self, file_type: FileType) -> bool {
        self.supported_types().contains(&file_type)
    }

    async fn extract_bytes(&self, data: &[u8], file_type: FileType) -> ExtractResult<String>;

    async fn extract_file(&self, path: &Path, file_type: FileType) -> ExtractResult<String> {
        if !self.can_extract(file_type) {
            return Err(ExtractError::UnsupportedFileType(file_type.to_string()));
        }

        let data = tokio::fs::read(path).await?;
        tracing::debug!(path = %path.display(), bytes = data.len(), %file_type, "extracting text");
        self.extract_bytes(&data, file_type).await
    }
}

/// Longest prefix of `text` holding at most `max_chars` characters.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Run a CPU-bound decoder off the async worker threads.
pub(crate) async fn run_blocking<F>(data: &[u8], decode: F) -> ExtractResult<String>
where
    F: FnOnce(&[u8]) -> ExtractResult<String> + Send + 'static,
{
    let owned = data.to_vec();
    tokio::task::spawn_blocking(move || decode(&owned))
        .await
        .map_err(|e| ExtractError::Failed(format!("decoder task failed: {e}")))?
}

pub struct CompositeExtractor {
    extractors: Vec<Box<dyn TextExtractor>>,
}

impl CompositeExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            extractors: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_extractor(mut self, extractor: Box<dyn TextExtractor>) -> Self {
        self.extractors.push(extractor);
        self
    }

    fn find_extractor(&self, file_type: FileType) -> Option<&dyn TextExtractor> {
        self.extractors
            .iter()
            .find(|e| e.can_extract(file_type))
            .map(AsRef::as_ref)
    }
}

impl Default for CompositeExtractor {
    fn default() -> Self {
        Self::new()
            .with_extractor(Box::new(PlainTextExtractor::new()))
            .with_extractor(Box::new(PdfExtractor::new()))
            .with_extractor(Box::new(OfficeExtractor::new()))
    }
}

#[async_trait::async_trait]
impl TextExtractor for CompositeExtractor {
    fn supported_types(&self) -> &[FileType] {
        &FileType::ALL
    }

    fn can_extract(&self, file_type: FileType) -> bool {
        self.find_extractor(file_type).is_some()
    }

    async fn extract_bytes(&self, data: &[u8], file_type: FileType) -> ExtractResult<String> {
        let extractor = self
            .find_extractor(file_type)
            .ok_or_else(|| ExtractError::UnsupportedFileType(file_type.to_string()))?;

        extractor.extract_bytes(data, file_type).await
    }
}
