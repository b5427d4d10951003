use super::{ExtractError, ExtractResult, FileType, TextExtractor};

const UTF8_BOM: &str = "\u{feff}";

pub struct PlainTextExtractor;

impl PlainTextExtractor {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for PlainTextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TextExtractor for PlainTextExtractor {
    fn supported_types(&self) -> &[FileType] {
        &[FileType::PlainText, FileType::Markdown]
    }

    async fn extract_bytes(&self, data: &[u8], _file_type: FileType) -> ExtractResult<String> {
        let text =
            String::from_utf8(data.to_vec()).map_err(|e| ExtractError::Encoding(e.to_string()))?;

        Ok(match text.strip_prefix(UTF8_BOM) {
            Some(rest) => rest.to_string(),
            None => text,
        })
    }
}
