use super::{run_blocking, ExtractError, ExtractResult, FileType, TextExtractor};

/// Extractor for PDF files, backed by pdf-extract.
pub struct PdfExtractor;

impl PdfExtractor {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Default for PdfExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl TextExtractor for PdfExtractor {
    fn supported_types(&self) -> &[FileType] {
        &[FileType::Pdf]
    }

    async fn extract_bytes(&self, data: &[u8], _file_type: FileType) -> ExtractResult<String> {
        if !data.starts_with(b"%PDF") {
            return Err(ExtractError::Failed("missing PDF header".into()));
        }

        run_blocking(data, |bytes| {
            pdf_extract::extract_text_from_mem(bytes)
                .map_err(|e| ExtractError::Failed(format!("PDF extraction failed: {e}")))
        })
        .await
    }
}
