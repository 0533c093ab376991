use curator_core::errors::CapabilityError;
use curator_core::extract::{DocumentSource, TextExtractor};

/// Extraction for plain text and markdown documents. Anything that is not
/// valid UTF-8 fails, and batch ingestion skips it.
#[derive(Clone, Copy, Debug, Default)]
pub struct Utf8Extractor;

impl TextExtractor for Utf8Extractor {
    fn extract(&self, source: &DocumentSource) -> Result<String, CapabilityError> {
        String::from_utf8(source.bytes.clone()).map_err(|_| {
            CapabilityError::MalformedResponse(format!("{}: not valid UTF-8 text", source.name))
        })
    }
}
