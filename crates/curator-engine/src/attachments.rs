use tracing::{info, warn};

use curator_core::extract::{DocumentSource, TextExtractor};
use curator_core::tokens::TokenCounter;
use curator_store::attachments::{AttachmentMeta, AttachmentRepo, NewChunk};

use crate::chunker::{chunk, ChunkerConfig};

/// Ingest a batch of documents: extract text, chunk it under the fixed
/// defaults, and store one attachment per document. A failing file is
/// skipped and the rest proceed; a document with no extractable content
/// produces no attachment.
pub fn ingest_documents(
    repo: &AttachmentRepo,
    extractor: &dyn TextExtractor,
    counter: &dyn TokenCounter,
    model: &str,
    files: Vec<DocumentSource>,
) -> Vec<AttachmentMeta> {
    let config = ChunkerConfig::default();
    let mut metas = Vec::new();

    for file in files {
        let text = match extractor.extract(&file) {
            Ok(text) => text,
            Err(error) => {
                warn!(file = %file.name, error = %error, "extraction failed, skipping file");
                continue;
            }
        };

        let chunks = chunk(&text, &config, counter, model);
        if chunks.is_empty() {
            warn!(file = %file.name, "no content after chunking, skipping file");
            continue;
        }

        let rows: Vec<NewChunk> = chunks
            .into_iter()
            .map(|c| NewChunk {
                text: c.text,
                token_count: c.token_count,
                embedding: None,
            })
            .collect();

        match repo.add(&file.name, &rows) {
            Ok(meta) => {
                info!(file = %meta.name, chunks = rows.len(), tokens = meta.total_tokens, "attachment stored");
                metas.push(meta);
            }
            Err(error) => {
                warn!(file = %file.name, error = %error, "failed to store attachment");
            }
        }
    }
    metas
}
