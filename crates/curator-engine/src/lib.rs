pub mod assemble;
pub mod attachments;
pub mod chunker;
pub mod ingest;
pub mod refresh;
pub mod service;
pub mod summary;

pub use assemble::{assemble, compute_totals, merge_attachment_context};
pub use chunker::{chunk, ChunkerConfig, TextChunk};
pub use ingest::ReplyIngestor;
pub use refresh::SummaryService;
pub use service::CuratorEngine;
pub use summary::{build_summary_source, SummarySource, SUMMARY_SCHEMA_VERSION};
