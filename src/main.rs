use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use secrecy::SecretString;
use tokio::io::{AsyncBufReadExt, BufReader};

use curator_core::tokens::HeuristicCounter;
use curator_engine::CuratorEngine;
use curator_llm::HttpChatProvider;
use curator_store::{legacy, persist, shared, ConversationStore, Database};
use curator_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "curator", about = "Curated-context chat engine")]
struct Args {
    /// Database path (default: ~/.curator/curator.db)
    #[arg(long)]
    db: Option<PathBuf>,

    /// Model identifier
    #[arg(long, default_value = "claude-sonnet-4-5")]
    model: String,

    /// Emit JSON-formatted logs
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_telemetry(TelemetryConfig {
        json_output: args.json_logs,
        ..TelemetryConfig::default()
    });

    let db_path = args
        .db
        .unwrap_or_else(|| dirs_home().join(".curator").join("curator.db"));
    let db = Database::open(&db_path).expect("failed to open database");
    tracing::info!(path = %db_path.display(), "database opened");

    let mut conversations = persist::load_conversations(&db).expect("failed to load conversations");
    if conversations.is_empty() {
        conversations = legacy::import_legacy(&db).expect("failed to import legacy store");
    }
    let store = shared(ConversationStore::from_loaded(conversations));

    let api_key = std::env::var("ANTHROPIC_API_KEY")
        .ok()
        .map(SecretString::from);
    if api_key.is_none() {
        tracing::warn!("ANTHROPIC_API_KEY not set; completion calls will fail soft");
    }
    let provider = Arc::new(HttpChatProvider::new(api_key, args.model));

    let engine = CuratorEngine::new(store, db, provider, Arc::new(HeuristicCounter));
    let _listener = engine.spawn_change_listener();

    tracing::info!("curator ready; type a message, /summary, or /quit");
    repl(&engine).await;

    engine.persist_all();
    tracing::info!("shutting down");
}

async fn repl(engine: &CuratorEngine) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" => break,
            "/summary" => {
                let active_id = engine.store().lock().active_id().clone();
                engine.summaries().generate_summary(&active_id, false).await;
                let store = engine.store().lock();
                let summary = &store.active().summary;
                if summary.text.is_empty() {
                    println!("(no summary yet)");
                } else {
                    println!("{}", summary.text);
                }
                if let Some(error) = &summary.error {
                    println!("(last refresh failed: {error})");
                }
            }
            "/conversations" => {
                let store = engine.store().lock();
                let active = store.active_id().clone();
                for conv in store.conversations() {
                    let marker = if conv.id == active { "*" } else { " " };
                    println!(
                        "{marker} {} | {} ({} units, {} tokens)",
                        conv.id,
                        conv.title,
                        conv.units.len(),
                        conv.totals.total
                    );
                }
            }
            text => {
                let Some(handle) = engine.send_message(text) else {
                    continue;
                };
                if handle.await.is_err() {
                    tracing::warn!("reply task failed");
                    continue;
                }
                let store = engine.store().lock();
                if let Some(unit) = store.active().units.last() {
                    println!("{}", unit.content);
                }
            }
        }
    }
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
