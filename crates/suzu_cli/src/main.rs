use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use suzu_core::{DecisionMonitor, DecisionOracle, InboundMessage, SessionId, SuzuConfig};
use suzu_memory::{ConsolidationEngine, MemoryStore, Repository, SocialEnergyModel, SqliteRepository};
use suzu_reasoning::{DecisionCycle, HttpOracle, MockOracle, OracleReplier};
use suzu_session::SessionScheduler;

mod console;

use console::ConsoleTransport;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config file
    #[arg(short, long, default_value = "suzu.toml")]
    config: String,

    /// Path to the memory database
    #[arg(short, long, default_value = "suzu.db")]
    db: String,

    /// Use the canned offline oracle instead of the configured endpoint
    #[arg(long)]
    mock: bool,

    /// Session id for this console conversation
    #[arg(long, default_value = "console")]
    session: String,

    /// Treat the console conversation as a group chat
    #[arg(long)]
    group: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let config = SuzuConfig::load_or_default(&args.config);

    info!("Opening memory database at {}...", args.db);
    let sqlite = Arc::new(SqliteRepository::new(&args.db).await?);
    let monitor: Arc<dyn DecisionMonitor> = Arc::new(sqlite.monitor());
    let repo: Arc<dyn Repository> = sqlite;

    let store = Arc::new(MemoryStore::new(
        repo.clone(),
        config.memory.clone(),
        config.persona.clone(),
    ));
    let social_states = store.load().await?;
    info!(
        "Loaded persisted state ({} sessions with social state)",
        social_states.len()
    );
    let social = Arc::new(SocialEnergyModel::with_states(
        config.social.clone(),
        repo,
        social_states,
    ));

    let oracle: Arc<dyn DecisionOracle> = if args.mock {
        info!("Using the mock oracle");
        Arc::new(MockOracle)
    } else {
        info!(
            "Using oracle endpoint {} (model {})",
            config.oracle.base_url, config.oracle.model
        );
        Arc::new(HttpOracle::new(config.oracle.clone(), monitor.clone())?)
    };

    let cycle = Arc::new(DecisionCycle::new(
        store.clone(),
        social.clone(),
        oracle.clone(),
        monitor,
        config.clone(),
    ));
    let consolidation = Arc::new(ConsolidationEngine::new(store.clone(), oracle.clone()));
    let replier = Arc::new(OracleReplier::new(
        store.clone(),
        social.clone(),
        oracle,
        config.clone(),
    ));
    let transport = Arc::new(ConsoleTransport::default());

    let scheduler = Arc::new(SessionScheduler::new(
        config,
        store.clone(),
        social,
        cycle,
        consolidation.clone(),
        transport,
        replier,
    ));

    let session = SessionId::new(args.session);
    println!("Suzu online. Type 'quit' to exit, '/persona <name>' to switch.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut message_seq = 0u64;
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed == "quit" || trimmed == "exit" {
            break;
        }
        if let Some(name) = trimmed.strip_prefix("/persona ") {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            // Flush the outgoing persona's backlog before the switch so its
            // episodic memory is settled when it next comes back.
            let old = store.active_persona(&session).await;
            consolidation.force_consolidate(&old, args.group).await;
            let new_id = store.switch_persona(&session, name).await;
            println!("(now speaking as {})", new_id.persona);
            continue;
        }

        message_seq += 1;
        let msg = InboundMessage {
            message_id: format!("console-in-{message_seq}"),
            sender_id: "console-user".to_string(),
            sender_name: "you".to_string(),
            text: trimmed.to_string(),
            mentions_agent: !args.group || trimmed.starts_with('@'),
            timestamp: Utc::now(),
        };
        scheduler.on_message(&session, args.group, msg).await;
    }

    info!("Shutting down");
    scheduler.shutdown().await;
    let id = store.active_persona(&session).await;
    consolidation.force_consolidate(&id, args.group).await;
    Ok(())
}
