use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use troupe_channels::telegram::{TelegramBot, TelegramDispatcher};
use troupe_channels::ChannelBot;
use troupe_core::{
    load_config, turn_message, ConcurrencyGate, Dispatcher, Orchestrator, PipelineOutcome,
    TroupeConfig,
};
use troupe_memory::{HistoryStore, IntentLog, SqliteStore};
use troupe_provider::{register_from_configs, LlmProvider, ProviderRegistry};
use troupe_schema::{InboundEvent, OutboundMessage, Turn};

#[derive(Parser)]
#[command(name = "troupe", version, about = "troupe group-chat actor relay")]
struct Cli {
    #[arg(
        long,
        default_value = "~/.troupe",
        help = "Config root directory (contains config/, data/ and logs/)"
    )]
    config_root: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Start all configured channel bots")]
    Start,
    #[command(about = "Validate config files")]
    Validate,
    #[command(about = "Local REPL against the full pipeline (no Telegram needed)")]
    Repl {
        #[arg(long, default_value = "repl:local", help = "Conversation id to use")]
        conversation: String,
        #[arg(long, help = "Handle to speak as (defaults to the first participant)")]
        handle: Option<String>,
    },
    #[command(about = "Print a conversation as the provider sees it")]
    History { conversation_id: String },
    #[command(about = "List known conversations")]
    Conversations,
    #[command(about = "List completion audit records, newest first")]
    Intents {
        #[arg(long, help = "Only this conversation")]
        conversation: Option<String>,
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    #[command(about = "Clear a conversation's history")]
    Reset { conversation_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    // Expand ~ to home directory
    if cli.config_root.starts_with("~") {
        if let Some(home) = std::env::var_os("HOME") {
            cli.config_root = PathBuf::from(home).join(
                cli.config_root
                    .strip_prefix("~")
                    .unwrap_or(&cli.config_root),
            );
        }
    }

    let log_dir = cli.config_root.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "troupe.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(non_blocking),
        )
        .init();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    match command {
        Commands::Validate => {
            let config = load_config(&cli.config_root.join("config"))?;
            println!(
                "Config valid. {} actors, {} participants, {} providers.",
                config.actors.len(),
                config.main.participants.len(),
                config.providers.len()
            );
        }
        Commands::Start => {
            start_bots(&cli.config_root).await?;
        }
        Commands::Repl {
            conversation,
            handle,
        } => {
            run_repl(&cli.config_root, &conversation, handle).await?;
        }
        Commands::History { conversation_id } => {
            let (_config, store) = open_store(&cli.config_root)?;
            let turns = store.fetch(&conversation_id).await?;
            if turns.is_empty() {
                println!("No turns for '{conversation_id}'.");
            }
            for (seq, turn) in turns.iter().enumerate() {
                println!("{}", format_turn(seq, turn));
            }
        }
        Commands::Conversations => {
            let (_config, store) = open_store(&cli.config_root)?;
            for id in store.list_conversations().await? {
                let count = store.turn_count(&id).await?;
                println!("{id}\t{count} turns");
            }
        }
        Commands::Intents {
            conversation,
            limit,
        } => {
            let (_config, store) = open_store(&cli.config_root)?;
            let intents = store.list_intents(conversation.as_deref(), limit).await?;
            if intents.is_empty() {
                println!("No completion intents recorded.");
            }
            for intent in intents {
                println!(
                    "{}  {}  {:<6}  {}  fp={}  tokens={}/{}{}",
                    intent.created_at.format("%Y-%m-%d %H:%M:%S"),
                    intent.id,
                    intent.state.as_str(),
                    intent.conversation_id,
                    intent.credential_fingerprint,
                    intent
                        .prompt_tokens
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "-".into()),
                    intent
                        .completion_tokens
                        .map(|t| t.to_string())
                        .unwrap_or_else(|| "-".into()),
                    intent
                        .error
                        .as_ref()
                        .map(|e| format!("  error={e}"))
                        .unwrap_or_default(),
                );
            }
        }
        Commands::Reset { conversation_id } => {
            let (_config, store) = open_store(&cli.config_root)?;
            store.reset(&conversation_id).await?;
            println!("Conversation '{conversation_id}' reset.");
        }
    }

    Ok(())
}

fn format_turn(seq: usize, turn: &Turn) -> String {
    let message = turn_message(turn);
    format!("{seq:>4} [{}] {}", turn.role(), message.content)
}

fn database_path(root: &Path, database: &str) -> PathBuf {
    let path = PathBuf::from(database);
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}

fn open_store(root: &Path) -> Result<(TroupeConfig, Arc<SqliteStore>)> {
    let config = load_config(&root.join("config"))?;
    let db_path = database_path(root, &config.main.runtime.database);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Arc::new(SqliteStore::open(&db_path)?);
    tracing::debug!(path = %db_path.display(), "opened store");
    Ok((config, store))
}

fn bootstrap(root: &Path) -> Result<(TroupeConfig, Arc<SqliteStore>, Arc<dyn LlmProvider>)> {
    let (config, store) = open_store(root)?;

    let mut registry = ProviderRegistry::new();
    register_from_configs(&mut registry, &config.providers)?;
    let provider = registry.get(&config.main.model.provider_id)?;

    Ok((config, store, provider))
}

async fn start_bots(root: &Path) -> Result<()> {
    let (config, store, provider) = bootstrap(root)?;

    let telegram = config
        .main
        .channels
        .telegram
        .as_ref()
        .filter(|t| t.enabled)
        .ok_or_else(|| anyhow!("no enabled channels in main.yaml"))?;
    if telegram.connectors.is_empty() {
        return Err(anyhow!("telegram is enabled but has no connectors"));
    }

    // One gate for every connector: single flight is process-wide.
    let gate = ConcurrencyGate::new();
    let mut bots: Vec<Box<dyn ChannelBot>> = Vec::new();
    for connector in &telegram.connectors {
        let bot = teloxide::Bot::new(&connector.token);
        let orchestrator = Orchestrator::new(
            &config,
            provider.clone(),
            store.clone(),
            store.clone(),
            Arc::new(TelegramDispatcher::new(bot.clone())),
        )
        .with_gate(gate.clone());
        bots.push(Box::new(TelegramBot::new(
            bot,
            connector.connector_id.clone(),
            Arc::new(orchestrator),
        )));
    }

    let mut handles = Vec::new();
    for bot in bots {
        let channel = format!("{}:{}", bot.channel_type(), bot.connector_id());
        tracing::info!(%channel, "starting channel bot");
        handles.push(tokio::spawn(async move {
            if let Err(err) = bot.run().await {
                tracing::error!(%channel, "channel bot exited: {err:#}");
            }
        }));
    }
    for handle in handles {
        handle.await?;
    }
    Ok(())
}

struct StdoutDispatcher;

#[async_trait]
impl Dispatcher for StdoutDispatcher {
    async fn send(&self, message: OutboundMessage) -> Result<()> {
        println!("{}", message.text);
        Ok(())
    }
}

async fn run_repl(root: &Path, conversation_id: &str, handle: Option<String>) -> Result<()> {
    let (config, store, provider) = bootstrap(root)?;
    let handle = handle
        .or_else(|| config.main.participants.first().map(|p| p.handle.clone()))
        .unwrap_or_else(|| "Player".to_string());
    let orchestrator = Orchestrator::new(
        &config,
        provider,
        store.clone(),
        store,
        Arc::new(StdoutDispatcher),
    );

    println!("troupe REPL as {handle} in {conversation_id}. Type 'quit' to exit.");
    println!("---");

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let mut input = String::new();
        if stdin.read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input == "quit" || input == "exit" {
            break;
        }
        if input.is_empty() {
            continue;
        }

        let inbound = InboundEvent::text("repl", "repl", conversation_id, &handle, input);
        match orchestrator.handle_inbound(inbound).await {
            Ok(PipelineOutcome::Replied { turns }) if turns.is_empty() => {
                println!("(no actor answered)");
            }
            Ok(PipelineOutcome::Rejected(err)) => eprintln!("Rejected: {err}"),
            Ok(_) => {}
            Err(err) => eprintln!("Error: {err}"),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_history_subcommand() {
        let cli = Cli::try_parse_from(["troupe", "history", "chat:1"]).unwrap();
        assert!(matches!(
            cli.command.unwrap(),
            Commands::History { conversation_id } if conversation_id == "chat:1"
        ));
    }

    #[test]
    fn parses_intents_with_filters() {
        let cli = Cli::try_parse_from([
            "troupe",
            "intents",
            "--conversation",
            "chat:9",
            "--limit",
            "5",
        ])
        .unwrap();
        match cli.command.unwrap() {
            Commands::Intents {
                conversation,
                limit,
            } => {
                assert_eq!(conversation.as_deref(), Some("chat:9"));
                assert_eq!(limit, 5);
            }
            _ => panic!("expected intents"),
        }
    }

    #[test]
    fn repl_defaults() {
        let cli = Cli::try_parse_from(["troupe", "repl"]).unwrap();
        match cli.command.unwrap() {
            Commands::Repl {
                conversation,
                handle,
            } => {
                assert_eq!(conversation, "repl:local");
                assert!(handle.is_none());
            }
            _ => panic!("expected repl"),
        }
        assert_eq!(cli.config_root, PathBuf::from("~/.troupe"));
    }

    #[test]
    fn database_path_is_relative_to_root() {
        let root = Path::new("/srv/troupe");
        assert_eq!(
            database_path(root, "data/troupe.db"),
            PathBuf::from("/srv/troupe/data/troupe.db")
        );
        assert_eq!(
            database_path(root, "/var/lib/troupe.db"),
            PathBuf::from("/var/lib/troupe.db")
        );
    }

    #[test]
    fn format_turn_shows_role_and_payload() {
        let line = format_turn(0, &Turn::user("Igor", "hi"));
        assert_eq!(line, r#"   0 [user] {"Igor":"hi"}"#);
    }

    #[test]
    fn open_store_uses_configured_database() {
        let root = tempfile::TempDir::new().unwrap();
        let config_dir = root.path().join("config");
        std::fs::create_dir_all(config_dir.join("providers.d")).unwrap();
        std::fs::create_dir_all(config_dir.join("actors.d")).unwrap();
        std::fs::write(
            config_dir.join("main.yaml"),
            "app:\n  name: t\nruntime:\n  database: db/test.db\nmodel:\n  provider_id: local\n",
        )
        .unwrap();
        std::fs::write(
            config_dir.join("providers.d/local.yaml"),
            "id: local\ntype: ollama\n",
        )
        .unwrap();
        std::fs::write(
            config_dir.join("actors.d/josh.yaml"),
            "handle: Josh\ndescription: a cowboy\n",
        )
        .unwrap();

        let (config, _store) = open_store(root.path()).unwrap();
        assert_eq!(config.actors.len(), 1);
        assert!(root.path().join("db/test.db").exists());
    }
}
