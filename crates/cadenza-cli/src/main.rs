use anyhow::{Context, Result, bail};
use cadenza_core::{
    ConversationState, Dispatcher, HandlerId, KeywordIntentClassifier, TemplateResponder,
    ToolRegistry,
};
use cadenza_store::MusicStoreDb;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod demo;

use config::CadenzaConfig;

#[derive(Parser)]
#[command(name = "cadenza")]
#[command(version)]
#[command(about = "Cadenza: music store assistants in your terminal")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config directory, default config and database
    Init,

    /// Load demo customers and a small catalog into the database
    Seed,

    /// Chat with the store assistants
    Chat {
        /// Customer to chat as
        #[arg(long)]
        customer: Option<i64>,

        /// Resume a saved conversation by id
        #[arg(long)]
        resume: Option<String>,
    },

    /// List saved conversations
    Sessions {
        /// Only show conversations for this customer
        #[arg(long)]
        customer: Option<i64>,
    },

    /// Show current configuration
    Config,

    /// List the tools each assistant may use
    Tools,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Chat output shares the terminal
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => cmd_init(&cli.config).await,
        Commands::Seed => cmd_seed(&cli.config).await,
        Commands::Chat { customer, resume } => cmd_chat(&cli.config, customer, resume).await,
        Commands::Sessions { customer } => cmd_sessions(&cli.config, customer).await,
        Commands::Config => cmd_config(&cli.config).await,
        Commands::Tools => cmd_tools(&cli.config).await,
    }
}

async fn cmd_init(config_path: &Option<PathBuf>) -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let default_path = config_dir.join("config.toml");
    if default_path.exists() {
        warn!("Config already exists at {}", default_path.display());
    } else {
        let default_config = include_str!("../../../config/default.toml");
        tokio::fs::write(&default_path, default_config).await?;
        info!("Created default config at {}", default_path.display());
    }

    let cfg = CadenzaConfig::load(config_path)?;
    open_db(&cfg)?;

    println!("Cadenza initialized at {}", config_dir.display());
    println!("Database: {}", cfg.database_path().display());
    println!("Run `cadenza seed` to load demo data.");
    Ok(())
}

async fn cmd_seed(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = CadenzaConfig::load(config_path)?;
    let db = open_db(&cfg)?;
    let summary = demo::seed(&db).await?;
    println!(
        "Seeded {} customers, {} albums and {} tracks into {}",
        summary.customers,
        summary.albums,
        summary.tracks,
        cfg.database_path().display()
    );
    Ok(())
}

async fn cmd_chat(
    config_path: &Option<PathBuf>,
    customer: Option<i64>,
    resume: Option<String>,
) -> Result<()> {
    let cfg = CadenzaConfig::load(config_path)?;
    let db = Arc::new(open_db(&cfg)?);
    let dispatcher = build_dispatcher(&cfg, db.clone());

    let mut state = match resume {
        Some(id) => resume_conversation(&db, &id, customer).await?,
        None => {
            let Some(customer_id) = customer.or(cfg.session.default_customer_id) else {
                bail!("No customer given. Pass --customer or set session.default_customer_id");
            };
            match dispatcher.start(customer_id).await {
                Ok(state) => state,
                Err(e) => {
                    error!("Failed to start conversation for customer {}: {}", customer_id, e);
                    println!("{}", e.user_notice());
                    return Ok(());
                }
            }
        }
    };

    println!(
        "Conversation {} with {} (Ctrl+D to leave)",
        state.conversation_id,
        state.profile.full_name()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        std::io::stdout().flush()?;

        let line = tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, leaving conversation");
                println!();
                break;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            println!();
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        let conversation_id = state.conversation_id.clone();
        let outcome = match dispatcher.process_turn(state, input).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Conversation {} aborted: {}", conversation_id, e);
                println!("cadenza> {}", e.user_notice());
                return Ok(());
            }
        };

        for reply in outcome.replies() {
            println!("cadenza> {}", reply);
        }

        let json = serde_json::to_string(&outcome.state)?;
        db.save_conversation(&outcome.state.conversation_id, outcome.state.user_id, &json)
            .await?;

        if outcome.is_terminated() {
            break;
        }
        state = outcome.state;
    }

    Ok(())
}

async fn resume_conversation(
    db: &MusicStoreDb,
    id: &str,
    customer: Option<i64>,
) -> Result<ConversationState> {
    let saved = db
        .load_conversation(id)
        .await?
        .with_context(|| format!("No saved conversation with id {}", id))?;
    if let Some(customer_id) = customer
        && customer_id != saved.customer_id
    {
        bail!(
            "Conversation {} belongs to customer {}, not {}",
            id,
            saved.customer_id,
            customer_id
        );
    }

    let state: ConversationState = serde_json::from_str(&saved.state)
        .with_context(|| format!("Saved conversation {} is unreadable", id))?;
    if state.active_handler().is_none() {
        bail!("Conversation {} has already ended", id);
    }
    info!("Resuming conversation {} at depth {}", id, state.depth());
    Ok(state)
}

async fn cmd_sessions(config_path: &Option<PathBuf>, customer: Option<i64>) -> Result<()> {
    let cfg = CadenzaConfig::load(config_path)?;
    let db = open_db(&cfg)?;
    let saved = db
        .list_conversations(customer, cfg.session.list_limit)
        .await?;

    if saved.is_empty() {
        println!("No saved conversations.");
        return Ok(());
    }

    for conversation in saved {
        let status = match serde_json::from_str::<ConversationState>(&conversation.state) {
            Ok(state) => match state.active_handler() {
                Some(handler) => format!("{:?} at {}", state.phase, handler),
                None => "ended".to_string(),
            },
            Err(e) => {
                warn!("Conversation {} is unreadable: {}", conversation.id, e);
                "unreadable".to_string()
            }
        };
        println!(
            "{}  customer {}  {}  {}",
            conversation.id,
            conversation.customer_id,
            conversation.updated_at.format("%Y-%m-%d %H:%M"),
            status
        );
    }
    Ok(())
}

async fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = CadenzaConfig::load(config_path)?;
    println!("{}", toml::to_string_pretty(&cfg)?);
    Ok(())
}

async fn cmd_tools(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = CadenzaConfig::load(config_path)?;
    let db = Arc::new(MusicStoreDb::open_in_memory()?);
    let dispatcher = build_dispatcher(&cfg, db);

    for handler in HandlerId::ALL {
        println!("{} ({})", handler.display_name(), handler.description());
        for tool in dispatcher.tool_definitions(handler) {
            println!("  {:<28} {}", tool.name, tool.description);
        }
    }
    Ok(())
}

fn open_db(cfg: &CadenzaConfig) -> Result<MusicStoreDb> {
    let path = cfg.database_path();
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    MusicStoreDb::new(&path)
}

fn build_dispatcher(cfg: &CadenzaConfig, db: Arc<MusicStoreDb>) -> Dispatcher {
    let registry = Arc::new(ToolRegistry::with_defaults(db.clone(), db.clone()));
    Dispatcher::new(
        db,
        registry,
        Arc::new(KeywordIntentClassifier::new()),
        Arc::new(TemplateResponder::new()),
        cfg.dispatcher.clone(),
    )
}
