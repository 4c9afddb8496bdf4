use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::sync::Arc;
use tracing::{info, warn};

use visio::activity::{Timestamp, UserId};
use visio::config::{Config, StoreBackend};
use visio::store::{DocumentStore, MemoryStore};

/// Visio: live activity for your social graph.
///
/// Watches unread messages, new followers, and new posts from the people
/// you follow, and folds them into a single unread summary.
#[derive(Parser)]
#[command(name = "visio", version, about)]
struct Cli {
    /// Act as this user (overrides VISIO_USER_ID)
    #[arg(long, global = true)]
    user: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Follow another user
    Follow {
        /// The user to follow
        target: String,
    },

    /// Stop following a user
    Unfollow {
        /// The user to unfollow
        target: String,
    },

    /// Send a direct message
    Message {
        /// Recipient
        to: String,
        /// Message text
        text: String,
    },

    /// Mark your conversation with someone as read
    MarkRead {
        /// The other participant
        with: String,
    },

    /// Publish a post to your followers
    Post {
        /// Post content
        content: String,
    },

    /// Show a user's profile and counters (default: you)
    Profile {
        /// Whose profile to show
        target: Option<String>,
    },

    /// Show your current activity summary
    Summary {
        /// Print the summary as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Run a JSON script of actions and print each resulting summary
    Replay {
        /// Path to the script file
        script: String,

        /// Milliseconds without a publish before a step counts as done
        #[arg(long, default_value = "100")]
        quiet_ms: u64,
    },

    /// Show database and user status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    // Set up structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("visio=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    let explicit_user = cli.user.as_deref();

    match cli.command {
        Commands::Init => {
            info!("Initializing Visio database...");
            let table_count = init_database(&config).await?;
            println!("Database initialized at: {}", config.db_path);
            println!("Tables created: {table_count}");
            println!("\nVisio is ready. Set VISIO_USER_ID in your .env file,");
            println!("then run: cargo run -- summary");
        }

        Commands::Follow { target } => {
            let me = config.require_user(explicit_user)?;
            let store = open_store(&config)?;
            let target = UserId::parse(target)?;
            if visio::social::follow(store.as_ref(), &me, &target, Timestamp::now()).await? {
                println!("{} {} now follows {}", "✓".green(), me, target);
            } else {
                println!("{} already follows {}", me, target);
            }
        }

        Commands::Unfollow { target } => {
            let me = config.require_user(explicit_user)?;
            let store = open_store(&config)?;
            let target = UserId::parse(target)?;
            if visio::social::unfollow(store.as_ref(), &me, &target).await? {
                println!("{} {} unfollowed {}", "✓".green(), me, target);
            } else {
                println!("{} was not following {}", me, target);
            }
        }

        Commands::Message { to, text } => {
            let me = config.require_user(explicit_user)?;
            let store = open_store(&config)?;
            let conversation = visio::social::send_message(
                store.as_ref(),
                &me,
                &UserId::parse(to)?,
                &text,
                Timestamp::now(),
            )
            .await?;
            println!("{} Sent in conversation {}", "✓".green(), conversation);
        }

        Commands::MarkRead { with } => {
            let me = config.require_user(explicit_user)?;
            let store = open_store(&config)?;
            let conversation = visio::layout::conversation_id(&me, &UserId::parse(with)?);
            if visio::social::mark_read(store.as_ref(), &conversation, &me, Timestamp::now())
                .await?
            {
                println!("{} Conversation {} marked read", "✓".green(), conversation);
            } else {
                println!("Conversation {} was already read", conversation);
            }
        }

        Commands::Post { content } => {
            let me = config.require_user(explicit_user)?;
            let store = open_store(&config)?;
            let id =
                visio::social::publish_post(store.as_ref(), &me, &content, Timestamp::now()).await?;
            println!("{} Published post {}", "✓".green(), id);
        }

        Commands::Profile { target } => {
            let user = match target {
                Some(target) => UserId::parse(target)?,
                None => config.require_user(explicit_user)?,
            };
            let store = open_store(&config)?;
            let profile = visio::social::profile(store.as_ref(), &user).await?;
            visio::output::terminal::display_profile(&profile);
        }

        Commands::Summary { json } => {
            let me = config.require_user(explicit_user)?;
            let store = open_store(&config)?;
            let session =
                visio::session::Session::begin(store, me, config.aggregator_config()).await?;
            let summary = session.activity().settled().await;
            if summary.health.is_degraded() {
                warn!(user = %session.user_id(), "Some activity sources are degraded");
            }
            if json {
                println!("{}", serde_json::to_string_pretty(summary.as_ref())?);
            } else {
                visio::output::terminal::display_summary(&summary);
            }
            session.end().await;
        }

        Commands::Replay { script, quiet_ms } => {
            let raw = std::fs::read_to_string(&script)
                .with_context(|| format!("failed to read replay script {script}"))?;
            let script = visio::replay::ReplayScript::from_json(&raw)?;
            let store = open_store(&config)?;

            println!("Replaying {} steps for {}...", script.steps.len(), script.user);
            let replayer = visio::replay::Replayer::new(store, config.aggregator_config())
                .with_quiet_period(std::time::Duration::from_millis(quiet_ms));
            let frames = replayer
                .run(&script, |frame| {
                    println!("{}", format!("--- [{}] {} ---", frame.step, frame.label).dimmed());
                    visio::output::terminal::display_summary(&frame.summary);
                })
                .await?;
            println!("\n{}", "Replay complete.".bold());
            println!("  Summaries recorded: {}", frames.len());
        }

        Commands::Status => {
            let user = config.require_user(explicit_user).ok();
            match config.backend {
                StoreBackend::Memory => {
                    let store = MemoryStore::default();
                    visio::status::show(&store, &config.db_path, None, user.as_ref()).await?;
                }
                StoreBackend::Sqlite => {
                    if !visio::status::is_initialized(&config.db_path) {
                        println!("Database: not initialized");
                        println!("\nRun `visio init` to set up the database.");
                        return Ok(());
                    }
                    show_sqlite_status(&config, user.as_ref()).await?;
                }
            }
        }
    }

    Ok(())
}

/// Open the configured document store.
fn open_store(config: &Config) -> Result<Arc<dyn DocumentStore>> {
    match config.backend {
        StoreBackend::Memory => {
            warn!("Using the in-memory backend; nothing will persist after this command");
            Ok(Arc::new(MemoryStore::default()))
        }
        StoreBackend::Sqlite => open_sqlite(config),
    }
}

#[cfg(feature = "sqlite")]
fn open_sqlite(config: &Config) -> Result<Arc<dyn DocumentStore>> {
    let store = visio::store::SqliteStore::open(&config.db_path)
        .with_context(|| format!("failed to open database at {}", config.db_path))?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "sqlite"))]
fn open_sqlite(_config: &Config) -> Result<Arc<dyn DocumentStore>> {
    anyhow::bail!(
        "VISIO_BACKEND is sqlite but the 'sqlite' feature is not compiled in.\n\
         Rebuild with: cargo build --features sqlite, or set VISIO_BACKEND=memory"
    );
}

/// Initialize the database (create if needed). Returns the schema table count.
async fn init_database(config: &Config) -> Result<i64> {
    match config.backend {
        StoreBackend::Memory => {
            anyhow::bail!("VISIO_BACKEND is memory; there is no database to initialize")
        }
        StoreBackend::Sqlite => init_sqlite(config).await,
    }
}

#[cfg(feature = "sqlite")]
async fn init_sqlite(config: &Config) -> Result<i64> {
    let store = visio::store::SqliteStore::initialize(&config.db_path)
        .with_context(|| format!("failed to initialize database at {}", config.db_path))?;
    Ok(store.table_count().await?)
}

#[cfg(not(feature = "sqlite"))]
async fn init_sqlite(_config: &Config) -> Result<i64> {
    anyhow::bail!("the 'sqlite' feature is not compiled in");
}

#[cfg(feature = "sqlite")]
async fn show_sqlite_status(config: &Config, user: Option<&UserId>) -> Result<()> {
    let store = visio::store::SqliteStore::open(&config.db_path)?;
    let tables = store.table_count().await?;
    visio::status::show(&store, &config.db_path, Some(tables), user).await
}

#[cfg(not(feature = "sqlite"))]
async fn show_sqlite_status(_config: &Config, _user: Option<&UserId>) -> Result<()> {
    anyhow::bail!("the 'sqlite' feature is not compiled in");
}
