use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use forkchat::cli::{conversation, list, navigate, send, settings, show};
use forkchat::config::{Config, FontSize, Theme, TreeViewMode};
use forkchat::locale::Locale;
use forkchat::store::SqliteStore;

#[derive(Parser)]
#[command(name = "forkchat")]
#[command(about = "Branching AI chat: fork any message, keep every branch")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "forkchat.yaml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new conversation
    New {
        /// Title (defaults to a placeholder replaced by the first message)
        #[arg(short, long)]
        title: Option<String>,
    },

    /// List conversations, most recently updated first
    List,

    /// Delete a conversation and all of its messages
    Delete {
        /// Conversation ID (prefix accepted)
        conversation: String,
    },

    /// Show the active path of a conversation
    Show {
        /// Conversation ID (defaults to the active conversation)
        conversation: Option<String>,

        /// Draw every branch instead of the active path
        #[arg(long)]
        tree: bool,
    },

    /// Send a message and stream the reply
    Send {
        /// Conversation ID (prefix accepted)
        conversation: String,

        /// Message text
        text: String,

        /// Fork from this message instead of the end of the active path
        #[arg(long)]
        from: Option<String>,

        /// Quote this message in the prompt
        #[arg(long)]
        quote: Option<String>,

        /// Quote only this excerpt
        #[arg(long)]
        excerpt: Option<String>,
    },

    /// Display the branch through a message, down to its newest leaf
    Select {
        conversation: String,
        message: String,
    },

    /// Continue the next send from a message
    Branch {
        conversation: String,
        message: String,
    },

    /// Show or change user settings
    Settings {
        #[arg(long)]
        locale: Option<Locale>,

        #[arg(long, value_enum)]
        theme: Option<Theme>,

        #[arg(long, value_enum)]
        font_size: Option<FontSize>,

        #[arg(long, value_enum)]
        tree_view_mode: Option<TreeViewMode>,

        #[arg(long)]
        debug_mode: Option<bool>,
    },
}

fn init_logging(config: &Config) {
    let default_level = if config.settings.debug_mode {
        "forkchat=debug"
    } else {
        config.logging.level.as_str()
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(
            fmt::layer()
                .with_target(true)
                .with_line_number(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config
    let (config, load_error) = match Config::load(&cli.config) {
        Ok(config) => (config, None),
        Err(err) => (Config::default(), Some(err)),
    };
    init_logging(&config);
    if let Some(err) = load_error {
        tracing::warn!(error = %err, "config not loaded, using defaults");
    }

    // Store is opened lazily; `settings` never touches the database
    let open_store = || -> Result<Arc<SqliteStore>> {
        Ok(Arc::new(SqliteStore::open(&config.database_path())?))
    };

    match cli.command {
        Commands::New { title } => {
            conversation::create(&*open_store()?, config.settings.locale, title)?;
        }
        Commands::List => {
            list::run(&*open_store()?)?;
        }
        Commands::Delete { conversation } => {
            conversation::delete(&*open_store()?, conversation)?;
        }
        Commands::Show { conversation, tree } => {
            show::run(&*open_store()?, conversation, tree)?;
        }
        Commands::Send {
            conversation,
            text,
            from,
            quote,
            excerpt,
        } => {
            let args = send::SendArgs {
                conversation: Some(conversation),
                text,
                from,
                quote,
                excerpt,
            };
            send::run(open_store()?, &config, args).await?;
        }
        Commands::Select {
            conversation,
            message,
        } => {
            navigate::select(&*open_store()?, conversation, message)?;
        }
        Commands::Branch {
            conversation,
            message,
        } => {
            navigate::branch(&*open_store()?, conversation, message)?;
        }
        Commands::Settings {
            locale,
            theme,
            font_size,
            tree_view_mode,
            debug_mode,
        } => {
            let path = Config::locate(&cli.config)
                .unwrap_or_else(|| PathBuf::from(shellexpand::tilde(&cli.config).to_string()));
            let update = settings::SettingsUpdate {
                locale,
                theme,
                font_size,
                tree_view_mode,
                debug_mode,
            };
            settings::run(config.clone(), &path, update)?;
        }
    }

    Ok(())
}
