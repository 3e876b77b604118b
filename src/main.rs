//! # Code Explainer CLI (`explainer`)
//!
//! The `explainer` binary starts the HTTP server and exposes the explanation
//! pipeline for local use.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `explainer init` | Create the SQLite database and run schema migrations |
//! | `explainer serve` | Start the HTTP server |
//! | `explainer explain <path>` | Explain a source file and store the result |
//! | `explainer get <id>` | Print a stored explanation |
//! | `explainer languages` | List supported extensions and languages |
//! | `explainer token <user>` | Mint a development access token |
//!
//! ## Examples
//!
//! ```bash
//! explainer init --config ./config/explainer.toml
//! GEMINI_API_KEY=... explainer explain src/lib.rs --user alice
//! JWT_SECRET=... explainer serve --config ./config/explainer.toml
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use code_explainer::auth::TokenKeys;
use code_explainer::explain::build_explainer;
use code_explainer::input::{parse_uploaded_file, supported_languages, UploadedFile};
use code_explainer::{config, migrate, server};

/// Code Explainer: explains source code with a generative-AI provider.
#[derive(Parser)]
#[command(name = "explainer", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/explainer.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Explain a source file and store the result.
    ///
    /// The file goes through the same validation as an HTTP upload.
    Explain {
        /// Path to the source file.
        path: PathBuf,

        /// Owner of the stored explanation.
        #[arg(long, default_value = "local")]
        user: String,

        /// Project to store under; a dated default project is created when omitted.
        #[arg(long)]
        project: Option<String>,
    },

    /// Print a stored explanation as JSON.
    Get {
        /// Explanation id.
        id: String,

        #[arg(long, default_value = "local")]
        user: String,
    },

    /// List supported file extensions and languages.
    Languages,

    /// Mint an access token for a user id (requires the JWT secret).
    Token {
        user: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Languages = cli.command {
        println!("{}", serde_json::to_string_pretty(&supported_languages())?);
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Explain {
            path,
            user,
            project,
        } => {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let submission = parse_uploaded_file(Some(&UploadedFile { file_name, bytes }))?;

            let explainer = build_explainer(&cfg).await?;
            let record = explainer
                .create_explanation(&user, submission, project)
                .await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Get { id, user } => {
            let explainer = build_explainer(&cfg).await?;
            let record = explainer.get_explanation(&user, &id).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Token { user } => {
            let keys = TokenKeys::new(&cfg.auth.secret()?, cfg.auth.access_token_ttl_secs);
            println!("{}", keys.issue(&user)?);
        }
        Commands::Languages => unreachable!("handled before config loading"),
    }

    Ok(())
}
