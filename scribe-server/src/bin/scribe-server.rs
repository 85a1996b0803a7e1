//! Standalone server binary.
//!
//! Loads `.env` and the YAML config, initializes file logging, opens the
//! token store (printing the admin token on first run), and serves until
//! SIGINT/SIGTERM. Exits non-zero on unreadable config or missing TLS
//! material with auto-generation disabled.

use anyhow::{bail, Context, Result};
use clap::Parser;
use scribe_server::{logging, Server, ServerConfig};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const DEFAULT_CONFIG: &str = "config.yaml";

#[derive(Debug, Parser)]
#[command(name = "scribe-server", about = "Remote transcription server")]
struct Args {
    /// Path to the YAML config file.
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Log file path (defaults to `<data_dir>/server_mode.log`).
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn load_config(path: &Path) -> Result<ServerConfig> {
    if path.exists() {
        return ServerConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()));
    }
    // Only the default path may be absent; an explicit --config must exist.
    if path == Path::new(DEFAULT_CONFIG) {
        let mut config = ServerConfig::default();
        config.apply_env();
        Ok(config)
    } else {
        bail!("config file not found: {}", path.display());
    }
}

fn print_admin_token_banner(plaintext: &str) {
    println!("\n{}", "=".repeat(70));
    println!("INITIAL ADMIN TOKEN GENERATED");
    println!("{}", "=".repeat(70));
    println!("\nAdmin Token: {plaintext}");
    println!("\nSave this token! It's required to access the admin panel.");
    println!("This message will only appear once.");
    println!("(Token is stored securely as a hash)");
    println!("{}\n", "=".repeat(70));
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = load_config(&args.config)?;

    let log_path = args
        .log_file
        .clone()
        .unwrap_or_else(|| config.data_dir.join("server_mode.log"));
    logging::init_logging(&log_path)?;

    if config.engine.is_some() {
        // The server core carries no model weights; a transcription backend
        // is registered by the embedding application through the library
        // API. Standalone runs still serve auth, admin, and the UI.
        warn!("no transcription backend compiled in; streaming sessions will stop without a transcript");
    }

    let (server, bootstrap_token) = Server::new(config, None)?;
    if let Some(plaintext) = bootstrap_token {
        print_admin_token_banner(&plaintext);
    }

    info!("starting remote transcription server");
    server.run().await?;
    Ok(())
}
