use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use s3porter::{RequestOptions, SslOverride, Store};

#[derive(Parser)]
#[command(name = "s3porter")]
#[command(version, about = "Asynchronous S3 object client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Disable SSL certificate verification
    #[arg(long, global = true)]
    insecure: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch an object
    Get {
        /// Object key
        key: String,

        /// Write the body to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Upload a file
    Put {
        /// Object key
        key: String,

        /// Local file to upload
        file: PathBuf,

        /// Content-Type header
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Delete an object
    Delete {
        /// Object key
        key: String,
    },

    /// Show object headers
    Head {
        /// Object key
        key: String,
    },

    /// Check whether an object exists
    Exists {
        /// Object key
        key: String,
    },

    /// Print the object URL
    Url {
        /// Object key
        key: String,
    },

    /// Print a time-limited pre-signed URL
    Presign {
        /// Object key
        key: String,

        /// Lifetime in seconds
        #[arg(long, default_value = "3600")]
        expires_in: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let store = Store::from_env().context("Failed to load store settings from environment")?;

    let insecure = SslOverride {
        verify_peer: if cli.insecure { Some(false) } else { None },
        cert_chain_file: None,
    };
    let options = RequestOptions {
        ssl: insecure,
        ..RequestOptions::default()
    };

    match cli.command {
        Commands::Get { key, output } => {
            let response = store.item(key)?.get_with(options).await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &response.body)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    eprintln!("{} bytes written to {}", response.body.len(), path.display());
                }
                None => {
                    use std::io::Write;
                    std::io::stdout().write_all(&response.body)?;
                }
            }
        }
        Commands::Put {
            key,
            file,
            content_type,
        } => {
            let options = RequestOptions {
                content_type,
                ..options
            };
            let response = store.item(key)?.put_file(file, options).await?;
            eprintln!("uploaded ({})", response.status);
        }
        Commands::Delete { key } => {
            let response = store.item(key)?.delete_with(options).await?;
            eprintln!("deleted ({})", response.status);
        }
        Commands::Head { key } => {
            let response = store.item(key)?.head_with(options).await?;
            for (name, value) in &response.headers {
                println!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
            }
        }
        Commands::Exists { key } => {
            let exists = store.item(key)?.exists().await?;
            println!("{exists}");
            if !exists {
                std::process::exit(1);
            }
        }
        Commands::Url { key } => {
            println!("{}", store.item(key)?.url());
        }
        Commands::Presign { key, expires_in } => {
            let expires_at = Utc::now() + ChronoDuration::seconds(expires_in);
            println!("{}", store.item(key)?.expiring_url(expires_at)?);
        }
    }

    Ok(())
}
