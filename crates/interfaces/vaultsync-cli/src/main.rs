use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vaultsync_cli::commands;

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the vault's file tree as JSON
    Scan {
        path: Utf8PathBuf,
        #[arg(short, long)]
        output: Option<Utf8PathBuf>,
    },
    /// Print the content fingerprint of a note
    Fingerprint { file: Utf8PathBuf },
    /// Show notes added, modified or missing since the last sync
    Status { path: Utf8PathBuf },
    /// Ask the server which notes need uploading or downloading
    Check {
        #[arg(long, env = "VAULTSYNC_SERVER")]
        server: String,
        #[arg(long)]
        vault_id: String,
        #[arg(long)]
        path: Utf8PathBuf,
        #[arg(long, env = "VAULTSYNC_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber).expect("default subscriber");

    match cli.command {
        Commands::Scan { path, output } => {
            commands::cmd_scan(path, output).await?;
        }
        Commands::Fingerprint { file } => {
            commands::cmd_fingerprint(file).await?;
        }
        Commands::Status { path } => {
            commands::cmd_status(path).await?;
        }
        Commands::Check {
            server,
            vault_id,
            path,
            token,
        } => {
            commands::cmd_check(server, vault_id, path, token).await?;
        }
    }

    Ok(())
}
