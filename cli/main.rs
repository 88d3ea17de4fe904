use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use s3backup::{
    client::Client,
    config::Config,
    hash::Sha256Hasher,
    key_manager::KeyManager,
    store::OpendalStore,
    TransferRecord,
};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// s3backup - verified, optionally encrypted, S3 file transfers
#[derive(Parser)]
#[command(name = "s3backup")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "S3BACKUP_CONFIG",
        default_value = "s3backup.json"
    )]
    config: String,

    /// S3 region (overrides config)
    #[arg(long, global = true)]
    region: Option<String>,

    /// Custom S3 endpoint, e.g. a MinIO URL (overrides config)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Upload a local file, recording its checksum
    Put {
        /// Destination, e.g. s3://bucket/path/to/object
        remote: String,

        /// Local file to upload
        local: PathBuf,

        /// Encrypt with this key file before uploading
        #[arg(short, long)]
        key: Option<PathBuf>,
    },

    /// Download and verify a remote file
    Get {
        /// Source, e.g. s3://bucket/path/to/object
        remote: String,

        /// Local destination file
        local: PathBuf,

        /// Decrypt with this key file after verifying
        #[arg(short, long)]
        key: Option<PathBuf>,
    },

    /// Generate a new random encryption key file
    Keygen {
        /// Where to write the key (must not exist)
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Use RUST_LOG environment variable to control log level (e.g., RUST_LOG=info,s3backup=debug)
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    info!(command = ?cli.command, "s3backup starting");

    match cli.command {
        Commands::Put { ref remote, ref local, ref key } => {
            let client = build_client(&cli, key.as_deref()).await?;
            cmd_put(&client, remote, local).await
        }
        Commands::Get { ref remote, ref local, ref key } => {
            let client = build_client(&cli, key.as_deref()).await?;
            cmd_get(&client, remote, local).await
        }
        Commands::Keygen { ref path } => cmd_keygen(path).await,
    }
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Resolve configuration and pick the plain or encrypted pipeline
async fn build_client(cli: &Cli, key_flag: Option<&Path>) -> Result<Client> {
    let mut cfg = Config::load_with_env(Some(&cli.config))?;
    if let Some(region) = &cli.region {
        cfg.region = region.clone();
    }
    if let Some(endpoint) = &cli.endpoint {
        cfg.endpoint = Some(endpoint.clone());
    }
    cfg.validate()?;

    let store = OpendalStore::s3(cfg.s3_config());

    let key_path = key_flag
        .map(Path::to_path_buf)
        .or_else(|| cfg.key_path.as_ref().map(PathBuf::from));

    let client = match key_path {
        Some(path) => {
            let km = KeyManager::load(&path).await?;
            info!(key = %path.display(), "encrypted transfer");
            Client::encrypted(Sha256Hasher, store, km.stream_cipher())
        }
        None => {
            info!("plain transfer");
            Client::plain(Sha256Hasher, store)
        }
    };
    Ok(client)
}

fn print_record(record: &TransferRecord) {
    println!("  local:    {}", record.local.display());
    println!("  remote:   {}", record.remote);
    println!("  checksum: {}", record.checksum);
}

async fn cmd_put(client: &Client, remote: &str, local: &Path) -> Result<()> {
    let mode = if client.is_encrypted() { " (encrypted)" } else { "" };
    let spinner = create_spinner(&format!("Uploading {}{}...", local.display(), mode));

    let result = client.put_local_file(remote, local).await;
    spinner.finish_and_clear();
    let record = result.with_context(|| format!("uploading {} to {}", local.display(), remote))?;

    println!("Uploaded{}", mode);
    print_record(&record);
    Ok(())
}

async fn cmd_get(client: &Client, remote: &str, local: &Path) -> Result<()> {
    let mode = if client.is_encrypted() { " (decrypted)" } else { "" };
    let spinner = create_spinner(&format!("Downloading {}...", remote));

    let result = client.get_remote_file(remote, local).await;
    spinner.finish_and_clear();
    let record = result.with_context(|| format!("downloading {} to {}", remote, local.display()))?;

    println!("Downloaded and verified{}", mode);
    print_record(&record);
    Ok(())
}

async fn cmd_keygen(path: &Path) -> Result<()> {
    KeyManager::generate(path).await?;

    println!("Key written to {}", path.display());
    println!();
    println!("IMPORTANT: Keep your key file secure and backed up!");
    println!("Without it, encrypted uploads cannot be recovered.");
    Ok(())
}
