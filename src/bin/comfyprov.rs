use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use secrecy::SecretString;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use comfy_provision::config::Settings;
use comfy_provision::fetcher::{AcceleratorFetcher, Fetcher, Provider};
use comfy_provision::logtail::{render_snapshot, LogBuffer, LogTailer};
use comfy_provision::manifest;
use comfy_provision::{inspect, orchestrator, outputs};

#[derive(Parser)]
#[command(name = "comfyprov", version, about = "Provision models and tail logs for a ComfyUI workspace")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download every asset in the configured manifest
    Download {
        /// Re-download assets that already exist
        #[arg(long)]
        force: bool,
    },
    /// Fetch a single asset from a hosting provider
    Fetch {
        #[arg(value_enum)]
        provider: ProviderKind,
        #[arg(long)]
        url: String,
        /// Target category under models/ (`loras` or `models/loras`)
        #[arg(long, default_value = "loras")]
        category: String,
        /// Civitai API token
        #[arg(long, env = "CIVITAI_TOKEN", hide_env_values = true)]
        token: Option<String>,
        /// Output filename (Google Drive only)
        #[arg(long)]
        filename: Option<String>,
    },
    /// List custom nodes cloned by the provisioning script
    Nodes,
    /// List models configured in the manifest
    Models,
    /// Exit non-zero if any asset in a manifest is missing on disk
    CheckMissing {
        #[arg(long)]
        config: PathBuf,
    },
    /// Zip everything the host app wrote to its output directory
    Outputs {
        /// Archive path (default: comfyui_outputs_<timestamp>.zip)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the tail of the host app's log
    Logs {
        /// Keep streaming new lines until interrupted
        #[arg(long)]
        follow: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ProviderKind {
    #[value(name = "huggingface")]
    HuggingFace,
    #[value(name = "civitai")]
    Civitai,
    #[value(name = "gdrive")]
    GoogleDrive,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut settings = Settings::from_env();

    let tee = matches!(cli.command, Command::Download { .. }).then(|| settings.log_file.clone());
    let _guard = init_tracing(tee.as_deref());

    match cli.command {
        Command::Download { force } => {
            settings.force_download |= force;
            cmd_download(&settings).await?
        }
        Command::Fetch {
            provider,
            url,
            category,
            token,
            filename,
        } => {
            let provider = match provider {
                ProviderKind::HuggingFace => Provider::HuggingFace,
                ProviderKind::Civitai => Provider::Civitai {
                    token: token.map(SecretString::from),
                },
                ProviderKind::GoogleDrive => Provider::GoogleDrive { filename },
            };
            cmd_fetch(&settings, &url, &category, &provider).await?
        }
        Command::Nodes => print_json(&inspect::installed_custom_nodes(&settings))?,
        Command::Models => print_json(&inspect::installed_models(&settings))?,
        Command::CheckMissing { config } => cmd_check_missing(&settings, &config).await?,
        Command::Outputs { out } => cmd_outputs(&settings, out)?,
        Command::Logs { follow } => cmd_logs(&settings, follow).await?,
    }

    Ok(())
}

/// Console output goes to stderr so JSON on stdout stays parseable. With
/// `tee`, events are also appended to that file.
fn init_tracing(tee: Option<&Path>) -> Option<WorkerGuard> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let appender = tee.and_then(|path| match file_appender(path) {
        Ok(appender) => Some(appender),
        Err(e) => {
            eprintln!("warning: not writing logs to {}: {}", path.display(), e);
            None
        }
    });

    match appender {
        Some(appender) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter())
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

fn file_appender(path: &Path) -> Result<RollingFileAppender, Box<dyn std::error::Error>> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let name = path
        .file_name()
        .ok_or_else(|| format!("{} has no file name", path.display()))?;
    std::fs::create_dir_all(dir)?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name.to_string_lossy())
        .build(dir)?;
    Ok(appender)
}

async fn cmd_download(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
    let fetcher = Arc::new(AcceleratorFetcher::new(settings.accelerator_bin.clone()));
    match orchestrator::run_from_settings(settings, fetcher).await {
        Some(report) => {
            for outcome in report.outcomes.iter().filter(|o| !o.success) {
                warn!("{}: {}", outcome.url, outcome.message);
            }
        }
        None => info!("Nothing downloaded"),
    }
    Ok(())
}

async fn cmd_fetch(
    settings: &Settings,
    url: &str,
    category: &str,
    provider: &Provider,
) -> Result<(), Box<dyn std::error::Error>> {
    let fetcher = AcceleratorFetcher::new(settings.accelerator_bin.clone());
    let destination = settings.category_dir(category);
    info!("Fetching from {} into {}", provider.name(), destination.display());

    let outcome = fetcher.fetch(url, &destination, provider).await;
    print_json(&outcome)?;
    if let Err(e) = outcome.check() {
        error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_check_missing(
    settings: &Settings,
    config: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let missing = match manifest::check_missing(config, &settings.models_dir()) {
        Ok(missing) => missing,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    if missing.is_empty() {
        info!("All models are present");
        return Ok(());
    }
    for url in &missing {
        println!("{url}");
    }
    std::process::exit(1);
}

fn cmd_outputs(settings: &Settings, out: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let dest = out.unwrap_or_else(|| {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        PathBuf::from(format!("comfyui_outputs_{stamp}.zip"))
    });
    outputs::write_outputs_zip(&settings.output_dir(), &dest)?;
    println!("{}", dest.display());
    Ok(())
}

async fn cmd_logs(settings: &Settings, follow: bool) -> Result<(), Box<dyn std::error::Error>> {
    let buffer = Arc::new(LogBuffer::default());
    let tailer = LogTailer::new(&settings.log_file, buffer.clone());

    if !follow {
        if let Err(e) = tailer.seed().await {
            warn!("{}", e);
        }
        println!("{}", render_snapshot(&buffer.snapshot()));
        return Ok(());
    }

    let tailer = tailer.with_subscriber(Arc::new(|html: &str| println!("{html}")));
    let handle = tailer.start().await?;
    println!("{}", render_snapshot(&buffer.snapshot()));

    tokio::signal::ctrl_c().await?;
    handle.stop().await;
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
