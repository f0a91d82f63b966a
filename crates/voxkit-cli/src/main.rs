//! voxkit: browse, download and manage speech models from the command line

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use voxkit_models::{
    CatalogFilter, DownloadProgress, DownloadState, ModelDescriptor, ModelRegistry, ModelType,
    PiperQuality, RegistryConfig,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding downloaded models
    #[arg(long, env = "VOXKIT_HOME", global = true)]
    models_dir: Option<PathBuf>,

    /// Host serving catalogs and model files
    #[arg(long, env = "VOXKIT_BASE_URL", global = true)]
    base_url: Option<String>,

    /// How long fetched catalogs stay fresh, in seconds
    #[arg(long, env = "VOXKIT_CACHE_TTL_SECS", global = true)]
    cache_ttl_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List models available for download (family: whisper, piper)
    List {
        family: String,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Download a model; Ctrl-C cancels and keeps the partial file
    Download { family: String, id: String },
    /// List downloaded models
    Local,
    /// Delete a downloaded model
    Delete { id: String },
    /// Refetch every catalog
    Refresh,
    /// Drop cached catalogs from memory and disk
    ClearCache,
    /// Show disk space used by downloaded models
    Usage,
}

#[derive(Args)]
struct FilterArgs {
    /// Language prefix, e.g. "en" or "de_DE"
    #[arg(long)]
    language: Option<String>,
    /// Piper voice quality: x_low, low, medium, high
    #[arg(long)]
    quality: Option<String>,
    /// Only English-only (true) or multilingual (false) Whisper models
    #[arg(long)]
    english_only: Option<bool>,
    /// Largest acceptable model size in megabytes
    #[arg(long)]
    max_size_mb: Option<u64>,
}

impl FilterArgs {
    fn to_filter(&self) -> Result<CatalogFilter> {
        let quality = match &self.quality {
            Some(label) => Some(
                PiperQuality::from_label(label)
                    .ok_or_else(|| anyhow!("Unknown voice quality: {}", label))?,
            ),
            None => None,
        };
        Ok(CatalogFilter {
            language: self.language.clone(),
            quality,
            english_only: self.english_only,
            max_size_bytes: self.max_size_mb.map(|mb| mb * 1024 * 1024),
        })
    }
}

impl Cli {
    fn config(&self) -> RegistryConfig {
        let mut config = RegistryConfig::default();
        if let Some(dir) = &self.models_dir {
            config = config.with_models_dir(dir.clone());
        }
        if let Some(url) = &self.base_url {
            config = config.with_base_url(url.clone());
        }
        if let Some(secs) = self.cache_ttl_secs {
            config = config.with_catalog_ttl(Duration::from_secs(secs));
        }
        config
    }
}

fn family(name: &str) -> ModelType {
    ModelType::new(name.to_ascii_uppercase())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config();
    debug!("Using models directory {}", config.models_dir.display());

    let registry = Arc::new(ModelRegistry::with_defaults(&config)?);
    registry
        .initialize(config)
        .await
        .context("Failed to initialize model registry")?;

    match cli.command {
        Commands::List { family: name, filter } => {
            let models = registry.discover(&family(&name), &filter.to_filter()?).await?;
            let local: HashSet<String> = registry
                .list_local()
                .await?
                .into_iter()
                .map(|r| r.model_id)
                .collect();

            for model in models.iter() {
                let marker = if local.contains(&model.id) { "*" } else { " " };
                println!(
                    "{} {:<40} {:>8}  {}",
                    marker,
                    model.id,
                    model.size_string(),
                    model.display_name
                );
            }
            println!("{} models", models.len());
        }
        Commands::Download { family: name, id } => {
            let models = registry.discover(&family(&name), &CatalogFilter::new()).await?;
            let descriptor = models
                .iter()
                .find(|m| m.id == id)
                .cloned()
                .with_context(|| format!("No {} model with id {}", name, id))?;
            download(registry, descriptor).await?;
        }
        Commands::Local => {
            for record in registry.list_local().await? {
                println!(
                    "{:<40} {:<8} {}",
                    record.model_id,
                    record.model_type.as_str(),
                    record.primary_path.display()
                );
            }
        }
        Commands::Delete { id } => {
            if !registry.delete(&id).await? {
                bail!("No downloaded model with id {}", id);
            }
            println!("Deleted {}", id);
        }
        Commands::Refresh => {
            registry.refresh_catalog().await?;
            println!("Catalogs refreshed");
        }
        Commands::ClearCache => {
            registry.clear_catalog_cache().await?;
            println!("Catalog cache cleared");
        }
        Commands::Usage => {
            let bytes = registry.storage_usage().await?;
            println!("{} bytes ({:.1} MB)", bytes, bytes as f64 / (1024.0 * 1024.0));
        }
    }

    Ok(())
}

async fn download(registry: Arc<ModelRegistry>, descriptor: ModelDescriptor) -> Result<()> {
    let bar = ProgressBar::new(descriptor.size_bytes);
    bar.set_style(
        ProgressStyle::with_template(
            "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} ({eta})",
        )?
        .progress_chars("=> "),
    );
    bar.set_message(descriptor.display_name.clone());

    let id = descriptor.id.clone();
    let mut task = tokio::spawn({
        let registry = registry.clone();
        let bar = bar.clone();
        async move {
            registry
                .download(&descriptor, move |p| show_progress(&bar, p))
                .await
        }
    });

    let result = tokio::select! {
        joined = &mut task => joined?,
        _ = tokio::signal::ctrl_c() => {
            registry.cancel(&id);
            task.await?
        }
    };

    match result {
        Ok(record) => {
            println!("{}", record.primary_path.display());
            Ok(())
        }
        Err(e) if e.is_cancelled() => {
            println!("Download of {} cancelled, run again to resume", id);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn show_progress(bar: &ProgressBar, progress: DownloadProgress) {
    match progress.state {
        DownloadState::Pending => {}
        DownloadState::Downloading => {
            if progress.total_bytes > 0 {
                bar.set_length(progress.total_bytes);
            }
            bar.set_position(progress.bytes_downloaded);
        }
        DownloadState::Completed => {
            bar.set_length(progress.total_bytes);
            bar.finish_with_message("done");
        }
        DownloadState::Failed => bar.abandon_with_message("failed"),
        DownloadState::Cancelled => bar.abandon_with_message("cancelled"),
    }
}
