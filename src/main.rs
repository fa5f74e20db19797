//! 命令行入口

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use lyrics_translator::env::{self as lyrics_env, EnvVar};
use lyrics_translator::translation::storage::store::KeyValueStore;
use lyrics_translator::translation::{
    constants, ConfigManager, DomTree, RedbStore, TranslationCache, TranslationConfig,
    TranslationPipeline, TranslationResult,
};

/// Incremental lyrics translator.
#[derive(Parser)]
#[command(name = "lyrics-translator")]
#[command(about = "Translate lyrics lines in HTML snapshots with a cached, rate-limited LLM pipeline")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Key-value store path (cache and user settings)
    #[arg(long, global = true)]
    store: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Translate every lyrics line of an HTML file
    Translate {
        /// Input HTML file
        file: PathBuf,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Target language
        #[arg(short, long)]
        target: Option<String>,

        /// Input encoding
        #[arg(long, default_value = "utf-8")]
        encoding: String,
    },

    /// Translation cache commands
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show cache statistics
    Stats,
    /// Remove every cached translation
    Clear,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write an example configuration file
    Example {
        /// Destination path
        path: String,
    },
    /// Print the effective configuration
    Show,
    /// Print environment variables
    Env {
        /// Print documentation for every variable instead of current values
        #[arg(long)]
        docs: bool,
    },
}

fn init_logging() {
    let level = lyrics_env::core::LogLevel::get().unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let no_color = lyrics_env::core::NoColor::get().unwrap_or(false);
    let ansi = !no_color && atty::is(atty::Stream::Stderr);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(ansi)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&str>, store: Option<&str>) -> TranslationResult<TranslationConfig> {
    let manager = match path {
        Some(path) => ConfigManager::from_file(path)?,
        None => ConfigManager::new()?,
    };
    let mut config = manager.into_config();
    if let Some(store) = store {
        config.store_path = Some(store.to_string());
    }
    if config.store_path.is_none() {
        config.store_path = Some(constants::DEFAULT_STORE_PATH.to_string());
    }
    Ok(config)
}

fn open_store(config: &TranslationConfig) -> TranslationResult<RedbStore> {
    let path = config
        .store_path
        .as_deref()
        .unwrap_or(constants::DEFAULT_STORE_PATH);
    RedbStore::open(shellexpand::tilde(path).into_owned())
}

async fn translate(
    mut config: TranslationConfig,
    file: PathBuf,
    out: Option<PathBuf>,
    target: Option<String>,
    encoding: &str,
) -> TranslationResult<()> {
    if let Some(target) = target {
        config.target_lang = target;
    }

    let data = std::fs::read(&file)?;
    let mut tree = DomTree::from_bytes(&data, encoding, &config.unit_class)?;
    let mut pipeline = TranslationPipeline::from_config(config)?;

    let stats = pipeline.run_until_idle(&mut tree).await?;
    info!(
        "完成: 单元 {}，缓存命中 {}，批次 {}，渲染 {}",
        stats.units_seen, stats.cache_hits, stats.batches_succeeded, stats.rendered
    );

    let html = tree.to_html()?;
    match out {
        Some(path) => std::fs::write(path, html)?,
        None => println!("{}", html),
    }
    Ok(())
}

fn cache_command(config: &TranslationConfig, action: CacheAction) -> TranslationResult<()> {
    let mut store = open_store(config)?;
    match action {
        CacheAction::Stats => {
            let mut cache = TranslationCache::new(config.cache_capacity, &config.target_lang);
            cache.load_from_store(&store)?;
            let skips = cache.iter_oldest_first().filter(|e| e.value.is_skip()).count();
            println!("entries: {}", cache.len());
            println!("translated: {}", cache.len() - skips);
            println!("skip markers: {}", skips);
            println!("capacity: {}", cache.capacity());
        }
        CacheAction::Clear => {
            store.remove(constants::STORE_CACHE_KEY)?;
            println!("cache cleared");
        }
    }
    Ok(())
}

fn config_command(
    config_path: Option<&str>,
    store: Option<&str>,
    action: ConfigAction,
) -> TranslationResult<()> {
    match action {
        ConfigAction::Example { path } => {
            ConfigManager::generate_example_config(&path)?;
            println!("example configuration written to {}", path);
        }
        ConfigAction::Show => {
            let mut config = load_config(config_path, store)?;
            if config.api_key.is_some() {
                config.api_key = Some("[configured]".to_string());
            }
            let text = toml::to_string_pretty(&config)?;
            println!("{}", text);
        }
        ConfigAction::Env { docs } => {
            if docs {
                println!("{}", lyrics_env::generate_env_docs());
            } else {
                let env = lyrics_env::EnvConfig::from_env()?;
                env.print_summary();
            }
        }
    }
    Ok(())
}

async fn run(cli: Cli) -> TranslationResult<()> {
    let Cli {
        config,
        store,
        command,
    } = cli;
    let (config_path, store) = (config.as_deref(), store.as_deref());

    match command {
        Commands::Translate {
            file,
            out,
            target,
            encoding,
        } => {
            let config = load_config(config_path, store)?;
            translate(config, file, out, target, &encoding).await
        }
        Commands::Cache { action } => cache_command(&load_config(config_path, store)?, action),
        Commands::Config { action } => config_command(config_path, store, action),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
