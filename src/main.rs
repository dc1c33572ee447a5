//! Binary entrypoint for the Wildgrid CLI.
//!
//! Commands:
//! - `start` - open the world store, run the simulation loop until Ctrl-C
//! - `init` - create a starter `config.toml` and write the default catalog
//! - `status` - print user, creature and presence counts
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use wildgrid::config::Config;
use wildgrid::world::{
    ActiveRegionCache, Catalog, CellLogSink, CombatResolver, SimulationScheduler, WorldStore,
    WorldStoreBuilder,
};

#[derive(Parser)]
#[command(name = "wildgrid")]
#[command(about = "A persistent grid world simulation server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the world simulation
    Start,
    /// Write a default configuration and catalog
    Init,
    /// Show world statistics
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start => {
            let config = match pre_config {
                Some(config) => config,
                None => {
                    warn!("No usable config at {}; using defaults", cli.config);
                    Config::default()
                }
            };
            info!("Starting Wildgrid v{}", env!("CARGO_PKG_VERSION"));
            run(config).await?;
        }
        Commands::Init => {
            Config::create_default(&cli.config).await?;
            let config = Config::default();
            if let Some(ref catalog_path) = config.world.catalog_path {
                if let Some(parent) = Path::new(catalog_path).parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(catalog_path, Catalog::builtin().to_json_pretty()?).await?;
                println!("Wrote default catalog to {}", catalog_path);
            }
            println!("Created default configuration at {}", cli.config);
            println!("Edit the configuration file, then run: wildgrid start");
        }
        Commands::Status => {
            let config = pre_config.unwrap_or_default();
            let store = open_store(&config)?;
            let scan = store.scan_and_prune_presence();
            println!("Wildgrid Status:");
            println!("  Data directory: {}", config.world.data_dir);
            println!("  Users: {}", store.list_usernames().len());
            println!("  Creatures: {}", store.creature_count());
            println!("  Online users: {}", scan.online.len());
        }
    }

    Ok(())
}

fn open_store(config: &Config) -> Result<Arc<WorldStore>> {
    let catalog = match config.world.catalog_path {
        Some(ref path) if Path::new(path).exists() => Catalog::load_from_json(path)
            .with_context(|| format!("Failed to load catalog {}", path))?,
        Some(ref path) => {
            warn!("Catalog {} not found; using built-in catalog", path);
            Catalog::builtin()
        }
        None => Catalog::builtin(),
    };
    let store = WorldStoreBuilder::new(&config.world.data_dir)
        .catalog(Arc::new(catalog))
        .presence_timeout_secs(config.world.presence_timeout_secs)
        .user_log_limit(config.world.user_log_limit)
        .open()
        .with_context(|| format!("Failed to open world store at {}", config.world.data_dir))?;
    Ok(Arc::new(store))
}

async fn run(config: Config) -> Result<()> {
    let store = open_store(&config)?;
    let sink = Arc::new(CellLogSink::new(store.clone()));
    let cache = Arc::new(ActiveRegionCache::with_ttl(
        store.clone(),
        config.world.active_ttl_secs,
    ));
    let resolver = Arc::new(CombatResolver::new(store.clone(), sink.clone()));
    let scheduler = Arc::new(
        SimulationScheduler::new(store.clone(), cache, resolver, sink)
            .with_interval(config.world.tick_interval()),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let task = scheduler.start(shutdown_rx);
    info!("World open at {}", config.world.data_dir);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(true);
    if let Err(e) = task.await {
        warn!("Scheduler task ended abnormally: {}", e);
    }
    let flushed = store.flush()?;
    info!("Flushed {} bytes; goodbye", flushed);
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let base_level = match (verbosity, config) {
        (0, Some(cfg)) => cfg.logging.level_filter(),
        (0, None) => log::LevelFilter::Info,
        (1, _) => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);
    // sled is chatty at debug
    builder.filter_module("sled", log::LevelFilter::Warn);

    let log_file = config
        .as_ref()
        .and_then(|cfg| cfg.logging.file.as_ref())
        .and_then(|file| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(file)
                .ok()
        });

    if let Some(f) = log_file {
        let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
        // Mirror to the console only when attached to a terminal
        let is_tty = atty::is(atty::Stream::Stdout);
        builder.format(move |fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            let line = format!("{} [{}] {}", ts, record.level(), record.args());
            if let Ok(mut guard) = write_mutex.lock() {
                let _ = writeln!(guard, "{}", line);
            }
            if is_tty {
                writeln!(fmt, "{}", line)
            } else {
                Ok(())
            }
        });
    } else {
        builder.format(|fmt, record| {
            let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
            writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
        });
    }
    let _ = builder.try_init();
}
