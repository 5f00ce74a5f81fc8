use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use runtime::{AppConfig, CliArgs, DatabaseConfig};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;

use datamesh::{migrations::Migrator, JoinStore, MeshOrchestrator, ServiceRegistry};
use gateway::{
    BackendClient, CorsOptions, Dispatcher, Gateway, GatewayConfig, MeshBackendAdapter,
    SecuritySettings, SpecCache,
};

/// Expand a sqlite DSN into an absolute-path DSN using a base directory.
/// - Keeps "sqlite::memory:" as-is.
/// - Normalizes backslashes into forward slashes (important on Windows).
fn absolutize_sqlite_dsn(dsn: &str, base_dir: &Path, create_dirs: bool) -> Result<String> {
    if dsn.eq_ignore_ascii_case("sqlite::memory:") || dsn.eq_ignore_ascii_case("sqlite://:memory:")
    {
        return Ok("sqlite::memory:".to_string());
    }
    let db_path = dsn
        .strip_prefix("sqlite://")
        .ok_or_else(|| anyhow!("DSN must start with sqlite:// (got: {})", dsn))?;

    let (path_str, query) = match db_path.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (db_path, None),
    };

    let mut p = PathBuf::from(path_str);
    if p.as_os_str().is_empty() {
        return Err(anyhow!("Empty SQLite path in DSN"));
    }
    if p.is_relative() {
        p = base_dir.join(p);
    }

    if let Some(dir) = p.parent() {
        if create_dirs {
            std::fs::create_dir_all(dir)?;
        }
    }

    // Rebuild DSN with absolute path and normalized slashes
    let mut out = String::from("sqlite://");
    out.push_str(&p.to_string_lossy().replace('\\', "/"));
    match query {
        Some(q) => {
            out.push('?');
            out.push_str(q);
        }
        // create the file on first run
        None => out.push_str("?mode=rwc"),
    }
    Ok(out)
}

/// Meshgate - data-mesh API gateway
#[derive(Parser)]
#[command(name = "meshgate-server")]
#[command(about = "Meshgate - data-mesh API gateway")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port for HTTP server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Print current configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server
    Run,
    /// Check configuration
    Check,
    /// Apply a registry/join seed file
    Seed {
        /// Path to the seed file (YAML or JSON)
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // CLI args passed down to config
    let args = CliArgs {
        config: cli.config.as_ref().map(|p| p.to_string_lossy().to_string()),
        port: cli.port,
        print_config: cli.print_config,
        verbose: cli.verbose,
    };

    // Load configuration (normalized home_dir is applied inside)
    let mut config = AppConfig::load_or_default(cli.config.as_deref())?;
    config.apply_cli_overrides(&args);

    // Initialize logging
    let logging_config = config.logging.as_ref().cloned().unwrap_or_default();
    runtime::logging::init_logging_from_config(&logging_config, Path::new(&config.server.home_dir));
    tracing::info!("Meshgate server starting");

    // Print config and exit if requested
    if cli.print_config {
        println!("{}", config.to_yaml()?);
        return Ok(());
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_server(config).await,
        Commands::Check => check_config(config).await,
        Commands::Seed { file } => seed(config, file).await,
    }
}

/// Detect DB backend from URL scheme (sqlite/postgres).
fn detect_from_dsn(cfg: &DatabaseConfig) -> Result<&'static str> {
    let raw = cfg.url.trim().to_owned();
    if raw.is_empty() {
        return Err(anyhow!("Database URL not configured"));
    }

    let url = Url::parse(&raw).map_err(|e| anyhow!("Invalid database DSN '{}': {}", raw, e))?;

    match url.scheme() {
        "sqlite" | "sqlite3" => Ok("sqlite"),
        "postgres" | "postgresql" => Ok("postgres"),
        other => Err(anyhow!("Unsupported database type: {}", other)),
    }
}

async fn connect_database(config: &AppConfig) -> Result<DatabaseConnection> {
    let db_config = config
        .database
        .clone()
        .ok_or_else(|| anyhow!("Database not configured"))?;
    let backend = detect_from_dsn(&db_config)?;

    let mut dsn = db_config.url.trim().to_owned();
    if dsn.starts_with("sqlite://") || dsn.starts_with("sqlite3://") {
        dsn = absolutize_sqlite_dsn(&dsn, Path::new(&config.server.home_dir), true)?;
    }

    let mut opts = ConnectOptions::new(dsn.clone());
    if let Some(max_conns) = db_config.max_conns {
        opts.max_connections(max_conns);
    }
    opts.acquire_timeout(Duration::from_secs(5))
        .sqlx_logging(false);

    tracing::info!("Connecting to database: {} ({})", dsn, backend);
    let db = Database::connect(opts).await?;

    Migrator::up(&db, None)
        .await
        .context("Failed to run database migrations")?;

    Ok(db)
}

async fn run_server(config: AppConfig) -> Result<()> {
    if config.security.token_secret.trim().is_empty() {
        return Err(anyhow!(
            "security.token_secret is not configured; refusing to start"
        ));
    }

    let db = connect_database(&config).await?;

    let mut gateway_config: GatewayConfig = config.module_config("gateway").unwrap_or_default();
    gateway_config.bind_addr = format!("{}:{}", config.server.host, config.server.port);

    let registry = ServiceRegistry::new(db.clone());
    let store = JoinStore::new(db.clone());

    let http = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client")?;
    let specs = Arc::new(SpecCache::new(http.clone(), gateway_config.spec_ttl));
    let client = BackendClient::new(http, gateway_config.backend_timeout);

    let dispatcher = Arc::new(Dispatcher::new(registry.clone(), specs, client));
    let adapter = Arc::new(MeshBackendAdapter::new(dispatcher.clone()));
    let orchestrator = Arc::new(MeshOrchestrator::new(registry, store, adapter));

    let cors = CorsOptions {
        allow_all: config.security.cors_origin_allow_all,
        whitelist: config.security.cors_origin_whitelist.clone(),
    };
    let security = SecuritySettings {
        token_secret: config.security.token_secret.clone(),
    };
    let gateway = Gateway::new(gateway_config, cors, dispatcher, orchestrator, security);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received");
            cancel.cancel();
        });
    }

    gateway.serve(cancel).await
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn check_config(config: AppConfig) -> Result<()> {
    tracing::info!("Checking configuration...");

    // AppConfig::load_* already normalized & created home_dir
    tracing::info!("Configuration is valid");
    println!("Configuration check passed");
    println!("Server config:");
    println!("{}", config.to_yaml()?);

    Ok(())
}

async fn seed(config: AppConfig, file: PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read seed file {}", file.display()))?;
    let seed_file = datamesh::seed::SeedFile::parse(&raw)?;

    let db = connect_database(&config).await?;
    let report = datamesh::seed::apply(&db, seed_file).await?;

    println!(
        "Seed applied: {} logic modules, {} models, {} relationships, {} joins created ({} already present)",
        report.logic_modules,
        report.models,
        report.relationships,
        report.joins_created,
        report.joins_existing
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_memory_dsn_is_kept() {
        let out = absolutize_sqlite_dsn("sqlite::memory:", Path::new("/tmp"), false).unwrap();
        assert_eq!(out, "sqlite::memory:");
    }

    #[test]
    fn relative_sqlite_dsn_is_absolutized() {
        let tmp = tempfile::tempdir().unwrap();
        let out =
            absolutize_sqlite_dsn("sqlite://data/meshgate.db", tmp.path(), true).unwrap();
        assert!(out.starts_with("sqlite://"));
        assert!(out.contains("data/meshgate.db"));
        assert!(out.ends_with("?mode=rwc"));
        assert!(tmp.path().join("data").exists());
    }

    #[test]
    fn dsn_scheme_detection() {
        let cfg = |url: &str| DatabaseConfig {
            url: url.to_string(),
            max_conns: None,
            busy_timeout_ms: None,
        };
        assert_eq!(detect_from_dsn(&cfg("sqlite://x.db")).unwrap(), "sqlite");
        assert_eq!(
            detect_from_dsn(&cfg("postgres://u:p@h/db")).unwrap(),
            "postgres"
        );
        assert!(detect_from_dsn(&cfg("mysql://u:p@h/db")).is_err());
        assert!(detect_from_dsn(&cfg("")).is_err());
    }
}
