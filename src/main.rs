use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use wasmhook::config::Config;
use wasmhook::events::{EventPipeline, LocalFsDriver, StorageDriver};
use wasmhook::http::{self, FileFront, PluginHost, FILES_PREFIX};
use wasmhook::kv::KvStore;

const DEFAULT_CONFIG_PATH: &str = "config/wasmhook.toml";

fn print_help() {
    println!(
        "\
wasmhook v{}

Serves sandboxed WebAssembly plugins over HTTP, and runs them on file
uploads when a [files] root is configured.

USAGE:
    wasmhook [OPTIONS] [CONFIG_PATH]

ARGUMENTS:
    CONFIG_PATH    Path to TOML configuration file [default: {DEFAULT_CONFIG_PATH}]

OPTIONS:
    -c, --config <KEY=VALUE>    Add a plugin configuration entry (repeatable,
                                later entries win)
    -h, --help                  Print this help message and exit
    -V, --version               Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG    Log level filter for tracing
                (e.g. debug, wasmhook=debug,warn)

EXAMPLES:
    wasmhook                                  # uses {DEFAULT_CONFIG_PATH}
    wasmhook /etc/wasmhook.toml               # custom config path
    wasmhook -c width=320px -c height=200px   # static plugin config
    RUST_LOG=debug wasmhook                   # with debug logging",
        env!("CARGO_PKG_VERSION"),
    );
}

/// Command line, minus `--help` / `--version`.
#[derive(Debug, Default, PartialEq)]
struct Args {
    config_path: Option<String>,
    overrides: Vec<String>,
}

impl Args {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Self> {
        let mut parsed = Args::default();
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    let pair = args
                        .next()
                        .ok_or_else(|| anyhow!("{arg} expects a KEY=VALUE argument"))?;
                    parsed.overrides.push(pair);
                }
                _ if arg.starts_with("--config=") => {
                    parsed.overrides.push(arg["--config=".len()..].to_string());
                }
                _ if arg.starts_with('-') => return Err(anyhow!("unknown option: {arg}")),
                _ => {
                    if parsed.config_path.replace(arg).is_some() {
                        return Err(anyhow!("more than one config path given"));
                    }
                }
            }
        }
        Ok(parsed)
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("wasmhook v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
    }

    // Initialize logging (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wasmhook=info")),
        )
        .init();

    let args = Args::parse(std::env::args().skip(1))?;

    // An explicit path must exist; the default one is optional
    let mut config = match &args.config_path {
        Some(path) => {
            info!("Loading configuration from {path}");
            Config::load(path)?
        }
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            info!("Loading configuration from {DEFAULT_CONFIG_PATH}");
            Config::load(DEFAULT_CONFIG_PATH)?
        }
        None => {
            info!("No configuration file, using defaults");
            Config::default()
        }
    };
    config.apply_overrides(&args.overrides)?;

    info!("Plugin root: {}", config.plugins.path.display());
    info!(
        "Sandbox: wasi={}, timeout={}",
        config.plugins.wasi,
        config
            .plugins
            .timeout()
            .map(|t| format!("{}ms", t.as_millis()))
            .unwrap_or_else(|| "none".to_string())
    );
    if !config.plugins.config.is_empty() {
        info!(
            "Static plugin config: {}",
            config.plugins.config.keys().cloned().collect::<Vec<_>>().join(", ")
        );
    }
    if !config.plugins.path.is_dir() {
        warn!(
            "Plugin root {} does not exist; every request will fall through",
            config.plugins.path.display()
        );
    }

    let store = KvStore::open(&config.kv)?;
    info!("Key/value store: {}", store.backend_name());

    // File uploads drive the action chains of their directory
    let files = config.files.root.as_ref().map(|root| {
        info!("File storage: {} (served under {FILES_PREFIX})", root.display());
        let driver: Arc<dyn StorageDriver> = Arc::new(LocalFsDriver::new(root.clone()));
        let pipeline =
            EventPipeline::new(driver.clone(), store.clone(), config.plugins.sandbox_options());
        FileFront::new(driver, Arc::new(pipeline))
    });
    if files.is_none() {
        info!("File storage disabled (no [files] root)");
    }

    let host = Arc::new(PluginHost::new(&config, store));
    let app = http::app(host, files);

    let address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("Listening on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}
