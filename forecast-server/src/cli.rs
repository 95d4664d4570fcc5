use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use forecast_core::{
    AnthropicClient, Config, ForecastOrchestrator, KeyValueCache, MemoryCache, NwsClient,
    OrchestratorSettings, RedisCache, api,
};
use inquire::{CustomType, Password, PasswordDisplayMode, Text};
use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::logging;

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(
    name = "forecast-server",
    version,
    about = "Cached, model-summarized weather forecasts over HTTP"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP server.
    Serve {
        /// Config file; defaults to the platform config directory.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Keep results in process memory instead of the external store.
        #[arg(long)]
        in_memory_cache: bool,
    },

    /// Interactively set credentials and connection settings.
    Configure {
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Print the effective configuration with secrets hidden.
    ShowConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        match self.command {
            Command::Serve {
                config,
                in_memory_cache,
            } => {
                let cfg = load_effective(config.as_deref())?;
                logging::init(&cfg.log_level)?;
                serve(cfg, in_memory_cache).await?;
            }
            Command::Configure { config } => {
                let path = resolve_path(config)?;
                configure(&path)?;
            }
            Command::ShowConfig { config } => {
                let cfg = load_effective(config.as_deref())?;
                print!("{}", cfg.redacted().to_toml()?);
            }
        }

        Ok(())
    }
}

fn resolve_path(explicit: Option<PathBuf>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path),
        None => Config::config_file_path(),
    }
}

/// Defaults, then the file, then the environment.
fn load_effective(explicit: Option<&Path>) -> Result<Config> {
    let mut cfg = match explicit {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    cfg.apply_env()?;
    Ok(cfg)
}

async fn serve(cfg: Config, in_memory_cache: bool) -> Result<()> {
    if in_memory_cache {
        cfg.validate_without_store()?;
    } else {
        cfg.validate()?;
    }

    let source = Arc::new(NwsClient::new(&cfg.source)?);
    let inference = Arc::new(AnthropicClient::new(&cfg.inference)?);
    let cache: Arc<dyn KeyValueCache> = if in_memory_cache {
        warn!("using the in-process cache; results are not shared between instances");
        Arc::new(MemoryCache::new())
    } else {
        Arc::new(RedisCache::connect(&cfg.cache).await?)
    };

    let orchestrator = ForecastOrchestrator::new(
        source,
        inference,
        cache,
        OrchestratorSettings::from_config(&cfg),
    );
    let metrics = orchestrator.metrics();
    let mut app = api::router(orchestrator, &cfg.auth);
    if cfg.telemetry.tracing_enabled {
        let sampler = api::RequestSampler::from_config(&cfg.telemetry);
        info!(
            rate = cfg.telemetry.tracing_sample_rate,
            service = %cfg.telemetry.tracing_service,
            "request tracing enabled"
        );
        app = api::traced(app, Arc::new(sampler));
    }

    if cfg.telemetry.metrics_enabled {
        let addr = SocketAddr::from(([0, 0, 0, 0], cfg.telemetry.metrics_port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind metrics listener on {addr}"))?;
        info!(%addr, "serving metrics");
        tokio::spawn(async move {
            let app = api::metrics_router(metrics);
            if let Err(err) = axum::serve(listener, app).await {
                warn!(error = %err, "metrics listener stopped");
            }
        });
    }

    let listener = TcpListener::bind(&cfg.server.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", cfg.server.listen_addr))?;
    info!(
        addr = %listener.local_addr()?,
        auth = cfg.auth.enabled,
        location = %cfg.source.location,
        "starting server"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server stopped with an error")?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "could not listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown requested");
}

fn configure(path: &Path) -> Result<()> {
    let mut cfg = Config::load_from(path)?;

    let key = Password::new("Anthropic API key (leave blank to keep current):")
        .without_confirmation()
        .with_display_mode(PasswordDisplayMode::Masked)
        .prompt()?;
    if !key.trim().is_empty() {
        cfg.inference.api_key = Some(key.trim().to_string());
    }

    let host = Text::new("Cache host:")
        .with_default(cfg.cache.host.as_deref().unwrap_or("localhost"))
        .prompt()?;
    cfg.cache.host = Some(host.trim().to_string());

    cfg.cache.port = CustomType::<u16>::new("Cache port:")
        .with_default(cfg.cache.port)
        .with_error_message("Please enter a port number")
        .prompt()?;

    let password = Password::new("Cache password (leave blank for none):")
        .without_confirmation()
        .with_display_mode(PasswordDisplayMode::Masked)
        .prompt()?;
    cfg.cache.auth = Some(password.trim().to_string()).filter(|p| !p.is_empty());

    let location = Text::new("Forecast grid location (office/x,y):")
        .with_default(&cfg.source.location)
        .prompt()?;
    if !location.contains('/') {
        return Err(anyhow!("Location must look like SEW/127,75, got '{location}'"));
    }
    cfg.source.location = location.trim().to_string();

    cfg.save_to(path)?;
    println!("Configuration saved to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_flags_parse() {
        let cli = Cli::try_parse_from([
            "forecast-server",
            "serve",
            "--config",
            "/tmp/f.toml",
            "--in-memory-cache",
        ])
        .unwrap();
        match cli.command {
            Command::Serve {
                config,
                in_memory_cache,
            } => {
                assert_eq!(config.as_deref(), Some(Path::new("/tmp/f.toml")));
                assert!(in_memory_cache);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn show_config_uses_kebab_case() {
        let cli = Cli::try_parse_from(["forecast-server", "show-config"]).unwrap();
        assert!(matches!(cli.command, Command::ShowConfig { config: None }));
    }

    #[test]
    fn explicit_config_file_is_layered_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[source]\nlocation = \"OTX/10,20\"\n").unwrap();

        let cfg = load_effective(Some(&path)).unwrap();
        assert_eq!(cfg.source.location, "OTX/10,20");
        assert_eq!(cfg.cache.key_prefix, "lfia");
    }
}
