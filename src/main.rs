mod archive;
mod config;
mod error;
mod fetch;
mod git;
mod health;
mod http;
mod metrics;
#[cfg(test)]
mod test_support;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{Config, ListenProtocol, Overrides};
use crate::git::{GitCli, MirrorCache, Vcs};
use crate::metrics::MetricsRegistry;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "gitcache",
    about = "Caching proxy serving deterministic tar archives of git trees"
)]
struct Cli {
    /// Optional YAML configuration file.
    #[arg(short, long, env = "GITCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Directory to use for caching. May get quite large.  [default: ~/.gitcache]
    #[arg(long = "cachedir", env = "GITCACHE_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Binding for webserver.  [default: :9091]
    #[arg(long = "webbind", env = "GITCACHE_WEB_BIND")]
    web_bind: Option<String>,

    /// Listen on tcp, tcp4 or tcp6.  [default: tcp4]
    #[arg(long, value_enum, env = "GITCACHE_PROTOCOL")]
    protocol: Option<ListenProtocol>,

    /// git executable to run.  [default: git]
    #[arg(long, env = "GITCACHE_GIT")]
    git: Option<String>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            cache_dir: self.cache_dir.clone(),
            web_bind: self.web_bind.clone(),
            protocol: self.protocol,
            git_binary: self.git.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// State shared by every request handler.  Built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub mirrors: MirrorCache,
    pub vcs: Arc<dyn Vcs>,
    pub metrics: MetricsRegistry,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        Self {
            mirrors: MirrorCache::new(&config.cache_dir),
            vcs: Arc::new(GitCli::new(&config.git_binary)),
            metrics: MetricsRegistry::new(),
        }
    }

    #[cfg(test)]
    pub fn for_tests(cache_dir: &std::path::Path, vcs: Arc<dyn Vcs>) -> Self {
        Self {
            mirrors: MirrorCache::new(cache_dir),
            vcs,
            metrics: MetricsRegistry::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP server (axum)
// ---------------------------------------------------------------------------

async fn run_http_server(state: AppState, config: &Config) -> Result<()> {
    let app = http::handler::create_router(Arc::new(state));

    let listen_addr = config.listen_addr().await?;
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {listen_addr}"))?;

    tracing::info!(
        %listen_addr,
        protocol = ?config.protocol,
        cache_dir = %config.cache_dir.display(),
        "serving on {}",
        config.web_bind
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("received SIGINT"),
        () = terminate => tracing::info!("received SIGTERM"),
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // ---- CLI ----
    let cli = Cli::parse();

    // ---- Config ----
    let config = config::load_config(cli.config.as_deref(), cli.overrides())?;

    // ---- Tracing ----
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!(
        config_path = ?cli.config,
        git = %config.git_binary,
        "starting gitcache"
    );

    // ---- Ensure cache root exists ----
    tokio::fs::create_dir_all(&config.cache_dir)
        .await
        .with_context(|| {
            format!(
                "failed to create cache dir: {}",
                config.cache_dir.display()
            )
        })?;

    // ---- App state ----
    let state = AppState::new(&config);

    run_http_server(state, &config).await?;

    tracing::info!("gitcache shut down cleanly");
    Ok(())
}
