//! Google Sheets MCP Server
//!
//! Serves the MCP streamable HTTP endpoint. Logs go to stderr.

use clap::Parser;
use hyper::server::conn::http1;
use hyper_util::rt::TokioIo;
use hyper_util::service::TowerToHyperService;
use sheets_mcp::config::{
    self, ServerConfig, DEFAULT_HOST, DEFAULT_MAX_BODY_BYTES, DEFAULT_MCP_PATH,
    DEFAULT_SSE_KEEP_ALIVE_SECS,
};
use sheets_mcp::sheets::DEFAULT_SHEETS_BASE_URL;
use sheets_mcp::{build_service, spawn_reaper, GoogleSheetsClient, SessionStore, ToolRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(
    name = "sheets-mcp",
    version,
    about = "Google Sheets MCP server over streamable HTTP"
)]
struct Cli {
    /// Listening port; an invalid value falls back to 3000
    #[arg(long, env = "PORT", default_value = "3000")]
    port: String,
    /// Bind host
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,
    /// Path of the MCP endpoint
    #[arg(long, default_value = DEFAULT_MCP_PATH)]
    path: String,
    /// Evict sessions idle for longer than this many seconds
    #[arg(long, default_value_t = 600)]
    idle_timeout_secs: u64,
    /// Seconds between session sweeps
    #[arg(long, default_value_t = 60)]
    sweep_interval_secs: u64,
    /// SSE keep-alive interval in seconds (0 disables)
    #[arg(long, default_value_t = DEFAULT_SSE_KEEP_ALIVE_SECS)]
    sse_keep_alive_secs: u64,
    /// Largest accepted POST body in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_BODY_BYTES)]
    max_body_bytes: usize,
    /// Allowed Origin values (comma-separated). Empty allows any origin.
    #[arg(long, value_delimiter = ',')]
    allow_origin: Vec<String>,
    /// Base URL of the Sheets REST API
    #[arg(long, default_value = DEFAULT_SHEETS_BASE_URL)]
    sheets_base_url: String,
    /// OAuth token endpoint, overriding the one in each credential
    #[arg(long)]
    token_uri: Option<String>,
}

impl Cli {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            host: self.host,
            port: config::parse_port(&self.port),
            path: config::normalize_path(&self.path),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
            sse_keep_alive: config::keep_alive_from_secs(self.sse_keep_alive_secs),
            max_body_bytes: self.max_body_bytes.max(1),
            allowed_origins: config::parse_origins(&self.allow_origin),
            sheets_base_url: self.sheets_base_url,
            token_uri: self.token_uri,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sheets_mcp=info")),
        )
        .init();

    let config = Cli::parse().into_config();
    run_server(config).await
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigquit = signal(SignalKind::quit())?;
        tokio::select! {
            _ = sigterm.recv() => {},
            _ = sigint.recv() => {},
            _ = sigquit.recv() => {},
            _ = tokio::signal::ctrl_c() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}

async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    info!("Starting Sheets MCP Server (streamable HTTP mode)");

    let mut client = GoogleSheetsClient::new(config.sheets_base_url.clone())?;
    if let Some(token_uri) = &config.token_uri {
        client = client.with_token_uri(token_uri.clone());
    }
    let registry = Arc::new(ToolRegistry::with_sheets_tools(Arc::new(client)));
    info!(tools = registry.len(), "Tool registry ready");

    let store = SessionStore::new(registry);
    let service = build_service(store.clone(), &config);

    let cancel = CancellationToken::new();
    let reaper = spawn_reaper(
        store.clone(),
        config.sweep_interval,
        config.idle_timeout,
        cancel.clone(),
    );

    let listener = TcpListener::bind((config.host.as_str(), config.port))
        .await
        .map_err(|e| anyhow::anyhow!("bind failed: {e}"))?;
    info!(
        "MCP HTTP server listening on http://{}{}",
        listener.local_addr()?,
        config.path
    );
    if config.allowed_origins.is_empty() {
        info!("Origin check disabled; accepting any Origin");
    }

    let cancel_for_shutdown = cancel.clone();
    tokio::spawn(async move {
        if wait_for_shutdown_signal().await.is_ok() {
            info!("Shutdown signal received");
            cancel_for_shutdown.cancel();
        }
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("HTTP server shutting down");
                break;
            }
            res = listener.accept() => {
                let (stream, peer) = match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                };
                let svc = service.clone();
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);
                    let conn = http1::Builder::new()
                        .serve_connection(io, TowerToHyperService::new(svc));
                    if let Err(err) = conn.await {
                        error!(peer = %peer, "http connection error: {err}");
                    }
                });
            }
        }
    }

    let closed = store.close_all();
    info!(sessions = closed, "Closed remaining sessions");
    if let Err(e) = reaper.await {
        error!("Session reaper panicked: {e}");
    }

    info!("Server stopped");
    Ok(())
}
