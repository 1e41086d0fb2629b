//! simshard operator binary
//!
//! # Commands
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  serve            engine over in-memory shards + remote cache,  │
//! │                   prefetch worker, /metrics, /healthz, /stats   │
//! │  route            shard of each entity id                       │
//! │  estimate-memory  capacity estimate for a corpus size           │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{header, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{filter::Directive, fmt, prelude::*, EnvFilter};

use simshard::config::{EngineConfig, DEFAULT_DIMENSION};
use simshard::index::IndexOptimizer;
use simshard::monitoring::ServiceHealth;
use simshard::{route_entity, SearchEngine};

// =============================================================================
// CLI Arguments
// =============================================================================

/// simshard - sharded similarity search data plane
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Metrics server bind address
    #[arg(long, global = true, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Health server bind address
    #[arg(long, global = true, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true, env = "LOG_JSON")]
    log_json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the engine with health and metrics endpoints until Ctrl-C
    Serve {
        /// YAML configuration file; defaults apply when omitted
        #[arg(long, env = "SIMSHARD_CONFIG")]
        config: Option<PathBuf>,

        /// Remote entries loaded into the local tier at startup
        #[arg(long, default_value = "100")]
        warm: usize,
    },

    /// Print the shard owning each entity id
    Route {
        /// Number of shards
        #[arg(long, default_value = "8")]
        shards: usize,

        /// Entity ids
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Estimate index memory for a corpus size
    EstimateMemory {
        /// Number of vectors
        #[arg(long)]
        vectors: usize,

        /// Vector dimension
        #[arg(long, default_value_t = DEFAULT_DIMENSION)]
        dimension: usize,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    match &args.command {
        Command::Serve { config, warm } => serve(&args, config.as_deref(), *warm).await,
        Command::Route { shards, ids } => {
            anyhow::ensure!(*shards > 0, "--shards must be at least 1");
            for id in ids {
                println!("{}\t{}", id, route_entity(id, *shards));
            }
            Ok(())
        }
        Command::EstimateMemory { vectors, dimension } => {
            let config = EngineConfig::default();
            let optimizer = IndexOptimizer::new(*dimension, config.index);
            let estimate = optimizer.estimate_memory(*vectors);
            println!("{}", serde_json::to_string_pretty(&estimate)?);
            Ok(())
        }
    }
}

async fn serve(args: &Args, config_path: Option<&std::path::Path>, warm: usize) -> anyhow::Result<()> {
    let config = match config_path {
        Some(path) => EngineConfig::from_yaml_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    info!("Starting simshard");
    info!("  Shards: {}", config.sharding.shard_count);
    info!("  Dimension: {}", config.dimension);
    info!("  Local cache capacity: {}", config.cache.local_capacity);
    info!("  Prefetch enabled: {}", config.cache.prefetch.enabled);

    let (engine, _backends) =
        SearchEngine::in_memory(config).context("assembling search engine")?;
    let engine = Arc::new(engine);
    let health = Arc::new(ServiceHealth::new());
    let shutdown = CancellationToken::new();

    let report = engine.provision().await.context("provisioning shard collections")?;
    if !report.is_complete() {
        warn!(failed = ?report.failed_shards(), "Some shard collections were not created");
    }

    match engine.warm_cache(warm).await {
        Ok(loaded) => info!(loaded, "Local cache warmed"),
        Err(e) => warn!("Cache warm-up skipped: {}", e),
    }

    let prefetch = engine.start(shutdown.clone());

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_state = health.clone();
    let health_engine = engine.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_state, health_engine).await {
            error!("Health server error: {:#}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let metrics_engine = engine.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_engine).await {
            error!("Metrics server error: {:#}", e);
        }
    });

    health.set_ready(true);
    info!("simshard ready");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    info!("Shutdown requested");
    health.set_ready(false);
    health.set_live(false);
    shutdown.cancel();
    if let Some(handle) = prefetch {
        if let Err(e) = handle.await {
            warn!("Prefetch worker ended abnormally: {}", e);
        }
    }

    info!("simshard shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "h2=warn"] {
        if let Ok(d) = directive.parse::<Directive>() {
            filter = filter.add_directive(d);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// HTTP Helpers
// =============================================================================

fn respond(status: StatusCode, content_type: &str, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    if let Ok(value) = header::HeaderValue::from_str(content_type) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
}

fn flag(ok: bool) -> Response<Full<Bytes>> {
    if ok {
        respond(StatusCode::OK, "text/plain", "ok")
    } else {
        respond(StatusCode::SERVICE_UNAVAILABLE, "text/plain", "unavailable")
    }
}

fn json<T: serde::Serialize>(value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => respond(StatusCode::OK, "application/json", body),
        Err(e) => respond(
            StatusCode::INTERNAL_SERVER_ERROR,
            "text/plain",
            format!("encoding failed: {e}"),
        ),
    }
}

fn not_found() -> Response<Full<Bytes>> {
    respond(StatusCode::NOT_FOUND, "text/plain", "not found")
}

async fn bind(addr: &str, name: &str) -> anyhow::Result<TcpListener> {
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid {name} server address {addr}"))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {name} server on {addr}"))?;
    info!("{} server listening on {}", name, addr);
    Ok(listener)
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(
    addr: &str,
    health: Arc<ServiceHealth>,
    engine: Arc<SearchEngine>,
) -> anyhow::Result<()> {
    let listener = bind(addr, "Health").await?;

    loop {
        let (stream, _) = listener.accept().await.context("health server accept")?;
        let io = TokioIo::new(stream);
        let health = health.clone();
        let engine = engine.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let health = health.clone();
                let engine = engine.clone();
                async move {
                    let response = match req.uri().path() {
                        "/healthz" | "/livez" => flag(health.is_live()),
                        "/readyz" => flag(health.is_ready()),
                        "/health" => json(&health.report()),
                        "/stats" => json(&engine.get_stats().await),
                        _ => not_found(),
                    };
                    Ok::<_, Infallible>(response)
                }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Health server connection error: {}", e);
            }
        });
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, engine: Arc<SearchEngine>) -> anyhow::Result<()> {
    let listener = bind(addr, "Metrics").await?;

    loop {
        let (stream, _) = listener.accept().await.context("metrics server accept")?;
        let io = TokioIo::new(stream);
        let engine = engine.clone();

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let engine = engine.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match engine.metrics().render() {
                            Ok(body) => respond(
                                StatusCode::OK,
                                "text/plain; version=0.0.4",
                                body,
                            ),
                            Err(e) => respond(
                                StatusCode::INTERNAL_SERVER_ERROR,
                                "text/plain",
                                e.to_string(),
                            ),
                        },
                        _ => not_found(),
                    };
                    Ok::<_, Infallible>(response)
                }
            });
            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!("Metrics server connection error: {}", e);
            }
        });
    }
}
