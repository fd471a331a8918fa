//! evented-http command line.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────── one reactor (LocalSet) ────────────────────────┐
//!                 │                                                                         │
//!   load ─────────┼─▶ listener ─▶ ServerSocket ─▶ ProxyHandler ─▶ ClientSocket ───────────┼─▶ origin
//!   (ClientSocket)│                     ▲            │   ▲             │                    │  (ServerSocket
//!                 │                     │            ▼   │             ▼                    │   + OriginHandler)
//!                 │                     └──── backpressure (pause / resume) ───┘            │
//!                 │                                                                         │
//!                 │   config (TOML, hot-reloaded routes) · tracing · metrics · shutdown     │
//!                 └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Subcommands:
//! - `origin`: serve generated bodies
//! - `proxy`: route requests by Host and path to upstreams
//! - `load`: drive connections × iterations requests and report

use std::cell::RefCell;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use clap::{Parser, Subcommand};
use tokio::task::LocalSet;

use evented_http::config::watcher::{reload_routes, ConfigWatcher};
use evented_http::config::{load_or_default, StackConfig};
use evented_http::lifecycle::signals::shutdown_on_signal;
use evented_http::lifecycle::Shutdown;
use evented_http::net::{Listener, Reactor, ReactorSettings};
use evented_http::observability::logging::init_logging;
use evented_http::observability::metrics::init_metrics;
use evented_http::proxy::{build_route_table, HostRouter, ProxyHandler};
use evented_http::service::{LoadHandler, LoadSettings, OriginHandler};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "evented-http")]
#[command(about = "Non-blocking HTTP/1.x origin, routing proxy and load generator", long_about = None)]
struct Cli {
    /// TOML configuration file. Routes are reloaded when it changes.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer every request with a generated body
    Origin {
        /// Overrides listener.bind_address
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Forward requests to the upstream chosen by Host and path
    Proxy {
        /// Overrides listener.bind_address
        #[arg(short, long)]
        bind: Option<String>,
        /// Overrides default_upstream
        #[arg(short, long)]
        upstream: Option<String>,
    },
    /// Send connections × iterations requests and report the outcome
    Load {
        /// Origin or proxy to connect to
        #[arg(short, long)]
        target: SocketAddr,
        #[arg(long, default_value = "localhost")]
        host: String,
        #[arg(long, default_value = "/")]
        path: String,
        #[arg(short = 'n', long, default_value_t = 50)]
        connections: usize,
        #[arg(short, long, default_value_t = 50)]
        iterations: usize,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = load_or_default(cli.config.as_deref())?;
    init_logging(&config.observability.log_filter);

    tracing::info!("evented-http v{} starting", env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Origin { bind } | Commands::Proxy { bind, .. } => {
            if let Some(bind) = bind {
                config.listener.bind_address = bind.clone();
            }
        }
        Commands::Load { .. } => {}
    }
    if let Commands::Proxy {
        upstream: Some(upstream),
        ..
    } = &cli.command
    {
        config.default_upstream = Some(upstream.clone());
    }

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let local = LocalSet::new();
    local.block_on(&runtime, run(cli, config))
}

async fn run(cli: Cli, config: StackConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let shutdown = Shutdown::new();
    tokio::task::spawn_local(shutdown_on_signal(shutdown.clone()));

    match cli.command {
        Commands::Origin { .. } => run_origin(config, shutdown).await,
        Commands::Proxy { .. } => run_proxy(config, cli.config, shutdown).await,
        Commands::Load {
            target,
            host,
            path,
            connections,
            iterations,
        } => {
            let settings = LoadSettings {
                target,
                host,
                path,
                connections,
                iterations,
            };
            run_load(config, settings, shutdown).await
        }
    }
}

async fn serve(reactor: Reactor, config: &StackConfig) -> Result<(), Box<dyn std::error::Error>> {
    let listener = Listener::bind(&config.listener).await?;
    reactor.serve(listener).await;
    reactor.close_idle();
    if !reactor.drain(DRAIN_TIMEOUT).await {
        tracing::warn!(remaining = reactor.tracker().total(), "Connections still open after drain timeout");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}

async fn run_origin(config: StackConfig, shutdown: Shutdown) -> Result<(), Box<dyn std::error::Error>> {
    let handler = Rc::new(RefCell::new(OriginHandler::new(&config.origin)));
    let reactor = Reactor::builder(ReactorSettings::from_config(&config), shutdown)
        .server_handler(handler.clone())
        .build();
    serve(reactor, &config).await?;
    let handler = handler.borrow();
    tracing::info!(completed = handler.completed(), failed = handler.failed(), "Origin stopped");
    Ok(())
}

async fn run_proxy(
    config: StackConfig,
    config_path: Option<PathBuf>,
    shutdown: Shutdown,
) -> Result<(), Box<dyn std::error::Error>> {
    let table = Arc::new(ArcSwap::from_pointee(build_route_table(&config.routes)?));
    let default_upstream: Option<SocketAddr> = config.default_upstream.as_deref().map(str::parse).transpose()?;
    tracing::info!(
        routes = config.routes.len(),
        default_upstream = ?default_upstream,
        "Route table built"
    );

    // dropping the watcher stops it, so it lives until the proxy returns
    let _watcher = match config_path {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(&path);
            tokio::task::spawn_local(reload_routes(updates, Arc::clone(&table)));
            Some(watcher.run()?)
        }
        None => None,
    };

    let router = HostRouter::new(table, default_upstream);
    let proxy = Rc::new(RefCell::new(ProxyHandler::new(Box::new(router))));
    let reactor = Reactor::builder(ReactorSettings::from_config(&config), shutdown)
        .server_handler(proxy.clone())
        .client_handler(proxy)
        .build();
    serve(reactor, &config).await
}

async fn run_load(
    config: StackConfig,
    settings: LoadSettings,
    shutdown: Shutdown,
) -> Result<(), Box<dyn std::error::Error>> {
    let handler = Rc::new(RefCell::new(LoadHandler::new(settings)));
    let finished = handler.borrow().finished();
    let reactor = Reactor::builder(ReactorSettings::from_config(&config), shutdown.clone())
        .client_handler(handler.clone())
        .build();

    reactor.with_multiplexer(|mux| handler.borrow_mut().start(mux))?;
    tokio::select! {
        _ = finished.notified() => {}
        _ = shutdown.wait() => tracing::info!("Load interrupted"),
    }
    reactor.close_idle();

    let report = handler.borrow().report();
    let counters = reactor.client_counters();
    println!(
        "successes={} failures={} body_bytes={} avg_latency_us={} avg_requests_per_connection={:.2}",
        report.successes,
        report.failures,
        report.body_bytes,
        counters.average_latency().as_micros(),
        counters.average_transactions_per_connection(),
    );
    Ok(())
}
