//! Demo server: one module graph served on one or more ports.
//!
//! ```text
//! bootwire-demo --ports 3000,3001 --root-path /api --static-dir ./public
//! curl http://127.0.0.1:3000/api/greet/ada
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::extract::Path;
use axum::routing::get;
use axum::{Json, Router};
use bootwire_core::{Container, Injectable, Module, ModuleMetadata, NamespaceKey};
use bootwire_server::{AppState, InitOptions, Inject, Middleware, NetworkConfig, ServerRegistry};
use clap::Parser;
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Command line interface for the demo server
#[derive(Parser, Debug)]
#[command(name = "bootwire-demo")]
#[command(about = "Serves a demo module graph through a bootwire server instance")]
#[command(version)]
struct Args {
    /// Address to bind every listener to
    #[arg(long, env = "BOOTWIRE_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Ports to build and start, comma-separated
    #[arg(long, env = "BOOTWIRE_PORTS", value_delimiter = ',', default_value = "3000")]
    ports: Vec<u16>,

    /// Prefix for every route
    #[arg(long, env = "BOOTWIRE_ROOT_PATH", default_value = "/")]
    root_path: String,

    /// Directory to serve static files from
    #[arg(long, env = "BOOTWIRE_STATIC_DIR")]
    static_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, env = "BOOTWIRE_LOG_JSON")]
    log_json: bool,
}

// ---------------------------------------------------------------------------
// Services and modules
// ---------------------------------------------------------------------------

#[derive(Default)]
struct VisitCounter(AtomicU64);

impl VisitCounter {
    fn record(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn total(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Injectable for VisitCounter {
    fn construct(_container: &Container) -> anyhow::Result<Self> {
        Ok(Self::default())
    }
}

struct GreetingService {
    visits: Arc<VisitCounter>,
}

impl GreetingService {
    fn greet(&self, name: &str) -> Value {
        let visit = self.visits.record();
        json!({ "greeting": format!("hello, {name}"), "visit": visit })
    }
}

impl Injectable for GreetingService {
    fn construct(container: &Container) -> anyhow::Result<Self> {
        Ok(Self {
            visits: container.resolve::<VisitCounter>()?,
        })
    }
}

struct StatsModule;

impl Module for StatsModule {
    fn metadata() -> ModuleMetadata {
        ModuleMetadata::new().service::<VisitCounter>()
    }
}

struct AppModule;

impl Module for AppModule {
    fn metadata() -> ModuleMetadata {
        ModuleMetadata::new()
            .service::<GreetingService>()
            .module::<StatsModule>()
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

async fn greet(Path(name): Path<String>, Inject(greetings): Inject<GreetingService>) -> Json<Value> {
    Json(greetings.greet(&name))
}

async fn stats(Inject(visits): Inject<VisitCounter>) -> Json<Value> {
    Json(json!({ "visits": visits.total() }))
}

async fn explode() -> &'static str {
    panic!("demo panic")
}

fn routes(router: Router<AppState>) -> Router<AppState> {
    router
        .route("/greet/{name}", get(greet))
        .route("/stats", get(stats))
        .route("/panic", get(explode))
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let registry = ServerRegistry::new();
    registry.metadata().declare_tree::<AppModule>(&NamespaceKey::DEFAULT);

    let network = NetworkConfig {
        host: args.host.clone(),
        ..NetworkConfig::default()
    };
    let server = registry.init::<AppModule>(
        InitOptions::new()
            .root_path(args.root_path.as_str())
            .network(network),
    )?;

    server.set_middlewares(vec![Middleware::new("demo-routes", routes)]);
    if let Some(dir) = &args.static_dir {
        server.set_static(dir.clone(), None);
    }

    for &port in &args.ports {
        server.build(port);
        let addr = server.listen_async(port).await?;
        info!(%addr, "demo listener ready");
    }

    info!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    Ok(())
}
