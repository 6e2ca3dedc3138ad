//! OSD Agent
//!
//! Runs the per-node OSD reconciliation loop: seeds desired state, then
//! converges local OSD daemons with it on an interval until interrupted.

use anyhow::{bail, Context};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use osd_agent::state::save_cluster_info;
use osd_agent::{
    AgentConfig, AgentMetrics, CephCliFactory, CephOsdInitializer, ClusterInfo, MemoryStore,
    OsdAgent, OsdState, ProcessManager, SgdiskFormatter,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// OSD Agent - per-node storage daemon reconciliation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML config file; flags override its values
    #[arg(long, env = "OSD_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Node id in the store layout
    #[arg(long, env = "NODE_ID")]
    node_id: Option<String>,

    /// Local configuration root
    #[arg(long, env = "CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Comma-separated devices to use for OSDs
    #[arg(long, env = "OSD_DEVICES")]
    devices: Option<String>,

    /// Format devices even if they already have partitions
    #[arg(long, env = "FORCE_FORMAT")]
    force_format: bool,

    /// Crush location for new OSDs
    #[arg(long, env = "OSD_LOCATION")]
    location: Option<String>,

    /// Seconds between reconciliation passes
    #[arg(long, env = "RECONCILE_INTERVAL")]
    reconcile_interval_secs: Option<u64>,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Run against an in-memory store seeded from the cluster flags
    #[arg(long, env = "STANDALONE")]
    standalone: bool,

    /// Cluster name (standalone mode)
    #[arg(long, env = "CLUSTER_NAME", default_value = "ceph")]
    cluster_name: String,

    /// Cluster fsid (standalone mode)
    #[arg(long, env = "CLUSTER_FSID")]
    cluster_fsid: Option<String>,

    /// Admin secret (standalone mode)
    #[arg(long, env = "ADMIN_SECRET", default_value = "")]
    admin_secret: String,
}

impl Args {
    fn agent_config(&self) -> anyhow::Result<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => AgentConfig::from_yaml_file(path)?,
            None => AgentConfig::default(),
        };

        if let Some(node_id) = &self.node_id {
            config.node_id = node_id.clone();
        }
        if let Some(dir) = &self.config_dir {
            config.config_dir = dir.clone();
        }
        if let Some(devices) = &self.devices {
            config.devices = AgentConfig::parse_devices(devices);
        }
        if self.force_format {
            config.force_format = true;
        }
        if self.location.is_some() {
            config.location = self.location.clone();
        }
        if let Some(secs) = self.reconcile_interval_secs {
            config.reconcile_interval_secs = secs;
        }

        config.validate()?;
        Ok(config)
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = args.agent_config().context("invalid agent configuration")?;

    info!("Starting OSD agent");
    info!("  Version: {}", osd_agent::VERSION);
    info!("  Node: {}", config.node_id);
    info!("  Config dir: {}", config.config_dir.display());
    info!("  Devices: {:?}", config.devices);
    info!("  Standalone mode: {}", args.standalone);

    if !args.standalone {
        bail!("no external desired-state store is configured; run with --standalone");
    }

    let store = Arc::new(MemoryStore::new());
    let supervisor = Arc::new(ProcessManager::default());
    let ctx = config.context(store.clone(), supervisor);

    let agent = Arc::new(OsdAgent::new(
        config.clone(),
        Arc::new(CephCliFactory::default()),
        Arc::new(CephOsdInitializer::default()),
        Arc::new(SgdiskFormatter::default()),
    ));

    seed_standalone_store(&args, &config, store, agent.layout()).await?;

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let metrics = agent.metrics().clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics).await {
            error!("Metrics server error: {}", e);
        }
    });

    agent
        .initialize(&ctx)
        .await
        .context("failed to seed desired state")?;

    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {}", e);
        }
        signal_token.cancel();
    });

    let mut ticker = tokio::time::interval(config.reconcile_interval());
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = agent.configure_local_service(&ctx).await {
                    error!(class = ?e.class(), "reconciliation pass failed: {}", e);
                }
            }
        }
    }

    info!("Shutting down, stopping local osds");
    agent.destroy_local_service(&ctx).await?;

    info!("OSD agent shutdown complete");
    Ok(())
}

/// Write the cluster record and the readiness flag into a fresh store
async fn seed_standalone_store(
    args: &Args,
    config: &AgentConfig,
    store: Arc<MemoryStore>,
    layout: &osd_agent::StoreLayout,
) -> anyhow::Result<()> {
    let Some(fsid) = &args.cluster_fsid else {
        info!("no cluster fsid given, waiting for the cluster to be initialized");
        return Ok(());
    };

    let cluster = ClusterInfo {
        name: args.cluster_name.clone(),
        fsid: fsid.clone(),
        admin_secret: args.admin_secret.clone(),
    };
    save_cluster_info(store.as_ref(), layout, &cluster).await?;

    OsdState::new(store, layout.clone(), config.node_id.clone())
        .set_node_ready(true)
        .await?;

    info!(cluster = %cluster.name, "standalone store seeded");
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
    if let Ok(directive) = "hyper=warn".parse() {
        filter = filter.add_directive(directive);
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
// Health Server
// =============================================================================

async fn run_health_server(addr: &str) -> anyhow::Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let mut response = Response::new(Body::from("ok"));
            if !matches!(req.uri().path(), "/healthz" | "/livez" | "/readyz") {
                *response.status_mut() = StatusCode::NOT_FOUND;
                *response.body_mut() = Body::from("not found");
            }
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("Invalid health server address: {}", addr))?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr).serve(make_svc).await?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

#[derive(Clone)]
struct AgentCounters {
    passes_started: prometheus::IntCounter,
    passes_skipped: prometheus::IntCounter,
    slots_succeeded: prometheus::IntCounter,
    slots_failed: prometheus::IntCounter,
    osds_pruned: prometheus::IntCounter,
    prune_failures: prometheus::IntCounter,
}

impl AgentCounters {
    fn register() -> prometheus::Result<Self> {
        use prometheus::register_int_counter;

        Ok(Self {
            passes_started: register_int_counter!(
                "osd_agent_passes_started_total",
                "Reconciliation passes that got past the config guard"
            )?,
            passes_skipped: register_int_counter!(
                "osd_agent_passes_skipped_total",
                "Reconciliation passes skipped while another was in progress"
            )?,
            slots_succeeded: register_int_counter!(
                "osd_agent_slots_succeeded_total",
                "OSD slots provisioned and launched"
            )?,
            slots_failed: register_int_counter!(
                "osd_agent_slots_failed_total",
                "OSD slots that failed to provision or launch"
            )?,
            osds_pruned: register_int_counter!(
                "osd_agent_osds_pruned_total",
                "OSDs removed because they are no longer desired"
            )?,
            prune_failures: register_int_counter!(
                "osd_agent_prune_failures_total",
                "OSD removals that failed"
            )?,
        })
    }

    /// Advance each counter to the agent's current total
    fn update(&self, metrics: &AgentMetrics) {
        fn advance(counter: &prometheus::IntCounter, total: u64) {
            counter.inc_by(total.saturating_sub(counter.get()));
        }

        let snapshot = metrics.snapshot();
        advance(&self.passes_started, snapshot.passes_started);
        advance(&self.passes_skipped, snapshot.passes_skipped);
        advance(&self.slots_succeeded, snapshot.slots_succeeded);
        advance(&self.slots_failed, snapshot.slots_failed);
        advance(&self.osds_pruned, snapshot.osds_pruned);
        advance(&self.prune_failures, snapshot.prune_failures);
    }
}

async fn run_metrics_server(addr: &str, metrics: Arc<AgentMetrics>) -> anyhow::Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let counters = AgentCounters::register().context("failed to register metrics")?;

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        let counters = counters.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                let counters = counters.clone();
                async move {
                    if req.uri().path() != "/metrics" {
                        let mut response = Response::new(Body::from("not found"));
                        *response.status_mut() = StatusCode::NOT_FOUND;
                        return Ok::<_, std::convert::Infallible>(response);
                    }

                    counters.update(&metrics);

                    let encoder = TextEncoder::new();
                    let mut buffer = Vec::new();
                    let mut response = match encoder.encode(&prometheus::gather(), &mut buffer) {
                        Ok(()) => Response::new(Body::from(buffer)),
                        Err(e) => {
                            let mut response = Response::new(Body::from(e.to_string()));
                            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                            return Ok(response);
                        }
                    };
                    if let Ok(value) = HeaderValue::from_str(encoder.format_type()) {
                        response.headers_mut().insert(CONTENT_TYPE, value);
                    }
                    Ok(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("Invalid metrics server address: {}", addr))?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr).serve(make_svc).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::IntCounter;

    fn counter(name: &str) -> IntCounter {
        IntCounter::new(name, "test counter").unwrap()
    }

    #[test]
    fn test_counters_follow_agent_totals() {
        let counters = AgentCounters {
            passes_started: counter("passes_started"),
            passes_skipped: counter("passes_skipped"),
            slots_succeeded: counter("slots_succeeded"),
            slots_failed: counter("slots_failed"),
            osds_pruned: counter("osds_pruned"),
            prune_failures: counter("prune_failures"),
        };
        let metrics = AgentMetrics::new();

        metrics.record_pass_started();
        metrics.record_slot(true);
        metrics.record_slot(false);
        counters.update(&metrics);
        // repeated scrapes do not double count
        counters.update(&metrics);

        assert_eq!(counters.passes_started.get(), 1);
        assert_eq!(counters.slots_succeeded.get(), 1);
        assert_eq!(counters.slots_failed.get(), 1);
        assert_eq!(counters.passes_skipped.get(), 0);

        metrics.record_removal(true);
        counters.update(&metrics);
        assert_eq!(counters.osds_pruned.get(), 1);
        assert_eq!(counters.prune_failures.get(), 0);
    }
}
