//! Main entry point for the overseer binary
//!
//! Demonstrates wiring the overseer with real collaborator
//! implementations: a demo workspace of two services is started in
//! dependency order, monitored, and healed until ctrl-c.

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use anyhow::Context;
use overseer::{
    BackoffStrategy, CheckId, DependencyEdge, HealthCheckConfig, InMemoryStore, Overseer,
    ProbeSpec, RealPortScanner, RealProcessLauncher, RestartPolicy, Service, ServiceId,
    ServiceStore,
};

/// Lifecycle manager for workspace-local services
#[derive(Parser)]
#[command(name = "overseer")]
#[command(about = "Starts, monitors and heals a workspace of local services")]
pub struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// How long wait-for-health dependency edges may block, in seconds
    #[arg(long, default_value = "60")]
    pub health_wait_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    let store = Arc::new(InMemoryStore::new());
    seed_demo_workspace(&store).await;

    let overseer = Overseer::new(
        store.clone(),
        Arc::new(RealProcessLauncher::new()),
        Arc::new(RealPortScanner),
    )
    .with_health_wait(Duration::from_secs(args.health_wait_secs));
    overseer
        .initialize()
        .await
        .context("failed to initialize overseer")?;

    let service_ids: Vec<ServiceId> = store
        .list_services()
        .await?
        .into_iter()
        .map(|s| s.id)
        .collect();

    let reports = overseer.start_services(&service_ids).await?;
    for report in &reports {
        info!("start report for {}: {:?}", report.service_id, report.outcome);
    }

    // Surface health transitions until shutdown
    let mut transitions = overseer.subscribe_transitions();
    tokio::spawn(async move {
        while let Ok(t) = transitions.recv().await {
            info!("💓 {}: {} -> {}", t.service_id, t.previous, t.new);
        }
    });

    info!("overseer running; press ctrl-c to stop");
    signal::ctrl_c().await?;

    info!("🛑 shutting down");
    if let Err(e) = overseer.stop_services(&service_ids).await {
        warn!("error stopping services: {e}");
    }
    overseer.shutdown().await;
    Ok(())
}

/// Two long-running demo services: a "db" the "web" service waits on
async fn seed_demo_workspace(store: &InMemoryStore) {
    let db_id = ServiceId::from("demo-db");
    let web_id = ServiceId::from("demo-web");

    store
        .add_service(Service {
            id: db_id.clone(),
            name: "demo-db".into(),
            command: "sleep 3600".into(),
            port: None,
            depends_on: Vec::new(),
        })
        .await;
    store
        .add_service(Service {
            id: web_id.clone(),
            name: "demo-web".into(),
            command: "sleep 3600".into(),
            port: Some(3000),
            depends_on: vec![db_id.clone()],
        })
        .await;

    let _ = store
        .insert_edge(DependencyEdge::new(web_id.clone(), db_id.clone()))
        .await;

    let _ = store
        .upsert_check(HealthCheckConfig {
            id: CheckId::from("demo-db-alive"),
            service_id: db_id.clone(),
            probe: ProbeSpec::Command {
                command: "true".into(),
            },
            interval_secs: 10,
            timeout_secs: 5,
            retries: 3,
            enabled: true,
        })
        .await;

    let _ = store
        .upsert_policy(RestartPolicy {
            service_id: web_id,
            enabled: true,
            max_restarts: 3,
            strategy: BackoffStrategy::Exponential,
            restart_count: 0,
        })
        .await;
}
