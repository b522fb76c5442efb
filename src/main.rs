//! `resilience-probe`: watch the health of configured services.
//!
//! Loads a TOML configuration, registers every configured service behind a
//! load balancer with a TCP or HTTP probe, runs the health checkers and
//! prints every event as a JSON line on stdout until Ctrl-C (or until
//! `--duration` expires).

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

use rpc_resilience::config::{load_config, ProbeConfig, ResilienceConfig};
use rpc_resilience::health::{HealthProbe, HttpProbe, TcpConnectProbe};
use rpc_resilience::observability::logging::init_logging;
use rpc_resilience::{Context, LoadBalancer, ServiceInstance};

#[derive(Parser)]
#[command(name = "resilience-probe")]
#[command(about = "Probe configured services and stream health events as JSON lines", long_about = None)]
struct Cli {
    /// Configuration file.
    #[arg(short, long, default_value = "resilience.toml")]
    config: PathBuf,

    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(short, long)]
    duration: Option<u64>,
}

fn build_balancer(config: &ResilienceConfig, service: usize, ctx: &Context) -> Result<LoadBalancer, Box<dyn std::error::Error>> {
    let service = &config.services[service];
    let mut lb_config = config.load_balancer.clone();
    let health = lb_config.health_check.get_or_insert_with(Default::default).clone();

    let probe: Arc<dyn HealthProbe> = match &service.probe {
        ProbeConfig::Tcp => Arc::new(TcpConnectProbe),
        ProbeConfig::Http { path } => Arc::new(HttpProbe::new(path.clone(), health.timeout())?),
    };

    let balancer = LoadBalancer::from_config(lb_config, probe, ctx.clone());
    for instance in &service.instances {
        balancer.add_instance(ServiceInstance::from(instance));
    }
    tracing::info!(
        service = %service.name,
        instances = service.instances.len(),
        interval_ms = health.interval_ms,
        "Service registered"
    );
    Ok(balancer)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", cli.config.display(), e);
            std::process::exit(2);
        }
    };
    init_logging(&config.logging);
    tracing::info!(config = %cli.config.display(), services = config.services.len(), "resilience-probe starting");

    let ctx = Context::new();
    let mut events = ctx.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => tracing::error!(error = %e, "Failed to encode event"),
                },
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "Event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut balancers = Vec::with_capacity(config.services.len());
    for index in 0..config.services.len() {
        let balancer = build_balancer(&config, index, &ctx)?;
        balancer.start();
        balancers.push(balancer);
    }

    match cli.duration {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
        }
    }

    tracing::info!("Shutting down");
    for balancer in &balancers {
        balancer.stop().await;
    }
    // Let the printer drain what was already published.
    tokio::time::sleep(Duration::from_millis(50)).await;
    printer.abort();
    Ok(())
}
