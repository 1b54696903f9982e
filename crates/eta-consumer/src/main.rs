//! eta-consumer: Market price consumer binary
//!
//! Connects to a provider, logs in, discovers the service, loads the
//! dictionaries and logs every update for one item until the run time ends.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use eta_consumer_lib::{run_server, ServerState, Session};
use eta_metadata::ConsumerConfig;
use eta_middleware::{TcpNotifier, TcpTransport};

#[derive(Parser, Debug)]
#[command(name = "eta-consumer")]
#[command(about = "Market price consumer over the ETA socket transport")]
struct Args {
    /// Path to a YAML configuration file; defaults apply without one
    #[arg(short, long, env = "ETA_CONFIG")]
    config: Option<PathBuf>,

    /// Provider host
    #[arg(short = 'H', long, env = "ETA_HOST")]
    host: Option<String>,

    /// Provider port
    #[arg(short, long, env = "ETA_PORT")]
    port: Option<u16>,

    /// Local interface to bind before connecting
    #[arg(short, long, env = "ETA_INTERFACE")]
    interface: Option<String>,

    /// Seconds to stay subscribed
    #[arg(short, long, env = "ETA_RUNTIME")]
    runtime: Option<u64>,

    /// Service to request the item from
    #[arg(short, long, env = "ETA_SERVICE")]
    service: Option<String>,

    /// Market price item name
    #[arg(long, alias = "mp", env = "ETA_ITEM")]
    item: Option<String>,

    /// Login user name
    #[arg(short, long, env = "ETA_USER")]
    user: Option<String>,

    /// Address for the health and Prometheus endpoints; off when unset
    #[arg(long, env = "ETA_METRICS_ADDR")]
    metrics_addr: Option<SocketAddr>,
}

impl Args {
    fn apply(self, config: &mut ConsumerConfig) {
        if let Some(host) = self.host {
            config.connection.host = host;
        }
        if let Some(port) = self.port {
            config.connection.port = port;
        }
        if let Some(interface) = self.interface {
            config.connection.interface = interface;
        }
        if let Some(runtime) = self.runtime {
            config.run_time_secs = runtime;
        }
        if let Some(service) = self.service {
            config.directory.service_name = service;
        }
        if let Some(item) = self.item {
            config.item.name = item;
        }
        if self.user.is_some() {
            config.login.user_name = self.user;
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let metrics_addr = args.metrics_addr;

    let mut config = match &args.config {
        Some(path) => {
            let config = ConsumerConfig::load(path)?;
            info!(path = %path.display(), "Loaded consumer configuration");
            config
        }
        None => ConsumerConfig::default(),
    };
    args.apply(&mut config);
    config.check()?;

    let (config, clamped) = config.validated();
    if clamped {
        warn!(
            ping_timeout_secs = config.connection.ping_timeout_secs,
            guaranteed_output_buffers = config.connection.guaranteed_output_buffers,
            max_services = config.directory.max_services,
            "Configuration values clamped to valid range"
        );
    }

    info!(
        host = %config.connection.host,
        port = config.connection.port,
        service = %config.directory.service_name,
        item = %config.item.name,
        run_time_secs = config.run_time_secs,
        "Starting consumer"
    );

    if let Some(addr) = metrics_addr {
        let state = ServerState::new(config.directory.service_name.as_str());
        info!(%addr, "Starting metrics server");
        tokio::spawn(async move {
            if let Err(e) = run_server(addr, state).await {
                error!(error = %e, "Metrics server failed");
            }
        });
    }

    let transport = TcpTransport::new();
    let notifier = TcpNotifier::new(transport.sockets());
    let mut session = Session::new(config, transport, notifier);

    match session.run().await {
        Ok(()) => {
            info!("Consumer finished");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Consumer failed");
            Err(e.into())
        }
    }
}
