//! SeedPilot - lifecycle hooks for self-organizing Cassandra clusters
//!
//! Invoked by the process supervisor once per event:
//!   seedpilot pre_start     - claim the seed role or join the seed
//!   seedpilot pre_stop      - clean up the seed record on the way out
//!   seedpilot health        - exit 0 only when this node is Up/Normal
//!   seedpilot basic_health  - same as health
//!   seedpilot renew_session - extend the seed lock session's TTL

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::Instrument;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seedpilot::config::SeedPilotConfig;
use seedpilot::coordination::ConsulClient;
use seedpilot::error::Result;
use seedpilot::executor::CassandraService;
use seedpilot::network::{NodeIdentity, PingProbe};
use seedpilot::state::{HookContext, HookOutcome, LifecycleCommand, LifecycleNode, EXIT_FAILURE};

/// SeedPilot - Consul-backed seed election and lifecycle hooks
#[derive(Parser)]
#[command(name = "seedpilot")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Optional TOML configuration file (environment variables override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides LOG_LEVEL
    #[arg(short, long)]
    log_level: Option<String>,

    /// Hook to run: pre_start, pre_stop, health, basic_health, renew_session
    hook: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();
    let code = run(cli).await;
    std::process::exit(code);
}

async fn run(cli: Cli) -> i32 {
    let config = SeedPilotConfig::load(cli.config.as_deref());

    let level = cli
        .log_level
        .clone()
        .or_else(|| config.as_ref().ok().map(|c| c.logging.level.clone()))
        .unwrap_or_else(|| "info".to_string());
    init_logging(&level);

    let config = match config {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            return EXIT_FAILURE;
        }
    };

    // No argument means the container entrypoint: run pre_start
    let command = match cli.hook.as_deref().unwrap_or("pre_start").parse::<LifecycleCommand>() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(
                "{} (expected pre_start, pre_stop, health, basic_health or renew_session)",
                e
            );
            return EXIT_FAILURE;
        }
    };

    let span = tracing::info_span!("hook", command = %command);
    async move {
        match run_hook(config, command).await {
            Ok(outcome) => {
                tracing::info!(
                    "{} finished in state {} (exit {})",
                    command,
                    outcome.state,
                    outcome.exit_code
                );
                outcome.exit_code
            }
            Err(e) => {
                tracing::error!("{} failed: {}", command, e);
                EXIT_FAILURE
            }
        }
    }
    .instrument(span)
    .await
}

/// Initialize logging
fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Build the collaborators for this invocation and run one hook
async fn run_hook(config: SeedPilotConfig, command: LifecycleCommand) -> Result<HookOutcome> {
    let identity = NodeIdentity::resolve(&config.node)?;
    tracing::debug!("Node {} ({}) at {}", identity.name, identity.hostname, identity.address);

    let client = ConsulClient::from_config(&config)?;
    tracing::debug!("Using coordination store at {}", client.base_url());

    let service = CassandraService::new(&config);
    let probe = PingProbe::new(config.probe_timeout());

    let mut node = LifecycleNode::new(HookContext {
        config,
        identity,
        store: Arc::new(client),
        service: Box::new(service),
        probe: Box::new(probe),
    });

    node.run(command).await
}
