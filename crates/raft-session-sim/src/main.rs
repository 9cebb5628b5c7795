use clap::Parser;
use raft_session_sim::{run, SimConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "rs-sim")]
#[command(about = "Drive client sessions against a simulated Raft cluster", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "sim.yaml")]
    config: String,

    /// Number of concurrent sessions
    #[arg(long)]
    sessions: Option<usize>,

    /// Commands per session
    #[arg(long)]
    commands: Option<usize>,

    /// Commands kept in flight per session
    #[arg(long)]
    window: Option<usize>,

    /// Probability of losing a request or response
    #[arg(long)]
    drop_rate: Option<f64>,

    /// Leader rotation interval in milliseconds (0 disables)
    #[arg(long)]
    leader_rotation_ms: Option<u64>,

    /// Seed for simulated latency and drops
    #[arg(long)]
    seed: Option<u64>,

    /// Log level used when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_found = std::path::Path::new(&args.config).exists();
    let mut config = if config_found {
        SimConfig::from_file(&args.config)?
    } else {
        SimConfig::default()
    };

    // Override with CLI args
    if let Some(sessions) = args.sessions {
        config.workload.sessions = sessions;
    }
    if let Some(commands) = args.commands {
        config.workload.commands = commands;
    }
    if let Some(window) = args.window {
        config.workload.window = window;
    }
    if let Some(drop_rate) = args.drop_rate {
        config.network.drop_rate = drop_rate;
    }
    if let Some(leader_rotation_ms) = args.leader_rotation_ms {
        config.cluster.leader_rotation_ms = leader_rotation_ms;
    }
    if let Some(seed) = args.seed {
        config.network.seed = seed;
    }
    if let Some(log_level) = args.log_level {
        config.log_level = log_level;
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if !config_found {
        tracing::warn!("Config file {} not found, using defaults", args.config);
    }
    tracing::debug!("Simulation config: {:?}", config);

    let report = run(&config).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.sessions_table());
        println!("{}", report.cluster_table());
    }

    if !report.is_consistent() {
        anyhow::bail!("session ordering violated");
    }
    tracing::info!("All sessions observed their results in order");
    Ok(())
}
