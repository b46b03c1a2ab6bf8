//! SynapseLink device daemon - Main Entry Point
//!
//! Runs the protocol engine against the simulated device, driving the tick
//! loop and reconnect policy from here.

use clap::{Parser, Subcommand};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use synapselink::config::LinkConfig;
use synapselink::engine::{
    EngineSettings, EngineState, PollOutcome, ProtocolEngine, ReconnectDecision, ReconnectPolicy,
};
use synapselink::observability::init_default_logging;
use synapselink::transport::{ConnectError, LinkFlag};
use synapselink::{LinkError, LinkResult, MqttClientFactory, SimulatedDevice};
use tokio::time::{sleep, Duration, Instant};
use tracing::{error, info, warn};

/// SynapseLink remote-command device
#[derive(Parser)]
#[command(name = "synapselink")]
#[command(about = "SynapseLink remote-command device over MQTT")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "SYNAPSELINK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and serve commands until halted or terminated
    Run {
        /// Publish a HEARTBEAT at this interval while connected
        #[arg(long, value_name = "SECS")]
        heartbeat_secs: Option<u64>,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting SynapseLink v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { heartbeat_secs } => {
            run_link(config, heartbeat_secs.map(Duration::from_secs)).await
        }
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!(recoverable = e.is_recoverable(), "Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(config_path: &Option<PathBuf>) -> LinkResult<LinkConfig> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(LinkConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["synapselink.toml", "config/synapselink.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(LinkConfig::load_from_file(&path)?);
                }
            }

            Err(LinkError::invalid_input(
                "No configuration file found. Provide one with -c/--config or create synapselink.toml",
            ))
        }
    }
}

async fn run_link(config: LinkConfig, heartbeat: Option<Duration>) -> LinkResult<()> {
    info!("Device starting with id: {}", config.device.id);

    let factory = MqttClientFactory::new(config.broker.clone());
    let link = Arc::new(LinkFlag::new(true));
    let mut engine = ProtocolEngine::new(
        EngineSettings::from_config(&config),
        factory,
        SimulatedDevice::new(),
        link,
    )?;

    // SIGINT is the operator interrupt: the engine reboots the device and halts
    signal_hook::flag::register(SIGINT, engine.interrupt_handle())?;
    let terminate = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGTERM, Arc::clone(&terminate))?;

    let result = drive(&mut engine, &config, heartbeat, &terminate).await;

    engine.shutdown().await;
    result
}

async fn drive(
    engine: &mut ProtocolEngine<MqttClientFactory, SimulatedDevice>,
    config: &LinkConfig,
    heartbeat: Option<Duration>,
    terminate: &AtomicBool,
) -> LinkResult<()> {
    let policy = ReconnectPolicy::from(&config.reconnect);
    let tick_interval = config.engine.tick_interval();
    let mut failed_attempts: u32 = 0;
    let mut next_attempt = Instant::now();
    let mut last_heartbeat = Instant::now();

    loop {
        if terminate.load(Ordering::SeqCst) {
            info!("Received SIGTERM, shutting down gracefully...");
            return Ok(());
        }

        match engine.state() {
            EngineState::Halted => {
                info!("Device halted");
                return Ok(());
            }
            EngineState::Connected => {
                if let PollOutcome::NetworkReset = engine.tick().await {
                    warn!("Network reset; reconnecting");
                    next_attempt = Instant::now();
                }

                if let Some(interval) = heartbeat {
                    if engine.connected() && last_heartbeat.elapsed() >= interval {
                        if let Err(e) = engine.send_heartbeat().await {
                            warn!("Heartbeat failed: {}", e);
                        }
                        last_heartbeat = Instant::now();
                    }
                }
            }
            EngineState::Uninitialized | EngineState::Initialized => {
                if Instant::now() < next_attempt {
                    // Keeps the interrupt flag serviced while waiting
                    engine.tick().await;
                } else {
                    match engine.connect(false).await {
                        Ok(_) => {
                            if failed_attempts > 0 {
                                info!("Reconnected after {} failed attempts", failed_attempts);
                            }
                            failed_attempts = 0;
                            last_heartbeat = Instant::now();
                        }
                        Err(ConnectError::Halted) => continue,
                        Err(e) => match policy.decide(failed_attempts) {
                            ReconnectDecision::Proceed { attempt, delay } => {
                                warn!(
                                    attempt,
                                    delay_ms = delay.as_millis() as u64,
                                    "Connection failed: {}",
                                    e
                                );
                                failed_attempts = attempt;
                                next_attempt = Instant::now() + delay;
                            }
                            ReconnectDecision::GiveUp => {
                                error!("Giving up after {} reconnection attempts", failed_attempts);
                                return Err(e.into());
                            }
                        },
                    }
                }
            }
        }

        sleep(tick_interval).await;
    }
}

fn handle_config_command(config: &LinkConfig, show: bool) -> LinkResult<()> {
    config.validate()?;

    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
