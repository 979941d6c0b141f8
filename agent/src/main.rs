//! Overwatch Agent - detection-driven decision service
//!
//! Listens for camera and drone detections over UDP, keeps the arbitration
//! state, and answers per-tick decision queries over HTTP:
//! - camera detections on `--camera-port` (default 5556)
//! - drone self-detections on `--drone-port` (default 5557, 0 disables)
//! - `POST /get_decisions` on `--http-port` (default 5000)

mod server;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use overwatch_core::{
    DecisionEngine, DetectionDecoder, DetectionSourceAdapter, EngineConfig, Framing,
    OverwatchRuntime, RuntimeConfig, RuntimeError, SourceKind, StateScope,
};
use overwatch_env::{ChannelId, TokioContext, UdpTransport};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Stock engine profiles
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Profile {
    /// Drone fleet: human priority, target timeout, exploration cooldown
    Drone,
    /// Single ground robot: finishes each investigation before the next
    GroundRobot,
}

impl Profile {
    fn name(&self) -> &'static str {
        match self {
            Profile::Drone => "drone",
            Profile::GroundRobot => "ground_robot",
        }
    }
}

#[derive(Debug, Parser)]
#[clap(name = "overwatch-agent", version, about = "Detection-driven decision service for camera-coordinated agents")]
struct Cli {
    /// Engine configuration file (JSON); omitted keys keep the profile defaults
    #[clap(short, long, env = "OVERWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Engine profile; a configuration file overrides its values key by key
    #[clap(long, value_enum, default_value = "drone", env = "OVERWATCH_PROFILE")]
    profile: Profile,

    /// Camera position table file (JSON), overrides the profile's table
    #[clap(long)]
    cameras: Option<PathBuf>,

    /// Keep one decision state per agent instead of one for the fleet
    #[clap(long)]
    per_agent: bool,

    /// Address the UDP and HTTP listeners bind to
    #[clap(long, default_value = "0.0.0.0", env = "OVERWATCH_BIND")]
    bind: IpAddr,

    /// UDP port for camera detections
    #[clap(long, default_value = "5556")]
    camera_port: u16,

    /// Expect a 4-byte channel id before each camera datagram
    #[clap(long)]
    camera_channel_id: Option<i32>,

    /// UDP port for drone self-detections (0 disables the channel)
    #[clap(long, default_value = "5557")]
    drone_port: u16,

    /// HTTP port for the decision endpoint
    #[clap(long, default_value = "5000")]
    http_port: u16,

    /// Seconds an adapter waits for a datagram before re-checking shutdown
    #[clap(long, default_value = "1.0")]
    receive_timeout: f64,

    /// Capacity of the adapter -> engine queue
    #[clap(long, default_value = "256")]
    queue_capacity: usize,

    /// Log level (trace, debug, info, warn, error)
    #[clap(long, env = "OVERWATCH_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[clap(long, env = "OVERWATCH_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    info!("Starting Overwatch agent v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&cli)?;
    info!(
        profile = cli.profile.name(),
        scope = ?config.scope,
        cameras = config.cameras.len(),
        "Engine configuration loaded"
    );

    let context = TokioContext::shared();
    let engine = DecisionEngine::shared(context.clone(), config);
    let mut runtime = OverwatchRuntime::start(
        engine,
        RuntimeConfig {
            queue_capacity: cli.queue_capacity,
        },
    );
    let receive_timeout = Duration::try_from_secs_f64(cli.receive_timeout)
        .context("Invalid receive timeout")?;

    attach_channels(
        &mut runtime,
        &context,
        cli.bind,
        channel_specs(&cli),
        receive_timeout,
    )
    .await?;

    let state = Arc::new(server::AppState {
        queries: runtime.query_service(),
        profile: cli.profile.name().to_string(),
    });
    let http_addr = SocketAddr::new(cli.bind, cli.http_port);
    let listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("Failed to bind HTTP listener on {}", http_addr))?;
    info!("Decision endpoint listening on http://{}/get_decisions", http_addr);

    let served = axum::serve(listener, server::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(e) = &served {
        warn!(error = %e, "HTTP server stopped with error");
    }

    let report = runtime.shutdown().await?;
    for adapter in &report.adapters {
        info!(
            channel = %adapter.channel,
            received = adapter.received,
            malformed = adapter.malformed,
            dropped = adapter.dropped_full,
            "Adapter summary"
        );
    }
    info!(ingested = report.ingested, "Overwatch agent shut down gracefully");

    served.context("HTTP server failed")
}

/// One inbound detection channel to bind.
struct ChannelSpec {
    name: &'static str,
    port: u16,
    decoder: DetectionDecoder,
}

fn channel_specs(cli: &Cli) -> Vec<ChannelSpec> {
    let mut camera_decoder = DetectionDecoder::new(SourceKind::CameraStatic);
    if cli.profile == Profile::GroundRobot {
        // The robot's camera bridge sends no confidence.
        camera_decoder = camera_decoder.with_assumed_confidence(1.0);
    }
    if let Some(expected_id) = cli.camera_channel_id {
        camera_decoder = camera_decoder.with_framing(Framing::IdPrefixed { expected_id });
    }

    let mut channels = vec![ChannelSpec {
        name: "cameras",
        port: cli.camera_port,
        decoder: camera_decoder,
    }];
    if cli.drone_port != 0 {
        channels.push(ChannelSpec {
            name: "drones",
            port: cli.drone_port,
            decoder: DetectionDecoder::new(SourceKind::DroneSelf),
        });
    }
    channels
}

/// Binds and attaches every channel. A channel that fails to bind is logged
/// and skipped; startup fails only when none could bind.
async fn attach_channels(
    runtime: &mut OverwatchRuntime<TokioContext>,
    context: &Arc<TokioContext>,
    bind: IpAddr,
    channels: Vec<ChannelSpec>,
    receive_timeout: Duration,
) -> Result<usize, RuntimeError> {
    for channel in channels {
        let addr = SocketAddr::new(bind, channel.port);
        match UdpTransport::bind(addr, context.clone()).await {
            Ok(transport) => runtime.attach(
                DetectionSourceAdapter::new(ChannelId::new(channel.name), transport, channel.decoder)
                    .with_receive_timeout(receive_timeout),
            ),
            Err(e) => error!(channel = channel.name, error = %e, "Detection source not started"),
        }
    }

    match runtime.adapter_count() {
        0 => Err(RuntimeError::NoAdapters),
        n => Ok(n),
    }
}

fn profile_config(profile: Profile) -> EngineConfig {
    match profile {
        Profile::Drone => EngineConfig::drone(),
        Profile::GroundRobot => EngineConfig::ground_robot(),
    }
}

/// Profile defaults, then the optional file, then CLI overrides.
fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let base = profile_config(cli.profile);
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_json_file_with_base(path, &base)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => base,
    };

    if let Some(path) = &cli.cameras {
        let table = overwatch_core::CameraPositionTable::from_json_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?;
        config = config.with_cameras(table);
    }
    if cli.per_agent {
        config = config.with_scope(StateScope::PerAgent);
    }

    config.validate()?;
    Ok(config)
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("Received Ctrl+C, shutting down..."); },
        _ = terminate => { info!("Received SIGTERM, shutting down..."); },
    }
}

/// Initialize logging based on CLI arguments
fn init_logging(cli: &Cli) -> Result<()> {
    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .context("Invalid log level")?;
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(log_level.into());

    if cli.log_json {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .with(filter)
            .init();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use overwatch_env::DatagramTransport;
    use std::net::Ipv4Addr;
    use tempfile::tempdir;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn spec(name: &'static str, port: u16) -> ChannelSpec {
        ChannelSpec {
            name,
            port,
            decoder: DetectionDecoder::new(SourceKind::CameraStatic),
        }
    }

    fn runtime() -> (Arc<TokioContext>, OverwatchRuntime<TokioContext>) {
        let context = TokioContext::shared();
        let engine = DecisionEngine::shared(context.clone(), EngineConfig::drone());
        (context, OverwatchRuntime::start(engine, RuntimeConfig::default()))
    }

    #[test]
    fn test_config_file_overlays_selected_profile() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "scope": "per_agent" }"#).unwrap();

        let cli = Cli::parse_from([
            "overwatch-agent",
            "--profile",
            "ground-robot",
            "--config",
            path.to_str().unwrap(),
        ]);
        let config = load_config(&cli).unwrap();

        assert_eq!(config.scope, StateScope::PerAgent);
        assert!(!config.preempt_active_target);
        assert!(!config.human_priority);
        assert_eq!(config.target_timeout, None);
        assert_eq!(config.camera.min_confidence, 0.0);
        assert_eq!(config.cameras, EngineConfig::ground_robot().cameras);
    }

    #[test]
    fn test_cli_flags_apply_after_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{ "arrival_radius": 3.5 }"#).unwrap();

        let cli = Cli::parse_from([
            "overwatch-agent",
            "--config",
            path.to_str().unwrap(),
            "--per-agent",
        ]);
        let config = load_config(&cli).unwrap();

        assert_eq!(config.arrival_radius, 3.5);
        assert_eq!(config.scope, StateScope::PerAgent);
        assert!(config.human_priority);
    }

    #[tokio::test]
    async fn test_bind_failure_skips_only_that_channel() {
        let (context, mut runtime) = runtime();
        let occupied = UdpTransport::bind(SocketAddr::new(LOCALHOST, 0), context.clone())
            .await
            .unwrap();
        let taken = occupied.local_addr().unwrap().port();

        let attached = attach_channels(
            &mut runtime,
            &context,
            LOCALHOST,
            vec![spec("cameras", taken), spec("drones", 0)],
            Duration::from_millis(100),
        )
        .await
        .unwrap();

        assert_eq!(attached, 1);
        let report = runtime.shutdown().await.unwrap();
        assert_eq!(report.adapters.len(), 1);
        assert_eq!(report.adapters[0].channel, "drones");
    }

    #[tokio::test]
    async fn test_no_channel_bound_is_fatal() {
        let (context, mut runtime) = runtime();
        let occupied = UdpTransport::bind(SocketAddr::new(LOCALHOST, 0), context.clone())
            .await
            .unwrap();
        let taken = occupied.local_addr().unwrap().port();

        let result = attach_channels(
            &mut runtime,
            &context,
            LOCALHOST,
            vec![spec("cameras", taken), spec("drones", taken)],
            Duration::from_millis(100),
        )
        .await;

        assert!(matches!(result, Err(RuntimeError::NoAdapters)));
        assert_eq!(runtime.adapter_count(), 0);
    }
}
