//! Thermocam Daemon (thermocamd)
//!
//! Manages a fleet of networked thermal cameras: tracks their lifecycle over
//! MQTT, supervises one capture worker process per streaming device and fuses
//! the thermal matrix with the video frames.
//!
//! # Processes
//! - **Daemon**: single-threaded tokio loop owning registry, fusion engine and
//!   stream supervisor; control socket for the CLI
//! - **Worker**: `thermocamd worker ...`, spawned by the daemon per device,
//!   talks to it over stdin/stdout pipes
//!
//! # Shutdown
//! SIGINT/SIGTERM publish `offline`, stop every worker and persist devices.

mod bus;
mod capture;
mod discovery;
mod frame_queue;
mod manager;
mod output;
mod server;
mod supervisor;
mod worker;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use tc_core::{DaemonConfig, DeviceStore, FusionEngine};

use crate::bus::MqttBus;
use crate::discovery::Advertiser;
use crate::manager::DeviceManager;
use crate::output::SnapshotSink;
use crate::server::ControlServer;
use crate::supervisor::{ProcessLauncher, StreamSupervisor};
use crate::worker::WorkerOptions;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable holding the tracing filter
const LOG_ENV: &str = "THERMOCAM_LOG";

/// Channel depths between the bus/server tasks and the manager
const INBOUND_CAPACITY: usize = 256;
const INTENT_CAPACITY: usize = 32;

/// Time given to the MQTT event loop to flush `offline` before exit
const SHUTDOWN_FLUSH: Duration = Duration::from_millis(300);

#[derive(Parser, Debug)]
#[command(name = "thermocamd", version, about = "Thermal camera fleet daemon")]
struct Cli {
    /// Configuration file (default: ~/.config/thermocam/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Option<Command>,
}

/// Command-line overrides applied on top of the config file
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Control socket path
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// MQTT broker host
    #[arg(long)]
    broker_host: Option<String>,

    /// MQTT broker port
    #[arg(long)]
    broker_port: Option<u16>,

    /// Do not advertise the broker over mDNS
    #[arg(long)]
    no_discovery: bool,

    /// Directory for overlay snapshots
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,
}

impl Overrides {
    fn apply(&self, config: &mut DaemonConfig) {
        if let Some(socket) = &self.socket {
            config.control.socket_path = socket.clone();
        }
        if let Some(host) = &self.broker_host {
            config.broker.host = host.clone();
        }
        if let Some(port) = self.broker_port {
            config.broker.port = port;
        }
        if self.no_discovery {
            config.discovery.enabled = false;
        }
        if let Some(dir) = &self.snapshot_dir {
            config.output.snapshot_dir = Some(dir.clone());
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a capture worker (spawned by the daemon)
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        device_id: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        frame_rate: u32,
        #[arg(long)]
        queue_depth: usize,
    },
}

// ============================================================================
// Process Setup
// ============================================================================

fn install_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());

        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("PANIC at {}: {}", location, message);
    }));
}

/// Socket and data files stay private to owner and group
fn set_umask() {
    // SAFETY: umask only sets the file creation mask for the process.
    unsafe { libc::umask(0o007) };
}

/// Journald when the journal socket exists, stdout otherwise
///
/// Returns true if logging goes to the journal.
fn init_daemon_logging(filter: &str) -> bool {
    use tracing_subscriber::prelude::*;

    if std::path::Path::new("/run/systemd/journal/socket").exists() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(filter))
                    .init();
                return true;
            }
            Err(e) => eprintln!("Failed to create journald layer: {}, falling back to stdout", e),
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(filter)
        .init();
    false
}

/// Workers own stdout for packets; logs go to stderr
fn init_worker_logging(filter: &str) {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

fn log_filter() -> String {
    std::env::var(LOG_ENV).unwrap_or_else(|_| "info".to_string())
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> anyhow::Result<()> {
    install_panic_hook();
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Worker {
            device_id,
            url,
            frame_rate,
            queue_depth,
        }) => {
            init_worker_logging(&log_filter());
            worker::run_worker(WorkerOptions {
                device_id,
                url,
                frame_rate,
                queue_depth,
            })?;
            Ok(())
        }
        None => {
            set_umask();
            let filter = log_filter();
            let journald = init_daemon_logging(&filter);
            info!("STARTUP: thermocamd {} starting", VERSION);
            info!("STARTUP: Logging to {}", if journald { "systemd journal" } else { "stdout" });
            info!("STARTUP: Log level: {}", filter);

            let mut config = DaemonConfig::load(cli.config.as_deref())?;
            cli.overrides.apply(&mut config);
            config.validate()?;

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()?;
            runtime.block_on(run_daemon(config))
        }
    }
}

async fn run_daemon(config: DaemonConfig) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
    let (intent_tx, intent_rx) = mpsc::channel(INTENT_CAPACITY);
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    // Bus
    let (bus, eventloop) = MqttBus::new(&config.broker);
    info!(
        "STARTUP: broker {}:{} as {}",
        config.broker.host, config.broker.port, config.broker.client_id
    );
    let bus_task = {
        let bus = bus.clone();
        tokio::spawn(async move { bus.run_event_loop(eventloop, inbound_tx).await })
    };

    // Manager
    let launcher = Arc::new(ProcessLauncher::current_exe()?);
    let supervisor = StreamSupervisor::new(launcher, &config.stream);
    let engine = FusionEngine::new().with_eval_size(config.fusion.eval_width, config.fusion.eval_height);
    let store = DeviceStore::new(config.storage.devices_path());
    let mut manager = DeviceManager::new(bus.clone(), supervisor, engine, Some(store), event_tx);
    if let Err(e) = manager.load() {
        warn!("STARTUP: could not restore devices: {}", e);
    }

    // Renderer sink
    let sink = SnapshotSink::from_config(&config.output)?;
    if let Some(dir) = &config.output.snapshot_dir {
        info!("STARTUP: snapshots to {:?}", dir);
    }
    let sink_task = tokio::spawn(output::run_sink(event_rx, sink));

    // Control socket
    let server = ControlServer::bind(&config.control.socket_path, intent_tx)?;
    let server_task = tokio::spawn(server.run(shutdown_rx.clone()));

    // mDNS
    let advertiser = if config.discovery.enabled {
        match Advertiser::start(&config.discovery, config.broker.port) {
            Ok(a) => Some(a),
            Err(e) => {
                warn!("STARTUP: mDNS advertisement disabled: {}", e);
                None
            }
        }
    } else {
        None
    };

    tokio::spawn(wait_for_signal(shutdown_tx));
    info!("STARTUP: PID: {}", std::process::id());

    manager
        .run(inbound_rx, intent_rx, config.stream.poll_interval(), shutdown_rx)
        .await;

    // Manager is gone: its event sender is dropped and the sink drains
    if let Err(e) = server_task.await {
        error!("Control server task failed: {}", e);
    }
    let _ = sink_task.await;
    if let Some(advertiser) = advertiser {
        advertiser.shutdown();
    }

    tokio::time::sleep(SHUTDOWN_FLUSH).await;
    bus.disconnect().await;
    tokio::time::sleep(SHUTDOWN_FLUSH).await;
    bus_task.abort();

    info!("SHUTDOWN: thermocamd stopped");
    Ok(())
}

async fn wait_for_signal(shutdown: watch::Sender<bool>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("SIGTERM handler unavailable: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            let _ = shutdown.send(true);
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGNAL: SIGINT received"),
        _ = term.recv() => info!("SIGNAL: SIGTERM received"),
    }
    let _ = shutdown.send(true);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_subcommand_parses() {
        let cli = Cli::try_parse_from([
            "thermocamd",
            "worker",
            "--device-id",
            "cam1",
            "--url",
            "http://10.0.0.5:80/mjpeg/1",
            "--frame-rate",
            "15",
            "--queue-depth",
            "2",
        ])
        .unwrap();
        match cli.command {
            Some(Command::Worker {
                device_id,
                frame_rate,
                queue_depth,
                ..
            }) => {
                assert_eq!(device_id, "cam1");
                assert_eq!(frame_rate, 15);
                assert_eq!(queue_depth, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_overrides_applied() {
        let cli = Cli::try_parse_from([
            "thermocamd",
            "--broker-host",
            "mqtt.lan",
            "--broker-port",
            "1884",
            "--no-discovery",
            "--socket",
            "/tmp/tc.sock",
        ])
        .unwrap();
        let mut config = DaemonConfig::default();
        cli.overrides.apply(&mut config);

        assert_eq!(config.broker.host, "mqtt.lan");
        assert_eq!(config.broker.port, 1884);
        assert!(!config.discovery.enabled);
        assert_eq!(config.control.socket_path, PathBuf::from("/tmp/tc.sock"));
        assert!(config.output.snapshot_dir.is_none());
    }

    #[test]
    fn test_default_invocation_runs_daemon() {
        let cli = Cli::try_parse_from(["thermocamd"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }
}
