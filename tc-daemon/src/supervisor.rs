//! Stream Supervisor
//!
//! Keeps at most one capture worker process per device. Workers are spawned
//! lazily on the first `play`; later commands go over the worker's stdin.
//!
//! # Channels per worker
//! - frames: a bounded drop-oldest queue filled by a reader task
//! - events: an unbounded channel (low volume)
//!
//! Commands travel the other way through a bounded channel drained by a
//! writer task, so a worker that stops reading its stdin never blocks the
//! caller. A full backlog marks the worker as stalled.
//!
//! `poll()` drains both; only the newest frame of each worker is returned.
//! `stop_stream()` asks politely, waits for the grace period, then kills.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use tc_core::config::StreamConfig;
use tc_core::constants::stream::video_source_url;
use tc_core::{Result, ThermocamError};
use tc_protocol::worker::{
    parse_header, FrameData, Packet, WorkerCommand, WorkerEvent, WorkerUpdate, HEADER_LEN,
};

use crate::frame_queue::FrameQueue;

/// Command lines buffered per worker before it counts as stalled
const CONTROL_BACKLOG: usize = 32;

/// Everything a worker process needs to know at spawn time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub device_id: String,
    pub url: String,
    pub frame_rate: u32,
    pub queue_depth: usize,
}

/// Starts worker processes
///
/// The returned child must have piped stdin and stdout.
pub trait WorkerLauncher: Send + Sync {
    fn launch(&self, spec: &LaunchSpec) -> std::io::Result<Child>;
}

/// Re-executes the daemon binary in worker mode
pub struct ProcessLauncher {
    exe: PathBuf,
}

impl ProcessLauncher {
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self { exe: exe.into() }
    }

    pub fn current_exe() -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, spec: &LaunchSpec) -> std::io::Result<Child> {
        Command::new(&self.exe)
            .arg("worker")
            .arg("--device-id")
            .arg(&spec.device_id)
            .arg("--url")
            .arg(&spec.url)
            .arg("--frame-rate")
            .arg(spec.frame_rate.to_string())
            .arg("--queue-depth")
            .arg(spec.queue_depth.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
    }
}

struct WorkerHandle {
    child: Child,
    control: mpsc::Sender<String>,
    frames: Arc<FrameQueue<FrameData>>,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    /// Supervisor-side failures injected next to the worker's own events
    failures: mpsc::UnboundedSender<WorkerEvent>,
    stalled: bool,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// Output of one polling pass
#[derive(Debug, Default)]
pub struct PollResult {
    /// Newest frame per worker
    pub frames: Vec<(String, FrameData)>,
    /// Lifecycle events in arrival order per worker
    pub events: Vec<(String, WorkerEvent)>,
}

impl PollResult {
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() && self.events.is_empty()
    }
}

pub struct StreamSupervisor {
    launcher: Arc<dyn WorkerLauncher>,
    workers: HashMap<String, WorkerHandle>,
    mjpeg_port: u16,
    frame_rate: u32,
    queue_depth: usize,
    stop_grace: Duration,
}

impl StreamSupervisor {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, config: &StreamConfig) -> Self {
        Self {
            launcher,
            workers: HashMap::new(),
            mjpeg_port: config.mjpeg_port,
            frame_rate: config.frame_rate,
            queue_depth: config.queue_depth,
            stop_grace: config.stop_grace(),
        }
    }

    pub fn is_streaming(&self, device_id: &str) -> bool {
        self.workers.contains_key(device_id)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Start (or resume) streaming for a device
    pub fn start_stream(&mut self, device_id: &str, address: &str) -> Result<()> {
        if !self.workers.contains_key(device_id) {
            let handle = self.spawn(device_id, address)?;
            self.workers.insert(device_id.to_string(), handle);
        }
        self.send(device_id, &WorkerCommand::Play)
    }

    pub fn pause_stream(&mut self, device_id: &str) -> Result<()> {
        if !self.workers.contains_key(device_id) {
            return Ok(());
        }
        self.send(device_id, &WorkerCommand::Pause)
    }

    /// Push matrix/zones/settings to a running worker; no-op without one
    pub fn send_update(&mut self, device_id: &str, update: WorkerUpdate) -> Result<()> {
        if update.is_empty() || !self.workers.contains_key(device_id) {
            return Ok(());
        }
        self.send(device_id, &WorkerCommand::Update(update))
    }

    /// Stop a worker: `stop`, bounded wait, then forced kill
    ///
    /// Returns false if no worker was running for the device.
    pub async fn stop_stream(&mut self, device_id: &str) -> bool {
        let Some(mut handle) = self.workers.remove(device_id) else {
            return false;
        };

        // The grace period starts whether or not the stop line fits
        if let Ok(line) = WorkerCommand::Stop.to_line() {
            if let Err(e) = handle.control.try_send(line) {
                debug!("STREAM: stop not queued for {}: {}", device_id, e);
            }
        }
        // Closing the channel ends the writer, which closes stdin
        drop(handle.control);

        match timeout(self.stop_grace, handle.child.wait()).await {
            Ok(Ok(status)) => debug!("STREAM: worker {} exited ({})", device_id, status),
            Ok(Err(e)) => warn!("STREAM: waiting for worker {} failed: {}", device_id, e),
            Err(_) => {
                warn!(
                    "STREAM: worker {} ignored stop for {:?}, killing",
                    device_id, self.stop_grace
                );
                if let Err(e) = handle.child.kill().await {
                    warn!("STREAM: kill of worker {} failed: {}", device_id, e);
                }
            }
        }

        handle.writer.abort();
        handle.reader.abort();
        handle.frames.close();
        info!("STREAM: stopped {}", device_id);
        true
    }

    pub async fn stop_all(&mut self) {
        let ids: Vec<String> = self.workers.keys().cloned().collect();
        for id in ids {
            self.stop_stream(&id).await;
        }
    }

    /// Drain every worker's frame queue and event channel
    pub fn poll(&mut self) -> PollResult {
        let mut result = PollResult::default();
        for (id, handle) in self.workers.iter_mut() {
            if let Some(frame) = handle.frames.drain_latest() {
                result.frames.push((id.clone(), frame));
            }
            while let Ok(event) = handle.events.try_recv() {
                result.events.push((id.clone(), event));
            }
        }
        result
    }

    fn spawn(&self, device_id: &str, address: &str) -> Result<WorkerHandle> {
        let spec = LaunchSpec {
            device_id: device_id.to_string(),
            url: video_source_url(address, self.mjpeg_port),
            frame_rate: self.frame_rate,
            queue_depth: self.queue_depth,
        };
        let spawn_err = |reason: String| ThermocamError::WorkerSpawn {
            device_id: device_id.to_string(),
            reason,
        };

        let mut child = self.launcher.launch(&spec).map_err(|e| spawn_err(e.to_string()))?;
        let stdin = child.stdin.take().ok_or_else(|| spawn_err("stdin not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_err("stdout not piped".into()))?;

        let frames = Arc::new(FrameQueue::new(self.queue_depth));
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_worker_output(
            device_id.to_string(),
            stdout,
            frames.clone(),
            tx.clone(),
        ));
        let (control, commands) = mpsc::channel(CONTROL_BACKLOG);
        let writer = tokio::spawn(write_worker_commands(device_id.to_string(), stdin, commands));

        info!(
            "STREAM: spawned worker for {} (pid {:?}, {})",
            device_id,
            child.id(),
            spec.url
        );
        Ok(WorkerHandle {
            child,
            control,
            frames,
            events: rx,
            failures: tx,
            stalled: false,
            reader,
            writer,
        })
    }

    /// Queue a command line for the worker's writer task; never waits
    fn send(&mut self, device_id: &str, cmd: &WorkerCommand) -> Result<()> {
        let handle = self
            .workers
            .get_mut(device_id)
            .ok_or_else(|| ThermocamError::UnknownDevice(device_id.to_string()))?;

        let line = cmd.to_line().map_err(ThermocamError::worker_protocol)?;
        match handle.control.try_send(line) {
            Ok(()) => {
                trace!("STREAM: queued {} for {}", cmd.type_name(), device_id);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                if !handle.stalled {
                    handle.stalled = true;
                    warn!("STREAM: worker {} stopped reading commands", device_id);
                    let _ = handle.failures.send(WorkerEvent::error(STALLED_MESSAGE));
                }
                Err(ThermocamError::worker_protocol(format!(
                    "{} to {}: {}",
                    cmd.type_name(),
                    device_id,
                    STALLED_MESSAGE
                )))
            }
            Err(TrySendError::Closed(_)) => Err(ThermocamError::worker_protocol(format!(
                "{} to {}: control channel closed",
                cmd.type_name(),
                device_id
            ))),
        }
    }
}

const STALLED_MESSAGE: &str = "worker stopped reading commands";

/// Write queued command lines to a worker's stdin until the channel closes
async fn write_worker_commands(
    device_id: String,
    mut stdin: ChildStdin,
    mut commands: mpsc::Receiver<String>,
) {
    while let Some(line) = commands.recv().await {
        let written = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            debug!("STREAM: control channel of {} closed: {}", device_id, e);
            return;
        }
    }
}

/// Move packets from a worker's stdout into its frame queue and event channel
async fn read_worker_output(
    device_id: String,
    mut stdout: ChildStdout,
    frames: Arc<FrameQueue<FrameData>>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    let mut finished = false;
    let mut header = [0u8; HEADER_LEN];

    let failure = loop {
        match stdout.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break None,
            Err(e) => break Some(format!("worker output failed: {}", e)),
        }
        let (tag, len) = match parse_header(header) {
            Ok(parsed) => parsed,
            Err(e) => break Some(format!("worker protocol error: {}", e)),
        };
        let mut body = vec![0u8; len];
        if let Err(e) = stdout.read_exact(&mut body).await {
            break Some(format!("worker output truncated: {}", e));
        }
        match Packet::decode(tag, &body) {
            Ok(Packet::Frame(frame)) => {
                frames.push(frame);
            }
            Ok(Packet::Event(event)) => {
                if matches!(event, WorkerEvent::Stopped | WorkerEvent::Error { .. }) {
                    finished = true;
                }
                if events.send(event).is_err() {
                    return;
                }
            }
            Err(e) => break Some(format!("worker protocol error: {}", e)),
        }
    };

    match failure {
        Some(message) => {
            warn!("STREAM: {}: {}", device_id, message);
            let _ = events.send(WorkerEvent::error(message));
        }
        None if !finished => {
            warn!("STREAM: worker for {} exited without notice", device_id);
            let _ = events.send(WorkerEvent::error("worker exited unexpectedly"));
        }
        None => debug!("STREAM: output of {} closed", device_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    /// Runs a shell snippet in place of the worker binary
    struct ShellLauncher {
        script: &'static str,
    }

    impl WorkerLauncher for ShellLauncher {
        fn launch(&self, _spec: &LaunchSpec) -> std::io::Result<Child> {
            Command::new("sh")
                .arg("-c")
                .arg(self.script)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()
        }
    }

    struct FailingLauncher;

    impl WorkerLauncher for FailingLauncher {
        fn launch(&self, _spec: &LaunchSpec) -> std::io::Result<Child> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no such binary"))
        }
    }

    fn supervisor(launcher: impl WorkerLauncher + 'static, grace_ms: u64) -> StreamSupervisor {
        let config = StreamConfig {
            stop_grace_ms: grace_ms,
            ..StreamConfig::default()
        };
        StreamSupervisor::new(Arc::new(launcher), &config)
    }

    async fn poll_until<F: Fn(&PollResult) -> bool>(sup: &mut StreamSupervisor, done: F) -> PollResult {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut merged = PollResult::default();
        while Instant::now() < deadline {
            let r = sup.poll();
            merged.frames.extend(r.frames);
            merged.events.extend(r.events);
            if done(&merged) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        merged
    }

    #[tokio::test]
    async fn test_stop_kills_unresponsive_worker() {
        let mut sup = supervisor(ShellLauncher { script: "exec sleep 30" }, 200);
        sup.start_stream("cam1", "10.0.0.5").unwrap();
        assert!(sup.is_streaming("cam1"));

        let started = Instant::now();
        assert!(sup.stop_stream("cam1").await);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(150), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(3), "{:?}", elapsed);
        assert!(!sup.is_streaming("cam1"));
        assert!(!sup.stop_stream("cam1").await);
    }

    #[tokio::test]
    async fn test_worker_ignoring_stdin_does_not_block_sends() {
        let mut sup = supervisor(ShellLauncher { script: "exec sleep 30" }, 200);
        sup.start_stream("cam1", "10.0.0.5").unwrap();

        let matrix = [[21.5f32; 8]; 8];
        let failed = timeout(Duration::from_secs(5), async {
            let mut failed = 0;
            for _ in 0..2000 {
                if sup.send_update("cam1", WorkerUpdate::matrix(matrix)).is_err() {
                    failed += 1;
                }
                tokio::task::yield_now().await;
            }
            failed
        })
        .await
        .expect("updates must not block on a full pipe");
        assert!(failed > 0);

        let result = poll_until(&mut sup, |r| !r.events.is_empty()).await;
        assert_eq!(
            result.events,
            vec![("cam1".to_string(), WorkerEvent::error(STALLED_MESSAGE))]
        );

        let stopped = timeout(Duration::from_secs(5), sup.stop_stream("cam1")).await;
        assert_eq!(stopped.ok(), Some(true));
        assert!(!sup.is_streaming("cam1"));
    }

    #[tokio::test]
    async fn test_cooperative_worker_exits_within_grace() {
        let mut sup = supervisor(ShellLauncher { script: "while read line; do :; done" }, 2000);
        sup.start_stream("cam1", "10.0.0.5").unwrap();

        let started = Instant::now();
        assert!(sup.stop_stream("cam1").await);
        assert!(started.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_unexpected_exit_surfaces_error() {
        let mut sup = supervisor(ShellLauncher { script: "read line; exit 0" }, 200);
        sup.start_stream("cam1", "10.0.0.5").unwrap();

        let result = poll_until(&mut sup, |r| !r.events.is_empty()).await;
        assert_eq!(
            result.events,
            vec![("cam1".to_string(), WorkerEvent::error("worker exited unexpectedly"))]
        );
        sup.stop_all().await;
        assert_eq!(sup.worker_count(), 0);
    }

    #[tokio::test]
    async fn test_frames_and_events_forwarded() {
        // Frame packet: 1x1 pixel (1,2,3); then a started event; then idle
        let script = r#"printf '\002\013\000\000\000\001\000\000\000\001\000\000\000\001\002\003'
printf '\001\023\000\000\000{"event":"started"}'
exec sleep 30"#;
        let mut sup = supervisor(ShellLauncher { script }, 200);
        sup.start_stream("cam1", "10.0.0.5").unwrap();

        let result = poll_until(&mut sup, |r| !r.frames.is_empty() && !r.events.is_empty()).await;
        assert_eq!(result.frames.len(), 1);
        assert_eq!(result.frames[0].1, FrameData::new(1, 1, vec![1, 2, 3]).unwrap());
        assert_eq!(result.events, vec![("cam1".to_string(), WorkerEvent::Started)]);

        sup.stop_stream("cam1").await;
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let mut sup = supervisor(FailingLauncher, 200);
        let err = sup.start_stream("cam1", "10.0.0.5").unwrap_err();
        assert!(matches!(err, ThermocamError::WorkerSpawn { .. }));
        assert!(!sup.is_streaming("cam1"));
    }

    #[tokio::test]
    async fn test_commands_without_worker_are_noops() {
        let mut sup = supervisor(FailingLauncher, 200);
        sup.pause_stream("cam1").unwrap();
        sup.send_update("cam1", WorkerUpdate::matrix([[0.0; 8]; 8])).unwrap();
        assert!(sup.poll().is_empty());
    }
}
