//! Capture worker process
//!
//! Runs as `thermocamd worker ...`, one process per streaming device.
//! Commands arrive as JSON lines on stdin; events and frames leave as binary
//! packets on stdout (see `tc_protocol::worker`). Logs go to stderr.
//!
//! Three threads:
//! - the capture loop, which owns the video source
//! - a stdin reader feeding a command channel the loop polls without blocking
//! - a stdout writer draining events and a drop-oldest frame queue

use std::io::{self, BufRead, Read, Write};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use tc_core::constants::stream::PAUSED_IDLE;
use tc_core::{AlertZone, ProcessingSettings, Result, ThermalMatrix, ThermocamError};
use tc_protocol::worker::{FrameData, Packet, WorkerCommand, WorkerEvent, WorkerUpdate, MAX_COMMAND_SIZE};

use crate::capture::{open_mjpeg, FrameSource};
use crate::frame_queue::FrameQueue;

/// How long the writer waits for a frame before rechecking events
const WRITER_IDLE: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub device_id: String,
    pub url: String,
    pub frame_rate: u32,
    pub queue_depth: usize,
}

impl WorkerOptions {
    pub fn min_frame_interval(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / u64::from(self.frame_rate.max(1)))
    }
}

/// Worker-local copy of the state pushed by the supervisor
#[derive(Debug, Clone, Default)]
pub struct WorkerState {
    pub paused: bool,
    pub matrix: Option<ThermalMatrix>,
    pub zones: Vec<AlertZone>,
    pub settings: ProcessingSettings,
}

impl WorkerState {
    fn new() -> Self {
        Self {
            paused: true,
            ..Self::default()
        }
    }

    pub fn apply(&mut self, update: WorkerUpdate) {
        if let Some(matrix) = update.matrix {
            self.matrix = Some(matrix);
        }
        if let Some(zones) = update.zones {
            self.zones = zones;
        }
        if let Some(settings) = update.settings {
            self.settings = settings;
        }
    }
}

/// Why the capture loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    Stopped,
    ControlClosed,
    StreamClosed,
    OutputClosed,
    Failed(String),
}

impl LoopExit {
    pub fn is_clean(&self) -> bool {
        matches!(self, LoopExit::Stopped | LoopExit::ControlClosed)
    }
}

/// Producer side of the worker's output
pub struct Outbox {
    events: Sender<WorkerEvent>,
    frames: Arc<FrameQueue<FrameData>>,
}

/// Consumer side, owned by the writer thread
pub struct OutboxReceiver {
    events: Receiver<WorkerEvent>,
    frames: Arc<FrameQueue<FrameData>>,
}

pub fn outbox(queue_depth: usize) -> (Outbox, OutboxReceiver) {
    let (tx, rx) = mpsc::channel();
    let frames = Arc::new(FrameQueue::new(queue_depth));
    (
        Outbox {
            events: tx,
            frames: frames.clone(),
        },
        OutboxReceiver { events: rx, frames },
    )
}

impl Outbox {
    pub fn event(&self, event: WorkerEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// False once the writer has gone away
    pub fn frame(&self, frame: FrameData) -> bool {
        self.frames.push(frame)
    }
}

impl Drop for Outbox {
    fn drop(&mut self) {
        self.frames.close();
    }
}

impl OutboxReceiver {
    pub fn frames(&self) -> &Arc<FrameQueue<FrameData>> {
        &self.frames
    }
}

/// Write packets until the outbox is dropped and drained
pub fn write_packets<W: Write>(out: &mut W, rx: &OutboxReceiver) -> io::Result<()> {
    loop {
        let mut events_done = false;
        loop {
            match rx.events.try_recv() {
                Ok(event) => Packet::Event(event).write_to(out)?,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    events_done = true;
                    break;
                }
            }
        }

        match rx.frames.pop_timeout(WRITER_IDLE) {
            Some(frame) => Packet::Frame(frame).write_to(out)?,
            None if events_done && rx.frames.is_closed() && rx.frames.is_empty() => return Ok(()),
            None => {}
        }
    }
}

/// Forward parsed command lines to the capture loop until EOF
pub fn read_commands<R: BufRead>(mut input: R, tx: Sender<WorkerCommand>) {
    let mut line = String::new();
    loop {
        line.clear();
        let limit = MAX_COMMAND_SIZE as u64 + 1;
        match input.by_ref().take(limit).read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => match WorkerCommand::from_line(&line) {
                Ok(cmd) => {
                    if tx.send(cmd).is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Ignoring command: {}", e),
            },
            Err(e) => {
                warn!("Command channel read failed: {}", e);
                break;
            }
        }
    }
    debug!("Command channel closed");
}

enum Flow {
    Continue,
    Stop,
}

/// The command/frame loop
pub struct StreamLoop<S> {
    device_id: String,
    source: S,
    commands: Receiver<WorkerCommand>,
    outbox: Outbox,
    state: WorkerState,
    min_interval: Duration,
    last_sent: Option<Instant>,
}

impl<S: FrameSource> StreamLoop<S> {
    pub fn new(
        device_id: impl Into<String>,
        source: S,
        commands: Receiver<WorkerCommand>,
        outbox: Outbox,
        min_interval: Duration,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            source,
            commands,
            outbox,
            state: WorkerState::new(),
            min_interval,
            last_sent: None,
        }
    }

    pub fn state(&self) -> &WorkerState {
        &self.state
    }

    /// Run until stopped or the stream fails; the source is released on return
    pub fn run(mut self) -> LoopExit {
        let exit = self.run_inner();
        if exit.is_clean() {
            self.outbox.event(WorkerEvent::Stopped);
        }
        info!("STREAM: {} loop exited: {:?}", self.device_id, exit);
        exit
    }

    fn run_inner(&mut self) -> LoopExit {
        loop {
            loop {
                match self.commands.try_recv() {
                    Ok(cmd) => {
                        if let Flow::Stop = self.handle(cmd) {
                            return LoopExit::Stopped;
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return LoopExit::ControlClosed,
                }
            }

            if self.state.paused {
                thread::sleep(PAUSED_IDLE);
                continue;
            }

            match self.source.next_frame() {
                Ok(Some(encoded)) => {
                    let now = Instant::now();
                    let due = self
                        .last_sent
                        .map_or(true, |t| now.duration_since(t) >= self.min_interval);
                    if !due {
                        continue;
                    }
                    let frame = match self.source.decode(encoded) {
                        Ok(frame) => frame,
                        Err(e) => {
                            debug!("Skipping corrupt frame: {}", e);
                            continue;
                        }
                    };
                    self.last_sent = Some(now);
                    let (width, height) = frame.dimensions();
                    let data = match FrameData::new(width, height, frame.into_raw()) {
                        Ok(data) => data,
                        Err(e) => {
                            warn!("Dropping frame: {}", e);
                            continue;
                        }
                    };
                    if !self.outbox.frame(data) {
                        return LoopExit::OutputClosed;
                    }
                }
                Ok(None) => {
                    self.outbox.event(WorkerEvent::error("stream closed"));
                    return LoopExit::StreamClosed;
                }
                Err(e) => {
                    let message = e.to_string();
                    self.outbox.event(WorkerEvent::error(message.clone()));
                    return LoopExit::Failed(message);
                }
            }
        }
    }

    fn handle(&mut self, cmd: WorkerCommand) -> Flow {
        debug!("Worker {} command: {}", self.device_id, cmd.type_name());
        match cmd {
            WorkerCommand::Play => {
                self.state.paused = false;
                self.outbox.event(WorkerEvent::Resumed);
            }
            WorkerCommand::Pause => {
                self.state.paused = true;
                self.outbox.event(WorkerEvent::Paused);
            }
            WorkerCommand::Stop => return Flow::Stop,
            WorkerCommand::Update(update) => self.state.apply(update),
        }
        Flow::Continue
    }
}

impl<S> Drop for StreamLoop<S> {
    fn drop(&mut self) {
        debug!("STREAM: capture released for {}", self.device_id);
    }
}

/// Ask the kernel to kill this process when the supervisor dies
#[cfg(target_os = "linux")]
fn set_parent_death_signal() {
    // SAFETY: prctl(PR_SET_PDEATHSIG) only takes integer arguments and affects this process.
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL as libc::c_ulong, 0, 0, 0) };
    if rc != 0 {
        warn!("PR_SET_PDEATHSIG failed: {}", io::Error::last_os_error());
    }
}

#[cfg(not(target_os = "linux"))]
fn set_parent_death_signal() {}

/// Worker process entry point
pub fn run_worker(opts: WorkerOptions) -> Result<()> {
    set_parent_death_signal();
    info!("STREAM: worker for {} starting ({})", opts.device_id, opts.url);

    let (out, rx) = outbox(opts.queue_depth);
    let writer = thread::Builder::new()
        .name("packet-writer".into())
        .spawn(move || {
            let mut stdout = io::BufWriter::new(io::stdout().lock());
            if let Err(e) = write_packets(&mut stdout, &rx) {
                error!("Packet writer failed: {}", e);
                rx.frames().close();
            }
        })?;

    let (cmd_tx, cmd_rx) = mpsc::channel();
    thread::Builder::new()
        .name("command-reader".into())
        .spawn(move || read_commands(io::stdin().lock(), cmd_tx))?;

    let result = match open_mjpeg(&opts.url) {
        Ok(source) => {
            out.event(WorkerEvent::Started);
            let stream = StreamLoop::new(
                opts.device_id.clone(),
                source,
                cmd_rx,
                out,
                opts.min_frame_interval(),
            );
            match stream.run() {
                LoopExit::Failed(message) => Err(ThermocamError::Capture(message)),
                _ => Ok(()),
            }
        }
        Err(e) => {
            error!("STREAM: {}", e);
            out.event(WorkerEvent::error(format!("Failed to open stream: {}", e)));
            drop(out);
            Err(e)
        }
    };

    if writer.join().is_err() {
        error!("Packet writer panicked");
    }
    result
}
