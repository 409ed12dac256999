//! Control Socket Server
//!
//! Line-delimited JSON over a Unix socket. Each request is forwarded to the
//! device manager as an [`Intent`] and answered with the manager's reply, in
//! order, on the same connection.
//!
//! # Limits
//! - socket mode 0660, symlinked paths refused
//! - at most 16 clients at once
//! - 30 s to send a request line, 10 s to take a reply
//! - request lines above `MAX_MESSAGE_SIZE` end the session

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use tc_core::{Result, ThermocamError};
use tc_protocol::{RequestEnvelope, Response, ResponseEnvelope, MAX_MESSAGE_SIZE};

use crate::manager::Intent;

const MAX_CONNECTIONS: usize = 16;

/// Time a client gets to send one request line
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Time a client gets to accept one reply
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a request may wait for the manager
const REPLY_TIMEOUT: Duration = Duration::from_secs(15);

const SOCKET_MODE: u32 = 0o660;

#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    /// A request line (without its newline) is in the buffer
    Line,
    Closed,
    TooLarge,
}

/// Read one newline-terminated line, never buffering more than `limit` bytes
async fn read_request_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    line: &mut Vec<u8>,
    limit: usize,
) -> std::io::Result<LineRead> {
    line.clear();
    let read = (&mut *reader).take(limit as u64 + 1).read_until(b'\n', line).await?;
    if read == 0 {
        return Ok(LineRead::Closed);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
    } else if line.len() > limit {
        return Ok(LineRead::TooLarge);
    }
    // An unterminated final line before EOF still counts as a request
    Ok(LineRead::Line)
}

// ============================================================================
// Server
// ============================================================================

/// A bound control socket; the file is removed on drop
pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
    intents: mpsc::Sender<Intent>,
    connections: Arc<AtomicUsize>,
}

impl ControlServer {
    /// Bind the socket, replacing a stale one
    pub fn bind(path: &Path, intents: mpsc::Sender<Intent>) -> Result<Self> {
        if let Ok(metadata) = path.symlink_metadata() {
            if metadata.file_type().is_symlink() {
                return Err(ThermocamError::SocketPath {
                    path: path.to_path_buf(),
                    reason: "it is a symlink",
                });
            }
            std::fs::remove_file(path)?;
            debug!("Removed stale socket {:?}", path);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(path)?;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))?;
        info!("STARTUP: control socket {:?} (mode {:o})", path, SOCKET_MODE);

        Ok(Self {
            listener,
            path: path.to_path_buf(),
            intents,
            connections: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept clients until shutdown is signalled
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut accepted: u64 = 0;
        loop {
            tokio::select! {
                result = self.listener.accept() => match result {
                    Ok((stream, _addr)) => {
                        let current = self.connections.load(Ordering::SeqCst);
                        if current >= MAX_CONNECTIONS {
                            warn!("Connection limit reached ({}), rejecting new connection", current);
                            continue;
                        }
                        accepted += 1;
                        self.connections.fetch_add(1, Ordering::SeqCst);
                        let connections = self.connections.clone();
                        let intents = self.intents.clone();
                        tokio::spawn(async move {
                            ClientSession::new(stream, intents).run().await;
                            connections.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                    Err(e) => error!("Accept error: {}", e),
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Control socket closed after {} connections", accepted);
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// One connected client
struct ClientSession {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    intents: mpsc::Sender<Intent>,
    /// Peer uid, when the kernel reports it
    uid: Option<u32>,
}

impl ClientSession {
    fn new(stream: UnixStream, intents: mpsc::Sender<Intent>) -> Self {
        let uid = match stream.peer_cred() {
            Ok(cred) => {
                debug!("Control client uid={} pid={:?}", cred.uid(), cred.pid());
                Some(cred.uid())
            }
            Err(e) => {
                debug!("Control client without credentials: {}", e);
                None
            }
        };
        let (reader, writer) = stream.into_split();
        Self {
            reader: BufReader::new(reader),
            writer,
            intents,
            uid,
        }
    }

    /// Serve requests until the client leaves or breaks a limit
    async fn run(mut self) {
        let opened = Instant::now();
        let mut line = Vec::with_capacity(1024);
        let mut served: u64 = 0;

        loop {
            let read = timeout(
                READ_TIMEOUT,
                read_request_line(&mut self.reader, &mut line, MAX_MESSAGE_SIZE),
            )
            .await;

            let (reply, keep_open) = match read {
                Ok(Ok(LineRead::Line)) => {
                    served += 1;
                    trace!("Request #{} from uid={:?}: {} bytes", served, self.uid, line.len());
                    let reply = match std::str::from_utf8(&line) {
                        Ok(text) => process_request(text, &self.intents).await,
                        Err(_) => ResponseEnvelope::new(0, Response::error("Invalid request encoding")),
                    };
                    (reply, true)
                }
                Ok(Ok(LineRead::Closed)) => break,
                Ok(Ok(LineRead::TooLarge)) => {
                    warn!("Request over {} bytes from uid={:?}", MAX_MESSAGE_SIZE, self.uid);
                    (ResponseEnvelope::new(0, Response::error("Message too large")), false)
                }
                Ok(Err(e)) => {
                    error!("Read error from uid={:?}: {}", self.uid, e);
                    break;
                }
                Err(_) => {
                    debug!("Read timeout for uid={:?}", self.uid);
                    (ResponseEnvelope::new(0, Response::error("Read timeout")), false)
                }
            };

            if let Err(e) = self.reply(&reply).await {
                warn!("Reply to uid={:?} failed: {}", self.uid, e);
                break;
            }
            if !keep_open {
                break;
            }
        }

        debug!(
            "Control client uid={:?} left after {} requests ({:?})",
            self.uid,
            served,
            opened.elapsed()
        );
    }

    async fn reply(&mut self, envelope: &ResponseEnvelope) -> std::io::Result<()> {
        let mut bytes = serde_json::to_vec(envelope)?;
        bytes.push(b'\n');
        timeout(WRITE_TIMEOUT, self.writer.write_all(&bytes))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "reply timed out"))?
    }
}

/// Parse, validate and dispatch one request line
async fn process_request(line: &str, intents: &mpsc::Sender<Intent>) -> ResponseEnvelope {
    let envelope: RequestEnvelope = match serde_json::from_str(line.trim()) {
        Ok(e) => e,
        Err(e) => {
            debug!("Invalid request: {}", e);
            return ResponseEnvelope::new(0, Response::error("Invalid request format"));
        }
    };

    let id = envelope.id;
    let request = envelope.request;
    if let Err(e) = request.validate() {
        debug!("Rejected {}: {}", request.type_name(), e);
        return ResponseEnvelope::new(id, Response::error(e));
    }

    let name = request.type_name();
    let (intent, reply) = Intent::new(request);
    if intents.send(intent).await.is_err() {
        return ResponseEnvelope::new(id, Response::error("Daemon is shutting down"));
    }

    let response = match timeout(REPLY_TIMEOUT, reply).await {
        Ok(Ok(response)) => response,
        Ok(Err(_)) => Response::error("Request dropped"),
        Err(_) => {
            warn!("{} timed out after {:?}", name, REPLY_TIMEOUT);
            Response::error("Request timed out")
        }
    };
    ResponseEnvelope::new(id, response)
}
