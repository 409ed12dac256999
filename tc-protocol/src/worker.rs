//! Supervisor <-> capture worker protocol
//!
//! Commands travel to the worker as JSON lines on its stdin:
//!
//! ```text
//! {"cmd":"play"}
//! {"cmd":"update","data":{"settings":{...}}}
//! ```
//!
//! Events and frames travel back on stdout as binary packets:
//!
//! ```text
//! [tag: u8][len: u32 LE][body: len bytes]
//! tag 1: JSON WorkerEvent
//! tag 2: [width: u32 LE][height: u32 LE][RGB8 pixels]
//! ```

use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};

use tc_core::{AlertZone, ProcessingSettings, ThermalMatrix};

/// Largest packet body accepted from a worker (a 4K RGB frame fits)
pub const MAX_PACKET_SIZE: usize = 32 * 1024 * 1024;

/// Largest command line accepted by a worker
pub const MAX_COMMAND_SIZE: usize = 256 * 1024;

pub const TAG_EVENT: u8 = 1;
pub const TAG_FRAME: u8 = 2;

/// `[tag][len u32 LE]`
pub const HEADER_LEN: usize = 5;
const FRAME_HEADER_LEN: usize = 8;

/// Control message for a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "data", rename_all = "lowercase")]
pub enum WorkerCommand {
    Play,
    Pause,
    Stop,
    Update(WorkerUpdate),
}

impl WorkerCommand {
    /// Single JSON line including the trailing newline
    pub fn to_line(&self) -> Result<String, String> {
        let mut line = serde_json::to_string(self).map_err(|e| e.to_string())?;
        line.push('\n');
        Ok(line)
    }

    pub fn from_line(line: &str) -> Result<Self, String> {
        if line.len() > MAX_COMMAND_SIZE {
            return Err(format!("command too large: {} bytes", line.len()));
        }
        serde_json::from_str(line.trim()).map_err(|e| format!("invalid command: {}", e))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            WorkerCommand::Play => "play",
            WorkerCommand::Pause => "pause",
            WorkerCommand::Stop => "stop",
            WorkerCommand::Update(_) => "update",
        }
    }
}

/// Structured state pushed to a worker; absent fields are left unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matrix: Option<ThermalMatrix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zones: Option<Vec<AlertZone>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<ProcessingSettings>,
}

impl WorkerUpdate {
    pub fn settings(settings: ProcessingSettings) -> Self {
        Self { settings: Some(settings), ..Self::default() }
    }

    pub fn zones(zones: Vec<AlertZone>) -> Self {
        Self { zones: Some(zones), ..Self::default() }
    }

    pub fn matrix(matrix: ThermalMatrix) -> Self {
        Self { matrix: Some(matrix), ..Self::default() }
    }

    pub fn is_empty(&self) -> bool {
        self.matrix.is_none() && self.zones.is_none() && self.settings.is_none()
    }
}

/// Lifecycle event reported by a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum WorkerEvent {
    Started,
    Paused,
    Resumed,
    Stopped,
    Error { message: String },
}

impl WorkerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        WorkerEvent::Error { message: message.into() }
    }
}

/// One RGB8 video frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameData {
    pub width: u32,
    pub height: u32,
    pub rgb: Vec<u8>,
}

impl FrameData {
    pub fn new(width: u32, height: u32, rgb: Vec<u8>) -> Result<Self, String> {
        let expected = width as usize * height as usize * 3;
        if rgb.len() != expected {
            return Err(format!(
                "frame {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                rgb.len()
            ));
        }
        Ok(Self { width, height, rgb })
    }
}

/// A packet on the worker's stdout
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Event(WorkerEvent),
    Frame(FrameData),
}

impl Packet {
    /// Serialize with header
    pub fn encode(&self) -> Result<Vec<u8>, String> {
        let (tag, body) = match self {
            Packet::Event(event) => (
                TAG_EVENT,
                serde_json::to_vec(event).map_err(|e| e.to_string())?,
            ),
            Packet::Frame(frame) => {
                let mut body = Vec::with_capacity(FRAME_HEADER_LEN + frame.rgb.len());
                body.extend_from_slice(&frame.width.to_le_bytes());
                body.extend_from_slice(&frame.height.to_le_bytes());
                body.extend_from_slice(&frame.rgb);
                (TAG_FRAME, body)
            }
        };
        if body.len() > MAX_PACKET_SIZE {
            return Err(format!(
                "packet too large: {} bytes (max {})",
                body.len(),
                MAX_PACKET_SIZE
            ));
        }
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.push(tag);
        out.extend_from_slice(&(body.len() as u32).to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode a packet body for a given tag
    pub fn decode(tag: u8, body: &[u8]) -> Result<Self, String> {
        match tag {
            TAG_EVENT => serde_json::from_slice(body)
                .map(Packet::Event)
                .map_err(|e| format!("invalid event: {}", e)),
            TAG_FRAME => {
                if body.len() < FRAME_HEADER_LEN {
                    return Err("frame packet too short".into());
                }
                let width = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
                let height = u32::from_le_bytes([body[4], body[5], body[6], body[7]]);
                FrameData::new(width, height, body[FRAME_HEADER_LEN..].to_vec()).map(Packet::Frame)
            }
            other => Err(format!("unknown packet tag {}", other)),
        }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let bytes = self
            .encode()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writer.write_all(&bytes)?;
        writer.flush()
    }
}

/// Parse a packet header into `(tag, body length)`
pub fn parse_header(header: [u8; HEADER_LEN]) -> Result<(u8, usize), String> {
    let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if len > MAX_PACKET_SIZE {
        return Err(format!("packet too large: {} bytes (max {})", len, MAX_PACKET_SIZE));
    }
    Ok((header[0], len))
}

/// Blocking read of one packet; `Ok(None)` on clean end of stream
pub fn read_packet<R: Read>(reader: &mut R) -> io::Result<Option<Packet>> {
    let mut header = [0u8; HEADER_LEN];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let (tag, len) = parse_header(header).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body)?;
    Packet::decode(tag, &body)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tc_core::{NormPoint, OverlayMode};

    #[test]
    fn test_command_wire_format() {
        assert_eq!(WorkerCommand::Play.to_line().unwrap(), "{\"cmd\":\"play\"}\n");
        assert_eq!(WorkerCommand::from_line("{\"cmd\":\"stop\"}\n").unwrap(), WorkerCommand::Stop);

        let update = WorkerCommand::Update(WorkerUpdate::settings(ProcessingSettings {
            overlay_mode: OverlayMode::Thermal,
            ..Default::default()
        }));
        let line = update.to_line().unwrap();
        assert!(line.starts_with("{\"cmd\":\"update\",\"data\":{\"settings\""));
        assert_eq!(WorkerCommand::from_line(&line).unwrap(), update);
    }

    #[test]
    fn test_update_with_zones_and_matrix() {
        let update = WorkerUpdate {
            matrix: Some([[21.5; 8]; 8]),
            zones: Some(vec![AlertZone::point(NormPoint::new(0.5, 0.5))]),
            settings: None,
        };
        let line = WorkerCommand::Update(update.clone()).to_line().unwrap();
        match WorkerCommand::from_line(&line).unwrap() {
            WorkerCommand::Update(back) => assert_eq!(back, update),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_bad_command_rejected() {
        assert!(WorkerCommand::from_line("{\"cmd\":\"explode\"}").is_err());
        assert!(WorkerCommand::from_line("not json").is_err());
    }

    #[test]
    fn test_event_json() {
        let json = serde_json::to_string(&WorkerEvent::error("boom")).unwrap();
        assert_eq!(json, "{\"event\":\"error\",\"message\":\"boom\"}");
        assert_eq!(serde_json::to_string(&WorkerEvent::Started).unwrap(), "{\"event\":\"started\"}");
    }

    #[test]
    fn test_packet_stream() {
        let mut buf = Vec::new();
        Packet::Event(WorkerEvent::Started).write_to(&mut buf).unwrap();
        let frame = FrameData::new(2, 1, vec![1, 2, 3, 4, 5, 6]).unwrap();
        Packet::Frame(frame.clone()).write_to(&mut buf).unwrap();
        assert_eq!(buf[0], TAG_EVENT);

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_packet(&mut cursor).unwrap(), Some(Packet::Event(WorkerEvent::Started)));
        assert_eq!(read_packet(&mut cursor).unwrap(), Some(Packet::Frame(frame)));
        assert_eq!(read_packet(&mut cursor).unwrap(), None);
    }

    #[test]
    fn test_oversized_header_rejected() {
        let mut header = [TAG_FRAME, 0, 0, 0, 0];
        header[1..].copy_from_slice(&((MAX_PACKET_SIZE as u32) + 1).to_le_bytes());
        assert!(parse_header(header).is_err());
    }

    #[test]
    fn test_frame_size_mismatch() {
        assert!(FrameData::new(4, 4, vec![0; 10]).is_err());
        let mut body = Vec::new();
        body.extend_from_slice(&3u32.to_le_bytes());
        body.extend_from_slice(&3u32.to_le_bytes());
        body.extend_from_slice(&[0; 5]);
        assert!(Packet::decode(TAG_FRAME, &body).is_err());
        assert!(Packet::decode(9, &[]).is_err());
    }
}
