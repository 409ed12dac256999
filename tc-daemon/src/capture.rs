//! Video capture sources for the stream worker
//!
//! Devices serve multipart MJPEG over HTTP. Rather than parse multipart
//! boundaries, the reader scans the byte stream for JPEG start/end markers,
//! which also copes with cameras that send sloppy part headers.

use image::{ImageFormat, RgbImage};
use std::io::Read;
use std::time::Duration;
use tracing::{debug, warn};

use tc_core::constants::stream::{CONNECT_TIMEOUT, MAX_JPEG_SIZE, READ_TIMEOUT};
use tc_core::{Result, ThermocamError};

const READ_CHUNK: usize = 16 * 1024;
const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

/// Something that yields frames
///
/// Fetching and decoding are separate so frames skipped by the rate cap are
/// never decoded.
pub trait FrameSource {
    type Frame;

    /// Next frame as delivered by the source; `Ok(None)` when the stream has ended
    fn next_frame(&mut self) -> Result<Option<Self::Frame>>;

    fn decode(&self, frame: Self::Frame) -> Result<RgbImage>;
}

/// Incremental JPEG extractor for an MJPEG byte stream
#[derive(Debug, Default)]
pub struct MjpegParser {
    buf: Vec<u8>,
}

impl MjpegParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete JPEG image, if one is buffered
    pub fn next_jpeg(&mut self) -> Option<Vec<u8>> {
        let Some(start) = find(&self.buf, &SOI, 0) else {
            // Keep a trailing 0xFF in case the marker is split across reads
            let keep = usize::from(self.buf.last() == Some(&0xFF));
            let cut = self.buf.len() - keep;
            self.buf.drain(..cut);
            return None;
        };
        if start > 0 {
            self.buf.drain(..start);
        }

        match find(&self.buf, &EOI, SOI.len()) {
            Some(end) => {
                let jpeg: Vec<u8> = self.buf.drain(..end + EOI.len()).collect();
                Some(jpeg)
            }
            None => {
                if self.buf.len() > MAX_JPEG_SIZE {
                    warn!("STREAM: discarding {} bytes without an end marker", self.buf.len());
                    self.buf.clear();
                }
                None
            }
        }
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

fn find(haystack: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    if haystack.len() < from + needle.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

pub fn decode_jpeg(bytes: &[u8]) -> Result<RgbImage> {
    image::load_from_memory_with_format(bytes, ImageFormat::Jpeg)
        .map(|img| img.to_rgb8())
        .map_err(|e| ThermocamError::Capture(format!("JPEG decode failed: {}", e)))
}

/// Frames pulled out of any byte reader carrying MJPEG
pub struct MjpegReader<R> {
    reader: R,
    parser: MjpegParser,
    chunk: Vec<u8>,
}

impl<R: Read> MjpegReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            parser: MjpegParser::new(),
            chunk: vec![0u8; READ_CHUNK],
        }
    }
}

impl<R: Read> FrameSource for MjpegReader<R> {
    type Frame = Vec<u8>;

    fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(jpeg) = self.parser.next_jpeg() {
                return Ok(Some(jpeg));
            }
            let n = self
                .reader
                .read(&mut self.chunk)
                .map_err(|e| ThermocamError::Capture(e.to_string()))?;
            if n == 0 {
                return Ok(None);
            }
            self.parser.feed(&self.chunk[..n]);
        }
    }

    fn decode(&self, jpeg: Vec<u8>) -> Result<RgbImage> {
        decode_jpeg(&jpeg)
    }
}

/// Open an HTTP MJPEG stream
pub fn open_mjpeg(url: &str) -> Result<MjpegReader<reqwest::blocking::Response>> {
    open_mjpeg_with_timeout(url, READ_TIMEOUT)
}

/// Open an HTTP MJPEG stream that fails once a single read stalls for `read_timeout`
pub fn open_mjpeg_with_timeout(
    url: &str,
    read_timeout: Duration,
) -> Result<MjpegReader<reqwest::blocking::Response>> {
    let open_err = |reason: String| ThermocamError::CaptureOpen {
        url: url.to_string(),
        reason,
    };

    // The blocking client applies `timeout` to each body read, not to the
    // whole endless response
    let client = reqwest::blocking::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(read_timeout)
        .build()
        .map_err(|e| open_err(e.to_string()))?;

    let response = client.get(url).send().map_err(|e| open_err(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(open_err(format!("HTTP {}", status)));
    }

    debug!("STREAM: opened {} ({})", url, status);
    Ok(MjpegReader::new(response))
}
