/*
 * This file is part of Thermocam.
 *
 * Copyright (C) 2025 Thermocam contributors
 *
 * Thermocam is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Thermocam is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Thermocam. If not, see <https://www.gnu.org/licenses/>.
 */

//! Control Socket Client
//!
//! Blocking client for the thermocamd control socket. One request in flight
//! per connection; responses are matched by envelope id.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tc_core::{AlertZone, ProcessingSettings, Result, ThermocamError, ZoneReading};
use tc_protocol::{
    generate_request_id, DeviceInfo, Request, RequestEnvelope, Response, ResponseData,
    ResponseEnvelope, MAX_MESSAGE_SIZE,
};

const TIMEOUT: Duration = Duration::from_secs(20);

/// Initial buffer size for responses
const INITIAL_BUFFER_SIZE: usize = 4096;

pub struct ControlClient {
    path: PathBuf,
    writer: UnixStream,
    reader: BufReader<UnixStream>,
}

impl ControlClient {
    pub fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ThermocamError::SocketMissing(path.to_path_buf()));
        }
        let conn_err = |e: std::io::Error| {
            ThermocamError::ControlConnection(format!("{}: {}", path.display(), e))
        };

        let stream = UnixStream::connect(path).map_err(conn_err)?;
        stream.set_read_timeout(Some(TIMEOUT)).map_err(conn_err)?;
        stream.set_write_timeout(Some(TIMEOUT)).map_err(conn_err)?;
        let reader_stream = stream.try_clone().map_err(conn_err)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: stream,
            reader: BufReader::new(reader_stream),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Send a request and wait for its response
    ///
    /// Daemon-side failures come back as `Ok(Response::Error)`.
    pub fn request(&mut self, req: Request) -> Result<Response> {
        req.validate().map_err(ThermocamError::Rejected)?;

        let request_id = generate_request_id();
        let envelope = RequestEnvelope::with_id(req, request_id);
        let mut json = serde_json::to_vec(&envelope)?;
        json.push(b'\n');
        if json.len() > MAX_MESSAGE_SIZE {
            return Err(ThermocamError::MessageTooLarge {
                size: json.len(),
                max_size: MAX_MESSAGE_SIZE,
            });
        }

        self.writer
            .write_all(&json)
            .map_err(|e| ThermocamError::ControlConnection(format!("send failed: {}", e)))?;

        let mut response_buf: Vec<u8> = Vec::with_capacity(INITIAL_BUFFER_SIZE);
        self.reader
            .read_until(b'\n', &mut response_buf)
            .map_err(|e| ThermocamError::ControlConnection(format!("read failed: {}", e)))?;
        if response_buf.is_empty() {
            return Err(ThermocamError::ControlConnection("Daemon closed connection".into()));
        }
        if response_buf.len() > MAX_MESSAGE_SIZE {
            return Err(ThermocamError::MessageTooLarge {
                size: response_buf.len(),
                max_size: MAX_MESSAGE_SIZE,
            });
        }

        if response_buf.last() == Some(&b'\n') {
            response_buf.pop();
        }
        let response: ResponseEnvelope = serde_json::from_slice(&response_buf)
            .map_err(|e| ThermocamError::ControlProtocol(format!("bad response: {}", e)))?;
        if response.id != request_id {
            return Err(ThermocamError::ControlProtocol(format!(
                "Response ID mismatch: expected {}, got {}",
                request_id, response.id
            )));
        }

        verify_response_type(&envelope.request, &response.response)?;
        Ok(response.response)
    }

    /// Like [`request`](Self::request), with daemon errors turned into `Err`
    fn call(&mut self, req: Request) -> Result<ResponseData> {
        match self.request(req)? {
            Response::Ok(data) => Ok(data),
            Response::Error { message } => Err(ThermocamError::Rejected(message)),
        }
    }

    pub fn ping(&mut self) -> Result<()> {
        self.call(Request::Ping).map(|_| ())
    }

    pub fn version(&mut self) -> Result<String> {
        self.call(Request::Version)?
            .value
            .ok_or_else(|| unexpected("Version"))
    }

    pub fn list_devices(&mut self) -> Result<Vec<DeviceInfo>> {
        self.call(Request::ListDevices)?
            .devices
            .ok_or_else(|| unexpected("ListDevices"))
    }

    pub fn get_device(&mut self, id: &str) -> Result<DeviceInfo> {
        self.call(Request::GetDevice { id: id.into() })?
            .device
            .ok_or_else(|| unexpected("GetDevice"))
    }

    pub fn start_device(&mut self, id: &str) -> Result<()> {
        self.call(Request::StartDevice { id: id.into() }).map(|_| ())
    }

    pub fn stop_device(&mut self, id: &str) -> Result<()> {
        self.call(Request::StopDevice { id: id.into() }).map(|_| ())
    }

    pub fn remove_device(&mut self, id: &str) -> Result<()> {
        self.call(Request::RemoveDevice { id: id.into() }).map(|_| ())
    }

    pub fn rename_device(&mut self, id: &str, name: &str) -> Result<DeviceInfo> {
        self.call(Request::RenameDevice {
            id: id.into(),
            name: name.into(),
        })?
        .device
        .ok_or_else(|| unexpected("RenameDevice"))
    }

    pub fn set_zones(&mut self, id: &str, zones: Vec<AlertZone>) -> Result<DeviceInfo> {
        self.call(Request::SetZones { id: id.into(), zones })?
            .device
            .ok_or_else(|| unexpected("SetZones"))
    }

    pub fn set_settings(&mut self, id: &str, settings: ProcessingSettings) -> Result<DeviceInfo> {
        self.call(Request::SetSettings {
            id: id.into(),
            settings,
        })?
        .device
        .ok_or_else(|| unexpected("SetSettings"))
    }

    pub fn get_readings(&mut self, id: &str) -> Result<Vec<ZoneReading>> {
        self.call(Request::GetReadings { id: id.into() })?
            .readings
            .ok_or_else(|| unexpected("GetReadings"))
    }
}

fn unexpected(request: &str) -> ThermocamError {
    ThermocamError::ControlProtocol(format!("Unexpected response type for {}", request))
}

/// Verify that response type matches the request
fn verify_response_type(req: &Request, resp: &Response) -> Result<()> {
    let Response::Ok(data) = resp else {
        return Ok(());
    };
    let valid = match req {
        Request::Ping | Request::Version => data.value.is_some(),
        Request::ListDevices => data.devices.is_some(),
        Request::GetDevice { .. }
        | Request::RenameDevice { .. }
        | Request::SetZones { .. }
        | Request::SetSettings { .. } => data.device.is_some(),
        Request::GetReadings { .. } => data.readings.is_some(),
        Request::StartDevice { .. } | Request::StopDevice { .. } | Request::RemoveDevice { .. } => true,
    };
    if valid {
        Ok(())
    } else {
        Err(ThermocamError::ControlProtocol(format!(
            "Response type mismatch for {}",
            req.type_name()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use std::thread;
    use tempfile::TempDir;

    /// One-connection server answering each line with `reply(envelope)`
    fn serve<F>(dir: &TempDir, reply: F) -> PathBuf
    where
        F: Fn(RequestEnvelope) -> String + Send + 'static,
    {
        let path = dir.path().join("tc.sock");
        let listener = UnixListener::bind(&path).unwrap();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let reader = BufReader::new(stream);
            for line in reader.lines() {
                let envelope: RequestEnvelope = serde_json::from_str(&line.unwrap()).unwrap();
                writer.write_all(reply(envelope).as_bytes()).unwrap();
                writer.write_all(b"\n").unwrap();
            }
        });
        path
    }

    fn encode(id: u64, response: Response) -> String {
        serde_json::to_string(&ResponseEnvelope::new(id, response)).unwrap()
    }

    #[test]
    fn test_missing_socket_reports_unavailable() {
        let dir = TempDir::new().unwrap();
        let err = ControlClient::connect(dir.path().join("none.sock")).err().unwrap();
        assert!(matches!(err, ThermocamError::SocketMissing(_)));
    }

    #[test]
    fn test_version_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = serve(&dir, |env| encode(env.id, Response::ok_string("0.4.2")));
        let mut client = ControlClient::connect(&path).unwrap();
        assert_eq!(client.version().unwrap(), "0.4.2");
        client.ping().unwrap();
    }

    #[test]
    fn test_daemon_error_surfaces() {
        let dir = TempDir::new().unwrap();
        let path = serve(&dir, |env| encode(env.id, Response::error("Unknown device: cam9")));
        let mut client = ControlClient::connect(&path).unwrap();
        let err = client.start_device("cam9").unwrap_err();
        assert!(err.to_string().contains("Unknown device: cam9"));
    }

    #[test]
    fn test_mismatched_id_rejected() {
        let dir = TempDir::new().unwrap();
        let path = serve(&dir, |env| encode(env.id + 1, Response::ok()));
        let mut client = ControlClient::connect(&path).unwrap();
        assert!(matches!(
            client.request(Request::Ping),
            Err(ThermocamError::ControlProtocol(_))
        ));
    }

    #[test]
    fn test_wrong_payload_rejected() {
        let dir = TempDir::new().unwrap();
        let path = serve(&dir, |env| encode(env.id, Response::ok_string("x")));
        let mut client = ControlClient::connect(&path).unwrap();
        assert!(client.list_devices().is_err());
    }

    #[test]
    fn test_invalid_request_not_sent() {
        let dir = TempDir::new().unwrap();
        let path = serve(&dir, |_| panic!("request should not reach the daemon"));
        let mut client = ControlClient::connect(&path).unwrap();
        assert!(matches!(
            client.rename_device("cam1", ""),
            Err(ThermocamError::Rejected(_))
        ));
    }
}
