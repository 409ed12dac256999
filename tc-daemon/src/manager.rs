//! Device Manager
//!
//! The single coordination task. It owns the registry, the fusion engine and
//! the stream supervisor, and reacts to four inputs:
//!
//! - inbound bus messages (discovery, status, sensor payloads)
//! - user intents from the control socket
//! - the supervisor poll tick
//! - shutdown
//!
//! Outputs are bus publications and [`ManagerEvent`]s for whoever renders.

use image::RgbImage;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use tc_core::{
    AlertZone, DeviceRegistry, DeviceState, DeviceStore, FusionEngine, ProcessingSettings, Result,
    StatusToken, TemperatureUpdate, ThermocamError, TransitionOutcome, Trigger,
};
use tc_protocol::bus::{device_subscriptions, DeviceCommand, Inbound, Outbound, ServerStatus};
use tc_protocol::worker::{FrameData, WorkerEvent, WorkerUpdate};
use tc_protocol::{DeviceInfo, Request, Response, ResponseData};

use crate::bus::MessageBus;
use crate::supervisor::StreamSupervisor;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Notifications for the renderer side
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    Overlay { device_id: String, frame: Arc<RgbImage> },
    Temperatures(TemperatureUpdate),
    StreamStarted(String),
    StreamPaused(String),
    StreamResumed(String),
    StreamStopped(String),
    StreamFailed { device_id: String, message: String },
    TransitionRejected { device_id: String, from: DeviceState, to: DeviceState },
}

/// A user request with its reply slot
#[derive(Debug)]
pub struct Intent {
    pub request: Request,
    pub reply: oneshot::Sender<Response>,
}

impl Intent {
    pub fn new(request: Request) -> (Self, oneshot::Receiver<Response>) {
        let (tx, rx) = oneshot::channel();
        (Self { request, reply: tx }, rx)
    }
}

pub struct DeviceManager<B: MessageBus> {
    registry: DeviceRegistry,
    engine: FusionEngine,
    supervisor: StreamSupervisor,
    bus: B,
    store: Option<DeviceStore>,
    events: mpsc::UnboundedSender<ManagerEvent>,
}

impl<B: MessageBus> DeviceManager<B> {
    pub fn new(
        bus: B,
        supervisor: StreamSupervisor,
        engine: FusionEngine,
        store: Option<DeviceStore>,
        events: mpsc::UnboundedSender<ManagerEvent>,
    ) -> Self {
        Self {
            registry: DeviceRegistry::new(),
            engine,
            supervisor,
            bus,
            store,
            events,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &FusionEngine {
        &self.engine
    }

    pub fn supervisor(&self) -> &StreamSupervisor {
        &self.supervisor
    }

    /// Restore persisted devices; they come back `Offline`
    pub fn load(&mut self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let records = store.load()?;
        let loaded = self.registry.load_records(records);
        for device in self.registry.all() {
            self.engine.set_zones(&device.id, device.zones.clone());
            self.engine.set_settings(&device.id, device.settings);
        }
        info!("STARTUP: restored {} devices from {:?}", loaded, store.path());
        Ok(loaded)
    }

    /// Main loop; returns after shutdown has been handled
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<Inbound>,
        mut intents: mpsc::Receiver<Intent>,
        poll_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        self.announce(ServerStatus::Online);

        let mut tick = tokio::time::interval(poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                Some(message) = inbound.recv() => self.handle_inbound(message).await,
                Some(intent) = intents.recv() => {
                    debug!("Intent: {}", intent.request.type_name());
                    let response = self.handle_request(intent.request).await;
                    let _ = intent.reply.send(response);
                }
                _ = tick.tick() => self.poll_streams().await,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
    }

    /// Publish `offline`, stop every worker and persist
    pub async fn shutdown(&mut self) {
        info!("SHUTDOWN: stopping {} streams", self.supervisor.worker_count());
        self.announce(ServerStatus::Offline);
        self.supervisor.stop_all().await;
        self.persist();
    }

    fn announce(&self, status: ServerStatus) {
        if let Err(e) = self.bus.publish(Outbound::server_status(status)) {
            warn!("Failed to publish server status {}: {}", status.as_str(), e);
        }
    }

    fn send_command(&self, id: &str, command: DeviceCommand) -> Result<()> {
        debug!("Sending {} to {}", command, id);
        self.bus.publish(Outbound::device_command(id, command))
    }

    fn emit(&self, event: ManagerEvent) {
        let _ = self.events.send(event);
    }

    fn persist(&self) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&self.registry.to_records()) {
                error!("Failed to persist devices: {}", e);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Inbound bus messages
    // ------------------------------------------------------------------------

    pub async fn handle_inbound(&mut self, message: Inbound) {
        match message {
            Inbound::Discovery { id, address } => self.handle_discovery(&id, &address).await,
            Inbound::Status { id, token } => self.handle_status(&id, &token).await,
            Inbound::Sensor { id, payload } => self.handle_sensor(&id, &payload).await,
        }
    }

    async fn handle_discovery(&mut self, id: &str, address: &str) {
        // Rediscovery resets the device to Available; any old stream is stale
        if self.supervisor.stop_stream(id).await {
            self.emit(ManagerEvent::StreamStopped(id.to_string()));
        }

        match self.registry.discover(id, address) {
            Ok(is_new) => {
                if is_new {
                    if let Some(device) = self.registry.get(id) {
                        self.engine.set_zones(id, device.zones.clone());
                        self.engine.set_settings(id, device.settings);
                    }
                }
            }
            Err(e) => {
                warn!("Ignoring discovery of {:?}: {}", id, e);
                return;
            }
        }

        for topic in device_subscriptions(id) {
            if let Err(e) = self.bus.subscribe(&topic) {
                warn!("Subscribe to {} failed: {}", topic, e);
            }
        }
        if let Err(e) = self.send_command(id, DeviceCommand::AckConnect) {
            warn!("Failed to acknowledge {}: {}", id, e);
        }
    }

    async fn handle_status(&mut self, id: &str, token: &str) {
        let token = match token.parse::<StatusToken>() {
            Ok(token) => token,
            Err(e) => {
                debug!("Ignoring status for {}: {}", id, e);
                return;
            }
        };
        let Some(current) = self.registry.get(id).map(|d| d.state) else {
            debug!("Status {:?} for unknown device {}", token, id);
            return;
        };

        match token {
            StatusToken::Active => match self.transition(id, DeviceState::Active) {
                Some(TransitionOutcome::Applied { .. }) | Some(TransitionOutcome::Unchanged(_)) => {
                    self.activate(id).await
                }
                _ => {}
            },
            StatusToken::Connected | StatusToken::Offline => {
                self.stop_stream(id).await;
                if current == DeviceState::Active {
                    self.leave_active(id, token);
                } else {
                    self.transition(id, token.target());
                }
                if token == StatusToken::Offline {
                    self.persist();
                }
            }
        }
    }

    /// Walk Active -> Error -> Offline (-> Available) along table edges
    fn leave_active(&mut self, id: &str, token: StatusToken) {
        let mut walk = vec![Trigger::Failure, Trigger::Reset];
        if token == StatusToken::Connected {
            walk.push(Trigger::Connected);
        }
        for trigger in walk {
            match self.registry.apply(id, trigger) {
                Ok(outcome) if outcome.is_applied() => {}
                Ok(TransitionOutcome::Rejected { from, to }) => {
                    self.emit(ManagerEvent::TransitionRejected {
                        device_id: id.to_string(),
                        from,
                        to,
                    });
                    return;
                }
                Ok(_) => return,
                Err(e) => {
                    warn!("STATE: {} walk aborted: {}", id, e);
                    return;
                }
            }
        }
    }

    fn transition(&mut self, id: &str, target: DeviceState) -> Option<TransitionOutcome> {
        match self.registry.transition(id, target) {
            Ok(outcome) => {
                if let TransitionOutcome::Rejected { from, to } = outcome {
                    self.emit(ManagerEvent::TransitionRejected {
                        device_id: id.to_string(),
                        from,
                        to,
                    });
                }
                Some(outcome)
            }
            Err(e) => {
                warn!("STATE: {}", e);
                None
            }
        }
    }

    /// Push current settings and zones, then start the stream
    async fn activate(&mut self, id: &str) {
        let Some(device) = self.registry.get(id).cloned() else {
            return;
        };
        self.engine.set_settings(id, device.settings);
        self.engine.set_zones(id, device.zones.clone());

        if device.address.is_empty() {
            self.emit(ManagerEvent::StreamFailed {
                device_id: id.to_string(),
                message: "device address unknown".into(),
            });
            return;
        }

        if let Err(e) = self.supervisor.start_stream(id, &device.address) {
            warn!("STREAM: failed to start {}: {}", id, e);
            self.emit(ManagerEvent::StreamFailed {
                device_id: id.to_string(),
                message: e.to_string(),
            });
            return;
        }

        let update = WorkerUpdate {
            matrix: self.engine.smoothed(id).copied(),
            zones: Some(device.zones),
            settings: Some(device.settings),
        };
        if let Err(e) = self.supervisor.send_update(id, update) {
            warn!("STREAM: initial update for {} failed: {}", id, e);
        }
    }

    async fn stop_stream(&mut self, id: &str) {
        if self.supervisor.stop_stream(id).await {
            self.emit(ManagerEvent::StreamStopped(id.to_string()));
        }
    }

    async fn handle_sensor(&mut self, id: &str, payload: &[u8]) {
        if !self.registry.contains(id) {
            trace!("Sensor data for unknown device {}", id);
            return;
        }
        match self.engine.update_matrix(id, payload) {
            Ok(update) => {
                if let Some(update) = update {
                    self.emit(ManagerEvent::Temperatures(update));
                }
            }
            Err(e) => {
                debug!("Dropping sensor payload from {}: {}", id, e);
                return;
            }
        }
        if let Some(matrix) = self.engine.smoothed(id).copied() {
            if let Err(e) = self.supervisor.send_update(id, WorkerUpdate::matrix(matrix)) {
                debug!("Matrix update to {} failed: {}", id, e);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Worker output
    // ------------------------------------------------------------------------

    pub async fn poll_streams(&mut self) {
        let polled = self.supervisor.poll();

        for (id, frame) in polled.frames {
            self.handle_frame(&id, frame);
        }

        for (id, event) in polled.events {
            match event {
                WorkerEvent::Started => self.emit(ManagerEvent::StreamStarted(id)),
                WorkerEvent::Paused => self.emit(ManagerEvent::StreamPaused(id)),
                WorkerEvent::Resumed => self.emit(ManagerEvent::StreamResumed(id)),
                WorkerEvent::Stopped => {
                    self.supervisor.stop_stream(&id).await;
                    self.emit(ManagerEvent::StreamStopped(id));
                }
                WorkerEvent::Error { message } => {
                    warn!("STREAM: {} failed: {}", id, message);
                    self.supervisor.stop_stream(&id).await;
                    self.emit(ManagerEvent::StreamFailed {
                        device_id: id,
                        message,
                    });
                }
            }
        }
    }

    fn handle_frame(&mut self, id: &str, frame: FrameData) {
        let Some(image) = RgbImage::from_raw(frame.width, frame.height, frame.rgb) else {
            debug!("Malformed frame from {}", id);
            return;
        };
        if let Some(overlay) = self.engine.handle_frame(id, &image) {
            self.emit(ManagerEvent::Overlay {
                device_id: id.to_string(),
                frame: Arc::new(overlay),
            });
        }
    }

    // ------------------------------------------------------------------------
    // User intents
    // ------------------------------------------------------------------------

    pub async fn handle_request(&mut self, request: Request) -> Response {
        if let Err(e) = request.validate() {
            return Response::error(e);
        }
        match self.process(request).await {
            Ok(response) => response,
            Err(e) => Response::error(e.to_string()),
        }
    }

    async fn process(&mut self, request: Request) -> Result<Response> {
        match request {
            Request::Ping => Ok(Response::ok_string("pong")),
            Request::Version => Ok(Response::ok_string(VERSION)),
            Request::ListDevices => {
                let devices: Vec<DeviceInfo> =
                    self.registry.all().map(|d| self.info(&d.id)).collect::<Result<_>>()?;
                Ok(Response::Ok(ResponseData::device_list(devices)))
            }
            Request::GetDevice { id } => Ok(self.device_response(&id)?),
            Request::StartDevice { id } => {
                let state = self.state_of(&id)?;
                if state != DeviceState::Available {
                    return Err(ThermocamError::WrongState {
                        id,
                        state: state.to_string(),
                        expected: "available",
                    });
                }
                self.send_command(&id, DeviceCommand::Start)?;
                Ok(Response::ok())
            }
            Request::StopDevice { id } => {
                self.state_of(&id)?;
                self.send_command(&id, DeviceCommand::Stop)?;
                Ok(Response::ok())
            }
            Request::RemoveDevice { id } => {
                if self.state_of(&id)? == DeviceState::Active {
                    return Err(ThermocamError::DeviceActive(id));
                }
                self.stop_stream(&id).await;
                self.registry.remove(&id)?;
                self.engine.forget(&id);
                self.persist();
                Ok(Response::ok())
            }
            Request::RenameDevice { id, name } => {
                self.registry.rename(&id, &name)?;
                self.persist();
                Ok(self.device_response(&id)?)
            }
            Request::SetZones { id, zones } => {
                let zones: Vec<AlertZone> = self.registry.set_zones(&id, zones)?.to_vec();
                self.engine.set_zones(&id, zones.clone());
                self.supervisor.send_update(&id, WorkerUpdate::zones(zones))?;
                self.persist();
                Ok(self.device_response(&id)?)
            }
            Request::SetSettings { id, settings } => {
                self.apply_settings(&id, settings).await?;
                Ok(self.device_response(&id)?)
            }
            Request::GetReadings { id } => {
                self.state_of(&id)?;
                let readings = self.engine.readings(&id).to_vec();
                Ok(Response::Ok(ResponseData::zone_readings(readings)))
            }
        }
    }

    async fn apply_settings(&mut self, id: &str, settings: ProcessingSettings) -> Result<()> {
        self.registry.set_settings(id, settings)?;
        self.engine.set_settings(id, settings);
        self.supervisor.send_update(id, WorkerUpdate::settings(settings))?;
        self.persist();
        Ok(())
    }

    fn state_of(&self, id: &str) -> Result<DeviceState> {
        self.registry
            .get(id)
            .map(|d| d.state)
            .ok_or_else(|| ThermocamError::UnknownDevice(id.to_string()))
    }

    fn info(&self, id: &str) -> Result<DeviceInfo> {
        let device = self
            .registry
            .get(id)
            .ok_or_else(|| ThermocamError::UnknownDevice(id.to_string()))?;
        Ok(DeviceInfo::from_device(device, self.supervisor.is_streaming(id)))
    }

    fn device_response(&self, id: &str) -> Result<Response> {
        Ok(Response::Ok(ResponseData::device(self.info(id)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MockMessageBus;
    use crate::supervisor::{LaunchSpec, WorkerLauncher};
    use std::process::Stdio;
    use tc_core::config::StreamConfig;
    use tc_core::{encode_sensor_order, NormPoint, PersistedDevice};
    use tempfile::TempDir;
    use tokio::process::{Child, Command};

    struct SleepLauncher;

    impl WorkerLauncher for SleepLauncher {
        fn launch(&self, _spec: &LaunchSpec) -> std::io::Result<Child> {
            Command::new("sh")
                .arg("-c")
                .arg("exec sleep 30")
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
        }
    }

    fn permissive_bus() -> MockMessageBus {
        let mut bus = MockMessageBus::new();
        bus.expect_publish().returning(|_| Ok(()));
        bus.expect_subscribe().returning(|_| Ok(()));
        bus
    }

    fn manager_with(
        bus: MockMessageBus,
        store: Option<DeviceStore>,
    ) -> (DeviceManager<MockMessageBus>, mpsc::UnboundedReceiver<ManagerEvent>) {
        let config = StreamConfig {
            stop_grace_ms: 100,
            ..StreamConfig::default()
        };
        let supervisor = StreamSupervisor::new(Arc::new(SleepLauncher), &config);
        let (tx, rx) = mpsc::unbounded_channel();
        (DeviceManager::new(bus, supervisor, FusionEngine::new(), store, tx), rx)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ManagerEvent>) -> Vec<ManagerEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn discovery(id: &str, address: &str) -> Inbound {
        Inbound::Discovery {
            id: id.into(),
            address: address.into(),
        }
    }

    fn status(id: &str, token: &str) -> Inbound {
        Inbound::Status {
            id: id.into(),
            token: token.into(),
        }
    }

    #[tokio::test]
    async fn test_discovery_subscribes_and_acknowledges() {
        let mut bus = MockMessageBus::new();
        bus.expect_subscribe()
            .withf(|t| t == "cam1/status")
            .times(1)
            .returning(|_| Ok(()));
        bus.expect_subscribe()
            .withf(|t| t == "cam1/amg8833")
            .times(1)
            .returning(|_| Ok(()));
        bus.expect_publish()
            .withf(|m| m.topic == "cam1/control" && m.payload == b"ack-connect")
            .times(1)
            .returning(|_| Ok(()));

        let (mut mgr, _rx) = manager_with(bus, None);
        mgr.handle_inbound(discovery("cam1", "10.0.0.5")).await;

        let device = mgr.registry().get("cam1").unwrap();
        assert_eq!(device.state, DeviceState::Available);
        assert_eq!(device.name, "Camera-cam1");
    }

    #[tokio::test]
    async fn test_discovery_to_active_scenario() {
        let dir = TempDir::new().unwrap();
        let store = DeviceStore::new(dir.path().join("devices.json"));
        let (mut mgr, mut rx) = manager_with(permissive_bus(), Some(store.clone()));

        mgr.handle_inbound(discovery("cam1", "10.0.0.5")).await;
        mgr.handle_inbound(status("cam1", "active")).await;

        assert_eq!(mgr.registry().get("cam1").unwrap().state, DeviceState::Active);
        assert!(mgr.supervisor().is_streaming("cam1"));
        let settings = mgr.engine().settings("cam1").unwrap();
        assert_eq!(*settings, ProcessingSettings::default());

        // Going offline stops the stream, walks the table and persists
        mgr.handle_inbound(status("cam1", "offline")).await;
        assert_eq!(mgr.registry().get("cam1").unwrap().state, DeviceState::Offline);
        assert!(!mgr.supervisor().is_streaming("cam1"));

        let records = store.load().unwrap();
        assert_eq!(records["cam1"].name, "Camera-cam1");
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, ManagerEvent::StreamStopped(id) if id == "cam1")));
    }

    #[tokio::test]
    async fn test_connected_while_active_returns_to_available() {
        let (mut mgr, mut rx) = manager_with(permissive_bus(), None);
        mgr.handle_inbound(discovery("cam1", "10.0.0.5")).await;
        mgr.handle_inbound(status("cam1", "active")).await;
        mgr.handle_inbound(status("cam1", "connected")).await;

        assert_eq!(mgr.registry().get("cam1").unwrap().state, DeviceState::Available);
        assert!(!mgr.supervisor().is_streaming("cam1"));
        assert!(!drain(&mut rx)
            .iter()
            .any(|e| matches!(e, ManagerEvent::TransitionRejected { .. })));
    }

    #[tokio::test]
    async fn test_illegal_transition_reported() {
        let (mut mgr, mut rx) = manager_with(permissive_bus(), None);
        mgr.handle_inbound(discovery("cam1", "10.0.0.5")).await;
        mgr.handle_inbound(status("cam1", "offline")).await;
        // Offline -> Active is not in the table
        mgr.handle_inbound(status("cam1", "active")).await;

        assert_eq!(mgr.registry().get("cam1").unwrap().state, DeviceState::Offline);
        assert!(!mgr.supervisor().is_streaming("cam1"));
        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(
            e,
            ManagerEvent::TransitionRejected {
                from: DeviceState::Offline,
                to: DeviceState::Active,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_sensor_payload_updates_engine() {
        let (mut mgr, mut rx) = manager_with(permissive_bus(), None);
        mgr.handle_inbound(discovery("cam1", "10.0.0.5")).await;
        mgr.handle_request(Request::SetZones {
            id: "cam1".into(),
            zones: vec![AlertZone::point(NormPoint::new(0.5, 0.5))],
        })
        .await;

        let payload = encode_sensor_order(&[30.0; 64]);
        mgr.handle_inbound(Inbound::Sensor {
            id: "cam1".into(),
            payload,
        })
        .await;

        assert_eq!(mgr.engine().smoothed("cam1").unwrap()[0][0], 30.0);
        let events = drain(&mut rx);
        let update = events
            .iter()
            .find_map(|e| match e {
                ManagerEvent::Temperatures(u) => Some(u),
                _ => None,
            })
            .unwrap();
        assert!((update.readings[0].temperature - 30.0).abs() < 1e-3);

        // Short payloads are dropped without touching state
        mgr.handle_inbound(Inbound::Sensor {
            id: "cam1".into(),
            payload: vec![0; 10],
        })
        .await;
        assert_eq!(mgr.engine().smoothed("cam1").unwrap()[0][0], 30.0);
    }

    #[tokio::test]
    async fn test_start_device_requires_available() {
        let mut bus = MockMessageBus::new();
        bus.expect_subscribe().returning(|_| Ok(()));
        bus.expect_publish()
            .withf(|m| m.payload == b"ack-connect")
            .returning(|_| Ok(()));
        bus.expect_publish()
            .withf(|m| m.topic == "cam1/control" && m.payload == b"start")
            .times(1)
            .returning(|_| Ok(()));

        let (mut mgr, _rx) = manager_with(bus, None);
        assert!(!mgr.handle_request(Request::StartDevice { id: "cam1".into() }).await.is_ok());

        mgr.handle_inbound(discovery("cam1", "10.0.0.5")).await;
        assert!(mgr.handle_request(Request::StartDevice { id: "cam1".into() }).await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_refused_while_active() {
        let dir = TempDir::new().unwrap();
        let store = DeviceStore::new(dir.path().join("devices.json"));
        let (mut mgr, _rx) = manager_with(permissive_bus(), Some(store.clone()));
        mgr.handle_inbound(discovery("cam1", "10.0.0.5")).await;
        mgr.handle_inbound(status("cam1", "active")).await;

        let response = mgr.handle_request(Request::RemoveDevice { id: "cam1".into() }).await;
        assert!(!response.is_ok());
        assert!(mgr.registry().contains("cam1"));

        mgr.handle_inbound(status("cam1", "connected")).await;
        let response = mgr.handle_request(Request::RemoveDevice { id: "cam1".into() }).await;
        assert!(response.is_ok());
        assert!(!mgr.registry().contains("cam1"));
        assert!(store.load().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rename_and_settings_persist() {
        let dir = TempDir::new().unwrap();
        let store = DeviceStore::new(dir.path().join("devices.json"));
        let (mut mgr, _rx) = manager_with(permissive_bus(), Some(store.clone()));
        mgr.handle_inbound(discovery("cam1", "10.0.0.5")).await;

        let response = mgr
            .handle_request(Request::RenameDevice {
                id: "cam1".into(),
                name: "  Boiler room ".into(),
            })
            .await;
        match response {
            Response::Ok(data) => assert_eq!(data.device.unwrap().name, "Boiler room"),
            other => panic!("unexpected {:?}", other),
        }

        let settings = ProcessingSettings {
            thermo_alpha: 70,
            ..ProcessingSettings::default()
        };
        assert!(mgr
            .handle_request(Request::SetSettings {
                id: "cam1".into(),
                settings,
            })
            .await
            .is_ok());
        assert_eq!(mgr.engine().settings("cam1").unwrap().thermo_alpha, 70);

        let records = store.load().unwrap();
        let expected = PersistedDevice {
            name: "Boiler room".into(),
            state: DeviceState::Available,
            zones: mgr.registry().get("cam1").unwrap().zones.clone(),
            processing_settings: settings,
        };
        assert_eq!(records["cam1"], expected);
    }

    #[tokio::test]
    async fn test_list_and_readings_requests() {
        let (mut mgr, _rx) = manager_with(permissive_bus(), None);
        mgr.handle_inbound(discovery("b", "10.0.0.6")).await;
        mgr.handle_inbound(discovery("a", "10.0.0.5")).await;

        match mgr.handle_request(Request::ListDevices).await {
            Response::Ok(data) => {
                let ids: Vec<_> = data.devices.unwrap().into_iter().map(|d| d.id).collect();
                assert_eq!(ids, ["a", "b"]);
            }
            other => panic!("unexpected {:?}", other),
        }
        match mgr.handle_request(Request::GetReadings { id: "a".into() }).await {
            Response::Ok(data) => assert!(data.readings.unwrap().is_empty()),
            other => panic!("unexpected {:?}", other),
        }
        assert!(!mgr.handle_request(Request::GetDevice { id: "zz".into() }).await.is_ok());
        assert_eq!(mgr.handle_request(Request::Ping).await, Response::ok_string("pong"));
    }

    #[tokio::test]
    async fn test_run_announces_and_shuts_down() {
        let mut bus = MockMessageBus::new();
        let mut seq = mockall::Sequence::new();
        bus.expect_publish()
            .withf(|m| m.topic == "server/status" && m.payload == b"online")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        bus.expect_publish()
            .withf(|m| m.topic == "server/status" && m.payload == b"offline")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let (mgr, _rx) = manager_with(bus, None);
        let (_inbound_tx, inbound_rx) = mpsc::channel(8);
        let (intent_tx, intent_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(mgr.run(inbound_rx, intent_rx, Duration::from_millis(20), shutdown_rx));

        let (intent, reply) = Intent::new(Request::Version);
        intent_tx.send(intent).await.unwrap();
        assert!(reply.await.unwrap().is_ok());

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
