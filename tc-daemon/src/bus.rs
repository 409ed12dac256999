//! Message bus seam and its MQTT adapter
//!
//! The device manager only sees [`MessageBus`]. The MQTT event loop runs in
//! its own task and hands classified [`Inbound`] messages over a channel.

use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet as MqttPacket, QoS};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use tc_core::config::BrokerConfig;
use tc_core::{Result, ThermocamError};
use tc_protocol::bus::{Inbound, Outbound, ServerStatus, DISCOVERY_TOPIC, SERVER_STATUS_TOPIC};

/// Delay before the event loop retries after a connection error
const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Requests buffered between the client handle and the event loop
const CLIENT_CAPACITY: usize = 64;

/// Outbound side of the publish/subscribe transport
#[cfg_attr(test, mockall::automock)]
pub trait MessageBus: Send + Sync {
    fn publish(&self, message: Outbound) -> Result<()>;
    fn subscribe(&self, topic: &str) -> Result<()>;
}

fn qos(reliable: bool) -> QoS {
    if reliable {
        QoS::AtLeastOnce
    } else {
        QoS::AtMostOnce
    }
}

/// Topics to restore after every (re)connect
type Subscriptions = Arc<Mutex<BTreeSet<String>>>;

#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
    subscriptions: Subscriptions,
}

impl MqttBus {
    /// Build the client; nothing is sent until the event loop is polled
    pub fn new(config: &BrokerConfig) -> (Self, EventLoop) {
        let mut options = MqttOptions::new(&config.client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
        options.set_last_will(LastWill::new(
            SERVER_STATUS_TOPIC,
            ServerStatus::Offline.as_str(),
            QoS::AtLeastOnce,
            false,
        ));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            options.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(options, CLIENT_CAPACITY);
        let subscriptions = Arc::new(Mutex::new(BTreeSet::from([DISCOVERY_TOPIC.to_string()])));
        (
            Self {
                client,
                subscriptions,
            },
            eventloop,
        )
    }

    /// Drive the MQTT connection and forward device messages
    ///
    /// Returns when the receiving side of `inbound` is dropped.
    pub async fn run_event_loop(&self, mut eventloop: EventLoop, inbound: mpsc::Sender<Inbound>) {
        let mut connected_before = false;
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(MqttPacket::ConnAck(ack))) => {
                    info!("BUS: connected to broker ({:?})", ack.code);
                    self.restore_subscriptions();
                    if connected_before {
                        let _ = self.publish(Outbound::server_status(ServerStatus::Online));
                    }
                    connected_before = true;
                }
                Ok(Event::Incoming(MqttPacket::Publish(publish))) => {
                    match Inbound::parse(&publish.topic, &publish.payload) {
                        Some(message) => {
                            if inbound.send(message).await.is_err() {
                                debug!("BUS: inbound channel closed, stopping event loop");
                                return;
                            }
                        }
                        None => trace!("BUS: ignoring message on {}", publish.topic),
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("BUS: connection error: {}", e);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    fn restore_subscriptions(&self) {
        let topics: Vec<String> = self.subscriptions.lock().iter().cloned().collect();
        for topic in topics {
            if let Err(e) = self.client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                warn!("BUS: resubscribe to {} failed: {}", topic, e);
            }
        }
    }

    /// Flush a disconnect so the broker does not fire the last will
    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            debug!("BUS: disconnect failed: {}", e);
        }
    }
}

impl MessageBus for MqttBus {
    fn publish(&self, message: Outbound) -> Result<()> {
        self.client
            .try_publish(message.topic, qos(message.reliable), false, message.payload)
            .map_err(|e| ThermocamError::bus(e.to_string()))
    }

    fn subscribe(&self, topic: &str) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock();
        if subscriptions.contains(topic) {
            return Ok(());
        }
        // Only remembered once queued, so a failed attempt can be retried
        self.client
            .try_subscribe(topic, QoS::AtLeastOnce)
            .map_err(|e| ThermocamError::bus(e.to_string()))?;
        subscriptions.insert(topic.to_string());
        Ok(())
    }
}
