//! mDNS advertisement so devices can find the broker host

use mdns_sd::{ServiceDaemon, ServiceInfo};
use tracing::{debug, info, warn};

use tc_core::config::DiscoveryConfig;
use tc_core::constants::discovery::SERVICE_TYPE;
use tc_core::{Result, ThermocamError};

const SERVICE_DESCRIPTION: &str = "Thermocam server";

fn discovery_err(e: impl std::fmt::Display) -> ThermocamError {
    ThermocamError::Discovery(e.to_string())
}

/// Describe the advertised service
///
/// Without a configured address the interfaces are detected automatically.
pub fn service_info(config: &DiscoveryConfig, broker_port: u16) -> Result<ServiceInfo> {
    let port = config.port.unwrap_or(broker_port);
    let ip = config.advertised_ip.as_deref().unwrap_or("");
    let properties = [("desc", SERVICE_DESCRIPTION)];

    let info = ServiceInfo::new(
        SERVICE_TYPE,
        &config.instance_name,
        &config.host_name,
        ip,
        port,
        &properties[..],
    )
    .map_err(discovery_err)?;

    Ok(if config.advertised_ip.is_none() {
        info.enable_addr_auto()
    } else {
        info
    })
}

/// A registered service; unregistered on [`Advertiser::shutdown`]
pub struct Advertiser {
    daemon: ServiceDaemon,
    fullname: String,
}

impl Advertiser {
    pub fn start(config: &DiscoveryConfig, broker_port: u16) -> Result<Self> {
        let info = service_info(config, broker_port)?;
        let fullname = info.get_fullname().to_string();
        let daemon = ServiceDaemon::new().map_err(discovery_err)?;
        daemon.register(info).map_err(discovery_err)?;
        info!("STARTUP: advertising {} on port {}", fullname, config.port.unwrap_or(broker_port));
        Ok(Self { daemon, fullname })
    }

    pub fn shutdown(self) {
        if let Err(e) = self.daemon.unregister(&self.fullname) {
            warn!("Failed to unregister {}: {}", self.fullname, e);
        }
        if let Err(e) = self.daemon.shutdown() {
            debug!("mDNS daemon shutdown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_info_defaults_to_broker_port() {
        let info = service_info(&DiscoveryConfig::default(), 1883).unwrap();
        assert_eq!(info.get_fullname(), "ThermocamServer._http._tcp.local.");
        assert_eq!(info.get_port(), 1883);
        assert_eq!(info.get_hostname(), "thermocam-server.local.");
    }

    #[test]
    fn test_service_info_explicit_address() {
        let config = DiscoveryConfig {
            advertised_ip: Some("192.168.0.5".into()),
            port: Some(8883),
            ..DiscoveryConfig::default()
        };
        let info = service_info(&config, 1883).unwrap();
        assert_eq!(info.get_port(), 8883);
        assert!(info
            .get_addresses()
            .iter()
            .any(|a| a.to_string() == "192.168.0.5"));
    }
}
