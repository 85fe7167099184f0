use std::collections::{BTreeSet, HashMap};
use std::net::IpAddr;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::{CastError, DeviceIdentity, Result};

/// mDNS service type advertised by cast receivers.
pub const CAST_SERVICE_TYPE: &str = "_googlecast._tcp.local.";

/// TXT keys carried by cast advertisements.
const TXT_FRIENDLY_NAME: &str = "fn";
const TXT_MODEL: &str = "md";
const TXT_ID: &str = "id";

/// Continuously browses for the configured device.
///
/// Matches are delivered on the channel given to [`DeviceBrowser::start`];
/// browsing never stops on its own, so every re-advertisement produces
/// another match.
pub trait DeviceBrowser: Send + Sync + 'static {
    fn start(&mut self, found: mpsc::UnboundedSender<DeviceIdentity>) -> Result<()>;

    /// Re-issue the browse query so the device is reported again.
    fn restart(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;
}

/// The parts of a resolved advertisement the matcher looks at.
#[derive(Debug, Clone, Default)]
pub struct Advertisement {
    pub fullname: String,
    pub properties: HashMap<String, String>,
    pub addresses: Vec<IpAddr>,
    pub port: u16,
}

impl Advertisement {
    fn from_service(info: &ServiceInfo) -> Self {
        let properties = info
            .get_properties()
            .iter()
            .map(|property| (property.key().to_string(), property.val_str().to_string()))
            .collect();

        Self {
            fullname: info.get_fullname().to_string(),
            properties,
            addresses: info.get_addresses().iter().copied().collect(),
            port: info.get_port(),
        }
    }

    /// Friendly name from TXT, falling back to the instance label.
    pub fn friendly_name(&self) -> &str {
        self.properties
            .get(TXT_FRIENDLY_NAME)
            .map(String::as_str)
            .unwrap_or_else(|| self.fullname.split('.').next().unwrap_or_default())
    }
}

/// Pick one address out of a possibly duplicated, unordered set.
///
/// Deduplicates, prefers IPv4, then the lowest address, so the same
/// advertisement always resolves to the same address.
pub fn select_address(addresses: impl IntoIterator<Item = IpAddr>) -> Option<IpAddr> {
    let unique: BTreeSet<IpAddr> = addresses.into_iter().collect();
    unique
        .iter()
        .find(|addr| addr.is_ipv4())
        .or_else(|| unique.iter().next())
        .copied()
}

/// Build an identity when `advertisement` is the device called `target`.
pub fn match_advertisement(target: &str, advertisement: &Advertisement) -> Option<DeviceIdentity> {
    let name = advertisement.friendly_name();
    if name.to_lowercase() != target.trim().to_lowercase() {
        trace!("Ignoring cast advertisement for {}", name);
        return None;
    }

    let Some(ip_address) = select_address(advertisement.addresses.iter().copied()) else {
        warn!("Advertisement for {} carried no address", name);
        return None;
    };

    Some(DeviceIdentity {
        name: name.to_string(),
        device_type: advertisement
            .properties
            .get(TXT_MODEL)
            .cloned()
            .unwrap_or_default(),
        ip_address,
        port: advertisement.port,
        device_id: advertisement
            .properties
            .get(TXT_ID)
            .cloned()
            .unwrap_or_default(),
    })
}

/// mDNS browser for a single named cast device.
pub struct DeviceDiscovery {
    target: String,
    service_type: String,
    mdns: Option<ServiceDaemon>,
    found: Option<mpsc::UnboundedSender<DeviceIdentity>>,
    task: Option<JoinHandle<()>>,
}

impl DeviceDiscovery {
    pub fn new(target: impl Into<String>, service_type: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            service_type: service_type.into(),
            mdns: None,
            found: None,
            task: None,
        }
    }

    fn browse(&mut self) -> Result<()> {
        let (Some(mdns), Some(found)) = (self.mdns.as_ref(), self.found.clone()) else {
            return Err(CastError::Discovery("discovery has not been started".into()));
        };

        let receiver = mdns
            .browse(&self.service_type)
            .map_err(|e| CastError::Discovery(format!("Failed to browse {}: {}", self.service_type, e)))?;

        if let Some(handle) = self.task.take() {
            handle.abort();
        }

        let target = self.target.clone();
        self.task = Some(tokio::spawn(async move {
            Self::handle_mdns_events(receiver, target, found).await;
        }));

        info!("Browsing {} for \"{}\"", self.service_type, self.target);
        Ok(())
    }

    /// Handle mDNS service events until the browse or the consumer goes away.
    async fn handle_mdns_events(
        receiver: mdns_sd::Receiver<ServiceEvent>,
        target: String,
        found: mpsc::UnboundedSender<DeviceIdentity>,
    ) {
        while let Ok(event) = receiver.recv_async().await {
            match event {
                ServiceEvent::ServiceResolved(info) => {
                    let advertisement = Advertisement::from_service(&info);
                    if let Some(identity) = match_advertisement(&target, &advertisement) {
                        info!(
                            "Found {} ({}) at {}",
                            identity.name,
                            identity.device_type,
                            identity.address()
                        );
                        if found.send(identity).is_err() {
                            break;
                        }
                    }
                }
                ServiceEvent::ServiceRemoved(_, fullname) => {
                    debug!("Cast service removed: {}", fullname);
                }
                ServiceEvent::SearchStopped(service_type) => {
                    debug!("mDNS search stopped for {}", service_type);
                    break;
                }
                _ => {}
            }
        }
    }
}

impl DeviceBrowser for DeviceDiscovery {
    fn start(&mut self, found: mpsc::UnboundedSender<DeviceIdentity>) -> Result<()> {
        if self.mdns.is_none() {
            let mdns = ServiceDaemon::new()
                .map_err(|e| CastError::Discovery(format!("Failed to create mDNS daemon: {}", e)))?;
            self.mdns = Some(mdns);
        }
        self.found = Some(found);
        self.browse()
    }

    fn restart(&mut self) -> Result<()> {
        if let Some(mdns) = self.mdns.as_ref() {
            if let Err(e) = mdns.stop_browse(&self.service_type) {
                debug!("Failed to stop browse for {}: {}", self.service_type, e);
            }
        }
        self.browse()
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(handle) = self.task.take() {
            handle.abort();
        }
        self.found = None;

        if let Some(mdns) = self.mdns.take() {
            mdns.shutdown()
                .map_err(|e| CastError::Discovery(format!("Failed to shutdown mDNS: {}", e)))?;
        }

        info!("Device discovery stopped");
        Ok(())
    }
}

impl Drop for DeviceDiscovery {
    fn drop(&mut self) {
        if let Some(handle) = self.task.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advertisement(name: &str, addresses: &[&str]) -> Advertisement {
        let mut properties = HashMap::new();
        properties.insert("fn".to_string(), name.to_string());
        properties.insert("md".to_string(), "Chromecast Ultra".to_string());
        properties.insert("id".to_string(), "4a1b2c3d".to_string());
        Advertisement {
            fullname: "Chromecast-Ultra-4a1b2c3d._googlecast._tcp.local.".into(),
            properties,
            addresses: addresses.iter().map(|a| a.parse().unwrap()).collect(),
            port: 8009,
        }
    }

    #[test]
    fn matches_name_case_insensitively() {
        let identity = match_advertisement("living room tv", &advertisement("Living Room TV", &["10.0.0.5"]))
            .expect("should match");
        assert_eq!(identity.name, "Living Room TV");
        assert_eq!(identity.device_type, "Chromecast Ultra");
        assert_eq!(identity.device_id, "4a1b2c3d");
        assert_eq!(identity.address(), "10.0.0.5:8009");

        let identity = match_advertisement("KÜCHE ö", &advertisement("Küche Ö", &["10.0.0.7"]))
            .expect("should match");
        assert_eq!(identity.name, "Küche Ö");
    }

    #[test]
    fn ignores_other_devices() {
        assert!(match_advertisement("Kitchen", &advertisement("Living Room TV", &["10.0.0.5"])).is_none());
        assert!(match_advertisement("Living Room", &advertisement("Living Room TV", &["10.0.0.5"])).is_none());
    }

    #[test]
    fn no_address_is_not_a_match() {
        assert!(match_advertisement("Living Room TV", &advertisement("Living Room TV", &[])).is_none());
    }

    #[test]
    fn address_selection_is_deterministic() {
        let picked = select_address(
            ["fe80::1", "10.0.0.9", "10.0.0.5", "10.0.0.9"]
                .iter()
                .map(|a| a.parse().unwrap()),
        );
        assert_eq!(picked, Some("10.0.0.5".parse().unwrap()));

        let reversed = select_address(
            ["10.0.0.9", "10.0.0.5", "fe80::1"]
                .iter()
                .map(|a| a.parse().unwrap()),
        );
        assert_eq!(picked, reversed);
    }

    #[test]
    fn falls_back_to_ipv6() {
        let picked = select_address(["fe80::2", "fe80::1"].iter().map(|a| a.parse().unwrap()));
        assert_eq!(picked, Some("fe80::1".parse().unwrap()));
    }

    #[test]
    fn friendly_name_falls_back_to_instance_label() {
        let mut ad = advertisement("ignored", &["10.0.0.5"]);
        ad.properties.remove("fn");
        assert_eq!(ad.friendly_name(), "Chromecast-Ultra-4a1b2c3d");
    }
}
