//! DNS-SD access behind a narrow polling interface.
//!
//! The mDNS method drives a [`ServiceDiscoveryProvider`] from a single
//! thread: it issues browse/resolve/query requests and repeatedly polls for
//! the answers. [`MdnsSdProvider`] implements it on top of `mdns-sd`.

use flume::Receiver;
use hue_discovery_core::{DiscoveryError, Result};
use mdns_sd::{ServiceDaemon, ServiceEvent};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// Granularity of the non-blocking poll loop
const POLL_STEP: Duration = Duration::from_millis(20);

/// Answers surfaced by [`ServiceDiscoveryProvider::poll`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    /// A browse produced a service instance
    Found {
        service_type: String,
        instance: String,
    },
    /// An instance resolved to the host serving it
    Resolved { instance: String, hostname: String },
    /// A host's A record
    Address { hostname: String, ip: Ipv4Addr },
}

/// Browse, resolve and query operations of a DNS-SD responder
pub trait ServiceDiscoveryProvider: Send {
    fn browse(&mut self, service_type: &str) -> Result<()>;

    /// Requests the SRV record of an instance; answered with `Resolved`.
    fn resolve(&mut self, instance: &str) -> Result<()>;

    /// Requests the A record of a host; answered with `Address`.
    fn query_record(&mut self, hostname: &str) -> Result<()>;

    /// Waits at most `timeout` and returns the answers gathered meanwhile.
    fn poll(&mut self, timeout: Duration) -> Vec<ProviderEvent>;
}

/// Creates a provider for one mDNS collection window
pub type ProviderFactory =
    Arc<dyn Fn() -> Result<Box<dyn ServiceDiscoveryProvider>> + Send + Sync>;

/// Factory producing [`MdnsSdProvider`]s
pub fn mdns_sd_factory() -> ProviderFactory {
    Arc::new(|| -> Result<Box<dyn ServiceDiscoveryProvider>> {
        Ok(Box::new(MdnsSdProvider::new()?))
    })
}

/// Provider backed by the `mdns-sd` daemon.
///
/// The daemon resolves SRV and address records on its own; this type keeps
/// what it learned and releases it as answers to the requests the caller
/// actually made.
pub struct MdnsSdProvider {
    daemon: ServiceDaemon,
    browsers: Vec<(String, Receiver<ServiceEvent>)>,
    instances: HashMap<String, String>,
    host_addresses: HashMap<String, HashSet<Ipv4Addr>>,
    wanted_instances: HashSet<String>,
    wanted_hosts: HashSet<String>,
    pending: VecDeque<ProviderEvent>,
}

impl MdnsSdProvider {
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| DiscoveryError::Mdns(format!("failed to create mDNS daemon: {}", e)))?;

        Ok(Self {
            daemon,
            browsers: Vec::new(),
            instances: HashMap::new(),
            host_addresses: HashMap::new(),
            wanted_instances: HashSet::new(),
            wanted_hosts: HashSet::new(),
            pending: VecDeque::new(),
        })
    }

    fn handle_event(&mut self, service_type: &str, event: ServiceEvent) {
        match event {
            ServiceEvent::ServiceFound(_, fullname) => {
                trace!(service_type, instance = %fullname, "Service found");
                self.pending.push_back(ProviderEvent::Found {
                    service_type: service_type.to_string(),
                    instance: fullname,
                });
            }
            ServiceEvent::ServiceResolved(info) => {
                let instance = info.get_fullname().to_string();
                let hostname = info.get_hostname().to_string();
                let addresses: HashSet<Ipv4Addr> = info
                    .get_addresses()
                    .iter()
                    .filter_map(|ip| match ip {
                        IpAddr::V4(v4) => Some(*v4),
                        IpAddr::V6(_) => None,
                    })
                    .collect();
                trace!(instance = %instance, hostname = %hostname, "Service resolved");

                self.instances.insert(instance.clone(), hostname.clone());
                let known = self.host_addresses.entry(hostname.clone()).or_default();
                let fresh: Vec<Ipv4Addr> = addresses.difference(known).copied().collect();
                known.extend(fresh.iter().copied());

                if self.wanted_instances.remove(&instance) {
                    self.pending.push_back(ProviderEvent::Resolved {
                        instance,
                        hostname: hostname.clone(),
                    });
                }
                if self.wanted_hosts.contains(&hostname) {
                    for ip in fresh {
                        self.pending.push_back(ProviderEvent::Address {
                            hostname: hostname.clone(),
                            ip,
                        });
                    }
                }
            }
            _ => {}
        }
    }

    fn drain(&mut self) {
        let mut received = Vec::new();
        for (service_type, receiver) in &self.browsers {
            while let Ok(event) = receiver.try_recv() {
                received.push((service_type.clone(), event));
            }
        }
        for (service_type, event) in received {
            self.handle_event(&service_type, event);
        }
    }
}

impl ServiceDiscoveryProvider for MdnsSdProvider {
    fn browse(&mut self, service_type: &str) -> Result<()> {
        let receiver = self.daemon.browse(service_type).map_err(|e| {
            DiscoveryError::Mdns(format!("failed to browse '{}': {}", service_type, e))
        })?;
        debug!(service_type, "Browsing");
        self.browsers.push((service_type.to_string(), receiver));
        Ok(())
    }

    fn resolve(&mut self, instance: &str) -> Result<()> {
        match self.instances.get(instance) {
            Some(hostname) => self.pending.push_back(ProviderEvent::Resolved {
                instance: instance.to_string(),
                hostname: hostname.clone(),
            }),
            None => {
                self.wanted_instances.insert(instance.to_string());
            }
        }
        Ok(())
    }

    fn query_record(&mut self, hostname: &str) -> Result<()> {
        if self.wanted_hosts.insert(hostname.to_string()) {
            if let Some(addresses) = self.host_addresses.get(hostname) {
                for ip in addresses {
                    self.pending.push_back(ProviderEvent::Address {
                        hostname: hostname.to_string(),
                        ip: *ip,
                    });
                }
            }
        }
        Ok(())
    }

    fn poll(&mut self, timeout: Duration) -> Vec<ProviderEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            self.drain();
            if !self.pending.is_empty() {
                return self.pending.drain(..).collect();
            }
            let now = Instant::now();
            if now >= deadline {
                return Vec::new();
            }
            std::thread::sleep(POLL_STEP.min(deadline - now));
        }
    }
}

impl Drop for MdnsSdProvider {
    fn drop(&mut self) {
        for (service_type, _) in &self.browsers {
            let _ = self.daemon.stop_browse(service_type);
        }
        if let Err(e) = self.daemon.shutdown() {
            warn!(error = %e, "Failed to shut down mDNS daemon");
        }
    }
}
