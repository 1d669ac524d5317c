//! mDNS / DNS-SD discovery.
//!
//! Browses the bridge service types for a fixed window. Every instance found
//! is resolved to its host, and every host is queried for its A record. The
//! addresses collected by the end of the window are validated.

use crate::job::Task;
use crate::method::{DiscoveryMethod, MethodContext, MethodSearch, Reporter};
use crate::provider::{ProviderEvent, ServiceDiscoveryProvider};
use async_trait::async_trait;
use hue_discovery_core::{
    BridgeDiscoveryResult, DiscoveryClassType, DiscoveryError, MdnsConfig, Result,
};
use std::collections::{BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

/// A host address learned during the collection window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectedHost {
    pub ip: Ipv4Addr,
    /// Time from the start of the window until the address arrived
    pub elapsed: Duration,
}

/// Drives `provider` for one collection window.
///
/// Returns the first IPv4 address seen per host. Stops early, with what it
/// has, once `cancel` fires. Fails only if no service type could be browsed.
pub fn collect_hosts(
    provider: &mut dyn ServiceDiscoveryProvider,
    config: &MdnsConfig,
    cancel: &CancellationToken,
) -> Result<HashMap<String, CollectedHost>> {
    let started = Instant::now();
    let deadline = started + config.window();

    let mut browsing = 0;
    let mut last_error = None;
    for service_type in &config.service_types {
        match provider.browse(service_type) {
            Ok(()) => browsing += 1,
            Err(e) => {
                warn!(service_type = %service_type, error = %e, "mDNS browse failed");
                last_error = Some(e);
            }
        }
    }
    if browsing == 0 {
        return Err(last_error
            .unwrap_or_else(|| DiscoveryError::Mdns("no service types to browse".to_string())));
    }

    let mut hosts = HashMap::new();
    while !cancel.is_cancelled() {
        let now = Instant::now();
        if now >= deadline {
            break;
        }

        let timeout = config.poll_timeout().min(deadline - now);
        for event in provider.poll(timeout) {
            match event {
                ProviderEvent::Found {
                    service_type,
                    instance,
                } => {
                    trace!(service_type = %service_type, instance = %instance, "Resolving instance");
                    if let Err(e) = provider.resolve(&instance) {
                        debug!(instance = %instance, error = %e, "Resolve request failed");
                    }
                }
                ProviderEvent::Resolved { instance, hostname } => {
                    trace!(instance = %instance, hostname = %hostname, "Querying host address");
                    if let Err(e) = provider.query_record(&hostname) {
                        debug!(hostname = %hostname, error = %e, "Address query failed");
                    }
                }
                ProviderEvent::Address { hostname, ip } => {
                    hosts.entry(hostname).or_insert_with(|| CollectedHost {
                        ip,
                        elapsed: started.elapsed(),
                    });
                }
            }
        }
    }

    Ok(hosts)
}

/// Protocol task behind the mDNS method
pub struct MdnsTask {
    context: MethodContext,
    reporter: Reporter,
}

impl MdnsTask {
    pub fn new(context: &MethodContext, reporter: Reporter) -> Self {
        Self {
            context: context.clone(),
            reporter,
        }
    }
}

#[async_trait]
impl Task for MdnsTask {
    type Output = Vec<BridgeDiscoveryResult>;

    #[instrument(name = "mdns", skip_all)]
    async fn execute(&mut self, cancel: &CancellationToken) -> Self::Output {
        let factory = Arc::clone(&self.context.provider_factory);
        let config = self.context.config.mdns.clone();
        let token = cancel.clone();

        let collected = tokio::task::spawn_blocking(move || {
            let mut provider = factory()?;
            collect_hosts(provider.as_mut(), &config, &token)
        })
        .await;

        let hosts = match collected {
            Ok(Ok(hosts)) => hosts,
            Ok(Err(e)) => {
                warn!(error = %e, "mDNS collection failed");
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, "mDNS collection thread failed");
                return Vec::new();
            }
        };

        for (hostname, host) in &hosts {
            debug!(
                hostname = %hostname,
                ip = %host.ip,
                elapsed_ms = host.elapsed.as_millis() as u64,
                "mDNS host collected"
            );
        }

        if cancel.is_cancelled() {
            return Vec::new();
        }

        let candidates: Vec<BridgeDiscoveryResult> = hosts
            .values()
            .map(|host| host.ip)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|ip| BridgeDiscoveryResult::candidate(ip.to_string()))
            .collect();

        self.context
            .validation(candidates, &self.reporter)
            .execute(cancel)
            .await
    }
}

/// Creates the mDNS discovery method
pub fn method(context: &MethodContext) -> Box<dyn DiscoveryMethod> {
    Box::new(MethodSearch::new(
        DiscoveryClassType::Mdns,
        context.clone(),
        MdnsTask::new,
    ))
}
