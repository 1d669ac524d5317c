//! Brute-force subnet scan.
//!
//! Every host address of the local /24 (or narrower) subnet is probed with a
//! TCP connect. Addresses that accept are validated as bridges.

use crate::job::Task;
use crate::method::{DiscoveryMethod, MethodContext, MethodSearch, Reporter};
use crate::net;
use async_trait::async_trait;
use hue_discovery_core::{BridgeDiscoveryResult, DiscoveryClassType, IpscanConfig};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

async fn is_reachable(ip: Ipv4Addr, port: u16, timeout: Duration) -> bool {
    matches!(
        tokio::time::timeout(timeout, TcpStream::connect((ip, port))).await,
        Ok(Ok(_))
    )
}

/// Probes `hosts` concurrently and returns the reachable ones.
///
/// At most `config.max_concurrent` connects are in flight. `on_found` runs
/// as soon as an address answers. A cancelled scan returns nothing.
pub async fn probe_hosts<F>(
    hosts: Vec<Ipv4Addr>,
    config: &IpscanConfig,
    cancel: &CancellationToken,
    on_found: F,
) -> Vec<Ipv4Addr>
where
    F: Fn(Ipv4Addr),
{
    let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
    let mut probes = JoinSet::new();

    for ip in hosts {
        let permits = Arc::clone(&permits);
        let port = config.port;
        let timeout = config.connect_timeout();
        probes.spawn(async move {
            let _permit = permits.acquire_owned().await.ok()?;
            is_reachable(ip, port, timeout).await.then_some(ip)
        });
    }

    let mut reachable = Vec::new();
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                probes.abort_all();
                return Vec::new();
            }
            joined = probes.join_next() => match joined {
                Some(Ok(Some(ip))) => {
                    on_found(ip);
                    reachable.push(ip);
                }
                Some(Ok(None)) => {}
                Some(Err(e)) => debug!(error = %e, "Probe task failed"),
                None => break,
            },
        }
    }

    reachable.sort();
    reachable
}

/// Protocol task behind the IP scan method
pub struct IpscanTask {
    context: MethodContext,
    reporter: Reporter,
}

impl IpscanTask {
    pub fn new(context: &MethodContext, reporter: Reporter) -> Self {
        Self {
            context: context.clone(),
            reporter,
        }
    }
}

#[async_trait]
impl Task for IpscanTask {
    type Output = Vec<BridgeDiscoveryResult>;

    #[instrument(name = "ipscan", skip_all)]
    async fn execute(&mut self, cancel: &CancellationToken) -> Self::Output {
        let iface = match net::first_private_interface() {
            Ok(iface) => iface,
            Err(e) => {
                warn!(error = %e, "IP scan skipped");
                return Vec::new();
            }
        };

        let hosts = net::subnet_hosts(&iface);
        debug!(
            interface = %iface.name,
            ip = %iface.ip,
            hosts = hosts.len(),
            "Scanning subnet"
        );

        let method = self.reporter.method();
        let reachable = probe_hosts(hosts, &self.context.config.ipscan, cancel, |ip| {
            debug!(%method, %ip, "Host reachable, queued for validation");
        })
        .await;

        if cancel.is_cancelled() {
            return Vec::new();
        }

        let candidates = reachable
            .into_iter()
            .map(|ip| BridgeDiscoveryResult::candidate(ip.to_string()))
            .collect();

        self.context
            .validation(candidates, &self.reporter)
            .execute(cancel)
            .await
    }
}

/// Creates the IP scan discovery method
pub fn method(context: &MethodContext) -> Box<dyn DiscoveryMethod> {
    Box::new(MethodSearch::new(
        DiscoveryClassType::Ipscan,
        context.clone(),
        IpscanTask::new,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_probe_finds_listening_host() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = IpscanConfig {
            port: listener.local_addr().unwrap().port(),
            connect_timeout_ms: 500,
            max_concurrent: 2,
        };

        let found = Mutex::new(Vec::new());
        let reachable = probe_hosts(
            vec![Ipv4Addr::new(127, 0, 0, 2), Ipv4Addr::LOCALHOST],
            &config,
            &CancellationToken::new(),
            |ip| found.lock().push(ip),
        )
        .await;

        assert_eq!(reachable, vec![Ipv4Addr::LOCALHOST]);
        assert_eq!(*found.lock(), vec![Ipv4Addr::LOCALHOST]);
    }

    #[tokio::test]
    async fn test_cancelled_probe_returns_nothing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = IpscanConfig {
            port: listener.local_addr().unwrap().port(),
            ..IpscanConfig::default()
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let reachable = probe_hosts(vec![Ipv4Addr::LOCALHOST], &config, &cancel, |_| {}).await;
        assert!(reachable.is_empty());
    }

    #[tokio::test]
    async fn test_empty_host_list() {
        let reachable = probe_hosts(
            Vec::new(),
            &IpscanConfig::default(),
            &CancellationToken::new(),
            |_| {},
        )
        .await;
        assert!(reachable.is_empty());
    }
}
