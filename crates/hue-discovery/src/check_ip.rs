//! Bridge validation: confirms candidate IPs against their config endpoint.
//!
//! [`IpValidationFanOut`] starts one [`CheckIpTask`] job per candidate, all
//! concurrently, and completes once every check has resolved. Unreachable
//! hosts and devices that are not bridges are dropped silently.

use crate::http::HttpClient;
use crate::job::{CancellableJob, Task};
use async_trait::async_trait;
use hue_discovery_core::BridgeDiscoveryResult;
use parking_lot::Mutex;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Invoked as each candidate resolves, with the confirmed bridge if any
pub type CandidateCallback = Arc<dyn Fn(&str, Option<&BridgeDiscoveryResult>) + Send + Sync>;

/// Subset of the bridge config document used for identification
#[derive(Debug, Default, Deserialize)]
struct BridgeConfigResponse {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    bridgeid: Option<String>,
    #[serde(default)]
    mac: Option<String>,
    #[serde(default)]
    apiversion: Option<String>,
    #[serde(default)]
    modelid: Option<String>,
    #[serde(default)]
    swversion: Option<String>,
}

/// Derives the bridge id from a MAC address.
///
/// `00:17:88:0a:b1:c2` becomes `001788FFFE0AB1C2`.
pub fn unique_id_from_mac(mac: &str) -> Option<String> {
    let hex: String = mac.chars().filter(|c| c.is_ascii_hexdigit()).collect();
    if hex.len() != 12 {
        return None;
    }
    Some(format!("{}FFFE{}", &hex[..6], &hex[6..]).to_ascii_uppercase())
}

/// Parses a config response body into a confirmed bridge.
///
/// Returns `None` for anything that is not positively a bridge: malformed
/// JSON, no usable unique id, or no bridge identification markers.
pub fn parse_bridge_config(ip: &str, body: &str) -> Option<BridgeDiscoveryResult> {
    let config: BridgeConfigResponse = match serde_json::from_str(body) {
        Ok(config) => config,
        Err(e) => {
            trace!(ip, error = %e, "Config response is not a bridge config object");
            return None;
        }
    };

    let unique_id = config
        .bridgeid
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_ascii_uppercase)
        .or_else(|| config.mac.as_deref().and_then(unique_id_from_mac))?;

    let model_id = config.modelid.unwrap_or_default();
    let api_version = config.apiversion.unwrap_or_default();
    let name = config.name.unwrap_or_default();

    let identified = (!model_id.is_empty() && !api_version.is_empty())
        || name.to_ascii_lowercase().contains("hue");
    if !identified {
        trace!(ip, "Config response lacks bridge identification");
        return None;
    }

    Some(BridgeDiscoveryResult::new(
        unique_id,
        ip,
        api_version,
        model_id,
        name,
        config.swversion.unwrap_or_default(),
    ))
}

/// Validates one candidate IP
pub struct CheckIpTask {
    ip: String,
    url: String,
    http: Arc<dyn HttpClient>,
}

impl CheckIpTask {
    pub fn new(ip: Ipv4Addr, config_path: &str, http: Arc<dyn HttpClient>) -> Self {
        Self {
            ip: ip.to_string(),
            url: format!("http://{}{}", ip, config_path),
            http,
        }
    }
}

#[async_trait]
impl Task for CheckIpTask {
    type Output = Option<BridgeDiscoveryResult>;

    async fn execute(&mut self, cancel: &CancellationToken) -> Self::Output {
        let response = tokio::select! {
            _ = cancel.cancelled() => return None,
            response = self.http.get(&self.url) => response,
        };

        match response {
            Ok(response) if response.is_success() => parse_bridge_config(&self.ip, &response.body),
            Ok(response) => {
                debug!(ip = %self.ip, status = response.status, "Config request rejected");
                None
            }
            Err(e) => {
                debug!(ip = %self.ip, error = %e, "Candidate unreachable");
                None
            }
        }
    }
}

/// Validates a batch of candidates concurrently
pub struct IpValidationFanOut {
    candidates: Vec<BridgeDiscoveryResult>,
    config_path: String,
    http: Arc<dyn HttpClient>,
    handle: Handle,
    on_checked: Option<CandidateCallback>,
}

impl IpValidationFanOut {
    pub fn new(
        candidates: Vec<BridgeDiscoveryResult>,
        config_path: impl Into<String>,
        http: Arc<dyn HttpClient>,
        handle: Handle,
    ) -> Self {
        Self {
            candidates,
            config_path: config_path.into(),
            http,
            handle,
            on_checked: None,
        }
    }

    /// Sets the per-candidate callback
    pub fn on_checked(mut self, callback: CandidateCallback) -> Self {
        self.on_checked = Some(callback);
        self
    }
}

#[async_trait]
impl Task for IpValidationFanOut {
    type Output = Vec<BridgeDiscoveryResult>;

    async fn execute(&mut self, cancel: &CancellationToken) -> Self::Output {
        let addresses: Vec<Ipv4Addr> = std::mem::take(&mut self.candidates)
            .iter()
            .filter_map(|candidate| match candidate.ip().parse::<Ipv4Addr>() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    debug!(ip = candidate.ip(), "Dropping candidate without an IPv4 address");
                    None
                }
            })
            .collect();

        if addresses.is_empty() || cancel.is_cancelled() {
            return Vec::new();
        }

        debug!(candidates = addresses.len(), "Validating candidates");

        let outstanding = Arc::new(AtomicUsize::new(addresses.len()));
        let confirmed = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, mut done_rx) = oneshot::channel::<()>();
        let done_tx = Arc::new(Mutex::new(Some(done_tx)));

        let mut jobs = Vec::with_capacity(addresses.len());
        for ip in addresses {
            let job = CancellableJob::new(
                CheckIpTask::new(ip, &self.config_path, Arc::clone(&self.http)),
                self.handle.clone(),
            );

            let outstanding = Arc::clone(&outstanding);
            let confirmed = Arc::clone(&confirmed);
            let done_tx = Arc::clone(&done_tx);
            let on_checked = self.on_checked.clone();

            job.run(move |outcome| {
                let ip = ip.to_string();
                if let Some(callback) = &on_checked {
                    callback(&ip, outcome.output.as_ref());
                }
                if let Some(bridge) = outcome.output {
                    confirmed.lock().push(bridge);
                }
                if outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
                    if let Some(tx) = done_tx.lock().take() {
                        let _ = tx.send(());
                    }
                }
            });
            jobs.push(job);
        }

        tokio::select! {
            _ = &mut done_rx => {}
            _ = cancel.cancelled() => {
                for job in &jobs {
                    job.cancel();
                }
                let _ = done_rx.await;
            }
        }

        let bridges = std::mem::take(&mut *confirmed.lock());
        debug!(confirmed = bridges.len(), "Validation finished");
        bridges
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HttpResponse;
    use hue_discovery_core::{DiscoveryError, Result};
    use std::collections::HashMap;
    use std::time::Duration;

    const BSB002: &str = r#"{
        "name": "Philips hue",
        "datastoreversion": "98",
        "swversion": "1941132080",
        "apiversion": "1.41.0",
        "mac": "00:17:88:0a:b1:c2",
        "bridgeid": "001788fffe0ab1c2",
        "factorynew": false,
        "modelid": "BSB002"
    }"#;

    struct MockHttp {
        responses: HashMap<String, HttpResponse>,
        delay: Duration,
    }

    #[async_trait]
    impl HttpClient for MockHttp {
        async fn get(&self, url: &str) -> Result<HttpResponse> {
            tokio::time::sleep(self.delay).await;
            self.responses
                .get(url)
                .cloned()
                .ok_or_else(|| DiscoveryError::http(url, "connection refused"))
        }
    }

    /// Answers from `inner` except for the listed URLs, which never answer
    struct PartlyHangingHttp {
        inner: MockHttp,
        hanging: Vec<String>,
    }

    #[async_trait]
    impl HttpClient for PartlyHangingHttp {
        async fn get(&self, url: &str) -> Result<HttpResponse> {
            if self.hanging.iter().any(|hanging| hanging == url) {
                std::future::pending::<()>().await;
            }
            self.inner.get(url).await
        }
    }

    fn bridge_body(id: &str) -> String {
        format!(
            r#"{{"name":"Hue Bridge","bridgeid":"{}","apiversion":"1.50.0","modelid":"BSB002","swversion":"1950207110"}}"#,
            id
        )
    }

    #[test]
    fn test_parse_bsb002_config() {
        let bridge = parse_bridge_config("192.168.1.2", BSB002).unwrap();
        assert_eq!(bridge.unique_id(), "001788FFFE0AB1C2");
        assert_eq!(bridge.ip(), "192.168.1.2");
        assert_eq!(bridge.api_version(), "1.41.0");
        assert_eq!(bridge.model_id(), "BSB002");
        assert_eq!(bridge.name(), "Philips hue");
        assert_eq!(bridge.swversion(), "1941132080");
    }

    #[test]
    fn test_unique_id_falls_back_to_mac() {
        let body = r#"{"name":"Philips hue","mac":"00:17:88:12:34:56","apiversion":"1.3.0","modelid":"BSB001"}"#;
        let bridge = parse_bridge_config("10.0.0.3", body).unwrap();
        assert_eq!(bridge.unique_id(), "001788FFFE123456");
    }

    #[test]
    fn test_unique_id_from_mac() {
        assert_eq!(
            unique_id_from_mac("ec:b5:fa:01:02:03").as_deref(),
            Some("ECB5FAFFFE010203")
        );
        assert!(unique_id_from_mac("ec:b5:fa").is_none());
    }

    #[test]
    fn test_non_bridges_are_rejected() {
        // Some other web server
        assert!(parse_bridge_config("10.0.0.4", "<html></html>").is_none());
        // No identifier at all
        assert!(parse_bridge_config("10.0.0.4", r#"{"name":"Philips hue"}"#).is_none());
        // Identifier but nothing marking it as a bridge
        assert!(parse_bridge_config("10.0.0.4", r#"{"name":"router","mac":"00:11:22:33:44:55"}"#).is_none());
        // Hue error array
        assert!(parse_bridge_config("10.0.0.4", r#"[{"error":{"type":1}}]"#).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fan_out_keeps_only_bridges() {
        let mut responses = HashMap::new();
        responses.insert(
            "http://10.0.0.2/api/config".to_string(),
            HttpResponse::ok(bridge_body("001788FFFE000002")),
        );
        responses.insert(
            "http://10.0.0.3/api/config".to_string(),
            HttpResponse::ok(bridge_body("001788FFFE000003")),
        );
        responses.insert(
            "http://10.0.0.4/api/config".to_string(),
            HttpResponse { status: 404, body: String::new() },
        );
        let http = Arc::new(MockHttp {
            responses,
            delay: Duration::from_millis(5),
        });

        let checked = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&checked);
        let mut fan_out = IpValidationFanOut::new(
            ["10.0.0.2", "10.0.0.3", "10.0.0.4", "10.0.0.5", "not-an-ip"]
                .into_iter()
                .map(BridgeDiscoveryResult::candidate)
                .collect(),
            "/api/config",
            http,
            Handle::current(),
        )
        .on_checked(Arc::new(move |ip, bridge| {
            seen.lock().push((ip.to_string(), bridge.is_some()));
        }));

        let mut bridges = fan_out.execute(&CancellationToken::new()).await;
        bridges.sort_by(|a, b| a.ip().cmp(b.ip()));

        assert_eq!(bridges.len(), 2);
        assert_eq!(bridges[0].unique_id(), "001788FFFE000002");
        assert_eq!(bridges[1].ip(), "10.0.0.3");

        let mut checked = checked.lock().clone();
        checked.sort();
        assert_eq!(
            checked,
            vec![
                ("10.0.0.2".to_string(), true),
                ("10.0.0.3".to_string(), true),
                ("10.0.0.4".to_string(), false),
                ("10.0.0.5".to_string(), false),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fan_out_with_no_candidates() {
        let http = Arc::new(MockHttp {
            responses: HashMap::new(),
            delay: Duration::ZERO,
        });
        let mut fan_out = IpValidationFanOut::new(Vec::new(), "/api/config", http, Handle::current());
        assert!(fan_out.execute(&CancellationToken::new()).await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_resolves_all_checks() {
        let mut responses = HashMap::new();
        for last in 2..10 {
            responses.insert(
                format!("http://10.0.0.{}/api/config", last),
                HttpResponse::ok(bridge_body(&format!("001788FFFE00000{}", last))),
            );
        }
        let http = Arc::new(MockHttp {
            responses,
            delay: Duration::from_secs(30),
        });

        let mut fan_out = IpValidationFanOut::new(
            (2..10)
                .map(|last| BridgeDiscoveryResult::candidate(format!("10.0.0.{}", last)))
                .collect(),
            "/api/config",
            http,
            Handle::current(),
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let bridges = tokio::time::timeout(Duration::from_secs(5), fan_out.execute(&cancel))
            .await
            .expect("cancelled fan-out must resolve");
        assert!(bridges.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_keeps_bridges_already_confirmed() {
        let mut responses = HashMap::new();
        for last in 2..8 {
            responses.insert(
                format!("http://10.0.0.{}/api/config", last),
                HttpResponse::ok(bridge_body(&format!("001788FFFE00000{}", last))),
            );
        }
        let http = Arc::new(PartlyHangingHttp {
            inner: MockHttp {
                responses,
                delay: Duration::ZERO,
            },
            hanging: (5..8)
                .map(|last| format!("http://10.0.0.{}/api/config", last))
                .collect(),
        });

        let checked = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&checked);
        let mut fan_out = IpValidationFanOut::new(
            (2..8)
                .map(|last| BridgeDiscoveryResult::candidate(format!("10.0.0.{}", last)))
                .collect(),
            "/api/config",
            http,
            Handle::current(),
        )
        .on_checked(Arc::new(move |ip, bridge| {
            seen.lock().push((ip.to_string(), bridge.is_some()));
        }));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let mut bridges = tokio::time::timeout(Duration::from_secs(5), fan_out.execute(&cancel))
            .await
            .expect("cancelled fan-out must resolve");
        bridges.sort_by(|a, b| a.ip().cmp(b.ip()));

        let ips: Vec<&str> = bridges.iter().map(|b| b.ip()).collect();
        assert_eq!(ips, vec!["10.0.0.2", "10.0.0.3", "10.0.0.4"]);
        assert_eq!(bridges[0].unique_id(), "001788FFFE000002");

        // Every check resolved, the hanging ones without a bridge
        let mut checked = checked.lock().clone();
        checked.sort();
        assert_eq!(checked.len(), 6);
        assert!(checked[..3].iter().all(|(_, found)| *found));
        assert!(checked[3..].iter().all(|(_, found)| !*found));
    }
}
