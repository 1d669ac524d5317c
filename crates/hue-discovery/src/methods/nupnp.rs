//! Cloud discovery through the meethue NUPnP endpoint.

use crate::http::HttpClient;
use crate::job::Task;
use crate::method::{DiscoveryMethod, MethodContext, MethodSearch, Reporter};
use async_trait::async_trait;
use hue_discovery_core::{BridgeDiscoveryResult, DiscoveryClassType, DiscoveryError, Result};
use reqwest::Url;
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

const LEGACY_HOSTS: [&str; 2] = ["www.meethue.com", "meethue.com"];
const LEGACY_PATH: &str = "/api/nupnp";

#[derive(Debug, Deserialize)]
struct NupnpEntry {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    internalipaddress: Option<String>,
}

/// Request URL for a configured endpoint.
///
/// Legacy meethue hosts serve the bridge list under `/api/nupnp`; anything
/// else is used verbatim.
pub fn nupnp_url(configured: &str) -> String {
    let is_legacy = Url::parse(configured)
        .ok()
        .and_then(|url| url.host_str().map(|host| LEGACY_HOSTS.contains(&host)))
        .unwrap_or(false);

    if is_legacy {
        format!("{}{}", configured.trim_end_matches('/'), LEGACY_PATH)
    } else {
        configured.to_string()
    }
}

/// Extracts bridge candidates from a NUPnP response body.
///
/// Elements without an `internalipaddress` are skipped.
pub fn parse_nupnp(body: &str) -> Result<Vec<BridgeDiscoveryResult>> {
    let entries: Vec<NupnpEntry> = serde_json::from_str(body)?;

    Ok(entries
        .into_iter()
        .filter_map(|entry| {
            let ip = entry.internalipaddress.filter(|ip| !ip.is_empty())?;
            let unique_id = entry.id.unwrap_or_default().to_ascii_uppercase();
            Some(BridgeDiscoveryResult::hinted(ip, unique_id, ""))
        })
        .collect())
}

async fn fetch_candidates(http: &dyn HttpClient, url: &str) -> Result<Vec<BridgeDiscoveryResult>> {
    let response = http.get(url).await?;
    if !response.is_success() {
        return Err(DiscoveryError::http(url, format!("status {}", response.status)));
    }
    parse_nupnp(&response.body)
}

/// Protocol task behind the NUPnP method
pub struct NupnpTask {
    context: MethodContext,
    reporter: Reporter,
    url: String,
}

impl NupnpTask {
    pub fn new(context: &MethodContext, reporter: Reporter) -> Self {
        Self {
            url: nupnp_url(&context.config.nupnp.url),
            context: context.clone(),
            reporter,
        }
    }
}

#[async_trait]
impl Task for NupnpTask {
    type Output = Vec<BridgeDiscoveryResult>;

    #[instrument(name = "nupnp", skip_all)]
    async fn execute(&mut self, cancel: &CancellationToken) -> Self::Output {
        let http = Arc::clone(&self.context.http);
        let fetched = tokio::select! {
            _ = cancel.cancelled() => return Vec::new(),
            fetched = fetch_candidates(http.as_ref(), &self.url) => fetched,
        };

        let candidates = match fetched {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(url = %self.url, error = %e, "NUPnP lookup failed");
                return Vec::new();
            }
        };
        debug!(candidates = candidates.len(), "NUPnP candidates received");

        self.context
            .validation(candidates, &self.reporter)
            .execute(cancel)
            .await
    }
}

/// Creates the NUPnP discovery method
pub fn method(context: &MethodContext) -> Box<dyn DiscoveryMethod> {
    Box::new(MethodSearch::new(
        DiscoveryClassType::Nupnp,
        context.clone(),
        NupnpTask::new,
    ))
}
