//! Core value types shared by the discovery engine.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A bridge confirmed by its config endpoint.
///
/// Values are immutable once built; the discovery engine only ever hands out
/// results that passed validation, except for the IP-only seeds fed into the
/// validation fan-out (see [`BridgeDiscoveryResult::candidate`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BridgeDiscoveryResult {
    unique_id: String,
    ip: String,
    api_version: String,
    model_id: String,
    name: String,
    swversion: String,
}

impl BridgeDiscoveryResult {
    /// Creates a fully populated result.
    pub fn new(
        unique_id: impl Into<String>,
        ip: impl Into<String>,
        api_version: impl Into<String>,
        model_id: impl Into<String>,
        name: impl Into<String>,
        swversion: impl Into<String>,
    ) -> Self {
        Self {
            unique_id: unique_id.into(),
            ip: ip.into(),
            api_version: api_version.into(),
            model_id: model_id.into(),
            name: name.into(),
            swversion: swversion.into(),
        }
    }

    /// Creates an unvalidated candidate carrying only an IP address.
    pub fn candidate(ip: impl Into<String>) -> Self {
        Self::new("", ip, "", "", "", "")
    }

    /// Creates a candidate with the hints a protocol reported about it.
    pub fn hinted(
        ip: impl Into<String>,
        unique_id: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        Self::new(unique_id, ip, api_version, "", "", "")
    }

    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    pub fn ip(&self) -> &str {
        &self.ip
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn swversion(&self) -> &str {
        &self.swversion
    }
}

impl fmt::Display for BridgeDiscoveryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.unique_id, self.ip)
    }
}

bitflags! {
    /// Set of discovery methods requested for one search.
    ///
    /// Unknown bits are retained so a caller-supplied value outside the known
    /// flags can be detected and rejected instead of silently truncated.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DiscoveryOptions: u32 {
        const UPNP = 1;
        const IPSCAN = 1 << 1;
        const NUPNP = 1 << 2;
        const MDNS = 1 << 3;
    }
}

impl Default for DiscoveryOptions {
    /// mDNS plus the cloud endpoint. UPnP is legacy and off by default.
    fn default() -> Self {
        DiscoveryOptions::MDNS | DiscoveryOptions::NUPNP
    }
}

impl FromStr for DiscoveryOptions {
    type Err = String;

    /// Parses a comma separated list such as `"mdns,nupnp"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut options = DiscoveryOptions::empty();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            options |= part.parse::<DiscoveryClassType>()?.option();
        }
        Ok(options)
    }
}

/// Terminal outcome of exactly one search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReturnCode {
    /// Search ran to completion. An empty result list is still a success.
    Success,
    /// Another search is in flight on the same instance.
    Busy,
    /// A required argument was missing.
    NullParameter,
    /// The search was stopped by the caller; results are partial.
    Stopped,
    /// None of the requested options maps to a usable discovery method.
    MissingDiscoveryMethods,
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReturnCode::Success => write!(f, "Success"),
            ReturnCode::Busy => write!(f, "Busy"),
            ReturnCode::NullParameter => write!(f, "NullParameter"),
            ReturnCode::Stopped => write!(f, "Stopped"),
            ReturnCode::MissingDiscoveryMethods => write!(f, "MissingDiscoveryMethods"),
        }
    }
}

/// Identifies which discovery strategy produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryClassType {
    Upnp,
    Nupnp,
    Mdns,
    Ipscan,
}

impl DiscoveryClassType {
    /// Processing order used by the sequential runner.
    pub const PRIORITY_ORDER: [DiscoveryClassType; 4] = [
        DiscoveryClassType::Mdns,
        DiscoveryClassType::Ipscan,
        DiscoveryClassType::Upnp,
        DiscoveryClassType::Nupnp,
    ];

    /// Name used in telemetry events.
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoveryClassType::Upnp => "upnp",
            DiscoveryClassType::Nupnp => "nupnp",
            DiscoveryClassType::Mdns => "mdns",
            DiscoveryClassType::Ipscan => "ipscan",
        }
    }

    /// Position in [`Self::PRIORITY_ORDER`]; lower runs first.
    pub fn priority(&self) -> usize {
        match self {
            DiscoveryClassType::Mdns => 0,
            DiscoveryClassType::Ipscan => 1,
            DiscoveryClassType::Upnp => 2,
            DiscoveryClassType::Nupnp => 3,
        }
    }

    /// The option bit selecting this method.
    pub fn option(&self) -> DiscoveryOptions {
        match self {
            DiscoveryClassType::Upnp => DiscoveryOptions::UPNP,
            DiscoveryClassType::Nupnp => DiscoveryOptions::NUPNP,
            DiscoveryClassType::Mdns => DiscoveryOptions::MDNS,
            DiscoveryClassType::Ipscan => DiscoveryOptions::IPSCAN,
        }
    }

    /// Methods selected by `options`, in processing order.
    pub fn resolve(options: DiscoveryOptions) -> Vec<DiscoveryClassType> {
        Self::PRIORITY_ORDER
            .into_iter()
            .filter(|method| options.contains(method.option()))
            .collect()
    }
}

impl fmt::Display for DiscoveryClassType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DiscoveryClassType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "upnp" => Ok(DiscoveryClassType::Upnp),
            "nupnp" => Ok(DiscoveryClassType::Nupnp),
            "mdns" => Ok(DiscoveryClassType::Mdns),
            "ipscan" => Ok(DiscoveryClassType::Ipscan),
            other => Err(format!("unknown discovery method '{}'", other)),
        }
    }
}
