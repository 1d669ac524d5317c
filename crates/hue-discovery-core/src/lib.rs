//! # Hue Discovery Core
//!
//! Value types, errors and configuration shared by the bridge discovery
//! engine.
//!
//! - **Types**: `BridgeDiscoveryResult`, the `DiscoveryOptions` bit set,
//!   `ReturnCode` and `DiscoveryClassType`.
//! - **Errors**: `DiscoveryError` for internal and construction failures.
//! - **Configuration**: `DiscoveryConfig`, loadable from YAML with
//!   environment overrides.
//!
//! ## Example
//!
//! ```
//! use hue_discovery_core::{DiscoveryClassType, DiscoveryOptions};
//!
//! let options = DiscoveryOptions::NUPNP | DiscoveryOptions::UPNP;
//! let methods = DiscoveryClassType::resolve(options);
//! assert_eq!(methods, vec![DiscoveryClassType::Upnp, DiscoveryClassType::Nupnp]);
//! ```

pub mod config;
pub mod error;
pub mod types;

pub use config::{DiscoveryConfig, IpscanConfig, MdnsConfig, NupnpConfig, UpnpConfig};
pub use error::{DiscoveryError, Result};
pub use types::{BridgeDiscoveryResult, DiscoveryClassType, DiscoveryOptions, ReturnCode};
