//! # Hue Discovery
//!
//! Finds Philips Hue bridges on the local network.
//!
//! ## Methods
//!
//! - **mDNS**: browses `_hue._tcp` and `_hap._tcp` and resolves the hosts
//! - **IP scan**: probes every address of the local subnet
//! - **UPnP**: SSDP `M-SEARCH` over multicast
//! - **NUPnP**: asks the meethue cloud endpoint
//!
//! Every candidate is confirmed by fetching its config endpoint before it is
//! reported. A search runs the requested methods one at a time and merges
//! their results by IP.
//!
//! ## Example
//!
//! ```no_run
//! use hue_discovery::{
//!     BridgeDiscovery, BridgeDiscoveryResult, DiscoveryConfig, DiscoveryOptions, ReturnCode,
//! };
//! use std::sync::mpsc;
//!
//! let discovery = BridgeDiscovery::new(DiscoveryConfig::default())?;
//! let (tx, rx) = mpsc::channel();
//!
//! discovery.search_with(
//!     DiscoveryOptions::MDNS | DiscoveryOptions::UPNP,
//!     Some(Box::new(move |bridges: Vec<BridgeDiscoveryResult>, code: ReturnCode| {
//!         let _ = tx.send((bridges, code));
//!     })),
//! );
//!
//! let (bridges, code) = rx.recv().unwrap();
//! for bridge in bridges {
//!     println!("{} ({})", bridge, code);
//! }
//! # Ok::<(), hue_discovery::DiscoveryError>(())
//! ```

pub mod check_ip;
pub mod discovery;
pub mod dispatcher;
pub mod events;
pub mod http;
pub mod job;
pub mod method;
pub mod methods;
pub mod net;
pub mod provider;
pub mod registry;
pub mod runner;

pub use check_ip::{CheckIpTask, IpValidationFanOut};
pub use discovery::{BridgeDiscovery, BridgeDiscoveryBuilder, SearchCallback};
pub use dispatcher::SerializingDispatcher;
pub use events::{EventNotifier, EventStatus, LifecycleEvent, TelemetrySink, TracingSink};
pub use http::{HttpClient, HttpResponse, ReqwestHttpClient};
pub use job::{CancellableJob, JobOutcome, JobState, Task};
pub use method::{DiscoveryMethod, MethodContext, MethodSearch, Reporter, ResultCallback};
pub use provider::{ProviderEvent, ProviderFactory, ServiceDiscoveryProvider};
pub use registry::{MethodFactory, MethodRegistry};
pub use runner::SequentialMethodRunner;

pub use hue_discovery_core::{
    BridgeDiscoveryResult, DiscoveryClassType, DiscoveryConfig, DiscoveryError, DiscoveryOptions,
    Result, ReturnCode,
};
