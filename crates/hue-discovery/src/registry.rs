//! Maps discovery method types to their constructors.

use crate::method::{DiscoveryMethod, MethodContext};
use crate::methods::{ipscan, mdns, nupnp, upnp};
use hue_discovery_core::{DiscoveryClassType, DiscoveryOptions};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Builds a method instance for one search, or `None` if unavailable
pub type MethodFactory =
    Arc<dyn Fn(&MethodContext) -> Option<Box<dyn DiscoveryMethod>> + Send + Sync>;

fn always(build: fn(&MethodContext) -> Box<dyn DiscoveryMethod>) -> MethodFactory {
    Arc::new(move |ctx: &MethodContext| Some(build(ctx)))
}

/// Discovery method factories keyed by type
#[derive(Clone, Default)]
pub struct MethodRegistry {
    factories: HashMap<DiscoveryClassType, MethodFactory>,
}

impl MethodRegistry {
    /// Registry with no methods
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the four built-in strategies
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry
            .register(DiscoveryClassType::Upnp, always(upnp::method))
            .register(DiscoveryClassType::Nupnp, always(nupnp::method))
            .register(DiscoveryClassType::Mdns, always(mdns::method))
            .register(DiscoveryClassType::Ipscan, always(ipscan::method));
        registry
    }

    /// Registers `factory` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: DiscoveryClassType, factory: MethodFactory) -> &mut Self {
        self.factories.insert(kind, factory);
        self
    }

    pub fn unregister(&mut self, kind: DiscoveryClassType) -> Option<MethodFactory> {
        self.factories.remove(&kind)
    }

    pub fn contains(&self, kind: DiscoveryClassType) -> bool {
        self.factories.contains_key(&kind)
    }

    /// Instantiates the methods selected by `options`, in processing order.
    ///
    /// Types without a factory, or whose factory yields `None`, are skipped.
    pub fn resolve(
        &self,
        options: DiscoveryOptions,
        context: &MethodContext,
    ) -> Vec<Box<dyn DiscoveryMethod>> {
        DiscoveryClassType::resolve(options)
            .into_iter()
            .filter_map(|kind| {
                let method = self.factories.get(&kind).and_then(|factory| factory(context));
                if method.is_none() {
                    debug!(method = %kind, "Discovery method unavailable");
                }
                method
            })
            .collect()
    }
}
