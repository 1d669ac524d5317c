//! The public discovery entry point.

use crate::dispatcher::SerializingDispatcher;
use crate::events::{EventNotifier, EventStatus, LifecycleEvent, TelemetrySink, TracingSink};
use crate::http::{HttpClient, ReqwestHttpClient};
use crate::job::{CancellableJob, JobOutcome};
use crate::method::MethodContext;
use crate::provider::{mdns_sd_factory, ProviderFactory};
use crate::registry::MethodRegistry;
use crate::runner::SequentialMethodRunner;
use hue_discovery_core::{
    BridgeDiscoveryResult, DiscoveryClassType, DiscoveryConfig, DiscoveryError, DiscoveryOptions,
    Result, ReturnCode,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Receives the outcome of one search, exactly once
pub type SearchCallback = Box<dyn FnOnce(Vec<BridgeDiscoveryResult>, ReturnCode) + Send + 'static>;

const DISPATCHER_THREAD: &str = "hue-discovery-callbacks";
const RUNTIME_THREAD: &str = "hue-discovery";

/// Identity and start time of the current search
#[derive(Debug, Clone, Copy)]
struct SearchSession {
    request_id: Uuid,
    start_time: Instant,
}

impl SearchSession {
    fn new() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            start_time: Instant::now(),
        }
    }
}

#[derive(Default)]
struct SearchState {
    job: Option<Arc<CancellableJob<SequentialMethodRunner>>>,
    /// Present from acceptance of a search until its outcome is posted
    callback: Option<SearchCallback>,
    session: Option<SearchSession>,
}

struct Shared {
    state: Mutex<SearchState>,
    dispatcher: SerializingDispatcher,
    notifier: EventNotifier,
}

impl Shared {
    fn dispatch(&self, callback: SearchCallback, results: Vec<BridgeDiscoveryResult>, code: ReturnCode) {
        if !self.dispatcher.post(move || callback(results, code)) {
            warn!(code = %code, "Search callback could not be delivered");
        }
    }

    fn finish(&self, outcome: JobOutcome<Vec<BridgeDiscoveryResult>>) {
        let (callback, session) = {
            let mut state = self.state.lock();
            (state.callback.take(), state.session)
        };

        let (status, code) = if outcome.cancelled {
            (EventStatus::Cancelled, ReturnCode::Stopped)
        } else {
            (EventStatus::Completed, ReturnCode::Success)
        };

        if let Some(session) = session {
            let duration = session.start_time.elapsed();
            info!(
                request_id = %session.request_id,
                results = outcome.output.len(),
                duration_ms = duration.as_millis() as u64,
                status = status.as_str(),
                "Discovery finished"
            );
            self.notifier.notify(LifecycleEvent::DiscoveryFinished {
                request_id: session.request_id,
                duration,
                status,
            });
        }

        match callback {
            Some(callback) => self.dispatch(callback, outcome.output, code),
            None => warn!("Search finished without a pending callback"),
        }
    }
}

/// Finds Hue bridges on the local network.
///
/// One search runs at a time. Each search runs the requested methods in
/// the order mDNS, IP scan, UPnP, NUPnP and merges their results by IP.
/// Callbacks are delivered on a dedicated thread, never on the calling one.
///
/// # Example
///
/// ```no_run
/// use hue_discovery::{BridgeDiscovery, DiscoveryConfig};
///
/// let discovery = BridgeDiscovery::new(DiscoveryConfig::default())?;
/// discovery.search(|bridges, code| {
///     println!("{}: {} bridges", code, bridges.len());
/// });
/// # Ok::<(), hue_discovery::DiscoveryError>(())
/// ```
pub struct BridgeDiscovery {
    shared: Arc<Shared>,
    config: Arc<DiscoveryConfig>,
    registry: MethodRegistry,
    http: Arc<dyn HttpClient>,
    provider_factory: ProviderFactory,
    handle: Handle,
    runtime: Option<Runtime>,
}

impl BridgeDiscovery {
    /// Creates a discovery instance with the built-in methods.
    pub fn new(config: DiscoveryConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> BridgeDiscoveryBuilder {
        BridgeDiscoveryBuilder::default()
    }

    /// Searches with the default options.
    pub fn search<F>(&self, callback: F)
    where
        F: FnOnce(Vec<BridgeDiscoveryResult>, ReturnCode) + Send + 'static,
    {
        self.search_with(DiscoveryOptions::default(), Some(Box::new(callback)));
    }

    /// Starts a search with the methods selected by `options`.
    ///
    /// Returns immediately. The callback receives `Busy` if a search is
    /// already running and `MissingDiscoveryMethods` if no requested method
    /// is available. Without a callback nothing happens.
    pub fn search_with(&self, options: DiscoveryOptions, callback: Option<SearchCallback>) {
        let Some(callback) = callback else {
            warn!("Search requested without a callback; ignoring");
            return;
        };

        // Reserve the slot; the callback stays parked here until the outcome
        {
            let mut state = self.shared.state.lock();
            if state.callback.is_some() {
                drop(state);
                debug!("Search already in progress");
                self.shared.dispatch(callback, Vec::new(), ReturnCode::Busy);
                return;
            }
            state.callback = Some(callback);
        }

        let session = SearchSession::new();
        let context = MethodContext {
            request_id: session.request_id,
            handle: self.handle.clone(),
            config: Arc::clone(&self.config),
            http: Arc::clone(&self.http),
            notifier: self.shared.notifier.clone(),
            provider_factory: Arc::clone(&self.provider_factory),
        };

        let methods = self.registry.resolve(options, &context);
        if methods.is_empty() {
            warn!(options = options.bits(), "No discovery method available for options");
            let callback = self.shared.state.lock().callback.take();
            if let Some(callback) = callback {
                self.shared
                    .dispatch(callback, Vec::new(), ReturnCode::MissingDiscoveryMethods);
            }
            return;
        }

        let kinds: Vec<DiscoveryClassType> = methods.iter().map(|m| m.method_type()).collect();
        let job = Arc::new(CancellableJob::new(
            SequentialMethodRunner::new(methods),
            self.handle.clone(),
        ));
        {
            let mut state = self.shared.state.lock();
            state.job = Some(Arc::clone(&job));
            state.session = Some(session);
        }

        info!(request_id = %session.request_id, methods = ?kinds, "Discovery started");
        self.shared.notifier.notify(LifecycleEvent::DiscoveryStarted {
            request_id: session.request_id,
        });

        let shared = Arc::clone(&self.shared);
        job.run(move |outcome| shared.finish(outcome));
    }

    pub fn is_searching(&self) -> bool {
        self.shared
            .state
            .lock()
            .job
            .as_ref()
            .is_some_and(|job| job.is_running())
    }

    /// Stops the running search and blocks until its callback is posted.
    ///
    /// The callback receives the partial results and `Stopped`. Does nothing
    /// when idle. Must not be called from inside the discovery runtime.
    pub fn stop(&self) {
        let job = self.shared.state.lock().job.clone();
        if let Some(job) = job {
            if job.cancel() {
                info!("Stopping discovery");
            }
            job.wait();
        }
    }

    /// Request id of the current or most recent search
    pub fn request_id(&self) -> Option<Uuid> {
        self.shared.state.lock().session.map(|session| session.request_id)
    }
}

impl Drop for BridgeDiscovery {
    fn drop(&mut self) {
        self.stop();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Configures a [`BridgeDiscovery`] with replacement collaborators
#[derive(Default)]
pub struct BridgeDiscoveryBuilder {
    config: DiscoveryConfig,
    registry: Option<MethodRegistry>,
    sink: Option<Arc<dyn TelemetrySink>>,
    http: Option<Arc<dyn HttpClient>>,
    provider_factory: Option<ProviderFactory>,
}

impl BridgeDiscoveryBuilder {
    pub fn config(mut self, config: DiscoveryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn registry(mut self, registry: MethodRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn telemetry_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn http_client(mut self, http: Arc<dyn HttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn provider_factory(mut self, factory: ProviderFactory) -> Self {
        self.provider_factory = Some(factory);
        self
    }

    pub fn build(self) -> Result<BridgeDiscovery> {
        self.config.validate()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.worker_threads)
            .thread_name(RUNTIME_THREAD)
            .enable_all()
            .build()
            .map_err(|e| DiscoveryError::Runtime(format!("failed to build runtime: {}", e)))?;

        let http: Arc<dyn HttpClient> = match self.http {
            Some(http) => http,
            None => Arc::new(ReqwestHttpClient::new(self.config.http_timeout())?),
        };

        let sink = self.sink.unwrap_or_else(|| Arc::new(TracingSink));

        Ok(BridgeDiscovery {
            shared: Arc::new(Shared {
                state: Mutex::new(SearchState::default()),
                dispatcher: SerializingDispatcher::new(DISPATCHER_THREAD)?,
                notifier: EventNotifier::new(sink),
            }),
            config: Arc::new(self.config),
            registry: self.registry.unwrap_or_else(MethodRegistry::with_defaults),
            http,
            provider_factory: self.provider_factory.unwrap_or_else(mdns_sd_factory),
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }
}
