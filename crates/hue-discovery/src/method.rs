//! The uniform contract every discovery strategy implements.

use crate::check_ip::IpValidationFanOut;
use crate::events::{EventNotifier, EventStatus, LifecycleEvent};
use crate::http::HttpClient;
use crate::job::{CancellableJob, Task};
use crate::provider::ProviderFactory;
use hue_discovery_core::{BridgeDiscoveryResult, DiscoveryClassType, DiscoveryConfig, ReturnCode};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tracing::{debug, info};
use uuid::Uuid;

/// Completion callback of a single method search
pub type ResultCallback = Box<dyn FnOnce(Vec<BridgeDiscoveryResult>, ReturnCode) + Send + 'static>;

/// One discovery strategy.
///
/// Instances live for a single orchestrated search.
pub trait DiscoveryMethod: Send + Sync {
    /// Starts a search. Returns false, without emitting anything, if this
    /// instance is already searching.
    fn search(&self, callback: ResultCallback) -> bool;

    /// Requests the running search to stop without waiting for it.
    fn cancel(&self) -> bool;

    /// Blocks until the current search has delivered its callback.
    fn wait(&self);

    fn is_searching(&self) -> bool;

    fn method_type(&self) -> DiscoveryClassType;

    /// Stops the running search and waits for it.
    ///
    /// The callback still fires, with partial results and `Stopped`.
    fn stop(&self) {
        self.cancel();
        self.wait();
    }
}

/// Everything a method needs for the search it takes part in
#[derive(Clone)]
pub struct MethodContext {
    pub request_id: Uuid,
    pub handle: Handle,
    pub config: Arc<DiscoveryConfig>,
    pub http: Arc<dyn HttpClient>,
    pub notifier: EventNotifier,
    pub provider_factory: ProviderFactory,
}

impl MethodContext {
    /// Builds a validation fan-out that reports each confirmed bridge.
    pub fn validation(
        &self,
        candidates: Vec<BridgeDiscoveryResult>,
        reporter: &Reporter,
    ) -> IpValidationFanOut {
        let reporter = reporter.clone();
        IpValidationFanOut::new(
            candidates,
            self.config.config_path.clone(),
            Arc::clone(&self.http),
            self.handle.clone(),
        )
        .on_checked(Arc::new(move |ip, bridge| {
            if bridge.is_some() {
                reporter.bridge_discovered(ip);
            }
        }))
    }
}

/// Emits the lifecycle events of one method run
#[derive(Clone)]
pub struct Reporter {
    notifier: EventNotifier,
    request_id: Uuid,
    method: DiscoveryClassType,
    started: Instant,
}

impl Reporter {
    pub fn new(notifier: EventNotifier, request_id: Uuid, method: DiscoveryClassType) -> Self {
        Self {
            notifier,
            request_id,
            method,
            started: Instant::now(),
        }
    }

    pub fn method(&self) -> DiscoveryClassType {
        self.method
    }

    fn method_started(&self) {
        self.notifier.notify(LifecycleEvent::DiscoveryMethodStarted {
            request_id: self.request_id,
            method: self.method,
        });
    }

    fn method_finished(&self, status: EventStatus) {
        self.notifier.notify(LifecycleEvent::DiscoveryMethodFinished {
            request_id: self.request_id,
            method: self.method,
            duration: self.started.elapsed(),
            status,
        });
    }

    pub fn bridge_discovered(&self, ip: &str) {
        debug!(method = %self.method, ip, "Bridge discovered");
        self.notifier.notify(LifecycleEvent::BridgeDiscovered {
            request_id: self.request_id,
            method: self.method,
            duration: self.started.elapsed(),
            ip: ip.to_string(),
        });
    }
}

type TaskFactory<T> = Box<dyn Fn(&MethodContext, Reporter) -> T + Send + Sync>;

/// [`DiscoveryMethod`] that runs a fresh protocol task per search.
pub struct MethodSearch<T>
where
    T: Task<Output = Vec<BridgeDiscoveryResult>>,
{
    method: DiscoveryClassType,
    context: MethodContext,
    make_task: TaskFactory<T>,
    job: Mutex<Option<Arc<CancellableJob<T>>>>,
}

impl<T> MethodSearch<T>
where
    T: Task<Output = Vec<BridgeDiscoveryResult>>,
{
    pub fn new<F>(method: DiscoveryClassType, context: MethodContext, make_task: F) -> Self
    where
        F: Fn(&MethodContext, Reporter) -> T + Send + Sync + 'static,
    {
        Self {
            method,
            context,
            make_task: Box::new(make_task),
            job: Mutex::new(None),
        }
    }

    fn current_job(&self) -> Option<Arc<CancellableJob<T>>> {
        self.job.lock().clone()
    }
}

impl<T> DiscoveryMethod for MethodSearch<T>
where
    T: Task<Output = Vec<BridgeDiscoveryResult>>,
{
    fn search(&self, callback: ResultCallback) -> bool {
        let reporter = Reporter::new(
            self.context.notifier.clone(),
            self.context.request_id,
            self.method,
        );
        let task = (self.make_task)(&self.context, reporter.clone());
        let job = Arc::new(CancellableJob::new(task, self.context.handle.clone()));

        {
            let mut slot = self.job.lock();
            // A cancelled job still counts until its callback has returned
            if slot.as_ref().is_some_and(|current| !current.is_finished()) {
                debug!(method = %self.method, "Search already active");
                return false;
            }
            *slot = Some(Arc::clone(&job));
        }

        info!(method = %self.method, "Discovery method started");
        reporter.method_started();

        job.run(move |outcome| {
            let (status, code) = if outcome.cancelled {
                (EventStatus::Cancelled, ReturnCode::Stopped)
            } else {
                (EventStatus::Completed, ReturnCode::Success)
            };
            info!(
                method = %reporter.method(),
                results = outcome.output.len(),
                status = status.as_str(),
                "Discovery method finished"
            );
            reporter.method_finished(status);
            callback(outcome.output, code);
        });

        true
    }

    fn cancel(&self) -> bool {
        self.current_job().is_some_and(|job| job.cancel())
    }

    fn wait(&self) {
        if let Some(job) = self.current_job() {
            job.wait();
        }
    }

    fn is_searching(&self) -> bool {
        self.current_job().is_some_and(|job| job.is_running())
    }

    fn method_type(&self) -> DiscoveryClassType {
        self.method
    }
}
