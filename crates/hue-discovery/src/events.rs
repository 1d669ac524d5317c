//! Lifecycle telemetry.
//!
//! Structured [`LifecycleEvent`]s are translated into an event name plus a
//! string-keyed field map and handed to a [`TelemetrySink`]. Event names and
//! field keys are consumed by external tooling and must stay stable.

use hue_discovery_core::DiscoveryClassType;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

pub const DISCOVERY_STARTED: &str = "discovery started";
pub const DISCOVERY_FINISHED: &str = "discovery finished";
pub const DISCOVERY_METHOD_STARTED: &str = "discovery method started";
pub const DISCOVERY_METHOD_FINISHED: &str = "discovery method finished";
pub const BRIDGE_DISCOVERED: &str = "bridge discovered";

pub const FIELD_REQUEST_ID: &str = "request id";
pub const FIELD_METHOD: &str = "method";
pub const FIELD_DURATION: &str = "duration";
pub const FIELD_STATUS: &str = "status";
pub const FIELD_BRIDGE_IP: &str = "bridge ip";

/// How a search or a single method ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventStatus {
    Completed,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Completed => "success",
            EventStatus::Cancelled => "cancelled",
        }
    }
}

/// Events emitted over the life of one search
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    DiscoveryStarted {
        request_id: Uuid,
    },
    DiscoveryMethodStarted {
        request_id: Uuid,
        method: DiscoveryClassType,
    },
    BridgeDiscovered {
        request_id: Uuid,
        method: DiscoveryClassType,
        duration: Duration,
        ip: String,
    },
    DiscoveryMethodFinished {
        request_id: Uuid,
        method: DiscoveryClassType,
        duration: Duration,
        status: EventStatus,
    },
    DiscoveryFinished {
        request_id: Uuid,
        duration: Duration,
        status: EventStatus,
    },
}

impl LifecycleEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::DiscoveryStarted { .. } => DISCOVERY_STARTED,
            LifecycleEvent::DiscoveryMethodStarted { .. } => DISCOVERY_METHOD_STARTED,
            LifecycleEvent::BridgeDiscovered { .. } => BRIDGE_DISCOVERED,
            LifecycleEvent::DiscoveryMethodFinished { .. } => DISCOVERY_METHOD_FINISHED,
            LifecycleEvent::DiscoveryFinished { .. } => DISCOVERY_FINISHED,
        }
    }

    /// Wire fields of the event. Durations are whole milliseconds.
    pub fn fields(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        let mut put = |key: &str, value: String| {
            fields.insert(key.to_string(), value);
        };

        match self {
            LifecycleEvent::DiscoveryStarted { request_id } => {
                put(FIELD_REQUEST_ID, request_id.to_string());
            }
            LifecycleEvent::DiscoveryMethodStarted { request_id, method } => {
                put(FIELD_REQUEST_ID, request_id.to_string());
                put(FIELD_METHOD, method.as_str().to_string());
            }
            LifecycleEvent::BridgeDiscovered {
                request_id,
                method,
                duration,
                ip,
            } => {
                put(FIELD_REQUEST_ID, request_id.to_string());
                put(FIELD_METHOD, method.as_str().to_string());
                put(FIELD_DURATION, millis(duration));
                put(FIELD_BRIDGE_IP, ip.clone());
            }
            LifecycleEvent::DiscoveryMethodFinished {
                request_id,
                method,
                duration,
                status,
            } => {
                put(FIELD_REQUEST_ID, request_id.to_string());
                put(FIELD_METHOD, method.as_str().to_string());
                put(FIELD_DURATION, millis(duration));
                put(FIELD_STATUS, status.as_str().to_string());
            }
            LifecycleEvent::DiscoveryFinished {
                request_id,
                duration,
                status,
            } => {
                put(FIELD_REQUEST_ID, request_id.to_string());
                put(FIELD_DURATION, millis(duration));
                put(FIELD_STATUS, status.as_str().to_string());
            }
        }

        fields
    }
}

fn millis(duration: &Duration) -> String {
    duration.as_millis().to_string()
}

/// Destination for translated telemetry events
pub trait TelemetrySink: Send + Sync {
    fn send(&self, name: &str, fields: &BTreeMap<String, String>);
}

/// Writes telemetry to the `tracing` log under the `telemetry` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TelemetrySink for TracingSink {
    fn send(&self, name: &str, fields: &BTreeMap<String, String>) {
        info!(target: "telemetry", event = name, ?fields, "Discovery telemetry");
    }
}

/// Translates lifecycle events and forwards them to a sink
#[derive(Clone)]
pub struct EventNotifier {
    sink: Arc<dyn TelemetrySink>,
}

impl EventNotifier {
    pub fn new(sink: Arc<dyn TelemetrySink>) -> Self {
        Self { sink }
    }

    pub fn notify(&self, event: LifecycleEvent) {
        self.sink.send(event.name(), &event.fields());
    }
}

impl Default for EventNotifier {
    fn default() -> Self {
        Self::new(Arc::new(TracingSink))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(String, BTreeMap<String, String>)>>,
    }

    impl TelemetrySink for Recorder {
        fn send(&self, name: &str, fields: &BTreeMap<String, String>) {
            self.events.lock().push((name.to_string(), fields.clone()));
        }
    }

    #[test]
    fn test_bridge_discovered_fields() {
        let request_id = Uuid::new_v4();
        let event = LifecycleEvent::BridgeDiscovered {
            request_id,
            method: DiscoveryClassType::Ipscan,
            duration: Duration::from_millis(1534),
            ip: "192.168.1.20".to_string(),
        };

        assert_eq!(event.name(), "bridge discovered");
        let fields = event.fields();
        assert_eq!(fields["request id"], request_id.to_string());
        assert_eq!(fields["method"], "ipscan");
        assert_eq!(fields["duration"], "1534");
        assert_eq!(fields["bridge ip"], "192.168.1.20");
        assert_eq!(fields.len(), 4);
    }

    #[test]
    fn test_finished_status_strings() {
        let request_id = Uuid::new_v4();
        let done = LifecycleEvent::DiscoveryFinished {
            request_id,
            duration: Duration::ZERO,
            status: EventStatus::Completed,
        };
        let stopped = LifecycleEvent::DiscoveryMethodFinished {
            request_id,
            method: DiscoveryClassType::Nupnp,
            duration: Duration::from_millis(7),
            status: EventStatus::Cancelled,
        };

        assert_eq!(done.name(), "discovery finished");
        assert_eq!(done.fields()["status"], "success");
        assert_eq!(stopped.name(), "discovery method finished");
        assert_eq!(stopped.fields()["status"], "cancelled");
        assert_eq!(stopped.fields()["method"], "nupnp");
    }

    #[test]
    fn test_notifier_forwards_to_sink() {
        let recorder = Arc::new(Recorder::default());
        let notifier = EventNotifier::new(recorder.clone());
        let request_id = Uuid::new_v4();

        notifier.notify(LifecycleEvent::DiscoveryStarted { request_id });
        notifier.notify(LifecycleEvent::DiscoveryMethodStarted {
            request_id,
            method: DiscoveryClassType::Mdns,
        });

        let events = recorder.events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, "discovery started");
        assert_eq!(events[0].1.len(), 1);
        assert_eq!(events[1].0, "discovery method started");
        assert_eq!(events[1].1["method"], "mdns");
    }
}
