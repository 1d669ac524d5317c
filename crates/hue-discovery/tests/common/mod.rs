//! Scripted discovery methods and recording collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use hue_discovery::{
    BridgeDiscovery, BridgeDiscoveryResult, DiscoveryClassType, DiscoveryMethod, MethodContext,
    MethodFactory, MethodRegistry, MethodSearch, Reporter, ReturnCode, SearchCallback, Task,
    TelemetrySink,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub type Outcome = (Vec<BridgeDiscoveryResult>, ReturnCode);

/// Methods in the order their searches started
pub type StartLog = Arc<Mutex<Vec<DiscoveryClassType>>>;

/// What a scripted method yields and how long it takes
#[derive(Clone)]
pub struct Script {
    pub kind: DiscoveryClassType,
    pub results: Vec<BridgeDiscoveryResult>,
    pub delay: Duration,
}

impl Script {
    pub fn new(kind: DiscoveryClassType, results: Vec<BridgeDiscoveryResult>) -> Self {
        Self {
            kind,
            results,
            delay: Duration::from_millis(5),
        }
    }

    pub fn slow(kind: DiscoveryClassType, results: Vec<BridgeDiscoveryResult>) -> Self {
        Self {
            kind,
            results,
            delay: Duration::from_secs(30),
        }
    }
}

/// Yields its script after the delay; a cancelled run keeps only the first result
pub struct ScriptedTask {
    script: Script,
    reporter: Reporter,
}

#[async_trait]
impl Task for ScriptedTask {
    type Output = Vec<BridgeDiscoveryResult>;

    async fn execute(&mut self, cancel: &CancellationToken) -> Self::Output {
        tokio::select! {
            _ = cancel.cancelled() => {
                self.script.results.iter().take(1).cloned().collect()
            }
            _ = tokio::time::sleep(self.script.delay) => {
                for result in &self.script.results {
                    self.reporter.bridge_discovered(result.ip());
                }
                self.script.results.clone()
            }
        }
    }
}

/// Registry whose methods play the given scripts
pub fn scripted_registry(scripts: Vec<Script>, log: &StartLog) -> MethodRegistry {
    let mut registry = MethodRegistry::new();
    for script in scripts {
        let kind = script.kind;
        let log = Arc::clone(log);
        let factory: MethodFactory = Arc::new(
            move |ctx: &MethodContext| -> Option<Box<dyn DiscoveryMethod>> {
                let script = script.clone();
                let log = Arc::clone(&log);
                Some(Box::new(MethodSearch::new(
                    kind,
                    ctx.clone(),
                    move |_: &MethodContext, reporter: Reporter| {
                        log.lock().push(script.kind);
                        ScriptedTask {
                            script: script.clone(),
                            reporter,
                        }
                    },
                )))
            },
        );
        registry.register(kind, factory);
    }
    registry
}

/// `count` raw results cycling over `distinct` bridges
pub fn repeated_bridges(count: usize, distinct: usize) -> Vec<BridgeDiscoveryResult> {
    (0..count)
        .map(|i| {
            let n = i % distinct;
            BridgeDiscoveryResult::new(
                format!("001788FFFE00000{}", n),
                format!("192.168.1.{}", 10 + n),
                "1.50.0",
                "BSB002",
                "Hue Bridge",
                "1950207110",
            )
        })
        .collect()
}

/// Sink that keeps every event
#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<(String, BTreeMap<String, String>)>>,
}

impl RecordingSink {
    pub fn names(&self) -> Vec<String> {
        self.events.lock().iter().map(|(name, _)| name.clone()).collect()
    }
}

impl TelemetrySink for RecordingSink {
    fn send(&self, name: &str, fields: &BTreeMap<String, String>) {
        self.events.lock().push((name.to_string(), fields.clone()));
    }
}

/// Callback forwarding its outcome into a channel
pub fn channel_callback() -> (SearchCallback, flume::Receiver<Outcome>) {
    let (tx, rx) = flume::unbounded();
    let callback: SearchCallback = Box::new(move |results, code| {
        let _ = tx.send((results, code));
    });
    (callback, rx)
}

pub fn discovery(registry: MethodRegistry, sink: Arc<RecordingSink>) -> BridgeDiscovery {
    BridgeDiscovery::builder()
        .registry(registry)
        .telemetry_sink(sink)
        .build()
        .expect("discovery should build")
}

pub const WAIT: Duration = Duration::from_secs(10);
