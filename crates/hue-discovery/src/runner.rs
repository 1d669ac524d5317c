//! Runs the methods of one search one after another.

use crate::job::Task;
use crate::method::DiscoveryMethod;
use async_trait::async_trait;
use hue_discovery_core::{BridgeDiscoveryResult, DiscoveryClassType, ReturnCode};
use std::collections::{BTreeMap, VecDeque};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Drives a queue of methods strictly sequentially.
///
/// Results are merged by IP; a later method's result for the same IP
/// replaces an earlier one. On cancellation the running method is cancelled,
/// its partial results are merged and the rest of the queue is dropped.
pub struct SequentialMethodRunner {
    queue: VecDeque<Box<dyn DiscoveryMethod>>,
    results: BTreeMap<String, BridgeDiscoveryResult>,
}

impl SequentialMethodRunner {
    /// Queues `methods` in processing order.
    pub fn new(mut methods: Vec<Box<dyn DiscoveryMethod>>) -> Self {
        methods.sort_by_key(|method| method.method_type().priority());
        Self {
            queue: methods.into(),
            results: BTreeMap::new(),
        }
    }

    /// Methods still waiting to run
    pub fn queued(&self) -> Vec<DiscoveryClassType> {
        self.queue.iter().map(|method| method.method_type()).collect()
    }

    fn merge(&mut self, results: Vec<BridgeDiscoveryResult>) {
        for result in results {
            self.results.insert(result.ip().to_string(), result);
        }
    }
}

#[async_trait]
impl Task for SequentialMethodRunner {
    type Output = Vec<BridgeDiscoveryResult>;

    async fn execute(&mut self, cancel: &CancellationToken) -> Self::Output {
        while let Some(method) = self.queue.pop_front() {
            if cancel.is_cancelled() {
                break;
            }

            let kind = method.method_type();
            let (tx, mut rx) = oneshot::channel::<(Vec<BridgeDiscoveryResult>, ReturnCode)>();
            if !method.search(Box::new(move |results, code| {
                let _ = tx.send((results, code));
            })) {
                debug!(method = %kind, "Method refused to start; skipping");
                continue;
            }

            let delivered = tokio::select! {
                delivered = &mut rx => delivered,
                _ = cancel.cancelled() => {
                    method.cancel();
                    rx.await
                }
            };

            match delivered {
                Ok((results, code)) => {
                    debug!(method = %kind, results = results.len(), code = %code, "Method delivered");
                    self.merge(results);
                }
                Err(_) => warn!(method = %kind, "Method finished without delivering results"),
            }
        }

        if !self.queue.is_empty() {
            debug!(dropped = self.queue.len(), "Discarding queued methods");
            self.queue.clear();
        }

        std::mem::take(&mut self.results).into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::ResultCallback;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    type Log = Arc<Mutex<Vec<DiscoveryClassType>>>;

    /// Answers immediately with canned results
    struct Scripted {
        kind: DiscoveryClassType,
        results: Vec<BridgeDiscoveryResult>,
        accept: bool,
        log: Log,
    }

    impl DiscoveryMethod for Scripted {
        fn search(&self, callback: ResultCallback) -> bool {
            if !self.accept {
                return false;
            }
            self.log.lock().push(self.kind);
            callback(self.results.clone(), ReturnCode::Success);
            true
        }

        fn cancel(&self) -> bool {
            false
        }

        fn wait(&self) {}

        fn is_searching(&self) -> bool {
            false
        }

        fn method_type(&self) -> DiscoveryClassType {
            self.kind
        }
    }

    /// Holds its callback until cancelled
    struct Hanging {
        kind: DiscoveryClassType,
        partial: Vec<BridgeDiscoveryResult>,
        pending: Mutex<Option<ResultCallback>>,
        log: Log,
    }

    impl DiscoveryMethod for Hanging {
        fn search(&self, callback: ResultCallback) -> bool {
            self.log.lock().push(self.kind);
            *self.pending.lock() = Some(callback);
            true
        }

        fn cancel(&self) -> bool {
            match self.pending.lock().take() {
                Some(callback) => {
                    callback(self.partial.clone(), ReturnCode::Stopped);
                    true
                }
                None => false,
            }
        }

        fn wait(&self) {}

        fn is_searching(&self) -> bool {
            self.pending.lock().is_some()
        }

        fn method_type(&self) -> DiscoveryClassType {
            self.kind
        }
    }

    fn scripted(kind: DiscoveryClassType, results: &[(&str, &str)], log: &Log) -> Box<dyn DiscoveryMethod> {
        Box::new(Scripted {
            kind,
            results: results
                .iter()
                .map(|(ip, id)| BridgeDiscoveryResult::hinted(*ip, *id, "1.50.0"))
                .collect(),
            accept: true,
            log: Arc::clone(log),
        })
    }

    #[tokio::test]
    async fn test_runs_in_priority_order() {
        let log = Log::default();
        let mut runner = SequentialMethodRunner::new(vec![
            scripted(DiscoveryClassType::Nupnp, &[], &log),
            scripted(DiscoveryClassType::Upnp, &[], &log),
            scripted(DiscoveryClassType::Mdns, &[], &log),
            scripted(DiscoveryClassType::Ipscan, &[], &log),
        ]);
        assert_eq!(runner.queued(), DiscoveryClassType::PRIORITY_ORDER.to_vec());

        runner.execute(&CancellationToken::new()).await;
        assert_eq!(*log.lock(), DiscoveryClassType::PRIORITY_ORDER.to_vec());
    }

    #[tokio::test]
    async fn test_later_method_wins_on_same_ip() {
        let log = Log::default();
        let mut runner = SequentialMethodRunner::new(vec![
            scripted(DiscoveryClassType::Nupnp, &[("10.0.0.2", "NUPNP-ID")], &log),
            scripted(
                DiscoveryClassType::Mdns,
                &[("10.0.0.2", "MDNS-ID"), ("10.0.0.3", "MDNS-ID-3")],
                &log,
            ),
        ]);

        let results = runner.execute(&CancellationToken::new()).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].ip(), "10.0.0.2");
        assert_eq!(results[0].unique_id(), "NUPNP-ID");
        assert_eq!(results[1].unique_id(), "MDNS-ID-3");
    }

    #[tokio::test]
    async fn test_refusing_method_is_skipped() {
        let log = Log::default();
        let mut runner = SequentialMethodRunner::new(vec![
            Box::new(Scripted {
                kind: DiscoveryClassType::Mdns,
                results: vec![BridgeDiscoveryResult::candidate("10.0.0.9")],
                accept: false,
                log: Arc::clone(&log),
            }),
            scripted(DiscoveryClassType::Upnp, &[("10.0.0.4", "A")], &log),
        ]);

        let results = runner.execute(&CancellationToken::new()).await;
        assert_eq!(*log.lock(), vec![DiscoveryClassType::Upnp]);
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_keeps_partial_and_drops_queue() {
        let log = Log::default();
        let mut runner = SequentialMethodRunner::new(vec![
            Box::new(Hanging {
                kind: DiscoveryClassType::Mdns,
                partial: vec![BridgeDiscoveryResult::candidate("10.0.0.7")],
                pending: Mutex::new(None),
                log: Arc::clone(&log),
            }),
            scripted(DiscoveryClassType::Nupnp, &[("10.0.0.8", "B")], &log),
        ]);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let results = runner.execute(&cancel).await;
        assert_eq!(*log.lock(), vec![DiscoveryClassType::Mdns]);
        assert_eq!(results, vec![BridgeDiscoveryResult::candidate("10.0.0.7")]);
        assert!(runner.queued().is_empty());
    }

    #[tokio::test]
    async fn test_pre_cancelled_runs_nothing() {
        let log = Log::default();
        let mut runner =
            SequentialMethodRunner::new(vec![scripted(DiscoveryClassType::Mdns, &[("10.0.0.2", "A")], &log)]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(runner.execute(&cancel).await.is_empty());
        assert!(log.lock().is_empty());
    }
}
