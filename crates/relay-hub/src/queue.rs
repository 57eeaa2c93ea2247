//! Per-server FIFO call queue and the hub-wide admission gate.
//!
//! One worker per server dequeues and dispatches exactly one call at a time,
//! so a backend observes call effects in acceptance order. The admission
//! gate is claimed synchronously at enqueue: a caller at the cap gets
//! `Overloaded` immediately instead of queueing behind the congestion.

use crate::error::HubError;
use relay_types::ToolCallResult;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// The receiving side of a queue: whatever actually performs one tool call.
/// The supervisor implements this; tests substitute their own.
pub trait CallTarget: Send + Sync + 'static {
    fn dispatch(
        &self,
        tool: String,
        args: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<ToolCallResult, HubError>> + Send + '_>>;
}

/// Hub-wide cap on concurrently admitted tool calls.
pub struct AdmissionGate {
    active: AtomicUsize,
    cap: usize,
}

impl AdmissionGate {
    pub fn new(cap: usize) -> Arc<Self> {
        Arc::new(Self {
            active: AtomicUsize::new(0),
            cap,
        })
    }

    /// Claim one slot, or fail fast with `Overloaded` at the cap.
    pub fn try_acquire(self: &Arc<Self>) -> Result<AdmissionPermit, HubError> {
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n >= self.cap { None } else { Some(n + 1) }
            })
            .map(|_| AdmissionPermit {
                gate: Arc::clone(self),
            })
            .map_err(|n| HubError::Overloaded {
                active: n,
                cap: self.cap,
            })
    }

    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    pub fn cap(&self) -> usize {
        self.cap
    }
}

/// An admitted slot. Dropping it releases the slot, whatever path the call
/// took out of the queue.
pub struct AdmissionPermit {
    gate: Arc<AdmissionGate>,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        self.gate.active.fetch_sub(1, Ordering::SeqCst);
    }
}

struct QueuedCall {
    tool: String,
    args: serde_json::Value,
    permit: AdmissionPermit,
    reply: oneshot::Sender<Result<ToolCallResult, HubError>>,
}

/// FIFO queue for one server.
pub struct ServerQueue {
    server: String,
    gate: Arc<AdmissionGate>,
    tx: Mutex<Option<mpsc::UnboundedSender<QueuedCall>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ServerQueue {
    /// Start the worker for one server.
    pub fn spawn(server: &str, gate: Arc<AdmissionGate>, target: Arc<dyn CallTarget>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueuedCall>();

        let worker = tokio::spawn(async move {
            while let Some(call) = rx.recv().await {
                let result = target.dispatch(call.tool, call.args).await;
                drop(call.permit);
                let _ = call.reply.send(result);
            }
        });

        Self {
            server: server.to_string(),
            gate,
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Enqueue one call. Admission is checked synchronously; on acceptance
    /// the call resolves once the worker has dispatched it and the backend
    /// has replied.
    pub async fn enqueue(
        &self,
        tool: &str,
        args: serde_json::Value,
    ) -> Result<ToolCallResult, HubError> {
        let permit = self.gate.try_acquire()?;
        let (reply_tx, reply_rx) = oneshot::channel();

        {
            let guard = self.tx.lock().unwrap();
            let Some(tx) = guard.as_ref() else {
                return Err(HubError::ShuttingDown);
            };
            tx.send(QueuedCall {
                tool: tool.to_string(),
                args,
                permit,
                reply: reply_tx,
            })
            .map_err(|_| HubError::ShuttingDown)?;
        }

        reply_rx.await.map_err(|_| HubError::ShuttingDown)?
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Stop intake and wait for queued work to drain.
    pub async fn close(&self) {
        let tx = self.tx.lock().unwrap().take();
        drop(tx);
        let worker = self.worker.lock().unwrap().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct RecordingTarget {
        order: Mutex<Vec<String>>,
        delay_ms: u64,
    }

    impl CallTarget for RecordingTarget {
        fn dispatch(
            &self,
            tool: String,
            _args: serde_json::Value,
        ) -> Pin<Box<dyn Future<Output = Result<ToolCallResult, HubError>> + Send + '_>> {
            Box::pin(async move {
                if self.delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
                }
                self.order.lock().unwrap().push(tool);
                Ok(ToolCallResult::default())
            })
        }
    }

    #[test]
    fn gate_caps_and_releases() {
        let gate = AdmissionGate::new(2);
        let a = gate.try_acquire().unwrap();
        let _b = gate.try_acquire().unwrap();
        assert_eq!(gate.active(), 2);

        match gate.try_acquire() {
            Err(HubError::Overloaded { active, cap }) => {
                assert_eq!(active, 2);
                assert_eq!(cap, 2);
            }
            other => panic!("expected Overloaded, got {:?}", other.map(|_| ())),
        }

        drop(a);
        assert_eq!(gate.active(), 1);
        assert!(gate.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn calls_dispatch_in_acceptance_order() {
        let gate = AdmissionGate::new(16);
        let target = Arc::new(RecordingTarget {
            order: Mutex::new(Vec::new()),
            delay_ms: 5,
        });
        let queue = Arc::new(ServerQueue::spawn("s", gate, target.clone()));

        let mut handles = Vec::new();
        for i in 0..8 {
            let queue = Arc::clone(&queue);
            // Enqueue from the current task so acceptance order is the loop
            // order; only the waits run concurrently.
            let fut = async move { queue.enqueue(&format!("tool{i}"), serde_json::json!({})).await };
            handles.push(tokio::spawn(fut));
            tokio::task::yield_now().await;
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let order = target.order.lock().unwrap().clone();
        let expected: Vec<String> = (0..8).map(|i| format!("tool{i}")).collect();
        assert_eq!(order, expected);
    }

    #[tokio::test]
    async fn overload_is_fast_fail_while_slow_call_runs() {
        let gate = AdmissionGate::new(1);
        let target = Arc::new(RecordingTarget {
            order: Mutex::new(Vec::new()),
            delay_ms: 500,
        });
        let queue = Arc::new(ServerQueue::spawn("s", Arc::clone(&gate), target));

        let slow = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.enqueue("slow", serde_json::json!({})).await })
        };

        // Give the slow call time to be admitted.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        let second = queue.enqueue("fast", serde_json::json!({})).await;
        assert!(matches!(second, Err(HubError::Overloaded { .. })));
        assert!(started.elapsed() < Duration::from_millis(100));

        slow.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn close_drains_then_rejects() {
        let gate = AdmissionGate::new(4);
        let target = Arc::new(RecordingTarget {
            order: Mutex::new(Vec::new()),
            delay_ms: 0,
        });
        let queue = ServerQueue::spawn("s", gate, target.clone());

        queue.enqueue("a", serde_json::json!({})).await.unwrap();
        queue.close().await;

        let result = queue.enqueue("b", serde_json::json!({})).await;
        assert!(matches!(result, Err(HubError::ShuttingDown)));
        assert_eq!(target.order.lock().unwrap().as_slice(), ["a"]);
    }

    #[tokio::test]
    async fn permit_released_after_failure() {
        struct FailingTarget;
        impl CallTarget for FailingTarget {
            fn dispatch(
                &self,
                tool: String,
                _args: serde_json::Value,
            ) -> Pin<Box<dyn Future<Output = Result<ToolCallResult, HubError>> + Send + '_>> {
                Box::pin(async move {
                    Err(HubError::ToolNotFound {
                        server: "s".into(),
                        tool,
                        available: vec![],
                    })
                })
            }
        }

        let gate = AdmissionGate::new(1);
        let queue = ServerQueue::spawn("s", Arc::clone(&gate), Arc::new(FailingTarget));

        let result = queue.enqueue("t", serde_json::json!({})).await;
        assert!(result.is_err());
        assert_eq!(gate.active(), 0);

        // The slot is reusable after the failure.
        assert!(queue.enqueue("t", serde_json::json!({})).await.is_err());
        assert_eq!(gate.active(), 0);
    }
}
