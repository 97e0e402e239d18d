use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use levelflow::dag::{ExecFuture, NodeContext, NodeExecutor, NodeInput, NodeOutput, NodeResult};

/// One observed executor event, in global order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started(String),
    Finished(String),
}

#[derive(Default)]
struct Counters {
    events: Mutex<Vec<Event>>,
    calls: Mutex<HashMap<String, usize>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Shared record of what every [`RecordingExecutor`] did.
#[derive(Clone, Default)]
pub struct ExecutionLog {
    inner: Arc<Counters>,
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `node`'s executor was entered.
    pub fn calls(&self, node: &str) -> usize {
        self.inner
            .calls
            .lock()
            .unwrap()
            .get(node)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.inner.calls.lock().unwrap().values().sum()
    }

    /// Highest number of executors running at the same time.
    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<Event> {
        self.inner.events.lock().unwrap().clone()
    }

    /// Position of an event in the global order.
    pub fn position(&self, event: &Event) -> Option<usize> {
        self.inner
            .events
            .lock()
            .unwrap()
            .iter()
            .position(|e| e == event)
    }

    fn enter(&self, node: &str) -> ActiveGuard {
        *self
            .inner
            .calls
            .lock()
            .unwrap()
            .entry(node.to_string())
            .or_default() += 1;
        self.inner
            .events
            .lock()
            .unwrap()
            .push(Event::Started(node.to_string()));
        let now = self.inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak.fetch_max(now, Ordering::SeqCst);
        ActiveGuard {
            log: self.clone(),
            node: node.to_string(),
        }
    }
}

/// Decrements the active count even when the executor future is dropped.
struct ActiveGuard {
    log: ExecutionLog,
    node: String,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.log.inner.active.fetch_sub(1, Ordering::SeqCst);
        if let Ok(mut events) = self.log.inner.events.lock() {
            events.push(Event::Finished(std::mem::take(&mut self.node)));
        }
    }
}

/// Instrumented executor: records calls and concurrency, optionally sleeps
/// (cancellably) and then succeeds with a fixed output or fails.
#[derive(Clone)]
pub struct RecordingExecutor {
    log: ExecutionLog,
    delay: Option<Duration>,
    output: NodeOutput,
    failure: Option<String>,
    ignore_cancel: bool,
}

impl RecordingExecutor {
    pub fn new(log: &ExecutionLog) -> Self {
        Self {
            log: log.clone(),
            delay: None,
            output: NodeOutput::Empty,
            failure: None,
            ignore_cancel: false,
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.output = NodeOutput::Text(text.to_string());
        self
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.output = NodeOutput::Json(value);
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    /// Sleep through cancellation instead of returning early.
    pub fn ignore_cancel(mut self) -> Self {
        self.ignore_cancel = true;
        self
    }
}

impl NodeExecutor for RecordingExecutor {
    fn execute(&self, ctx: NodeContext, _input: NodeInput) -> ExecFuture<'_> {
        Box::pin(async move {
            let _guard = self.log.enter(&ctx.node);

            if let Some(delay) = self.delay {
                if self.ignore_cancel {
                    tokio::time::sleep(delay).await;
                } else {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = ctx.cancelled() => anyhow::bail!("{} cancelled", ctx.node),
                    }
                }
            }

            if let Some(message) = &self.failure {
                anyhow::bail!("{message}");
            }
            Ok(Some(NodeResult::new(self.output.clone())))
        })
    }
}
