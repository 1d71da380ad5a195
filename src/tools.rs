use crate::error::{LiveError, Result};
use crate::realtime_api::RealtimeApi;
use formflux_live_types::{FunctionDeclaration, ToolCall, ToolCallBatch, ToolResponse};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

pub const REP_COUNT_FUNCTION: &str = "count_rep";

pub const DEFAULT_RESPONSE_DELAY: Duration = Duration::from_millis(200);

pub fn rep_count_declaration() -> FunctionDeclaration {
    FunctionDeclaration::without_parameters(
        REP_COUNT_FUNCTION,
        "Increments the rep counter by one.",
    )
}

/// Repetitions counted in the current workout.
#[derive(Clone)]
pub struct RepCounter {
    count_tx: Arc<watch::Sender<u64>>,
}

impl Default for RepCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl RepCounter {
    pub fn new() -> Self {
        let (count_tx, _) = watch::channel(0);
        Self {
            count_tx: Arc::new(count_tx),
        }
    }

    /// Adds one rep and returns the new total.
    pub fn increment(&self) -> u64 {
        let mut total = 0;
        self.count_tx.send_modify(|count| {
            *count += 1;
            total = *count;
        });
        total
    }

    pub fn get(&self) -> u64 {
        *self.count_tx.borrow()
    }

    pub fn reset(&self) {
        self.count_tx.send_replace(0);
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.count_tx.subscribe()
    }
}

pub type ToolHandler = Box<dyn Fn(&ToolCall) -> Result<Value> + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs local handlers for model tool calls and answers every call id once.
///
/// Handlers run synchronously on receipt. The answers for one batch are sent
/// together in a single message after `response_delay`.
pub struct ToolDispatcher {
    api: Arc<dyn RealtimeApi>,
    handlers: HashMap<String, ToolHandler>,
    response_delay: Duration,
    pending: Mutex<JoinSet<()>>,
}

impl ToolDispatcher {
    pub fn new(api: Arc<dyn RealtimeApi>, response_delay: Duration) -> Self {
        Self {
            api,
            handlers: HashMap::new(),
            response_delay,
            pending: Mutex::new(JoinSet::new()),
        }
    }

    pub fn register<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&ToolCall) -> Result<Value> + Send + Sync + 'static,
    {
        self.handlers.insert(name.to_string(), Box::new(handler));
    }

    /// Registers `count_rep` against `counter`.
    pub fn with_rep_counter(mut self, counter: RepCounter) -> Self {
        self.register(REP_COUNT_FUNCTION, move |_| {
            let total = counter.increment();
            tracing::info!("rep counted, total {}", total);
            Ok(json!({ "success": true }))
        });
        self
    }

    fn invoke(&self, call: &ToolCall) -> Value {
        let Some(handler) = self.handlers.get(call.name()) else {
            let e = LiveError::ToolDispatch {
                id: call.id().to_string(),
                name: call.name().to_string(),
                detail: "no handler registered".to_string(),
            };
            tracing::warn!("{}", e);
            return json!({ "error": e.to_string() });
        };
        match handler(call) {
            Ok(output) => json!({ "output": output }),
            Err(e) => {
                tracing::warn!("tool call {} ({}) failed: {}", call.name(), call.id(), e);
                json!({ "error": e.to_string() })
            }
        }
    }

    /// Handles a batch and schedules its response message.
    ///
    /// Returns the responses that will be sent, one per distinct call id.
    pub fn dispatch(&self, batch: &ToolCallBatch) -> Vec<ToolResponse> {
        let mut seen = HashSet::new();
        let mut responses = Vec::with_capacity(batch.calls().len());
        for call in batch.calls() {
            if !seen.insert(call.id()) {
                tracing::warn!("duplicate tool call id {} in batch, ignored", call.id());
                continue;
            }
            tracing::debug!("tool call {} ({})", call.name(), call.id());
            let response = self.invoke(call);
            responses.push(ToolResponse::new(call.id(), call.name(), response));
        }
        if responses.is_empty() {
            return responses;
        }

        let api = self.api.clone();
        let delay = self.response_delay;
        let outgoing = responses.clone();
        let mut pending = lock(&self.pending);
        while pending.try_join_next().is_some() {}
        pending.spawn(async move {
            tokio::time::sleep(delay).await;
            let count = outgoing.len();
            match api.send_tool_response(outgoing).await {
                Ok(()) => tracing::debug!("sent {} tool responses", count),
                Err(e) => tracing::warn!("failed to send tool responses: {}", e),
            }
        });
        responses
    }

    /// Responses scheduled but not yet sent.
    pub fn pending(&self) -> usize {
        let mut pending = lock(&self.pending);
        while pending.try_join_next().is_some() {}
        pending.len()
    }

    /// Drops responses that have not been sent yet.
    pub fn cancel_pending(&self) {
        lock(&self.pending).abort_all();
    }
}
