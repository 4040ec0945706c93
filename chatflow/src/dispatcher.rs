//! Event dispatcher.
//!
//! Serializes work per conversation and bounds it globally:
//!
//! - events for one conversation run strictly in arrival order, one at a time
//! - at most `concurrency_limit` conversations execute at once
//! - at most `queue_capacity` events wait for a slot; more are rejected
//! - every step is bounded by `timeout_ms`; a step that overruns resets the
//!   conversation to no active flow
//!
//! Conversations become ready in FIFO order, so a busy contact cannot starve
//! the others.

use crate::context::AppContext;
use crate::flow::{Advance, FlowState, Replier, StepInput};
use crate::message::{Event, EventSource, OutgoingMessage};
use crate::session::SessionHandle;
use chatflow_common::logging::generate_trace_id;
use chatflow_common::util::truncate_with_ellipsis;
use chatflow_common::{conversation_span, Error, QueueConfig, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::Instrument;

/// What one queued event did.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub conversation_id: String,
    /// Flow that ran, `None` when the event was ignored
    pub flow_id: Option<String>,
    /// Conversation state after the event
    pub state: FlowState,
    /// Messages sent while handling the event
    pub outputs: Vec<OutgoingMessage>,
}

impl ExecutionReport {
    fn ignored(conversation_id: &str, state: FlowState) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            flow_id: None,
            state,
            outputs: Vec::new(),
        }
    }
}

/// Handle to the result of an admitted event.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<Result<ExecutionReport>>,
}

impl Completion {
    /// Wait until the event has been fully handled.
    pub async fn wait(self) -> Result<ExecutionReport> {
        self.rx
            .await
            .map_err(|_| Error::Internal("dispatcher dropped the event".into()))?
    }
}

/// Queue counters for health reporting.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DispatcherStats {
    pub active: usize,
    pub pending: usize,
    pub conversations: usize,
    pub concurrency_limit: usize,
    pub queue_capacity: usize,
}

struct Job {
    event: Event,
    trace_id: String,
    done: oneshot::Sender<Result<ExecutionReport>>,
}

struct Slot {
    queue: VecDeque<Job>,
    /// Scheduled or executing
    running: bool,
    state: FlowState,
    last_activity: DateTime<Utc>,
}

impl Slot {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            running: false,
            state: FlowState::NoActiveFlow,
            last_activity: Utc::now(),
        }
    }
}

#[derive(Default)]
struct Inner {
    slots: HashMap<String, Slot>,
    ready: VecDeque<String>,
    active: usize,
    pending: usize,
}

struct Shared {
    ctx: AppContext,
    config: QueueConfig,
    apology_text: String,
    inner: Mutex<Inner>,
}

/// Routes events to flows. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub fn new(ctx: AppContext, config: QueueConfig, apology_text: impl Into<String>) -> Self {
        tracing::info!(
            concurrency_limit = config.concurrency_limit,
            queue_capacity = config.queue_capacity,
            timeout_ms = config.timeout_ms,
            "Dispatcher ready"
        );
        Self {
            shared: Arc::new(Shared {
                ctx,
                config,
                apology_text: apology_text.into(),
                inner: Mutex::new(Inner::default()),
            }),
        }
    }

    pub fn context(&self) -> &AppContext {
        &self.shared.ctx
    }

    /// Admit an event. Blacklisted contacts and a full queue are rejected
    /// before anything runs.
    pub async fn enqueue(&self, event: Event) -> Result<Completion> {
        let conversation_id = event.conversation_id().to_string();
        let preview = truncate_with_ellipsis(event.body(), 40);

        if self.shared.ctx.blacklist.contains(&conversation_id).await {
            tracing::debug!(conversation_id = %conversation_id, "Dropping event from blacklisted contact");
            return Err(Error::Blacklisted(conversation_id));
        }

        let (tx, rx) = oneshot::channel();
        let job = Job {
            event,
            trace_id: generate_trace_id(),
            done: tx,
        };

        let mut guard = self.shared.inner.lock().await;
        let inner = &mut *guard;

        if inner.pending >= self.shared.config.queue_capacity {
            tracing::warn!(
                conversation_id = %conversation_id,
                pending = inner.pending,
                "Dispatch queue full, rejecting event"
            );
            return Err(Error::Capacity(format!(
                "{} events already queued",
                inner.pending
            )));
        }

        let slot = inner
            .slots
            .entry(conversation_id.clone())
            .or_insert_with(Slot::new);
        slot.queue.push_back(job);
        slot.last_activity = Utc::now();
        if !slot.running {
            slot.running = true;
            inner.ready.push_back(conversation_id.clone());
        }
        inner.pending += 1;

        tracing::debug!(
            conversation_id = %conversation_id,
            body = %preview,
            pending = inner.pending,
            "Event queued"
        );

        pump(&self.shared, inner);
        Ok(Completion { rx })
    }

    /// Start a flow for a contact without an inbound message.
    ///
    /// `flow` is a named event (or a flow id). Any flow the contact is in is
    /// interrupted and their session starts fresh.
    pub async fn dispatch(
        &self,
        flow: &str,
        conversation_id: &str,
        payload: serde_json::Value,
    ) -> Result<Completion> {
        if self.shared.ctx.graph.match_event(flow).is_none() {
            return Err(Error::NotFound(format!("flow {flow}")));
        }
        let event = Event::dispatch(flow, conversation_id, payload)?;
        self.enqueue(event).await
    }

    /// Current flow state of a conversation.
    pub async fn state(&self, conversation_id: &str) -> FlowState {
        self.shared
            .inner
            .lock()
            .await
            .slots
            .get(conversation_id)
            .map(|slot| slot.state.clone())
            .unwrap_or_default()
    }

    pub async fn stats(&self) -> DispatcherStats {
        let inner = self.shared.inner.lock().await;
        DispatcherStats {
            active: inner.active,
            pending: inner.pending,
            conversations: inner.slots.len(),
            concurrency_limit: self.shared.config.concurrency_limit,
            queue_capacity: self.shared.config.queue_capacity,
        }
    }

    /// Forget idle conversations along with their sessions. Returns how many
    /// conversations were dropped.
    pub async fn sweep_idle(&self, ttl: Duration) -> usize {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::weeks(5_200));
        let now = Utc::now();

        let mut inner = self.shared.inner.lock().await;
        let idle: Vec<String> = inner
            .slots
            .iter()
            .filter(|(_, slot)| {
                !slot.running && slot.queue.is_empty() && now - slot.last_activity >= ttl
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &idle {
            inner.slots.remove(id);
            self.shared.ctx.sessions.clear(id);
        }

        if !idle.is_empty() {
            tracing::info!(removed = idle.len(), "Swept idle conversations");
        }
        idle.len()
    }
}

/// Start queued work while there is capacity. Called with the lock held.
fn pump(shared: &Arc<Shared>, inner: &mut Inner) {
    while inner.active < shared.config.concurrency_limit {
        let Some(conversation_id) = inner.ready.pop_front() else {
            break;
        };
        let Some(slot) = inner.slots.get_mut(&conversation_id) else {
            continue;
        };
        let Some(job) = slot.queue.pop_front() else {
            slot.running = false;
            continue;
        };

        let state = slot.state.clone();
        inner.pending -= 1;
        inner.active += 1;

        tokio::spawn(run_job(shared.clone(), conversation_id, state, job));
    }
}

async fn run_job(shared: Arc<Shared>, conversation_id: String, state: FlowState, job: Job) {
    let Job {
        event,
        trace_id,
        done,
    } = job;

    let span = conversation_span!(conversation_id, trace_id, event_id = %event.id());
    let task = tokio::spawn(execute(shared.clone(), state, event).instrument(span));

    let (state, result) = match task.await {
        Ok(finished) => finished,
        Err(e) => {
            tracing::error!(
                conversation_id = %conversation_id,
                error = %e,
                "Flow task failed"
            );
            (
                FlowState::NoActiveFlow,
                Err(Error::Internal(format!("flow task failed: {e}"))),
            )
        }
    };

    {
        let mut guard = shared.inner.lock().await;
        let inner = &mut *guard;
        inner.active -= 1;
        if let Some(slot) = inner.slots.get_mut(&conversation_id) {
            slot.state = state;
            slot.last_activity = Utc::now();
            if slot.queue.is_empty() {
                slot.running = false;
            } else {
                inner.ready.push_back(conversation_id.clone());
            }
        }
        pump(&shared, inner);
    }

    let _ = done.send(result);
}

/// Handle one event against the conversation's current state.
async fn execute(
    shared: Arc<Shared>,
    state: FlowState,
    event: Event,
) -> (FlowState, Result<ExecutionReport>) {
    let ctx = &shared.ctx;
    let conversation_id = event.conversation_id();
    let session = SessionHandle::new(ctx.sessions.clone(), conversation_id);

    let (flow_id, mut step, mut input) = match event.source() {
        EventSource::Dispatch { flow_id: name } => match ctx.graph.match_event(name) {
            Some(flow) => {
                if let Some((current, _)) = state.awaiting() {
                    tracing::info!(interrupted = %current, flow_id = %flow.id, "Dispatch interrupts open flow");
                }
                session.clear();
                (flow.id.clone(), 0, StepInput::Enter(&event))
            }
            None => {
                return (state, Err(Error::NotFound(format!("flow {name}"))));
            }
        },
        EventSource::Inbound => {
            if let Some(flow) = ctx.graph.match_text(event.body()) {
                if let Some((current, _)) = state.awaiting() {
                    tracing::info!(interrupted = %current, flow_id = %flow.id, "Trigger interrupts open flow");
                }
                session.clear();
                (flow.id.clone(), 0, StepInput::Enter(&event))
            } else if let Some((flow_id, step)) = state.awaiting() {
                (flow_id.to_string(), step, StepInput::Reply(&event))
            } else {
                tracing::debug!("No trigger matched and no flow is waiting; ignoring");
                let report = ExecutionReport::ignored(conversation_id, state.clone());
                return (state, Ok(report));
            }
        }
    };

    let reply = Replier::new(ctx.outbound.clone(), conversation_id);
    let step_timeout = shared.config.step_timeout();
    let mut outputs = Vec::new();

    tracing::debug!(flow_id = %flow_id, step = step, "Running flow");

    loop {
        mark_executing(&shared, conversation_id, &flow_id, step).await;

        let resumed = tokio::time::timeout(
            step_timeout,
            ctx.graph.resume(&session, &reply, &flow_id, step, input),
        )
        .await;

        let outcome = match resumed {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::error!(flow_id = %flow_id, step = step, error = %e, "Flow step failed");
                apologize(&shared, conversation_id).await;
                return (FlowState::NoActiveFlow, Err(e));
            }
            Err(_) => {
                tracing::error!(
                    flow_id = %flow_id,
                    step = step,
                    timeout_ms = step_timeout.as_millis() as u64,
                    "Flow step timed out, resetting conversation"
                );
                return (FlowState::NoActiveFlow, Err(Error::Timeout(step_timeout)));
            }
        };
        outputs.extend(outcome.outputs);

        match outcome.advance {
            Advance::Next(next) => {
                step = next;
                input = StepInput::Enter(&event);
            }
            Advance::Await(at) => {
                tracing::debug!(flow_id = %flow_id, step = at, "Awaiting reply");
                let state = FlowState::AwaitingCapture {
                    flow_id: flow_id.clone(),
                    step: at,
                };
                return (
                    state.clone(),
                    Ok(ExecutionReport {
                        conversation_id: conversation_id.to_string(),
                        flow_id: Some(flow_id),
                        state,
                        outputs,
                    }),
                );
            }
            Advance::Done => {
                session.clear();
                tracing::info!(flow_id = %flow_id, messages = outputs.len(), "Flow completed");
                let state = FlowState::Done {
                    flow_id: flow_id.clone(),
                };
                return (
                    state.clone(),
                    Ok(ExecutionReport {
                        conversation_id: conversation_id.to_string(),
                        flow_id: Some(flow_id),
                        state,
                        outputs,
                    }),
                );
            }
        }
    }
}

/// Record the step a conversation is currently running.
async fn mark_executing(shared: &Shared, conversation_id: &str, flow_id: &str, step: usize) {
    let mut inner = shared.inner.lock().await;
    if let Some(slot) = inner.slots.get_mut(conversation_id) {
        slot.state = FlowState::Executing {
            flow_id: flow_id.to_string(),
            step,
        };
    }
}

/// Best-effort apology after a failed step.
async fn apologize(shared: &Shared, conversation_id: &str) {
    if shared.apology_text.is_empty() {
        return;
    }
    if let Err(e) = shared
        .ctx
        .outbound
        .send_text(conversation_id, &shared.apology_text)
        .await
    {
        tracing::warn!(error = %e, "Could not deliver apology");
    }
}
