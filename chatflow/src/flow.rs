//! Flow definitions and step execution.
//!
//! A flow is plain data: an id, a [`Trigger`], and an ordered list of
//! [`Step`]s. [`FlowGraph::compile`] validates a set of flows once at
//! startup; [`FlowGraph::resume`] then advances one conversation by exactly
//! one step.
//!
//! ```text
//!                 trigger match
//!  NoActiveFlow ─────────────────▶ Executing(i) ──── Action ───▶ Executing(i+1)
//!       ▲                            │    ▲
//!       │ next trigger               │    │ reply captured
//!       │                     Prompt │    │
//!     Done ◀── last step / End ──────┤    │
//!                                    ▼    │
//!                             AwaitingCapture(i)
//! ```

use crate::message::{Event, OutgoingMessage};
use crate::session::SessionHandle;
use crate::traits::Outbound;
use async_trait::async_trait;
use chatflow_common::{Error, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

// ============================================================================
// Triggers
// ============================================================================

/// Rule that activates a flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Matches inbound text equal to one of the keywords, ignoring case and
    /// surrounding whitespace
    Keywords(Vec<String>),
    /// Matches only programmatic dispatch under this name
    Event(String),
}

impl Trigger {
    pub fn keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Keywords(keywords.into_iter().map(Into::into).collect())
    }

    pub fn event(name: impl Into<String>) -> Self {
        Self::Event(name.into())
    }
}

fn normalize_keyword(text: &str) -> String {
    text.trim().to_lowercase()
}

// ============================================================================
// Steps
// ============================================================================

/// What an action wants the flow to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Move on to the next step (or finish if this was the last one)
    Continue,
    /// Finish the flow now
    End,
}

pub type ActionResult = Result<Control>;

/// Reply validator for prompts.
pub type Validator = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Side-effecting step logic.
#[async_trait]
pub trait FlowAction: Send + Sync {
    async fn run(&self, ctx: ActionContext) -> ActionResult;
}

/// Adapter turning an async closure into a [`FlowAction`].
struct FnAction<F>(F);

#[async_trait]
impl<F, Fut> FlowAction for FnAction<F>
where
    F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ActionResult> + Send + 'static,
{
    async fn run(&self, ctx: ActionContext) -> ActionResult {
        (self.0)(ctx).await
    }
}

/// A prompt: say something, then wait for the contact's answer.
#[derive(Clone)]
pub struct Prompt {
    pub text: String,
    pub capture_key: String,
    pub retry_text: Option<String>,
    validator: Option<Validator>,
}

impl Prompt {
    fn accepts(&self, answer: &str) -> bool {
        !answer.is_empty() && self.validator.as_ref().map_or(true, |v| v(answer))
    }
}

/// One unit of flow execution.
#[derive(Clone)]
pub enum Step {
    /// Emits text and suspends until the next inbound message, which is
    /// stored in the session under the capture key
    Prompt(Prompt),
    /// Runs logic with session access and an outbound handle; never waits for input
    Action(Arc<dyn FlowAction>),
}

impl Step {
    /// Prompt that accepts any non-empty answer.
    pub fn prompt(text: impl Into<String>, capture_key: impl Into<String>) -> Self {
        Self::Prompt(Prompt {
            text: text.into(),
            capture_key: capture_key.into(),
            retry_text: None,
            validator: None,
        })
    }

    /// Prompt that re-asks with `retry_text` until `validator` accepts the answer.
    pub fn validated_prompt<V>(
        text: impl Into<String>,
        capture_key: impl Into<String>,
        retry_text: impl Into<String>,
        validator: V,
    ) -> Self
    where
        V: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self::Prompt(Prompt {
            text: text.into(),
            capture_key: capture_key.into(),
            retry_text: Some(retry_text.into()),
            validator: Some(Arc::new(validator)),
        })
    }

    pub fn action(action: impl FlowAction + 'static) -> Self {
        Self::Action(Arc::new(action))
    }

    /// Action from an async closure.
    pub fn action_fn<F, Fut>(f: F) -> Self
    where
        F: Fn(ActionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult> + Send + 'static,
    {
        Self::Action(Arc::new(FnAction(f)))
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Prompt(p) => f
                .debug_struct("Prompt")
                .field("text", &p.text)
                .field("capture_key", &p.capture_key)
                .field("validated", &p.validator.is_some())
                .finish(),
            Self::Action(_) => f.write_str("Action"),
        }
    }
}

/// Flow definition.
#[derive(Debug, Clone)]
pub struct FlowDefinition {
    pub id: String,
    pub trigger: Trigger,
    pub steps: Vec<Step>,
}

impl FlowDefinition {
    pub fn new(id: impl Into<String>, trigger: Trigger, steps: Vec<Step>) -> Self {
        Self {
            id: id.into(),
            trigger,
            steps,
        }
    }

    fn after(&self, step_index: usize) -> Advance {
        if step_index + 1 < self.steps.len() {
            Advance::Next(step_index + 1)
        } else {
            Advance::Done
        }
    }
}

// ============================================================================
// Execution types
// ============================================================================

/// Per-conversation flow state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FlowState {
    NoActiveFlow,
    AwaitingCapture { flow_id: String, step: usize },
    Executing { flow_id: String, step: usize },
    Done { flow_id: String },
}

impl Default for FlowState {
    fn default() -> Self {
        Self::NoActiveFlow
    }
}

impl FlowState {
    /// Flow waiting for a reply, if any.
    pub fn awaiting(&self) -> Option<(&str, usize)> {
        match self {
            Self::AwaitingCapture { flow_id, step } => Some((flow_id.as_str(), *step)),
            _ => None,
        }
    }
}

/// How a step was reached.
#[derive(Debug, Clone, Copy)]
pub enum StepInput<'a> {
    /// Execution arrived at the step; carries the event driving the run
    Enter(&'a Event),
    /// An inbound reply for a prompt that is awaiting capture
    Reply(&'a Event),
}

/// Where execution goes after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Run the step at this index next
    Next(usize),
    /// Suspend until a reply arrives for the prompt at this index
    Await(usize),
    /// Flow finished
    Done,
}

/// Result of advancing one step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub advance: Advance,
    /// Messages the step sent
    pub outputs: Vec<OutgoingMessage>,
}

/// Sends replies to the conversation a step runs for and remembers them.
#[derive(Clone)]
pub struct Replier {
    outbound: Arc<dyn Outbound>,
    to: String,
    sent: Arc<Mutex<Vec<OutgoingMessage>>>,
}

impl Replier {
    pub fn new(outbound: Arc<dyn Outbound>, to: impl Into<String>) -> Self {
        Self {
            outbound,
            to: to.into(),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Send a text message. Failures propagate to the calling step.
    pub async fn text(&self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        self.outbound.send_text(&self.to, &text).await?;
        self.sent
            .lock()
            .await
            .push(OutgoingMessage::text(&self.to, text));
        Ok(())
    }

    /// Send a media message. Failures propagate to the calling step.
    pub async fn media(&self, url: impl Into<String>, caption: Option<String>) -> Result<()> {
        let url = url.into();
        self.outbound
            .send_media(&self.to, &url, caption.as_deref())
            .await?;
        self.sent
            .lock()
            .await
            .push(OutgoingMessage::media(&self.to, url, caption));
        Ok(())
    }

    /// Drain the messages sent so far.
    pub async fn take_sent(&self) -> Vec<OutgoingMessage> {
        std::mem::take(&mut *self.sent.lock().await)
    }
}

/// Everything an action can touch.
pub struct ActionContext {
    pub conversation_id: String,
    /// Event driving the current run (trigger, dispatch, or latest reply)
    pub event: Event,
    pub session: SessionHandle,
    pub reply: Replier,
}

// ============================================================================
// FlowGraph
// ============================================================================

/// Compiled set of flows.
#[derive(Debug)]
pub struct FlowGraph {
    flows: Vec<FlowDefinition>,
    by_id: HashMap<String, usize>,
}

impl FlowGraph {
    /// Validate and index flow definitions. Registration order is kept for
    /// first-match-wins keyword matching.
    pub fn compile(definitions: Vec<FlowDefinition>) -> Result<Self> {
        let mut flows = Vec::with_capacity(definitions.len());
        let mut by_id = HashMap::new();
        let mut events = HashSet::new();

        for mut flow in definitions {
            if flow.id.trim().is_empty() {
                return Err(Error::Definition("flow id must not be empty".into()));
            }
            if flow.steps.is_empty() {
                return Err(Error::Definition(format!("flow {} has no steps", flow.id)));
            }

            match &mut flow.trigger {
                Trigger::Keywords(keywords) => {
                    let normalized: Vec<String> =
                        keywords.iter().map(|k| normalize_keyword(k)).collect();
                    if normalized.is_empty() || normalized.iter().any(String::is_empty) {
                        return Err(Error::Definition(format!(
                            "flow {} has an empty keyword",
                            flow.id
                        )));
                    }
                    *keywords = normalized;
                }
                Trigger::Event(name) => {
                    if name.trim().is_empty() {
                        return Err(Error::Definition(format!(
                            "flow {} has an empty event name",
                            flow.id
                        )));
                    }
                    if !events.insert(name.clone()) {
                        return Err(Error::Definition(format!(
                            "event {name} is registered twice"
                        )));
                    }
                }
            }

            if by_id.insert(flow.id.clone(), flows.len()).is_some() {
                return Err(Error::Definition(format!("duplicate flow id {}", flow.id)));
            }
            flows.push(flow);
        }

        tracing::info!(flows = flows.len(), "Flow graph compiled");
        Ok(Self { flows, by_id })
    }

    /// Flow by id.
    pub fn get(&self, flow_id: &str) -> Option<&FlowDefinition> {
        self.by_id.get(flow_id).map(|&i| &self.flows[i])
    }

    /// First keyword flow matching inbound text. Named-event flows never match text.
    pub fn match_text(&self, body: &str) -> Option<&FlowDefinition> {
        let needle = normalize_keyword(body);
        if needle.is_empty() {
            return None;
        }

        self.flows.iter().find(|flow| match &flow.trigger {
            Trigger::Keywords(keywords) => keywords.iter().any(|k| *k == needle),
            Trigger::Event(_) => false,
        })
    }

    /// Flow for a programmatic dispatch: by event name first, then by flow id.
    pub fn match_event(&self, name: &str) -> Option<&FlowDefinition> {
        self.flows
            .iter()
            .find(|flow| matches!(&flow.trigger, Trigger::Event(n) if n == name))
            .or_else(|| self.get(name))
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Advance one conversation by exactly one step.
    ///
    /// A failing action aborts the step with its error; nothing is retried.
    pub async fn resume(
        &self,
        session: &SessionHandle,
        reply: &Replier,
        flow_id: &str,
        step_index: usize,
        input: StepInput<'_>,
    ) -> Result<StepOutcome> {
        let flow = self
            .get(flow_id)
            .ok_or_else(|| Error::NotFound(format!("flow {flow_id}")))?;
        let step = flow.steps.get(step_index).ok_or_else(|| {
            Error::Internal(format!("flow {flow_id} has no step {step_index}"))
        })?;

        let advance = match (step, input) {
            (Step::Prompt(prompt), StepInput::Enter(_)) => {
                reply.text(prompt.text.as_str()).await?;
                Advance::Await(step_index)
            }
            (Step::Prompt(prompt), StepInput::Reply(event)) => {
                let answer = event.body().trim();
                if prompt.accepts(answer) {
                    session.update(prompt.capture_key.as_str(), answer);
                    tracing::debug!(
                        flow_id = %flow_id,
                        step = step_index,
                        key = %prompt.capture_key,
                        "Captured reply"
                    );
                    flow.after(step_index)
                } else {
                    let retry = prompt.retry_text.as_deref().unwrap_or(&prompt.text);
                    reply.text(retry).await?;
                    Advance::Await(step_index)
                }
            }
            (Step::Action(action), StepInput::Enter(event)) => {
                let ctx = ActionContext {
                    conversation_id: session.conversation_id().to_string(),
                    event: event.clone(),
                    session: session.clone(),
                    reply: reply.clone(),
                };
                match action.run(ctx).await? {
                    Control::Continue => flow.after(step_index),
                    Control::End => Advance::Done,
                }
            }
            (Step::Action(_), StepInput::Reply(_)) => {
                return Err(Error::Internal(format!(
                    "step {step_index} of flow {flow_id} is an action and cannot take a reply"
                )));
            }
        };

        Ok(StepOutcome {
            advance,
            outputs: reply.take_sent().await,
        })
    }
}
