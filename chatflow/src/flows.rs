//! The bot's conversations.
//!
//! - `welcome`: greeting keywords, looks the contact up in the booking API
//!   and answers with their booked lessons.
//! - `register`: started by dispatching `REGISTER_FLOW`; asks for name and
//!   age, then confirms both.

use crate::booking::{format_lessons, BookingClient, BookingOutcome};
use crate::flow::{ActionContext, ActionResult, Control, FlowAction, FlowDefinition, Step, Trigger};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::Instrument;

pub const WELCOME_FLOW: &str = "welcome";
pub const REGISTER_FLOW: &str = "register";
/// Event name that starts the registration flow.
pub const REGISTER_EVENT: &str = "REGISTER_FLOW";

pub const WELCOME_KEYWORDS: [&str; 3] = ["hi", "hello", "hola"];

pub const SERVER_ERROR_TEXT: &str = "⚠️ Error contacting server.";
pub const NOT_REGISTERED_TEXT: &str = "🙌 Hello, welcome to El Desbande!";
pub const NO_LESSONS_TEXT: &str =
    "👋 Welcome back! You are registered but have no booked lessons yet.";

pub const NAME_PROMPT: &str = "What is your name?";
pub const AGE_PROMPT: &str = "What is your age?";
pub const AGE_RETRY: &str = "Please send your age as a number.";

/// Welcome step: booking lookup for the contact.
pub struct LessonLookup {
    client: Arc<BookingClient>,
}

impl LessonLookup {
    pub fn new(client: Arc<BookingClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl FlowAction for LessonLookup {
    async fn run(&self, ctx: ActionContext) -> ActionResult {
        let span = chatflow_common::api_call_span!("booking", phone = %ctx.conversation_id);
        let lookup = self.client.lookup(&ctx.conversation_id).instrument(span).await;

        let text = match BookingOutcome::classify(lookup) {
            BookingOutcome::Unavailable(e) => {
                tracing::warn!(
                    conversation_id = %ctx.conversation_id,
                    error = %e,
                    "Booking lookup failed"
                );
                SERVER_ERROR_TEXT.to_string()
            }
            BookingOutcome::NotRegistered => NOT_REGISTERED_TEXT.to_string(),
            BookingOutcome::NoLessons(_) => NO_LESSONS_TEXT.to_string(),
            BookingOutcome::Lessons(user, lessons) => format_lessons(&user, &lessons),
        };

        ctx.reply.text(text).await?;
        Ok(Control::End)
    }
}

/// A positive whole number.
pub fn is_valid_age(answer: &str) -> bool {
    answer.trim().parse::<u32>().map_or(false, |age| age > 0)
}

/// Flows the binary serves.
pub fn default_flows(booking: Arc<BookingClient>) -> Vec<FlowDefinition> {
    vec![welcome_flow(booking), register_flow()]
}

pub fn welcome_flow(booking: Arc<BookingClient>) -> FlowDefinition {
    FlowDefinition::new(
        WELCOME_FLOW,
        Trigger::keywords(WELCOME_KEYWORDS),
        vec![Step::action(LessonLookup::new(booking))],
    )
}

pub fn register_flow() -> FlowDefinition {
    FlowDefinition::new(
        REGISTER_FLOW,
        Trigger::event(REGISTER_EVENT),
        vec![
            Step::prompt(NAME_PROMPT, "name"),
            Step::validated_prompt(AGE_PROMPT, "age", AGE_RETRY, is_valid_age),
            Step::action_fn(|ctx: ActionContext| async move {
                let name = ctx.session.get_text("name").unwrap_or_default();
                let age = ctx.session.get_text("age").unwrap_or_default();
                ctx.reply
                    .text(format!("{name}, thanks for your information!: Your age: {age}"))
                    .await?;
                Ok(Control::Continue)
            }),
        ],
    )
}
