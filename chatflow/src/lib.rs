//! Chatflow - conversational flow engine for messaging bots.
//!
//! Inbound messages are normalized into events, queued per conversation,
//! and run through keyword- or event-triggered flows. Replies go out
//! through an [`Outbound`] adapter.
//!
//! ## Architecture
//!
//! ```text
//! provider → /webhook/inbound → Dispatcher ─┬─ conversation queue (FIFO)
//!                                           └─ FlowGraph::resume ─→ Outbound → provider
//!                                                    │
//!                                              SessionStore
//! ```

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod blacklist;
pub mod booking;
pub mod context;
pub mod dispatcher;
pub mod flow;
pub mod flows;
pub mod message;
pub mod outbound;
pub mod routes;
pub mod session;
pub mod traits;

// Re-export commonly used types
pub use blacklist::Blacklist;
pub use booking::{BookingClient, BookingOutcome, UserLookup};
pub use context::AppContext;
pub use dispatcher::{Completion, Dispatcher, DispatcherStats, ExecutionReport};
pub use flow::{
    ActionContext, ActionResult, Control, FlowAction, FlowDefinition, FlowGraph, FlowState, Step,
    Trigger,
};
pub use message::{Event, EventSource, OutgoingContent, OutgoingMessage};
pub use outbound::{HttpOutbound, MemoryOutbound};
pub use routes::{build_router, create_state, BotState};
pub use session::{SessionHandle, SessionStore};
pub use traits::{ChannelError, ChannelResult, Outbound};

use chatflow_common::config::Config;
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

/// Build the dispatcher and HTTP router for a configuration.
pub fn build_app(config: &Config) -> chatflow_common::Result<(axum::Router, Dispatcher)> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let ctx = AppContext::from_config(config)?;
    let dispatcher = Dispatcher::new(
        ctx,
        config.queue.clone(),
        config.outbound.apology_text.clone(),
    );

    let router = build_router(create_state(dispatcher.clone())).layer(cors);
    Ok((router, dispatcher))
}

/// Start the HTTP server and the idle-session sweeper.
pub async fn start_server(config: &Config) -> anyhow::Result<()> {
    let addr: SocketAddr = config.bind_address().parse()?;

    let (router, dispatcher) = build_app(config)?;

    let sweep_handle = config.session.idle_timeout().map(|ttl| {
        let dispatcher = dispatcher.clone();
        let every = Duration::from_secs(config.session.sweep_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                dispatcher.sweep_idle(ttl).await;
            }
        })
    });

    tracing::info!("Starting chatflow on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    if let Some(handle) = sweep_handle {
        handle.abort();
    }

    Ok(())
}
