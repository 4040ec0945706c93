//! Shared application state.

use crate::blacklist::Blacklist;
use crate::booking::BookingClient;
use crate::flow::{FlowDefinition, FlowGraph};
use crate::flows::default_flows;
use crate::outbound::{HttpOutbound, MemoryOutbound};
use crate::session::SessionStore;
use crate::traits::Outbound;
use chatflow_common::{Config, Result};
use std::sync::Arc;

/// Everything a flow run needs, shared by the dispatcher and the HTTP routes.
#[derive(Clone)]
pub struct AppContext {
    pub sessions: Arc<SessionStore>,
    pub graph: Arc<FlowGraph>,
    pub outbound: Arc<dyn Outbound>,
    pub blacklist: Arc<Blacklist>,
}

impl AppContext {
    /// Compile `flows` and wire them to `outbound` with an empty blacklist.
    pub fn new(flows: Vec<FlowDefinition>, outbound: Arc<dyn Outbound>) -> Result<Self> {
        Ok(Self {
            sessions: Arc::new(SessionStore::new()),
            graph: Arc::new(FlowGraph::compile(flows)?),
            outbound,
            blacklist: Arc::new(Blacklist::new()),
        })
    }

    pub fn with_blacklist(mut self, blacklist: Blacklist) -> Self {
        self.blacklist = Arc::new(blacklist);
        self
    }

    /// Build the production context: booking client, default flows, and the
    /// HTTP relay (or an in-memory recorder when no relay is configured).
    pub fn from_config(config: &Config) -> Result<Self> {
        let booking = Arc::new(BookingClient::new(&config.booking));
        if config.booking.api_url.is_none() {
            tracing::warn!("No booking API URL configured; lesson lookups will fail");
        }

        let outbound: Arc<dyn Outbound> = match &config.outbound.endpoint {
            Some(endpoint) => {
                tracing::info!(endpoint = %endpoint, "Using HTTP relay for outbound messages");
                Arc::new(HttpOutbound::new(endpoint.clone(), config.outbound.token.clone()))
            }
            None => {
                tracing::warn!("No outbound endpoint configured; replies are recorded, not sent");
                Arc::new(MemoryOutbound::new())
            }
        };

        Ok(Self::new(default_flows(booking), outbound)?
            .with_blacklist(Blacklist::from_numbers(&config.blacklist)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_config_defaults() {
        let mut config = Config::default();
        config.blacklist = vec!["+34 600 000 000".into()];

        let ctx = AppContext::from_config(&config).unwrap();
        assert_eq!(ctx.graph.len(), 2);
        assert_eq!(ctx.outbound.name(), "memory");
        assert!(ctx.blacklist.contains("34600000000").await);
    }

    #[test]
    fn test_from_config_with_relay() {
        let mut config = Config::default();
        config.outbound.endpoint = Some("http://127.0.0.1:9/send".into());

        let ctx = AppContext::from_config(&config).unwrap();
        assert_eq!(ctx.outbound.name(), "http");
    }
}
