//! Live session registry and dashboard fan-out.
//!
//! Sessions are keyed by connection id and live only as long as the socket.
//! Nothing here is persisted.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

pub type ClientId = usize;

pub const AGENTS_CHANNEL: &str = "agents";

pub fn ticket_channel(ticket_id: &str) -> String {
    format!("ticket:{ticket_id}")
}

pub fn customer_channel(phone: &str) -> String {
    format!("customer:{phone}")
}

pub fn event_payload<T: Serialize>(event: &str, data: T) -> Option<String> {
    serde_json::to_string(&json!({ "event": event, "data": data })).ok()
}

/// Fire-and-forget delivery to whoever listens on `channel`.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, channel: &str, event: &str, payload: Value);
}

#[derive(Default)]
struct Registry {
    clients: HashMap<ClientId, mpsc::UnboundedSender<String>>,
    customers: HashMap<ClientId, String>,
    agents: HashMap<ClientId, String>,
    ticket_watchers: HashMap<String, HashSet<ClientId>>,
    watched_ticket: HashMap<ClientId, String>,
}

impl Registry {
    fn unwatch(&mut self, client_id: ClientId) {
        if let Some(previous) = self.watched_ticket.remove(&client_id) {
            if let Some(watchers) = self.ticket_watchers.get_mut(&previous) {
                watchers.remove(&client_id);
                if watchers.is_empty() {
                    self.ticket_watchers.remove(&previous);
                }
            }
        }
    }

    fn subscribers(&self, channel: &str) -> Vec<ClientId> {
        if channel == AGENTS_CHANNEL {
            return self.agents.keys().copied().collect();
        }
        if let Some(ticket_id) = channel.strip_prefix("ticket:") {
            return self
                .ticket_watchers
                .get(ticket_id)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default();
        }
        if let Some(phone) = channel.strip_prefix("customer:") {
            return self
                .customers
                .iter()
                .filter(|(_, p)| p.as_str() == phone)
                .map(|(id, _)| *id)
                .collect();
        }
        Vec::new()
    }
}

#[derive(Default)]
pub struct Realtime {
    registry: Mutex<Registry>,
    next_client_id: AtomicUsize,
}

impl Realtime {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn connect(&self) -> (ClientId, mpsc::UnboundedReceiver<String>) {
        let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel::<String>();
        self.registry.lock().await.clients.insert(client_id, tx);
        (client_id, rx)
    }

    pub async fn disconnect(&self, client_id: ClientId) {
        let mut registry = self.registry.lock().await;
        registry.unwatch(client_id);
        registry.clients.remove(&client_id);
        registry.customers.remove(&client_id);
        registry.agents.remove(&client_id);
    }

    pub async fn join_customer(&self, client_id: ClientId, phone: &str) {
        let mut registry = self.registry.lock().await;
        registry.agents.remove(&client_id);
        registry.customers.insert(client_id, phone.to_string());
    }

    pub async fn join_agent(&self, client_id: ClientId, agent_id: &str) {
        let mut registry = self.registry.lock().await;
        registry.customers.remove(&client_id);
        registry.agents.insert(client_id, agent_id.to_string());
    }

    /// An agent follows one ticket at a time.
    pub async fn watch_ticket(&self, client_id: ClientId, ticket_id: &str) {
        let mut registry = self.registry.lock().await;
        registry.unwatch(client_id);
        registry
            .ticket_watchers
            .entry(ticket_id.to_string())
            .or_default()
            .insert(client_id);
        registry
            .watched_ticket
            .insert(client_id, ticket_id.to_string());
    }

    pub async fn customer_phone(&self, client_id: ClientId) -> Option<String> {
        self.registry.lock().await.customers.get(&client_id).cloned()
    }

    pub async fn agent_id(&self, client_id: ClientId) -> Option<String> {
        self.registry.lock().await.agents.get(&client_id).cloned()
    }

    pub async fn connected_agents(&self) -> usize {
        self.registry.lock().await.agents.len()
    }

    pub async fn emit_to_client<T: Serialize>(&self, client_id: ClientId, event: &str, data: T) {
        let Some(payload) = event_payload(event, data) else {
            return;
        };
        let sender = self.registry.lock().await.clients.get(&client_id).cloned();
        if let Some(sender) = sender {
            let _ = sender.send(payload);
        }
    }
}

#[async_trait]
impl Publisher for Realtime {
    async fn publish(&self, channel: &str, event: &str, payload: Value) {
        let Some(message) = event_payload(event, payload) else {
            return;
        };
        let senders = {
            let registry = self.registry.lock().await;
            registry
                .subscribers(channel)
                .into_iter()
                .filter_map(|id| registry.clients.get(&id).cloned())
                .collect::<Vec<_>>()
        };
        debug!(channel, event, receivers = senders.len(), "publish");
        for sender in senders {
            let _ = sender.send(message.clone());
        }
    }
}
