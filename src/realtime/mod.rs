//! Realtime fan-out hub (§4.4): a single actor task owns the set of
//! connected clients and three channels — register, unregister, broadcast.
//! Delivery is best-effort: a client whose outbound queue is full is
//! disconnected and removed on the next pass, never allowed to back-pressure
//! the rest of the hub.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use uuid::Uuid;

pub const CLIENT_QUEUE_CAPACITY: usize = 256;
pub const MAX_CLIENTS: usize = 10_000;
pub const PING_INTERVAL_SECS: u64 = 30;
pub const READ_DEADLINE_SECS: u64 = 60;
pub const WRITE_DEADLINE_SECS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientId(pub Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Transaction,
    AgentJoined,
    Milestone,
    PriceAlert,
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub data: EventData,
}

/// Fields the filter engine inspects. `from`/`to`/`author_addr` participate
/// in agent-address matching; `amount` participates in the min-amount filter
/// but only for `Transaction` events.
#[derive(Debug, Clone, Serialize)]
pub struct EventData {
    pub from: Option<String>,
    pub to: Option<String>,
    pub author_addr: Option<String>,
    pub amount: Option<f64>,
    pub service_type: Option<String>,
    pub payload: serde_json::Value,
}

/// A subscriber's declared interest, received over the websocket subscribe
/// message.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    #[serde(default)]
    pub all_events: bool,
    #[serde(default)]
    pub event_types: HashSet<EventType>,
    #[serde(default)]
    pub agent_addrs: HashSet<String>,
    #[serde(default)]
    pub service_types: HashSet<String>,
    pub min_amount: Option<f64>,
}

impl Filter {
    fn matches(&self, event: &Event) -> bool {
        if !self.all_events && !self.event_types.is_empty()
            && !self.event_types.contains(&event.event_type)
        {
            return false;
        }

        if !self.agent_addrs.is_empty() {
            let hit = [&event.data.from, &event.data.to, &event.data.author_addr]
                .into_iter()
                .flatten()
                .any(|addr| self.agent_addrs.contains(addr));
            if !hit {
                return false;
            }
        }

        if !self.service_types.is_empty() {
            match &event.data.service_type {
                Some(t) if self.service_types.contains(t) => {}
                _ => return false,
            }
        }

        if let (EventType::Transaction, Some(min)) = (event.event_type, self.min_amount) {
            if event.data.amount.unwrap_or(0.0) < min {
                return false;
            }
        }

        true
    }
}

struct Client {
    filter: Filter,
    sender: mpsc::Sender<Event>,
}

enum Command {
    Register { id: ClientId, filter: Filter, sender: mpsc::Sender<Event>, ack: mpsc::Sender<bool> },
    Unregister { id: ClientId },
    Broadcast { event: Box<Event> },
    Shutdown,
}

/// Handle shared by producers (the Service) and connection tasks (the
/// websocket upgrade handler) to talk to the actor.
#[derive(Clone)]
pub struct RealtimeHub {
    commands: mpsc::Sender<Command>,
}

impl RealtimeHub {
    /// Spawn the actor task and return a handle plus its join handle.
    pub fn spawn() -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(1024);
        let handle = tokio::spawn(run_actor(rx));
        (Self { commands: tx }, handle)
    }

    /// Register a new client; returns `Some(receiver)` unless the hub is at
    /// capacity or shut down, in which case callers must respond 503.
    pub async fn register(&self, filter: Filter) -> Option<(ClientId, mpsc::Receiver<Event>)> {
        let id = ClientId::new();
        let (client_tx, client_rx) = mpsc::channel(CLIENT_QUEUE_CAPACITY);
        let (ack_tx, mut ack_rx) = mpsc::channel(1);
        if self
            .commands
            .send(Command::Register { id, filter, sender: client_tx, ack: ack_tx })
            .await
            .is_err()
        {
            return None;
        }
        match ack_rx.recv().await {
            Some(true) => Some((id, client_rx)),
            _ => None,
        }
    }

    pub async fn unregister(&self, id: ClientId) {
        let _ = self.commands.send(Command::Unregister { id }).await;
    }

    /// Non-blocking best-effort broadcast; never awaits backpressure from
    /// the actor beyond the outer channel's own buffer.
    pub fn broadcast(&self, event: Event) {
        let commands = self.commands.clone();
        let _ = commands.try_send(Command::Broadcast { event: Box::new(event) });
    }

    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

async fn run_actor(mut commands: mpsc::Receiver<Command>) {
    let mut clients: HashMap<ClientId, Client> = HashMap::new();
    let mut shutting_down = false;

    while let Some(command) = commands.recv().await {
        match command {
            Command::Register { id, filter, sender, ack } => {
                if shutting_down || clients.len() >= MAX_CLIENTS {
                    let _ = ack.send(false).await;
                    continue;
                }
                clients.insert(id, Client { filter, sender });
                let _ = ack.send(true).await;
                crate::observability::metrics::set_ws_active_connections(clients.len() as u64);
            }
            Command::Unregister { id } => {
                if clients.remove(&id).is_some() {
                    crate::observability::metrics::set_ws_active_connections(clients.len() as u64);
                }
            }
            Command::Broadcast { event } => {
                let mut dead = Vec::new();
                for (id, client) in clients.iter() {
                    if !client.filter.matches(&event) {
                        continue;
                    }
                    if client.sender.try_send((*event).clone()).is_err() {
                        dead.push(*id);
                        crate::observability::metrics::record_ws_broadcast_dropped();
                    }
                }
                for id in dead {
                    clients.remove(&id);
                }
                crate::observability::metrics::set_ws_active_connections(clients.len() as u64);
            }
            Command::Shutdown => {
                shutting_down = true;
                clients.clear();
                crate::observability::metrics::set_ws_active_connections(0);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: EventType, amount: Option<f64>) -> Event {
        Event {
            event_type,
            timestamp: chrono::Utc::now(),
            data: EventData {
                from: Some("0xa".into()),
                to: Some("0xb".into()),
                author_addr: None,
                amount,
                service_type: None,
                payload: serde_json::json!({}),
            },
        }
    }

    #[tokio::test]
    async fn registered_client_receives_matching_broadcast() {
        let (hub, _handle) = RealtimeHub::spawn();
        let (_, mut rx) = hub.register(Filter { all_events: true, ..Default::default() }).await.unwrap();
        hub.broadcast(event(EventType::Transaction, Some(5.0)));
        let received = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.event_type, EventType::Transaction);
    }

    #[tokio::test]
    async fn min_amount_filter_only_applies_to_transactions() {
        let (hub, _handle) = RealtimeHub::spawn();
        let filter = Filter { all_events: true, min_amount: Some(10.0), ..Default::default() };
        let (_, mut rx) = hub.register(filter).await.unwrap();

        hub.broadcast(event(EventType::Transaction, Some(1.0)));
        hub.broadcast(event(EventType::Milestone, None));

        let received = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.event_type, EventType::Milestone);
    }

    #[tokio::test]
    async fn unregister_stops_delivery() {
        let (hub, _handle) = RealtimeHub::spawn();
        let (id, mut rx) = hub.register(Filter { all_events: true, ..Default::default() }).await.unwrap();
        hub.unregister(id).await;
        hub.broadcast(event(EventType::Milestone, None));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }
}
