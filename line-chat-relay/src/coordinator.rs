//! Serialized membership and broadcast fanout.
//!
//! A single task owns the client map. Sessions talk to it through a
//! [`Coordinator`] handle which turns every operation into an event on one
//! ordered channel. Because the loop applies one event fully before taking the
//! next, the set of recipients of a broadcast is exactly the set of clients
//! whose register was applied and whose unregister was not.
//!
//! With [`OverflowPolicy::Block`] a client that stops reading will eventually
//! fill its outbox, and the loop then waits on it. Every other register,
//! unregister and broadcast waits too. This is a known liveness hazard;
//! [`OverflowPolicy::Drop`] trades it for per-client message loss.
//!
//! Unregister only drops the record. The session's writer still delivers
//! whatever was queued and closes the socket afterwards, so a departed client
//! that stops reading keeps its writer task and socket alive while the writer
//! waits on a full send buffer. There is no write timeout to reclaim them.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use anyhow::{Context, Result};
use tokio::sync::{
    mpsc::{self, error::TrySendError},
    oneshot,
};
use tracing::{debug, info, warn};

pub type ClientId = u64;

const EVENT_QUEUE_CAPACITY: usize = 128;

/// What fanout does when a client's outbox is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Wait for the client to make room, stalling the coordinator meanwhile.
    #[default]
    Block,
    /// Skip this message for that client only.
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// Messages a client's outbox holds before the overflow policy applies.
    pub outbox_capacity: usize,
    pub overflow: OverflowPolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            outbox_capacity: 64,
            overflow: OverflowPolicy::Block,
        }
    }
}

/// One connected session: its identity plus the producing end of its outbox.
///
/// Dropping the record closes the outbox, which lets the session's writer
/// drain what is queued and then close the transport.
#[derive(Debug)]
pub struct ClientRecord {
    id: ClientId,
    display_name: String,
    outbox: mpsc::Sender<String>,
}

impl ClientRecord {
    pub fn new(id: ClientId, display_name: String, outbox: mpsc::Sender<String>) -> Self {
        Self {
            id,
            display_name,
            outbox,
        }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }
}

/// A registered client as seen from outside the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub id: ClientId,
    pub display_name: String,
}

enum Event {
    Register(ClientRecord),
    Unregister(ClientId),
    Broadcast(String),
    Members {
        respond_to: oneshot::Sender<Vec<Member>>,
    },
}

/// Cloneable handle for submitting events to the coordinator loop.
#[derive(Clone)]
pub struct Coordinator {
    events: mpsc::Sender<Event>,
    next_id: Arc<AtomicU64>,
    config: RelayConfig,
}

impl Coordinator {
    /// Starts the coordinator loop on the current Tokio runtime.
    ///
    /// The loop runs until every handle has been dropped.
    pub fn spawn(config: RelayConfig) -> Self {
        let (events, inbox) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let state = CoordinatorState::new(config.overflow);
        tokio::spawn(state.run(inbox));

        Self {
            events,
            next_id: Arc::new(AtomicU64::new(1)),
            config,
        }
    }

    /// Allocates a fresh client id and an outbox sized from the config.
    ///
    /// The receiver belongs to the session's writer.
    pub fn new_client(&self, display_name: String) -> (ClientRecord, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (outbox, receiver) = mpsc::channel(self.config.outbox_capacity.max(1));
        (ClientRecord::new(id, display_name, outbox), receiver)
    }

    pub async fn register(&self, client: ClientRecord) -> Result<()> {
        self.submit(Event::Register(client)).await
    }

    pub async fn unregister(&self, id: ClientId) -> Result<()> {
        self.submit(Event::Unregister(id)).await
    }

    pub async fn broadcast(&self, message: impl Into<String>) -> Result<()> {
        self.submit(Event::Broadcast(message.into())).await
    }

    /// Registered clients, sorted by id, as of the moment this request is
    /// processed relative to other events.
    pub async fn members(&self) -> Result<Vec<Member>> {
        let (respond_to, response) = oneshot::channel();
        self.submit(Event::Members { respond_to }).await?;
        response.await.context("coordinator dropped members request")
    }

    async fn submit(&self, event: Event) -> Result<()> {
        self.events
            .send(event)
            .await
            .map_err(|_| anyhow::anyhow!("coordinator is no longer running"))
    }
}

struct CoordinatorState {
    clients: HashMap<ClientId, ClientRecord>,
    overflow: OverflowPolicy,
}

impl CoordinatorState {
    fn new(overflow: OverflowPolicy) -> Self {
        Self {
            clients: HashMap::new(),
            overflow,
        }
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<Event>) {
        while let Some(event) = inbox.recv().await {
            match event {
                Event::Register(client) => self.register(client),
                Event::Unregister(id) => self.unregister(id),
                Event::Broadcast(message) => self.broadcast(&message).await,
                Event::Members { respond_to } => {
                    let _ = respond_to.send(self.members());
                }
            }
        }
        debug!("coordinator stopped: all handles dropped");
    }

    fn register(&mut self, client: ClientRecord) {
        let (id, name) = (client.id, client.display_name.clone());
        // Duplicate ids overwrite the previous record.
        self.clients.insert(id, client);
        info!(
            client_id = id,
            %name,
            online = self.clients.len(),
            "client registered"
        );
    }

    fn unregister(&mut self, id: ClientId) {
        match self.clients.remove(&id) {
            Some(client) => info!(
                client_id = id,
                name = %client.display_name,
                online = self.clients.len(),
                "client unregistered"
            ),
            None => debug!(client_id = id, "unregister for unknown client ignored"),
        }
    }

    async fn broadcast(&self, message: &str) {
        for client in self.clients.values() {
            match self.overflow {
                OverflowPolicy::Block => {
                    if client.outbox.send(message.to_string()).await.is_err() {
                        debug!(client_id = client.id, "outbox closed; skipping client");
                    }
                }
                OverflowPolicy::Drop => match client.outbox.try_send(message.to_string()) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(
                            client_id = client.id,
                            name = %client.display_name,
                            "outbox full; message dropped for client"
                        );
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(client_id = client.id, "outbox closed; skipping client");
                    }
                },
            }
        }
    }

    fn members(&self) -> Vec<Member> {
        let mut members: Vec<Member> = self
            .clients
            .values()
            .map(|client| Member {
                id: client.id,
                display_name: client.display_name.clone(),
            })
            .collect();
        members.sort_by_key(|member| member.id);
        members
    }
}
