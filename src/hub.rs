use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::connection::{Connection, ConnectionError};
use crate::event::Event;
use crate::queue::EventQueue;
use crate::registry::Registry;

/// Opaque numeric participant identifier, strictly increasing and never
/// reused, even across disconnect/reconnect of the same display name.
pub type ParticipantId = u64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HubError {
    /// Operation attempted after hub-wide shutdown.
    #[error("hub closed")]
    Closed,

    /// A currently connected participant already uses this display name.
    #[error("user \"{0}\" already exists")]
    UsernameExists(String),

    /// The identifier is not (or no longer) in the registry. Reachable via
    /// concurrent disconnect races, so it is a typed error, not a crash.
    #[error("unknown participant id {0}")]
    ParticipantNotFound(ParticipantId),
}

/// Tunables for the hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// How long a disconnecting participant may keep draining queued events
    /// before its connection is force-closed.
    pub drain_grace: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            drain_grace: Duration::from_secs(2),
        }
    }
}

/// One connected user: display name, connection handle, and the outbound
/// queue its pump drains.
struct Participant {
    name: String,
    conn: Arc<dyn Connection>,
    events: EventQueue<Event>,
}

struct HubState {
    next_id: ParticipantId,
    closed: bool,
}

/// The chat room broker.
///
/// Owns the participant registry, routes inbound events, and broadcasts to
/// per-participant queues. Each participant gets two pump tasks: one reading
/// from its connection into the hub, one draining its queue back out.
/// Delivery to a queue never blocks on a slow consumer; only that consumer's
/// own outbound pump is affected.
///
/// Cheaply cloneable; clones share the same hub.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    clock: Arc<dyn Clock>,
    config: HubConfig,
    participants: Registry<ParticipantId, Arc<Participant>>,
    // Serializes connect/disconnect/close; never held across the drain wait
    // or any transport I/O.
    state: Mutex<HubState>,
}

impl Hub {
    pub fn new() -> Self {
        Self::with_config(HubConfig::default(), Arc::new(SystemClock))
    }

    /// Creates a hub with explicit tunables and an injected clock.
    pub fn with_config(config: HubConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                clock,
                config,
                participants: Registry::new(),
                state: Mutex::new(HubState {
                    next_id: 0,
                    closed: false,
                }),
            }),
        }
    }

    /// Registers a participant under `username` and starts its pumps.
    ///
    /// The new participant's first queued event is `Connected` with the
    /// roster including itself; everyone else receives `UserEnter` followed
    /// by `UserListUpdate`. Fails with [`HubError::UsernameExists`] when the
    /// name is taken and [`HubError::Closed`] after shutdown, in both cases
    /// without any observable partial registration.
    pub async fn connect(
        &self,
        username: &str,
        conn: Arc<dyn Connection>,
    ) -> Result<ParticipantId, HubError> {
        let id = {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                return Err(HubError::Closed);
            }
            let taken = self
                .inner
                .participants
                .values()
                .await
                .iter()
                .any(|p| p.name == username);
            if taken {
                return Err(HubError::UsernameExists(username.to_string()));
            }

            state.next_id += 1;
            let id = state.next_id;

            let events = EventQueue::new();
            // First event the participant will see; the name is merged in
            // because the participant is not registered yet.
            let _ = events
                .add(Event::Connected {
                    time: self.now(),
                    users: self.roster(Some(username)).await,
                })
                .await;

            self.inner
                .participants
                .set(
                    id,
                    Arc::new(Participant {
                        name: username.to_string(),
                        conn,
                        events,
                    }),
                )
                .await;

            self.broadcast(
                Event::UserEnter {
                    time: self.now(),
                    name: username.to_string(),
                },
                &[id],
            )
            .await;
            self.broadcast(
                Event::UserListUpdate {
                    time: self.now(),
                    users: self.roster(None).await,
                },
                &[id],
            )
            .await;

            id
        };

        self.spawn_pumps(id);
        info!(user = username, id, "participant connected");
        Ok(id)
    }

    /// Disconnects a participant, notifying the remaining ones.
    pub async fn disconnect(&self, id: ParticipantId) -> Result<(), HubError> {
        self.disconnect_participant(id, None, true).await
    }

    /// Shuts the hub down: new connects fail, every participant is
    /// disconnected concurrently (without leave broadcasts) and allowed to
    /// drain. Returns [`HubError::Closed`] on the second call.
    pub async fn close(&self) -> Result<(), HubError> {
        {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                return Err(HubError::Closed);
            }
            state.closed = true;
        }

        let ids = self.inner.participants.keys().await;
        info!(participants = ids.len(), "closing hub");

        let teardowns = ids
            .into_iter()
            .map(|id| self.disconnect_participant(id, None, false));
        for result in join_all(teardowns).await {
            // Lost races with pump-triggered disconnects are fine.
            if let Err(err) = result {
                debug!(error = %err, "participant already torn down");
            }
        }
        Ok(())
    }

    fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    /// Sorted distinct display names of the registered participants, plus an
    /// optional not-yet-registered name.
    async fn roster(&self, pending: Option<&str>) -> Vec<String> {
        let mut names: BTreeSet<String> = self
            .inner
            .participants
            .values()
            .await
            .iter()
            .map(|p| p.name.clone())
            .collect();
        if let Some(name) = pending {
            names.insert(name.to_string());
        }
        names.into_iter().collect()
    }

    /// Appends `event` to every registered participant's queue except the
    /// excluded ids.
    ///
    /// A failed `add` means that queue closed in a race with its own
    /// disconnect; the event is dropped for that participant only and its
    /// disconnect path is (idempotently) triggered.
    async fn broadcast(&self, event: Event, exclude: &[ParticipantId]) {
        for id in self.inner.participants.keys().await {
            if exclude.contains(&id) {
                continue;
            }
            let Some(participant) = self.inner.participants.get(&id).await else {
                continue;
            };
            if let Err(err) = participant.events.add(event.clone()).await {
                warn!(
                    id,
                    user = %participant.name,
                    event = event.kind(),
                    error = %err,
                    "dropping event for unreachable participant"
                );
                let hub = self.clone();
                tokio::spawn(async move {
                    let _ = hub.disconnect_participant(id, None, true).await;
                });
            }
        }
    }

    // Boxed rather than `async fn` to break the `broadcast` <->
    // `disconnect_participant` recursion in auto-trait resolution.
    fn disconnect_participant(
        &self,
        id: ParticipantId,
        reason: Option<ConnectionError>,
        notify: bool,
    ) -> futures::future::BoxFuture<'_, Result<(), HubError>> {
        Box::pin(async move {
            let participant = {
                let _state = self.inner.state.lock().await;
                let Some(participant) = self.inner.participants.delete(&id).await else {
                    return Err(HubError::ParticipantNotFound(id));
                };
                participant.events.close().await;

                if notify {
                    self.broadcast(
                        Event::UserLeave {
                            time: self.now(),
                            name: participant.name.clone(),
                        },
                        &[],
                    )
                    .await;
                    self.broadcast(
                        Event::UserListUpdate {
                            time: self.now(),
                            users: self.roster(None).await,
                        },
                        &[],
                    )
                    .await;
                }
                participant
            };

            // Bounded grace for the outbound pump to flush what is already
            // queued before the connection goes away.
            tokio::select! {
                _ = participant.events.drained() => {}
                _ = tokio::time::sleep(self.inner.config.drain_grace) => {
                    debug!(id, user = %participant.name, "drain grace elapsed");
                }
            }

            if participant.conn.close(reason).await.is_err() {
                debug!(id, user = %participant.name, "connection already closed");
            }
            info!(id, user = %participant.name, "participant disconnected");
            Ok(())
        })
    }

    fn spawn_pumps(&self, id: ParticipantId) {
        let hub = self.clone();
        tokio::spawn(async move {
            let reason = hub.pump_inbound(id).await.err();
            hub.finish_pump(id, reason).await;
        });

        let hub = self.clone();
        tokio::spawn(async move {
            let reason = hub.pump_outbound(id).await.err();
            hub.finish_pump(id, reason).await;
        });
    }

    /// Converts a pump outcome into an idempotent disconnect side effect.
    /// Pump errors are never surfaced to any caller.
    async fn finish_pump(&self, id: ParticipantId, reason: Option<ConnectionError>) {
        if let Some(ref err) = reason {
            debug!(id, error = %err, "pump stopped");
        }
        match self.disconnect_participant(id, reason, true).await {
            Ok(()) => {}
            Err(HubError::ParticipantNotFound(_)) => {} // already torn down
            Err(err) => warn!(id, error = %err, "disconnect after pump stop failed"),
        }
    }

    /// Reads events from the participant's connection and dispatches them
    /// until the connection fails or the participant is gone.
    async fn pump_inbound(&self, id: ParticipantId) -> Result<(), ConnectionError> {
        let Some(participant) = self.inner.participants.get(&id).await else {
            return Ok(());
        };
        let conn = Arc::clone(&participant.conn);
        drop(participant);

        loop {
            let event = conn.read_event().await?;
            if self.handle_event(id, event).await.is_err() {
                return Ok(());
            }
        }
    }

    /// Drains the participant's queue into its connection until the queue is
    /// closed and empty or a send fails.
    async fn pump_outbound(&self, id: ParticipantId) -> Result<(), ConnectionError> {
        let Some(participant) = self.inner.participants.get(&id).await else {
            return Ok(());
        };

        loop {
            let event = match participant.events.read().await {
                Ok(event) => event,
                // Closed and drained: disconnect already closed the queue.
                Err(_) => return Ok(()),
            };
            participant.conn.send_event(event).await?;
        }
    }

    async fn handle_event(&self, id: ParticipantId, event: Event) -> Result<(), HubError> {
        let participant = self
            .inner
            .participants
            .get(&id)
            .await
            .ok_or(HubError::ParticipantNotFound(id))?;
        debug!(id, user = %participant.name, event = event.kind(), "handling event");

        match event {
            Event::SendMessage { message, .. } => {
                // Echoed to the sender too, as delivery confirmation.
                self.broadcast(
                    Event::NewMessage {
                        time: self.now(),
                        sender: participant.name.clone(),
                        message,
                    },
                    &[],
                )
                .await;
            }
            // Outbound kinds arriving inbound are accepted but ignored.
            Event::Connected { .. }
            | Event::UserListUpdate { .. }
            | Event::UserEnter { .. }
            | Event::UserLeave { .. }
            | Event::NewMessage { .. } => {
                debug!(id, event = event.kind(), "ignoring inbound event kind");
            }
        }
        Ok(())
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}
