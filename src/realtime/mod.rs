//! Realtime lifecycle events.
//!
//! One [`RealtimeHub`] per process owns the event-stream connection. It
//! connects when the first session view subscribes, fans decoded events out
//! to the subscribers of the matching room, reconnects with exponential
//! backoff while anyone is listening, and disconnects when the last
//! [`Subscription`] is dropped.

pub mod sse;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use futures::stream::BoxStream;
use futures::StreamExt;
use rand::Rng;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::models::{ProgressHint, SessionId};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

const MAX_BACKOFF_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    Joined { participant_count: u32 },
    ParticipantCount(u32),
    Building,
    /// Any stream location in the payload is deliberately not carried.
    Started,
    Progress(ProgressHint),
    Ended,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoomEvent {
    pub room_id: SessionId,
    pub event: LifecycleEvent,
}

#[derive(Deserialize)]
struct RoomOnly {
    room_id: SessionId,
}

#[derive(Deserialize)]
struct JoinedPayload {
    room_id: SessionId,
    #[serde(default)]
    participant_count: u32,
}

#[derive(Deserialize)]
struct ParticipantPayload {
    room_id: SessionId,
    count: u32,
}

#[derive(Deserialize)]
struct RakahPayload {
    room_id: SessionId,
    current_rakah: u32,
    total_rakats: u32,
}

/// Decodes one named event. Unknown names and malformed payloads yield `None`.
pub fn decode_event(name: &str, data: &str) -> Option<RoomEvent> {
    let decoded = match name {
        "room_joined" => serde_json::from_str::<JoinedPayload>(data).map(|p| RoomEvent {
            room_id: p.room_id,
            event: LifecycleEvent::Joined {
                participant_count: p.participant_count,
            },
        }),
        "participant_update" => {
            serde_json::from_str::<ParticipantPayload>(data).map(|p| RoomEvent {
                room_id: p.room_id,
                event: LifecycleEvent::ParticipantCount(p.count),
            })
        }
        "rakah_update" => serde_json::from_str::<RakahPayload>(data).map(|p| RoomEvent {
            room_id: p.room_id,
            event: LifecycleEvent::Progress(ProgressHint {
                current_unit: p.current_rakah,
                total_units: p.total_rakats,
            }),
        }),
        "room_building" | "room_started" | "room_ended" => {
            let event = match name {
                "room_building" => LifecycleEvent::Building,
                "room_started" => LifecycleEvent::Started,
                _ => LifecycleEvent::Ended,
            };
            serde_json::from_str::<RoomOnly>(data).map(|p| RoomEvent {
                room_id: p.room_id,
                event,
            })
        }
        _ => return None,
    };

    match decoded {
        Ok(event) => Some(event),
        Err(err) => {
            log_warn!("dropping malformed {} event: {}", name, err);
            None
        }
    }
}

/// What a connection attempt yields, independent of the wire protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Open,
    Message { event: String, data: String },
    Error(String),
}

pub trait EventTransport: Send + Sync + 'static {
    /// Starts one connection attempt. The stream ends when the connection does.
    fn open(&self) -> BoxStream<'static, TransportEvent>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Event(LifecycleEvent),
    /// The connection came back after a drop; server-side room membership
    /// must be re-established.
    Reconnected,
    Disconnected,
}

struct Subscriber {
    session_id: SessionId,
    tx: mpsc::UnboundedSender<HubMessage>,
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    subscribers: HashMap<u64, Subscriber>,
    connection: Option<CancellationToken>,
}

struct HubInner {
    transport: Arc<dyn EventTransport>,
    state: Mutex<HubState>,
}

impl HubInner {
    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn dispatch(&self, event: RoomEvent) {
        let state = self.lock();
        for subscriber in state.subscribers.values() {
            if subscriber.session_id == event.room_id {
                let _ = subscriber.tx.send(HubMessage::Event(event.event.clone()));
            }
        }
    }

    fn broadcast(&self, message: HubMessage) {
        let state = self.lock();
        for subscriber in state.subscribers.values() {
            let _ = subscriber.tx.send(message.clone());
        }
    }
}

#[derive(Clone)]
pub struct RealtimeHub {
    inner: Arc<HubInner>,
}

impl RealtimeHub {
    pub fn new(transport: Arc<dyn EventTransport>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                transport,
                state: Mutex::new(HubState::default()),
            }),
        }
    }

    /// Registers interest in one room. Must be called inside a Tokio runtime;
    /// the first subscriber starts the connection task.
    pub fn subscribe(&self, session_id: SessionId) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.inner.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.subscribers.insert(id, Subscriber { session_id, tx });

        if state.connection.is_none() {
            let cancel = CancellationToken::new();
            state.connection = Some(cancel.clone());
            log_info!("opening realtime connection");
            tokio::spawn(run_connection(
                Arc::downgrade(&self.inner),
                self.inner.transport.clone(),
                cancel,
            ));
        }
        log_debug!(
            "subscriber {} joined room {} ({} active)",
            id,
            session_id,
            state.subscribers.len()
        );

        Subscription {
            id,
            rx,
            hub: self.clone(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.lock().connection.is_some()
    }

    fn unsubscribe(&self, id: u64) {
        let mut state = self.inner.lock();
        state.subscribers.remove(&id);
        if state.subscribers.is_empty() {
            if let Some(cancel) = state.connection.take() {
                log_info!("last subscriber left; closing realtime connection");
                cancel.cancel();
            }
        }
    }
}

/// A room-scoped handle on the hub. Dropping it releases the reference.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<HubMessage>,
    hub: RealtimeHub,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<HubMessage> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let secs = MAX_BACKOFF_SECS.min(2u64.saturating_pow(attempt.saturating_sub(1)));
    let jitter_ms = rand::thread_rng().gen_range(0..=secs * 250);
    Duration::from_secs(secs) + Duration::from_millis(jitter_ms)
}

async fn run_connection(
    hub: Weak<HubInner>,
    transport: Arc<dyn EventTransport>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;
    let mut opened_before = false;

    loop {
        if attempt > 0 {
            let delay = backoff_delay(attempt);
            log_info!(
                "reconnecting realtime channel in {:?} (attempt #{})",
                delay,
                attempt + 1
            );
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let mut stream = transport.open();
        let mut open = false;

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return,
                next = stream.next() => next,
            };
            let Some(inner) = hub.upgrade() else {
                return;
            };

            match next {
                Some(TransportEvent::Open) => {
                    log_info!("realtime channel open");
                    open = true;
                    attempt = 0;
                    if opened_before {
                        inner.broadcast(HubMessage::Reconnected);
                    }
                    opened_before = true;
                }
                Some(TransportEvent::Message { event, data }) => {
                    if let Some(room_event) = decode_event(&event, &data) {
                        inner.dispatch(room_event);
                    }
                }
                Some(TransportEvent::Error(err)) => {
                    log_warn!("realtime channel error: {}", err);
                    break;
                }
                None => {
                    log_warn!("realtime channel closed by server");
                    break;
                }
            }
        }

        if open {
            if let Some(inner) = hub.upgrade() {
                inner.broadcast(HubMessage::Disconnected);
            }
        }
        attempt = attempt.saturating_add(1);
    }
}
