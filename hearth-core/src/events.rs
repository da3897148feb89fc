//! Notification fan-out for server lifecycle events
//!
//! Supervisors publish three kinds of events (console lines, status changes,
//! participant-list changes) into an [`EventHub`]. The hub calls every
//! registered listener for that kind and forwards the event to broadcast
//! subscribers, which is how an outer transport layer relays updates.
//!
//! # Example
//!
//! ```rust
//! use hearth_core::events::{EventHub, ServerEvent};
//! use hearth_core::model::ServerStatus;
//!
//! let hub = EventHub::new();
//! hub.on_status(|target_id, status| {
//!     println!("{} is now {:?}", target_id, status.status);
//! });
//!
//! hub.publish(ServerEvent::Status {
//!     target_id: "srv-1".to_string(),
//!     status: ServerStatus::stopped(),
//! });
//! ```

use crate::console::ConsoleLine;
use crate::model::ServerStatus;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;

/// Capacity of the broadcast channel behind [`EventHub::subscribe`]
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Event emitted for one target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A line of process output (or a synthetic supervisor line)
    Console {
        target_id: String,
        line: ConsoleLine,
    },

    /// Lifecycle status changed
    Status {
        target_id: String,
        status: ServerStatus,
    },

    /// Set of joined participants changed
    Participants {
        target_id: String,
        participants: Vec<String>,
    },
}

impl ServerEvent {
    /// Target this event belongs to
    pub fn target_id(&self) -> &str {
        match self {
            ServerEvent::Console { target_id, .. }
            | ServerEvent::Status { target_id, .. }
            | ServerEvent::Participants { target_id, .. } => target_id,
        }
    }
}

type ConsoleListener = Arc<dyn Fn(&str, &ConsoleLine) + Send + Sync>;
type StatusListener = Arc<dyn Fn(&str, &ServerStatus) + Send + Sync>;
type ParticipantsListener = Arc<dyn Fn(&str, &[String]) + Send + Sync>;

/// Typed listener registry plus a broadcast channel
pub struct EventHub {
    console: RwLock<Vec<ConsoleListener>>,
    status: RwLock<Vec<StatusListener>>,
    participants: RwLock<Vec<ParticipantsListener>>,
    tx: broadcast::Sender<ServerEvent>,
}

impl EventHub {
    /// Create an empty hub
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            console: RwLock::new(Vec::new()),
            status: RwLock::new(Vec::new()),
            participants: RwLock::new(Vec::new()),
            tx,
        }
    }

    /// Register a console-line listener
    pub fn on_console<F>(&self, listener: F)
    where
        F: Fn(&str, &ConsoleLine) + Send + Sync + 'static,
    {
        write_list(&self.console).push(Arc::new(listener));
    }

    /// Register a status listener
    pub fn on_status<F>(&self, listener: F)
    where
        F: Fn(&str, &ServerStatus) + Send + Sync + 'static,
    {
        write_list(&self.status).push(Arc::new(listener));
    }

    /// Register a participant-list listener
    pub fn on_participants<F>(&self, listener: F)
    where
        F: Fn(&str, &[String]) + Send + Sync + 'static,
    {
        write_list(&self.participants).push(Arc::new(listener));
    }

    /// Receive every event published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.tx.subscribe()
    }

    /// Deliver an event to matching listeners, then to broadcast subscribers
    pub fn publish(&self, event: ServerEvent) {
        match &event {
            ServerEvent::Console { target_id, line } => {
                for listener in read_list(&self.console) {
                    listener(target_id, line);
                }
            }
            ServerEvent::Status { target_id, status } => {
                for listener in read_list(&self.status) {
                    listener(target_id, status);
                }
            }
            ServerEvent::Participants {
                target_id,
                participants,
            } => {
                for listener in read_list(&self.participants) {
                    listener(target_id, participants);
                }
            }
        }

        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("console_listeners", &read_list(&self.console).len())
            .field("status_listeners", &read_list(&self.status).len())
            .field("participants_listeners", &read_list(&self.participants).len())
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

/// Snapshot the listener list so callbacks run without the lock held
fn read_list<T: Clone>(lock: &RwLock<Vec<T>>) -> Vec<T> {
    match lock.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn write_list<T>(lock: &RwLock<Vec<T>>) -> std::sync::RwLockWriteGuard<'_, Vec<T>> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
