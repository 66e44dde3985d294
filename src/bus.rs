use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::agent::{AgentEvent, AgentId};
use crate::registry::WorkspaceKey;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusEvent {
    pub agent_id: AgentId,
    pub workspace: WorkspaceKey,
    pub event: AgentEvent,
}

/// Fan-out channel for agent output. Every subscriber sees every event
/// published after it subscribed.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<Sender<BusEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        Subscription { rx }
    }

    pub fn publish(&self, event: BusEvent) {
        let Ok(mut subscribers) = self.subscribers.lock() else {
            return;
        };
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[derive(Debug)]
pub struct Subscription {
    rx: Receiver<BusEvent>,
}

impl Subscription {
    pub fn drain_limited(&self, max_events: usize) -> Vec<BusEvent> {
        let mut events = Vec::new();
        while events.len() < max_events {
            let Ok(event) = self.rx.try_recv() else {
                break;
            };
            events.push(event);
        }
        events
    }

    /// Returns `None` on timeout and when every publisher is gone.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<BusEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }
}
