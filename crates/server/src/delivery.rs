//! Per-caller event delivery
//!
//! One bounded buffer per caller; the orchestrator pushes fire-and-
//! forget. Buffer policy: bounded at 256, oldest event dropped with a
//! warning on overflow. Event production is never blocked on a slow
//! observer, unbounded buffering is disallowed, and a push always
//! lands in the buffer, so the session's terminal event survives even
//! when the observer has fallen a full window behind.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::{debug, warn};

use workbay_protocol::ObserverEvent;

const BUFFER_CAPACITY: usize = 256;

struct Channel {
    queue: Mutex<VecDeque<ObserverEvent>>,
    notify: Notify,
    closed: AtomicBool,
}

impl Channel {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }
}

/// Receiving half of one caller's delivery channel.
///
/// Buffered events remain readable after the channel is closed;
/// `recv` returns `None` only once the buffer is drained.
pub struct ObserverReceiver {
    channel: Arc<Channel>,
}

impl ObserverReceiver {
    /// Receive the next event, in push order. Cancel-safe.
    pub async fn recv(&mut self) -> Option<ObserverEvent> {
        loop {
            // Arm the notification before checking the queue so a push
            // between the check and the await is never missed.
            let notified = self.channel.notify.notified();
            if let Some(event) = self
                .channel
                .queue
                .lock()
                .expect("delivery queue lock poisoned")
                .pop_front()
            {
                return Some(event);
            }
            if self.channel.closed.load(Ordering::Acquire) {
                return None;
            }
            notified.await;
        }
    }
}

/// Registry of per-caller delivery channels
pub struct DeliveryRegistry {
    channels: Mutex<HashMap<String, Arc<Channel>>>,
}

impl DeliveryRegistry {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Open (or replace) the delivery channel for a caller.
    /// The previous channel, if any, is closed.
    pub fn subscribe(&self, caller_id: &str) -> ObserverReceiver {
        let channel = Arc::new(Channel::new());
        let mut channels = self.channels.lock().expect("delivery lock poisoned");
        if let Some(old) = channels.insert(caller_id.to_string(), Arc::clone(&channel)) {
            old.close();
        }
        ObserverReceiver { channel }
    }

    /// Drop a caller's channel
    pub fn unsubscribe(&self, caller_id: &str) {
        let mut channels = self.channels.lock().expect("delivery lock poisoned");
        if let Some(channel) = channels.remove(caller_id) {
            channel.close();
        }
    }

    /// Push one event to a caller. Fire-and-forget: a missing
    /// subscriber is logged and never affects the session; a full
    /// buffer evicts its oldest event to make room.
    pub fn push(&self, caller_id: &str, event: ObserverEvent) {
        let channel = {
            let channels = self.channels.lock().expect("delivery lock poisoned");
            match channels.get(caller_id) {
                Some(channel) => Arc::clone(channel),
                None => {
                    debug!(
                        component = "delivery",
                        event = "delivery.no_subscriber",
                        caller_id = %caller_id,
                    );
                    return;
                }
            }
        };

        {
            let mut queue = channel
                .queue
                .lock()
                .expect("delivery queue lock poisoned");
            if queue.len() >= BUFFER_CAPACITY {
                let dropped = queue.pop_front();
                warn!(
                    component = "delivery",
                    event = "delivery.buffer_full",
                    caller_id = %caller_id,
                    dropped = ?dropped,
                    "Observer buffer full, dropping oldest event"
                );
            }
            queue.push_back(event);
        }
        channel.notify.notify_one();
    }
}

impl Default for DeliveryRegistry {
    fn default() -> Self {
        Self::new()
    }
}
