use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::GerritError;
use crate::events::GerritEvent;

/// Bounded hand-off queue between the stream thread and the application.
///
/// Append never blocks: when the application stops draining, the stream
/// side gets [`GerritError::QueueFull`] instead of silently losing events.
pub struct EventQueue {
    sender: SyncSender<Box<dyn GerritEvent>>,
    receiver: Mutex<Receiver<Box<dyn GerritEvent>>>,
}

impl EventQueue {
    /// A queue holding at most `capacity` events; capacities below one are
    /// raised to one.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, receiver) = sync_channel(capacity.max(1));
        EventQueue {
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    /// Append an event, failing when the queue is at capacity.
    pub fn put(&self, event: Box<dyn GerritEvent>) -> Result<(), GerritError> {
        // The receiving half lives in the same struct, so the only way to
        // fail is a full buffer.
        self.sender
            .try_send(event)
            .map_err(|_| GerritError::QueueFull)
    }

    /// Wait for the next event, at most `timeout` long. Without a timeout
    /// the call blocks until an event arrives.
    pub fn get(&self, timeout: Option<Duration>) -> Option<Box<dyn GerritEvent>> {
        let receiver = self.receiver.lock().unwrap();
        match timeout {
            Some(timeout) => receiver.recv_timeout(timeout).ok(),
            None => receiver.recv().ok(),
        }
    }

    /// Take the next event if one is already buffered.
    pub fn try_get(&self) -> Option<Box<dyn GerritEvent>> {
        self.receiver.lock().unwrap().try_recv().ok()
    }

    /// Drop all buffered events and return how many were removed.
    pub fn clear(&self) -> usize {
        let receiver = self.receiver.lock().unwrap();
        let mut removed = 0;
        while receiver.try_recv().is_ok() {
            removed += 1;
        }
        removed
    }
}
