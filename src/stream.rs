use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info};

use crate::error::GerritError;
use crate::events::GerritEvent;
use crate::queue::EventQueue;
use crate::registry::EventRegistry;

/// Line source feeding a [`GerritStream`].
///
/// `poll_line` waits at most `timeout` for a complete line. `Ok(Some(_))`
/// is one line without its terminator, `Ok(None)` means nothing arrived in
/// time, and `Err` reports a failed or closed transport.
pub trait EventFeed: Send {
    fn poll_line(&mut self, timeout: Duration) -> Result<Option<String>, GerritError>;
}

/// Receives events synchronously on the stream thread.
///
/// While at least one listener is attached, events are dispatched to the
/// listeners in attachment order instead of being queued. Dispatch happens
/// on the stream thread: a listener that blocks stalls the stream, and one
/// that panics kills it.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &dyn GerritEvent);
}

/// The attached listeners, in attachment order.
#[derive(Default)]
pub struct ListenerSet {
    listeners: Mutex<Vec<Arc<dyn EventListener>>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a listener; attaching the same instance twice keeps one entry.
    pub fn attach(&self, listener: Arc<dyn EventListener>) {
        let mut listeners = self.listeners.lock().unwrap();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
    }

    /// Detach a listener. Detaching one that was never attached does
    /// nothing.
    pub fn detach(&self, listener: &Arc<dyn EventListener>) {
        let mut listeners = self.listeners.lock().unwrap();
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().unwrap().is_empty()
    }

    fn dispatch(&self, event: &dyn GerritEvent) {
        // Snapshot, so listeners can attach or detach from inside on_event.
        let listeners: Vec<_> = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            listener.on_event(event);
        }
    }
}

/// Handle to the background thread consuming one event stream.
///
/// The thread runs until the transport fails or [`stop`](GerritStream::stop)
/// is requested. A stopped stream cannot be restarted; spawn a new one.
pub struct GerritStream {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl GerritStream {
    /// Spawn the stream thread. The feed is connected on that thread; a
    /// connect failure surfaces as one terminal error event.
    pub fn spawn<F>(
        connect: F,
        registry: Arc<EventRegistry>,
        queue: Arc<EventQueue>,
        listeners: Arc<ListenerSet>,
        poll_interval: Duration,
    ) -> Self
    where
        F: FnOnce() -> Result<Box<dyn EventFeed>, GerritError> + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let worker = StreamWorker {
            stop: stop.clone(),
            registry,
            queue,
            listeners,
            poll_interval,
        };

        let handle = thread::Builder::new()
            .name("gerrit event stream".to_string())
            .spawn(move || worker.run(connect))
            .expect("failed to spawn thread");

        GerritStream {
            stop,
            handle: Some(handle),
        }
    }

    /// Ask the stream thread to stop. Takes effect within one poll
    /// interval.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Wait until the stream thread has finished. Implies [`stop`](GerritStream::stop).
    pub fn join(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("stream thread panicked");
            }
        }
    }
}

impl Drop for GerritStream {
    fn drop(&mut self) {
        // Let the thread run out on its own; joining here could block the
        // caller for a full poll interval.
        self.stop();
    }
}

struct StreamWorker {
    stop: Arc<AtomicBool>,
    registry: Arc<EventRegistry>,
    queue: Arc<EventQueue>,
    listeners: Arc<ListenerSet>,
    poll_interval: Duration,
}

impl StreamWorker {
    fn run<F>(self, connect: F)
    where
        F: FnOnce() -> Result<Box<dyn EventFeed>, GerritError>,
    {
        let mut feed = match connect() {
            Ok(feed) => feed,
            Err(err) => {
                error!("Could not connect to Gerrit: {}", err);
                self.emit_error(&err.to_string());
                self.stop.store(true, Ordering::SeqCst);
                return;
            }
        };
        info!("Connected to Gerrit.");

        while !self.stop.load(Ordering::SeqCst) {
            match feed.poll_line(self.poll_interval) {
                Ok(Some(line)) => {
                    if self.handle_line(&line).is_err() {
                        break;
                    }
                }
                // Nothing arrived in time, check the stop flag again.
                Ok(None) => continue,
                Err(err) => {
                    error!("Event stream failed: {}", err);
                    self.emit_error(&err.to_string());
                    break;
                }
            }
        }

        self.stop.store(true, Ordering::SeqCst);
        debug!("stream thread shutting down");
    }

    /// Decode and deliver one line. `Err` means delivery failed and the
    /// stream has to stop.
    fn handle_line(&self, line: &str) -> Result<(), ()> {
        match self.registry.decode(line) {
            Ok(event) => {
                debug!("Incoming Gerrit event: {:?}", event);
                self.deliver(event)
            }
            Err(err) => {
                // Data-level failure. Report it in place of the event and
                // keep the stream alive.
                debug!("skipping undecodable event: {}", err);
                self.deliver(self.registry.error_event(&err.to_string()))
            }
        }
    }

    fn deliver(&self, event: Box<dyn GerritEvent>) -> Result<(), ()> {
        if !self.listeners.is_empty() {
            self.listeners.dispatch(event.as_ref());
            return Ok(());
        }

        self.queue.put(event).map_err(|err| {
            error!("Cannot hand off event: {}. Will drop connection.", err);
            self.emit_error(&err.to_string());
        })
    }

    /// Best effort: dispatched to listeners when there are any, otherwise
    /// queued, and dropped when even that fails.
    fn emit_error(&self, message: &str) {
        let event = self.registry.error_event(message);
        if !self.listeners.is_empty() {
            self.listeners.dispatch(event.as_ref());
        } else if self.queue.put(event).is_err() {
            debug!("dropping error event, queue is full");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::collections::VecDeque;

    use crate::events::{kind, ErrorEvent, RefUpdatedEvent};

    struct ScriptedFeed {
        lines: VecDeque<&'static str>,
    }

    impl ScriptedFeed {
        fn boxed(lines: &[&'static str]) -> Box<dyn EventFeed> {
            Box::new(ScriptedFeed {
                lines: lines.iter().cloned().collect(),
            })
        }
    }

    impl EventFeed for ScriptedFeed {
        fn poll_line(&mut self, _timeout: Duration) -> Result<Option<String>, GerritError> {
            match self.lines.pop_front() {
                Some(line) => Ok(Some(line.to_string())),
                None => Err(GerritError::Connection(
                    "remote server connection closed".to_string(),
                )),
            }
        }
    }

    /// Pretends to be an idle connection: nothing ever arrives.
    struct IdleFeed;

    impl EventFeed for IdleFeed {
        fn poll_line(&mut self, timeout: Duration) -> Result<Option<String>, GerritError> {
            thread::sleep(timeout);
            Ok(None)
        }
    }

    const REF_UPDATED: &str = r#"{"type":"ref-updated","submitter":{"name":"jdoe"},"refUpdate":{"project":"demo","refName":"refs/heads/master","oldRev":"a8d52e4a","newRev":"32ca2fa1"}}"#;

    fn spawn_with_feed(
        feed: Box<dyn EventFeed>,
        queue: &Arc<EventQueue>,
        listeners: &Arc<ListenerSet>,
    ) -> GerritStream {
        GerritStream::spawn(
            move || Ok(feed),
            Arc::new(EventRegistry::new()),
            queue.clone(),
            listeners.clone(),
            Duration::from_millis(10),
        )
    }

    #[test]
    fn test_stop_is_honored_while_idle() {
        let queue = Arc::new(EventQueue::with_capacity(4));
        let listeners = Arc::new(ListenerSet::new());
        let mut stream = spawn_with_feed(Box::new(IdleFeed), &queue, &listeners);

        stream.stop();
        // Hangs forever if the stop flag is not polled.
        stream.join();
        assert!(queue.try_get().is_none());
    }

    #[test]
    fn test_events_arrive_in_input_order() {
        let queue = Arc::new(EventQueue::with_capacity(8));
        let listeners = Arc::new(ListenerSet::new());
        let lines = [REF_UPDATED, REF_UPDATED];
        let mut stream = spawn_with_feed(ScriptedFeed::boxed(&lines), &queue, &listeners);

        for _ in 0..2 {
            let event = queue.get(Some(Duration::from_secs(5))).expect("no event");
            assert!(event.downcast_ref::<RefUpdatedEvent>().is_some());
        }

        // The exhausted feed reports a closed connection.
        let last = queue.get(Some(Duration::from_secs(5))).expect("no error event");
        let error = last.downcast_ref::<ErrorEvent>().expect("wrong event type");
        assert_eq!(error.error, "connection failed: remote server connection closed");

        stream.join();
    }

    #[test]
    fn test_connect_failure_is_terminal() {
        let queue = Arc::new(EventQueue::with_capacity(4));
        let mut stream = GerritStream::spawn(
            || Err(GerritError::Connection("no route to host".to_string())),
            Arc::new(EventRegistry::new()),
            queue.clone(),
            Arc::new(ListenerSet::new()),
            Duration::from_millis(10),
        );
        stream.join();

        let event = queue.try_get().expect("no error event");
        let error = event.downcast_ref::<ErrorEvent>().expect("wrong event type");
        assert!(error.error.contains("no route to host"));
        assert!(queue.try_get().is_none());
    }

    #[test]
    fn test_bad_lines_become_error_events() {
        let queue = Arc::new(EventQueue::with_capacity(8));
        let listeners = Arc::new(ListenerSet::new());
        // Parseable JSON without a type, then a valid event: the stream
        // must survive the first line.
        let lines = [r#"{"project":"demo"}"#, REF_UPDATED];
        let mut stream = spawn_with_feed(ScriptedFeed::boxed(&lines), &queue, &listeners);

        let first = queue.get(Some(Duration::from_secs(5))).expect("no event");
        assert_eq!(first.kind(), kind::ERROR);
        let second = queue.get(Some(Duration::from_secs(5))).expect("no event");
        assert_eq!(second.kind(), kind::REF_UPDATED);

        stream.join();
    }

    struct RecordingListener {
        kinds: Mutex<Vec<String>>,
    }

    impl EventListener for RecordingListener {
        fn on_event(&self, event: &dyn GerritEvent) {
            self.kinds.lock().unwrap().push(event.kind().to_string());
        }
    }

    #[test]
    fn test_listeners_bypass_the_queue() {
        let queue = Arc::new(EventQueue::with_capacity(8));
        let listeners = Arc::new(ListenerSet::new());
        let listener = Arc::new(RecordingListener {
            kinds: Mutex::new(Vec::new()),
        });
        listeners.attach(listener.clone());

        let lines = [REF_UPDATED];
        let mut stream = spawn_with_feed(ScriptedFeed::boxed(&lines), &queue, &listeners);
        stream.join();

        let kinds = listener.kinds.lock().unwrap();
        assert_eq!(*kinds, vec![kind::REF_UPDATED, kind::ERROR]);
        assert!(queue.try_get().is_none());
    }

    #[test]
    fn test_attach_is_idempotent() {
        let listeners = ListenerSet::new();
        let listener: Arc<dyn EventListener> = Arc::new(RecordingListener {
            kinds: Mutex::new(Vec::new()),
        });

        listeners.attach(listener.clone());
        listeners.attach(listener.clone());
        assert_eq!(listeners.len(), 1);

        let other: Arc<dyn EventListener> = Arc::new(RecordingListener {
            kinds: Mutex::new(Vec::new()),
        });
        listeners.detach(&other);
        assert_eq!(listeners.len(), 1);

        listeners.detach(&listener);
        assert!(listeners.is_empty());
    }
}
