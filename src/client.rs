use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use serde::Deserialize;
use serde_json::Value;

use crate::error::GerritError;
use crate::events::GerritEvent;
use crate::models::Change;
use crate::queue::EventQueue;
use crate::registry::EventRegistry;
use crate::ssh::{escape_string, CommandRunner, Connection};
use crate::stream::{EventFeed, EventListener, GerritStream, ListenerSet};

type ConnectFn = dyn Fn() -> Result<Box<dyn EventFeed>, GerritError> + Send + Sync;

#[derive(Clone)]
struct SshConfig {
    host: String,
    username: String,
    priv_key_path: PathBuf,
}

/// Configures a [`GerritClient`].
pub struct Builder {
    registry: Option<EventRegistry>,
    queue_capacity: usize,
    poll_interval: Duration,
}

impl Default for Builder {
    fn default() -> Self {
        Builder {
            registry: None,
            queue_capacity: 1024,
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl Builder {
    /// Use a pre-populated registry instead of a fresh built-in one.
    pub fn with_registry(self, registry: EventRegistry) -> Self {
        Builder {
            registry: Some(registry),
            ..self
        }
    }

    /// Capacity of the hand-off queue.
    pub fn with_queue_capacity(self, queue_capacity: usize) -> Self {
        Builder {
            queue_capacity,
            ..self
        }
    }

    /// How long the stream thread waits for input before it checks for a
    /// stop request.
    pub fn with_poll_interval(self, poll_interval: Duration) -> Self {
        Builder {
            poll_interval,
            ..self
        }
    }

    /// A client talking to a Gerrit server over SSH.
    pub fn build(self, host: String, username: String, priv_key_path: PathBuf) -> GerritClient {
        let ssh = SshConfig {
            host,
            username,
            priv_key_path,
        };
        let stream_ssh = ssh.clone();
        let connect = move || {
            Connection::connect(
                stream_ssh.host.clone(),
                stream_ssh.username.clone(),
                stream_ssh.priv_key_path.clone(),
            )?
            .stream_events()
            .map(|feed| Box::new(feed) as Box<dyn EventFeed>)
        };
        self.finish(Some(ssh), Arc::new(connect))
    }

    /// A client over a custom feed, e.g. for tests or other transports.
    /// `connect` is called on the stream thread on every start. Commands
    /// and queries need the SSH transport and are not available.
    pub fn build_with_feed<F>(self, connect: F) -> GerritClient
    where
        F: Fn() -> Result<Box<dyn EventFeed>, GerritError> + Send + Sync + 'static,
    {
        self.finish(None, Arc::new(connect))
    }

    fn finish(self, ssh: Option<SshConfig>, connect: Arc<ConnectFn>) -> GerritClient {
        GerritClient {
            registry: Arc::new(self.registry.unwrap_or_default()),
            queue: Arc::new(EventQueue::with_capacity(self.queue_capacity)),
            listeners: Arc::new(ListenerSet::new()),
            connect,
            poll_interval: self.poll_interval,
            stream: None,
            ssh,
            command_runner: None,
        }
    }
}

/// Facade over the stream consumer, the hand-off queue and the command
/// connection.
///
/// ```no_run
/// use std::path::PathBuf;
/// use std::time::Duration;
///
/// use gerrit_client::GerritClient;
///
/// let mut client = GerritClient::new(
///     "review.example.org:29418".to_string(),
///     "jdoe".to_string(),
///     PathBuf::from("/home/jdoe/.ssh/id_rsa"),
/// );
/// client.start_event_stream();
/// while let Some(event) = client.get_event(Some(Duration::from_secs(60))) {
///     println!("{:?}", event);
/// }
/// client.stop_event_stream();
/// ```
pub struct GerritClient {
    registry: Arc<EventRegistry>,
    queue: Arc<EventQueue>,
    listeners: Arc<ListenerSet>,
    connect: Arc<ConnectFn>,
    poll_interval: Duration,
    stream: Option<GerritStream>,
    ssh: Option<SshConfig>,
    command_runner: Option<CommandRunner>,
}

impl GerritClient {
    /// A client with default settings; see [`Builder`] for the knobs.
    pub fn new(host: String, username: String, priv_key_path: PathBuf) -> Self {
        Self::builder().build(host, username, priv_key_path)
    }

    pub fn builder() -> Builder {
        Builder::default()
    }

    /// The event registry, for registering application event kinds.
    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    /// Start the background stream consumer. Does nothing when it is
    /// already running.
    pub fn start_event_stream(&mut self) {
        if self.stream.is_some() {
            debug!("event stream already started");
            return;
        }

        info!("Starting event stream.");
        let connect = self.connect.clone();
        self.stream = Some(GerritStream::spawn(
            move || (*connect)(),
            self.registry.clone(),
            self.queue.clone(),
            self.listeners.clone(),
            self.poll_interval,
        ));
    }

    /// Stop the stream consumer and discard anything it already queued.
    /// When this returns, no more events will be delivered.
    pub fn stop_event_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            info!("Stopping event stream.");
            stream.join();
            let discarded = self.queue.clear();
            if discarded > 0 {
                debug!("discarded {} queued events", discarded);
            }
        }
    }

    /// Wait for the next event, at most `timeout` long. Without a timeout
    /// the call blocks until an event arrives.
    pub fn get_event(&self, timeout: Option<Duration>) -> Option<Box<dyn GerritEvent>> {
        self.queue.get(timeout)
    }

    /// Take the next event if one is already queued.
    pub fn try_get_event(&self) -> Option<Box<dyn GerritEvent>> {
        self.queue.try_get()
    }

    /// Construct an event from `data` and append it to the queue, as if it
    /// had arrived on the stream.
    pub fn put_event(&self, data: &Value) -> Result<(), GerritError> {
        self.queue.put(self.registry.create(data)?)
    }

    /// Attach a listener. While any listener is attached, events go to the
    /// listeners instead of the queue; see [`EventListener`].
    pub fn attach(&self, listener: Arc<dyn EventListener>) {
        self.listeners.attach(listener);
    }

    /// Detach a previously attached listener.
    pub fn detach(&self, listener: &Arc<dyn EventListener>) {
        self.listeners.detach(listener);
    }

    /// Run `gerrit query` for `term` and decode the matching changes,
    /// with their current patch set and approvals filled in.
    pub fn query(&mut self, term: &str) -> Result<Vec<Change>, GerritError> {
        let command = format!(
            "gerrit query --current-patch-set --all-approvals --format JSON --commit-message {}",
            escape_string(term)
        );
        let output = self.run_command(&command)?;
        parse_query_results(&output)
    }

    /// The version of the Gerrit server, e.g. `2.16.3`.
    pub fn gerrit_version(&mut self) -> Result<String, GerritError> {
        let output = self.run_command("gerrit version")?;
        parse_version(&output)
    }

    /// Run a raw command on the dedicated command connection, connecting
    /// it on first use.
    pub fn run_command(&mut self, command: &str) -> Result<String, GerritError> {
        let ssh = self.ssh.as_ref().ok_or_else(|| {
            GerritError::Command("client was built without an ssh transport".to_string())
        })?;

        let mut runner = match self.command_runner.take() {
            Some(runner) => runner,
            None => CommandRunner::new(Connection::connect(
                ssh.host.clone(),
                ssh.username.clone(),
                ssh.priv_key_path.clone(),
            )?),
        };

        let result = runner.run_command(command);
        self.command_runner = Some(runner);
        result
    }
}

/// Decode `gerrit query` output: one JSON object per line. An error record
/// fails the whole query; rows without a `project` key (the trailing stats
/// record) are not changes and are skipped.
fn parse_query_results(output: &str) -> Result<Vec<Change>, GerritError> {
    let mut changes = Vec::new();

    for line in output.lines().filter(|line| !line.is_empty()) {
        let data: Value = serde_json::from_str(line)
            .map_err(|err| GerritError::Query(format!("undecodable query result: {}", err)))?;

        if data.get("type").and_then(Value::as_str) == Some("error") {
            let message = data
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown query error");
            return Err(GerritError::Query(message.to_string()));
        }
        if data.get("project").is_none() {
            continue;
        }

        let change = Change::deserialize(&data)
            .map_err(|err| GerritError::Query(format!("undecodable change: {}", err)))?;
        changes.push(change);
    }

    Ok(changes)
}

/// Extract `X.Y.Z` from `gerrit version X.Y.Z` output.
fn parse_version(output: &str) -> Result<String, GerritError> {
    let output = output.trim();
    output
        .strip_prefix("gerrit version ")
        .map(str::to_string)
        .ok_or_else(|| GerritError::Query(format!("unexpected version output: {}", output)))
}

#[cfg(test)]
mod test {
    use super::*;

    use assert_matches::assert_matches;
    use serde_json::json;
    use spectral::prelude::*;

    use crate::events::{kind, CommentAddedEvent};

    const QUERY_OUTPUT: &str = r#"{"project":"demo","branch":"master","id":"Icb4d0ee3","number":4899,"subject":"Disable RTTI","url":"https://review.example.org/4899","status":"NEW","currentPatchSet":{"number":2,"revision":"b5ee28c6","ref":"refs/changes/99/4899/2","approvals":[{"type":"CRVW","value":"2"}]}}
{"type":"stats","rowCount":1,"runTimeMilliseconds":12}
"#;

    #[test]
    fn test_parse_query_results() {
        let changes = parse_query_results(QUERY_OUTPUT).expect("query failed");
        assert_that!(changes).has_length(1);
        assert_that!(changes[0].number).is_equal_to(4899);

        let patchset = changes[0]
            .current_patch_set
            .as_ref()
            .expect("no current patch set");
        assert_that!(patchset.approvals).has_length(1);
        assert_that!(patchset.approvals[0].category).is_equal_to("CRVW".to_string());
    }

    #[test]
    fn test_parse_query_results_error_record() {
        let result = parse_query_results(r#"{"type":"error","message":"not signed in"}"#);
        assert_matches!(result, Err(GerritError::Query(ref message)) if message == "not signed in");
    }

    #[test]
    fn test_parse_query_results_garbage() {
        let result = parse_query_results("gerrit: command not found");
        assert_matches!(result, Err(GerritError::Query(_)));
    }

    #[test]
    fn test_parse_version() {
        let version = parse_version("gerrit version 2.16.3\n").expect("version failed");
        assert_that!(version).is_equal_to("2.16.3".to_string());

        let result = parse_version("unknown command gerrit\n");
        assert_matches!(result, Err(GerritError::Query(_)));
    }

    #[test]
    fn test_put_event_goes_through_the_registry() {
        let client = GerritClient::builder()
            .with_queue_capacity(4)
            .build_with_feed(|| {
                Err(GerritError::Connection("never started".to_string()))
            });

        let data = json!({
            "type": "comment-added",
            "change": {
                "project": "demo",
                "branch": "master",
                "id": "I05e14a6",
                "number": 1,
                "subject": "s",
                "url": "http://localhost:8080/1"
            },
            "patchSet": {"number": 1, "revision": "c4f7d434", "ref": "refs/changes/01/1/1"},
            "author": {"name": "jdoe"},
            "comment": "LGTM"
        });
        client.put_event(&data).expect("put failed");

        let event = client.try_get_event().expect("no event");
        assert_that!(event.kind()).is_equal_to(kind::COMMENT_ADDED);
        assert!(event.downcast_ref::<CommentAddedEvent>().is_some());

        let result = client.put_event(&json!({"no": "type"}));
        assert_matches!(result, Err(GerritError::MalformedEvent(_)));
    }

    #[test]
    fn test_run_command_without_transport() {
        let mut client = GerritClient::builder().build_with_feed(|| {
            Err(GerritError::Connection("never started".to_string()))
        });
        assert_matches!(client.run_command("gerrit version"), Err(GerritError::Command(_)));
    }
}
