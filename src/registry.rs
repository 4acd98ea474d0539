use std::collections::HashMap;
use std::sync::Mutex;

use log::debug;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::GerritError;
use crate::events::{
    kind, ChangeAbandonedEvent, ChangeMergedEvent, ChangeRestoredEvent, CommentAddedEvent,
    DraftPublishedEvent, ErrorEvent, GerritEvent, MergeFailedEvent, PatchsetCreatedEvent,
    RefUpdatedEvent, ReviewerAddedEvent, TopicChangedEvent, UnhandledEvent,
};

/// Constructor for one event kind: the parsed event object in, the typed
/// event out. Rejections are reported as deserialization errors; custom
/// constructors can build them with `serde::de::Error::custom`.
pub type EventFactory =
    Box<dyn Fn(&Value) -> Result<Box<dyn GerritEvent>, serde_json::Error> + Send + Sync>;

/// Maps the `type` discriminator of incoming event objects to constructors.
///
/// A fresh registry knows all event kinds the library ships; applications
/// register their own kinds with [`register`](EventRegistry::register) or
/// [`register_event`](EventRegistry::register_event), at any time, also
/// while a stream is running.
pub struct EventRegistry {
    factories: Mutex<HashMap<String, EventFactory>>,
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRegistry {
    /// A registry with all built-in event kinds registered.
    pub fn new() -> Self {
        let mut factories = HashMap::new();
        insert::<PatchsetCreatedEvent>(&mut factories, kind::PATCHSET_CREATED);
        insert::<DraftPublishedEvent>(&mut factories, kind::DRAFT_PUBLISHED);
        insert::<CommentAddedEvent>(&mut factories, kind::COMMENT_ADDED);
        insert::<ChangeMergedEvent>(&mut factories, kind::CHANGE_MERGED);
        insert::<MergeFailedEvent>(&mut factories, kind::MERGE_FAILED);
        insert::<ChangeAbandonedEvent>(&mut factories, kind::CHANGE_ABANDONED);
        insert::<ChangeRestoredEvent>(&mut factories, kind::CHANGE_RESTORED);
        insert::<RefUpdatedEvent>(&mut factories, kind::REF_UPDATED);
        insert::<ReviewerAddedEvent>(&mut factories, kind::REVIEWER_ADDED);
        insert::<TopicChangedEvent>(&mut factories, kind::TOPIC_CHANGED);
        insert::<ErrorEvent>(&mut factories, kind::ERROR);

        EventRegistry {
            factories: Mutex::new(factories),
        }
    }

    /// Bind a constructor to an event kind.
    ///
    /// Fails with [`GerritError::DuplicateEvent`] when the kind is already
    /// bound; the first binding stays active.
    pub fn register(&self, kind: &str, factory: EventFactory) -> Result<(), GerritError> {
        let mut factories = self.factories.lock().unwrap();
        if factories.contains_key(kind) {
            return Err(GerritError::DuplicateEvent(kind.to_string()));
        }
        factories.insert(kind.to_string(), factory);
        Ok(())
    }

    /// Bind a deserializable event type to an event kind.
    pub fn register_event<T>(&self, kind: &str) -> Result<(), GerritError>
    where
        T: GerritEvent + DeserializeOwned,
    {
        self.register(kind, typed_factory::<T>())
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.factories.lock().unwrap().contains_key(kind)
    }

    /// Construct a typed event from a parsed event object.
    ///
    /// Unknown kinds come back as [`UnhandledEvent`]; an object without a
    /// string `type` is malformed.
    pub fn create(&self, data: &Value) -> Result<Box<dyn GerritEvent>, GerritError> {
        let kind = data
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| GerritError::MalformedEvent("no type in event object".to_string()))?;

        let factories = self.factories.lock().unwrap();
        match factories.get(kind) {
            Some(factory) => {
                factory(data).map_err(|err| GerritError::InvalidEvent(kind.to_string(), err))
            }
            None => {
                debug!("no constructor for event kind {:?}", kind);
                Ok(Box::new(UnhandledEvent {
                    kind: kind.to_string(),
                    raw: data.clone(),
                }))
            }
        }
    }

    /// Decode one line from the event stream.
    ///
    /// A line that is not valid JSON becomes a synthetic error event, so
    /// decoding only fails for structurally broken event objects.
    pub fn decode(&self, line: &str) -> Result<Box<dyn GerritEvent>, GerritError> {
        match serde_json::from_str::<Value>(line) {
            Ok(data) => self.create(&data),
            Err(err) => self.create(&error_object(&format!("invalid JSON: {}", err))),
        }
    }

    /// The synthetic event the stream machinery delivers in place of data
    /// it could not produce.
    pub fn error_event(&self, message: &str) -> Box<dyn GerritEvent> {
        // The error-event constructor cannot be unregistered, so this only
        // falls through if a custom one rejects the object.
        self.create(&error_object(message)).unwrap_or_else(|_| {
            Box::new(ErrorEvent {
                error: message.to_string(),
            })
        })
    }
}

fn error_object(message: &str) -> Value {
    json!({ "type": kind::ERROR, "error": message })
}

fn typed_factory<T>() -> EventFactory
where
    T: GerritEvent + DeserializeOwned,
{
    Box::new(|data| T::deserialize(data).map(|event| Box::new(event) as Box<dyn GerritEvent>))
}

fn insert<T>(factories: &mut HashMap<String, EventFactory>, kind: &str)
where
    T: GerritEvent + DeserializeOwned,
{
    factories.insert(kind.to_string(), typed_factory::<T>());
}
