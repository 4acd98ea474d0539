use std::any::Any;
use std::fmt;

use serde::Deserialize;
use serde_json::Value;

use crate::models::{Account, Approval, Change, Patchset, RefUpdate};

/// Event kind discriminators as they appear in the `type` field on the wire.
pub mod kind {
    pub const PATCHSET_CREATED: &str = "patchset-created";
    pub const DRAFT_PUBLISHED: &str = "draft-published";
    pub const COMMENT_ADDED: &str = "comment-added";
    pub const CHANGE_MERGED: &str = "change-merged";
    pub const MERGE_FAILED: &str = "merge-failed";
    pub const CHANGE_ABANDONED: &str = "change-abandoned";
    pub const CHANGE_RESTORED: &str = "change-restored";
    pub const REF_UPDATED: &str = "ref-updated";
    pub const REVIEWER_ADDED: &str = "reviewer-added";
    pub const TOPIC_CHANGED: &str = "topic-changed";
    pub const UNHANDLED: &str = "unhandled-event";
    pub const ERROR: &str = "error-event";
}

/// One decoded event from the `gerrit stream-events` feed.
///
/// Consumers look at [`kind`](GerritEvent::kind) and downcast to the
/// concrete type:
///
/// ```
/// # use gerrit_client::{ChangeMergedEvent, GerritEvent};
/// fn handle(event: &dyn GerritEvent) {
///     if let Some(merged) = event.downcast_ref::<ChangeMergedEvent>() {
///         println!("{} was merged", merged.change.change_id);
///     }
/// }
/// ```
pub trait GerritEvent: fmt::Debug + Send + Any {
    /// The wire discriminator this event was constructed for.
    fn kind(&self) -> &str;
    fn as_any(&self) -> &dyn Any;
}

impl dyn GerritEvent {
    /// Downcast to a concrete event type.
    pub fn downcast_ref<T: GerritEvent>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

macro_rules! impl_event {
    ($event:ty, $kind:expr) => {
        impl GerritEvent for $event {
            fn kind(&self) -> &str {
                $kind
            }

            fn as_any(&self) -> &dyn Any {
                self
            }
        }
    };
}

/// A new patchset was uploaded to a change.
#[derive(Deserialize, Debug, Clone)]
pub struct PatchsetCreatedEvent {
    pub change: Change,
    #[serde(rename = "patchSet")]
    pub patchset: Patchset,
    pub uploader: Account,
}
impl_event!(PatchsetCreatedEvent, kind::PATCHSET_CREATED);

/// A draft patchset was made visible.
#[derive(Deserialize, Debug, Clone)]
pub struct DraftPublishedEvent {
    pub change: Change,
    #[serde(rename = "patchSet")]
    pub patchset: Patchset,
    pub uploader: Account,
}
impl_event!(DraftPublishedEvent, kind::DRAFT_PUBLISHED);

/// A review comment, possibly with approval votes.
#[derive(Deserialize, Debug, Clone)]
pub struct CommentAddedEvent {
    pub change: Change,
    #[serde(rename = "patchSet")]
    pub patchset: Patchset,
    pub author: Account,
    pub comment: String,
    #[serde(default)]
    pub approvals: Vec<Approval>,
}
impl_event!(CommentAddedEvent, kind::COMMENT_ADDED);

#[derive(Deserialize, Debug, Clone)]
pub struct ChangeMergedEvent {
    pub change: Change,
    #[serde(rename = "patchSet")]
    pub patchset: Patchset,
    pub submitter: Account,
}
impl_event!(ChangeMergedEvent, kind::CHANGE_MERGED);

#[derive(Deserialize, Debug, Clone)]
pub struct MergeFailedEvent {
    pub change: Change,
    #[serde(rename = "patchSet")]
    pub patchset: Patchset,
    pub submitter: Account,
    pub reason: Option<String>,
}
impl_event!(MergeFailedEvent, kind::MERGE_FAILED);

#[derive(Deserialize, Debug, Clone)]
pub struct ChangeAbandonedEvent {
    pub change: Change,
    #[serde(rename = "patchSet")]
    pub patchset: Option<Patchset>,
    pub abandoner: Account,
    pub reason: Option<String>,
}
impl_event!(ChangeAbandonedEvent, kind::CHANGE_ABANDONED);

#[derive(Deserialize, Debug, Clone)]
pub struct ChangeRestoredEvent {
    pub change: Change,
    #[serde(rename = "patchSet")]
    pub patchset: Option<Patchset>,
    pub restorer: Account,
    pub reason: Option<String>,
}
impl_event!(ChangeRestoredEvent, kind::CHANGE_RESTORED);

/// A reference was moved directly, e.g. by a push or a merge.
#[derive(Deserialize, Debug, Clone)]
pub struct RefUpdatedEvent {
    #[serde(rename = "refUpdate")]
    pub ref_update: RefUpdate,
    pub submitter: Option<Account>,
}
impl_event!(RefUpdatedEvent, kind::REF_UPDATED);

#[derive(Deserialize, Debug, Clone)]
pub struct ReviewerAddedEvent {
    pub change: Change,
    #[serde(rename = "patchSet")]
    pub patchset: Option<Patchset>,
    pub reviewer: Account,
}
impl_event!(ReviewerAddedEvent, kind::REVIEWER_ADDED);

#[derive(Deserialize, Debug, Clone)]
pub struct TopicChangedEvent {
    pub change: Change,
    pub changer: Account,
    #[serde(rename = "oldTopic")]
    pub old_topic: Option<String>,
}
impl_event!(TopicChangedEvent, kind::TOPIC_CHANGED);

/// An event whose `type` has no registered constructor.
///
/// Unknown kinds are data, not errors: newer servers add event types and
/// the stream has to keep flowing. The full object is kept in `raw`.
#[derive(Debug, Clone)]
pub struct UnhandledEvent {
    /// The unrecognized discriminator.
    pub kind: String,
    pub raw: Value,
}

impl GerritEvent for UnhandledEvent {
    fn kind(&self) -> &str {
        kind::UNHANDLED
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Synthetic event taking the place of data the stream could not deliver:
/// an undecodable line, or the reason the stream terminated.
#[derive(Deserialize, Debug, Clone)]
pub struct ErrorEvent {
    pub error: String,
}
impl_event!(ErrorEvent, kind::ERROR);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_downcast() {
        let event: Box<dyn GerritEvent> = Box::new(ErrorEvent {
            error: "remote server connection closed".to_string(),
        });
        assert_eq!(event.kind(), kind::ERROR);
        assert!(event.downcast_ref::<ErrorEvent>().is_some());
        assert!(event.downcast_ref::<RefUpdatedEvent>().is_none());
    }

    #[test]
    fn test_comment_added_approvals_default_to_empty() {
        let event: CommentAddedEvent = serde_json::from_str(
            r#"{"change":{"project":"demo","branch":"master","id":"I05e14a6","number":1,"subject":"s","url":"http://localhost:8080/1"},"patchSet":{"number":1,"revision":"c4f7d434","ref":"refs/changes/01/1/1"},"author":{"name":"jdoe"},"comment":"LGTM"}"#,
        )
        .expect("failed to deserialize");
        assert!(event.approvals.is_empty());
    }
}
