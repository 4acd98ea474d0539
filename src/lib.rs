//! Client for the event stream and the command interface of a Gerrit code
//! review server, over SSH.
//!
//! [`GerritClient`] owns a background thread that follows
//! `gerrit stream-events`, decodes each line into a typed event and hands
//! it over through a bounded queue or to attached [`EventListener`]s.
//! Transport failures are delivered as [`ErrorEvent`]s instead of being
//! raised, so the consuming side observes the stream ending as data.

mod client;
mod error;
mod events;
mod models;
mod queue;
mod registry;
mod ssh;
mod stream;

pub use crate::client::{Builder, GerritClient};
pub use crate::error::GerritError;
pub use crate::events::{
    kind, ChangeAbandonedEvent, ChangeMergedEvent, ChangeRestoredEvent, CommentAddedEvent,
    DraftPublishedEvent, ErrorEvent, GerritEvent, MergeFailedEvent, PatchsetCreatedEvent,
    RefUpdatedEvent, ReviewerAddedEvent, TopicChangedEvent, UnhandledEvent,
};
pub use crate::models::{
    Account, Approval, Change, CurrentPatchset, Patchset, RefUpdate, Username,
};
pub use crate::queue::EventQueue;
pub use crate::registry::{EventFactory, EventRegistry};
pub use crate::ssh::{escape_string, CommandRunner, Connection, SshFeed};
pub use crate::stream::{EventFeed, EventListener, GerritStream, ListenerSet};
