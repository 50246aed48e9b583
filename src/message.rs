//! The `Message` value type: an immutable snapshot of a spooled row.

use chrono::{DateTime, Utc};

/// A single spooled message.
///
/// Snapshots returned by the repository never alias a live row — callers
/// hold their own copy, and `payload` is `None` for listing operations that
/// strip it (`allUnpublishedMessagesNoPayload` and friends).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    pub topic: String,
    pub qos: u8,
    pub retain: bool,
    pub priority: i64,
    pub payload: Option<Vec<u8>>,
    pub created_on: DateTime<Utc>,
    pub published_on: Option<DateTime<Utc>>,
    pub published_message_id: i64,
    pub session_id: Option<String>,
    pub confirmed_on: Option<DateTime<Utc>>,
    pub dropped_on: Option<DateTime<Utc>>,
}

/// Derived lifecycle state, computed from the timestamp tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Unpublished,
    InFlight,
    PublishedFireAndForget,
    Confirmed,
    Dropped,
}

impl Message {
    /// Derive the lifecycle state from the
    /// `(publishedOn?, confirmedOn?, droppedOn?, qos)` tuple.
    pub fn state(&self) -> MessageState {
        match (
            self.published_on.is_some(),
            self.confirmed_on.is_some(),
            self.dropped_on.is_some(),
        ) {
            (false, _, _) => MessageState::Unpublished,
            (true, true, _) => MessageState::Confirmed,
            (true, _, true) => MessageState::Dropped,
            (true, false, false) if self.qos > 0 => MessageState::InFlight,
            (true, false, false) => MessageState::PublishedFireAndForget,
        }
    }

    pub fn builder(id: i64) -> MessageBuilder {
        MessageBuilder::new(id)
    }
}

/// Builder seeded with the store-assigned `id`.
///
/// Used internally by the repository when hydrating a row read back from
/// SQLite; not part of the public construction path for a fresh message
/// (that only happens via `Repository::store`).
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    id: i64,
    topic: String,
    qos: u8,
    retain: bool,
    priority: i64,
    payload: Option<Vec<u8>>,
    created_on: Option<DateTime<Utc>>,
    published_on: Option<DateTime<Utc>>,
    published_message_id: i64,
    session_id: Option<String>,
    confirmed_on: Option<DateTime<Utc>>,
    dropped_on: Option<DateTime<Utc>>,
}

impl MessageBuilder {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            topic: String::new(),
            qos: 0,
            retain: false,
            priority: 0,
            payload: None,
            created_on: None,
            published_on: None,
            published_message_id: -1,
            session_id: None,
            confirmed_on: None,
            dropped_on: None,
        }
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn qos(mut self, qos: u8) -> Self {
        self.qos = qos;
        self
    }

    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn payload(mut self, payload: Option<Vec<u8>>) -> Self {
        self.payload = payload;
        self
    }

    pub fn created_on(mut self, created_on: DateTime<Utc>) -> Self {
        self.created_on = Some(created_on);
        self
    }

    pub fn published_on(mut self, published_on: Option<DateTime<Utc>>) -> Self {
        self.published_on = published_on;
        self
    }

    pub fn published_message_id(mut self, published_message_id: i64) -> Self {
        self.published_message_id = published_message_id;
        self
    }

    pub fn session_id(mut self, session_id: Option<String>) -> Self {
        self.session_id = session_id;
        self
    }

    pub fn confirmed_on(mut self, confirmed_on: Option<DateTime<Utc>>) -> Self {
        self.confirmed_on = confirmed_on;
        self
    }

    pub fn dropped_on(mut self, dropped_on: Option<DateTime<Utc>>) -> Self {
        self.dropped_on = dropped_on;
        self
    }

    pub fn build(self) -> Message {
        Message {
            id: self.id,
            topic: self.topic,
            qos: self.qos,
            retain: self.retain,
            priority: self.priority,
            payload: self.payload,
            created_on: self.created_on.unwrap_or_else(Utc::now),
            published_on: self.published_on,
            published_message_id: self.published_message_id,
            session_id: self.session_id,
            confirmed_on: self.confirmed_on,
            dropped_on: self.dropped_on,
        }
    }
}
