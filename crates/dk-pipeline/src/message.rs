//! Message envelopes (`spec.md` §4.8), grounded on
//! `original_source/dkit/multi_processing.py`'s `Message`/`ListMessage`/
//! `ImmutableMessage`.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub trait Envelope {
    fn id(&self) -> &str;
}

/// A batch of items moving together through the pipeline as one unit of
/// work, identified by a random id (`original_source`'s `uid()`, ported
/// here as a UUID rather than the original's hand-rolled base-85 short
/// identifier — both are just opaque unique tokens).
#[derive(Debug, Clone)]
pub struct ListMessage<T> {
    pub id: String,
    pub payload: Vec<T>,
    pub initiated: DateTime<Utc>,
}

impl<T> ListMessage<T> {
    pub fn new(payload: Vec<T>) -> Self {
        ListMessage {
            id: Uuid::new_v4().to_string(),
            payload,
            initiated: Utc::now(),
        }
    }
}

impl<T> Envelope for ListMessage<T> {
    fn id(&self) -> &str {
        &self.id
    }
}

/// A single item whose id is derived from the item itself (an adler32
/// hash of its `Debug` representation), so the same input always yields
/// the same id — the property `ImmutablePipeline`'s accounting mode
/// relies on to recognise work already completed in a previous run.
#[derive(Debug, Clone)]
pub struct ImmutableMessage<A, R> {
    pub id: String,
    pub args: A,
    pub result: Option<R>,
    pub initiated: DateTime<Utc>,
}

impl<A: std::fmt::Debug, R> ImmutableMessage<A, R> {
    pub fn new(args: A) -> Self {
        let id = adler32::RollingAdler32::from_buffer(format!("{args:?}").as_bytes())
            .hash()
            .to_string();
        ImmutableMessage {
            id,
            args,
            result: None,
            initiated: Utc::now(),
        }
    }
}

impl<A, R> Envelope for ImmutableMessage<A, R> {
    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn immutable_message_id_is_deterministic_for_equal_args() {
        let a = ImmutableMessage::<_, ()>::new(vec![1, 2, 3]);
        let b = ImmutableMessage::<_, ()>::new(vec![1, 2, 3]);
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn list_message_ids_are_unique() {
        let a = ListMessage::new(vec![1, 2]);
        let b = ListMessage::new(vec![1, 2]);
        assert_ne!(a.id, b.id);
    }
}
