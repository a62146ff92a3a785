use crate::model::{EntityRecord, Position};
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;

/// Produces the opaque business payload for a newly created record.
pub trait PayloadFactory {
    fn create(&mut self, identity: &str, position: &Position) -> Value;
}

impl<F> PayloadFactory for F
where
    F: FnMut(&str, &Position) -> Value,
{
    fn create(&mut self, identity: &str, position: &Position) -> Value {
        self(identity, position)
    }
}

/// Default payload source: a creation timestamp and an `active` status.
#[derive(Debug, Clone, Copy, Default)]
pub struct StampedPayloadFactory;

impl PayloadFactory for StampedPayloadFactory {
    fn create(&mut self, _identity: &str, _position: &Position) -> Value {
        serde_json::json!({
            "created_at": Utc::now().to_rfc3339(),
            "status": "active",
        })
    }
}

/// One authoritative record per identity. Only the engine writes here.
#[derive(Debug, Default)]
pub struct EntityStore {
    records: HashMap<String, EntityRecord>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identity: &str) -> Option<&EntityRecord> {
        self.records.get(identity)
    }

    /// Creates the record if absent; `payloads` runs only on the creation path.
    /// An existing record is returned untouched.
    pub fn upsert_new<P>(
        &mut self,
        identity: &str,
        position: Position,
        payloads: &mut P,
    ) -> &EntityRecord
    where
        P: PayloadFactory + ?Sized,
    {
        self.records
            .entry(identity.to_string())
            .or_insert_with(|| {
                let payload = payloads.create(identity, &position);
                EntityRecord::new(identity, position.lat, position.lng, payload)
            })
    }

    /// Returns `false` when the identity has no record.
    pub fn update_position(&mut self, identity: &str, position: &Position) -> bool {
        match self.records.get_mut(identity) {
            Some(record) => {
                record.relocate(position.lat, position.lng);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, identity: &str) -> Option<EntityRecord> {
        self.records.remove(identity)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.records.contains_key(identity)
    }

    /// Records sorted by identity.
    pub fn records(&self) -> Vec<&EntityRecord> {
        let mut records: Vec<_> = self.records.values().collect();
        records.sort_by(|a, b| a.identity.cmp(&b.identity));
        records
    }

    pub fn identities(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.records.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
