//! In-memory record caches.
//!
//! [`RecordCache`] keeps records most-recent-first and never holds two
//! entries with the same identifier. [`PredicateCache`] layers a predicate on
//! top and folds realtime events into it.

use serde_json::Value;

use jobtrack_core::{DomainResult, Entity, Filter};
use jobtrack_events::{Projection, RecordAction, RecordEvent};

/// Ordered, identifier-unique record list.
#[derive(Debug, Clone)]
pub struct RecordCache<T: Entity> {
    records: Vec<T>,
}

impl<T: Entity> Default for RecordCache<T> {
    fn default() -> Self {
        Self { records: Vec::new() }
    }
}

impl<T: Entity> RecordCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents wholesale. Later duplicates of an id are dropped.
    pub fn replace_all(&mut self, records: impl IntoIterator<Item = T>) {
        self.records.clear();
        for record in records {
            if self.position(record.id()).is_none() {
                self.records.push(record);
            }
        }
    }

    /// Replace in place when present, otherwise insert at the front.
    pub fn upsert_front(&mut self, record: T) {
        match self.position(record.id()) {
            Some(pos) => self.records[pos] = record,
            None => self.records.insert(0, record),
        }
    }

    pub fn remove(&mut self, id: &T::Id) -> Option<T> {
        self.position(id).map(|pos| self.records.remove(pos))
    }

    pub fn get(&self, id: &T::Id) -> Option<&T> {
        self.records.iter().find(|r| r.id() == id)
    }

    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Option<&T> {
        self.records.iter().find(|r| predicate(r))
    }

    pub fn contains(&self, id: &T::Id) -> bool {
        self.position(id).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.records.clone()
    }

    fn position(&self, id: &T::Id) -> Option<usize> {
        self.records.iter().position(|r| r.id() == id)
    }
}

/// Cache holding only records that satisfy a predicate.
///
/// Event rules:
/// - create: insert at the front if the record matches, otherwise ignore
/// - update: upsert if it still matches, otherwise remove
/// - delete: remove by id
pub struct PredicateCache<T: Entity> {
    cache: RecordCache<T>,
    predicate: Filter,
    decode: fn(Value) -> DomainResult<T>,
}

impl<T: Entity> PredicateCache<T> {
    pub fn new(predicate: Filter, decode: fn(Value) -> DomainResult<T>) -> Self {
        Self {
            cache: RecordCache::new(),
            predicate,
            decode,
        }
    }

    pub fn predicate(&self) -> &Filter {
        &self.predicate
    }

    pub fn records(&self) -> &RecordCache<T> {
        &self.cache
    }

    pub fn replace_all(&mut self, records: impl IntoIterator<Item = T>) {
        self.cache.replace_all(records);
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

impl<T> Projection for PredicateCache<T>
where
    T: Entity,
    T::Id: for<'a> From<&'a str>,
{
    type Record = Value;

    fn apply(&mut self, event: &RecordEvent<Value>) -> bool {
        match event.action {
            RecordAction::Delete => {
                let Some(id) = event.record_id() else {
                    tracing::warn!("dropping delete event without id");
                    return false;
                };
                self.cache.remove(&T::Id::from(id)).is_some()
            }
            RecordAction::Create | RecordAction::Update => {
                let matches = self.predicate.matches(&event.record);
                if !matches {
                    if event.action == RecordAction::Create {
                        return false;
                    }
                    return match event.record_id() {
                        Some(id) => self.cache.remove(&T::Id::from(id)).is_some(),
                        None => false,
                    };
                }

                match (self.decode)(event.record.clone()) {
                    Ok(record) => {
                        self.cache.upsert_front(record);
                        true
                    }
                    Err(err) => {
                        tracing::warn!(
                            id = event.record_id().unwrap_or_default(),
                            error = %err,
                            "dropping malformed record event"
                        );
                        false
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobtrack_core::{Job, JobId};
    use serde_json::json;

    fn processed_jobs() -> PredicateCache<Job> {
        PredicateCache::new(Filter::eq("status", "processed"), Job::from_value)
    }

    fn job(id: &str, status: &str) -> Value {
        json!({"id": id, "title": format!("Job {id}"), "status": status, "collectionName": "jobs"})
    }

    fn ids(cache: &PredicateCache<Job>) -> Vec<String> {
        cache.records().iter().map(|j| j.id.to_string()).collect()
    }

    #[test]
    fn replace_all_deduplicates() {
        let mut cache = RecordCache::new();
        cache.replace_all([Job::new("a", "A"), Job::new("b", "B"), Job::new("a", "A again")]);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&JobId::from("a")).unwrap().title, "A");
    }

    #[test]
    fn upsert_replaces_in_place_or_inserts_at_front() {
        let mut cache = RecordCache::new();
        cache.replace_all([Job::new("a", "A"), Job::new("b", "B")]);

        cache.upsert_front(Job::new("b", "B2"));
        cache.upsert_front(Job::new("c", "C"));

        let titles: Vec<&str> = cache.iter().map(|j| j.title.as_str()).collect();
        assert_eq!(titles, vec!["C", "A", "B2"]);
    }

    #[test]
    fn create_outside_predicate_is_ignored() {
        let mut cache = processed_jobs();
        assert!(!cache.apply(&RecordEvent::create(job("j1", "pending"))));
        assert!(cache.records().is_empty());
    }

    #[test]
    fn update_moving_out_of_predicate_removes() {
        let mut cache = processed_jobs();
        cache.apply(&RecordEvent::create(job("j1", "processed")));
        assert!(cache.apply(&RecordEvent::update(job("j1", "pending"))));
        assert!(cache.records().is_empty());
    }

    #[test]
    fn update_moving_into_predicate_inserts_once() {
        let mut cache = processed_jobs();
        cache.apply(&RecordEvent::update(job("j1", "processed")));
        cache.apply(&RecordEvent::update(job("j1", "processed")));
        cache.apply(&RecordEvent::create(job("j1", "processed")));
        assert_eq!(ids(&cache), vec!["j1"]);
    }

    #[test]
    fn delete_removes_by_id() {
        let mut cache = processed_jobs();
        cache.apply(&RecordEvent::create(job("j1", "processed")));
        cache.apply(&RecordEvent::create(job("j2", "processed")));
        assert!(cache.apply(&RecordEvent::delete(json!({"id": "j1"}))));
        assert!(!cache.apply(&RecordEvent::delete(json!({"id": "missing"}))));
        assert_eq!(ids(&cache), vec!["j2"]);
    }

    #[test]
    fn malformed_records_are_dropped() {
        let mut cache = processed_jobs();
        let bad = json!({"id": "j1", "status": "processed", "title": 42});
        assert!(!cache.apply(&RecordEvent::create(bad)));
        assert!(cache.records().is_empty());
    }
}
