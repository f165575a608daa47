use crate::RecordEvent;

/// A projection folds change events into a local read model.
///
/// The record caches are projections: the initial snapshot seeds them and every
/// realtime event is applied on top.
///
/// ## Idempotency
///
/// Events may be echoes of writes the client already applied locally, and the
/// same record may be delivered more than once. `apply` must therefore upsert
/// or remove by identifier rather than append blindly.
///
/// ## Error Handling
///
/// `apply` does not fail. Events that do not concern this projection (other
/// collection, other user, predicate mismatch on create) are ignored.
pub trait Projection {
    type Record;

    /// Apply a single event. Returns `true` when the read model changed.
    fn apply(&mut self, event: &RecordEvent<Self::Record>) -> bool;

    /// Apply many events in order. Returns `true` if any changed the model.
    fn apply_all<'a>(&mut self, events: impl IntoIterator<Item = &'a RecordEvent<Self::Record>>) -> bool
    where
        Self::Record: 'a,
    {
        let mut changed = false;
        for event in events {
            changed |= self.apply(event);
        }
        changed
    }
}
