//! Mutation events and the per-document ledger of pending events.

use std::collections::HashSet;

use crate::model::{ModelId, PropertyValue};

/// Identity of a recorded event, unique within its document.
///
/// Two events with identical content are still distinct entries in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

impl EventId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Kinds of document mutation the patch protocol understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ModelChanged,
    RootAdded,
    RootRemoved,
}

impl EventKind {
    /// Wire name of this kind inside patch content.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ModelChanged => "ModelChanged",
            EventKind::RootAdded => "RootAdded",
            EventKind::RootRemoved => "RootRemoved",
        }
    }
}

/// An immutable record of one observed change.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationEvent {
    id: EventId,
    kind: EventKind,
    model: ModelId,
    attr: Option<String>,
    old: Option<PropertyValue>,
    new: Option<PropertyValue>,
}

impl MutationEvent {
    pub(crate) fn model_changed(
        id: EventId,
        model: ModelId,
        attr: impl Into<String>,
        old: Option<PropertyValue>,
        new: PropertyValue,
    ) -> Self {
        Self {
            id,
            kind: EventKind::ModelChanged,
            model,
            attr: Some(attr.into()),
            old,
            new: Some(new),
        }
    }

    pub(crate) fn root_added(id: EventId, model: ModelId) -> Self {
        Self {
            id,
            kind: EventKind::RootAdded,
            model,
            attr: None,
            old: None,
            new: None,
        }
    }

    pub(crate) fn root_removed(id: EventId, model: ModelId) -> Self {
        Self {
            id,
            kind: EventKind::RootRemoved,
            model,
            attr: None,
            old: None,
            new: None,
        }
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn model(&self) -> &ModelId {
        &self.model
    }

    pub fn attr(&self) -> Option<&str> {
        self.attr.as_deref()
    }

    pub fn old(&self) -> Option<&PropertyValue> {
        self.old.as_ref()
    }

    pub fn new_value(&self) -> Option<&PropertyValue> {
        self.new.as_ref()
    }
}

/// Ordered queue of events waiting to be encoded into a patch.
#[derive(Debug, Clone, Default)]
pub struct EventLedger {
    events: Vec<MutationEvent>,
}

impl EventLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event. Duplicates are kept.
    pub fn record(&mut self, event: MutationEvent) {
        self.events.push(event);
    }

    /// Remove exactly the supplied events, keeping the survivors in order.
    ///
    /// Returns how many entries were removed.
    pub fn drain(&mut self, events: &[MutationEvent]) -> usize {
        let ids: HashSet<EventId> = events.iter().map(MutationEvent::id).collect();
        let before = self.events.len();
        self.events.retain(|event| !ids.contains(&event.id));
        before - self.events.len()
    }

    /// Remove every pending event matching `predicate`.
    ///
    /// Returns how many entries were removed.
    pub fn discard(&mut self, predicate: impl Fn(&MutationEvent) -> bool) -> usize {
        let before = self.events.len();
        self.events.retain(|event| !predicate(event));
        before - self.events.len()
    }

    pub fn pending(&self) -> &[MutationEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}
