//! Record lifecycle listeners.
//!
//! Every entity type owns a [`ListenerChain`]: an ordered list of
//! [`RecordListener`]s notified around each write the unit of work performs.
//! `pre_*` hooks run before the statement, `post_*` hooks after it.
//!
//! Hooks can be suppressed for the whole chain or for a single listener,
//! either entirely or for a set of [`Hook`]s.

use crate::record::RecordRef;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// A lifecycle hook point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    PreSave,
    PostSave,
    PreInsert,
    PostInsert,
    PreUpdate,
    PostUpdate,
    PreDelete,
    PostDelete,
}

impl Hook {
    /// Hook name as used in logs.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Hook::PreSave => "preSave",
            Hook::PostSave => "postSave",
            Hook::PreInsert => "preInsert",
            Hook::PostInsert => "postInsert",
            Hook::PreUpdate => "preUpdate",
            Hook::PostUpdate => "postUpdate",
            Hook::PreDelete => "preDelete",
            Hook::PostDelete => "postDelete",
        }
    }

    /// The operation this hook brackets.
    pub const fn kind(&self) -> EventKind {
        match self {
            Hook::PreSave | Hook::PostSave => EventKind::Save,
            Hook::PreInsert | Hook::PostInsert => EventKind::Insert,
            Hook::PreUpdate | Hook::PostUpdate => EventKind::Update,
            Hook::PreDelete | Hook::PostDelete => EventKind::Delete,
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The operation an [`Event`] reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Save,
    Insert,
    Update,
    Delete,
}

/// A notification handed to listeners.
#[derive(Debug, Clone)]
pub struct Event {
    kind: EventKind,
    record: RecordRef,
    skipped: bool,
}

impl Event {
    pub fn new(kind: EventKind, record: RecordRef) -> Self {
        Self {
            kind,
            record,
            skipped: false,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// The record the event is about.
    pub fn record(&self) -> &RecordRef {
        &self.record
    }

    /// Ask the unit of work to skip the operation.
    ///
    /// From a pre-save, pre-insert or pre-update hook the write is skipped.
    /// From a pre-delete hook the record is left out of the batched
    /// `DELETE` but still receives its post-delete notification.
    pub fn skip_operation(&mut self) {
        self.skipped = true;
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped
    }
}

/// Receives record lifecycle notifications. Every hook defaults to a no-op.
pub trait RecordListener: Send + Sync {
    fn pre_save(&self, _event: &mut Event) {}
    fn post_save(&self, _event: &mut Event) {}
    fn pre_insert(&self, _event: &mut Event) {}
    fn post_insert(&self, _event: &mut Event) {}
    fn pre_update(&self, _event: &mut Event) {}
    fn post_update(&self, _event: &mut Event) {}
    fn pre_delete(&self, _event: &mut Event) {}
    fn post_delete(&self, _event: &mut Event) {}
}

/// Which hooks are switched off.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Suppression {
    /// Nothing suppressed.
    #[default]
    None,
    /// Every hook suppressed.
    All,
    /// Only the listed hooks suppressed.
    Hooks(HashSet<Hook>),
}

impl Suppression {
    /// Suppress only the given hooks.
    pub fn hooks(hooks: impl IntoIterator<Item = Hook>) -> Self {
        Suppression::Hooks(hooks.into_iter().collect())
    }

    pub fn suppresses(&self, hook: Hook) -> bool {
        match self {
            Suppression::None => false,
            Suppression::All => true,
            Suppression::Hooks(set) => set.contains(&hook),
        }
    }
}

struct ListenerEntry {
    name: Option<String>,
    listener: Arc<dyn RecordListener>,
    suppression: Suppression,
}

/// An ordered list of listeners with chain-wide and per-listener suppression.
#[derive(Default)]
pub struct ListenerChain {
    entries: Vec<ListenerEntry>,
    suppression: Suppression,
}

impl ListenerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an anonymous listener.
    pub fn add(&mut self, listener: Arc<dyn RecordListener>) {
        self.entries.push(ListenerEntry {
            name: None,
            listener,
            suppression: Suppression::None,
        });
    }

    /// Add a named listener, replacing any listener already under that name.
    pub fn set(&mut self, name: impl Into<String>, listener: Arc<dyn RecordListener>) {
        let name = name.into();
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.name.as_deref() == Some(name.as_str()))
        {
            entry.listener = listener;
            return;
        }
        self.entries.push(ListenerEntry {
            name: Some(name),
            listener,
            suppression: Suppression::None,
        });
    }

    /// Look up a named listener.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn RecordListener>> {
        self.entries
            .iter()
            .find(|e| e.name.as_deref() == Some(name))
            .map(|e| &e.listener)
    }

    /// Suppress hooks for the whole chain.
    pub fn set_suppression(&mut self, suppression: Suppression) {
        self.suppression = suppression;
    }

    /// Suppress hooks for one named listener. Returns false if no listener
    /// has that name.
    pub fn set_listener_suppression(&mut self, name: &str, suppression: Suppression) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|e| e.name.as_deref() == Some(name))
        {
            Some(entry) => {
                entry.suppression = suppression;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Notify every listener not suppressed for `hook`, in order.
    pub fn dispatch(&self, hook: Hook, event: &mut Event) {
        if self.suppression.suppresses(hook) {
            tracing::trace!(hook = %hook, "Listener chain suppressed");
            return;
        }

        for entry in &self.entries {
            if entry.suppression.suppresses(hook) {
                continue;
            }
            let listener = entry.listener.as_ref();
            match hook {
                Hook::PreSave => listener.pre_save(event),
                Hook::PostSave => listener.post_save(event),
                Hook::PreInsert => listener.pre_insert(event),
                Hook::PostInsert => listener.post_insert(event),
                Hook::PreUpdate => listener.pre_update(event),
                Hook::PostUpdate => listener.post_update(event),
                Hook::PreDelete => listener.pre_delete(event),
                Hook::PostDelete => listener.post_delete(event),
            }
        }
    }
}

impl fmt::Debug for ListenerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self
            .entries
            .iter()
            .map(|e| e.name.as_deref().unwrap_or("<anonymous>"))
            .collect();
        f.debug_struct("ListenerChain")
            .field("listeners", &names)
            .field("suppression", &self.suppression)
            .finish()
    }
}
