//! Typed listener registry.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// An event with a selector kind.
pub trait Event: Send + Sync + 'static {
    /// Selector type.
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    /// Selector for this event.
    fn kind(&self) -> Self::Kind;
}

/// Handle for removing a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Listeners<E: Event> {
    by_kind: HashMap<E::Kind, Vec<(ListenerId, Listener<E>)>>,
    any: Vec<(ListenerId, Listener<E>)>,
}

impl<E: Event> Default for Listeners<E> {
    fn default() -> Self {
        Self {
            by_kind: HashMap::new(),
            any: Vec::new(),
        }
    }
}

/// Kind → ordered listeners, plus listeners for every kind.
///
/// Kind listeners run before "any" listeners, each group in registration
/// order. Emitting works on a snapshot, so listeners may register or remove
/// listeners.
pub struct EventRegistry<E: Event> {
    listeners: RwLock<Listeners<E>>,
    next_id: AtomicU64,
}

impl<E: Event> EventRegistry<E> {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Listeners::default()),
            next_id: AtomicU64::new(1),
        }
    }

    fn next(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Listen for one kind.
    pub fn on(&self, kind: E::Kind, listener: impl Fn(&E) + Send + Sync + 'static) -> ListenerId {
        let id = self.next();
        self.listeners
            .write()
            .by_kind
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Listen for every kind.
    pub fn on_any(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> ListenerId {
        let id = self.next();
        self.listeners.write().any.push((id, Arc::new(listener)));
        id
    }

    /// Remove one listener. Returns whether it existed.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.any.len() + listeners.by_kind.values().map(Vec::len).sum::<usize>();
        listeners.any.retain(|(existing, _)| *existing != id);
        for entries in listeners.by_kind.values_mut() {
            entries.retain(|(existing, _)| *existing != id);
        }
        let after = listeners.any.len() + listeners.by_kind.values().map(Vec::len).sum::<usize>();
        before != after
    }

    /// Remove every listener of `kind`.
    pub fn off_kind(&self, kind: E::Kind) {
        let _ = self.listeners.write().by_kind.remove(&kind);
    }

    /// Remove everything.
    pub fn clear(&self) {
        *self.listeners.write() = Listeners::default();
    }

    /// Number of listeners.
    pub fn len(&self) -> usize {
        let listeners = self.listeners.read();
        listeners.any.len() + listeners.by_kind.values().map(Vec::len).sum::<usize>()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event`. Returns how many listeners ran.
    pub fn emit(&self, event: &E) -> usize {
        let snapshot: Vec<Listener<E>> = {
            let listeners = self.listeners.read();
            listeners
                .by_kind
                .get(&event.kind())
                .into_iter()
                .flatten()
                .chain(listeners.any.iter())
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        };
        for listener in &snapshot {
            listener(event);
        }
        snapshot.len()
    }
}

impl<E: Event> Default for EventRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}
