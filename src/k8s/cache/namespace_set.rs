/**
 * Namespace set with change notification
 *
 * Holds the namespaces a registry currently tracks and fans out add/remove
 * notifications to every registered handler whenever the set is reconfigured.
 */
use super::sets::{difference, sorted, to_set};
use parking_lot::{Mutex, ReentrantMutex};
use std::cell::Cell;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Reserved namespace value meaning "every namespace"
pub const NAMESPACE_ALL: &str = "";

/// Receives namespace add/remove notifications from a [`NamespaceSet`]
pub trait NamespaceSetHandler: Send + Sync {
    fn on_add(&self, namespace: &str);
    fn on_remove(&self, namespace: &str);
}

type Callback = Box<dyn Fn(&str) + Send + Sync>;

/// Closure-backed handler; either callback may be left out
#[derive(Default)]
pub struct NamespaceSetHandlerFuncs {
    add: Option<Callback>,
    remove: Option<Callback>,
}

impl NamespaceSetHandlerFuncs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_add(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.add = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_remove(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.remove = Some(Box::new(f));
        self
    }
}

impl NamespaceSetHandler for NamespaceSetHandlerFuncs {
    fn on_add(&self, namespace: &str) {
        if let Some(add) = &self.add {
            add(namespace);
        }
    }

    fn on_remove(&self, namespace: &str) {
        if let Some(remove) = &self.remove {
            remove(namespace);
        }
    }
}

/// Identifies a registered handler so it can be removed later
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HandlerId(String);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

struct Registration {
    id: HandlerId,
    handler: Arc<dyn NamespaceSetHandler>,
}

#[derive(Default)]
struct SetState {
    members: BTreeSet<String>,
    initialized: bool,
    handlers: Vec<Registration>,
}

/// Result of applying one reconfiguration, delivered outside the state lock
struct Diff {
    removed: Vec<String>,
    added: Vec<String>,
    handlers: Vec<Arc<dyn NamespaceSetHandler>>,
}

impl Diff {
    fn deliver(&self) {
        for namespace in &self.removed {
            for handler in &self.handlers {
                handler.on_remove(namespace);
            }
        }
        for namespace in &self.added {
            for handler in &self.handlers {
                handler.on_add(namespace);
            }
        }
    }
}

struct DeliveryReset<'a>(&'a Cell<bool>);

impl Drop for DeliveryReset<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// The set of namespaces of interest.
///
/// Invariants:
/// - when [`NAMESPACE_ALL`] is a member it is the only member
/// - `list()` is always sorted and duplicate-free
/// - an uninitialized set is empty
///
/// Reconfigurations are applied strictly one at a time and every handler sees
/// the resulting diffs in order. A handler may reconfigure the set from inside
/// a callback; that request is queued and applied once the current diff has
/// been delivered to every handler.
pub struct NamespaceSet {
    state: Mutex<SetState>,
    pending: Mutex<VecDeque<Option<BTreeSet<String>>>>,
    delivering: ReentrantMutex<Cell<bool>>,
}

impl Default for NamespaceSet {
    fn default() -> Self {
        Self::uninitialized()
    }
}

impl fmt::Debug for NamespaceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("NamespaceSet")
            .field("members", &state.members)
            .field("initialized", &state.initialized)
            .field("handlers", &state.handlers.len())
            .finish()
    }
}

impl NamespaceSet {
    /// A set holding `namespaces`. Initialized unless `namespaces` is empty.
    pub fn new<I, S>(namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let members = to_set(namespaces);
        let initialized = !members.is_empty();
        Self {
            state: Mutex::new(SetState {
                members: collapse(members),
                initialized,
                handlers: Vec::new(),
            }),
            pending: Mutex::new(VecDeque::new()),
            delivering: ReentrantMutex::new(Cell::new(false)),
        }
    }

    #[must_use]
    pub fn uninitialized() -> Self {
        Self {
            state: Mutex::new(SetState::default()),
            pending: Mutex::new(VecDeque::new()),
            delivering: ReentrantMutex::new(Cell::new(false)),
        }
    }

    /// Replace the membership with `namespaces` and mark the set initialized,
    /// even when `namespaces` is empty. Handlers receive a remove for every
    /// namespace that left and then an add for every namespace that joined.
    pub fn set_namespaces<I, S>(&self, namespaces: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.update(Some(to_set(namespaces)));
    }

    /// Return to the uninitialized state, removing every current member.
    pub fn reset(&self) {
        self.update(None);
    }

    /// Subscribe to future changes only; current members are not replayed.
    pub fn add_handler(&self, handler: Arc<dyn NamespaceSetHandler>) -> HandlerId {
        let id = HandlerId(Uuid::new_v4().to_string());
        self.state.lock().handlers.push(Registration {
            id: id.clone(),
            handler,
        });
        id
    }

    /// Subscribe and replay every current member as an add. No reconfiguration
    /// is applied between the snapshot and the registration, so the handler
    /// observes each change exactly once: either folded into the replay or as
    /// a later diff. The handler may reconfigure the set during the replay;
    /// such requests are queued like any other re-entrant call.
    pub fn add_handler_with_replay(&self, handler: Arc<dyn NamespaceSetHandler>) -> HandlerId {
        let id = HandlerId(Uuid::new_v4().to_string());

        let delivering = self.delivering.lock();
        let reset = (!delivering.get()).then(|| {
            delivering.set(true);
            DeliveryReset(&*delivering)
        });

        let members = {
            let mut state = self.state.lock();
            state.handlers.push(Registration {
                id: id.clone(),
                handler: handler.clone(),
            });
            sorted(&state.members)
        };
        for namespace in &members {
            handler.on_add(namespace);
        }

        // Only the outermost caller drains; a nested one leaves it to the
        // delivery loop already running on this thread.
        if reset.is_some() {
            self.drain();
        }
        id
    }

    /// Unsubscribe a handler. Returns false when the id is unknown.
    pub fn remove_handler(&self, id: &HandlerId) -> bool {
        let mut state = self.state.lock();
        let before = state.handlers.len();
        state.handlers.retain(|r| &r.id != id);
        state.handlers.len() != before
    }

    /// Sorted snapshot of the current members
    #[must_use]
    pub fn list(&self) -> Vec<String> {
        sorted(&self.state.lock().members)
    }

    #[must_use]
    pub fn contains(&self, namespace: &str) -> bool {
        self.state.lock().members.contains(namespace)
    }

    #[must_use]
    pub fn initialized(&self) -> bool {
        self.state.lock().initialized
    }

    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.state.lock().handlers.len()
    }

    fn update(&self, next: Option<BTreeSet<String>>) {
        self.pending.lock().push_back(next);

        let delivering = self.delivering.lock();
        if delivering.get() {
            // Re-entrant call from a handler; the outer loop applies it.
            debug!("📥 Namespace update queued behind in-flight delivery");
            return;
        }
        delivering.set(true);
        let _reset = DeliveryReset(&*delivering);
        self.drain();
    }

    fn drain(&self) {
        loop {
            let next = self.pending.lock().pop_front();
            let Some(next) = next else { break };
            self.apply(next).deliver();
        }
    }

    fn apply(&self, next: Option<BTreeSet<String>>) -> Diff {
        let mut state = self.state.lock();

        let members = match next {
            Some(members) => {
                state.initialized = true;
                collapse(members)
            }
            None => {
                state.initialized = false;
                BTreeSet::new()
            }
        };

        let removed = difference(&state.members, &members);
        let added = difference(&members, &state.members);
        state.members = members;

        if removed.is_empty() && added.is_empty() {
            return Diff {
                removed,
                added,
                handlers: Vec::new(),
            };
        }

        info!(
            "🔀 Namespace set changed: +{:?} -{:?} ({} handlers)",
            added,
            removed,
            state.handlers.len()
        );

        let handlers = state.handlers.iter().map(|r| r.handler.clone()).collect();
        Diff {
            removed,
            added,
            handlers,
        }
    }
}

fn collapse(members: BTreeSet<String>) -> BTreeSet<String> {
    if members.contains(NAMESPACE_ALL) {
        to_set([NAMESPACE_ALL])
    } else {
        members
    }
}
