//! Element Listener Map
//!
//! Map of DOM events with server-side listeners. The visible key set lists
//! the event types that have listeners; the value of each key is the
//! constant pool key of the compiled client-side settings for that type.
//!
//! Compiled settings are a JSON object keyed by expression. Event data
//! expressions map to `false`, filters map to their debounce settings:
//! `true` for a single zero timeout, otherwise `[[timeout, phase, ...], ...]`.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::{Rc, Weak};

use indexmap::{IndexMap, IndexSet};
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use crate::{ConstantPool, DebouncePhase, DomEvent, FeatureKind, NodeId, NodeMap, TreeError};

/// Default filter expression that always passes on the client
pub const ALWAYS_TRUE_FILTER: &str = "1";

/// Whether a listener is notified while its element is disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisabledUpdateMode {
    /// Only notified while the element is enabled
    #[default]
    OnlyWhenEnabled,
    /// Notified regardless of the element's enabled state
    Always,
}

type Callback = Rc<dyn Fn(&DomEvent)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RegistrationId(u64);

struct Registration {
    id: RegistrationId,
    callback: Callback,
    mode: DisabledUpdateMode,
    event_data: IndexSet<String>,
    filter: Option<String>,
    debounce_timeout: u32,
    /// `None` matches the leading phase only
    debounce_phases: Option<BTreeSet<DebouncePhase>>,
    on_unregister: Vec<Box<dyn FnOnce()>>,
}

impl Registration {
    fn new(id: RegistrationId, callback: Callback) -> Self {
        Self {
            id,
            callback,
            mode: DisabledUpdateMode::default(),
            event_data: IndexSet::new(),
            filter: None,
            debounce_timeout: 0,
            debounce_phases: None,
            on_unregister: Vec::new(),
        }
    }

    fn matches_filter(&self, data: Option<&Map<String, Value>>) -> bool {
        let Some(filter) = &self.filter else {
            return true;
        };
        let Some(data) = data else {
            return false;
        };
        data.get(filter).and_then(Value::as_bool).unwrap_or(false)
    }

    fn matches_phase(&self, phase: DebouncePhase) -> bool {
        match &self.debounce_phases {
            None => phase == DebouncePhase::Leading,
            Some(phases) => phases.contains(&phase),
        }
    }

    fn accepts(&self, event: &DomEvent) -> bool {
        (event.is_source_enabled() || self.mode == DisabledUpdateMode::Always)
            && self.matches_filter(event.data())
            && self.matches_phase(event.phase())
    }
}

/// Debounce settings collected for one expression
#[derive(Debug, Default)]
struct ExpressionSettings {
    debounce: BTreeMap<u32, BTreeSet<DebouncePhase>>,
}

impl ExpressionSettings {
    fn add_debounce_phases(&mut self, timeout: u32, phases: Option<&BTreeSet<DebouncePhase>>) {
        self.debounce
            .entry(timeout)
            .or_default()
            .extend(phases.into_iter().flatten().copied());
    }

    fn to_json(&self) -> Value {
        if self.debounce.is_empty() {
            Value::Bool(false)
        } else if self.debounce.len() == 1 && self.debounce.contains_key(&0) {
            // Only the zero-timeout entry of a plain filter
            Value::Bool(true)
        } else {
            self.debounce
                .iter()
                .map(|(timeout, phases)| {
                    std::iter::once(Value::from(*timeout))
                        .chain(phases.iter().map(|p| Value::from(p.identifier())))
                        .collect::<Value>()
                })
                .collect()
        }
    }
}

type Buckets = IndexMap<String, Vec<Registration>>;

pub(crate) struct ListenerMapInner {
    map: NodeMap,
    pool: ConstantPool,
    always_true_filter: String,
    /// Released when the last registration goes away
    listeners: RefCell<Option<Buckets>>,
    next_id: Cell<u64>,
}

impl ListenerMapInner {
    fn modify(
        &self,
        event_type: &str,
        id: RegistrationId,
        f: impl FnOnce(&mut Registration),
    ) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let registration = listeners
            .as_mut()
            .and_then(|buckets| buckets.get_mut(event_type))
            .and_then(|bucket| bucket.iter_mut().find(|r| r.id == id));

        match registration {
            Some(registration) => {
                f(registration);
                true
            }
            None => false,
        }
    }

    fn read<R>(
        &self,
        event_type: &str,
        id: RegistrationId,
        f: impl FnOnce(&Registration) -> R,
    ) -> Option<R> {
        let listeners = self.listeners.borrow();
        listeners
            .as_ref()
            .and_then(|buckets| buckets.get(event_type))
            .and_then(|bucket| bucket.iter().find(|r| r.id == id))
            .map(f)
    }

    fn collect_event_expressions(&self, event_type: &str) -> BTreeMap<String, ExpressionSettings> {
        let mut expressions: BTreeMap<String, ExpressionSettings> = BTreeMap::new();
        let mut has_unfiltered = false;
        let mut has_filtered = false;

        let listeners = self.listeners.borrow();
        let bucket = listeners
            .as_ref()
            .and_then(|buckets| buckets.get(event_type))
            .map(Vec::as_slice)
            .unwrap_or_default();

        for registration in bucket {
            for expression in &registration.event_data {
                expressions.entry(expression.clone()).or_default();
            }

            let timeout = registration.debounce_timeout;
            let filter = match &registration.filter {
                Some(filter) => Some(filter.as_str()),
                None if timeout > 0 => Some(self.always_true_filter.as_str()),
                None => None,
            };

            match filter {
                None => has_unfiltered = true,
                Some(filter) => {
                    has_filtered = true;
                    expressions
                        .entry(filter.to_string())
                        .or_default()
                        .add_debounce_phases(timeout, registration.debounce_phases.as_ref());
                }
            }
        }

        if has_filtered && has_unfiltered {
            // The client sends nothing when no filter passes; an always-true
            // filter keeps unfiltered listeners reachable.
            let leading = BTreeSet::from([DebouncePhase::Leading]);
            expressions
                .entry(self.always_true_filter.clone())
                .or_default()
                .add_debounce_phases(0, Some(&leading));
        }

        expressions
    }

    fn update_event_settings(&self, event_type: &str) {
        let expressions = self.collect_event_expressions(event_type);
        let settings: Map<String, Value> = expressions
            .iter()
            .map(|(expression, settings)| (expression.clone(), settings.to_json()))
            .collect();

        // Registered with the pool only once the key is sent to the client
        let key = self.pool.key_for(Value::Object(settings));
        debug!(
            node = %self.map.node(),
            event_type,
            constant = key.id(),
            expressions = expressions.len(),
            "updated event settings"
        );
        self.map.put(event_type, key);
    }

    fn remove_registration(&self, event_type: &str, id: RegistrationId) {
        let (removed, type_emptied) = {
            let mut listeners = self.listeners.borrow_mut();
            let Some(buckets) = listeners.as_mut() else {
                return;
            };
            let Some(bucket) = buckets.get_mut(event_type) else {
                return;
            };
            let Some(index) = bucket.iter().position(|r| r.id == id) else {
                return;
            };

            let removed = bucket.remove(index);
            let type_emptied = bucket.is_empty();
            if type_emptied {
                buckets.shift_remove(event_type);
                if buckets.is_empty() {
                    *listeners = None;
                }
            }
            (removed, type_emptied)
        };

        if type_emptied {
            // Drop the type from the key set synchronized with the client
            self.map.remove(event_type);
        } else {
            self.update_event_settings(event_type);
        }
        debug!(node = %self.map.node(), event_type, type_emptied, "removed listener");

        for callback in removed.on_unregister {
            callback();
        }
    }
}

/// DOM event listeners of one state node
///
/// Cloning yields another handle to the same map.
#[derive(Clone)]
pub struct ElementListenerMap {
    inner: Rc<ListenerMapInner>,
}

impl ElementListenerMap {
    pub fn new(node: NodeId, pool: ConstantPool) -> Self {
        Self::with_always_true_filter(node, pool, ALWAYS_TRUE_FILTER)
    }

    /// Create a map using a custom always-true filter expression
    pub fn with_always_true_filter(node: NodeId, pool: ConstantPool, filter: &str) -> Self {
        Self {
            inner: Rc::new(ListenerMapInner {
                map: NodeMap::new(node, FeatureKind::ElementListeners),
                pool,
                always_true_filter: filter.to_string(),
                listeners: RefCell::new(None),
                next_id: Cell::new(0),
            }),
        }
    }

    /// Underlying property map synchronized with the client
    pub fn node_map(&self) -> &NodeMap {
        &self.inner.map
    }

    /// Add a listener for an event type
    pub fn add(
        &self,
        event_type: &str,
        listener: impl Fn(&DomEvent) + 'static,
    ) -> Result<DomListenerRegistration, TreeError> {
        if event_type.is_empty() {
            return Err(TreeError::InvalidArgument("event type must not be empty".into()));
        }

        let id = RegistrationId(self.inner.next_id.get());
        self.inner.next_id.set(id.0 + 1);

        self.inner
            .listeners
            .borrow_mut()
            .get_or_insert_with(IndexMap::new)
            .entry(event_type.to_string())
            .or_default()
            .push(Registration::new(id, Rc::new(listener)));

        debug!(node = %self.inner.map.node(), event_type, "added listener");
        self.inner.update_event_settings(event_type);

        Ok(DomListenerRegistration {
            map: Rc::downgrade(&self.inner),
            event_type: event_type.to_string(),
            id,
        })
    }

    /// Replay an event to the listeners registered for its type
    ///
    /// Matching listeners are collected before any is invoked, so a listener
    /// may add or remove registrations without affecting this replay.
    pub fn fire_event(&self, event: &DomEvent) {
        let (matching, suppressed): (Vec<Callback>, usize) = {
            let listeners = self.inner.listeners.borrow();
            let Some(bucket) = listeners
                .as_ref()
                .and_then(|buckets| buckets.get(event.event_type()))
            else {
                return;
            };
            let suppressed = if event.is_source_enabled() {
                0
            } else {
                bucket
                    .iter()
                    .filter(|r| r.mode == DisabledUpdateMode::OnlyWhenEnabled)
                    .count()
            };
            let matching = bucket
                .iter()
                .filter(|r| r.accepts(event))
                .map(|r| Rc::clone(&r.callback))
                .collect();
            (matching, suppressed)
        };

        if suppressed > 0 {
            warn!(
                node = %event.source(),
                event_type = event.event_type(),
                suppressed,
                "ignored event for listeners of a disabled element"
            );
        }

        trace!(
            node = %event.source(),
            event_type = event.event_type(),
            phase = event.phase().identifier(),
            enabled = event.is_source_enabled(),
            matched = matching.len(),
            "replaying event"
        );

        for callback in matching {
            callback(event);
        }
    }

    /// Event types with at least one listener
    pub fn event_types(&self) -> Vec<String> {
        self.inner.map.keys()
    }

    /// Number of listeners for an event type
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.inner
            .listeners
            .borrow()
            .as_ref()
            .and_then(|buckets| buckets.get(event_type))
            .map_or(0, Vec::len)
    }

    /// Whether any listener storage is allocated
    pub fn has_listeners(&self) -> bool {
        self.inner.listeners.borrow().is_some()
    }

    /// Expressions the client evaluates for an event type
    pub fn expressions(&self, event_type: &str) -> BTreeSet<String> {
        self.inner
            .collect_event_expressions(event_type)
            .into_keys()
            .collect()
    }

    /// Compiled settings currently published for an event type
    pub fn event_settings(&self, event_type: &str) -> Option<Value> {
        self.inner
            .map
            .get(event_type)
            .and_then(|value| value.as_constant().map(|key| key.json().clone()))
    }
}

impl fmt::Debug for ElementListenerMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.inner.listeners.borrow();
        let counts: Vec<(&str, usize)> = listeners
            .iter()
            .flat_map(|buckets| buckets.iter().map(|(k, v)| (k.as_str(), v.len())))
            .collect();
        f.debug_struct("ElementListenerMap")
            .field("node", &self.inner.map.node())
            .field("listeners", &counts)
            .finish()
    }
}

/// Handle for configuring and removing one listener
///
/// The handle only refers to its registration; every operation goes through
/// the owning map. Operations after [`remove`](Self::remove) fail with
/// [`TreeError::StaleRegistration`].
pub struct DomListenerRegistration {
    map: Weak<ListenerMapInner>,
    event_type: String,
    id: RegistrationId,
}

impl DomListenerRegistration {
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    fn stale(&self) -> TreeError {
        TreeError::StaleRegistration {
            event_type: self.event_type.clone(),
        }
    }

    fn update(
        &self,
        recompile: bool,
        f: impl FnOnce(&mut Registration),
    ) -> Result<&Self, TreeError> {
        let map = self.map.upgrade().ok_or_else(|| self.stale())?;
        if !map.modify(&self.event_type, self.id, f) {
            return Err(self.stale());
        }
        if recompile {
            map.update_event_settings(&self.event_type);
        }
        Ok(self)
    }

    fn read<R>(&self, f: impl FnOnce(&Registration) -> R) -> Result<R, TreeError> {
        self.map
            .upgrade()
            .and_then(|map| map.read(&self.event_type, self.id, f))
            .ok_or_else(|| self.stale())
    }

    /// Whether the registration is still active
    pub fn is_active(&self) -> bool {
        self.read(|_| ()).is_ok()
    }

    /// Add an expression whose value the client sends with the event
    pub fn add_event_data(&self, expression: &str) -> Result<&Self, TreeError> {
        let expression = expression.to_string();
        self.update(true, move |r| {
            r.event_data.insert(expression);
        })
    }

    /// Event data expressions added so far
    pub fn event_data(&self) -> Result<Vec<String>, TreeError> {
        self.read(|r| r.event_data.iter().cloned().collect())
    }

    /// Set a boolean filter expression; `None` always passes
    pub fn set_filter(&self, filter: Option<&str>) -> Result<&Self, TreeError> {
        let filter = filter.map(str::to_string);
        self.update(true, move |r| r.filter = filter)
    }

    pub fn filter(&self) -> Result<Option<String>, TreeError> {
        self.read(|r| r.filter.clone())
    }

    /// Control whether the listener is notified while the element is disabled
    pub fn set_disabled_update_mode(&self, mode: DisabledUpdateMode) -> Result<&Self, TreeError> {
        self.update(false, move |r| r.mode = mode)
    }

    pub fn disabled_update_mode(&self) -> Result<DisabledUpdateMode, TreeError> {
        self.read(|r| r.mode)
    }

    /// Debounce the listener
    ///
    /// A zero timeout removes the phase restriction so only leading events
    /// match; a positive timeout matches exactly the given phases.
    pub fn debounce(
        &self,
        timeout_ms: i32,
        first: DebouncePhase,
        additional: &[DebouncePhase],
    ) -> Result<&Self, TreeError> {
        let timeout = u32::try_from(timeout_ms).map_err(|_| {
            TreeError::InvalidArgument(format!("timeout cannot be negative: {timeout_ms}"))
        })?;

        let phases = (timeout > 0).then(|| {
            std::iter::once(first)
                .chain(additional.iter().copied())
                .collect::<BTreeSet<_>>()
        });
        self.update(true, move |r| {
            r.debounce_timeout = timeout;
            r.debounce_phases = phases;
        })
    }

    /// Notify at most once per period while events keep arriving
    pub fn throttle(&self, period_ms: i32) -> Result<&Self, TreeError> {
        self.debounce(period_ms, DebouncePhase::Leading, &[DebouncePhase::Intermediate])
    }

    pub fn debounce_timeout(&self) -> Result<u32, TreeError> {
        self.read(|r| r.debounce_timeout)
    }

    /// Run `callback` once the registration is removed
    pub fn on_unregister(&self, callback: impl FnOnce() + 'static) -> Result<&Self, TreeError> {
        self.update(false, move |r| r.on_unregister.push(Box::new(callback)))
    }

    /// Remove the listener; later calls do nothing
    pub fn remove(&self) {
        if let Some(map) = self.map.upgrade() {
            map.remove_registration(&self.event_type, self.id);
        }
    }
}

impl fmt::Debug for DomListenerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomListenerRegistration")
            .field("event_type", &self.event_type)
            .field("id", &self.id.0)
            .finish()
    }
}
