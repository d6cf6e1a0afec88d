//! External status feeds consulted by the condition evaluator
//!
//! Each feed is a named key/value store. Stores are built from the init
//! payload's `{name: {data: {...}}}` snapshot and afterwards change only
//! through polling results and cross-context notifications (see [`sync`]).
//! Stores never broadcast on their own; the caller that owns a feed does.

pub mod live;
pub mod sync;

use serde_json::{Map, Value};
use std::collections::HashMap;
use tracing::warn;

/// Store holding live-stream activity flags keyed by session id
pub const LIVE_SESSIONS_STORE: &str = "live-sessions";

/// Store holding arbitrary metadata values
pub const METADATA_STORE: &str = "metadata";

/// Capabilities every plugin store exposes
pub trait PluginStore {
    /// Value stored under `key`
    fn get(&self, key: &str) -> Option<&Value>;

    /// Replace the value under `key`
    fn set(&mut self, key: &str, value: Value);

    /// Every stored entry
    fn get_all(&self) -> &HashMap<String, Value>;
}

fn data_from_snapshot(name: &str, snapshot: &Value) -> HashMap<String, Value> {
    match snapshot.get("data") {
        Some(Value::Object(map)) => map.clone().into_iter().collect(),
        None | Some(Value::Null) => HashMap::new(),
        Some(other) => {
            warn!(store = name, data = %other, "Plugin data is not an object, starting empty");
            HashMap::new()
        }
    }
}

// ============================================================================
// Live Sessions
// ============================================================================

/// Live-stream activity per session id
#[derive(Debug, Clone, Default)]
pub struct LiveSessionStore {
    data: HashMap<String, Value>,
}

impl LiveSessionStore {
    pub fn new(data: HashMap<String, Value>) -> Self {
        Self { data }
    }

    /// Build from a `{data: {...}}` snapshot entry
    pub fn from_snapshot(snapshot: &Value) -> Self {
        Self::new(data_from_snapshot(LIVE_SESSIONS_STORE, snapshot))
    }

    /// A session is active only when its flag is literally `true`
    pub fn is_active(&self, session: &str) -> bool {
        matches!(self.data.get(session), Some(Value::Bool(true)))
    }
}

impl PluginStore for LiveSessionStore {
    fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    fn set(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_string(), value);
    }

    fn get_all(&self) -> &HashMap<String, Value> {
        &self.data
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// Arbitrary metadata values
#[derive(Debug, Clone, Default)]
pub struct MetadataStore {
    data: HashMap<String, Value>,
}

impl MetadataStore {
    pub fn new(data: HashMap<String, Value>) -> Self {
        Self { data }
    }
}

impl PluginStore for MetadataStore {
    fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    fn set(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_string(), value);
    }

    fn get_all(&self) -> &HashMap<String, Value> {
        &self.data
    }
}

// ============================================================================
// Plugin Variants
// ============================================================================

/// A store selected by its declared name
#[derive(Debug, Clone)]
pub enum Plugin {
    LiveSessions(LiveSessionStore),
    Metadata(MetadataStore),
}

impl Plugin {
    /// Build the variant matching `name`, or `None` for unknown names
    pub fn from_snapshot(name: &str, snapshot: &Value) -> Option<Self> {
        let data = data_from_snapshot(name, snapshot);
        match name {
            LIVE_SESSIONS_STORE => Some(Self::LiveSessions(LiveSessionStore::new(data))),
            METADATA_STORE => Some(Self::Metadata(MetadataStore::new(data))),
            _ => None,
        }
    }

    /// Whether sibling contexts keep this store in sync
    pub fn is_synchronized(&self) -> bool {
        match self {
            Self::LiveSessions(_) | Self::Metadata(_) => true,
        }
    }

    fn store(&self) -> &dyn PluginStore {
        match self {
            Self::LiveSessions(s) => s,
            Self::Metadata(s) => s,
        }
    }

    fn store_mut(&mut self) -> &mut dyn PluginStore {
        match self {
            Self::LiveSessions(s) => s,
            Self::Metadata(s) => s,
        }
    }
}

impl PluginStore for Plugin {
    fn get(&self, key: &str) -> Option<&Value> {
        self.store().get(key)
    }

    fn set(&mut self, key: &str, value: Value) {
        self.store_mut().set(key, value);
    }

    fn get_all(&self) -> &HashMap<String, Value> {
        self.store().get_all()
    }
}

// ============================================================================
// Plugin Set
// ============================================================================

/// All stores of one engine instance, looked up by name
#[derive(Debug, Clone, Default)]
pub struct PluginSet {
    stores: HashMap<String, Plugin>,
}

impl PluginSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a serialized `{name: {data: {...}}}` snapshot
    ///
    /// Non-object payloads yield an empty set; unknown store names are
    /// skipped. Both cases are logged.
    pub fn from_snapshot(snapshot: &Value) -> Self {
        let mut set = Self::new();
        let entries: &Map<String, Value> = match snapshot {
            Value::Object(map) => map,
            Value::Null => return set,
            other => {
                warn!(payload = %other, "Plugin snapshot is not an object, ignoring");
                return set;
            }
        };

        for (name, store_snapshot) in entries {
            match Plugin::from_snapshot(name, store_snapshot) {
                Some(plugin) => {
                    set.stores.insert(name.clone(), plugin);
                }
                None => warn!(store = %name, "Unknown plugin store, skipping"),
            }
        }
        set
    }

    /// Add or replace a store
    pub fn insert(&mut self, name: impl Into<String>, plugin: Plugin) {
        self.stores.insert(name.into(), plugin);
    }

    /// Look up a store
    pub fn get(&self, name: &str) -> Option<&Plugin> {
        self.stores.get(name)
    }

    /// Look up a store mutably
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Plugin> {
        self.stores.get_mut(name)
    }

    /// Names of stores kept in sync across contexts
    pub fn synchronized_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .stores
            .iter()
            .filter(|(_, p)| p.is_synchronized())
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    /// Whether the live-sessions store reports `session` as active
    pub fn is_session_active(&self, session: &str) -> bool {
        match self.stores.get(LIVE_SESSIONS_STORE) {
            Some(Plugin::LiveSessions(store)) => store.is_active(session),
            _ => false,
        }
    }

    /// Value of `key` in the metadata store
    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.stores.get(METADATA_STORE).and_then(|p| p.get(key))
    }

    /// Number of stores
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}
