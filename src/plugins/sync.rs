//! Cross-context plugin store synchronization
//!
//! Updates travel on `plugin:<store>` topics as `{tabId, key, value}` and are
//! applied only inside the tab group that produced them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::{PluginSet, PluginStore};
use crate::bus::{plugin_topic, NotificationBus};
use crate::scheduler::SchedulerError;

const TOPIC_PREFIX: &str = "plugin:";

/// One key change of a plugin store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreUpdate {
    pub tab_id: String,
    pub key: String,
    pub value: Value,
}

impl StoreUpdate {
    pub fn new(tab_id: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        Self {
            tab_id: tab_id.into(),
            key: key.into(),
            value,
        }
    }

    /// Decode a bus payload
    pub fn from_payload(payload: &Value) -> Result<Self, SchedulerError> {
        serde_json::from_value(payload.clone())
            .map_err(|e| SchedulerError::malformed("plugin update", e.to_string()))
    }
}

/// Store name carried by a `plugin:<store>` topic
pub fn store_from_topic(topic: &str) -> Option<&str> {
    topic.strip_prefix(TOPIC_PREFIX).filter(|s| !s.is_empty())
}

/// Publish a store change to sibling contexts
pub fn publish_update(bus: &dyn NotificationBus, store: &str, update: &StoreUpdate) {
    match serde_json::to_value(update) {
        Ok(payload) => bus.publish(&plugin_topic(store), payload),
        Err(e) => warn!(store = store, error = %e, "Failed to encode plugin update"),
    }
}

/// Apply an inbound update to the matching store
///
/// Returns whether the update was applied. Updates from another tab group,
/// for unknown stores, or with malformed payloads are dropped.
pub fn apply_update(stores: &mut PluginSet, topic: &str, payload: &Value, tab_id: &str) -> bool {
    let Some(store_name) = store_from_topic(topic) else {
        return false;
    };

    let update = match StoreUpdate::from_payload(payload) {
        Ok(update) => update,
        Err(e) => {
            warn!(topic = topic, error = %e, "Dropping malformed plugin update");
            return false;
        }
    };

    if update.tab_id != tab_id {
        debug!(topic = topic, from = %update.tab_id, "Ignoring update for another tab group");
        return false;
    }

    match stores.get_mut(store_name) {
        Some(store) => {
            debug!(store = store_name, key = %update.key, "Applying synchronized update");
            store.set(&update.key, update.value);
            true
        }
        None => {
            debug!(store = store_name, "No local store for update");
            false
        }
    }
}
