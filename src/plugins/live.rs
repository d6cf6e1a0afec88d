//! Live status polling
//!
//! The host owns the live-sessions feed. It polls a status endpoint returning
//! `{sessionId: bool}`, keeps its own copy in a [`LiveSessionStore`], and
//! tells the engine contexts of its tab group about every change over the bus.

use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::sync::{publish_update, StoreUpdate};
use super::{LiveSessionStore, PluginStore, LIVE_SESSIONS_STORE};
use crate::bus::NotificationBus;
use crate::config::LiveConfig;
use crate::utils::error::FeedError;
use crate::utils::truncate_text;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Periodic poller for live session status
pub struct LiveStatusPoller {
    client: Client,
    url: String,
    tab_id: String,
    poll_interval: Duration,
    store: LiveSessionStore,
    bus: Option<Arc<dyn NotificationBus>>,
}

impl LiveStatusPoller {
    /// Create a poller for `url`
    pub fn new(
        url: impl Into<String>,
        tab_id: impl Into<String>,
        poll_interval: Duration,
        bus: Option<Arc<dyn NotificationBus>>,
    ) -> Result<Self, FeedError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            url: url.into(),
            tab_id: tab_id.into(),
            poll_interval,
            store: LiveSessionStore::default(),
            bus,
        })
    }

    /// Create a poller from configuration; `None` when no status URL is set
    pub fn from_config(
        config: &LiveConfig,
        tab_id: &str,
        bus: Option<Arc<dyn NotificationBus>>,
    ) -> Result<Option<Self>, FeedError> {
        match &config.status_url {
            Some(url) => Self::new(
                url.clone(),
                tab_id,
                Duration::from_millis(config.poll_interval_ms),
                bus,
            )
            .map(Some),
            None => Ok(None),
        }
    }

    /// Seed the local copy, e.g. with the snapshot handed to the engine
    pub fn with_store(mut self, store: LiveSessionStore) -> Self {
        self.store = store;
        self
    }

    /// Local copy of the feed
    pub fn store(&self) -> &LiveSessionStore {
        &self.store
    }

    /// Fetch once and apply changes
    ///
    /// Returns the session ids whose status changed, in sorted order. Each
    /// change is published to sibling contexts.
    pub async fn poll_once(&mut self) -> Result<Vec<String>, FeedError> {
        let response = self.client.get(&self.url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::ServerError(status.as_u16()));
        }

        let body = response.text().await?;
        let statuses = parse_status_body(&body)?;

        let mut changed = Vec::new();
        for (session, active) in statuses {
            let value = Value::Bool(active);
            if self.store.get(&session) == Some(&value) {
                continue;
            }
            self.store.set(&session, value.clone());

            if let Some(bus) = &self.bus {
                let update = StoreUpdate::new(self.tab_id.clone(), session.clone(), value);
                publish_update(bus.as_ref(), LIVE_SESSIONS_STORE, &update);
            }
            changed.push(session);
        }

        if !changed.is_empty() {
            info!(sessions = ?changed, "Live session status changed");
        }
        Ok(changed)
    }

    /// Poll until `shutdown` flips or its sender is dropped
    pub fn spawn(mut self, mut shutdown: watch::Receiver<bool>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.poll_interval.max(MIN_POLL_INTERVAL));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.poll_once().await {
                            warn!(url = %self.url, error = %e, "Live status poll failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("Live status poller shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }
}

/// Parse a `{sessionId: bool}` body, sorted by session id
///
/// Entries whose value is not a boolean are skipped.
pub fn parse_status_body(body: &str) -> Result<Vec<(String, bool)>, FeedError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|_| FeedError::Malformed(truncate_text(body, 80)))?;

    let Value::Object(map) = value else {
        return Err(FeedError::Malformed(truncate_text(body, 80)));
    };

    let mut statuses: Vec<(String, bool)> = map
        .into_iter()
        .filter_map(|(session, flag)| match flag {
            Value::Bool(active) => Some((session, active)),
            other => {
                debug!(session = %session, value = %other, "Skipping non-boolean live status");
                None
            }
        })
        .collect();
    statuses.sort();
    Ok(statuses)
}
