use std::collections::BTreeMap;

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::classifier::StatePatch;
use crate::lifecycle::ConnectionState;
use crate::status::{StatusKey, StatusValue};

/// Default capacity of the status broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Observed/target pair for one status attribute.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusEntry {
    pub observed: Option<StatusValue>,
    pub target: Option<StatusValue>,
    /// Observed value matched the target after the last change of target.
    pub stable: bool,
    /// Observed value was reported while connected.
    pub authoritative: bool,
    /// Reconciliation gave up on the current target.
    pub drift_unresolved: bool,
    /// Bumped on every target write; a new revision starts a new drift episode.
    #[serde(skip)]
    pub target_revision: u64,
}

/// One row of [`StateStore::snapshot`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusRecord {
    pub key: StatusKey,
    #[serde(flatten)]
    pub entry: StatusEntry,
}

/// Published on every status change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StatusChange {
    Observed {
        key: StatusKey,
        value: StatusValue,
        authoritative: bool,
    },
    Target {
        key: StatusKey,
        value: StatusValue,
    },
    Stable {
        key: StatusKey,
        stable: bool,
    },
    DriftUnresolved {
        key: StatusKey,
        target: StatusValue,
        observed: Option<StatusValue>,
        reissues: u32,
    },
    Connection {
        state: ConnectionState,
    },
}

/// Status attributes of one connection.
pub struct StateStore {
    entries: BTreeMap<StatusKey, StatusEntry>,
    authoritative: bool,
    events: broadcast::Sender<StatusChange>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl StateStore {
    pub fn new(event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity.max(1));
        Self::with_sender(events)
    }

    /// Publish on an existing channel, so subscribers can attach before the
    /// store moves into its session task.
    pub fn with_sender(events: broadcast::Sender<StatusChange>) -> Self {
        Self {
            entries: BTreeMap::new(),
            authoritative: false,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.events.subscribe()
    }

    /// Last observed value.
    pub fn get(&self, key: &StatusKey) -> Option<&StatusValue> {
        self.entries.get(key).and_then(|e| e.observed.as_ref())
    }

    pub fn entry(&self, key: &StatusKey) -> Option<&StatusEntry> {
        self.entries.get(key)
    }

    pub fn target(&self, key: &StatusKey) -> Option<&StatusValue> {
        self.entries.get(key).and_then(|e| e.target.as_ref())
    }

    pub fn is_stable(&self, key: &StatusKey) -> bool {
        self.entries.get(key).is_some_and(|e| e.stable)
    }

    pub fn is_authoritative(&self) -> bool {
        self.authoritative
    }

    /// Record a device-reported value. Returns whether it changed.
    pub fn set_observed(&mut self, key: StatusKey, value: StatusValue) -> bool {
        let authoritative = self.authoritative;
        let entry = self.entries.entry(key).or_default();
        if entry.observed.as_ref() == Some(&value) && entry.authoritative == authoritative {
            return false;
        }
        debug!(%key, %value, authoritative, "status observed");
        entry.observed = Some(value.clone());
        entry.authoritative = authoritative;
        self.publish(StatusChange::Observed {
            key,
            value,
            authoritative,
        });
        true
    }

    /// Request a value. Always starts a new drift episode, even when the
    /// target is unchanged.
    pub fn set_target(&mut self, key: StatusKey, value: StatusValue) {
        let entry = self.entries.entry(key).or_default();
        debug!(%key, %value, "status target set");
        entry.target = Some(value.clone());
        entry.target_revision += 1;
        entry.drift_unresolved = false;
        let was_stable = std::mem::replace(&mut entry.stable, false);
        self.publish(StatusChange::Target { key, value });
        if was_stable {
            self.publish(StatusChange::Stable { key, stable: false });
        }
    }

    pub(crate) fn set_stable(&mut self, key: StatusKey, stable: bool) {
        let Some(entry) = self.entries.get_mut(&key) else {
            return;
        };
        if entry.stable != stable {
            entry.stable = stable;
            self.publish(StatusChange::Stable { key, stable });
        }
    }

    pub(crate) fn mark_drift_unresolved(&mut self, key: StatusKey, reissues: u32) {
        let Some(entry) = self.entries.get_mut(&key) else {
            return;
        };
        let Some(target) = entry.target.clone() else {
            return;
        };
        entry.drift_unresolved = true;
        let observed = entry.observed.clone();
        warn!(%key, %target, ?observed, reissues, "status drift unresolved");
        self.publish(StatusChange::DriftUnresolved {
            key,
            target,
            observed,
            reissues,
        });
    }

    /// Apply a classifier patch. Returns the number of values that changed.
    pub fn apply(&mut self, patch: StatePatch) -> usize {
        patch
            .into_iter()
            .filter(|(key, value)| self.set_observed(*key, value.clone()))
            .count()
    }

    /// Observed values are authoritative only while connected.
    ///
    /// Losing authority also clears `stable`: convergence has to be shown
    /// again with values observed on the next connection.
    pub fn set_authoritative(&mut self, authoritative: bool) {
        if self.authoritative == authoritative {
            return;
        }
        self.authoritative = authoritative;
        if authoritative {
            return;
        }
        let mut unsettled = Vec::new();
        for (key, entry) in &mut self.entries {
            entry.authoritative = false;
            if std::mem::replace(&mut entry.stable, false) {
                unsettled.push(*key);
            }
        }
        for key in unsettled {
            self.publish(StatusChange::Stable { key, stable: false });
        }
    }

    pub(crate) fn publish_connection(&self, state: ConnectionState) {
        self.publish(StatusChange::Connection { state });
    }

    pub fn snapshot(&self) -> Vec<StatusRecord> {
        self.entries
            .iter()
            .map(|(key, entry)| StatusRecord {
                key: *key,
                entry: entry.clone(),
            })
            .collect()
    }

    fn publish(&self, change: StatusChange) {
        // No subscribers is fine.
        let _ = self.events.send(change);
    }
}
