//! Drives observed status toward requested targets.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::command::{Command, Origin};
use crate::status::{StatusKey, StatusValue};
use crate::store::StateStore;

/// Default bound on corrective re-issues after the first one.
pub const DEFAULT_MAX_REISSUES: u32 = 3;

type Corrective = Arc<dyn Fn(&StatusValue) -> Option<Command> + Send + Sync>;

/// How to correct one status attribute.
#[derive(Clone)]
pub struct ReconcileRule {
    pub key: StatusKey,
    /// Wait after a corrective command resolves before comparing again
    /// (lamp warm-up, relay debounce).
    pub settle: Duration,
    /// Re-issues allowed after the first corrective command of an episode.
    pub max_reissues: u32,
    corrective: Corrective,
}

impl ReconcileRule {
    /// `corrective` builds the command that drives the device toward a
    /// target, or `None` if the target cannot be expressed.
    pub fn new<F>(key: StatusKey, corrective: F) -> Self
    where
        F: Fn(&StatusValue) -> Option<Command> + Send + Sync + 'static,
    {
        Self {
            key,
            settle: Duration::ZERO,
            max_reissues: DEFAULT_MAX_REISSUES,
            corrective: Arc::new(corrective),
        }
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_max_reissues(mut self, max_reissues: u32) -> Self {
        self.max_reissues = max_reissues;
        self
    }
}

impl fmt::Debug for ReconcileRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconcileRule")
            .field("key", &self.key)
            .field("settle", &self.settle)
            .field("max_reissues", &self.max_reissues)
            .finish_non_exhaustive()
    }
}

/// Progress toward one target.
#[derive(Debug, Default)]
struct Episode {
    revision: u64,
    issued: u32,
    pending: bool,
    settle_until: Option<Instant>,
    exhausted: bool,
}

/// Per-connection reconciliation state.
#[derive(Debug, Default)]
pub struct Reconciler {
    rules: BTreeMap<StatusKey, (ReconcileRule, Episode)>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the rule for `rule.key`.
    pub fn add_rule(&mut self, rule: ReconcileRule) {
        self.rules.insert(rule.key, (rule, Episode::default()));
    }

    pub fn has_rule(&self, key: &StatusKey) -> bool {
        self.rules.contains_key(key)
    }

    /// Compare targets to observed values and return corrective commands.
    ///
    /// Does nothing while disconnected. A value observed in an earlier
    /// connection counts as unknown until the device reports it again: it
    /// never marks the attribute stable. An attribute that is mid-transition
    /// (corrective command outstanding or settling) is left alone.
    pub fn reconcile(&mut self, now: Instant, store: &mut StateStore) -> Vec<Command> {
        let mut commands = Vec::new();
        if !store.is_authoritative() {
            return commands;
        }

        for (key, (rule, episode)) in &mut self.rules {
            let Some(entry) = store.entry(key) else {
                continue;
            };
            let Some(target) = entry.target.clone() else {
                continue;
            };
            if entry.target_revision != episode.revision {
                *episode = Episode {
                    revision: entry.target_revision,
                    pending: episode.pending,
                    settle_until: episode.settle_until,
                    ..Episode::default()
                };
            }
            if episode.pending || episode.settle_until.is_some_and(|until| now < until) {
                continue;
            }
            episode.settle_until = None;

            let observed = entry.observed.as_ref().filter(|_| entry.authoritative);
            if observed == Some(&target) {
                if !entry.stable {
                    debug!(%key, %target, reissues = episode.issued.saturating_sub(1), "status converged");
                    store.set_stable(*key, true);
                }
                continue;
            }
            // Once converged, a change made at the device is not fought.
            if entry.stable || episode.exhausted {
                continue;
            }
            if episode.issued > rule.max_reissues {
                episode.exhausted = true;
                store.mark_drift_unresolved(*key, episode.issued - 1);
                continue;
            }
            let Some(command) = (rule.corrective)(&target) else {
                continue;
            };
            episode.issued += 1;
            episode.pending = true;
            debug!(%key, %target, attempt = episode.issued, "corrective command");
            commands.push(command.with_origin(Origin::Reconcile(*key)));
        }
        commands
    }

    /// A corrective command for `key` resolved (either way). Arms the settle
    /// delay.
    pub fn on_corrective_resolved(&mut self, key: &StatusKey, now: Instant) {
        if let Some((rule, episode)) = self.rules.get_mut(key) {
            episode.pending = false;
            episode.settle_until = Some(now + rule.settle);
        }
    }

    /// Outstanding corrective commands died with the connection.
    pub fn on_disconnected(&mut self) {
        for (_, episode) in self.rules.values_mut() {
            episode.pending = false;
            episode.settle_until = None;
        }
    }

    /// Earliest settle expiry, when the next comparison becomes possible.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.rules
            .values()
            .filter_map(|(_, episode)| episode.settle_until)
            .min()
    }
}
