//! Versioned configuration store.
//!
//! The store holds the current configuration as an immutable `Arc<T>`
//! snapshot. A change never mutates a snapshot: it builds a new value, runs it
//! through the validator, and swaps the pointer. Readers holding an older
//! `Arc` keep seeing exactly the value they read.
//!
//! Changes arrive as JSON objects deep-merged over the current snapshot.
//! `update` stages a change; `apply_pending` applies everything staged since
//! the last apply as one version. `update_immediate` applies right away.
//!
//! Every applied version is kept in a bounded history, so recent versions can
//! be restored with `rollback`. Rollback re-applies the old snapshot as a new
//! version; version numbers only grow.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempo_core::limits::CONFIG_HISTORY_MAX;
use tempo_core::{CoreResult, ListenerId, Listeners};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::merge::{lookup, merge_patch};

/// Validator run against every candidate configuration.
pub type Validator<T> = Box<dyn Fn(&T) -> Result<(), String> + Send + Sync>;

/// Store settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSettings {
    /// Versions retained in history, including the current one.
    pub history_capacity: usize,
}

impl StoreSettings {
    /// Creates settings.
    #[must_use]
    pub const fn new(history_capacity: usize) -> Self {
        Self { history_capacity }
    }

    /// Creates settings for testing: a short history.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self::new(3)
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidConfig` if the capacity is out of range.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.history_capacity == 0 || self.history_capacity > CONFIG_HISTORY_MAX {
            return Err(ConfigError::InvalidConfig {
                message: format!(
                    "history_capacity {} must be in [1, {CONFIG_HISTORY_MAX}]",
                    self.history_capacity
                ),
            });
        }
        Ok(())
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self::new(10)
    }
}

/// How a version came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChangeSource {
    /// The configuration the store was created with.
    Initial,
    /// An applied update.
    Update,
    /// A rollback to an earlier version.
    Rollback {
        /// Version whose snapshot was restored.
        target: u64,
    },
}

/// A retained version.
#[derive(Debug, Clone)]
pub struct HistoryEntry<T> {
    /// Version number.
    pub version: u64,
    /// Snapshot.
    pub config: Arc<T>,
    /// When the version was applied.
    pub applied_at: SystemTime,
    /// What produced it.
    pub source: ChangeSource,
}

/// Events emitted by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEvent {
    /// A new version became current.
    Applied {
        /// New version.
        version: u64,
        /// What produced it.
        source: ChangeSource,
    },
    /// A candidate failed validation; nothing changed.
    Rejected {
        /// Validator or patch error.
        message: String,
    },
    /// A rollback restored an earlier snapshot.
    RolledBack {
        /// Version current before the rollback.
        from: u64,
        /// Version whose snapshot was restored.
        target: u64,
        /// Version assigned to the restored snapshot.
        version: u64,
    },
}

/// Versioned, validated configuration store.
pub struct VersionedConfig<T> {
    current: Arc<T>,
    version: u64,
    history: VecDeque<HistoryEntry<T>>,
    pending: Option<Value>,
    validator: Validator<T>,
    settings: StoreSettings,
    listeners: Listeners<ConfigEvent>,
}

impl<T> VersionedConfig<T>
where
    T: Serialize + DeserializeOwned + Clone,
{
    /// Creates a store at version 1 with default settings.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` if `initial` fails the validator.
    pub fn new<F>(initial: T, validator: F) -> ConfigResult<Self>
    where
        F: Fn(&T) -> Result<(), String> + Send + Sync + 'static,
    {
        Self::with_settings(initial, validator, StoreSettings::default())
    }

    /// Creates a store at version 1.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidConfig` for invalid settings and
    /// `ConfigError::Validation` if `initial` fails the validator.
    pub fn with_settings<F>(initial: T, validator: F, settings: StoreSettings) -> ConfigResult<Self>
    where
        F: Fn(&T) -> Result<(), String> + Send + Sync + 'static,
    {
        settings.validate()?;
        validator(&initial).map_err(|message| ConfigError::Validation { message })?;

        let current = Arc::new(initial);
        let mut history = VecDeque::with_capacity(settings.history_capacity);
        history.push_back(HistoryEntry {
            version: 1,
            config: Arc::clone(&current),
            applied_at: SystemTime::now(),
            source: ChangeSource::Initial,
        });
        Ok(Self {
            current,
            version: 1,
            history,
            pending: None,
            validator: Box::new(validator),
            settings,
            listeners: Listeners::new(),
        })
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn get(&self) -> Arc<T> {
        Arc::clone(&self.current)
    }

    /// Returns the value at a dotted path in the current snapshot.
    #[must_use]
    pub fn get_value(&self, path: &str) -> Option<Value> {
        let value = serde_json::to_value(&*self.current).ok()?;
        lookup(&value, path).cloned()
    }

    /// Returns the current version.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Stages a partial update for the next `apply_pending`. Staged updates
    /// merge with each other in call order.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidPatch` or `ConfigError::Validation` if the
    /// merged candidate is invalid; nothing is staged in that case.
    pub fn update(&mut self, partial: Value) -> ConfigResult<()> {
        ensure_object(&partial)?;
        let staged = match &self.pending {
            Some(pending) => {
                let mut merged = pending.clone();
                merge_patch(&mut merged, &partial);
                merged
            }
            None => partial,
        };

        self.check(&staged)?;
        debug!(version = self.version, "Config update staged");
        self.pending = Some(staged);
        Ok(())
    }

    /// Applies all staged updates as one new version. Returns the new version,
    /// or `None` if nothing was staged.
    ///
    /// # Errors
    ///
    /// Returns an error if the staged change no longer validates against the
    /// current snapshot; the staged change is discarded.
    pub fn apply_pending(&mut self) -> ConfigResult<Option<u64>> {
        let Some(staged) = self.pending.take() else {
            return Ok(None);
        };
        let candidate = self.check(&staged)?;
        Ok(Some(self.commit(Arc::new(candidate), ChangeSource::Update)))
    }

    /// Validates and applies a partial update now. Returns the new version.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidPatch` or `ConfigError::Validation` if the
    /// candidate is invalid; nothing changes in that case.
    pub fn update_immediate(&mut self, partial: Value) -> ConfigResult<u64> {
        ensure_object(&partial)?;
        let candidate = self.check(&partial)?;
        Ok(self.commit(Arc::new(candidate), ChangeSource::Update))
    }

    /// Restores the snapshot of `target` (or of the version before the current
    /// one) as a new version, discarding staged updates. Returns the new
    /// version.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::VersionNotFound` if the target is not in history.
    pub fn rollback(&mut self, target: Option<u64>) -> ConfigResult<u64> {
        let target = target.unwrap_or_else(|| self.version.saturating_sub(1));
        let Some(entry) = self.history.iter().find(|e| e.version == target) else {
            warn!(target, current = self.version, "Rollback target not in history");
            return Err(ConfigError::VersionNotFound { version: target });
        };

        let snapshot = Arc::clone(&entry.config);
        let from = self.version;
        self.pending = None;
        let version = self.commit(snapshot, ChangeSource::Rollback { target });

        info!(from, target, version, "Config rolled back");
        self.listeners.emit(&ConfigEvent::RolledBack {
            from,
            target,
            version,
        });
        Ok(version)
    }

    /// Returns retained versions, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<HistoryEntry<T>> {
        self.history.iter().cloned().collect()
    }

    /// Returns true if updates are staged.
    #[must_use]
    pub const fn has_pending_update(&self) -> bool {
        self.pending.is_some()
    }

    /// Drops staged updates. Returns true if any were staged.
    pub fn discard_pending(&mut self) -> bool {
        self.pending.take().is_some()
    }

    /// Registers an observer for store events.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener limit is reached.
    pub fn subscribe<F>(&mut self, listener: F) -> CoreResult<ListenerId>
    where
        F: FnMut(&ConfigEvent) + Send + 'static,
    {
        self.listeners.subscribe(listener)
    }

    /// Removes an observer.
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    /// Builds the candidate for `patch` over the current snapshot and validates it.
    fn check(&mut self, patch: &Value) -> ConfigResult<T> {
        let result = self.candidate(patch).and_then(|candidate| {
            (self.validator)(&candidate)
                .map(|()| candidate)
                .map_err(|message| ConfigError::Validation { message })
        });
        if let Err(err) = &result {
            warn!(error = %err, version = self.version, "Config change rejected");
            self.listeners.emit(&ConfigEvent::Rejected {
                message: err.to_string(),
            });
        }
        result
    }

    fn candidate(&self, patch: &Value) -> ConfigResult<T> {
        let mut merged = serde_json::to_value(&*self.current)?;
        merge_patch(&mut merged, patch);
        serde_json::from_value(merged).map_err(|err| ConfigError::InvalidPatch {
            message: err.to_string(),
        })
    }

    fn commit(&mut self, snapshot: Arc<T>, source: ChangeSource) -> u64 {
        self.version += 1;
        self.current = Arc::clone(&snapshot);
        self.history.push_back(HistoryEntry {
            version: self.version,
            config: snapshot,
            applied_at: SystemTime::now(),
            source,
        });
        while self.history.len() > self.settings.history_capacity {
            self.history.pop_front();
        }

        info!(version = self.version, source = ?source, "Config applied");
        self.listeners.emit(&ConfigEvent::Applied {
            version: self.version,
            source,
        });
        self.version
    }
}

impl<T: fmt::Debug> fmt::Debug for VersionedConfig<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VersionedConfig")
            .field("version", &self.version)
            .field("current", &self.current)
            .field("history_len", &self.history.len())
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

fn ensure_object(partial: &Value) -> ConfigResult<()> {
    if partial.is_object() {
        Ok(())
    } else {
        Err(ConfigError::InvalidPatch {
            message: format!("partial update must be a JSON object, got {partial}"),
        })
    }
}
