//! Counter table for tracked operation invocations.
//!
//! The table maps a stable operation identifier to its [`UsageRecord`]. It is
//! internally synchronized: increments go through a write lock, and
//! [`CounterTable::clear`] swaps in a fresh map instead of mutating the old
//! one, so a snapshot handle obtained earlier keeps reading its pre-clear
//! state without any coordination with writers.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

/// An entity that may be tracked by the counter table.
///
/// Only subjects exposing both a stable identifier and a location are
/// trackable; the location is what later attributes the record to an
/// originating site. Descriptive accessors default to `None`.
pub trait UsageSubject {
    /// Stable, globally unique identifier (e.g. `command:foo.Bar`).
    fn identifier(&self) -> Option<String>;

    /// Resource locator of the subject, typically a `file://` URL.
    fn location(&self) -> Option<String>;

    fn name(&self) -> Option<String> {
        None
    }

    fn label(&self) -> Option<String> {
        None
    }

    fn description(&self) -> Option<String> {
        None
    }

    fn version(&self) -> Option<String> {
        None
    }
}

/// Usage statistics for a single tracked operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub identifier: String,
    pub name: Option<String>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    pub location: Option<String>,
    /// Number of tracked invocations, starting at 0 at creation.
    pub count: u64,
}

impl UsageRecord {
    fn new(subject: &dyn UsageSubject, identifier: String) -> Self {
        Self {
            identifier,
            name: subject.name(),
            label: subject.label(),
            description: subject.description(),
            version: subject.version(),
            location: subject.location(),
            count: 0,
        }
    }
}

/// A concrete [`UsageSubject`] describing one executed operation.
///
/// This is the payload carried on the operation-executed event channel; hosts
/// that receive richer notifications can implement [`UsageSubject`] on their
/// own types instead.
#[derive(Debug, Clone, Default)]
pub struct OperationInfo {
    pub identifier: Option<String>,
    pub location: Option<String>,
    pub name: Option<String>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
}

impl OperationInfo {
    pub fn new(identifier: &str, location: &str) -> Self {
        Self {
            identifier: Some(identifier.to_string()),
            location: Some(location.to_string()),
            ..Self::default()
        }
    }
}

impl UsageSubject for OperationInfo {
    fn identifier(&self) -> Option<String> {
        self.identifier.clone()
    }

    fn location(&self) -> Option<String> {
        self.location.clone()
    }

    fn name(&self) -> Option<String> {
        self.name.clone()
    }

    fn label(&self) -> Option<String> {
        self.label.clone()
    }

    fn description(&self) -> Option<String> {
        self.description.clone()
    }

    fn version(&self) -> Option<String> {
        self.version.clone()
    }
}

/// Mapping from operation identifier to its usage record, in
/// first-observation order.
pub type StatsMap = IndexMap<String, UsageRecord>;

/// Table of usage statistics.
pub struct CounterTable {
    stats: RwLock<Arc<StatsMap>>,
}

impl Default for CounterTable {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterTable {
    pub fn new() -> Self {
        Self {
            stats: RwLock::new(Arc::new(StatsMap::new())),
        }
    }

    /// Returns the current record for the given subject, creating one with
    /// count 0 on first observation.
    ///
    /// Subjects lacking an identifier or a location are not trackable and
    /// yield `None`; this is not an error.
    pub fn record_for(&self, subject: &dyn UsageSubject) -> Option<UsageRecord> {
        let identifier = trackable_identifier(subject)?;
        let mut guard = self
            .stats
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let map = Arc::make_mut(&mut *guard);
        Some(get_or_create(map, subject, identifier).clone())
    }

    /// Adds 1 to the record for the given subject, creating it if needed.
    /// No-op for untrackable subjects.
    pub fn increment(&self, subject: &dyn UsageSubject) {
        let Some(identifier) = trackable_identifier(subject) else {
            return;
        };
        let mut guard = self
            .stats
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let map = Arc::make_mut(&mut *guard);
        get_or_create(map, subject, identifier).count += 1;
    }

    /// Returns a handle to the current mapping. The handle is cheap to clone
    /// and unaffected by a later [`CounterTable::clear`].
    pub fn snapshot(&self) -> Arc<StatsMap> {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Discards all statistics by installing a fresh mapping. Handles from
    /// earlier [`CounterTable::snapshot`] calls keep their pre-clear state.
    pub fn clear(&self) {
        let mut guard = self
            .stats
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(StatsMap::new());
    }
}

/// The identifier of a trackable subject, or `None` when the subject lacks
/// an identifier or a location.
fn trackable_identifier(subject: &dyn UsageSubject) -> Option<String> {
    subject.location()?;
    subject.identifier()
}

fn get_or_create<'m>(
    map: &'m mut StatsMap,
    subject: &dyn UsageSubject,
    identifier: String,
) -> &'m mut UsageRecord {
    map.entry(identifier.clone())
        .or_insert_with(|| UsageRecord::new(subject, identifier))
}
