//! Grouped usage report built from counter records.
//!
//! The builder walks usage records, attributes each one to the distribution
//! site that owns its location, and emits a document of site groups in
//! first-encounter order. Records that cannot be attributed (no location,
//! unresolvable location, unknown site) and records owned by sites not
//! flagged official are filtered out; filtering is a privacy decision, not
//! an error.
//!
//! Serialized shape:
//!
//! ```json
//! {
//!     "sites": [
//!         {
//!             "name": "ImageJ",
//!             "url": "http://update.imagej.net/",
//!             "stats": [
//!                 { "id": "command:net.imagej.ui.swing.updater.ImageJUpdater", "count": 3 }
//!             ]
//!         }
//!     ]
//! }
//! ```

use crate::counter::UsageRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A distribution site as known to the host's site lookup service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    pub name: String,
    pub url: String,
    /// Whether the site is trusted for reporting. Records owned by
    /// unofficial sites are never uploaded.
    pub official: bool,
}

/// Maps a local resource to the distribution site that owns it.
pub trait SiteResolver {
    /// Returns the owning site for the given local path, or `None` when the
    /// resource does not belong to any known site.
    fn resolve(&self, path: &Path) -> Option<Site>;
}

/// One reported operation within a site group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatEntry {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub count: u64,
}

impl StatEntry {
    fn from_record(record: &UsageRecord) -> Self {
        Self {
            id: record.identifier.clone(),
            name: record.name.clone(),
            label: record.label.clone(),
            description: record.description.clone(),
            version: record.version.clone(),
            count: record.count,
        }
    }
}

/// All reported operations attributed to one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteGroup {
    pub name: String,
    pub url: String,
    pub stats: Vec<StatEntry>,
}

/// The usage report for one cycle, before upload-time enrichment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDocument {
    pub sites: Vec<SiteGroup>,
}

/// Builds a [`ReportDocument`] from usage records.
pub struct ReportBuilder<'a> {
    resolver: &'a dyn SiteResolver,
    document: ReportDocument,
    /// Site URL -> index into `document.sites`. Keyed by URL, not name, so
    /// resolver results describing the same site merge into one group.
    site_index: HashMap<String, usize>,
}

impl<'a> ReportBuilder<'a> {
    pub fn new(resolver: &'a dyn SiteResolver) -> Self {
        Self {
            resolver,
            document: ReportDocument::default(),
            site_index: HashMap::new(),
        }
    }

    /// Appends the given record to the group of its owning site, or drops it
    /// when it cannot be attributed to an official site.
    pub fn append(&mut self, record: &UsageRecord) {
        let Some(location) = record.location.as_deref() else {
            return;
        };
        let Some(path) = location_to_path(location) else {
            tracing::warn!(
                "No file for id '{}' with location: {}",
                record.identifier,
                location
            );
            return;
        };
        let Some(site) = self.resolver.resolve(&path) else {
            return;
        };
        if !site.official {
            return;
        }
        let index = self.site_group(&site);
        self.document.sites[index]
            .stats
            .push(StatEntry::from_record(record));
    }

    pub fn finish(self) -> ReportDocument {
        self.document
    }

    fn site_group(&mut self, site: &Site) -> usize {
        if let Some(&index) = self.site_index.get(&site.url) {
            return index;
        }
        self.document.sites.push(SiteGroup {
            name: site.name.clone(),
            url: site.url.clone(),
            stats: Vec::new(),
        });
        let index = self.document.sites.len() - 1;
        self.site_index.insert(site.url.clone(), index);
        index
    }
}

/// Builds a report from the given records in input order.
pub fn build_report<'r>(
    resolver: &dyn SiteResolver,
    records: impl IntoIterator<Item = &'r UsageRecord>,
) -> ReportDocument {
    let mut builder = ReportBuilder::new(resolver);
    for record in records {
        builder.append(record);
    }
    builder.finish()
}

/// Interprets a record location as a local filesystem path.
///
/// Accepts `file:` URLs and plain paths; locations with any other URL scheme
/// cannot name a local resource and yield `None`.
fn location_to_path(location: &str) -> Option<PathBuf> {
    if let Some(rest) = location.strip_prefix("file://") {
        let path = rest.strip_prefix("localhost").unwrap_or(rest);
        if path.starts_with('/') {
            return Some(PathBuf::from(path));
        }
        return None;
    }
    if location.contains("://") || location.is_empty() {
        return None;
    }
    Some(PathBuf::from(location))
}
