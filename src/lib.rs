//! Anonymous usage statistics: counting, aggregation, and upload.
//!
//! The pipeline has three stages. Operation invocations land in a
//! [`CounterTable`] keyed by stable identifier. Each reporting cycle, a
//! [`report::ReportBuilder`] turns a table snapshot into a document of site
//! groups, dropping anything that cannot be attributed to an official
//! distribution site. The uploader then attaches the anonymized user token
//! plus environment metadata and POSTs the result as JSON. A
//! [`UsageReporter`] drives the cycle on a fixed period and once more at
//! shutdown via [`UsageReporter::flush`].
//!
//! Everything privacy-sensitive is filtered before the wire: only
//! identifiers, counts, static descriptive strings, and a one-way user
//! token ever leave the machine, and only when the user opted in.

pub mod anonymizer;
pub mod config;
pub mod counter;
pub mod report;
pub mod reporter;
pub mod uploader;

pub use config::ReporterConfig;
pub use counter::{CounterTable, OperationInfo, UsageRecord, UsageSubject};
pub use report::{ReportBuilder, ReportDocument, Site, SiteGroup, SiteResolver, StatEntry};
pub use reporter::UsageReporter;
