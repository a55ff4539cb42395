//! Upload of usage reports to the collection server.
//!
//! The uploader enriches a built report with the anonymized user token and a
//! flat set of environment metadata fields, then POSTs it as JSON in a
//! single attempt. Every failure path is logged and swallowed: counts are
//! never rolled back, so a failed cycle simply re-reports the accumulated
//! totals next time and the protocol stays additive from the server's point
//! of view.

use crate::report::ReportDocument;
use anyhow::{bail, Context, Result};
use serde_json::Value;

/// Sends the report to the given URL, associated with the anonymized user.
///
/// Does nothing when the report carries no statistics. Never returns an
/// error; transport and response problems are logged only.
pub fn upload(document: &ReportDocument, user: &str, url: &str) {
    if !upload_needed(document) {
        return;
    }
    let body = match payload(document, user) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!("Cannot serialize usage statistics: {:#}", e);
            return;
        }
    };
    match post(url, &body) {
        Ok(raw) => handle_response(&raw),
        Err(e) => tracing::error!("Cannot upload usage statistics: {:#}", e),
    }
}

/// True when at least one site group has statistics to report.
fn upload_needed(document: &ReportDocument) -> bool {
    document.sites.iter().any(|site| !site.stats.is_empty())
}

/// Serializes the report with the user token and environment metadata
/// attached as flat top-level fields.
fn payload(document: &ReportDocument, user: &str) -> Result<Vec<u8>> {
    let Value::Object(mut root) = serde_json::to_value(document)? else {
        bail!("usage report did not serialize to a JSON object");
    };
    root.insert("user".to_string(), Value::String(user.to_string()));
    for (key, value) in environment() {
        root.insert(key.replace('.', "_"), Value::String(value));
    }
    Ok(serde_json::to_vec(&Value::Object(root))?)
}

/// Descriptive machine/runtime metadata included in every report. Pairs
/// whose value cannot be determined are omitted.
fn environment() -> Vec<(String, String)> {
    let mut pairs = vec![
        ("app.name".to_string(), env!("CARGO_PKG_NAME").to_string()),
        (
            "app.version".to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        ),
        ("os.name".to_string(), std::env::consts::OS.to_string()),
        ("os.arch".to_string(), std::env::consts::ARCH.to_string()),
        ("os.family".to_string(), std::env::consts::FAMILY.to_string()),
    ];
    if let Some(language) = user_language() {
        pairs.push(("user.language".to_string(), language));
    }
    pairs.push((
        "user.timezone".to_string(),
        chrono::Local::now().offset().to_string(),
    ));
    pairs
}

fn user_language() -> Option<String> {
    std::env::var("LC_ALL")
        .or_else(|_| std::env::var("LANG"))
        .ok()
        .filter(|value| !value.is_empty())
}

/// POSTs the body and returns the full response text.
fn post(url: &str, body: &[u8]) -> Result<String> {
    let agent = ureq::Agent::new_with_defaults();
    let mut response = agent
        .post(url)
        .header("Content-Type", "application/json; charset=utf-8")
        .send(body)
        .context("Failed to send usage report")?;
    response
        .body_mut()
        .read_to_string()
        .context("Failed to read server response")
}

/// Logs the server's reply. Only the `message` field is consumed; any other
/// shape is logged verbatim as an error.
fn handle_response(raw: &str) {
    let message = serde_json::from_str::<Value>(raw)
        .ok()
        .and_then(|value| value.get("message").and_then(Value::as_str).map(String::from));
    match message {
        Some(message) => {
            tracing::info!("Uploaded usage statistics with response: {}", message);
        }
        None => tracing::error!("Invalid response: {}", raw),
    }
}
