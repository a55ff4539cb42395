//! Pseudonymous user token derivation.
//!
//! The token is a SHA-256 digest over the local user name and the first
//! discoverable MAC address, encoded as URL-safe base64. It is stable for a
//! given (user, machine) pair and carries no salt beyond the digest itself,
//! so tokens stay comparable across application versions. A determined
//! attacker with a candidate list of user names and MAC vendor prefixes
//! could brute-force it; that weakness is inherited from the reporting
//! protocol and kept for token stability.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Derives the anonymized user token for this machine.
///
/// Failure to discover a user name or MAC address degrades to an empty
/// component rather than failing; the token is still deterministic for
/// whatever inputs were found.
pub fn anonymized_user() -> String {
    let user = user_name().unwrap_or_default();
    let mac = mac_address().unwrap_or_default();
    token_for(&user, &mac)
}

fn token_for(user: &str, mac: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user.as_bytes());
    hasher.update(mac);
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

fn user_name() -> Option<String> {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|name| !name.is_empty())
}

/// First hardware address of this machine in interface-name order, skipping
/// the loopback device and all-zero addresses.
#[cfg(target_os = "linux")]
fn mac_address() -> Option<Vec<u8>> {
    let entries = match std::fs::read_dir("/sys/class/net") {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!("Cannot enumerate network interfaces: {}", e);
            return None;
        }
    };
    let mut names: Vec<String> = entries
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name != "lo")
        .collect();
    // read_dir order is not stable; sort so the same interface wins each run
    names.sort();
    for name in names {
        let address_path = format!("/sys/class/net/{}/address", name);
        let Ok(text) = std::fs::read_to_string(&address_path) else {
            continue;
        };
        if let Some(bytes) = parse_mac(text.trim()) {
            if bytes.iter().any(|b| *b != 0) {
                return Some(bytes);
            }
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn mac_address() -> Option<Vec<u8>> {
    tracing::debug!("MAC address discovery unsupported on this platform");
    None
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn parse_mac(text: &str) -> Option<Vec<u8>> {
    let bytes = text
        .split(':')
        .map(|part| u8::from_str_radix(part, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    if bytes.is_empty() {
        None
    } else {
        Some(bytes)
    }
}
