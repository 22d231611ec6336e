//! Extracted items, their fingerprints and the final result dedup.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::urls::clean_url;
use crate::OrderedSet;

/// Which retrieval path produced an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemOrigin {
    Live,
    Archive,
    Rescue,
    /// Re-read from the site's last good listing snapshot.
    Snapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub quantity: Option<String>,
    pub price: Option<f64>,
    pub source_url: String,
    pub origin: ItemOrigin,
    /// `true` when the item came from archived content.
    pub stale: bool,
}

impl Item {
    #[must_use]
    pub fn fingerprint(&self) -> String {
        fingerprint(
            &self.name,
            self.quantity.as_deref(),
            &self.source_url,
            self.price,
        )
    }
}

/// Stable SHA-256 identity of an observation.
///
/// Name and quantity are lowercased with whitespace collapsed. The source URL
/// is cleaned and unwrapped from any Wayback replay prefix, so the same
/// product page seen live and through an archive snapshot collides. Only its
/// scheme and host are case-folded; paths are case-sensitive. Prices are
/// compared at cent precision.
#[must_use]
pub fn fingerprint(name: &str, quantity: Option<&str>, source_url: &str, price: Option<f64>) -> String {
    let price = price.map(|p| format!("{p:.2}")).unwrap_or_default();
    let input = format!(
        "{}\x00{}\x00{}\x00{}",
        normalize_text(name),
        normalize_text(quantity.unwrap_or("")),
        normalize_source_url(source_url),
        price,
    );
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

/// Stable dedup: the first item carrying each fingerprint wins, order is
/// otherwise preserved.
#[must_use]
pub fn dedupe(items: Vec<Item>) -> Vec<Item> {
    let mut seen = OrderedSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.fingerprint()))
        .collect()
}

fn normalize_text(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn normalize_source_url(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }
    // `Url` parsing inside `clean_url` already lowercases scheme and host.
    clean_url(strip_replay_prefix(raw.trim()))
}

/// `https://web.archive.org/web/20240101000000id_/https://shop/x` -> `https://shop/x`.
fn strip_replay_prefix(url: &str) -> &str {
    let Some(idx) = url.find("web.archive.org/web/") else {
        return url;
    };
    let rest = &url[idx + "web.archive.org/web/".len()..];
    match rest.split_once('/') {
        Some((stamp, original))
            if !original.is_empty() && stamp.chars().take(8).all(|c| c.is_ascii_digit()) =>
        {
            original
        }
        _ => url,
    }
}
