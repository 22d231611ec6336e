//! URL normalization for archive lookups.

use url::Url;

use crate::OrderedSet;

/// Normalizes a target URL: adds an `https://` scheme when none is present,
/// strips query and fragment, lowercases the host. Idempotent.
///
/// Input that cannot be parsed even after adding a scheme is returned with
/// query and fragment cut off by string splitting.
#[must_use]
pub fn clean_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    match Url::parse(&with_scheme) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => with_scheme
            .split(['#', '?'])
            .next()
            .unwrap_or_default()
            .to_string(),
    }
}

/// Adds `https://` when `raw` has no scheme; otherwise returns it trimmed.
/// Query and fragment are kept, unlike [`clean_url`].
#[must_use]
pub fn ensure_scheme(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed.trim_start_matches('/'))
    }
}

/// Returns the cleaned URL followed by each parent path up to the site root:
/// `/a/b/c`, `/a/b`, `/a`, `/`. No level appears twice.
#[must_use]
pub fn parent_urls(raw: &str) -> Vec<String> {
    let cleaned = clean_url(raw);
    let Ok(url) = Url::parse(&cleaned) else {
        return vec![cleaned];
    };

    let origin = url.origin().ascii_serialization();
    let segments: Vec<&str> = url
        .path()
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();

    let mut levels = OrderedSet::new();
    levels.insert(cleaned.clone());
    for depth in (0..=segments.len()).rev() {
        levels.insert(format!("{origin}/{}", segments[..depth].join("/")));
    }
    levels.into_vec()
}

/// Host of `raw` after cleaning, if it parses.
#[must_use]
pub fn host_of(raw: &str) -> Option<String> {
    Url::parse(&clean_url(raw))
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
}
