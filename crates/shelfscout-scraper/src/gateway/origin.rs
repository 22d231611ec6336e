//! Origin extraction for rate-limit and robots keys.

/// Returns the `scheme://host[:port]` origin of `url`, or `None` when the URL
/// cannot be parsed or has an opaque origin.
#[must_use]
pub fn extract_origin(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let origin = parsed.origin();
    if origin.is_tuple() {
        Some(origin.ascii_serialization())
    } else {
        None
    }
}

/// Hostname of `url` for log fields; falls back to the input.
pub(crate) fn extract_domain(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
        .unwrap_or_else(|| url.to_owned())
}
