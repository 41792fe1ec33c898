//! Driver version selection: a pinned version, or the single version
//! advertised on the vendor's listing page.

use crate::error::{ProvisionError, ProvisionResult};
use crate::setup::downloader::Fetcher;

pub struct VersionResolver<'a> {
    pub feed_url: &'a str,
    pub label: &'a str,
}

impl<'a> VersionResolver<'a> {
    pub fn new(feed_url: &'a str, label: &'a str) -> Self {
        Self { feed_url, label }
    }

    /// A non-empty `explicit` version wins and never touches the network
    pub async fn resolve(&self, explicit: Option<&str>, fetcher: &dyn Fetcher) -> ProvisionResult<String> {
        if let Some(version) = explicit.map(str::trim).filter(|v| !v.is_empty()) {
            tracing::info!(version, "Using pinned driver version");
            return Ok(version.to_string());
        }

        tracing::info!(url = self.feed_url, "Resolving latest driver version");
        let page = fetcher
            .fetch_text(self.feed_url)
            .await
            .map_err(|e| ProvisionError::VersionFeedUnavailable(e.to_string()))?;

        let candidates = extract_versions(&page, self.label);
        match candidates.as_slice() {
            [version] => {
                tracing::info!(version = %version, "Resolved driver version");
                Ok(version.clone())
            }
            _ => Err(ProvisionError::AmbiguousVersionResolution { candidates }),
        }
    }
}

/// Distinct cleaned values of every line carrying `label`, in page order.
/// A line holding only the label contributes nothing.
pub fn extract_versions(page: &str, label: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    for line in page.lines().filter(|l| l.contains(label)) {
        let text = strip_markup(line).replace(label, "");
        let value: String = text.chars().filter(|c| !c.is_whitespace()).collect();
        if value.is_empty() {
            continue;
        }
        if !found.contains(&value) {
            found.push(value);
        }
    }
    found
}

/// Drop `<...>` tags and non-breaking space entities
fn strip_markup(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut in_tag = false;
    for c in line.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&nbsp;", " ")
}
