use std::collections::HashSet;
use url::Url;

use crate::models::{RawListing, Site};

const TRACKING_PARAMS: [&str; 10] = [
    "trk",
    "trackingid",
    "refid",
    "ref",
    "src",
    "gclid",
    "fbclid",
    "position",
    "pagenum",
    "lipi",
];

fn is_tracking_param(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.starts_with("utm_") || TRACKING_PARAMS.contains(&name.as_str())
}

/// Canonical form of a listing URL for duplicate detection.
///
/// Scheme, host and path are lower-cased, trailing slashes, the fragment and
/// tracking parameters are dropped, the remaining query pairs are sorted.
/// Applying it to its own output returns the same string.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(parsed) = Url::parse(trimmed) else {
        return trimmed.trim_end_matches('/').to_lowercase();
    };

    let mut normalized = format!("{}://", parsed.scheme().to_lowercase());
    if let Some(host) = parsed.host_str() {
        normalized.push_str(&host.to_lowercase());
    }
    if let Some(port) = parsed.port() {
        normalized.push_str(&format!(":{port}"));
    }
    normalized.push_str(parsed.path().to_lowercase().trim_end_matches('/'));

    let mut params: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(name, _)| !is_tracking_param(name))
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();
    if !params.is_empty() {
        params.sort();
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();
        normalized.push('?');
        normalized.push_str(&query);
    }

    normalized
}

/// Key a listing is deduplicated on: its board id when present, else its URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    External(Site, String),
    Url(String),
}

impl DedupKey {
    pub fn for_listing(listing: &RawListing) -> Self {
        match listing
            .external_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
        {
            Some(id) => DedupKey::External(listing.site, id.to_string()),
            None => DedupKey::Url(normalize_url(&listing.job_url)),
        }
    }
}

#[derive(Debug, Default)]
pub struct DedupOutcome {
    pub kept: Vec<RawListing>,
    pub duplicates_dropped: usize,
}

/// First-seen wins. A record is a duplicate when either its id key or its
/// normalized URL was already taken, so the same posting reached through two
/// id-less URLs, or through an id and a URL, collapses to one.
pub fn dedupe(listings: Vec<RawListing>) -> DedupOutcome {
    let mut ids = HashSet::new();
    let mut urls = HashSet::new();
    let mut outcome = DedupOutcome::default();

    for listing in listings {
        let key = DedupKey::for_listing(&listing);
        let url = normalize_url(&listing.job_url);

        let id_taken = matches!(key, DedupKey::External(..)) && ids.contains(&key);
        let url_taken = !url.is_empty() && urls.contains(&url);
        if id_taken || url_taken {
            outcome.duplicates_dropped += 1;
            continue;
        }

        if matches!(key, DedupKey::External(..)) {
            ids.insert(key);
        }
        if !url.is_empty() {
            urls.insert(url);
        }
        outcome.kept.push(listing);
    }

    outcome
}
