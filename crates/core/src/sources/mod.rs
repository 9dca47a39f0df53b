pub mod linkedin;
pub mod naukri;
pub mod remoterocketship;
pub mod synthetic;

use scraper::{ElementRef, Selector};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ConfigError, DetailFetchError, SourceError};
use crate::fetch::SessionHandle;
use crate::limiter::SourceLimiter;
use crate::models::{JobDetail, RawListing, SearchQuery, Site};
use crate::traits::{PageCursor, SourceAdapter};
use crate::text::normalize_whitespace;

pub use linkedin::LinkedInAdapter;
pub use naukri::NaukriAdapter;
pub use remoterocketship::RemoteRocketshipAdapter;
pub use synthetic::SyntheticAdapter;

/// Etiquette and paging limits for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    /// Minimum spacing between two requests.
    pub delay: Duration,
    /// Extra random-looking spread added on top of `delay`.
    pub delay_band: Duration,
    pub page_size: usize,
    pub max_pages: usize,
    pub result_cap: usize,
}

impl SourceSettings {
    pub fn defaults_for(site: Site) -> Self {
        match site {
            Site::LinkedIn => Self {
                delay: Duration::from_millis(3_000),
                delay_band: Duration::from_millis(4_000),
                page_size: 10,
                max_pages: 100,
                result_cap: 1_000,
            },
            Site::Naukri => Self {
                delay: Duration::from_millis(2_500),
                delay_band: Duration::from_millis(3_500),
                page_size: 20,
                max_pages: 50,
                result_cap: 1_000,
            },
            Site::RemoteRocketship => Self {
                delay: Duration::from_secs(3),
                delay_band: Duration::from_secs(4),
                page_size: 20,
                max_pages: 45,
                result_cap: 900,
            },
        }
    }

    pub fn unthrottled(mut self) -> Self {
        self.delay = Duration::ZERO;
        self.delay_band = Duration::ZERO;
        self
    }
}

pub fn build_adapter(
    site: Site,
    settings: SourceSettings,
    session: Option<SessionHandle>,
) -> Result<Arc<dyn SourceAdapter>, ConfigError> {
    let adapter: Arc<dyn SourceAdapter> = match site {
        Site::LinkedIn => Arc::new(LinkedInAdapter::new(settings, session)),
        Site::Naukri => Arc::new(NaukriAdapter::new(settings)?),
        Site::RemoteRocketship => Arc::new(RemoteRocketshipAdapter::new(settings)),
    };
    Ok(adapter)
}

/// Lazily pulls one source's listings page by page.
///
/// Finite: stops at `min(results_wanted, result_cap)`, on an empty page, when
/// the board stops handing out cursors, or after `max_pages`. Not restartable;
/// build a new one to re-issue the query.
pub struct Discovery<'a> {
    adapter: &'a dyn SourceAdapter,
    limiter: &'a SourceLimiter,
    query: &'a SearchQuery,
    limit: usize,
    cursor: Option<PageCursor>,
    pages: usize,
    yielded: usize,
    parse_failures: usize,
    seen: HashSet<String>,
}

impl<'a> Discovery<'a> {
    pub fn new(
        adapter: &'a dyn SourceAdapter,
        limiter: &'a SourceLimiter,
        query: &'a SearchQuery,
    ) -> Self {
        Self {
            adapter,
            limiter,
            query,
            limit: query.results_wanted.min(adapter.result_cap()),
            cursor: Some(adapter.first_cursor()),
            pages: 0,
            yielded: 0,
            parse_failures: 0,
            seen: HashSet::new(),
        }
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    pub fn parse_failures(&self) -> usize {
        self.parse_failures
    }

    /// Next batch in the board's native order, or `None` once finished.
    pub async fn next_page(&mut self) -> Result<Option<Vec<RawListing>>, SourceError> {
        if self.yielded >= self.limit || self.pages >= self.adapter.max_pages() {
            self.cursor = None;
        }
        let Some(cursor) = self.cursor.take() else {
            return Ok(None);
        };

        let adapter = self.adapter;
        let query = self.query;
        let page = self
            .limiter
            .execute(|fetcher| {
                let cursor = cursor.clone();
                async move { adapter.search_page(fetcher.as_ref(), query, &cursor).await }
            })
            .await?;
        self.pages += 1;

        for failure in &page.parse_failures {
            debug!(site = %adapter.site(), error = %failure, "dropping malformed record");
        }
        self.parse_failures += page.parse_failures.len();

        if page.listings.is_empty() {
            info!(site = %adapter.site(), page = self.pages, listings = 0, "search page fetched");
            return Ok(Some(Vec::new()));
        }

        let remaining = self.limit - self.yielded;
        let mut batch = Vec::with_capacity(page.listings.len().min(remaining));
        for listing in page.listings {
            if batch.len() >= remaining {
                break;
            }
            let key = listing
                .external_id
                .clone()
                .unwrap_or_else(|| listing.job_url.clone());
            if self.seen.insert(key) {
                batch.push(listing);
            }
        }

        self.yielded += batch.len();
        self.cursor = page.next;
        info!(site = %adapter.site(), page = self.pages, listings = batch.len(), "search page fetched");
        Ok(Some(batch))
    }
}

/// Detail fetch for one listing through the source's limiter, with a
/// per-attempt timeout.
pub async fn fetch_detail(
    adapter: &dyn SourceAdapter,
    limiter: &SourceLimiter,
    listing: &RawListing,
    timeout: Duration,
) -> Result<JobDetail, DetailFetchError> {
    limiter
        .execute(|fetcher| async move {
            tokio::time::timeout(timeout, adapter.fetch_detail(fetcher.as_ref(), listing))
                .await
                .unwrap_or(Err(DetailFetchError::Timeout))
        })
        .await
}

pub(crate) fn selector(site: Site, css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|error| SourceError::Parse {
        site,
        details: format!("selector {css}: {error}"),
    })
}

/// Trimmed text of the first match among `selectors`, skipping empty ones.
pub(crate) fn first_text(scope: ElementRef<'_>, selectors: &[&str]) -> Option<String> {
    for css in selectors {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        if let Some(element) = scope.select(&selector).next() {
            let text = normalize_whitespace(&element.text().collect::<Vec<_>>().join(" "));
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

pub(crate) fn first_attr(scope: ElementRef<'_>, css: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(css).ok()?;
    scope
        .select(&selector)
        .find_map(|element| element.value().attr(attr))
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Inner HTML of the first non-empty match among `selectors`.
pub(crate) fn first_html(scope: ElementRef<'_>, selectors: &[&str]) -> Option<String> {
    for css in selectors {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        if let Some(element) = scope.select(&selector).next() {
            let html = element.inner_html();
            if !html.trim().is_empty() {
                return Some(html);
            }
        }
    }
    None
}
