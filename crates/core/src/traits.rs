use async_trait::async_trait;
use scraper::{Html, Selector};
use url::Url;

use crate::error::{BlockedError, DetailFetchError, ParseError, SourceError};
use crate::fetch::{FetchRequest, FetchedPage, PageFetcher};
use crate::models::{JobDetail, RawListing, SearchQuery, Site};
use crate::text::normalize_whitespace;

const BLOCK_STATUSES: [u16; 3] = [403, 429, 999];
/// Path fragments of the challenge pages boards redirect to.
const CHALLENGE_PATHS: [&str; 2] = ["/checkpoint/challenge", "/cdn-cgi/challenge-platform"];
/// Markers only trusted in error bodies; job text is free to mention them.
const ERROR_BODY_MARKERS: [&str; 3] = ["captcha", "cf-chl", "unusual traffic"];
/// Whole titles of known interstitials, compared exactly.
const CHALLENGE_TITLES: [&str; 4] = [
    "just a moment...",
    "attention required! | cloudflare",
    "security verification | linkedin",
    "are you a robot?",
];
const CHALLENGE_ELEMENTS: &str = "#challenge-form, #cf-challenge-running, .g-recaptcha, .h-captcha, \
     iframe[src*=\"captcha\"], form[action*=\"checkpoint/challenge\"]";

/// Where the next search page starts. Each source picks its own flavour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    Offset(usize),
    Page(u32),
}

/// One parsed search page. Malformed records are reported, not fatal.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub listings: Vec<RawListing>,
    pub parse_failures: Vec<ParseError>,
    pub next: Option<PageCursor>,
}

/// Status, redirect and challenge-page check shared by every source.
///
/// A successful body is only inspected for challenge-page structure, never
/// for words, so a posting that talks about captchas is still a posting.
pub fn detect_block(site: Site, page: &FetchedPage) -> Option<BlockedError> {
    let blocked = |marker: Option<&str>| BlockedError {
        site,
        status: Some(page.status),
        marker: marker.map(str::to_string),
    };

    if BLOCK_STATUSES.contains(&page.status) {
        return Some(blocked(None));
    }

    let path = Url::parse(&page.final_url)
        .map(|url| url.path().to_lowercase())
        .unwrap_or_default();
    if let Some(marker) = CHALLENGE_PATHS.iter().find(|marker| path.contains(*marker)) {
        return Some(blocked(Some(*marker)));
    }

    if !page.is_success() {
        let body = page.body.to_lowercase();
        return ERROR_BODY_MARKERS
            .iter()
            .find(|marker| body.contains(*marker))
            .map(|marker| blocked(Some(*marker)));
    }

    challenge_page_marker(&page.body).map(|marker| blocked(Some(marker.as_str())))
}

fn challenge_page_marker(body: &str) -> Option<String> {
    if !body.trim_start().starts_with('<') {
        return None;
    }
    let document = Html::parse_document(body);

    if let Ok(title) = Selector::parse("head > title") {
        let title = document
            .select(&title)
            .next()
            .map(|element| normalize_whitespace(&element.text().collect::<String>()).to_lowercase())
            .unwrap_or_default();
        if let Some(marker) = CHALLENGE_TITLES.iter().find(|marker| title == **marker) {
            return Some(marker.to_string());
        }
    }

    let elements = Selector::parse(CHALLENGE_ELEMENTS).ok()?;
    document
        .select(&elements)
        .next()
        .map(|_| "challenge element".to_string())
}

/// Capability every job board implements: build its own requests, parse its
/// own responses. Adapters hold no run state; pagination state lives in the
/// discovery driver and throttling in the source's limiter.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn site(&self) -> Site;

    /// Hard ceiling the board imposes on one query.
    fn result_cap(&self) -> usize;

    fn max_pages(&self) -> usize;

    fn first_cursor(&self) -> PageCursor;

    fn search_request(&self, query: &SearchQuery, cursor: &PageCursor) -> FetchRequest;

    /// Parses a successful search response. An empty page is `Ok` with no listings.
    fn parse_search_page(
        &self,
        page: &FetchedPage,
        cursor: &PageCursor,
    ) -> Result<ListingPage, SourceError>;

    fn detail_request(&self, listing: &RawListing) -> FetchRequest;

    fn parse_detail_page(
        &self,
        listing: &RawListing,
        page: &FetchedPage,
    ) -> Result<JobDetail, DetailFetchError>;

    /// Full detail already carried by the search record, if the board sends it.
    fn detail_in_listing(&self, _listing: &RawListing) -> Option<JobDetail> {
        None
    }

    fn detect_block(&self, page: &FetchedPage) -> Option<BlockedError> {
        detect_block(self.site(), page)
    }

    async fn search_page(
        &self,
        fetcher: &dyn PageFetcher,
        query: &SearchQuery,
        cursor: &PageCursor,
    ) -> Result<ListingPage, SourceError> {
        let site = self.site();
        let request = self.search_request(query, cursor);
        let page = fetcher
            .fetch(&request)
            .await
            .map_err(|source| SourceError::Fetch { site, source })?;

        if let Some(blocked) = self.detect_block(&page) {
            return Err(SourceError::Blocked(blocked));
        }
        if !page.is_success() {
            return Err(SourceError::Rejected {
                site,
                details: format!("search returned status {}", page.status),
            });
        }

        self.parse_search_page(&page, cursor)
    }

    async fn fetch_detail(
        &self,
        fetcher: &dyn PageFetcher,
        listing: &RawListing,
    ) -> Result<JobDetail, DetailFetchError> {
        let request = self.detail_request(listing);
        let page = fetcher.fetch(&request).await?;

        if let Some(blocked) = self.detect_block(&page) {
            return Err(DetailFetchError::Blocked(blocked));
        }
        if !page.is_success() {
            return Err(DetailFetchError::Status(page.status));
        }

        self.parse_detail_page(listing, &page)
    }
}
