use chrono::NaiveDate;
use scraper::{ElementRef, Html};

use super::{first_attr, first_html, first_text, selector, SourceSettings};
use crate::error::{DetailFetchError, ParseError, SourceError};
use crate::fetch::{FetchRequest, FetchedPage};
use crate::models::{JobDetail, RawListing, SearchQuery, Site, WorkMode};
use crate::text::description_text;
use crate::traits::{ListingPage, PageCursor, SourceAdapter};

const BASE_URL: &str = "https://www.remoterocketship.com";
const DETAIL_SELECTORS: [&str; 4] = [
    "div.job-description",
    "[class*='description']",
    "main",
    "article",
];

/// Remote-only board; every listing it returns is remote by definition.
pub struct RemoteRocketshipAdapter {
    settings: SourceSettings,
}

impl RemoteRocketshipAdapter {
    pub fn new(settings: SourceSettings) -> Self {
        Self { settings }
    }

    fn parse_card(&self, card: ElementRef<'_>) -> Result<RawListing, String> {
        let href = first_attr(card, "a.job-card-link", "href")
            .ok_or_else(|| "card without a job link".to_string())?;
        let path = href.split(['?', '#']).next().unwrap_or_default().trim_end_matches('/');
        let job_id = path
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .ok_or_else(|| format!("no job id in {href}"))?
            .to_string();
        let job_url = if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{BASE_URL}{path}")
        };

        let mut listing = RawListing::new(Site::RemoteRocketship, job_url);
        listing.external_id = Some(job_id);
        listing.title = first_text(card, &["h2.job-title"]).unwrap_or_default();
        listing.company = first_text(card, &["div.company-name"]).unwrap_or_default();
        listing.location =
            first_text(card, &["div.job-location"]).unwrap_or_else(|| "Remote".to_string());
        listing.date_posted = first_text(card, &["div.job-date"])
            .and_then(|text| NaiveDate::parse_from_str(&text, "%b %d, %Y").ok());
        listing.short_description = first_text(card, &["div.job-description"]);
        listing.is_remote = Some(true);
        listing.work_mode = Some(WorkMode::Remote);

        if listing.title.is_empty() {
            return Err(format!("card {} has no title", listing.job_url));
        }
        Ok(listing)
    }
}

impl SourceAdapter for RemoteRocketshipAdapter {
    fn site(&self) -> Site {
        Site::RemoteRocketship
    }

    fn result_cap(&self) -> usize {
        self.settings.result_cap
    }

    fn max_pages(&self) -> usize {
        self.settings.max_pages
    }

    fn first_cursor(&self) -> PageCursor {
        PageCursor::Page(1)
    }

    fn search_request(&self, query: &SearchQuery, cursor: &PageCursor) -> FetchRequest {
        let page = match cursor {
            PageCursor::Page(page) => *page,
            _ => 1,
        };
        let term = query.search_term();
        FetchRequest::get(format!("{BASE_URL}/"))
            .param("page", page)
            .param("sort", "DateAdded")
            .param("jobTitle", &term)
            .param("q", &term)
            .header("accept", "text/html,application/xhtml+xml")
    }

    fn parse_search_page(
        &self,
        page: &FetchedPage,
        cursor: &PageCursor,
    ) -> Result<ListingPage, SourceError> {
        let document = Html::parse_document(&page.body);
        let cards = selector(Site::RemoteRocketship, "div.job-card")?;

        let mut result = ListingPage::default();
        for card in document.select(&cards) {
            match self.parse_card(card) {
                Ok(listing) => result.listings.push(listing),
                Err(details) => result.parse_failures.push(ParseError {
                    site: Site::RemoteRocketship,
                    details,
                }),
            }
        }

        let received = result.listings.len() + result.parse_failures.len();
        if let PageCursor::Page(current) = cursor {
            if received > 0 && (*current as usize) < self.settings.max_pages {
                result.next = Some(PageCursor::Page(current + 1));
            }
        }
        Ok(result)
    }

    fn detail_request(&self, listing: &RawListing) -> FetchRequest {
        FetchRequest::get(listing.job_url.clone()).header("accept", "text/html,application/xhtml+xml")
    }

    fn parse_detail_page(
        &self,
        _listing: &RawListing,
        page: &FetchedPage,
    ) -> Result<JobDetail, DetailFetchError> {
        let document = Html::parse_document(&page.body);
        let raw_html =
            first_html(document.root_element(), &DETAIL_SELECTORS).ok_or(DetailFetchError::Empty)?;
        let description = description_text(&raw_html);
        if description.is_empty() {
            return Err(DetailFetchError::Empty);
        }

        Ok(JobDetail {
            description,
            raw_text: raw_html,
            is_remote: Some(true),
            work_mode: Some(WorkMode::Remote),
            ..Default::default()
        })
    }
}
