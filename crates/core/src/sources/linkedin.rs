use chrono::NaiveDate;
use scraper::{ElementRef, Html};

use super::{first_attr, first_html, first_text, selector, SourceSettings};
use crate::error::{DetailFetchError, ParseError, SourceError};
use crate::fetch::{FetchRequest, FetchedPage, SessionHandle};
use crate::models::{Compensation, JobDetail, RawListing, SearchQuery, Site};
use crate::text::{description_text, normalize_whitespace};
use crate::traits::{ListingPage, PageCursor, SourceAdapter};

const BASE_URL: &str = "https://www.linkedin.com";
const SEARCH_PATH: &str = "/jobs-guest/jobs/api/seeMoreJobPostings/search";
const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8";

/// Guest job-search endpoint. Offset paging, ten cards per page.
pub struct LinkedInAdapter {
    settings: SourceSettings,
    session: Option<SessionHandle>,
}

impl LinkedInAdapter {
    pub fn new(settings: SourceSettings, session: Option<SessionHandle>) -> Self {
        Self { settings, session }
    }

    fn decorate(&self, request: FetchRequest) -> FetchRequest {
        let request = request
            .header("accept", ACCEPT_HTML)
            .header("accept-language", "en-US,en;q=0.9");
        match &self.session {
            Some(session) => session.apply(request),
            None => request,
        }
    }

    fn parse_card(&self, card: ElementRef<'_>) -> Result<RawListing, String> {
        let href = first_attr(card, "a.base-card__full-link", "href")
            .ok_or_else(|| "card without a job link".to_string())?;
        let job_id = job_id_from_href(&href)
            .or_else(|| {
                card.value()
                    .attr("data-entity-urn")
                    .and_then(|urn| urn.rsplit(':').next())
                    .filter(|id| is_numeric(id))
                    .map(str::to_string)
            })
            .ok_or_else(|| format!("no job id in {href}"))?;

        let mut listing = RawListing::new(Site::LinkedIn, format!("{BASE_URL}/jobs/view/{job_id}"));
        listing.external_id = Some(job_id);
        listing.title = first_text(card, &["span.sr-only", "h3.base-search-card__title"])
            .unwrap_or_default();
        listing.company = first_text(
            card,
            &["h4.base-search-card__subtitle a", "h4.base-search-card__subtitle"],
        )
        .unwrap_or_default();
        listing.location = first_text(card, &["span.job-search-card__location"]).unwrap_or_default();
        listing.date_posted = first_attr(card, "time[datetime]", "datetime")
            .and_then(|value| NaiveDate::parse_from_str(&value, "%Y-%m-%d").ok());
        listing.compensation = first_text(card, &["span.job-search-card__salary-info"])
            .and_then(|text| parse_salary(&text));

        if listing.title.is_empty() {
            return Err(format!("card {} has no title", listing.job_url));
        }
        Ok(listing)
    }
}

impl SourceAdapter for LinkedInAdapter {
    fn site(&self) -> Site {
        Site::LinkedIn
    }

    fn result_cap(&self) -> usize {
        self.settings.result_cap
    }

    fn max_pages(&self) -> usize {
        self.settings.max_pages
    }

    fn first_cursor(&self) -> PageCursor {
        PageCursor::Offset(0)
    }

    fn search_request(&self, query: &SearchQuery, cursor: &PageCursor) -> FetchRequest {
        let mut request =
            FetchRequest::get(format!("{BASE_URL}{SEARCH_PATH}")).param("keywords", query.search_term());
        if let Some(location) = &query.location {
            request = request.param("location", location);
        }
        if query.remote_only {
            request = request.param("f_WT", 2);
        }
        if let Some(hours) = query.hours_old {
            request = request.param("f_TPR", format!("r{}", u64::from(hours) * 3600));
        }
        request = request.param("pageNum", 0).param("start", offset_of(cursor));
        self.decorate(request)
    }

    fn parse_search_page(
        &self,
        page: &FetchedPage,
        cursor: &PageCursor,
    ) -> Result<ListingPage, SourceError> {
        let document = Html::parse_document(&page.body);
        let cards = selector(Site::LinkedIn, "div.base-search-card")?;

        let mut result = ListingPage::default();
        let mut received = 0;
        for card in document.select(&cards) {
            received += 1;
            match self.parse_card(card) {
                Ok(listing) => result.listings.push(listing),
                Err(details) => result.parse_failures.push(ParseError {
                    site: Site::LinkedIn,
                    details,
                }),
            }
        }

        let next_offset = offset_of(cursor) + received;
        if received > 0 && next_offset < self.settings.result_cap {
            result.next = Some(PageCursor::Offset(next_offset));
        }
        Ok(result)
    }

    fn detail_request(&self, listing: &RawListing) -> FetchRequest {
        let url = match &listing.external_id {
            Some(id) => format!("{BASE_URL}/jobs/view/{id}"),
            None => listing.job_url.clone(),
        };
        self.decorate(FetchRequest::get(url))
    }

    fn parse_detail_page(
        &self,
        _listing: &RawListing,
        page: &FetchedPage,
    ) -> Result<JobDetail, DetailFetchError> {
        if page.final_url.contains("linkedin.com/signup") {
            return Err(DetailFetchError::Rejected("redirected to sign-up".to_string()));
        }
        if page.final_url.contains("linkedin.com/authwall") {
            return Err(DetailFetchError::Rejected("redirected to authwall".to_string()));
        }

        let document = Html::parse_document(&page.body);
        let root = document.root_element();
        let raw_html = first_html(root, &["div.show-more-less-html__markup"])
            .ok_or(DetailFetchError::Empty)?;
        let description = description_text(&raw_html);
        if description.is_empty() {
            return Err(DetailFetchError::Empty);
        }

        Ok(JobDetail {
            description,
            raw_text: raw_html,
            fields: job_criteria(root).into_iter().collect(),
            ..Default::default()
        })
    }
}

fn offset_of(cursor: &PageCursor) -> usize {
    match cursor {
        PageCursor::Offset(offset) => *offset,
        _ => 0,
    }
}

fn is_numeric(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|ch| ch.is_ascii_digit())
}

/// `.../jobs/view/site-reliability-engineer-at-acme-3812345678?trk=...` -> `3812345678`.
fn job_id_from_href(href: &str) -> Option<String> {
    let path = href.split(['?', '#']).next()?.trim_end_matches('/');
    let tail = path.rsplit(['-', '/']).next()?;
    is_numeric(tail).then(|| tail.to_string())
}

/// Seniority level, employment type, industries and job function, keyed in snake case.
fn job_criteria(root: ElementRef<'_>) -> Vec<(String, String)> {
    let Ok(headers) = scraper::Selector::parse("h3.description__job-criteria-subheader") else {
        return Vec::new();
    };

    root.select(&headers)
        .filter_map(|header| {
            let label = normalize_whitespace(&header.text().collect::<String>());
            let value = header
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .find(|sibling| sibling.value().name() == "span")
                .map(|span| normalize_whitespace(&span.text().collect::<String>()))?;
            if label.is_empty() || value.is_empty() {
                return None;
            }
            let key = label.to_lowercase().replace(' ', "_");
            Some((key, value))
        })
        .collect()
}

/// `$120,000.00 - $150,000.00/yr` style salary chips.
fn parse_salary(text: &str) -> Option<Compensation> {
    let amounts: Vec<f64> = text
        .split('-')
        .filter_map(|part| {
            let digits: String = part
                .split('/')
                .next()
                .unwrap_or_default()
                .chars()
                .filter(|ch| ch.is_ascii_digit() || *ch == '.')
                .collect();
            digits.parse::<f64>().ok()
        })
        .collect();
    let min_amount = *amounts.first()?;

    let currency = match text.trim().chars().next() {
        Some('$') => "USD",
        Some('€') => "EUR",
        Some('£') => "GBP",
        Some('₹') => "INR",
        _ => return None,
    };
    let lowered = text.to_lowercase();
    let interval = if lowered.contains("/yr") {
        Some("yearly")
    } else if lowered.contains("/hr") {
        Some("hourly")
    } else if lowered.contains("/mo") {
        Some("monthly")
    } else {
        None
    };

    Some(Compensation {
        min_amount: Some(min_amount),
        max_amount: amounts.get(1).copied(),
        currency: Some(currency.to_string()),
        interval: interval.map(str::to_string),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::fetch::PageFetcher;
    use crate::limiter::{ProxyPool, RetryPolicy, SourceLimiter, TokenBucket};
    use crate::sources::fetch_detail;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    struct AuthwallFetcher;

    #[async_trait]
    impl PageFetcher for AuthwallFetcher {
        fn identity(&self) -> String {
            "direct".to_string()
        }

        async fn fetch(&self, _request: &FetchRequest) -> Result<FetchedPage, FetchError> {
            Ok(FetchedPage {
                status: 200,
                final_url: "https://www.linkedin.com/authwall?trk=public_jobs".to_string(),
                body: "<html><body><h1>Sign in to view this job</h1></body></html>".to_string(),
            })
        }
    }

    const SEARCH_FIXTURE: &str = r#"
        <li>
          <div class="base-card base-search-card" data-entity-urn="urn:li:jobPosting:3812345678">
            <a class="base-card__full-link" href="https://www.linkedin.com/jobs/view/production-support-engineer-at-acme-3812345678?refId=abc&amp;trk=public_jobs"></a>
            <span class="sr-only">Production Support Engineer</span>
            <h4 class="base-search-card__subtitle"><a href="https://www.linkedin.com/company/acme">Acme Corp</a></h4>
            <div class="base-search-card__metadata">
              <span class="job-search-card__location">Pune, Maharashtra, India</span>
              <span class="job-search-card__salary-info">$90,000.00 - $120,000.00/yr</span>
              <time class="job-search-card__listdate" datetime="2024-05-02">1 week ago</time>
            </div>
          </div>
        </li>
        <li>
          <div class="base-card base-search-card">
            <span class="sr-only">Card without link</span>
          </div>
        </li>
        <li>
          <div class="base-card base-search-card">
            <a class="base-card__full-link" href="https://www.linkedin.com/jobs/view/sre-at-globex-3899999999"></a>
            <h3 class="base-search-card__title"> Site Reliability Engineer </h3>
            <h4 class="base-search-card__subtitle">Globex</h4>
          </div>
        </li>
    "#;

    const DETAIL_FIXTURE: &str = r#"
        <html><body>
          <div class="show-more-less-html__markup show-more-less-html__markup--clamp-after-5">
            <p>Own <strong>Linux</strong> servers and SFTP transfers.</p>
            <ul><li>ServiceNow incident handling</li><li>On-call rotation</li></ul>
          </div>
          <ul class="description__job-criteria-list">
            <li class="description__job-criteria-item">
              <h3 class="description__job-criteria-subheader">Seniority level</h3>
              <span class="description__job-criteria-text">Mid-Senior level</span>
            </li>
            <li class="description__job-criteria-item">
              <h3 class="description__job-criteria-subheader">Employment type</h3>
              <span class="description__job-criteria-text">Full-time</span>
            </li>
          </ul>
        </body></html>
    "#;

    fn adapter() -> LinkedInAdapter {
        LinkedInAdapter::new(SourceSettings::defaults_for(Site::LinkedIn), None)
    }

    fn page(body: &str) -> FetchedPage {
        FetchedPage {
            status: 200,
            final_url: "https://www.linkedin.com/jobs/view/3812345678".to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn search_cards_become_listings_and_bad_cards_are_counted() {
        let parsed = adapter()
            .parse_search_page(&page(SEARCH_FIXTURE), &PageCursor::Offset(20))
            .unwrap();

        assert_eq!(parsed.listings.len(), 2);
        assert_eq!(parsed.parse_failures.len(), 1);
        assert_eq!(parsed.next, Some(PageCursor::Offset(23)));

        let first = &parsed.listings[0];
        assert_eq!(first.external_id.as_deref(), Some("3812345678"));
        assert_eq!(first.job_url, "https://www.linkedin.com/jobs/view/3812345678");
        assert_eq!(first.title, "Production Support Engineer");
        assert_eq!(first.company, "Acme Corp");
        assert_eq!(first.location, "Pune, Maharashtra, India");
        assert_eq!(first.date_posted, NaiveDate::from_ymd_opt(2024, 5, 2));
        let pay = first.compensation.as_ref().unwrap();
        assert_eq!(pay.min_amount, Some(90_000.0));
        assert_eq!(pay.max_amount, Some(120_000.0));
        assert_eq!(pay.currency.as_deref(), Some("USD"));
        assert_eq!(pay.interval.as_deref(), Some("yearly"));

        assert_eq!(parsed.listings[1].title, "Site Reliability Engineer");
        assert_eq!(parsed.listings[1].company, "Globex");
    }

    #[test]
    fn empty_search_page_has_no_next_cursor() {
        let parsed = adapter()
            .parse_search_page(&page("<html></html>"), &PageCursor::Offset(0))
            .unwrap();
        assert!(parsed.listings.is_empty());
        assert!(parsed.next.is_none());
    }

    #[test]
    fn offsets_stop_at_the_cap() {
        let parsed = adapter()
            .parse_search_page(&page(SEARCH_FIXTURE), &PageCursor::Offset(998))
            .unwrap();
        assert!(parsed.next.is_none());
    }

    #[test]
    fn search_request_carries_filters() {
        let query = SearchQuery::new(
            vec!["sre".to_string(), "devops".to_string()],
            Some("India".to_string()),
            vec![Site::LinkedIn],
            10,
        )
        .unwrap()
        .with_remote_only(true)
        .with_hours_old(Some(24));

        let request = adapter().search_request(&query, &PageCursor::Offset(10));
        assert_eq!(request.query_value("keywords"), Some("\"sre\" OR \"devops\""));
        assert_eq!(request.query_value("location"), Some("India"));
        assert_eq!(request.query_value("f_WT"), Some("2"));
        assert_eq!(request.query_value("f_TPR"), Some("r86400"));
        assert_eq!(request.query_value("start"), Some("10"));
    }

    #[test]
    fn detail_page_yields_description_and_criteria() {
        let listing = RawListing::new(Site::LinkedIn, "https://www.linkedin.com/jobs/view/3812345678");
        let detail = adapter().parse_detail_page(&listing, &page(DETAIL_FIXTURE)).unwrap();

        assert!(detail.description.contains("Own Linux servers and SFTP transfers."));
        assert!(detail.description.contains("On-call rotation"));
        assert!(detail.raw_text.contains("<strong>Linux</strong>"));
        assert_eq!(detail.fields.get("seniority_level").map(String::as_str), Some("Mid-Senior level"));
        assert_eq!(detail.fields.get("employment_type").map(String::as_str), Some("Full-time"));
    }

    #[test]
    fn signup_redirect_rejects_the_detail() {
        let listing = RawListing::new(Site::LinkedIn, "https://www.linkedin.com/jobs/view/1");
        let redirected = FetchedPage {
            status: 200,
            final_url: "https://www.linkedin.com/signup/cold-join".to_string(),
            body: String::new(),
        };
        assert!(matches!(
            adapter().parse_detail_page(&listing, &redirected),
            Err(DetailFetchError::Rejected(_))
        ));
    }

    #[test]
    fn session_headers_are_attached() {
        let adapter = LinkedInAdapter::new(
            SourceSettings::defaults_for(Site::LinkedIn),
            Some(SessionHandle::from_cookie("li_at=abc")),
        );
        let listing = RawListing::new(Site::LinkedIn, "https://www.linkedin.com/jobs/view/1");
        let request = adapter.detail_request(&listing);
        assert!(request.headers.iter().any(|(name, _)| name == "cookie"));
    }

    #[tokio::test]
    async fn authwall_redirect_rejects_one_detail_and_keeps_the_source() {
        let adapter = adapter();
        let limiter = SourceLimiter::new(
            Site::LinkedIn,
            TokenBucket::unthrottled(),
            ProxyPool::new(vec![Arc::new(AuthwallFetcher)]),
            RetryPolicy::default(),
        );
        let first = RawListing::new(Site::LinkedIn, "https://www.linkedin.com/jobs/view/1");
        let second = RawListing::new(Site::LinkedIn, "https://www.linkedin.com/jobs/view/2");

        for listing in [&first, &second] {
            let result = fetch_detail(&adapter, &limiter, listing, Duration::from_secs(5)).await;
            assert!(matches!(result, Err(DetailFetchError::Rejected(_))));
        }
        assert!(!limiter.is_exhausted());
    }
}
