use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};
use regex::Regex;
use scraper::Html;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

use super::{first_html, SourceSettings};
use crate::error::{ConfigError, DetailFetchError, ParseError, SourceError};
use crate::fetch::{FetchRequest, FetchedPage};
use crate::models::{Compensation, JobDetail, RawListing, SearchQuery, Site, WorkMode};
use crate::text::{contains_term, description_text};
use crate::traits::{ListingPage, PageCursor, SourceAdapter};

const BASE_URL: &str = "https://www.naukri.com";
const SEARCH_URL: &str = "https://www.naukri.com/jobapi/v3/search";
const SALARY_PATTERN: &str = r"(?i)(\d+(?:\.\d+)?)\s*-\s*(\d+(?:\.\d+)?)\s*(lacs|lakhs?|cr)";
const DESCRIPTION_SELECTORS: [&str; 3] = [
    "[class*='dang-inner-html']",
    "section.job-desc",
    "div.job-desc",
];

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "jobDetails", default)]
    job_details: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NaukriJob {
    job_id: Value,
    #[serde(default)]
    title: String,
    #[serde(default)]
    company_name: String,
    #[serde(rename = "jdURL", default)]
    jd_url: Option<String>,
    #[serde(default)]
    placeholders: Vec<Placeholder>,
    #[serde(default)]
    tags_and_skills: Option<String>,
    #[serde(default)]
    experience_text: Option<String>,
    #[serde(default)]
    job_description: Option<String>,
    #[serde(default)]
    ambition_box_data: Option<AmbitionBox>,
    #[serde(default)]
    vacancy: Option<Value>,
    #[serde(default)]
    footer_placeholder_label: Option<String>,
    #[serde(default)]
    created_date: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct Placeholder {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    label: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AmbitionBox {
    #[serde(default)]
    aggregate_rating: Option<Value>,
    #[serde(default)]
    reviews_count: Option<Value>,
}

impl NaukriJob {
    fn placeholder(&self, kind: &str) -> Option<&str> {
        self.placeholders
            .iter()
            .find(|placeholder| placeholder.kind == kind)
            .map(|placeholder| placeholder.label.trim())
            .filter(|label| !label.is_empty())
    }
}

/// Naukri's JSON search API. The search record already carries the full
/// description, so most listings never need a detail request.
pub struct NaukriAdapter {
    settings: SourceSettings,
    salary_re: Regex,
}

impl NaukriAdapter {
    pub fn new(settings: SourceSettings) -> Result<Self, ConfigError> {
        Ok(Self {
            settings,
            salary_re: Regex::new(SALARY_PATTERN)?,
        })
    }

    fn to_listing(&self, record: Value) -> Result<RawListing, String> {
        let job: NaukriJob = serde_json::from_value(record).map_err(|error| error.to_string())?;
        let job_id = scalar_text(&job.job_id).ok_or_else(|| "record without jobId".to_string())?;

        let job_url = match job.jd_url.as_deref().map(str::trim) {
            Some(url) if url.starts_with("http") => url.to_string(),
            Some(path) if path.starts_with('/') => format!("{BASE_URL}{path}"),
            _ => format!("{BASE_URL}/job/{job_id}"),
        };
        let mut listing = RawListing::new(Site::Naukri, job_url);

        let description = job
            .job_description
            .as_deref()
            .map(description_text)
            .filter(|text| !text.is_empty());
        let location = job.placeholder("location").unwrap_or_default().to_string();
        let work_mode = infer_work_mode(&location, &job.title, description.as_deref().unwrap_or_default());

        listing.external_id = Some(job_id);
        listing.title = job.title.trim().to_string();
        listing.company = job.company_name.trim().to_string();
        listing.compensation = job
            .placeholder("salary")
            .and_then(|label| self.parse_salary(label));
        listing.experience_hint = job
            .experience_text
            .clone()
            .or_else(|| job.placeholder("experience").map(str::to_string));
        listing.skill_hints = job
            .tags_and_skills
            .as_deref()
            .map(|tags| {
                tags.split(',')
                    .map(str::trim)
                    .filter(|tag| !tag.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        listing.date_posted = posted_on(
            job.footer_placeholder_label.as_deref(),
            job.created_date,
            listing.discovered_at,
        );
        listing.work_mode = work_mode;
        listing.is_remote = work_mode.map(|mode| mode == WorkMode::Remote);
        listing.extras = company_extras(&job);
        listing.location = location;
        listing.short_description = description;

        if listing.title.is_empty() {
            return Err(format!("job {} has no title", listing.job_url));
        }
        Ok(listing)
    }

    /// "8 - 15 Lacs P.A." -> INR 800000..1500000 yearly.
    fn parse_salary(&self, label: &str) -> Option<Compensation> {
        let captures = self.salary_re.captures(label)?;
        let min: f64 = captures.get(1)?.as_str().parse().ok()?;
        let max: f64 = captures.get(2)?.as_str().parse().ok()?;
        let unit = match captures.get(3)?.as_str().to_lowercase().as_str() {
            "cr" => 10_000_000.0,
            _ => 100_000.0,
        };

        Some(Compensation {
            min_amount: Some(min * unit),
            max_amount: Some(max * unit),
            currency: Some("INR".to_string()),
            interval: Some("yearly".to_string()),
        })
    }
}

impl SourceAdapter for NaukriAdapter {
    fn site(&self) -> Site {
        Site::Naukri
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
        let term = query.search_term();
        let seo_key = format!("{}-jobs", term.to_lowercase().replace(' ', "-"));
        let mut request = FetchRequest::get(SEARCH_URL)
            .param("noOfResults", self.settings.page_size)
            .param("urlType", "search_by_keyword")
            .param("searchType", "adv")
            .param("keyword", &term)
            .param("pageNo", page_of(cursor))
            .param("k", &term)
            .param("seoKey", seo_key)
            .param("src", "jobsearchDesk");
        if let Some(location) = &query.location {
            request = request.param("location", location);
        }
        if query.remote_only {
            request = request.param("remote", "true");
        }
        if let Some(hours) = query.hours_old {
            request = request.param("days", (hours / 24).max(1));
        }

        request
            .header("accept", "application/json")
            .header("accept-language", "en-US,en;q=0.9")
            .header("appid", "109")
            .header("systemid", "Naukri")
    }

    fn parse_search_page(
        &self,
        page: &FetchedPage,
        cursor: &PageCursor,
    ) -> Result<ListingPage, SourceError> {
        if page.body.trim().is_empty() {
            return Ok(ListingPage::default());
        }
        let response: SearchResponse =
            serde_json::from_str(&page.body).map_err(|error| SourceError::Parse {
                site: Site::Naukri,
                details: error.to_string(),
            })?;

        let mut result = ListingPage::default();
        if response.job_details.is_empty() {
            return Ok(result);
        }

        for record in response.job_details {
            match self.to_listing(record) {
                Ok(listing) => result.listings.push(listing),
                Err(details) => result.parse_failures.push(ParseError {
                    site: Site::Naukri,
                    details,
                }),
            }
        }

        let current = page_of(cursor);
        if (current as usize) < self.settings.max_pages {
            result.next = Some(PageCursor::Page(current + 1));
        }
        Ok(result)
    }

    fn detail_request(&self, listing: &RawListing) -> FetchRequest {
        FetchRequest::get(listing.job_url.clone())
            .header("accept", "text/html,application/xhtml+xml")
            .header("accept-language", "en-US,en;q=0.9")
    }

    fn parse_detail_page(
        &self,
        listing: &RawListing,
        page: &FetchedPage,
    ) -> Result<JobDetail, DetailFetchError> {
        let document = Html::parse_document(&page.body);
        let raw_html = first_html(document.root_element(), &DESCRIPTION_SELECTORS)
            .ok_or(DetailFetchError::Empty)?;
        let description = description_text(&raw_html);
        if description.is_empty() {
            return Err(DetailFetchError::Empty);
        }

        Ok(JobDetail {
            work_mode: listing.work_mode,
            is_remote: listing.is_remote,
            skill_hints: listing.skill_hints.clone(),
            description,
            raw_text: raw_html,
            fields: listing.extras.clone(),
        })
    }

    fn detail_in_listing(&self, listing: &RawListing) -> Option<JobDetail> {
        let description = listing.short_description.clone()?;
        Some(JobDetail {
            raw_text: description.clone(),
            description,
            fields: listing.extras.clone(),
            is_remote: listing.is_remote,
            work_mode: listing.work_mode,
            skill_hints: listing.skill_hints.clone(),
        })
    }
}

fn page_of(cursor: &PageCursor) -> u32 {
    match cursor {
        PageCursor::Page(page) => *page,
        _ => 1,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn company_extras(job: &NaukriJob) -> BTreeMap<String, String> {
    let mut extras = BTreeMap::new();
    if let Some(ambition) = &job.ambition_box_data {
        if let Some(rating) = ambition.aggregate_rating.as_ref().and_then(scalar_text) {
            extras.insert("company_rating".to_string(), rating);
        }
        if let Some(reviews) = ambition.reviews_count.as_ref().and_then(scalar_text) {
            extras.insert("company_reviews_count".to_string(), reviews);
        }
    }
    if let Some(vacancy) = job.vacancy.as_ref().and_then(scalar_text) {
        extras.insert("vacancy_count".to_string(), vacancy);
    }
    extras
}

/// Hybrid beats remote; office only when the text says so.
fn infer_work_mode(location: &str, title: &str, description: &str) -> Option<WorkMode> {
    let haystack = format!("{location}\n{title}\n{description}").to_lowercase();
    if contains_term(&haystack, "hybrid") {
        Some(WorkMode::Hybrid)
    } else if contains_term(&haystack, "remote") || contains_term(&haystack, "work from home") {
        Some(WorkMode::Remote)
    } else if contains_term(&haystack, "work from office") {
        Some(WorkMode::Onsite)
    } else {
        None
    }
}

/// "Today", "Just now", "3 days ago" or the epoch-millis `createdDate`.
fn posted_on(label: Option<&str>, created_ms: Option<i64>, now: DateTime<Utc>) -> Option<NaiveDate> {
    let from_created =
        || created_ms.and_then(DateTime::<Utc>::from_timestamp_millis).map(|created| created.date_naive());

    let Some(label) = label.map(str::to_lowercase) else {
        return from_created();
    };
    if label.contains("today") || label.contains("just now") || label.contains("few hours") {
        return Some(now.date_naive());
    }
    if label.contains("ago") {
        let days = label
            .split_whitespace()
            .zip(label.split_whitespace().skip(1))
            .find(|(_, unit)| unit.starts_with("day"))
            .and_then(|(count, _)| count.trim_end_matches('+').parse::<i64>().ok());
        if let Some(days) = days {
            return Some((now - ChronoDuration::days(days)).date_naive());
        }
    }
    from_created()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::fetch::PageFetcher;
    use crate::limiter::{ProxyPool, RetryPolicy, SourceLimiter, TokenBucket};
    use crate::sources::Discovery;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Arc;

    const SECURITY_JOBS: &str = r#"{
        "noOfJobs": 2,
        "jobDetails": [
            {
                "jobId": "1001",
                "title": "SOC Analyst",
                "companyName": "Acme Tech",
                "jdURL": "/job-listings-soc-analyst-1001",
                "jobDescription": "<p>Triage alerts and escalate unusual traffic to the SOC team.</p>"
            },
            {
                "jobId": "1002",
                "title": "Fraud Engineer",
                "companyName": "Globex",
                "jdURL": "/job-listings-fraud-engineer-1002",
                "jobDescription": "<p>Tune captcha thresholds on the login flow.</p>"
            }
        ]
    }"#;

    struct JsonFetcher(&'static str);

    #[async_trait]
    impl PageFetcher for JsonFetcher {
        fn identity(&self) -> String {
            "direct".to_string()
        }

        async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, FetchError> {
            Ok(FetchedPage {
                status: 200,
                final_url: request.url.clone(),
                body: self.0.to_string(),
            })
        }
    }

    const SEARCH_FIXTURE: &str = r#"{
        "noOfJobs": 2,
        "jobDetails": [
            {
                "jobId": "070524500123",
                "title": "Production Support Engineer",
                "companyName": "Acme Tech",
                "jdURL": "/job-listings-production-support-engineer-acme-070524500123",
                "placeholders": [
                    {"type": "experience", "label": "3-6 Yrs"},
                    {"type": "salary", "label": "8 - 15 Lacs P.A."},
                    {"type": "location", "label": "Pune (Hybrid)"}
                ],
                "tagsAndSkills": "Linux,SFTP, ServiceNow ,ITIL",
                "jobDescription": "<p>Support <b>MFT</b> flows.</p><p>Work from office twice a week.</p>",
                "ambitionBoxData": {"AggregateRating": "3.9", "ReviewsCount": 120},
                "vacancy": 2,
                "footerPlaceholderLabel": "3 Days Ago"
            },
            {
                "title": "Missing id"
            }
        ]
    }"#;

    fn adapter() -> NaukriAdapter {
        NaukriAdapter::new(SourceSettings::defaults_for(Site::Naukri)).unwrap()
    }

    fn page(body: &str) -> FetchedPage {
        FetchedPage {
            status: 200,
            final_url: SEARCH_URL.to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn records_map_to_listings_with_hints_and_extras() {
        let parsed = adapter()
            .parse_search_page(&page(SEARCH_FIXTURE), &PageCursor::Page(1))
            .unwrap();

        assert_eq!(parsed.listings.len(), 1);
        assert_eq!(parsed.parse_failures.len(), 1);
        assert_eq!(parsed.next, Some(PageCursor::Page(2)));

        let listing = &parsed.listings[0];
        assert_eq!(listing.external_id.as_deref(), Some("070524500123"));
        assert_eq!(
            listing.job_url,
            "https://www.naukri.com/job-listings-production-support-engineer-acme-070524500123"
        );
        assert_eq!(listing.location, "Pune (Hybrid)");
        assert_eq!(listing.work_mode, Some(WorkMode::Hybrid));
        assert_eq!(listing.is_remote, Some(false));
        assert_eq!(listing.experience_hint.as_deref(), Some("3-6 Yrs"));
        assert_eq!(listing.skill_hints, vec!["Linux", "SFTP", "ServiceNow", "ITIL"]);
        assert_eq!(listing.extras.get("company_rating").map(String::as_str), Some("3.9"));
        assert_eq!(listing.extras.get("company_reviews_count").map(String::as_str), Some("120"));
        assert_eq!(listing.extras.get("vacancy_count").map(String::as_str), Some("2"));
        assert_eq!(
            listing.short_description.as_deref(),
            Some("Support MFT flows.\nWork from office twice a week.")
        );

        let pay = listing.compensation.as_ref().unwrap();
        assert_eq!(pay.min_amount, Some(800_000.0));
        assert_eq!(pay.max_amount, Some(1_500_000.0));
        assert_eq!(pay.currency.as_deref(), Some("INR"));
    }

    #[test]
    fn empty_job_array_ends_paging() {
        let parsed = adapter()
            .parse_search_page(&page(r#"{"jobDetails": []}"#), &PageCursor::Page(4))
            .unwrap();
        assert!(parsed.listings.is_empty());
        assert!(parsed.next.is_none());
    }

    #[test]
    fn unreadable_body_is_a_source_parse_error() {
        let result = adapter().parse_search_page(&page("<html>maintenance</html>"), &PageCursor::Page(1));
        assert!(matches!(result, Err(SourceError::Parse { .. })));
    }

    #[test]
    fn last_allowed_page_has_no_next_cursor() {
        let parsed = adapter()
            .parse_search_page(&page(SEARCH_FIXTURE), &PageCursor::Page(50))
            .unwrap();
        assert!(parsed.next.is_none());
    }

    #[test]
    fn description_in_listing_skips_the_detail_request() {
        let parsed = adapter()
            .parse_search_page(&page(SEARCH_FIXTURE), &PageCursor::Page(1))
            .unwrap();
        let detail = adapter().detail_in_listing(&parsed.listings[0]).unwrap();
        assert!(detail.description.starts_with("Support MFT flows."));
        assert_eq!(detail.skill_hints.len(), 4);

        let bare = RawListing::new(Site::Naukri, "https://www.naukri.com/job/1");
        assert!(adapter().detail_in_listing(&bare).is_none());
    }

    #[test]
    fn request_uses_page_numbers_and_page_size() {
        let query = SearchQuery::new(vec!["mft support".to_string()], None, vec![Site::Naukri], 40)
            .unwrap()
            .with_hours_old(Some(72));
        let request = adapter().search_request(&query, &PageCursor::Page(3));
        assert_eq!(request.query_value("pageNo"), Some("3"));
        assert_eq!(request.query_value("noOfResults"), Some("20"));
        assert_eq!(request.query_value("seoKey"), Some("mft-support-jobs"));
        assert_eq!(request.query_value("days"), Some("3"));
        assert!(request.query_value("location").is_none());
    }

    #[test]
    fn relative_dates_are_resolved_against_discovery_time() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        assert_eq!(posted_on(Some("3 Days Ago"), None, now), NaiveDate::from_ymd_opt(2024, 5, 7));
        assert_eq!(posted_on(Some("Just now"), None, now), NaiveDate::from_ymd_opt(2024, 5, 10));
        assert_eq!(
            posted_on(None, Some(1_714_521_600_000), now),
            NaiveDate::from_ymd_opt(2024, 5, 1)
        );
    }

    #[test]
    fn detail_page_is_parsed_when_the_search_record_had_no_description() {
        let listing = RawListing::new(Site::Naukri, "https://www.naukri.com/job/1");
        let body = r#"<html><section class="styles_job-desc-container__txpYf">
            <div class="styles_JDC__dang-inner-html__h0K4t"><p>Linux on-call support</p></div>
        </section></html>"#;
        let detail = adapter().parse_detail_page(&listing, &page(body)).unwrap();
        assert_eq!(detail.description, "Linux on-call support");
    }

    #[tokio::test]
    async fn job_text_about_captchas_is_not_a_block() {
        let adapter = adapter();
        let limiter = SourceLimiter::new(
            Site::Naukri,
            TokenBucket::unthrottled(),
            ProxyPool::new(vec![Arc::new(JsonFetcher(SECURITY_JOBS))]),
            RetryPolicy::default(),
        );
        let query = SearchQuery::new(vec!["soc".to_string()], None, vec![Site::Naukri], 2).unwrap();

        let mut discovery = Discovery::new(&adapter, &limiter, &query);
        let listings = discovery.next_page().await.unwrap().unwrap_or_default();

        assert_eq!(listings.len(), 2);
        assert!(!limiter.is_exhausted());
        assert_eq!(limiter.blocked_events(), 0);
    }
}
