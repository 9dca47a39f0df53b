use chrono::NaiveDate;

use crate::error::{DetailFetchError, SourceError};
use crate::fetch::{FetchRequest, FetchedPage};
use crate::models::{JobDetail, RawListing, SearchQuery, Site};
use crate::traits::{ListingPage, PageCursor, SourceAdapter};

const SAMPLES: [(&str, &str, &str); 4] = [
    (
        "Production Support Engineer",
        "Pune (Hybrid)",
        "Production support for managed file transfer: Linux, SFTP, shell scripting and \
         ServiceNow incident handling under ITIL. Rotational on-call shift. 3-5 years.",
    ),
    (
        "Cloud Operations Engineer",
        "Remote",
        "Operate AWS workloads with Docker and CI/CD pipelines, Python automation and \
         monitoring. Fully remote. 4+ years.",
    ),
    (
        "Application Support Analyst",
        "Bengaluru",
        "L2 application support, SQL troubleshooting and Windows servers. \
         Work from office. 2-4 years.",
    ),
    (
        "Frontend Developer",
        "Hyderabad",
        "Build React interfaces with JavaScript, design systems and UI/UX reviews. \
         1-3 years.",
    ),
];

/// Deterministic stand-in for a real board, used for dry runs. Pairs with
/// the offline fetcher so nothing leaves the machine.
pub struct SyntheticAdapter {
    site: Site,
    sample_results: usize,
}

impl SyntheticAdapter {
    pub fn new(site: Site, sample_results: usize) -> Self {
        Self {
            site,
            sample_results,
        }
    }

    fn sample(&self, index: usize) -> RawListing {
        let (title, location, _) = SAMPLES[index % SAMPLES.len()];
        let mut listing = RawListing::new(
            self.site,
            format!("https://synthetic.invalid/{}/jobs/{index}", self.site),
        );
        listing.external_id = Some(format!("{}-{index}", self.site));
        listing.title = title.to_string();
        listing.company = format!("Sample Company {}", index + 1);
        listing.location = location.to_string();
        listing.date_posted = NaiveDate::from_ymd_opt(2024, 1, 1);
        listing
    }
}

impl SourceAdapter for SyntheticAdapter {
    fn site(&self) -> Site {
        self.site
    }

    fn result_cap(&self) -> usize {
        self.sample_results
    }

    fn max_pages(&self) -> usize {
        1
    }

    fn first_cursor(&self) -> PageCursor {
        PageCursor::Page(1)
    }

    fn search_request(&self, query: &SearchQuery, _cursor: &PageCursor) -> FetchRequest {
        FetchRequest::get(format!("https://synthetic.invalid/{}/search", self.site))
            .param("q", query.search_term())
    }

    fn parse_search_page(
        &self,
        _page: &FetchedPage,
        _cursor: &PageCursor,
    ) -> Result<ListingPage, SourceError> {
        Ok(ListingPage {
            listings: (0..self.sample_results).map(|index| self.sample(index)).collect(),
            parse_failures: Vec::new(),
            next: None,
        })
    }

    fn detail_request(&self, listing: &RawListing) -> FetchRequest {
        FetchRequest::get(listing.job_url.clone())
    }

    fn parse_detail_page(
        &self,
        listing: &RawListing,
        _page: &FetchedPage,
    ) -> Result<JobDetail, DetailFetchError> {
        let index = listing
            .job_url
            .rsplit('/')
            .next()
            .and_then(|tail| tail.parse::<usize>().ok())
            .ok_or(DetailFetchError::Empty)?;
        let (_, _, description) = SAMPLES[index % SAMPLES.len()];

        Ok(JobDetail {
            description: description.to_string(),
            raw_text: description.to_string(),
            ..Default::default()
        })
    }
}
