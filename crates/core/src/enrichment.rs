use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::error::DetailFetchError;
use crate::features::{FeatureExtractor, ListingHints};
use crate::models::{EnrichedJob, EnrichmentStatus, JobDetail, RawListing, Site};
use crate::orchestrator::SourceHandle;
use crate::sources;
use crate::text::description_text;

const DEADLINE_REASON: &str = "run deadline reached";

/// Every listing handed in comes back exactly once, in input order.
#[derive(Debug, Default)]
pub struct EnrichmentReport {
    pub jobs: Vec<EnrichedJob>,
    pub enriched: usize,
    pub failed: usize,
    pub skipped: usize,
}

enum Outcome {
    Detail(JobDetail, EnrichmentStatus),
    Fallback(EnrichmentStatus),
}

/// Fetches full detail for discovered listings through each source's limiter,
/// then runs feature extraction.
///
/// Fetches interleave across sources under one concurrency cap. A listing
/// whose fetch fails, times out or is skipped keeps its summary fields and
/// is flagged unenriched; it is never dropped.
#[derive(Debug, Clone)]
pub struct EnrichmentFetcher {
    concurrency: usize,
    timeout: Duration,
}

impl EnrichmentFetcher {
    pub fn new(concurrency: usize, timeout: Duration) -> Self {
        Self {
            concurrency: concurrency.max(1),
            timeout,
        }
    }

    pub async fn enrich(
        &self,
        listings: Vec<RawListing>,
        sources: &HashMap<Site, SourceHandle>,
        extractor: &FeatureExtractor,
        deadline: Option<Instant>,
    ) -> EnrichmentReport {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut outcomes: Vec<Option<Outcome>> = Vec::with_capacity(listings.len());
        let mut tasks = JoinSet::new();

        for (index, listing) in listings.iter().enumerate() {
            let Some(handle) = sources.get(&listing.site) else {
                outcomes.push(Some(Outcome::Fallback(EnrichmentStatus::Skipped(format!(
                    "no active adapter for {}",
                    listing.site
                )))));
                continue;
            };
            if let Some(detail) = handle.adapter.detail_in_listing(listing) {
                outcomes.push(Some(Outcome::Detail(detail, EnrichmentStatus::FromListing)));
                continue;
            }

            outcomes.push(None);
            let handle = handle.clone();
            let listing = listing.clone();
            let permits = Arc::clone(&permits);
            let timeout = self.timeout;
            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => {
                        sources::fetch_detail(
                            handle.adapter.as_ref(),
                            handle.limiter.as_ref(),
                            &listing,
                            timeout,
                        )
                        .await
                    }
                    Err(_) => Err(DetailFetchError::Timeout),
                };
                (index, result)
            });
        }

        loop {
            let joined = match deadline {
                Some(deadline) => match timeout_at(deadline, tasks.join_next()).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        warn!(pending = tasks.len(), "deadline reached during enrichment");
                        tasks.abort_all();
                        break;
                    }
                },
                None => tasks.join_next().await,
            };
            let Some(joined) = joined else {
                break;
            };
            match joined {
                Ok((index, result)) => {
                    let url = &listings[index].job_url;
                    let outcome = match result {
                        Ok(detail) => Outcome::Detail(detail, EnrichmentStatus::Enriched),
                        Err(DetailFetchError::Skipped(site)) => {
                            debug!(url = %url, site = %site, "enrichment skipped");
                            Outcome::Fallback(EnrichmentStatus::Skipped(format!(
                                "{site} exhausted for this run"
                            )))
                        }
                        Err(error) => {
                            warn!(url = %url, reason = %error, "enrichment failed");
                            Outcome::Fallback(EnrichmentStatus::Failed(error.to_string()))
                        }
                    };
                    outcomes[index] = Some(outcome);
                }
                Err(join_error) => {
                    warn!(error = %join_error, "enrichment task failed");
                }
            }
        }

        let mut report = EnrichmentReport::default();
        for (listing, outcome) in listings.into_iter().zip(outcomes) {
            let outcome = outcome.unwrap_or_else(|| {
                Outcome::Fallback(EnrichmentStatus::Failed(DEADLINE_REASON.to_string()))
            });
            let job = build_job(extractor, listing, outcome);
            match &job.enrichment {
                EnrichmentStatus::Enriched | EnrichmentStatus::FromListing => report.enriched += 1,
                EnrichmentStatus::Failed(_) => report.failed += 1,
                EnrichmentStatus::Skipped(_) => report.skipped += 1,
            }
            report.jobs.push(job);
        }
        report
    }
}

fn build_job(extractor: &FeatureExtractor, listing: RawListing, outcome: Outcome) -> EnrichedJob {
    let (detail, status) = match outcome {
        Outcome::Detail(detail, status) => (Some(detail), status),
        Outcome::Fallback(status) => (None, status),
    };

    let description = match &detail {
        Some(detail) if !detail.description.trim().is_empty() => detail.description.clone(),
        _ => listing
            .short_description
            .as_deref()
            .map(description_text)
            .unwrap_or_default(),
    };
    let raw_text = detail
        .as_ref()
        .map(|detail| detail.raw_text.clone())
        .filter(|raw| !raw.trim().is_empty());

    let mut skill_hints = listing.skill_hints.clone();
    if let Some(detail) = &detail {
        skill_hints.extend(detail.skill_hints.iter().cloned());
    }
    let hints = ListingHints {
        is_remote: listing
            .is_remote
            .or_else(|| detail.as_ref().and_then(|detail| detail.is_remote)),
        work_mode: listing
            .work_mode
            .or_else(|| detail.as_ref().and_then(|detail| detail.work_mode)),
        skills: &skill_hints,
        experience: listing.experience_hint.as_deref(),
        location: &listing.location,
    };
    let features = extractor.extract(&format!("{}\n{}", listing.title, description), &hints);

    let fields = detail.map(|detail| detail.fields).unwrap_or_default();
    let mut job = EnrichedJob::new(listing, description, raw_text, features, status);
    for (key, value) in fields {
        job.extras.entry(key).or_insert(value);
    }
    job
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FetchError, SourceError};
    use crate::fetch::{FetchRequest, FetchedPage, PageFetcher};
    use crate::features::SkillVocabulary;
    use crate::limiter::{ProxyPool, RetryPolicy, SourceLimiter, TokenBucket};
    use crate::models::{SearchQuery, WorkMode};
    use crate::traits::{ListingPage, PageCursor, SourceAdapter};
    use async_trait::async_trait;

    /// Detail pages echo the body; listings whose title says "inline" carry
    /// their own description.
    struct EchoBoard {
        site: Site,
    }

    impl SourceAdapter for EchoBoard {
        fn site(&self) -> Site {
            self.site
        }

        fn result_cap(&self) -> usize {
            100
        }

        fn max_pages(&self) -> usize {
            1
        }

        fn first_cursor(&self) -> PageCursor {
            PageCursor::Page(1)
        }

        fn search_request(&self, _query: &SearchQuery, _cursor: &PageCursor) -> FetchRequest {
            FetchRequest::get("https://board.test/search")
        }

        fn parse_search_page(
            &self,
            _page: &FetchedPage,
            _cursor: &PageCursor,
        ) -> Result<ListingPage, SourceError> {
            Ok(ListingPage::default())
        }

        fn detail_request(&self, listing: &RawListing) -> FetchRequest {
            FetchRequest::get(listing.job_url.clone())
        }

        fn parse_detail_page(
            &self,
            _listing: &RawListing,
            page: &FetchedPage,
        ) -> Result<JobDetail, DetailFetchError> {
            let mut detail = JobDetail {
                description: page.body.clone(),
                raw_text: format!("<p>{}</p>", page.body),
                ..Default::default()
            };
            detail
                .fields
                .insert("seniority_level".to_string(), "Mid-Senior level".to_string());
            Ok(detail)
        }

        fn detail_in_listing(&self, listing: &RawListing) -> Option<JobDetail> {
            listing.title.contains("inline").then(|| JobDetail {
                description: "inline python work, remote".to_string(),
                ..Default::default()
            })
        }
    }

    struct BodyFetcher {
        status: u16,
        body: &'static str,
        latency: Duration,
    }

    #[async_trait]
    impl PageFetcher for BodyFetcher {
        fn identity(&self) -> String {
            "body".to_string()
        }

        async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, FetchError> {
            tokio::time::sleep(self.latency).await;
            Ok(FetchedPage {
                status: self.status,
                final_url: request.url.clone(),
                body: self.body.to_string(),
            })
        }
    }

    fn handle(site: Site, status: u16, body: &'static str, latency: Duration) -> SourceHandle {
        SourceHandle::new(
            Arc::new(EchoBoard { site }),
            Arc::new(SourceLimiter::new(
                site,
                TokenBucket::unthrottled(),
                ProxyPool::new(vec![Arc::new(BodyFetcher { status, body, latency })]),
                RetryPolicy::default(),
            )),
        )
    }

    fn listing(site: Site, index: usize, title: &str) -> RawListing {
        let mut listing = RawListing::new(site, format!("https://board.test/{site}/{index}"));
        listing.external_id = Some(index.to_string());
        listing.title = title.to_string();
        listing.short_description = Some("<b>Linux</b> support role".to_string());
        listing
    }

    fn extractor() -> FeatureExtractor {
        FeatureExtractor::new(SkillVocabulary::new(["python", "aws", "linux"])).unwrap()
    }

    #[tokio::test]
    async fn successful_fetches_are_extracted_and_keep_order() {
        let sources = HashMap::from([(
            Site::Naukri,
            handle(Site::Naukri, 200, "AWS and Python, 3-5 years", Duration::ZERO),
        )]);
        let listings = vec![
            listing(Site::Naukri, 0, "First"),
            listing(Site::Naukri, 1, "inline role"),
            listing(Site::Naukri, 2, "Third"),
        ];

        let report = EnrichmentFetcher::new(2, Duration::from_secs(15))
            .enrich(listings, &sources, &extractor(), None)
            .await;

        assert_eq!(report.jobs.len(), 3);
        assert_eq!(report.enriched, 3);
        let titles: Vec<&str> = report.jobs.iter().map(|job| job.listing.title.as_str()).collect();
        assert_eq!(titles, vec!["First", "inline role", "Third"]);

        let first = &report.jobs[0];
        assert_eq!(first.enrichment, EnrichmentStatus::Enriched);
        assert!(first.skills.contains("aws"));
        assert_eq!(first.experience.map(|range| range.to_string()).as_deref(), Some("3-5 years"));
        assert_eq!(first.extras.get("seniority_level").map(String::as_str), Some("Mid-Senior level"));
        assert!(first.raw_text.is_some());

        let inline = &report.jobs[1];
        assert_eq!(inline.enrichment, EnrichmentStatus::FromListing);
        assert_eq!(inline.work_mode, Some(WorkMode::Remote));
    }

    #[tokio::test]
    async fn failed_fetches_fall_back_to_summary_fields() {
        let sources = HashMap::from([(
            Site::LinkedIn,
            handle(Site::LinkedIn, 500, "", Duration::ZERO),
        )]);
        let report = EnrichmentFetcher::new(3, Duration::from_secs(15))
            .enrich(vec![listing(Site::LinkedIn, 0, "Ops")], &sources, &extractor(), None)
            .await;

        assert_eq!(report.failed, 1);
        let job = &report.jobs[0];
        assert_eq!(job.enrichment.label(), "failed");
        assert_eq!(job.description, "Linux support role");
        assert!(job.skills.contains("linux"));
        assert!(job.raw_text.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_sources_are_skipped_without_dropping_listings() {
        let sources = HashMap::from([(
            Site::LinkedIn,
            handle(Site::LinkedIn, 429, "", Duration::ZERO),
        )]);
        let listings = (0..3).map(|index| listing(Site::LinkedIn, index, "Ops")).collect();

        let report = EnrichmentFetcher::new(1, Duration::from_secs(15))
            .enrich(listings, &sources, &extractor(), None)
            .await;

        assert_eq!(report.jobs.len(), 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 2);
    }

    #[tokio::test]
    async fn listings_without_a_source_are_skipped() {
        let report = EnrichmentFetcher::new(1, Duration::from_secs(15))
            .enrich(
                vec![listing(Site::RemoteRocketship, 0, "Ops")],
                &HashMap::new(),
                &extractor(),
                None,
            )
            .await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.jobs[0].listing.title, "Ops");
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_demotes_in_flight_fetches() {
        let sources = HashMap::from([(
            Site::Naukri,
            handle(Site::Naukri, 200, "python", Duration::from_secs(5)),
        )]);
        let listings = (0..4).map(|index| listing(Site::Naukri, index, "Ops")).collect();
        let deadline = Instant::now() + Duration::from_secs(7);

        let report = EnrichmentFetcher::new(2, Duration::from_secs(15))
            .enrich(listings, &sources, &extractor(), Some(deadline))
            .await;

        assert_eq!(report.jobs.len(), 4);
        assert_eq!(report.enriched, 2);
        assert_eq!(report.failed, 2);
        assert_eq!(
            report.jobs[3].enrichment,
            EnrichmentStatus::Failed(DEADLINE_REASON.to_string())
        );
    }
}
