use chrono::Local;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::dedup::dedupe;
use crate::enrichment::EnrichmentFetcher;
use crate::error::{ConfigError, PipelineError};
use crate::evaluator::ProfileMatchEvaluator;
use crate::features::FeatureExtractor;
use crate::fetch::{HttpFetcher, OfflineFetcher, PageFetcher, ProxyIdentity, SessionHandle};
use crate::limiter::{ProxyPool, RetryPolicy, SourceLimiter, TokenBucket};
use crate::models::{AlignmentLevel, ScoredJob, SearchQuery, Site};
use crate::orchestrator::{DiscoveryOrchestrator, SourceHandle};
use crate::output::{write_with_fallback, HookContext, HookOutcome, PostRunHook, PrimaryRow};
use crate::profile::Profile;
use crate::sources::{build_adapter, SourceSettings, SyntheticAdapter};
use crate::stats::RunStats;

/// What one run should do. Supplied by the caller, validated before any I/O.
#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    pub keywords: Vec<String>,
    pub location: Option<String>,
    /// Source names, in the order results should be consolidated.
    pub sources: Vec<String>,
    pub results_wanted: usize,
    pub output_path: PathBuf,
    /// Rows scoring below this are left out of the primary output.
    pub min_score: Option<u8>,
    pub dry_run: bool,
    pub remote_only: bool,
    pub hours_old: Option<u32>,
    /// Wall-clock budget for discovery plus enrichment.
    pub deadline: Option<Duration>,
}

impl RunConfig {
    pub fn new(keywords: Vec<String>, output_path: impl Into<PathBuf>) -> Self {
        Self {
            keywords,
            location: None,
            sources: Site::ALL.iter().map(|site| site.to_string()).collect(),
            results_wanted: 20,
            output_path: output_path.into(),
            min_score: None,
            dry_run: false,
            remote_only: false,
            hours_old: None,
            deadline: None,
        }
    }

    pub fn search_query(&self) -> Result<SearchQuery, ConfigError> {
        let sites = self
            .sources
            .iter()
            .map(|name| name.parse::<Site>())
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(min_score) = self.min_score.filter(|score| *score > 100) {
            return Err(ConfigError::InvalidArgument(format!(
                "minimum score {min_score} is above 100"
            )));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidArgument(
                "output path is empty".to_string(),
            ));
        }

        Ok(SearchQuery::new(
            self.keywords.clone(),
            self.location.clone(),
            sites,
            self.results_wanted,
        )?
        .with_remote_only(self.remote_only)
        .with_hours_old(self.hours_old))
    }
}

/// Knobs that stay fixed across runs.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub discovery_concurrency: usize,
    pub enrichment_concurrency: usize,
    pub detail_timeout: Duration,
    pub retry: RetryPolicy,
    /// Per-source overrides; missing sites use `SourceSettings::defaults_for`.
    pub sources: BTreeMap<Site, SourceSettings>,
    pub proxies: Vec<ProxyIdentity>,
    pub sessions: HashMap<Site, SessionHandle>,
    /// Listings per site emitted by a dry run.
    pub sample_results: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            discovery_concurrency: 4,
            enrichment_concurrency: 3,
            detail_timeout: Duration::from_secs(15),
            retry: RetryPolicy::default(),
            sources: BTreeMap::new(),
            proxies: Vec::new(),
            sessions: HashMap::new(),
            sample_results: 4,
        }
    }
}

impl PipelineSettings {
    pub fn source_settings(&self, site: Site) -> SourceSettings {
        self.sources
            .get(&site)
            .cloned()
            .unwrap_or_else(|| SourceSettings::defaults_for(site))
    }
}

#[derive(Debug)]
pub struct RunReport {
    /// Where the primary output actually landed.
    pub output_path: PathBuf,
    /// Every scored job, consolidated, before the minimum-score filter.
    pub jobs: Vec<ScoredJob>,
    pub stats: RunStats,
    pub hook_outcomes: Vec<HookOutcome>,
}

/// Sequences discovery, validation, dedup, enrichment, scoring and output.
pub struct PipelineController {
    evaluator: ProfileMatchEvaluator,
    extractor: FeatureExtractor,
    settings: PipelineSettings,
    injected_sources: Option<Vec<SourceHandle>>,
    hooks: Vec<Box<dyn PostRunHook>>,
}

impl PipelineController {
    pub fn new(profile: Profile, settings: PipelineSettings) -> Result<Self, ConfigError> {
        let evaluator = ProfileMatchEvaluator::new(profile)?;
        let extractor = FeatureExtractor::for_profile(evaluator.profile())?;
        Ok(Self {
            evaluator,
            extractor,
            settings,
            injected_sources: None,
            hooks: Vec::new(),
        })
    }

    /// Uses the given handles instead of building adapters from settings.
    pub fn with_sources(mut self, sources: Vec<SourceHandle>) -> Self {
        self.injected_sources = Some(sources);
        self
    }

    /// Hooks run after the primary write, in registration order.
    pub fn with_hook(mut self, hook: impl PostRunHook + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    pub fn profile(&self) -> &Profile {
        self.evaluator.profile()
    }

    pub async fn run(&self, config: &RunConfig) -> Result<RunReport, PipelineError> {
        let query = config.search_query()?;
        let sources = self.source_handles(&query, config.dry_run)?;
        let deadline = config.deadline.map(|budget| Instant::now() + budget);
        info!(
            keywords = ?query.keywords,
            sites = ?query.sites,
            results_wanted = query.results_wanted,
            dry_run = config.dry_run,
            "run started"
        );

        let mut stats = RunStats::default();
        let outcomes = DiscoveryOrchestrator::new(self.settings.discovery_concurrency)
            .discover(&query, &sources, deadline)
            .await;
        let mut listings = Vec::new();
        for outcome in outcomes {
            stats.record_source(outcome.site, outcome.report);
            listings.extend(outcome.listings);
        }

        let before = listings.len();
        listings.retain(|listing| !listing.job_url.trim().is_empty());
        stats.invalid_dropped = before - listings.len();

        let deduped = dedupe(listings);
        stats.duplicates_dropped = deduped.duplicates_dropped;

        let handles: HashMap<Site, SourceHandle> = sources
            .iter()
            .map(|handle| (handle.site(), handle.clone()))
            .collect();
        let enrichment = EnrichmentFetcher::new(
            self.settings.enrichment_concurrency,
            self.settings.detail_timeout,
        )
        .enrich(deduped.kept, &handles, &self.extractor, deadline)
        .await;
        stats.enriched = enrichment.enriched;
        stats.enrichment_failed = enrichment.failed;
        stats.enrichment_skipped = enrichment.skipped;

        let mut jobs: Vec<ScoredJob> = enrichment
            .jobs
            .into_iter()
            .map(|job| {
                let result = self.evaluator.evaluate(&job);
                if result.level == AlignmentLevel::Ignore {
                    debug!(level = %result.level, score = result.score, title = %job.listing.title, company = %job.listing.company, "rejected");
                } else {
                    info!(level = %result.level, score = result.score, title = %job.listing.title, company = %job.listing.company, "accepted");
                }
                ScoredJob { job, result }
            })
            .collect();
        for scored in &jobs {
            stats.record_level(scored.result.level);
        }
        stats.scored = jobs.len();
        jobs.sort_by_key(|scored| query.site_rank(scored.job.listing.site));

        let min_score = config.min_score.unwrap_or(0);
        let rows: Vec<PrimaryRow> = jobs
            .iter()
            .filter(|scored| scored.result.score >= min_score)
            .map(PrimaryRow::from)
            .collect();
        stats.filtered_below_minimum = jobs.len() - rows.len();
        let output_path = write_with_fallback(&config.output_path, &rows)?;
        stats.written = rows.len();

        let context = HookContext {
            jobs: &jobs,
            min_score: config.min_score,
            requested_path: &config.output_path,
            written_path: &output_path,
            generated_at: Local::now(),
        };
        let hook_outcomes = self
            .hooks
            .iter()
            .map(|hook| {
                let result = hook.run(&context).map_err(|error| error.to_string());
                match &result {
                    Ok(summary) => info!(hook = hook.name(), summary = %summary, "hook finished"),
                    Err(reason) => error!(hook = hook.name(), error = %reason, "hook failed"),
                }
                HookOutcome {
                    hook: hook.name().to_string(),
                    result,
                }
            })
            .collect();

        info!(
            discovered = stats.discovered(),
            enriched = stats.enriched,
            duplicates = stats.duplicates_dropped,
            written = stats.written,
            path = %output_path.display(),
            "run finished"
        );
        Ok(RunReport {
            output_path,
            jobs,
            stats,
            hook_outcomes,
        })
    }

    fn source_handles(
        &self,
        query: &SearchQuery,
        dry_run: bool,
    ) -> Result<Vec<SourceHandle>, ConfigError> {
        if let Some(injected) = &self.injected_sources {
            return Ok(query
                .sites
                .iter()
                .filter_map(|site| injected.iter().find(|handle| handle.site() == *site))
                .cloned()
                .collect());
        }

        query
            .sites
            .iter()
            .map(|site| {
                if dry_run {
                    self.synthetic_handle(*site)
                } else {
                    self.live_handle(*site)
                }
            })
            .collect()
    }

    fn synthetic_handle(&self, site: Site) -> Result<SourceHandle, ConfigError> {
        let fetcher: Arc<dyn PageFetcher> = Arc::new(OfflineFetcher);
        Ok(SourceHandle::new(
            Arc::new(SyntheticAdapter::new(site, self.settings.sample_results)),
            Arc::new(SourceLimiter::new(
                site,
                TokenBucket::unthrottled(),
                ProxyPool::new(vec![fetcher]),
                self.settings.retry,
            )),
        ))
    }

    fn live_handle(&self, site: Site) -> Result<SourceHandle, ConfigError> {
        let settings = self.settings.source_settings(site);
        let identities = if self.settings.proxies.is_empty() {
            vec![ProxyIdentity::Direct]
        } else {
            self.settings.proxies.clone()
        };
        let fetchers = HttpFetcher::pool(&identities, self.settings.detail_timeout)
            .map_err(|error| ConfigError::InvalidArgument(error.to_string()))?;
        let bucket = TokenBucket::new(settings.delay, settings.delay_band);
        let adapter = build_adapter(site, settings, self.settings.sessions.get(&site).cloned())?;

        Ok(SourceHandle::new(
            adapter,
            Arc::new(SourceLimiter::new(
                site,
                bucket,
                ProxyPool::new(fetchers),
                self.settings.retry,
            )),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DetailFetchError, FetchError, SourceError, WriteError};
    use crate::fetch::{FetchRequest, FetchedPage};
    use crate::models::{JobDetail, RawListing};
    use crate::output::{read_rows, DebugDumpHook};
    use crate::stats::SourceStatus;
    use crate::traits::{ListingPage, PageCursor, SourceAdapter};
    use async_trait::async_trait;
    use std::fs;
    use tempfile::tempdir;

    /// Serves a fixed set of (id, url, title) listings on a single page.
    struct ScriptedBoard {
        site: Site,
        listings: Vec<(&'static str, &'static str, &'static str)>,
    }

    impl SourceAdapter for ScriptedBoard {
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
            FetchRequest::get(format!("https://{}.test/search", self.site))
        }

        fn parse_search_page(
            &self,
            _page: &FetchedPage,
            _cursor: &PageCursor,
        ) -> Result<ListingPage, SourceError> {
            let listings = self
                .listings
                .iter()
                .map(|(id, url, title)| {
                    let mut listing = RawListing::new(self.site, *url);
                    listing.external_id = Some(id.to_string());
                    listing.title = title.to_string();
                    listing.company = "Acme".to_string();
                    listing
                })
                .collect();
            Ok(ListingPage {
                listings,
                parse_failures: Vec::new(),
                next: None,
            })
        }

        fn detail_request(&self, listing: &RawListing) -> FetchRequest {
            FetchRequest::get(listing.job_url.clone())
        }

        fn parse_detail_page(
            &self,
            _listing: &RawListing,
            page: &FetchedPage,
        ) -> Result<JobDetail, DetailFetchError> {
            Ok(JobDetail {
                description: page.body.clone(),
                raw_text: page.body.clone(),
                ..Default::default()
            })
        }
    }

    struct CannedFetcher {
        status: u16,
    }

    #[async_trait]
    impl PageFetcher for CannedFetcher {
        fn identity(&self) -> String {
            "canned".to_string()
        }

        async fn fetch(&self, request: &FetchRequest) -> Result<FetchedPage, FetchError> {
            Ok(FetchedPage {
                status: self.status,
                final_url: request.url.clone(),
                body: "Linux, SFTP and ServiceNow incident management for production support"
                    .to_string(),
            })
        }
    }

    struct BrokenHook;

    impl PostRunHook for BrokenHook {
        fn name(&self) -> &str {
            "broken"
        }

        fn run(&self, _context: &HookContext<'_>) -> Result<String, WriteError> {
            Err(WriteError::Io(std::io::Error::other("disk full")))
        }
    }

    fn scripted(
        site: Site,
        status: u16,
        listings: Vec<(&'static str, &'static str, &'static str)>,
    ) -> SourceHandle {
        let fetcher: Arc<dyn PageFetcher> = Arc::new(CannedFetcher { status });
        SourceHandle::new(
            Arc::new(ScriptedBoard { site, listings }),
            Arc::new(SourceLimiter::new(
                site,
                TokenBucket::unthrottled(),
                ProxyPool::new(vec![fetcher]),
                RetryPolicy::default(),
            )),
        )
    }

    fn keywords() -> Vec<String> {
        vec!["production support".to_string(), "linux".to_string()]
    }

    #[tokio::test]
    async fn dry_run_writes_every_synthetic_row() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let mut config = RunConfig::new(keywords(), dir.path().join("jobs.csv"));
        config.sources = vec!["naukri".to_string(), "LinkedIn".to_string()];
        config.dry_run = true;

        let controller = PipelineController::new(Profile::default(), PipelineSettings::default())?;
        let report = controller.run(&config).await?;

        assert_eq!(report.output_path, dir.path().join("jobs.csv"));
        assert_eq!(report.stats.discovered(), 8);
        assert_eq!(report.stats.duplicates_dropped, 0);
        assert_eq!(report.stats.enriched, 8);
        assert_eq!(report.stats.written, 8);
        assert!(report.stats.level_count(AlignmentLevel::Ignore) >= 2);
        assert_eq!(report.jobs[0].job.listing.site, Site::Naukri);
        assert_eq!(report.jobs[7].job.listing.site, Site::LinkedIn);

        let rows: Vec<PrimaryRow> = read_rows(&report.output_path)?;
        assert_eq!(rows.len(), 8);
        assert_eq!(rows[0].title, "Production Support Engineer");
        assert!(rows[0].match_score >= 45);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn partial_failures_never_abort_the_run() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let output = dir.path().join("jobs.csv");
        let mut config = RunConfig::new(keywords(), &output);
        config.min_score = Some(1);

        let sources = vec![
            scripted(Site::LinkedIn, 429, vec![("9", "https://linkedin.test/jobs/view/9", "Ops")]),
            scripted(
                Site::Naukri,
                200,
                vec![
                    ("1", "https://naukri.test/job/1", "Production Support Engineer"),
                    ("2", "", "Listing without a link"),
                    ("3", "https://naukri.test/job/3", "React Developer"),
                ],
            ),
            scripted(
                Site::RemoteRocketship,
                200,
                vec![("r1", "https://NAUKRI.test/job/1/?utm_source=feed", "Same posting")],
            ),
        ];
        let controller = PipelineController::new(Profile::default(), PipelineSettings::default())?
            .with_sources(sources)
            .with_hook(BrokenHook)
            .with_hook(DebugDumpHook::new(None));

        let report = controller.run(&config).await?;
        let stats = &report.stats;

        assert_eq!(stats.sources[&Site::LinkedIn].status, SourceStatus::Exhausted);
        assert_eq!(stats.sources[&Site::Naukri].status, SourceStatus::Ok);
        assert_eq!(stats.discovered(), 4);
        assert_eq!(stats.invalid_dropped, 1);
        assert_eq!(stats.duplicates_dropped, 1);
        assert_eq!(stats.enriched, 2);
        assert_eq!(stats.scored, 2);
        assert_eq!(stats.filtered_below_minimum, 1);
        assert_eq!(stats.written, 1);

        let rows: Vec<PrimaryRow> = read_rows(&report.output_path)?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "Production Support Engineer");

        assert_eq!(report.hook_outcomes.len(), 2);
        assert_eq!(report.hook_outcomes[0].hook, "broken");
        assert!(report.hook_outcomes[0].result.is_err());
        assert!(report.hook_outcomes[1].result.is_ok());

        let dumps = fs::read_dir(dir.path())?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("jobs_debug_"))
            .count();
        assert_eq!(dumps, 1);
        Ok(())
    }

    #[tokio::test]
    async fn locked_output_is_reported_with_the_path_used() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let requested = dir.path().join("jobs.csv");
        fs::create_dir(&requested)?;
        let mut config = RunConfig::new(keywords(), &requested);
        config.sources = vec!["remoterocketship".to_string()];
        config.dry_run = true;

        let controller = PipelineController::new(Profile::default(), PipelineSettings::default())?;
        let report = controller.run(&config).await?;
        assert_eq!(report.output_path, dir.path().join("jobs_final.csv"));
        assert_eq!(report.stats.written, 4);
        Ok(())
    }

    #[tokio::test]
    async fn configuration_errors_stop_before_any_fetch() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let controller = PipelineController::new(Profile::default(), PipelineSettings::default())?;

        let empty = RunConfig::new(vec!["  ".to_string()], dir.path().join("jobs.csv"));
        assert!(matches!(
            controller.run(&empty).await,
            Err(PipelineError::Config(ConfigError::EmptyKeywords))
        ));

        let mut unknown = RunConfig::new(keywords(), dir.path().join("jobs.csv"));
        unknown.sources = vec!["monster".to_string()];
        assert!(matches!(
            controller.run(&unknown).await,
            Err(PipelineError::Config(ConfigError::UnknownSource(name))) if name == "monster"
        ));

        assert!(!dir.path().join("jobs.csv").exists());
        Ok(())
    }

    #[test]
    fn overrides_win_over_source_defaults() {
        let mut settings = PipelineSettings::default();
        let custom = SourceSettings::defaults_for(Site::Naukri).unthrottled();
        settings.sources.insert(Site::Naukri, custom.clone());

        assert_eq!(settings.source_settings(Site::Naukri), custom);
        assert_eq!(
            settings.source_settings(Site::LinkedIn),
            SourceSettings::defaults_for(Site::LinkedIn)
        );
    }
}
