use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{error, info, warn};

use crate::error::SourceError;
use crate::limiter::SourceLimiter;
use crate::models::{RawListing, SearchQuery, Site};
use crate::sources::Discovery;
use crate::stats::{SourceReport, SourceStatus};
use crate::traits::SourceAdapter;

const DEADLINE_REASON: &str = "run deadline reached";

/// An adapter paired with the limiter every request to that source goes through.
#[derive(Clone)]
pub struct SourceHandle {
    pub adapter: Arc<dyn SourceAdapter>,
    pub limiter: Arc<SourceLimiter>,
}

impl SourceHandle {
    pub fn new(adapter: Arc<dyn SourceAdapter>, limiter: Arc<SourceLimiter>) -> Self {
        Self { adapter, limiter }
    }

    pub fn site(&self) -> Site {
        self.adapter.site()
    }
}

/// What one source produced, including the partial results of a failed run.
#[derive(Debug)]
pub struct SourceOutcome {
    pub site: Site,
    pub listings: Vec<RawListing>,
    pub report: SourceReport,
}

/// Fans discovery out over every active source, at most `concurrency` at a time.
///
/// A source that errors, gets exhausted or runs into the deadline keeps what
/// it collected so far and never cancels its siblings.
pub struct DiscoveryOrchestrator {
    concurrency: usize,
}

impl DiscoveryOrchestrator {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Outcomes come back in the query's declared source order.
    pub async fn discover(
        &self,
        query: &SearchQuery,
        sources: &[SourceHandle],
        deadline: Option<Instant>,
    ) -> Vec<SourceOutcome> {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let query = Arc::new(query.clone());
        let mut tasks = JoinSet::new();
        let mut task_sites = HashMap::new();

        for handle in sources {
            let handle = handle.clone();
            let permits = Arc::clone(&permits);
            let query = Arc::clone(&query);
            let site = handle.site();

            let abort = tasks.spawn(async move {
                let Some(Ok(_permit)) = within(deadline, permits.acquire_owned()).await else {
                    return deadline_outcome(&handle, Vec::new(), 0, 0);
                };
                discover_source(&handle, &query, deadline).await
            });
            task_sites.insert(abort.id(), site);
        }

        let mut outcomes = Vec::with_capacity(sources.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(join_error) => {
                    let Some(site) = task_sites.get(&join_error.id()).copied() else {
                        error!(error = %join_error, "discovery task failed");
                        continue;
                    };
                    error!(site = %site, error = %join_error, "discovery task failed");
                    outcomes.push(SourceOutcome {
                        site,
                        listings: Vec::new(),
                        report: SourceReport {
                            discovered: 0,
                            pages: 0,
                            parse_failures: 0,
                            blocked_events: 0,
                            status: SourceStatus::Errored(join_error.to_string()),
                        },
                    });
                }
            }
        }

        outcomes.sort_by_key(|outcome| query.site_rank(outcome.site));
        outcomes
    }
}

/// `None` once the deadline passes first.
async fn within<F: Future>(deadline: Option<Instant>, future: F) -> Option<F::Output> {
    match deadline {
        Some(deadline) => timeout_at(deadline, future).await.ok(),
        None => Some(future.await),
    }
}

async fn discover_source(
    handle: &SourceHandle,
    query: &SearchQuery,
    deadline: Option<Instant>,
) -> SourceOutcome {
    let site = handle.site();
    let mut discovery = Discovery::new(handle.adapter.as_ref(), handle.limiter.as_ref(), query);
    let mut listings = Vec::new();

    let failure = loop {
        let Some(next) = within(deadline, discovery.next_page()).await else {
            warn!(site = %site, collected = listings.len(), "deadline reached during discovery");
            return deadline_outcome(
                handle,
                listings,
                discovery.pages_fetched(),
                discovery.parse_failures(),
            );
        };
        match next {
            Ok(Some(batch)) => listings.extend(batch),
            Ok(None) => break None,
            Err(error) => break Some(error),
        }
    };

    let blocked_events = handle.limiter.blocked_events();
    let status = match &failure {
        None if blocked_events > 0 => SourceStatus::PartiallyBlocked,
        None => SourceStatus::Ok,
        Some(SourceError::Blocked(_) | SourceError::Skipped(_)) if handle.limiter.is_exhausted() => {
            SourceStatus::Exhausted
        }
        Some(error) => SourceStatus::Errored(error.to_string()),
    };
    if let Some(error) = &failure {
        warn!(site = %site, error = %error, collected = listings.len(), "source stopped early");
    }
    info!(site = %site, listings = listings.len(), status = %status, "discovery finished");

    SourceOutcome {
        site,
        report: SourceReport {
            discovered: listings.len(),
            pages: discovery.pages_fetched(),
            parse_failures: discovery.parse_failures(),
            blocked_events,
            status,
        },
        listings,
    }
}

fn deadline_outcome(
    handle: &SourceHandle,
    listings: Vec<RawListing>,
    pages: usize,
    parse_failures: usize,
) -> SourceOutcome {
    SourceOutcome {
        site: handle.site(),
        report: SourceReport {
            discovered: listings.len(),
            pages,
            parse_failures,
            blocked_events: handle.limiter.blocked_events(),
            status: SourceStatus::Errored(DEADLINE_REASON.to_string()),
        },
        listings,
    }
}
