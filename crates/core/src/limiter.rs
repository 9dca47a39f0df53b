use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::error::Throttled;
use crate::fetch::PageFetcher;
use crate::models::Site;

/// Bounded retry with exponential backoff, applied to block responses only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff to wait after the given (1-based) failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Request spacing for one source: each request waits for its slot, and slots
/// are `delay` plus a deterministic spread inside `[0, jitter)` apart.
#[derive(Debug)]
pub struct TokenBucket {
    delay: Duration,
    jitter: Duration,
    next_slot: Mutex<Option<Instant>>,
    issued: AtomicU64,
}

impl TokenBucket {
    pub fn new(delay: Duration, jitter: Duration) -> Self {
        Self {
            delay,
            jitter,
            next_slot: Mutex::new(None),
            issued: AtomicU64::new(0),
        }
    }

    pub fn unthrottled() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    fn spacing(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.delay;
        }
        let sequence = self.issued.fetch_add(1, Ordering::Relaxed);
        let spread = sequence.wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 11;
        self.delay + Duration::from_millis(spread % jitter_ms)
    }

    /// Waits until this caller may send its request.
    pub async fn acquire(&self) {
        let slot = {
            let mut next_slot = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next_slot {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next_slot = Some(slot + self.spacing());
            slot
        };
        sleep_until(slot).await;
    }
}

/// Ordered egress identities for one source. Rotation is a shared cursor.
pub struct ProxyPool {
    fetchers: Vec<Arc<dyn PageFetcher>>,
    cursor: AtomicUsize,
}

impl ProxyPool {
    pub fn new(fetchers: Vec<Arc<dyn PageFetcher>>) -> Self {
        Self {
            fetchers,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.fetchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty()
    }

    pub fn current(&self) -> Option<Arc<dyn PageFetcher>> {
        if self.fetchers.is_empty() {
            return None;
        }
        let index = self.cursor.load(Ordering::Acquire) % self.fetchers.len();
        Some(Arc::clone(&self.fetchers[index]))
    }

    /// Moves to the next identity and returns its label.
    pub fn rotate(&self) -> Option<String> {
        if self.fetchers.is_empty() {
            return None;
        }
        let index = (self.cursor.fetch_add(1, Ordering::AcqRel) + 1) % self.fetchers.len();
        Some(self.fetchers[index].identity())
    }
}

/// Throttle, identity rotation and exhaustion state for a single source.
///
/// Shared by every discovery and enrichment worker of that source; all
/// mutable state sits behind the bucket's mutex or atomics.
pub struct SourceLimiter {
    site: Site,
    bucket: TokenBucket,
    pool: ProxyPool,
    policy: RetryPolicy,
    exhausted: AtomicBool,
    blocked_events: AtomicU32,
}

impl SourceLimiter {
    pub fn new(site: Site, bucket: TokenBucket, pool: ProxyPool, policy: RetryPolicy) -> Self {
        Self {
            site,
            bucket,
            pool,
            policy,
            exhausted: AtomicBool::new(false),
            blocked_events: AtomicU32::new(0),
        }
    }

    pub fn site(&self) -> Site {
        self.site
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::Acquire)
    }

    pub fn blocked_events(&self) -> u32 {
        self.blocked_events.load(Ordering::Acquire)
    }

    fn mark_exhausted(&self) {
        if !self.exhausted.swap(true, Ordering::AcqRel) {
            warn!(site = %self.site, "source exhausted, skipping it for the rest of the run");
        }
    }

    /// Runs one request-level operation under this source's policy.
    ///
    /// Block errors rotate to the next identity and back off while attempts
    /// remain; with a single identity, or once attempts run out, the source
    /// is marked exhausted. Other errors are returned untouched.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        E: Throttled + Display,
        F: FnMut(Arc<dyn PageFetcher>) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            if self.is_exhausted() {
                return Err(E::source_skipped(self.site));
            }
            let Some(fetcher) = self.pool.current() else {
                self.mark_exhausted();
                return Err(E::source_skipped(self.site));
            };

            self.bucket.acquire().await;
            let identity = fetcher.identity();
            let error = match operation(fetcher).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            let Some(blocked) = error.blocked() else {
                return Err(error);
            };
            self.blocked_events.fetch_add(1, Ordering::AcqRel);
            warn!(
                site = %self.site,
                status = ?blocked.status,
                marker = ?blocked.marker,
                identity = %identity,
                attempt,
                "request blocked"
            );

            if self.pool.len() > 1 && attempt < self.policy.max_attempts {
                let backoff = self.policy.backoff(attempt);
                if let Some(next) = self.pool.rotate() {
                    info!(site = %self.site, identity = %next, backoff_ms = backoff.as_millis() as u64, "rotating identity");
                }
                sleep(backoff).await;
                attempt += 1;
                continue;
            }

            debug!(site = %self.site, attempts = attempt, "no rotation left");
            self.mark_exhausted();
            return Err(error);
        }
    }
}
