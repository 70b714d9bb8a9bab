//! Request pacing for the TMDB APIs.
//!
//! TMDB answers bursts with 429 and a `Retry-After` in seconds. Each API
//! generation gets its own [`Throttle`]: a governor gate that is swapped for a
//! slower one when TMDB pushes back, and swapped back once it has been quiet
//! for a minute.

use std::future::Future;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::header::{HeaderMap, RETRY_AFTER};

use crate::gateway::ApiError;

type Gate = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Largest factor the request interval is stretched by.
const MAX_SLOWDOWN: u32 = 16;
/// Quiet time after the last 429 before full speed returns.
const RECOVERY_WINDOW: Duration = Duration::from_secs(60);
/// Wait used when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_WAIT: Duration = Duration::from_secs(2);
/// Wait used for an HTTP-date `Retry-After`.
const HTTP_DATE_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVersion {
    V3,
    V4,
}

impl ApiVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            ApiVersion::V3 => "v3",
            ApiVersion::V4 => "v4",
        }
    }
}

fn gate(interval: Duration) -> Gate {
    let quota = Quota::with_period(interval).unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN));
    Gate::direct(quota)
}

pub struct Throttle {
    gate: ArcSwap<Gate>,
    interval: Duration,
    slowdown: AtomicU32,
    throttled_at: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(requests_per_second: u32) -> Self {
        let millis = (1000 / u64::from(requests_per_second.max(1))).max(1);
        let interval = Duration::from_millis(millis);
        Self {
            gate: ArcSwap::from_pointee(gate(interval)),
            interval,
            slowdown: AtomicU32::new(1),
            throttled_at: Mutex::new(None),
        }
    }

    /// Current stretch factor of the request interval.
    pub fn slowdown(&self) -> u32 {
        self.slowdown.load(Ordering::SeqCst)
    }

    pub async fn ready(&self) {
        self.recover();
        self.gate.load().until_ready().await;
    }

    /// TMDB returned 429: halve the pace, down to 1/[`MAX_SLOWDOWN`].
    pub fn back_off(&self) {
        if let Ok(mut at) = self.throttled_at.lock() {
            *at = Some(Instant::now());
        }
        let previous = self
            .slowdown
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |f| {
                Some((f * 2).min(MAX_SLOWDOWN))
            })
            .unwrap_or(MAX_SLOWDOWN);
        let factor = (previous * 2).min(MAX_SLOWDOWN);
        if let Some(stretched) = self.interval.checked_mul(factor) {
            self.gate.store(Arc::new(gate(stretched)));
        }
    }

    fn recover(&self) {
        if self.slowdown() == 1 {
            return;
        }
        let quiet = self
            .throttled_at
            .lock()
            .ok()
            .and_then(|at| at.map(|t| t.elapsed() >= RECOVERY_WINDOW))
            .unwrap_or(false);
        if quiet {
            self.slowdown.store(1, Ordering::SeqCst);
            self.gate.store(Arc::new(gate(self.interval)));
        }
    }
}

/// One throttle per API generation.
pub struct RateLimiters {
    v3: Throttle,
    v4: Throttle,
}

impl Default for RateLimiters {
    fn default() -> Self {
        Self::new(crate::DEFAULT_REQUESTS_PER_SECOND)
    }
}

impl RateLimiters {
    pub fn new(requests_per_second: u32) -> Self {
        Self {
            v3: Throttle::new(requests_per_second),
            v4: Throttle::new(requests_per_second),
        }
    }

    pub fn get(&self, version: ApiVersion) -> &Throttle {
        match version {
            ApiVersion::V3 => &self.v3,
            ApiVersion::V4 => &self.v4,
        }
    }
}

/// `Retry-After` as TMDB sends it (whole seconds). HTTP dates are not parsed;
/// they get a fixed wait.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    match value.parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(_) if value.ends_with("GMT") => Some(HTTP_DATE_WAIT),
        Err(_) => None,
    }
}

/// Turn a 429 into [`ApiError::RateLimited`] before the body is read.
pub fn reject_rate_limited(resp: &reqwest::Response) -> Result<(), ApiError> {
    if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(ApiError::RateLimited {
            retry_after: retry_after(resp.headers()),
        });
    }
    Ok(())
}

/// Send `call` through `throttle`. A 429 slows the throttle down, waits for
/// `Retry-After` (never longer than `timeout`) and sends once more; whatever
/// the second attempt returns is final.
pub async fn with_rate_limit<T, F, Fut>(
    throttle: &Throttle,
    label: &str,
    timeout: Duration,
    mut call: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    throttle.ready().await;
    let retry_after = match call().await {
        Err(ApiError::RateLimited { retry_after }) => retry_after,
        other => return other,
    };

    throttle.back_off();
    let wait = retry_after.unwrap_or(DEFAULT_RETRY_WAIT).min(timeout);
    tracing::info!(
        request = label,
        wait_ms = wait.as_millis() as u64,
        slowdown = throttle.slowdown(),
        "tmdb rate limit hit, retrying"
    );
    tokio::time::sleep(wait).await;

    throttle.ready().await;
    call().await
}
