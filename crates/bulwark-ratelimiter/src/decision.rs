use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Outcome of one admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    /// Whether the request is admitted.
    pub allowed: bool,
    /// Capacity of the bucket that was checked.
    pub limit: u32,
    /// Whole tokens left after the check.
    pub remaining: u32,
    /// When allowed, when the bucket will be full again. When denied, when
    /// the request could succeed.
    pub reset_at: SystemTime,
    /// Set when denied: how long to wait before retrying.
    pub retry_after: Option<Duration>,
    /// True if the shared store was unavailable and this instance enforced
    /// the budget on its own.
    pub degraded: bool,
}

impl RateLimitDecision {
    /// HTTP status for this decision: 200 when allowed, 429 when denied.
    pub fn status_code(&self) -> u16 {
        if self.allowed {
            200
        } else {
            429
        }
    }

    /// Response headers describing this decision.
    ///
    /// `X-RateLimit-Reset` is a unix timestamp in seconds. `Retry-After` is
    /// only present on denial and is rounded up to whole seconds.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let reset = self
            .reset_at
            .duration_since(UNIX_EPOCH)
            .map(ceil_secs)
            .unwrap_or(0);

        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", reset.to_string()),
        ];
        if let Some(retry_after) = self.retry_after {
            headers.push(("Retry-After", ceil_secs(retry_after).max(1).to_string()));
        }
        headers
    }
}

fn ceil_secs(d: Duration) -> u64 {
    if d.subsec_nanos() > 0 {
        d.as_secs() + 1
    } else {
        d.as_secs()
    }
}
