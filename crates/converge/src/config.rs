//! Engine configuration

use std::time::Duration;

use crate::lifecycle::LifecyclePolicy;
use crate::retry::{RetryClassifier, RetryConfig};

/// Default bound on a single find or render call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Options for one run of the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker threads; tasks beyond this many wait for a free worker
    pub jobs: usize,
    /// Backoff and attempt ceiling for `TryAgainLater`
    pub retry: RetryConfig,
    /// Bound on each find and render call; a call past it fails the task
    pub call_timeout: Duration,
    /// Cloud error codes treated as transient
    pub classifier: RetryClassifier,
    pub lifecycle: LifecyclePolicy,
    /// Discover and diff only; render is never called
    pub dry_run: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            jobs: 4,
            retry: RetryConfig::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            classifier: RetryClassifier::default(),
            lifecycle: LifecyclePolicy::default(),
            dry_run: false,
        }
    }
}

impl EngineConfig {
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_retryable_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.classifier = RetryClassifier::new(codes);
        self
    }

    pub fn with_lifecycle_policy(mut self, policy: LifecyclePolicy) -> Self {
        self.lifecycle = policy;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.jobs, 4);
        assert_eq!(config.call_timeout, Duration::from_secs(300));
        assert!(!config.dry_run);
        assert!(config.lifecycle.create_missing_on_warn);
    }

    #[test]
    fn test_call_timeout_override() {
        let config = EngineConfig::default().with_call_timeout(Duration::from_millis(50));
        assert_eq!(config.call_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_jobs_never_zero() {
        assert_eq!(EngineConfig::default().with_jobs(0).jobs, 1);
    }
}
