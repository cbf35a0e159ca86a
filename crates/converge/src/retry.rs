//! Retry policy for eventually-consistent operations
//!
//! Tasks signal a transient condition with [`Error::TryAgainLater`], either
//! directly or through a [`RetryClassifier`] that maps cloud error codes. The
//! scheduler requeues such tasks with exponential backoff until
//! `max_attempts` is reached.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

use crate::error::{Error, Phase};

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per task, the first one included
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Default::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Cloud errors that carry a machine-readable code
pub trait ErrorCode {
    fn code(&self) -> Option<&str>;
}

/// Maps cloud error codes to `TryAgainLater`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryClassifier {
    codes: BTreeSet<String>,
}

impl RetryClassifier {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            codes: codes.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_retryable(&self, code: &str) -> bool {
        self.codes.contains(code)
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.codes.iter().map(String::as_str)
    }

    /// Classify an error raised during `phase` of `task`
    pub fn classify<E>(&self, task: &str, phase: Phase, err: E) -> Error
    where
        E: ErrorCode + std::error::Error + Send + Sync + 'static,
    {
        if let Some(code) = err.code()
            && self.is_retryable(code)
        {
            log::debug!("{task}: {phase} returned retryable code {code}: {err}");
            return Error::try_again_later(err.to_string());
        }
        match phase {
            Phase::Discover => Error::discovery(task, err),
            Phase::Render => Error::render(task, err),
        }
    }
}
