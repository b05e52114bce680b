//! Orchestrator configuration

use std::time::Duration;

use crate::boxing::MAX_RECURSION_DEPTH;

/// Configuration for the capturing orchestrator
///
/// Request payloads are checked against it at admission; the consumer loop uses it to set up
/// classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Longest duration a single request may ask for (default: one hour)
    pub max_duration: Duration,

    /// Capture limit applied to requests that carry none (default: unlimited)
    pub default_capture_limit: Option<u64>,

    /// Recursion bound for nested types in signature blobs (default: 50)
    pub max_signature_depth: usize,

    /// Classify the resolved methods of a request in parallel (default: true)
    pub parallel_classification: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_secs(60 * 60),
            default_capture_limit: None,
            max_signature_depth: MAX_RECURSION_DEPTH,
            parallel_classification: true,
        }
    }
}

impl CaptureConfig {
    /// A conservative configuration for production processes
    ///
    /// Bounds every request to ten minutes and a thousand captures, and classifies on the
    /// consumer thread only so that no worker pool competes with the monitored application.
    #[must_use]
    pub fn production() -> Self {
        Self {
            max_duration: Duration::from_secs(10 * 60),
            default_capture_limit: Some(1_000),
            max_signature_depth: MAX_RECURSION_DEPTH,
            parallel_classification: false,
        }
    }

    /// Override the maximum request duration
    #[must_use]
    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }

    /// Override the default capture limit
    #[must_use]
    pub fn with_default_capture_limit(mut self, limit: Option<u64>) -> Self {
        self.default_capture_limit = limit;
        self
    }
}
