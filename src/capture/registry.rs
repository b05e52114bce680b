use std::sync::Arc;

use dashmap::{mapref::entry::Entry, DashMap};

use crate::{
    capture::{CapturingRequest, RequestId, RequestState},
    Error, Result,
};

/// Concurrency-safe map of in-flight requests.
///
/// Submission inserts, the consumer loop removes, and the stop and probe-fault paths look
/// requests up, all from different threads. This is the only structure in the orchestrator
/// that more than one actor mutates.
#[derive(Debug, Default)]
pub struct RequestRegistry {
    requests: DashMap<RequestId, Arc<CapturingRequest>>,
}

impl RequestRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a request.
    ///
    /// # Errors
    /// Returns [`Error::DuplicateRequest`] if a request with the same id is already tracked.
    pub fn try_insert(&self, request: Arc<CapturingRequest>) -> Result<()> {
        match self.requests.entry(request.id()) {
            Entry::Occupied(entry) => Err(Error::DuplicateRequest(*entry.key())),
            Entry::Vacant(entry) => {
                entry.insert(request);
                Ok(())
            }
        }
    }

    /// Look up a request by id
    #[must_use]
    pub fn get(&self, id: &RequestId) -> Option<Arc<CapturingRequest>> {
        self.requests.get(id).map(|entry| entry.value().clone())
    }

    /// Stop tracking a request
    pub fn remove(&self, id: &RequestId) -> Option<Arc<CapturingRequest>> {
        self.requests.remove(id).map(|(_, request)| request)
    }

    /// The request whose probes are currently installed, if any. This includes a request
    /// that is stopping but has not finished removing them.
    #[must_use]
    pub fn active(&self) -> Option<Arc<CapturingRequest>> {
        self.requests
            .iter()
            .find(|entry| entry.value().state().has_probes())
            .map(|entry| entry.value().clone())
    }

    /// Number of tracked requests
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Returns true if no request is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
