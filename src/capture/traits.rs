//! Interfaces of the collaborators the orchestrator drives but does not implement.

use std::sync::Arc;

use async_trait::async_trait;
use strum::Display;
use tokio_util::sync::CancellationToken;

use crate::{
    boxing::MethodBoxingInstructions,
    capture::{CaptureSurface, CapturingRequest, RequestId},
    metadata::method::{MethodDescription, ResolvedMethod},
    Result,
};

/// Why a request could not capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum FailureReason {
    /// At least one description resolved to no method
    UnresolvedMethods,
    /// The policy engine refused at least one method
    DeniedMethods,
    /// The pending slot was occupied
    TooManyRequests,
    /// Anything unexpected, typically from the probe manager
    InternalError,
}

/// Installs and removes the native probes.
#[async_trait]
pub trait ProbeManager: Send + Sync {
    /// Install probes for `methods`. Probes report every invocation to `surface`.
    async fn start_capturing(
        &self,
        methods: &[MethodBoxingInstructions],
        surface: Arc<dyn CaptureSurface>,
        token: &CancellationToken,
    ) -> Result<()>;

    /// Remove every installed probe.
    async fn stop_capturing(&self, token: &CancellationToken) -> Result<()>;
}

/// Allow-list and deny-list policy over targetable methods.
pub trait MethodDescriptionValidator: Send + Sync {
    /// Returns true if `description` may be captured
    fn is_allowed(&self, description: &MethodDescription) -> bool;
}

/// Maps operator descriptions onto concrete methods of the running process.
pub trait MethodResolver: Send + Sync {
    /// Every method matching `description`, possibly none and possibly several overloads.
    ///
    /// # Errors
    /// Returns an error if the host failed to inspect its loaded modules.
    fn resolve(&self, description: &MethodDescription) -> Result<Vec<ResolvedMethod>>;
}

/// Outbound notifications to the control plane.
///
/// Exactly one of `on_capturing_stop` or `on_failed_to_capture` is delivered for every
/// request that reaches a terminal state.
pub trait CapturingCallbacks: Send + Sync {
    /// Probes are installed and capturing
    fn on_capturing_start(&self, request: &CapturingRequest, methods: &[MethodBoxingInstructions]);

    /// Probes were removed, or the request was stopped before it became active
    fn on_capturing_stop(&self, request_id: RequestId);

    /// The request failed
    fn on_failed_to_capture(&self, request_id: RequestId, reason: FailureReason, details: &str);

    /// A probe installed for `method` faulted
    fn on_probe_fault(&self, request_id: RequestId, method: &ResolvedMethod);
}
