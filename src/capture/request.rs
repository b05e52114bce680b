use std::{
    fmt,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, OnceLock,
    },
    time::Duration,
};

use strum::{Display, FromRepr};
use tokio_util::sync::CancellationToken;
use uguid::Guid;

use crate::{boxing::MethodBoxingInstructions, metadata::method::MethodDescription};

/// Unique identity of a capturing request, assigned by the control plane.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(Guid);

impl RequestId {
    /// Wrap an existing GUID
    #[must_use]
    pub const fn new(guid: Guid) -> Self {
        RequestId(guid)
    }

    /// Build an id from the big-endian bytes of a 128-bit value
    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        RequestId(Guid::from_bytes(value.to_be_bytes()))
    }

    /// Parse the canonical `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx` form
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        Guid::try_parse(text).ok().map(RequestId)
    }

    /// The underlying GUID
    #[must_use]
    pub fn guid(&self) -> Guid {
        self.0
    }
}

impl From<Guid> for RequestId {
    fn from(guid: Guid) -> Self {
        RequestId(guid)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", self.0)
    }
}

/// What a control plane submits to start capturing.
#[derive(Debug, Clone)]
pub struct CapturingRequestPayload {
    /// Identity of the request
    pub request_id: RequestId,
    /// Methods to capture
    pub methods: Vec<MethodDescription>,
    /// How long probes stay installed
    pub duration: Duration,
    /// Stop after this many captures
    pub capture_limit: Option<u64>,
}

/// Why a request stopped capturing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum StopReason {
    /// The control plane asked for it
    Explicit,
    /// The requested duration elapsed
    DurationElapsed,
    /// The capture limit was reached
    LimitReached,
    /// The orchestrator was shut down
    Shutdown,
    /// The request was rejected and never became active
    Cancelled,
}

/// A one-shot stop signal with several independent resolvers.
///
/// Explicit stop, duration timeout, the capture limit and shutdown all race on the same
/// signal; only the first [`StopSignal::resolve`] has any effect.
#[derive(Debug, Default)]
pub struct StopSignal {
    reason: OnceLock<StopReason>,
    resolved: CancellationToken,
}

impl StopSignal {
    /// Create an unresolved signal
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve the signal. Returns `true` only for the call that actually resolved it.
    pub fn resolve(&self, reason: StopReason) -> bool {
        if self.reason.set(reason).is_ok() {
            self.resolved.cancel();
            true
        } else {
            false
        }
    }

    /// The winning reason, once resolved
    #[must_use]
    pub fn reason(&self) -> Option<StopReason> {
        self.reason.get().copied()
    }

    /// Returns true once any resolver has fired
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.reason.get().is_some()
    }

    /// Wait until the signal is resolved and return the winning reason.
    pub async fn wait(&self) -> StopReason {
        self.resolved.cancelled().await;
        // The reason is recorded before the token is cancelled
        self.reason().unwrap_or(StopReason::Cancelled)
    }
}

/// Lifecycle of a capturing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
#[repr(u8)]
pub enum RequestState {
    /// Created, not yet checked
    Pending,
    /// Policy checks passed or in progress; waiting for the consumer
    Validating,
    /// Method descriptions are being resolved and classified
    Resolving,
    /// Probes are installed
    Active,
    /// Probes are being removed
    Stopping,
    /// Finished normally, or cancelled by shutdown
    Completed,
    /// Failed after admission
    Faulted,
    /// Rejected at admission
    Denied,
}

impl RequestState {
    /// Returns true for states a request never leaves
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Completed | RequestState::Faulted | RequestState::Denied
        )
    }

    /// Returns true while the request's probes are installed
    #[must_use]
    pub fn has_probes(&self) -> bool {
        matches!(self, RequestState::Active | RequestState::Stopping)
    }
}

/// A capturing request as tracked by the orchestrator.
pub struct CapturingRequest {
    id: RequestId,
    methods: Vec<MethodDescription>,
    duration: Duration,
    capture_limit: Option<u64>,
    stop: StopSignal,
    state: AtomicU8,
    instrumented: OnceLock<Arc<[MethodBoxingInstructions]>>,
}

impl CapturingRequest {
    /// Create a pending request from a submitted payload
    #[must_use]
    pub fn new(payload: CapturingRequestPayload) -> Self {
        CapturingRequest {
            id: payload.request_id,
            methods: payload.methods,
            duration: payload.duration,
            capture_limit: payload.capture_limit,
            stop: StopSignal::new(),
            state: AtomicU8::new(RequestState::Pending as u8),
            instrumented: OnceLock::new(),
        }
    }

    /// Identity of the request
    #[must_use]
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Requested methods
    #[must_use]
    pub fn methods(&self) -> &[MethodDescription] {
        &self.methods
    }

    /// How long probes stay installed
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Maximum number of captures, if any
    #[must_use]
    pub fn capture_limit(&self) -> Option<u64> {
        self.capture_limit
    }

    /// The request's one-shot stop signal
    #[must_use]
    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> RequestState {
        RequestState::from_repr(self.state.load(Ordering::Acquire))
            .unwrap_or(RequestState::Faulted)
    }

    pub(crate) fn set_state(&self, state: RequestState) {
        let previous = self.state.swap(state as u8, Ordering::AcqRel);
        tracing::debug!(
            request_id = %self.id,
            from = ?RequestState::from_repr(previous),
            to = %state,
            "Request state changed"
        );
    }

    /// Methods that were instrumented for this request, once it became active
    #[must_use]
    pub fn instrumented(&self) -> Option<&[MethodBoxingInstructions]> {
        self.instrumented.get().map(AsRef::as_ref)
    }

    pub(crate) fn set_instrumented(&self, methods: Arc<[MethodBoxingInstructions]>) {
        // The consumer loop sets this once per request
        let _ = self.instrumented.set(methods);
    }
}

impl fmt::Debug for CapturingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapturingRequest")
            .field("id", &self.id)
            .field("methods", &self.methods.len())
            .field("duration", &self.duration)
            .field("capture_limit", &self.capture_limit)
            .field("state", &self.state())
            .field("stop", &self.stop.reason())
            .finish()
    }
}
