//! Request orchestration for runtime parameter capturing.
//!
//! A control plane asks for the arguments of a handful of methods to be captured for a
//! bounded time. This module admits such requests, runs them strictly one at a time, installs
//! and removes probes through a host supplied [`ProbeManager`], and reports every outcome
//! through [`CapturingCallbacks`].
//!
//! # Key Components
//!
//! - [`CapturingOrchestrator`] - thread-safe admission and control handle
//! - [`CapturingLoop`] - the single consumer that drives each request to completion
//! - [`CapturingRequest`] - a tracked request, its [`RequestState`] and [`StopSignal`]
//! - [`RequestRegistry`] - concurrent map of in-flight requests
//! - [`CaptureLimitGuard`] - capture-count circuit breaker around a [`CaptureSurface`]
//! - [`CaptureConfig`] - admission bounds and classification settings
//!
//! # Lifecycle
//!
//! ```text
//! Pending -> Validating -> Resolving -> Active -> Stopping -> Completed
//!                |             |           |          |
//!                v             v           v          v
//!             Denied        Faulted     Faulted    Faulted
//! ```
//!
//! Exactly one of [`CapturingCallbacks::on_capturing_stop`] or
//! [`CapturingCallbacks::on_failed_to_capture`] is delivered per request. Requests cancelled
//! by shutdown complete normally.
//!
//! # Thread Safety
//!
//! Admission, stop and probe-fault reporting may be called from any thread. Probes call the
//! [`CaptureSurface`] inline on application threads; the limit guard never blocks them.

mod config;
mod guard;
mod orchestrator;
mod registry;
mod request;
mod traits;

pub use config::CaptureConfig;
pub use guard::{CaptureLimitGuard, CaptureSurface, ProbeValue};
pub use orchestrator::{CaptureServices, CapturingLoop, CapturingOrchestrator};
pub use registry::RequestRegistry;
pub use request::{
    CapturingRequest, CapturingRequestPayload, RequestId, RequestState, StopReason, StopSignal,
};
pub use traits::{
    CapturingCallbacks, FailureReason, MethodDescriptionValidator, MethodResolver, ProbeManager,
};
