//! # dotcapture Prelude
//!
//! The types needed to embed `dotcapture` in a host: the orchestrator, its payloads, the
//! traits the host implements, and the boxing results handed to probes.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all dotcapture operations
pub use crate::Error;

/// The result type used throughout dotcapture
pub use crate::Result;

// ================================================================================================
// Orchestration
// ================================================================================================

/// Admission handle, consumer loop and the collaborators they are wired to
pub use crate::capture::{CaptureServices, CapturingLoop, CapturingOrchestrator};

/// Configuration of the orchestrator
pub use crate::capture::CaptureConfig;

/// Requests and their lifecycle
pub use crate::capture::{
    CapturingRequest, CapturingRequestPayload, RequestId, RequestState, StopReason,
};

/// Traits implemented by the host runtime
pub use crate::capture::{
    CaptureSurface, CapturingCallbacks, FailureReason, MethodDescriptionValidator,
    MethodResolver, ProbeManager, ProbeValue,
};

// ================================================================================================
// Metadata and Classification
// ================================================================================================

/// Method identities and descriptions
pub use crate::metadata::method::{MethodDescription, MethodId, ModuleId, ResolvedMethod};

/// Declared type information
pub use crate::metadata::typesystem::{ParameterInfo, PrimitiveKind, TypeShape};

/// Metadata tokens
pub use crate::metadata::token::Token;

/// Per-parameter boxing results
pub use crate::boxing::{MethodBoxingInstructions, ParameterBoxingInstruction};

/// Classification and blob decoding
pub use crate::boxing::{SignatureClassifier, SignatureDecoder};
