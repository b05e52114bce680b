use std::time::Duration;

use thiserror::Error;

use crate::{capture::RequestId, metadata::method::MethodDescription};

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds
    };
}

/// Joins method descriptions into a single, human readable list.
pub(crate) fn describe_methods(methods: &[MethodDescription]) -> String {
    methods
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// # Error Categories
///
/// ## Signature Decoding Errors
/// - [`Error::Malformed`] - Corrupted or invalid signature blob
/// - [`Error::OutOfBounds`] - Attempted to read beyond the end of a blob
/// - [`Error::RecursionLimit`] - Nested type signature exceeds the depth bound
///
/// These never leave the [`crate::boxing`] module: a decode failure degrades a parameter to
/// [`crate::boxing::ParameterBoxingInstruction::Unsupported`] instead.
///
/// ## Admission Errors
/// - [`Error::EmptyRequest`], [`Error::InvalidCaptureLimit`], [`Error::InvalidDuration`]
/// - [`Error::DeniedMethods`] - Policy rejected one or more target methods
/// - [`Error::TooManyRequests`] - The single pending slot is occupied
/// - [`Error::DuplicateRequest`] - A request with the same id is already tracked
///
/// ## Lifecycle Errors
/// - [`Error::UnknownRequest`] - Stop requested for an id that is not tracked
/// - [`Error::UnresolvedMethods`] - One or more descriptions matched no method
/// - [`Error::Instrumentation`] - The probe manager failed to install or remove probes
/// - [`Error::ShuttingDown`] - The consumer loop is gone
#[derive(Error, Debug)]
pub enum Error {
    /// The signature blob is damaged and could not be decoded.
    ///
    /// # Fields
    ///
    /// * `message` - Detailed description of what was malformed
    /// * `file` - Source file where the error was detected
    /// * `line` - Source line where the error was detected
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while reading a signature blob.
    #[error("Out of Bound read would have occurred!")]
    OutOfBounds,

    /// Recursion limit reached while decoding nested type signatures.
    #[error("Reach the maximum recursion level allowed - {0}")]
    RecursionLimit(usize),

    /// The request did not name any method.
    #[error("A capturing request must name at least one method")]
    EmptyRequest,

    /// The request carried a capture limit of zero.
    #[error("The capture limit must be greater than zero")]
    InvalidCaptureLimit,

    /// The request duration is zero or exceeds the configured maximum.
    #[error("Invalid capturing duration - {0:?}")]
    InvalidDuration(Duration),

    /// The policy engine refused one or more of the requested methods.
    #[error("Denied methods - {}", describe_methods(.0))]
    DeniedMethods(Vec<MethodDescription>),

    /// A request is already waiting for the active one to finish.
    #[error("Too many concurrent capturing requests")]
    TooManyRequests,

    /// A request with this id is already being tracked.
    #[error("A request with id {0} already exists")]
    DuplicateRequest(RequestId),

    /// No request with this id is being tracked.
    #[error("Unknown request - {0}")]
    UnknownRequest(RequestId),

    /// One or more descriptions did not resolve to any method.
    #[error("Unresolved methods - {}", describe_methods(.0))]
    UnresolvedMethods(Vec<MethodDescription>),

    /// Installing or removing probes failed.
    #[error("Instrumentation failed - {0}")]
    Instrumentation(String),

    /// The orchestrator no longer accepts requests.
    #[error("The capturing orchestrator is shutting down")]
    ShuttingDown,
}
