// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![deny(unsafe_code)]

//! # dotcapture
//!
//! Runtime parameter capturing for .NET processes.
//!
//! An operator names a few methods of a running application; `dotcapture` decides how the
//! arguments of every invocation can be represented out of band, installs probes through the
//! host for a bounded time, and tears them down again when the time elapses, a capture limit
//! is reached, or the operator says stop.
//!
//! ## Features
//!
//! - **Boxing classification** - Per-parameter instructions from declared type shapes, with
//!   an ECMA-335 signature blob decoder as fallback for generics and foreign value types
//! - **Single-flight orchestration** - At most one active and one waiting request, enforced by
//!   a single-slot queue
//! - **Race-free stopping** - Explicit stop, duration timeout, capture limit and shutdown
//!   resolve one shared signal exactly once
//! - **Host agnostic** - Probe installation, method resolution, policy and notifications are
//!   traits the embedding runtime implements
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use dotcapture::prelude::*;
//!
//! let services = CaptureServices {
//!     validator: Arc::new(policy),
//!     resolver: Arc::new(resolver),
//!     probes: Arc::new(probes),
//!     callbacks: Arc::new(control_plane),
//!     surface: Arc::new(sink),
//! };
//! let (orchestrator, consumer) = CapturingOrchestrator::new(CaptureConfig::default(), services);
//! tokio::spawn(consumer.run(shutdown.clone()));
//!
//! orchestrator.submit_request(CapturingRequestPayload {
//!     request_id: RequestId::from_u128(1),
//!     methods: vec![MethodDescription::new("Shop.dll", "Shop.Orders", "Place")],
//!     duration: Duration::from_secs(60),
//!     capture_limit: Some(100),
//! })?;
//! ```
//!
//! ### Classifying a Method
//!
//! ```rust
//! use dotcapture::boxing::{ParameterBoxingInstruction, SignatureDecoder};
//! use dotcapture::metadata::typesystem::PrimitiveKind;
//!
//! // static void M(int32, string)
//! let blob = [0x00, 0x02, 0x01, 0x08, 0x0E];
//! let instructions = SignatureDecoder::new().decode_blob(&blob)?;
//! assert_eq!(
//!     instructions,
//!     vec![
//!         ParameterBoxingInstruction::Primitive(PrimitiveKind::Int32),
//!         ParameterBoxingInstruction::ObjectReference,
//!     ]
//! );
//! # Ok::<(), dotcapture::Error>(())
//! ```
//!
//! ## Logging
//!
//! Diagnostics are emitted through `tracing`. The library never installs a subscriber; hosts
//! route the events wherever they log.

#[macro_use]
pub(crate) mod error;

/// Shared functionality which is used in unit tests
#[cfg(test)]
pub(crate) mod test;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use dotcapture::prelude::*;
///
/// let config = CaptureConfig::default();
/// assert!(config.parallel_classification);
/// ```
pub mod prelude;

/// Plain metadata model: tokens, blob parsing, type shapes and method identities.
pub mod metadata;

/// Per-parameter boxing instructions and the signature blob decoder.
pub mod boxing;

/// Request admission, the single-flight consumer loop and capture limiting.
pub mod capture;

/// `dotcapture` Result type
///
/// A type alias for `std::result::Result<T, Error>` where the error type is always
/// [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `dotcapture` Error type
///
/// Every fallible operation of this crate returns this error.
pub use error::Error;

/// Bounds-checked cursor over signature blobs
pub use metadata::parser::Parser;
