//! Shared test support
//!
//! - [`factories`] - builders for methods and request payloads
//! - [`mocks`] - in-memory stand-ins for the host collaborators the orchestrator drives

pub mod factories;
