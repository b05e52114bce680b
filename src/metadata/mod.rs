//! Plain metadata model shared by classification and orchestration.
//!
//! Hosts extract method and parameter information from their runtime once, at resolution
//! time, into the types defined here. Nothing in this crate touches live reflection objects.
//!
//! # Key Components
//!
//! - [`token`] - Metadata tokens and table ids
//! - [`parser`] - Bounds-checked cursor over signature blobs
//! - [`typesystem`] - `ELEMENT_TYPE` constants, primitive kinds and declared type shapes
//! - [`method`] - Operator descriptions, resolved methods and method identities

pub mod method;
pub mod parser;
pub mod token;
pub mod typesystem;
