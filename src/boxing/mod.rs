//! Parameter boxing classification.
//!
//! For every capture slot of a resolved method (the implicit receiver, then each formal
//! parameter) this module decides how a probe can represent the runtime value out of band.
//!
//! # Key Components
//!
//! - [`SignatureClassifier`] - reflection-speed classification from declared type shapes
//! - [`SignatureDecoder`] - fallback that decodes the raw `MethodDefSig` blob, once per method
//! - [`ParameterBoxingInstruction`] - the per-slot result
//! - [`MethodBoxingInstructions`] - a resolved method paired with its instructions
//!
//! # Failure Model
//!
//! Classification never fails. A malformed blob makes the decoder give up on the whole
//! method, and every slot that depended on it stays
//! [`ParameterBoxingInstruction::Unsupported`]; sibling slots and sibling methods are
//! unaffected.
//!
//! # References
//!
//! - ECMA-335 6th Edition, Partition II, Section 23.2 - Blobs and Signatures

mod classifier;
mod decoder;
mod instruction;

pub use classifier::SignatureClassifier;
pub use decoder::{SignatureDecoder, SignatureHeader, MAX_RECURSION_DEPTH};
pub use instruction::{Classification, MethodBoxingInstructions, ParameterBoxingInstruction};
