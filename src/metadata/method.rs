//! Method identities: what an operator asks for, and what the host resolved it to.
//!
//! - [`MethodDescription`] - unresolved, operator supplied description of a target method
//! - [`ResolvedMethod`] - a concrete, instrumentable method with its extracted parameter shapes
//!   and a view of its raw signature blob
//! - [`MethodId`] - the identity probes report back when they fire

use std::fmt;

use crate::{
    boxing::ParameterBoxingInstruction,
    metadata::{
        token::Token,
        typesystem::{ParameterInfo, TypeShape},
    },
};

/// Identifies a loaded module within the monitored process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ModuleId(pub u64);

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

/// Process-wide identity of a method: its module plus its `MethodDef` token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MethodId {
    /// Module that defines the method
    pub module: ModuleId,
    /// `MethodDef` token within that module
    pub token: Token,
}

impl MethodId {
    /// Create a method identity
    #[must_use]
    pub fn new(module: ModuleId, token: Token) -> Self {
        MethodId { module, token }
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.module, self.token)
    }
}

/// Operator supplied description of a method to capture.
///
/// Nothing about it is validated against the running process until resolution; an empty
/// `parameter_types` list matches every overload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDescription {
    /// Simple module name, e.g. `MyApp.dll`
    pub module_name: String,
    /// Full name of the declaring type, including namespace
    pub type_name: String,
    /// Method name
    pub method_name: String,
    /// Full names of the parameter types, used to pick between overloads
    pub parameter_types: Vec<String>,
}

impl MethodDescription {
    /// Describe a method without narrowing overloads
    #[must_use]
    pub fn new(
        module_name: impl Into<String>,
        type_name: impl Into<String>,
        method_name: impl Into<String>,
    ) -> Self {
        MethodDescription {
            module_name: module_name.into(),
            type_name: type_name.into(),
            method_name: method_name.into(),
            parameter_types: Vec::new(),
        }
    }

    /// Narrow the description to the overload with these parameter types
    #[must_use]
    pub fn with_parameter_types<I, S>(mut self, parameter_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.parameter_types = parameter_types.into_iter().map(Into::into).collect();
        self
    }
}

impl fmt::Display for MethodDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}!{}.{}",
            self.module_name, self.type_name, self.method_name
        )?;
        if !self.parameter_types.is_empty() {
            write!(f, "({})", self.parameter_types.join(", "))?;
        }
        Ok(())
    }
}

/// A concrete method the probe manager can instrument.
///
/// All type information is plain extracted data; `signature` borrows the method's raw
/// `MethodDefSig` blob from metadata that stays mapped for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct ResolvedMethod {
    /// Identity of the method
    pub id: MethodId,
    /// Full name of the declaring type
    pub declaring_type: String,
    /// Method name
    pub name: String,
    /// Shape of the implicit `this` for instance methods, `None` for static methods.
    /// Receivers of value types are managed references and carry [`TypeShape::ByRef`].
    pub receiver: Option<TypeShape>,
    /// Formal parameters in declaration order
    pub parameters: Vec<ParameterInfo>,
    /// Raw signature blob
    pub signature: &'static [u8],
}

impl ResolvedMethod {
    /// Returns true if the method has an implicit receiver slot
    #[must_use]
    pub fn has_receiver(&self) -> bool {
        self.receiver.is_some()
    }

    /// Number of capture slots: the receiver (if any) followed by every formal parameter
    #[must_use]
    pub fn slot_count(&self) -> usize {
        usize::from(self.has_receiver()) + self.parameters.len()
    }

    /// Borrow the sub-signature a [`ParameterBoxingInstruction::TypeSpecification`] points at.
    ///
    /// Returns `None` for every other instruction, or if the range does not fit the blob.
    #[must_use]
    pub fn type_spec_bytes(&self, instruction: &ParameterBoxingInstruction) -> Option<&'static [u8]> {
        match *instruction {
            ParameterBoxingInstruction::TypeSpecification { offset, length } => {
                let signature: &'static [u8] = self.signature;
                signature.get(offset..offset.checked_add(length)?)
            }
            _ => None,
        }
    }
}

impl fmt::Display for ResolvedMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{} [{}]", self.declaring_type, self.name, self.id)
    }
}
