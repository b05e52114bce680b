use std::fmt;

use crate::metadata::{method::ResolvedMethod, token::Token, typesystem::PrimitiveKind};

/// How a probe must represent one parameter value for capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterBoxingInstruction {
    /// Captured by value as one of the fixed primitive kinds
    Primitive(PrimitiveKind),
    /// Already a managed object reference (classes, interfaces, arrays, strings)
    ObjectReference,
    /// A value type boxed through a type token that is valid in the method's own module
    OwnModuleTypeToken(Token),
    /// The value cannot be captured safely
    Unsupported,
    /// A constructed type, boxed through the sub-signature at `offset..offset + length` of the
    /// owning method's signature blob. The range is resolved with
    /// [`ResolvedMethod::type_spec_bytes`]; the bytes themselves are never copied.
    TypeSpecification {
        /// Byte offset of the sub-signature within the method signature blob
        offset: usize,
        /// Length of the sub-signature in bytes
        length: usize,
    },
}

impl ParameterBoxingInstruction {
    /// Everything but [`ParameterBoxingInstruction::Unsupported`] can be captured
    #[must_use]
    pub fn is_supported(&self) -> bool {
        !matches!(self, ParameterBoxingInstruction::Unsupported)
    }
}

impl fmt::Display for ParameterBoxingInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterBoxingInstruction::Primitive(kind) => write!(f, "primitive({kind})"),
            ParameterBoxingInstruction::ObjectReference => write!(f, "object"),
            ParameterBoxingInstruction::OwnModuleTypeToken(token) => write!(f, "token({token})"),
            ParameterBoxingInstruction::Unsupported => write!(f, "unsupported"),
            ParameterBoxingInstruction::TypeSpecification { offset, length } => {
                write!(f, "typespec({offset}..{})", offset + length)
            }
        }
    }
}

/// The outcome of classifying a single declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// The instruction derived from the declared type alone
    pub instruction: ParameterBoxingInstruction,
    /// The raw signature may still yield a supported instruction for this slot
    pub deferrable: bool,
}

impl Classification {
    pub(crate) fn terminal(instruction: ParameterBoxingInstruction) -> Self {
        Classification {
            instruction,
            deferrable: false,
        }
    }

    pub(crate) fn deferred() -> Self {
        Classification {
            instruction: ParameterBoxingInstruction::Unsupported,
            deferrable: true,
        }
    }
}

/// A resolved method together with one instruction per capture slot.
///
/// Slot 0 is the implicit receiver for instance methods; formal parameters follow in
/// declaration order.
#[derive(Debug, Clone)]
pub struct MethodBoxingInstructions {
    /// The method the instructions were computed for
    pub method: ResolvedMethod,
    /// One instruction per capture slot
    pub instructions: Vec<ParameterBoxingInstruction>,
}

impl MethodBoxingInstructions {
    /// Returns true if the slot at `index` can be captured
    #[must_use]
    pub fn is_supported(&self, index: usize) -> bool {
        self.instructions
            .get(index)
            .is_some_and(ParameterBoxingInstruction::is_supported)
    }

    /// Number of slots that can be captured
    #[must_use]
    pub fn supported_count(&self) -> usize {
        self.instructions.iter().filter(|i| i.is_supported()).count()
    }

    /// Returns true if every slot can be captured
    #[must_use]
    pub fn is_fully_supported(&self) -> bool {
        self.supported_count() == self.instructions.len()
    }
}
