use rayon::prelude::*;

use crate::{
    boxing::{
        Classification, MethodBoxingInstructions, ParameterBoxingInstruction, SignatureDecoder,
        SignatureHeader,
    },
    metadata::{method::ResolvedMethod, typesystem::TypeShape},
};

/// Computes boxing instructions from declared parameter shapes.
///
/// The declared shape settles most parameters at reflection speed. Shapes that only the raw
/// signature can settle (unbound generics, foreign or generic value types) are marked
/// deferrable, and the [`SignatureDecoder`] runs once for the whole method to try to upgrade
/// them. A decoder result only ever replaces a deferred `Unsupported` slot, so a parameter
/// the declared shape already supports is never downgraded, and a failed decode leaves every
/// deferred slot `Unsupported`.
///
/// # Example
///
/// ```rust
/// use dotcapture::boxing::{ParameterBoxingInstruction, SignatureClassifier};
/// use dotcapture::metadata::{
///     method::{MethodId, ModuleId, ResolvedMethod},
///     token::Token,
///     typesystem::{ParameterInfo, PrimitiveKind, TypeShape},
/// };
///
/// static SIG: [u8; 5] = [0x20, 0x02, 0x01, 0x08, 0x13];
///
/// let method = ResolvedMethod {
///     id: MethodId::new(ModuleId(1), Token::new(0x0600_0001)),
///     declaring_type: "App.Orders".into(),
///     name: "Place".into(),
///     receiver: Some(TypeShape::Class),
///     parameters: vec![
///         ParameterInfo::new("count", TypeShape::Primitive(PrimitiveKind::Int32)),
///         ParameterInfo::new("item", TypeShape::GenericParameter),
///     ],
///     signature: &SIG,
/// };
///
/// // The signature is truncated, so the generic parameter stays unsupported
/// let instructions = SignatureClassifier::new().classify_method(&method);
/// assert_eq!(
///     instructions,
///     vec![
///         ParameterBoxingInstruction::ObjectReference,
///         ParameterBoxingInstruction::Primitive(PrimitiveKind::Int32),
///         ParameterBoxingInstruction::Unsupported,
///     ]
/// );
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureClassifier {
    decoder: SignatureDecoder,
    sequential: bool,
}

impl SignatureClassifier {
    /// Create a classifier with a default decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a classifier that falls back to `decoder`
    #[must_use]
    pub fn with_decoder(decoder: SignatureDecoder) -> Self {
        SignatureClassifier {
            decoder,
            sequential: false,
        }
    }

    /// Choose between classifying batches of methods in parallel (the default) or in order
    #[must_use]
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.sequential = !parallel;
        self
    }

    /// Classify one declared type in the context of the method that declares it.
    ///
    /// Rules are applied in order, first match wins:
    /// 1. by-ref, by-ref-like and pointer types are unsupported
    /// 2. unbound generic parameters are deferred to the decoder
    /// 3. primitives map onto their [`crate::metadata::typesystem::PrimitiveKind`]
    /// 4. value types of the method's own module box through their token; generic or foreign
    ///    value types are deferred
    /// 5. arrays, classes and interfaces are object references
    /// 6. anything else is unsupported
    #[must_use]
    pub fn classify(&self, method: &ResolvedMethod, shape: &TypeShape) -> Classification {
        match shape {
            TypeShape::ByRef | TypeShape::ByRefLike | TypeShape::Pointer => {
                Classification::terminal(ParameterBoxingInstruction::Unsupported)
            }
            TypeShape::GenericParameter => Classification::deferred(),
            TypeShape::Primitive(kind) => {
                Classification::terminal(ParameterBoxingInstruction::Primitive(*kind))
            }
            TypeShape::ValueType {
                token,
                module,
                generic,
            } => {
                if *generic || *module != method.id.module {
                    Classification::deferred()
                } else {
                    Classification::terminal(ParameterBoxingInstruction::OwnModuleTypeToken(
                        *token,
                    ))
                }
            }
            TypeShape::Array | TypeShape::Class | TypeShape::Interface => {
                Classification::terminal(ParameterBoxingInstruction::ObjectReference)
            }
            TypeShape::Other => Classification::terminal(ParameterBoxingInstruction::Unsupported),
        }
    }

    /// Compute one instruction per capture slot of `method`: the receiver first (for instance
    /// methods), then the formal parameters in declaration order.
    ///
    /// Never fails; slots that cannot be classified are `Unsupported`.
    #[must_use]
    pub fn classify_method(&self, method: &ResolvedMethod) -> Vec<ParameterBoxingInstruction> {
        let shapes = method
            .receiver
            .iter()
            .chain(method.parameters.iter().map(|parameter| &parameter.shape));

        let mut instructions = Vec::with_capacity(method.slot_count());
        let mut deferred = Vec::with_capacity(method.slot_count());
        for shape in shapes {
            let classification = self.classify(method, shape);
            instructions.push(classification.instruction);
            deferred.push(classification.deferrable);
        }

        if deferred.contains(&true) {
            self.apply_decoded(method, &mut instructions, &deferred);
        }

        instructions
    }

    /// Classify a batch of resolved methods, preserving their order.
    #[must_use]
    pub fn classify_methods(&self, methods: Vec<ResolvedMethod>) -> Vec<MethodBoxingInstructions> {
        let classify = |method: ResolvedMethod| MethodBoxingInstructions {
            instructions: self.classify_method(&method),
            method,
        };

        if self.sequential {
            methods.into_iter().map(classify).collect()
        } else {
            methods.into_par_iter().map(classify).collect()
        }
    }

    fn apply_decoded(
        &self,
        method: &ResolvedMethod,
        instructions: &mut [ParameterBoxingInstruction],
        deferred: &[bool],
    ) {
        let Some(mut decoded) = self.decoder.decode(method) else {
            return;
        };

        // An explicit `this` is the first blob parameter; the receiver slot already covers it
        let explicit_this = method
            .signature
            .first()
            .is_some_and(|&header| {
                SignatureHeader::from_bits_truncate(header).contains(SignatureHeader::EXPLICIT_THIS)
            });
        if explicit_this && !decoded.is_empty() {
            decoded.remove(0);
        }

        if decoded.len() != method.parameters.len() {
            tracing::debug!(
                method = %method,
                declared = method.parameters.len(),
                decoded = decoded.len(),
                "Signature parameter count does not match declared parameters"
            );
            return;
        }

        // The signature carries no slot for the implicit receiver
        let first_parameter = usize::from(method.has_receiver());
        for (index, instruction) in decoded.into_iter().enumerate() {
            let slot = first_parameter + index;
            if deferred[slot] && instruction.is_supported() {
                instructions[slot] = instruction;
            }
        }
    }
}
