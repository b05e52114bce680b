use bitflags::bitflags;

use crate::{
    boxing::ParameterBoxingInstruction,
    metadata::{
        method::ResolvedMethod,
        parser::Parser,
        typesystem::{PrimitiveKind, ELEMENT_TYPE},
    },
    Error::RecursionLimit,
    Result,
};

/// Maximum recursion depth for nested type signatures
pub const MAX_RECURSION_DEPTH: usize = 50;

/// Mask for the calling convention kind in the signature header
const CALLING_CONVENTION_MASK: u8 = 0x0F;
/// Highest calling convention kind that denotes a method (DEFAULT, C, STDCALL, THISCALL, FASTCALL, VARARG)
const LAST_METHOD_CONVENTION: u8 = 0x05;
/// Calling convention kind of unmanaged function pointers, only valid nested in `FNPTR`
const UNMANAGED_CONVENTION: u8 = 0x09;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Flags in the upper nibble of a method signature header (II.23.2.1)
    pub struct SignatureHeader: u8 {
        /// The method has generic parameters; the arity follows the header
        const GENERIC = 0x10;
        /// The method has an implicit `this`
        const HAS_THIS = 0x20;
        /// `this` is passed explicitly as the first parameter
        const EXPLICIT_THIS = 0x40;
    }
}

/// Decodes a method's raw `MethodDefSig` into one boxing instruction per formal parameter.
///
/// This is the fallback for parameters the declared type alone cannot settle: unbound generic
/// parameters, value types of other modules, and constructed generic instantiations. Those
/// decode to either a module-scoped type token or a [`ParameterBoxingInstruction::TypeSpecification`]
/// range that the instrumentation uses verbatim to rebuild the constructed type at the
/// rewriting boundary.
///
/// Decoding is all-or-nothing: a malformed blob anywhere yields `None` for the whole method,
/// never a partial, positionally unsound list.
///
/// # Example
///
/// ```rust
/// use dotcapture::boxing::{ParameterBoxingInstruction, SignatureDecoder};
/// use dotcapture::metadata::typesystem::PrimitiveKind;
///
/// // void M(int32, List<T>)
/// let blob = [0x00, 0x02, 0x01, 0x08, 0x15, 0x12, 0x49, 0x01, 0x13, 0x00];
/// let decoded = SignatureDecoder::new().decode_blob(&blob)?;
///
/// assert_eq!(decoded[0], ParameterBoxingInstruction::Primitive(PrimitiveKind::Int32));
/// assert_eq!(
///     decoded[1],
///     ParameterBoxingInstruction::TypeSpecification { offset: 4, length: 6 }
/// );
/// # Ok::<(), dotcapture::Error>(())
/// ```
#[derive(Debug, Clone, Copy)]
pub struct SignatureDecoder {
    max_depth: usize,
}

impl Default for SignatureDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureDecoder {
    /// Create a decoder with the default recursion bound
    #[must_use]
    pub fn new() -> Self {
        SignatureDecoder {
            max_depth: MAX_RECURSION_DEPTH,
        }
    }

    /// Create a decoder with a custom recursion bound for nested types
    #[must_use]
    pub fn with_max_depth(max_depth: usize) -> Self {
        SignatureDecoder { max_depth }
    }

    /// Decode the formal parameters of `method`.
    ///
    /// Returns `None` if the signature is malformed; the reason is logged.
    #[must_use]
    pub fn decode(&self, method: &ResolvedMethod) -> Option<Vec<ParameterBoxingInstruction>> {
        match self.decode_blob(method.signature) {
            Ok(instructions) => Some(instructions),
            Err(error) => {
                tracing::debug!(method = %method, %error, "Failed to decode method signature");
                None
            }
        }
    }

    /// Decode the formal parameters of a raw method signature blob.
    ///
    /// Only the required parameters are returned; optional vararg parameters behind a
    /// sentinel are decoded to keep the cursor aligned and then dropped.
    ///
    /// # Errors
    /// Returns an error if the blob is not a method signature or is malformed at any point.
    pub fn decode_blob(&self, blob: &[u8]) -> Result<Vec<ParameterBoxingInstruction>> {
        BlobDecoder {
            parser: Parser::new(blob),
            depth: 0,
            max_depth: self.max_depth,
        }
        .decode_method(false)
    }
}

struct BlobDecoder<'a> {
    parser: Parser<'a>,
    depth: usize,
    max_depth: usize,
}

impl BlobDecoder<'_> {
    fn decode_method(&mut self, nested: bool) -> Result<Vec<ParameterBoxingInstruction>> {
        let header = self.parser.read_u8()?;
        let convention = header & CALLING_CONVENTION_MASK;
        if convention > LAST_METHOD_CONVENTION && !(nested && convention == UNMANAGED_CONVENTION)
        {
            return Err(malformed_error!(
                "Not a method signature - header {:#04x}",
                header
            ));
        }

        let flags = SignatureHeader::from_bits_truncate(header);
        if flags.contains(SignatureHeader::GENERIC) {
            self.parser.read_compressed_uint()?;
        }

        let param_count = self.parser.read_compressed_uint()? as usize;

        // Return type
        self.decode_param()?;

        let mut required = Vec::with_capacity(param_count.min(self.parser.len()));
        let mut optional = false;
        for _ in 0..param_count {
            if self.parser.peek_byte()? == ELEMENT_TYPE::SENTINEL {
                if optional {
                    return Err(malformed_error!("Duplicate vararg sentinel"));
                }
                self.parser.advance()?;
                optional = true;
            }

            let instruction = self.decode_param()?;
            if !optional {
                required.push(instruction);
            }
        }

        Ok(required)
    }

    fn skip_custom_mods(&mut self) -> Result<()> {
        while self.parser.has_more_data() {
            let next_byte = self.parser.peek_byte()?;
            if next_byte != ELEMENT_TYPE::CMOD_OPT && next_byte != ELEMENT_TYPE::CMOD_REQD {
                break;
            }

            self.parser.advance()?;
            self.parser.read_compressed_token()?;
        }

        Ok(())
    }

    fn decode_param(&mut self) -> Result<ParameterBoxingInstruction> {
        self.skip_custom_mods()?;

        match self.parser.peek_byte()? {
            ELEMENT_TYPE::BYREF => {
                self.parser.advance()?;
                self.decode_type()?;
                Ok(ParameterBoxingInstruction::Unsupported)
            }
            _ => self.decode_type(),
        }
    }

    fn decode_type(&mut self) -> Result<ParameterBoxingInstruction> {
        self.depth += 1;
        if self.depth >= self.max_depth {
            return Err(RecursionLimit(self.max_depth));
        }

        let start = self.parser.pos();
        let element_type = self.parser.read_u8()?;
        let instruction = match element_type {
            ELEMENT_TYPE::STRING | ELEMENT_TYPE::OBJECT => {
                ParameterBoxingInstruction::ObjectReference
            }
            ELEMENT_TYPE::CLASS => {
                self.parser.read_compressed_token()?;
                ParameterBoxingInstruction::ObjectReference
            }
            ELEMENT_TYPE::VALUETYPE => {
                let token = self.parser.read_compressed_token()?;
                if token.is_type_spec() {
                    self.type_spec_since(start)
                } else {
                    ParameterBoxingInstruction::OwnModuleTypeToken(token)
                }
            }
            ELEMENT_TYPE::SZARRAY => {
                self.skip_custom_mods()?;
                self.decode_type()?;
                ParameterBoxingInstruction::ObjectReference
            }
            ELEMENT_TYPE::ARRAY => {
                self.decode_type()?;
                let _rank = self.parser.read_compressed_uint()?;
                let num_sizes = self.parser.read_compressed_uint()?;
                for _ in 0..num_sizes {
                    self.parser.read_compressed_uint()?;
                }
                // Lower bounds are compressed signed integers; same width as unsigned ones
                let num_lo_bounds = self.parser.read_compressed_uint()?;
                for _ in 0..num_lo_bounds {
                    self.parser.read_compressed_uint()?;
                }
                ParameterBoxingInstruction::ObjectReference
            }
            ELEMENT_TYPE::VAR | ELEMENT_TYPE::MVAR => {
                self.parser.read_compressed_uint()?;
                self.type_spec_since(start)
            }
            ELEMENT_TYPE::GENERICINST => {
                let peek_byte = self.parser.peek_byte()?;
                if peek_byte != ELEMENT_TYPE::CLASS && peek_byte != ELEMENT_TYPE::VALUETYPE {
                    return Err(malformed_error!(
                        "GENERICINST - Next byte is not TYPE_CLASS or TYPE_VALUE - {}",
                        peek_byte
                    ));
                }

                self.decode_type()?;
                let arg_count = self.parser.read_compressed_uint()?;
                if arg_count == 0 {
                    return Err(malformed_error!("GENERICINST - Zero type arguments"));
                }
                for _ in 0..arg_count {
                    self.decode_type()?;
                }
                self.type_spec_since(start)
            }
            ELEMENT_TYPE::PTR => {
                self.skip_custom_mods()?;
                self.decode_type()?;
                ParameterBoxingInstruction::Unsupported
            }
            ELEMENT_TYPE::BYREF => {
                self.decode_type()?;
                ParameterBoxingInstruction::Unsupported
            }
            ELEMENT_TYPE::FNPTR => {
                self.decode_method(true)?;
                ParameterBoxingInstruction::Unsupported
            }
            ELEMENT_TYPE::TYPEDBYREF | ELEMENT_TYPE::VOID => ParameterBoxingInstruction::Unsupported,
            ELEMENT_TYPE::CMOD_REQD | ELEMENT_TYPE::CMOD_OPT => {
                self.parser.read_compressed_token()?;
                self.decode_type()?
            }
            other => match PrimitiveKind::from_element_type(other) {
                Some(kind) => ParameterBoxingInstruction::Primitive(kind),
                None => {
                    return Err(malformed_error!("Unsupported ELEMENT_TYPE - {}", other));
                }
            },
        };

        self.depth -= 1;
        Ok(instruction)
    }

    fn type_spec_since(&self, start: usize) -> ParameterBoxingInstruction {
        ParameterBoxingInstruction::TypeSpecification {
            offset: start,
            length: self.parser.pos() - start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metadata::token::Token, Error};

    use ParameterBoxingInstruction::*;

    #[test]
    fn test_decode_primitives_and_references() {
        // void M(bool, char, float64, string, object, MyClass, int32[])
        let blob = [
            0x00, // DEFAULT
            0x07, // 7 params
            0x01, // VOID
            0x02, 0x03, 0x0D, 0x0E, 0x1C, //
            0x12, 0x49, // CLASS TypeRef 0x12
            0x1D, 0x08, // SZARRAY I4
        ];

        let decoded = SignatureDecoder::new().decode_blob(&blob).unwrap();
        assert_eq!(
            decoded,
            vec![
                Primitive(PrimitiveKind::Boolean),
                Primitive(PrimitiveKind::Char),
                Primitive(PrimitiveKind::Double),
                ObjectReference,
                ObjectReference,
                ObjectReference,
                ObjectReference,
            ]
        );
    }

    #[test]
    fn test_decode_value_type_tokens() {
        // void M(MyStruct, OtherModuleStruct)
        let blob = [
            0x00, 0x02, 0x01, //
            0x11, 0x08, // VALUETYPE TypeDef row 2
            0x11, 0x0D, // VALUETYPE TypeRef row 3
        ];

        let decoded = SignatureDecoder::new().decode_blob(&blob).unwrap();
        assert_eq!(
            decoded,
            vec![
                OwnModuleTypeToken(Token(0x0200_0002)),
                OwnModuleTypeToken(Token(0x0100_0003)),
            ]
        );
    }

    #[test]
    fn test_decode_type_spec_ranges() {
        // instance void M<T>(!!0, Nullable<int32>, int32)
        let blob = [
            0x30, // HASTHIS | GENERIC
            0x01, // arity 1
            0x03, // 3 params
            0x01, // VOID
            0x1E, 0x00, // MVAR 0
            0x15, 0x11, 0x0D, 0x01, 0x08, // GENERICINST VALUETYPE TypeRef(3) 1 I4
            0x08, // I4
        ];

        let decoded = SignatureDecoder::new().decode_blob(&blob).unwrap();
        assert_eq!(
            decoded,
            vec![
                TypeSpecification {
                    offset: 4,
                    length: 2
                },
                TypeSpecification {
                    offset: 6,
                    length: 5
                },
                Primitive(PrimitiveKind::Int32),
            ]
        );
        assert_eq!(&blob[6..11], &[0x15, 0x11, 0x0D, 0x01, 0x08]);
    }

    #[test]
    fn test_decode_range_excludes_custom_mods() {
        // void M(modopt(IsConst) !0)
        let blob = [0x00, 0x01, 0x01, 0x20, 0x49, 0x13, 0x01];

        let decoded = SignatureDecoder::new().decode_blob(&blob).unwrap();
        assert_eq!(
            decoded,
            vec![TypeSpecification {
                offset: 5,
                length: 2
            }]
        );
    }

    #[test]
    fn test_decode_unsupported_shapes() {
        // void M(ref int32, int32*, typedref, method void *())
        let blob = [
            0x00, 0x04, 0x01, //
            0x10, 0x08, // BYREF I4
            0x0F, 0x08, // PTR I4
            0x16, // TYPEDBYREF
            0x1B, 0x00, 0x00, 0x01, // FNPTR DEFAULT 0 params VOID
        ];

        let decoded = SignatureDecoder::new().decode_blob(&blob).unwrap();
        assert_eq!(decoded, vec![Unsupported; 4]);
    }

    #[test]
    fn test_decode_multi_dim_array() {
        // void M(int32[0...2, 0...], string)
        let blob = [
            0x00, 0x02, 0x01, //
            0x14, 0x08, 0x02, // ARRAY I4 rank 2
            0x01, 0x03, // 1 size: 3
            0x02, 0x00, 0x00, // 2 lower bounds: 0, 0
            0x0E, // STRING
        ];

        let decoded = SignatureDecoder::new().decode_blob(&blob).unwrap();
        assert_eq!(decoded, vec![ObjectReference, ObjectReference]);
    }

    #[test]
    fn test_decode_vararg_keeps_required_params() {
        // vararg void M(int32, ..., string, float32)
        let blob = [
            0x05, // VARARG
            0x03, 0x01, //
            0x08, // I4
            0x41, // SENTINEL
            0x0E, 0x0C,
        ];

        let decoded = SignatureDecoder::new().decode_blob(&blob).unwrap();
        assert_eq!(decoded, vec![Primitive(PrimitiveKind::Int32)]);
    }

    #[test]
    fn test_decode_return_type_is_discarded() {
        // List<int32> M()
        let blob = [0x00, 0x00, 0x15, 0x12, 0x49, 0x01, 0x08];
        assert!(SignatureDecoder::new().decode_blob(&blob).unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_non_method_signatures() {
        // FIELD signature
        let result = SignatureDecoder::new().decode_blob(&[0x06, 0x08]);
        assert!(matches!(result, Err(Error::Malformed { .. })));

        // PROPERTY signature
        let result = SignatureDecoder::new().decode_blob(&[0x28, 0x00, 0x08]);
        assert!(matches!(result, Err(Error::Malformed { .. })));
    }

    #[test]
    fn test_decode_malformed_fails_whole_method() {
        // Second parameter is truncated
        let truncated = [0x00, 0x02, 0x01, 0x08, 0x15, 0x12];
        assert!(SignatureDecoder::new().decode_blob(&truncated).is_err());

        // Unknown element type in the last parameter
        let unknown = [0x00, 0x02, 0x01, 0x08, 0x3F];
        assert!(SignatureDecoder::new().decode_blob(&unknown).is_err());

        // GENERICINST over a primitive
        let bad_inst = [0x00, 0x01, 0x01, 0x15, 0x08, 0x01, 0x08];
        assert!(SignatureDecoder::new().decode_blob(&bad_inst).is_err());

        // Fewer parameters than announced
        let short = [0x00, 0x03, 0x01, 0x08, 0x08];
        assert!(matches!(
            SignatureDecoder::new().decode_blob(&short),
            Err(Error::OutOfBounds)
        ));
    }

    #[test]
    fn test_decode_recursion_limit() {
        // void M(int32[][][][]...)
        let mut blob = vec![0x00, 0x01, 0x01];
        blob.extend(std::iter::repeat(0x1D).take(64));
        blob.push(0x08);

        assert!(matches!(
            SignatureDecoder::new().decode_blob(&blob),
            Err(Error::RecursionLimit(MAX_RECURSION_DEPTH))
        ));
        assert!(SignatureDecoder::with_max_depth(128)
            .decode_blob(&blob)
            .is_ok());
    }

    #[test]
    fn test_depth_is_per_nesting_not_per_type() {
        // 60 flat parameters must not trip a depth bound of 50
        let mut blob = vec![0x00, 60, 0x01];
        blob.extend(std::iter::repeat(0x08).take(60));

        assert_eq!(SignatureDecoder::new().decode_blob(&blob).unwrap().len(), 60);
    }
}
