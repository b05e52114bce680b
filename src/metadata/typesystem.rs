//! Type shapes and element-type constants.
//!
//! Classification never looks at live runtime objects. A host extracts, for every parameter,
//! the plain [`TypeShape`] of its declared type and hands that to
//! [`crate::boxing::SignatureClassifier`]. The [`ELEMENT_TYPE`] constants describe the same
//! shapes as they appear in raw signature blobs.

use strum::{Display, EnumCount, EnumIter};

use crate::metadata::{method::ModuleId, token::Token};

#[allow(non_snake_case)]
#[allow(missing_docs)]
/// All possible `ELEMENT_TYPE` values of ECMA-335 (II.23.1.16)
pub mod ELEMENT_TYPE {
    //Marks end of a list
    pub const END: u8 = 0x00;
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0a;
    pub const U8: u8 = 0x0b;
    pub const R4: u8 = 0x0c;
    pub const R8: u8 = 0x0d;
    pub const STRING: u8 = 0x0e;
    // Followed by type
    pub const PTR: u8 = 0x0f;
    // Followed by type
    pub const BYREF: u8 = 0x10;
    // Followed by TypeDef or TypeRef token
    pub const VALUETYPE: u8 = 0x11;
    // Followed by TypeDef or TypeRef token
    pub const CLASS: u8 = 0x12;
    // Generic parameter in a generic type definition, represented as number
    pub const VAR: u8 = 0x13;
    // type rank boundsCount bound1 … loCount lo1 …
    pub const ARRAY: u8 = 0x14;
    // Generic type instantiation. Followed by type type-arg-count type-1 ... type-n
    pub const GENERICINST: u8 = 0x15;
    pub const TYPEDBYREF: u8 = 0x16;
    // System.IntPtr
    pub const I: u8 = 0x18;
    // System.UIntPtr
    pub const U: u8 = 0x19;
    // Followed by full method signature
    pub const FNPTR: u8 = 0x1b;
    // System.Object
    pub const OBJECT: u8 = 0x1c;
    // Single-dim array with 0 lower bound
    pub const SZARRAY: u8 = 0x1d;
    // Generic parameter in a generic method definition,represented as number
    pub const MVAR: u8 = 0x1e;
    // Required modifier : followed by a TypeDef or TypeRef token
    pub const CMOD_REQD: u8 = 0x1f;
    // Optional modifier : followed by a TypeDef or TypeRef token
    pub const CMOD_OPT: u8 = 0x20;
    // Implemented within the CLI
    pub const INTERNAL: u8 = 0x21;
    // Sentinel for vararg method signature
    pub const SENTINEL: u8 = 0x41;
    // Denotes a local variable that points at a pinned object
    pub const PINNED: u8 = 0x45;
}

/// The fixed set of primitive kinds a probe can capture by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumCount)]
pub enum PrimitiveKind {
    /// System.Boolean
    Boolean,
    /// System.Char - UTF-16 code unit
    Char,
    /// System.SByte
    SByte,
    /// System.Byte
    Byte,
    /// System.Int16
    Int16,
    /// System.UInt16
    UInt16,
    /// System.Int32
    Int32,
    /// System.UInt32
    UInt32,
    /// System.Int64
    Int64,
    /// System.UInt64
    UInt64,
    /// System.IntPtr - native width signed integer
    IntPtr,
    /// System.UIntPtr - native width unsigned integer
    UIntPtr,
    /// System.Single
    Single,
    /// System.Double
    Double,
}

impl PrimitiveKind {
    /// Map a signature element type onto its primitive kind, if it is one
    #[must_use]
    pub fn from_element_type(element_type: u8) -> Option<Self> {
        Some(match element_type {
            ELEMENT_TYPE::BOOLEAN => PrimitiveKind::Boolean,
            ELEMENT_TYPE::CHAR => PrimitiveKind::Char,
            ELEMENT_TYPE::I1 => PrimitiveKind::SByte,
            ELEMENT_TYPE::U1 => PrimitiveKind::Byte,
            ELEMENT_TYPE::I2 => PrimitiveKind::Int16,
            ELEMENT_TYPE::U2 => PrimitiveKind::UInt16,
            ELEMENT_TYPE::I4 => PrimitiveKind::Int32,
            ELEMENT_TYPE::U4 => PrimitiveKind::UInt32,
            ELEMENT_TYPE::I8 => PrimitiveKind::Int64,
            ELEMENT_TYPE::U8 => PrimitiveKind::UInt64,
            ELEMENT_TYPE::I => PrimitiveKind::IntPtr,
            ELEMENT_TYPE::U => PrimitiveKind::UIntPtr,
            ELEMENT_TYPE::R4 => PrimitiveKind::Single,
            ELEMENT_TYPE::R8 => PrimitiveKind::Double,
            _ => return None,
        })
    }

    /// The signature element type encoding this primitive
    #[must_use]
    pub fn element_type(&self) -> u8 {
        match self {
            PrimitiveKind::Boolean => ELEMENT_TYPE::BOOLEAN,
            PrimitiveKind::Char => ELEMENT_TYPE::CHAR,
            PrimitiveKind::SByte => ELEMENT_TYPE::I1,
            PrimitiveKind::Byte => ELEMENT_TYPE::U1,
            PrimitiveKind::Int16 => ELEMENT_TYPE::I2,
            PrimitiveKind::UInt16 => ELEMENT_TYPE::U2,
            PrimitiveKind::Int32 => ELEMENT_TYPE::I4,
            PrimitiveKind::UInt32 => ELEMENT_TYPE::U4,
            PrimitiveKind::Int64 => ELEMENT_TYPE::I8,
            PrimitiveKind::UInt64 => ELEMENT_TYPE::U8,
            PrimitiveKind::IntPtr => ELEMENT_TYPE::I,
            PrimitiveKind::UIntPtr => ELEMENT_TYPE::U,
            PrimitiveKind::Single => ELEMENT_TYPE::R4,
            PrimitiveKind::Double => ELEMENT_TYPE::R8,
        }
    }
}

/// The declared shape of a parameter type, as extracted by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeShape {
    /// Managed reference (`ref`, `in`, `out`), including value-type receivers
    ByRef,
    /// Stack-only value type (`ref struct`)
    ByRefLike,
    /// Unmanaged pointer
    Pointer,
    /// Unbound generic type or method parameter
    GenericParameter,
    /// One of the fixed primitive kinds
    Primitive(PrimitiveKind),
    /// A value type
    ValueType {
        /// Definition token in the declaring module
        token: Token,
        /// The module that declares the type
        module: ModuleId,
        /// Generic type definition or instantiation
        generic: bool,
    },
    /// Single or multi dimensional array
    Array,
    /// Reference type, including `System.String` and `System.Object`
    Class,
    /// Interface type
    Interface,
    /// Anything else the host could not describe (function pointers, typed references, ...)
    Other,
}

/// A formal parameter: its name and declared type shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterInfo {
    /// Declared name, empty when the metadata carries none
    pub name: String,
    /// Shape of the declared type
    pub shape: TypeShape,
}

impl ParameterInfo {
    /// Create a parameter description
    #[must_use]
    pub fn new(name: impl Into<String>, shape: TypeShape) -> Self {
        ParameterInfo {
            name: name.into(),
            shape,
        }
    }
}
