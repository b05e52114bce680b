//! Builders for test data

use std::time::Duration;

use crate::{
    capture::{CapturingRequestPayload, RequestId},
    metadata::{
        method::{MethodDescription, MethodId, ModuleId, ResolvedMethod},
        token::Token,
        typesystem::{ParameterInfo, TypeShape},
    },
};

/// Module every builder-made method is declared in
pub const TEST_MODULE: ModuleId = ModuleId(1);

/// Fluent builder for [`ResolvedMethod`]
pub struct MethodBuilder {
    token: Token,
    name: String,
    receiver: Option<TypeShape>,
    parameters: Vec<ParameterInfo>,
    signature: &'static [u8],
}

impl MethodBuilder {
    // Instance method on a reference type
    pub fn instance(name: impl Into<String>) -> Self {
        Self::create(name, Some(TypeShape::Class))
    }

    // Static method, no receiver slot
    pub fn static_method(name: impl Into<String>) -> Self {
        Self::create(name, None)
    }

    fn create(name: impl Into<String>, receiver: Option<TypeShape>) -> Self {
        MethodBuilder {
            token: Token::new(0x0600_0001),
            name: name.into(),
            receiver,
            parameters: Vec::new(),
            signature: &[],
        }
    }

    pub fn token(mut self, token: u32) -> Self {
        self.token = Token::new(token);
        self
    }

    pub fn receiver(mut self, shape: TypeShape) -> Self {
        self.receiver = Some(shape);
        self
    }

    pub fn param(mut self, name: &str, shape: TypeShape) -> Self {
        self.parameters.push(ParameterInfo::new(name, shape));
        self
    }

    pub fn signature(mut self, signature: &'static [u8]) -> Self {
        self.signature = signature;
        self
    }

    pub fn build(self) -> ResolvedMethod {
        ResolvedMethod {
            id: MethodId::new(TEST_MODULE, self.token),
            declaring_type: "Shop.Orders".to_string(),
            name: self.name,
            receiver: self.receiver,
            parameters: self.parameters,
            signature: self.signature,
        }
    }
}

// Identity of a method in the test module
pub fn test_method_id(token: u32) -> MethodId {
    MethodId::new(TEST_MODULE, Token::new(token))
}

// Description of `Shop.Orders::<method>` in `Shop.dll`
pub fn describe(method: &str) -> MethodDescription {
    MethodDescription::new("Shop.dll", "Shop.Orders", method)
}

// Payload running for half an hour without a capture limit
pub fn payload(id: u128, methods: &[&str]) -> CapturingRequestPayload {
    payload_with(id, methods, Duration::from_secs(30 * 60), None)
}

pub fn payload_with(
    id: u128,
    methods: &[&str],
    duration: Duration,
    capture_limit: Option<u64>,
) -> CapturingRequestPayload {
    CapturingRequestPayload {
        request_id: RequestId::from_u128(id),
        methods: methods.iter().map(|method| describe(method)).collect(),
        duration,
        capture_limit,
    }
}
