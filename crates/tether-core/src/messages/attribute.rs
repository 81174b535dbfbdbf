//! Typed message attributes
//!
//! Each attribute type has one Rust type; `TypedAttribute` lets callers pull
//! an attribute out of a [`Message`](super::Message) by type, mirroring how the
//! mediator and peers look up "the username" or "the mapped address".

use crate::technique::TechniqueCode;
use std::fmt;
use std::net::SocketAddr;

/// Attribute type codes (RFC 5389 numbering plus one comprehension-optional extension)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum AttributeType {
    /// Target identifier
    Username = 0x0006,
    /// Error class, number and reason phrase
    ErrorCode = 0x0009,
    /// Publicly reachable endpoint, XOR-obfuscated on the wire
    XorMappedAddress = 0x0020,
    /// Requested traversal technique code
    TraversalTechnique = 0x8050,
}

impl AttributeType {
    /// Parse a wire type, `None` for types this codec does not understand
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0006 => Some(Self::Username),
            0x0009 => Some(Self::ErrorCode),
            0x0020 => Some(Self::XorMappedAddress),
            0x8050 => Some(Self::TraversalTechnique),
            _ => None,
        }
    }

    /// Name used in error messages
    pub fn name(self) -> &'static str {
        match self {
            Self::Username => "USERNAME",
            Self::ErrorCode => "ERROR-CODE",
            Self::XorMappedAddress => "XOR-MAPPED-ADDRESS",
            Self::TraversalTechnique => "TRAVERSAL-TECHNIQUE",
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifier a target registers under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Username(pub String);

impl Username {
    /// Create a username attribute
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Endpoint the mediator observed for a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct XorMappedAddress(pub SocketAddr);

impl XorMappedAddress {
    /// The carried endpoint
    pub fn endpoint(&self) -> SocketAddr {
        self.0
    }
}

/// Error response details
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ErrorCode {
    /// Three digit code, 300..=699
    pub code: u16,
    /// Reason phrase
    pub reason: String,
}

impl ErrorCode {
    /// Bad request: a required attribute is missing or invalid
    pub const BAD_REQUEST: u16 = 400;
    /// The requested target is not registered
    pub const NOT_FOUND: u16 = 404;
    /// The technique code is unknown or reserved
    pub const UNKNOWN_TECHNIQUE: u16 = 420;
    /// Handler failure on the mediator
    pub const SERVER_ERROR: u16 = 500;

    /// Create an error code attribute
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// Any attribute a message can carry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Attribute {
    Username(Username),
    ErrorCode(ErrorCode),
    XorMappedAddress(XorMappedAddress),
    TraversalTechnique(TechniqueCode),
}

impl Attribute {
    /// Type of this attribute
    pub fn attribute_type(&self) -> AttributeType {
        match self {
            Self::Username(_) => AttributeType::Username,
            Self::ErrorCode(_) => AttributeType::ErrorCode,
            Self::XorMappedAddress(_) => AttributeType::XorMappedAddress,
            Self::TraversalTechnique(_) => AttributeType::TraversalTechnique,
        }
    }
}

/// Attribute value retrievable from a message by type
pub trait TypedAttribute: Clone + Into<Attribute> {
    /// Wire type of the attribute
    const TYPE: AttributeType;

    /// Borrow the value if `attribute` has this type
    fn from_attribute(attribute: &Attribute) -> Option<&Self>;
}

macro_rules! typed_attribute {
    ($ty:ty, $variant:ident) => {
        impl TypedAttribute for $ty {
            const TYPE: AttributeType = AttributeType::$variant;

            fn from_attribute(attribute: &Attribute) -> Option<&Self> {
                match attribute {
                    Attribute::$variant(value) => Some(value),
                    _ => None,
                }
            }
        }

        impl From<$ty> for Attribute {
            fn from(value: $ty) -> Self {
                Attribute::$variant(value)
            }
        }
    };
}

typed_attribute!(Username, Username);
typed_attribute!(ErrorCode, ErrorCode);
typed_attribute!(XorMappedAddress, XorMappedAddress);
typed_attribute!(TechniqueCode, TraversalTechnique);
