//! Control channel messages
//!
//! Requests and responses exchanged between peers and the mediator: a class,
//! a method, a transaction id and an unordered set of typed attributes. At most
//! one attribute per type is kept; adding a second one replaces the first.

mod attribute;
mod codec;

pub use attribute::{
    Attribute, AttributeType, ErrorCode, TypedAttribute, Username, XorMappedAddress,
};
pub use codec::{MessageReader, DEFAULT_MAX_MESSAGE_SIZE, HEADER_LEN, MAGIC_COOKIE};

use crate::{Result, TetherError};
use std::fmt;

/// Message class (RFC 5389 class bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageClass {
    /// Request expecting (or, for register/deregister, tolerating no) response
    Request,
    /// One-way notification
    Indication,
    /// Successful response
    SuccessResponse,
    /// Error response carrying an ERROR-CODE attribute
    ErrorResponse,
}

impl MessageClass {
    pub(crate) fn bits(self) -> u16 {
        match self {
            Self::Request => 0b00,
            Self::Indication => 0b01,
            Self::SuccessResponse => 0b10,
            Self::ErrorResponse => 0b11,
        }
    }

    pub(crate) fn from_bits(bits: u16) -> Self {
        match bits & 0b11 {
            0b00 => Self::Request,
            0b01 => Self::Indication,
            0b10 => Self::SuccessResponse,
            _ => Self::ErrorResponse,
        }
    }

    /// Whether the class is one of the two response classes
    pub fn is_response(self) -> bool {
        matches!(self, Self::SuccessResponse | Self::ErrorResponse)
    }
}

/// Control channel methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageMethod {
    /// Register (or refresh) a target id
    Register = 0x010,
    /// Remove a target id
    Deregister = 0x011,
    /// Ask to be connected to a target id
    ConnectionRequest = 0x012,
}

impl MessageMethod {
    /// Parse a 12-bit method value
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x010 => Some(Self::Register),
            0x011 => Some(Self::Deregister),
            0x012 => Some(Self::ConnectionRequest),
            _ => None,
        }
    }
}

impl fmt::Display for MessageMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Register => "REGISTER",
            Self::Deregister => "DEREGISTER",
            Self::ConnectionRequest => "CONNECTION_REQUEST",
        };
        f.write_str(name)
    }
}

/// 96-bit transaction identifier pairing responses with requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(pub [u8; 12]);

impl TransactionId {
    /// Fresh random transaction id
    pub fn random() -> Self {
        let mut bytes = [0u8; 12];
        fastrand::fill(&mut bytes);
        Self(bytes)
    }
}

/// A control channel message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    class: MessageClass,
    method: MessageMethod,
    transaction_id: TransactionId,
    attributes: Vec<Attribute>,
}

impl Message {
    /// Empty message with a fresh transaction id
    pub fn new(class: MessageClass, method: MessageMethod) -> Self {
        Self::with_transaction_id(class, method, TransactionId::random())
    }

    /// Empty message with a given transaction id
    pub fn with_transaction_id(
        class: MessageClass,
        method: MessageMethod,
        transaction_id: TransactionId,
    ) -> Self {
        Self {
            class,
            method,
            transaction_id,
            attributes: Vec::new(),
        }
    }

    /// Empty request
    pub fn request(method: MessageMethod) -> Self {
        Self::new(MessageClass::Request, method)
    }

    /// Success response sharing this message's method and transaction id
    pub fn success_response(&self) -> Self {
        Self::with_transaction_id(
            MessageClass::SuccessResponse,
            self.method,
            self.transaction_id,
        )
    }

    /// Error response sharing this message's method and transaction id
    pub fn error_response(&self, code: u16, reason: impl Into<String>) -> Self {
        Self::with_transaction_id(MessageClass::ErrorResponse, self.method, self.transaction_id)
            .with_attribute(ErrorCode::new(code, reason))
    }

    /// Message class
    pub fn class(&self) -> MessageClass {
        self.class
    }

    /// Message method
    pub fn method(&self) -> MessageMethod {
        self.method
    }

    /// Transaction id
    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    /// All attributes, in insertion order
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Add an attribute, replacing any attribute of the same type
    pub fn add_attribute(&mut self, attribute: impl Into<Attribute>) {
        let attribute = attribute.into();
        let attribute_type = attribute.attribute_type();
        match self
            .attributes
            .iter_mut()
            .find(|existing| existing.attribute_type() == attribute_type)
        {
            Some(existing) => *existing = attribute,
            None => self.attributes.push(attribute),
        }
    }

    /// Builder form of [`add_attribute`](Self::add_attribute)
    pub fn with_attribute(mut self, attribute: impl Into<Attribute>) -> Self {
        self.add_attribute(attribute);
        self
    }

    /// Whether an attribute of `attribute_type` is present
    pub fn has_attribute(&self, attribute_type: AttributeType) -> bool {
        self.attributes
            .iter()
            .any(|attribute| attribute.attribute_type() == attribute_type)
    }

    /// Typed attribute lookup, `MissingAttribute` when absent
    pub fn attribute<A: TypedAttribute>(&self) -> Result<A> {
        self.attributes
            .iter()
            .find_map(A::from_attribute)
            .cloned()
            .ok_or_else(|| {
                TetherError::missing_attribute(
                    A::TYPE.name(),
                    format!("{:?} {}", self.class, self.method),
                )
            })
    }

    /// Whether this message answers `request`
    pub fn is_response_to(&self, request: &Message) -> bool {
        self.class.is_response()
            && self.method == request.method
            && self.transaction_id == request.transaction_id
    }
}
