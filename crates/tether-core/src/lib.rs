//! # Tether Core
//!
//! Foundation crate shared by peers and the mediator:
//!
//! - [`errors`]: the closed [`TetherError`] enumeration and `Result` alias
//! - [`technique`]: [`TechniqueCode`], technique metadata and the peer-side
//!   [`TraversalTechnique`] contract
//! - [`messages`]: control channel messages and their STUN-style codec
//! - [`config`]: file/env configuration loading

#![forbid(unsafe_code)]

pub mod config;
pub mod errors;
pub mod messages;
pub mod technique;

pub use config::TetherConfig;
pub use errors::{Result, TetherError};
pub use messages::{
    Attribute, AttributeType, ErrorCode, Message, MessageClass, MessageMethod, MessageReader,
    TransactionId, TypedAttribute, Username, XorMappedAddress,
};
pub use technique::{TechniqueCode, TechniqueMetadata, TraversalTechnique};
