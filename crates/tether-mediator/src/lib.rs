//! # Tether Mediator
//!
//! The rendezvous side of tether. Peers hold a control connection to the
//! mediator; targets register an id on it, sources ask to be connected to an
//! id. Connection requests are routed by the [`RendezvousBroker`] to the
//! [`ConnectionRequestHandler`] registered for the requested technique.
//!
//! ```text
//! control connection ─► server ─► REGISTER / DEREGISTER ─► RegistrationTable
//!                               └► CONNECTION_REQUEST ─► broker ─► handler
//! ```

#![forbid(unsafe_code)]

pub mod broker;
pub mod config;
pub mod handler;
pub mod handlers;
pub mod registrations;
pub mod registry;
pub mod server;

pub use broker::RendezvousBroker;
pub use config::MediatorConfig;
pub use handler::{ConnectionId, ConnectionRequestHandler, MediatorLink};
pub use handlers::{builtin_registry, DirectConnectionHandler};
pub use registrations::{RegisteredTarget, RegistrationTable};
pub use registry::{TechniqueRegistry, TechniqueRegistryBuilder};
pub use server::{MediatorHandle, MediatorServer};
