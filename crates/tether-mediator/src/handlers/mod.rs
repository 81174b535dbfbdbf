//! Built-in technique handlers

mod direct;

pub use direct::DirectConnectionHandler;

use crate::registrations::RegistrationTable;
use crate::registry::{TechniqueRegistry, TechniqueRegistryBuilder};
use std::sync::Arc;
use tether_core::Result;

/// Builder preloaded with every built-in handler
pub fn builtin_registry(registrations: Arc<RegistrationTable>) -> Result<TechniqueRegistryBuilder> {
    let mut builder = TechniqueRegistry::builder();
    builder.register(Arc::new(DirectConnectionHandler::new(registrations)))?;
    Ok(builder)
}
