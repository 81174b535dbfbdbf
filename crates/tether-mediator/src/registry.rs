//! Technique registry
//!
//! Handlers are collected in a [`TechniqueRegistryBuilder`] at startup and then
//! frozen into a [`TechniqueRegistry`], which is read-only and shared between
//! connection tasks behind an `Arc`.

use crate::handler::ConnectionRequestHandler;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tether_core::{Result, TechniqueCode, TetherError};

type SharedHandler = Arc<dyn ConnectionRequestHandler>;

/// Collects handlers before the server starts
#[derive(Default)]
pub struct TechniqueRegistryBuilder {
    handlers: BTreeMap<TechniqueCode, SharedHandler>,
}

impl TechniqueRegistryBuilder {
    /// Empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under its own technique code
    pub fn register(&mut self, handler: SharedHandler) -> Result<&mut Self> {
        let code = handler.technique();
        self.register_as(code, handler)
    }

    /// Register `handler` under `code`.
    ///
    /// Fails on the reserved broker code and on a code that is already taken;
    /// the existing handler is kept in that case.
    pub fn register_as(&mut self, code: TechniqueCode, handler: SharedHandler) -> Result<&mut Self> {
        if code.is_reserved() {
            return Err(TetherError::ReservedTechnique { code });
        }
        if self.handlers.contains_key(&code) {
            tracing::warn!(code = %code, handler = handler.name(), "Technique already registered");
            return Err(TetherError::DuplicateTechnique { code });
        }
        tracing::debug!(code = %code, handler = handler.name(), "Registered traversal technique");
        self.handlers.insert(code, handler);
        Ok(self)
    }

    /// Freeze the registry
    pub fn build(self) -> TechniqueRegistry {
        TechniqueRegistry {
            handlers: self.handlers,
        }
    }
}

/// Read-only map from technique code to handler
pub struct TechniqueRegistry {
    handlers: BTreeMap<TechniqueCode, SharedHandler>,
}

impl TechniqueRegistry {
    /// Start collecting handlers
    pub fn builder() -> TechniqueRegistryBuilder {
        TechniqueRegistryBuilder::new()
    }

    /// Handler registered under `code`
    pub fn get(&self, code: TechniqueCode) -> Result<SharedHandler> {
        self.handlers
            .get(&code)
            .cloned()
            .ok_or(TetherError::UnknownTechnique { code })
    }

    /// Whether a handler is registered under `code`
    pub fn contains(&self, code: TechniqueCode) -> bool {
        self.handlers.contains_key(&code)
    }

    /// Registered codes in ascending order
    pub fn codes(&self) -> impl Iterator<Item = TechniqueCode> + '_ {
        self.handlers.keys().copied()
    }

    /// Number of registered techniques
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// True when no technique is registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for TechniqueRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.handlers.iter().map(|(code, handler)| (code, handler.name())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::MediatorLink;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use tether_core::Message;

    struct Fixed {
        code: TechniqueCode,
        name: &'static str,
    }

    #[async_trait]
    impl ConnectionRequestHandler for Fixed {
        fn technique(&self) -> TechniqueCode {
            self.code
        }

        fn name(&self) -> &str {
            self.name
        }

        async fn handle_connection_request(
            &self,
            _request: &Message,
            _link: &mut MediatorLink,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn handler(code: u32, name: &'static str) -> SharedHandler {
        Arc::new(Fixed {
            code: TechniqueCode::new(code),
            name,
        })
    }

    #[test]
    fn test_registered_handler_is_returned() {
        let direct = handler(0, "direct");
        let mut builder = TechniqueRegistry::builder();
        builder.register(direct.clone()).unwrap();
        let registry = builder.build();

        let found = registry.get(TechniqueCode::DIRECT).unwrap();
        assert!(Arc::ptr_eq(&found, &direct));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_distinct_codes_map_to_their_own_handlers() {
        let direct = handler(0, "direct");
        let nine = handler(9, "nine");
        let mut builder = TechniqueRegistry::builder();
        builder.register(direct.clone()).unwrap();
        builder.register(nine.clone()).unwrap();
        let registry = builder.build();

        let found_direct = registry.get(TechniqueCode::DIRECT).unwrap();
        let found_nine = registry.get(TechniqueCode::new(9)).unwrap();
        assert!(Arc::ptr_eq(&found_direct, &direct));
        assert!(Arc::ptr_eq(&found_nine, &nine));
        assert!(!Arc::ptr_eq(&found_direct, &found_nine));
        assert_eq!(found_nine.name(), "nine");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_code_keeps_first_handler() {
        let first = handler(7, "first");
        let second = handler(7, "second");
        let mut builder = TechniqueRegistry::builder();
        builder.register(first.clone()).unwrap();

        let err = builder.register(second).err().unwrap();
        assert_matches!(err, TetherError::DuplicateTechnique { code } if code == TechniqueCode::new(7));

        let registry = builder.build();
        let found = registry.get(TechniqueCode::new(7)).unwrap();
        assert!(Arc::ptr_eq(&found, &first));
        assert_eq!(found.name(), "first");
    }

    #[test]
    fn test_unknown_code_is_rejected() {
        let mut builder = TechniqueRegistry::builder();
        builder.register(handler(0, "direct")).unwrap();
        let registry = builder.build();

        assert_matches!(
            registry.get(TechniqueCode::new(42)).err().unwrap(),
            TetherError::UnknownTechnique { code } if code.value() == 42
        );
        assert!(!registry.contains(TechniqueCode::new(42)));
    }

    #[test]
    fn test_broker_code_is_reserved() {
        let mut builder = TechniqueRegistry::builder();
        let err = builder
            .register_as(TechniqueCode::BROKER, handler(1, "sneaky"))
            .err()
            .unwrap();
        assert_matches!(err, TetherError::ReservedTechnique { .. });
        assert!(builder.build().is_empty());
    }

    #[test]
    fn test_codes_are_sorted() {
        let mut builder = TechniqueRegistry::builder();
        builder
            .register(handler(9, "nine"))
            .unwrap()
            .register(handler(0, "zero"))
            .unwrap()
            .register_as(TechniqueCode::new(3), handler(9, "alias"))
            .unwrap();
        let registry = builder.build();
        let codes: Vec<u32> = registry.codes().map(TechniqueCode::value).collect();
        assert_eq!(codes, vec![0, 3, 9]);
    }
}
