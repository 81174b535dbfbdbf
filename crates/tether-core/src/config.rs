//! Configuration loading shared by the peer and mediator configs
//!
//! Config structs derive `serde` with `#[serde(default)]`, so a file only needs
//! to name the fields it overrides. Loading dispatches on the file extension.

use crate::{Result, TetherError};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Behaviour shared by every tether configuration struct
pub trait TetherConfig: DeserializeOwned + Default {
    /// Load from a `.toml` or `.json` file
    fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TetherError::config(format!("Failed to read config file {}: {e}", path.display()))
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => toml::from_str(&content)
                .map_err(|e| TetherError::config(format!("Invalid TOML: {e}"))),
            Some("json") => serde_json::from_str(&content)
                .map_err(|e| TetherError::config(format!("Invalid JSON: {e}"))),
            _ => Err(TetherError::config(format!(
                "Unsupported config format: {}",
                path.display()
            ))),
        }
    }

    /// Apply `TETHER_*` environment overrides
    fn merge_with_env(&mut self) -> Result<()> {
        Ok(())
    }

    /// Check invariants the type system cannot express
    fn validate(&self) -> Result<()>;

    /// Load a file if given (defaults otherwise), apply env overrides, validate
    fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.merge_with_env()?;
        config.validate()?;
        Ok(config)
    }
}

/// Parse an environment variable if it is set
pub fn env_override<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| TetherError::config(format!("Invalid value in {name}: {raw}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    #[serde(default)]
    struct SampleConfig {
        port: u16,
        name: String,
    }

    impl TetherConfig for SampleConfig {
        fn validate(&self) -> Result<()> {
            if self.port == 0 {
                return Err(TetherError::config("port cannot be 0"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_load_toml_with_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "port = 4000").unwrap();

        let config = SampleConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.name, "");
    }

    #[test]
    fn test_load_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"port": 9, "name": "m"}}"#).unwrap();

        let config = SampleConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.name, "m");
    }

    #[test]
    fn test_invalid_configs_are_rejected() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "port: 1").unwrap();
        assert!(matches!(
            SampleConfig::load_from_file(file.path()),
            Err(TetherError::Config { .. })
        ));

        // Defaults fail validation (port 0)
        assert!(SampleConfig::load(None).is_err());
    }
}
