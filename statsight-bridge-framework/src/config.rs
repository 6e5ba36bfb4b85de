//! Configuration traits and utilities.

use std::path::Path;

use statsight_common::{Document, LoggingConfig, load_document};

/// Trait for bridge configuration types.
///
/// Bridges build their typed configuration from a loosely-typed
/// [`Document`], so every default and every missing field is decided by the
/// bridge rather than by derived deserialization.
///
/// # Example
///
/// ```ignore
/// use statsight_bridge_framework::BridgeConfig;
/// use statsight_common::{Document, LoggingConfig};
///
/// pub struct MyBridgeConfig {
///     logging: LoggingConfig,
///     endpoint: String,
/// }
///
/// impl BridgeConfig for MyBridgeConfig {
///     type Error = MyConfigError;
///
///     fn from_document(doc: &Document) -> Result<Self, Self::Error> {
///         let endpoint = doc
///             .get("Endpoint")
///             .and_then(|v| v.as_str())
///             .ok_or(MyConfigError::MissingField("Endpoint"))?;
///         Ok(Self { logging: LoggingConfig::default(), endpoint: endpoint.to_string() })
///     }
///
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
/// }
/// ```
pub trait BridgeConfig: Sized {
    /// Error produced while building or validating the configuration.
    type Error: std::error::Error + Send + Sync + 'static + From<statsight_common::Error>;

    /// Build the typed configuration from a parsed document.
    fn from_document(doc: &Document) -> Result<Self, Self::Error>;

    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Validate the configuration.
    ///
    /// Called automatically after building. Override to add cross-field checks.
    fn validate(&self) -> Result<(), Self::Error> {
        Ok(())
    }

    /// Load configuration from a file path.
    ///
    /// Supports JSON and JSON5. Calls [`validate`](Self::validate) after building.
    fn load(path: impl AsRef<Path>) -> Result<Self, Self::Error> {
        let doc = load_document(path)?;
        let config = Self::from_document(&doc)?;

        config.validate()?;

        Ok(config)
    }
}
