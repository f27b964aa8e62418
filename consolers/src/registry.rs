//! An explicit registry mapping connection-type tags to console constructors.
//!
//! This replaces runtime substitution of a host framework's factory function:
//! instead of patching a module-level callable, the registry is built once at
//! the composition root, seeded with the built-in transports plus whatever
//! transport crates register, and passed by reference to the device classes
//! that construct consoles.
//!
//! The host framework's original factory, when one exists, is captured once
//! as the fallback resolver. Unknown tags always delegate to that original —
//! never to another registry — so installing additional entries can neither
//! change the behavior of already-known types nor wrap itself twice.

use std::collections::BTreeMap;

use tracing::debug;

use crate::{
    ConnectionParams, ConsoleError, ConsoleSession, ManagedConsole, TcpBridge, require,
};

/// Constructor for one connection type: connection name and descriptor
/// parameters in, ready-to-login console out.
pub type Connector =
    Box<dyn Fn(&str, &ConnectionParams) -> Result<Box<dyn ManagedConsole>, ConsoleError>>;

/// Registry of connection-type tags to console constructors.
///
/// # Example
///
/// ```
/// use consolers::{ConnectionParams, ConnectionRegistry};
///
/// let registry = ConnectionRegistry::new();
/// assert!(registry.has_type("ser2net"));
///
/// let err = registry
///     .resolve("carrier-pigeon", "board.console", &ConnectionParams::default())
///     .unwrap_err();
/// assert!(err.to_string().contains("carrier-pigeon"));
/// ```
pub struct ConnectionRegistry {
    connectors: BTreeMap<String, Connector>,
    fallback: Option<Connector>,
}

impl ConnectionRegistry {
    /// Create a registry seeded with the built-in transports.
    ///
    /// Currently that is `"ser2net"`, backed by [`TcpBridge`].
    pub fn new() -> Self {
        let mut registry = ConnectionRegistry::empty();
        registry.register(
            "ser2net",
            Box::new(|name, params| {
                let bridge = TcpBridge::from_params(params)?;
                Ok(Box::new(ConsoleSession::from_params(name, bridge, params)?))
            }),
        );
        registry
    }

    /// Create a registry with no entries at all. Mostly useful in tests.
    pub fn empty() -> Self {
        ConnectionRegistry {
            connectors: BTreeMap::new(),
            fallback: None,
        }
    }

    /// Create a seeded registry that delegates unknown tags to `fallback`.
    ///
    /// The fallback is stored once; re-registering entries later never wraps
    /// or replaces it.
    pub fn with_fallback(fallback: Connector) -> Self {
        let mut registry = ConnectionRegistry::new();
        registry.fallback = Some(fallback);
        registry
    }

    /// Register a constructor for `tag`.
    ///
    /// Registering the same tag again replaces the entry, so installing a
    /// transport twice leaves observable `resolve` results unchanged.
    pub fn register(&mut self, tag: &str, connector: Connector) {
        if self.connectors.insert(tag.to_string(), connector).is_some() {
            debug!(%tag, "connection type re-registered");
        }
    }

    /// Whether `tag` has a registered constructor (the fallback not counted).
    pub fn has_type(&self, tag: &str) -> bool {
        self.connectors.contains_key(tag)
    }

    /// All registered tags, sorted.
    pub fn available_types(&self) -> Vec<&str> {
        self.connectors.keys().map(String::as_str).collect()
    }

    /// Construct a console for `connection_type`.
    ///
    /// Registered tags win; unknown tags are passed through to the fallback
    /// resolver unchanged. Without a fallback, an unknown tag fails with
    /// [`ConsoleError::UnknownConnectionType`].
    pub fn resolve(
        &self,
        connection_type: &str,
        name: &str,
        params: &ConnectionParams,
    ) -> Result<Box<dyn ManagedConsole>, ConsoleError> {
        if let Some(connector) = self.connectors.get(connection_type) {
            return connector(name, params);
        }
        if let Some(fallback) = &self.fallback {
            return fallback(name, params);
        }
        Err(ConsoleError::UnknownConnectionType(
            connection_type.to_string(),
        ))
    }

    /// Resolve using the `connection_type` field of the descriptor itself.
    pub fn resolve_from(
        &self,
        name: &str,
        params: &ConnectionParams,
    ) -> Result<Box<dyn ManagedConsole>, ConsoleError> {
        let connection_type = require("connection_type", &params.connection_type)?;
        self.resolve(connection_type, name, params)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        ConnectionRegistry::new()
    }
}
