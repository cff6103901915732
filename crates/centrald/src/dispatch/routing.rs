//! Route table mapping request types to handlers.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use central_protocol::CodecError;

use super::errors::{HandlerError, RouteError};

/// Handler invoked with a request's `content`.
pub type RouteHandler = Box<dyn Fn(Value) -> Result<Value, HandlerError> + Send + Sync>;

/// Immutable mapping from request type to handler.
///
/// Built once with [`RoutingTable::builder`] and shared by every worker;
/// lookups are exact string matches.
pub struct RoutingTable {
    routes: HashMap<String, RouteHandler>,
}

impl RoutingTable {
    #[must_use]
    pub fn builder() -> RoutingTableBuilder {
        RoutingTableBuilder::default()
    }

    /// Returns `true` when `kind` has a handler.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.routes.contains_key(kind)
    }

    /// Registered request types, sorted.
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Invokes the handler registered for `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::UnknownRoute`] when nothing is registered for
    /// `kind`, or the handler's own error.
    pub fn dispatch(&self, kind: &str, content: Value) -> Result<Value, RouteError> {
        let handler = self
            .routes
            .get(kind)
            .ok_or_else(|| RouteError::UnknownRoute {
                kind: kind.to_owned(),
            })?;
        Ok(handler(content)?)
    }
}

impl fmt::Debug for RoutingTable {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RoutingTable")
            .field("routes", &self.kinds())
            .finish()
    }
}

/// Collects routes before the table is frozen.
#[derive(Default)]
pub struct RoutingTableBuilder {
    routes: HashMap<String, RouteHandler>,
}

impl RoutingTableBuilder {
    /// Registers a handler over raw JSON content. A later registration for
    /// the same type replaces the earlier one.
    #[must_use]
    pub fn route<F>(mut self, kind: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Value) -> Result<Value, HandlerError> + Send + Sync + 'static,
    {
        self.routes.insert(kind.into(), Box::new(handler));
        self
    }

    /// Registers a handler over typed content.
    ///
    /// Content that fails to decode as `T` is answered with a
    /// `failed to decode request` error without invoking `handler`.
    #[must_use]
    pub fn typed_route<T, R, F>(self, kind: impl Into<String>, handler: F) -> Self
    where
        T: DeserializeOwned,
        R: Serialize,
        F: Fn(T) -> Result<R, HandlerError> + Send + Sync + 'static,
    {
        self.route(kind, move |content| {
            let request = serde_json::from_value(content).map_err(CodecError::Content)?;
            let response = handler(request)?;
            serde_json::to_value(response).map_err(HandlerError::Encode)
        })
    }

    #[must_use]
    pub fn build(self) -> RoutingTable {
        RoutingTable {
            routes: self.routes,
        }
    }
}
