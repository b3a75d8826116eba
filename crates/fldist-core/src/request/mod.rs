//! Script requests and correlation of their asynchronous results.
//!
//! A [`Request`] describes a script submission: its text, variables, TTL and
//! the named events it waits for. The [`Correlator`] turns the fire-and-forget
//! submission into a [`RequestHandle`] that settles on a result, a remote
//! error, or TTL expiry.

pub mod correlator;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::error::{DistError, Result};
use crate::transport::ParticleEvent;
use crate::types::Variables;

pub use correlator::{Completion, Correlator, RequestHandle};

/// Service name of the synthetic return event bound to `returnService`.
pub const RETURN_SERVICE: &str = "returnService";
/// Function name scripts call on [`RETURN_SERVICE`].
pub const RETURN_FUNCTION: &str = "run";
/// Service/function pair used by request-reply style scripts.
pub const CALLBACK_SERVICE: &str = "callback";
pub const CALLBACK_FUNCTION: &str = "callback";
/// Reserved event carrying script execution errors.
pub const ERROR_SERVICE: &str = "__errors";
pub const ERROR_FUNCTION: &str = "error";

/// Callback invoked for each matching result event.
pub type EventHandler = Arc<dyn Fn(&ParticleEvent) + Send + Sync>;

/// Name of a result event: the `(service, function)` pair a script calls back on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    pub service: String,
    pub function: String,
}

impl EventKey {
    pub fn new(service: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            function: function.into(),
        }
    }

    pub fn callback() -> Self {
        Self::new(CALLBACK_SERVICE, CALLBACK_FUNCTION)
    }

    pub fn return_event() -> Self {
        Self::new(RETURN_SERVICE, RETURN_FUNCTION)
    }

    pub fn is_error(service: &str, function: &str) -> bool {
        service == ERROR_SERVICE && function == ERROR_FUNCTION
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.service, self.function)
    }
}

/// How a request's completion settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultMode {
    /// The first matching event settles the request; TTL expiry is a failure.
    Single,
    /// Every matching event is observed; TTL expiry settles the request successfully.
    Multi,
}

/// A script submission under construction.
pub struct Request {
    pub(crate) script: String,
    pub(crate) variables: Variables,
    pub(crate) ttl: Option<Duration>,
    pub(crate) handlers: Vec<(EventKey, Option<EventHandler>)>,
    pub(crate) mode: ResultMode,
}

impl Request {
    pub fn new(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            variables: Variables::new(),
            ttl: None,
            handlers: Vec::new(),
            mode: ResultMode::Single,
        }
    }

    /// Bind a script variable. Fails only if `value` cannot be represented as JSON.
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Serialize) -> Result<Self> {
        let value = serde_json::to_value(value).map_err(DistError::Json)?;
        self.variables.insert(name.into(), value);
        Ok(self)
    }

    pub fn with_variables(mut self, variables: Variables) -> Self {
        self.variables.extend(variables);
        self
    }

    /// Override the session's default TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Wait for `service.function` without observing the payload separately.
    pub fn expect_event(mut self, service: impl Into<String>, function: impl Into<String>) -> Self {
        self.handlers.push((EventKey::new(service, function), None));
        self
    }

    /// Wait for `service.function` and call `handler` for each match.
    pub fn on_event<F>(
        mut self,
        service: impl Into<String>,
        function: impl Into<String>,
        handler: F,
    ) -> Self
    where
        F: Fn(&ParticleEvent) + Send + Sync + 'static,
    {
        self.handlers
            .push((EventKey::new(service, function), Some(Arc::new(handler))));
        self
    }

    /// Keep observing events until the TTL runs out.
    pub fn multi_result(mut self) -> Self {
        self.mode = ResultMode::Multi;
        self
    }

    pub fn mode(&self) -> ResultMode {
        self.mode
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let events: Vec<String> = self.handlers.iter().map(|(k, _)| k.to_string()).collect();
        f.debug_struct("Request")
            .field("variables", &self.variables.keys().collect::<Vec<_>>())
            .field("ttl", &self.ttl)
            .field("events", &events)
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_variables_and_events() {
        let request = Request::new("(null)")
            .with_variable("alias", "history")
            .unwrap()
            .with_variable("interval", 3)
            .unwrap()
            .expect_event("callback", "callback");

        assert_eq!(request.variables()["alias"], "history");
        assert_eq!(request.variables()["interval"], 3);
        assert_eq!(request.handlers.len(), 1);
        assert_eq!(request.handlers[0].0, EventKey::callback());
        assert_eq!(request.mode(), ResultMode::Single);
    }

    #[test]
    fn later_variables_override_earlier_ones() {
        let mut extra = Variables::new();
        extra.insert("node".into(), "override".into());
        let request = Request::new("(null)")
            .with_variable("node", "original")
            .unwrap()
            .with_variables(extra);
        assert_eq!(request.variables()["node"], "override");
    }

    #[test]
    fn error_event_key_is_reserved() {
        assert!(EventKey::is_error(ERROR_SERVICE, ERROR_FUNCTION));
        assert!(!EventKey::is_error(CALLBACK_SERVICE, CALLBACK_FUNCTION));
    }
}
