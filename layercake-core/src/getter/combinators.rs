use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{GetterFailure, Result};
use crate::getter::{Getter, GetterRequest};
use crate::resolution::Resolution;
use crate::stack::StackView;

/// Asks each getter in turn; the first one that does not miss decides.
#[derive(Clone)]
pub struct Chain {
    name: String,
    getters: Vec<Arc<dyn Getter>>,
}

impl Chain {
    pub fn new() -> Self {
        Self {
            name: "chain".to_owned(),
            getters: Vec::new(),
        }
    }

    pub fn from_shared(getters: Vec<Arc<dyn Getter>>) -> Self {
        Self {
            getters,
            ..Self::new()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn then<G>(mut self, getter: G) -> Self
    where
        G: Getter + 'static,
    {
        self.getters.push(Arc::new(getter));
        self
    }

    pub fn len(&self) -> usize {
        self.getters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.getters.is_empty()
    }
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("name", &self.name)
            .field(
                "getters",
                &self.getters.iter().map(|getter| getter.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[async_trait]
impl Getter for Chain {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, request: &GetterRequest, below: StackView<'_>) -> Result<Resolution> {
        for getter in &self.getters {
            let outcome = getter.handle(request, below).await?;
            if outcome.halts() {
                return Ok(outcome);
            }
        }
        Ok(Resolution::Miss)
    }
}

type TransformFn = dyn Fn(Value) -> std::result::Result<Value, String> + Send + Sync;

/// Post-processes hits of an inner getter. A failing transform is a
/// `GetterFailure::Transform` error, or a miss when lenient.
#[derive(Clone)]
pub struct Transform {
    name: String,
    inner: Arc<dyn Getter>,
    transform: Arc<TransformFn>,
    lenient: bool,
}

impl Transform {
    pub fn new<G, F>(inner: G, transform: F) -> Self
    where
        G: Getter + 'static,
        F: Fn(Value) -> std::result::Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: format!("transform({})", inner.name()),
            inner: Arc::new(inner),
            transform: Arc::new(transform),
            lenient: false,
        }
    }

    /// Treat transform failures as misses so lower layers get a chance.
    pub fn lenient(mut self) -> Self {
        self.lenient = true;
        self
    }

    /// Parses string hits as integers.
    pub fn integer<G>(inner: G) -> Self
    where
        G: Getter + 'static,
    {
        Self::new(inner, |value| match value {
            Value::String(text) => text
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|err| format!("'{text}' is not an integer: {err}")),
            Value::Number(_) => Ok(value),
            other => Err(format!("expected an integer, got {other}")),
        })
    }

    /// Parses string hits as booleans (`true/false`, `yes/no`, `on/off`, `1/0`).
    pub fn boolean<G>(inner: G) -> Self
    where
        G: Getter + 'static,
    {
        Self::new(inner, |value| match value {
            Value::Bool(_) => Ok(value),
            Value::String(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(Value::Bool(true)),
                "false" | "no" | "off" | "0" => Ok(Value::Bool(false)),
                _ => Err(format!("'{text}' is not a boolean")),
            },
            other => Err(format!("expected a boolean, got {other}")),
        })
    }
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform")
            .field("name", &self.name)
            .field("lenient", &self.lenient)
            .finish()
    }
}

#[async_trait]
impl Getter for Transform {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, request: &GetterRequest, below: StackView<'_>) -> Result<Resolution> {
        let Resolution::Hit(value) = self.inner.handle(request, below).await? else {
            return Ok(Resolution::Miss);
        };
        match (self.transform)(value) {
            Ok(value) => Ok(Resolution::Hit(value)),
            Err(reason) if self.lenient => {
                tracing::debug!(
                    getter = %self.name,
                    key = request.address().full(),
                    %reason,
                    "transform failed; treating as miss"
                );
                Ok(Resolution::Miss)
            }
            Err(reason) => Err(request.fail(&self.name, GetterFailure::Transform(reason))),
        }
    }
}

/// Gives one getter its own deadline, tighter than the lookup's.
#[derive(Clone)]
pub struct WithTimeout {
    inner: Arc<dyn Getter>,
    timeout: Duration,
}

impl WithTimeout {
    pub fn new<G>(inner: G, timeout: Duration) -> Self
    where
        G: Getter + 'static,
    {
        Self {
            inner: Arc::new(inner),
            timeout,
        }
    }
}

impl fmt::Debug for WithTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WithTimeout")
            .field("inner", &self.inner.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl Getter for WithTimeout {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn handle(&self, request: &GetterRequest, below: StackView<'_>) -> Result<Resolution> {
        match tokio::time::timeout(self.timeout, self.inner.handle(request, below)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(
                    getter = self.inner.name(),
                    key = request.address().full(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "getter timed out"
                );
                Err(request.fail(self.inner.name(), GetterFailure::Timeout(self.timeout)))
            }
        }
    }
}

/// Hands the inner getter only the bound key, so `db.primary.url` bound
/// under `db` is asked as `db`. The inner answer stands for every deeper key.
#[derive(Debug, Clone)]
pub struct BaseKey<G> {
    inner: G,
}

impl<G: Getter> BaseKey<G> {
    pub fn new(inner: G) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<G: Getter> Getter for BaseKey<G> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn handle(&self, request: &GetterRequest, below: StackView<'_>) -> Result<Resolution> {
        self.inner.handle(&request.for_bound_key(), below).await
    }
}

/// Hands the inner getter the whole requested address as if it were bound
/// to all of it, so getters that only answer exact keys see deeper ones too.
#[derive(Debug, Clone)]
pub struct FullKey<G> {
    inner: G,
}

impl<G: Getter> FullKey<G> {
    pub fn new(inner: G) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<G: Getter> Getter for FullKey<G> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn handle(&self, request: &GetterRequest, below: StackView<'_>) -> Result<Resolution> {
        self.inner.handle(&request.for_full_key(), below).await
    }
}
