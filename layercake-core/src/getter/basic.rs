use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::getter::{Getter, GetterRequest};
use crate::layer::static_tree::walk;
use crate::resolution::Resolution;
use crate::stack::StackView;

/// A fixed value. Segments past the bound key walk into it.
#[derive(Debug, Clone)]
pub struct Constant {
    value: Value,
}

impl Constant {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

#[async_trait]
impl Getter for Constant {
    fn name(&self) -> &str {
        "constant"
    }

    async fn handle(&self, request: &GetterRequest, _below: StackView<'_>) -> Result<Resolution> {
        Ok(walk(&self.value, request.remaining()).cloned().into())
    }
}

/// Ends the whole search without a value.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stop;

#[async_trait]
impl Getter for Stop {
    fn name(&self) -> &str {
        "stop"
    }

    async fn handle(&self, _request: &GetterRequest, _below: StackView<'_>) -> Result<Resolution> {
        Ok(Resolution::Stop)
    }
}

type ComputeFn = dyn Fn(&GetterRequest) -> Result<Resolution> + Send + Sync;

/// A getter backed by a synchronous closure.
#[derive(Clone)]
pub struct Computed {
    name: String,
    compute: Arc<ComputeFn>,
}

impl Computed {
    pub fn new<F>(name: impl Into<String>, compute: F) -> Self
    where
        F: Fn(&GetterRequest) -> Result<Resolution> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            compute: Arc::new(compute),
        }
    }
}

impl fmt::Debug for Computed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Getter for Computed {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, request: &GetterRequest, _below: StackView<'_>) -> Result<Resolution> {
        (self.compute)(request)
    }
}

/// Answers 1, 2, 3... on successive calls. Handy for observing how often a
/// source is actually consulted behind a cache.
#[derive(Debug, Default)]
pub struct Counter {
    name: String,
    calls: AtomicU64,
}

impl Counter {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            calls: AtomicU64::new(0),
        }
    }

    pub fn count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Getter for Counter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, _request: &GetterRequest, _below: StackView<'_>) -> Result<Resolution> {
        let next = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Resolution::hit(next))
    }
}
