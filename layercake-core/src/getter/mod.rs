pub mod basic;
pub mod combinators;
pub mod env;
pub mod reference;

use std::sync::Arc;

use async_trait::async_trait;

use crate::address::Address;
use crate::error::{Error, GetterFailure, Result};
use crate::resolution::Resolution;
use crate::stack::StackView;

pub use basic::{Computed, Constant, Counter, Stop};
pub use combinators::{BaseKey, Chain, FullKey, Transform, WithTimeout};
pub use env::{Env, EnvSource, MapEnv, ProcessEnv};
pub use reference::{Graft, Reference};

/// Produces a value on demand for a bound key. Implementations report
/// absence with `Resolution::Miss` and reserve `Err` for failures.
#[async_trait]
pub trait Getter: Send + Sync {
    fn name(&self) -> &str;

    /// `below` is the stack strictly under the layer that holds this getter.
    async fn handle(&self, request: &GetterRequest, below: StackView<'_>) -> Result<Resolution>;
}

#[async_trait]
impl<G> Getter for Arc<G>
where
    G: Getter + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn handle(&self, request: &GetterRequest, below: StackView<'_>) -> Result<Resolution> {
        (**self).handle(request, below).await
    }
}

/// What a getter is asked for: the full address, the prefix it was bound
/// under and any wildcard captures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetterRequest {
    address: Address,
    bound: Option<Address>,
    captures: Vec<String>,
}

impl GetterRequest {
    pub fn new(address: Address, bound: Option<Address>, captures: Vec<String>) -> Self {
        Self {
            address,
            bound,
            captures,
        }
    }

    /// A request for `address` as if the getter were bound to all of it.
    pub fn exact(address: Address) -> Self {
        Self {
            bound: Some(address.clone()),
            address,
            captures: Vec::new(),
        }
    }

    /// The same request narrowed to the bound key, dropping the segments
    /// after it. Root requests have no bound key and come back unchanged.
    pub fn for_bound_key(&self) -> Self {
        match &self.bound {
            Some(bound) => Self {
                address: bound.clone(),
                bound: Some(bound.clone()),
                captures: self.captures.clone(),
            },
            None => self.clone(),
        }
    }

    /// The same request with the whole address treated as the bound key.
    pub fn for_full_key(&self) -> Self {
        Self {
            address: self.address.clone(),
            bound: Some(self.address.clone()),
            captures: self.captures.clone(),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// `None` for root bindings.
    pub fn bound_key(&self) -> Option<&str> {
        self.bound.as_ref().map(Address::full)
    }

    /// The segments after the bound prefix, `None` when the address is
    /// exactly the bound key.
    pub fn rest(&self) -> Option<Address> {
        match &self.bound {
            Some(bound) => self.address.skip(bound.len()),
            None => Some(self.address.clone()),
        }
    }

    pub fn remaining(&self) -> &[String] {
        let skipped = self.bound.as_ref().map_or(0, Address::len);
        &self.address.segments()[skipped..]
    }

    pub fn is_exact(&self) -> bool {
        self.remaining().is_empty()
    }

    pub fn captures(&self) -> &[String] {
        &self.captures
    }

    pub fn capture(&self, index: usize) -> Option<&str> {
        self.captures.get(index).map(String::as_str)
    }

    pub fn fail(&self, getter: &str, failure: GetterFailure) -> Error {
        Error::getter(self.address.full(), getter, failure)
    }

    pub fn backend_error(&self, getter: &str, message: impl Into<String>) -> Error {
        self.fail(getter, GetterFailure::Backend(message.into()))
    }
}
