use async_trait::async_trait;
use serde_json::Value;

use crate::address::Address;
use crate::error::Result;
use crate::layer::Layer;
use crate::resolution::Resolution;
use crate::stack::StackView;

/// A pre-parsed tree. Segments walk mappings by key and sequences by
/// decimal index.
#[derive(Debug, Clone)]
pub struct StaticLayer {
    name: String,
    tree: Value,
    subtrees: bool,
    expand: bool,
}

impl StaticLayer {
    pub fn new(name: impl Into<String>, tree: Value) -> Self {
        Self {
            name: name.into(),
            tree,
            subtrees: false,
            expand: true,
        }
    }

    /// Also answer with whole mappings, not only leaves. Lower layers then
    /// cannot fill in siblings under a key this layer returns.
    pub fn with_subtrees(mut self) -> Self {
        self.subtrees = true;
        self
    }

    /// Return strings verbatim, without `{{key}}` expansion.
    pub fn raw(mut self) -> Self {
        self.expand = false;
        self
    }

    pub fn tree(&self) -> &Value {
        &self.tree
    }

    pub fn lookup(&self, address: &Address) -> Option<&Value> {
        walk(&self.tree, address.segments())
    }
}

pub(crate) fn walk<'v>(tree: &'v Value, segments: &[String]) -> Option<&'v Value> {
    let mut cursor = tree;
    for segment in segments {
        cursor = match cursor {
            Value::Object(object) => object.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cursor)
}

#[async_trait]
impl Layer for StaticLayer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(&self, address: &Address, _below: StackView<'_>) -> Result<Resolution> {
        let resolution = match self.lookup(address) {
            Some(Value::Object(_)) if !self.subtrees => Resolution::Miss,
            Some(value) => Resolution::Hit(value.clone()),
            None => Resolution::Miss,
        };
        Ok(resolution)
    }

    fn expands_templates(&self) -> bool {
        self.expand
    }
}
