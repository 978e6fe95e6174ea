use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::address::Address;
use crate::error::Result;
use crate::layer::Layer;
use crate::resolution::Resolution;
use crate::stack::StackView;

/// Values keyed by their whole dotted path, as INI and `.properties` files
/// hold them. Only exact keys answer; there is no walking into values.
#[derive(Debug, Clone, Default)]
pub struct FlatLayer {
    name: String,
    entries: BTreeMap<String, Value>,
}

impl FlatLayer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn with_entries<I, K, V>(name: impl Into<String>, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            name: name.into(),
            entries: entries
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    /// Later inserts for the same key win.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Layer for FlatLayer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(&self, address: &Address, _below: StackView<'_>) -> Result<Resolution> {
        Ok(self.get(address.full()).cloned().into())
    }
}
