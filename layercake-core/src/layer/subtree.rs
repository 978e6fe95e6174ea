use std::sync::Arc;

use async_trait::async_trait;

use crate::address::Address;
use crate::error::Result;
use crate::layer::Layer;
use crate::resolution::Resolution;
use crate::stack::{Config, StackView};

/// Mounts another config under `prefix`. `prefix.x.y` is answered by the
/// nested config's `x.y`; the prefix itself is never a hit.
pub struct SubtreeLayer {
    name: String,
    prefix: Address,
    config: Arc<Config>,
}

impl SubtreeLayer {
    pub fn new(prefix: &str, config: Arc<Config>) -> Result<Self> {
        let prefix = Address::parse(prefix)?;
        Ok(Self {
            name: format!("subtree:{prefix}"),
            prefix,
            config,
        })
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn prefix(&self) -> &Address {
        &self.prefix
    }
}

#[async_trait]
impl Layer for SubtreeLayer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(&self, address: &Address, below: StackView<'_>) -> Result<Resolution> {
        let Some(Some(rest)) = address.strip_prefix(&self.prefix) else {
            return Ok(Resolution::Miss);
        };

        let lookup = below.lookup();
        let _entered = lookup.enter_subtree(self.config.id(), rest.full())?;
        // The nested key heads its own expansion chain, as it would when the
        // nested config is queried directly.
        let _active = lookup.enter_expansion(self.config.id(), rest.full())?;
        tracing::trace!(
            layer = %self.name,
            nested = self.config.name(),
            path = rest.full(),
            "entering subtree"
        );
        let nested = self.config.view(lookup);
        nested.resolve(&rest).await
    }

    // The nested stack already expanded its own hits against its own layers.
    fn expands_templates(&self) -> bool {
        false
    }

    fn embedded(&self) -> Option<&Config> {
        Some(&self.config)
    }
}
