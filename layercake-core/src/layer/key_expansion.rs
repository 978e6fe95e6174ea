use async_trait::async_trait;

use crate::address::Address;
use crate::error::Result;
use crate::layer::Layer;
use crate::resolution::Resolution;
use crate::stack::StackView;
use crate::template;

/// Expands `{{key}}` placeholders in the requested address itself against
/// the stack below, then answers with whatever the expanded address holds
/// there. With `profile = "prod"` below, `env.{{profile}}.url` reads
/// `env.prod.url`. Addresses without placeholders, or whose placeholders
/// are absent below, are misses.
#[derive(Debug, Clone)]
pub struct KeyExpansionLayer {
    name: String,
}

impl KeyExpansionLayer {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for KeyExpansionLayer {
    fn default() -> Self {
        Self::new("key-expansion")
    }
}

#[async_trait]
impl Layer for KeyExpansionLayer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(&self, address: &Address, below: StackView<'_>) -> Result<Resolution> {
        if !template::has_placeholders(address.full()) {
            return Ok(Resolution::Miss);
        }
        let Some(expanded) = template::try_render(address.full(), address, below).await? else {
            tracing::trace!(
                layer = %self.name,
                path = address.full(),
                "key placeholders absent below"
            );
            return Ok(Resolution::Miss);
        };

        let expanded = Address::parse(&expanded)?;
        tracing::trace!(
            layer = %self.name,
            path = address.full(),
            expanded = expanded.full(),
            "expanded requested key"
        );
        let lookup = below.lookup();
        let _active = lookup.enter_expansion(below.config().id(), expanded.full())?;
        below.resolve(&expanded).await
    }

    // Hits come from the stack below, already expanded there.
    fn expands_templates(&self) -> bool {
        false
    }
}
