pub mod flat;
pub mod getter_layer;
pub mod key_expansion;
pub mod static_tree;
pub mod subtree;

use std::sync::Arc;

use async_trait::async_trait;

use crate::address::Address;
use crate::error::Result;
use crate::resolution::Resolution;
use crate::stack::{Config, StackView};

pub use flat::FlatLayer;
pub use getter_layer::GetterLayer;
pub use key_expansion::KeyExpansionLayer;
pub use static_tree::StaticLayer;
pub use subtree::SubtreeLayer;

/// One source in the stack. `resolve` reports absence as
/// `Resolution::Miss`; `Err` is reserved for real failures.
#[async_trait]
pub trait Layer: Send + Sync {
    fn name(&self) -> &str;

    async fn resolve(&self, address: &Address, below: StackView<'_>) -> Result<Resolution>;

    /// Whether string hits from this layer get `{{key}}` expansion.
    fn expands_templates(&self) -> bool {
        true
    }

    /// The config this layer embeds, if any.
    fn embedded(&self) -> Option<&Config> {
        None
    }
}

#[async_trait]
impl<L> Layer for Arc<L>
where
    L: Layer + ?Sized,
{
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn resolve(&self, address: &Address, below: StackView<'_>) -> Result<Resolution> {
        (**self).resolve(address, below).await
    }

    fn expands_templates(&self) -> bool {
        (**self).expands_templates()
    }

    fn embedded(&self) -> Option<&Config> {
        (**self).embedded()
    }
}
