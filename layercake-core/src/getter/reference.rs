use std::sync::Arc;

use async_trait::async_trait;

use crate::address::Address;
use crate::error::Result;
use crate::getter::{Getter, GetterRequest};
use crate::layer::Layer;
use crate::resolution::Resolution;
use crate::stack::StackView;
use crate::template;

/// Answers with whatever the stack below holds at another key. The target
/// may itself contain `{{key}}` placeholders, which are expanded first;
/// `{{0}}`, `{{1}}` and so on name the wildcard captures of the binding.
/// Segments past the bound key are appended to the target.
#[derive(Debug, Clone)]
pub struct Reference {
    target: String,
}

impl Reference {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    async fn target_address(&self, request: &GetterRequest, below: StackView<'_>) -> Result<Address> {
        let target = if template::has_placeholders(&self.target) {
            template::render_with_captures(
                &self.target,
                request.address(),
                below,
                request.captures(),
            )
            .await?
        } else {
            self.target.clone()
        };
        let target = Address::parse(&target)?;
        Ok(match (request.bound_key(), request.rest()) {
            (Some(_), Some(rest)) => target.join(&rest),
            _ => target,
        })
    }
}

#[async_trait]
impl Getter for Reference {
    fn name(&self) -> &str {
        "reference"
    }

    async fn handle(&self, request: &GetterRequest, below: StackView<'_>) -> Result<Resolution> {
        let target = self.target_address(request, below).await?;
        let lookup = below.lookup();
        let _active = lookup.enter_expansion(below.config().id(), target.full())?;
        below.resolve(&target).await
    }
}

/// Hangs another layer under the bound key: `key.x.y` is answered by the
/// grafted layer's `x.y`, with the same stack below.
#[derive(Clone)]
pub struct Graft {
    layer: Arc<dyn Layer>,
}

impl Graft {
    pub fn new<L>(layer: L) -> Self
    where
        L: Layer + 'static,
    {
        Self {
            layer: Arc::new(layer),
        }
    }

    pub fn shared(layer: Arc<dyn Layer>) -> Self {
        Self { layer }
    }
}

impl std::fmt::Debug for Graft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graft")
            .field("layer", &self.layer.name())
            .finish()
    }
}

#[async_trait]
impl Getter for Graft {
    fn name(&self) -> &str {
        self.layer.name()
    }

    async fn handle(&self, request: &GetterRequest, below: StackView<'_>) -> Result<Resolution> {
        let Some(rest) = request.rest() else {
            return Ok(Resolution::Miss);
        };
        self.layer.resolve(&rest, below).await
    }
}
