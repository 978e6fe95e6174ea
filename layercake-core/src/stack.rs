use std::fmt;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use uuid::Uuid;

use crate::address::Address;
use crate::error::{Error, Result};
use crate::layer::Layer;
use crate::lookup::{Lookup, LookupOptions, ViewKey};
use crate::options::{EngineOptions, FallbackPolicy};
use crate::resolution::Resolution;
use crate::template;

/// An ordered stack of layers, index 0 on top. Immutable once built; safe to
/// share across tasks.
pub struct Config {
    id: Uuid,
    name: String,
    layers: Vec<Arc<dyn Layer>>,
    options: EngineOptions,
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn layers(&self) -> &[Arc<dyn Layer>] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// The whole stack as a search context for `lookup`.
    pub fn view<'a>(&'a self, lookup: &'a Lookup) -> StackView<'a> {
        StackView {
            config: self,
            offset: 0,
            lookup,
        }
    }

    /// Resolves `path`, failing with `NotFound` when no layer has it.
    pub async fn get(&self, path: &str) -> Result<Value> {
        self.get_with(path, &LookupOptions::default()).await
    }

    pub async fn get_with(&self, path: &str, options: &LookupOptions) -> Result<Value> {
        let address = Address::parse(path)?;
        match self.resolve_with(&address, options).await? {
            Resolution::Hit(value) => Ok(value),
            Resolution::Miss | Resolution::Stop => Err(Error::NotFound(address.full().to_owned())),
        }
    }

    /// Resolves `path`, returning `default` on exhaustion and, under
    /// `FallbackPolicy::SoftErrors`, on non-structural failures.
    pub async fn get_or(&self, path: &str, default: impl Into<Value>) -> Result<Value> {
        self.get_or_with(path, default, &LookupOptions::default())
            .await
    }

    pub async fn get_or_with(
        &self,
        path: &str,
        default: impl Into<Value>,
        options: &LookupOptions,
    ) -> Result<Value> {
        let default = default.into();
        let address = Address::parse(path)?;
        match self.resolve_with(&address, options).await {
            Ok(Resolution::Hit(value)) => Ok(value),
            Ok(Resolution::Miss | Resolution::Stop) => Ok(default),
            Err(err) if err.is_structural() => Err(err),
            Err(err) => match self.options.fallback {
                FallbackPolicy::SoftErrors => {
                    tracing::warn!(
                        config = %self.name,
                        path = address.full(),
                        error = %err,
                        "lookup failed; returning supplied default"
                    );
                    Ok(default)
                }
                FallbackPolicy::MissOnly => Err(err),
            },
        }
    }

    /// The raw outcome of searching the stack for `path`.
    pub async fn resolve(&self, path: &str) -> Result<Resolution> {
        let address = Address::parse(path)?;
        self.resolve_with(&address, &LookupOptions::default()).await
    }

    pub async fn resolve_with(
        &self,
        address: &Address,
        options: &LookupOptions,
    ) -> Result<Resolution> {
        let lookup = Lookup::new(options, &self.options);
        // The requested key heads the expansion chain, so a value that
        // refers back to it is reported as a cycle.
        let _active = lookup.enter_expansion(self.id, address.full())?;
        let view = self.view(&lookup);
        let outcome = view.resolve(address).await;
        outcome
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("id", &self.id)
            .field("name", &self.name)
            .field(
                "layers",
                &self
                    .layers
                    .iter()
                    .map(|layer| layer.name().to_owned())
                    .collect::<Vec<_>>(),
            )
            .field("options", &self.options)
            .finish()
    }
}

#[derive(Default)]
pub struct ConfigBuilder {
    name: Option<String>,
    layers: Vec<Arc<dyn Layer>>,
    options: EngineOptions,
}

impl ConfigBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Adds a layer below every layer added so far.
    pub fn layer<L>(self, layer: L) -> Self
    where
        L: Layer + 'static,
    {
        self.shared_layer(Arc::new(layer))
    }

    pub fn shared_layer(mut self, layer: Arc<dyn Layer>) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn build(self) -> Result<Config> {
        self.options.validate()?;
        let config = Config {
            id: Uuid::new_v4(),
            name: self.name.unwrap_or_else(|| "config".to_owned()),
            layers: self.layers,
            options: self.options,
        };
        let depth = embedding_depth(&config, 0, config.options.max_depth)?;
        tracing::debug!(
            config = %config.name,
            layers = config.layers.len(),
            embedding_depth = depth,
            "assembled config stack"
        );
        Ok(config)
    }
}

// Each embedding level adds one key to a lookup's expansion chain after the
// requested key; the chain holds at most `limit` keys.
fn embedding_depth(config: &Config, depth: usize, limit: usize) -> Result<usize> {
    if depth >= limit {
        return Err(Error::Config(format!(
            "config '{}' is embedded more than {limit} levels deep",
            config.name
        )));
    }

    let mut deepest = depth;
    for layer in &config.layers {
        if let Some(nested) = layer.embedded() {
            if nested.id == config.id {
                return Err(Error::Config(format!(
                    "config '{}' embeds itself through layer '{}'",
                    config.name,
                    layer.name()
                )));
            }
            deepest = deepest.max(embedding_depth(nested, depth + 1, limit)?);
        }
    }
    Ok(deepest)
}

/// A search context: the layers of one config from `offset` down, plus the
/// state of the lookup in progress. Getters receive the view strictly below
/// their own layer.
#[derive(Clone, Copy)]
pub struct StackView<'a> {
    config: &'a Config,
    offset: usize,
    lookup: &'a Lookup,
}

impl<'a> StackView<'a> {
    pub fn config(&self) -> &'a Config {
        self.config
    }

    pub fn lookup(&self) -> &'a Lookup {
        self.lookup
    }

    pub fn key(&self) -> ViewKey {
        (self.config.id, self.offset)
    }

    pub fn layers(&self) -> &'a [Arc<dyn Layer>] {
        self.config.layers.get(self.offset..).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.layers().is_empty()
    }

    /// The view strictly below the layer at `index` within this view.
    pub fn below(&self, index: usize) -> StackView<'a> {
        StackView {
            config: self.config,
            offset: (self.offset + index + 1).min(self.config.layers.len()),
            lookup: self.lookup,
        }
    }

    /// Searches the visible layers top-down. The first hit wins (string hits
    /// are template-expanded against the layers below the one that produced
    /// them), a `Stop` ends the search and any error aborts it.
    pub fn resolve<'s>(&'s self, address: &'s Address) -> BoxFuture<'s, Result<Resolution>>
    where
        'a: 's,
    {
        async move {
            for (index, layer) in self.layers().iter().enumerate() {
                let below = self.below(index);
                let outcome = layer
                    .resolve(address, below)
                    .await
                    .map_err(|err| err.in_layer(layer.name(), address.full()))?;

                match outcome {
                    Resolution::Miss => {
                        tracing::trace!(layer = layer.name(), path = address.full(), "miss");
                    }
                    Resolution::Stop => {
                        tracing::debug!(layer = layer.name(), path = address.full(), "search stopped");
                        return Ok(Resolution::Stop);
                    }
                    Resolution::Hit(value) => {
                        tracing::debug!(layer = layer.name(), path = address.full(), "resolved");
                        let value = self
                            .expand_hit(layer.as_ref(), address, value, below)
                            .await
                            .map_err(|err| err.in_layer(layer.name(), address.full()))?;
                        return Ok(Resolution::Hit(value));
                    }
                }
            }
            Ok(Resolution::Miss)
        }
        .boxed()
    }

    /// Convenience for getters: resolves a dotted path in this view,
    /// `None` on a miss.
    pub async fn get(&self, path: &str) -> Result<Option<Value>> {
        let address = Address::parse(path)?;
        Ok(self.resolve(&address).await?.into_value())
    }

    async fn expand_hit(
        &self,
        layer: &dyn Layer,
        address: &Address,
        value: Value,
        below: StackView<'a>,
    ) -> Result<Value> {
        if !self.config.options.expand_templates || !layer.expands_templates() {
            return Ok(value);
        }
        match value {
            Value::String(text) if template::has_placeholders(&text) => {
                template::expand(&text, address, below).await
            }
            other => Ok(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;
    use crate::layer::StaticLayer;

    fn two_files() -> Config {
        Config::builder()
            .layer(StaticLayer::new("overrides.json", json!({"a": {"b": 3}})))
            .layer(StaticLayer::new("base.json", json!({"a": {"b": 1, "c": 2}})))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn upper_layers_override_lower_ones() {
        let config = two_files();
        assert_eq!(config.get("a.b").await.unwrap(), json!(3));
        assert_eq!(config.get("a.c").await.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn exhaustion_is_not_found_unless_defaulted() {
        let config = two_files();
        assert_eq!(config.get("g").await.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(config.get_or("g", Value::Null).await.unwrap(), Value::Null);
        assert_eq!(config.get_or("a.b", 9).await.unwrap(), json!(3));
    }

    #[tokio::test]
    async fn malformed_paths_ignore_defaults() {
        let config = two_files();
        let err = config.get_or("a..b", 1).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedPath);
    }

    #[tokio::test]
    async fn empty_stack_misses() {
        let config = Config::builder().build().unwrap();
        assert!(config.is_empty());
        assert_eq!(config.resolve("a").await.unwrap(), Resolution::Miss);
    }

    #[test]
    fn below_never_runs_past_the_bottom() {
        let config = two_files();
        let lookup = Lookup::new(&LookupOptions::default(), config.options());
        let view = config.view(&lookup);
        assert_eq!(view.layers().len(), 2);
        assert_eq!(view.below(0).layers().len(), 1);
        assert!(view.below(1).is_empty());
        assert!(view.below(1).below(0).is_empty());
    }

    #[test]
    fn builder_rejects_invalid_options() {
        let result = Config::builder()
            .options(EngineOptions {
                max_depth: 0,
                ..EngineOptions::default()
            })
            .build();
        assert!(result.is_err());
    }
}
