use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::address::Address;
use crate::error::{Error, Result};
use crate::getter::{Getter, GetterRequest};
use crate::layer::Layer;
use crate::resolution::Resolution;
use crate::stack::StackView;

pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Wildcard,
}

struct Pattern {
    key: String,
    segments: Vec<Segment>,
    getter: Arc<dyn Getter>,
}

impl Pattern {
    /// Captured wildcard segments, in order, when `leading` matches.
    fn captures(&self, leading: &[String]) -> Option<Vec<String>> {
        if leading.len() != self.segments.len() {
            return None;
        }
        let mut captures = Vec::new();
        for (segment, actual) in self.segments.iter().zip(leading) {
            match segment {
                Segment::Literal(expected) if expected == actual => {}
                Segment::Literal(_) => return None,
                Segment::Wildcard => captures.push(actual.clone()),
            }
        }
        Some(captures)
    }
}

/// Routes addresses to getters by bound key. A binding for `db` answers
/// `db`, `db.url` and anything deeper; the getter sees what remains after
/// the bound prefix.
pub struct GetterLayer {
    name: String,
    root: Option<Arc<dyn Getter>>,
    literal: HashMap<String, Arc<dyn Getter>>,
    patterns: Vec<Pattern>,
    longest: usize,
}

impl GetterLayer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            root: None,
            literal: HashMap::new(),
            patterns: Vec::new(),
            longest: 0,
        }
    }

    pub fn bind<G>(self, key: &str, getter: G) -> Result<Self>
    where
        G: Getter + 'static,
    {
        self.bind_shared(key, Arc::new(getter))
    }

    pub fn bind_shared(mut self, key: &str, getter: Arc<dyn Getter>) -> Result<Self> {
        let address = Address::parse(key)?;
        let segments = address
            .segments()
            .iter()
            .map(|segment| match segment.as_str() {
                WILDCARD => Segment::Wildcard,
                literal => Segment::Literal(literal.to_owned()),
            })
            .collect::<Vec<_>>();

        if segments.iter().any(|segment| *segment == Segment::Wildcard) {
            if self.patterns.iter().any(|pattern| pattern.segments == segments) {
                return Err(self.duplicate(key));
            }
            self.patterns.push(Pattern {
                key: key.to_owned(),
                segments,
                getter,
            });
        } else {
            if self.literal.contains_key(key) {
                return Err(self.duplicate(key));
            }
            self.literal.insert(key.to_owned(), getter);
        }
        self.longest = self.longest.max(address.len());
        Ok(self)
    }

    /// A getter consulted for every address before any bound key.
    pub fn root<G>(mut self, getter: G) -> Self
    where
        G: Getter + 'static,
    {
        self.root = Some(Arc::new(getter));
        self
    }

    pub fn bound_keys(&self) -> Vec<&str> {
        let mut keys = self
            .literal
            .keys()
            .map(String::as_str)
            .chain(self.patterns.iter().map(|pattern| pattern.key.as_str()))
            .collect::<Vec<_>>();
        keys.sort_unstable();
        keys
    }

    fn duplicate(&self, key: &str) -> Error {
        Error::Config(format!(
            "getter layer '{}' already binds '{key}'",
            self.name
        ))
    }

    async fn invoke(
        &self,
        getter: &Arc<dyn Getter>,
        request: GetterRequest,
        below: StackView<'_>,
    ) -> Result<Resolution> {
        let key = request.address().full();
        tracing::trace!(
            layer = %self.name,
            getter = getter.name(),
            key,
            bound = request.bound_key().unwrap_or_default(),
            "invoking getter"
        );
        below
            .lookup()
            .run_guarded(key, getter.name(), getter.handle(&request, below))
            .await
    }
}

#[async_trait]
impl Layer for GetterLayer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn resolve(&self, address: &Address, below: StackView<'_>) -> Result<Resolution> {
        if let Some(root) = &self.root {
            let request = GetterRequest::new(address.clone(), None, Vec::new());
            let outcome = self.invoke(root, request, below).await?;
            if outcome.halts() {
                return Ok(outcome);
            }
        }

        for length in 1..=address.len().min(self.longest) {
            let leading = &address.segments()[..length];
            let Some(bound) = address.prefix(length) else {
                continue;
            };

            if let Some(getter) = self.literal.get(bound.full()) {
                let request = GetterRequest::new(address.clone(), Some(bound.clone()), Vec::new());
                let outcome = self.invoke(getter, request, below).await?;
                if outcome.halts() {
                    return Ok(outcome);
                }
            }

            for pattern in &self.patterns {
                let Some(captures) = pattern.captures(leading) else {
                    continue;
                };
                let request = GetterRequest::new(address.clone(), Some(bound.clone()), captures);
                let outcome = self.invoke(&pattern.getter, request, below).await?;
                if outcome.halts() {
                    return Ok(outcome);
                }
            }
        }

        Ok(Resolution::Miss)
    }
}
