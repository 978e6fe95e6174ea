use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::getter::{Getter, GetterRequest};
use crate::resolution::Resolution;
use crate::stack::StackView;

/// Where environment variables come from. Injected so lookups are testable
/// without touching the process environment.
pub trait EnvSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Debug, Clone, Default)]
pub struct MapEnv {
    vars: HashMap<String, String>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

impl EnvSource for MapEnv {
    fn get(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

impl<K, V> FromIterator<(K, V)> for MapEnv
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone)]
enum Target {
    /// Tried in order, answered only for the exact bound key.
    Var(Vec<String>),
    /// `prefix.db_url` reads `PREFIX_DB_URL`.
    Prefixed(String),
}

/// Reads environment variables as string values. An unset variable is a
/// miss.
#[derive(Clone)]
pub struct Env {
    target: Target,
    source: Arc<dyn EnvSource>,
}

impl Env {
    pub fn var(name: impl Into<String>) -> Self {
        Self {
            target: Target::Var(vec![name.into()]),
            source: Arc::new(ProcessEnv),
        }
    }

    /// The first of several variables that is set.
    pub fn any<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target: Target::Var(names.into_iter().map(Into::into).collect()),
            source: Arc::new(ProcessEnv),
        }
    }

    /// The user's home directory.
    pub fn home() -> Self {
        Self::any(["HOME", "USERPROFILE"])
    }

    /// Maps the segments after the bound key onto an upper-cased,
    /// underscore-joined variable name. An empty prefix drops the leading
    /// underscore.
    pub fn prefixed(prefix: impl Into<String>) -> Self {
        Self {
            target: Target::Prefixed(prefix.into()),
            source: Arc::new(ProcessEnv),
        }
    }

    pub fn with_source<S>(mut self, source: S) -> Self
    where
        S: EnvSource + 'static,
    {
        self.source = Arc::new(source);
        self
    }

    pub fn with_shared_source(mut self, source: Arc<dyn EnvSource>) -> Self {
        self.source = source;
        self
    }

    fn variable_for(prefix: &str, remaining: &[String]) -> String {
        let mut parts = Vec::with_capacity(remaining.len() + 1);
        if !prefix.is_empty() {
            parts.push(prefix.to_owned());
        }
        parts.extend(remaining.iter().map(|segment| segment.replace('-', "_")));
        parts.join("_").to_uppercase()
    }
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env").field("target", &self.target).finish()
    }
}

#[async_trait]
impl Getter for Env {
    fn name(&self) -> &str {
        "env"
    }

    async fn handle(&self, request: &GetterRequest, _below: StackView<'_>) -> Result<Resolution> {
        let value = match &self.target {
            Target::Var(names) => {
                if !request.is_exact() {
                    return Ok(Resolution::Miss);
                }
                names.iter().find_map(|name| self.source.get(name))
            }
            Target::Prefixed(prefix) => {
                if request.is_exact() {
                    return Ok(Resolution::Miss);
                }
                let name = Self::variable_for(prefix, request.remaining());
                self.source.get(&name)
            }
        };
        Ok(value.map(serde_json::Value::String).into())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::getter::{Chain, Stop};
    use crate::layer::{GetterLayer, StaticLayer};
    use crate::stack::Config;

    fn env() -> MapEnv {
        MapEnv::new()
            .with("HOME", "/home/ada")
            .with("APP_DB_URL", "pg://db")
    }

    #[tokio::test]
    async fn reads_injected_variables() {
        let layer = GetterLayer::new("env")
            .bind("home", Env::home().with_source(env()))
            .unwrap()
            .bind("app", Env::prefixed("app").with_source(env()))
            .unwrap()
            .bind("editor", Env::var("EDITOR").with_source(env()))
            .unwrap();
        let config = Config::builder().layer(layer).build().unwrap();

        assert_eq!(config.get("home").await.unwrap(), json!("/home/ada"));
        assert_eq!(config.get("app.db.url").await.unwrap(), json!("pg://db"));
        assert_eq!(config.resolve("app").await.unwrap(), Resolution::Miss);
        assert_eq!(config.resolve("editor").await.unwrap(), Resolution::Miss);
        assert_eq!(config.resolve("home.sub").await.unwrap(), Resolution::Miss);
    }

    #[tokio::test]
    async fn env_or_nothing() {
        let layer = GetterLayer::new("env")
            .bind(
                "token",
                Chain::new()
                    .then(Env::var("TOKEN").with_source(env()))
                    .then(Stop),
            )
            .unwrap();
        let config = Config::builder()
            .layer(layer)
            .layer(StaticLayer::new("defaults", json!({"token": "insecure"})))
            .build()
            .unwrap();
        assert_eq!(config.resolve("token").await.unwrap(), Resolution::Stop);
    }

    #[test]
    fn prefixed_names() {
        assert_eq!(
            Env::variable_for("app", &["log-level".to_owned()]),
            "APP_LOG_LEVEL"
        );
        assert_eq!(Env::variable_for("", &["path".to_owned()]), "PATH");
    }

    #[test]
    fn map_env_collects() {
        let source: MapEnv = [("A", "1")].into_iter().collect();
        assert_eq!(source.get("A").as_deref(), Some("1"));
        assert_eq!(ProcessEnv.get("LAYERCAKE_SURELY_UNSET_VARIABLE"), None);
    }
}
