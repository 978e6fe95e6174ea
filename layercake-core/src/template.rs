use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::address::Address;
use crate::error::{Error, Result};
use crate::resolution::Resolution;
use crate::stack::StackView;

fn placeholder_matcher() -> Option<&'static Regex> {
    static MATCHER: OnceLock<Option<Regex>> = OnceLock::new();
    MATCHER
        .get_or_init(|| Regex::new(r"\{\{([^{}]*)\}\}").ok())
        .as_ref()
}

pub fn has_placeholders(text: &str) -> bool {
    if !text.contains("{{") {
        return false;
    }
    let Some(matcher) = placeholder_matcher() else {
        return false;
    };
    matcher.is_match(text)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Text(String),
    Key(Address),
}

/// A string split into literal text and `{{key}}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pieces: Vec<Piece>,
}

impl Template {
    pub fn parse(text: &str) -> Result<Self> {
        let Some(matcher) = placeholder_matcher() else {
            return Ok(Self {
                pieces: vec![Piece::Text(text.to_owned())],
            });
        };

        let mut pieces = Vec::new();
        let mut cursor = 0;
        for captures in matcher.captures_iter(text) {
            let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            if whole.start() > cursor {
                pieces.push(Piece::Text(text[cursor..whole.start()].to_owned()));
            }
            let key = inner.as_str().trim();
            let address = Address::parse(key).map_err(|err| match err {
                Error::MalformedPath { reason, .. } => Error::malformed(
                    key,
                    format!("invalid placeholder in '{text}': {reason}"),
                ),
                other => other,
            })?;
            pieces.push(Piece::Key(address));
            cursor = whole.end();
        }
        if cursor < text.len() {
            pieces.push(Piece::Text(text[cursor..].to_owned()));
        }
        Ok(Self { pieces })
    }

    /// Placeholder keys in order of appearance, repeats included.
    pub fn keys(&self) -> impl Iterator<Item = &Address> {
        self.pieces.iter().filter_map(|piece| match piece {
            Piece::Key(address) => Some(address),
            Piece::Text(_) => None,
        })
    }

    pub fn is_literal(&self) -> bool {
        self.keys().next().is_none()
    }
}

/// Expands every placeholder in `text`, a value found at `owner`, against
/// `context`. The result is always a string.
pub async fn expand(text: &str, owner: &Address, context: StackView<'_>) -> Result<Value> {
    Ok(Value::String(render(text, owner, context).await?))
}

pub async fn render(text: &str, owner: &Address, context: StackView<'_>) -> Result<String> {
    let template = Template::parse(text)?;
    let rendered = render_pieces(&template, owner, context, None, Missing::Fail).await?;
    Ok(rendered.unwrap_or_default())
}

/// Like `render`, except that a placeholder made of one decimal segment,
/// such as `{{0}}`, names a wildcard capture rather than a key.
pub async fn render_with_captures(
    text: &str,
    owner: &Address,
    context: StackView<'_>,
    captures: &[String],
) -> Result<String> {
    let template = Template::parse(text)?;
    let rendered = render_pieces(&template, owner, context, Some(captures), Missing::Fail).await?;
    Ok(rendered.unwrap_or_default())
}

/// Renders `text` unless one of its placeholders is absent below, in which
/// case the answer is `None` rather than an error.
pub async fn try_render(
    text: &str,
    owner: &Address,
    context: StackView<'_>,
) -> Result<Option<String>> {
    let template = Template::parse(text)?;
    render_pieces(&template, owner, context, None, Missing::GiveUp).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Missing {
    Fail,
    GiveUp,
}

async fn render_pieces(
    template: &Template,
    owner: &Address,
    context: StackView<'_>,
    captures: Option<&[String]>,
    missing: Missing,
) -> Result<Option<String>> {
    let mut rendered = String::new();
    for piece in &template.pieces {
        let key = match piece {
            Piece::Text(literal) => {
                rendered.push_str(literal);
                continue;
            }
            Piece::Key(key) => key,
        };

        if let (Some(captures), Some(index)) = (captures, capture_index(key)) {
            let Some(capture) = captures.get(index) else {
                return Err(unresolved(owner, key, "no wildcard capture with that index"));
            };
            rendered.push_str(capture);
            continue;
        }

        let value = match resolve_placeholder(key, context).await? {
            Resolution::Hit(value) => value,
            Resolution::Miss | Resolution::Stop if missing == Missing::GiveUp => return Ok(None),
            Resolution::Miss => return Err(unresolved(owner, key, "no lower layer defines it")),
            Resolution::Stop => return Err(unresolved(owner, key, "lookup was stopped below")),
        };
        rendered.push_str(&render_scalar(owner, key, &value)?);
    }
    Ok(Some(rendered))
}

fn capture_index(key: &Address) -> Option<usize> {
    match key.segments() {
        [single] if single.bytes().all(|byte| byte.is_ascii_digit()) => single.parse().ok(),
        _ => None,
    }
}

async fn resolve_placeholder(key: &Address, context: StackView<'_>) -> Result<Resolution> {
    let lookup = context.lookup();
    if let Some(value) = lookup.memoized(context.key(), key.full()) {
        return Ok(Resolution::Hit(value));
    }

    let _active = lookup.enter_expansion(context.config().id(), key.full())?;
    let outcome = context.resolve(key).await?;
    if let Resolution::Hit(value) = &outcome {
        lookup.remember(context.key(), key.full(), value.clone());
    }
    Ok(outcome)
}

fn render_scalar(owner: &Address, key: &Address, value: &Value) -> Result<String> {
    match value {
        Value::String(text) => Ok(text.clone()),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        Value::Null => Ok(String::new()),
        Value::Array(_) => Err(unresolved(owner, key, "value is a sequence")),
        Value::Object(_) => Err(unresolved(owner, key, "value is a mapping")),
    }
}

fn unresolved(owner: &Address, key: &Address, reason: &str) -> Error {
    Error::TemplateResolution {
        key: owner.full().to_owned(),
        placeholder: key.full().to_owned(),
        reason: reason.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;
    use crate::getter::{Counter, Env, MapEnv};
    use crate::layer::{GetterLayer, StaticLayer};
    use crate::stack::Config;

    #[test]
    fn detects_placeholders() {
        assert!(has_placeholders("{{home}}/o.json"));
        assert!(has_placeholders("a {{ b.c }} d"));
        assert!(!has_placeholders("plain"));
        assert!(!has_placeholders("{{unterminated"));
        assert!(!has_placeholders("{single}"));
    }

    #[test]
    fn parses_pieces() {
        let template = Template::parse("{{ a }}-{{b.c}}/{{a}}").unwrap();
        let keys = template.keys().map(Address::full).collect::<Vec<_>>();
        assert_eq!(keys, ["a", "b.c", "a"]);
        assert!(Template::parse("no {{ placeholders").unwrap().is_literal());
    }

    #[test]
    fn invalid_placeholder_keys_are_malformed() {
        for text in ["{{}}", "{{ a..b }}", "{{.a}}"] {
            let err = Template::parse(text).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedPath, "{text}");
        }
    }

    #[tokio::test]
    async fn file_layer_over_getter_layer() {
        let getters = GetterLayer::new("getters")
            .bind("home", Env::home().with_source(MapEnv::new().with("HOME", "/home/ada")))
            .unwrap();
        let config = Config::builder()
            .layer(StaticLayer::new("settings.json", json!({"overrides": "{{home}}/o.json"})))
            .layer(getters)
            .build()
            .unwrap();
        assert_eq!(
            config.get("overrides").await.unwrap(),
            json!("/home/ada/o.json")
        );
    }

    #[tokio::test]
    async fn placeholders_see_only_lower_layers() {
        let config = Config::builder()
            .layer(StaticLayer::new("top", json!({"url": "{{host}}:{{port}}", "host": "top"})))
            .layer(StaticLayer::new("bottom", json!({"host": "bottom", "port": 8080})))
            .build()
            .unwrap();
        assert_eq!(config.get("url").await.unwrap(), json!("bottom:8080"));
    }

    #[tokio::test]
    async fn scalars_render_canonically() {
        let config = Config::builder()
            .layer(StaticLayer::new(
                "top",
                json!({"line": "{{n}} {{f}} {{flag}} [{{none}}]", "bad": "{{list}}"}),
            ))
            .layer(StaticLayer::new(
                "bottom",
                json!({"n": 3, "f": 1.5, "flag": true, "none": null, "list": [1, 2]}),
            ))
            .build()
            .unwrap();
        assert_eq!(config.get("line").await.unwrap(), json!("3 1.5 true []"));
        let err = config.get("bad").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TemplateResolution);
    }

    #[tokio::test]
    async fn missing_placeholder_fails_instead_of_defaulting_silently() {
        let config = Config::builder()
            .layer(StaticLayer::new("top", json!({"path": "{{home}}/x"})))
            .build()
            .unwrap();
        let err = config.get("path").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TemplateResolution);
        assert!(!err.is_structural());
        assert_eq!(config.get_or("path", "fallback").await.unwrap(), json!("fallback"));
    }

    #[tokio::test]
    async fn composed_strings_are_not_rescanned() {
        let config = Config::builder()
            .layer(StaticLayer::new("top", json!({"greeting": "{{raw}}"})))
            .layer(StaticLayer::new("bottom", json!({"raw": "{{literal}}"})).raw())
            .build()
            .unwrap();
        assert_eq!(config.get("greeting").await.unwrap(), json!("{{literal}}"));
    }

    #[tokio::test]
    async fn cycles_are_reported_with_their_chain() {
        let config = Config::builder()
            .layer(StaticLayer::new("top", json!({"x": "{{y}}"})))
            .layer(StaticLayer::new("mid", json!({"y": "{{x}}"})))
            .layer(StaticLayer::new("bottom", json!({"x": "base"})))
            .build()
            .unwrap();
        match config.get("x").await.unwrap_err().root() {
            Error::CyclicTemplate { chain } => assert_eq!(chain, &["x", "y", "x"]),
            other => panic!("unexpected error: {other}"),
        }

        let direct = Config::builder()
            .layer(StaticLayer::new("top", json!({"x": "{{x}}"})))
            .build()
            .unwrap();
        let err = direct.get_or("x", "default").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CyclicTemplate);
    }

    #[tokio::test]
    async fn repeated_placeholders_resolve_once() {
        let counter = Arc::new(Counter::new("ticks"));
        let getters = GetterLayer::new("getters")
            .bind_shared("tick", counter.clone())
            .unwrap();
        let config = Config::builder()
            .layer(StaticLayer::new("top", json!({"pair": "{{tick}}/{{tick}}"})))
            .layer(getters)
            .build()
            .unwrap();
        assert_eq!(config.get("pair").await.unwrap(), json!("1/1"));
        assert_eq!(counter.count(), 1);
    }

    #[tokio::test]
    async fn deep_placeholder_chains_hit_the_depth_limit() {
        let stack = |max_depth: usize| {
            Config::builder()
                .options(crate::options::EngineOptions {
                    max_depth,
                    ..Default::default()
                })
                .layer(StaticLayer::new("a", json!({"a": "{{b}}"})))
                .layer(StaticLayer::new("b", json!({"b": "{{c}}"})))
                .layer(StaticLayer::new("c", json!({"c": "{{d}}"})))
                .layer(StaticLayer::new("d", json!({"d": "end"})))
                .build()
                .unwrap()
        };

        assert_eq!(stack(4).get("a").await.unwrap(), json!("end"));
        let err = stack(3).get("a").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DepthExceeded);
        assert!(stack(3).get_or("a", "default").await.is_err());
    }

    #[tokio::test]
    async fn lenient_rendering_gives_up_on_absent_keys() {
        let config = Config::builder()
            .layer(StaticLayer::new("base", json!({"profile": "prod"})))
            .build()
            .unwrap();
        let lookup = crate::lookup::Lookup::new(&Default::default(), config.options());
        let view = config.view(&lookup);
        let owner = Address::parse("key").unwrap();

        assert_eq!(
            try_render("env.{{profile}}.url", &owner, view).await.unwrap(),
            Some("env.prod.url".to_owned())
        );
        assert_eq!(try_render("env.{{region}}.url", &owner, view).await.unwrap(), None);
    }

    #[tokio::test]
    async fn numeric_placeholders_name_captures_when_given() {
        let config = Config::builder()
            .layer(StaticLayer::new("base", json!({"domain": "example.com", "0": "key"})))
            .build()
            .unwrap();
        let lookup = crate::lookup::Lookup::new(&Default::default(), config.options());
        let view = config.view(&lookup);
        let owner = Address::parse("services.api.host").unwrap();
        let captures = ["api".to_owned()];

        let host = render_with_captures("{{0}}.{{domain}}", &owner, view, &captures)
            .await
            .unwrap();
        assert_eq!(host, "api.example.com");
        assert_eq!(render("{{0}}", &owner, view).await.unwrap(), "key");

        let err = render_with_captures("{{1}}", &owner, view, &captures)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TemplateResolution);
    }

    #[tokio::test]
    async fn expansion_can_be_disabled() {
        let config = Config::builder()
            .options(crate::options::EngineOptions {
                expand_templates: false,
                ..Default::default()
            })
            .layer(StaticLayer::new("top", json!({"p": "{{q}}"})))
            .build()
            .unwrap();
        assert_eq!(config.get("p").await.unwrap(), json!("{{q}}"));
    }
}
