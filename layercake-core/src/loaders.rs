use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::layer::{FlatLayer, Layer, StaticLayer};

const INI_DEFAULT_SECTION: &str = "DEFAULT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Toml,
    Yaml,
    Ini,
    Properties,
}

impl Format {
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|value| value.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "json" => Ok(Self::Json),
            "toml" => Ok(Self::Toml),
            "yaml" | "yml" => Ok(Self::Yaml),
            "ini" | "cfg" => Ok(Self::Ini),
            "properties" => Ok(Self::Properties),
            _ => Err(Error::Load(format!(
                "cannot tell the format of '{}' from its extension",
                path.display()
            ))),
        }
    }

    /// Whether the format nests values, as opposed to keying them by their
    /// whole dotted path.
    pub fn is_tree(self) -> bool {
        matches!(self, Self::Json | Self::Toml | Self::Yaml)
    }
}

/// Parses a tree format into a mapping.
pub fn parse(raw: &str, format: Format, origin: &str) -> Result<Value> {
    let tree = match format {
        Format::Json => serde_json::from_str::<Value>(raw)
            .map_err(|err| Error::Load(format!("failed parsing json '{origin}': {err}")))?,
        Format::Toml => toml::from_str::<Value>(raw)
            .map_err(|err| Error::Load(format!("failed parsing toml '{origin}': {err}")))?,
        Format::Yaml => {
            let yaml = serde_yaml::from_str::<serde_yaml::Value>(raw)
                .map_err(|err| Error::Load(format!("failed parsing yaml '{origin}': {err}")))?;
            serde_json::to_value(yaml).map_err(|err| {
                Error::Load(format!("failed converting yaml '{origin}' to json: {err}"))
            })?
        }
        Format::Ini | Format::Properties => {
            return Err(Error::Load(format!(
                "'{origin}' is {format:?}, which keys values by path and has no tree form"
            )));
        }
    };

    // An empty YAML document is null; treat it as an empty layer.
    match tree {
        Value::Object(_) => Ok(tree),
        Value::Null => Ok(Value::Object(Default::default())),
        other => Err(Error::Load(format!(
            "'{origin}' must contain a mapping at the top level, found {}",
            kind_of(&other)
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

pub fn from_json_str(name: &str, raw: &str) -> Result<StaticLayer> {
    Ok(StaticLayer::new(name, parse(raw, Format::Json, name)?))
}

pub fn from_toml_str(name: &str, raw: &str) -> Result<StaticLayer> {
    Ok(StaticLayer::new(name, parse(raw, Format::Toml, name)?))
}

pub fn from_yaml_str(name: &str, raw: &str) -> Result<StaticLayer> {
    Ok(StaticLayer::new(name, parse(raw, Format::Yaml, name)?))
}

/// `[section]` headers and `key = value` (or `key: value`) entries, read as
/// `section.key`. Indented lines continue the previous value. Entries of
/// `[DEFAULT]` also apply to every section that lacks them. Values stay
/// strings.
pub fn from_ini_str(name: &str, raw: &str) -> Result<FlatLayer> {
    Ok(FlatLayer::with_entries(name, parse_ini(raw, name)?))
}

/// Java-style `.properties`: `key=value`, `key: value` or `key value`,
/// `#`/`!` comments, backslash line continuations and escapes.
pub fn from_properties_str(name: &str, raw: &str) -> Result<FlatLayer> {
    Ok(FlatLayer::with_entries(name, parse_properties(raw, name)?))
}

pub fn from_str(name: &str, raw: &str, format: Format) -> Result<Arc<dyn Layer>> {
    let layer: Arc<dyn Layer> = match format {
        Format::Ini => Arc::new(from_ini_str(name, raw)?),
        Format::Properties => Arc::new(from_properties_str(name, raw)?),
        tree => Arc::new(StaticLayer::new(name, parse(raw, tree, name)?)),
    };
    Ok(layer)
}

/// Loads a file as a layer named after its path.
pub fn from_file(path: &Path) -> Result<Arc<dyn Layer>> {
    let format = Format::from_path(path)?;
    let raw = std::fs::read_to_string(path).map_err(|err| {
        Error::Load(format!("failed reading '{}': {err}", path.display()))
    })?;
    let name = path.display().to_string();
    let layer = from_str(&name, &raw, format)?;
    tracing::debug!(path = %name, ?format, "loaded config file");
    Ok(layer)
}

#[derive(Debug, Clone, Copy)]
enum IniTarget {
    Defaults,
    Section(usize),
}

fn parse_ini(raw: &str, origin: &str) -> Result<Vec<(String, String)>> {
    let invalid = |line: usize, reason: &str| {
        Error::Load(format!("failed parsing ini '{origin}' at line {line}: {reason}"))
    };

    let mut defaults = BTreeMap::<String, String>::new();
    let mut sections = Vec::<(String, BTreeMap<String, String>)>::new();
    let mut target = None;
    let mut last_key: Option<String> = None;

    for (index, line) in raw.lines().enumerate() {
        let number = index + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            last_key = None;
            continue;
        }
        if trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }

        if line.starts_with(char::is_whitespace) {
            if let (Some(target), Some(key)) = (target, &last_key) {
                let entries = match target {
                    IniTarget::Defaults => &mut defaults,
                    IniTarget::Section(position) => &mut sections[position].1,
                };
                if let Some(value) = entries.get_mut(key) {
                    value.push('\n');
                    value.push_str(trimmed);
                    continue;
                }
            }
        }

        if let Some(header) = trimmed.strip_prefix('[') {
            let Some(section) = header.strip_suffix(']').map(str::trim) else {
                return Err(invalid(number, "unterminated section header"));
            };
            if section.is_empty() {
                return Err(invalid(number, "empty section name"));
            }
            last_key = None;
            if section == INI_DEFAULT_SECTION {
                target = Some(IniTarget::Defaults);
                continue;
            }
            if sections.iter().any(|(existing, _)| existing == section) {
                return Err(invalid(number, &format!("section '{section}' appears twice")));
            }
            sections.push((section.to_owned(), BTreeMap::new()));
            target = Some(IniTarget::Section(sections.len() - 1));
            continue;
        }

        let Some(target) = target else {
            return Err(invalid(number, "entry before any section header"));
        };
        let Some(split) = trimmed.find(|ch: char| ch == '=' || ch == ':') else {
            return Err(invalid(number, "expected 'key = value'"));
        };
        let key = trimmed[..split].trim();
        let value = trimmed[split + 1..].trim();
        if key.is_empty() {
            return Err(invalid(number, "empty key"));
        }
        let entries = match target {
            IniTarget::Defaults => &mut defaults,
            IniTarget::Section(position) => &mut sections[position].1,
        };
        if entries.insert(key.to_owned(), value.to_owned()).is_some() {
            return Err(invalid(number, &format!("key '{key}' appears twice in its section")));
        }
        last_key = Some(key.to_owned());
    }

    let mut flat = defaults
        .iter()
        .map(|(key, value)| (format!("{INI_DEFAULT_SECTION}.{key}"), value.clone()))
        .collect::<Vec<_>>();
    for (section, entries) in &sections {
        for (key, value) in &defaults {
            if !entries.contains_key(key) {
                flat.push((format!("{section}.{key}"), value.clone()));
            }
        }
        for (key, value) in entries {
            flat.push((format!("{section}.{key}"), value.clone()));
        }
    }
    Ok(flat)
}

fn parse_properties(raw: &str, origin: &str) -> Result<Vec<(String, String)>> {
    let mut entries = Vec::new();
    let mut lines = raw.lines();
    while let Some(line) = lines.next() {
        let mut logical = line.trim_start().to_owned();
        if logical.is_empty() || logical.starts_with('#') || logical.starts_with('!') {
            continue;
        }
        while continues(&logical) {
            logical.pop();
            let Some(next) = lines.next() else {
                break;
            };
            logical.push_str(next.trim_start());
        }

        let (key, value) = split_property(&logical);
        entries.push((unescape(key, origin)?, unescape(value, origin)?));
    }
    Ok(entries)
}

// An odd number of trailing backslashes escapes the line break.
fn continues(line: &str) -> bool {
    line.chars().rev().take_while(|ch| *ch == '\\').count() % 2 == 1
}

fn split_property(line: &str) -> (&str, &str) {
    let mut escaped = false;
    for (index, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '=' | ':' => return (&line[..index], line[index + 1..].trim_start()),
            ch if ch.is_whitespace() => {
                let rest = line[index..].trim_start();
                let rest = rest
                    .strip_prefix('=')
                    .or_else(|| rest.strip_prefix(':'))
                    .unwrap_or(rest);
                return (&line[..index], rest.trim_start());
            }
            _ => {}
        }
    }
    (line, "")
}

fn unescape(text: &str, origin: &str) -> Result<String> {
    let mut unescaped = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            unescaped.push(ch);
            continue;
        }
        match chars.next() {
            Some('t') => unescaped.push('\t'),
            Some('n') => unescaped.push('\n'),
            Some('r') => unescaped.push('\r'),
            Some('f') => unescaped.push('\u{c}'),
            Some('u') => {
                let hex = chars.by_ref().take(4).collect::<String>();
                let Some(decoded) = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32)
                else {
                    return Err(Error::Load(format!(
                        "failed parsing properties '{origin}': invalid escape '\\u{hex}'"
                    )));
                };
                unescaped.push(decoded);
            }
            Some(other) => unescaped.push(other),
            None => {}
        }
    }
    Ok(unescaped)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn parses_each_format_into_the_same_tree() {
        let expected = json!({"server": {"port": 8080, "hosts": ["a", "b"]}});
        let json = from_json_str("a.json", r#"{"server": {"port": 8080, "hosts": ["a", "b"]}}"#)
            .unwrap();
        let toml = from_toml_str("a.toml", "[server]\nport = 8080\nhosts = [\"a\", \"b\"]\n").unwrap();
        let yaml = from_yaml_str("a.yaml", "server:\n  port: 8080\n  hosts: [a, b]\n").unwrap();
        assert_eq!(json.tree(), &expected);
        assert_eq!(toml.tree(), &expected);
        assert_eq!(yaml.tree(), &expected);
    }

    #[test]
    fn empty_yaml_is_an_empty_layer() {
        assert_eq!(from_yaml_str("empty.yaml", "").unwrap().tree(), &json!({}));
    }

    #[test]
    fn parse_failures_are_load_errors() {
        let err = from_json_str("bad.json", "{").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Load);
        let err = from_json_str("list.json", "[1]").unwrap_err();
        assert!(err.to_string().contains("a sequence"));
    }

    #[test]
    fn ini_sections_become_key_prefixes() {
        let raw = "\
; database settings
[db.primary]
url = pg://primary
  ?sslmode=require
pool: 4

[server]
host = example.com
timeout = 5

[DEFAULT]
timeout = 30
";
        let layer = from_ini_str("app.ini", raw).unwrap();
        assert_eq!(
            layer.get("db.primary.url"),
            Some(&json!("pg://primary\n?sslmode=require"))
        );
        assert_eq!(layer.get("db.primary.pool"), Some(&json!("4")));
        assert_eq!(layer.get("db.primary.timeout"), Some(&json!("30")));
        assert_eq!(layer.get("server.timeout"), Some(&json!("5")));
        assert_eq!(layer.get("DEFAULT.timeout"), Some(&json!("30")));
        assert_eq!(layer.len(), 6);
    }

    #[test]
    fn malformed_ini_is_a_load_error() {
        for raw in ["key = value", "[open\nkey = 1", "[s]\njust a line", "[s]\na = 1\na = 2"] {
            let err = from_ini_str("bad.ini", raw).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Load, "{raw}");
        }
    }

    #[test]
    fn properties_follow_java_rules() {
        let raw = r"# comment
! another comment
db.url = pg://host
db.user:admin
greeting hello world
list = one, \
       two
path = C:\\temp
word = caf\u00e9
key\ with\ spaces = yes
flag
";
        let layer = from_properties_str("app.properties", raw).unwrap();
        assert_eq!(layer.get("db.url"), Some(&json!("pg://host")));
        assert_eq!(layer.get("db.user"), Some(&json!("admin")));
        assert_eq!(layer.get("greeting"), Some(&json!("hello world")));
        assert_eq!(layer.get("list"), Some(&json!("one, two")));
        assert_eq!(layer.get("path"), Some(&json!("C:\\temp")));
        assert_eq!(layer.get("word"), Some(&json!("café")));
        assert_eq!(layer.get("key with spaces"), Some(&json!("yes")));
        assert_eq!(layer.get("flag"), Some(&json!("")));

        let err = from_properties_str("bad.properties", r"x = \uzzzz").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Load);
    }

    #[test]
    fn flat_formats_have_no_tree_form() {
        assert!(!Format::Ini.is_tree());
        assert!(parse("a=1", Format::Properties, "a.properties").is_err());
        assert!(from_str("a.properties", "a=1", Format::Properties).is_ok());
    }

    #[test]
    fn format_follows_the_extension() {
        assert_eq!(Format::from_path(Path::new("x.YML")).unwrap(), Format::Yaml);
        assert_eq!(Format::from_path(Path::new("x.toml")).unwrap(), Format::Toml);
        assert_eq!(Format::from_path(Path::new("x.ini")).unwrap(), Format::Ini);
        assert_eq!(
            Format::from_path(Path::new("app.properties")).unwrap(),
            Format::Properties
        );
        assert!(Format::from_path(Path::new("x.txt")).is_err());
        assert!(from_file(Path::new("/definitely/not/here.json")).is_err());
    }
}
