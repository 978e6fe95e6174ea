mod cli;

use std::time::Duration;

use layercake_core::getter::Env;
use layercake_core::{
    loaders, logging, Config, EngineOptions, Error, GetterLayer, LookupOptions, Result,
};
use serde_json::Value;

fn main() {
    if let Err(error) = run() {
        eprintln!("layercake failed: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = cli::Cli::parse_args();
    logging::init_tracing(&args.log_level);

    let config = build_config(&args)?;
    let options = LookupOptions {
        timeout: args.timeout_ms.map(Duration::from_millis),
        cancel: None,
    };
    let default = args.default.as_deref().map(parse_default);

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|err| Error::Config(format!("failed to create tokio runtime: {err}")))?;

    let values = runtime.block_on(async {
        let mut values = Vec::with_capacity(args.keys.len());
        for key in &args.keys {
            let value = match &default {
                Some(default) => config.get_or_with(key, default.clone(), &options).await?,
                None => config.get_with(key, &options).await?,
            };
            values.push((key.as_str(), value));
        }
        Ok::<_, Error>(values)
    })?;

    if args.json {
        let object = values
            .into_iter()
            .map(|(key, value)| (key.to_owned(), value))
            .collect::<serde_json::Map<_, _>>();
        let rendered = serde_json::to_string_pretty(&Value::Object(object))
            .map_err(|err| Error::Config(format!("failed to render output: {err}")))?;
        println!("{rendered}");
    } else {
        for (_, value) in values {
            match value {
                Value::String(text) => println!("{text}"),
                other => println!("{other}"),
            }
        }
    }
    Ok(())
}

fn build_config(args: &cli::Cli) -> Result<Config> {
    let options = match &args.options {
        Some(path) => {
            let content = std::fs::read_to_string(path).map_err(|err| {
                Error::Config(format!("failed to read options '{}': {err}", path.display()))
            })?;
            EngineOptions::from_toml_str(&content)?
        }
        None => EngineOptions::default(),
    };

    let mut builder = Config::builder().name("layercake").options(options);

    if !args.env.is_empty() {
        let mut getters = GetterLayer::new("env");
        for raw in &args.env {
            let Some((key, var)) = cli::parse_env_binding(raw) else {
                return Err(Error::Config(format!(
                    "invalid --env binding '{raw}', expected KEY=VAR"
                )));
            };
            getters = getters.bind(key, Env::var(var))?;
        }
        builder = builder.layer(getters);
    }

    for path in &args.files {
        builder = builder.shared_layer(loaders::from_file(path)?);
    }

    let config = builder.build()?;
    tracing::debug!(layers = config.len(), "config stack ready");
    Ok(config)
}

fn parse_default(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()))
}
