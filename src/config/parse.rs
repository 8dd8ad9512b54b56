use super::types::*;
use crate::config::{expand_env_vars, expand_tilde, unexpanded_env_vars};
use regex::Regex;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let yaml_string = fs::read_to_string(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })
}

/// Parse, expand and validate a config document
pub fn parse_config(yaml_string: &str) -> Result<Config, ConfigError> {
    // Expand environment variables in the YAML string before parsing
    let yaml_string = expand_env_vars(yaml_string);
    check_unexpanded_vars(&yaml_string)?;

    let mut config: Config = serde_yaml::from_str(&yaml_string)?;
    expand_paths(&mut config);
    validate_config(&config)?;

    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let unexpanded_vars = unexpanded_env_vars(yaml_string);

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    let error_msg = if unexpanded_vars.len() == 1 {
        format!(
            "Environment variable $env{{{0}}} is not set.\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variable: export {0}=/path/to/directory\n\
             2. Replace $env{{{0}}} in the config file with an actual path",
            unexpanded_vars[0]
        )
    } else {
        format!(
            "Environment variables are not set: {}\n\
             \n\
             To fix this, either:\n\
             1. Set the environment variables (e.g., export W1LOG_HOME=/var/lib/w1log)\n\
             2. Replace the variables in the config file with actual paths",
            unexpanded_vars.join(", ")
        )
    };

    Err(ConfigError::Validation(error_msg))
}

/// Expands tilde (~) in all PathBuf fields in the config.
fn expand_paths(config: &mut Config) {
    config.sensors.path = expand_tilde(&config.sensors.path);
    config.storage.outbox = expand_tilde(&config.storage.outbox);
    config.storage.archive = expand_tilde(&config.storage.archive);

    if let Some(reducer) = config.reducer.as_mut() {
        reducer.metadata = expand_tilde(&reducer.metadata);
        reducer.output = expand_tilde(&reducer.output);
    }

    if let Some(receiver) = config.receiver.as_mut() {
        receiver.archive = receiver.archive.as_deref().map(expand_tilde);
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    if let Some(collector) = &config.collector {
        validate_collector(collector, &mut errors);
    }

    if let Err(e) = Regex::new(&config.sensors.address_pattern) {
        errors.push(format!("sensors.address_pattern: invalid regex: {}", e));
    }
    if config.sensors.value_file.is_empty() || config.sensors.value_file.contains('/') {
        errors.push(format!(
            "sensors.value_file: '{}' must be a plain file name",
            config.sensors.value_file
        ));
    }

    if config.storage.outbox == config.storage.archive {
        errors.push("storage.outbox and storage.archive must be different directories".to_string());
    }

    if let Some(reducer) = &config.reducer {
        if reducer.output == config.storage.archive {
            errors.push("reducer.output must not be the archive directory".to_string());
        }
    }

    // The collector archives its own copy of every acknowledged batch
    if config.collector.is_some() && config.receiver_archive() == Some(&config.storage.archive) {
        errors.push(
            "receiver.archive must differ from storage.archive when a collector section is present"
                .to_string(),
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_collector(collector: &CollectorConfig, errors: &mut Vec<String>) {
    match reqwest::Url::parse(&collector.endpoint) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        Ok(url) => errors.push(format!(
            "collector.endpoint: unsupported scheme '{}' (expected http or https)",
            url.scheme()
        )),
        Err(e) => errors.push(format!(
            "collector.endpoint: '{}' is not a valid URL: {}",
            collector.endpoint, e
        )),
    }

    if collector.timeout.is_zero() {
        errors.push("collector.timeout must be greater than zero".to_string());
    }

    if collector.max_retries > 10 {
        errors.push(format!(
            "collector.max_retries: {} is too many immediate retries (max 10); later cycles retry anyway",
            collector.max_retries
        ));
    }

    if let Some(id) = &collector.collector_id {
        if id.trim().is_empty() {
            errors.push("collector.collector_id cannot be empty".to_string());
        }
    }
}
