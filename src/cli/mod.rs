pub mod collect;
pub mod config;
pub mod receive;
pub mod reduce;
pub mod status;

use crate::config::{load_config, Config};
use std::path::{Path, PathBuf};

/// Load the resolved config, or explain where it was looked for
pub(crate) fn require_config(config_path: Option<PathBuf>) -> Result<(PathBuf, Config), Box<dyn std::error::Error>> {
    let config_path = match config_path {
        Some(path) => path,
        None => {
            return Err("config not found\n\
                 Searched locations:\n  \
                 ~/.config/w1log/config.yml\n  \
                 /etc/w1log/config.yml\n\
                 Use --config <path> to specify a config file, or run 'w1log config init' to generate one."
                .into());
        }
    };

    tracing::debug!(config_path = %config_path.display(), "Loading configuration");
    let config = load_config(Path::new(&config_path))?;
    Ok((config_path, config))
}
