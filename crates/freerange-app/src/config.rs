//! Shared binary setup: config file discovery and loading.

use std::path::PathBuf;

use freerange_core::config::Config;
use freerange_core::NotifyError;

/// Resolve the config file: first CLI argument, then `FRN_CONFIG`, then
/// `config.yaml` in the working directory when present. No file at all is
/// fine; defaults plus environment overrides apply.
pub fn load_config() -> Result<Config, NotifyError> {
    let explicit = std::env::args().nth(1).or_else(|| std::env::var("FRN_CONFIG").ok());
    let path = match explicit {
        Some(path) => Some(PathBuf::from(path)),
        None => {
            let default = PathBuf::from("config.yaml");
            default.exists().then_some(default)
        }
    };
    Config::load(path.as_deref())
}
