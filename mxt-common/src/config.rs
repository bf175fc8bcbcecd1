//! Configuration file resolution
//!
//! Resolution priority for a service's TOML config:
//! 1. Environment variable (highest)
//! 2. Platform config directory (`~/.config/mixtide/<module>.toml`)
//! 3. System-wide `/etc/mixtide/<module>.toml` (Linux only)
//!
//! Services compile in defaults for every non-secret field, so a missing
//! config file is not an error.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::PathBuf;

/// Locate a module's TOML config file, if one exists
///
/// `env_var` names an environment variable holding an explicit path;
/// `module` is the file stem searched for in the platform config dirs.
pub fn resolve_config_path(env_var: &str, module: &str) -> Option<PathBuf> {
    if let Ok(path) = std::env::var(env_var) {
        return Some(PathBuf::from(path));
    }

    let file_name = format!("{}.toml", module);

    if let Some(dir) = dirs::config_dir() {
        let user_config = dir.join("mixtide").join(&file_name);
        if user_config.exists() {
            return Some(user_config);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/mixtide").join(&file_name);
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Platform-local data directory for Mixtide state
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("mixtide"))
        .unwrap_or_else(|| PathBuf::from("./mixtide_data"))
}

/// Read and parse a TOML config file into `T`
pub fn read_toml<T: DeserializeOwned>(path: &std::path::Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Sample {
        port: u16,
        name: String,
    }

    #[test]
    fn read_toml_parses_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.toml");
        std::fs::write(&path, "port = 5731\nname = \"mxt-aa\"\n").unwrap();

        let sample: Sample = read_toml(&path).unwrap();
        assert_eq!(sample.port, 5731);
        assert_eq!(sample.name, "mxt-aa");
    }

    #[test]
    fn read_toml_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "port = \"not a number").unwrap();

        let result: Result<Sample> = read_toml(&path);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
