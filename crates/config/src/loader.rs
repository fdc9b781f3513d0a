//! Config file discovery and loading.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::schema::WamuxConfig;

/// Default config file name.
pub const CONFIG_FILE_NAME: &str = "wamux.toml";

/// Environment variable that points at an explicit config file.
pub const CONFIG_ENV_VAR: &str = "WAMUX_CONFIG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("config file not found: {0}")]
    NotFound(PathBuf),
}

/// Locate the config file.
///
/// Order: explicit path, `WAMUX_CONFIG`, `./wamux.toml`, then the platform
/// config directory (e.g. `~/.config/wamux/wamux.toml`).
pub fn discover_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    let env_path = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
    let mut candidates = vec![PathBuf::from(CONFIG_FILE_NAME)];
    if let Some(dirs) = directories::ProjectDirs::from("", "", "wamux") {
        candidates.push(dirs.config_dir().join(CONFIG_FILE_NAME));
    }
    resolve(explicit, env_path, &candidates)
}

fn resolve(
    explicit: Option<&Path>,
    env_path: Option<PathBuf>,
    candidates: &[PathBuf],
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env_path {
        return Some(path);
    }
    candidates.iter().find(|p| p.is_file()).cloned()
}

/// Load configuration, falling back to defaults when no file is found.
///
/// An explicitly requested file that does not exist is an error.
pub fn load_config(explicit: Option<&Path>) -> Result<WamuxConfig, ConfigError> {
    let Some(path) = discover_config_path(explicit) else {
        debug!("no config file found, using defaults");
        return Ok(WamuxConfig::default());
    };
    if !path.is_file() {
        return Err(ConfigError::NotFound(path));
    }
    let config = parse_file(&path)?;
    info!(path = %path.display(), "loaded config");
    Ok(config)
}

fn parse_file(path: &Path) -> Result<WamuxConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins() {
        let explicit = PathBuf::from("/etc/wamux.toml");
        let found = resolve(
            Some(&explicit),
            Some(PathBuf::from("/env/wamux.toml")),
            &[],
        );
        assert_eq!(found, Some(explicit));
    }

    #[test]
    fn env_path_before_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let candidate = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&candidate, "").unwrap();
        let found = resolve(None, Some(PathBuf::from("/env/wamux.toml")), &[candidate]);
        assert_eq!(found, Some(PathBuf::from("/env/wamux.toml")));
    }

    #[test]
    fn first_existing_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        let present = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&present, "").unwrap();
        let found = resolve(None, None, &[missing, present.clone()]);
        assert_eq!(found, Some(present));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"
[storage]
data_dir = "/var/lib/wamux"
keys_store = true

[webhook]
workers = 8
"#,
        )
        .unwrap();

        let cfg = load_config(Some(&path)).unwrap();
        assert_eq!(cfg.storage.data_dir, PathBuf::from("/var/lib/wamux"));
        assert!(cfg.storage.keys_store);
        assert_eq!(cfg.webhook.workers, 8);
        assert_eq!(cfg.webhook.queue_capacity, 256);
        assert_eq!(cfg.login.qr_timeout_secs, 60);
    }

    #[test]
    fn missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.toml");
        assert!(matches!(
            load_config(Some(&path)),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[sidecar]\nport = \"not a number\"\n").unwrap();
        assert!(matches!(
            load_config(Some(&path)),
            Err(ConfigError::Parse { .. })
        ));
    }
}
