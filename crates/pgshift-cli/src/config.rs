//! Configuration file handling for pgshift.
//!
//! Looks for `.config/pgshift.styx` in the current directory or any parent
//! directory. Without one, every setting takes its default.

pub use pgshift_config::Config;

use camino::{Utf8Path, Utf8PathBuf};
use pgshift::EnvKeys;

const CONFIG_FILE: &str = ".config/pgshift.styx";

/// A loaded configuration and where it came from.
#[derive(Debug, Default)]
pub struct Loaded {
    pub config: Config,
    /// Path of the config file, `None` when defaults are in use.
    pub path: Option<Utf8PathBuf>,
}

impl Loaded {
    /// Directory relative paths in the config are resolved against: the one
    /// holding `.config/`.
    pub fn root(&self) -> Option<&Utf8Path> {
        self.path.as_deref().and_then(|p| p.parent()).and_then(|p| p.parent())
    }

    /// Resolve a path from the config file against [`Loaded::root`].
    pub fn resolve(&self, path: &str) -> Utf8PathBuf {
        let path = Utf8Path::new(path);
        match self.root() {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }
}

/// Load configuration, searching up from the current directory.
pub fn load() -> Result<Loaded, ConfigError> {
    let cwd = std::env::current_dir().map_err(|e| ConfigError::Io(e.to_string()))?;
    let cwd = Utf8PathBuf::from_path_buf(cwd)
        .map_err(|p| ConfigError::Io(format!("current directory is not UTF-8: {}", p.display())))?;
    load_from(&cwd)
}

/// Load configuration starting from a specific directory.
pub fn load_from(start: &Utf8Path) -> Result<Loaded, ConfigError> {
    let Some(config_path) = find_config_file(start) else {
        tracing::debug!(start = %start, "no {CONFIG_FILE} found, using defaults");
        return Ok(Loaded::default());
    };

    let content =
        std::fs::read_to_string(&config_path).map_err(|e| ConfigError::Io(e.to_string()))?;
    let config: Config =
        facet_styx::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;

    tracing::debug!(path = %config_path, "loaded config");
    Ok(Loaded {
        config,
        path: Some(config_path),
    })
}

/// Find `.config/pgshift.styx` by searching up the directory tree.
fn find_config_file(start: &Utf8Path) -> Option<Utf8PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(CONFIG_FILE))
        .find(|path| path.is_file())
}

/// Environment variable names, with the config file's overrides applied.
pub fn env_keys(config: &Config) -> EnvKeys {
    let mut keys = EnvKeys::default();
    let Some(env) = &config.env else {
        return keys;
    };

    let overrides = [
        (&mut keys.host, &env.host),
        (&mut keys.port, &env.port),
        (&mut keys.user, &env.user),
        (&mut keys.password, &env.password),
        (&mut keys.dbname, &env.dbname),
    ];
    for (key, name) in overrides {
        if let Some(name) = name {
            *key = name.clone();
        }
    }
    keys
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading the file
    #[error("failed to read .config/pgshift.styx: {0}")]
    Io(String),
    /// Parse error in the Styx file
    #[error("failed to parse .config/pgshift.styx: {0}")]
    Parse(String),
}
