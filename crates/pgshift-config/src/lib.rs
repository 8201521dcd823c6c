//! Types for `.config/pgshift.styx`.
//!
//! ```styx
//! migrations_dir db/migrations
//! schema schema.json
//! excluded_tables (spatial_ref_sys geography_columns)
//! env{
//!     host PGHOST
//!     password PGPASSWORD
//! }
//! ```
//!
//! Every field is optional; the accessors fill in the defaults.

use facet::Facet;

/// Default migrations directory, relative to the working directory.
pub const DEFAULT_MIGRATIONS_DIR: &str = ".migrations";

/// Tables never touched by default (PostGIS creates this one in `public`).
pub const DEFAULT_EXCLUDED_TABLES: &[&str] = &["spatial_ref_sys"];

/// Configuration for pgshift.
#[derive(Debug, Clone, Default, Facet)]
pub struct Config {
    /// Directory holding the `<version>.up.sql` / `<version>.down.sql` pairs.
    #[facet(default)]
    pub migrations_dir: Option<String>,

    /// Live tables the introspector ignores. Replaces the default list.
    #[facet(default)]
    pub excluded_tables: Option<Vec<String>>,

    /// Path to the desired-schema JSON document.
    #[facet(default)]
    pub schema: Option<String>,

    /// Environment variable names to read connection parameters from.
    #[facet(default)]
    pub env: Option<EnvConfig>,
}

impl Config {
    pub fn migrations_dir(&self) -> &str {
        self.migrations_dir
            .as_deref()
            .unwrap_or(DEFAULT_MIGRATIONS_DIR)
    }

    pub fn excluded_tables(&self) -> Vec<String> {
        match &self.excluded_tables {
            Some(tables) => tables.clone(),
            None => DEFAULT_EXCLUDED_TABLES
                .iter()
                .map(|t| t.to_string())
                .collect(),
        }
    }
}

/// Overrides for the `DB_*` environment variable names.
#[derive(Debug, Clone, Default, Facet)]
pub struct EnvConfig {
    /// Instead of `DB_HOST`
    #[facet(default)]
    pub host: Option<String>,
    /// Instead of `DB_PORT`
    #[facet(default)]
    pub port: Option<String>,
    /// Instead of `DB_USER`
    #[facet(default)]
    pub user: Option<String>,
    /// Instead of `DB_PASS`
    #[facet(default)]
    pub password: Option<String>,
    /// Instead of `DB_NAME`
    #[facet(default)]
    pub dbname: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.migrations_dir(), ".migrations");
        assert_eq!(config.excluded_tables(), vec!["spatial_ref_sys".to_string()]);
        assert!(config.schema.is_none());
    }

    #[test]
    fn test_explicit_values_win() {
        let config = Config {
            migrations_dir: Some("db/migrations".into()),
            excluded_tables: Some(Vec::new()),
            ..Default::default()
        };
        assert_eq!(config.migrations_dir(), "db/migrations");
        assert!(config.excluded_tables().is_empty());
    }
}
