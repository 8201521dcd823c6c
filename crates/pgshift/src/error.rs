use camino::Utf8PathBuf;
use thiserror::Error;

use crate::Direction;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to connect to database: {0}")]
    Connect(#[source] tokio_postgres::Error),

    #[error("schema introspection failed: {0}")]
    Introspection(#[source] tokio_postgres::Error),

    #[error("invalid schema document: {0}")]
    InvalidSchemaDocument(String),

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// The diff produced no statements. Not a failure: callers usually treat
    /// this as "nothing to do".
    #[error("no changes detected")]
    NoChanges,

    #[error("migration {version} ({direction}) failed: {source}")]
    Execution {
        version: String,
        direction: Direction,
        #[source]
        source: tokio_postgres::Error,
    },

    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    #[error("{path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("migration {0} already exists")]
    VersionExists(String),

    #[error("environment variable {0} is not set")]
    MissingEnv(String),

    #[error("invalid port: {0}")]
    InvalidPort(String),

    #[error("invalid database url: {0}")]
    InvalidUrl(String),
}

impl Error {
    /// Returns true for the "nothing to do" condition of a diff.
    pub fn is_no_changes(&self) -> bool {
        matches!(self, Error::NoChanges)
    }

    pub(crate) fn io(path: impl Into<Utf8PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
