//! Migration files on disk.
//!
//! A migration is a pair of plain SQL files sharing a version:
//!
//! ```text
//! .migrations/
//!   20260114093000.up.sql
//!   20260114093000.down.sql
//! ```
//!
//! The version is the local time the migration was generated, formatted as
//! `YYYYMMDDHHMMSS`, so lexicographic order is chronological order.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};

use crate::diff::join_statements;
use crate::{Error, Result};

/// Directory used when none is configured.
pub const DEFAULT_MIGRATIONS_DIR: &str = ".migrations";

const EMPTY_MIGRATION: &str = "-- Fill out as you need";

/// Which half of a migration pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn file_suffix(self) -> &'static str {
        match self {
            Direction::Up => ".up.sql",
            Direction::Down => ".down.sql",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

/// Which files of a migration pair are missing on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStatus {
    pub up_missing: bool,
    pub down_missing: bool,
}

/// Reads and writes migration files in one directory.
#[derive(Debug, Clone)]
pub struct MigrationStore {
    dir: Utf8PathBuf,
}

impl Default for MigrationStore {
    fn default() -> Self {
        Self::new(DEFAULT_MIGRATIONS_DIR)
    }
}

impl MigrationStore {
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    /// Create the migrations directory if it does not exist yet.
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| Error::io(&self.dir, e))
    }

    /// All versions with at least one file on disk, ascending.
    ///
    /// A missing directory has no versions. Files that are not `*.up.sql` or
    /// `*.down.sql` are ignored.
    pub fn versions(&self) -> Result<Vec<String>> {
        let entries = match self.dir.read_dir_utf8() {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(&self.dir, e)),
        };

        let mut versions = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(&self.dir, e))?;
            let file_type = entry.file_type().map_err(|e| Error::io(entry.path(), e))?;
            if file_type.is_dir() {
                continue;
            }

            let name = entry.file_name();
            let is_migration = name.ends_with(Direction::Up.file_suffix())
                || name.ends_with(Direction::Down.file_suffix());
            if !is_migration {
                continue;
            }

            match name.split('.').next() {
                Some(version) if !version.is_empty() => {
                    versions.insert(version.to_string());
                }
                _ => {}
            }
        }

        Ok(versions.into_iter().collect())
    }

    pub fn path(&self, version: &str, direction: Direction) -> Utf8PathBuf {
        self.dir
            .join(format!("{}{}", version, direction.file_suffix()))
    }

    pub fn exists(&self, version: &str, direction: Direction) -> bool {
        self.path(version, direction).is_file()
    }

    pub fn read(&self, version: &str, direction: Direction) -> Result<String> {
        let path = self.path(version, direction);
        fs::read_to_string(&path).map_err(|e| Error::io(path, e))
    }

    pub fn status(&self, version: &str) -> FileStatus {
        FileStatus {
            up_missing: !self.exists(version, Direction::Up),
            down_missing: !self.exists(version, Direction::Down),
        }
    }

    /// Write a new migration pair versioned with the current local time.
    ///
    /// Two migrations generated within the same second collide: the second
    /// one fails with [`Error::VersionExists`].
    pub fn create(&self, up: &[String], down: &[String]) -> Result<String> {
        let version = chrono::Local::now().format("%Y%m%d%H%M%S").to_string();
        self.create_at(&version, up, down)?;
        Ok(version)
    }

    /// Write a migration pair with an explicit version.
    pub fn create_at(&self, version: &str, up: &[String], down: &[String]) -> Result<()> {
        self.ensure_dir()?;

        if self.exists(version, Direction::Up) || self.exists(version, Direction::Down) {
            return Err(Error::VersionExists(version.to_string()));
        }

        self.write_new(version, Direction::Up, up)?;
        self.write_new(version, Direction::Down, down)?;

        tracing::debug!(
            version,
            dir = %self.dir,
            up = up.len(),
            down = down.len(),
            "wrote migration files"
        );
        Ok(())
    }

    /// Write a migration pair containing only a placeholder comment.
    pub fn create_empty(&self) -> Result<String> {
        let placeholder = [EMPTY_MIGRATION.to_string()];
        self.create(&placeholder, &placeholder)
    }

    fn write_new(&self, version: &str, direction: Direction, statements: &[String]) -> Result<()> {
        let path = self.path(version, direction);
        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(Error::VersionExists(version.to_string()));
            }
            Err(e) => return Err(Error::io(path, e)),
        };

        file.write_all(join_statements(statements).as_bytes())
            .map_err(|e| Error::io(&path, e))
    }
}
