//! Applying and rolling back migrations.
//!
//! Applied versions are recorded in a one-column tracking table:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS __pgshift_migrations__ (version VARCHAR(255) PRIMARY KEY)
//! ```
//!
//! Each migration file runs in its own transaction together with the insert
//! (up) or delete (down) of its tracking row, so a file is either fully
//! applied and recorded or not at all. A batch is not atomic: when the third
//! of five migrations fails, the first two stay applied.
//!
//! There is no locking. Two processes migrating the same database at the same
//! time will step on each other.

use std::collections::BTreeSet;
use std::fmt;

use tokio_postgres::Client;

use crate::{
    ConnectionExt, Direction, Error, IntrospectMode, Introspector, MigrationSql, MigrationStore,
    Result, Schema, SchemaProvider, parse_desired_schema,
};

const CREATE_TRACKING_TABLE_SQL: &str =
    "CREATE TABLE IF NOT EXISTS __pgshift_migrations__ (version VARCHAR(255) PRIMARY KEY)";
const SELECT_APPLIED_SQL: &str = "SELECT version FROM __pgshift_migrations__ ORDER BY version";
const RECORD_SQL: &str = "INSERT INTO __pgshift_migrations__ (version) VALUES ($1)";
const FORGET_SQL: &str = "DELETE FROM __pgshift_migrations__ WHERE version = $1";

/// Why [`Migrator::execute`] did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The file for the requested direction does not exist.
    FileMissing,
    /// Up was requested for a migration that is already applied.
    AlreadyApplied,
    /// Down was requested for a migration that is not applied.
    NotApplied,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::FileMissing => f.write_str("migration file not found"),
            SkipReason::AlreadyApplied => f.write_str("migration already applied"),
            SkipReason::NotApplied => f.write_str("migration not applied"),
        }
    }
}

/// Result of executing a single migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    RolledBack,
    Skipped(SkipReason),
}

/// One line of `pgshift list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationStatus {
    pub version: String,
    pub applied: bool,
    pub up_missing: bool,
    pub down_missing: bool,
}

/// Versions `execute_all(Up)` will run, in order.
pub fn plan_up(migrations: &[String], applied: &[String]) -> Vec<String> {
    let applied: BTreeSet<&str> = applied.iter().map(String::as_str).collect();
    let mut pending: Vec<String> = migrations
        .iter()
        .filter(|v| !applied.contains(v.as_str()))
        .cloned()
        .collect();
    pending.sort();
    pending.dedup();
    pending
}

/// Versions `execute_all(Down)` will run, in order: highest version first.
///
/// `applied` comes from the tracking table sorted by version, and the table
/// keeps no record of when each row was inserted. This is the reverse of the
/// application order as long as migrations were applied ascending. A version
/// applied out of order with `execute` is still rolled back by its position
/// among the versions, not by when it ran.
pub fn plan_down(applied: &[String]) -> Vec<String> {
    applied.iter().rev().cloned().collect()
}

/// Whether a migration should be skipped rather than run.
fn skip_reason(file_exists: bool, is_applied: bool, direction: Direction) -> Option<SkipReason> {
    if !file_exists {
        return Some(SkipReason::FileMissing);
    }
    match (direction, is_applied) {
        (Direction::Up, true) => Some(SkipReason::AlreadyApplied),
        (Direction::Down, false) => Some(SkipReason::NotApplied),
        _ => None,
    }
}

/// Every version known on disk or recorded as applied, ascending.
fn collect_status(
    store: &MigrationStore,
    migrations: &[String],
    applied: &[String],
) -> Vec<MigrationStatus> {
    let versions: BTreeSet<&String> = migrations.iter().chain(applied).collect();
    versions
        .into_iter()
        .map(|version| {
            let files = store.status(version);
            MigrationStatus {
                version: version.clone(),
                applied: applied.contains(version),
                up_missing: files.up_missing,
                down_missing: files.down_missing,
            }
        })
        .collect()
}

fn insert_sorted(list: &mut Vec<String>, version: &str) {
    if let Err(pos) = list.binary_search_by(|v| v.as_str().cmp(version)) {
        list.insert(pos, version.to_string());
    }
}

/// Generates, applies and rolls back migrations against one database.
///
/// # Example
///
/// ```ignore
/// let client = pgshift::connect(&params).await?;
/// let mut migrator = Migrator::new(client, MigrationStore::default(), Introspector::default());
/// migrator.initialize().await?;
///
/// for version in migrator.execute_all(Direction::Up).await? {
///     println!("applied {version}");
/// }
/// ```
pub struct Migrator {
    client: Client,
    store: MigrationStore,
    introspector: Introspector,
    initialized: bool,
    /// Versions with files on disk, ascending.
    migrations: Vec<String>,
    /// Versions recorded in the tracking table, ascending.
    applied: Vec<String>,
}

impl Migrator {
    pub fn new(client: Client, store: MigrationStore, introspector: Introspector) -> Self {
        Self {
            client,
            store,
            introspector,
            initialized: false,
            migrations: Vec::new(),
            applied: Vec::new(),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn store(&self) -> &MigrationStore {
        &self.store
    }

    /// Prepare the database and load the migration lists.
    ///
    /// Creates the tracking table and the catalog view, makes sure the
    /// migrations directory exists, then reads the versions on disk and the
    /// applied versions. Calling it again does nothing and sends no SQL. A
    /// failed call leaves the migrator uninitialized, so it can be retried.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        self.client
            .traced()
            .batch_execute(CREATE_TRACKING_TABLE_SQL)
            .await?;
        self.introspector.ensure_view(&self.client).await?;
        self.store.ensure_dir()?;

        self.migrations = self.store.versions()?;
        self.applied = self.load_applied().await?;
        self.initialized = true;

        tracing::debug!(
            migrations = self.migrations.len(),
            applied = self.applied.len(),
            dir = %self.store.dir(),
            "migrator initialized"
        );
        Ok(())
    }

    async fn load_applied(&self) -> Result<Vec<String>> {
        let rows = self.client.traced().query(SELECT_APPLIED_SQL, &[]).await?;
        let applied = rows
            .iter()
            .map(|row| row.try_get::<_, String>(0))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(applied)
    }

    /// Versions with files on disk, ascending.
    pub fn migrations(&self) -> &[String] {
        &self.migrations
    }

    /// Applied versions, ascending.
    pub fn applied(&self) -> &[String] {
        &self.applied
    }

    /// Versions on disk that are not applied yet, ascending.
    pub fn pending(&self) -> Vec<String> {
        plan_up(&self.migrations, &self.applied)
    }

    pub fn is_applied(&self, version: &str) -> bool {
        self.applied.iter().any(|v| v == version)
    }

    pub fn status(&self) -> Vec<MigrationStatus> {
        collect_status(&self.store, &self.migrations, &self.applied)
    }

    /// Introspect the database as it is now.
    pub async fn live_schema(&mut self) -> Result<Schema> {
        self.initialize().await?;
        self.introspector
            .load(&self.client, IntrospectMode::Live)
            .await
    }

    /// Apply (up) or roll back (down) a single migration.
    ///
    /// Missing files and requests that would not change anything are
    /// reported as [`Outcome::Skipped`] with a warning, not as errors.
    pub async fn execute(&mut self, version: &str, direction: Direction) -> Result<Outcome> {
        self.initialize().await?;

        let exists = self.store.exists(version, direction);
        if let Some(reason) = skip_reason(exists, self.is_applied(version), direction) {
            tracing::warn!(
                version,
                %direction,
                path = %self.store.path(version, direction),
                "skipping: {reason}"
            );
            return Ok(Outcome::Skipped(reason));
        }

        let body = self.store.read(version, direction)?;
        self.run_in_transaction(version, direction, &body)
            .await
            .map_err(|source| Error::Execution {
                version: version.to_string(),
                direction,
                source,
            })?;

        match direction {
            Direction::Up => {
                insert_sorted(&mut self.applied, version);
                insert_sorted(&mut self.migrations, version);
                tracing::info!(version, "applied migration");
                Ok(Outcome::Applied)
            }
            Direction::Down => {
                self.applied.retain(|v| v != version);
                tracing::info!(version, "rolled back migration");
                Ok(Outcome::RolledBack)
            }
        }
    }

    /// Runs the file body and updates the tracking row in one transaction.
    /// Dropping the transaction on any error rolls it back.
    async fn run_in_transaction(
        &mut self,
        version: &str,
        direction: Direction,
        body: &str,
    ) -> std::result::Result<(), tokio_postgres::Error> {
        let tx = self.client.transaction().await?;

        tx.traced().batch_execute(body).await?;
        let tracking_sql = match direction {
            Direction::Up => RECORD_SQL,
            Direction::Down => FORGET_SQL,
        };
        tx.traced().execute(tracking_sql, &[&version]).await?;

        tx.commit().await
    }

    /// Apply every pending migration (up) or roll back every applied one
    /// (down, highest version first; see [`plan_down`]).
    ///
    /// Returns the versions that actually ran. Stops at the first error;
    /// migrations that ran before it stay committed.
    pub async fn execute_all(&mut self, direction: Direction) -> Result<Vec<String>> {
        self.initialize().await?;

        let plan = match direction {
            Direction::Up => plan_up(&self.migrations, &self.applied),
            Direction::Down => plan_down(&self.applied),
        };

        let mut executed = Vec::new();
        for version in plan {
            match self.execute(&version, direction).await? {
                Outcome::Skipped(_) => {}
                Outcome::Applied | Outcome::RolledBack => executed.push(version),
            }
        }

        if executed.is_empty() {
            tracing::info!(%direction, "nothing to do");
        }
        Ok(executed)
    }

    /// Diff the desired schema against the database without writing anything.
    pub async fn plan_diff(
        &mut self,
        provider: &dyn SchemaProvider,
        mode: IntrospectMode,
    ) -> Result<MigrationSql> {
        self.initialize().await?;

        let live = self.introspector.load(&self.client, mode).await?;
        let desired = parse_desired_schema(&provider.desired_schema()?)?;
        desired.diff_checked(&live)
    }

    /// Diff the desired schema against the database and write the result as
    /// a new migration. Returns its version.
    ///
    /// With [`IntrospectMode::Initial`] the database is treated as empty, so
    /// the migration creates the whole schema. An empty diff is
    /// [`Error::NoChanges`].
    pub async fn generate_diff(
        &mut self,
        provider: &dyn SchemaProvider,
        mode: IntrospectMode,
    ) -> Result<String> {
        let migration = self.plan_diff(provider, mode).await?;

        let version = self.store.create(&migration.up, &migration.down)?;
        insert_sorted(&mut self.migrations, &version);

        tracing::info!(
            version = %version,
            up = migration.up.len(),
            down = migration.down.len(),
            "generated migration"
        );
        Ok(version)
    }

    /// Write an empty migration pair to fill in by hand. Returns its version.
    pub fn generate_empty(&mut self) -> Result<String> {
        let version = self.store.create_empty()?;
        insert_sorted(&mut self.migrations, &version);
        tracing::info!(version = %version, "generated empty migration");
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino::Utf8PathBuf;
    use tempfile::TempDir;

    fn versions(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_plan_up_skips_applied_and_sorts() {
        let migrations = versions(&["20260103000000", "20260101000000", "20260102000000"]);
        let applied = versions(&["20260101000000"]);
        assert_eq!(
            plan_up(&migrations, &applied),
            versions(&["20260102000000", "20260103000000"])
        );

        let all = versions(&["20260101000000", "20260102000000"]);
        assert!(plan_up(&all, &all).is_empty());
    }

    #[test]
    fn test_plan_down_reverses_applied() {
        let applied = versions(&["20260101000000", "20260102000000", "20260103000000"]);
        assert_eq!(
            plan_down(&applied),
            versions(&["20260103000000", "20260102000000", "20260101000000"])
        );
        assert!(plan_down(&[]).is_empty());
    }

    #[test]
    fn test_skip_reasons() {
        assert_eq!(skip_reason(false, false, Direction::Up), Some(SkipReason::FileMissing));
        assert_eq!(skip_reason(false, true, Direction::Down), Some(SkipReason::FileMissing));
        assert_eq!(skip_reason(true, true, Direction::Up), Some(SkipReason::AlreadyApplied));
        assert_eq!(skip_reason(true, false, Direction::Down), Some(SkipReason::NotApplied));
        assert_eq!(skip_reason(true, false, Direction::Up), None);
        assert_eq!(skip_reason(true, true, Direction::Down), None);
    }

    #[test]
    fn test_status_merges_disk_and_tracking_table() {
        let tmp = TempDir::new().unwrap();
        let store = MigrationStore::new(Utf8PathBuf::from_path_buf(tmp.path().to_path_buf()).unwrap());
        let sql = versions(&["SELECT 1;"]);
        store.create_at("20260101000000", &sql, &sql).unwrap();
        store.create_at("20260102000000", &sql, &sql).unwrap();
        std::fs::remove_file(store.path("20260101000000", Direction::Down)).unwrap();

        // applied, but both files were deleted since
        let applied = versions(&["20260101000000", "20251231000000"]);
        let status = collect_status(&store, &store.versions().unwrap(), &applied);

        assert_eq!(
            status,
            vec![
                MigrationStatus {
                    version: "20251231000000".into(),
                    applied: true,
                    up_missing: true,
                    down_missing: true,
                },
                MigrationStatus {
                    version: "20260101000000".into(),
                    applied: true,
                    up_missing: false,
                    down_missing: true,
                },
                MigrationStatus {
                    version: "20260102000000".into(),
                    applied: false,
                    up_missing: false,
                    down_missing: false,
                },
            ]
        );
    }

    #[test]
    fn test_insert_sorted_ignores_duplicates() {
        let mut list = versions(&["20260101000000", "20260103000000"]);
        insert_sorted(&mut list, "20260102000000");
        insert_sorted(&mut list, "20260103000000");
        assert_eq!(
            list,
            versions(&["20260101000000", "20260102000000", "20260103000000"])
        );
    }
}
