//! Read the live schema back from the Postgres catalog.
//!
//! A single view, [`SCHEMA_INFO_VIEW`], flattens `pg_attribute`, `pg_index`,
//! `pg_constraint` and `information_schema.columns` into one row per
//! (column, index, constraint) combination. The joins fan out, so the same
//! constraint or index usually shows up on several rows;
//! [`Introspector::fold_rows`] collapses them back into a [`Schema`].

use tokio_postgres::Row;

use crate::{
    Column, Connection, ConnectionExt, Constraint, ConstraintKind, Error, ForeignKeyDetails,
    Index, Result, Schema, Source, Table,
};

/// Name of the tracking table. Never part of the introspected schema.
pub const TRACKING_TABLE: &str = "__pgshift_migrations__";

/// Name of the catalog view created by [`SCHEMA_INFO_VIEW_SQL`].
pub const SCHEMA_INFO_VIEW: &str = "pgshift_schema_info";

/// Creates (or replaces) the catalog view the introspector reads.
///
/// Scoped to ordinary tables of the `public` schema. `contype` is cast to
/// text before the `CASE`: the column is a `"char"`, and a `CASE` mixing it
/// with text literals would resolve to `"char"` and truncate them.
pub const SCHEMA_INFO_VIEW_SQL: &str = r#"CREATE OR REPLACE VIEW pgshift_schema_info AS
SELECT
    tbl.relname AS table_name,
    att.attname AS column_name,
    att.attnum AS column_position,
    CASE
        WHEN isc.character_maximum_length IS NOT NULL
            THEN att.atttypid::regtype::text || '(' || isc.character_maximum_length::text || ')'
        ELSE att.atttypid::regtype::text
    END AS data_type,
    idx.relname AS index_name,
    con.conname AS constraint_name,
    CASE con.contype::text
        WHEN 'p' THEN 'PRIMARY KEY'
        WHEN 'f' THEN 'FOREIGN KEY'
        WHEN 'u' THEN 'UNIQUE'
        ELSE con.contype::text
    END AS constraint_type,
    fk_info.foreign_table_name,
    fk_info.foreign_column_name,
    CASE fk_info.confdeltype::text
        WHEN 'a' THEN 'NO ACTION'
        WHEN 'r' THEN 'RESTRICT'
        WHEN 'c' THEN 'CASCADE'
        WHEN 'n' THEN 'SET NULL'
        WHEN 'd' THEN 'SET DEFAULT'
    END AS on_delete,
    CASE fk_info.confupdtype::text
        WHEN 'a' THEN 'NO ACTION'
        WHEN 'r' THEN 'RESTRICT'
        WHEN 'c' THEN 'CASCADE'
        WHEN 'n' THEN 'SET NULL'
        WHEN 'd' THEN 'SET DEFAULT'
    END AS on_update,
    isc.column_default::text AS default_value,
    COALESCE(isc.is_nullable = 'NO', att.attnotnull) AS is_not_null
FROM pg_attribute att
JOIN pg_class tbl ON att.attrelid = tbl.oid
JOIN pg_namespace nsp ON tbl.relnamespace = nsp.oid
LEFT JOIN pg_index ind ON att.attrelid = ind.indrelid AND att.attnum = ANY(ind.indkey)
LEFT JOIN pg_class idx ON ind.indexrelid = idx.oid
LEFT JOIN pg_constraint con ON att.attrelid = con.conrelid AND att.attnum = ANY(con.conkey)
LEFT JOIN information_schema.columns isc
    ON isc.table_schema = nsp.nspname
    AND isc.table_name = tbl.relname
    AND isc.column_name = att.attname
LEFT JOIN (
    SELECT
        con.oid,
        clf.relname AS foreign_table_name,
        af.attname AS foreign_column_name,
        con.confdeltype,
        con.confupdtype
    FROM pg_constraint con
    JOIN pg_class clf ON con.confrelid = clf.oid
    JOIN pg_attribute af ON af.attrelid = clf.oid AND af.attnum = ANY(con.confkey)
    WHERE con.contype = 'f'
) AS fk_info ON con.oid = fk_info.oid
WHERE nsp.nspname = 'public'
    AND tbl.relname <> '__pgshift_migrations__'
    AND tbl.relkind = 'r'
    AND att.attnum > 0
    AND NOT att.attisdropped"#;

const SELECT_SCHEMA_INFO_SQL: &str =
    "SELECT * FROM pgshift_schema_info ORDER BY table_name, column_position";

/// Whether to read the live schema or pretend the database is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntrospectMode {
    /// Query the catalog.
    #[default]
    Live,
    /// Return an empty schema without touching the database. Used to
    /// generate an initial migration that creates everything from scratch.
    Initial,
}

/// One row of the catalog view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaInfoRow {
    pub table_name: String,
    pub column_name: String,
    pub data_type: String,
    pub index_name: Option<String>,
    pub constraint_name: Option<String>,
    pub constraint_type: Option<String>,
    pub foreign_table_name: Option<String>,
    pub foreign_column_name: Option<String>,
    pub on_delete: Option<String>,
    pub on_update: Option<String>,
    pub default_value: Option<String>,
    pub is_not_null: bool,
}

impl SchemaInfoRow {
    pub fn from_row(row: &Row) -> std::result::Result<Self, tokio_postgres::Error> {
        Ok(Self {
            table_name: row.try_get("table_name")?,
            column_name: row.try_get("column_name")?,
            data_type: row.try_get("data_type")?,
            index_name: row.try_get("index_name")?,
            constraint_name: row.try_get("constraint_name")?,
            constraint_type: row.try_get("constraint_type")?,
            foreign_table_name: row.try_get("foreign_table_name")?,
            foreign_column_name: row.try_get("foreign_column_name")?,
            on_delete: row.try_get("on_delete")?,
            on_update: row.try_get("on_update")?,
            default_value: row.try_get("default_value")?,
            is_not_null: row.try_get::<_, Option<bool>>("is_not_null")?.unwrap_or(false),
        })
    }
}

/// Loads the live schema, skipping tables that are not ours to manage.
#[derive(Debug, Clone)]
pub struct Introspector {
    excluded_tables: Vec<String>,
}

impl Default for Introspector {
    /// Excludes `spatial_ref_sys`, which PostGIS creates in `public`.
    fn default() -> Self {
        Self::new(vec!["spatial_ref_sys".to_string()])
    }
}

impl Introspector {
    pub fn new(excluded_tables: Vec<String>) -> Self {
        Self { excluded_tables }
    }

    pub fn excluded_tables(&self) -> &[String] {
        &self.excluded_tables
    }

    /// Create or replace the catalog view.
    pub async fn ensure_view<C: Connection>(&self, conn: &C) -> Result<()> {
        conn.traced()
            .batch_execute(SCHEMA_INFO_VIEW_SQL)
            .await
            .map_err(Error::Introspection)
    }

    /// Read the live schema. The view must already exist (see [`Introspector::ensure_view`]).
    pub async fn load<C: Connection>(&self, conn: &C, mode: IntrospectMode) -> Result<Schema> {
        if mode == IntrospectMode::Initial {
            return Ok(Schema::new());
        }

        let rows = conn
            .traced()
            .query(SELECT_SCHEMA_INFO_SQL, &[])
            .await
            .map_err(Error::Introspection)?;

        let rows = rows
            .iter()
            .map(SchemaInfoRow::from_row)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::Introspection)?;

        let schema = self.fold_rows(rows);
        tracing::debug!(
            tables = schema.tables.len(),
            columns = schema.iter_tables().map(|t| t.columns.len()).sum::<usize>(),
            "introspected live schema"
        );
        Ok(schema)
    }

    /// Collapse catalog rows into a sorted [`Schema`].
    ///
    /// The first row of a table creates it, the first row of a column creates
    /// the column (catalog-normalized); every row may add one constraint and
    /// one index, unless one with that name is already attached.
    pub fn fold_rows(&self, rows: impl IntoIterator<Item = SchemaInfoRow>) -> Schema {
        let mut schema = Schema::new();

        for row in rows {
            if self.excluded_tables.contains(&row.table_name) {
                continue;
            }

            let table = schema
                .tables
                .entry(row.table_name.clone())
                .or_insert_with(|| Table::new(row.table_name.clone(), Vec::new()));

            let position = match table.columns.iter().position(|c| c.name == row.column_name) {
                Some(position) => position,
                None => {
                    let mut column = Column::new(row.column_name.clone(), row.data_type.clone());
                    column.not_null = row.is_not_null;
                    column.default = row.default_value.clone();
                    table.columns.push(column);
                    table.columns.len() - 1
                }
            };
            let column = &mut table.columns[position];

            if let Some(constraint) = constraint_from_row(&row) {
                if !column.constraints.iter().any(|c| c.name == constraint.name) {
                    column.constraints.push(constraint);
                }
            }

            if let Some(index_name) = row.index_name {
                if !column.indexes.iter().any(|i| i.name == index_name) {
                    column.indexes.push(Index { name: index_name });
                }
            }
        }

        // normalize once every constraint is attached, so foreign key
        // actions are covered too
        for table in schema.tables.values_mut() {
            let columns = std::mem::take(&mut table.columns);
            table.columns = columns
                .into_iter()
                .map(|c| c.normalize(Source::Catalog))
                .collect();
        }

        schema.sort();
        schema
    }
}

/// The constraint a row describes, if it is of a kind the diff tracks.
fn constraint_from_row(row: &SchemaInfoRow) -> Option<Constraint> {
    let name = row.constraint_name.clone()?;
    let kind = match row.constraint_type.as_deref().and_then(ConstraintKind::from_catalog) {
        Some(kind) => kind,
        None => {
            tracing::trace!(
                table = %row.table_name,
                constraint = %name,
                kind = ?row.constraint_type,
                "ignoring untracked constraint kind"
            );
            return None;
        }
    };

    Some(match kind {
        ConstraintKind::ForeignKey => Constraint::foreign_key(
            name,
            ForeignKeyDetails {
                reference_table: row.foreign_table_name.clone(),
                reference_column: row.foreign_column_name.clone(),
                on_delete: row.on_delete.clone(),
                on_update: row.on_update.clone(),
            },
        ),
        ConstraintKind::PrimaryKey => Constraint::primary_key(name),
        ConstraintKind::Unique => Constraint::unique(name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(table: &str, column: &str, data_type: &str) -> SchemaInfoRow {
        SchemaInfoRow {
            table_name: table.to_string(),
            column_name: column.to_string(),
            data_type: data_type.to_string(),
            ..Default::default()
        }
    }

    fn with_constraint(mut row: SchemaInfoRow, name: &str, kind: &str) -> SchemaInfoRow {
        row.constraint_name = Some(name.to_string());
        row.constraint_type = Some(kind.to_string());
        row
    }

    fn with_index(mut row: SchemaInfoRow, name: &str) -> SchemaInfoRow {
        row.index_name = Some(name.to_string());
        row
    }

    fn users_rows() -> Vec<SchemaInfoRow> {
        let mut id = row("users", "id", "bigint");
        id.is_not_null = true;
        let mut email = row("users", "email", "character varying(255)");
        email.is_not_null = true;
        email.default_value = Some("'nobody'::character varying".to_string());

        vec![
            // pkey index x pkey constraint, and the same for email: the
            // joins repeat each constraint once per index on the column
            with_index(with_constraint(id.clone(), "users_pkey", "PRIMARY KEY"), "users_pkey"),
            with_index(with_constraint(email.clone(), "users_email_key", "UNIQUE"), "users_email_key"),
            with_index(with_constraint(email, "users_email_key", "UNIQUE"), "users_email_lower_idx"),
        ]
    }

    #[test]
    fn test_fold_builds_normalized_columns() {
        let schema = Introspector::default().fold_rows(users_rows());
        let users = schema.get_table("users").unwrap();

        assert_eq!(users.columns.len(), 2);
        let id = users.get_column("id").unwrap();
        assert!(id.is_primary_key());
        assert!(id.not_null);

        let email = users.get_column("email").unwrap();
        assert_eq!(email.data_type, "varchar(255)");
        assert_eq!(email.default.as_deref(), Some("'nobody'"));
        assert_eq!(email.unique_constraint_name(), Some("users_email_key"));
        // constraint not duplicated by the index fan-out
        assert_eq!(email.constraints.len(), 1);
        let indexes: Vec<_> = email.indexes.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(indexes, vec!["users_email_key", "users_email_lower_idx"]);
    }

    #[test]
    fn test_fold_keeps_column_order_and_sorts_tables() {
        let rows = vec![
            row("zebra", "b", "text"),
            row("zebra", "a", "text"),
            row("apple", "id", "bigint"),
        ];
        let schema = Introspector::default().fold_rows(rows);

        let tables: Vec<_> = schema.tables.keys().map(String::as_str).collect();
        assert_eq!(tables, vec!["apple", "zebra"]);
        let columns: Vec<_> = schema.tables["zebra"]
            .columns
            .iter()
            .map(|c| c.name.as_str())
            .collect();
        assert_eq!(columns, vec!["b", "a"]);
    }

    #[test]
    fn test_fold_foreign_key_details() {
        let mut fk = with_constraint(row("orders", "user_id", "bigint"), "orders_user_id_fkey", "FOREIGN KEY");
        fk.foreign_table_name = Some("users".into());
        fk.foreign_column_name = Some("id".into());
        fk.on_delete = Some("CASCADE".into());
        fk.on_update = Some("NO ACTION".into());

        let schema = Introspector::default().fold_rows(vec![fk]);
        let column = schema.tables["orders"].get_column("user_id").unwrap();
        let details = column
            .foreign_key_named("orders_user_id_fkey")
            .and_then(|c| c.complete_foreign_key())
            .unwrap();

        assert_eq!(details.reference_table.as_deref(), Some("users"));
        assert_eq!(details.reference_column.as_deref(), Some("id"));
        assert_eq!(details.on_delete.as_deref(), Some("CASCADE"));
        assert_eq!(details.on_update, None);
    }

    #[test]
    fn test_fold_skips_excluded_tables_and_untracked_constraints() {
        let rows = vec![
            row("spatial_ref_sys", "srid", "integer"),
            with_constraint(row("items", "qty", "integer"), "items_qty_check", "c"),
            row("audit", "id", "bigint"),
        ];

        let schema = Introspector::default().fold_rows(rows.clone());
        assert!(schema.get_table("spatial_ref_sys").is_none());
        assert!(schema.tables["items"].columns[0].constraints.is_empty());

        let schema = Introspector::new(vec!["audit".into()]).fold_rows(rows);
        assert!(schema.get_table("spatial_ref_sys").is_some());
        assert!(schema.get_table("audit").is_none());
    }

    #[test]
    fn test_live_schema_matches_declared_schema() {
        let live = Introspector::default().fold_rows(users_rows());

        let mut declared = Schema::from_tables(vec![Table::new(
            "users",
            vec![
                Column::new("id", "int")
                    .with_constraint(Constraint::primary_key("users_pkey"))
                    .normalize(Source::Declarative),
                Column::new("email", "string")
                    .not_null()
                    .with_default("nobody")
                    .with_constraint(Constraint::unique("users_email_key"))
                    .normalize(Source::Declarative),
            ],
        )])
        .unwrap();
        declared.sort();

        assert!(declared.diff(&live).is_empty());
    }
}
