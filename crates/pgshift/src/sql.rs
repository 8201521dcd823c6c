//! DDL rendering for single schema elements.
//!
//! Identifiers are emitted as-is: names come from the catalog or from the
//! desired-schema document and are expected to be plain lowercase names.

use crate::{Column, Constraint, Table};

/// `name type [DEFAULT v] [NOT NULL] [UNIQUE]`
pub fn column_definition(col: &Column) -> String {
    let mut def = format!("{} {}", col.name, col.data_type);

    if let Some(default) = &col.default {
        def.push_str(&format!(" DEFAULT {}", default));
    }

    if col.not_null {
        def.push_str(" NOT NULL");
    }

    if col.is_unique() {
        def.push_str(" UNIQUE");
    }

    def
}

/// Generate a `CREATE TABLE IF NOT EXISTS` statement.
///
/// Does not include foreign key constraints: those are added separately once
/// every table exists. Columns with an empty name or type are skipped with a
/// warning.
pub fn create_table(table: &Table) -> String {
    let mut parts = Vec::with_capacity(table.columns.len() + 1);
    let mut pk_columns = Vec::new();

    for col in &table.columns {
        if col.name.is_empty() || col.data_type.is_empty() {
            tracing::warn!(
                table = %table.name,
                column = ?col,
                "column name or data type is empty, skipping column"
            );
            continue;
        }

        parts.push(column_definition(col));

        if col.is_primary_key() {
            pk_columns.push(col.name.as_str());
        }
    }

    if !pk_columns.is_empty() {
        parts.push(format!("PRIMARY KEY ({})", pk_columns.join(", ")));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({});",
        table.name,
        parts.join(", ")
    )
}

pub fn drop_table(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {} CASCADE;", table)
}

pub fn add_column(table: &str, col: &Column) -> String {
    format!("ALTER TABLE {} ADD COLUMN {};", table, column_definition(col))
}

pub fn drop_column(table: &str, column: &str) -> String {
    format!("ALTER TABLE {} DROP COLUMN {} CASCADE;", table, column)
}

/// `ALTER TABLE ... ADD CONSTRAINT ... FOREIGN KEY`, or `None` when the
/// constraint is not a foreign key or its reference is incomplete.
pub fn add_foreign_key(table: &str, column: &str, constraint: &Constraint) -> Option<String> {
    let Some(fk) = constraint.complete_foreign_key() else {
        tracing::debug!(
            table,
            column,
            constraint = %constraint.name,
            "foreign key reference incomplete, skipping"
        );
        return None;
    };

    // complete_foreign_key guarantees both are present
    let ref_table = fk.reference_table.as_deref()?;
    let ref_column = fk.reference_column.as_deref()?;

    let mut sql = format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        table, constraint.name, column, ref_table, ref_column
    );

    if let Some(on_delete) = &fk.on_delete {
        sql.push_str(&format!(" ON DELETE {}", on_delete));
    }

    if let Some(on_update) = &fk.on_update {
        sql.push_str(&format!(" ON UPDATE {}", on_update));
    }

    sql.push(';');
    Some(sql)
}

/// `ALTER TABLE ... DROP CONSTRAINT IF EXISTS`. A down migration may run
/// against a database where a `CASCADE` has already removed the constraint.
pub fn drop_constraint(table: &str, constraint: &str) -> String {
    format!("ALTER TABLE {} DROP CONSTRAINT IF EXISTS {};", table, constraint)
}

pub fn add_unique(table: &str, constraint: &str, column: &str) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} UNIQUE ({});",
        table, constraint, column
    )
}

pub fn set_not_null(table: &str, column: &str) -> String {
    format!("ALTER TABLE {} ALTER COLUMN {} SET NOT NULL;", table, column)
}

pub fn drop_not_null(table: &str, column: &str) -> String {
    format!("ALTER TABLE {} ALTER COLUMN {} DROP NOT NULL;", table, column)
}
