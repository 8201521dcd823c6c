//! Schema diffing - compare the desired schema against the live database.
//!
//! [`Schema::diff`] walks both trees and emits two ordered statement lists:
//! `up` turns the live schema into the desired one, `down` turns it back.
//!
//! ## Body and footer
//!
//! Statements are collected into these accumulators:
//!
//! ```text
//! up   = fk_drops  ++ code        ++ footer
//! down = down_code ++ down_footer ++ down_restore
//! ```
//!
//! Foreign keys leave first and arrive last. Dropping a foreign key never
//! depends on anything, while a unique constraint or column cannot be dropped
//! while a foreign key still points at it, so `fk_drops` runs before `code`.
//! That includes the foreign keys of dropped tables and columns, which
//! `CASCADE` would otherwise only remove when their owner goes.
//! New foreign keys go to `footer`, once every table, column and unique
//! constraint they reference exists.
//!
//! The down side mirrors this. `down_code` removes the foreign keys `up`
//! added and recreates dropped tables, `down_footer` undoes the column and
//! constraint changes, and `down_restore` re-adds every foreign key `up`
//! removed.
//!
//! Dropped tables are *prepended* to `down_code`, which recreates them in
//! reverse drop order and before any statement that references them.
//!
//! Column types and defaults are compared nowhere: only presence,
//! nullability, uniqueness and foreign keys are reconciled.

use crate::{Column, Constraint, Error, Result, Schema, Table, sql};

/// Ordered forward and reverse DDL produced by a diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSql {
    /// Statements that turn the live schema into the desired one.
    pub up: Vec<String>,
    /// Statements that undo `up`.
    pub down: Vec<String>,
}

impl MigrationSql {
    /// Returns true if there are no differences.
    pub fn is_empty(&self) -> bool {
        self.up.is_empty() && self.down.is_empty()
    }

    /// The up statements, one per line.
    pub fn up_sql(&self) -> String {
        join_statements(&self.up)
    }

    /// The down statements, one per line.
    pub fn down_sql(&self) -> String {
        join_statements(&self.down)
    }
}

pub(crate) fn join_statements(statements: &[String]) -> String {
    let mut sql = String::new();
    for statement in statements {
        sql.push_str(statement);
        sql.push('\n');
    }
    sql
}

impl std::fmt::Display for MigrationSql {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return writeln!(f, "No changes detected.");
        }
        writeln!(f, "-- up")?;
        for statement in &self.up {
            writeln!(f, "{}", statement)?;
        }
        writeln!(f, "\n-- down")?;
        for statement in &self.down {
            writeln!(f, "{}", statement)?;
        }
        Ok(())
    }
}

impl Schema {
    /// Compare this schema (desired) against another schema (live database).
    ///
    /// Returns the statements needed to transform `live` into `self`, and
    /// back. Both schemas should be sorted (see [`Schema::sort`]) for the
    /// output to be reproducible.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let desired = pgshift::parse_desired_schema(&document)?;
    /// let live = introspector.load(&client, IntrospectMode::Live).await?;
    /// let migration = desired.diff(&live);
    ///
    /// for statement in &migration.up {
    ///     println!("{statement}");
    /// }
    /// ```
    pub fn diff(&self, live: &Schema) -> MigrationSql {
        let mut plan = Plan::default();

        for table in self.iter_tables() {
            match live.get_table(&table.name) {
                None => plan.create_table(table),
                Some(live_table) => plan.alter_table(table, live_table),
            }
        }

        for live_table in live.iter_tables() {
            if self.get_table(&live_table.name).is_none() {
                plan.drop_table(live_table);
            }
        }

        plan.finish()
    }

    /// Like [`Schema::diff`], but reports an empty diff as [`Error::NoChanges`].
    pub fn diff_checked(&self, live: &Schema) -> Result<MigrationSql> {
        let migration = self.diff(live);
        if migration.is_empty() {
            return Err(Error::NoChanges);
        }
        Ok(migration)
    }
}

#[derive(Default)]
struct Plan {
    fk_drops: Vec<String>,
    code: Vec<String>,
    footer: Vec<String>,
    down_code: Vec<String>,
    down_footer: Vec<String>,
    /// Foreign keys removed by `up`, restored once the down migration has
    /// put every table, column and unique constraint back.
    down_restore: Vec<String>,
}

impl Plan {
    fn finish(self) -> MigrationSql {
        let mut up = self.fk_drops;
        up.extend(self.code);
        up.extend(self.footer);

        let mut down = self.down_code;
        down.extend(self.down_footer);
        down.extend(self.down_restore);

        MigrationSql { up, down }
    }

    fn create_table(&mut self, table: &Table) {
        self.code.push(sql::create_table(table));
        self.down_footer.push(sql::drop_table(&table.name));

        for column in &table.columns {
            self.add_foreign_keys(&table.name, column);
        }
    }

    fn drop_table(&mut self, live_table: &Table) {
        self.code.push(sql::drop_table(&live_table.name));
        self.down_code.insert(0, sql::create_table(live_table));

        for column in &live_table.columns {
            self.drop_foreign_keys(&live_table.name, column);
        }
    }

    fn alter_table(&mut self, desired: &Table, live: &Table) {
        let table = desired.name.as_str();

        for column in &desired.columns {
            match live.get_column(&column.name) {
                None => {
                    self.code.push(sql::add_column(table, column));
                    self.down_footer.push(sql::drop_column(table, &column.name));
                    self.add_foreign_keys(table, column);
                }
                Some(live_column) => self.alter_column(table, column, live_column),
            }
        }

        for live_column in &live.columns {
            if desired.get_column(&live_column.name).is_none() {
                self.code.push(sql::drop_column(table, &live_column.name));
                self.down_footer.push(sql::add_column(table, live_column));
                self.drop_foreign_keys(table, live_column);
            }
        }
    }

    fn alter_column(&mut self, table: &str, desired: &Column, live: &Column) {
        for fk in desired.foreign_keys() {
            match live.foreign_key_named(&fk.name) {
                None => self.add_foreign_key(table, &desired.name, fk),
                Some(live_fk) if live_fk.foreign_key != fk.foreign_key => {
                    self.replace_foreign_key(table, desired, fk, live, live_fk);
                }
                Some(_) => {}
            }
        }

        for live_fk in live.foreign_keys() {
            if desired.foreign_key_named(&live_fk.name).is_none() {
                self.fk_drops.push(sql::drop_constraint(table, &live_fk.name));
                if let Some(restore) = sql::add_foreign_key(table, &live.name, live_fk) {
                    self.down_restore.push(restore);
                }
            }
        }

        if desired.is_unique() != live.is_unique() {
            let column = desired.name.as_str();
            if desired.is_unique() {
                let name = unique_name(table, desired);
                self.code.push(sql::add_unique(table, &name, column));
                self.down_footer.push(sql::drop_constraint(table, &name));
            } else {
                let name = unique_name(table, live);
                self.code.push(sql::drop_constraint(table, &name));
                self.down_footer.push(sql::add_unique(table, &name, column));
            }
        }

        if desired.not_null != live.not_null {
            let column = desired.name.as_str();
            if desired.not_null {
                self.code.push(sql::set_not_null(table, column));
                self.down_footer.push(sql::drop_not_null(table, column));
            } else {
                self.code.push(sql::drop_not_null(table, column));
                self.down_footer.push(sql::set_not_null(table, column));
            }
        }
    }

    /// Drop the live definition and add the desired one; the down side drops
    /// the desired definition and puts the live one back, in that order.
    fn replace_foreign_key(
        &mut self,
        table: &str,
        desired: &Column,
        fk: &Constraint,
        live: &Column,
        live_fk: &Constraint,
    ) {
        self.fk_drops.push(sql::drop_constraint(table, &live_fk.name));

        if let Some(add) = sql::add_foreign_key(table, &desired.name, fk) {
            self.footer.push(add);
            self.down_code.push(sql::drop_constraint(table, &fk.name));
        }

        if let Some(restore) = sql::add_foreign_key(table, &live.name, live_fk) {
            self.down_restore.push(restore);
        }
    }

    fn add_foreign_keys(&mut self, table: &str, column: &Column) {
        for fk in column.foreign_keys() {
            self.add_foreign_key(table, &column.name, fk);
        }
    }

    fn add_foreign_key(&mut self, table: &str, column: &str, fk: &Constraint) {
        if let Some(add) = sql::add_foreign_key(table, column, fk) {
            self.footer.push(add);
            self.down_code.push(sql::drop_constraint(table, &fk.name));
        }
    }

    /// Foreign keys of a live column that is about to be dropped. `CASCADE`
    /// would remove them too, but only when the column goes, which may be
    /// after a unique constraint they reference.
    fn drop_foreign_keys(&mut self, table: &str, live_column: &Column) {
        for fk in live_column.foreign_keys() {
            if let Some(restore) = sql::add_foreign_key(table, &live_column.name, fk) {
                self.fk_drops.push(sql::drop_constraint(table, &fk.name));
                self.down_restore.push(restore);
            }
        }
    }
}

/// The column's own unique constraint name, or the name Postgres would pick.
fn unique_name(table: &str, column: &Column) -> String {
    column
        .unique_constraint_name()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}_{}_key", table, column.name))
}
