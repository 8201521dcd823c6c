//! Schema model shared by the introspector, the desired-schema boundary and
//! the diff engine.
//!
//! ## Normalization
//!
//! The same logical type is spelled differently depending on where it comes
//! from: a declarative model says `string`, the Postgres catalog says
//! `character varying(255)`. Every column is normalized exactly once, when it
//! enters a [`Schema`], so the diff can compare spellings directly without
//! knowing where either side came from.
//!
//! | source      | rule                                                              |
//! |-------------|-------------------------------------------------------------------|
//! | declarative | `int` → `bigint`, `float` → `numeric`, `string` → `varchar(255)`  |
//! | declarative | `time`, `timestamp` → `timestamp with time zone`                  |
//! | declarative | literal defaults of `uuid` / `varchar*` columns are single-quoted |
//! | catalog     | `character varying(N)` → `varchar(N)`                             |
//! | catalog     | `::character varying` / `::uuid` casts stripped from defaults     |

use facet::Facet;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

use crate::{Error, Result};

/// Where a column definition came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// A declarative description of the desired schema (object model, JSON document).
    Declarative,
    /// The live database catalog.
    Catalog,
}

/// Constraint kinds tracked by the diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Facet)]
#[repr(u8)]
pub enum ConstraintKind {
    #[facet(rename = "PRIMARY KEY")]
    PrimaryKey,
    #[facet(rename = "UNIQUE")]
    Unique,
    #[facet(rename = "FOREIGN KEY")]
    ForeignKey,
}

impl ConstraintKind {
    /// Parse the constraint type reported by the catalog view.
    ///
    /// Returns `None` for kinds the diff does not track (CHECK, EXCLUDE, ...).
    pub fn from_catalog(kind: &str) -> Option<Self> {
        match kind {
            "PRIMARY KEY" => Some(ConstraintKind::PrimaryKey),
            "UNIQUE" => Some(ConstraintKind::Unique),
            "FOREIGN KEY" => Some(ConstraintKind::ForeignKey),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            ConstraintKind::PrimaryKey => "PRIMARY KEY",
            ConstraintKind::Unique => "UNIQUE",
            ConstraintKind::ForeignKey => "FOREIGN KEY",
        }
    }
}

/// Target and actions of a foreign key.
///
/// Every field is optional: a desired-schema source may know the constraint
/// name without knowing where it points yet, in which case no DDL is emitted
/// for it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Facet)]
pub struct ForeignKeyDetails {
    /// Referenced table
    #[facet(default)]
    pub reference_table: Option<String>,
    /// Referenced column
    #[facet(default)]
    pub reference_column: Option<String>,
    /// `ON DELETE` action (`CASCADE`, `SET NULL`, ...)
    #[facet(default)]
    pub on_delete: Option<String>,
    /// `ON UPDATE` action
    #[facet(default)]
    pub on_update: Option<String>,
}

impl ForeignKeyDetails {
    /// Both the referenced table and column are known.
    pub fn is_complete(&self) -> bool {
        self.reference_table.is_some() && self.reference_column.is_some()
    }

    fn normalize_actions(&mut self) {
        self.on_delete = normalize_action(self.on_delete.take());
        self.on_update = normalize_action(self.on_update.take());
    }
}

/// `NO ACTION` is the Postgres default, so it compares equal to "no action given".
fn normalize_action(action: Option<String>) -> Option<String> {
    action.filter(|a| !a.is_empty() && !a.eq_ignore_ascii_case("NO ACTION"))
}

/// A named constraint attached to a column.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct Constraint {
    /// Constraint name, unique within the schema
    pub name: String,
    /// What kind of constraint this is
    pub kind: ConstraintKind,
    /// Foreign key target, only meaningful for [`ConstraintKind::ForeignKey`]
    #[facet(default)]
    pub foreign_key: Option<ForeignKeyDetails>,
}

impl Constraint {
    pub fn primary_key(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ConstraintKind::PrimaryKey,
            foreign_key: None,
        }
    }

    pub fn unique(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ConstraintKind::Unique,
            foreign_key: None,
        }
    }

    pub fn foreign_key(name: impl Into<String>, details: ForeignKeyDetails) -> Self {
        Self {
            name: name.into(),
            kind: ConstraintKind::ForeignKey,
            foreign_key: Some(details),
        }
    }

    pub fn is_foreign_key(&self) -> bool {
        self.kind == ConstraintKind::ForeignKey
    }

    /// Foreign key details, but only when the reference is fully known.
    pub fn complete_foreign_key(&self) -> Option<&ForeignKeyDetails> {
        if !self.is_foreign_key() {
            return None;
        }
        self.foreign_key.as_ref().filter(|fk| fk.is_complete())
    }
}

/// An index covering a column. Only the name is tracked.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct Index {
    pub name: String,
}

/// A database column definition.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Dialect-native type, e.g. `bigint`, `varchar(255)`
    pub data_type: String,
    /// Whether the column rejects NULL
    #[facet(default)]
    pub not_null: bool,
    /// Default value expression (if any)
    #[facet(default)]
    pub default: Option<String>,
    /// Constraints this column participates in
    #[facet(default)]
    pub constraints: Vec<Constraint>,
    /// Indexes covering this column
    #[facet(default)]
    pub indexes: Vec<Index>,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            not_null: false,
            default: None,
            constraints: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    /// True iff the column owns a unique constraint.
    pub fn is_unique(&self) -> bool {
        self.constraints
            .iter()
            .any(|c| c.kind == ConstraintKind::Unique)
    }

    /// True iff the column is part of the primary key.
    pub fn is_primary_key(&self) -> bool {
        self.constraints
            .iter()
            .any(|c| c.kind == ConstraintKind::PrimaryKey)
    }

    /// Name of the first unique constraint, if any.
    pub fn unique_constraint_name(&self) -> Option<&str> {
        self.constraints
            .iter()
            .find(|c| c.kind == ConstraintKind::Unique)
            .map(|c| c.name.as_str())
    }

    pub fn foreign_keys(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.iter().filter(|c| c.is_foreign_key())
    }

    pub fn foreign_key_named(&self, name: &str) -> Option<&Constraint> {
        self.foreign_keys().find(|c| c.name == name)
    }

    /// Rewrite type and default spellings so both sources agree.
    ///
    /// Must be applied exactly once per column: quoting a default is not
    /// idempotent for every input.
    pub fn normalize(mut self, source: Source) -> Self {
        match source {
            Source::Declarative => self.normalize_declarative(),
            Source::Catalog => self.normalize_catalog(),
        }
        for constraint in &mut self.constraints {
            if let Some(fk) = constraint.foreign_key.as_mut() {
                fk.normalize_actions();
            }
        }
        self
    }

    fn normalize_declarative(&mut self) {
        match self.data_type.as_str() {
            "int" => self.data_type = "bigint".to_string(),
            "float" => self.data_type = "numeric".to_string(),
            "string" => self.data_type = "varchar(255)".to_string(),
            "time" | "timestamp" => self.data_type = "timestamp with time zone".to_string(),
            _ => {}
        }

        if self.data_type == "uuid" {
            self.default = self
                .default
                .take()
                .map(|d| if d.is_empty() { d } else { quote_literal_default(d) });
        } else if self.data_type.starts_with("varchar") {
            self.default = self.default.take().map(quote_literal_default);
        }

        // The catalog reports primary key columns as NOT NULL whether or not
        // the model said so.
        if self.is_primary_key() {
            self.not_null = true;
        }
    }

    fn normalize_catalog(&mut self) {
        if let Some(rest) = self.data_type.strip_prefix("character varying") {
            self.data_type = format!("varchar{rest}");
            self.default = self
                .default
                .take()
                .map(|d| strip_cast(d, "::character varying"));
        } else if self.data_type == "uuid" {
            self.default = self.default.take().map(|d| strip_cast(d, "::uuid"));
        }
    }
}

/// Single-quote a literal default unless it is a function call, already a
/// string literal, or an explicit cast.
fn quote_literal_default(default: String) -> String {
    let already_quoted = default.len() >= 2 && default.starts_with('\'') && default.ends_with('\'');
    if default.ends_with(')') || already_quoted || default.contains("::") {
        default
    } else {
        format!("'{default}'")
    }
}

fn strip_cast(default: String, cast: &str) -> String {
    match default.strip_suffix(cast) {
        Some(stripped) => stripped.to_string(),
        None => default,
    }
}

/// A database table definition.
#[derive(Debug, Clone, PartialEq, Eq, Facet)]
pub struct Table {
    /// Table name
    pub name: String,
    /// Columns, in definition order
    #[facet(default)]
    pub columns: Vec<Column>,
    /// Number of foreign keys the provider attached to this table. Informational.
    #[facet(default)]
    pub dependencies: u32,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
            dependencies: 0,
        }
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key_columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().filter(|c| c.is_primary_key())
    }
}

/// A complete database schema.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    /// Tables in the schema, indexed by name
    pub tables: IndexMap<String, Table>,
}

impl Schema {
    /// Create a new empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a schema from a list of tables, checking name uniqueness.
    ///
    /// Table names must be unique, column names unique within their table,
    /// and a constraint name may only be shared by columns of the same table
    /// (composite keys), with the same kind.
    pub fn from_tables(tables: Vec<Table>) -> Result<Self> {
        let mut schema = Schema::new();
        let mut constraint_owners: HashMap<String, (String, ConstraintKind)> = HashMap::new();

        for table in tables {
            let mut seen_columns = HashSet::new();
            for column in &table.columns {
                if !seen_columns.insert(column.name.as_str()) {
                    return Err(Error::InvalidSchema(format!(
                        "duplicate column '{}' in table '{}'",
                        column.name, table.name
                    )));
                }
                for constraint in &column.constraints {
                    let (owner, kind) = constraint_owners
                        .entry(constraint.name.clone())
                        .or_insert_with(|| (table.name.clone(), constraint.kind));
                    if *owner != table.name || *kind != constraint.kind {
                        return Err(Error::InvalidSchema(format!(
                            "constraint '{}' is defined more than once (tables '{}' and '{}')",
                            constraint.name, owner, table.name
                        )));
                    }
                }
            }

            if schema.tables.contains_key(&table.name) {
                return Err(Error::InvalidSchema(format!(
                    "duplicate table '{}'",
                    table.name
                )));
            }
            schema.tables.insert(table.name.clone(), table);
        }

        Ok(schema)
    }

    /// Get a table by name.
    pub fn get_table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    /// Iterate over all tables.
    pub fn iter_tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Order tables, and each column's constraints and indexes, by name.
    ///
    /// Column order is left alone: it is already deterministic (document
    /// order or catalog position) and it is the order `CREATE TABLE` uses.
    pub fn sort(&mut self) {
        self.tables.sort_keys();
        for table in self.tables.values_mut() {
            for column in &mut table.columns {
                column.constraints.sort_by(|a, b| a.name.cmp(&b.name));
                column.indexes.sort_by(|a, b| a.name.cmp(&b.name));
            }
        }
    }

    pub fn into_tables(self) -> Vec<Table> {
        self.tables.into_values().collect()
    }
}
