//! Where the desired schema comes from.
//!
//! pgshift does not derive a schema from application types itself. Anything
//! that can describe the tables it wants (a code generator, an ORM dump, a
//! checked-in file) hands over a JSON document:
//!
//! ```json
//! [
//!   {
//!     "name": "users",
//!     "columns": [
//!       {
//!         "name": "id",
//!         "data_type": "int",
//!         "not_null": true,
//!         "constraints": [{ "name": "users_pkey", "kind": "PRIMARY KEY" }]
//!       }
//!     ]
//!   }
//! ]
//! ```
//!
//! Types use the declarative spelling (`int`, `string`, `timestamp`, ...) and
//! are normalized on the way in.

use camino::{Utf8Path, Utf8PathBuf};

use crate::{Error, Result, Schema, Source, Table};

/// Produces the serialized desired-schema document.
pub trait SchemaProvider {
    fn desired_schema(&self) -> Result<String>;
}

/// Reads the document from a file.
#[derive(Debug, Clone)]
pub struct FileProvider {
    path: Utf8PathBuf,
}

impl FileProvider {
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl SchemaProvider for FileProvider {
    fn desired_schema(&self) -> Result<String> {
        std::fs::read_to_string(&self.path).map_err(|e| Error::io(&self.path, e))
    }
}

/// Holds the document in memory.
#[derive(Debug, Clone)]
pub struct StaticProvider {
    document: String,
}

impl StaticProvider {
    pub fn new(document: impl Into<String>) -> Self {
        Self {
            document: document.into(),
        }
    }
}

impl SchemaProvider for StaticProvider {
    fn desired_schema(&self) -> Result<String> {
        Ok(self.document.clone())
    }
}

/// Decode, normalize, validate and sort a desired-schema document.
pub fn parse_desired_schema(document: &str) -> Result<Schema> {
    let tables: Vec<Table> = facet_json::from_str(document)
        .map_err(|e| Error::InvalidSchemaDocument(e.to_string()))?;

    let tables = tables
        .into_iter()
        .map(|mut table| {
            if table.name.is_empty() {
                return Err(Error::InvalidSchema("table with an empty name".to_string()));
            }
            table.columns = table
                .columns
                .into_iter()
                .map(|column| column.normalize(Source::Declarative))
                .collect();
            Ok(table)
        })
        .collect::<Result<Vec<_>>>()?;

    let mut schema = Schema::from_tables(tables)?;
    schema.sort();
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConstraintKind;

    const USERS_AND_ORDERS: &str = r#"[
        {
            "name": "users",
            "dependencies": 0,
            "columns": [
                {
                    "name": "id",
                    "data_type": "int",
                    "not_null": true,
                    "default": null,
                    "constraints": [{ "name": "users_pkey", "kind": "PRIMARY KEY" }],
                    "indexes": [{ "name": "users_pkey" }]
                },
                {
                    "name": "email",
                    "data_type": "string",
                    "not_null": true,
                    "constraints": [{ "name": "users_email_key", "kind": "UNIQUE" }]
                },
                {
                    "name": "status",
                    "data_type": "varchar(16)",
                    "default": "active"
                }
            ]
        },
        {
            "name": "orders",
            "dependencies": 1,
            "columns": [
                {
                    "name": "id",
                    "data_type": "int",
                    "constraints": [{ "name": "orders_pkey", "kind": "PRIMARY KEY" }]
                },
                {
                    "name": "user_id",
                    "data_type": "int",
                    "constraints": [
                        {
                            "name": "orders_user_id_fkey",
                            "kind": "FOREIGN KEY",
                            "foreign_key": {
                                "reference_table": "users",
                                "reference_column": "id",
                                "on_delete": "CASCADE"
                            }
                        }
                    ]
                }
            ]
        }
    ]"#;

    #[test]
    fn test_parse_normalizes_and_sorts() {
        let schema = parse_desired_schema(USERS_AND_ORDERS).unwrap();

        let tables: Vec<_> = schema.tables.keys().map(String::as_str).collect();
        assert_eq!(tables, vec!["orders", "users"]);

        let users = schema.get_table("users").unwrap();
        assert_eq!(users.get_column("id").unwrap().data_type, "bigint");
        assert_eq!(users.get_column("email").unwrap().data_type, "varchar(255)");
        assert!(users.get_column("email").unwrap().is_unique());
        assert_eq!(
            users.get_column("status").unwrap().default.as_deref(),
            Some("'active'")
        );

        let orders = schema.get_table("orders").unwrap();
        assert_eq!(orders.dependencies, 1);
        // primary key forces NOT NULL even when the document omits it
        assert!(orders.get_column("id").unwrap().not_null);

        let fk = orders
            .get_column("user_id")
            .unwrap()
            .foreign_key_named("orders_user_id_fkey")
            .unwrap();
        assert_eq!(fk.kind, ConstraintKind::ForeignKey);
        let details = fk.complete_foreign_key().unwrap();
        assert_eq!(details.reference_table.as_deref(), Some("users"));
        assert_eq!(details.on_delete.as_deref(), Some("CASCADE"));
        assert_eq!(details.on_update, None);
    }

    #[test]
    fn test_parse_then_create_everything() {
        let schema = parse_desired_schema(USERS_AND_ORDERS).unwrap();
        let migration = schema.diff(&Schema::new());

        assert_eq!(
            migration.up,
            vec![
                "CREATE TABLE IF NOT EXISTS orders (id bigint NOT NULL, user_id bigint, PRIMARY KEY (id));",
                "CREATE TABLE IF NOT EXISTS users (id bigint NOT NULL, email varchar(255) NOT NULL UNIQUE, status varchar(16) DEFAULT 'active', PRIMARY KEY (id));",
                "ALTER TABLE orders ADD CONSTRAINT orders_user_id_fkey FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE;",
            ]
        );
    }

    #[test]
    fn test_empty_document() {
        assert!(parse_desired_schema("[]").unwrap().is_empty());
    }

    #[test]
    fn test_malformed_document() {
        let err = parse_desired_schema("{ not json").unwrap_err();
        assert!(matches!(err, Error::InvalidSchemaDocument(_)), "{err:?}");

        let err = parse_desired_schema(r#"[{ "columns": [] }]"#).unwrap_err();
        assert!(matches!(err, Error::InvalidSchemaDocument(_)), "{err:?}");

        let err = parse_desired_schema(
            r#"[{ "name": "t", "columns": [{ "name": "c", "data_type": "int", "constraints": [{ "name": "x", "kind": "CHECK" }] }] }]"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidSchemaDocument(_)), "{err:?}");
    }

    #[test]
    fn test_invalid_schema() {
        let err = parse_desired_schema(r#"[{ "name": "t" }, { "name": "t" }]"#).unwrap_err();
        assert!(matches!(err, Error::InvalidSchema(_)), "{err:?}");

        let err = parse_desired_schema(r#"[{ "name": "" }]"#).unwrap_err();
        assert!(matches!(err, Error::InvalidSchema(_)), "{err:?}");
    }

    #[test]
    fn test_providers() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("schema.json")).unwrap();
        std::fs::write(&path, USERS_AND_ORDERS).unwrap();

        let from_file = FileProvider::new(&path).desired_schema().unwrap();
        let from_memory = StaticProvider::new(USERS_AND_ORDERS).desired_schema().unwrap();
        assert_eq!(from_file, from_memory);

        let missing = FileProvider::new(path.with_file_name("missing.json"));
        assert!(matches!(
            missing.desired_schema().unwrap_err(),
            Error::Io { .. }
        ));
    }
}
