//! Destination table descriptions.

use serde::{Deserialize, Serialize};

use super::value::SqlType;

/// A destination column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub sql_type: SqlType,
    pub nullable: bool,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            name: name.into(),
            sql_type,
            nullable: true,
        }
    }

    /// Mark the column NOT NULL.
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// A destination table: name plus the columns a unit writes, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSpec {
    pub name: String,
    pub columns: Vec<ColumnSpec>,
    /// Serial column whose sequence is advanced past loaded values.
    #[serde(default)]
    pub identity: Option<String>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            identity: None,
        }
    }

    pub fn column(mut self, name: &str, sql_type: SqlType) -> Self {
        self.columns.push(ColumnSpec::new(name, sql_type));
        self
    }

    pub fn required(mut self, name: &str, sql_type: SqlType) -> Self {
        self.columns.push(ColumnSpec::new(name, sql_type).required());
        self
    }

    pub fn identity(mut self, column: &str) -> Self {
        self.identity = Some(column.to_string());
        self
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn find(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Quote a PostgreSQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Qualify a table name with schema.
pub fn qualify_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quote_ident(schema), quote_ident(table))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("tbl_usuarios"), "\"tbl_usuarios\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(qualify_table("public", "dic_sedes"), "\"public\".\"dic_sedes\"");
    }

    #[test]
    fn test_table_builder() {
        let table = TableSpec::new("dic_areas_ocde")
            .required("id", SqlType::Integer)
            .column("nombre", SqlType::Text)
            .identity("id");
        assert_eq!(table.column_names(), vec!["id", "nombre"]);
        assert!(!table.find("id").unwrap().nullable);
        assert_eq!(table.identity.as_deref(), Some("id"));
    }
}
