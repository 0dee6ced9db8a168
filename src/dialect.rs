//! Source dialect tag and per-dialect default type-mapping registries (C3).
//!
//! Represented as a tagged enum rather than string comparison so per-dialect
//! code (registry initialization, SQL Server's temporal-scale handling in
//! `ddl_translate.rs`) dispatches on the tag (spec.md §9 design note).

use std::collections::HashMap;

use crate::rules::TargetType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectorType {
    #[default]
    Undef,
    MySql,
    SqlServer,
    Oracle,
}

impl ConnectorType {
    pub fn from_str(s: &str) -> Self {
        match s {
            "mysql" => ConnectorType::MySql,
            "sqlserver" => ConnectorType::SqlServer,
            "oracle" => ConnectorType::Oracle,
            _ => ConnectorType::Undef,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorType::MySql => "mysql",
            ConnectorType::SqlServer => "sqlserver",
            ConnectorType::Oracle => "oracle",
            ConnectorType::Undef => "undefined",
        }
    }
}

/// Per-dialect default (source-type, autoincremented) → target type table,
/// overridable by the rule store's type mapping entries.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    defaults: HashMap<(String, bool), TargetType>,
}

impl TypeRegistry {
    pub fn for_dialect(dialect: ConnectorType) -> Self {
        match dialect {
            ConnectorType::MySql => Self::init_mysql(),
            ConnectorType::SqlServer => Self::init_sqlserver(),
            // Oracle is a present-but-inert dialect tag: its registry is
            // intentionally left unpopulated (spec.md §9 Open Questions).
            ConnectorType::Oracle | ConnectorType::Undef => Self::default(),
        }
    }

    fn insert(&mut self, from: &str, autoinc: bool, to: &str, size: i32) {
        self.defaults.insert(
            (from.to_string(), autoinc),
            TargetType {
                name: to.to_string(),
                length: size,
            },
        );
    }

    fn init_mysql() -> Self {
        let mut r = Self::default();
        r.insert("INT", true, "SERIAL", -1);
        r.insert("BIGINT", true, "BIGSERIAL", -1);
        r.insert("SMALLINT", true, "SMALLSERIAL", -1);
        r.insert("INT", false, "INTEGER", -1);
        r.insert("BIGINT", false, "BIGINT", -1);
        r.insert("SMALLINT", false, "SMALLINT", -1);
        r.insert("TINYINT", false, "SMALLINT", -1);
        r.insert("TINYINT UNSIGNED", false, "SMALLINT", -1);
        r.insert("MEDIUMINT", false, "INTEGER", -1);
        r.insert("FLOAT", false, "REAL", -1);
        r.insert("DOUBLE", false, "DOUBLE PRECISION", -1);
        r.insert("DECIMAL", false, "NUMERIC", -1);
        r.insert("VARCHAR", false, "VARCHAR", -1);
        r.insert("CHAR", false, "CHAR", -1);
        r.insert("TEXT", false, "TEXT", -1);
        r.insert("LONGTEXT", false, "TEXT", -1);
        r.insert("DATETIME", false, "TIMESTAMP", -1);
        r.insert("TIMESTAMP", false, "TIMESTAMPTZ", -1);
        r.insert("DATE", false, "DATE", -1);
        r.insert("TIME", false, "TIME", -1);
        r.insert("BLOB", false, "BYTEA", -1);
        r.insert("JSON", false, "JSONB", -1);
        r.insert("BIT(1)", false, "BOOL", -1);
        r.insert("BIT", false, "VARBIT", -1);
        r.insert("BOOLEAN", false, "BOOLEAN", -1);
        r
    }

    fn init_sqlserver() -> Self {
        let mut r = Self::default();
        r.insert("int", true, "SERIAL", -1);
        r.insert("bigint", true, "BIGSERIAL", -1);
        r.insert("smallint", true, "SMALLSERIAL", -1);
        r.insert("int", false, "INTEGER", -1);
        r.insert("bigint", false, "BIGINT", -1);
        r.insert("smallint", false, "SMALLINT", -1);
        r.insert("tinyint", false, "SMALLINT", -1);
        r.insert("float", false, "DOUBLE PRECISION", -1);
        r.insert("real", false, "REAL", -1);
        r.insert("decimal", false, "NUMERIC", -1);
        r.insert("numeric", false, "NUMERIC", -1);
        r.insert("money", false, "MONEY", -1);
        r.insert("varchar", false, "VARCHAR", -1);
        r.insert("nvarchar", false, "VARCHAR", -1);
        r.insert("char", false, "CHAR", -1);
        r.insert("text", false, "TEXT", -1);
        r.insert("datetime", false, "TIMESTAMP", -1);
        r.insert("datetime2", false, "TIMESTAMP", -1);
        r.insert("datetimeoffset", false, "TIMESTAMPTZ", -1);
        r.insert("date", false, "DATE", -1);
        r.insert("time", false, "TIME", -1);
        r.insert("varbinary", false, "BYTEA", -1);
        r.insert("BIT(1)", false, "BOOL", -1);
        r.insert("bit", false, "VARBIT", -1);
        r
    }

    pub fn lookup(&self, source_type: &str, auto_incremented: bool) -> Option<&TargetType> {
        self.defaults.get(&(source_type.to_string(), auto_incremented))
    }
}
