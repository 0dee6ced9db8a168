//! DDL parser (C4). Builds an intermediate DDL record from the envelope
//! (spec.md §3, §4.2).

use crate::envelope::{EnvelopeReader, NULL_SENTINEL};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdlKind {
    Create,
    Alter,
    Drop,
}

impl DdlKind {
    fn from_str(s: &str) -> Option<Self> {
        match s {
            "CREATE" => Some(DdlKind::Create),
            "ALTER" => Some(DdlKind::Alter),
            "DROP" => Some(DdlKind::Drop),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColumnDecl {
    pub name: String,
    pub type_name: String,
    pub length: i32,
    pub scale: i32,
    pub optional: bool,
    pub position: i32,
    pub auto_incremented: bool,
    pub default_value_expression: Option<String>,
    pub enum_values: Option<Vec<String>>,
    pub charset_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct DbzDdlRecord {
    pub id: String,
    pub kind: DdlKind,
    pub primary_key_column_names: Vec<String>,
    pub columns: Vec<ColumnDecl>,
}

/// Parses `payload.tableChanges.0` into a [`DbzDdlRecord`]. Returns `Ok(None)`
/// (non-error) when the event is not a DDL event, per spec.md §4.2.
pub fn parse_ddl(reader: &EnvelopeReader) -> Result<Option<DbzDdlRecord>, crate::error::IngestError> {
    let id = reader.get_string("payload.tableChanges.0.id", true);
    let kind_str = reader.get_string("payload.tableChanges.0.type", true);

    if id == NULL_SENTINEL && kind_str == NULL_SENTINEL {
        return Ok(None);
    }

    let kind = DdlKind::from_str(&kind_str)
        .ok_or_else(|| crate::error::IngestError::UnknownDdlKind(kind_str.clone()))?;

    let primary_key_column_names = reader
        .get_subtree("payload.tableChanges.0.table.primaryKeyColumnNames")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let columns = match kind {
        DdlKind::Create | DdlKind::Alter => reader
            .get_subtree("payload.tableChanges.0.table.columns")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().map(parse_column).collect())
            .unwrap_or_default(),
        DdlKind::Drop => Vec::new(),
    };

    Ok(Some(DbzDdlRecord {
        id,
        kind,
        primary_key_column_names,
        columns,
    }))
}

fn parse_column(col: &serde_json::Value) -> ColumnDecl {
    ColumnDecl {
        name: col.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string(),
        type_name: col
            .get("typeName")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        length: col.get("length").and_then(|v| v.as_i64()).unwrap_or(0) as i32,
        scale: col.get("scale").and_then(|v| v.as_i64()).unwrap_or(0) as i32,
        optional: col.get("optional").and_then(|v| v.as_bool()).unwrap_or(true),
        position: col.get("position").and_then(|v| v.as_i64()).unwrap_or(0) as i32,
        auto_incremented: col
            .get("autoIncremented")
            .and_then(|v| v.as_bool())
            .unwrap_or(false),
        default_value_expression: col
            .get("defaultValueExpression")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        enum_values: col.get("enumValues").and_then(|v| v.as_array()).map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        }),
        charset_name: col
            .get("charsetName")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
    }
}
