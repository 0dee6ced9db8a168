//! DML parser (C5). Builds an intermediate DML record from the envelope,
//! resolving column types against the schema cache (spec.md §4.3).

use crate::envelope::{EnvelopeReader, NULL_SENTINEL};
use crate::error::IngestError;
use crate::rules::RuleStore;
use crate::schema_cache::SchemaLookup;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Read,
    Create,
    Update,
    Delete,
}

impl Op {
    fn from_str(s: &str) -> Option<Self> {
        match s {
            "r" => Some(Op::Read),
            "c" => Some(Op::Create),
            "u" => Some(Op::Update),
            "d" => Some(Op::Delete),
            _ => None,
        }
    }
}

/// Upstream-declared temporal representation of a column (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timerep {
    Date,
    Time,
    MicroTime,
    NanoTime,
    Timestamp,
    MicroTimestamp,
    NanoTimestamp,
    ZonedTimestamp,
    Undef,
}

impl Timerep {
    pub fn from_debezium_type(name: &str) -> Self {
        match name {
            "io.debezium.time.Date" => Timerep::Date,
            "io.debezium.time.Time" => Timerep::Time,
            "io.debezium.time.MicroTime" => Timerep::MicroTime,
            "io.debezium.time.NanoTime" => Timerep::NanoTime,
            "io.debezium.time.Timestamp" => Timerep::Timestamp,
            "io.debezium.time.MicroTimestamp" => Timerep::MicroTimestamp,
            "io.debezium.time.NanoTimestamp" => Timerep::NanoTimestamp,
            "io.debezium.time.ZonedTimestamp" => Timerep::ZonedTimestamp,
            _ => Timerep::Undef,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ColumnValue {
    pub name: String,
    pub remote_column_name: String,
    /// `None` represents a SQL NULL (distinct from the text `"NULL"`).
    pub value: Option<String>,
    pub data_type: i32,
    pub position: i16,
    pub typemod: i32,
    pub scale: i32,
    pub timerep: Timerep,
}

#[derive(Debug, Clone)]
pub struct DbzDmlRecord {
    pub op: Op,
    pub remote_object_id: String,
    pub mapped_object_id: String,
    pub schema: String,
    pub table: String,
    pub table_oid: u32,
    pub column_values_before: Vec<ColumnValue>,
    pub column_values_after: Vec<ColumnValue>,
}

/// Parses `payload.source` + `payload.{before,after}` into a [`DbzDmlRecord`],
/// resolving each column against `schema_cache`. Returns `Ok(None)` when the
/// event carries no `op` (i.e. it is DDL, not DML).
pub fn parse_dml(
    reader: &EnvelopeReader,
    rules: &RuleStore,
    schema_cache: &mut dyn SchemaLookup,
) -> Result<Option<DbzDmlRecord>, IngestError> {
    let op_str = reader.get_string("payload.op", true);
    if op_str == NULL_SENTINEL {
        return Ok(None);
    }
    let op = Op::from_str(&op_str)
        .ok_or_else(|| IngestError::MalformedEnvelope(format!("unknown op: {op_str}")))?;

    let db = reader.get_string("payload.source.db", true);
    let schema_field = reader.get_string("payload.source.schema", true);
    let table = reader.get_string("payload.source.table", true);
    if db == NULL_SENTINEL || table == NULL_SENTINEL {
        return Err(IngestError::MalformedEnvelope(
            "payload.source.db/table missing".to_string(),
        ));
    }

    let remote_object_id = if schema_field == NULL_SENTINEL {
        format!("{db}.{table}")
    } else {
        format!("{db}.{schema_field}.{table}")
    };

    let mapped_object_id = rules
        .lookup_object_name(&remote_object_id, "table")
        .map(|s| s.to_string())
        .unwrap_or_else(|| default_mapped_object_id(&db, &schema_field, &table));

    let (mapped_schema, mapped_table) = split_mapped_object_id(&mapped_object_id)?;

    let table_schema = schema_cache.resolve_table(&mapped_schema, &mapped_table)?;
    let table_oid = table_schema.table_oid;

    let column_values_before = match op {
        Op::Update | Op::Delete => parse_column_list(
            reader,
            "payload.before",
            0,
            &remote_object_id,
            &mapped_object_id,
            rules,
            schema_cache,
            matches!(op, Op::Update | Op::Delete),
        )?,
        Op::Create | Op::Read => Vec::new(),
    };

    let column_values_after = match op {
        Op::Create | Op::Read | Op::Update => parse_column_list(
            reader,
            "payload.after",
            1,
            &remote_object_id,
            &mapped_object_id,
            rules,
            schema_cache,
            matches!(op, Op::Update),
        )?,
        Op::Delete => Vec::new(),
    };

    Ok(Some(DbzDmlRecord {
        op,
        remote_object_id,
        mapped_object_id,
        schema: mapped_schema,
        table: mapped_table,
        table_oid,
        column_values_before,
        column_values_after,
    }))
}

fn default_mapped_object_id(db: &str, schema_field: &str, table: &str) -> String {
    if schema_field == NULL_SENTINEL {
        format!("{db}.{table}")
    } else {
        format!("{schema_field}.{table}")
    }
}

fn split_mapped_object_id(mapped: &str) -> Result<(String, String), IngestError> {
    match mapped.rsplit_once('.') {
        Some((schema, table)) => Ok((schema.to_string(), table.to_string())),
        None => Err(IngestError::InvalidObjectId(mapped.to_string())),
    }
}

#[allow(clippy::too_many_arguments)]
fn parse_column_list(
    reader: &EnvelopeReader,
    path: &str,
    schema_fields_index: usize,
    remote_object_id: &str,
    mapped_object_id: &str,
    rules: &RuleStore,
    schema_cache: &mut dyn SchemaLookup,
    fatal_on_unknown_column: bool,
) -> Result<Vec<ColumnValue>, IngestError> {
    let Some(obj) = reader.get_subtree(path).and_then(|v| v.as_object()) else {
        return Ok(Vec::new());
    };

    let (mapped_schema, mapped_table) = split_mapped_object_id(mapped_object_id)?;
    let mut out = Vec::with_capacity(obj.len());

    for (remote_column_name, raw_value) in obj {
        let qualified_remote_column = format!("{remote_object_id}.{remote_column_name}");
        let mapped_name = rules
            .lookup_object_name(&qualified_remote_column, "column")
            .map(|s| s.to_string())
            .unwrap_or_else(|| remote_column_name.clone());

        let meta = schema_cache.get_column(&mapped_schema, &mapped_table, &mapped_name)?;
        let Some(meta) = meta else {
            if fatal_on_unknown_column {
                return Err(IngestError::UnknownColumn {
                    table: mapped_object_id.to_string(),
                    column: mapped_name,
                });
            }
            continue;
        };

        let (scale, timerep) = get_additional_parameters(reader, schema_fields_index, remote_column_name);

        let value = match raw_value {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        };

        out.push(ColumnValue {
            name: mapped_name,
            remote_column_name: remote_column_name.clone(),
            value,
            data_type: meta.type_id,
            position: meta.attnum,
            typemod: meta.typemod,
            scale,
            timerep,
        });
    }

    out.sort_by_key(|c| c.position);
    Ok(out)
}

/// Reads `schema.fields.{0|1}.fields[].{name,parameters.scale}` for the
/// Debezium field matching `column_name`, yielding the column's NUMERIC
/// scale and temporal representation tag (spec.md §4.3 step 3, §6).
fn get_additional_parameters(
    reader: &EnvelopeReader,
    schema_fields_index: usize,
    column_name: &str,
) -> (i32, Timerep) {
    let path = format!("schema.fields.{schema_fields_index}.fields");
    let Some(fields) = reader.get_subtree(&path).and_then(|v| v.as_array()) else {
        return (-1, Timerep::Undef);
    };

    for field in fields {
        if field.get("field").and_then(|v| v.as_str()) != Some(column_name) {
            continue;
        }
        let timerep = field
            .get("name")
            .and_then(|v| v.as_str())
            .map(Timerep::from_debezium_type)
            .unwrap_or(Timerep::Undef);
        let scale = field
            .get("parameters")
            .and_then(|p| p.get("scale"))
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<i32>().ok())
            .unwrap_or(-1);
        return (scale, timerep);
    }
    (-1, Timerep::Undef)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema_cache::{ColumnMeta, FakeSchemaCache, LiveColumn, TableSchema};
    use std::collections::HashMap;

    fn cache_with_orders() -> FakeSchemaCache {
        let mut columns = HashMap::new();
        columns.insert(
            "id".to_string(),
            ColumnMeta {
                type_id: 23,
                attnum: 1,
                typemod: -1,
            },
        );
        columns.insert(
            "price".to_string(),
            ColumnMeta {
                type_id: 1700,
                attnum: 2,
                typemod: -1,
            },
        );
        let mut cache = FakeSchemaCache::default();
        cache.insert(
            "inventory",
            "orders",
            TableSchema {
                schema_oid: 10,
                table_oid: 20,
                columns,
                live_columns: vec![
                    LiveColumn {
                        name: "id".to_string(),
                        type_name: "integer".to_string(),
                        attnum: 1,
                        not_null: true,
                        default_expr: None,
                    },
                    LiveColumn {
                        name: "price".to_string(),
                        type_name: "numeric".to_string(),
                        attnum: 2,
                        not_null: false,
                        default_expr: None,
                    },
                ],
            },
        );
        cache
    }

    #[test]
    fn non_dml_event_returns_none() {
        let r = EnvelopeReader::parse(r#"{"payload":{"tableChanges":[]}}"#).unwrap();
        let rules = RuleStore::default();
        let mut cache = cache_with_orders();
        assert!(parse_dml(&r, &rules, &mut cache).unwrap().is_none());
    }

    #[test]
    fn insert_sorts_by_position() {
        let json = r#"{
            "payload": {
                "op": "c",
                "source": {"db":"inventory","table":"orders"},
                "after": {"price": "Enw=", "id": 5}
            },
            "schema": {"fields": [null, {"fields": [
                {"field":"id","name":"io.debezium.other.int"},
                {"field":"price","name":"none","parameters":{"scale":"2"}}
            ]}]}
        }"#;
        let r = EnvelopeReader::parse(json).unwrap();
        let rules = RuleStore::default();
        let mut cache = cache_with_orders();
        let dml = parse_dml(&r, &rules, &mut cache).unwrap().unwrap();
        assert_eq!(dml.op, Op::Create);
        assert_eq!(dml.column_values_after.len(), 2);
        assert_eq!(dml.column_values_after[0].name, "id");
        assert_eq!(dml.column_values_after[1].name, "price");
        assert_eq!(dml.column_values_after[1].scale, 2);
    }

    #[test]
    fn unknown_column_is_fatal_for_update() {
        let json = r#"{
            "payload": {
                "op": "u",
                "source": {"db":"inventory","table":"orders"},
                "before": {"ghost": 1},
                "after": {"ghost": 2}
            }
        }"#;
        let r = EnvelopeReader::parse(json).unwrap();
        let rules = RuleStore::default();
        let mut cache = cache_with_orders();
        let err = parse_dml(&r, &rules, &mut cache).unwrap_err();
        assert_eq!(err.severity(), crate::error::Severity::FatalForEvent);
    }

    #[test]
    fn unknown_column_is_skipped_for_insert() {
        let json = r#"{
            "payload": {
                "op": "c",
                "source": {"db":"inventory","table":"orders"},
                "after": {"ghost": 1}
            }
        }"#;
        let r = EnvelopeReader::parse(json).unwrap();
        let rules = RuleStore::default();
        let mut cache = cache_with_orders();
        let dml = parse_dml(&r, &rules, &mut cache).unwrap().unwrap();
        assert!(dml.column_values_after.is_empty());
    }
}
