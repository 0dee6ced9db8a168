//! DML translator (C8). Produces either a complete SQL statement or a
//! structured row operation from a [`DbzDmlRecord`], per spec.md §4.6.
//!
//! Both modes route every column value through [`convert::convert`] so the
//! two stay consistent; they differ only in whether values are embedded as
//! SQL literals (`add_quote = true`) or carried as plain text for the
//! applier to quote itself (`add_quote = false`).

use crate::applier::{Applier, StructuredColumn, StructuredDmlOp, StructuredOp};
use crate::convert;
use crate::dml::{ColumnValue, DbzDmlRecord, Op};
use crate::error::IngestError;
use crate::rules::RuleStore;

/// Selects which of the two translation paths a connector uses for DML,
/// mirrored from synchdb's `dml_use_spi` GUC (SPEC_FULL.md §B.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmlMode {
    Sql,
    Structured,
}

fn sql_literal(value: &Option<String>) -> String {
    match value {
        Some(v) => v.clone(),
        None => "null".to_string(),
    }
}

/// Renders every column in `columns` through [`convert::convert`], yielding
/// `(column_name, sql_literal_or_null)` pairs in position order (spec.md
/// §4.6 scenarios S2/S3 use bare, unquoted column names).
fn render_columns(
    columns: &[ColumnValue],
    remote_object_id: &str,
    rules: &RuleStore,
    applier: &mut dyn Applier,
) -> Result<Vec<(String, String)>, IngestError> {
    let mut out = Vec::with_capacity(columns.len());
    for col in columns {
        let rendered = convert::convert(col, true, remote_object_id, rules, applier)?;
        out.push((col.name.clone(), sql_literal(&rendered)));
    }
    Ok(out)
}

/// WHERE clause built from every before-image column (spec.md §4.6): the
/// connector has no standalone notion of a primary key, so it matches on
/// the full row Debezium supplied, the same way the C original's
/// `convert2PGDML` composes its `WHERE` for UPDATE/DELETE.
fn where_clause(before: &[(String, String)]) -> String {
    before
        .iter()
        .map(|(name, value)| {
            if value == "null" {
                format!("{name} IS NULL")
            } else {
                format!("{name} = {value}")
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Translates a [`DbzDmlRecord`] into one complete SQL statement (SQL mode).
pub fn translate_sql(
    record: &DbzDmlRecord,
    remote_object_id: &str,
    rules: &RuleStore,
    applier: &mut dyn Applier,
) -> Result<String, IngestError> {
    let qualified_table = format!("{}.{}", record.schema, record.table);

    match record.op {
        Op::Create | Op::Read => {
            let after = render_columns(&record.column_values_after, remote_object_id, rules, applier)?;
            let columns = after.iter().map(|(n, _)| n.clone()).collect::<Vec<_>>().join(", ");
            let values = after.iter().map(|(_, v)| v.clone()).collect::<Vec<_>>().join(", ");
            Ok(format!("INSERT INTO {qualified_table}({columns}) VALUES ({values});"))
        }
        Op::Update => {
            let before = render_columns(&record.column_values_before, remote_object_id, rules, applier)?;
            let after = render_columns(&record.column_values_after, remote_object_id, rules, applier)?;
            let set_clause = after
                .iter()
                .map(|(n, v)| format!("{n} = {v}"))
                .collect::<Vec<_>>()
                .join(", ");
            Ok(format!(
                "UPDATE {qualified_table} SET {set_clause} WHERE {};",
                where_clause(&before)
            ))
        }
        Op::Delete => {
            let before = render_columns(&record.column_values_before, remote_object_id, rules, applier)?;
            Ok(format!(
                "DELETE FROM {qualified_table} WHERE {};",
                where_clause(&before)
            ))
        }
    }
}

fn translate_structured_columns(
    columns: &[ColumnValue],
    remote_object_id: &str,
    rules: &RuleStore,
    applier: &mut dyn Applier,
) -> Result<Vec<StructuredColumn>, IngestError> {
    let mut out = Vec::with_capacity(columns.len());
    for col in columns {
        let value = convert::convert(col, false, remote_object_id, rules, applier)?;
        out.push(StructuredColumn {
            name: col.name.clone(),
            value,
            data_type: col.data_type,
            position: col.position,
        });
    }
    Ok(out)
}

/// Translates a [`DbzDmlRecord`] into a [`StructuredDmlOp`] (direct-apply mode).
pub fn translate_structured(
    record: &DbzDmlRecord,
    remote_object_id: &str,
    rules: &RuleStore,
    applier: &mut dyn Applier,
) -> Result<StructuredDmlOp, IngestError> {
    let op = match record.op {
        Op::Create | Op::Read => StructuredOp::Insert,
        Op::Update => StructuredOp::Update,
        Op::Delete => StructuredOp::Delete,
    };
    let before = translate_structured_columns(&record.column_values_before, remote_object_id, rules, applier)?;
    let after = translate_structured_columns(&record.column_values_after, remote_object_id, rules, applier)?;
    Ok(StructuredDmlOp {
        op,
        table_oid: record.table_oid,
        before,
        after,
    })
}

/// Renders a [`StructuredDmlOp`] into one SQL statement against `qualified_table`,
/// quoting every value itself since direct-apply columns carry unquoted text
/// (spec.md §4.6). Used by [`crate::applier::SpiApplier`], which resolves
/// `qualified_table` from `op.table_oid` via the target catalog.
pub fn render_structured_sql(op: &StructuredDmlOp, qualified_table: &str) -> String {
    let literal = |c: &StructuredColumn| match &c.value {
        Some(v) => format!("'{}'", v.replace('\'', "''")),
        None => "null".to_string(),
    };

    match op.op {
        StructuredOp::Insert => {
            let columns = op.after.iter().map(|c| c.name.clone()).collect::<Vec<_>>().join(", ");
            let values = op.after.iter().map(literal).collect::<Vec<_>>().join(", ");
            format!("INSERT INTO {qualified_table}({columns}) VALUES ({values});")
        }
        StructuredOp::Update => {
            let set_clause = op
                .after
                .iter()
                .map(|c| format!("{} = {}", c.name, literal(c)))
                .collect::<Vec<_>>()
                .join(", ");
            let where_clause = op
                .before
                .iter()
                .map(|c| match &c.value {
                    Some(_) => format!("{} = {}", c.name, literal(c)),
                    None => format!("{} IS NULL", c.name),
                })
                .collect::<Vec<_>>()
                .join(" AND ");
            format!("UPDATE {qualified_table} SET {set_clause} WHERE {where_clause};")
        }
        StructuredOp::Delete => {
            let where_clause = op
                .before
                .iter()
                .map(|c| match &c.value {
                    Some(_) => format!("{} = {}", c.name, literal(c)),
                    None => format!("{} IS NULL", c.name),
                })
                .collect::<Vec<_>>()
                .join(" AND ");
            format!("DELETE FROM {qualified_table} WHERE {where_clause};")
        }
    }
}

/// Translates and applies one [`DbzDmlRecord`] according to `mode` (spec.md §4.6).
pub fn apply(
    record: &DbzDmlRecord,
    mode: DmlMode,
    remote_object_id: &str,
    rules: &RuleStore,
    applier: &mut dyn Applier,
) -> Result<(), IngestError> {
    match mode {
        DmlMode::Sql => {
            let sql = translate_sql(record, remote_object_id, rules, applier)?;
            applier
                .execute_dml_sql(&sql)
                .map_err(|e| IngestError::ExecutionFailure(e.to_string()))
        }
        DmlMode::Structured => {
            let op = translate_structured(record, remote_object_id, rules, applier)?;
            applier
                .execute_dml_structured(&op)
                .map_err(|e| IngestError::ExecutionFailure(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applier::FakeApplier;
    use crate::convert::type_oid;
    use crate::dml::Timerep;

    fn colval(name: &str, value: Option<&str>, data_type: i32, position: i16) -> ColumnValue {
        ColumnValue {
            name: name.to_string(),
            remote_column_name: name.to_string(),
            value: value.map(|s| s.to_string()),
            data_type,
            position,
            typemod: -1,
            scale: 0,
            timerep: Timerep::Undef,
        }
    }

    fn insert_record() -> DbzDmlRecord {
        DbzDmlRecord {
            op: Op::Create,
            remote_object_id: "inventory.orders".to_string(),
            mapped_object_id: "inventory.orders".to_string(),
            schema: "inventory".to_string(),
            table: "orders".to_string(),
            table_oid: 42,
            column_values_before: vec![],
            column_values_after: vec![
                colval("id", Some("5"), type_oid::INT4, 1),
                colval("note", Some("it's fine"), type_oid::TEXT, 2),
            ],
        }
    }

    #[test]
    fn insert_renders_quoted_values() {
        let record = insert_record();
        let rules = RuleStore::default();
        let mut applier = FakeApplier::default();
        let sql = translate_sql(&record, "inventory.orders", &rules, &mut applier).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO inventory.orders(id, note) VALUES (5, 'it''s fine');"
        );
    }

    /// spec.md §8 scenario S2.
    #[test]
    fn s2_insert_with_numeric_matches_scenario() {
        let record = DbzDmlRecord {
            op: Op::Create,
            remote_object_id: "inventory.orders".to_string(),
            mapped_object_id: "inventory.orders".to_string(),
            schema: "inventory".to_string(),
            table: "orders".to_string(),
            table_oid: 42,
            column_values_before: vec![],
            column_values_after: vec![ColumnValue {
                name: "price".to_string(),
                remote_column_name: "price".to_string(),
                value: Some("Exw=".to_string()),
                data_type: type_oid::NUMERIC,
                position: 1,
                typemod: -1,
                scale: 2,
                timerep: Timerep::Undef,
            }],
        };
        let rules = RuleStore::default();
        let mut applier = FakeApplier::default();
        let sql = translate_sql(&record, "inventory.orders", &rules, &mut applier).unwrap();
        assert_eq!(sql, "INSERT INTO inventory.orders(price) VALUES (48.92);");
    }

    #[test]
    fn update_matches_on_before_image_and_nulls() {
        let record = DbzDmlRecord {
            op: Op::Update,
            remote_object_id: "inventory.orders".to_string(),
            mapped_object_id: "inventory.orders".to_string(),
            schema: "inventory".to_string(),
            table: "orders".to_string(),
            table_oid: 42,
            column_values_before: vec![
                colval("id", Some("5"), type_oid::INT4, 1),
                colval("note", None, type_oid::TEXT, 2),
            ],
            column_values_after: vec![
                colval("id", Some("5"), type_oid::INT4, 1),
                colval("note", Some("updated"), type_oid::TEXT, 2),
            ],
        };
        let rules = RuleStore::default();
        let mut applier = FakeApplier::default();
        let sql = translate_sql(&record, "inventory.orders", &rules, &mut applier).unwrap();
        assert_eq!(
            sql,
            "UPDATE inventory.orders SET id = 5, note = 'updated' WHERE id = 5 AND note IS NULL;"
        );
    }

    /// spec.md §8 scenario S3.
    #[test]
    fn s3_delete_by_primary_key_matches_scenario() {
        let record = DbzDmlRecord {
            op: Op::Delete,
            remote_object_id: "inventory.orders".to_string(),
            mapped_object_id: "inventory.orders".to_string(),
            schema: "inventory".to_string(),
            table: "orders".to_string(),
            table_oid: 42,
            column_values_before: vec![colval("id", Some("42"), type_oid::INT4, 1)],
            column_values_after: vec![],
        };
        let rules = RuleStore::default();
        let mut applier = FakeApplier::default();
        let sql = translate_sql(&record, "inventory.orders", &rules, &mut applier).unwrap();
        assert_eq!(sql, "DELETE FROM inventory.orders WHERE id = 42;");
    }

    #[test]
    fn delete_matches_on_before_image() {
        let record = DbzDmlRecord {
            op: Op::Delete,
            remote_object_id: "inventory.orders".to_string(),
            mapped_object_id: "inventory.orders".to_string(),
            schema: "inventory".to_string(),
            table: "orders".to_string(),
            table_oid: 42,
            column_values_before: vec![colval("id", Some("5"), type_oid::INT4, 1)],
            column_values_after: vec![],
        };
        let rules = RuleStore::default();
        let mut applier = FakeApplier::default();
        let sql = translate_sql(&record, "inventory.orders", &rules, &mut applier).unwrap();
        assert_eq!(sql, "DELETE FROM inventory.orders WHERE id = 5;");
    }

    #[test]
    fn structured_mode_carries_unquoted_values() {
        let record = insert_record();
        let rules = RuleStore::default();
        let mut applier = FakeApplier::default();
        let op = translate_structured(&record, "inventory.orders", &rules, &mut applier).unwrap();
        assert_eq!(op.op, StructuredOp::Insert);
        assert_eq!(op.table_oid, 42);
        assert_eq!(op.after[1].value.as_deref(), Some("it's fine"));
    }

    #[test]
    fn render_structured_sql_quotes_on_the_way_out() {
        let record = insert_record();
        let rules = RuleStore::default();
        let mut applier = FakeApplier::default();
        let op = translate_structured(&record, "inventory.orders", &rules, &mut applier).unwrap();
        let sql = render_structured_sql(&op, "inventory.orders");
        assert_eq!(
            sql,
            "INSERT INTO inventory.orders(id, note) VALUES (5, 'it''s fine');"
        );
    }

    #[test]
    fn apply_sql_mode_routes_through_execute_dml_sql() {
        let record = insert_record();
        let rules = RuleStore::default();
        let mut applier = FakeApplier::default();
        apply(&record, DmlMode::Sql, "inventory.orders", &rules, &mut applier).unwrap();
        assert_eq!(applier.dml_statements.len(), 1);
    }

    #[test]
    fn apply_structured_mode_routes_through_execute_dml_structured() {
        let record = insert_record();
        let rules = RuleStore::default();
        let mut applier = FakeApplier::default();
        apply(&record, DmlMode::Structured, "inventory.orders", &rules, &mut applier).unwrap();
        assert_eq!(applier.structured_ops.len(), 1);
    }
}
