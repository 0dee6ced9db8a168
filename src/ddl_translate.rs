//! DDL translator (C7). Produces a target-dialect DDL statement (possibly
//! multi-statement) from a [`DbzDdlRecord`] and the rule store (spec.md §4.4).

use crate::ddl::{ColumnDecl, DbzDdlRecord, DdlKind};
use crate::dialect::{ConnectorType, TypeRegistry};
use crate::error::IngestError;
use crate::rules::RuleStore;
use crate::schema_cache::{LiveColumn, SchemaLookup};

/// PostgreSQL's historical maximum attribute length (`pg_sys::MaxAttrSize`
/// is not exposed on all pgrx versions); spec.md §4.4 step 4 calls for the
/// clamp without naming the constant, so it is pinned here per SPEC_FULL.md §C.4.
pub const MAX_ATTR_SIZE: i32 = 10_485_760;

/// A fully-resolved mapped object id, split into target schema/table.
struct MappedObject {
    schema: String,
    table: String,
}

/// Splits `source.database[.schema].table` into (schema, table) using the
/// default mapping (database → schema, source schema discarded), with
/// identifiers folded to lowercase for catalog lookup (spec.md §3).
fn default_mapped_object(id: &str) -> Result<MappedObject, IngestError> {
    let parts: Vec<&str> = id.split('.').collect();
    let (schema, table) = match parts.as_slice() {
        [table] => ("public".to_string(), table.to_string()),
        [db, table] => (db.to_string(), table.to_string()),
        [db, _schema, table] => (db.to_string(), table.to_string()),
        _ => return Err(IngestError::InvalidObjectId(id.to_string())),
    };
    Ok(MappedObject {
        schema: schema.to_lowercase(),
        table: table.to_lowercase(),
    })
}

fn mapped_object(id: &str, rules: &RuleStore) -> Result<MappedObject, IngestError> {
    match rules.lookup_object_name(id, "table") {
        Some(mapped) => match mapped.rsplit_once('.') {
            Some((schema, table)) => Ok(MappedObject {
                schema: schema.to_lowercase(),
                table: table.to_lowercase(),
            }),
            None => Ok(MappedObject {
                schema: "public".to_string(),
                table: mapped.to_lowercase(),
            }),
        },
        None => default_mapped_object(id),
    }
}

/// Renames and retypes one column per spec.md §4.4 "column-translation
/// rules" (steps 1-4), returning the DDL clause fragment for it (without
/// trailing comma) and the possibly-clamped length that callers other than
/// CREATE/ADD (e.g. the same-size ALTER path) also need.
fn translate_column(
    ddl_id: &str,
    col: &ColumnDecl,
    dialect: ConnectorType,
    registry: &TypeRegistry,
    rules: &RuleStore,
    type_only: bool,
) -> (String, i32, i32, String) {
    let qualified_column = format!("{ddl_id}.{}", col.name);
    let mapped_name = rules
        .lookup_object_name(&qualified_column, "column")
        .map(|s| s.to_string())
        .unwrap_or_else(|| col.name.clone());

    let lookup_type_name = if col.type_name.eq_ignore_ascii_case("BIT") && col.length == 1 {
        "BIT(1)".to_string()
    } else {
        col.type_name.clone()
    };

    let rule_hit = rules.lookup_type(&qualified_column, &lookup_type_name, col.auto_incremented);
    let registry_hit = registry.lookup(&lookup_type_name, col.auto_incremented);

    let (target_type_name, target_length) = match rule_hit.or(registry_hit) {
        Some(t) => (t.name.clone(), if t.length != -1 { t.length } else { col.length }),
        None => (col.type_name.clone(), col.length),
    };

    let clamped_length = if target_length > 0 && col.scale == 0 {
        target_length.min(MAX_ATTR_SIZE)
    } else {
        target_length
    };

    let fragment = if type_only {
        format!(" {target_type_name} ")
    } else {
        format!(" {mapped_name} {target_type_name} ")
    };

    (fragment, clamped_length, col.scale, target_type_name)
}

/// Only these target types take a length/scale clause; a mapping like
/// BIT(1)->BOOL must not drag the source column's length along with it.
fn accepts_length_clause(target_type_name: &str) -> bool {
    matches!(
        target_type_name.to_uppercase().as_str(),
        "VARCHAR" | "CHAR" | "BPCHAR" | "NUMERIC" | "DECIMAL" | "BIT" | "VARBIT"
    )
}

fn length_scale_suffix(target_type_name: &str, length: i32, scale: i32) -> String {
    if !accepts_length_clause(target_type_name) {
        return String::new();
    }
    if length > 0 && scale > 0 {
        format!("({length}, {scale}) ")
    } else if length > 0 {
        format!("({length}) ")
    } else {
        String::new()
    }
}

fn sqlserver_temporal_scale_suffix(dialect: ConnectorType, target_type_name: &str, scale: i32) -> String {
    if dialect != ConnectorType::SqlServer || scale <= 0 {
        return String::new();
    }
    let is_temporal = target_type_name.eq_ignore_ascii_case("TIMESTAMP")
        || target_type_name.eq_ignore_ascii_case("TIMESTAMPTZ")
        || target_type_name.eq_ignore_ascii_case("TIME");
    if !is_temporal {
        return String::new();
    }
    format!("({}) ", scale.min(6))
}

fn column_tail(col: &ColumnDecl, mapped_name: &str) -> String {
    let mut out = String::new();
    if col.type_name.to_uppercase().contains("UNSIGNED") {
        out.push_str(&format!("CHECK ({mapped_name} >= 0) "));
    }
    if !col.optional {
        out.push_str("NOT NULL ");
    }
    if let Some(default) = &col.default_value_expression {
        if !default.is_empty() && !col.auto_incremented {
            out.push_str(&format!("DEFAULT {default} "));
        }
    }
    out
}

fn mapped_column_name(ddl_id: &str, col_name: &str, rules: &RuleStore) -> String {
    let qualified = format!("{ddl_id}.{col_name}");
    rules
        .lookup_object_name(&qualified, "column")
        .map(|s| s.to_string())
        .unwrap_or_else(|| col_name.to_string())
}

/// Translates a CREATE DDL record into `CREATE SCHEMA IF NOT EXISTS ...;
/// CREATE TABLE IF NOT EXISTS schema.table (...)`. (spec.md §4.4, scenario S1).
fn translate_create(ddl: &DbzDdlRecord, dialect: ConnectorType, registry: &TypeRegistry, rules: &RuleStore) -> Result<String, IngestError> {
    let target = mapped_object(&ddl.id, rules)?;
    let mut out = format!(
        "CREATE SCHEMA IF NOT EXISTS {}; CREATE TABLE IF NOT EXISTS {}.{} (",
        target.schema, target.schema, target.table
    );

    for col in &ddl.columns {
        let (fragment, length, scale, type_name) = translate_column(&ddl.id, col, dialect, registry, rules, false);
        out.push_str(&fragment);
        out.push_str(&length_scale_suffix(&type_name, length, scale));
        out.push_str(&sqlserver_temporal_scale_suffix(dialect, &type_name, col.scale));
        let mapped_name = mapped_column_name(&ddl.id, &col.name, rules);
        out.push_str(&column_tail(col, &mapped_name));
        out.push(',');
    }

    if !ddl.primary_key_column_names.is_empty() {
        let cols: Vec<String> = ddl
            .primary_key_column_names
            .iter()
            .map(|c| mapped_column_name(&ddl.id, c, rules))
            .collect();
        out.push_str(&format!(" PRIMARY KEY({})", cols.join(", ")));
    } else if out.ends_with(',') {
        out.pop();
    }

    out.push_str(");");
    Ok(out)
}

fn translate_drop(ddl: &DbzDdlRecord, rules: &RuleStore, schema_cache: &mut dyn SchemaLookup) -> Result<String, IngestError> {
    let target = mapped_object(&ddl.id, rules)?;
    schema_cache.invalidate(&target.schema, &target.table);
    Ok(format!("DROP TABLE IF EXISTS {}.{};", target.schema, target.table))
}

/// ALTER triage (spec.md §4.4, §8 invariant 8): compares live column count
/// against the incoming column count and emits exactly one of ADD, DROP, or
/// per-column ALTER COLUMN clauses — never a mix.
fn translate_alter(
    ddl: &DbzDdlRecord,
    dialect: ConnectorType,
    registry: &TypeRegistry,
    rules: &RuleStore,
    schema_cache: &mut dyn SchemaLookup,
) -> Result<Option<String>, IngestError> {
    let target = mapped_object(&ddl.id, rules)?;
    let table_schema = schema_cache.resolve_table(&target.schema, &target.table)?;
    let live_columns = table_schema.live_columns.clone();

    let header = format!("ALTER TABLE {}.{} ", target.schema, target.table);
    let result = match ddl.columns.len().cmp(&live_columns.len()) {
        std::cmp::Ordering::Greater => translate_alter_add(ddl, dialect, registry, rules, &live_columns, &header),
        std::cmp::Ordering::Less => translate_alter_drop(ddl, rules, &live_columns, &header),
        std::cmp::Ordering::Equal => translate_alter_same_size(ddl, dialect, registry, rules, &live_columns, &header),
    };

    if result.is_some() {
        schema_cache.invalidate(&target.schema, &target.table);
    }
    Ok(result)
}

fn translate_alter_add(
    ddl: &DbzDdlRecord,
    dialect: ConnectorType,
    registry: &TypeRegistry,
    rules: &RuleStore,
    live_columns: &[LiveColumn],
    header: &str,
) -> Option<String> {
    let mut out = header.to_string();
    let mut added = false;

    for col in &ddl.columns {
        let mapped_name = mapped_column_name(&ddl.id, &col.name, rules);
        if live_columns.iter().any(|c| c.name.eq_ignore_ascii_case(&mapped_name)) {
            continue;
        }
        added = true;
        out.push_str("ADD COLUMN");
        let (fragment, length, scale, type_name) = translate_column(&ddl.id, col, dialect, registry, rules, false);
        out.push_str(&fragment);
        out.push_str(&length_scale_suffix(&type_name, length, scale));
        out.push_str(&sqlserver_temporal_scale_suffix(dialect, &type_name, col.scale));
        out.push_str(&column_tail(col, &mapped_name));
        out.push(',');
    }

    if !added {
        return None;
    }
    if out.ends_with(',') {
        out.pop();
    }
    Some(out)
}

fn translate_alter_drop(ddl: &DbzDdlRecord, rules: &RuleStore, live_columns: &[LiveColumn], header: &str) -> Option<String> {
    let mut out = header.to_string();
    let mut dropped = false;

    let mapped_incoming: Vec<String> = ddl
        .columns
        .iter()
        .map(|c| mapped_column_name(&ddl.id, &c.name, rules))
        .collect();

    for live in live_columns {
        if mapped_incoming.iter().any(|c| c.eq_ignore_ascii_case(&live.name)) {
            continue;
        }
        dropped = true;
        out.push_str(&format!("DROP COLUMN {},", live.name));
    }

    if !dropped {
        return None;
    }
    if out.ends_with(',') {
        out.pop();
    }
    Some(out)
}

fn translate_alter_same_size(
    ddl: &DbzDdlRecord,
    dialect: ConnectorType,
    registry: &TypeRegistry,
    rules: &RuleStore,
    live_columns: &[LiveColumn],
    header: &str,
) -> Option<String> {
    let mut out = header.to_string();
    let mut any = false;

    for col in &ddl.columns {
        let mapped_name = mapped_column_name(&ddl.id, &col.name, rules);
        let Some(_live) = live_columns.iter().find(|c| c.name.eq_ignore_ascii_case(&mapped_name)) else {
            // Rename detection is out of scope (spec.md §9 Open Questions):
            // a column the comparison can't match is reported and skipped.
            continue;
        };
        any = true;

        out.push_str(&format!("ALTER COLUMN {mapped_name} SET DATA TYPE"));
        let (_fragment, length, scale, type_name) = translate_column(&ddl.id, col, dialect, registry, rules, true);
        out.push_str(&format!(" {type_name} "));
        out.push_str(&length_scale_suffix(&type_name, length, scale));
        out.push_str(&sqlserver_temporal_scale_suffix(dialect, &type_name, col.scale));
        out.push_str(", ");

        match &col.default_value_expression {
            Some(default) if !default.is_empty() => {
                out.push_str(&format!("ALTER COLUMN {mapped_name} SET DEFAULT {default}"));
            }
            _ => out.push_str(&format!("ALTER COLUMN {mapped_name} DROP DEFAULT")),
        }
        out.push_str(", ");

        if !col.optional {
            out.push_str(&format!("ALTER COLUMN {mapped_name} SET NOT NULL"));
        } else {
            out.push_str(&format!("ALTER COLUMN {mapped_name} DROP NOT NULL"));
        }
        out.push(',');
    }

    if !any {
        return None;
    }
    if out.ends_with(',') {
        out.pop();
    }
    Some(out)
}

/// Translates a [`DbzDdlRecord`] into a target-dialect DDL statement. Returns
/// `Ok(None)` for an ALTER that matches no live column (nothing to do).
pub fn translate_ddl(
    ddl: &DbzDdlRecord,
    dialect: ConnectorType,
    registry: &TypeRegistry,
    rules: &RuleStore,
    schema_cache: &mut dyn SchemaLookup,
) -> Result<Option<String>, IngestError> {
    match ddl.kind {
        DdlKind::Create => translate_create(ddl, dialect, registry, rules).map(Some),
        DdlKind::Drop => translate_drop(ddl, rules, schema_cache).map(Some),
        DdlKind::Alter => translate_alter(ddl, dialect, registry, rules, schema_cache),
    }
}
