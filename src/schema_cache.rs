//! Schema cache (C6). Per-table OID/attnum/typemod lookups against the
//! target catalog, cached for the lifetime of the connector worker and
//! invalidated by a successful CREATE/ALTER/DROP (spec.md §8 invariant 4).
//!
//! Resolution requires SPI, so it sits behind the [`SchemaLookup`] seam:
//! pure translation code (`dml.rs`, `ddl_translate.rs`) is generic over the
//! trait and is tested with plain values; [`SpiSchemaCache`] is the only
//! implementation that touches Postgres and is exercised by `#[pg_test]`.

use std::collections::HashMap;

use crate::error::IngestError;

#[derive(Debug, Clone, Copy)]
pub struct ColumnMeta {
    pub type_id: i32,
    pub attnum: i16,
    pub typemod: i32,
}

/// One live column as seen in the target's tuple descriptor, in attnum
/// order, used by the ALTER triage in `ddl_translate.rs`.
#[derive(Debug, Clone)]
pub struct LiveColumn {
    pub name: String,
    pub type_name: String,
    pub attnum: i16,
    pub not_null: bool,
    pub default_expr: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    pub schema_oid: u32,
    pub table_oid: u32,
    pub columns: HashMap<String, ColumnMeta>,
    pub live_columns: Vec<LiveColumn>,
}

/// Dependency-inversion seam: everything above this trait is pure and
/// testable without a live backend.
pub trait SchemaLookup {
    fn resolve_table(
        &mut self,
        mapped_schema: &str,
        mapped_table: &str,
    ) -> Result<&TableSchema, IngestError>;

    fn invalidate(&mut self, mapped_schema: &str, mapped_table: &str);

    fn get_column(
        &mut self,
        mapped_schema: &str,
        mapped_table: &str,
        column: &str,
    ) -> Result<Option<ColumnMeta>, IngestError> {
        let table = self.resolve_table(mapped_schema, mapped_table)?;
        Ok(table.columns.get(column).copied())
    }
}

#[derive(Debug, Default)]
pub struct SpiSchemaCache {
    entries: HashMap<(String, String), TableSchema>,
}

impl SpiSchemaCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SchemaLookup for SpiSchemaCache {
    fn resolve_table(
        &mut self,
        mapped_schema: &str,
        mapped_table: &str,
    ) -> Result<&TableSchema, IngestError> {
        let key = (mapped_schema.to_string(), mapped_table.to_string());
        if !self.entries.contains_key(&key) {
            let schema = load_table_schema(mapped_schema, mapped_table)?;
            self.entries.insert(key.clone(), schema);
        }
        Ok(self.entries.get(&key).expect("just inserted"))
    }

    fn invalidate(&mut self, mapped_schema: &str, mapped_table: &str) {
        self.entries
            .remove(&(mapped_schema.to_string(), mapped_table.to_string()));
    }
}

#[cfg(not(test))]
fn load_table_schema(mapped_schema: &str, mapped_table: &str) -> Result<TableSchema, IngestError> {
    use pgrx::prelude::*;

    Spi::connect(|client| {
        let schema_oid: Option<pgrx::pg_sys::Oid> = client
            .select(
                "select oid from pg_namespace where nspname = $1",
                None,
                Some(vec![(pgrx::PgBuiltInOids::TEXTOID.oid(), mapped_schema.into_datum())]),
            )
            .map_err(|e| spi_error(mapped_schema, mapped_table, e))?
            .first()
            .get_by_name("oid")
            .map_err(|e| spi_error(mapped_schema, mapped_table, e))?;

        let schema_oid = schema_oid.ok_or_else(|| IngestError::SchemaResolution {
            schema: mapped_schema.to_string(),
            table: mapped_table.to_string(),
            reason: "schema not found".to_string(),
        })?;

        let table_oid: Option<pgrx::pg_sys::Oid> = client
            .select(
                "select c.oid from pg_class c where c.relname = $1 and c.relnamespace = $2",
                None,
                Some(vec![
                    (pgrx::PgBuiltInOids::TEXTOID.oid(), mapped_table.into_datum()),
                    (pgrx::PgBuiltInOids::OIDOID.oid(), schema_oid.into_datum()),
                ]),
            )
            .map_err(|e| spi_error(mapped_schema, mapped_table, e))?
            .first()
            .get_by_name("oid")
            .map_err(|e| spi_error(mapped_schema, mapped_table, e))?;

        let table_oid = table_oid.ok_or_else(|| IngestError::SchemaResolution {
            schema: mapped_schema.to_string(),
            table: mapped_table.to_string(),
            reason: "table not found".to_string(),
        })?;

        let rows = client
            .select(
                "select a.attname, a.atttypid, a.attnum, a.atttypmod, a.attnotnull, \
                 pg_get_expr(d.adbin, d.adrelid) as default_expr, \
                 format_type(a.atttypid, a.atttypmod) as type_name \
                 from pg_attribute a \
                 left join pg_attrdef d on d.adrelid = a.attrelid and d.adnum = a.attnum \
                 where a.attrelid = $1 and a.attnum > 0 and not a.attisdropped \
                 order by a.attnum",
                None,
                Some(vec![(pgrx::PgBuiltInOids::OIDOID.oid(), table_oid.into_datum())]),
            )
            .map_err(|e| spi_error(mapped_schema, mapped_table, e))?;

        let mut columns = HashMap::new();
        let mut live_columns = Vec::new();
        for row in rows {
            let name: String = row.get_by_name("attname").ok().flatten().unwrap_or_default();
            let type_id: i32 = row
                .get_by_name::<pgrx::pg_sys::Oid>("atttypid")
                .ok()
                .flatten()
                .map(|o| o.to_u32() as i32)
                .unwrap_or(0);
            let attnum: i16 = row.get_by_name("attnum").ok().flatten().unwrap_or(0);
            let typemod: i32 = row.get_by_name("atttypmod").ok().flatten().unwrap_or(-1);
            let not_null: bool = row.get_by_name("attnotnull").ok().flatten().unwrap_or(false);
            let default_expr: Option<String> = row.get_by_name("default_expr").ok().flatten();
            let type_name: String = row.get_by_name("type_name").ok().flatten().unwrap_or_default();

            columns.insert(
                name.clone(),
                ColumnMeta {
                    type_id,
                    attnum,
                    typemod,
                },
            );
            live_columns.push(LiveColumn {
                name,
                type_name,
                attnum,
                not_null,
                default_expr,
            });
        }

        Ok(TableSchema {
            schema_oid: schema_oid.to_u32(),
            table_oid: table_oid.to_u32(),
            columns,
            live_columns,
        })
    })
}

#[cfg(not(test))]
fn spi_error(schema: &str, table: &str, e: pgrx::spi::Error) -> IngestError {
    IngestError::SchemaResolution {
        schema: schema.to_string(),
        table: table.to_string(),
        reason: e.to_string(),
    }
}

#[cfg(test)]
fn load_table_schema(mapped_schema: &str, mapped_table: &str) -> Result<TableSchema, IngestError> {
    Err(IngestError::SchemaResolution {
        schema: mapped_schema.to_string(),
        table: mapped_table.to_string(),
        reason: "schema cache has no SPI backend outside a running postgres instance".to_string(),
    })
}

/// In-memory stand-in for tests that need a [`SchemaLookup`] without SPI.
#[derive(Debug, Default)]
pub struct FakeSchemaCache {
    pub entries: HashMap<(String, String), TableSchema>,
}

impl FakeSchemaCache {
    pub fn insert(&mut self, schema: &str, table: &str, entry: TableSchema) {
        self.entries.insert((schema.to_string(), table.to_string()), entry);
    }
}

impl SchemaLookup for FakeSchemaCache {
    fn resolve_table(
        &mut self,
        mapped_schema: &str,
        mapped_table: &str,
    ) -> Result<&TableSchema, IngestError> {
        self.entries
            .get(&(mapped_schema.to_string(), mapped_table.to_string()))
            .ok_or_else(|| IngestError::SchemaResolution {
                schema: mapped_schema.to_string(),
                table: mapped_table.to_string(),
                reason: "not in fake cache".to_string(),
            })
    }

    fn invalidate(&mut self, mapped_schema: &str, mapped_table: &str) {
        self.entries
            .remove(&(mapped_schema.to_string(), mapped_table.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> TableSchema {
        let mut columns = HashMap::new();
        columns.insert(
            "id".to_string(),
            ColumnMeta {
                type_id: 23,
                attnum: 1,
                typemod: -1,
            },
        );
        TableSchema {
            schema_oid: 1,
            table_oid: 2,
            columns,
            live_columns: vec![LiveColumn {
                name: "id".to_string(),
                type_name: "integer".to_string(),
                attnum: 1,
                not_null: true,
                default_expr: None,
            }],
        }
    }

    #[test]
    fn invalidation_forces_reload() {
        let mut cache = FakeSchemaCache::default();
        cache.insert("inventory", "orders", sample_schema());
        assert!(cache.resolve_table("inventory", "orders").is_ok());
        cache.invalidate("inventory", "orders");
        assert!(cache.resolve_table("inventory", "orders").is_err());
    }

    #[test]
    fn get_column_hit_and_miss() {
        let mut cache = FakeSchemaCache::default();
        cache.insert("inventory", "orders", sample_schema());
        assert!(cache
            .get_column("inventory", "orders", "id")
            .unwrap()
            .is_some());
        assert!(cache
            .get_column("inventory", "orders", "missing")
            .unwrap()
            .is_none());
    }
}
