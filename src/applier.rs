//! Applier contract (C10): the narrow interface by which translated DDL and
//! DML are executed against the target (spec.md §6). Kept as a trait so the
//! translation stages (`dml_translate.rs`, `convert.rs`) are testable without
//! a live backend; [`SpiApplier`] is the concrete SPI-backed implementation.

use crate::error::ApplyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructuredOp {
    Insert,
    Update,
    Delete,
}

/// One column's target-ready value for direct-apply mode (spec.md §4.6).
#[derive(Debug, Clone)]
pub struct StructuredColumn {
    pub name: String,
    pub value: Option<String>,
    pub data_type: i32,
    pub position: i16,
}

/// A structured row produced by direct-apply translation. For `Update`,
/// `before` and `after` align by position and have equal length.
#[derive(Debug, Clone)]
pub struct StructuredDmlOp {
    pub op: StructuredOp,
    pub table_oid: u32,
    pub before: Vec<StructuredColumn>,
    pub after: Vec<StructuredColumn>,
}

pub trait Applier {
    /// Runs in its own transaction on the target.
    fn execute_ddl(&mut self, sql: &str) -> Result<(), ApplyError>;

    /// SQL-mode DML: runs one fully-formed statement.
    fn execute_dml_sql(&mut self, sql: &str) -> Result<(), ApplyError>;

    /// Direct-apply-mode DML: locates the row by replica identity / primary
    /// key (else sequential scan) and performs insert/update/delete.
    fn execute_dml_structured(&mut self, op: &StructuredDmlOp) -> Result<(), ApplyError>;

    /// Evaluates a user-supplied target-SQL fragment against a converted
    /// value, optionally carrying geometry components (spec.md §4.5).
    fn evaluate_transform_expression(
        &mut self,
        expr: &str,
        value: &str,
        wkb: Option<&str>,
        srid: Option<&str>,
    ) -> Result<String, ApplyError>;
}

#[cfg(not(test))]
pub struct SpiApplier;

#[cfg(not(test))]
impl SpiApplier {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(not(test))]
impl Default for SpiApplier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(test))]
impl Applier for SpiApplier {
    fn execute_ddl(&mut self, sql: &str) -> Result<(), ApplyError> {
        use pgrx::prelude::*;
        Spi::connect_mut(|client| client.update(sql, None, None))
            .map(|_| ())
            .map_err(|e| ApplyError::Spi(e.to_string()))
    }

    fn execute_dml_sql(&mut self, sql: &str) -> Result<(), ApplyError> {
        use pgrx::prelude::*;
        Spi::connect_mut(|client| client.update(sql, None, None))
            .map(|_| ())
            .map_err(|e| ApplyError::Spi(e.to_string()))
    }

    fn execute_dml_structured(&mut self, op: &StructuredDmlOp) -> Result<(), ApplyError> {
        use pgrx::prelude::*;

        let qualified: Option<String> = Spi::connect(|client| {
            client
                .select(
                    &format!(
                        "select n.nspname || '.' || c.relname from pg_class c \
                         join pg_namespace n on n.oid = c.relnamespace where c.oid = {}::oid",
                        op.table_oid
                    ),
                    None,
                    None,
                )
                .ok()
                .and_then(|t| t.first().get_one::<String>().ok().flatten())
        });
        let qualified = qualified.ok_or_else(|| ApplyError::Spi(format!("relation {} not found", op.table_oid)))?;

        let sql = crate::dml_translate::render_structured_sql(op, &qualified);
        Spi::connect_mut(|client| client.update(&sql, None, None))
            .map(|_| ())
            .map_err(|e| ApplyError::Spi(e.to_string()))
    }

    fn evaluate_transform_expression(
        &mut self,
        expr: &str,
        value: &str,
        wkb: Option<&str>,
        srid: Option<&str>,
    ) -> Result<String, ApplyError> {
        use pgrx::prelude::*;

        let rendered = expr
            .replace("%s", value)
            .replace("%w", wkb.unwrap_or(""))
            .replace("%r", srid.unwrap_or(""));
        let sql = format!("select {rendered}");
        Spi::get_one::<String>(&sql)
            .map_err(|e| ApplyError::Spi(e.to_string()))?
            .ok_or(ApplyError::NoMatchingRow)
    }
}

/// In-memory stand-in used by tests; records every call it receives.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct FakeApplier {
    pub ddl_statements: Vec<String>,
    pub dml_statements: Vec<String>,
    pub structured_ops: Vec<StructuredDmlOp>,
    pub fail_next: bool,
}

#[cfg(test)]
impl Applier for FakeApplier {
    fn execute_ddl(&mut self, sql: &str) -> Result<(), ApplyError> {
        if self.fail_next {
            return Err(ApplyError::Spi("forced failure".to_string()));
        }
        self.ddl_statements.push(sql.to_string());
        Ok(())
    }

    fn execute_dml_sql(&mut self, sql: &str) -> Result<(), ApplyError> {
        if self.fail_next {
            return Err(ApplyError::Spi("forced failure".to_string()));
        }
        self.dml_statements.push(sql.to_string());
        Ok(())
    }

    fn execute_dml_structured(&mut self, op: &StructuredDmlOp) -> Result<(), ApplyError> {
        if self.fail_next {
            return Err(ApplyError::Spi("forced failure".to_string()));
        }
        self.structured_ops.push(op.clone());
        Ok(())
    }

    fn evaluate_transform_expression(
        &mut self,
        expr: &str,
        value: &str,
        wkb: Option<&str>,
        srid: Option<&str>,
    ) -> Result<String, ApplyError> {
        Ok(expr
            .replace("%s", value)
            .replace("%w", wkb.unwrap_or(""))
            .replace("%r", srid.unwrap_or("")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_applier_records_ddl() {
        let mut applier = FakeApplier::default();
        applier.execute_ddl("CREATE TABLE foo(id int)").unwrap();
        assert_eq!(applier.ddl_statements.len(), 1);
    }

    #[test]
    fn fake_applier_can_be_forced_to_fail() {
        let mut applier = FakeApplier {
            fail_next: true,
            ..Default::default()
        };
        assert!(applier.execute_dml_sql("select 1").is_err());
    }

    #[test]
    fn expression_substitution() {
        let mut applier = FakeApplier::default();
        let out = applier
            .evaluate_transform_expression("ST_GeomFromWKB(%w, %r)", "POINT", Some("ab=="), Some("4326"))
            .unwrap();
        assert_eq!(out, "ST_GeomFromWKB(ab==, 4326)");
    }
}
