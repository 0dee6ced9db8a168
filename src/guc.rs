//! Runtime configuration (SPEC_FULL.md §B.3). Modeled on
//! `original_source/synchdb.c`'s `_PG_init` registration of
//! `synchdb.naptime` / `synchdb.dml_use_spi` via `DefineCustomIntVariable`/
//! `DefineCustomBoolVariable`, expressed with `pgrx::GucSetting` statics and
//! registered through `GucRegistry` the pgrx way.

use pgrx::{GucContext, GucFlags, GucRegistry, GucSetting};

use crate::dml_translate::DmlMode;

/// Milliseconts the worker sleeps between polls when the upstream engine
/// returns no events, mirroring `synchdb.naptime`.
pub static CDCSYNC_NAPTIME: GucSetting<i32> = GucSetting::<i32>::new(500);

/// Selects C8's output mode: `sql` renders one literal SQL statement per
/// event, `direct` produces a structured row for the applier to bind
/// itself. Mirrors `synchdb.dml_use_spi`.
pub static CDCSYNC_DML_MODE: GucSetting<Option<&'static str>> = GucSetting::<Option<&'static str>>::new(Some("sql"));

/// Default snapshot mode passed to a connector at start time if it does not
/// specify one of its own.
pub static CDCSYNC_DEFAULT_SNAPSHOT_MODE: GucSetting<Option<&'static str>> =
    GucSetting::<Option<&'static str>>::new(Some("initial"));

/// Registers every GUC this extension defines. Call once from `_PG_init`.
pub fn init() {
    GucRegistry::define_int_guc(
        "cdcsync.naptime",
        "Milliseconds a connector worker sleeps between polls when idle.",
        "Lower values reduce replication lag at the cost of more frequent upstream polling.",
        &CDCSYNC_NAPTIME,
        1,
        60_000,
        GucContext::Sighup,
        GucFlags::default(),
    );

    GucRegistry::define_string_guc(
        "cdcsync.dml_mode",
        "Selects the DML translation output: 'sql' or 'direct'.",
        "'sql' renders one literal SQL statement per event; 'direct' produces a structured row for direct apply.",
        &CDCSYNC_DML_MODE,
        GucContext::Sighup,
        GucFlags::default(),
    );

    GucRegistry::define_string_guc(
        "cdcsync.default_snapshot_mode",
        "Default snapshot mode for connectors that do not specify one.",
        "Passed to the upstream engine at connector start time.",
        &CDCSYNC_DEFAULT_SNAPSHOT_MODE,
        GucContext::Sighup,
        GucFlags::default(),
    );
}

/// Parses the current `cdcsync.dml_mode` GUC value into a [`DmlMode`],
/// falling back to SQL mode on an unrecognized value.
pub fn dml_mode() -> DmlMode {
    match CDCSYNC_DML_MODE.get().as_deref() {
        Some("direct") => DmlMode::Structured,
        _ => DmlMode::Sql,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_dml_mode_is_sql() {
        assert_eq!(dml_mode(), DmlMode::Sql);
    }
}
