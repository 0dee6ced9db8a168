//! `cdcsync` — a change-data-capture event translation pipeline packaged as a
//! PostgreSQL extension (spec.md §1). `_PG_init` wires up GUCs, the shared
//! connector-state array, and the background-worker template; the
//! `#[pg_extern]` functions below are the minimal start/stop/pause/resume/
//! set-offset admin surface spec.md §1 names as an external collaborator —
//! thin shims onto `connector.rs`'s FSM (SPEC_FULL.md §D).

use pgrx::bgworkers::{BackgroundWorkerBuilder, BgWorkerStartTime};
use pgrx::prelude::*;

pg_module_magic!();

mod applier;
mod connector;
mod convert;
mod ddl;
mod ddl_translate;
mod dialect;
mod dml;
mod dml_translate;
mod envelope;
mod error;
mod guc;
mod rules;
mod schema_cache;
mod upstream;
mod worker;

use connector::CONNECTOR_STATE;
use dialect::ConnectorType;

/// Registers GUCs, shared memory, and the per-connector background worker
/// template. Mirrors `original_source/synchdb.c`'s `_PG_init`.
#[pg_guard]
pub extern "C" fn _PG_init() {
    guc::init();
    connector::init_shared_memory();

    BackgroundWorkerBuilder::new("cdcsync connector worker")
        .set_function("cdcsync_worker_main")
        .set_library("cdcsync")
        .set_start_time(BgWorkerStartTime::RecoveryFinished)
        .enable_spi_access()
        .load();
}

/// Registers a new logical connector and claims a shared-memory slot for it
/// (spec.md §1 "a long-lived background worker per logical source
/// connector"), entering `SYNCING` directly — actually starting the
/// upstream engine subprocess is an external collaborator (spec.md §1) left
/// to the worker loop's next `service_request` pass.
#[pg_extern]
fn cdcsync_start(name: &str, connector_type: &str, source_database: &str) -> i32 {
    let dialect = ConnectorType::from_str(connector_type);
    let mut state = CONNECTOR_STATE.exclusive();
    match connector::allocate_connector(&mut state, name, dialect, source_database) {
        Ok(idx) => idx as i32,
        Err(e) => pgrx::error!("cdcsync: {e}"),
    }
}

/// Deregisters a connector and frees its slot. Does not itself terminate a
/// running background worker process (host scheduler, spec.md §1 Out of
/// scope); operationally this is called after the worker has stopped.
#[pg_extern]
fn cdcsync_stop(name: &str) -> bool {
    let mut state = CONNECTOR_STATE.exclusive();
    let Some(idx) = connector::find_by_name(&state, name) else {
        pgrx::error!("cdcsync: no connector named {name}");
    };
    match connector::release_connector(&mut state, idx) {
        Ok(()) => true,
        Err(e) => pgrx::error!("cdcsync: {e}"),
    }
}

/// Submits a `pause` request (spec.md §4.7: `SYNCING -> PAUSED`, stops the
/// upstream engine). The worker applies it on its next loop iteration.
#[pg_extern]
fn cdcsync_pause(name: &str) -> bool {
    submit(name, connector::RequestKind::Pause, None)
}

/// Submits a `resume` request (spec.md §4.7: `PAUSED -> SYNCING`).
#[pg_extern]
fn cdcsync_resume(name: &str) -> bool {
    submit(name, connector::RequestKind::Resume, None)
}

/// Submits a `set-offset` request (spec.md §4.7: `PAUSED -> OFFSET_UPDATE
/// -> PAUSED`, writes `offset` to the upstream engine).
#[pg_extern]
fn cdcsync_set_offset(name: &str, offset: &str) -> bool {
    submit(name, connector::RequestKind::SetOffset, Some(offset))
}

fn submit(name: &str, kind: connector::RequestKind, offset: Option<&str>) -> bool {
    let mut state = CONNECTOR_STATE.exclusive();
    let Some(idx) = connector::find_by_name(&state, name) else {
        pgrx::error!("cdcsync: no connector named {name}");
    };
    match connector::submit_request(&mut state.entries[idx], kind, offset) {
        Ok(()) => true,
        Err(e) => pgrx::error!("cdcsync: {e}"),
    }
}

/// Reports a connector's current FSM state, stage, and last error message —
/// a read-only status query taken under the shared lock (spec.md §5:
/// "Readers (status queries) take it shared").
#[pg_extern]
fn cdcsync_status(name: &str) -> String {
    let state = CONNECTOR_STATE.share();
    let Some(idx) = connector::find_by_name(&state, name) else {
        pgrx::error!("cdcsync: no connector named {name}");
    };
    let entry = &state.entries[idx];
    let errmsg = entry.errmsg.get();
    format!(
        "state={:?} stage={:?} dialect={} errmsg={}",
        entry.state,
        entry.stage,
        entry.connector_type.as_str(),
        if errmsg.is_empty() { "<none>" } else { errmsg },
    )
}

/// Reports the connector's event-processing counters (SPEC_FULL.md §C.1).
#[pg_extern]
fn cdcsync_stats(name: &str) -> pgrx::JsonB {
    let state = CONNECTOR_STATE.share();
    let Some(idx) = connector::find_by_name(&state, name) else {
        pgrx::error!("cdcsync: no connector named {name}");
    };
    let s = &state.entries[idx].statistics;
    pgrx::JsonB(serde_json::json!({
        "stats_ddl": s.stats_ddl,
        "stats_dml": s.stats_dml,
        "stats_read": s.stats_read,
        "stats_create": s.stats_create,
        "stats_update": s.stats_update,
        "stats_delete": s.stats_delete,
        "stats_bad_change_event": s.stats_bad_change_event,
        "stats_total_change_event": s.stats_total_change_event,
        "stats_batch_completion": s.stats_batch_completion,
    }))
}

#[cfg(any(test, feature = "pg_test"))]
#[pg_schema]
mod tests {
    use pgrx::prelude::*;

    #[pg_test]
    fn extension_loads() {
        let result = Spi::get_one::<bool>("SELECT true");
        assert_eq!(result, Ok(Some(true)));
    }

    #[pg_test]
    fn start_then_status_then_stop_round_trips() {
        let idx = crate::cdcsync_start("orders_mysql", "mysql", "inventory");
        assert!(idx >= 0);
        let status = crate::cdcsync_status("orders_mysql");
        assert!(status.contains("state=Syncing"));
        assert!(crate::cdcsync_pause("orders_mysql"));
        assert!(crate::cdcsync_stop("orders_mysql"));
    }
}

#[cfg(test)]
pub mod pg_test {
    pub fn setup(_options: Vec<&str>) {}

    pub fn postgresql_conf_options() -> Vec<&'static str> {
        vec![]
    }
}
