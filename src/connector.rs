//! Connector control FSM (C11). Per-connector shared state, the single-item
//! request mailbox, and state transitions (spec.md §3, §4.7, §5).
//!
//! The shared array itself (`SynchdbSharedState`/`ActiveConnectors` in
//! `original_source/synchdb.h`) lives behind one `pgrx::PgLwLock` declared
//! as a process-wide static; every field mutation happens under that lock,
//! copy-out-then-act, per spec.md §5 ("never call into the upstream engine
//! or target database while holding the lock"). The transition functions in
//! this module are pure so they are unit-testable without shared memory.

use pgrx::shmem::*;
use pgrx::{pg_shmem_init, PgLwLock};
use thiserror::Error;

use crate::dialect::ConnectorType;

/// Longest error message / offset / snapshot-mode string kept inline in
/// shared memory, mirroring `synchdb.h`'s fixed `char[]` fields.
pub const SHM_STR_LEN: usize = 256;

/// A fixed-capacity, `Copy`-able string buffer suitable for shared memory,
/// standing in for the original's `char name[N]` fields.
#[derive(Debug, Clone, Copy)]
pub struct ShmStr<const N: usize> {
    bytes: [u8; N],
    len: usize,
}

impl<const N: usize> Default for ShmStr<N> {
    fn default() -> Self {
        Self { bytes: [0; N], len: 0 }
    }
}

impl<const N: usize> ShmStr<N> {
    pub fn set(&mut self, s: &str) {
        let truncated = &s.as_bytes()[..s.len().min(N)];
        self.bytes[..truncated.len()].copy_from_slice(truncated);
        for b in &mut self.bytes[truncated.len()..] {
            *b = 0;
        }
        self.len = truncated.len();
    }

    pub fn get(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len]).unwrap_or("")
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }
}

/// Top-level connector state machine (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectorState {
    #[default]
    Initializing,
    Syncing,
    Paused,
    Parsing,
    Converting,
    Executing,
    OffsetUpdate,
    Stopped,
}

/// Snapshot vs streaming stage (SPEC_FULL.md §C.2), driven from
/// `payload.source.snapshot` (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectorStage {
    #[default]
    InitialSnapshot,
    ChangeDataCapture,
}

impl ConnectorStage {
    pub fn from_snapshot_field(snapshot: &str) -> Self {
        match snapshot {
            "true" | "last" => ConnectorStage::InitialSnapshot,
            _ => ConnectorStage::ChangeDataCapture,
        }
    }
}

/// Per-connector counters (SPEC_FULL.md §C.1, `SynchdbStatistics`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectorStatistics {
    pub stats_ddl: u64,
    pub stats_dml: u64,
    pub stats_read: u64,
    pub stats_create: u64,
    pub stats_update: u64,
    pub stats_delete: u64,
    pub stats_bad_change_event: u64,
    pub stats_total_change_event: u64,
    pub stats_batch_completion: u64,
}

impl ConnectorStatistics {
    pub fn record_event(&mut self, op: Option<crate::dml::Op>) {
        self.stats_total_change_event += 1;
        match op {
            None => self.stats_ddl += 1,
            Some(crate::dml::Op::Read) => {
                self.stats_dml += 1;
                self.stats_read += 1;
            }
            Some(crate::dml::Op::Create) => {
                self.stats_dml += 1;
                self.stats_create += 1;
            }
            Some(crate::dml::Op::Update) => {
                self.stats_dml += 1;
                self.stats_update += 1;
            }
            Some(crate::dml::Op::Delete) => {
                self.stats_dml += 1;
                self.stats_delete += 1;
            }
        }
    }

    pub fn record_bad_event(&mut self) {
        self.stats_bad_change_event += 1;
    }

    pub fn record_batch_completion(&mut self) {
        self.stats_batch_completion += 1;
    }
}

/// One pending external request (spec.md §4.7). The mailbox holds at most
/// one of these; `kind == RequestKind::Undef` represents the empty slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestKind {
    #[default]
    Undef,
    Pause,
    Resume,
    SetOffset,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Request {
    pub kind: RequestKind,
    pub offset: ShmStr<SHM_STR_LEN>,
}

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("request {0:?} is not legal from state {1:?}")]
    IllegalTransition(RequestKind, ConnectorState),
    #[error("a request is already pending for this connector")]
    MailboxFull,
    #[error("a connector named {0:?} is already registered")]
    NameTaken(String),
    #[error("no free connector slot (max {MAX_ACTIVE_CONNECTORS})")]
    NoFreeSlot,
    #[error("no connector registered at slot {0}")]
    NoSuchSlot(usize),
}

/// One connector's complete shared-memory record
/// (`ActiveConnectors` in `original_source/synchdb.h`).
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectorEntry {
    /// Empty name marks the slot as free; `allocate_connector` scans for it.
    pub name: ShmStr<SHM_STR_LEN>,
    pub pid: i32,
    pub state: ConnectorState,
    pub stage: ConnectorStage,
    pub connector_type: ConnectorType,
    pub source_database: ShmStr<SHM_STR_LEN>,
    pub errmsg: ShmStr<SHM_STR_LEN>,
    pub dbz_offset: ShmStr<SHM_STR_LEN>,
    pub snapshot_mode: ShmStr<SHM_STR_LEN>,
    pub request: Request,
    pub statistics: ConnectorStatistics,
}

/// Finds the slot index owned by logical connector `name`, if any.
pub fn find_by_name(state: &SharedConnectorState, name: &str) -> Option<usize> {
    state.entries.iter().position(|e| e.name.get() == name)
}

/// Claims a free slot for a new logical connector (one per configured
/// source, spec.md §1 "a long-lived background worker per logical source
/// connector"). Returns its index, or an error if `name` is already taken
/// or no slot remains (`MAX_ACTIVE_CONNECTORS`, spec.md §5 scheduling model).
pub fn allocate_connector(
    state: &mut SharedConnectorState,
    name: &str,
    connector_type: ConnectorType,
    source_database: &str,
) -> Result<usize, ConnectorError> {
    if find_by_name(state, name).is_some() {
        return Err(ConnectorError::NameTaken(name.to_string()));
    }
    let idx = state
        .entries
        .iter()
        .position(|e| e.name.get().is_empty())
        .ok_or(ConnectorError::NoFreeSlot)?;

    let entry = &mut state.entries[idx];
    *entry = ConnectorEntry::default();
    entry.name.set(name);
    entry.connector_type = connector_type;
    entry.source_database.set(source_database);
    entry.state = ConnectorState::Syncing;
    Ok(idx)
}

/// Releases a slot back to the free pool (spec.md §4.7 terminal `STOPPED`
/// followed by deconfiguration).
pub fn release_connector(state: &mut SharedConnectorState, idx: usize) -> Result<(), ConnectorError> {
    let entry = state.entries.get_mut(idx).ok_or(ConnectorError::NoSuchSlot(idx))?;
    if entry.name.get().is_empty() {
        return Err(ConnectorError::NoSuchSlot(idx));
    }
    *entry = ConnectorEntry::default();
    Ok(())
}

/// Submits a request into the single-item mailbox (spec.md §4.7: "submitting
/// a second request while one is pending fails").
pub fn submit_request(entry: &mut ConnectorEntry, kind: RequestKind, offset: Option<&str>) -> Result<(), ConnectorError> {
    if entry.request.kind != RequestKind::Undef {
        return Err(ConnectorError::MailboxFull);
    }
    entry.request.kind = kind;
    entry.request.offset.clear();
    if let Some(offset) = offset {
        entry.request.offset.set(offset);
    }
    Ok(())
}

/// Applies the pending request's FSM transition, if legal, then resets the
/// mailbox to `Undef` regardless of outcome (SPEC_FULL.md §C.6,
/// `reset_shm_request_state`). Returns the request that was consumed so the
/// worker loop can perform the side effect (stop/start upstream engine,
/// write offset) outside the lock.
pub fn take_and_apply_request(entry: &mut ConnectorEntry) -> Result<Option<(RequestKind, String)>, ConnectorError> {
    let kind = entry.request.kind;
    if kind == RequestKind::Undef {
        return Ok(None);
    }
    let offset = entry.request.offset.get().to_string();

    let result = match (entry.state, kind) {
        (ConnectorState::Syncing, RequestKind::Pause) => {
            entry.state = ConnectorState::Paused;
            Ok(Some((kind, offset)))
        }
        (ConnectorState::Paused, RequestKind::Resume) => {
            entry.state = ConnectorState::Syncing;
            Ok(Some((kind, offset)))
        }
        (ConnectorState::Paused, RequestKind::SetOffset) => {
            entry.state = ConnectorState::OffsetUpdate;
            Ok(Some((kind, offset)))
        }
        _ => Err(ConnectorError::IllegalTransition(kind, entry.state)),
    };

    entry.request.kind = RequestKind::Undef;
    entry.request.offset.clear();
    result
}

/// Completes an offset-update request, returning the connector to `PAUSED`
/// (spec.md §4.7: `PAUSED -> OFFSET_UPDATE -> PAUSED`).
pub fn complete_offset_update(entry: &mut ConnectorEntry) {
    if entry.state == ConnectorState::OffsetUpdate {
        entry.state = ConnectorState::Paused;
    }
}

pub const MAX_ACTIVE_CONNECTORS: usize = 30;

#[derive(Debug, Clone, Copy)]
pub struct SharedConnectorState {
    pub entries: [ConnectorEntry; MAX_ACTIVE_CONNECTORS],
}

impl Default for SharedConnectorState {
    fn default() -> Self {
        Self {
            entries: [ConnectorEntry::default(); MAX_ACTIVE_CONNECTORS],
        }
    }
}

unsafe impl PGRXSharedMemory for SharedConnectorState {}

/// Single process-wide array of connector state, one slot per logical
/// connector, behind one reader/writer lock (spec.md §5).
pub static CONNECTOR_STATE: PgLwLock<SharedConnectorState> = PgLwLock::new();

/// Registers shared memory for the connector state array. Call once from
/// `_PG_init` (see `lib.rs`).
pub fn init_shared_memory() {
    pg_shmem_init!(CONNECTOR_STATE);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_then_resume_round_trips() {
        let mut entry = ConnectorEntry {
            state: ConnectorState::Syncing,
            ..Default::default()
        };
        submit_request(&mut entry, RequestKind::Pause, None).unwrap();
        let (kind, _) = take_and_apply_request(&mut entry).unwrap().unwrap();
        assert_eq!(kind, RequestKind::Pause);
        assert_eq!(entry.state, ConnectorState::Paused);
        assert_eq!(entry.request.kind, RequestKind::Undef);

        submit_request(&mut entry, RequestKind::Resume, None).unwrap();
        take_and_apply_request(&mut entry).unwrap();
        assert_eq!(entry.state, ConnectorState::Syncing);
    }

    #[test]
    fn set_offset_transitions_through_offset_update_and_back() {
        let mut entry = ConnectorEntry {
            state: ConnectorState::Paused,
            ..Default::default()
        };
        submit_request(&mut entry, RequestKind::SetOffset, Some("1234")).unwrap();
        let (_, offset) = take_and_apply_request(&mut entry).unwrap().unwrap();
        assert_eq!(offset, "1234");
        assert_eq!(entry.state, ConnectorState::OffsetUpdate);
        complete_offset_update(&mut entry);
        assert_eq!(entry.state, ConnectorState::Paused);
    }

    #[test]
    fn illegal_transition_is_rejected_and_mailbox_cleared() {
        let mut entry = ConnectorEntry {
            state: ConnectorState::Syncing,
            ..Default::default()
        };
        submit_request(&mut entry, RequestKind::Resume, None).unwrap();
        let err = take_and_apply_request(&mut entry).unwrap_err();
        assert!(matches!(err, ConnectorError::IllegalTransition(RequestKind::Resume, ConnectorState::Syncing)));
        assert_eq!(entry.request.kind, RequestKind::Undef);
    }

    #[test]
    fn mailbox_rejects_a_second_request() {
        let mut entry = ConnectorEntry {
            state: ConnectorState::Syncing,
            ..Default::default()
        };
        submit_request(&mut entry, RequestKind::Pause, None).unwrap();
        let err = submit_request(&mut entry, RequestKind::Pause, None).unwrap_err();
        assert!(matches!(err, ConnectorError::MailboxFull));
    }

    #[test]
    fn statistics_track_op_kind() {
        let mut stats = ConnectorStatistics::default();
        stats.record_event(None);
        stats.record_event(Some(crate::dml::Op::Create));
        stats.record_event(Some(crate::dml::Op::Update));
        assert_eq!(stats.stats_ddl, 1);
        assert_eq!(stats.stats_dml, 2);
        assert_eq!(stats.stats_create, 1);
        assert_eq!(stats.stats_update, 1);
        assert_eq!(stats.stats_total_change_event, 3);
    }

    #[test]
    fn allocate_then_release_frees_the_slot() {
        let mut state = SharedConnectorState::default();
        let idx = allocate_connector(&mut state, "orders_mysql", ConnectorType::MySql, "inventory").unwrap();
        assert_eq!(find_by_name(&state, "orders_mysql"), Some(idx));
        assert_eq!(state.entries[idx].state, ConnectorState::Syncing);

        release_connector(&mut state, idx).unwrap();
        assert_eq!(find_by_name(&state, "orders_mysql"), None);
    }

    #[test]
    fn allocate_rejects_duplicate_name() {
        let mut state = SharedConnectorState::default();
        allocate_connector(&mut state, "orders_mysql", ConnectorType::MySql, "inventory").unwrap();
        let err = allocate_connector(&mut state, "orders_mysql", ConnectorType::MySql, "inventory").unwrap_err();
        assert!(matches!(err, ConnectorError::NameTaken(_)));
    }

    #[test]
    fn allocate_fails_once_all_slots_are_taken() {
        let mut state = SharedConnectorState::default();
        for i in 0..MAX_ACTIVE_CONNECTORS {
            allocate_connector(&mut state, &format!("c{i}"), ConnectorType::MySql, "db").unwrap();
        }
        let err = allocate_connector(&mut state, "overflow", ConnectorType::MySql, "db").unwrap_err();
        assert!(matches!(err, ConnectorError::NoFreeSlot));
    }

    #[test]
    fn release_unknown_slot_is_an_error() {
        let mut state = SharedConnectorState::default();
        assert!(release_connector(&mut state, 0).is_err());
    }
}
