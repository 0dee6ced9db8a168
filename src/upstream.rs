//! Upstream engine contract (§6, SPEC_FULL.md §D). The Debezium/JVM engine
//! subprocess is a Non-goal (spec.md §1) — only the interface the connector
//! worker drives it through is specified here.

use crate::dialect::ConnectorType;
use crate::error::UpstreamError;

/// Connection parameters handed to [`UpstreamEngine::start`], mirroring the
/// per-connector fields `synchdb.c` reads out of its connector info struct
/// (hostname/port/user/password/database plus the source dialect tag).
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub connector: ConnectorType,
    pub hostname: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub source_database: String,
    pub rule_file_path: Option<String>,
}

/// The upstream CDC engine: started, polled for batches of raw JSON change
/// events, and asked for/given replication offsets. Never implemented in
/// full here — only consumed by `worker.rs`.
pub trait UpstreamEngine {
    fn start(&mut self, conn_info: &ConnectionInfo) -> Result<(), UpstreamError>;
    fn stop(&mut self) -> Result<(), UpstreamError>;
    /// Returns one batch of raw Debezium JSON documents, possibly empty.
    fn poll(&mut self) -> Result<Vec<String>, UpstreamError>;
    fn get_offset(&self, kind: ConnectorType, db: &str) -> Result<String, UpstreamError>;
    fn set_offset(&mut self, file: &str, kind: ConnectorType, db: &str, offset: &str) -> Result<(), UpstreamError>;
}

#[cfg(test)]
pub mod fake {
    //! An in-memory [`UpstreamEngine`] used by `worker.rs`'s unit tests —
    //! queues documents instead of speaking to a JVM subprocess.
    use super::*;

    #[derive(Debug, Default)]
    pub struct FakeUpstream {
        pub started: bool,
        pub queued_batches: Vec<Vec<String>>,
        pub offsets: std::collections::HashMap<(String, String), String>,
        pub fail_next_poll: bool,
    }

    impl UpstreamEngine for FakeUpstream {
        fn start(&mut self, _conn_info: &ConnectionInfo) -> Result<(), UpstreamError> {
            self.started = true;
            Ok(())
        }

        fn stop(&mut self) -> Result<(), UpstreamError> {
            self.started = false;
            Ok(())
        }

        fn poll(&mut self) -> Result<Vec<String>, UpstreamError> {
            if self.fail_next_poll {
                return Err(UpstreamError::Other("forced failure".to_string()));
            }
            Ok(if self.queued_batches.is_empty() {
                Vec::new()
            } else {
                self.queued_batches.remove(0)
            })
        }

        fn get_offset(&self, kind: ConnectorType, db: &str) -> Result<String, UpstreamError> {
            self.offsets
                .get(&(kind.as_str().to_string(), db.to_string()))
                .cloned()
                .ok_or_else(|| UpstreamError::Other(format!("no offset recorded for {db}")))
        }

        fn set_offset(&mut self, _file: &str, kind: ConnectorType, db: &str, offset: &str) -> Result<(), UpstreamError> {
            self.offsets
                .insert((kind.as_str().to_string(), db.to_string()), offset.to_string());
            Ok(())
        }
    }
}
