//! Error taxonomy for the event translation pipeline (spec.md §7).
//!
//! Every fallible step in the pipeline returns a classified [`IngestError`]
//! instead of raising a Postgres error directly; the worker loop (see
//! `worker.rs`) decides what the classification means operationally.

use thiserror::Error;

/// How the worker loop should react to an [`IngestError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Drop the event, log a warning, bump the bad-event counter, continue.
    SkipEvent,
    /// The event cannot be applied; record `errmsg`, return to SYNCING, continue.
    FatalForEvent,
    /// The connector itself cannot continue (e.g. malformed rule file at load).
    FatalForConnector,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("unknown DDL kind: {0}")]
    UnknownDdlKind(String),

    #[error("schema resolution failed for {schema}.{table}: {reason}")]
    SchemaResolution {
        schema: String,
        table: String,
        reason: String,
    },

    #[error("unknown column {column} in table {table}")]
    UnknownColumn { table: String, column: String },

    #[error("undefined temporal representation for column {column}")]
    UndefinedTimerep { column: String },

    #[error("target execution failed: {0}")]
    ExecutionFailure(String),

    #[error("rule document malformed: {0}")]
    RuleFileMalformed(String),

    #[error("invalid source object id: {0}")]
    InvalidObjectId(String),
}

impl IngestError {
    pub fn severity(&self) -> Severity {
        match self {
            IngestError::MalformedEnvelope(_) | IngestError::UnknownDdlKind(_) => {
                Severity::SkipEvent
            }
            IngestError::SchemaResolution { .. }
            | IngestError::UnknownColumn { .. }
            | IngestError::UndefinedTimerep { .. }
            | IngestError::ExecutionFailure(_)
            | IngestError::InvalidObjectId(_) => Severity::FatalForEvent,
            IngestError::RuleFileMalformed(_) => Severity::FatalForConnector,
        }
    }
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("SPI error: {0}")]
    Spi(String),
    #[error("no row matched for update/delete")]
    NoMatchingRow,
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream engine error: {0}")]
    Other(String),
}
