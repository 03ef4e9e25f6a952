//! Error and Result types for archive metadata operations.

use std::io;
use thiserror::Error;

/// A convenience `Result` type for metadata catalog operations.
pub type Result<T> = std::result::Result<T, MetaError>;

/// The error type for metadata catalog operations.
#[derive(Debug, Error)]
pub enum MetaError {
    /// Corrupted or malformed metadata record (framing, field limits,
    /// or a short read inside a record).
    #[error("corrupted metadata record: {0}")]
    LogRecord(String),

    /// A descriptor was re-recorded with a different data type.
    #[error("data type changed for metric {0:#x}")]
    TypeChanged(u32),

    /// A descriptor was re-recorded with different semantics.
    #[error("semantics changed for metric {0:#x}")]
    SemanticsChanged(u32),

    /// A descriptor was re-recorded with a different instance domain.
    #[error("instance domain changed for metric {0:#x}")]
    IndomChanged(u32),

    /// A descriptor was re-recorded with different units.
    #[error("units changed for metric {0:#x}")]
    UnitsChanged(u32),

    /// Requested instance domain does not appear in the archive, or has
    /// no snapshot at or before the requested time.
    #[error("instance domain {0:#x} not found in archive")]
    IndomNotFound(u32),

    /// Requested instance is not a member of the instance domain.
    #[error("instance not found in instance domain {indom:#x}")]
    InstanceNotFound {
        /// Instance domain that was searched.
        indom: u32,
    },

    /// Requested metric identifier does not appear in the archive.
    #[error("metric {0:#x} not found in archive")]
    MetricNotFound(u32),

    /// No label sets recorded for the given type and identifier.
    #[error("no labels for type {kind:#x} ident {ident:#x}")]
    NoLabels {
        /// Label type (context, domain, indom, cluster, item, instances).
        kind: u32,
        /// Identifier the labels were requested for.
        ident: u32,
    },

    /// No help text recorded for the given type and identifier.
    #[error("no help text for ident {ident:#x}")]
    TextNotFound {
        /// Identifier the text was requested for.
        ident: u32,
    },

    /// A metric name is already bound to a different metric identifier.
    ///
    /// The loader downgrades this to success so that one corrupt binding
    /// does not make the rest of the archive unreadable.
    #[error("duplicate metric name {name} already bound to {existing:#x}")]
    DuplicateName {
        /// The conflicting metric name.
        name: String,
        /// The metric identifier the name is already bound to.
        existing: u32,
    },

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
