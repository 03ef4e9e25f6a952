//! Metalog - Archive Metadata Catalog
//!
//! This crate provides the indexed in-memory catalog behind a
//! time-series archive's metadata stream: metric descriptors, instance
//! domain histories, label histories, help text and the metric name
//! tree.
//!
//! # Components
//!
//! - [`Catalog`]: the indexed store, populated by scanning a metadata
//!   file and queried with point-in-time lookups
//! - [`ArchiveMeta`]: a catalog coupled with the archive's file handle
//!   and log version, adding the record writers
//! - [`format`]: the length-framed, network-byte-order record codecs
//! - [`NameTree`]: the dotted metric namespace
//!
//! # Example
//!
//! ```rust,ignore
//! use metalog::{Catalog, Stamp};
//!
//! // Position the file past the archive label block, then scan.
//! let mut catalog = Catalog::new();
//! catalog.load(&mut file)?;
//!
//! // Which instances did domain 42 have at time 1700000000?
//! let snapshot = catalog.get_indom(42, Some(&Stamp::new(1_700_000_000, 0)))?;
//! for inst in &snapshot.instances {
//!     println!("{} -> {}", inst.id, inst.name);
//! }
//! ```

#![deny(missing_docs)]

pub mod catalog;
pub mod error;
pub mod format;
pub mod names;

pub use catalog::{ArchiveMeta, Catalog, IndomInsert, IndomSnapshot, LabelGroup};
pub use error::{MetaError, Result};
pub use format::{
    Instance, Label, LabelSet, LogVersion, MetricDesc, RecordType, Stamp, Units,
};
pub use names::NameTree;
