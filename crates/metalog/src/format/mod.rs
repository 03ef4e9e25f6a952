//! On-disk metadata record format.
//!
//! An archive's metadata stream is a sequence of length-framed records in
//! network byte order, following the fixed archive label block:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Header (8 bytes)                                           │
//! │  - Total length: u32 BE (header + payload + trailer)        │
//! │  - Record type: u32 BE                                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Payload (total length - 12 bytes)                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Trailer (4 bytes)                                          │
//! │  - Total length: u32 BE, must equal the header length       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A record whose trailer length disagrees with its header length is a
//! hard decode failure. Records of unrecognised type are skipped, but the
//! trailer is still validated.
//!
//! Two timestamp encodings exist side by side: version 2 archives carry
//! 32-bit second/microsecond pairs, version 3 archives carry 64-bit
//! seconds with 32-bit nanoseconds. Both decode into [`Stamp`].

pub mod record;

use crate::error::{MetaError, Result};
use std::io::Read;

/// Size in bytes of a record header (length and type fields).
pub const HEADER_SIZE: usize = 8;

/// Size in bytes of a record trailer (repeated length field).
pub const TRAILER_SIZE: usize = 4;

/// Framing overhead of every record: header plus trailer.
pub const FRAME_SIZE: usize = HEADER_SIZE + TRAILER_SIZE;

/// Size in bytes of one encoded [`Label`].
pub const LABEL_SIZE: usize = 12;

/// Upper bound on the JSON blob carried by a single label set.
pub const MAX_LABEL_JSON_LEN: usize = 65536;

/// Upper bound on the number of labels in a single label set.
pub const MAX_LABELS_PER_SET: usize = 254;

/// Null metric / instance domain identifier.
pub const ID_NULL: u32 = 0xffff_ffff;

/// Label type bit: labels of the archive context itself.
pub const LABEL_CONTEXT: u32 = 1 << 0;
/// Label type bit: labels of a performance domain.
pub const LABEL_DOMAIN: u32 = 1 << 1;
/// Label type bit: labels of an instance domain.
pub const LABEL_INDOM: u32 = 1 << 2;
/// Label type bit: labels of a metric cluster.
pub const LABEL_CLUSTER: u32 = 1 << 3;
/// Label type bit: labels of an individual metric.
pub const LABEL_ITEM: u32 = 1 << 4;
/// Label type bit: labels of the instances of an instance domain.
pub const LABEL_INSTANCES: u32 = 1 << 5;
/// Label type modifier bit: compound (structured) label value.
pub const LABEL_COMPOUND: u32 = 1 << 6;
/// Label type modifier bit: optional label.
pub const LABEL_OPTIONAL: u32 = 1 << 7;

/// Help text type bit: one-line summary text.
pub const TEXT_ONELINE: u32 = 1 << 0;
/// Help text type bit: full help text.
pub const TEXT_HELP: u32 = 1 << 1;
/// Help text type bit: the identifier is a metric id.
pub const TEXT_PMID: u32 = 1 << 2;
/// Help text type bit: the identifier is an instance domain.
pub const TEXT_INDOM: u32 = 1 << 3;
/// Help text type modifier bit: fetch directly, bypassing caches.
pub const TEXT_DIRECT: u32 = 1 << 4;

/// Metric data type: signed 32-bit integer.
pub const TYPE_32: i32 = 0;
/// Metric data type: unsigned 32-bit integer.
pub const TYPE_U32: i32 = 1;
/// Metric data type: signed 64-bit integer.
pub const TYPE_64: i32 = 2;
/// Metric data type: unsigned 64-bit integer.
pub const TYPE_U64: i32 = 3;
/// Metric data type: 32-bit floating point.
pub const TYPE_FLOAT: i32 = 4;
/// Metric data type: 64-bit floating point.
pub const TYPE_DOUBLE: i32 = 5;
/// Metric data type: string.
pub const TYPE_STRING: i32 = 6;

/// Metric semantics: cumulative counter.
pub const SEM_COUNTER: i32 = 1;
/// Metric semantics: instantaneous value.
pub const SEM_INSTANT: i32 = 3;
/// Metric semantics: discrete value, fixed between updates.
pub const SEM_DISCRETE: i32 = 4;

/// External metadata record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RecordType {
    /// Metric descriptor with its names.
    Desc = 1,
    /// Instance domain snapshot, version 2 timestamp encoding.
    IndomV2 = 2,
    /// Label sets, version 2 timestamp encoding.
    LabelV2 = 3,
    /// Help text.
    Text = 4,
    /// Instance domain snapshot, version 3 timestamp encoding.
    Indom = 5,
    /// Instance domain delta; not materialised by this catalog.
    IndomDelta = 6,
    /// Label sets, version 3 timestamp encoding.
    Label = 7,
}

impl RecordType {
    /// Creates a RecordType from a raw u32 value.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            1 => Some(Self::Desc),
            2 => Some(Self::IndomV2),
            3 => Some(Self::LabelV2),
            4 => Some(Self::Text),
            5 => Some(Self::Indom),
            6 => Some(Self::IndomDelta),
            7 => Some(Self::Label),
            _ => None,
        }
    }

    /// Returns the record type name used in trace output.
    pub fn name(self) -> &'static str {
        match self {
            Self::Desc => "DESC",
            Self::IndomV2 => "INDOM_V2",
            Self::LabelV2 => "LABEL_V2",
            Self::Text => "TEXT",
            Self::Indom => "INDOM",
            Self::IndomDelta => "INDOM_DELTA",
            Self::Label => "LABEL",
        }
    }
}

/// Archive log format version, selecting the timestamp encoding used by
/// instance domain and label records written to the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum LogVersion {
    /// Version 2: 32-bit seconds and microseconds.
    V2 = 2,
    /// Version 3: 64-bit seconds and 32-bit nanoseconds.
    #[default]
    V3 = 3,
}

impl LogVersion {
    /// Creates a LogVersion from a raw u32 value.
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            2 => Some(Self::V2),
            3 => Some(Self::V3),
            _ => None,
        }
    }

    /// Returns the raw u32 value.
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// A point in time: seconds since the epoch plus nanoseconds.
///
/// Comparison is lexicographic on `(sec, nsec)`, which the derived
/// ordering provides through field order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stamp {
    /// Seconds since the epoch.
    pub sec: i64,
    /// Nanoseconds within the second.
    pub nsec: i32,
}

impl Stamp {
    /// Creates a new timestamp.
    pub const fn new(sec: i64, nsec: i32) -> Self {
        Self { sec, nsec }
    }

    /// Encodes as a version 3 timestamp: i64 seconds, i32 nanoseconds.
    pub fn to_timestamp_bytes(self) -> [u8; 12] {
        let mut buf = [0u8; 12];
        buf[0..8].copy_from_slice(&self.sec.to_be_bytes());
        buf[8..12].copy_from_slice(&self.nsec.to_be_bytes());
        buf
    }

    /// Decodes a version 3 timestamp.
    pub fn from_timestamp_bytes(buf: &[u8; 12]) -> Self {
        Self {
            sec: i64::from_be_bytes(buf[0..8].try_into().unwrap()),
            nsec: i32::from_be_bytes(buf[8..12].try_into().unwrap()),
        }
    }

    /// Encodes as a version 2 timeval: i32 seconds, i32 microseconds.
    ///
    /// Seconds outside the 32-bit range truncate; sub-microsecond
    /// precision is lost.
    pub fn to_timeval_bytes(self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0..4].copy_from_slice(&(self.sec as i32).to_be_bytes());
        buf[4..8].copy_from_slice(&(self.nsec / 1000).to_be_bytes());
        buf
    }

    /// Decodes a version 2 timeval.
    pub fn from_timeval_bytes(buf: &[u8; 8]) -> Self {
        let sec = i32::from_be_bytes(buf[0..4].try_into().unwrap());
        let usec = i32::from_be_bytes(buf[4..8].try_into().unwrap());
        Self {
            sec: sec as i64,
            nsec: usec.wrapping_mul(1000),
        }
    }
}

fn signed_nibble(bits: u32, shift: u32) -> i8 {
    let v = ((bits >> shift) & 0xf) as i8;
    if v >= 8 {
        v - 16
    } else {
        v
    }
}

/// Dimension and scale of a metric's value, packed into one 32-bit word
/// on the wire.
///
/// ```text
/// Bits    Field
/// ----    -----
/// 31-28   dim_space (signed)
/// 27-24   dim_time (signed)
/// 23-20   dim_count (signed)
/// 19-16   scale_space
/// 15-12   scale_time
/// 11-8    scale_count (signed)
/// 7-0     zero
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Units {
    /// Space dimension exponent.
    pub dim_space: i8,
    /// Time dimension exponent.
    pub dim_time: i8,
    /// Count (events) dimension exponent.
    pub dim_count: i8,
    /// Space scale (bytes, kilobytes, ...).
    pub scale_space: u8,
    /// Time scale (nanoseconds through hours).
    pub scale_time: u8,
    /// Count scale, as a power of ten.
    pub scale_count: i8,
}

impl Units {
    /// Creates units from explicit dimension and scale fields.
    pub const fn new(
        dim_space: i8,
        dim_time: i8,
        dim_count: i8,
        scale_space: u8,
        scale_time: u8,
        scale_count: i8,
    ) -> Self {
        Self {
            dim_space,
            dim_time,
            dim_count,
            scale_space,
            scale_time,
            scale_count,
        }
    }

    /// Unpacks units from their wire representation.
    pub fn from_bits(bits: u32) -> Self {
        Self {
            dim_space: signed_nibble(bits, 28),
            dim_time: signed_nibble(bits, 24),
            dim_count: signed_nibble(bits, 20),
            scale_space: ((bits >> 16) & 0xf) as u8,
            scale_time: ((bits >> 12) & 0xf) as u8,
            scale_count: signed_nibble(bits, 8),
        }
    }

    /// Packs units into their wire representation.
    pub fn to_bits(self) -> u32 {
        ((self.dim_space as u32 & 0xf) << 28)
            | ((self.dim_time as u32 & 0xf) << 24)
            | ((self.dim_count as u32 & 0xf) << 20)
            | ((self.scale_space as u32 & 0xf) << 16)
            | ((self.scale_time as u32 & 0xf) << 12)
            | ((self.scale_count as u32 & 0xf) << 8)
    }
}

/// A metric descriptor.
///
/// Identity is the `pmid`; the remaining fields are frozen after the
/// first sighting of a given metric and may never change across records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDesc {
    /// Unique metric identifier.
    pub pmid: u32,
    /// Data type of the metric's values.
    pub data_type: i32,
    /// Semantics of the metric's values (counter, instant, discrete).
    pub sem: i32,
    /// Instance domain the metric's values are scoped to, or [`ID_NULL`].
    pub indom: u32,
    /// Dimension and scale of the metric's values.
    pub units: Units,
}

/// One instance of an instance domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// Internal instance identifier.
    pub id: i32,
    /// External instance name.
    pub name: String,
}

impl Instance {
    /// Creates a new instance.
    pub fn new(id: i32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

/// One label: offsets and lengths into the owning set's JSON buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label {
    /// Byte offset of the label name within the JSON buffer.
    pub name: u16,
    /// Byte length of the label name.
    pub namelen: u16,
    /// Byte offset of the label value within the JSON buffer.
    pub value: u16,
    /// Byte length of the label value.
    pub valuelen: u16,
    /// Label flags (type bits and modifiers).
    pub flags: u32,
}

impl Label {
    /// Encodes the label into its fixed 12-byte wire form.
    pub fn to_bytes(self) -> [u8; LABEL_SIZE] {
        let mut buf = [0u8; LABEL_SIZE];
        buf[0..2].copy_from_slice(&self.name.to_be_bytes());
        buf[2..4].copy_from_slice(&self.namelen.to_be_bytes());
        buf[4..6].copy_from_slice(&self.value.to_be_bytes());
        buf[6..8].copy_from_slice(&self.valuelen.to_be_bytes());
        buf[8..12].copy_from_slice(&self.flags.to_be_bytes());
        buf
    }

    /// Decodes a label from its fixed 12-byte wire form.
    pub fn from_bytes(buf: &[u8; LABEL_SIZE]) -> Self {
        Self {
            name: u16::from_be_bytes(buf[0..2].try_into().unwrap()),
            namelen: u16::from_be_bytes(buf[2..4].try_into().unwrap()),
            value: u16::from_be_bytes(buf[4..6].try_into().unwrap()),
            valuelen: u16::from_be_bytes(buf[6..8].try_into().unwrap()),
            flags: u32::from_be_bytes(buf[8..12].try_into().unwrap()),
        }
    }
}

/// A set of labels scoped to one instance, backed by a JSON buffer the
/// individual [`Label`]s index into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
    /// Instance the labels apply to, or -1 for the whole identifier.
    pub inst: i32,
    /// Raw JSON text the labels reference.
    pub json: Vec<u8>,
    /// Labels indexing into `json`.
    pub labels: Vec<Label>,
}

impl LabelSet {
    /// Creates a new label set.
    pub fn new(inst: i32, json: Vec<u8>, labels: Vec<Label>) -> Self {
        Self { inst, json, labels }
    }

    /// Returns the name bytes of a label, or an empty slice when the
    /// label's offsets fall outside the JSON buffer.
    pub fn name_of(&self, label: &Label) -> &[u8] {
        self.json
            .get(label.name as usize..label.name as usize + label.namelen as usize)
            .unwrap_or(&[])
    }

    /// Returns the value bytes of a label, or an empty slice when the
    /// label's offsets fall outside the JSON buffer.
    pub fn value_of(&self, label: &Label) -> &[u8] {
        self.json
            .get(label.value as usize..label.value as usize + label.valuelen as usize)
            .unwrap_or(&[])
    }

    /// Content comparison used for duplicate elimination.
    ///
    /// Two sets are the same when they apply to the same instance, hold
    /// the same number of labels, and every (name, value) pair of one is
    /// present byte-identical in the other. Label order does not matter.
    pub fn same_as(&self, other: &LabelSet) -> bool {
        if self.inst != other.inst {
            return false;
        }
        if self.labels.len() != other.labels.len() {
            return false;
        }

        'outer: for l1 in &self.labels {
            let name = self.name_of(l1);
            for l2 in &other.labels {
                if other.name_of(l2) != name {
                    continue;
                }
                // Same name with a different value settles the whole
                // comparison immediately.
                if other.value_of(l2) != self.value_of(l1) {
                    return false;
                }
                continue 'outer;
            }
            return false;
        }
        true
    }
}

/// Decoded record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Total record length, framing included.
    pub len: u32,
    /// Raw record type value.
    pub rtype: u32,
}

impl RecordHeader {
    /// Reads a record header from the stream.
    ///
    /// Returns `Ok(None)` when the stream ends at a record boundary,
    /// which is the normal end of a metadata file.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<Self>> {
        let mut buf = [0u8; HEADER_SIZE];
        match reader.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        Ok(Some(Self {
            len: u32::from_be_bytes(buf[0..4].try_into().unwrap()),
            rtype: u32::from_be_bytes(buf[4..8].try_into().unwrap()),
        }))
    }
}

/// Reads exactly `n` payload bytes. A stream ending inside a record is
/// a malformed record, not an I/O error.
pub(crate) fn read_payload<R: Read>(reader: &mut R, n: usize, what: &str) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    match reader.read_exact(&mut buf) {
        Ok(()) => Ok(buf),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(MetaError::LogRecord(format!("short read in {what}")))
        }
        Err(e) => Err(e.into()),
    }
}
