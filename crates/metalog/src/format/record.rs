//! Payload codecs for the individual metadata record types.
//!
//! Decoders operate on a record's payload slice (framing already
//! stripped) and validate the size limits the on-disk format imposes;
//! any violation is a [`MetaError::LogRecord`] and aborts the load.
//! Encoders produce complete framed records, trailer included, ready for
//! a single write to the metadata file.

use crate::error::{MetaError, Result};
use crate::format::{
    Instance, Label, LabelSet, LogVersion, MetricDesc, RecordType, Stamp, Units, FRAME_SIZE,
    LABEL_SIZE, MAX_LABELS_PER_SET, MAX_LABEL_JSON_LEN, TEXT_HELP, TEXT_INDOM, TEXT_ONELINE,
    TEXT_PMID,
};

/// A decoded descriptor record: the descriptor plus its metric names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescRecord {
    /// The metric descriptor.
    pub desc: MetricDesc,
    /// Names bound to the metric in the namespace.
    pub names: Vec<String>,
}

/// A decoded instance domain record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndomRecord {
    /// Instance domain identifier.
    pub indom: u32,
    /// Observation time of this snapshot.
    pub stamp: Stamp,
    /// Instances; empty when the record carried none (or an error count).
    pub instances: Vec<Instance>,
}

/// A decoded label record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRecord {
    /// Label type bits.
    pub kind: u32,
    /// Identifier the label sets apply to.
    pub ident: u32,
    /// Observation time of these label sets.
    pub stamp: Stamp,
    /// The label sets.
    pub sets: Vec<LabelSet>,
}

/// A decoded help text record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRecord {
    /// Text type bits.
    pub kind: u32,
    /// Metric or instance domain identifier.
    pub ident: u32,
    /// The help text.
    pub text: String,
}

/// Bounds-checked cursor over a record payload.
struct PayloadCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PayloadCursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(MetaError::LogRecord(format!("truncated {what}")));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        let b = self.take(4, what)?;
        Ok(u32::from_be_bytes(b.try_into().unwrap()))
    }

    fn i32(&mut self, what: &str) -> Result<i32> {
        let b = self.take(4, what)?;
        Ok(i32::from_be_bytes(b.try_into().unwrap()))
    }

    fn stamp(&mut self, version: LogVersion) -> Result<Stamp> {
        match version {
            LogVersion::V2 => {
                let b = self.take(8, "timestamp")?;
                Ok(Stamp::from_timeval_bytes(b.try_into().unwrap()))
            }
            LogVersion::V3 => {
                let b = self.take(12, "timestamp")?;
                Ok(Stamp::from_timestamp_bytes(b.try_into().unwrap()))
            }
        }
    }
}

fn utf8(bytes: &[u8], what: &str) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| MetaError::LogRecord(format!("invalid UTF-8 in {what}")))
}

/// Decodes a DESC payload.
pub fn decode_desc(payload: &[u8]) -> Result<DescRecord> {
    let mut cur = PayloadCursor::new(payload);

    let desc = MetricDesc {
        pmid: cur.u32("descriptor")?,
        data_type: cur.i32("descriptor")?,
        sem: cur.i32("descriptor")?,
        indom: cur.u32("descriptor")?,
        units: Units::from_bits(cur.u32("descriptor")?),
    };

    let numnames = cur.u32("name count")? as usize;
    // each name needs at least its length prefix
    if numnames * 4 > cur.remaining() {
        return Err(MetaError::LogRecord(format!(
            "implausible name count {numnames}"
        )));
    }

    let mut names = Vec::with_capacity(numnames);
    for _ in 0..numnames {
        let nlen = cur.u32("name length")? as usize;
        let bytes = cur.take(nlen, "metric name")?;
        names.push(utf8(bytes, "metric name")?);
    }

    Ok(DescRecord { desc, names })
}

/// Encodes a DESC record, framing included.
pub fn encode_desc(desc: &MetricDesc, names: &[&str]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(24 + names.iter().map(|n| 4 + n.len()).sum::<usize>());
    payload.extend_from_slice(&desc.pmid.to_be_bytes());
    payload.extend_from_slice(&desc.data_type.to_be_bytes());
    payload.extend_from_slice(&desc.sem.to_be_bytes());
    payload.extend_from_slice(&desc.indom.to_be_bytes());
    payload.extend_from_slice(&desc.units.to_bits().to_be_bytes());
    payload.extend_from_slice(&(names.len() as u32).to_be_bytes());
    for name in names {
        payload.extend_from_slice(&(name.len() as u32).to_be_bytes());
        payload.extend_from_slice(name.as_bytes());
    }
    frame(RecordType::Desc, &payload)
}

/// Decodes an INDOM or INDOM_V2 payload.
pub fn decode_indom(payload: &[u8], version: LogVersion) -> Result<IndomRecord> {
    let mut cur = PayloadCursor::new(payload);

    let stamp = cur.stamp(version)?;
    let indom = cur.u32("instance domain")?;
    let numinst = cur.i32("instance count")?;

    // numinst <= 0 carries no instances, or an embedded error code; the
    // caller discards such snapshots either way.
    if numinst <= 0 {
        return Ok(IndomRecord {
            indom,
            stamp,
            instances: Vec::new(),
        });
    }

    let n = numinst as usize;
    if n * 8 > cur.remaining() {
        return Err(MetaError::LogRecord(format!(
            "implausible instance count {numinst}"
        )));
    }

    let mut ids = Vec::with_capacity(n);
    for _ in 0..n {
        ids.push(cur.i32("instance identifier")?);
    }
    let mut offsets = Vec::with_capacity(n);
    for _ in 0..n {
        offsets.push(cur.u32("instance name offset")? as usize);
    }

    let strings = cur.rest();
    let mut instances = Vec::with_capacity(n);
    for (id, off) in ids.into_iter().zip(offsets) {
        if off >= strings.len() {
            return Err(MetaError::LogRecord(format!(
                "instance name offset {off} beyond record"
            )));
        }
        let tail = &strings[off..];
        let end = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| MetaError::LogRecord("unterminated instance name".into()))?;
        instances.push(Instance::new(id, utf8(&tail[..end], "instance name")?));
    }

    Ok(IndomRecord {
        indom,
        stamp,
        instances,
    })
}

/// Encodes an INDOM record, framing included.
///
/// Version 3 archives get an INDOM record with the wide timestamp,
/// version 2 archives an INDOM_V2 record with the timeval form.
pub fn encode_indom(
    version: LogVersion,
    indom: u32,
    stamp: &Stamp,
    instances: &[Instance],
) -> Vec<u8> {
    let mut payload = Vec::new();
    let rtype = match version {
        LogVersion::V2 => {
            payload.extend_from_slice(&stamp.to_timeval_bytes());
            RecordType::IndomV2
        }
        LogVersion::V3 => {
            payload.extend_from_slice(&stamp.to_timestamp_bytes());
            RecordType::Indom
        }
    };
    payload.extend_from_slice(&indom.to_be_bytes());
    payload.extend_from_slice(&(instances.len() as i32).to_be_bytes());

    for inst in instances {
        payload.extend_from_slice(&inst.id.to_be_bytes());
    }
    // name offsets are relative to the start of the packed string section
    let mut off = 0u32;
    for inst in instances {
        payload.extend_from_slice(&off.to_be_bytes());
        off += inst.name.len() as u32 + 1;
    }
    for inst in instances {
        payload.extend_from_slice(inst.name.as_bytes());
        payload.push(0);
    }

    frame(rtype, &payload)
}

/// Decodes a LABEL or LABEL_V2 payload.
pub fn decode_labels(payload: &[u8], version: LogVersion) -> Result<LabelRecord> {
    let mut cur = PayloadCursor::new(payload);

    let stamp = cur.stamp(version)?;
    let kind = cur.u32("label type")?;
    let ident = cur.u32("label ident")?;
    let nsets = cur.u32("label set count")? as usize;

    // every set carries at least inst, jsonlen and nlabels
    if nsets * 12 > cur.remaining() {
        return Err(MetaError::LogRecord(format!(
            "implausible label set count {nsets}"
        )));
    }

    let mut sets = Vec::with_capacity(nsets);
    for _ in 0..nsets {
        let inst = cur.i32("label instance")?;

        let jsonlen = cur.i32("label JSON length")?;
        if jsonlen < 0 || jsonlen as usize > MAX_LABEL_JSON_LEN {
            return Err(MetaError::LogRecord(format!(
                "corrupted JSON in labelset, jsonlen={jsonlen}"
            )));
        }
        let json = cur.take(jsonlen as usize, "label JSON")?.to_vec();

        let nlabels = cur.i32("label count")?;
        let mut labels = Vec::new();
        // nlabels < 0 is an embedded error code, carried without labels
        if nlabels > 0 {
            let n = nlabels as usize;
            if n > MAX_LABELS_PER_SET || n * LABEL_SIZE > cur.remaining() {
                return Err(MetaError::LogRecord(format!(
                    "corrupted labelset, nlabels={nlabels}"
                )));
            }
            labels.reserve(n);
            for _ in 0..n {
                let b = cur.take(LABEL_SIZE, "label")?;
                labels.push(Label::from_bytes(b.try_into().unwrap()));
            }
        }

        sets.push(LabelSet::new(inst, json, labels));
    }

    Ok(LabelRecord {
        kind,
        ident,
        stamp,
        sets,
    })
}

/// Encodes a LABEL record, framing included.
pub fn encode_labels(
    version: LogVersion,
    kind: u32,
    ident: u32,
    stamp: &Stamp,
    sets: &[LabelSet],
) -> Vec<u8> {
    let mut payload = Vec::new();
    let rtype = match version {
        LogVersion::V2 => {
            payload.extend_from_slice(&stamp.to_timeval_bytes());
            RecordType::LabelV2
        }
        LogVersion::V3 => {
            payload.extend_from_slice(&stamp.to_timestamp_bytes());
            RecordType::Label
        }
    };
    payload.extend_from_slice(&kind.to_be_bytes());
    payload.extend_from_slice(&ident.to_be_bytes());
    payload.extend_from_slice(&(sets.len() as u32).to_be_bytes());

    for set in sets {
        payload.extend_from_slice(&set.inst.to_be_bytes());
        payload.extend_from_slice(&(set.json.len() as i32).to_be_bytes());
        payload.extend_from_slice(&set.json);
        payload.extend_from_slice(&(set.labels.len() as i32).to_be_bytes());
        for label in &set.labels {
            payload.extend_from_slice(&label.to_bytes());
        }
    }

    frame(rtype, &payload)
}

/// Decodes a TEXT payload.
///
/// Returns `Ok(None)` for records whose type bits are malformed; such
/// records are skipped rather than failing the load, since archives in
/// the wild contain them. The type must carry at least one content bit
/// (oneline or help) and exactly one identifier bit (pmid or indom).
pub fn decode_text(payload: &[u8]) -> Result<Option<TextRecord>> {
    let mut cur = PayloadCursor::new(payload);

    let kind = cur.u32("text type")?;
    let ident = cur.u32("text ident")?;

    if kind & (TEXT_ONELINE | TEXT_HELP) == 0 {
        return Ok(None);
    }
    if (kind & TEXT_PMID != 0) == (kind & TEXT_INDOM != 0) {
        return Ok(None);
    }

    let rest = cur.rest();
    let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
    let text = utf8(&rest[..end], "help text")?;

    Ok(Some(TextRecord { kind, ident, text }))
}

/// Encodes a TEXT record, framing included.
pub fn encode_text(kind: u32, ident: u32, text: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(8 + text.len() + 1);
    payload.extend_from_slice(&kind.to_be_bytes());
    payload.extend_from_slice(&ident.to_be_bytes());
    payload.extend_from_slice(text.as_bytes());
    payload.push(0);
    frame(RecordType::Text, &payload)
}

/// Wraps a payload in the record framing: header, payload, trailer.
fn frame(rtype: RecordType, payload: &[u8]) -> Vec<u8> {
    let len = (payload.len() + FRAME_SIZE) as u32;
    let mut buf = Vec::with_capacity(len as usize);
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&(rtype as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&len.to_be_bytes());
    buf
}
