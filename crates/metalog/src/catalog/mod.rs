//! The archive metadata catalog.
//!
//! A [`Catalog`] is the in-memory, indexed view of an archive's metadata
//! stream: metric descriptors and names, instance domain histories,
//! label histories and help text. It is populated by scanning the
//! metadata file ([`Catalog::load`]) and answers the time-scoped lookups
//! higher layers need ("which instances did this domain have at time
//! T?"). Several archives may be loaded into one catalog; the stores
//! keep their chains time-ordered and suppress the duplicates that
//! merged archives produce.
//!
//! [`ArchiveMeta`] couples a catalog with the archive's metadata file
//! handle and log version, adding the `put_*` writers that append
//! records to the file and update the in-memory stores in one step.
//!
//! # Concurrency
//!
//! The catalog is single-writer, multi-reader: loading and the `put_*`
//! writers need exclusive access, queries borrow shared. Nothing here
//! blocks beyond the supplied file handle.
//!
//! # Failure
//!
//! A failed load surfaces the first error and leaves the catalog
//! partially populated; callers are expected to discard it.

pub mod desc;
pub mod indom;
pub mod label;
pub mod text;

use crate::error::{MetaError, Result};
use crate::format::record;
use crate::format::{
    read_payload, Instance, LabelSet, LogVersion, MetricDesc, RecordHeader, RecordType, Stamp,
    FRAME_SIZE, TRAILER_SIZE,
};
use crate::names::NameTree;
use std::io::{Read, Seek, SeekFrom, Write};
use tracing::{debug, warn};

use desc::DescStore;
pub use indom::{IndomInsert, IndomSnapshot};
use indom::IndomStore;
pub use label::LabelGroup;
use label::LabelStore;
use text::TextStore;

/// In-memory indexed store of an archive's metadata.
#[derive(Debug, Default)]
pub struct Catalog {
    descs: DescStore,
    names: NameTree,
    indoms: IndomStore,
    labels: LabelStore,
    text: TextStore,
}

impl Catalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans a metadata stream from its current position and populates
    /// the catalog.
    ///
    /// The reader must be positioned just past the archive label block.
    /// Scanning stops cleanly at end of file on a record boundary. May
    /// be called once per archive on the same catalog to merge several
    /// archives; each call runs the duplicate-label sweep and re-indexes
    /// the name tree when it finishes.
    ///
    /// # Errors
    ///
    /// Returns [`MetaError::LogRecord`] for malformed records (bad
    /// framing, truncated payloads, field limits, a trailer disagreeing
    /// with its header, or an archive with no metric descriptors) and
    /// the descriptor conflict errors for metrics that change identity
    /// mid-stream. On error the catalog holds whatever was loaded up to
    /// that point and should be discarded.
    pub fn load<R: Read + Seek>(&mut self, reader: &mut R) -> Result<()> {
        let mut nmetrics = 0usize;

        while let Some(header) = RecordHeader::read_from(reader)? {
            if (header.len as usize) < FRAME_SIZE {
                return Err(MetaError::LogRecord(format!(
                    "record length {} below framing minimum",
                    header.len
                )));
            }
            let rlen = header.len as usize - FRAME_SIZE;
            let rtype = RecordType::from_u32(header.rtype);
            debug!(
                len = header.len,
                rtype = rtype.map_or("BAD", RecordType::name),
                "metadata record"
            );

            match rtype {
                Some(RecordType::Desc) => {
                    let payload = read_payload(reader, rlen, "descriptor record")?;
                    let rec = record::decode_desc(&payload)?;
                    nmetrics += 1;
                    self.add_desc(&rec.desc)?;
                    for name in &rec.names {
                        self.add_name(rec.desc.pmid, name)?;
                    }
                }
                Some(rt @ (RecordType::Indom | RecordType::IndomV2)) => {
                    let version = match rt {
                        RecordType::IndomV2 => LogVersion::V2,
                        _ => LogVersion::V3,
                    };
                    let payload = read_payload(reader, rlen, "instance domain record")?;
                    let rec = record::decode_indom(&payload, version)?;
                    // records without instances carry nothing to index
                    if !rec.instances.is_empty() {
                        self.add_indom(rec.indom, rec.stamp, rec.instances);
                    }
                }
                Some(rt @ (RecordType::Label | RecordType::LabelV2)) => {
                    let version = match rt {
                        RecordType::LabelV2 => LogVersion::V2,
                        _ => LogVersion::V3,
                    };
                    let payload = read_payload(reader, rlen, "label record")?;
                    let rec = record::decode_labels(&payload, version)?;
                    self.add_labels(rec.kind, rec.ident, rec.stamp, rec.sets);
                }
                Some(RecordType::Text) => {
                    let payload = read_payload(reader, rlen, "help text record")?;
                    match record::decode_text(&payload)? {
                        Some(rec) => self.add_text(rec.ident, rec.kind, &rec.text),
                        None => warn!("skipping help text record with bad type bits"),
                    }
                }
                Some(RecordType::IndomDelta) | None => {
                    if rtype.is_none() {
                        warn!(rtype = header.rtype, "skipping record of unknown type");
                    }
                    reader.seek(SeekFrom::Current(rlen as i64))?;
                }
            }

            let trailer = read_payload(reader, TRAILER_SIZE, "record trailer")?;
            let check = u32::from_be_bytes(trailer.as_slice().try_into().unwrap());
            if check != header.len {
                return Err(MetaError::LogRecord(format!(
                    "trailer length {check} differs from header length {}",
                    header.len
                )));
            }
        }

        self.check_dup_labels();

        if nmetrics == 0 {
            return Err(MetaError::LogRecord("no metric descriptors found".into()));
        }
        self.names.normalize();
        Ok(())
    }

    /// Records a metric descriptor, verifying it against any earlier
    /// sighting of the same metric.
    pub fn add_desc(&mut self, desc: &MetricDesc) -> Result<()> {
        self.descs.insert(desc)
    }

    /// Binds a metric name to an identifier in the name tree.
    ///
    /// A name already bound to a different identifier is kept on its
    /// first binding and the error is downgraded: partial readability
    /// beats rejecting the archive.
    pub fn add_name(&mut self, pmid: u32, name: &str) -> Result<()> {
        match self.names.insert(name, pmid) {
            Err(MetaError::DuplicateName { name, existing }) => {
                warn!(name = %name, pmid, existing, "duplicate metric name, keeping first binding");
                Ok(())
            }
            other => other,
        }
    }

    /// Records an instance domain snapshot.
    pub fn add_indom(&mut self, indom: u32, stamp: Stamp, instances: Vec<Instance>) -> IndomInsert {
        self.indoms.insert(indom, stamp, instances)
    }

    /// Records a group of label sets.
    pub fn add_labels(&mut self, kind: u32, ident: u32, stamp: Stamp, sets: Vec<LabelSet>) {
        self.labels.insert(kind, ident, stamp, sets)
    }

    /// Records help text for a metric or instance domain.
    pub fn add_text(&mut self, ident: u32, kind: u32, text: &str) {
        self.text.insert(ident, kind, text)
    }

    /// Sweeps the label chains for duplicates between adjacent groups.
    ///
    /// [`Catalog::load`] runs this automatically; callers appending
    /// label records incrementally run it once the chains are stable.
    pub fn check_dup_labels(&mut self) {
        self.labels.dedup()
    }

    /// Returns the descriptor recorded for a metric.
    pub fn lookup_desc(&self, pmid: u32) -> Result<&MetricDesc> {
        self.descs
            .lookup(pmid)
            .ok_or(MetaError::MetricNotFound(pmid))
    }

    /// Returns the instance domain snapshot current at `stamp`, or the
    /// latest snapshot when no time is given.
    pub fn get_indom(&self, indom: u32, stamp: Option<&Stamp>) -> Result<&IndomSnapshot> {
        self.indoms
            .search(indom, stamp)
            .ok_or(MetaError::IndomNotFound(indom))
    }

    /// Resolves an instance name within the snapshot current at `stamp`.
    pub fn lookup_indom(&self, indom: u32, stamp: Option<&Stamp>, name: &str) -> Result<i32> {
        self.get_indom(indom, stamp)?
            .instance_by_name(name)
            .ok_or(MetaError::InstanceNotFound { indom })
    }

    /// Resolves an instance identifier to its name within the snapshot
    /// current at `stamp`.
    pub fn name_in_indom(&self, indom: u32, stamp: Option<&Stamp>, inst: i32) -> Result<&str> {
        self.get_indom(indom, stamp)?
            .name_of(inst)
            .ok_or(MetaError::InstanceNotFound { indom })
    }

    /// Resolves an instance name against every snapshot of an instance
    /// domain, newest first.
    pub fn lookup_indom_archive(&self, indom: u32, name: &str) -> Result<i32> {
        let chain = self
            .indoms
            .chain(indom)
            .ok_or(MetaError::IndomNotFound(indom))?;
        chain
            .iter()
            .find_map(|snap| snap.instance_by_name(name))
            .ok_or(MetaError::InstanceNotFound { indom })
    }

    /// Resolves an instance identifier against every snapshot of an
    /// instance domain, newest first.
    pub fn name_in_indom_archive(&self, indom: u32, inst: i32) -> Result<&str> {
        let chain = self
            .indoms
            .chain(indom)
            .ok_or(MetaError::IndomNotFound(indom))?;
        chain
            .iter()
            .find_map(|snap| snap.name_of(inst))
            .ok_or(MetaError::InstanceNotFound { indom })
    }

    /// Returns the union of instances across all snapshots of an
    /// instance domain, first-seen name winning.
    pub fn get_indom_union(&self, indom: u32) -> Result<Vec<Instance>> {
        self.indoms
            .union(indom)
            .ok_or(MetaError::IndomNotFound(indom))
    }

    /// Returns the label sets current at `stamp` for a (type, ident)
    /// key. A known key whose groups are all newer than the requested
    /// time yields an empty slice.
    pub fn lookup_label(
        &self,
        kind: u32,
        ident: u32,
        stamp: Option<&Stamp>,
    ) -> Result<&[LabelSet]> {
        self.labels
            .lookup(kind, ident, stamp)
            .ok_or(MetaError::NoLabels { kind, ident })
    }

    /// Returns the help text recorded for an identifier.
    pub fn lookup_text(&self, ident: u32, kind: u32) -> Result<&str> {
        self.text
            .lookup(ident, kind)
            .ok_or(MetaError::TextNotFound { ident })
    }

    /// Returns the metric name tree.
    pub fn names(&self) -> &NameTree {
        &self.names
    }

    /// Returns the number of metrics with recorded descriptors.
    pub fn metric_count(&self) -> usize {
        self.descs.len()
    }
}

/// An archive's metadata file coupled with its in-memory catalog.
///
/// The `put_*` writers encode a record, append it to the file, then
/// update the catalog, so readers of this context observe what the next
/// load of the file would. The file handle must be positioned past the
/// archive label block before [`ArchiveMeta::load`] or the first write.
#[derive(Debug)]
pub struct ArchiveMeta<F> {
    file: F,
    version: LogVersion,
    catalog: Catalog,
}

impl<F: Read + Write + Seek> ArchiveMeta<F> {
    /// Opens an archive's metadata by scanning the file from its
    /// current position.
    pub fn load(mut file: F, version: LogVersion) -> Result<Self> {
        let mut catalog = Catalog::new();
        catalog.load(&mut file)?;
        Ok(Self {
            file,
            version,
            catalog,
        })
    }

    /// Wraps a fresh metadata file with an empty catalog, for archives
    /// being created.
    pub fn create(file: F, version: LogVersion) -> Self {
        Self {
            file,
            version,
            catalog: Catalog::new(),
        }
    }

    /// Returns the archive's log version.
    pub fn version(&self) -> LogVersion {
        self.version
    }

    /// Returns the catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Returns the catalog for direct mutation, e.g. to merge further
    /// archives or run the duplicate-label sweep after incremental
    /// writes.
    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    /// Consumes the handle, keeping the catalog.
    pub fn into_catalog(self) -> Catalog {
        self.catalog
    }

    /// Writes a descriptor record with its names and records it in the
    /// catalog.
    pub fn put_desc(&mut self, desc: &MetricDesc, names: &[&str]) -> Result<()> {
        let rec = record::encode_desc(desc, names);
        self.file.write_all(&rec)?;
        self.catalog.add_desc(desc)?;
        for name in names {
            self.catalog.add_name(desc.pmid, name)?;
        }
        Ok(())
    }

    /// Writes an instance domain record and records the snapshot in the
    /// catalog. Reports whether the snapshot was new or suppressed as a
    /// duplicate of one already in the chain.
    pub fn put_indom(
        &mut self,
        indom: u32,
        stamp: Stamp,
        instances: Vec<Instance>,
    ) -> Result<IndomInsert> {
        let rec = record::encode_indom(self.version, indom, &stamp, &instances);
        self.file.write_all(&rec)?;
        Ok(self.catalog.add_indom(indom, stamp, instances))
    }

    /// Writes a label record and records the sets in the catalog.
    ///
    /// Duplicate sets written at an already-recorded timestamp stay in
    /// memory until [`Catalog::check_dup_labels`] runs.
    pub fn put_labels(
        &mut self,
        kind: u32,
        ident: u32,
        stamp: Stamp,
        sets: Vec<LabelSet>,
    ) -> Result<()> {
        let rec = record::encode_labels(self.version, kind, ident, &stamp, &sets);
        self.file.write_all(&rec)?;
        self.catalog.add_labels(kind, ident, stamp, sets);
        Ok(())
    }

    /// Writes a help text record. With `cached` set the text is also
    /// recorded in the catalog; without it only the file is updated.
    pub fn put_text(&mut self, ident: u32, kind: u32, text: &str, cached: bool) -> Result<()> {
        let rec = record::encode_text(kind, ident, text);
        self.file.write_all(&rec)?;
        if cached {
            self.catalog.add_text(ident, kind, text);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{
        record::{encode_desc, encode_indom, encode_labels, encode_text},
        Label, Units, LABEL_INDOM, SEM_INSTANT, TEXT_HELP, TEXT_PMID, TYPE_U32,
    };
    use std::io::Cursor;

    fn desc(pmid: u32, indom: u32) -> MetricDesc {
        MetricDesc {
            pmid,
            data_type: TYPE_U32,
            sem: SEM_INSTANT,
            indom,
            units: Units::default(),
        }
    }

    fn insts(pairs: &[(i32, &str)]) -> Vec<Instance> {
        pairs.iter().map(|&(id, name)| Instance::new(id, name)).collect()
    }

    fn label_set(inst: i32, json: &str) -> LabelSet {
        let label = Label {
            name: 0,
            namelen: json.len() as u16,
            value: 0,
            valuelen: json.len() as u16,
            flags: 0,
        };
        LabelSet::new(inst, json.as_bytes().to_vec(), vec![label])
    }

    fn sample_archive() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend(encode_desc(&desc(1, 42), &["sample.one"]));
        bytes.extend(encode_desc(&desc(2, 42), &["sample.two", "sample.alias"]));
        bytes.extend(encode_indom(
            LogVersion::V3,
            42,
            &Stamp::new(10, 0),
            &insts(&[(0, "red"), (1, "green")]),
        ));
        bytes.extend(encode_labels(
            LogVersion::V3,
            LABEL_INDOM,
            42,
            &Stamp::new(10, 0),
            &[label_set(-1, "{\"device\":\"led\"}")],
        ));
        bytes.extend(encode_text(TEXT_HELP | TEXT_PMID, 1, "sample metric one"));
        bytes
    }

    #[test]
    fn test_load_sample_archive() {
        let mut catalog = Catalog::new();
        catalog.load(&mut Cursor::new(sample_archive())).unwrap();

        assert_eq!(catalog.metric_count(), 2);
        assert_eq!(catalog.lookup_desc(1).unwrap().indom, 42);
        assert_eq!(catalog.names().lookup("sample.two"), Some(2));
        assert_eq!(catalog.names().names_of(2).len(), 2);
        assert_eq!(catalog.get_indom(42, None).unwrap().instances.len(), 2);
        assert_eq!(
            catalog.lookup_label(LABEL_INDOM, 42, None).unwrap().len(),
            1
        );
        assert_eq!(
            catalog.lookup_text(1, TEXT_HELP | TEXT_PMID).unwrap(),
            "sample metric one"
        );
    }

    #[test]
    fn test_load_trailer_mismatch() {
        let mut bytes = sample_archive();
        // corrupt the final trailer
        let n = bytes.len();
        bytes[n - 4..].copy_from_slice(&0x40u32.to_be_bytes());
        let err = Catalog::new()
            .load(&mut Cursor::new(bytes))
            .unwrap_err();
        assert!(matches!(err, MetaError::LogRecord(_)));
    }

    #[test]
    fn test_load_skips_unknown_record_types() {
        let mut bytes = encode_desc(&desc(1, 42), &["sample.one"]);
        // a well-framed record of a type this catalog does not know
        let payload = [0xabu8; 6];
        let len = (payload.len() + FRAME_SIZE) as u32;
        bytes.extend(len.to_be_bytes());
        bytes.extend(99u32.to_be_bytes());
        bytes.extend(payload);
        bytes.extend(len.to_be_bytes());
        bytes.extend(encode_text(TEXT_HELP | TEXT_PMID, 1, "still readable"));

        let mut catalog = Catalog::new();
        catalog.load(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(
            catalog.lookup_text(1, TEXT_HELP | TEXT_PMID).unwrap(),
            "still readable"
        );
    }

    #[test]
    fn test_load_requires_descriptors() {
        let bytes = encode_text(TEXT_HELP | TEXT_PMID, 1, "text only");
        let err = Catalog::new()
            .load(&mut Cursor::new(bytes))
            .unwrap_err();
        assert!(matches!(err, MetaError::LogRecord(_)));
    }

    #[test]
    fn test_load_empty_stream() {
        let err = Catalog::new().load(&mut Cursor::new(Vec::new())).unwrap_err();
        assert!(matches!(err, MetaError::LogRecord(_)));
    }

    #[test]
    fn test_load_runs_label_dedup() {
        let shared = label_set(-1, "{\"device\":\"led\"}");
        let mut bytes = encode_desc(&desc(1, 42), &["sample.one"]);
        bytes.extend(encode_labels(
            LogVersion::V3,
            LABEL_INDOM,
            42,
            &Stamp::new(20, 0),
            &[shared.clone()],
        ));
        bytes.extend(encode_labels(
            LogVersion::V3,
            LABEL_INDOM,
            42,
            &Stamp::new(10, 0),
            &[shared.clone()],
        ));

        let mut catalog = Catalog::new();
        catalog.load(&mut Cursor::new(bytes)).unwrap();
        // only the older group survives the sweep
        let sets = catalog.lookup_label(LABEL_INDOM, 42, None).unwrap();
        assert_eq!(sets.len(), 1);
    }

    #[test]
    fn test_malformed_text_skipped_but_load_succeeds() {
        let mut bytes = encode_desc(&desc(1, 42), &["sample.one"]);
        // text record with no content bits
        bytes.extend(encode_text(TEXT_PMID, 1, "ignored"));

        let mut catalog = Catalog::new();
        catalog.load(&mut Cursor::new(bytes)).unwrap();
        assert!(catalog.lookup_text(1, TEXT_HELP | TEXT_PMID).is_err());
    }

    #[test]
    fn test_put_then_reload_roundtrip() {
        for version in [LogVersion::V2, LogVersion::V3] {
            let mut meta = ArchiveMeta::create(Cursor::new(Vec::new()), version);
            meta.put_desc(&desc(1, 42), &["sample.one"]).unwrap();
            let r = meta
                .put_indom(42, Stamp::new(10, 0), insts(&[(0, "red"), (1, "green")]))
                .unwrap();
            assert_eq!(r, IndomInsert::Added);
            let r = meta
                .put_indom(42, Stamp::new(10, 0), insts(&[(1, "green"), (0, "red")]))
                .unwrap();
            assert_eq!(r, IndomInsert::Duplicate);
            meta.put_labels(
                LABEL_INDOM,
                42,
                Stamp::new(10, 0),
                vec![label_set(-1, "{\"a\":1}")],
            )
            .unwrap();
            meta.put_text(1, TEXT_HELP | TEXT_PMID, "help", true).unwrap();
            assert_eq!(
                meta.catalog().lookup_text(1, TEXT_HELP | TEXT_PMID).unwrap(),
                "help"
            );

            // the duplicate indom was written twice but indexed once
            assert_eq!(meta.catalog().get_indom(42, None).unwrap().instances.len(), 2);

            let mut file = meta.file;
            file.set_position(0);
            let reloaded = ArchiveMeta::load(file, version).unwrap();
            assert_eq!(reloaded.catalog().metric_count(), 1);
            let chain_len = {
                let snap = reloaded.catalog().get_indom(42, None).unwrap();
                snap.instances.len()
            };
            assert_eq!(chain_len, 2);
            assert_eq!(
                reloaded.catalog().lookup_text(1, TEXT_HELP | TEXT_PMID).unwrap(),
                "help"
            );
        }
    }

    #[test]
    fn test_put_text_uncached() {
        let mut meta = ArchiveMeta::create(Cursor::new(Vec::new()), LogVersion::V3);
        meta.put_desc(&desc(1, 42), &["sample.one"]).unwrap();
        meta.put_text(1, TEXT_HELP | TEXT_PMID, "help", false).unwrap();
        assert!(meta.catalog().lookup_text(1, TEXT_HELP | TEXT_PMID).is_err());
    }
}
