//! Property-based tests for the metadata record codecs.
//!
//! Every record type must round-trip through its encoder and decoder in
//! both archive versions. Version 2 carries second/microsecond
//! timestamps, so the strategies constrain stamps to what that encoding
//! can represent.

use metalog::format::record::{
    decode_desc, decode_indom, decode_labels, decode_text, encode_desc, encode_indom,
    encode_labels, encode_text,
};
use metalog::format::{
    HEADER_SIZE, TEXT_DIRECT, TEXT_HELP, TEXT_INDOM, TEXT_ONELINE, TEXT_PMID, TRAILER_SIZE,
};
use metalog::{Catalog, Instance, Label, LabelSet, LogVersion, MetricDesc, Stamp, Units};
use proptest::prelude::*;

fn payload_of(record: &[u8]) -> &[u8] {
    &record[HEADER_SIZE..record.len() - TRAILER_SIZE]
}

fn stamp_v3_strategy() -> impl Strategy<Value = Stamp> {
    (any::<i64>(), 0i32..1_000_000_000).prop_map(|(sec, nsec)| Stamp::new(sec, nsec))
}

/// Stamps a version 2 timeval can represent exactly.
fn stamp_v2_strategy() -> impl Strategy<Value = Stamp> {
    (i32::MIN as i64..=i32::MAX as i64, 0i32..1_000_000)
        .prop_map(|(sec, usec)| Stamp::new(sec, usec * 1000))
}

fn units_strategy() -> impl Strategy<Value = Units> {
    (-8i8..8, -8i8..8, -8i8..8, 0u8..16, 0u8..16, -8i8..8).prop_map(
        |(dim_space, dim_time, dim_count, scale_space, scale_time, scale_count)| {
            Units::new(dim_space, dim_time, dim_count, scale_space, scale_time, scale_count)
        },
    )
}

fn desc_strategy() -> impl Strategy<Value = MetricDesc> {
    (any::<u32>(), 0i32..7, 1i32..5, any::<u32>(), units_strategy()).prop_map(
        |(pmid, data_type, sem, indom, units)| MetricDesc {
            pmid,
            data_type,
            sem,
            indom,
            units,
        },
    )
}

fn metric_names_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(
        prop::collection::vec("[a-z][a-z0-9_]{0,7}", 1..4).prop_map(|parts| parts.join(".")),
        0..4,
    )
}

fn instances_strategy() -> impl Strategy<Value = Vec<Instance>> {
    prop::collection::vec(
        (any::<i32>(), "[a-z0-9 ]{1,12}").prop_map(|(id, name)| Instance::new(id, name)),
        0..10,
    )
}

/// Builds a label set whose offsets index a JSON buffer assembled from
/// the given pairs, the way the label writers lay it out.
fn build_set(inst: i32, pairs: &[(String, String)]) -> LabelSet {
    let mut json = Vec::new();
    let mut labels = Vec::new();
    json.push(b'{');
    for (i, (name, value)) in pairs.iter().enumerate() {
        if i > 0 {
            json.push(b',');
        }
        json.push(b'"');
        let name_off = json.len() as u16;
        json.extend_from_slice(name.as_bytes());
        json.extend_from_slice(b"\":");
        let value_off = json.len() as u16;
        json.extend_from_slice(value.as_bytes());
        labels.push(Label {
            name: name_off,
            namelen: name.len() as u16,
            value: value_off,
            valuelen: value.len() as u16,
            flags: 0,
        });
    }
    json.push(b'}');
    LabelSet::new(inst, json, labels)
}

fn label_sets_strategy() -> impl Strategy<Value = Vec<LabelSet>> {
    prop::collection::vec(
        (
            any::<i32>(),
            prop::collection::vec(("[a-z]{1,8}", "[0-9]{1,4}"), 0..4),
        )
            .prop_map(|(inst, pairs)| build_set(inst, &pairs)),
        0..4,
    )
}

fn text_kind_strategy() -> impl Strategy<Value = u32> {
    (
        prop_oneof![
            Just(TEXT_ONELINE),
            Just(TEXT_HELP),
            Just(TEXT_ONELINE | TEXT_HELP)
        ],
        prop_oneof![Just(TEXT_PMID), Just(TEXT_INDOM)],
        any::<bool>(),
    )
        .prop_map(|(content, ident, direct)| {
            content | ident | if direct { TEXT_DIRECT } else { 0 }
        })
}

proptest! {
    #[test]
    fn test_desc_roundtrip_proptest(desc in desc_strategy(), names in metric_names_strategy()) {
        let name_refs: Vec<&str> = names.iter().map(|n| n.as_str()).collect();
        let record = encode_desc(&desc, &name_refs);
        let decoded = decode_desc(payload_of(&record)).unwrap();
        prop_assert_eq!(decoded.desc, desc);
        prop_assert_eq!(decoded.names, names);
    }

    #[test]
    fn test_indom_v3_roundtrip_proptest(
        indom in any::<u32>(),
        stamp in stamp_v3_strategy(),
        instances in instances_strategy(),
    ) {
        let record = encode_indom(LogVersion::V3, indom, &stamp, &instances);
        let decoded = decode_indom(payload_of(&record), LogVersion::V3).unwrap();
        prop_assert_eq!(decoded.indom, indom);
        prop_assert_eq!(decoded.stamp, stamp);
        prop_assert_eq!(decoded.instances, instances);
    }

    #[test]
    fn test_indom_v2_roundtrip_proptest(
        indom in any::<u32>(),
        stamp in stamp_v2_strategy(),
        instances in instances_strategy(),
    ) {
        let record = encode_indom(LogVersion::V2, indom, &stamp, &instances);
        let decoded = decode_indom(payload_of(&record), LogVersion::V2).unwrap();
        prop_assert_eq!(decoded.stamp, stamp);
        prop_assert_eq!(decoded.instances, instances);
    }

    #[test]
    fn test_labels_roundtrip_proptest(
        kind in 0u32..64,
        ident in any::<u32>(),
        stamp in stamp_v3_strategy(),
        sets in label_sets_strategy(),
    ) {
        let record = encode_labels(LogVersion::V3, kind, ident, &stamp, &sets);
        let decoded = decode_labels(payload_of(&record), LogVersion::V3).unwrap();
        prop_assert_eq!(decoded.kind, kind);
        prop_assert_eq!(decoded.ident, ident);
        prop_assert_eq!(decoded.stamp, stamp);
        prop_assert_eq!(decoded.sets, sets);
    }

    #[test]
    fn test_labels_v2_roundtrip_proptest(
        stamp in stamp_v2_strategy(),
        sets in label_sets_strategy(),
    ) {
        let record = encode_labels(LogVersion::V2, 4, 42, &stamp, &sets);
        let decoded = decode_labels(payload_of(&record), LogVersion::V2).unwrap();
        prop_assert_eq!(decoded.stamp, stamp);
        prop_assert_eq!(decoded.sets, sets);
    }

    #[test]
    fn test_text_roundtrip_proptest(
        kind in text_kind_strategy(),
        ident in any::<u32>(),
        text in "[ -~]{0,64}",
    ) {
        let record = encode_text(kind, ident, &text);
        let decoded = decode_text(payload_of(&record)).unwrap().unwrap();
        prop_assert_eq!(decoded.kind, kind);
        prop_assert_eq!(decoded.ident, ident);
        prop_assert_eq!(decoded.text, text);
    }

    #[test]
    fn test_framing_invariant_proptest(desc in desc_strategy(), names in metric_names_strategy()) {
        let name_refs: Vec<&str> = names.iter().map(|n| n.as_str()).collect();
        let record = encode_desc(&desc, &name_refs);
        let header = u32::from_be_bytes(record[0..4].try_into().unwrap());
        let trailer = u32::from_be_bytes(record[record.len() - 4..].try_into().unwrap());
        prop_assert_eq!(header, trailer);
        prop_assert_eq!(header as usize, record.len());
    }

    /// A stream of well-formed descriptor records always loads, however
    /// the names collide; name conflicts degrade, they do not reject.
    #[test]
    fn test_desc_stream_loads_proptest(
        names in prop::collection::vec(metric_names_strategy(), 1..5),
    ) {
        let mut bytes = Vec::new();
        for (i, names) in names.iter().enumerate() {
            let desc = MetricDesc {
                pmid: i as u32 + 1,
                data_type: 1,
                sem: 3,
                indom: 0xffff_ffff,
                units: Units::default(),
            };
            let name_refs: Vec<&str> = names.iter().map(|n| n.as_str()).collect();
            bytes.extend(encode_desc(&desc, &name_refs));
        }

        let mut catalog = Catalog::new();
        catalog.load(&mut std::io::Cursor::new(bytes)).unwrap();
        prop_assert_eq!(catalog.metric_count(), names.len());
    }
}
