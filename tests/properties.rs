use std::sync::Arc;

use madara::filters::{ChecksumFilter, StreamCipherFilter, XorBufferFilter};
use madara::{
    KnowledgeRecord, KnowledgeRecordFilters, KnowledgeReferenceSettings, KnowledgeUpdateSettings, ThreadSafeContext,
    UpdateStatus,
};
use proptest::prelude::*;

const READ: KnowledgeReferenceSettings = KnowledgeReferenceSettings::DEFAULT;
const WRITE: KnowledgeUpdateSettings = KnowledgeUpdateSettings::DEFAULT;

fn arithmetic() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        (0i64..50).prop_map(|n| n.to_string()),
        prop_oneof![Just("a"), Just("b"), Just("c")].prop_map(str::to_string),
    ];
    leaf.prop_recursive(4, 24, 2, |inner| {
        (inner.clone(), prop_oneof![Just("+"), Just("-"), Just("*")], inner)
            .prop_map(|(l, op, r)| format!("({l} {op} {r})"))
    })
}

proptest! {
    #[test]
    fn quality_gate_matches_write_quality(writes in prop::collection::vec((0u32..5, any::<i32>()), 1..20)) {
        let context = ThreadSafeContext::new();
        let mut stored_quality = 0u32;
        let mut stored_value: Option<i32> = None;

        for (quality, value) in writes {
            context.set_write_quality("x", quality, &READ).unwrap();
            let status = context.set("x", value, &WRITE).unwrap();
            if quality < stored_quality {
                prop_assert_eq!(status, UpdateStatus::Rejected);
            } else {
                prop_assert_eq!(status, UpdateStatus::Applied);
                stored_quality = quality;
                stored_value = Some(value);
            }
            prop_assert_eq!(context.get_quality("x", &READ).unwrap(), stored_quality);
        }
        let expected = stored_value.map_or(0, i64::from);
        prop_assert_eq!(context.get("x", &READ).unwrap().to_integer(), expected);
    }

    #[test]
    fn global_clock_never_moves_backwards(
        ops in prop::collection::vec((any::<bool>(), 0u64..100, 0u32..3), 1..40)
    ) {
        let context = ThreadSafeContext::new();
        let mut last = context.clock().unwrap();
        for (local, clock, quality) in ops {
            if local {
                context.set("v", 1, &WRITE).unwrap();
            } else {
                let mut record = KnowledgeRecord::from(2);
                record.clock = clock;
                record.quality = quality;
                context.update_record_from_external("v", &record, &WRITE).unwrap();
            }
            let now = context.clock().unwrap();
            prop_assert!(now >= last);
            prop_assert!(now >= context.variable_clock("v", &READ).unwrap());
            last = now;
        }
    }

    #[test]
    fn interpolated_keys_match_literal_keys(i in 0i64..1000, value in any::<i64>()) {
        let context = ThreadSafeContext::new();
        context.set(&format!("agent.{i}.speed"), value, &WRITE).unwrap();
        context.set(".i", i, &WRITE).unwrap();
        prop_assert_eq!(context.get("agent.{.i}.speed", &READ).unwrap().to_integer(), value);
    }

    #[test]
    fn pruning_preserves_results(source in arithmetic(), a in -20i64..20, b in -20i64..20, c in -20i64..20) {
        let context = ThreadSafeContext::new();
        context.set("a", a, &WRITE).unwrap();
        context.set("b", b, &WRITE).unwrap();
        context.set("c", c, &WRITE).unwrap();

        let mut raw = context.parse(&source).unwrap();
        let mut pruned = context.compile(&source).unwrap();
        let expected = context.evaluate(&mut raw, &WRITE).unwrap();
        let actual = context.evaluate(&mut pruned, &WRITE).unwrap();
        prop_assert_eq!(actual.to_integer(), expected.to_integer());
    }

    #[test]
    fn buffer_filter_chains_are_reversible(payload in prop::collection::vec(any::<u8>(), 0..512), key in prop::collection::vec(any::<u8>(), 0..8)) {
        let mut filters = KnowledgeRecordFilters::new();
        filters.add_buffer(Arc::new(XorBufferFilter::new(key)));
        filters.add_buffer(Arc::new(StreamCipherFilter::new("property")));
        filters.add_buffer(Arc::new(ChecksumFilter::new()));

        let mut buffer = payload.clone();
        filters.filter_encode(&mut buffer, 4096).unwrap();
        filters.filter_decode(&mut buffer, 4096).unwrap();
        prop_assert_eq!(buffer, payload);
    }
}
