use std::sync::Arc;

use madara::error::FilterError;
use madara::filters::{ChecksumFilter, RecordFilter, StreamCipherFilter, XorBufferFilter, DOMAIN_ARG, NAME_ARG, TOTAL_ARGUMENTS};
use madara::record::types::{ALL_INTEGERS, ALL_TYPES, STRING};
use madara::transport::TransportOperation;
use madara::{ContextState, KnowledgeMap, KnowledgeRecord, KnowledgeRecordFilters, TransportContext, Variables};

fn sending() -> TransportContext {
    TransportContext::new(TransportOperation::Sending, "KaRL", "agent-7")
}

fn filter(f: impl Fn(&mut Vec<KnowledgeRecord>, &mut Variables<'_>) -> KnowledgeRecord + Send + Sync + 'static) -> RecordFilter {
    Arc::new(f)
}

#[test]
fn chains_run_in_order_for_matching_types() {
    let mut filters = KnowledgeRecordFilters::new();
    filters.add(ALL_INTEGERS, filter(|args, _| &args[0] + &KnowledgeRecord::from(1)));
    filters.add(ALL_INTEGERS, filter(|args, _| &args[0] * &KnowledgeRecord::from(10)));
    filters.add(STRING, filter(|args, _| KnowledgeRecord::from(args[NAME_ARG].to_string())));

    let mut state = ContextState::default();
    let mut vars = Variables::new(&mut state);
    let mut transport = sending();

    let out = filters.filter(&KnowledgeRecord::from(4), "speed", &mut transport, &mut vars);
    assert_eq!(out.to_integer(), 50);

    let out = filters.filter(&KnowledgeRecord::from("x"), "label", &mut transport, &mut vars);
    assert_eq!(out.to_string(), "label");

    let out = filters.filter(&KnowledgeRecord::from(2.5), "ratio", &mut transport, &mut vars);
    assert!((out.to_double() - 2.5).abs() < f64::EPSILON);
    assert_eq!(filters.get_number_of_filtered_types(), 3);
}

#[test]
fn filters_see_transport_metadata_and_variables() {
    let mut filters = KnowledgeRecordFilters::new();
    filters.add(
        ALL_TYPES,
        filter(|args, vars| {
            vars.inc("filtered");
            KnowledgeRecord::from(args[DOMAIN_ARG].to_string())
        }),
    );

    let mut state = ContextState::default();
    let mut transport = sending();
    {
        let mut vars = Variables::new(&mut state);
        let out = filters.filter(&KnowledgeRecord::from(1), "x", &mut transport, &mut vars);
        assert_eq!(out.to_string(), "KaRL");
    }
    assert_eq!(state.get("filtered", &Default::default()).unwrap().to_integer(), 1);
}

#[test]
fn extra_records_ride_along_with_the_packet() {
    let mut filters = KnowledgeRecordFilters::new();
    filters.add(
        ALL_INTEGERS,
        filter(|args, _| {
            args.truncate(TOTAL_ARGUMENTS);
            args.push(KnowledgeRecord::from("sent.count"));
            args.push(KnowledgeRecord::from(1));
            args.push(KnowledgeRecord::from(7));
            args.push(KnowledgeRecord::from("ignored"));
            args[0].clone()
        }),
    );

    let mut state = ContextState::default();
    let mut vars = Variables::new(&mut state);
    let mut transport = sending();
    filters.filter(&KnowledgeRecord::from(3), "x", &mut transport, &mut vars);

    let records = transport.take_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records["sent.count"].to_integer(), 1);
}

#[test]
fn uncreated_result_means_drop_and_panics_are_skipped() {
    let mut filters = KnowledgeRecordFilters::new();
    filters.add(ALL_INTEGERS, filter(|_, _| panic!("bad filter")));
    filters.add(ALL_INTEGERS, filter(|args, _| {
        if args[0].to_integer() > 100 {
            KnowledgeRecord::new()
        } else {
            args[0].clone()
        }
    }));

    let mut state = ContextState::default();
    let mut vars = Variables::new(&mut state);
    let mut transport = sending();
    assert_eq!(filters.filter(&KnowledgeRecord::from(5), "x", &mut transport, &mut vars).to_integer(), 5);
    assert!(filters.filter(&KnowledgeRecord::from(500), "x", &mut transport, &mut vars).is_uncreated());
}

#[test]
fn aggregate_filters_edit_the_whole_batch() {
    let mut filters = KnowledgeRecordFilters::new();
    filters.add_aggregate(Arc::new(|records: &mut KnowledgeMap, transport: &TransportContext, _: &mut Variables<'_>| {
        records.retain(|name, _| !name.starts_with("secret"));
        records.insert("sender".to_string(), KnowledgeRecord::from(transport.originator()));
    }));

    let mut batch = KnowledgeMap::new();
    batch.insert("secret.key".to_string(), KnowledgeRecord::from(1));
    batch.insert("position".to_string(), KnowledgeRecord::from(2));

    let mut state = ContextState::default();
    let mut vars = Variables::new(&mut state);
    filters.filter_aggregate(&mut batch, &sending(), &mut vars);
    assert_eq!(batch.keys().cloned().collect::<Vec<_>>(), vec!["position", "sender"]);
    assert_eq!(batch["sender"].to_string(), "agent-7");
}

#[test]
fn buffer_filters_encode_forward_and_decode_in_reverse() {
    let mut filters = KnowledgeRecordFilters::new();
    filters.add_buffer(Arc::new(XorBufferFilter::new(vec![0xaa])));
    filters.add_buffer(Arc::new(ChecksumFilter::new()));

    let mut buffer = b"abc".to_vec();
    assert_eq!(filters.filter_encode(&mut buffer, 64).unwrap(), 7);
    assert_eq!(hex::encode(&buffer), "cbc8c9e1872083");

    assert_eq!(filters.filter_decode(&mut buffer, 64).unwrap(), 3);
    assert_eq!(buffer, b"abc");
}

#[test]
fn tampered_buffers_are_rejected() {
    let mut filters = KnowledgeRecordFilters::new();
    filters.add_buffer(Arc::new(StreamCipherFilter::new("shared secret")));
    filters.add_buffer(Arc::new(ChecksumFilter::new()));

    let plain = br#"{"x":1}"#.to_vec();
    let mut buffer = plain.clone();
    filters.filter_encode(&mut buffer, 1024).unwrap();
    assert_ne!(buffer[..plain.len()], plain[..]);

    let mut copy = buffer.clone();
    filters.filter_decode(&mut copy, 1024).unwrap();
    assert_eq!(copy, plain);

    buffer[0] ^= 1;
    let err = filters.filter_decode(&mut buffer, 1024).unwrap_err();
    assert!(matches!(err, FilterError::Corrupted { .. }));
}

#[test]
fn oversized_buffers_are_refused() {
    let mut filters = KnowledgeRecordFilters::new();
    filters.add_buffer(Arc::new(ChecksumFilter::new()));
    let mut buffer = vec![0u8; 10];
    let err = filters.filter_encode(&mut buffer, 12).unwrap_err();
    assert!(matches!(err, FilterError::BufferTooLarge { size: 14, max_size: 12, .. }));
}
