use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use madara::filters::{RecordFilter, StreamCipherFilter, NAME_ARG, RECORD_ARG};
use madara::record::types::{ALL_INTEGERS, ALL_TYPES};
use madara::{EvalSettings, KnowledgeBase, KnowledgeRecord, LoopbackNetwork, TransportSettings, UpdateStatus};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

fn pair(network: &LoopbackNetwork, a: TransportSettings, b: TransportSettings) -> (KnowledgeBase, KnowledgeBase) {
    init_tracing();
    let kb_a = KnowledgeBase::new();
    let kb_b = KnowledgeBase::new();
    network.attach(&kb_a, a).unwrap();
    network.attach(&kb_b, b).unwrap();
    (kb_a, kb_b)
}

fn shutdown(kbs: &[&KnowledgeBase]) {
    for kb in kbs {
        kb.close_transports().unwrap();
    }
}

#[test]
fn globals_propagate_and_locals_stay_home() {
    let network = LoopbackNetwork::new();
    let (a, b) = pair(&network, TransportSettings::default(), TransportSettings::default());

    a.set(".private", 1).unwrap();
    a.set("shared", 42).unwrap();
    assert!(eventually(|| b.get("shared").unwrap().to_integer() == 42));
    assert!(!b.exists(".private").unwrap());

    shutdown(&[&a, &b]);
}

#[test]
fn karl_evaluation_sends_one_batch() {
    let network = LoopbackNetwork::new();
    let (a, b) = pair(&network, TransportSettings::default(), TransportSettings::default());

    a.evaluate_str("agent.0.x = 3; agent.0.y = 4; agent.0.ready = 1", &EvalSettings::default())
        .unwrap();
    assert!(eventually(|| b.get("agent.0.ready").unwrap().is_true()));
    assert_eq!(b.get("agent.0.x").unwrap().to_integer(), 3);
    assert_eq!(b.get("agent.0.y").unwrap().to_integer(), 4);

    shutdown(&[&a, &b]);
}

#[test]
fn received_quality_outranks_local_writers() {
    let network = LoopbackNetwork::new();
    let (a, b) = pair(&network, TransportSettings::default(), TransportSettings::default());

    a.set_write_quality("leader", 5).unwrap();
    a.set("leader", "agent-a").unwrap();
    assert!(eventually(|| b.get("leader").unwrap().to_string() == "agent-a"));

    assert_eq!(b.set("leader", "agent-b").unwrap(), UpdateStatus::Rejected);
    assert_eq!(b.get("leader").unwrap().to_string(), "agent-a");

    b.set_write_quality("leader", 9).unwrap();
    assert_eq!(b.set("leader", "agent-b").unwrap(), UpdateStatus::Applied);
    assert!(eventually(|| a.get("leader").unwrap().to_string() == "agent-b"));

    shutdown(&[&a, &b]);
}

#[test]
fn later_clocks_win_at_equal_quality() {
    let network = LoopbackNetwork::new();
    let (a, b) = pair(&network, TransportSettings::default(), TransportSettings::default());

    for i in 1..=5 {
        a.set("counter", i).unwrap();
    }
    assert!(eventually(|| b.get("counter").unwrap().to_integer() == 5));
    assert!(b.context().clock().unwrap() >= 5);

    shutdown(&[&a, &b]);
}

#[test]
fn send_filters_drop_and_rewrite_records() {
    let mut send = TransportSettings::default();
    let hide: RecordFilter = Arc::new(|args, _| {
        if args[NAME_ARG].to_string().starts_with("secret.") {
            KnowledgeRecord::new()
        } else {
            args[RECORD_ARG].clone()
        }
    });
    send.send_filters.add(ALL_TYPES, hide);

    let network = LoopbackNetwork::new();
    let (a, b) = pair(&network, send, TransportSettings::default());

    a.evaluate_str("secret.code = 1234; public.code = 1", &EvalSettings::default())
        .unwrap();
    assert!(eventually(|| b.exists("public.code").unwrap()));
    assert!(!b.exists("secret.code").unwrap());

    shutdown(&[&a, &b]);
}

#[test]
fn receive_filters_transform_incoming_records() {
    let mut receive = TransportSettings::default();
    let scale: RecordFilter = Arc::new(|args, vars| {
        vars.inc("received.count");
        &args[RECORD_ARG] * &KnowledgeRecord::from(100)
    });
    receive.receive_filters.add(ALL_INTEGERS, scale);

    let network = LoopbackNetwork::new();
    let (a, b) = pair(&network, TransportSettings::default(), receive);

    a.set("meters", 3).unwrap();
    assert!(eventually(|| b.get("meters").unwrap().to_integer() == 300));
    assert_eq!(b.get("received.count").unwrap().to_integer(), 1);

    shutdown(&[&a, &b]);
}

#[test]
fn encrypted_peers_only_understand_a_shared_passphrase() {
    let with_passphrase = |passphrase: &str| {
        let mut settings = TransportSettings::default();
        settings.send_filters.add_buffer(Arc::new(StreamCipherFilter::new(passphrase)));
        settings.receive_filters.add_buffer(Arc::new(StreamCipherFilter::new(passphrase)));
        settings
    };

    let network = LoopbackNetwork::new();
    let (a, b) = pair(&network, with_passphrase("alpha"), with_passphrase("alpha"));
    let outsider = KnowledgeBase::new();
    network.attach(&outsider, with_passphrase("bravo")).unwrap();

    a.set("orders", "hold position").unwrap();
    assert!(eventually(|| b.get("orders").unwrap().to_string() == "hold position"));

    thread::sleep(Duration::from_millis(100));
    assert!(!outsider.exists("orders").unwrap());

    shutdown(&[&a, &b, &outsider]);
}

#[test]
fn domains_partition_the_network() {
    let network = LoopbackNetwork::new();
    let other = TransportSettings {
        domain: "convoy".to_string(),
        ..TransportSettings::default()
    };
    let (a, b) = pair(&network, TransportSettings::default(), other);
    let c = KnowledgeBase::new();
    network.attach(&c, TransportSettings::default()).unwrap();

    a.set("status", 1).unwrap();
    assert!(eventually(|| c.exists("status").unwrap()));
    thread::sleep(Duration::from_millis(100));
    assert!(!b.exists("status").unwrap());

    shutdown(&[&a, &b, &c]);
}

#[test]
fn bandwidth_is_tracked_on_both_ends() {
    let network = LoopbackNetwork::new();
    let a = KnowledgeBase::new();
    let b = KnowledgeBase::new();
    let sender = network.attach(&a, TransportSettings::default()).unwrap();
    let receiver = network.attach(&b, TransportSettings::default()).unwrap();

    for i in 0..20 {
        a.set(&format!("sample.{i}"), i).unwrap();
    }
    assert!(eventually(|| b.exists("sample.19").unwrap()));
    assert!(sender.send_bandwidth() > 0);
    assert!(receiver.receive_bandwidth() > 0);

    shutdown(&[&a, &b]);
}

#[test]
fn closed_transports_leave_the_network() {
    let network = LoopbackNetwork::new();
    let (a, b) = pair(&network, TransportSettings::default(), TransportSettings::default());
    assert_eq!(network.peers().unwrap().len(), 2);

    b.close_transports().unwrap();
    assert_eq!(b.transport_count().unwrap(), 0);
    assert_eq!(network.peers().unwrap(), vec![a.id().to_string()]);

    a.set("after.close", 1).unwrap();
    thread::sleep(Duration::from_millis(100));
    assert!(!b.exists("after.close").unwrap());

    shutdown(&[&a]);
}
