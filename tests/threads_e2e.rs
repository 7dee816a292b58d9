use std::thread;
use std::time::{Duration, Instant};

use madara::threads::ThreaderConfig;
use madara::{BaseThread, KnowledgeBase, Threader};

struct Counter {
    key: &'static str,
    data: Option<KnowledgeBase>,
}

impl Counter {
    fn boxed(key: &'static str) -> Box<Self> {
        Box::new(Self { key, data: None })
    }
}

impl BaseThread for Counter {
    fn init(&mut self, data: &KnowledgeBase) {
        data.set(&format!("{}.init", self.key), 1).unwrap();
        self.data = Some(data.clone());
    }

    fn run(&mut self) {
        if let Some(data) = &self.data {
            data.inc(self.key).unwrap();
        }
    }

    fn cleanup(&mut self) {
        if let Some(data) = &self.data {
            data.set(&format!("{}.cleanup", self.key), 1).unwrap();
        }
    }
}

fn count(kb: &KnowledgeBase, key: &str) -> i64 {
    kb.get(key).unwrap().to_integer()
}

fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn one_shot_thread_runs_the_full_lifecycle() {
    let data = KnowledgeBase::new();
    let threader = Threader::new(data.clone());
    threader.run("once", Counter::boxed("once"), false).unwrap();
    threader.wait("once").unwrap();

    assert_eq!(count(&data, "once.init"), 1);
    assert_eq!(count(&data, "once"), 1);
    assert_eq!(count(&data, "once.cleanup"), 1);
    assert!(threader.is_finished("once").unwrap());
    assert!(threader.control().get("once.started").unwrap().is_true());
}

#[test]
fn continuous_threads_run_until_terminated() {
    let data = KnowledgeBase::new();
    let threader = Threader::new(data.clone());
    threader.run_hz(0.0, "spin", Counter::boxed("spin"), false).unwrap();

    assert!(wait_until(|| count(&data, "spin") > 100));
    threader.terminate("spin").unwrap();
    threader.wait("spin").unwrap();

    let settled = count(&data, "spin");
    thread::sleep(Duration::from_millis(20));
    assert_eq!(count(&data, "spin"), settled);
    assert_eq!(count(&data, "spin.cleanup"), 1);
}

#[test]
fn paused_threads_wait_for_resume() {
    let data = KnowledgeBase::new();
    let threader = Threader::new(data.clone());
    threader.run_hz(0.0, "held", Counter::boxed("held"), true).unwrap();

    assert!(wait_until(|| threader.control().get("held.started").unwrap().is_true()));
    thread::sleep(Duration::from_millis(30));
    assert_eq!(count(&data, "held"), 0);

    threader.resume("held").unwrap();
    assert!(wait_until(|| count(&data, "held") > 0));

    threader.pause("held").unwrap();
    thread::sleep(Duration::from_millis(30));
    let paused_at = count(&data, "held");
    thread::sleep(Duration::from_millis(30));
    assert_eq!(count(&data, "held"), paused_at);

    threader.terminate_all().unwrap();
    threader.wait_all().unwrap();
}

#[test]
fn paced_threads_follow_their_frequency() {
    let data = KnowledgeBase::new();
    let threader = Threader::new(data.clone());
    threader.run_hz(50.0, "paced", Counter::boxed("paced"), false).unwrap();

    thread::sleep(Duration::from_millis(200));
    threader.terminate("paced").unwrap();
    threader.wait("paced").unwrap();

    let runs = count(&data, "paced");
    assert!((2..=30).contains(&runs), "ran {runs} times");
}

#[test]
fn frequency_changes_apply_while_running() {
    let data = KnowledgeBase::new();
    let threader = Threader::new(data.clone());
    threader.run_hz(1.0, "slow", Counter::boxed("slow"), false).unwrap();
    assert!(wait_until(|| count(&data, "slow") >= 1));

    threader.set_hertz("slow", 0.0).unwrap();
    assert!(wait_until(|| count(&data, "slow") > 50));
    threader.terminate("slow").unwrap();
    threader.wait("slow").unwrap();
}

#[test]
fn threads_share_the_data_knowledge_base() {
    let data = KnowledgeBase::new();
    let threader = Threader::with_config(
        data.clone(),
        ThreaderConfig {
            name_prefix: "worker-".to_string(),
        },
    );
    for i in 0..4 {
        threader.run_hz(0.0, &format!("w{i}"), Counter::boxed("shared"), false).unwrap();
    }
    assert!(wait_until(|| count(&data, "shared") > 200));
    threader.terminate_all().unwrap();
    threader.wait_all().unwrap();
    for i in 0..4 {
        assert!(threader.is_finished(&format!("w{i}")).unwrap());
    }
}

#[test]
fn dropping_the_threader_stops_its_threads() {
    let data = KnowledgeBase::new();
    {
        let threader = Threader::new(data.clone());
        threader.run_hz(0.0, "orphan", Counter::boxed("orphan"), false).unwrap();
        assert!(wait_until(|| count(&data, "orphan") > 0));
    }
    assert_eq!(count(&data, "orphan.cleanup"), 1);
}
