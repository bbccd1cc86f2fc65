#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub use pi30_bridge::clock::{Calendar, Clock, Date};
pub use pi30_bridge::coordinator::controls::ControlRequest;
pub use pi30_bridge::coordinator::{Coordinator, State};
pub use pi30_bridge::entities::{
    self, BooleanSink, Entities, EntityKind, EnumSink, NumericSink, Settings, TextSink,
};
pub use pi30_bridge::pi30::frame;
pub use pi30_bridge::prelude::*;
pub use pi30_bridge::store::{MemoryStore, Store};
pub use pi30_bridge::transport::Transport;

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A reply frame as the inverter sends it: `(` payload crc CR.
pub fn reply(payload: &str) -> Vec<u8> {
    let mut bytes = vec![frame::START];
    bytes.extend_from_slice(payload.as_bytes());
    let crc = frame::checksum(&bytes);
    bytes.extend_from_slice(&crc);
    bytes.push(frame::TERMINATOR);
    bytes
}

pub const STATUS: &str = "230.0 49.9 230.0 49.9 0161 0119 003 393 52.70 005 085 0042 01.4 380.0 52.68 00000 00010110 00 00 00571 010";

pub const RATINGS: &str = "230.0 21.7 230.0 50.0 21.7 5000 5000 48.0 46.0 42.0 56.4 54.0 2 30 060 0 2 3 9 01 0 0 54.0 0 1 000 0 000";

pub const EQUALIZATION: &str = "1 060 030 040 000 58.40 224 000 0 0000";

// Transport {{{
#[derive(Default)]
struct Wire {
    inbound: VecDeque<u8>,
    sent: Vec<Vec<u8>>,
}

/// In-memory transport. Clones share the same wire, so a test keeps one
/// clone while the coordinator owns the other.
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    wire: Arc<Mutex<Wire>>,
}

impl LoopbackTransport {
    pub fn feed(&self, bytes: &[u8]) {
        self.wire.lock().unwrap().inbound.extend(bytes);
    }

    /// Every command written so far, without crc and terminator.
    pub fn sent(&self) -> Vec<String> {
        self.wire
            .lock()
            .unwrap()
            .sent
            .iter()
            .map(|frame| String::from_utf8_lossy(&frame[..frame.len() - 3]).into_owned())
            .collect()
    }

    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.wire.lock().unwrap().sent.clone()
    }

    pub fn last_sent(&self) -> Option<String> {
        self.sent().pop()
    }
}

impl Transport for LoopbackTransport {
    fn available(&mut self) -> usize {
        self.wire.lock().unwrap().inbound.len()
    }

    fn read_byte(&mut self) -> Option<u8> {
        self.wire.lock().unwrap().inbound.pop_front()
    }

    fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.wire.lock().unwrap().sent.push(bytes.to_vec());
        Ok(())
    }
} // }}}

// Clock and calendar {{{
#[derive(Clone, Default)]
pub struct ManualClock(Arc<AtomicU64>);

impl ManualClock {
    pub fn set(&self, ms: u64) {
        self.0.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.0.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
pub struct FixedCalendar(Arc<Mutex<Option<Date>>>);

impl FixedCalendar {
    pub fn new(day: u32, month: u32, year: i32) -> Self {
        Self(Arc::new(Mutex::new(Some(Date { day, month, year }))))
    }

    pub fn set(&self, day: u32, month: u32, year: i32) {
        *self.0.lock().unwrap() = Some(Date { day, month, year });
    }
}

impl Calendar for FixedCalendar {
    fn today(&self) -> Option<Date> {
        *self.0.lock().unwrap()
    }
} // }}}

// Store {{{
#[derive(Clone, Default)]
pub struct SharedStore(Arc<Mutex<MemoryStore>>);

impl SharedStore {
    pub fn with_values(values: &[(&str, f64)]) -> Self {
        Self(Arc::new(Mutex::new(MemoryStore::with_values(values))))
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.lock().unwrap().load(key)
    }

    pub fn commits(&self) -> usize {
        self.0.lock().unwrap().commits()
    }
}

impl Store for SharedStore {
    fn load(&self, key: &str) -> Option<f64> {
        self.0.lock().unwrap().load(key)
    }

    fn save(&mut self, key: &str, value: f64) -> Result<()> {
        self.0.lock().unwrap().save(key, value)
    }

    fn commit(&mut self) -> Result<()> {
        self.0.lock().unwrap().commit()
    }
} // }}}

// Sinks {{{
/// Everything published, as (key, value) in order.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<(String, String)>>>);

impl Recorder {
    pub fn events(&self) -> Vec<(String, String)> {
        self.0.lock().unwrap().clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.events().into_iter().map(|(k, _)| k).collect()
    }

    pub fn last(&self, key: &str) -> Option<String> {
        self.events()
            .into_iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn last_f64(&self, key: &str) -> Option<f64> {
        self.last(key).and_then(|v| v.parse().ok())
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    fn push(&self, key: &str, value: String) {
        self.0.lock().unwrap().push((key.to_string(), value));
    }
}

pub struct RecordingSink {
    key: &'static str,
    recorder: Recorder,
}

impl BooleanSink for RecordingSink {
    fn update(&self, state: bool) {
        self.recorder.push(self.key, state.to_string());
    }
}

impl NumericSink for RecordingSink {
    fn publish(&self, value: f32) {
        self.recorder.push(self.key, value.to_string());
    }
}

impl TextSink for RecordingSink {
    fn publish(&self, value: &str) {
        self.recorder.push(self.key, value.to_string());
    }
}

impl EnumSink for RecordingSink {
    fn publish_option(&self, option: &str) {
        self.recorder.push(self.key, option.to_string());
    }
} // }}}

pub struct Harness {
    pub coordinator: Coordinator<LoopbackTransport>,
    pub link: LoopbackTransport,
    pub clock: ManualClock,
    pub calendar: FixedCalendar,
    pub store: SharedStore,
    pub recorder: Recorder,
}

impl Harness {
    pub fn step(&mut self) {
        self.coordinator.step();
    }

    pub fn steps(&mut self, n: usize) {
        for _ in 0..n {
            self.coordinator.step();
        }
    }

    /// Answer whatever is outstanding with NAK until the engine is idle.
    pub fn settle(&mut self) {
        for _ in 0..10 {
            if *self.coordinator.state() == State::Idle {
                return;
            }
            self.link.feed(&reply("NAK"));
            self.coordinator.step();
        }
        panic!("coordinator never went idle");
    }

    /// Send `command` and feed back `payload`. The step that receives the
    /// reply also publishes the first field of a multi-field reply.
    pub fn exchange(&mut self, command: &str, payload: &str) {
        self.settle();
        self.coordinator.enqueue_priority(Command::new(command));
        self.coordinator.step();
        assert_eq!(self.link.last_sent().as_deref(), Some(command));

        self.link.feed(&reply(payload));
        self.coordinator.step();
    }
}

pub struct Factory();

impl Factory {
    pub const YAML: &'static str = r#"
serial:
  port: /dev/null
startup_delay_ms: 0
startup_commands: []
poll:
  - { command: QPI, interval_ms: 3600000 }
"#;

    pub fn config(yaml: &str) -> Config {
        Config::from_yaml(yaml).unwrap()
    }

    pub fn harness_with(yaml: &str, store: SharedStore) -> Harness {
        let config = Self::config(yaml);

        let link = LoopbackTransport::default();
        let clock = ManualClock::default();
        let calendar = FixedCalendar::new(1, 6, 2024);
        let recorder = Recorder::default();

        let settings = Settings::from_config(&config.numbers, &config.selects).unwrap();
        let mut entities = Entities::new(settings);
        entities.bind_all(|_kind, key| {
            Arc::new(RecordingSink {
                key,
                recorder: recorder.clone(),
            })
        });

        let coordinator = Coordinator::new(
            &config,
            link.clone(),
            Box::new(clock.clone()),
            Box::new(calendar.clone()),
            Box::new(store.clone()),
            entities,
        );

        Harness {
            coordinator,
            link,
            clock,
            calendar,
            store,
            recorder,
        }
    }

    /// A harness whose one poll entry has already gone out and been
    /// answered, so the engine starts idle.
    pub fn harness() -> Harness {
        let mut harness = Self::harness_with(Self::YAML, SharedStore::default());
        harness.step();
        harness.settle();
        harness.recorder.clear();
        harness
    }
}
