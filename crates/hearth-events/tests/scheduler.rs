//! End-to-end tests of the event lifecycle: enqueue, scheduler passes,
//! periodic rescheduling, cancellation and failure containment.
//!
//! Everything runs against the in-memory stores; no external services
//! needed.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use hearth_core::bus::GameBus;
use hearth_core::config::SchedulerConfig;
use hearth_core::effect::{EffectContext, EffectHandler};
use hearth_core::error::{CoreError, EffectError, ResolutionError};
use hearth_core::store::{Collection, DocumentStore, MemoryStore};
use hearth_core::{Unit, effect, resolvers};
use hearth_events::periodic::START_PERIODIC;
use hearth_events::{
    Event, EventScheduler, EventStore, MemoryEventStore, PeriodicEvent, PeriodicHandler,
    PeriodicRegistry,
};
use hearth_types::{EffectData, EventId, GameValue, PlayerId};

fn player() -> PlayerId {
    PlayerId::from("ada")
}

fn ago(seconds: i64) -> DateTime<Utc> {
    Utc::now()
        .checked_sub_signed(TimeDelta::seconds(seconds))
        .unwrap()
}

/// Counts firings and keeps a rolling `runs` counter in `event_data`.
struct Counter(Arc<AtomicUsize>);

impl PeriodicHandler for Counter {
    fn run(&self, _unit: &mut Unit<'_>, event: &mut PeriodicEvent) -> Result<(), CoreError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        let runs = event
            .event()
            .event_data_or("runs", 0)
            .as_i64()
            .unwrap_or_default()
            .saturating_add(1);
        event.event_mut().set_event_data("runs", runs);
        Ok(())
    }
}

/// Stops its own cycle on the first firing.
struct Quit(Arc<AtomicUsize>);

impl PeriodicHandler for Quit {
    fn run(&self, _unit: &mut Unit<'_>, event: &mut PeriodicEvent) -> Result<(), CoreError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        event.cancel_self();
        Ok(())
    }
}

struct Broken;

impl PeriodicHandler for Broken {
    fn run(&self, _unit: &mut Unit<'_>, _event: &mut PeriodicEvent) -> Result<(), CoreError> {
        Err(EffectError::Failed {
            kind: "periodic_exec".to_owned(),
            message: "broken handler".to_owned(),
        }
        .into())
    }
}

struct Explode;

impl EffectHandler for Explode {
    fn execute(
        &self,
        _unit: &mut Unit<'_>,
        effect: &EffectData,
        _ctx: &EffectContext,
    ) -> Result<(), CoreError> {
        Err(EffectError::Failed {
            kind: effect.kind.clone(),
            message: "kaboom".to_owned(),
        }
        .into())
    }
}

struct Crash;

impl EffectHandler for Crash {
    fn execute(
        &self,
        _unit: &mut Unit<'_>,
        _effect: &EffectData,
        _ctx: &EffectContext,
    ) -> Result<(), CoreError> {
        panic!("effect handler crashed");
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    events: Arc<MemoryEventStore>,
    registry: Arc<PeriodicRegistry>,
    bus: Arc<GameBus>,
    ticks: Arc<AtomicUsize>,
    tocks: Arc<AtomicUsize>,
    tacks: Arc<AtomicUsize>,
    quits: Arc<AtomicUsize>,
}

impl Harness {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        store
            .create_player(&player(), GameValue::map([("gold", GameValue::Int(0))]))
            .unwrap();
        let events = Arc::new(MemoryEventStore::new());
        let shared: Arc<dyn EventStore> = events.clone();

        let ticks = Arc::new(AtomicUsize::new(0));
        let tocks = Arc::new(AtomicUsize::new(0));
        let tacks = Arc::new(AtomicUsize::new(0));
        let quits = Arc::new(AtomicUsize::new(0));
        let mut registry = PeriodicRegistry::new();
        registry
            .register("tick", 1, Counter(Arc::clone(&ticks)))
            .unwrap();
        registry
            .register("tock", 1, Counter(Arc::clone(&tocks)))
            .unwrap();
        registry
            .register("tack", 1, Counter(Arc::clone(&tacks)))
            .unwrap();
        registry.register("quit", 1, Quit(Arc::clone(&quits))).unwrap();
        registry.register("broken", 30, Broken).unwrap();
        let registry = Arc::new(registry);

        let mut builder = GameBus::builder(store.clone());
        resolvers::install(&mut builder).unwrap();
        effect::install(&mut builder).unwrap();
        hearth_events::install(&mut builder, &registry, &shared).unwrap();
        builder.register_effect("explode", Explode).unwrap();
        builder.register_effect("crash", Crash).unwrap();
        let bus = Arc::new(builder.build().unwrap());

        Self {
            store,
            events,
            registry,
            bus,
            ticks,
            tocks,
            tacks,
            quits,
        }
    }

    fn scheduler(&self, config: SchedulerConfig) -> EventScheduler {
        EventScheduler::new(Arc::clone(&self.bus), self.events.clone(), config)
    }

    fn one_shot(&self, target: &str, event_type: &str, effects: Vec<EffectData>) -> EventId {
        let mut event = Event::new(PlayerId::from(target), event_type, ago(1), effects);
        event.enqueue(self.events.as_ref(), ago(2)).unwrap();
        event.id()
    }

    fn periodic(&self, periodic_type: &str) -> EventId {
        let mut periodic =
            PeriodicEvent::for_player(&self.registry, player(), periodic_type, ago(2)).unwrap();
        periodic.event_mut().set_due_time(ago(1));
        periodic
            .event_mut()
            .enqueue(self.events.as_ref(), ago(2))
            .unwrap();
        periodic.event().id()
    }

    /// Make a stored event due again.
    fn expire(&self, id: EventId) {
        let mut record = self.events.get(id).unwrap().unwrap();
        record.due_time = ago(1);
        self.events.upsert(&record).unwrap();
    }

    fn gold(&self) -> GameValue {
        self.store
            .read(Collection::Players, &player(), &["gold"])
            .unwrap()
            .unwrap()
    }
}

fn set_gold(amount: i64) -> EffectData {
    EffectData::new("set_value")
        .with("target_id", "data.gold")
        .with("value", amount)
}

#[test]
fn one_shot_event_runs_once_and_is_removed() {
    let h = Harness::new();
    h.one_shot("ada", "brew", vec![set_gold(7)]);
    let scheduler = h.scheduler(SchedulerConfig::default());

    let summary = scheduler.run_pass(Utc::now()).unwrap();
    assert_eq!(summary.due, 1);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.removed, 1);
    assert!(h.events.is_empty());
    assert_eq!(h.gold(), GameValue::Int(7));

    let again = scheduler.run_pass(Utc::now()).unwrap();
    assert_eq!(again.due, 0);
}

#[test]
fn events_not_yet_due_are_left_alone() {
    let h = Harness::new();
    let id = h.one_shot("ada", "brew", vec![set_gold(7)]);
    let scheduler = h.scheduler(SchedulerConfig::default());

    let summary = scheduler.run_pass(ago(5)).unwrap();
    assert_eq!(summary.due, 0);
    assert!(h.events.get(id).unwrap().is_some());
    assert_eq!(h.gold(), GameValue::Int(0));
}

#[test]
fn periodic_event_reschedules_and_keeps_state() {
    let h = Harness::new();
    let id = h.periodic("tick");
    let scheduler = h.scheduler(SchedulerConfig::default());

    let start = Utc::now();
    let summary = scheduler.run_pass(start).unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.removed, 0);
    let record = h.events.get(id).unwrap().unwrap();
    assert!(record.locked);
    assert!(record.due_time > start);
    assert_eq!(record.event_data.get("runs"), Some(&GameValue::Int(1)));

    // Not due again within the same window.
    assert_eq!(scheduler.run_pass(start).unwrap().due, 0);

    h.expire(id);
    scheduler.run_pass(Utc::now()).unwrap();
    let record = h.events.get(id).unwrap().unwrap();
    assert_eq!(record.event_data.get("runs"), Some(&GameValue::Int(2)));
    assert_eq!(h.ticks.load(Ordering::SeqCst), 2);
}

#[test]
fn distinct_periodic_types_fire_independently() {
    let h = Harness::new();
    let ids = [h.periodic("tick"), h.periodic("tock"), h.periodic("tack")];
    let scheduler = h.scheduler(SchedulerConfig::default());

    let start = Utc::now();
    let summary = scheduler.run_pass(start).unwrap();
    let finished = Utc::now();
    assert_eq!(summary.due, 3);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.removed, 0);
    for counter in [&h.ticks, &h.tocks, &h.tacks] {
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    // Each record moved to `now + interval` (1s) at its own firing.
    let earliest = start.checked_add_signed(TimeDelta::seconds(1)).unwrap();
    let latest = finished.checked_add_signed(TimeDelta::seconds(1)).unwrap();
    for id in ids {
        let due = h.events.get(id).unwrap().unwrap().due_time;
        assert!(due >= earliest && due <= latest, "due {due} outside window");
    }
}

#[test]
fn cancelled_periodic_event_is_removed_on_next_firing() {
    let h = Harness::new();
    let id = h.periodic("quit");
    let scheduler = h.scheduler(SchedulerConfig::default());

    scheduler.run_pass(Utc::now()).unwrap();
    let record = h.events.get(id).unwrap().unwrap();
    assert!(!record.locked);

    let summary = scheduler.run_pass(Utc::now()).unwrap();
    assert_eq!(summary.removed, 1);
    assert!(h.events.get(id).unwrap().is_none());
    assert_eq!(h.quits.load(Ordering::SeqCst), 1);

    // Only the firing that ran the handler is counted.
    let total = h
        .store
        .read(Collection::Statistics, &player(), &["event", "periodic_event_total"])
        .unwrap();
    assert_eq!(total, Some(GameValue::Int(1)));
}

#[test]
fn failing_event_does_not_block_the_batch() {
    let h = Harness::new();
    h.one_shot("ada", "trap", vec![EffectData::new("explode")]);
    h.one_shot("ada", "brew", vec![set_gold(3)]);
    let tick = h.periodic("tick");
    let scheduler = h.scheduler(SchedulerConfig::default());

    let start = Utc::now();
    let summary = scheduler.run_pass(start).unwrap();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.removed, 2);
    assert_eq!(h.events.len(), 1);
    assert_eq!(h.gold(), GameValue::Int(3));
    assert_eq!(h.ticks.load(Ordering::SeqCst), 1);
    let rescheduled = h.events.get(tick).unwrap().unwrap();
    assert!(rescheduled.locked);
    assert!(rescheduled.due_time > start);

    let throughput = scheduler.take_throughput();
    assert_eq!(throughput.succeeded, 2);
    assert_eq!(throughput.failed, 1);
    assert_eq!(scheduler.take_throughput().dispatched(), 0);
}

#[test]
fn panicking_effect_fails_only_its_event() {
    let h = Harness::new();
    h.one_shot("ada", "trap", vec![EffectData::new("crash")]);
    h.one_shot("ada", "brew", vec![set_gold(4)]);
    let scheduler = h.scheduler(SchedulerConfig::default());

    let summary = scheduler.run_pass(Utc::now()).unwrap();
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.removed, 2);
    assert!(h.events.is_empty());
    assert_eq!(h.gold(), GameValue::Int(4));

    // Nothing is retried on the next pass.
    assert_eq!(scheduler.run_pass(Utc::now()).unwrap().due, 0);
}

#[test]
fn panicking_effect_on_a_worker_is_contained() {
    let h = Harness::new();
    h.one_shot("ada", "trap", vec![EffectData::new("crash")]);
    for _ in 0..5 {
        h.one_shot("ada", "brew", Vec::new());
    }
    let scheduler = h.scheduler(SchedulerConfig {
        batch_workers: 3,
        ..SchedulerConfig::default()
    });

    let summary = scheduler.run_pass(Utc::now()).unwrap();
    assert_eq!(summary.succeeded, 5);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.removed, 6);
    assert!(h.events.is_empty());
}

#[test]
fn panicking_periodic_event_is_advanced_when_configured() {
    let h = Harness::new();
    let mut periodic = PeriodicEvent::for_player(&h.registry, player(), "tick", ago(2)).unwrap();
    periodic.event_mut().record_mut().effect = vec![EffectData::new("crash")];
    periodic.event_mut().set_due_time(ago(1));
    periodic
        .event_mut()
        .enqueue(h.events.as_ref(), ago(2))
        .unwrap();
    let id = periodic.event().id();
    let scheduler = h.scheduler(SchedulerConfig {
        drop_failed_periodic: false,
        ..SchedulerConfig::default()
    });

    let start = Utc::now();
    let summary = scheduler.run_pass(start).unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.advanced, 1);
    assert!(h.events.get(id).unwrap().unwrap().due_time > start);
}

#[test]
fn event_for_missing_player_is_dropped() {
    let h = Harness::new();
    h.one_shot("ghost", "brew", vec![set_gold(3)]);
    let scheduler = h.scheduler(SchedulerConfig::default());

    let summary = scheduler.run_pass(Utc::now()).unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.removed, 1);
    assert!(h.events.is_empty());
}

#[test]
fn failed_periodic_event_is_dropped_by_default() {
    let h = Harness::new();
    let id = h.periodic("broken");
    let scheduler = h.scheduler(SchedulerConfig::default());

    let summary = scheduler.run_pass(Utc::now()).unwrap();
    assert_eq!(summary.failed, 1);
    assert!(h.events.get(id).unwrap().is_none());
}

#[test]
fn failed_periodic_event_can_be_advanced_instead() {
    let h = Harness::new();
    let id = h.periodic("broken");
    let scheduler = h.scheduler(SchedulerConfig {
        drop_failed_periodic: false,
        ..SchedulerConfig::default()
    });

    let start = Utc::now();
    let summary = scheduler.run_pass(start).unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.advanced, 1);
    assert_eq!(summary.removed, 0);
    let record = h.events.get(id).unwrap().unwrap();
    assert!(record.due_time > start);
}

#[test]
fn executions_are_counted_per_event_type() {
    let h = Harness::new();
    h.one_shot("ada", "brew", Vec::new());
    h.one_shot("ada", "brew", Vec::new());
    let scheduler = h.scheduler(SchedulerConfig::default());

    scheduler.run_pass(Utc::now()).unwrap();
    let total = h
        .store
        .read(Collection::Statistics, &player(), &["event", "brew_total"])
        .unwrap();
    assert_eq!(total, Some(GameValue::Int(2)));
}

#[test]
fn start_periodic_effect_attaches_once() {
    let h = Harness::new();
    let start = EffectData::new(START_PERIODIC)
        .with("periodic_type", "tick")
        .with("interval", 90);
    h.one_shot("ada", "quest", vec![start.clone()]);
    h.one_shot("ada", "quest", vec![start]);
    let scheduler = h.scheduler(SchedulerConfig::default());

    scheduler.run_pass(Utc::now()).unwrap();
    let attached = h.events.find_periodic(&player(), "tick").unwrap().unwrap();
    assert!(attached.locked);
    assert_eq!(attached.interval, Some(90));
    assert_eq!(h.events.events_for(&player()).unwrap().len(), 1);
}

#[test]
fn periodic_events_are_addressable_through_the_bus() {
    let h = Harness::new();
    let id = h.periodic("tick");
    let mut unit = h.bus.unit(player());

    assert_eq!(
        unit.get("event.periodic.tick.interval").unwrap(),
        GameValue::Int(1)
    );
    unit.update("event.periodic.tick.event_data.mood", "calm")
        .unwrap();
    unit.update("event.periodic.tick.interval", 45).unwrap();
    assert_eq!(
        unit.get("event.periodic.tick.event_data.mood").unwrap(),
        GameValue::from("calm")
    );

    let record = h.events.get(id).unwrap().unwrap();
    assert_eq!(record.interval, Some(45));
    assert_eq!(record.event_data.get("mood"), Some(&GameValue::from("calm")));

    let by_id = format!("event.id.{id}.periodic_type");
    assert_eq!(unit.get(&by_id).unwrap(), GameValue::from("tick"));

    let err = unit.update("event.periodic.tick.interval", 0).unwrap_err();
    assert!(matches!(
        err,
        CoreError::Resolution {
            source: ResolutionError::Rejected { .. }
        }
    ));
    assert!(unit.get("event.periodic.tock").unwrap_err().is_not_found());
}

#[test]
fn parallel_workers_drain_the_whole_batch() {
    let h = Harness::new();
    for n in 0..10 {
        h.one_shot(
            "ada",
            "brew",
            vec![
                EffectData::new("push_data")
                    .with("push_target", "data.log")
                    .with("to_push", n),
            ],
        );
    }
    let scheduler = h.scheduler(SchedulerConfig {
        batch_workers: 4,
        ..SchedulerConfig::default()
    });

    let summary = scheduler.run_pass(Utc::now()).unwrap();
    assert_eq!(summary.succeeded, 10);
    assert_eq!(summary.removed, 10);
    let log = h
        .store
        .read(Collection::Players, &player(), &["log"])
        .unwrap()
        .unwrap();
    assert_eq!(log.as_list().map(<[GameValue]>::len), Some(10));
}

#[tokio::test]
async fn run_loop_drains_queue_and_stops_on_shutdown() {
    let h = Harness::new();
    h.one_shot("ada", "brew", vec![set_gold(9)]);
    let scheduler = Arc::new(h.scheduler(SchedulerConfig {
        poll_interval_ms: 20,
        ..SchedulerConfig::default()
    }));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(Arc::clone(&scheduler).run(shutdown_rx));

    tokio::time::timeout(Duration::from_secs(5), async {
        while !h.events.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(h.gold(), GameValue::Int(9));

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
}
