//! Background due-event scheduler.
//!
//! Every `poll_interval_ms` the scheduler asks the event store for all
//! events due before the pass start, executes them, and bulk-removes the
//! ones that are done. The ticker measures from the start of one pass to
//! the start of the next, so a slow pass shortens the following wait; a
//! pass that overruns the interval is followed immediately by the next one
//! without any catch-up burst.
//!
//! A failing event never escapes the pass. It is logged with its target,
//! counted, and dropped. A panicking effect handler counts as a failure of
//! its event only. Removal happens only after execution, so a crash
//! in between re-runs the event on restart (at-least-once delivery).

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use hearth_core::GameBus;
use hearth_core::config::SchedulerConfig;
use hearth_types::{EventId, EventRecord};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::EventError;
use crate::event::Event;
use crate::periodic::advance;
use crate::store::EventStore;

/// What happened during one scheduler pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Events found due.
    pub due: usize,
    /// Events that executed without error.
    pub succeeded: usize,
    /// Events whose execution failed.
    pub failed: usize,
    /// Records deleted from the store.
    pub removed: usize,
    /// Failed periodic events moved to their next firing instead of being
    /// dropped.
    pub advanced: usize,
}

/// Counters accumulated since the last throughput report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Throughput {
    /// Successful executions.
    pub succeeded: u64,
    /// Failed executions.
    pub failed: u64,
}

impl Throughput {
    /// Total executions.
    pub const fn dispatched(&self) -> u64 {
        self.succeeded.saturating_add(self.failed)
    }

    /// Whole-percent success rate, `None` if nothing was dispatched.
    pub const fn success_rate_percent(&self) -> Option<u64> {
        self.succeeded
            .saturating_mul(100)
            .checked_div(self.dispatched())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

fn saturating_u64(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

enum Disposition {
    Remove,
    Keep,
    Advance,
}

struct Outcome {
    event_id: EventId,
    succeeded: bool,
    disposition: Disposition,
}

/// Polls the event store and executes due events.
pub struct EventScheduler {
    bus: Arc<GameBus>,
    events: Arc<dyn EventStore>,
    config: SchedulerConfig,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl std::fmt::Debug for EventScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventScheduler")
            .field("config", &self.config)
            .field("succeeded", &self.succeeded)
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

impl EventScheduler {
    /// A scheduler executing events from `events` on `bus`.
    pub const fn new(
        bus: Arc<GameBus>,
        events: Arc<dyn EventStore>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            bus,
            events,
            config,
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Run one pass for everything due before `start`.
    ///
    /// # Errors
    ///
    /// Only store failures while querying, removing or advancing events
    /// are returned; execution failures are contained and counted.
    pub fn run_pass(&self, start: DateTime<Utc>) -> Result<PassSummary, EventError> {
        let due = self.events.find_due(start)?;
        let mut summary = PassSummary {
            due: due.len(),
            ..PassSummary::default()
        };
        if due.is_empty() {
            return Ok(summary);
        }

        let outcomes = if self.config.batch_workers > 1 && due.len() > 1 {
            self.execute_parallel(&due)
        } else {
            due.iter().map(|record| self.execute_one(record)).collect()
        };

        let mut remove = Vec::new();
        for outcome in outcomes {
            if outcome.succeeded {
                summary.succeeded = summary.succeeded.saturating_add(1);
            } else {
                summary.failed = summary.failed.saturating_add(1);
            }
            match outcome.disposition {
                Disposition::Remove => remove.push(outcome.event_id),
                Disposition::Keep => {}
                Disposition::Advance => {
                    if self.advance_failed(outcome.event_id)? {
                        summary.advanced = summary.advanced.saturating_add(1);
                    } else {
                        remove.push(outcome.event_id);
                    }
                }
            }
        }
        if !remove.is_empty() {
            summary.removed = self.events.remove_events(&remove)?;
        }

        self.succeeded.fetch_add(saturating_u64(summary.succeeded), Ordering::Relaxed);
        self.failed.fetch_add(saturating_u64(summary.failed), Ordering::Relaxed);
        Ok(summary)
    }

    fn execute_one(&self, record: &EventRecord) -> Outcome {
        let event = Event::from_record(record.clone());
        let event_id = event.id();
        let result = panic::catch_unwind(AssertUnwindSafe(|| event.execute(&self.bus)))
            .unwrap_or_else(|payload| {
                Err(EventError::Panicked {
                    event_id,
                    message: panic_message(payload.as_ref()),
                })
            });
        match result {
            Ok(()) => Outcome {
                event_id,
                succeeded: true,
                disposition: if event.is_remove_on_trigger() {
                    Disposition::Remove
                } else {
                    Disposition::Keep
                },
            },
            Err(err) => {
                warn!(
                    player = %event.target(),
                    event_id = %event_id,
                    event_type = event.event_type(),
                    error = %err,
                    "event execution failed"
                );
                let keep_periodic =
                    !event.is_remove_on_trigger() && !self.config.drop_failed_periodic;
                Outcome {
                    event_id,
                    succeeded: false,
                    disposition: if keep_periodic {
                        Disposition::Advance
                    } else {
                        Disposition::Remove
                    },
                }
            }
        }
    }

    fn execute_parallel(&self, due: &[EventRecord]) -> Vec<Outcome> {
        let next = AtomicUsize::new(0);
        let workers = self.config.batch_workers.min(due.len());
        let next = &next;
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(move || {
                        let mut local = Vec::new();
                        while let Some(record) = due.get(next.fetch_add(1, Ordering::Relaxed)) {
                            local.push(self.execute_one(record));
                        }
                        local
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|handle| {
                    handle.join().unwrap_or_else(|_panic| {
                        // Executions catch their own panics; this is the worker itself.
                        error!("event batch worker panicked");
                        Vec::new()
                    })
                })
                .collect()
        })
    }

    /// Move a failed periodic event to its next firing. Returns `false` if
    /// it has to be dropped instead.
    fn advance_failed(&self, event_id: EventId) -> Result<bool, EventError> {
        let Some(mut record) = self.events.get(event_id)? else {
            return Ok(false);
        };
        let Some(due) = record.interval.and_then(|secs| advance(Utc::now(), secs)) else {
            return Ok(false);
        };
        record.due_time = due;
        self.events.upsert(&record)?;
        debug!(event_id = %event_id, due = %due, "failed periodic event advanced");
        Ok(true)
    }

    /// Take and reset the throughput counters.
    pub fn take_throughput(&self) -> Throughput {
        Throughput {
            succeeded: self.succeeded.swap(0, Ordering::Relaxed),
            failed: self.failed.swap(0, Ordering::Relaxed),
        }
    }

    fn log_throughput(&self) {
        let throughput = self.take_throughput();
        let success_rate = throughput
            .success_rate_percent()
            .map_or_else(|| "-".to_owned(), |rate| format!("{rate}%"));
        info!(
            minutes = self.config.throughput_log_minutes,
            dispatched = throughput.dispatched(),
            succeeded = throughput.succeeded,
            failed = throughput.failed,
            success_rate = %success_rate,
            "event throughput"
        );
    }

    /// Poll until `shutdown` turns `true` (or its sender is dropped).
    ///
    /// Each pass runs on the blocking thread pool; a pass in flight always
    /// completes before the loop observes the shutdown signal.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let log_every = Duration::from_secs(self.config.throughput_log_minutes.saturating_mul(60));
        let mut ticker = tokio::time::interval(poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_log = Instant::now();

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            batch_workers = self.config.batch_workers,
            drop_failed_periodic = self.config.drop_failed_periodic,
            "event scheduler starting"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            let started = Instant::now();
            let this = Arc::clone(&self);
            match tokio::task::spawn_blocking(move || this.run_pass(Utc::now())).await {
                Ok(Ok(summary)) if summary.due > 0 => {
                    debug!(
                        due = summary.due,
                        succeeded = summary.succeeded,
                        failed = summary.failed,
                        removed = summary.removed,
                        advanced = summary.advanced,
                        "event pass complete"
                    );
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => error!(error = %err, "event pass failed"),
                Err(err) => error!(error = %err, "event pass aborted"),
            }

            let elapsed = started.elapsed();
            if elapsed > poll {
                warn!(
                    elapsed = ?elapsed,
                    poll_interval_ms = self.config.poll_interval_ms,
                    "event pass overran poll interval"
                );
            }
            if last_log.elapsed() >= log_every {
                self.log_throughput();
                last_log = Instant::now();
            }
        }

        info!("event scheduler stopped");
    }
}
