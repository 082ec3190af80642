//! Flush scheduling
//!
//! ```text
//!            timer tick / request_flush
//!   ┌──────┐ ─────────────────────────► ┌──────────┐
//!   │ Idle │                            │ Flushing │ ◄─┐ follow-up requested
//!   └──────┘ ◄───────────────────────── └──────────┘ ──┘ while in flight
//!      ▲  │          cycle done               │
//!      │  │ suspend()                         │ suspend()
//!      │  ▼                                   ▼
//!   resume()  ┌───────────┐ ◄─────────────────┘
//!      └───── │ Suspended │  requests answered with a "suspended" report
//!             └───────────┘
//! ```
//!
//! Cycles never overlap. Any number of requests made while a cycle is in
//! flight collapse into a single follow-up cycle, and every request is
//! answered with the report of the cycle that covered it.

mod delegate;
mod lifecycle;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::flush::{FlushReport, Flusher};

pub use delegate::{AlwaysFlush, FlushDelegate};
pub use lifecycle::LifecycleEvent;

/// Scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Flushing,
    Suspended,
}

/// Timing knobs of the scheduler
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// `None` disables the periodic timer
    pub flush_interval: Option<Duration>,
    pub flush_on_background: bool,
}

impl SchedulerSettings {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            flush_interval: config.flush_interval(),
            flush_on_background: config.flush_on_background,
        }
    }
}

type Waiter = oneshot::Sender<FlushReport>;

struct Control {
    state: SchedulerState,
    /// A `drive` task is running; outlives `Flushing` across suspend/resume
    cycle_running: bool,
    /// A request arrived while a cycle was in flight
    follow_up: bool,
    /// Waiting on the cycle in flight
    in_flight: Vec<Waiter>,
    /// Waiting on the follow-up cycle
    queued: Vec<Waiter>,
    /// Dropping this stops the timer task
    timer_stop: Option<oneshot::Sender<()>>,
    runtime: Option<Handle>,
}

/// Drives flush cycles for one client
pub struct Scheduler {
    flusher: Flusher,
    settings: SchedulerSettings,
    delegate: RwLock<Arc<dyn FlushDelegate>>,
    control: Mutex<Control>,
    cycles_started: AtomicU64,
}

impl Scheduler {
    pub fn new(flusher: Flusher, settings: SchedulerSettings) -> Self {
        Self {
            flusher,
            settings,
            delegate: RwLock::new(Arc::new(AlwaysFlush)),
            control: Mutex::new(Control {
                state: SchedulerState::Idle,
                cycle_running: false,
                follow_up: false,
                in_flight: Vec::new(),
                queued: Vec::new(),
                timer_stop: None,
                runtime: None,
            }),
            cycles_started: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.control.lock().state
    }

    /// Number of cycles begun so far, vetoed ones included
    pub fn cycles_started(&self) -> u64 {
        self.cycles_started.load(Ordering::SeqCst)
    }

    pub fn flusher(&self) -> &Flusher {
        &self.flusher
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn set_delegate(&self, delegate: Arc<dyn FlushDelegate>) {
        *self.delegate.write() = delegate;
    }

    /// Bind to the current tokio runtime and start the periodic timer
    pub fn start(self: &Arc<Self>) {
        let mut control = self.control.lock();
        if control.runtime.is_none() {
            match Handle::try_current() {
                Ok(handle) => control.runtime = Some(handle),
                Err(_) => {
                    warn!("Scheduler started outside a tokio runtime, periodic flush disabled");
                    return;
                }
            }
        }
        if control.state != SchedulerState::Suspended {
            self.start_timer(&mut control);
        }
    }

    fn start_timer(self: &Arc<Self>, control: &mut Control) {
        let Some(period) = self.settings.flush_interval else {
            return;
        };
        if control.timer_stop.is_some() {
            return;
        }
        let Some(runtime) = control.runtime.clone() else {
            return;
        };

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        control.timer_stop = Some(stop_tx);
        let weak = Arc::downgrade(self);

        runtime.spawn(async move {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick fires immediately
            timer.tick().await;

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        match weak.upgrade() {
                            Some(scheduler) => scheduler.tick(),
                            None => break,
                        }
                    }
                    _ = &mut stop_rx => break,
                }
            }
            debug!("Flush timer stopped");
        });
        debug!(interval_secs = period.as_secs(), "Flush timer started");
    }

    /// Timer ticks only start a cycle from `Idle`
    fn tick(self: &Arc<Self>) {
        let mut control = self.control.lock();
        if control.state == SchedulerState::Idle {
            self.begin_locked(&mut control, None);
        }
    }

    /// Ask for a flush; the receiver yields the report of the covering cycle
    pub fn request_flush(self: &Arc<Self>) -> oneshot::Receiver<FlushReport> {
        let (tx, rx) = oneshot::channel();
        let mut control = self.control.lock();

        match control.state {
            SchedulerState::Suspended => {
                let _ = tx.send(FlushReport::suspended());
            }
            SchedulerState::Flushing => {
                control.follow_up = true;
                control.queued.push(tx);
            }
            SchedulerState::Idle => {
                self.begin_locked(&mut control, Some(tx));
            }
        }
        rx
    }

    /// Request a flush and wait for its report
    pub async fn flush(self: &Arc<Self>) -> FlushReport {
        match self.request_flush().await {
            Ok(report) => report,
            Err(_) => FlushReport::failed(TransportError::Connection(
                "flush task ended before reporting".to_string(),
            )),
        }
    }

    fn begin_locked(self: &Arc<Self>, control: &mut Control, waiter: Option<Waiter>) {
        let runtime = match control.runtime.clone().or_else(|| Handle::try_current().ok()) {
            Some(runtime) => runtime,
            None => {
                warn!("No tokio runtime available, flush skipped");
                if let Some(tx) = waiter {
                    let _ = tx.send(FlushReport::failed(TransportError::Connection(
                        "no tokio runtime".to_string(),
                    )));
                }
                return;
            }
        };

        control.state = SchedulerState::Flushing;
        control.cycle_running = true;
        control.in_flight.extend(waiter);
        runtime.spawn(Arc::clone(self).drive());
    }

    async fn drive(self: Arc<Self>) {
        loop {
            let report = self.run_cycle().await;

            let (waiters, again) = {
                let mut control = self.control.lock();
                let waiters = std::mem::take(&mut control.in_flight);
                let again = control.follow_up && control.state == SchedulerState::Flushing;
                if again {
                    control.follow_up = false;
                    control.in_flight = std::mem::take(&mut control.queued);
                } else {
                    control.cycle_running = false;
                    if control.state == SchedulerState::Flushing {
                        control.state = SchedulerState::Idle;
                    }
                }
                (waiters, again)
            };

            for waiter in waiters {
                let _ = waiter.send(report.clone());
            }
            if !again {
                break;
            }
            debug!("Running coalesced follow-up flush");
        }
    }

    async fn run_cycle(&self) -> FlushReport {
        let cycle = self.cycles_started.fetch_add(1, Ordering::SeqCst) + 1;
        let delegate = self.delegate.read().clone();

        if !delegate.should_flush() {
            debug!(cycle, "Flush vetoed by delegate");
            return FlushReport::vetoed();
        }

        debug!(cycle, "Flush cycle started");
        self.flusher.flush().await
    }

    /// Stop flushing and snapshot both stores; no network
    ///
    /// A cycle already in flight runs to completion.
    pub fn suspend(&self) {
        let queued = {
            let mut control = self.control.lock();
            if control.state == SchedulerState::Suspended {
                return;
            }
            control.state = SchedulerState::Suspended;
            control.follow_up = false;
            control.timer_stop.take();
            std::mem::take(&mut control.queued)
        };

        for waiter in queued {
            let _ = waiter.send(FlushReport::suspended());
        }
        self.flusher.snapshot_stores();
        info!("Scheduler suspended");
    }

    /// Leave `Suspended` and restart the timer
    ///
    /// If the cycle that was in flight at suspension is still running, the
    /// scheduler goes back to `Flushing` so new requests queue behind it.
    pub fn resume(self: &Arc<Self>) {
        let mut control = self.control.lock();
        if control.state != SchedulerState::Suspended {
            return;
        }
        control.state = if control.cycle_running {
            SchedulerState::Flushing
        } else {
            SchedulerState::Idle
        };
        if control.runtime.is_none() {
            control.runtime = Handle::try_current().ok();
        }
        self.start_timer(&mut control);
        info!("Scheduler resumed");
    }

    pub fn handle_lifecycle(self: &Arc<Self>, event: LifecycleEvent) {
        debug!(%event, "Lifecycle event");
        match event {
            LifecycleEvent::BecameActive => {
                let _ = self.request_flush();
            }
            LifecycleEvent::EnteredBackground => {
                if self.settings.flush_on_background {
                    let _ = self.request_flush();
                }
            }
            LifecycleEvent::WillTerminate => self.suspend(),
        }
    }

    /// Whether the periodic timer is running
    pub fn timer_running(&self) -> bool {
        self.control.lock().timer_stop.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportResult;
    use crate::flush::{BatchOutcome, Endpoint, FlushSettings, Transport};
    use crate::store::{EventStore, PeopleStore};
    use crate::types::{EventRecord, Properties};
    use async_trait::async_trait;
    use chrono::Utc;

    struct AcceptAll;

    #[async_trait]
    impl Transport for AcceptAll {
        async fn send(&self, _endpoint: Endpoint, _body: String) -> TransportResult<BatchOutcome> {
            Ok(BatchOutcome::Accepted)
        }
    }

    fn scheduler(interval: Option<Duration>) -> (Arc<Scheduler>, Arc<EventStore>) {
        let events = Arc::new(EventStore::in_memory("events", 100));
        let people = Arc::new(PeopleStore::in_memory("people", 100));
        let flusher = Flusher::new(
            events.clone(),
            people,
            Arc::new(AcceptAll),
            FlushSettings {
                token: "tok".to_string(),
                batch_size: 50,
                max_batches_per_cycle: 10,
                request_timeout: Duration::from_secs(5),
            },
        );
        let settings = SchedulerSettings {
            flush_interval: interval,
            flush_on_background: false,
        };
        (Arc::new(Scheduler::new(flusher, settings)), events)
    }

    fn event() -> EventRecord {
        EventRecord::new("Tick", Properties::new(), Utc::now(), "user")
    }

    #[tokio::test]
    async fn test_flush_returns_to_idle() {
        let (scheduler, events) = scheduler(None);
        events.append(event());

        let report = scheduler.flush().await;
        assert!(report.success());
        assert_eq!(report.events.records_sent, 1);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.cycles_started(), 1);
    }

    #[tokio::test]
    async fn test_suspended_requests_complete_immediately() {
        let (scheduler, events) = scheduler(None);
        events.append(event());
        scheduler.suspend();

        let report = scheduler.flush().await;
        assert!(report.suspended);
        assert!(!report.success());
        assert_eq!(scheduler.cycles_started(), 0);
        assert_eq!(events.len(), 1);

        scheduler.resume();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(scheduler.flush().await.success());
    }

    #[tokio::test]
    async fn test_veto_skips_network() {
        let (scheduler, events) = scheduler(None);
        events.append(event());
        scheduler.set_delegate(Arc::new(|| false));

        let report = scheduler.flush().await;
        assert!(report.vetoed);
        assert_eq!(events.len(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[tokio::test]
    async fn test_background_flush_respects_setting() {
        let (scheduler, events) = scheduler(None);
        events.append(event());

        scheduler.handle_lifecycle(LifecycleEvent::EnteredBackground);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.cycles_started(), 0);

        scheduler.handle_lifecycle(LifecycleEvent::WillTerminate);
        assert_eq!(scheduler.state(), SchedulerState::Suspended);
    }

    #[tokio::test]
    async fn test_timer_drives_cycles() {
        let (scheduler, events) = scheduler(Some(Duration::from_millis(20)));
        events.append(event());
        scheduler.start();
        assert!(scheduler.timer_running());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(scheduler.cycles_started() >= 1);
        assert!(events.is_empty());

        scheduler.suspend();
        assert!(!scheduler.timer_running());
    }
}
