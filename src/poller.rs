//! Generic polling engine shared by the opportunity and mail watchers.
//!
//! A `Poller` owns one timer task, the previous snapshot and a listener
//! registry. Each cycle fetches from a `RecordSource`, lets a `Detector`
//! classify and diff the result against the previous snapshot, commits the
//! new snapshot and emits the detector's events. Cycles are serialized per
//! poller: a cycle that would overlap one already in flight is dropped.
//!
//! Failures never escape a cycle. A failed fetch is logged, reported to
//! error listeners and otherwise ignored; the next tick tries again.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::clock::Clock;
use crate::error::{CycleFailure, WatchError};

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Where a poller gets its records from. One call returns the complete
/// collection for this cycle.
#[async_trait]
pub trait RecordSource: Send + Sync {
    type Record: Send;

    async fn fetch(&self) -> Result<Vec<Self::Record>, WatchError>;
}

/// Result of comparing the previous snapshot with the current one.
#[derive(Debug)]
pub struct CycleDiff<E> {
    /// Replace the snapshot with the current collection.
    pub changed: bool,
    /// Events to emit, in order.
    pub events: Vec<E>,
}

impl<E> CycleDiff<E> {
    pub fn unchanged() -> Self {
        Self {
            changed: false,
            events: Vec::new(),
        }
    }
}

/// Pure classification and change detection for one kind of record.
pub trait Detector: Send + Sync + 'static {
    type Raw: Send + 'static;
    type Item: Clone + Send + Sync + 'static;
    type Event: Send + Sync + 'static;

    /// Turn fetched records into snapshot items. Records that cannot be
    /// classified are dropped here, never reported as a cycle failure.
    fn classify(&self, raw: Vec<Self::Raw>, now: DateTime<Utc>) -> Vec<Self::Item>;

    /// `previous` is `None` until the first cycle has succeeded.
    fn diff(
        &self,
        previous: Option<&[Self::Item]>,
        current: &[Self::Item],
        now: DateTime<Utc>,
    ) -> CycleDiff<Self::Event>;
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

trait ListenerSet: Send + Sync {
    fn remove(&self, id: u64);
}

/// Registration-ordered callback list.
struct Listeners<E> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Callback<E>)>>,
}

impl<E: Send + Sync + 'static> Listeners<E> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        })
    }

    fn add(self: &Arc<Self>, callback: Callback<E>) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push((id, callback));
        let set: Arc<dyn ListenerSet> = self.clone();
        ListenerHandle {
            id,
            set: Arc::downgrade(&set),
        }
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Call every listener registered at the time of the call. The list is
    /// copied first so callbacks may add or remove listeners.
    fn emit(&self, poller: &str, event: &E) {
        let callbacks: Vec<Callback<E>> = self
            .entries
            .lock()
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                log::error!("{} poller: listener panicked, continuing", poller);
            }
        }
    }
}

impl<E: Send + Sync + 'static> ListenerSet for Listeners<E> {
    fn remove(&self, id: u64) {
        self.entries.lock().retain(|(entry_id, _)| *entry_id != id);
    }
}

/// Returned by `add_listener`. Dropping the handle keeps the listener
/// registered; call `unsubscribe` to remove it.
pub struct ListenerHandle {
    id: u64,
    set: Weak<dyn ListenerSet>,
}

impl ListenerHandle {
    pub fn unsubscribe(&self) {
        if let Some(set) = self.set.upgrade() {
            set.remove(self.id);
        }
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PollerOptions {
    pub name: String,
    pub interval: Duration,
    pub fetch_timeout: Duration,
}

/// What a single cycle ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Snapshot replaced; `events` events emitted.
    Committed { events: usize },
    /// Fetch succeeded but nothing changed.
    Unchanged,
    /// Fetch failed or timed out.
    Failed,
    /// The poller was stopped or restarted while the fetch was pending.
    Discarded,
    /// Another cycle was already in flight.
    Skipped,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerStatus {
    pub name: String,
    pub active: bool,
    pub in_flight: bool,
    pub observed_count: usize,
    pub last_success: Option<DateTime<Utc>>,
}

struct PollerState<T> {
    active: bool,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    snapshot: Arc<Vec<T>>,
    baseline: bool,
    last_observed_count: usize,
    last_success: Option<DateTime<Utc>>,
}

struct PollerInner<D: Detector> {
    options: PollerOptions,
    source: Arc<dyn RecordSource<Record = D::Raw>>,
    detector: D,
    clock: Arc<dyn Clock>,
    state: Mutex<PollerState<D::Item>>,
    in_flight: AtomicBool,
    /// Signalled whenever a cycle releases the in-flight flag.
    idle: Notify,
    listeners: Arc<Listeners<D::Event>>,
    error_listeners: Arc<Listeners<CycleFailure>>,
}

/// Held for the duration of a cycle; releases the flag even if the cycle
/// future is dropped mid-fetch.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
    idle: &'a Notify,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool, idle: &'a Notify) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag, idle })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        self.idle.notify_one();
    }
}

pub struct Poller<D: Detector> {
    inner: Arc<PollerInner<D>>,
}

impl<D: Detector> Poller<D> {
    pub fn new(
        options: PollerOptions,
        source: Arc<dyn RecordSource<Record = D::Raw>>,
        detector: D,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(PollerInner {
                options,
                source,
                detector,
                clock,
                state: Mutex::new(PollerState {
                    active: false,
                    generation: 0,
                    timer: None,
                    snapshot: Arc::new(Vec::new()),
                    baseline: false,
                    last_observed_count: 0,
                    last_success: None,
                }),
                in_flight: AtomicBool::new(false),
                idle: Notify::new(),
                listeners: Listeners::new(),
                error_listeners: Listeners::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.options.name
    }

    /// Start polling: one cycle immediately, then one per interval.
    /// Calling `start` on an active poller does nothing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.active {
                return;
            }
            state.active = true;
            state.generation += 1;
            let timer = tokio::spawn(run_timer(self.inner.clone(), state.generation));
            state.timer = Some(timer);
        }

        log::info!(
            "{} poller: started (every {:?})",
            self.inner.options.name,
            self.inner.options.interval
        );
    }

    /// Stop polling. The snapshot is kept so a later `start` diffs against
    /// the last known state.
    ///
    /// A timer cycle waiting on its fetch is cancelled. A `force_poll` cycle
    /// is discarded when its fetch resolves. Listeners already running for a
    /// cycle that passed its final generation check finish that one event.
    pub fn stop(&self) {
        let timer = {
            let mut state = self.inner.state.lock();
            if !state.active {
                return;
            }
            state.active = false;
            state.generation += 1;
            state.timer.take()
        };

        if let Some(timer) = timer {
            timer.abort();
        }
        log::info!("{} poller: stopped", self.inner.options.name);
    }

    /// Run one cycle now without touching the timer schedule. Dropped (and
    /// reported as `Skipped`) if a cycle is already in flight.
    pub async fn force_poll(&self) -> CycleOutcome {
        log::debug!("{} poller: forced poll", self.inner.options.name);
        self.inner.run_cycle().await
    }

    pub fn add_listener<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&D::Event) + Send + Sync + 'static,
    {
        self.inner.listeners.add(Arc::new(callback))
    }

    /// Receive a record of every failed cycle. Event listeners never see
    /// failures.
    pub fn add_error_listener<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&CycleFailure) + Send + Sync + 'static,
    {
        self.inner.error_listeners.add(Arc::new(callback))
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    /// The snapshot committed by the most recent changed cycle.
    pub fn snapshot(&self) -> Arc<Vec<D::Item>> {
        self.inner.state.lock().snapshot.clone()
    }

    pub fn status(&self) -> PollerStatus {
        let state = self.inner.state.lock();
        PollerStatus {
            name: self.inner.options.name.clone(),
            active: state.active,
            in_flight: self.inner.in_flight.load(Ordering::Acquire),
            observed_count: state.last_observed_count,
            last_success: state.last_success,
        }
    }
}

impl<D: Detector> Drop for Poller<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_timer<D: Detector>(inner: Arc<PollerInner<D>>, generation: u64) {
    let mut ticker = tokio::time::interval(inner.options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // The first cycle after start must run even if a cycle from before a
    // restart still holds the in-flight flag.
    ticker.tick().await;
    while inner.is_current(generation) && inner.run_cycle().await == CycleOutcome::Skipped {
        inner.idle.notified().await;
    }

    loop {
        ticker.tick().await;
        if !inner.is_current(generation) {
            break;
        }
        inner.run_cycle().await;
    }

    log::debug!("{} poller: timer exited", inner.options.name);
}

impl<D: Detector> PollerInner<D> {
    fn is_current(&self, generation: u64) -> bool {
        self.state.lock().generation == generation
    }

    async fn run_cycle(&self) -> CycleOutcome {
        let name = self.options.name.as_str();
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight, &self.idle) else {
            log::debug!("{} poller: cycle already in flight, skipping", name);
            return CycleOutcome::Skipped;
        };

        let (generation, previous) = {
            let state = self.state.lock();
            let previous = state.baseline.then(|| state.snapshot.clone());
            (state.generation, previous)
        };

        let fetched =
            match tokio::time::timeout(self.options.fetch_timeout, self.source.fetch()).await {
                Ok(Ok(records)) => records,
                Ok(Err(e)) => return self.fail(generation, e),
                Err(_) => return self.fail(generation, WatchError::Timeout(self.options.fetch_timeout)),
            };

        let now = self.clock.now();
        let current = self.detector.classify(fetched, now);
        let diff = self
            .detector
            .diff(previous.as_deref().map(Vec::as_slice), &current, now);

        {
            let mut state = self.state.lock();
            if state.generation != generation {
                log::debug!("{} poller: stopped during fetch, discarding result", name);
                return CycleOutcome::Discarded;
            }
            state.baseline = true;
            state.last_success = Some(now);
            if diff.changed {
                state.last_observed_count = current.len();
                state.snapshot = Arc::new(current);
            }
        }

        for event in &diff.events {
            if !self.is_current(generation) {
                log::debug!("{} poller: stopped during emit, dropping remaining events", name);
                break;
            }
            self.listeners.emit(name, event);
        }

        if diff.changed || !diff.events.is_empty() {
            CycleOutcome::Committed {
                events: diff.events.len(),
            }
        } else {
            CycleOutcome::Unchanged
        }
    }

    fn fail(&self, generation: u64, err: WatchError) -> CycleOutcome {
        let name = self.options.name.as_str();
        if !self.is_current(generation) {
            log::debug!("{} poller: stopped during failed fetch: {}", name, err);
            return CycleOutcome::Discarded;
        }
        log::warn!("{} poller: fetch failed: {}", name, err);
        let failure = CycleFailure::new(name, &err, self.clock.now());
        self.error_listeners.emit(name, &failure);
        CycleOutcome::Failed
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::test_support::{recorder, ScriptedSource};

    /// Emits the current length whenever the id list changes.
    struct LenDetector;

    impl Detector for LenDetector {
        type Raw = String;
        type Item = String;
        type Event = usize;

        fn classify(&self, raw: Vec<String>, _now: DateTime<Utc>) -> Vec<String> {
            raw
        }

        fn diff(
            &self,
            previous: Option<&[String]>,
            current: &[String],
            _now: DateTime<Utc>,
        ) -> CycleDiff<usize> {
            if previous == Some(current) {
                return CycleDiff::unchanged();
            }
            CycleDiff {
                changed: true,
                events: vec![current.len()],
            }
        }
    }

    /// Emits `1..=len` as separate events whenever the list changes.
    struct BurstDetector;

    impl Detector for BurstDetector {
        type Raw = String;
        type Item = String;
        type Event = usize;

        fn classify(&self, raw: Vec<String>, _now: DateTime<Utc>) -> Vec<String> {
            raw
        }

        fn diff(
            &self,
            previous: Option<&[String]>,
            current: &[String],
            _now: DateTime<Utc>,
        ) -> CycleDiff<usize> {
            if previous == Some(current) {
                return CycleDiff::unchanged();
            }
            CycleDiff {
                changed: true,
                events: (1..=current.len()).collect(),
            }
        }
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn poller(source: Arc<ScriptedSource<String>>) -> Poller<LenDetector> {
        Poller::new(
            PollerOptions {
                name: "test".into(),
                interval: Duration::from_secs(10),
                fetch_timeout: Duration::from_secs(5),
            },
            source,
            LenDetector,
            Arc::new(SystemClock),
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_schedules_one_timer() {
        let source = Arc::new(ScriptedSource::new());
        source.push_records(ids(&["a"]));
        let poller = poller(source.clone());

        poller.start();
        poller.start();
        settle().await;
        assert_eq!(source.calls(), 1, "exactly one immediate fetch");

        tokio::time::sleep(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(source.calls(), 2, "one timer, one tick per interval");

        tokio::time::sleep(Duration::from_secs(30)).await;
        settle().await;
        assert_eq!(source.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_timer_and_is_idempotent() {
        let source = Arc::new(ScriptedSource::new());
        let poller = poller(source.clone());

        poller.stop();
        poller.start();
        settle().await;
        poller.stop();
        poller.stop();
        assert!(!poller.is_active());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_fetch_emits_nothing() {
        let source = Arc::new(ScriptedSource::new());
        source.push_records(ids(&["a", "b"]));
        source.push_records(ids(&["a", "b"]));
        let poller = poller(source.clone());
        let (events, listener) = recorder::<usize>();
        poller.add_listener(listener);

        assert_eq!(poller.force_poll().await, CycleOutcome::Committed { events: 1 });
        assert_eq!(poller.force_poll().await, CycleOutcome::Unchanged);
        assert_eq!(*events.lock(), vec![2]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_in_flight_result() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(ScriptedSource::new().with_gate(gate.clone()));
        source.push_records(ids(&["a", "b", "c"]));
        let poller = poller(source.clone());
        let (events, listener) = recorder::<usize>();
        poller.add_listener(listener);

        poller.start();
        settle().await;
        assert_eq!(source.calls(), 1);
        assert!(poller.status().in_flight);

        poller.stop();
        gate.notify_one();
        settle().await;

        assert!(events.lock().is_empty());
        assert!(poller.snapshot().is_empty());
        assert!(!poller.status().in_flight);
        assert!(poller.status().last_success.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_during_fetch_runs_immediate_cycle() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(ScriptedSource::new().with_gate(gate.clone()));
        source.push_records(ids(&["a", "b"]));
        let poller = poller(source.clone());
        let (events, listener) = recorder::<usize>();
        poller.add_listener(listener);

        poller.start();
        settle().await;
        assert_eq!(source.calls(), 1);

        poller.stop();
        poller.start();
        settle().await;
        assert_eq!(source.calls(), 2, "restart fetches without waiting an interval");

        gate.notify_one();
        settle().await;
        assert_eq!(*poller.snapshot(), ids(&["a", "b"]));
        assert_eq!(*events.lock(), vec![2]);
        assert!(poller.status().last_success.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_waits_out_forced_cycle_then_polls() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(ScriptedSource::new().with_gate(gate.clone()));
        source.push_records(ids(&["old"]));
        source.push_records(ids(&["new"]));
        let poller = poller(source.clone());

        let (forced, _) = tokio::join!(poller.force_poll(), async {
            settle().await;
            poller.start();
            settle().await;
            assert_eq!(source.calls(), 1, "timer's first cycle waits for the forced one");
            gate.notify_one();
            settle().await;
            assert_eq!(source.calls(), 2);
            gate.notify_one();
            settle().await;
        });

        assert_eq!(forced, CycleOutcome::Discarded);
        assert_eq!(*poller.snapshot(), ids(&["new"]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_from_listener_drops_remaining_events() {
        let source = Arc::new(ScriptedSource::new());
        source.push_records(ids(&["a", "b", "c"]));
        let poller = Arc::new(Poller::new(
            PollerOptions {
                name: "burst".into(),
                interval: Duration::from_secs(10),
                fetch_timeout: Duration::from_secs(5),
            },
            source.clone(),
            BurstDetector,
            Arc::new(SystemClock),
        ));
        let (events, listener) = recorder::<usize>();
        poller.add_listener(listener);
        let weak = Arc::downgrade(&poller);
        poller.add_listener(move |_| {
            if let Some(poller) = weak.upgrade() {
                poller.stop();
            }
        });

        poller.start();
        settle().await;

        assert_eq!(*events.lock(), vec![1]);
        assert!(!poller.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_poll_dropped_while_cycle_in_flight() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(ScriptedSource::new().with_gate(gate.clone()));
        source.push_records(ids(&["a"]));
        let poller = poller(source.clone());

        let (first, second, _) = tokio::join!(poller.force_poll(), poller.force_poll(), async {
            tokio::task::yield_now().await;
            gate.notify_one();
        });

        assert_eq!(first, CycleOutcome::Committed { events: 1 });
        assert_eq!(second, CycleOutcome::Skipped);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_is_silent_to_event_listeners() {
        let source = Arc::new(ScriptedSource::new());
        source.push_records(ids(&["a"]));
        source.push_failure(503);
        source.push_records(ids(&["a", "b"]));
        let poller = poller(source.clone());
        let (events, listener) = recorder::<usize>();
        let (failures, error_listener) = recorder::<CycleFailure>();
        poller.add_listener(listener);
        poller.add_error_listener(error_listener);

        poller.force_poll().await;
        assert_eq!(poller.force_poll().await, CycleOutcome::Failed);
        assert_eq!(*poller.snapshot(), ids(&["a"]));
        poller.force_poll().await;

        assert_eq!(*events.lock(), vec![1, 2]);
        let failures = failures.lock();
        assert_eq!(failures.len(), 1);
        assert!(failures[0].retryable);
        assert_eq!(failures[0].poller, "test");
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_fetch_times_out_and_releases_guard() {
        let source = Arc::new(ScriptedSource::new());
        source.push_hang();
        source.push_records(ids(&["a"]));
        let poller = poller(source.clone());
        let (failures, error_listener) = recorder::<CycleFailure>();
        poller.add_error_listener(error_listener);

        assert_eq!(poller.force_poll().await, CycleOutcome::Failed);
        assert!(failures.lock()[0].message.contains("timed out"));
        assert!(!poller.status().in_flight);
        assert_eq!(poller.force_poll().await, CycleOutcome::Committed { events: 1 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_survives_failures() {
        let source = Arc::new(ScriptedSource::new());
        source.push_failure(500);
        source.push_failure(500);
        source.push_records(ids(&["a"]));
        let poller = poller(source.clone());
        let (events, listener) = recorder::<usize>();
        poller.add_listener(listener);

        poller.start();
        tokio::time::sleep(Duration::from_secs(25)).await;

        assert_eq!(source.calls(), 3);
        assert_eq!(*events.lock(), vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_retained_across_stop_start() {
        let source = Arc::new(ScriptedSource::new());
        source.push_records(ids(&["a", "b"]));
        let poller = poller(source.clone());
        let (events, listener) = recorder::<usize>();
        poller.add_listener(listener);

        poller.start();
        settle().await;
        poller.stop();
        assert_eq!(*poller.snapshot(), ids(&["a", "b"]));

        // Same data after restart: no "everything is new" burst.
        poller.start();
        settle().await;
        assert_eq!(source.calls(), 2);
        assert_eq!(*events.lock(), vec![2]);
        assert_eq!(poller.status().observed_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_only_removes_that_listener() {
        let source = Arc::new(ScriptedSource::new());
        source.push_records(ids(&["a"]));
        source.push_records(ids(&["a", "b"]));
        let poller = poller(source.clone());
        let (kept, kept_listener) = recorder::<usize>();
        let (removed, removed_listener) = recorder::<usize>();
        poller.add_listener(kept_listener);
        let handle = poller.add_listener(removed_listener);

        poller.force_poll().await;
        handle.unsubscribe();
        handle.unsubscribe();
        poller.force_poll().await;

        assert_eq!(*kept.lock(), vec![1, 2]);
        assert_eq!(*removed.lock(), vec![1]);
        assert_eq!(poller.listener_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listeners_run_in_registration_order_and_survive_panics() {
        let source = Arc::new(ScriptedSource::new());
        source.push_records(ids(&["a"]));
        let poller = poller(source.clone());
        let order = Arc::new(Mutex::new(Vec::new()));

        let o = order.clone();
        poller.add_listener(move |_| o.lock().push("first"));
        poller.add_listener(|_| panic!("listener bug"));
        let o = order.clone();
        poller.add_listener(move |_| o.lock().push("third"));

        poller.force_poll().await;
        assert_eq!(*order.lock(), vec!["first", "third"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_counts() {
        let source = Arc::new(ScriptedSource::new());
        source.push_records(ids(&["a", "b", "c"]));
        let poller = poller(source.clone());

        let status = poller.status();
        assert!(!status.active);
        assert_eq!(status.observed_count, 0);

        poller.start();
        settle().await;
        let status = poller.status();
        assert!(status.active);
        assert_eq!(status.observed_count, 3);
        assert!(status.last_success.is_some());

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["observedCount"], 3);
        assert_eq!(json["inFlight"], false);
    }
}
