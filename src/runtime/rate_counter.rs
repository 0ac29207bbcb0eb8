// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
//! Background conversion of amount counters into per-second rate counters.
//!
//! A single named thread wakes on a fixed interval and, for every registered
//! pair, writes `source * 1000 / elapsed_ms` into the rate counter. Counters
//! themselves know nothing about this; the updater is only a periodic reader.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use crate::common::config::rate_counter_update_interval_ms;
use crate::metrics::TUnit;
use crate::novarocks_logging::{debug, error, info};
use crate::runtime::counter::CounterRef;
use crate::runtime::profile::{RuntimeProfile, lock};

static UPDATER: OnceLock<RateCounterUpdater> = OnceLock::new();

/// Process-wide updater, started lazily on first registration.
pub fn rate_counter_updater() -> &'static RateCounterUpdater {
    UPDATER.get_or_init(|| {
        RateCounterUpdater::new(Duration::from_millis(rate_counter_update_interval_ms()))
    })
}

struct RateEntry {
    src: CounterRef,
    rate: CounterRef,
    start: Instant,
}

impl RateEntry {
    fn refresh(&self) {
        let elapsed_ms = self.start.elapsed().as_millis();
        if elapsed_ms == 0 {
            return;
        }
        let per_sec = i128::from(self.src.value()) * 1000 / elapsed_ms as i128;
        self.rate
            .set(per_sec.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64);
    }
}

struct UpdaterState {
    interval: Duration,
    entries: Mutex<Vec<RateEntry>>,
    cv: Condvar,
    cv_mutex: Mutex<()>,
    shutdown: AtomicBool,
    started: AtomicBool,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct RateCounterUpdater {
    state: Arc<UpdaterState>,
}

impl RateCounterUpdater {
    pub fn new(interval: Duration) -> Self {
        let state = UpdaterState {
            interval: interval.max(Duration::from_millis(1)),
            entries: Mutex::new(Vec::new()),
            cv: Condvar::new(),
            cv_mutex: Mutex::new(()),
            shutdown: AtomicBool::new(false),
            started: AtomicBool::new(false),
            handle: Mutex::new(None),
        };
        Self {
            state: Arc::new(state),
        }
    }

    pub fn interval(&self) -> Duration {
        self.state.interval
    }

    /// Starts tracking `src` into `rate`. Registering the same rate counter twice is a no-op.
    pub fn register(&self, src: CounterRef, rate: CounterRef) {
        {
            let mut entries = lock(&self.state.entries);
            if entries.iter().any(|e| Arc::ptr_eq(&e.rate, &rate)) {
                return;
            }
            entries.push(RateEntry {
                src,
                rate,
                start: Instant::now(),
            });
        }
        self.start_if_needed();
    }

    /// Stops tracking `rate` after writing its final value.
    pub fn unregister(&self, rate: &CounterRef) {
        let removed = {
            let mut entries = lock(&self.state.entries);
            entries
                .iter()
                .position(|e| Arc::ptr_eq(&e.rate, rate))
                .map(|pos| entries.remove(pos))
        };
        if let Some(entry) = removed {
            entry.refresh();
        }
    }

    /// Unregisters every entry whose rate counter is one of `rates`.
    pub fn unregister_all(&self, rates: &[CounterRef]) {
        let removed: Vec<RateEntry> = {
            let mut entries = lock(&self.state.entries);
            let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut *entries)
                .into_iter()
                .partition(|e| rates.iter().any(|r| Arc::ptr_eq(r, &e.rate)));
            *entries = kept;
            removed
        };
        for entry in &removed {
            entry.refresh();
        }
    }

    pub fn num_registered(&self) -> usize {
        lock(&self.state.entries).len()
    }

    /// Refreshes every registered rate counter once and drops entries whose
    /// owning profile is gone.
    pub fn update_all(&self) {
        update_all(&self.state);
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state.handle).is_some()
    }

    /// Signals the thread to exit and waits for it. Registered entries are kept
    /// and can still be refreshed through `update_all` or `unregister`.
    pub fn stop(&self) {
        self.state.shutdown.store(true, Ordering::Release);
        self.state.cv.notify_all();
        let handle = lock(&self.state.handle).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("rate counter updater thread panicked");
            }
            info!("rate counter updater stopped");
        }
    }

    fn start_if_needed(&self) {
        if self.state.shutdown.load(Ordering::Acquire) {
            return;
        }
        if self
            .state
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let state = Arc::clone(&self.state);
        match thread::Builder::new()
            .name("profile_rate_counter".to_string())
            .spawn(move || run_updater(state))
        {
            Ok(handle) => {
                *lock(&self.state.handle) = Some(handle);
                info!(
                    interval_ms = self.state.interval.as_millis() as u64,
                    "rate counter updater started"
                );
            }
            Err(e) => {
                self.state.started.store(false, Ordering::Release);
                error!("failed to spawn rate counter updater thread: {e}");
            }
        }
    }
}

fn update_all(state: &UpdaterState) {
    let mut entries = lock(&state.entries);
    let before = entries.len();
    // The updater holding the only reference means nothing can read the rate.
    entries.retain(|entry| {
        if Arc::strong_count(&entry.rate) == 1 {
            return false;
        }
        entry.refresh();
        true
    });
    let dropped = before - entries.len();
    if dropped > 0 {
        debug!(dropped, "released rate counters of dropped profiles");
    }
}

fn run_updater(state: Arc<UpdaterState>) {
    loop {
        {
            let guard = lock(&state.cv_mutex);
            if state.shutdown.load(Ordering::Acquire) {
                break;
            }
            let _ = state
                .cv
                .wait_timeout(guard, state.interval)
                .unwrap_or_else(|e| e.into_inner());
        }
        if state.shutdown.load(Ordering::Acquire) {
            break;
        }
        update_all(&state);
    }
    debug!("rate counter updater loop exited");
}

impl RuntimeProfile {
    /// Registers a per-second counter fed from `src` by the process-wide updater.
    /// A BYTES source yields BYTES_PER_SECOND, anything else UNIT_PER_SECOND.
    pub fn add_rate_counter(&self, name: impl Into<String>, src: &CounterRef) -> CounterRef {
        self.add_rate_counter_with(rate_counter_updater(), name, src)
    }

    pub fn add_rate_counter_with(
        &self,
        updater: &RateCounterUpdater,
        name: impl Into<String>,
        src: &CounterRef,
    ) -> CounterRef {
        let unit = match src.unit() {
            TUnit::BYTES => TUnit::BYTES_PER_SECOND,
            _ => TUnit::UNIT_PER_SECOND,
        };
        let rate = self.add_counter(name, unit);
        updater.register(Arc::clone(src), Arc::clone(&rate));
        rate
    }

    /// Stops the process-wide updater from refreshing this node's rate counters,
    /// after writing their final values.
    pub fn stop_rate_counters_updates(&self) {
        self.stop_rate_counters_updates_with(rate_counter_updater());
    }

    pub fn stop_rate_counters_updates_with(&self, updater: &RateCounterUpdater) {
        let rates: Vec<CounterRef> = self
            .counter_forest()
            .into_iter()
            .map(|(counter, _)| counter)
            .filter(|c| matches!(c.unit(), TUnit::BYTES_PER_SECOND | TUnit::UNIT_PER_SECOND))
            .collect();
        if !rates.is_empty() {
            updater.unregister_all(&rates);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_follows_source() {
        let updater = RateCounterUpdater::new(Duration::from_secs(3600));
        let profile = RuntimeProfile::new("scan");
        let bytes = profile.add_counter("BytesRead", TUnit::BYTES);
        let rows = profile.add_counter("RowsRead", TUnit::UNIT);
        let byte_rate = profile.add_rate_counter_with(&updater, "BytesReadRate", &bytes);
        let row_rate = profile.add_rate_counter_with(&updater, "RowsReadRate", &rows);
        assert_eq!(byte_rate.unit(), TUnit::BYTES_PER_SECOND);
        assert_eq!(row_rate.unit(), TUnit::UNIT_PER_SECOND);
        assert_eq!(updater.num_registered(), 2);
        updater.stop();
    }

    #[test]
    fn duplicate_registration_is_ignored() {
        let updater = RateCounterUpdater::new(Duration::from_secs(3600));
        let profile = RuntimeProfile::new("scan");
        let rows = profile.add_counter("RowsRead", TUnit::UNIT);
        let a = profile.add_rate_counter_with(&updater, "RowsReadRate", &rows);
        let b = profile.add_rate_counter_with(&updater, "RowsReadRate", &rows);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(updater.num_registered(), 1);
        updater.stop();
    }

    #[test]
    fn unregister_writes_final_rate() {
        let updater = RateCounterUpdater::new(Duration::from_secs(3600));
        let profile = RuntimeProfile::new("scan");
        let rows = profile.add_counter("RowsRead", TUnit::UNIT);
        let rate = profile.add_rate_counter_with(&updater, "RowsReadRate", &rows);
        rows.update(1_000_000);
        thread::sleep(Duration::from_millis(20));
        updater.unregister(&rate);
        assert_eq!(updater.num_registered(), 0);
        // 1M rows over at least 20ms can never exceed 50M/sec.
        assert!(rate.value() > 0);
        assert!(rate.value() <= 50_000_000);
        updater.stop();
    }

    #[test]
    fn dropped_profiles_release_their_entries() {
        let updater = RateCounterUpdater::new(Duration::from_secs(3600));
        for i in 0..100 {
            let profile = RuntimeProfile::new(format!("scan_{i}"));
            let rows = profile.add_counter("RowsRead", TUnit::UNIT);
            profile.add_rate_counter_with(&updater, "RowsReadRate", &rows);
        }
        let kept = RuntimeProfile::new("kept");
        let rows = kept.add_counter("RowsRead", TUnit::UNIT);
        kept.add_rate_counter_with(&updater, "RowsReadRate", &rows);
        assert_eq!(updater.num_registered(), 101);

        updater.update_all();
        assert_eq!(updater.num_registered(), 1);
        updater.stop();
    }

    #[test]
    fn stop_rate_counters_updates_unregisters_profile() {
        let updater = RateCounterUpdater::new(Duration::from_secs(3600));
        let profile = RuntimeProfile::new("scan");
        let bytes = profile.add_counter("BytesRead", TUnit::BYTES);
        let rows = profile.add_counter("RowsRead", TUnit::UNIT);
        let byte_rate = profile.add_rate_counter_with(&updater, "BytesReadRate", &bytes);
        profile.add_rate_counter_with(&updater, "RowsReadRate", &rows);
        let other = RuntimeProfile::new("agg");
        let other_rows = other.add_counter("RowsRead", TUnit::UNIT);
        other.add_rate_counter_with(&updater, "RowsReadRate", &other_rows);
        assert_eq!(updater.num_registered(), 3);

        bytes.update(1 << 20);
        thread::sleep(Duration::from_millis(5));
        profile.stop_rate_counters_updates_with(&updater);
        assert_eq!(updater.num_registered(), 1);
        assert!(byte_rate.value() > 0);

        // A stopped counter is no longer refreshed.
        let frozen = byte_rate.value();
        bytes.update(1 << 30);
        updater.update_all();
        assert_eq!(byte_rate.value(), frozen);
        updater.stop();
    }

    #[test]
    fn background_thread_refreshes_and_stops() {
        let updater = RateCounterUpdater::new(Duration::from_millis(5));
        let profile = RuntimeProfile::new("scan");
        let bytes = profile.add_counter("BytesRead", TUnit::BYTES);
        bytes.update(4096);
        let rate = profile.add_rate_counter_with(&updater, "BytesReadRate", &bytes);
        assert!(updater.is_running());
        let deadline = Instant::now() + Duration::from_secs(5);
        while rate.value() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(rate.value() > 0);
        updater.stop();
        assert!(!updater.is_running());
    }
}
