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
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::metrics::TUnit;
use crate::runtime::counter::CounterRef;
use crate::runtime::stopwatch::MonotonicStopWatch;

/// Adds the time spent in a scope to a TIME_NS counter when dropped.
///
/// The update happens exactly once on every exit path, including unwinding.
/// It is suppressed when the cancellation flag reads true at that point.
pub struct ScopedTimer {
    counter: Option<CounterRef>,
    sw: MonotonicStopWatch,
    is_cancelled: Option<Arc<AtomicBool>>,
}

impl ScopedTimer {
    pub fn new(counter: CounterRef) -> Self {
        Self::from_option(Some(counter), None)
    }

    pub fn with_cancel(counter: CounterRef, is_cancelled: Arc<AtomicBool>) -> Self {
        Self::from_option(Some(counter), Some(is_cancelled))
    }

    /// A timer on an absent counter measures time but records nothing.
    pub fn from_option(counter: Option<CounterRef>, is_cancelled: Option<Arc<AtomicBool>>) -> Self {
        if let Some(c) = &counter {
            debug_assert_eq!(c.unit(), TUnit::TIME_NS, "timer on non-time counter {}", c.name());
        }
        Self {
            counter,
            sw: MonotonicStopWatch::started(),
            is_cancelled,
        }
    }

    pub fn start(&mut self) {
        self.sw.start();
    }

    pub fn stop(&mut self) {
        self.sw.stop();
    }

    pub fn elapsed_time(&self) -> i64 {
        self.sw.elapsed_time()
    }

    pub fn is_cancelled(&self) -> bool {
        self.is_cancelled
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Flushes the elapsed time now. Later calls and the drop become no-ops.
    pub fn update_counter(&mut self) {
        let Some(counter) = self.counter.take() else {
            return;
        };
        if !self.is_cancelled() {
            counter.update(self.sw.elapsed_time());
        }
    }
}

impl Drop for ScopedTimer {
    fn drop(&mut self) {
        self.sw.stop();
        self.update_counter();
    }
}

/// Adds elapsed nanoseconds to a plain integer when dropped.
pub struct ScopedRawTimer<'a> {
    sw: MonotonicStopWatch,
    counter: &'a mut i64,
}

impl<'a> ScopedRawTimer<'a> {
    pub fn new(counter: &'a mut i64) -> Self {
        Self {
            sw: MonotonicStopWatch::started(),
            counter,
        }
    }
}

impl Drop for ScopedRawTimer<'_> {
    fn drop(&mut self) {
        *self.counter = self.counter.saturating_add(self.sw.elapsed_time());
    }
}

/// Subtracts `val` from a counter on construction and adds it back on drop.
/// Models in-flight gauges that must balance on every exit path.
pub struct ScopedCounter {
    counter: CounterRef,
    val: i64,
}

impl ScopedCounter {
    pub fn new(counter: CounterRef, val: i64) -> Self {
        counter.update(-val);
        Self { counter, val }
    }
}

impl Drop for ScopedCounter {
    fn drop(&mut self) {
        self.counter.update(self.val);
    }
}
