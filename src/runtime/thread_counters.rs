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
//! Per-thread wall clock, CPU and context-switch accounting.

use std::time::Instant;

use crate::metrics::TUnit;
use crate::runtime::counter::{CounterRef, clamp_u128_to_i64};
use crate::runtime::profile::RuntimeProfile;

/// Counter handles registered by [`RuntimeProfile::add_thread_counters`].
#[derive(Clone)]
pub struct ThreadCounters {
    pub total_time: CounterRef,
    pub user_time: CounterRef,
    pub sys_time: CounterRef,
    pub voluntary_context_switches: CounterRef,
    pub involuntary_context_switches: CounterRef,
}

/// One sample of the calling thread's resource usage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ThreadUsage {
    pub user_time_ns: i64,
    pub sys_time_ns: i64,
    pub voluntary_context_switches: i64,
    pub involuntary_context_switches: i64,
}

impl ThreadUsage {
    fn delta_since(&self, earlier: &ThreadUsage) -> ThreadUsage {
        ThreadUsage {
            user_time_ns: self.user_time_ns.saturating_sub(earlier.user_time_ns).max(0),
            sys_time_ns: self.sys_time_ns.saturating_sub(earlier.sys_time_ns).max(0),
            voluntary_context_switches: self
                .voluntary_context_switches
                .saturating_sub(earlier.voluntary_context_switches)
                .max(0),
            involuntary_context_switches: self
                .involuntary_context_switches
                .saturating_sub(earlier.involuntary_context_switches)
                .max(0),
        }
    }
}

#[cfg(target_os = "linux")]
fn timeval_to_ns(tv: libc::timeval) -> i64 {
    if tv.tv_sec < 0 || tv.tv_usec < 0 {
        return 0;
    }
    let ns = (tv.tv_sec as u128)
        .saturating_mul(1_000_000_000)
        .saturating_add(tv.tv_usec as u128 * 1_000);
    clamp_u128_to_i64(ns)
}

/// Samples `getrusage(RUSAGE_THREAD)`. `None` when unavailable.
#[cfg(target_os = "linux")]
pub fn current_thread_usage() -> Option<ThreadUsage> {
    // SAFETY: `usage` is a plain C struct fully written by getrusage on success.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_THREAD, &mut usage) };
    if rc != 0 {
        return None;
    }
    Some(ThreadUsage {
        user_time_ns: timeval_to_ns(usage.ru_utime),
        sys_time_ns: timeval_to_ns(usage.ru_stime),
        voluntary_context_switches: usage.ru_nvcsw as i64,
        involuntary_context_switches: usage.ru_nivcsw as i64,
    })
}

/// Without per-thread rusage only the thread CPU clock is available; it is
/// reported as user time.
#[cfg(any(
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub fn current_thread_usage() -> Option<ThreadUsage> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    let rc = unsafe { libc::clock_gettime(libc::CLOCK_THREAD_CPUTIME_ID, &mut ts) };
    if rc != 0 || ts.tv_sec < 0 || ts.tv_nsec < 0 {
        return None;
    }
    let ns = (ts.tv_sec as u128)
        .saturating_mul(1_000_000_000)
        .saturating_add(ts.tv_nsec as u128);
    Some(ThreadUsage {
        user_time_ns: clamp_u128_to_i64(ns),
        ..ThreadUsage::default()
    })
}

#[cfg(not(any(
    target_os = "linux",
    target_os = "macos",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
)))]
pub fn current_thread_usage() -> Option<ThreadUsage> {
    None
}

impl RuntimeProfile {
    /// Registers the five per-thread counters under `prefix`.
    pub fn add_thread_counters(&self, prefix: &str) -> ThreadCounters {
        let total_name = format!("{prefix}TotalWallClockTime");
        ThreadCounters {
            total_time: self.add_timer(total_name.clone()),
            user_time: self.add_child_timer(format!("{prefix}UserTime"), &total_name),
            sys_time: self.add_child_timer(format!("{prefix}SysTime"), &total_name),
            voluntary_context_switches: self
                .add_counter(format!("{prefix}VoluntaryContextSwitches"), TUnit::UNIT),
            involuntary_context_switches: self
                .add_counter(format!("{prefix}InvoluntaryContextSwitches"), TUnit::UNIT),
        }
    }
}

/// Measures the current thread from construction until drop (or `stop`) and adds
/// the deltas to a [`ThreadCounters`] set. Must be dropped on the thread that
/// created it for the CPU figures to mean anything.
pub struct ThreadCounterMeasurement {
    counters: Option<ThreadCounters>,
    wall_start: Instant,
    usage_start: Option<ThreadUsage>,
}

impl ThreadCounterMeasurement {
    pub fn new(counters: ThreadCounters) -> Self {
        Self {
            counters: Some(counters),
            wall_start: Instant::now(),
            usage_start: current_thread_usage(),
        }
    }

    /// Records the deltas now. Later calls and the drop do nothing.
    pub fn stop(&mut self) {
        let Some(counters) = self.counters.take() else {
            return;
        };
        counters
            .total_time
            .update(clamp_u128_to_i64(self.wall_start.elapsed().as_nanos()));
        let delta = match (self.usage_start, current_thread_usage()) {
            (Some(start), Some(end)) => end.delta_since(&start),
            _ => ThreadUsage::default(),
        };
        counters.user_time.update(delta.user_time_ns);
        counters.sys_time.update(delta.sys_time_ns);
        counters
            .voluntary_context_switches
            .update(delta.voluntary_context_switches);
        counters
            .involuntary_context_switches
            .update(delta.involuntary_context_switches);
    }
}

impl Drop for ThreadCounterMeasurement {
    fn drop(&mut self) {
        self.stop();
    }
}
