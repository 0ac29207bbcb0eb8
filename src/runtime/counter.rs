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
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use crate::metrics::TUnit;
use crate::runtime_profile::{
    TCounter, TCounterAggregateType, TCounterMergeType, TCounterMinMaxType, TCounterStrategy,
};

pub type CounterRef = Arc<Counter>;

/// Computes the value of a derived counter on every read. Must not block.
pub type DerivedCounterFunction = Box<dyn Fn() -> i64 + Send + Sync>;

enum CounterKind {
    Plain,
    /// `value` holds the highest value ever observed for `current`.
    HighWaterMark { current: AtomicI64 },
    /// `value` holds the lowest value ever observed for `current`.
    LowWaterMark { current: AtomicI64 },
    Derived(DerivedCounterFunction),
}

impl fmt::Debug for CounterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CounterKind::Plain => f.write_str("Plain"),
            CounterKind::HighWaterMark { current } => f
                .debug_struct("HighWaterMark")
                .field("current", &current.load(Ordering::Relaxed))
                .finish(),
            CounterKind::LowWaterMark { current } => f
                .debug_struct("LowWaterMark")
                .field("current", &current.load(Ordering::Relaxed))
                .finish(),
            CounterKind::Derived(_) => f.write_str("Derived"),
        }
    }
}

/// Advisory min/max slot. Written by merges, never compared on write.
#[derive(Debug, Default)]
struct OptionalValue {
    set: AtomicBool,
    value: AtomicI64,
}

impl OptionalValue {
    fn store(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
        self.set.store(true, Ordering::Relaxed);
    }

    fn load(&self) -> Option<i64> {
        if self.set.load(Ordering::Relaxed) {
            Some(self.value.load(Ordering::Relaxed))
        } else {
            None
        }
    }
}

/// A named profile value with a unit and an aggregation strategy.
///
/// Value mutation never takes a lock and uses relaxed ordering: counters are read
/// for reporting only, so callers that need ordering with other memory must add
/// their own synchronization.
#[derive(Debug)]
pub struct Counter {
    name: String,
    unit: TUnit,
    strategy: TCounterStrategy,
    value: AtomicI64,
    min_value: OptionalValue,
    max_value: OptionalValue,
    /// Number of instance values folded into an AVG counter by two-tree merges.
    samples: AtomicI64,
    kind: CounterKind,
}

impl Counter {
    pub fn new(name: impl Into<String>, unit: TUnit, strategy: TCounterStrategy) -> Self {
        Self::with_value(name, unit, strategy, 0)
    }

    pub fn with_value(
        name: impl Into<String>,
        unit: TUnit,
        strategy: TCounterStrategy,
        value: i64,
    ) -> Self {
        Self::with_kind(name, unit, strategy, value, CounterKind::Plain)
    }

    pub(crate) fn new_high_water_mark(
        name: impl Into<String>,
        unit: TUnit,
        strategy: TCounterStrategy,
    ) -> Self {
        let kind = CounterKind::HighWaterMark {
            current: AtomicI64::new(0),
        };
        Self::with_kind(name, unit, strategy, 0, kind)
    }

    pub(crate) fn new_low_water_mark(
        name: impl Into<String>,
        unit: TUnit,
        strategy: TCounterStrategy,
    ) -> Self {
        let kind = CounterKind::LowWaterMark {
            current: AtomicI64::new(i64::MAX),
        };
        Self::with_kind(name, unit, strategy, i64::MAX, kind)
    }

    pub(crate) fn new_derived(
        name: impl Into<String>,
        unit: TUnit,
        counter_fn: DerivedCounterFunction,
    ) -> Self {
        Self::with_kind(
            name,
            unit,
            default_counter_strategy(unit),
            0,
            CounterKind::Derived(counter_fn),
        )
    }

    fn with_kind(
        name: impl Into<String>,
        unit: TUnit,
        strategy: TCounterStrategy,
        value: i64,
        kind: CounterKind,
    ) -> Self {
        Self {
            name: name.into(),
            unit,
            strategy,
            value: AtomicI64::new(value),
            min_value: OptionalValue::default(),
            max_value: OptionalValue::default(),
            samples: AtomicI64::new(1),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> TUnit {
        self.unit
    }

    pub fn strategy(&self) -> &TCounterStrategy {
        &self.strategy
    }

    pub fn is_derived(&self) -> bool {
        matches!(self.kind, CounterKind::Derived(_))
    }

    pub fn is_water_mark(&self) -> bool {
        matches!(
            self.kind,
            CounterKind::HighWaterMark { .. } | CounterKind::LowWaterMark { .. }
        )
    }

    pub fn update(&self, delta: i64) {
        if self.reject_derived_mutation() {
            return;
        }
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// Ors `delta` into a bitmask counter.
    pub fn bit_or(&self, delta: i64) {
        if self.reject_derived_mutation() {
            return;
        }
        let mut old = self.value.load(Ordering::Relaxed);
        loop {
            if old | delta == old {
                return;
            }
            match self.value.compare_exchange_weak(
                old,
                old | delta,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(actual) => old = actual,
            }
        }
    }

    pub fn set(&self, value: i64) {
        if self.reject_derived_mutation() {
            return;
        }
        match &self.kind {
            CounterKind::HighWaterMark { current } => {
                current.store(value, Ordering::Relaxed);
                self.update_mark(value, true);
            }
            CounterKind::LowWaterMark { current } => {
                current.store(value, Ordering::Relaxed);
                self.update_mark(value, false);
            }
            _ => self.value.store(value, Ordering::Relaxed),
        }
    }

    /// Stores `value` as is. For a watermark counter both the mark and the
    /// current value are replaced, even when that moves the mark backwards.
    pub(crate) fn overwrite(&self, value: i64) {
        if self.reject_derived_mutation() {
            return;
        }
        if let CounterKind::HighWaterMark { current } | CounterKind::LowWaterMark { current } =
            &self.kind
        {
            current.store(value, Ordering::Relaxed);
        }
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn set_double(&self, value: f64) {
        self.set(value.to_bits() as i64);
    }

    pub fn value(&self) -> i64 {
        match &self.kind {
            CounterKind::Derived(counter_fn) => counter_fn(),
            _ => self.value.load(Ordering::Relaxed),
        }
    }

    /// Reinterprets the stored bits of a DOUBLE_VALUE counter.
    pub fn double_value(&self) -> f64 {
        f64::from_bits(self.value() as u64)
    }

    pub fn set_min(&self, min: i64) {
        self.min_value.store(min);
    }

    pub fn set_max(&self, max: i64) {
        self.max_value.store(max);
    }

    pub fn min_value(&self) -> Option<i64> {
        self.min_value.load()
    }

    pub fn max_value(&self) -> Option<i64> {
        self.max_value.load()
    }

    pub fn is_sum(&self) -> bool {
        matches!(
            self.strategy.aggregate_type,
            TCounterAggregateType::SUM | TCounterAggregateType::SUM_AVG
        )
    }

    pub fn is_avg(&self) -> bool {
        matches!(
            self.strategy.aggregate_type,
            TCounterAggregateType::AVG | TCounterAggregateType::AVG_SUM
        )
    }

    /// Whether the instance-level merge leaves this counter alone.
    pub fn skip_merge(&self) -> bool {
        !self.should_merge(true)
    }

    /// `first_merge` is true when merging raw instance profiles and false when
    /// merging profiles that are already aggregates of other profiles.
    pub fn should_merge(&self, first_merge: bool) -> bool {
        match self.strategy.merge_type {
            TCounterMergeType::MERGE_ALL => true,
            TCounterMergeType::SKIP_ALL => false,
            TCounterMergeType::SKIP_FIRST_MERGE => !first_merge,
            TCounterMergeType::SKIP_SECOND_MERGE => first_merge,
        }
    }

    pub fn skip_min_max(&self) -> bool {
        self.strategy.min_max_type == TCounterMinMaxType::SKIP_ALL
    }

    pub fn display_threshold(&self) -> i64 {
        self.strategy.display_threshold
    }

    pub fn should_display(&self) -> bool {
        let threshold = self.strategy.display_threshold;
        threshold == 0 || self.value() > threshold
    }

    pub fn to_thrift(&self) -> TCounter {
        TCounter::new(
            self.name.clone(),
            self.unit,
            self.value(),
            Some(self.strategy.clone()),
            self.min_value(),
            self.max_value(),
        )
    }

    /// Copies value, extremes and sample count into a fresh plain counter.
    pub(crate) fn clone_detached(&self) -> Counter {
        let copy = Counter::with_value(
            self.name.clone(),
            self.unit,
            self.strategy.clone(),
            self.value(),
        );
        if let Some(min) = self.min_value() {
            copy.set_min(min);
        }
        if let Some(max) = self.max_value() {
            copy.set_max(max);
        }
        copy.samples.store(self.samples(), Ordering::Relaxed);
        copy
    }

    pub(crate) fn samples(&self) -> i64 {
        self.samples.load(Ordering::Relaxed)
    }

    /// Number of instance values an AVG counter stands for. A counter that was
    /// never written and never merged stands for none.
    fn avg_weight(&self) -> i64 {
        let samples = self.samples();
        if samples <= 1 && self.value() == 0 {
            0
        } else {
            samples.max(1)
        }
    }

    /// Folds `src` into this counter: sums for SUM counters, a sample-weighted
    /// mean for AVG counters.
    pub(crate) fn merge_from(&self, src: &Counter) {
        if self.reject_derived_mutation() {
            return;
        }
        let is_double = self.unit == TUnit::DOUBLE_VALUE;
        if self.is_avg() {
            let n = self.avg_weight();
            let m = src.avg_weight();
            if m == 0 {
                return;
            }
            if n == 0 {
                self.set(src.value());
                self.samples.store(m, Ordering::Relaxed);
                return;
            }
            if is_double {
                let merged = (self.double_value() * n as f64 + src.double_value() * m as f64)
                    / (n + m) as f64;
                self.set_double(merged);
            } else {
                let total = i128::from(self.value()) * i128::from(n)
                    + i128::from(src.value()) * i128::from(m);
                let merged = total / i128::from(n + m);
                self.set(i64::try_from(merged).unwrap_or(i64::MAX));
            }
            self.samples.store(n + m, Ordering::Relaxed);
        } else if is_double {
            self.set_double(self.double_value() + src.double_value());
        } else {
            self.update(src.value());
        }
    }

    fn current_value(&self) -> i64 {
        match &self.kind {
            CounterKind::HighWaterMark { current } | CounterKind::LowWaterMark { current } => {
                current.load(Ordering::Relaxed)
            }
            _ => self.value(),
        }
    }

    fn water_mark_add(&self, delta: i64) {
        match &self.kind {
            CounterKind::HighWaterMark { current } => {
                let new_value = current.fetch_add(delta, Ordering::Relaxed).wrapping_add(delta);
                self.update_mark(new_value, true);
            }
            CounterKind::LowWaterMark { current } => {
                let new_value = current.fetch_add(delta, Ordering::Relaxed).wrapping_add(delta);
                self.update_mark(new_value, false);
            }
            _ => self.update(delta),
        }
    }

    fn water_mark_try_add(&self, delta: i64, max: i64) -> bool {
        let (current, is_high) = match &self.kind {
            CounterKind::HighWaterMark { current } => (current, true),
            CounterKind::LowWaterMark { current } => (current, false),
            _ => (&self.value, true),
        };
        let mut old = current.load(Ordering::Relaxed);
        loop {
            let Some(new_value) = old.checked_add(delta) else {
                return false;
            };
            if new_value > max {
                return false;
            }
            match current.compare_exchange_weak(old, new_value, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => {
                    if self.is_water_mark() {
                        self.update_mark(new_value, is_high);
                    }
                    return true;
                }
                Err(actual) => old = actual,
            }
        }
    }

    /// Raises (or lowers) the recorded extreme to `v` without blocking.
    fn update_mark(&self, v: i64, is_high: bool) {
        let mut old = self.value.load(Ordering::Relaxed);
        loop {
            let new_value = if is_high { old.max(v) } else { old.min(v) };
            if new_value == old {
                return;
            }
            match self
                .value
                .compare_exchange_weak(old, new_value, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => old = actual,
            }
        }
    }

    fn reject_derived_mutation(&self) -> bool {
        let derived = self.is_derived();
        debug_assert!(
            !derived,
            "derived counter {} cannot be mutated directly",
            self.name
        );
        derived
    }
}

/// Handle to a counter that tracks a live current value next to its extreme.
/// `value()` reports the extreme, `current_value()` the live value.
#[derive(Clone, Debug)]
pub struct WaterMarkCounter {
    counter: CounterRef,
}

pub type HighWaterMarkCounter = WaterMarkCounter;
pub type LowWaterMarkCounter = WaterMarkCounter;

impl WaterMarkCounter {
    pub(crate) fn new(counter: CounterRef) -> Self {
        Self { counter }
    }

    pub fn counter(&self) -> &CounterRef {
        &self.counter
    }

    pub fn add(&self, delta: i64) {
        self.counter.water_mark_add(delta);
    }

    /// Adds `delta` only if the resulting current value stays within `max`.
    /// Returns false and leaves the counter untouched otherwise.
    pub fn try_add(&self, delta: i64, max: i64) -> bool {
        self.counter.water_mark_try_add(delta, max)
    }

    pub fn current_value(&self) -> i64 {
        self.counter.current_value()
    }
}

impl Deref for WaterMarkCounter {
    type Target = Counter;

    fn deref(&self) -> &Counter {
        &self.counter
    }
}

pub fn create_strategy(
    aggregate_type: TCounterAggregateType,
    merge_type: TCounterMergeType,
    display_threshold: i64,
    min_max_type: TCounterMinMaxType,
) -> TCounterStrategy {
    TCounterStrategy::new(aggregate_type, merge_type, display_threshold, min_max_type)
}

/// Time counters are averaged across instances, everything else is summed.
pub fn create_strategy_for_unit(
    unit: TUnit,
    merge_type: TCounterMergeType,
    display_threshold: i64,
    min_max_type: TCounterMinMaxType,
) -> TCounterStrategy {
    let aggregate_type = if unit.is_time() {
        TCounterAggregateType::AVG
    } else {
        TCounterAggregateType::SUM
    };
    create_strategy(aggregate_type, merge_type, display_threshold, min_max_type)
}

pub fn default_counter_strategy(unit: TUnit) -> TCounterStrategy {
    create_strategy_for_unit(
        unit,
        TCounterMergeType::MERGE_ALL,
        0,
        TCounterMinMaxType::MIN_MAX_ALL,
    )
}

/// Throughput of `total_counter` per second of `timer`.
pub fn units_per_second(total_counter: &Counter, timer: &Counter) -> i64 {
    debug_assert!(matches!(total_counter.unit(), TUnit::BYTES | TUnit::UNIT));
    debug_assert_eq!(timer.unit(), TUnit::TIME_NS);
    let elapsed_ns = timer.value();
    if elapsed_ns <= 0 {
        return 0;
    }
    let secs = elapsed_ns as f64 / 1_000_000_000.0;
    (total_counter.value() as f64 / secs) as i64
}

pub fn counter_sum(counters: &[CounterRef]) -> i64 {
    counters
        .iter()
        .fold(0i64, |acc, c| acc.saturating_add(c.value()))
}

pub fn clamp_u128_to_i64(value: u128) -> i64 {
    if value > i64::MAX as u128 {
        i64::MAX
    } else {
        value as i64
    }
}
