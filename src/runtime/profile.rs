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
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use crate::common::config::pretty_print_indent;
use crate::common::pretty_printer;
use crate::metrics::TUnit;
use crate::novarocks_logging::{debug, warn};
use crate::runtime::counter::{
    Counter, CounterRef, DerivedCounterFunction, WaterMarkCounter, default_counter_strategy,
};
use crate::runtime::event_sequence::{EventSequence, EventSequenceRef};
use crate::runtime::scoped_timer::ScopedTimer;
use crate::runtime_profile::{self, TCounterStrategy};

/// Parent name of every top-level counter.
pub const ROOT_COUNTER: &str = "";
pub const TOTAL_TIME_COUNTER_NAME: &str = "TotalTime";
pub const MERGED_INFO_PREFIX_MIN: &str = "__MIN_OF_";
pub const MERGED_INFO_PREFIX_MAX: &str = "__MAX_OF_";
const EXEC_OPTION_KEY: &str = "ExecOption";

/// Counters of one node plus the parent/child relation between them.
#[derive(Default)]
pub(crate) struct CounterTable {
    /// name -> (counter, parent counter name)
    pub(crate) counter_map: BTreeMap<String, (CounterRef, String)>,
    /// parent counter name -> child counter names
    pub(crate) child_counter_map: BTreeMap<String, BTreeSet<String>>,
}

impl CounterTable {
    pub(crate) fn insert(&mut self, counter: CounterRef, parent_name: &str) -> CounterRef {
        let name = counter.name().to_string();
        self.child_counter_map
            .entry(parent_name.to_string())
            .or_default()
            .insert(name.clone());
        self.counter_map
            .insert(name, (Arc::clone(&counter), parent_name.to_string()));
        counter
    }

    /// Resolves `parent_name` to a registered counter, falling back to the root.
    pub(crate) fn resolve_parent<'a>(&self, name: &str, parent_name: &'a str) -> &'a str {
        if parent_name == ROOT_COUNTER || self.counter_map.contains_key(parent_name) {
            return parent_name;
        }
        debug_assert!(
            false,
            "parent counter {parent_name} of {name} is not registered"
        );
        warn!(
            counter = name,
            parent = parent_name,
            "parent counter not registered, attaching to root"
        );
        ROOT_COUNTER
    }

    /// Counter names and parents with every parent listed before its children.
    pub(crate) fn forest(&self) -> Vec<(CounterRef, String)> {
        let mut out = Vec::with_capacity(self.counter_map.len());
        let mut queue = VecDeque::from([ROOT_COUNTER.to_string()]);
        while let Some(parent) = queue.pop_front() {
            let Some(children) = self.child_counter_map.get(&parent) else {
                continue;
            };
            for child in children {
                if let Some((counter, _)) = self.counter_map.get(child) {
                    out.push((Arc::clone(counter), parent.clone()));
                    queue.push_back(child.clone());
                }
            }
        }
        out
    }

    fn remove_recursively(&mut self, name: &str) {
        let Some((_, parent)) = self.counter_map.remove(name) else {
            return;
        };
        if let Some(siblings) = self.child_counter_map.get_mut(&parent) {
            siblings.remove(name);
        }
        let mut pending = vec![name.to_string()];
        while let Some(current) = pending.pop() {
            if let Some(children) = self.child_counter_map.remove(&current) {
                for child in children {
                    self.counter_map.remove(&child);
                    pending.push(child);
                }
            }
        }
    }

    /// Whether `candidate` is `name` or one of its ancestors.
    pub(crate) fn is_ancestor_or_self(&self, candidate: &str, name: &str) -> bool {
        let mut current = candidate;
        loop {
            if current == name {
                return true;
            }
            match self.counter_map.get(current) {
                Some((_, parent)) if parent != ROOT_COUNTER => current = parent,
                _ => return false,
            }
        }
    }

    /// Moves an existing counter under a new parent.
    pub(crate) fn reparent(&mut self, name: &str, new_parent: &str) {
        let Some((_, old_parent)) = self.counter_map.get(name) else {
            return;
        };
        let old_parent = old_parent.clone();
        if old_parent == new_parent {
            return;
        }
        if let Some(siblings) = self.child_counter_map.get_mut(&old_parent) {
            siblings.remove(name);
        }
        self.child_counter_map
            .entry(new_parent.to_string())
            .or_default()
            .insert(name.to_string());
        if let Some(entry) = self.counter_map.get_mut(name) {
            entry.1 = new_parent.to_string();
        }
    }
}

#[derive(Default)]
pub(crate) struct ChildTable {
    pub(crate) child_map: HashMap<String, RuntimeProfile>,
    /// (child, indent) in display order.
    pub(crate) children: Vec<(RuntimeProfile, bool)>,
}

#[derive(Default)]
pub(crate) struct InfoStrings {
    pub(crate) values: BTreeMap<String, String>,
    pub(crate) display_order: Vec<String>,
}

impl InfoStrings {
    pub(crate) fn upsert(&mut self, key: &str, value: String) {
        match self.values.get_mut(key) {
            Some(existing) => *existing = value,
            None => {
                self.values.insert(key.to_string(), value);
                self.display_order.push(key.to_string());
            }
        }
    }

    pub(crate) fn ordered(&self) -> Vec<(String, String)> {
        self.display_order
            .iter()
            .filter_map(|k| self.values.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }
}

/// A node in the runtime profile tree.
///
/// Each structural group (counters, children, info strings, event sequences,
/// version) has its own lock and no operation holds two of them at once. Counter
/// values are updated through the returned [`CounterRef`]s without any lock.
#[derive(Clone)]
pub struct RuntimeProfile {
    pub(crate) inner: Arc<RuntimeProfileInner>,
}

pub type Profiler = RuntimeProfile;

pub(crate) struct RuntimeProfileInner {
    name: RwLock<String>,
    metadata: AtomicI64,
    is_averaged_profile: bool,
    parent: Mutex<Weak<RuntimeProfileInner>>,
    pub(crate) counters: Mutex<CounterTable>,
    pub(crate) children: Mutex<ChildTable>,
    pub(crate) info_strings: Mutex<InfoStrings>,
    event_sequences: Mutex<BTreeMap<String, EventSequenceRef>>,
    total_time: CounterRef,
    /// f64 bits of the self-time fraction from the last `compute_time_in_profile`.
    local_time_percent: AtomicU64,
    version: Mutex<i64>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl RuntimeProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_averaged(name, false)
    }

    /// Creates a node that holds averages of other profiles.
    pub fn new_averaged(name: impl Into<String>) -> Self {
        Self::with_averaged(name, true)
    }

    pub(crate) fn with_averaged(name: impl Into<String>, is_averaged_profile: bool) -> Self {
        let total_time = Arc::new(Counter::new(
            TOTAL_TIME_COUNTER_NAME,
            TUnit::TIME_NS,
            default_counter_strategy(TUnit::TIME_NS),
        ));
        let mut counters = CounterTable::default();
        counters.insert(Arc::clone(&total_time), ROOT_COUNTER);
        Self {
            inner: Arc::new(RuntimeProfileInner {
                name: RwLock::new(name.into()),
                metadata: AtomicI64::new(0),
                is_averaged_profile,
                parent: Mutex::new(Weak::new()),
                counters: Mutex::new(counters),
                children: Mutex::new(ChildTable::default()),
                info_strings: Mutex::new(InfoStrings::default()),
                event_sequences: Mutex::new(BTreeMap::new()),
                total_time,
                local_time_percent: AtomicU64::new(0f64.to_bits()),
                version: Mutex::new(0),
            }),
        }
    }

    pub fn name(&self) -> String {
        self.inner
            .name
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    /// Renames the node. Only meant for top-level profiles: the parent's child
    /// index keeps the old name.
    pub fn set_name(&self, name: impl Into<String>) {
        let mut guard = self.inner.name.write().unwrap_or_else(|e| e.into_inner());
        *guard = name.into();
    }

    pub fn metadata(&self) -> i64 {
        self.inner.metadata.load(Ordering::Relaxed)
    }

    pub fn set_metadata(&self, md: i64) {
        self.inner.metadata.store(md, Ordering::Relaxed);
    }

    pub fn is_averaged_profile(&self) -> bool {
        self.inner.is_averaged_profile
    }

    pub fn ptr_eq(&self, other: &RuntimeProfile) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn parent(&self) -> Option<RuntimeProfile> {
        lock(&self.inner.parent)
            .upgrade()
            .map(|inner| RuntimeProfile { inner })
    }

    pub fn reset_parent(&self) {
        *lock(&self.inner.parent) = Weak::new();
    }

    pub fn total_time_counter(&self) -> CounterRef {
        Arc::clone(&self.inner.total_time)
    }

    /// Self time of this node as a fraction of the root's total time.
    pub fn local_time_percent(&self) -> f64 {
        f64::from_bits(self.inner.local_time_percent.load(Ordering::Relaxed))
    }

    // ---- counters ----

    pub fn add_counter(&self, name: impl Into<String>, unit: TUnit) -> CounterRef {
        self.add_counter_with_strategy(name, unit, default_counter_strategy(unit))
    }

    pub fn add_counter_with_strategy(
        &self,
        name: impl Into<String>,
        unit: TUnit,
        strategy: TCounterStrategy,
    ) -> CounterRef {
        self.add_child_counter(name, unit, strategy, ROOT_COUNTER)
    }

    /// Registers `name` under `parent_name`. If a counter called `name` already
    /// exists anywhere in this node it is returned as is.
    pub fn add_child_counter(
        &self,
        name: impl Into<String>,
        unit: TUnit,
        strategy: TCounterStrategy,
        parent_name: &str,
    ) -> CounterRef {
        let name = name.into();
        self.register_counter(&name, parent_name, || Counter::new(name.clone(), unit, strategy))
    }

    pub fn add_timer(&self, name: impl Into<String>) -> CounterRef {
        self.add_counter(name, TUnit::TIME_NS)
    }

    pub fn add_child_timer(&self, name: impl Into<String>, parent_name: &str) -> CounterRef {
        self.add_child_counter(
            name,
            TUnit::TIME_NS,
            default_counter_strategy(TUnit::TIME_NS),
            parent_name,
        )
    }

    pub fn counter_add(&self, name: &str, unit: TUnit, delta: i64) {
        self.add_counter(name, unit).update(delta);
    }

    pub fn counter_set(&self, name: &str, unit: TUnit, value: i64) {
        self.add_counter(name, unit).set(value);
    }

    pub fn scoped_timer(&self, name: impl Into<String>) -> ScopedTimer {
        ScopedTimer::new(self.add_timer(name))
    }

    pub fn add_high_water_mark_counter(
        &self,
        name: impl Into<String>,
        unit: TUnit,
        strategy: TCounterStrategy,
        parent_name: &str,
    ) -> WaterMarkCounter {
        let name = name.into();
        let counter = self.register_counter(&name, parent_name, || {
            Counter::new_high_water_mark(name.clone(), unit, strategy)
        });
        WaterMarkCounter::new(counter)
    }

    pub fn add_low_water_mark_counter(
        &self,
        name: impl Into<String>,
        unit: TUnit,
        strategy: TCounterStrategy,
        parent_name: &str,
    ) -> WaterMarkCounter {
        let name = name.into();
        let counter = self.register_counter(&name, parent_name, || {
            Counter::new_low_water_mark(name.clone(), unit, strategy)
        });
        WaterMarkCounter::new(counter)
    }

    /// Registers a counter whose value is computed by `counter_fn` on every read.
    /// Returns `None` if the name is taken, or if this node is an averaged profile
    /// (a computed value has no meaningful average).
    pub fn add_derived_counter(
        &self,
        name: impl Into<String>,
        unit: TUnit,
        counter_fn: DerivedCounterFunction,
        parent_name: &str,
    ) -> Option<CounterRef> {
        let name = name.into();
        if self.is_averaged_profile() {
            debug_assert!(false, "derived counter {name} in averaged profile");
            warn!(counter = %name, "derived counters are not allowed in averaged profiles");
            return None;
        }
        let mut guard = lock(&self.inner.counters);
        if guard.counter_map.contains_key(&name) {
            return None;
        }
        let parent_name = guard.resolve_parent(&name, parent_name);
        let counter = Arc::new(Counter::new_derived(name.clone(), unit, counter_fn));
        Some(guard.insert(counter, parent_name))
    }

    fn register_counter(
        &self,
        name: &str,
        parent_name: &str,
        make: impl FnOnce() -> Counter,
    ) -> CounterRef {
        let mut guard = lock(&self.inner.counters);
        if let Some((counter, _)) = guard.counter_map.get(name) {
            return Arc::clone(counter);
        }
        let parent_name = guard.resolve_parent(name, parent_name);
        guard.insert(Arc::new(make()), parent_name)
    }

    pub fn get_counter(&self, name: &str) -> Option<CounterRef> {
        lock(&self.inner.counters)
            .counter_map
            .get(name)
            .map(|(c, _)| Arc::clone(c))
    }

    /// The counter called `name` together with its parent counter name.
    pub fn get_counter_pair(&self, name: &str) -> Option<(CounterRef, String)> {
        lock(&self.inner.counters)
            .counter_map
            .get(name)
            .map(|(c, parent)| (Arc::clone(c), parent.clone()))
    }

    /// Appends every counter called `name` in this node and all descendants.
    pub fn get_counters(&self, name: &str, counters: &mut Vec<CounterRef>) {
        if let Some(counter) = self.get_counter(name) {
            counters.push(counter);
        }
        for child in self.children() {
            child.get_counters(name, counters);
        }
    }

    pub fn num_counters(&self) -> usize {
        lock(&self.inner.counters).counter_map.len()
    }

    /// Counters and their parent names, parents first.
    pub fn counter_forest(&self) -> Vec<(CounterRef, String)> {
        lock(&self.inner.counters).forest()
    }

    pub fn child_counter_names(&self, parent_name: &str) -> Vec<String> {
        lock(&self.inner.counters)
            .child_counter_map
            .get(parent_name)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Removes `name` and every counter registered beneath it.
    pub fn remove_counter(&self, name: &str) {
        if name == TOTAL_TIME_COUNTER_NAME {
            debug!("ignore removing {TOTAL_TIME_COUNTER_NAME} counter");
            return;
        }
        lock(&self.inner.counters).remove_recursively(name);
    }

    /// Drops every counter not named in `saved_names`. Survivors whose parent was
    /// dropped move to the top level.
    pub fn remove_counters(&self, saved_names: &BTreeSet<String>) {
        let mut guard = lock(&self.inner.counters);
        let keep = |name: &str| name == TOTAL_TIME_COUNTER_NAME || saved_names.contains(name);
        let kept = guard
            .forest()
            .into_iter()
            .filter(|(c, _)| keep(c.name()))
            .collect::<Vec<_>>();
        let mut table = CounterTable::default();
        for (counter, parent) in kept {
            let parent = if table.counter_map.contains_key(&parent) {
                parent
            } else {
                ROOT_COUNTER.to_string()
            };
            table.insert(counter, &parent);
        }
        *guard = table;
    }

    /// Copies the counters of `src` into this node, hanging src's top-level counters
    /// under `attached_counter_name`.
    pub fn copy_all_counters_from(&self, src: &RuntimeProfile, attached_counter_name: &str) {
        if self.ptr_eq(src) {
            return;
        }
        let forest = src.counter_forest();
        for (counter, parent) in forest {
            let parent = if parent == ROOT_COUNTER {
                attached_counter_name
            } else {
                parent.as_str()
            };
            let dst = self.add_child_counter(
                counter.name(),
                counter.unit(),
                counter.strategy().clone(),
                parent,
            );
            if dst.is_derived() {
                continue;
            }
            dst.set(counter.value());
            if let Some(min) = counter.min_value() {
                dst.set_min(min);
            }
            if let Some(max) = counter.max_value() {
                dst.set_max(max);
            }
        }
    }

    /// Divides every stored counter in this subtree by `n`.
    pub fn divide(&self, n: i64) {
        debug_assert!(n > 0);
        if n <= 0 {
            return;
        }
        for (counter, _) in self.counter_forest() {
            if counter.is_derived() {
                continue;
            }
            if counter.unit() == TUnit::DOUBLE_VALUE {
                counter.set_double(counter.double_value() / n as f64);
            } else {
                counter.set(counter.value() / n);
            }
        }
        for child in self.children() {
            child.divide(n);
        }
    }

    // ---- info strings and event sequences ----

    /// Sets `key` to `value`, remembering first-insertion order for display.
    pub fn add_info_string(&self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        lock(&self.inner.info_strings).upsert(&key, value.into());
    }

    pub fn get_info_string(&self, key: &str) -> Option<String> {
        lock(&self.inner.info_strings).values.get(key).cloned()
    }

    /// Info strings in display order.
    pub fn info_strings(&self) -> Vec<(String, String)> {
        lock(&self.inner.info_strings).ordered()
    }

    pub fn append_exec_option(&self, option: &str) {
        let mut guard = lock(&self.inner.info_strings);
        let value = match guard.values.get(EXEC_OPTION_KEY) {
            Some(existing) if !existing.is_empty() => format!("{existing}, {option}"),
            _ => option.to_string(),
        };
        guard.upsert(EXEC_OPTION_KEY, value);
    }

    pub fn copy_all_info_strings_from(&self, other: &RuntimeProfile) {
        if self.ptr_eq(other) {
            return;
        }
        let snapshot = other.info_strings();
        let mut guard = lock(&self.inner.info_strings);
        for (k, v) in snapshot {
            guard.upsert(&k, v);
        }
    }

    /// Returns the sequence registered under `key`, creating it on first use.
    pub fn add_event_sequence(&self, key: impl Into<String>) -> EventSequenceRef {
        let mut guard = lock(&self.inner.event_sequences);
        Arc::clone(
            guard
                .entry(key.into())
                .or_insert_with(|| Arc::new(Mutex::new(EventSequence::new()))),
        )
    }

    pub fn get_event_sequence(&self, key: &str) -> Option<EventSequenceRef> {
        lock(&self.inner.event_sequences).get(key).cloned()
    }

    fn event_sequences(&self) -> Vec<(String, EventSequenceRef)> {
        lock(&self.inner.event_sequences)
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }

    // ---- children ----

    /// Returns the child called `name`, creating it at the front (`prepend`) or
    /// back of the child list if absent. `indent` and `prepend` are ignored when
    /// the child already exists.
    pub fn create_child(&self, name: impl Into<String>, indent: bool, prepend: bool) -> RuntimeProfile {
        let name = name.into();
        let child = {
            let mut guard = lock(&self.inner.children);
            if let Some(existing) = guard.child_map.get(&name) {
                return existing.clone();
            }
            let child = RuntimeProfile::with_averaged(name.clone(), self.is_averaged_profile());
            guard.child_map.insert(name, child.clone());
            let pos = if prepend { 0 } else { guard.children.len() };
            guard.children.insert(pos, (child.clone(), indent));
            child
        };
        child.set_parent(self);
        child
    }

    /// Indented, appended child; the most common form of `create_child`.
    pub fn child(&self, name: impl Into<String>) -> RuntimeProfile {
        self.create_child(name, true, false)
    }

    /// Adds an existing node as a child, at the end or right after `location`.
    /// A child with the same name already present is left in place.
    pub fn add_child(&self, child: &RuntimeProfile, indent: bool, location: Option<&RuntimeProfile>) {
        let child_name = child.name();
        {
            let mut guard = lock(&self.inner.children);
            if guard.child_map.contains_key(&child_name) {
                return;
            }
            let pos = match location {
                None => guard.children.len(),
                Some(loc) => match guard.children.iter().position(|(c, _)| c.ptr_eq(loc)) {
                    Some(idx) => idx + 1,
                    None => {
                        debug_assert!(false, "location {} is not a child", loc.name());
                        warn!(
                            child = %child_name,
                            location = %loc.name(),
                            "add_child location is not a child, appending"
                        );
                        guard.children.len()
                    }
                },
            };
            guard.child_map.insert(child_name, child.clone());
            guard.children.insert(pos, (child.clone(), indent));
        }
        child.set_parent(self);
    }

    fn set_parent(&self, parent: &RuntimeProfile) {
        *lock(&self.inner.parent) = Arc::downgrade(&parent.inner);
    }

    pub fn get_child(&self, name: &str) -> Option<RuntimeProfile> {
        lock(&self.inner.children).child_map.get(name).cloned()
    }

    pub fn get_child_at(&self, index: usize) -> Option<RuntimeProfile> {
        lock(&self.inner.children)
            .children
            .get(index)
            .map(|(c, _)| c.clone())
    }

    pub fn children(&self) -> Vec<RuntimeProfile> {
        lock(&self.inner.children)
            .children
            .iter()
            .map(|(c, _)| c.clone())
            .collect()
    }

    /// Children with their indent flags, in display order.
    pub fn children_with_indent(&self) -> Vec<(RuntimeProfile, bool)> {
        lock(&self.inner.children).children.clone()
    }

    /// This node and every descendant in pre-order.
    pub fn get_all_children(&self, out: &mut Vec<RuntimeProfile>) {
        out.push(self.clone());
        for child in self.children() {
            child.get_all_children(out);
        }
    }

    pub fn num_children(&self) -> usize {
        lock(&self.inner.children).child_map.len()
    }

    pub fn remove_childs(&self) {
        let removed = {
            let mut guard = lock(&self.inner.children);
            guard.child_map.clear();
            std::mem::take(&mut guard.children)
        };
        for (child, _) in removed {
            child.reset_parent();
        }
    }

    pub fn reverse_childs(&self) {
        lock(&self.inner.children).children.reverse();
    }

    pub fn sort_children<F>(&self, mut cmp: F)
    where
        F: FnMut(&RuntimeProfile, &RuntimeProfile) -> CmpOrdering,
    {
        lock(&self.inner.children)
            .children
            .sort_by(|(a, _), (b, _)| cmp(a, b));
    }

    pub fn children_name_string(&self) -> String {
        self.children()
            .iter()
            .map(|c| c.name())
            .collect::<Vec<_>>()
            .join(", ")
    }

    // ---- version ----

    pub fn inc_version(&self) {
        *lock(&self.inner.version) += 1;
    }

    pub fn version(&self) -> i64 {
        *lock(&self.inner.version)
    }

    /// Accepts an incoming snapshot version if it is strictly newer, recording it.
    /// Unversioned snapshots are always accepted.
    pub(crate) fn accept_version(&self, incoming: Option<i64>) -> bool {
        let mut guard = lock(&self.inner.version);
        match incoming {
            None => true,
            Some(v) if v > *guard => {
                *guard = v;
                true
            }
            Some(_) => false,
        }
    }

    // ---- time attribution ----

    /// Recomputes, for every node, the share of the root's total time spent in
    /// the node itself rather than in its children.
    pub fn compute_time_in_profile(&self) {
        let total = self.inner.total_time.value();
        self.compute_time_in_profile_with_total(total);
    }

    fn compute_time_in_profile_with_total(&self, total: i64) {
        let children = self.children();
        let percent = if total <= 0 {
            0.0
        } else {
            let children_time = children.iter().fold(0i64, |acc, c| {
                acc.saturating_add(c.inner.total_time.value())
            });
            let local_time = self.inner.total_time.value().saturating_sub(children_time);
            (local_time as f64 / total as f64).clamp(0.0, 1.0)
        };
        self.inner
            .local_time_percent
            .store(percent.to_bits(), Ordering::Relaxed);
        for child in children {
            child.compute_time_in_profile_with_total(total);
        }
    }

    // ---- serialization ----

    pub fn to_thrift_tree(&self) -> runtime_profile::TRuntimeProfileTree {
        let mut nodes = Vec::new();
        self.to_thrift_nodes(&mut nodes);
        runtime_profile::TRuntimeProfileTree::new(nodes)
    }

    /// Appends this subtree to `out` in depth-first pre-order.
    pub fn to_thrift_nodes(&self, out: &mut Vec<runtime_profile::TRuntimeProfileNode>) {
        self.to_thrift_nodes_with_indent(out, true);
    }

    fn to_thrift_nodes_with_indent(
        &self,
        out: &mut Vec<runtime_profile::TRuntimeProfileNode>,
        indent: bool,
    ) {
        let (counters, child_counters_map) = {
            let guard = lock(&self.inner.counters);
            let counters = guard
                .counter_map
                .values()
                .map(|(c, _)| Arc::clone(c))
                .collect::<Vec<_>>();
            (counters, guard.child_counter_map.clone())
        };
        // Derived counters may run arbitrary code, so values are read unlocked.
        let counters = counters.iter().map(|c| c.to_thrift()).collect::<Vec<_>>();

        let (info_strings, info_strings_display_order) = {
            let guard = lock(&self.inner.info_strings);
            (guard.values.clone(), guard.display_order.clone())
        };

        let children = self.children_with_indent();
        let version = self.version();

        let mut node = runtime_profile::TRuntimeProfileNode::new(
            self.name(),
            i32::try_from(children.len()).unwrap_or(i32::MAX),
            counters,
            self.metadata(),
            indent,
            info_strings,
            info_strings_display_order,
            child_counters_map,
            (version > 0).then_some(version),
        );
        node.is_averaged_profile = self.is_averaged_profile();
        out.push(node);

        for (child, child_indent) in children {
            child.to_thrift_nodes_with_indent(out, child_indent);
        }
    }

    // ---- pretty print ----

    /// Renders the subtree as indented text.
    pub fn pretty_print(&self, prefix: &str) -> String {
        let mut out = String::new();
        self.pretty_print_into(&mut out, prefix, pretty_print_indent());
        out
    }

    fn pretty_print_into(&self, out: &mut String, prefix: &str, indent_children: bool) {
        use std::fmt::Write as _;

        let (counter_map, child_counter_map) = {
            let guard = lock(&self.inner.counters);
            (guard.counter_map.clone(), guard.child_counter_map.clone())
        };

        let _ = write!(out, "{prefix}{}:", self.name());
        let total_time = self.inner.total_time.value();
        if total_time != 0 {
            let _ = write!(
                out,
                "(Active: {}, % non-child: {:.2}%)",
                pretty_printer::print(total_time, TUnit::TIME_NS),
                self.local_time_percent() * 100.0
            );
        }
        out.push('\n');

        for (key, value) in self.info_strings() {
            let _ = writeln!(out, "{prefix}   {key}: {value}");
        }

        for (key, seq) in self.event_sequences() {
            let seq = lock(&seq);
            let _ = writeln!(
                out,
                "{prefix}  {key}: {}",
                pretty_printer::print(seq.elapsed_time(), TUnit::TIME_NS)
            );
            let mut last = 0i64;
            for (label, ts) in seq.events() {
                let _ = writeln!(
                    out,
                    "{prefix}     - {label}: {} ({})",
                    pretty_printer::print(*ts, TUnit::TIME_NS),
                    pretty_printer::print(ts - last, TUnit::TIME_NS)
                );
                last = *ts;
            }
        }

        print_child_counters(out, prefix, ROOT_COUNTER, &counter_map, &child_counter_map);

        for (child, indent) in self.children_with_indent() {
            let child_prefix = if indent && indent_children {
                format!("{prefix}  ")
            } else {
                prefix.to_string()
            };
            child.pretty_print_into(out, &child_prefix, indent_children);
        }
    }
}

fn print_child_counters(
    out: &mut String,
    prefix: &str,
    counter_name: &str,
    counter_map: &BTreeMap<String, (CounterRef, String)>,
    child_counter_map: &BTreeMap<String, BTreeSet<String>>,
) {
    use std::fmt::Write as _;

    let Some(children) = child_counter_map.get(counter_name) else {
        return;
    };
    for child in children {
        if counter_name == ROOT_COUNTER && child == TOTAL_TIME_COUNTER_NAME {
            continue;
        }
        let Some((counter, _)) = counter_map.get(child) else {
            continue;
        };
        if !counter.should_display() {
            continue;
        }
        let _ = writeln!(
            out,
            "{prefix}   - {child}: {}",
            pretty_printer::print(counter.value(), counter.unit())
        );
        print_child_counters(
            out,
            &format!("{prefix}  "),
            child,
            counter_map,
            child_counter_map,
        );
    }
}

impl fmt::Debug for RuntimeProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeProfile")
            .field("name", &self.name())
            .field("num_counters", &self.num_counters())
            .field("num_children", &self.num_children())
            .finish()
    }
}

impl fmt::Display for RuntimeProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pretty_print(""))
    }
}
