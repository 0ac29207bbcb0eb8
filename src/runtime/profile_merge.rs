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
//! Merging profile trees: two-tree merge and N-way merge of isomorphic trees.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::common::config::merge_require_identical;
use crate::metrics::TUnit;
use crate::novarocks_logging::{debug, warn};
use crate::runtime::counter::{CounterRef, create_strategy};
use crate::runtime::object_pool::ObjectPool;
use crate::runtime::profile::{
    MERGED_INFO_PREFIX_MAX, MERGED_INFO_PREFIX_MIN, ROOT_COUNTER, RuntimeProfile, lock,
};
use crate::runtime_profile::{TCounterMergeType, TCounterMinMaxType};

/// (merged value, min across instances, max across instances)
type MergedInfo = (i64, i64, i64);

fn is_merged_info_counter(name: &str) -> bool {
    name.starts_with(MERGED_INFO_PREFIX_MIN) || name.starts_with(MERGED_INFO_PREFIX_MAX)
}

impl RuntimeProfile {
    /// Merges `src` into this profile in place.
    ///
    /// Counters with the same name are combined (summed, or averaged by sample
    /// count for AVG counters); counters and children missing here are copied from
    /// `src`. Info strings are not merged. Merging an averaged profile counts as a
    /// second-level merge for the purpose of the counters' merge kinds.
    pub fn merge(&self, src: &RuntimeProfile) {
        if self.ptr_eq(src) {
            return;
        }
        let first_merge = !src.is_averaged_profile();
        // Snapshot the source shape first so the two nodes are never locked together.
        let src_counters = src.counter_forest();
        {
            let mut guard = lock(&self.inner.counters);
            for (src_counter, src_parent) in src_counters {
                if !src_counter.should_merge(first_merge) {
                    continue;
                }
                let existing = guard
                    .counter_map
                    .get(src_counter.name())
                    .map(|(c, _)| Arc::clone(c));
                match existing {
                    Some(dst) => {
                        if dst.unit() != src_counter.unit() {
                            warn!(
                                counter = src_counter.name(),
                                "skip merging counter with mismatched unit"
                            );
                            continue;
                        }
                        if dst.is_derived() {
                            continue;
                        }
                        dst.merge_from(&src_counter);
                    }
                    None => {
                        let parent = if guard.counter_map.contains_key(&src_parent) {
                            src_parent.as_str()
                        } else {
                            ROOT_COUNTER
                        };
                        guard.insert(Arc::new(src_counter.clone_detached()), parent);
                    }
                }
            }
        }

        for (src_child, indent) in src.children_with_indent() {
            let name = src_child.name();
            let child = match self.get_child(&name) {
                Some(existing) => existing,
                None => {
                    // Unwritten counters of a fresh node carry no weight, so merging
                    // into it copies the source values as they are.
                    let child = RuntimeProfile::with_averaged(
                        name.clone(),
                        src_child.is_averaged_profile(),
                    );
                    child.set_metadata(src_child.metadata());
                    self.add_child(&child, indent, None);
                    self.get_child(&name).unwrap_or(child)
                }
            };
            child.merge(&src_child);
        }
    }

    /// Builds an independent copy of this subtree: same names, counter values,
    /// info strings and child order, sharing no nodes or counters.
    pub fn deep_copy(&self, pool: &ObjectPool) -> RuntimeProfile {
        let copy = pool.add(RuntimeProfile::with_averaged(
            self.name(),
            self.is_averaged_profile(),
        ));
        copy.set_metadata(self.metadata());
        copy.copy_all_counters_from(self, ROOT_COUNTER);
        copy.copy_all_info_strings_from(self);
        for (child, indent) in self.children_with_indent() {
            let child_copy = child.deep_copy(pool);
            copy.add_child(&child_copy, indent, None);
        }
        copy
    }

    /// Merges profiles from parallel instances of the same plan into `profiles[0]`,
    /// which is returned. The other profiles are only read.
    ///
    /// Each counter becomes the SUM or AVG of the instance values and, unless its
    /// min/max type is SKIP_ALL, also records the cross-instance extremes both on
    /// the counter and as `__MIN_OF_`/`__MAX_OF_` sibling counters.
    ///
    /// With `require_identical`, any difference in counters or children is an
    /// error; otherwise missing pieces are skipped for the instances lacking them.
    pub fn merge_isomorphic_profiles(
        pool: &ObjectPool,
        profiles: &[RuntimeProfile],
        require_identical: bool,
    ) -> Result<RuntimeProfile, String> {
        let Some(merged) = profiles.first() else {
            return Err("merge_isomorphic_profiles requires non-empty input".to_string());
        };
        let first_merge = !merged.is_averaged_profile();

        Self::merge_isomorphic_info_strings(merged, profiles);
        Self::merge_isomorphic_counters_of(merged, profiles, require_identical, first_merge)?;
        Self::merge_isomorphic_children(pool, merged, profiles, require_identical)?;

        Ok(merged.clone())
    }

    /// `merge_isomorphic_profiles` with `require_identical` taken from the
    /// `profile.merge_require_identical` setting.
    pub fn merge_instance_profiles(
        pool: &ObjectPool,
        profiles: &[RuntimeProfile],
    ) -> Result<RuntimeProfile, String> {
        Self::merge_isomorphic_profiles(pool, profiles, merge_require_identical())
    }

    fn merge_isomorphic_info_strings(merged: &RuntimeProfile, profiles: &[RuntimeProfile]) {
        let mut keys = Vec::new();
        let mut seen = BTreeSet::new();
        for profile in profiles {
            for (key, _) in profile.info_strings() {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
        }
        for key in keys {
            let mut distinct = Vec::new();
            for profile in profiles {
                if let Some(value) = profile.get_info_string(&key)
                    && !distinct.contains(&value)
                {
                    distinct.push(value);
                }
            }
            merged.add_info_string(key, distinct.join(", "));
        }
    }

    fn merge_isomorphic_counters_of(
        merged: &RuntimeProfile,
        profiles: &[RuntimeProfile],
        require_identical: bool,
        first_merge: bool,
    ) -> Result<(), String> {
        let mut layout = merged
            .counter_forest()
            .into_iter()
            .map(|(c, parent)| (c.name().to_string(), parent))
            .filter(|(name, _)| !is_merged_info_counter(name))
            .collect::<Vec<_>>();
        let mut names = layout
            .iter()
            .map(|(name, _)| name.clone())
            .collect::<BTreeSet<_>>();

        for profile in &profiles[1..] {
            for (counter, parent) in profile.counter_forest() {
                let name = counter.name();
                if is_merged_info_counter(name) || names.contains(name) {
                    continue;
                }
                if require_identical {
                    return Err(format!(
                        "counter {name} of profile {} is missing in the first instance",
                        profile.name()
                    ));
                }
                names.insert(name.to_string());
                layout.push((name.to_string(), parent));
            }
        }

        for (name, parent) in layout {
            let mut counters: Vec<CounterRef> = Vec::with_capacity(profiles.len());
            let mut unit: Option<TUnit> = None;
            for profile in profiles {
                let Some(counter) = profile.get_counter(&name) else {
                    if require_identical {
                        return Err(format!(
                            "counter {name} is missing in profile {}",
                            profile.name()
                        ));
                    }
                    debug!(counter = %name, profile = %profile.name(), "skip missing counter");
                    continue;
                };
                match unit {
                    None => unit = Some(counter.unit()),
                    Some(u) if u != counter.unit() => {
                        if require_identical {
                            return Err(format!(
                                "counter {name} has unit {:?} in profile {} but {:?} elsewhere",
                                counter.unit(),
                                profile.name(),
                                u
                            ));
                        }
                        debug!(counter = %name, "skip counter with mismatched unit");
                        continue;
                    }
                    Some(_) => {}
                }
                counters.push(counter);
            }
            let Some(proto) = counters.first().cloned() else {
                continue;
            };

            let (dst, dst_parent) = match merged.get_counter_pair(&name) {
                Some(pair) => pair,
                None => {
                    let parent = if parent == ROOT_COUNTER || merged.get_counter(&parent).is_some() {
                        parent
                    } else {
                        ROOT_COUNTER.to_string()
                    };
                    let counter = merged.add_child_counter(
                        name.clone(),
                        proto.unit(),
                        proto.strategy().clone(),
                        &parent,
                    );
                    // Keep the value of the instance the counter was taken from.
                    if !counter.is_derived() {
                        counter.set(proto.value());
                    }
                    (counter, parent)
                }
            };
            if dst.is_derived() || !proto.should_merge(first_merge) {
                continue;
            }

            let (value, min_value, max_value) = merge_isomorphic_counters(&counters);
            dst.set(value);
            if proto.skip_min_max() {
                continue;
            }
            dst.set_min(min_value);
            dst.set_max(max_value);

            let strategy = create_strategy(
                proto.strategy().aggregate_type,
                TCounterMergeType::SKIP_ALL,
                0,
                TCounterMinMaxType::SKIP_ALL,
            );
            let min_counter = merged.add_child_counter(
                format!("{MERGED_INFO_PREFIX_MIN}{name}"),
                proto.unit(),
                strategy.clone(),
                &dst_parent,
            );
            min_counter.set(min_value);
            let max_counter = merged.add_child_counter(
                format!("{MERGED_INFO_PREFIX_MAX}{name}"),
                proto.unit(),
                strategy,
                &dst_parent,
            );
            max_counter.set(max_value);
        }
        Ok(())
    }

    fn merge_isomorphic_children(
        pool: &ObjectPool,
        merged: &RuntimeProfile,
        profiles: &[RuntimeProfile],
        require_identical: bool,
    ) -> Result<(), String> {
        let first_children = merged.children();
        if require_identical {
            for profile in &profiles[1..] {
                if profile.num_children() != first_children.len() {
                    return Err(format!(
                        "profile {} has children [{}] but the first instance has [{}]",
                        profile.name(),
                        profile.children_name_string(),
                        merged.children_name_string()
                    ));
                }
            }
        }

        for (idx, child0) in first_children.iter().enumerate() {
            let child_name = child0.name();
            let mut group = Vec::with_capacity(profiles.len());
            group.push(child0.clone());
            for profile in &profiles[1..] {
                let candidate = if require_identical {
                    profile.get_child_at(idx)
                } else {
                    profile.get_child(&child_name)
                };
                match candidate {
                    Some(child) if !require_identical || child.name() == child_name => {
                        group.push(child)
                    }
                    Some(child) => {
                        return Err(format!(
                            "child #{idx} of profile {} is {} but the first instance has {}",
                            profile.name(),
                            child.name(),
                            child_name
                        ));
                    }
                    None => {
                        debug!(child = %child_name, profile = %profile.name(), "skip missing child");
                    }
                }
            }
            Self::merge_isomorphic_profiles(pool, &group, require_identical)?;
        }

        if require_identical {
            return Ok(());
        }

        // Children that the first instance never created.
        let mut extra_names = Vec::new();
        for profile in &profiles[1..] {
            for child in profile.children() {
                let name = child.name();
                if merged.get_child(&name).is_none() && !extra_names.contains(&name) {
                    extra_names.push(name);
                }
            }
        }
        for name in extra_names {
            let mut group = profiles[1..]
                .iter()
                .filter_map(|p| {
                    p.children_with_indent()
                        .into_iter()
                        .find(|(c, _)| c.name() == name)
                })
                .collect::<Vec<_>>();
            if group.is_empty() {
                continue;
            }
            let (template, indent) = group.remove(0);
            let copy = template.deep_copy(pool);
            merged.add_child(&copy, indent, None);
            let mut members = Vec::with_capacity(group.len() + 1);
            members.push(copy);
            members.extend(group.into_iter().map(|(c, _)| c));
            Self::merge_isomorphic_profiles(pool, &members, false)?;
        }
        Ok(())
    }
}

/// Combines one counter across instances. Instance min/max default to the
/// instance value, so re-merging merged profiles keeps the true extremes.
fn merge_isomorphic_counters(counters: &[CounterRef]) -> MergedInfo {
    let Some(first) = counters.first() else {
        return (0, 0, 0);
    };
    let n = counters.len() as i64;
    if first.unit() == TUnit::DOUBLE_VALUE {
        let mut sum = 0f64;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for counter in counters {
            let value = counter.double_value();
            sum += value;
            min = min.min(counter.min_value().map_or(value, |v| f64::from_bits(v as u64)));
            max = max.max(counter.max_value().map_or(value, |v| f64::from_bits(v as u64)));
        }
        let merged = if first.is_avg() { sum / n as f64 } else { sum };
        return (
            merged.to_bits() as i64,
            min.to_bits() as i64,
            max.to_bits() as i64,
        );
    }

    let mut sum = 0i64;
    let mut min = i64::MAX;
    let mut max = i64::MIN;
    for counter in counters {
        let value = counter.value();
        sum = sum.saturating_add(value);
        min = min.min(counter.min_value().unwrap_or(value));
        max = max.max(counter.max_value().unwrap_or(value));
    }
    let merged = if first.is_avg() { sum / n } else { sum };
    (merged, min, max)
}
