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
//! Applying flattened profile snapshots onto a live tree.

use std::sync::Arc;

use crate::novarocks_logging::warn;
use crate::runtime::counter::{Counter, default_counter_strategy};
use crate::runtime::profile::{ROOT_COUNTER, RuntimeProfile, lock};
use crate::runtime_profile::{TRuntimeProfileNode, TRuntimeProfileTree};

fn num_children(node: &TRuntimeProfileNode) -> Result<usize, String> {
    usize::try_from(node.num_children)
        .map_err(|_| format!("profile node {} has negative child count", node.name))
}

/// Advances `idx` past the subtree rooted at `nodes[*idx]` without applying it.
fn skip_subtree(nodes: &[TRuntimeProfileNode], idx: &mut usize) -> Result<(), String> {
    let mut remaining = 1usize;
    while remaining > 0 {
        let node = nodes
            .get(*idx)
            .ok_or_else(|| format!("profile snapshot truncated at node {}", *idx))?;
        *idx += 1;
        remaining = remaining - 1 + num_children(node)?;
    }
    Ok(())
}

impl RuntimeProfile {
    /// Refreshes this tree from a snapshot. Behaves like `merge` except that
    /// counter values are overwritten instead of combined, and nodes whose
    /// snapshot version is not newer than the local one are left untouched.
    pub fn update(&self, tree: &TRuntimeProfileTree) -> Result<(), String> {
        let mut idx = 0;
        self.update_from_nodes(&tree.nodes, &mut idx)?;
        if idx != tree.nodes.len() {
            return Err(format!(
                "profile snapshot has {} trailing nodes after the root subtree",
                tree.nodes.len() - idx
            ));
        }
        Ok(())
    }

    /// Applies the subtree starting at `nodes[*idx]`. On return `idx` points at the
    /// node right after that subtree, whether or not it was applied.
    pub fn update_from_nodes(
        &self,
        nodes: &[TRuntimeProfileNode],
        idx: &mut usize,
    ) -> Result<(), String> {
        let node = nodes
            .get(*idx)
            .ok_or_else(|| format!("profile snapshot truncated at node {}", *idx))?;
        if !self.accept_version(node.version) {
            // Stale: consume the whole span so the caller lands on the next sibling.
            return skip_subtree(nodes, idx);
        }
        *idx += 1;

        self.apply_counters(node);
        {
            let mut guard = lock(&self.inner.info_strings);
            for key in &node.info_strings_display_order {
                if let Some(value) = node.info_strings.get(key) {
                    guard.upsert(key, value.clone());
                }
            }
            for (key, value) in &node.info_strings {
                guard.upsert(key, value.clone());
            }
        }

        for _ in 0..num_children(node)? {
            let tchild = nodes
                .get(*idx)
                .ok_or_else(|| format!("profile snapshot truncated at node {}", *idx))?;
            let child = match self.get_child(&tchild.name) {
                Some(child) => child,
                None => {
                    let child = RuntimeProfile::with_averaged(
                        tchild.name.clone(),
                        tchild.is_averaged_profile || self.is_averaged_profile(),
                    );
                    child.set_metadata(tchild.metadata);
                    self.add_child(&child, tchild.indent, None);
                    // A concurrent update may have added the same name first.
                    self.get_child(&tchild.name).unwrap_or(child)
                }
            };
            child.update_from_nodes(nodes, idx)?;
        }
        Ok(())
    }

    fn apply_counters(&self, node: &TRuntimeProfileNode) {
        let mut guard = lock(&self.inner.counters);
        let mut created = Vec::new();
        for tcounter in &node.counters {
            let existing = guard
                .counter_map
                .get(&tcounter.name)
                .map(|(c, _)| Arc::clone(c));
            match existing {
                Some(counter) => {
                    if counter.unit() != tcounter.type_ {
                        warn!(
                            counter = %tcounter.name,
                            local = ?counter.unit(),
                            incoming = ?tcounter.type_,
                            "skip updating counter with mismatched unit"
                        );
                        continue;
                    }
                    if counter.is_derived() {
                        continue;
                    }
                    counter.overwrite(tcounter.value);
                    if let Some(min) = tcounter.min_value {
                        counter.set_min(min);
                    }
                    if let Some(max) = tcounter.max_value {
                        counter.set_max(max);
                    }
                }
                None => {
                    let strategy = tcounter
                        .strategy
                        .clone()
                        .unwrap_or_else(|| default_counter_strategy(tcounter.type_));
                    let counter = Counter::with_value(
                        tcounter.name.clone(),
                        tcounter.type_,
                        strategy,
                        tcounter.value,
                    );
                    if let Some(min) = tcounter.min_value {
                        counter.set_min(min);
                    }
                    if let Some(max) = tcounter.max_value {
                        counter.set_max(max);
                    }
                    guard.insert(Arc::new(counter), ROOT_COUNTER);
                    created.push(tcounter.name.clone());
                }
            }
        }

        // Place new counters under their declared parents. Existing counters keep
        // theirs, and a placement that would form a cycle is ignored.
        for (parent, children) in &node.child_counters_map {
            if parent != ROOT_COUNTER && !guard.counter_map.contains_key(parent) {
                continue;
            }
            for child in children {
                if !created.contains(child) || guard.is_ancestor_or_self(parent, child) {
                    continue;
                }
                guard.reparent(child, parent);
            }
        }
    }
}
