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
//! Flattened profile tree exchanged between execution instances and the coordinator.
//!
//! Nodes are listed in depth-first pre-order. Each node declares how many direct
//! children follow it, which is enough for a reader to find where its subtree ends.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::metrics::TUnit;

#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TCounterAggregateType {
    SUM,
    AVG,
    /// Summed by the instance-level merge, averaged by the coordinator.
    SUM_AVG,
    /// Averaged by the instance-level merge, summed by the coordinator.
    AVG_SUM,
}

#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TCounterMergeType {
    MERGE_ALL,
    SKIP_ALL,
    SKIP_FIRST_MERGE,
    SKIP_SECOND_MERGE,
}

#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TCounterMinMaxType {
    MIN_MAX_ALL,
    SKIP_ALL,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TCounterStrategy {
    pub aggregate_type: TCounterAggregateType,
    pub merge_type: TCounterMergeType,
    pub display_threshold: i64,
    pub min_max_type: TCounterMinMaxType,
}

impl TCounterStrategy {
    pub fn new(
        aggregate_type: TCounterAggregateType,
        merge_type: TCounterMergeType,
        display_threshold: i64,
        min_max_type: TCounterMinMaxType,
    ) -> Self {
        Self {
            aggregate_type,
            merge_type,
            display_threshold,
            min_max_type,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TCounter {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: TUnit,
    pub value: i64,
    #[serde(default)]
    pub strategy: Option<TCounterStrategy>,
    #[serde(default)]
    pub min_value: Option<i64>,
    #[serde(default)]
    pub max_value: Option<i64>,
}

impl TCounter {
    pub fn new(
        name: impl Into<String>,
        type_: TUnit,
        value: i64,
        strategy: Option<TCounterStrategy>,
        min_value: Option<i64>,
        max_value: Option<i64>,
    ) -> Self {
        Self {
            name: name.into(),
            type_,
            value,
            strategy,
            min_value,
            max_value,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TRuntimeProfileNode {
    pub name: String,
    pub num_children: i32,
    pub counters: Vec<TCounter>,
    pub metadata: i64,
    pub indent: bool,
    #[serde(default)]
    pub info_strings: BTreeMap<String, String>,
    #[serde(default)]
    pub info_strings_display_order: Vec<String>,
    /// Parent counter name to the names of its child counters; top-level counters
    /// hang off the empty name.
    #[serde(default)]
    pub child_counters_map: BTreeMap<String, BTreeSet<String>>,
    /// Unset for nodes that have never been versioned; such nodes are always applied.
    #[serde(default)]
    pub version: Option<i64>,
    /// Set when the node is itself an average over other nodes.
    #[serde(default)]
    pub is_averaged_profile: bool,
}

impl TRuntimeProfileNode {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        num_children: i32,
        counters: Vec<TCounter>,
        metadata: i64,
        indent: bool,
        info_strings: BTreeMap<String, String>,
        info_strings_display_order: Vec<String>,
        child_counters_map: BTreeMap<String, BTreeSet<String>>,
        version: Option<i64>,
    ) -> Self {
        Self {
            name: name.into(),
            num_children,
            counters,
            metadata,
            indent,
            info_strings,
            info_strings_display_order,
            child_counters_map,
            version,
            is_averaged_profile: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TRuntimeProfileTree {
    pub nodes: Vec<TRuntimeProfileNode>,
}

impl TRuntimeProfileTree {
    pub fn new(nodes: Vec<TRuntimeProfileNode>) -> Self {
        Self { nodes }
    }
}
