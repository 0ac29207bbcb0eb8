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
//! Integration tests for applying flattened snapshots onto live profiles.

use std::collections::{BTreeMap, BTreeSet};

use crate::common::instance_profile;
use novarocks_profile::common::thrift::{deserialize_profile_tree, serialize_profile_tree};
use novarocks_profile::metrics::TUnit;
use novarocks_profile::runtime_profile::{TCounter, TRuntimeProfileNode, TRuntimeProfileTree};
use novarocks_profile::RuntimeProfile;

mod common;

fn node(name: &str, num_children: i32, version: Option<i64>, rows: i64) -> TRuntimeProfileNode {
    TRuntimeProfileNode::new(
        name,
        num_children,
        vec![TCounter::new("Rows", TUnit::UNIT, rows, None, None, None)],
        0,
        true,
        BTreeMap::new(),
        Vec::new(),
        BTreeMap::from([(String::new(), BTreeSet::from(["Rows".to_string()]))]),
        version,
    )
}

fn rows_of(profile: &RuntimeProfile) -> i64 {
    profile.get_counter("Rows").expect("rows").value()
}

fn query_snapshot(query_rows: i64, a: (Option<i64>, i64, i64), b: (Option<i64>, i64)) -> TRuntimeProfileTree {
    TRuntimeProfileTree::new(vec![
        node("Query", 2, None, query_rows),
        node("A", 1, a.0, a.1),
        node("A1", 0, None, a.2),
        node("B", 0, b.0, b.1),
    ])
}

#[test]
fn test_update_onto_empty_profile_reproduces_tree() {
    let source = instance_profile(10, 100);
    source.add_info_string("State", "Running");
    let tree = source.to_thrift_tree();

    let live = RuntimeProfile::new("Fragment");
    assert_ok!(live.update(&tree));
    assert_eq!(live.to_thrift_tree(), tree);
}

#[test]
fn test_update_overwrites_instead_of_summing() {
    let tree = instance_profile(10, 100).to_thrift_tree();
    let live = RuntimeProfile::new("Fragment");
    assert_ok!(live.update(&tree));
    assert_ok!(live.update(&tree));
    let scan = live.get_child("Scan").expect("scan");
    assert_eq!(rows_of(&scan), 10);

    assert_ok!(live.update(&instance_profile(25, 100).to_thrift_tree()));
    assert_eq!(rows_of(&scan), 25);
}

#[test]
fn test_stale_subtree_is_skipped_but_consumed() {
    let live = RuntimeProfile::new("Query");
    assert_ok!(live.update(&query_snapshot(1, (Some(3), 10, 100), (Some(1), 20))));
    let a = live.get_child("A").expect("a");
    let a1 = a.get_child("A1").expect("a1");
    let b = live.get_child("B").expect("b");
    assert_eq!(a.version(), 3);

    // A is older than what was applied, so A and everything below it stay put
    // while its later sibling B still gets the new values.
    assert_ok!(live.update(&query_snapshot(2, (Some(2), 11, 101), (Some(2), 21))));
    assert_eq!(rows_of(&live), 2);
    assert_eq!(rows_of(&a), 10);
    assert_eq!(rows_of(&a1), 100);
    assert_eq!(rows_of(&b), 21);
    assert_eq!(a.version(), 3);
    assert_eq!(b.version(), 2);

    // Same version is not newer either.
    assert_ok!(live.update(&query_snapshot(3, (Some(3), 12, 102), (Some(2), 22))));
    assert_eq!(rows_of(&a), 10);
    assert_eq!(rows_of(&b), 21);
    assert_eq!(rows_of(&live), 3);

    assert_ok!(live.update(&query_snapshot(4, (Some(4), 13, 103), (Some(3), 23))));
    assert_eq!(rows_of(&a), 13);
    assert_eq!(rows_of(&a1), 103);
    assert_eq!(rows_of(&b), 23);
}

#[test]
fn test_stale_root_skips_everything() {
    let live = RuntimeProfile::new("Query");
    live.inc_version();
    live.inc_version();
    let snapshot = TRuntimeProfileTree::new(vec![node("Query", 1, Some(1), 5), node("A", 0, None, 6)]);
    assert_ok!(live.update(&snapshot));
    assert!(live.get_counter("Rows").is_none());
    assert!(live.get_child("A").is_none());
}

#[test]
fn test_update_from_nodes_advances_past_subtree() {
    let live = RuntimeProfile::new("A");
    let nodes = vec![
        node("A", 1, None, 1),
        node("A1", 0, None, 2),
        node("B", 0, None, 3),
    ];
    let mut idx = 0;
    assert_ok!(live.update_from_nodes(&nodes, &mut idx));
    assert_eq!(idx, 2);
    assert_eq!(nodes[idx].name, "B");
}

#[test]
fn test_truncated_snapshot_is_an_error() {
    let live = RuntimeProfile::new("Query");
    let snapshot = TRuntimeProfileTree::new(vec![node("Query", 2, None, 1), node("A", 0, None, 2)]);
    let err = assert_err!(live.update(&snapshot));
    assert!(err.contains("truncated"), "{err}");
}

#[test]
fn test_unit_mismatch_keeps_local_counter() {
    let live = RuntimeProfile::new("Query");
    live.add_counter("Rows", TUnit::BYTES).set(7);
    assert_ok!(live.update(&TRuntimeProfileTree::new(vec![node("Query", 0, None, 99)])));
    let rows = live.get_counter("Rows").expect("rows");
    assert_eq!(rows.unit(), TUnit::BYTES);
    assert_eq!(rows.value(), 7);
}

#[test]
fn test_derived_counter_is_not_overwritten() {
    let live = RuntimeProfile::new("Query");
    live.add_derived_counter("Rows", TUnit::UNIT, Box::new(|| 42), "")
        .expect("derived");
    assert_ok!(live.update(&TRuntimeProfileTree::new(vec![node("Query", 0, None, 1)])));
    assert_eq!(rows_of(&live), 42);
}

#[test]
fn test_update_applies_extremes_and_info_strings() {
    let mut query = node("Query", 0, None, 60);
    query.counters[0].min_value = Some(10);
    query.counters[0].max_value = Some(30);
    query.info_strings = BTreeMap::from([
        ("Alpha".to_string(), "a".to_string()),
        ("Zeta".to_string(), "z".to_string()),
    ]);
    query.info_strings_display_order = vec!["Zeta".to_string(), "Alpha".to_string()];

    let live = RuntimeProfile::new("Query");
    live.add_info_string("Zeta", "old");
    assert_ok!(live.update(&TRuntimeProfileTree::new(vec![query])));

    let rows = live.get_counter("Rows").expect("rows");
    assert_eq!(rows.min_value(), Some(10));
    assert_eq!(rows.max_value(), Some(30));
    assert_eq!(
        live.info_strings(),
        vec![
            ("Zeta".to_string(), "z".to_string()),
            ("Alpha".to_string(), "a".to_string()),
        ]
    );
}

#[test]
fn test_new_child_takes_metadata_and_indent() {
    let mut child = node("Sink", 0, None, 1);
    child.metadata = 77;
    child.indent = false;
    let live = RuntimeProfile::new("Query");
    assert_ok!(live.update(&TRuntimeProfileTree::new(vec![node("Query", 1, None, 0), child])));
    let (sink, indent) = live
        .children_with_indent()
        .into_iter()
        .next()
        .expect("sink");
    assert_eq!(sink.name(), "Sink");
    assert_eq!(sink.metadata(), 77);
    assert!(!indent);
}

#[test]
fn test_encoded_snapshot_applies_like_the_original() {
    let source = instance_profile(12, 120);
    source.inc_version();
    let bytes = assert_ok!(serialize_profile_tree(&source.to_thrift_tree()));
    let decoded = assert_ok!(deserialize_profile_tree(&bytes));

    let live = RuntimeProfile::new("Fragment");
    assert_ok!(live.update(&decoded));
    assert_eq!(live.version(), 1);
    assert_eq!(rows_of(&live.get_child("Scan").expect("scan")), 12);
}
