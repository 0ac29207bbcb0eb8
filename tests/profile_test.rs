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
//! Integration tests for building, inspecting and rendering profile trees.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::common::{TestConfig, instance_profile, wait_for};
use novarocks_profile::metrics::TUnit;
use novarocks_profile::runtime::counter::{counter_sum, default_counter_strategy, units_per_second};
use novarocks_profile::runtime::profile::{ROOT_COUNTER, TOTAL_TIME_COUNTER_NAME};
use novarocks_profile::{
    Profiler, RuntimeProfile, ScopedTimer, ThreadCounterMeasurement, rate_counter_updater,
};

mod common;

#[test]
fn test_config_loading() {
    let test_config = TestConfig::new().expect("Failed to create test config");
    test_config.init_logging();
    let config = test_config.load_config().expect("Failed to load config");
    assert_eq!(config.log_level, "debug");
    assert!(config.profile.merge_require_identical);
    assert!(config.profile.pretty_print_indent);
}

#[test]
fn test_profiler_alias_builds_tree() {
    let profiler = Profiler::new("runtime_profile_smoke");
    let tree = profiler.to_thrift_tree();
    assert_eq!(tree.nodes.len(), 1);
    assert_eq!(tree.nodes[0].name, "runtime_profile_smoke");
    assert_eq!(tree.nodes[0].counters[0].name, TOTAL_TIME_COUNTER_NAME);
}

#[test]
fn test_get_counters_walks_descendants() {
    let fragment = instance_profile(10, 100);
    let mut rows = Vec::new();
    fragment.get_counters("Rows", &mut rows);
    assert_eq!(rows.len(), 2);
    assert_eq!(counter_sum(&rows), 11);

    let mut all = Vec::new();
    fragment.get_all_children(&mut all);
    let names = all.iter().map(|p| p.name()).collect::<Vec<_>>();
    assert_eq!(names, vec!["Fragment", "Scan", "Agg"]);
}

#[test]
fn test_child_parent_links() {
    let fragment = instance_profile(10, 100);
    let scan = fragment.get_child("Scan").expect("scan");
    assert!(scan.parent().expect("parent").ptr_eq(&fragment));
    assert!(fragment.parent().is_none());

    fragment.remove_childs();
    assert_eq!(fragment.num_children(), 0);
    assert!(scan.parent().is_none());
    // Handles held elsewhere stay usable.
    assert_eq!(scan.get_counter("Rows").expect("rows").value(), 10);
}

#[test]
fn test_child_ordering() {
    let root = RuntimeProfile::new("root");
    for name in ["c", "a", "b"] {
        root.child(name);
    }
    root.create_child("first", true, true);
    assert_eq!(root.children_name_string(), "first, c, a, b");
    root.reverse_childs();
    assert_eq!(root.children_name_string(), "b, a, c, first");
    root.sort_children(|x, y| x.name().cmp(&y.name()));
    assert_eq!(root.children_name_string(), "a, b, c, first");
    assert_eq!(root.get_child_at(1).expect("second").name(), "b");
    assert!(root.get_child_at(4).is_none());
}

#[test]
fn test_pretty_print_renders_tree() {
    let fragment = instance_profile(1_234, 2_500_000);
    fragment.total_time_counter().set(10_000_000);
    fragment
        .get_child("Scan")
        .expect("scan")
        .total_time_counter()
        .set(4_000_000);
    fragment.compute_time_in_profile();

    let text = fragment.to_string();
    assert!(
        text.starts_with("Fragment:(Active: 10.000ms, % non-child: 60.00%)\n"),
        "{text}"
    );
    assert!(text.contains("   Backend: 127.0.0.1\n"), "{text}");
    assert!(text.contains("  Scan:(Active: 4.000ms, % non-child: 40.00%)\n"), "{text}");
    assert!(text.contains("     - Rows: 1.23K (1234)\n"), "{text}");
    assert!(text.contains("     - BytesRead: 120.51 KB\n"), "{text}");
    assert!(text.contains("       - IOTime: 1.250ms\n"), "{text}");
    assert!(text.contains("         - ReadTime: 625.000us\n"), "{text}");
    assert!(!text.contains(&format!("- {TOTAL_TIME_COUNTER_NAME}")), "{text}");
}

#[test]
fn test_event_sequence_in_pretty_print() {
    let root = RuntimeProfile::new("Query");
    let seq = root.add_event_sequence("Timeline");
    {
        let mut seq = seq.lock().expect("sequence lock");
        seq.start();
        thread::sleep(Duration::from_millis(1));
        seq.mark_event("Planned");
        seq.mark_event("Finished");
    }
    assert!(Arc::ptr_eq(&seq, &root.add_event_sequence("Timeline")));
    let text = root.pretty_print("");
    assert!(text.contains("  Timeline: "), "{text}");
    assert!(text.contains("     - Planned: "), "{text}");
    assert!(text.contains("     - Finished: "), "{text}");
}

#[test]
fn test_water_mark_counters() {
    let root = RuntimeProfile::new("Query");
    let peak = root.add_high_water_mark_counter(
        "PeakMemoryUsage",
        TUnit::BYTES,
        default_counter_strategy(TUnit::BYTES),
        ROOT_COUNTER,
    );
    peak.add(100);
    peak.add(50);
    peak.add(-120);
    assert_eq!(peak.current_value(), 30);
    assert_eq!(peak.value(), 150);
    assert!(peak.try_add(100, 200));
    assert!(!peak.try_add(100, 200));
    assert_eq!(peak.current_value(), 130);
    assert_eq!(peak.value(), 150);

    let low = root.add_low_water_mark_counter(
        "MinFreeSlots",
        TUnit::UNIT,
        default_counter_strategy(TUnit::UNIT),
        ROOT_COUNTER,
    );
    assert_eq!(low.value(), i64::MAX);
    low.set(10);
    low.add(-3);
    low.add(5);
    assert_eq!(low.current_value(), 12);
    assert_eq!(low.value(), 7);
}

#[test]
fn test_derived_counter_reads_source() {
    let root = RuntimeProfile::new("Scan");
    let bytes = root.add_counter("BytesRead", TUnit::BYTES);
    let timer = root.add_timer("ScanTime");
    let (b, t) = (Arc::clone(&bytes), Arc::clone(&timer));
    let throughput = root
        .add_derived_counter(
            "Throughput",
            TUnit::BYTES_PER_SECOND,
            Box::new(move || units_per_second(&b, &t)),
            ROOT_COUNTER,
        )
        .expect("derived");
    bytes.set(2_000);
    timer.set(500_000_000);
    assert_eq!(throughput.value(), 4_000);
    assert!(root
        .add_derived_counter("Throughput", TUnit::UNIT, Box::new(|| 0), ROOT_COUNTER)
        .is_none());
}

#[test]
fn test_scoped_timer_from_profile() {
    let root = RuntimeProfile::new("Scan");
    {
        let _timer = root.scoped_timer("OpenTime");
        thread::sleep(Duration::from_millis(2));
    }
    assert!(root.get_counter("OpenTime").expect("timer").value() >= 2_000_000);

    let cancelled = Arc::new(AtomicBool::new(true));
    {
        let _timer = ScopedTimer::with_cancel(root.add_timer("CloseTime"), Arc::clone(&cancelled));
    }
    assert_eq!(root.get_counter("CloseTime").expect("timer").value(), 0);
    assert!(cancelled.load(Ordering::Relaxed));
}

#[test]
fn test_thread_counters_measure_on_drop() {
    let root = RuntimeProfile::new("Fragment");
    let counters = root.add_thread_counters("");
    {
        let _m = ThreadCounterMeasurement::new(counters.clone());
        thread::sleep(Duration::from_millis(2));
    }
    assert!(counters.total_time.value() >= 2_000_000);
    assert!(root.get_counter("VoluntaryContextSwitches").is_some());
}

#[test]
fn test_global_rate_counter_updates() {
    let root = RuntimeProfile::new("Scan");
    let rows = root.add_counter("RowsRead", TUnit::UNIT);
    rows.set(1_000_000);
    let rate = root.add_rate_counter("RowsReadRate", &rows);
    assert_eq!(rate.unit(), TUnit::UNIT_PER_SECOND);
    assert!(wait_for(|| rate.value() > 0, Duration::from_secs(5)));
    rate_counter_updater().unregister(&rate);
}

#[test]
fn test_counter_maintenance_helpers() {
    let src = instance_profile(30, 300);
    let scan = src.get_child("Scan").expect("scan");

    let dst = RuntimeProfile::new("Summary");
    dst.add_counter("ScanStats", TUnit::NONE);
    dst.copy_all_counters_from(&scan, "ScanStats");
    let (rows, parent) = dst.get_counter_pair("Rows").expect("rows");
    assert_eq!(rows.value(), 30);
    assert_eq!(parent, "ScanStats");
    let (_, parent) = dst.get_counter_pair("ReadTime").expect("read time");
    assert_eq!(parent, "IOTime");

    dst.divide(3);
    assert_eq!(rows.value(), 10);

    scan.remove_counters(&BTreeSet::from(["ReadTime".to_string(), "Rows".to_string()]));
    let (_, parent) = scan.get_counter_pair("ReadTime").expect("read time kept");
    assert_eq!(parent, ROOT_COUNTER);
    assert!(scan.get_counter("IOTime").is_none());
    assert!(scan.get_counter(TOTAL_TIME_COUNTER_NAME).is_some());
    assert_eq!(scan.num_counters(), 3);
}

#[test]
fn test_info_string_helpers() {
    let root = RuntimeProfile::new("Query");
    root.append_exec_option("Spill");
    root.append_exec_option("RuntimeFilter");
    assert_eq!(
        root.get_info_string("ExecOption").as_deref(),
        Some("Spill, RuntimeFilter")
    );
    let other = RuntimeProfile::new("Other");
    other.add_info_string("State", "Finished");
    root.copy_all_info_strings_from(&other);
    assert_eq!(root.get_info_string("State").as_deref(), Some("Finished"));
    assert!(root.get_info_string("Missing").is_none());
}
