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
//! Common utilities and helpers for integration tests.
#![allow(dead_code)]
#![allow(unused_imports)]

use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

use novarocks_profile::metrics::TUnit;
use novarocks_profile::novarocks_config;
use novarocks_profile::novarocks_logging;
use novarocks_profile::runtime::counter::create_strategy_for_unit;
use novarocks_profile::runtime_profile::{TCounterMergeType, TCounterMinMaxType};
use novarocks_profile::{ObjectPool, RuntimeProfile};

/// Test configuration backed by a temporary TOML file.
pub struct TestConfig {
    pub temp_dir: TempDir,
    pub config_path: PathBuf,
}

impl TestConfig {
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let config_path = temp_dir.path().join("test_novarocks_profile.toml");

        // Same values as the built-in defaults apart from a faster rate updater,
        // so tests do not depend on whether this file was installed first.
        let config_content = r#"
log_level = "debug"

[profile]
rate_counter_update_interval_ms = 20
merge_require_identical = true
pretty_print_indent = true
"#;

        std::fs::write(&config_path, config_content)?;

        Ok(Self {
            temp_dir,
            config_path,
        })
    }

    pub fn init_logging(&self) {
        novarocks_logging::init_with_level("debug");
    }

    pub fn load_config(
        &self,
    ) -> anyhow::Result<&'static novarocks_config::NovaRocksProfileConfig> {
        novarocks_config::init_from_path(&self.config_path)
    }
}

impl Default for TestConfig {
    fn default() -> Self {
        Self::new().expect("Failed to create test config")
    }
}

/// One parallel instance of a two-level plan:
///
/// ```text
/// Fragment
///   Scan      Rows, LatencyNs (AVG), BytesRead > IOTime > ReadTime
///   Agg       Rows
/// ```
pub fn instance_profile(rows: i64, latency_ns: i64) -> RuntimeProfile {
    let fragment = RuntimeProfile::new("Fragment");
    fragment.add_info_string("Backend", "127.0.0.1");

    let scan = fragment.child("Scan");
    scan.add_counter("Rows", TUnit::UNIT).set(rows);
    scan.add_timer("LatencyNs").set(latency_ns);
    scan.add_counter("BytesRead", TUnit::BYTES).set(rows * 100);
    scan.add_child_timer("IOTime", "BytesRead").set(latency_ns / 2);
    scan.add_child_timer("ReadTime", "IOTime").set(latency_ns / 4);

    let agg = fragment.child("Agg");
    agg.add_counter("Rows", TUnit::UNIT).set(rows / 10);
    fragment
}

/// Three instances with rows {10, 20, 30} and latency {100, 200, 300}ns.
pub fn three_instances() -> Vec<RuntimeProfile> {
    vec![
        instance_profile(10, 100),
        instance_profile(20, 200),
        instance_profile(30, 300),
    ]
}

/// A UNIT counter that is never merged.
pub fn skip_all_strategy() -> novarocks_profile::runtime_profile::TCounterStrategy {
    create_strategy_for_unit(
        TUnit::UNIT,
        TCounterMergeType::SKIP_ALL,
        0,
        TCounterMinMaxType::SKIP_ALL,
    )
}

/// Wait for a condition to become true, with timeout.
pub fn wait_for<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

/// Run `f` and fail the test if it does not finish within `timeout`.
pub fn run_with_timeout<F, T>(timeout: Duration, f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    use std::sync::mpsc;

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(f());
    });

    match rx.recv_timeout(timeout) {
        Ok(v) => v,
        Err(_) => panic!("test timed out after {:?}", timeout),
    }
}

#[macro_export]
macro_rules! assert_ok {
    ($result:expr) => {
        match $result {
            Ok(value) => value,
            Err(e) => panic!("Expected Ok, got Err: {:?}", e),
        }
    };
}

#[macro_export]
macro_rules! assert_err {
    ($result:expr) => {
        match $result {
            Ok(value) => panic!("Expected Err, got Ok: {:?}", value),
            Err(e) => e,
        }
    };
}
