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
use std::sync::OnceLock;

use crate::novarocks_config::{NovaRocksProfileConfig, config as novarocks_app_config, installed};

static DISCOVERED: OnceLock<Option<&'static NovaRocksProfileConfig>> = OnceLock::new();

/// An installed config wins; otherwise the env/default location is looked up once.
fn app_config() -> Option<&'static NovaRocksProfileConfig> {
    installed().or_else(|| *DISCOVERED.get_or_init(|| novarocks_app_config().ok()))
}

pub(crate) fn log_filter() -> String {
    app_config()
        .map(NovaRocksProfileConfig::effective_log_filter)
        .unwrap_or_else(|| "info".to_string())
}

pub(crate) fn rate_counter_update_interval_ms() -> u64 {
    app_config()
        .map(|c| c.profile.rate_counter_update_interval_ms)
        .unwrap_or(500)
}

pub(crate) fn merge_require_identical() -> bool {
    app_config()
        .map(|c| c.profile.merge_require_identical)
        .unwrap_or(true)
}

pub(crate) fn pretty_print_indent() -> bool {
    app_config()
        .map(|c| c.profile.pretty_print_indent)
        .unwrap_or(true)
}
