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
//! Runtime profile counters for NovaRocks.
//!
//! A [`RuntimeProfile`] is a named node in a tree of execution statistics. Hot-path
//! code registers counters once and updates them lock-free; coordinators merge the
//! per-instance trees and apply incremental snapshots for live progress reporting.

pub mod common;
pub mod metrics;
pub mod runtime;
pub mod runtime_profile;

pub use common::app_config as novarocks_config;
pub use common::logging as novarocks_logging;

pub use runtime::counter::{Counter, CounterRef, WaterMarkCounter};
pub use runtime::object_pool::ObjectPool;
pub use runtime::profile::{Profiler, RuntimeProfile};
pub use runtime::scoped_timer::{ScopedCounter, ScopedRawTimer, ScopedTimer};
pub use runtime::rate_counter::{RateCounterUpdater, rate_counter_updater};
pub use runtime::thread_counters::{ThreadCounterMeasurement, ThreadCounters};
