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
use std::time::Instant;

use crate::runtime::counter::clamp_u128_to_i64;

/// Resumable monotonic stopwatch. Time accumulates across start/stop pairs.
#[derive(Clone, Debug, Default)]
pub struct MonotonicStopWatch {
    start: Option<Instant>,
    total_ns: i64,
}

impl MonotonicStopWatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started() -> Self {
        let mut sw = Self::new();
        sw.start();
        sw
    }

    pub fn start(&mut self) {
        if self.start.is_none() {
            self.start = Some(Instant::now());
        }
    }

    pub fn stop(&mut self) {
        if let Some(start) = self.start.take() {
            self.total_ns = self
                .total_ns
                .saturating_add(clamp_u128_to_i64(start.elapsed().as_nanos()));
        }
    }

    pub fn reset(&mut self) {
        self.start = None;
        self.total_ns = 0;
    }

    pub fn is_running(&self) -> bool {
        self.start.is_some()
    }

    /// Elapsed nanoseconds, including the currently running interval.
    pub fn elapsed_time(&self) -> i64 {
        match self.start {
            Some(start) => self
                .total_ns
                .saturating_add(clamp_u128_to_i64(start.elapsed().as_nanos())),
            None => self.total_ns,
        }
    }
}
